//! Cooperative cancellation scoped to one request generation.

use std::{fmt, future::Future};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Monotonically increasing request counter of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cancellation token bound to one request generation.
///
/// One scope is created per `start()` and handed to every timer, network read
/// and scheduled flush of that generation. Checking the scope before a
/// callback is the only staleness check in the crate: once a newer `start()`
/// or a `stop()` cancels it, nothing from the generation is delivered.
///
/// Scopes are children of the session's root token, so disposing the session
/// cancels every generation at once.
#[derive(Clone, Debug)]
pub struct CancellationScope {
    token: CancellationToken,
    generation: Generation,
}

impl CancellationScope {
    /// Create a scope that is cancelled together with `parent`.
    pub fn new(parent: &CancellationToken, generation: Generation) -> Self {
        Self {
            token: parent.child_token(),
            generation,
        }
    }

    /// A free-standing scope, not linked to any session.
    pub fn detached(generation: Generation) -> Self {
        Self {
            token: CancellationToken::new(),
            generation,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Run `fut` until it completes or the scope is cancelled.
    ///
    /// Returns `None` when cancellation won; `fut` is dropped at that point.
    pub async fn run<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }
}

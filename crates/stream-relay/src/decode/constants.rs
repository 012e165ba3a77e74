//! Constants used by the stream line grammar.

/// Newline byte
pub(crate) const LF: u8 = b'\n';
/// Carriage return byte
pub(crate) const CR: u8 = b'\r';

/// UTF-8 encoding of U+FEFF BYTE ORDER MARK
pub(crate) const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// Field carrying a JSON frame payload.
pub(crate) const DATA_FIELD: &str = "data";
/// Field carrying the event id used for resumption.
pub(crate) const ID_FIELD: &str = "id";
/// Fields that are valid but carry nothing for us.
pub(crate) const IGNORED_FIELDS: [&str; 2] = ["event", "retry"];

/// Payload of the end-of-stream line.
pub(crate) const DONE_SENTINEL: &str = "[DONE]";

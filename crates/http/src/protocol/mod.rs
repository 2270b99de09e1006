//! Protocol types shared by the HTTP/1.1 codec and the connection providers.
//!
//! - [`RequestHead`]: a decoded HTTP/1.x request head before its body is framed
//! - [`PayloadSize`]: how the body following a head is framed
//! - [`HttpError`], [`ParseError`], [`SendError`]: connection level failures

mod request;
pub use request::RequestHead;
pub(crate) use request::has_token;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

/// Represents the size information of an HTTP/1.x payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Empty payload (no body)
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty | PayloadSize::Length(0))
    }
}

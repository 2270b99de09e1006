use crate::codec::header::HeaderEncoder;
use crate::protocol::SendError;
use bytes::{Bytes, BytesMut};
use http::Response;
use tokio_util::codec::Encoder;

/// Writes a buffered response as a `Content-Length` framed HTTP/1.1 message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Response<Bytes>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = item.into_parts();
        self.header_encoder.encode((Response::from_parts(parts, ()), body.len() as u64), dst)?;
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn encode_head_and_body() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"hi"))
            .unwrap();

        let mut dst = BytesMut::new();
        ResponseEncoder::new().encode(response, &mut dst).unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 2\r\n\r\nhi");
    }
}

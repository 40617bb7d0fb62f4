//! Newline-delimited JSON framing codec.
//!
//! One [`Frame`] per line. Blank lines are skipped. A line that is not a
//! valid frame does not poison the stream: it decodes to
//! [`Inbound::Malformed`], carrying the correlation id when one could be
//! recovered, so the reader can answer or fail the matching request and keep
//! going. Lines longer than [`MAX_FRAME_LEN`] are dropped the same way, with
//! no id. Encoding a frame over the limit fails with `FrameTooLong`.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::TransportError;
use crate::protocol::{CallId, Frame};

/// Maximum encoded frame length in bytes
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(Frame),
    Malformed { id: Option<CallId>, reason: String },
}

pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        }
    }

    fn parse(line: &str) -> Inbound {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Inbound::Malformed {
                    id: None,
                    reason: e.to_string(),
                }
            }
        };
        let id = value.get("id").and_then(Value::as_u64);
        match serde_json::from_value(value) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => Inbound::Malformed {
                id,
                reason: e.to_string(),
            },
        }
    }

    fn next_inbound(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Inbound>, TransportError> {
        loop {
            let line = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };

            // LinesCodec discards the rest of an oversized line by itself
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Ok(Some(Inbound::Malformed {
                        id: None,
                        reason: format!("frame longer than {MAX_FRAME_LEN} bytes"),
                    }))
                }
                Err(LinesCodecError::Io(e)) => return Err(TransportError::Io(e)),
            };

            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(Self::parse(&line))),
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_inbound(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_inbound(src, true)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_string(&item)?;
        if line.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLong { max: MAX_FRAME_LEN });
        }
        self.lines.encode(line, dst).map_err(|e| match e {
            LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLong { max: MAX_FRAME_LEN },
            LinesCodecError::Io(e) => TransportError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("{\"kind\":\"discovery_request\",\"id\":1}\n");

        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result, Some(Inbound::Frame(Frame::DiscoveryRequest { id: 1 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_line() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("{\"kind\":\"discovery_req");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"uest\",\"id\":4}\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Frame(Frame::DiscoveryRequest { id: 4 }))
        );
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("\n  \n{\"kind\":\"call_response\",\"id\":2,\"content\":\"5\"}\n");

        match codec.decode(&mut buf).unwrap() {
            Some(Inbound::Frame(frame)) => assert_eq!(frame.id(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_json() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("not json\n{\"kind\":\"discovery_request\",\"id\":3}\n");

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed { id: None, .. })
        ));
        // The stream keeps going after a bad line
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Frame(Frame::DiscoveryRequest { id: 3 }))
        );
    }

    #[test]
    fn test_decode_recovers_id_of_bad_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("{\"kind\":\"discovery_response\",\"id\":12,\"tools\":\"nope\"}\n");

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed { id: Some(12), .. })
        ));
    }

    #[test]
    fn test_decode_eof_without_newline() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("{\"kind\":\"discovery_request\",\"id\":5}");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Inbound::Frame(Frame::DiscoveryRequest { id: 5 }))
        );
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Frame::CallError { id: 9, message: "boom".into() }, &mut buf)
            .unwrap();

        assert!(buf.ends_with(b"\n"));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Frame(Frame::CallError { id: 9, message: "boom".into() }))
        );
    }

    #[test]
    fn test_oversized_line_skipped() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_LEN + 2].as_slice());
        buf.extend_from_slice(b"\n{\"kind\":\"discovery_request\",\"id\":6}\n");

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Malformed { id: None, .. })
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Frame(Frame::DiscoveryRequest { id: 6 }))
        );
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::CallResponse { id: 1, content: "x".repeat(MAX_FRAME_LEN) };

        let err = codec.encode(frame, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLong { .. }));
        assert!(buf.is_empty());
    }
}

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// every message on the wire is `u32_be header_len || header_json ||
/// optional_body`. when the header object carries a `chunk_size` field the
/// decoder keeps reading until exactly that many additional body bytes have
/// arrived.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Value,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn header_only(header: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            header: serde_json::to_value(header)?,
            body: Vec::new(),
        })
    }

    pub fn with_body(header: impl Serialize, body: Vec<u8>) -> anyhow::Result<Self> {
        Ok(Self {
            header: serde_json::to_value(header)?,
            body,
        })
    }

    pub fn header_as<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_value(self.header.clone())?)
    }

    fn declared_body_len(&self) -> usize {
        self.header
            .get("chunk_size")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }
}

#[derive(Debug, Clone)]
enum DecodeState {
    WaitingForHeaderLen,
    WaitingForHeader { header_len: u32 },
    WaitingForBody { header: Value, needed: usize },
}

pub struct FrameCodec {
    state: DecodeState,
    max_frame_size: usize,
}

impl FrameCodec {
    /// matches the teacher codec's guard against hostile peers hogging
    /// memory with an oversized declared frame length.
    pub const MAX_FRAME_SIZE: usize = 2 * (1 << 20);

    pub fn new() -> Self {
        Self {
            state: DecodeState::WaitingForHeaderLen,
            max_frame_size: Self::MAX_FRAME_SIZE,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::WaitingForHeaderLen => {
                    const LEN_SIZE: usize = std::mem::size_of::<u32>();
                    if src.len() < LEN_SIZE {
                        return Ok(None);
                    }
                    let header_len = u32::from_be_bytes(src[0..LEN_SIZE].try_into().unwrap());
                    if header_len as usize > self.max_frame_size {
                        return Err(WireError::FrameTooLarge(header_len as usize));
                    }
                    src.advance(LEN_SIZE);
                    self.state = DecodeState::WaitingForHeader { header_len };
                }

                DecodeState::WaitingForHeader { header_len } => {
                    let header_len = *header_len as usize;
                    if src.len() < header_len {
                        src.reserve(header_len - src.len());
                        return Ok(None);
                    }
                    let header_bytes = src.split_to(header_len);
                    let header: Value = serde_json::from_slice(&header_bytes)?;
                    let needed = header
                        .get("chunk_size")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as usize;

                    if needed > self.max_frame_size {
                        return Err(WireError::FrameTooLarge(needed));
                    }

                    if needed == 0 {
                        self.state = DecodeState::WaitingForHeaderLen;
                        return Ok(Some(Frame {
                            header,
                            body: Vec::new(),
                        }));
                    }
                    self.state = DecodeState::WaitingForBody { header, needed };
                }

                DecodeState::WaitingForBody { needed, .. } => {
                    let needed = *needed;
                    if src.len() < needed {
                        src.reserve(needed - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(needed).to_vec();
                    let DecodeState::WaitingForBody { header, .. } =
                        std::mem::replace(&mut self.state, DecodeState::WaitingForHeaderLen)
                    else {
                        unreachable!()
                    };
                    return Ok(Some(Frame { header, body }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header_bytes = serde_json::to_vec(&item.header)?;
        if header_bytes.len() > self.max_frame_size || item.declared_body_len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge(header_bytes.len().max(item.body.len())));
        }

        dst.put_u32(header_bytes.len() as u32);
        dst.put_slice(&header_bytes);
        dst.put_slice(&item.body);
        Ok(())
    }
}

pub type FramedStream<T> = tokio_util::codec::Framed<T, FrameCodec>;

pub fn upgrade_stream<T>(stream: T) -> FramedStream<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite,
{
    FramedStream::new(stream, FrameCodec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_a_header_only_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::header_only(json!({"command": "FILE_INFO", "file_name": "x.bin"})).unwrap();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header, frame.header);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn round_trips_a_frame_with_a_body() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::with_body(json!({"status": "success", "chunk_size": 4}), vec![1, 2, 3, 4]).unwrap();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_returns_none_until_the_full_frame_has_arrived() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::with_body(json!({"status": "success", "chunk_size": 4}), vec![1, 2, 3, 4]).unwrap();
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_frames_declaring_an_oversized_header() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((FrameCodec::MAX_FRAME_SIZE + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }
}

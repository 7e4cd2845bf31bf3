use std::io;

use tokio_util::{
    bytes::{Buf, BufMut, Bytes, BytesMut},
    codec::{Decoder, Encoder},
};

const HEADER_LENGTH: usize = 4;

/// A frame read from the browser.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Message(BytesMut),
    /// Declared length of a frame above the limit. Its body is dropped as it arrives, so the
    /// stream stays in sync.
    Oversized(usize),
}

/// Native messaging framing: a native endian `u32` length followed by the JSON body.
///
/// Unlike `LengthDelimitedCodec`, a frame over the limit doesn't end the stream. The decoder
/// reports it once and then skips the declared number of bytes.
#[derive(Debug)]
pub struct NativeMessagingCodec {
    max_message_length: usize,
    skipping: usize,
}

impl NativeMessagingCodec {
    pub fn new(max_message_length: usize) -> Self {
        Self {
            max_message_length,
            skipping: 0,
        }
    }

    fn skip(&mut self, src: &mut BytesMut) {
        let skipped = self.skipping.min(src.len());
        src.advance(skipped);
        self.skipping -= skipped;
    }
}

impl Decoder for NativeMessagingCodec {
    type Item = Incoming;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Incoming>, io::Error> {
        if self.skipping > 0 {
            self.skip(src);
            if self.skipping > 0 {
                return Ok(None);
            }
        }
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LENGTH];
        header.copy_from_slice(&src[..HEADER_LENGTH]);
        let length = u32::from_ne_bytes(header) as usize;

        if length > self.max_message_length {
            src.advance(HEADER_LENGTH);
            self.skipping = length;
            self.skip(src);
            return Ok(Some(Incoming::Oversized(length)));
        }

        if src.len() < HEADER_LENGTH + length {
            src.reserve(HEADER_LENGTH + length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LENGTH);
        Ok(Some(Incoming::Message(src.split_to(length))))
    }
}

impl Encoder<Bytes> for NativeMessagingCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        let length = u32::try_from(item.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message is too long"))?;
        dst.reserve(HEADER_LENGTH + item.len());
        dst.put_slice(&length.to_ne_bytes());
        dst.put_slice(&item);
        Ok(())
    }
}

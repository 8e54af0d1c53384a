use std::io;

use bytes::BytesMut;
use encoding_rs::{Encoding, WINDOWS_1252};
use proto::{Message, format, parse};
use tokio_util::codec::{Decoder, Encoder};

pub type ParseResult<T = Message, E = parse::Error> = std::result::Result<T, E>;

/// Line codec for the IRC wire format.
///
/// Inbound lines are split on `\n` with an optional preceding `\r`. Bytes
/// that are not valid UTF-8 are decoded with the fallback encoding instead.
/// Outbound messages are always written as UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    fallback: &'static Encoding,
}

impl Codec {
    pub fn new(fallback: &'static Encoding) -> Self {
        Self { fallback }
    }

    /// Looks up the fallback encoding by its WHATWG label, e.g. `latin1`.
    pub fn with_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.as_bytes()).map(Self::new)
    }

    fn decode_line(&self, bytes: &[u8]) -> String {
        match std::str::from_utf8(bytes) {
            Ok(line) => line.to_string(),
            Err(_) => self
                .fallback
                .decode_without_bom_handling(bytes)
                .0
                .into_owned(),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(WINDOWS_1252)
    }
}

impl Decoder for Codec {
    type Item = ParseResult;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };

            let bytes = src.split_to(pos + 1);
            let line = self.decode_line(&bytes);

            // Blank keep-alive lines carry nothing
            if line.trim_end_matches(['\r', '\n']).trim().is_empty() {
                continue;
            }

            return Ok(Some(parse::message(&line)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        // Final line without a terminator
        if src.is_empty() {
            return Ok(None);
        }

        let bytes = src.split_to(src.len());
        let line = self.decode_line(&bytes);

        if line.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(parse::message(&line)))
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = format::message(message);

        dst.extend(encoded.into_bytes());

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
}

//! Gzip detection and decompression for feed payloads
//!
//! Feeds arrive either as plain XML or gzip. Detection looks at magic bytes
//! rather than the URL or `Content-Encoding`, since mirrors are inconsistent
//! about both.

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzDecoder as GzWriteDecoder;
use futures::StreamExt;
use std::io::{Read, Write};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::storage::ByteStream;

/// Bytes needed before the stream format can be sniffed
const SNIFF_LEN: usize = 10;

/// Compression formats detected by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Uncompressed,
}

pub struct DecompressionService;

impl DecompressionService {
    /// Detect compression format using magic bytes
    pub fn detect_compression_format(data: &[u8]) -> CompressionFormat {
        match infer::get(data) {
            Some(kind) if kind.mime_type() == "application/gzip" => CompressionFormat::Gzip,
            _ => CompressionFormat::Uncompressed,
        }
    }

    /// Decompress a whole payload, passing uncompressed data through
    pub fn decompress(data: Bytes) -> AppResult<Bytes> {
        match Self::detect_compression_format(&data) {
            CompressionFormat::Uncompressed => Ok(data),
            CompressionFormat::Gzip => {
                let mut decoder = GzDecoder::new(data.as_ref());
                let mut decompressed = Vec::new();
                decoder.read_to_end(&mut decompressed).map_err(|e| {
                    AppError::malformed_feed(format!("Failed to decompress gzip data: {e}"))
                })?;
                debug!(
                    "Decompressed {} gzip bytes into {} bytes",
                    data.len(),
                    decompressed.len()
                );
                Ok(Bytes::from(decompressed))
            }
        }
    }

    /// Wrap a byte stream in an incremental gzip decoder.
    ///
    /// The format is sniffed from the first bytes; plain data passes through
    /// untouched. Each upstream chunk is decoded as it is pulled, so only one
    /// chunk plus decoder state is held at a time. Corrupt or truncated gzip
    /// surfaces as [`AppError::MalformedFeed`].
    pub fn decompress_stream(mut input: ByteStream) -> ByteStream {
        async_stream::try_stream! {
            let mut head = BytesMut::new();
            let mut exhausted = false;
            while head.len() < SNIFF_LEN {
                match input.next().await {
                    Some(chunk) => head.extend_from_slice(&chunk?),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }

            let format = Self::detect_compression_format(&head);
            debug!("Streaming feed detected as {:?}", format);

            match format {
                CompressionFormat::Uncompressed => {
                    if !head.is_empty() {
                        yield head.freeze();
                    }
                    if !exhausted {
                        while let Some(chunk) = input.next().await {
                            yield chunk?;
                        }
                    }
                }
                CompressionFormat::Gzip => {
                    let mut decoder = GzWriteDecoder::new(Vec::new());
                    let mut pending = Some(head.freeze());
                    loop {
                        let chunk = match pending.take() {
                            Some(chunk) => chunk,
                            None if exhausted => break,
                            None => match input.next().await {
                                Some(chunk) => chunk?,
                                None => break,
                            },
                        };
                        decoder.write_all(&chunk).map_err(corrupt_gzip)?;
                        let decoded = std::mem::take(decoder.get_mut());
                        if !decoded.is_empty() {
                            yield Bytes::from(decoded);
                        }
                    }
                    let tail = decoder.finish().map_err(corrupt_gzip)?;
                    if !tail.is_empty() {
                        yield Bytes::from(tail);
                    }
                }
            }
        }
        .boxed()
    }
}

fn corrupt_gzip(e: std::io::Error) -> AppError {
    AppError::malformed_feed(format!("Failed to decompress gzip stream: {e}"))
}

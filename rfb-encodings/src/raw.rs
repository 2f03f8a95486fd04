//! Raw encoding decoder - uncompressed pixel data.
//!
//! Raw encoding (type 0) is the simplest VNC encoding. It transmits pixels as
//! uncompressed data in the server's pixel format. The decoder reads
//! `width * height * bytes_per_pixel` bytes from the stream and translates
//! them into the local buffer's pixel format via
//! [`rfb_pixelbuffer::MutablePixelBuffer::blt`], which takes a byte-copy fast
//! path whenever the server and local formats match exactly.
//!
//! # Wire Format
//!
//! ```text
//! +-------------+
//! | Pixel data  |  width * height * bytes_per_pixel bytes
//! +-------------+
//! ```
//!
//! Each pixel is transmitted in the server's pixel format (as negotiated during
//! the ServerInit handshake). No compression or encoding is applied.
//!
//! # Performance
//!
//! Raw encoding is the least efficient in terms of bandwidth (since no compression
//! is used), but it's the simplest to decode and requires minimal CPU. It's typically
//! used as a fallback when other encodings aren't available or suitable.
//!
//! # Example
//!
//! ```no_run
//! use rfb_encodings::{Decoder, RawDecoder, ENCODING_RAW};
//!
//! let decoder = RawDecoder;
//! assert_eq!(decoder.encoding_type(), ENCODING_RAW);
//! ```

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_RAW};
use anyhow::{Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for raw (uncompressed) pixel data.
///
/// This is the simplest VNC encoding - pixels are transmitted without any
/// compression or transformation. The decoder reads `width * height * bytes_per_pixel`
/// bytes from the stream and writes them to the buffer.
///
/// # Example
///
/// ```no_run
/// # use rfb_encodings::{Decoder, RawDecoder, ENCODING_RAW};
/// let decoder = RawDecoder;
/// assert_eq!(decoder.encoding_type(), ENCODING_RAW);
/// ```
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let buffer_before = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode start: rect=[{},{} {}x{}] buffer_before={}",
            rect.x, rect.y, rect.width, rect.height,
            buffer_before
        );

        // Calculate dimensions and validate
        let width = rect.width as usize;
        let height = rect.height as usize;

        if width == 0 || height == 0 {
            tracing::debug!(
                target: "rfb_encodings::framing",
                "Raw decode end: empty rectangle, bytes_consumed=0, buffer_after={}",
                stream.available()
            );
            return Ok(()); // Empty rectangle - nothing to decode
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let total_bytes = width * height * bytes_per_pixel;

        // Read all pixel data from the stream
        let mut pixel_data = vec![0u8; total_bytes];
        stream
            .read_bytes(&mut pixel_data)
            .await
            .context("Failed to read raw pixel data from stream")?;

        // Get the destination rectangle in the buffer
        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        // Translate from the server's wire pixel format into whatever format
        // the local buffer was set up with; a no-op byte copy when they match.
        let server_format: rfb_pixelbuffer::PixelFormat = pixel_format.clone().into();
        buffer
            .blt(dest_rect, &server_format, &pixel_data, width)
            .context("Failed to write raw pixel data to buffer")?;

        let buffer_after = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode end: bytes_consumed={}, buffer_after={}",
            buffer_before.saturating_sub(buffer_after),
            buffer_after
        );

        Ok(())
    }
}

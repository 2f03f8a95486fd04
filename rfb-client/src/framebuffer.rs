//! Framebuffer state management and decoder registry.
//!
//! This module manages the client's framebuffer and provides a registry of
//! encoding decoders to apply server framebuffer update rectangles. Besides
//! the standard pixel-carrying encodings it also handles the pseudo-encodings
//! that carry out-of-band signals (desktop resize, pixel format change,
//! cursor shape, pointer tracking mode) rather than pixel data.

use crate::errors::RfbClientError;
use anyhow::Result as AnyResult;
use rfb_common::{Cursor, Rect};
use rfb_encodings as enc;
use rfb_encodings::{Decoder, MutablePixelBuffer, RfbInStream};
use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer as _, PixelFormat as LocalPixelFormat};
use rfb_protocol::messages::types::{PixelFormat as ServerPixelFormat, Rectangle};
use std::collections::HashMap;
use tokio::io::AsyncRead;

/// Registry of decoders keyed by encoding type.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<i32, DecoderEntry>,
}

impl DecoderRegistry {
    /// Create a registry with all standard encodings registered.
    pub fn with_standard() -> Self {
        let mut reg = Self::default();
        reg.register(DecoderEntry::Raw(enc::RawDecoder));
        reg.register(DecoderEntry::CopyRect(enc::CopyRectDecoder));
        reg.register(DecoderEntry::RRE(enc::RREDecoder));
        reg.register(DecoderEntry::Hextile(enc::HextileDecoder));
        reg.register(DecoderEntry::Tight(enc::TightDecoder::default()));
        reg.register(DecoderEntry::ZRLE(enc::ZRLEDecoder::default()));
        reg
    }

    /// Register a decoder entry.
    pub(crate) fn register(&mut self, decoder: DecoderEntry) {
        self.decoders.insert(decoder.encoding_type(), decoder);
    }

    /// Get a decoder by encoding type.
    pub(crate) fn get(&self, encoding: i32) -> Option<&DecoderEntry> {
        self.decoders.get(&encoding)
    }
}

/// A concrete decoder entry wrapper for dynamic dispatch over non-object-safe Decoder.
pub(crate) enum DecoderEntry {
    Raw(enc::RawDecoder),
    CopyRect(enc::CopyRectDecoder),
    RRE(enc::RREDecoder),
    Hextile(enc::HextileDecoder),
    Tight(enc::TightDecoder),
    ZRLE(enc::ZRLEDecoder),
}

impl DecoderEntry {
    fn encoding_type(&self) -> i32 {
        match self {
            Self::Raw(d) => d.encoding_type(),
            Self::CopyRect(d) => d.encoding_type(),
            Self::RRE(d) => d.encoding_type(),
            Self::Hextile(d) => d.encoding_type(),
            Self::Tight(d) => d.encoding_type(),
            Self::ZRLE(d) => d.encoding_type(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "Raw",
            Self::CopyRect(_) => "CopyRect",
            Self::RRE(_) => "RRE",
            Self::Hextile(_) => "Hextile",
            Self::Tight(_) => "Tight",
            Self::ZRLE(_) => "ZRLE",
        }
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &ServerPixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> AnyResult<()> {
        match self {
            Self::Raw(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::CopyRect(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::RRE(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Hextile(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Tight(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::ZRLE(d) => d.decode(stream, rect, pixel_format, buffer).await,
        }
    }
}

/// Out-of-band effect produced by applying a pseudo-encoding rectangle, for
/// the event loop to translate into a `ServerEvent`.
#[derive(Debug, Clone)]
pub enum FramebufferSideEffect {
    /// The desktop (and therefore the framebuffer) was resized.
    DesktopResized {
        /// New width in pixels.
        width: u16,
        /// New height in pixels.
        height: u16,
    },
    /// The server's advertised pixel format changed mid-session (`WMVi`).
    PixelFormatChanged {
        /// The new pixel format.
        pixel_format: ServerPixelFormat,
    },
    /// The cursor shape changed, or was hidden.
    CursorChanged {
        /// The new cursor, or `None` if hidden.
        cursor: Option<Cursor>,
    },
    /// The server's pointer tracking mode changed.
    PointerModeChanged {
        /// `true` if the server now tracks the cursor position itself.
        server_side: bool,
    },
}

/// The client's view of the server's screen.
///
/// Owned by the event loop task for the lifetime of a connection and shared
/// with the host only behind [`crate::FramebufferHandle`]'s lock, so a host
/// holds a snapshot view synchronised against the current state rather than
/// a raw reference into engine-owned decode state. A resize replaces the
/// pixel buffer wholesale (see `apply_rectangle`'s handling of
/// `ENCODING_DESKTOP_SIZE`/`ENCODING_WMVI`); hosts should not cache
/// dimensions across a `desktop-resize` event.
pub struct Framebuffer {
    /// Local framebuffer buffer, in the locally-configured output pixel format.
    buffer: ManagedPixelBuffer,
    /// Server-advertised pixel format (input format for decoders).
    server_pixel_format: ServerPixelFormat,
    /// Decoder registry.
    registry: DecoderRegistry,
    /// Set once the server has advertised the ext-key-event pseudo-encoding.
    ext_key_event_supported: bool,
}

impl Framebuffer {
    /// Create a new framebuffer with the given server pixel format, dimensions,
    /// and local output pixel format (the format pixels are translated into
    /// for display).
    pub fn new(
        width: u16,
        height: u16,
        server_pixel_format: ServerPixelFormat,
        local_format: LocalPixelFormat,
    ) -> Self {
        let buffer = ManagedPixelBuffer::new(width as u32, height as u32, local_format);
        Self {
            buffer,
            server_pixel_format,
            registry: DecoderRegistry::with_standard(),
            ext_key_event_supported: false,
        }
    }

    /// Returns the current dimensions.
    pub fn size(&self) -> (u16, u16) {
        let (w, h) = self.buffer.dimensions();
        (w as u16, h as u16)
    }

    /// Returns a reference to the underlying buffer.
    pub fn buffer(&self) -> &ManagedPixelBuffer {
        &self.buffer
    }

    /// Returns a mutable reference to the underlying buffer.
    pub fn buffer_mut(&mut self) -> &mut ManagedPixelBuffer {
        &mut self.buffer
    }

    /// Returns the server's currently advertised pixel format.
    pub fn server_pixel_format(&self) -> &ServerPixelFormat {
        &self.server_pixel_format
    }

    /// Returns whether the server has advertised support for the extended
    /// (QEMU-style) `KeyEvent` client message carrying hardware keycodes.
    pub fn supports_ext_key_event(&self) -> bool {
        self.ext_key_event_supported
    }

    /// Installs color map entries delivered by a `SetColorMapEntries` server
    /// message, for palette (non-true-color) pixel formats.
    pub fn install_color_map_entries(&mut self, first_color: u16, entries: &[(u16, u16, u16)]) {
        self.buffer.set_color_map(first_color, entries);
    }

    /// Apply a single rectangle update from the server, returning any
    /// out-of-band side effects the pseudo-encoding produced.
    pub async fn apply_rectangle<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<Vec<FramebufferSideEffect>, RfbClientError> {
        match rect.encoding {
            enc::ENCODING_LAST_RECT => Ok(Vec::new()),

            enc::ENCODING_DESKTOP_SIZE => {
                self.buffer.resize(rect.width as u32, rect.height as u32);
                Ok(vec![FramebufferSideEffect::DesktopResized {
                    width: rect.width,
                    height: rect.height,
                }])
            }

            enc::ENCODING_WMVI => {
                self.buffer.resize(rect.width as u32, rect.height as u32);
                let new_format = ServerPixelFormat::read_from(stream).await.map_err(|e| {
                    RfbClientError::Protocol(format!("failed to read WMVi pixel format: {e}"))
                })?;
                self.server_pixel_format = new_format.clone();
                Ok(vec![
                    FramebufferSideEffect::DesktopResized {
                        width: rect.width,
                        height: rect.height,
                    },
                    FramebufferSideEffect::PixelFormatChanged {
                        pixel_format: new_format,
                    },
                ])
            }

            enc::ENCODING_CURSOR_POS => {
                // No payload; the new position is carried in rect.x/rect.y. This
                // client does not track a server-relative cursor position
                // separately from PointerModeChanged, so there is nothing further
                // to do here beyond acknowledging the rectangle.
                Ok(Vec::new())
            }

            enc::ENCODING_POINTER_CHANGE => Ok(vec![FramebufferSideEffect::PointerModeChanged {
                server_side: rect.x != 0,
            }]),

            enc::ENCODING_EXT_KEY_EVENT => {
                self.ext_key_event_supported = true;
                Ok(Vec::new())
            }

            enc::ENCODING_RICH_CURSOR => {
                let cursor = self.read_rich_cursor(stream, rect).await?;
                Ok(vec![FramebufferSideEffect::CursorChanged { cursor }])
            }

            enc::ENCODING_X_CURSOR => {
                let cursor = self.read_x_cursor(stream, rect).await?;
                Ok(vec![FramebufferSideEffect::CursorChanged { cursor }])
            }

            other => {
                let decoder = self
                    .registry
                    .get(other)
                    .ok_or(RfbClientError::UnsupportedEncoding(other))?;

                tracing::debug!(
                    "Decoder selected: {} (encoding={}) for rect x={}, y={}, w={}, h={}",
                    decoder.name(),
                    other,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height
                );

                let pf = &self.server_pixel_format;
                let buffer: &mut dyn MutablePixelBuffer = &mut self.buffer;

                decoder
                    .decode(stream, rect, pf, buffer)
                    .await
                    .map_err(RfbClientError::Encoding)?;
                Ok(Vec::new())
            }
        }
    }

    /// Reads a rich-cursor pseudo-encoding payload: `width * height` pixels in
    /// the server's pixel format, followed by a `ceil(width/8) * height` byte
    /// AND mask. A zero-sized rectangle means the server hid the cursor.
    async fn read_rich_cursor<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<Option<Cursor>, RfbClientError> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(None);
        }

        let local_format: LocalPixelFormat = self.server_pixel_format.clone().into();
        let bpp = local_format.bytes_per_pixel() as usize;
        let pixel_count = rect.width as usize * rect.height as usize;
        let mut pixels = vec![0u8; pixel_count * bpp];
        stream
            .read_bytes(&mut pixels)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read rich-cursor pixels: {e}")))?;

        let mask_row_bytes = Cursor::mask_row_bytes(rect.width);
        let mut mask = vec![0u8; mask_row_bytes * rect.height as usize];
        stream
            .read_bytes(&mut mask)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read rich-cursor mask: {e}")))?;

        let mut rgba = vec![0u8; pixel_count * 4];
        for i in 0..pixel_count {
            let px = local_format.to_rgb888(&pixels[i * bpp..(i + 1) * bpp]);
            rgba[i * 4..i * 4 + 4].copy_from_slice(&px);
        }

        Ok(Some(Cursor {
            width: rect.width,
            height: rect.height,
            hotspot_x: rect.x,
            hotspot_y: rect.y,
            rgba,
            mask,
        }))
    }

    /// Reads an X-cursor pseudo-encoding payload: a 3-byte foreground RGB, a
    /// 3-byte background RGB, then `ceil(width/8) * height` bytes of bitmap
    /// data and the same size AND mask. A zero-sized rectangle hides the cursor.
    async fn read_x_cursor<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<Option<Cursor>, RfbClientError> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(None);
        }

        let mut fg = [0u8; 3];
        stream
            .read_bytes(&mut fg)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read X-cursor foreground: {e}")))?;
        let mut bg = [0u8; 3];
        stream
            .read_bytes(&mut bg)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read X-cursor background: {e}")))?;

        let row_bytes = Cursor::mask_row_bytes(rect.width);
        let mut data = vec![0u8; row_bytes * rect.height as usize];
        stream
            .read_bytes(&mut data)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read X-cursor data: {e}")))?;
        let mut mask = vec![0u8; row_bytes * rect.height as usize];
        stream
            .read_bytes(&mut mask)
            .await
            .map_err(|e| RfbClientError::Protocol(format!("failed to read X-cursor mask: {e}")))?;

        let mut rgba = vec![0u8; rect.width as usize * rect.height as usize * 4];
        for y in 0..rect.height as usize {
            for x in 0..rect.width as usize {
                let byte = data[y * row_bytes + x / 8];
                let bit_set = byte & (0x80 >> (x % 8)) != 0;
                let color = if bit_set { fg } else { bg };
                let idx = (y * rect.width as usize + x) * 4;
                rgba[idx] = color[0];
                rgba[idx + 1] = color[1];
                rgba[idx + 2] = color[2];
                rgba[idx + 3] = 255;
            }
        }

        Ok(Some(Cursor {
            width: rect.width,
            height: rect.height,
            hotspot_x: rect.x,
            hotspot_y: rect.y,
            rgba,
            mask,
        }))
    }

    /// Apply an update by streaming from the input: reads the `FramebufferUpdate`
    /// header, then decodes each rectangle in turn, returning the damaged
    /// regions for repaint plus any pseudo-encoding side effects encountered.
    pub async fn apply_update_stream<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<(Vec<Rect>, Vec<FramebufferSideEffect>), RfbClientError> {
        // FramebufferUpdate header: 1 byte padding + 2 bytes rect count
        stream.skip(1).await.map_err(|e| {
            RfbClientError::Protocol(format!("failed to read FramebufferUpdate padding: {}", e))
        })?;
        let num_raw = stream.read_u16().await.map_err(|e| {
            RfbClientError::Protocol(format!(
                "failed to read FramebufferUpdate rect count: {}",
                e
            ))
        })?;

        tracing::debug!(
            target: "rfb_client::framing",
            "FBU start: declared_rects={}, available_buffer_bytes={}",
            num_raw,
            stream.available()
        );

        let mut damage: Vec<Rect> = Vec::new();
        let mut side_effects: Vec<FramebufferSideEffect> = Vec::new();
        let mut rects_decoded = 0usize;
        let unbounded = num_raw == 0xFFFF;

        loop {
            if !unbounded && rects_decoded >= num_raw as usize {
                break;
            }

            let rect = Rectangle::read_from(stream).await.map_err(|e| {
                RfbClientError::Protocol(format!("failed to read Rectangle header: {}", e))
            })?;
            tracing::debug!(
                target: "rfb_client::framing",
                "FBU rect {}: enc={} rect=[{},{} {}x{}]",
                rects_decoded, rect.encoding, rect.x, rect.y, rect.width, rect.height
            );

            if unbounded && rect.encoding == enc::ENCODING_LAST_RECT {
                break;
            }

            let mut effects = self.apply_rectangle(stream, &rect).await?;
            side_effects.append(&mut effects);

            rects_decoded += 1;

            if rect.encoding >= 0 {
                damage.push(Rect::new(
                    rect.x as i32,
                    rect.y as i32,
                    rect.width as u32,
                    rect.height as u32,
                ));
            }
        }

        if !unbounded && rects_decoded != num_raw as usize {
            tracing::warn!(
                target: "rfb_client::framing",
                "FBU end: MISMATCH! declared_rects={} decoded_rects={}",
                num_raw,
                rects_decoded
            );
        }

        Ok((damage, side_effects))
    }
}

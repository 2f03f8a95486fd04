//! Protocol message helpers for sending/receiving RFB messages.
//!
//! This module provides convenience functions for reading server messages
//! and writing client messages using the buffered RFB streams from
//! `rfb-protocol`.
//!
//! The helpers are intentionally thin wrappers over the low-level
//! `rfb_protocol::messages` types, enforcing the project's fail-fast
//! policy and returning rich `RfbClientError` values.

use crate::errors::RfbClientError;
use crate::protocol_trace;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages as msg;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read the next server message type byte.
///
/// The event loop dispatches on this directly rather than through a
/// higher-level wrapper, since several message types (`EndOfContinuousUpdates`,
/// `ServerFence`) need custom handling that doesn't fit a uniform
/// read-and-wrap shape.
pub async fn read_message_type<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> Result<u8, RfbClientError> {
    let t = instream
        .read_u8()
        .await
        .map_err(|e| RfbClientError::Protocol(format!("failed to read message type: {}", e)))?;
    if protocol_trace::enabled() { protocol_trace::in_msg("ServerMessageType", &format!("type={}", t)); }
    Ok(t)
}

/// Write a ClientInit message (shared/exclusive session) and flush.
pub async fn write_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> Result<(), RfbClientError> {
    let msg = msg::ClientInit { shared };
    if protocol_trace::enabled() { protocol_trace::out_msg("ClientInit", &format!("shared={}", shared)); }
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write SetPixelFormat and flush.
pub async fn write_set_pixel_format<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    pixel_format: msg::PixelFormat,
) -> Result<(), RfbClientError> {
    let msg = msg::SetPixelFormat { pixel_format };
    if protocol_trace::enabled() {
        protocol_trace::out_msg(
            "SetPixelFormat",
            &format!(
                "bpp={} depth={} shifts={}/{}/{}",
                msg.pixel_format.bits_per_pixel,
                msg.pixel_format.depth,
                msg.pixel_format.red_shift,
                msg.pixel_format.green_shift,
                msg.pixel_format.blue_shift
            ),
        );
    }
    msg
        .write_to(outstream)
        .map_err(|e| RfbClientError::Protocol(format!("failed to write SetPixelFormat: {}", e)))?;
    tracing::debug!("Wrote SetPixelFormat (bpp={}, depth={}, shifts r/g/b={} {}/{}/{})",
        msg.pixel_format.bits_per_pixel,
        msg.pixel_format.depth,
        msg.pixel_format.red_shift,
        msg.pixel_format.green_shift,
        msg.pixel_format.blue_shift,
        0);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write SetEncodings with preferred encoding order and flush.
pub async fn write_set_encodings<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    encodings: Vec<i32>,
) -> Result<(), RfbClientError> {
    let msg = msg::SetEncodings { encodings };
    if protocol_trace::enabled() { protocol_trace::out_msg("SetEncodings", &format!("n={}", msg.encodings.len())); }
    tracing::debug!("Wrote SetEncodings: {:?}", msg.encodings);
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write a FramebufferUpdateRequest and flush.
pub async fn write_framebuffer_update_request<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    incremental: bool,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
) -> Result<(), RfbClientError> {
    let msg = msg::FramebufferUpdateRequest {
        incremental,
        x,
        y,
        width,
        height,
    };
    if protocol_trace::enabled() { protocol_trace::out_msg("FramebufferUpdateRequest", &format!("inc={} rect=({},{} {}x{})", incremental, x, y, width, height)); }
    tracing::debug!("Wrote FramebufferUpdateRequest inc={} rect=({},{} {}x{})",
        incremental, x, y, width, height);
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write a KeyEvent (press or release) and flush.
pub async fn write_key_event<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    key: u32,
    down: bool,
) -> Result<(), RfbClientError> {
    let msg = msg::KeyEvent { down, key };
    if protocol_trace::enabled() { protocol_trace::out_msg("KeyEvent", &format!("down={} key=0x{:X}", down, key)); }
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write a PointerEvent (mouse) and flush.
pub async fn write_pointer_event<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    button_mask: u8,
    x: u16,
    y: u16,
) -> Result<(), RfbClientError> {
    let msg = msg::PointerEvent { button_mask, x, y };
    if protocol_trace::enabled() { protocol_trace::out_msg("PointerEvent", &format!("buttons=0x{:02X} pos=({}, {})", button_mask, x, y)); }
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write ClientCutText and flush.
pub async fn write_client_cut_text<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    text: &str,
) -> Result<(), RfbClientError> {
    let msg = msg::ClientCutText {
        text: text.to_string(),
    };
    if protocol_trace::enabled() { protocol_trace::out_msg("ClientCutText", &format!("len={}", msg.text.len())); }
    msg.write_to(outstream);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}

/// Write a QEMU extended key event (message type 255, submessage 0) and flush.
///
/// Only valid once the server has advertised the ext-key-event pseudo-encoding
/// via `FramebufferUpdate`; sending it otherwise is a protocol violation the
/// server is free to reject.
pub async fn write_extended_key_event<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    key: u32,
    keycode: u32,
    down: bool,
) -> Result<(), RfbClientError> {
    if protocol_trace::enabled() {
        protocol_trace::out_msg(
            "ExtendedKeyEvent",
            &format!("down={} key=0x{:X} keycode=0x{:X}", down, key, keycode),
        );
    }
    outstream.write_u8(255);
    outstream.write_u8(0);
    outstream.write_u16(if down { 1 } else { 0 });
    outstream.write_u32(key);
    outstream.write_u32(keycode);
    outstream
        .flush()
        .await
        .map_err(|e| RfbClientError::Transport(e))
}


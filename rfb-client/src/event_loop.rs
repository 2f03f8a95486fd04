//! Event loop coordination: read loop, write loop, and reconnection logic.

use crate::{
    config::Config,
    connection,
    errors::RfbClientError,
    framebuffer::Framebuffer,
    messages::{ClientCommand, ServerEvent},
    protocol,
    FramebufferHandle,
};
use std::sync::Arc;
use tokio::select;
use tokio::task::JoinHandle;

/// Spawn the client event loop.
///
/// Connection establishment (transport, version/security handshake, auth)
/// happens inside the spawned task rather than before it, so that a failure
/// anywhere in that process — including an auth rejection — is reported the
/// same way a post-connection failure would be: as events on `events`,
/// followed by exactly one `ConnectionClosed`. This matches the "one error
/// taxonomy, all fatal at the connection level" rule auth errors are called
/// out from (they additionally emit `AuthFailure`/`AuthUnsupported` before
/// the teardown event).
///
/// The returned `FramebufferHandle` is `None` until the `Connected` event
/// fires; a host that locks it before then sees an empty buffer.
pub fn spawn(
    config: Config,
    commands: flume::Receiver<ClientCommand>,
    events: flume::Sender<ServerEvent>,
) -> (JoinHandle<()>, FramebufferHandle) {
    let framebuffer: FramebufferHandle = Arc::new(tokio::sync::Mutex::new(None));
    let framebuffer_for_task = framebuffer.clone();

    let handle = tokio::spawn(async move {
        let conn = match connection::establish(&config).await {
            Ok(conn) => conn,
            Err(e) => {
                report_connection_failure(&events, e);
                return;
            }
        };
        let width = conn.server_init.framebuffer_width;
        let height = conn.server_init.framebuffer_height;
        let name = conn.server_init.name.clone();
        let pixel_format = conn.server_init.pixel_format.clone();

        // Initialize shared framebuffer: server format in, host-configured
        // local format out (defaults to RGB888).
        let local_format = config.display.resolved_local_pixel_format();
        {
            let mut slot = framebuffer_for_task.lock().await;
            *slot = Some(Framebuffer::new(width, height, pixel_format.clone(), local_format));
        }
        let framebuffer = framebuffer_for_task;

        // Notify application of successful connection
        let _ = events.send(ServerEvent::Connected {
            width,
            height,
            name,
            pixel_format: pixel_format.clone(),
        });

        // Split streams for loops (they are already buffered types)
        let mut input = conn.input; // RfbInStream<...>
        let mut output = conn.output; // RfbOutStream<...>

        // Capture config values needed in the rest of the task
        let server_pixelbuffer_format: rfb_pixelbuffer::PixelFormat = pixel_format.clone().into();
        let encodings = config.effective_encodings(Some(&server_pixelbuffer_format));
        let fb_width = width;
        let fb_height = height;

        // Periodic incremental update requester (best-effort)
        let mut periodic = tokio::time::interval(std::time::Duration::from_millis(250));

        // Send initial protocol messages from within the task
        // 1) SetPixelFormat to 32bpp true-color little-endian RGB888 (like C++ viewer)
        let desired_pf = rfb_protocol::messages::types::PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        };
        if let Err(e) = protocol::write_set_pixel_format(&mut output, desired_pf).await {
            tracing::error!("Failed to send SetPixelFormat: {}", e);
            return;
        }

        // 2) SetEncodings
        tracing::info!("Sending SetEncodings: {:?}", encodings);
        if let Err(e) = protocol::write_set_encodings(&mut output, encodings).await {
            tracing::error!("Failed to send SetEncodings: {}", e);
            return;
        }

        // 3) Request initial full framebuffer update
        tracing::info!("Requesting initial framebuffer update: {}x{}", fb_width, fb_height);
        if let Err(e) = protocol::write_framebuffer_update_request(&mut output, false, 0, 0, fb_width, fb_height).await {
            tracing::error!("Failed to send FramebufferUpdateRequest: {}", e);
            return;
        }

        tracing::info!("Event loop task started, entering main loop");
        // Use async recv to avoid blocking
        let mut iteration = 0u64;
        loop {
            if iteration % 100 == 1 {
                tracing::debug!("Event loop iteration {}", iteration);
            }
            select! {
                // Prefer reading server messages to keep buffers flowing
                res = protocol::read_message_type(&mut input) => {
                    match res {
                        Ok(msg_type) => {
                            tracing::debug!("Server message type: {}", msg_type);
                            match msg_type {
                                0 => {
                                    // FramebufferUpdate: pipeline next incremental request, then stream-decode
                                    tracing::debug!("Pipelining incremental FramebufferUpdateRequest");
                                    let _ = protocol::write_framebuffer_update_request(&mut output, true, 0, 0, fb_width, fb_height).await;
                                    let (damage, side_effects) = {
                                        let mut guard = framebuffer.lock().await;
                                        let fb = guard.as_mut().expect("framebuffer present once connected");
                                        match fb.apply_update_stream(&mut input).await {
                                            Ok(result) => result,
                                            Err(e) => {
                                                let _ = events.send(ServerEvent::Error { message: e.to_string() });
                                                let _ = events.send(ServerEvent::ConnectionClosed);
                                                break;
                                            }
                                        }
                                    };
                                    for effect in side_effects {
                                        let event = match effect {
                                            crate::framebuffer::FramebufferSideEffect::DesktopResized { width, height } => {
                                                ServerEvent::DesktopResized { width, height }
                                            }
                                            crate::framebuffer::FramebufferSideEffect::PixelFormatChanged { pixel_format } => {
                                                ServerEvent::PixelFormatChanged { pixel_format }
                                            }
                                            crate::framebuffer::FramebufferSideEffect::CursorChanged { cursor } => {
                                                ServerEvent::CursorChanged { cursor }
                                            }
                                            crate::framebuffer::FramebufferSideEffect::PointerModeChanged { server_side } => {
                                                ServerEvent::PointerModeChanged { server_side }
                                            }
                                        };
                                        let _ = events.send(event);
                                    }
                                    if !damage.is_empty() {
                                        let _ = events.send(ServerEvent::FramebufferUpdated { damage });
                                    }
                                }
                                1 => {
                                    if let Ok(set) = rfb_protocol::messages::server::SetColorMapEntries::read_from(&mut input).await {
                                        let entries: Vec<(u16, u16, u16)> = set
                                            .colors
                                            .iter()
                                            .map(|c| (c.red, c.green, c.blue))
                                            .collect();
                                        let first_color = set.first_color;
                                        let count = entries.len() as u16;
                                        let mut guard = framebuffer.lock().await;
                                        guard
                                            .as_mut()
                                            .expect("framebuffer present once connected")
                                            .install_color_map_entries(first_color, &entries);
                                        drop(guard);
                                        let _ = events.send(ServerEvent::ColorMapUpdated { first_color, count });
                                    }
                                }
                                2 => {
                                    let _ = events.send(ServerEvent::Bell);
                                }
                                3 => {
                                    if let Ok(cut) = rfb_protocol::messages::server::ServerCutText::read_from(&mut input).await {
                                        use bytes::Bytes;
                                        let _ = events.send(ServerEvent::ServerCutText { text: Bytes::from(cut.text) });
                                    }
                                }
                                150 => {
                                    // EndOfContinuousUpdates (server->client). No payload.
                                }
                                248 => {
                                    // ServerFence: read padding(3), flags(u32), len(u8), payload[len]
                                    use tokio::io::AsyncReadExt as _;
                                    // We don't have direct helpers for small reads here; reuse RfbInStream
                                    // Read 3 bytes padding by skipping
                                    let _ = input.skip(3).await;
                                    // Read flags (u32) and length (u8)
                                    if let Ok(_flags) = input.read_u32().await {
                                        if let Ok(len) = input.read_u8().await {
                                            // Read len bytes
                                            let mut buf = vec![0u8; len as usize];
                                            let _ = input.read_bytes(&mut buf).await;
                                        }
                                    }
                                }
                                other => {
                                    // Unknown top-level message type: the server is speaking a
                                    // dialect we don't understand, and since message framing is
                                    // type-specific there is no way to skip over the payload
                                    // safely. Treat as fatal rather than silently desyncing.
                                    let message = format!("unsupported server message type: {other}");
                                    let _ = events.send(ServerEvent::Error { message: message.clone() });
                                    let _ = events.send(ServerEvent::ConnectionClosed);
                                    tracing::error!("{}", message);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            // Report and exit on error (fail-fast)
                            let _ = events.send(ServerEvent::Error { message: e.to_string() });
                            let _ = events.send(ServerEvent::ConnectionClosed);
                            break;
                        }
                    }
                }

                cmd = commands.recv_async() => {
                    match cmd {
                        Ok(command) => {
                            match handle_command(&mut output, command).await {
                                Ok(CommandOutcome::Continue) => {}
                                Ok(CommandOutcome::Close) => {
                                    let _ = events.send(ServerEvent::ConnectionClosed);
                                    break;
                                }
                                Err(e) => {
                                    let _ = events.send(ServerEvent::Error { message: e.to_string() });
                                    let _ = events.send(ServerEvent::ConnectionClosed);
                                    break;
                                }
                            }
                        }
                        Err(_) => {
                            // Command channel closed by application
                            let _ = events.send(ServerEvent::ConnectionClosed);
                            break;
                        }
                    }
                }

                _ = periodic.tick() => {
                    tracing::debug!("Periodic incremental FramebufferUpdateRequest");
                    let _ = protocol::write_framebuffer_update_request(&mut output, true, 0, 0, fb_width, fb_height).await;
                }
            }
        }
    });

    (handle, framebuffer)
}

/// Translate a connection-establishment failure into the event(s) spec.md's
/// error taxonomy calls for, then the closing `ConnectionClosed`.
///
/// Auth errors get their own event ahead of the teardown notice; everything
/// else (transport, handshake, protocol errors encountered before a
/// framebuffer even exists) is reported as a plain `Error`.
fn report_connection_failure(events: &flume::Sender<ServerEvent>, err: RfbClientError) {
    match err {
        RfbClientError::AuthFailed(reason) => {
            let _ = events.send(ServerEvent::AuthFailure { reason });
        }
        RfbClientError::AuthUnsupported(security_type) => {
            let _ = events.send(ServerEvent::AuthUnsupported { security_type });
        }
        other => {
            let _ = events.send(ServerEvent::Error { message: other.to_string() });
        }
    }
    let _ = events.send(ServerEvent::ConnectionClosed);
}

/// Outcome of handling one client command: either the loop keeps running,
/// or the host asked for a clean shutdown. Kept distinct from `Err` so a
/// graceful `Close` never gets reported as a fault alongside the teardown
/// event the caller sends for it.
enum CommandOutcome {
    Continue,
    Close,
}

async fn handle_command<W: tokio::io::AsyncWrite + Unpin>(
    output: &mut rfb_protocol::io::RfbOutStream<W>,
    command: ClientCommand,
) -> Result<CommandOutcome, RfbClientError> {
    match command {
        ClientCommand::RequestUpdate { incremental, rect } => {
            let (x, y, w, h) = match rect {
                Some(r) => (r.x as u16, r.y as u16, r.width as u16, r.height as u16),
                None => (0, 0, u16::MAX, u16::MAX),
            };
            protocol::write_framebuffer_update_request(output, incremental, x, y, w, h).await?;
        }
        ClientCommand::Pointer { x, y, buttons } => {
            protocol::write_pointer_event(output, buttons, x, y).await?;
        }
        ClientCommand::Key { key, down } => {
            protocol::write_key_event(output, key, down).await?;
        }
        ClientCommand::ClientCutText { text } => {
            let s = String::from_utf8_lossy(&text).to_string();
            protocol::write_client_cut_text(output, &s).await?;
        }
        ClientCommand::ExtendedKeyEvent { key, keycode, down } => {
            protocol::write_extended_key_event(output, key, keycode, down).await?;
        }
        ClientCommand::SetShared { .. } => {
            // The RFB wire protocol only carries the shared-session flag
            // once, in ClientInit, which has already been sent by the time
            // the event loop is accepting commands. There is no mid-session
            // message to renegotiate it.
            tracing::debug!("SetShared requested after connection established; ignored (shared flag is fixed at ClientInit)");
        }
        ClientCommand::SetPixelFormat { format } => {
            protocol::write_set_pixel_format(output, format).await?;
        }
        ClientCommand::SetEncodings { list } => {
            protocol::write_set_encodings(output, list).await?;
        }
        ClientCommand::Close => {
            return Ok(CommandOutcome::Close);
        }
    }
    Ok(CommandOutcome::Continue)
}

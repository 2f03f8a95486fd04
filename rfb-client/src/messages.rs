//! Application-facing message types for communication between the client and application.

use bytes::Bytes;
use rfb_common::{Cursor, Rect};
use rfb_protocol::messages::PixelFormat;

/// Events sent from the VNC client to the application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Successfully connected to the server.
    Connected {
        /// Framebuffer width in pixels.
        width: u16,
        /// Framebuffer height in pixels.
        height: u16,
        /// Server name/description.
        name: String,
        /// Negotiated pixel format.
        pixel_format: PixelFormat,
    },

    /// Framebuffer has been updated.
    ///
    /// The `damage` vector contains all rectangles that were updated.
    /// The application should redraw these regions.
    FramebufferUpdated {
        /// List of rectangles that were updated.
        damage: Vec<Rect>,
    },

    /// Desktop size changed.
    ///
    /// This can happen if the server's screen resolution changes.
    DesktopResized {
        /// New width in pixels.
        width: u16,
        /// New height in pixels.
        height: u16,
    },

    /// The server-side cursor shape changed (rich-cursor / X-cursor pseudo-encoding).
    ///
    /// `None` hides the cursor; a client UI should fall back to its own pointer
    /// rendering when this event has never fired.
    CursorChanged {
        /// The new cursor shape, or `None` if the server hid it.
        cursor: Option<Cursor>,
    },

    /// The server's relative/absolute pointer tracking mode changed
    /// (pointer-change pseudo-encoding).
    PointerModeChanged {
        /// `true` if the server now does its own cursor tracking (server-side
        /// cursor position), `false` for client-side tracking.
        server_side: bool,
    },

    /// The server's color map was updated (`SetColorMapEntries`).
    ColorMapUpdated {
        /// Index of the first updated entry.
        first_color: u16,
        /// Number of entries updated.
        count: u16,
    },

    /// The server changed its advertised pixel format mid-session (WMVi
    /// pseudo-encoding, a `DesktopSize` variant that also carries a new
    /// `PixelFormat`).
    PixelFormatChanged {
        /// The new pixel format.
        pixel_format: PixelFormat,
    },

    /// Server sent a bell notification.
    Bell,

    /// Server sent clipboard/cut text data.
    ServerCutText {
        /// Clipboard data (typically UTF-8 text).
        text: Bytes,
    },

    /// Authentication failed during connection setup.
    AuthFailure {
        /// Reason string given by the server (empty if none was sent).
        reason: String,
    },

    /// None of the server's offered security types are implemented by this client.
    AuthUnsupported {
        /// Wire value of the rejected security type.
        security_type: u8,
    },

    /// Connection has been closed (gracefully or due to error).
    ConnectionClosed,

    /// An error occurred.
    ///
    /// After this event, the client may attempt to reconnect (if configured)
    /// or shut down.
    Error {
        /// The error message.
        message: String,
    },
}

/// Commands sent from the application to the VNC client.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Request a framebuffer update.
    RequestUpdate {
        /// If true, only send updates for changed regions.
        /// If false, send the entire specified rectangle.
        incremental: bool,
        /// Rectangle to update. If None, update the entire screen.
        rect: Option<Rect>,
    },

    /// Send pointer (mouse) event.
    Pointer {
        /// X coordinate in pixels.
        x: u16,
        /// Y coordinate in pixels.
        y: u16,
        /// Button mask (bit 0 = left, bit 1 = middle, bit 2 = right).
        buttons: u8,
    },

    /// Send keyboard event.
    Key {
        /// X11 keysym value.
        key: u32,
        /// True if key was pressed, false if released.
        down: bool,
    },

    /// Send clipboard/cut text to server.
    ClientCutText {
        /// Text data to send (typically UTF-8).
        text: Bytes,
    },

    /// Send an extended key event carrying the hardware keycode in addition
    /// to the keysym, when the server advertised the ext-key-event pseudo-encoding.
    ExtendedKeyEvent {
        /// X11 keysym value.
        key: u32,
        /// Raw hardware keycode (XT scancode), 0 if unknown.
        keycode: u32,
        /// True if key was pressed, false if released.
        down: bool,
    },

    /// Request the server switch to `true`/`false` shared-session mode.
    SetShared {
        /// Whether to request a shared (non-exclusive) session.
        shared: bool,
    },

    /// Request the server encode future updates in the given pixel format.
    SetPixelFormat {
        /// The desired pixel format.
        format: PixelFormat,
    },

    /// Advertise the set of encodings the client is willing to accept, in
    /// preference order.
    SetEncodings {
        /// Encoding type identifiers, most preferred first.
        list: Vec<i32>,
    },

    /// Close the connection.
    Close,
}

//! RFB pixel buffer types and utilities.
//!
//! This crate provides pixel format descriptions and buffer management for the
//! RFB/VNC protocol implementation.

pub mod buffer;
pub mod colormap;
pub mod format;
pub mod managed;

pub use buffer::{MutablePixelBuffer, PixelBuffer};
pub use colormap::ColorMap;
pub use format::PixelFormat;
pub use managed::ManagedPixelBuffer;

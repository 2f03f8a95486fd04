//! Managed pixel buffer implementation.
//!
//! This module provides [`ManagedPixelBuffer`], a concrete implementation of the
//! [`PixelBuffer`] and [`MutablePixelBuffer`] traits that owns its pixel data in a Vec.
//!
//! # Example
//!
//! ```
//! use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat, MutablePixelBuffer, PixelBuffer};
//! use rfb_common::Rect;
//!
//! // Create a 100x100 buffer with RGB888 format
//! let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
//!
//! // Fill a rectangle with red
//! let format = buffer.pixel_format().clone();
//! let red = format.from_rgb888([255, 0, 0, 255]);
//! let rect = Rect::new(10, 10, 50, 50);
//! buffer.fill_rect(rect, &red).unwrap();
//!
//! // Access the dimensions
//! let (width, height) = buffer.dimensions();
//! assert_eq!((width, height), (100, 100));
//! ```

use crate::{ColorMap, MutablePixelBuffer, PixelBuffer, PixelFormat};
use anyhow::{anyhow, Result};
use rfb_common::{Point, Rect};

/// A pixel buffer that manages its own memory.
///
/// This is the primary concrete implementation of the pixel buffer traits.
/// It stores pixel data in a contiguous `Vec<u8>` and provides efficient
/// implementations of all rendering operations.
///
/// # Memory Layout
///
/// The buffer is stored in row-major order with a stride equal to the width.
/// For a buffer of width W, height H, and bytes-per-pixel B:
///
/// ```text
/// Total size = W * H * B bytes
/// Pixel at (x, y) starts at offset: (y * W + x) * B
/// ```
///
/// # Stride Convention
///
/// The stride is always measured in **pixels** (not bytes) and equals the width.
/// This matches the critical convention documented in TigerVNC's WARP.md.
///
/// # Example
///
/// ```
/// use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat, PixelBuffer};
///
/// let format = PixelFormat::rgb888();
/// let buffer = ManagedPixelBuffer::new(1920, 1080, format);
///
/// assert_eq!(buffer.dimensions(), (1920, 1080));
/// assert_eq!(buffer.stride(), 1920); // Stride in pixels
/// ```
#[derive(Debug, Clone)]
pub struct ManagedPixelBuffer {
    /// Buffer width in pixels
    width: u32,

    /// Buffer height in pixels
    height: u32,

    /// Pixel format describing how pixels are encoded
    format: PixelFormat,

    /// Raw pixel data (row-major, no padding)
    data: Vec<u8>,

    /// Stride in **pixels** (always equals width for this implementation)
    stride: usize,

    /// Color lookup table, populated by `SetColorMapEntries` for palette
    /// (non-true-color) pixel formats. Unused for true-color formats.
    color_map: ColorMap,
}

impl ManagedPixelBuffer {
    /// Creates a new pixel buffer with the specified dimensions and format.
    ///
    /// The buffer is initialized with all zeros (black for most formats).
    ///
    /// # Parameters
    ///
    /// - `width`: Buffer width in pixels
    /// - `height`: Buffer height in pixels
    /// - `format`: Pixel format describing the encoding
    ///
    /// # Example
    ///
    /// ```
    /// use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat, PixelBuffer};
    ///
    /// let buffer = ManagedPixelBuffer::new(800, 600, PixelFormat::rgb888());
    /// assert_eq!(buffer.dimensions(), (800, 600));
    /// ```
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize;
        let bytes_per_pixel = format.bytes_per_pixel() as usize;
        let data = vec![0u8; stride * height as usize * bytes_per_pixel];

        Self {
            width,
            height,
            format,
            data,
            stride,
            color_map: ColorMap::new(),
        }
    }

    /// Resizes the buffer to new dimensions.
    ///
    /// This reallocates the internal buffer. Existing pixel data is not preserved.
    /// The new buffer is initialized with all zeros.
    ///
    /// # Parameters
    ///
    /// - `width`: New width in pixels
    /// - `height`: New height in pixels
    ///
    /// # Example
    ///
    /// ```
    /// use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat, PixelBuffer};
    ///
    /// let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
    /// buffer.resize(200, 150);
    /// assert_eq!(buffer.dimensions(), (200, 150));
    /// ```
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.stride = width as usize;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        self.data
            .resize(self.stride * height as usize * bytes_per_pixel, 0);
    }

    /// Returns the stride in pixels.
    ///
    /// For `ManagedPixelBuffer`, the stride always equals the width.
    ///
    /// # Example
    ///
    /// ```
    /// use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat};
    ///
    /// let buffer = ManagedPixelBuffer::new(800, 600, PixelFormat::rgb888());
    /// assert_eq!(buffer.stride(), 800);
    /// ```
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns a reference to the raw pixel data.
    ///
    /// The data is in row-major order with no padding between rows.
    ///
    /// # Example
    ///
    /// ```
    /// use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat};
    ///
    /// let buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
    /// let data = buffer.data();
    /// assert_eq!(data.len(), 100 * 100 * 4); // 100x100 pixels * 4 bytes/pixel
    /// ```
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the buffer width in pixels.
    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Returns the buffer height in pixels.
    pub fn height(&self) -> usize {
        self.height as usize
    }

    /// Returns a reference to the pixel format.
    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    /// Validates that a rectangle is within buffer bounds.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the rectangle is valid
    /// - `Err` if the rectangle is out of bounds
    fn validate_rect(&self, rect: Rect) -> Result<()> {
        if rect.x as u32 + rect.width > self.width || rect.y as u32 + rect.height > self.height {
            return Err(anyhow!(
                "Rectangle out of bounds: {:?} (buffer size: {}x{})",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    /// Returns the installed color map (used for palette, non-true-color
    /// pixel formats).
    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// Installs color map entries starting at `first_color`, as delivered by
    /// a `SetColorMapEntries` server message.
    pub fn set_color_map(&mut self, first_color: u16, entries: &[(u16, u16, u16)]) {
        self.color_map.install(first_color, entries);
    }

}

impl PixelBuffer for ManagedPixelBuffer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn get_buffer(&self, rect: Rect, stride: &mut usize) -> Option<&[u8]> {
        if self.validate_rect(rect).is_err() {
            return None;
        }

        *stride = self.stride;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let start = (rect.y as usize * self.stride + rect.x as usize) * bytes_per_pixel;
        let len = rect.height as usize * self.stride * bytes_per_pixel;

        Some(&self.data[start..start + len])
    }

    fn color_map(&self) -> Option<&ColorMap> {
        Some(&self.color_map)
    }
}

impl MutablePixelBuffer for ManagedPixelBuffer {
    fn get_buffer_rw(&mut self, rect: Rect, stride: &mut usize) -> Option<&mut [u8]> {
        if self.validate_rect(rect).is_err() {
            return None;
        }

        *stride = self.stride;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let start = (rect.y as usize * self.stride + rect.x as usize) * bytes_per_pixel;
        let len = rect.height as usize * self.stride * bytes_per_pixel;

        Some(&mut self.data[start..start + len])
    }

    fn commit_buffer(&mut self, _rect: Rect) {
        // No-op for ManagedPixelBuffer as we directly modify the underlying data
    }

    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        self.validate_rect(rect)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        if pixel.len() != bytes_per_pixel {
            return Err(anyhow!(
                "Invalid pixel size: got {} bytes, expected {}",
                pixel.len(),
                bytes_per_pixel
            ));
        }

        for y in 0..rect.height as usize {
            let row_offset =
                ((rect.y as usize + y) * self.stride + rect.x as usize) * bytes_per_pixel;

            for x in 0..rect.width as usize {
                let offset = row_offset + x * bytes_per_pixel;
                self.data[offset..offset + bytes_per_pixel].copy_from_slice(pixel);
            }
        }

        Ok(())
    }

    fn copy_rect(&mut self, dest: Rect, src_offset: Point) -> Result<()> {
        self.validate_rect(dest)?;

        // Calculate source rectangle
        // src_offset is the offset FROM destination TO source
        // So source = dest + src_offset
        let src_x = dest.x + src_offset.x;
        let src_y = dest.y + src_offset.y;
        let src_rect = Rect::new(src_x, src_y, dest.width, dest.height);
        self.validate_rect(src_rect)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let rect_width_bytes = dest.width as usize * bytes_per_pixel;

        // Handle overlapping regions by choosing copy direction
        // If source is above/left of dest (negative offset), copy from bottom/right to top/left
        // to avoid overwriting source data before it's copied
        if src_offset.y < 0 || (src_offset.y == 0 && src_offset.x < 0) {
            // Copy from bottom to top (reverse)
            for y in (0..dest.height as usize).rev() {
                let src_offset_calc = ((src_rect.y as usize + y) * self.stride
                    + src_rect.x as usize)
                    * bytes_per_pixel;
                let dst_offset_calc =
                    ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;

                self.data.copy_within(
                    src_offset_calc..src_offset_calc + rect_width_bytes,
                    dst_offset_calc,
                );
            }
        } else {
            // Copy from top to bottom (forward)
            for y in 0..dest.height as usize {
                let src_offset_calc = ((src_rect.y as usize + y) * self.stride
                    + src_rect.x as usize)
                    * bytes_per_pixel;
                let dst_offset_calc =
                    ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;

                self.data.copy_within(
                    src_offset_calc..src_offset_calc + rect_width_bytes,
                    dst_offset_calc,
                );
            }
        }

        Ok(())
    }

    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()> {
        self.validate_rect(dest)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let rect_width_bytes = dest.width as usize * bytes_per_pixel;

        // If stride is 0, source is tightly packed
        let actual_src_stride = if stride == 0 {
            dest.width as usize
        } else {
            stride
        };
        let actual_src_stride_bytes = actual_src_stride * bytes_per_pixel;

        // Validate source data size
        let required_src_bytes =
            actual_src_stride_bytes * (dest.height as usize - 1) + rect_width_bytes;
        if pixels.len() < required_src_bytes {
            return Err(anyhow!(
                "Insufficient source data: got {} bytes, need at least {}",
                pixels.len(),
                required_src_bytes
            ));
        }

        for y in 0..dest.height as usize {
            let dst_offset =
                ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;
            let src_offset = y * actual_src_stride_bytes;

            self.data[dst_offset..dst_offset + rect_width_bytes]
                .copy_from_slice(&pixels[src_offset..src_offset + rect_width_bytes]);
        }

        Ok(())
    }
}

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::pixel_count;
use crate::output::{Output, OutputId};
use crate::region::Rect;

/// Pixel layout the renderer delivers from a readback, named by channel
/// order from the most significant byte of a native 32-bit word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFormat {
    A8R8G8B8,
    X8R8G8B8,
    A8B8G8R8,
    X8B8G8R8,
    /// Any other renderer format, identified by its fourcc.
    Other(u32),
}

/// Order of the color channels in memory for a little-endian word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Blue, green, red, alpha: same layout as an ARGB8888 shm buffer.
    Bgra,
    /// Red, green, blue, alpha: red and blue swapped relative to shm.
    Rgba,
}

impl ReadFormat {
    pub fn channel_order(self) -> Option<ChannelOrder> {
        match self {
            Self::A8R8G8B8 | Self::X8R8G8B8 => Some(ChannelOrder::Bgra),
            Self::A8B8G8R8 | Self::X8B8G8R8 => Some(ChannelOrder::Rgba),
            Self::Other(_) => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A8R8G8B8 => "a8r8g8b8",
            Self::X8R8G8B8 => "x8r8g8b8",
            Self::A8B8G8R8 => "a8b8g8r8",
            Self::X8B8G8R8 => "x8b8g8r8",
            Self::Other(_) => "other",
        }
    }
}

/// Renderer capability flags relevant to capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Readbacks deliver rows bottom-up and must be flipped vertically.
    pub capture_yflip: bool,
}

/// Everything a capture consumer needs to interpret a readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadbackInfo {
    pub format: ReadFormat,
    pub capabilities: Capabilities,
}

impl ReadbackInfo {
    pub fn new(format: ReadFormat, capabilities: Capabilities) -> Self {
        Self {
            format,
            capabilities,
        }
    }

    pub fn yflip(&self) -> bool {
        self.capabilities.capture_yflip
    }
}

/// Pixel readback primitive provided by the host renderer.
pub trait Renderer {
    /// Read `width` x `height` pixels at device coordinates `(x, y)` of the
    /// output's last composited frame into `dst`, tightly packed, four
    /// bytes per pixel. When the renderer reports `capture_yflip`, `y`
    /// counts from the bottom edge and rows arrive bottom-up.
    fn read_pixels(
        &self,
        output: &Output,
        format: ReadFormat,
        dst: &mut [u8],
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> CaptureResult<()>;
}

struct HeadlessSurface {
    width: u32,
    height: u32,
    /// Top-down rows of native-endian pixels in the renderer's read format.
    pixels: Vec<u32>,
}

/// In-memory renderer for running capture without a GPU.
///
/// Each attached output gets a zeroed framebuffer that the host paints
/// with [`fill_rect`](Self::fill_rect) or [`set_pixel`](Self::set_pixel).
/// Pixels are stored already in the read format, so `read_pixels`
/// ignores its `format` argument. With `bottom_up` set, readbacks follow
/// GL conventions and must be paired with the `capture_yflip` capability.
pub struct HeadlessRenderer {
    bottom_up: bool,
    surfaces: RefCell<FxHashMap<OutputId, HeadlessSurface>>,
    reads: Cell<usize>,
}

impl HeadlessRenderer {
    pub fn new(bottom_up: bool) -> Self {
        Self {
            bottom_up,
            surfaces: RefCell::new(FxHashMap::default()),
            reads: Cell::new(0),
        }
    }

    pub fn bottom_up(&self) -> bool {
        self.bottom_up
    }

    pub fn attach_output(&self, output: OutputId, width: u32, height: u32) -> CaptureResult<()> {
        let pixels = crate::frame::try_alloc_pixels(pixel_count(width, height)?)?;
        self.surfaces.borrow_mut().insert(
            output,
            HeadlessSurface {
                width,
                height,
                pixels,
            },
        );
        Ok(())
    }

    /// Paint `rect` (device coordinates, top-down) with `color`.
    pub fn fill_rect(&self, output: OutputId, rect: Rect, color: u32) {
        let mut surfaces = self.surfaces.borrow_mut();
        let Some(surface) = surfaces.get_mut(&output) else {
            return;
        };
        let Some(rect) = rect.clamp_to(surface.width, surface.height) else {
            return;
        };
        let stride = surface.width as usize;
        for y in rect.y1..rect.y2 {
            let start = y as usize * stride;
            surface.pixels[start + rect.x1 as usize..start + rect.x2 as usize].fill(color);
        }
    }

    pub fn set_pixel(&self, output: OutputId, x: u32, y: u32, color: u32) {
        self.fill_rect(output, Rect::from_size(x as i32, y as i32, 1, 1), color);
    }

    pub fn pixel(&self, output: OutputId, x: u32, y: u32) -> Option<u32> {
        let surfaces = self.surfaces.borrow();
        let surface = surfaces.get(&output)?;
        if x >= surface.width || y >= surface.height {
            return None;
        }
        surface
            .pixels
            .get(y as usize * surface.width as usize + x as usize)
            .copied()
    }

    /// Number of `read_pixels` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.get()
    }
}

impl Renderer for HeadlessRenderer {
    fn read_pixels(
        &self,
        output: &Output,
        _format: ReadFormat,
        dst: &mut [u8],
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> CaptureResult<()> {
        let surfaces = self.surfaces.borrow();
        let surface = surfaces.get(&output.id()).ok_or_else(|| {
            CaptureError::Platform(anyhow::anyhow!(
                "no headless framebuffer attached to output {}",
                output.name()
            ))
        })?;

        let in_bounds = x >= 0
            && y >= 0
            && x as u64 + u64::from(width) <= u64::from(surface.width)
            && y as u64 + u64::from(height) <= u64::from(surface.height);
        if !in_bounds {
            return Err(CaptureError::BufferOverflow);
        }
        let row_len = width as usize;
        let required = crate::frame::rgba_len(width, height)?;
        if dst.len() < required {
            return Err(CaptureError::BufferOverflow);
        }

        let stride = surface.width as usize;
        for row in 0..height as usize {
            let src_row = if self.bottom_up {
                surface.height as usize - 1 - (y as usize + row)
            } else {
                y as usize + row
            };
            let start = src_row * stride + x as usize;
            let src = &surface.pixels[start..start + row_len];
            let dst_row = &mut dst[row * row_len * 4..(row + 1) * row_len * 4];
            for (out, pixel) in dst_row.chunks_exact_mut(4).zip(src) {
                out.copy_from_slice(&pixel.to_ne_bytes());
            }
        }

        self.reads.set(self.reads.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Output, OutputMode};

    fn output() -> Output {
        Output::new(OutputId::from_raw(1), "HEADLESS-1", 0, 0, OutputMode::new(4, 3))
    }

    fn read_all(renderer: &HeadlessRenderer, output: &Output) -> Vec<u32> {
        let mut bytes = vec![0u8; 4 * 3 * 4];
        renderer
            .read_pixels(output, ReadFormat::X8R8G8B8, &mut bytes, 0, 0, 4, 3)
            .unwrap();
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn top_down_readback_returns_rows_in_order() {
        let output = output();
        let renderer = HeadlessRenderer::new(false);
        renderer.attach_output(output.id(), 4, 3).unwrap();
        renderer.fill_rect(output.id(), Rect::new(0, 0, 4, 1), 0xAA);
        let pixels = read_all(&renderer, &output);
        assert_eq!(&pixels[..4], &[0xAA; 4]);
        assert_eq!(&pixels[8..], &[0; 4]);
        assert_eq!(renderer.read_count(), 1);
    }

    #[test]
    fn bottom_up_readback_starts_at_bottom_row() {
        let output = output();
        let renderer = HeadlessRenderer::new(true);
        renderer.attach_output(output.id(), 4, 3).unwrap();
        renderer.fill_rect(output.id(), Rect::new(0, 0, 4, 1), 0xAA);
        let pixels = read_all(&renderer, &output);
        assert_eq!(&pixels[..4], &[0; 4]);
        assert_eq!(&pixels[8..], &[0xAA; 4]);
    }

    #[test]
    fn out_of_bounds_readback_fails() {
        let output = output();
        let renderer = HeadlessRenderer::new(false);
        renderer.attach_output(output.id(), 4, 3).unwrap();
        let mut bytes = vec![0u8; 64];
        let err = renderer
            .read_pixels(&output, ReadFormat::X8R8G8B8, &mut bytes, 2, 0, 4, 1)
            .unwrap_err();
        assert!(matches!(err, CaptureError::BufferOverflow));
    }

    #[test]
    fn channel_orders() {
        assert_eq!(ReadFormat::A8R8G8B8.channel_order(), Some(ChannelOrder::Bgra));
        assert_eq!(ReadFormat::X8B8G8R8.channel_order(), Some(ChannelOrder::Rgba));
        assert_eq!(ReadFormat::Other(0x3631_4752).channel_order(), None);
    }
}

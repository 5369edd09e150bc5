mod scalar;

pub use scalar::swap_red_blue;

use crate::backend::ChannelOrder;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::row_bytes;

/// Geometry of a surface copy: both sides share `width` x `height` pixels
/// but may have different row strides in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub width: u32,
    pub height: u32,
    pub src_stride: usize,
    pub dst_stride: usize,
}

impl SurfaceLayout {
    pub const fn new(width: u32, height: u32, src_stride: usize, dst_stride: usize) -> Self {
        Self {
            width,
            height,
            src_stride,
            dst_stride,
        }
    }

    /// Tightly packed source rows copied into rows `dst_stride` bytes apart.
    pub fn packed_source(width: u32, height: u32, dst_stride: usize) -> CaptureResult<Self> {
        Ok(Self::new(width, height, row_bytes(width)?, dst_stride))
    }

    fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn required_len(self, stride: usize, row_len: usize) -> CaptureResult<usize> {
        let rows = usize::try_from(self.height).map_err(|_| CaptureError::BufferOverflow)?;
        stride
            .checked_mul(rows - 1)
            .and_then(|len| len.checked_add(row_len))
            .ok_or(CaptureError::BufferOverflow)
    }
}

/// Copy a surface from `src` into `dst`, swapping red and blue when the
/// source is in [`ChannelOrder::Rgba`] and reversing the row order when
/// `yflip` is set. Only `dst` is written.
///
/// Sizes are validated up front; a layout that does not fit either buffer
/// fails with [`CaptureError::BufferOverflow`] before anything is copied.
pub fn convert_surface(
    src: &[u8],
    dst: &mut [u8],
    layout: SurfaceLayout,
    order: ChannelOrder,
    yflip: bool,
) -> CaptureResult<()> {
    if layout.is_empty() {
        return Ok(());
    }

    let row_len = row_bytes(layout.width)?;
    if layout.src_stride < row_len || layout.dst_stride < row_len {
        return Err(CaptureError::BufferOverflow);
    }
    if src.len() < layout.required_len(layout.src_stride, row_len)?
        || dst.len() < layout.required_len(layout.dst_stride, row_len)?
    {
        return Err(CaptureError::BufferOverflow);
    }

    let copy_row: fn(&[u8], &mut [u8]) = match order {
        ChannelOrder::Bgra => scalar::copy_row,
        ChannelOrder::Rgba => scalar::copy_row_swapped,
    };

    let height = layout.height as usize;
    for row in 0..height {
        let src_row = if yflip { height - 1 - row } else { row };
        let src_start = src_row * layout.src_stride;
        let dst_start = row * layout.dst_stride;
        copy_row(
            &src[src_start..src_start + row_len],
            &mut dst[dst_start..dst_start + row_len],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(pixels: &[u32]) -> Vec<u8> {
        pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }

    fn unpack(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn swap_red_blue_keeps_alpha_and_green() {
        assert_eq!(swap_red_blue(0xAA11_2233), 0xAA33_2211);
        assert_eq!(swap_red_blue(swap_red_blue(0x1234_5678)), 0x1234_5678);
    }

    #[test]
    fn same_order_copy_is_identity() {
        let src = pack(&[1, 2, 3, 4, 5, 6]);
        let mut dst = vec![0u8; src.len()];
        let layout = SurfaceLayout::packed_source(3, 2, 12).unwrap();
        convert_surface(&src, &mut dst, layout, ChannelOrder::Bgra, false).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn yflip_reverses_rows_and_swap_exchanges_channels() {
        let src = pack(&[0x00FF_0000, 0x0000_00FF, 0x0000_FF00, 0xFF00_0000]);
        let mut dst = vec![0u8; src.len()];
        let layout = SurfaceLayout::packed_source(2, 2, 8).unwrap();
        convert_surface(&src, &mut dst, layout, ChannelOrder::Rgba, true).unwrap();
        assert_eq!(
            unpack(&dst),
            vec![0x0000_FF00, 0xFF00_0000, 0x0000_00FF, 0x00FF_0000]
        );
    }

    #[test]
    fn destination_stride_padding_is_left_untouched() {
        let src = pack(&[7, 8]);
        let mut dst = vec![0xEEu8; 2 * 12];
        let layout = SurfaceLayout::packed_source(1, 2, 12).unwrap();
        convert_surface(&src, &mut dst, layout, ChannelOrder::Bgra, false).unwrap();
        assert_eq!(unpack(&dst[0..4]), vec![7]);
        assert_eq!(&dst[4..12], &[0xEE; 8]);
        assert_eq!(unpack(&dst[12..16]), vec![8]);
    }

    #[test]
    fn undersized_buffers_are_rejected_without_writes() {
        let src = pack(&[1, 2, 3]);
        let mut dst = vec![0u8; 16];
        let layout = SurfaceLayout::packed_source(2, 2, 8).unwrap();
        let err = convert_surface(&src, &mut dst, layout, ChannelOrder::Bgra, false).unwrap_err();
        assert!(matches!(err, CaptureError::BufferOverflow));
        assert_eq!(dst, vec![0u8; 16]);
    }

    #[test]
    fn empty_surface_is_a_no_op() {
        let layout = SurfaceLayout::new(0, 5, 0, 0);
        convert_surface(&[], &mut [], layout, ChannelOrder::Rgba, true).unwrap();
    }
}

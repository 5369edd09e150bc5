/// Exchange the red and blue bytes of a packed 32-bit pixel, leaving alpha
/// and green untouched.
#[inline(always)]
pub fn swap_red_blue(pixel: u32) -> u32 {
    ((pixel & 0x0000_00FF) << 16)
        | (pixel & 0x0000_FF00)
        | ((pixel & 0x00FF_0000) >> 16)
        | (pixel & 0xFF00_0000)
}

#[inline]
pub(crate) fn copy_row(src: &[u8], dst: &mut [u8]) {
    dst.copy_from_slice(src);
}

pub(crate) fn copy_row_swapped(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        swap_pixel(s, d);
    }
}

#[inline(always)]
fn swap_pixel(src: &[u8], dst: &mut [u8]) {
    let pixel = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    dst.copy_from_slice(&swap_red_blue(pixel).to_le_bytes());
}

//! Delta run-length codec for incremental frame records.
//!
//! Each damaged rectangle is scanned row-major. Every pixel is turned into
//! a 24-bit per-channel delta against the reference frame, and runs of
//! equal deltas are packed into 32-bit words: the top byte is the run
//! count, the low 24 bits the delta. Counts up to [`MAX_DIRECT_RUN`] are
//! stored as `count - 1`; longer runs are split into power-of-two chunks
//! whose top byte is `MAX_DIRECT_RUN + i` for a chunk of `1 << (7 + i)`
//! pixels.

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{BYTES_PER_PIXEL, pixel_count, try_alloc_pixels};
use crate::region::Rect;

/// Largest run a single word encodes directly.
pub const MAX_DIRECT_RUN: u32 = 0xE0;

const DELTA_MASK: u32 = 0x00FF_FFFF;

/// Subtract the three color channels of `reference` from `next`, each
/// modulo 256. Alpha is ignored.
#[inline]
pub fn component_delta(next: u32, reference: u32) -> u32 {
    let r = ((next >> 16) as u8).wrapping_sub((reference >> 16) as u8);
    let g = ((next >> 8) as u8).wrapping_sub((reference >> 8) as u8);
    let b = (next as u8).wrapping_sub(reference as u8);
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Inverse of [`component_delta`]: add `delta` to `reference` per channel.
#[inline]
pub fn apply_delta(reference: u32, delta: u32) -> u32 {
    let r = ((reference >> 16) as u8).wrapping_add((delta >> 16) as u8);
    let g = ((reference >> 8) as u8).wrapping_add((delta >> 8) as u8);
    let b = (reference as u8).wrapping_add(delta as u8);
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Append the words encoding `run` repeats of `delta`.
pub fn emit_run(out: &mut Vec<u32>, delta: u32, mut run: u32) {
    let delta = delta & DELTA_MASK;
    while run > 0 {
        if run <= MAX_DIRECT_RUN {
            out.push(delta | ((run - 1) << 24));
            break;
        }
        // run > 0xE0 >= 128, so i >= 0 and the chunk never exceeds run.
        let i = run.ilog2() - 7;
        out.push(delta | ((i + MAX_DIRECT_RUN) << 24));
        run -= 1 << (7 + i);
    }
}

/// Number of pixels a word stands for.
#[inline]
pub fn run_length(word: u32) -> u32 {
    let count = word >> 24;
    if count < MAX_DIRECT_RUN {
        count + 1
    } else {
        1 << (7 + count - MAX_DIRECT_RUN)
    }
}

/// The last encoded color of every output pixel, zero-initialized.
pub struct ReferenceFrame {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl ReferenceFrame {
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        let pixels = try_alloc_pixels(pixel_count(width, height)?)?;
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Encode `rect` against the reference and update the reference in
    /// place.
    ///
    /// `pixels` holds the rectangle's readback, tightly packed, four bytes
    /// per pixel. With `bottom_up` the readback rows are in reverse order.
    /// Either way the stream covers device rows top-down, so a decoder
    /// never needs to know how the pixels were read. Words are appended to
    /// `out`.
    pub fn encode_rect(
        &mut self,
        rect: Rect,
        pixels: &[u8],
        bottom_up: bool,
        out: &mut Vec<u32>,
    ) -> CaptureResult<()> {
        if rect.is_empty() {
            return Ok(());
        }
        if rect.x1 < 0
            || rect.y1 < 0
            || rect.x2 as u32 > self.width
            || rect.y2 as u32 > self.height
        {
            return Err(CaptureError::BufferOverflow);
        }

        let width = rect.width() as usize;
        let height = rect.height() as usize;
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or(CaptureError::BufferOverflow)?;
        if pixels.len() < expected {
            return Err(CaptureError::BufferOverflow);
        }

        let stride = self.width as usize;
        let mut run = 0u32;
        let mut prev = 0u32;
        let row_len = width * BYTES_PER_PIXEL;
        for j in 0..height {
            let readback_row = if bottom_up { height - 1 - j } else { j };
            let start = (rect.y1 as usize + j) * stride + rect.x1 as usize;
            let reference = &mut self.pixels[start..start + width];
            let source = &pixels[readback_row * row_len..(readback_row + 1) * row_len];

            for (slot, bytes) in reference.iter_mut().zip(source.chunks_exact(BYTES_PER_PIXEL)) {
                let next = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let delta = component_delta(next, *slot);
                *slot = next;
                if run == 0 || delta == prev {
                    run += 1;
                } else {
                    emit_run(out, prev, run);
                    run = 1;
                }
                prev = delta;
            }
        }
        emit_run(out, prev, run);
        Ok(())
    }
}

/// Replays encoded words onto a canvas, mirroring [`ReferenceFrame::encode_rect`].
pub struct DeltaDecoder {
    width: u32,
    height: u32,
    canvas: Vec<u32>,
}

impl DeltaDecoder {
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        let canvas = try_alloc_pixels(pixel_count(width, height)?)?;
        Ok(Self {
            width,
            height,
            canvas,
        })
    }

    pub fn canvas(&self) -> &[u32] {
        &self.canvas
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.canvas
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Decode the stream for `rect` from the front of `words`, returning
    /// how many words were consumed. Rows are painted top-down.
    pub fn decode_rect(&mut self, rect: Rect, words: &[u32]) -> CaptureResult<usize> {
        if rect.is_empty() {
            return Ok(0);
        }
        if rect.x1 < 0
            || rect.y1 < 0
            || rect.x2 as u32 > self.width
            || rect.y2 as u32 > self.height
        {
            return Err(CaptureError::BufferOverflow);
        }

        let width = rect.width() as usize;
        let total = width * rect.height() as usize;
        let stride = self.width as usize;
        let mut painted = 0usize;
        let mut consumed = 0usize;
        while painted < total {
            let word = *words.get(consumed).ok_or_else(|| {
                CaptureError::CorruptStream(format!(
                    "delta stream ended after {painted} of {total} pixels"
                ))
            })?;
            consumed += 1;
            let delta = word & DELTA_MASK;
            let count = run_length(word) as usize;
            if painted + count > total {
                return Err(CaptureError::CorruptStream(format!(
                    "delta run overshoots rectangle: {} > {total}",
                    painted + count
                )));
            }
            for n in painted..painted + count {
                let x = rect.x1 as usize + n % width;
                let y = rect.y1 as usize + n / width;
                let slot = &mut self.canvas[y * stride + x];
                *slot = apply_delta(*slot, delta);
            }
            painted += count;
        }
        Ok(consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn packed(pixels: &[u32]) -> Vec<u8> {
        pixels.iter().flat_map(|p| p.to_ne_bytes()).collect()
    }

    fn words_for_run(run: u32) -> Vec<u32> {
        let mut out = Vec::new();
        emit_run(&mut out, 0x12_3456, run);
        out
    }

    #[test]
    fn delta_wraps_per_channel_and_ignores_alpha() {
        assert_eq!(component_delta(0xFF00_0000, 0), 0);
        assert_eq!(component_delta(0x0001_0203, 0x0002_0101), 0x00FF_0102);
        assert_eq!(apply_delta(0x0002_0101, 0x00FF_0102), 0x0001_0203);
    }

    #[test]
    fn direct_runs_fit_one_word() {
        assert_eq!(words_for_run(1), vec![0x0012_3456]);
        assert_eq!(words_for_run(224), vec![0xDF12_3456]);
    }

    #[test]
    fn run_of_225_needs_two_words() {
        let words = words_for_run(225);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0] >> 24, 0xE0);
        assert_eq!(words.iter().map(|w| run_length(*w)).sum::<u32>(), 225);
    }

    #[test]
    fn long_runs_stay_logarithmic() {
        for run in [1_000_000u32, 4096 * 2160, 0x00FF_FFFF] {
            let words = words_for_run(run);
            assert!(words.len() < 25, "run {run} took {} words", words.len());
            assert_eq!(words.iter().map(|w| u64::from(run_length(*w))).sum::<u64>(), u64::from(run));
        }
    }

    #[test]
    fn black_rect_on_zero_reference_is_one_word() {
        let mut reference = ReferenceFrame::new(100, 100).unwrap();
        let rect = Rect::new(10, 10, 20, 20);
        let mut out = Vec::new();
        reference
            .encode_rect(rect, &packed(&[0; 100]), false, &mut out)
            .unwrap();
        assert_eq!(out, vec![0x6300_0000]);
    }

    #[test]
    fn reference_is_updated_in_place() {
        let mut reference = ReferenceFrame::new(4, 4).unwrap();
        let rect = Rect::new(1, 1, 3, 2);
        let mut out = Vec::new();
        reference
            .encode_rect(rect, &packed(&[0x00AA_BBCC, 0x00AA_BBCC]), false, &mut out)
            .unwrap();
        assert_eq!(out, vec![0x01AA_BBCC]);
        assert_eq!(reference.pixel(1, 1), Some(0x00AA_BBCC));
        assert_eq!(reference.pixel(0, 0), Some(0));

        out.clear();
        reference
            .encode_rect(rect, &packed(&[0x00AA_BBCC, 0x00AA_BBCD]), false, &mut out)
            .unwrap();
        assert_eq!(out, vec![0x0000_0000, 0x0000_0001]);
    }

    #[test]
    fn bottom_up_readback_rows_map_to_device_rows() {
        let mut reference = ReferenceFrame::new(2, 3).unwrap();
        let rect = Rect::new(0, 1, 2, 3);
        // Readback delivers device row 2 first.
        let readback = packed(&[0x22, 0x22, 0x11, 0x11]);
        let mut out = Vec::new();
        reference.encode_rect(rect, &readback, true, &mut out).unwrap();
        assert_eq!(reference.pixel(0, 1), Some(0x11));
        assert_eq!(reference.pixel(1, 2), Some(0x22));

        let mut decoder = DeltaDecoder::new(2, 3).unwrap();
        assert_eq!(decoder.decode_rect(rect, &out).unwrap(), out.len());
        assert_eq!(decoder.canvas(), reference.pixels());
    }

    #[test]
    fn rect_outside_reference_is_rejected() {
        let mut reference = ReferenceFrame::new(4, 4).unwrap();
        let mut out = Vec::new();
        let err = reference
            .encode_rect(Rect::new(2, 2, 5, 3), &packed(&[0; 3]), false, &mut out)
            .unwrap_err();
        assert!(matches!(err, CaptureError::BufferOverflow));
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_stream_fails_to_decode() {
        let mut decoder = DeltaDecoder::new(4, 4).unwrap();
        let err = decoder
            .decode_rect(Rect::new(0, 0, 4, 4), &[0x0000_0000])
            .unwrap_err();
        assert!(matches!(err, CaptureError::CorruptStream(_)));
    }

    proptest! {
        #[test]
        fn encoded_frames_decode_to_the_reference(
            frames in prop::collection::vec(
                (0u32..6, 0u32..5, 1u32..4, 1u32..4, prop::collection::vec(any::<u32>(), 9)),
                1..6,
            )
        ) {
            let mut reference = ReferenceFrame::new(8, 8).unwrap();
            let mut decoder = DeltaDecoder::new(8, 8).unwrap();

            for (x, y, w, h, colors) in frames {
                let rect = Rect::from_size(x as i32, y as i32, w, h);
                let pixels = &colors[..(w * h) as usize];
                let mut out = Vec::new();
                reference.encode_rect(rect, &packed(pixels), false, &mut out).unwrap();
                let used = decoder.decode_rect(rect, &out).unwrap();
                prop_assert_eq!(used, out.len());

                for (n, pixel) in pixels.iter().enumerate() {
                    let px = x + n as u32 % w;
                    let py = y + n as u32 / w;
                    prop_assert_eq!(decoder.pixel(px, py), Some(pixel & DELTA_MASK));
                }
            }

            let masked: Vec<u32> = reference.pixels().iter().map(|p| p & DELTA_MASK).collect();
            prop_assert_eq!(decoder.canvas(), masked.as_slice());
        }
    }
}

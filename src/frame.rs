//! Pixel storage: client destination buffers and fallible allocation of
//! scratch and reference buffers.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::{CaptureError, CaptureResult};

/// Bytes per pixel of every supported layout.
pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel layout of a client shared-memory buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShmFormat {
    #[default]
    Argb8888,
    Xrgb8888,
}

/// A client shared-memory pixel buffer.
///
/// Clones share the same storage, so the client side keeps a view of the
/// pixels the compositor writes into it.
#[derive(Clone)]
pub struct ShmBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: ShmFormat,
    data: Rc<RefCell<Vec<u8>>>,
}

impl ShmBuffer {
    pub fn new(width: u32, height: u32, format: ShmFormat) -> CaptureResult<Self> {
        let stride = row_bytes(width)?;
        Self::with_stride(width, height, stride, format)
    }

    /// Create a buffer whose rows are `stride` bytes apart.
    pub fn with_stride(
        width: u32,
        height: u32,
        stride: usize,
        format: ShmFormat,
    ) -> CaptureResult<Self> {
        let min_stride = row_bytes(width)?;
        if stride < min_stride {
            return Err(CaptureError::InvalidConfig(format!(
                "shm stride too small: stride={stride}, required={min_stride}"
            )));
        }
        let rows = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
        let len = stride
            .checked_mul(rows)
            .ok_or(CaptureError::BufferOverflow)?;
        Ok(Self {
            width,
            height,
            stride,
            format,
            data: Rc::new(RefCell::new(try_alloc_bytes(len)?)),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> ShmFormat {
        self.format
    }

    pub fn data(&self) -> Ref<'_, Vec<u8>> {
        self.data.borrow()
    }

    /// Exclusive access for the duration of a copy into the buffer.
    pub(crate) fn begin_access(&self) -> RefMut<'_, Vec<u8>> {
        self.data.borrow_mut()
    }

    /// Read one pixel as a native-endian 32-bit value.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize)
            .checked_mul(self.stride)?
            .checked_add((x as usize).checked_mul(BYTES_PER_PIXEL)?)?;
        let data = self.data.borrow();
        let bytes = data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl std::fmt::Debug for ShmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish()
    }
}

/// A buffer attached by a client as a screenshot destination.
#[derive(Clone, Debug)]
pub enum ClientBuffer {
    Shm(ShmBuffer),
    /// A GPU buffer; it cannot be written by the CPU copy path.
    Dmabuf { width: u32, height: u32 },
}

impl ClientBuffer {
    pub fn as_shm(&self) -> Option<&ShmBuffer> {
        match self {
            Self::Shm(buffer) => Some(buffer),
            Self::Dmabuf { .. } => None,
        }
    }
}

impl From<ShmBuffer> for ClientBuffer {
    fn from(buffer: ShmBuffer) -> Self {
        Self::Shm(buffer)
    }
}

pub(crate) fn row_bytes(width: u32) -> CaptureResult<usize> {
    usize::try_from(width)
        .ok()
        .and_then(|w| w.checked_mul(BYTES_PER_PIXEL))
        .ok_or(CaptureError::BufferOverflow)
}

pub(crate) fn pixel_count(width: u32, height: u32) -> CaptureResult<usize> {
    let w = usize::try_from(width).map_err(|_| CaptureError::BufferOverflow)?;
    let h = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    w.checked_mul(h).ok_or(CaptureError::BufferOverflow)
}

pub(crate) fn rgba_len(width: u32, height: u32) -> CaptureResult<usize> {
    pixel_count(width, height)?
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or(CaptureError::BufferOverflow)
}

/// Allocate `len` zeroed bytes, reporting allocator refusal instead of
/// aborting.
pub(crate) fn try_alloc_bytes(len: usize) -> CaptureResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| CaptureError::OutOfMemory(format!("{len} byte pixel buffer")))?;
    data.resize(len, 0);
    Ok(data)
}

pub(crate) fn try_alloc_pixels(len: usize) -> CaptureResult<Vec<u32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| CaptureError::OutOfMemory(format!("{len} pixel buffer")))?;
    data.resize(len, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shm_buffer_is_zeroed_and_shared_between_clones() {
        let buffer = ShmBuffer::new(4, 2, ShmFormat::Xrgb8888).unwrap();
        assert_eq!(buffer.stride(), 16);
        assert_eq!(buffer.data().len(), 32);
        assert_eq!(buffer.pixel(3, 1), Some(0));

        let client_view = buffer.clone();
        buffer.begin_access()[16..20].copy_from_slice(&0xFF11_2233u32.to_ne_bytes());
        assert_eq!(client_view.pixel(0, 1), Some(0xFF11_2233));
        assert_eq!(client_view.pixel(4, 0), None);
    }

    #[test]
    fn rejects_stride_smaller_than_row() {
        let err = ShmBuffer::with_stride(10, 10, 39, ShmFormat::Argb8888).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidConfig(_)));
    }

    #[test]
    fn size_overflow_is_reported() {
        assert!(matches!(
            rgba_len(u32::MAX, u32::MAX),
            Err(CaptureError::BufferOverflow)
        ));
        assert_eq!(rgba_len(3, 2).unwrap(), 24);
    }

    #[test]
    fn dmabuf_is_not_shm() {
        let buffer = ClientBuffer::Dmabuf {
            width: 10,
            height: 10,
        };
        assert!(buffer.as_shm().is_none());
    }
}

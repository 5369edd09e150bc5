//! Capture file layout.
//!
//! A file starts with a 16-byte header `{magic, format, width, height}`
//! followed by frame records `{msecs, nrects, rects[nrects]}`, each rect
//! being four `i32`s, and then one delta-word stream per rect. Every
//! field is little-endian.
//!
//! Each rect's stream walks device rows top-down whatever order the
//! renderer reads back in. Writers that keep the readback's bottom-up
//! row order for y-flipped renderers produce different bytes for the
//! same frames, so such files are not interchangeable with these: each
//! replays vertically mirrored inside its rects through the other's
//! decoder.

use std::io::{self, IoSlice, Read, Write};

use crate::backend::ReadFormat;
use crate::codec::{DeltaDecoder, run_length};
use crate::error::{CaptureError, CaptureResult};
use crate::region::Rect;

pub const WCAP_HEADER_MAGIC: u32 = 0x5743_4150;
pub const FILE_HEADER_LEN: usize = 16;
pub const FRAME_HEADER_LEN: usize = 8;
pub const RECT_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WcapFormat {
    Xrgb8888,
    Xbgr8888,
}

impl WcapFormat {
    /// The file format recorded for a renderer read format, if recording
    /// supports it.
    pub fn from_read_format(format: ReadFormat) -> Option<Self> {
        match format {
            ReadFormat::A8R8G8B8 | ReadFormat::X8R8G8B8 => Some(Self::Xrgb8888),
            ReadFormat::A8B8G8R8 => Some(Self::Xbgr8888),
            ReadFormat::X8B8G8R8 | ReadFormat::Other(_) => None,
        }
    }

    pub const fn tag(self) -> u32 {
        match self {
            Self::Xrgb8888 => 0x3432_5258,
            Self::Xbgr8888 => 0x3432_4258,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x3432_5258 => Some(Self::Xrgb8888),
            0x3432_4258 => Some(Self::Xbgr8888),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xrgb8888 => "xrgb8888",
            Self::Xbgr8888 => "xbgr8888",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub format: WcapFormat,
    pub width: u32,
    pub height: u32,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_LEN] {
        let mut bytes = [0u8; FILE_HEADER_LEN];
        for (slot, word) in bytes
            .chunks_exact_mut(4)
            .zip([WCAP_HEADER_MAGIC, self.format.tag(), self.width, self.height])
        {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn parse(bytes: &[u8; FILE_HEADER_LEN]) -> CaptureResult<Self> {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        if word(0) != WCAP_HEADER_MAGIC {
            return Err(CaptureError::UnsupportedFormat(format!(
                "bad capture magic {:#010x}",
                word(0)
            )));
        }
        let format = WcapFormat::from_tag(word(4)).ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!("unknown capture format {:#010x}", word(4)))
        })?;
        Ok(Self {
            format,
            width: word(8),
            height: word(12),
        })
    }
}

/// Serialized `{msecs, nrects}` followed by the packed rect list, kept as
/// two buffers for a single vectored write.
pub(crate) struct FrameHeader {
    head: [u8; FRAME_HEADER_LEN],
    rects: Vec<u8>,
}

impl FrameHeader {
    pub(crate) fn new(msecs: u32, rects: &[Rect]) -> CaptureResult<Self> {
        let nrects = u32::try_from(rects.len()).map_err(|_| CaptureError::BufferOverflow)?;
        let mut head = [0u8; FRAME_HEADER_LEN];
        head[..4].copy_from_slice(&msecs.to_le_bytes());
        head[4..].copy_from_slice(&nrects.to_le_bytes());

        let mut packed = Vec::with_capacity(rects.len() * RECT_LEN);
        for rect in rects {
            for value in [rect.x1, rect.y1, rect.x2, rect.y2] {
                packed.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(Self {
            head,
            rects: packed,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.head.len() + self.rects.len()
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut bufs = [IoSlice::new(&self.head), IoSlice::new(&self.rects)];
        write_all_vectored(writer, &mut bufs)
    }
}

/// Vectored counterpart of `write_all`: keeps writing until every slice
/// is consumed.
pub(crate) fn write_all_vectored<W: Write>(
    writer: &mut W,
    mut bufs: &mut [IoSlice<'_>],
) -> io::Result<()> {
    IoSlice::advance_slices(&mut bufs, 0);
    while !bufs.is_empty() {
        match writer.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole frame header",
                ));
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Append `words` to `out` as little-endian bytes.
pub(crate) fn extend_words(out: &mut Vec<u8>, words: &[u32]) {
    out.reserve(words.len() * 4);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// One decoded frame record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    pub msecs: u32,
    pub rects: Vec<Rect>,
}

/// Sequential reader for capture files. Frames are replayed onto a
/// [`DeltaDecoder`] canvas as they are read.
pub struct WcapReader<R> {
    reader: R,
    header: FileHeader,
    decoder: DeltaDecoder,
}

impl<R: Read> WcapReader<R> {
    pub fn new(mut reader: R) -> CaptureResult<Self> {
        let mut bytes = [0u8; FILE_HEADER_LEN];
        reader.read_exact(&mut bytes)?;
        let header = FileHeader::parse(&bytes)?;
        let decoder = DeltaDecoder::new(header.width, header.height)?;
        Ok(Self {
            reader,
            header,
            decoder,
        })
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Canvas after every frame read so far.
    pub fn decoder(&self) -> &DeltaDecoder {
        &self.decoder
    }

    /// Read and apply the next frame. Returns `None` at a clean end of
    /// file; a file truncated inside a record is an error.
    pub fn next_frame(&mut self) -> CaptureResult<Option<FrameRecord>> {
        let mut head = [0u8; FRAME_HEADER_LEN];
        if !read_exact_or_eof(&mut self.reader, &mut head)? {
            return Ok(None);
        }
        let msecs = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let nrects = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);

        let mut rects = Vec::new();
        for _ in 0..nrects {
            let mut raw = [0u8; RECT_LEN];
            self.reader.read_exact(&mut raw)?;
            let field = |i: usize| i32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
            rects.push(Rect::new(field(0), field(4), field(8), field(12)));
        }

        for rect in &rects {
            let words = self.read_stream(*rect)?;
            self.decoder.decode_rect(*rect, &words)?;
        }
        Ok(Some(FrameRecord { msecs, rects }))
    }

    fn read_stream(&mut self, rect: Rect) -> CaptureResult<Vec<u32>> {
        let total = rect.area();
        let mut covered = 0u64;
        let mut words = Vec::new();
        while covered < total {
            let mut raw = [0u8; 4];
            self.reader.read_exact(&mut raw)?;
            let word = u32::from_le_bytes(raw);
            covered += u64::from(run_length(word));
            words.push(word);
        }
        Ok(words)
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "capture file truncated inside a frame header",
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

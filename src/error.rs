use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// A pixel or scratch buffer could not be allocated.
    OutOfMemory(String),

    /// The compositor's pixel read format has no capture file tag.
    UnsupportedFormat(String),

    BufferOverflow,

    InvalidConfig(String),

    /// A capture file's delta stream does not cover its rectangle.
    CorruptStream(String),

    /// The output was destroyed by the host.
    OutputLost,

    NoOutputs,

    AlreadyRecording(String),

    Io(std::io::Error),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Unsupported,
    ResourceExhaustion,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidConfig(_)
            | Self::CorruptStream(_)
            | Self::NoOutputs
            | Self::AlreadyRecording(_) => CaptureErrorClass::InvalidInput,
            Self::UnsupportedFormat(_) => CaptureErrorClass::Unsupported,
            Self::OutOfMemory(_) | Self::BufferOverflow | Self::Io(_) => {
                CaptureErrorClass::ResourceExhaustion
            }
            Self::OutputLost | Self::Platform(_) => CaptureErrorClass::Fatal,
        }
    }

    /// Whether this error means a buffer or file could not be obtained.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::ResourceExhaustion)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory(message) => write!(f, "out of memory: {message}"),
            Self::UnsupportedFormat(fmt_name) => {
                write!(f, "unsupported pixel read format: {fmt_name}")
            }
            Self::BufferOverflow => write!(f, "pixel buffer size overflow"),
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::CorruptStream(message) => write!(f, "corrupt capture stream: {message}"),
            Self::OutputLost => write!(f, "output is no longer available"),
            Self::NoOutputs => write!(f, "compositor has no outputs"),
            Self::AlreadyRecording(name) => {
                write!(f, "a recorder is already active for output {name}")
            }
            Self::Io(inner) => write!(f, "capture file i/o failed: {inner}"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(inner) => Some(inner),
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

pub mod backend;
pub mod codec;
pub mod compositor;
pub mod convert;
pub(crate) mod env_config;
pub mod error;
pub mod frame;
pub mod output;
pub mod recorder;
pub mod region;
pub mod screenshooter;
pub mod screenshot;
pub mod wcap;

pub use backend::{Capabilities, ChannelOrder, HeadlessRenderer, ReadFormat, ReadbackInfo, Renderer};
pub use compositor::Compositor;
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use frame::{ClientBuffer, ShmBuffer, ShmFormat};
pub use output::{
    FrameContext, FrameListener, ListenerAction, ListenerId, Output, OutputId, OutputMode,
};
pub use recorder::{
    DEFAULT_CAPTURE_FILE, Recorder, RecorderConfig, RecorderState, RecorderStats, StopOutcome,
};
pub use region::{OutputTransform, Rect, Region};
pub use screenshooter::{Screenshooter, ToggleOutcome};
pub use screenshot::ScreenshotOutcome;
pub use wcap::{WcapFormat, WcapReader};

//! One-shot capture of a whole output into a client buffer.

use std::fmt;

use tracing::{debug, warn};

use crate::convert::{SurfaceLayout, convert_surface};
use crate::frame::{ClientBuffer, ShmBuffer, rgba_len, try_alloc_bytes};
use crate::output::{FrameContext, FrameListener, ListenerAction, ListenerId, Output, OutputMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenshotOutcome {
    Success,
    BadBuffer,
    NoMemory,
}

impl ScreenshotOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BadBuffer => "bad_buffer",
            Self::NoMemory => "no_memory",
        }
    }
}

impl fmt::Display for ScreenshotOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type DoneCallback = Box<dyn FnOnce(ScreenshotOutcome)>;

/// Capture the next composited frame of `output` into `buffer`.
///
/// `done` is called exactly once. Requests that cannot be served are
/// answered before this returns and yield `None`; otherwise the returned
/// listener fires on the next frame completion. If the output goes away
/// before that, or the request is cancelled with
/// [`Output::remove_frame_listener`], `done` receives
/// [`ScreenshotOutcome::NoMemory`] and the plane suspension is released.
pub fn shoot<F>(output: &mut Output, buffer: ClientBuffer, done: F) -> Option<ListenerId>
where
    F: FnOnce(ScreenshotOutcome) + 'static,
{
    let Some(shm) = buffer.as_shm() else {
        debug!(output = output.name(), "screenshot rejected: not a shm buffer");
        done(ScreenshotOutcome::BadBuffer);
        return None;
    };
    let mode = output.mode();
    if !fits(shm, mode) {
        debug!(
            output = output.name(),
            buffer_width = shm.width(),
            buffer_height = shm.height(),
            mode_width = mode.width,
            mode_height = mode.height,
            "screenshot rejected: buffer smaller than output"
        );
        done(ScreenshotOutcome::BadBuffer);
        return None;
    }
    let scratch = match alloc_scratch(mode) {
        Ok(scratch) => scratch,
        Err(outcome) => {
            done(outcome);
            return None;
        }
    };

    let listener = ScreenshotListener {
        buffer: shm.clone(),
        mode,
        scratch,
        done: Some(Box::new(done)),
    };
    let id = output.add_frame_listener(Box::new(listener));
    output.suspend_planes();
    output.schedule_repaint();
    Some(id)
}

fn fits(buffer: &ShmBuffer, mode: OutputMode) -> bool {
    buffer.width() >= mode.width && buffer.height() >= mode.height
}

fn alloc_scratch(mode: OutputMode) -> Result<Vec<u8>, ScreenshotOutcome> {
    rgba_len(mode.width, mode.height)
        .and_then(try_alloc_bytes)
        .map_err(|err| {
            warn!(error = %err, "screenshot scratch allocation failed");
            ScreenshotOutcome::NoMemory
        })
}

struct ScreenshotListener {
    buffer: ShmBuffer,
    mode: OutputMode,
    scratch: Vec<u8>,
    done: Option<DoneCallback>,
}

impl ScreenshotListener {
    fn capture(&mut self, output: &Output, frame: &FrameContext<'_>) -> ScreenshotOutcome {
        let mode = output.mode();
        if mode != self.mode {
            // The mode changed while the request was armed.
            if !fits(&self.buffer, mode) {
                return ScreenshotOutcome::BadBuffer;
            }
            match alloc_scratch(mode) {
                Ok(scratch) => self.scratch = scratch,
                Err(outcome) => return outcome,
            }
            self.mode = mode;
        }

        let format = frame.readback.format;
        if let Err(err) = frame.renderer.read_pixels(
            output,
            format,
            &mut self.scratch,
            0,
            0,
            mode.width,
            mode.height,
        ) {
            warn!(output = output.name(), error = %err, "screenshot readback failed");
            return ScreenshotOutcome::NoMemory;
        }

        let Some(order) = format.channel_order() else {
            warn!(
                output = output.name(),
                format = format.as_str(),
                "screenshot read format not convertible; buffer left untouched"
            );
            return ScreenshotOutcome::Success;
        };

        let layout = match SurfaceLayout::packed_source(mode.width, mode.height, self.buffer.stride()) {
            Ok(layout) => layout,
            Err(err) => {
                warn!(error = %err, "screenshot layout overflow");
                return ScreenshotOutcome::NoMemory;
            }
        };
        let mut dst = self.buffer.begin_access();
        match convert_surface(&self.scratch, &mut dst, layout, order, frame.readback.yflip()) {
            Ok(()) => ScreenshotOutcome::Success,
            Err(err) => {
                warn!(output = output.name(), error = %err, "screenshot copy failed");
                ScreenshotOutcome::BadBuffer
            }
        }
    }

    fn finish(&mut self, outcome: ScreenshotOutcome) {
        if let Some(done) = self.done.take() {
            done(outcome);
        }
    }
}

impl FrameListener for ScreenshotListener {
    fn frame_complete(&mut self, output: &mut Output, frame: &FrameContext<'_>) -> ListenerAction {
        output.resume_planes();
        let outcome = self.capture(output, frame);
        debug!(output = output.name(), %outcome, "screenshot complete");
        self.finish(outcome);
        ListenerAction::Remove
    }

    fn detached(&mut self, output: &mut Output) {
        if self.done.is_some() {
            output.resume_planes();
            debug!(output = output.name(), "screenshot cancelled before the next frame");
            self.finish(ScreenshotOutcome::NoMemory);
        }
    }
}

impl Drop for ScreenshotListener {
    fn drop(&mut self) {
        // Dropped unfired only when the output is destroyed first.
        self.finish(ScreenshotOutcome::NoMemory);
    }
}

//! Incremental recording of an output into a capture file.
//!
//! A [`Recorder`] subscribes to its output's frame completions. Every frame
//! with damage becomes one record: the damaged rects in device
//! coordinates, then each rect's pixels delta-encoded against the
//! reference frame. Frames without damage are skipped.
//!
//! Teardown runs exactly once. Stopping from inside a frame dispatch only
//! marks the recorder as draining; the recorder's own handler releases
//! everything at the end of its next run.

use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, error, info, trace, warn};

use crate::backend::ReadbackInfo;
use crate::codec::ReferenceFrame;
use crate::env_config::{define_env_flag, env_var_path};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{rgba_len, try_alloc_bytes};
use crate::output::{FrameContext, FrameListener, ListenerAction, ListenerId, Output, OutputId, OutputMode};
use crate::wcap::{FileHeader, FrameHeader, WcapFormat, extend_words};

pub const DEFAULT_CAPTURE_FILE: &str = "capture.wcap";

const CAPTURE_FILE_ENV: &str = "OUTPUT_CAPTURE_FILE";

define_env_flag!(enabled_when(sync_on_close_from_env, "OUTPUT_CAPTURE_SYNC"));

/// Where and how a recording is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Capture file; created or truncated on start.
    pub path: PathBuf,
    /// `fsync` the file before closing it.
    pub sync_on_close: bool,
}

impl RecorderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_close: false,
        }
    }

    pub fn with_sync_on_close(mut self, sync_on_close: bool) -> Self {
        self.sync_on_close = sync_on_close;
        self
    }
}

impl Default for RecorderConfig {
    /// `capture.wcap` in the working directory unless `OUTPUT_CAPTURE_FILE`
    /// names another path; `OUTPUT_CAPTURE_SYNC` enables `sync_on_close`.
    fn default() -> Self {
        Self {
            path: env_var_path(CAPTURE_FILE_ENV)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_FILE)),
            sync_on_close: sync_on_close_from_env(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub frames_written: u64,
    /// Frames whose damage was empty after clipping and transforming.
    pub frames_skipped: u64,
    /// Bytes written so far, file header included.
    pub total_bytes: u64,
}

impl RecorderStats {
    pub fn total_mib(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Active,
    /// Stop requested; teardown happens at the end of the next frame.
    Draining,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(RecorderStats),
    Draining,
}

struct Session {
    file: File,
    sync_on_close: bool,
    mode: OutputMode,
    listener: ListenerId,
    reference: ReferenceFrame,
    readback: Vec<u8>,
    words: Vec<u32>,
    bytes: Vec<u8>,
}

struct Shared {
    output: OutputId,
    output_name: String,
    path: PathBuf,
    destroying: Cell<bool>,
    stats: Cell<RecorderStats>,
    session: RefCell<Option<Session>>,
}

/// Handle to a recording session. Clones refer to the same session.
#[derive(Clone)]
pub struct Recorder {
    shared: Rc<Shared>,
}

impl Recorder {
    /// Start recording `output`.
    ///
    /// Nothing is left behind on failure: no listener, no plane
    /// suspension, and for an unsupported read format no file either.
    pub fn start(
        output: &mut Output,
        readback: ReadbackInfo,
        config: &RecorderConfig,
    ) -> CaptureResult<Self> {
        let mode = output.mode();

        let Some(format) = WcapFormat::from_read_format(readback.format) else {
            error!(
                output = output.name(),
                format = readback.format.as_str(),
                "recorder: unsupported pixel read format"
            );
            return Err(CaptureError::UnsupportedFormat(
                readback.format.as_str().to_string(),
            ));
        };

        let reference = ReferenceFrame::new(mode.width, mode.height).inspect_err(|err| {
            error!(output = output.name(), error = %err, "recorder: failed to allocate reference frame");
        })?;
        let scratch = rgba_len(mode.width, mode.height)
            .and_then(try_alloc_bytes)
            .inspect_err(|err| {
                error!(output = output.name(), error = %err, "recorder: failed to allocate readback buffer");
            })?;

        let mut file = open_capture_file(&config.path).inspect_err(|err| {
            error!(
                output = output.name(),
                path = %config.path.display(),
                error = %err,
                "recorder: failed to open capture file"
            );
        })?;
        let header = FileHeader {
            format,
            width: mode.width,
            height: mode.height,
        }
        .to_bytes();
        file.write_all(&header).inspect_err(|err| {
            error!(path = %config.path.display(), error = %err, "recorder: failed to write file header");
        })?;

        let shared = Rc::new(Shared {
            output: output.id(),
            output_name: output.name().to_string(),
            path: config.path.clone(),
            destroying: Cell::new(false),
            stats: Cell::new(RecorderStats {
                total_bytes: header.len() as u64,
                ..RecorderStats::default()
            }),
            session: RefCell::new(None),
        });
        let listener = output.add_frame_listener(Box::new(RecorderListener {
            shared: Rc::clone(&shared),
        }));
        *shared.session.borrow_mut() = Some(Session {
            file,
            sync_on_close: config.sync_on_close,
            mode,
            listener,
            reference,
            readback: scratch,
            words: Vec::new(),
            bytes: Vec::new(),
        });

        output.suspend_planes();
        output.damage_whole();

        info!(
            output = output.name(),
            path = %config.path.display(),
            format = format.as_str(),
            width = mode.width,
            height = mode.height,
            "starting recorder"
        );
        Ok(Self { shared })
    }

    pub fn output(&self) -> OutputId {
        self.shared.output
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// The frame listener recording this session, while it runs.
    /// Removing it from the output stops the recorder.
    pub fn listener(&self) -> Option<ListenerId> {
        self.shared
            .session
            .borrow()
            .as_ref()
            .map(|session| session.listener)
    }

    pub fn stats(&self) -> RecorderStats {
        self.shared.stats.get()
    }

    pub fn state(&self) -> RecorderState {
        if self.shared.session.borrow().is_none() {
            RecorderState::Stopped
        } else if self.shared.destroying.get() {
            RecorderState::Draining
        } else {
            RecorderState::Active
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RecorderState::Stopped
    }

    /// Stop recording. Outside a frame dispatch the session is torn down
    /// right away; during one it drains and a repaint is scheduled so the
    /// teardown follows promptly.
    pub fn stop(&self, output: &mut Output) -> StopOutcome {
        if self.is_stopped() {
            return StopOutcome::Stopped(self.stats());
        }
        if output.is_emitting_frame() {
            self.shared.destroying.set(true);
            output.schedule_repaint();
            debug!(output = output.name(), "recorder draining");
            return StopOutcome::Draining;
        }
        StopOutcome::Stopped(self.shared.teardown(Some(output)))
    }

    /// Tear down after the output itself is gone. The file is closed
    /// best-effort and the draining path is skipped.
    pub fn abort(&self) -> RecorderStats {
        if !self.is_stopped() {
            warn!(output = %self.shared.output_name, "output removed while recording");
        }
        self.shared.teardown(None)
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("output", &self.shared.output)
            .field("path", &self.shared.path)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn add_stats(&self, update: impl FnOnce(&mut RecorderStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn record_frame(
        &self,
        session: &mut Session,
        output: &Output,
        frame: &FrameContext<'_>,
    ) -> CaptureResult<()> {
        let damage = output.device_damage(frame.damage);
        if damage.is_empty() {
            trace!(output = output.name(), msecs = frame.frame_time_ms, "recorder: no damage, frame skipped");
            self.add_stats(|stats| stats.frames_skipped += 1);
            return Ok(());
        }

        let header = FrameHeader::new(frame.frame_time_ms, damage.rects())?;
        header.write_to(&mut session.file)?;
        self.add_stats(|stats| stats.total_bytes += header.len() as u64);

        let yflip = frame.readback.yflip();
        let height = i32::try_from(session.mode.height).map_err(|_| CaptureError::BufferOverflow)?;
        for rect in damage.rects() {
            let len = rgba_len(rect.width(), rect.height())?;
            let pixels = session
                .readback
                .get_mut(..len)
                .ok_or(CaptureError::BufferOverflow)?;
            let y = if yflip { height - rect.y2 } else { rect.y1 };
            frame.renderer.read_pixels(
                output,
                frame.readback.format,
                pixels,
                rect.x1,
                y,
                rect.width(),
                rect.height(),
            )?;

            session.words.clear();
            session
                .reference
                .encode_rect(*rect, &session.readback[..len], yflip, &mut session.words)?;
            session.bytes.clear();
            extend_words(&mut session.bytes, &session.words);
            session.file.write_all(&session.bytes)?;
            let written = session.bytes.len() as u64;
            self.add_stats(|stats| stats.total_bytes += written);
        }

        self.add_stats(|stats| stats.frames_written += 1);
        Ok(())
    }

    fn teardown(&self, output: Option<&mut Output>) -> RecorderStats {
        let Some(session) = self.session.borrow_mut().take() else {
            return self.stats.get();
        };
        self.destroying.set(false);

        if let Some(output) = output {
            output.remove_frame_listener(session.listener);
            output.resume_planes();
        }
        if let Err(err) = close_capture_file(session.file, session.sync_on_close) {
            warn!(path = %self.path.display(), error = %err, "recorder: failed to close capture file");
        }

        let stats = self.stats.get();
        info!(
            output = %self.output_name,
            total_mib = stats.total_mib(),
            total_bytes = stats.total_bytes,
            frames = stats.frames_written,
            "stopping recorder, total file size {}M, {} frames",
            stats.total_mib(),
            stats.frames_written
        );
        stats
    }
}

struct RecorderListener {
    shared: Rc<Shared>,
}

impl FrameListener for RecorderListener {
    fn frame_complete(&mut self, output: &mut Output, frame: &FrameContext<'_>) -> ListenerAction {
        let shared = &self.shared;
        {
            let mut slot = shared.session.borrow_mut();
            let Some(session) = slot.as_mut() else {
                return ListenerAction::Remove;
            };

            if output.mode() != session.mode {
                warn!(
                    output = output.name(),
                    "recorder: output mode changed, stopping"
                );
                shared.destroying.set(true);
            } else if let Err(err) = shared.record_frame(session, output, frame) {
                error!(
                    output = output.name(),
                    path = %shared.path.display(),
                    error = %err,
                    "recorder: failed to record frame, stopping"
                );
                shared.destroying.set(true);
            }
        }

        if shared.destroying.get() {
            shared.teardown(Some(output));
            return ListenerAction::Remove;
        }
        ListenerAction::Keep
    }

    fn detached(&mut self, output: &mut Output) {
        if self.shared.session.borrow().is_some() {
            debug!(output = output.name(), "recorder listener removed, stopping");
            self.shared.teardown(Some(output));
        }
    }
}

fn open_capture_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

fn close_capture_file(mut file: File, sync: bool) -> io::Result<()> {
    file.flush()?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::compositor::Compositor;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::ClientBuffer;
use crate::output::{ListenerId, OutputId};
use crate::recorder::{Recorder, RecorderConfig, RecorderStats, StopOutcome};
use crate::screenshot::{self, ScreenshotOutcome};

/// What the recorder toggle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started(OutputId),
    Stopped(OutputId, RecorderStats),
    /// The stop was requested mid-frame; teardown follows on the next frame.
    Draining(OutputId),
}

/// Entry point for screenshots and recordings across all outputs.
///
/// Keeps at most one recorder per output. Recorders that finished on
/// their own (write failure, mode change, draining) are dropped from the
/// registry lazily.
pub struct Screenshooter {
    config: RecorderConfig,
    recorders: FxHashMap<OutputId, Recorder>,
}

impl Default for Screenshooter {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl Screenshooter {
    /// `config` is what the toggle binding records with.
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            recorders: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_recording(&self, output: OutputId) -> bool {
        self.recorders
            .get(&output)
            .is_some_and(|recorder| !recorder.is_stopped())
    }

    pub fn recorder(&self, output: OutputId) -> Option<&Recorder> {
        self.recorders
            .get(&output)
            .filter(|recorder| !recorder.is_stopped())
    }

    pub fn start_recording(
        &mut self,
        compositor: &mut Compositor,
        output: OutputId,
        config: &RecorderConfig,
    ) -> CaptureResult<Recorder> {
        self.prune();
        let readback = compositor.readback();
        let target = compositor
            .output_mut(output)
            .ok_or(CaptureError::OutputLost)?;
        if self.recorders.contains_key(&output) {
            return Err(CaptureError::AlreadyRecording(target.name().to_string()));
        }

        let recorder = Recorder::start(target, readback, config)?;
        self.recorders.insert(output, recorder.clone());
        Ok(recorder)
    }

    /// Stop the recorder on `output`, if any. A recorder whose output has
    /// already been removed is aborted.
    pub fn stop_recording(
        &mut self,
        compositor: &mut Compositor,
        output: OutputId,
    ) -> Option<StopOutcome> {
        self.prune();
        let recorder = self.recorders.get(&output)?;
        let outcome = match compositor.output_mut(output) {
            Some(target) => recorder.stop(target),
            None => StopOutcome::Stopped(recorder.abort()),
        };
        if matches!(outcome, StopOutcome::Stopped(_)) {
            self.recorders.remove(&output);
        }
        Some(outcome)
    }

    /// The recorder key binding: stop the first running recorder in
    /// output order, or start one on the keyboard-focused output (the
    /// first output when nothing has focus) using the configured file.
    pub fn toggle_recorder(&mut self, compositor: &mut Compositor) -> CaptureResult<ToggleOutcome> {
        self.prune();

        let running = compositor
            .outputs()
            .iter()
            .map(|output| output.id())
            .find(|id| self.recorders.contains_key(id));
        if let Some(id) = running {
            return Ok(match self.stop_recording(compositor, id) {
                Some(StopOutcome::Draining) => ToggleOutcome::Draining(id),
                Some(StopOutcome::Stopped(stats)) => ToggleOutcome::Stopped(id, stats),
                None => ToggleOutcome::Stopped(id, RecorderStats::default()),
            });
        }

        let target = compositor
            .keyboard_focus()
            .or_else(|| compositor.outputs().first().map(|output| output.id()))
            .ok_or(CaptureError::NoOutputs)?;
        let config = self.config.clone();
        self.start_recording(compositor, target, &config)?;
        debug!(output = %target, "recorder toggled on");
        Ok(ToggleOutcome::Started(target))
    }

    /// Capture the next frame of `output` into `buffer`; see
    /// [`screenshot::shoot`]. An unknown output answers `NoMemory`.
    pub fn shoot<F>(
        &self,
        compositor: &mut Compositor,
        output: OutputId,
        buffer: ClientBuffer,
        done: F,
    ) -> Option<ListenerId>
    where
        F: FnOnce(ScreenshotOutcome) + 'static,
    {
        let Some(target) = compositor.output_mut(output) else {
            debug!(output = %output, "screenshot requested for unknown output");
            done(ScreenshotOutcome::NoMemory);
            return None;
        };
        screenshot::shoot(target, buffer, done)
    }

    /// Forget `output` after the host destroyed it, force-stopping its
    /// recorder.
    pub fn output_removed(&mut self, output: OutputId) -> Option<RecorderStats> {
        let recorder = self.recorders.remove(&output)?;
        let was_running = !recorder.is_stopped();
        let stats = recorder.abort();
        if was_running {
            info!(output = %output, frames = stats.frames_written, "recording ended with its output");
        }
        Some(stats)
    }

    fn prune(&mut self) {
        self.recorders.retain(|_, recorder| !recorder.is_stopped());
    }
}

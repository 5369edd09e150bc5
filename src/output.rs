use std::fmt;

use crate::backend::{ReadbackInfo, Renderer};
use crate::region::{OutputTransform, Rect, Region};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u32);

impl OutputId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output#{}", self.0)
    }
}

/// Current video mode in device pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputMode {
    pub width: u32,
    pub height: u32,
}

impl OutputMode {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Data delivered to frame listeners when a repaint of an output completes.
pub struct FrameContext<'a> {
    pub renderer: &'a dyn Renderer,
    pub readback: ReadbackInfo,
    /// Presentation time of the frame in milliseconds.
    pub frame_time_ms: u32,
    /// Damage repainted by this frame, in global coordinates.
    pub damage: &'a Region,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerAction {
    Keep,
    Remove,
}

/// Subscriber to an output's frame-completion events.
pub trait FrameListener {
    /// Called once per completed repaint, in registration order. Returning
    /// [`ListenerAction::Remove`] unsubscribes the listener.
    fn frame_complete(&mut self, output: &mut Output, frame: &FrameContext<'_>) -> ListenerAction;

    /// Called when someone else unsubscribes this listener through
    /// [`Output::remove_frame_listener`]. Not called for listeners that
    /// return [`ListenerAction::Remove`] or that are dropped with the
    /// output.
    fn detached(&mut self, _output: &mut Output) {}
}

#[derive(Default)]
struct FrameSignal {
    listeners: Vec<(ListenerId, Box<dyn FrameListener>)>,
    next_id: u64,
    emitting: bool,
    /// Listeners taken out of `listeners` for the current emission.
    in_flight: Vec<ListenerId>,
    /// In-flight listeners removed before or while they ran.
    removed: Vec<ListenerId>,
}

/// A display output as seen by the capture code.
pub struct Output {
    id: OutputId,
    name: String,
    x: i32,
    y: i32,
    mode: OutputMode,
    transform: OutputTransform,
    scale: i32,
    planes_suspended: u32,
    repaint_scheduled: bool,
    whole_damage_pending: bool,
    frame_signal: FrameSignal,
}

impl Output {
    pub fn new(id: OutputId, name: impl Into<String>, x: i32, y: i32, mode: OutputMode) -> Self {
        Self {
            id,
            name: name.into(),
            x,
            y,
            mode,
            transform: OutputTransform::Normal,
            scale: 1,
            planes_suspended: 0,
            repaint_scheduled: false,
            whole_damage_pending: false,
            frame_signal: FrameSignal::default(),
        }
    }

    pub fn with_transform(mut self, transform: OutputTransform, scale: i32) -> Self {
        self.transform = transform;
        self.scale = scale.max(1);
        self
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Switch to a new video mode. The next frame repaints everything.
    pub fn set_mode(&mut self, mode: OutputMode) {
        if self.mode != mode {
            self.mode = mode;
            self.damage_whole();
        }
    }

    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Size in global (logical) coordinates, after undoing the transform
    /// and scale applied to the mode.
    pub fn logical_size(&self) -> (i32, i32) {
        let width = i32::try_from(self.mode.width).unwrap_or(i32::MAX);
        let height = i32::try_from(self.mode.height).unwrap_or(i32::MAX);
        let (width, height) = if self.transform.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        };
        (width / self.scale, height / self.scale)
    }

    /// The area this output covers in global coordinates.
    pub fn region(&self) -> Rect {
        let (width, height) = self.logical_size();
        Rect::new(
            self.x,
            self.y,
            self.x.saturating_add(width),
            self.y.saturating_add(height),
        )
    }

    /// Map global-coordinate damage into device coordinates of this
    /// output's mode.
    pub fn device_damage(&self, damage: &Region) -> Region {
        let (width, height) = self.logical_size();
        let local = damage
            .intersect_rect(&self.region())
            .translate(-self.x, -self.y);
        let transformed = local.transformed(width, height, self.transform, self.scale);
        Region::from_rects(
            transformed
                .rects()
                .iter()
                .filter_map(|rect| rect.clamp_to(self.mode.width, self.mode.height)),
        )
    }

    pub fn planes_suspended(&self) -> bool {
        self.planes_suspended > 0
    }

    pub fn plane_suspend_count(&self) -> u32 {
        self.planes_suspended
    }

    /// Disable the plane fast path until the matching
    /// [`resume_planes`](Self::resume_planes).
    pub fn suspend_planes(&mut self) {
        self.planes_suspended = self.planes_suspended.saturating_add(1);
    }

    pub fn resume_planes(&mut self) {
        self.planes_suspended = self.planes_suspended.saturating_sub(1);
    }

    pub fn schedule_repaint(&mut self) {
        self.repaint_scheduled = true;
    }

    pub fn repaint_scheduled(&self) -> bool {
        self.repaint_scheduled
    }

    /// Damage the whole output so the next frame repaints and reports it.
    pub fn damage_whole(&mut self) {
        self.whole_damage_pending = true;
        self.schedule_repaint();
    }

    pub(crate) fn take_pending_whole_damage(&mut self) -> bool {
        std::mem::take(&mut self.whole_damage_pending)
    }

    pub fn add_frame_listener(&mut self, listener: Box<dyn FrameListener>) -> ListenerId {
        let id = ListenerId(self.frame_signal.next_id);
        self.frame_signal.next_id += 1;
        self.frame_signal.listeners.push((id, listener));
        id
    }

    /// Unsubscribe a listener. Safe to call from inside a frame handler,
    /// including for the listener that is currently running.
    pub fn remove_frame_listener(&mut self, id: ListenerId) -> bool {
        if let Some(idx) = self.frame_signal.listeners.iter().position(|(lid, _)| *lid == id) {
            let (_, mut listener) = self.frame_signal.listeners.remove(idx);
            listener.detached(self);
            return true;
        }
        let signal = &mut self.frame_signal;
        if signal.in_flight.contains(&id) && !signal.removed.contains(&id) {
            signal.removed.push(id);
            return true;
        }
        false
    }

    pub fn has_frame_listener(&self, id: ListenerId) -> bool {
        let signal = &self.frame_signal;
        signal.listeners.iter().any(|(lid, _)| *lid == id)
            || (signal.in_flight.contains(&id) && !signal.removed.contains(&id))
    }

    pub fn frame_listener_count(&self) -> usize {
        let signal = &self.frame_signal;
        signal.listeners.len() + signal.in_flight.len() - signal.removed.len()
    }

    /// Whether a frame-completion event is being dispatched right now.
    pub fn is_emitting_frame(&self) -> bool {
        self.frame_signal.emitting
    }

    /// Dispatch a frame-completion event to a snapshot of the current
    /// listeners. Listeners added during dispatch first run on the next
    /// frame.
    pub(crate) fn emit_frame(&mut self, frame: &FrameContext<'_>) {
        self.repaint_scheduled = false;

        let snapshot = std::mem::take(&mut self.frame_signal.listeners);
        self.frame_signal.in_flight = snapshot.iter().map(|(id, _)| *id).collect();
        self.frame_signal.emitting = true;

        let mut kept = Vec::with_capacity(snapshot.len());
        let mut detached = Vec::new();
        for (id, mut listener) in snapshot {
            if self.frame_signal.removed.contains(&id) {
                detached.push(listener);
                continue;
            }
            if listener.frame_complete(self, frame) == ListenerAction::Keep {
                kept.push((id, listener));
            }
        }

        let signal = &mut self.frame_signal;
        // Removal also applies to listeners that already ran this frame.
        let (gone, mut kept): (Vec<_>, Vec<_>) = kept
            .into_iter()
            .partition(|(id, _)| signal.removed.contains(id));
        detached.extend(gone.into_iter().map(|(_, listener)| listener));

        signal.emitting = false;
        signal.in_flight.clear();
        signal.removed.clear();
        kept.append(&mut signal.listeners);
        signal.listeners = kept;

        for mut listener in detached {
            listener.detached(self);
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("position", &(self.x, self.y))
            .field("mode", &self.mode)
            .field("transform", &self.transform)
            .field("scale", &self.scale)
            .field("planes_suspended", &self.planes_suspended)
            .field("frame_listeners", &self.frame_listener_count())
            .finish()
    }
}

//! Minimal host model: the set of outputs, keyboard focus, and the frame
//! completion path that drives capture listeners.

use std::rc::Rc;

use tracing::debug;

use crate::backend::{Capabilities, HeadlessRenderer, ReadFormat, ReadbackInfo, Renderer};
use crate::error::{CaptureError, CaptureResult};
use crate::output::{FrameContext, Output, OutputId, OutputMode};
use crate::region::{OutputTransform, Region};

pub struct Compositor {
    renderer: Rc<dyn Renderer>,
    readback: ReadbackInfo,
    outputs: Vec<Output>,
    keyboard_focus: Option<OutputId>,
    next_output_id: u32,
}

impl Compositor {
    pub fn new(renderer: Rc<dyn Renderer>, readback: ReadbackInfo) -> Self {
        Self {
            renderer,
            readback,
            outputs: Vec::new(),
            keyboard_focus: None,
            next_output_id: 1,
        }
    }

    /// A compositor backed by a [`HeadlessRenderer`] whose readbacks use
    /// `format`. The renderer is returned as well so callers can paint it.
    pub fn headless(format: ReadFormat, bottom_up: bool) -> (Self, Rc<HeadlessRenderer>) {
        let renderer = Rc::new(HeadlessRenderer::new(bottom_up));
        let readback = ReadbackInfo::new(
            format,
            Capabilities {
                capture_yflip: bottom_up,
            },
        );
        let dyn_renderer: Rc<dyn Renderer> = renderer.clone();
        (Self::new(dyn_renderer, readback), renderer)
    }

    pub fn readback(&self) -> ReadbackInfo {
        self.readback
    }

    pub fn renderer(&self) -> &Rc<dyn Renderer> {
        &self.renderer
    }

    pub fn add_output(
        &mut self,
        name: impl Into<String>,
        x: i32,
        y: i32,
        mode: OutputMode,
        transform: OutputTransform,
        scale: i32,
    ) -> OutputId {
        let id = OutputId::from_raw(self.next_output_id);
        self.next_output_id += 1;
        let output = Output::new(id, name, x, y, mode).with_transform(transform, scale);
        debug!(output = %id, name = output.name(), ?mode, ?transform, scale, "output added");
        self.outputs.push(output);
        id
    }

    /// Detach an output. Capture state bound to it must be released by the
    /// caller; see `Screenshooter::output_removed`.
    pub fn remove_output(&mut self, id: OutputId) -> Option<Output> {
        let idx = self.outputs.iter().position(|o| o.id() == id)?;
        if self.keyboard_focus == Some(id) {
            self.keyboard_focus = None;
        }
        debug!(output = %id, "output removed");
        Some(self.outputs.remove(idx))
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id() == id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.id() == id)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn set_keyboard_focus(&mut self, id: Option<OutputId>) {
        self.keyboard_focus = id.filter(|id| self.output(*id).is_some());
    }

    pub fn keyboard_focus(&self) -> Option<OutputId> {
        self.keyboard_focus
    }

    /// Complete a repaint of `id` covering `damage` (global coordinates)
    /// and notify its frame listeners. Whole-output damage requested since
    /// the previous frame is folded in.
    pub fn finish_frame(
        &mut self,
        id: OutputId,
        frame_time_ms: u32,
        damage: &Region,
    ) -> CaptureResult<()> {
        let output = self
            .outputs
            .iter_mut()
            .find(|o| o.id() == id)
            .ok_or(CaptureError::OutputLost)?;

        let mut damage = damage.clone();
        if output.take_pending_whole_damage() {
            damage.union_rect(output.region());
        }

        let frame = FrameContext {
            renderer: self.renderer.as_ref(),
            readback: self.readback,
            frame_time_ms,
            damage: &damage,
        };
        output.emit_frame(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{FrameListener, ListenerAction};
    use crate::region::Rect;
    use std::cell::RefCell;

    struct DamageSpy(Rc<RefCell<Vec<Region>>>);

    impl FrameListener for DamageSpy {
        fn frame_complete(&mut self, _output: &mut Output, frame: &FrameContext<'_>) -> ListenerAction {
            self.0.borrow_mut().push(frame.damage.clone());
            ListenerAction::Keep
        }
    }

    #[test]
    fn pending_whole_damage_is_reported_once() {
        let (mut compositor, _renderer) = Compositor::headless(ReadFormat::X8R8G8B8, false);
        let id = compositor.add_output(
            "HEADLESS-1",
            100,
            0,
            OutputMode::new(40, 30),
            OutputTransform::Normal,
            1,
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let output = compositor.output_mut(id).unwrap();
        output.add_frame_listener(Box::new(DamageSpy(Rc::clone(&seen))));
        output.damage_whole();

        compositor.finish_frame(id, 16, &Region::new()).unwrap();
        compositor
            .finish_frame(id, 32, &Region::from_rect(Rect::new(100, 0, 110, 10)))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen[0].rects(), &[Rect::new(100, 0, 140, 30)]);
        assert_eq!(seen[1].rects(), &[Rect::new(100, 0, 110, 10)]);
        assert!(!compositor.output(id).unwrap().repaint_scheduled());
    }

    #[test]
    fn finishing_a_frame_on_a_missing_output_fails() {
        let (mut compositor, _renderer) = Compositor::headless(ReadFormat::X8R8G8B8, false);
        let err = compositor
            .finish_frame(OutputId::from_raw(42), 0, &Region::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::OutputLost));
    }

    #[test]
    fn removing_the_focused_output_clears_focus() {
        let (mut compositor, _renderer) = Compositor::headless(ReadFormat::X8R8G8B8, true);
        assert!(compositor.readback().yflip());
        let a = compositor.add_output("A", 0, 0, OutputMode::new(8, 8), OutputTransform::Normal, 1);
        let b = compositor.add_output("B", 8, 0, OutputMode::new(8, 8), OutputTransform::Normal, 1);
        compositor.set_keyboard_focus(Some(b));
        assert_eq!(compositor.keyboard_focus(), Some(b));
        assert!(compositor.remove_output(b).is_some());
        assert_eq!(compositor.keyboard_focus(), None);
        assert_eq!(compositor.outputs().len(), 1);
        assert_eq!(compositor.outputs()[0].id(), a);
        compositor.set_keyboard_focus(Some(b));
        assert_eq!(compositor.keyboard_focus(), None);
    }
}

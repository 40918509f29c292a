// Render surface seam for the effect scheduler.
//
// Populations describe each frame as a list of primitive shapes with a
// paint; the surface decides how to draw them. `RecordingSurface` keeps the
// shapes in memory for tests and tooling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::category::EffectCategory;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// How a shape is filled or stroked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Paint {
    pub color: Rgb,
    pub alpha: f32,
    /// Blur radius of a same-colored halo; 0 for none.
    pub glow: f32,
}

impl Paint {
    pub fn new(color: Rgb, alpha: f32) -> Self {
        Self {
            color,
            alpha: alpha.clamp(0.0, 1.0),
            glow: 0.0,
        }
    }

    pub fn glowing(mut self, glow: f32) -> Self {
        self.glow = glow;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Filled circle.
    Disc { x: f32, y: f32, radius: f32 },
    /// Stroked circle.
    Ring {
        x: f32,
        y: f32,
        radius: f32,
        width: f32,
    },
    /// Filled ellipse, rotated by `rotation` radians.
    Ellipse {
        x: f32,
        y: f32,
        rx: f32,
        ry: f32,
        rotation: f32,
    },
    /// Filled square centred on (x, y), rotated by `rotation` radians.
    Square {
        x: f32,
        y: f32,
        size: f32,
        rotation: f32,
    },
    /// Stroked open path.
    Path { points: Vec<(f32, f32)>, width: f32 },
    /// Fill the whole viewport.
    Wash,
}

pub trait RenderSurface {
    fn clear(&mut self, viewport: Viewport);

    /// Marks the start of one category's shapes within the frame.
    fn begin_layer(&mut self, _category: EffectCategory) {}

    fn draw(&mut self, shape: Shape, paint: Paint);

    /// The frame is complete.
    fn present(&mut self) {}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedFrame {
    /// Layers in the order they were painted.
    pub layers: Vec<EffectCategory>,
    pub draws: Vec<(EffectCategory, Shape, Paint)>,
}

impl RecordedFrame {
    pub fn shapes_in(&self, category: EffectCategory) -> usize {
        self.draws.iter().filter(|(c, _, _)| *c == category).count()
    }
}

/// Shared view of what a `RecordingSurface` has drawn. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct FrameLog {
    frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl FrameLog {
    fn frames(&self) -> MutexGuard<'_, Vec<RecordedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<RecordedFrame> {
        self.frames().last().cloned()
    }

    pub fn all(&self) -> Vec<RecordedFrame> {
        self.frames().clone()
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    log: FrameLog,
    current: Option<RecordedFrame>,
    layer: Option<EffectCategory>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> FrameLog {
        self.log.clone()
    }
}

impl RenderSurface for RecordingSurface {
    fn clear(&mut self, _viewport: Viewport) {
        self.current = Some(RecordedFrame::default());
        self.layer = None;
    }

    fn begin_layer(&mut self, category: EffectCategory) {
        self.layer = Some(category);
        if let Some(frame) = self.current.as_mut() {
            frame.layers.push(category);
        }
    }

    fn draw(&mut self, shape: Shape, paint: Paint) {
        if let (Some(frame), Some(layer)) = (self.current.as_mut(), self.layer) {
            frame.draws.push((layer, shape, paint));
        }
    }

    fn present(&mut self) {
        if let Some(frame) = self.current.take() {
            self.log.frames().push(frame);
        }
    }
}

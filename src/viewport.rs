//! Per-view navigation state: slice index, zoom, pan and the orthographic
//! camera bounds derived from them.
//!
//! A plane is laid out in world units as `data_aspect` wide and 1.0 tall,
//! centred on the origin. Camera bounds always have the container's aspect
//! ratio so the plane is never distorted.

use std::time::Duration;

use glam::Vec2;
use log::{debug, warn};
use thiserror::Error;

use crate::config::{RetryPolicy, ViewerConfig};
use crate::enums::{Orientation, ScrollDirection};
use crate::volume::{Dimensions, Spacing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewportError {
    #[error("{0:?} view container has no layout size yet")]
    ContainerNotReady(Orientation),

    #[error("{orientation:?} view container still had no size after {attempts} attempts")]
    ContainerNeverReady {
        orientation: Orientation,
        attempts: u32,
    },

    #[error("{0:?} view is not initialized")]
    NotInitialized(Orientation),
}

/// Container size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

/// Orthographic extents in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBounds {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl CameraBounds {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.left + self.right) * 0.5,
            (self.top + self.bottom) * 0.5,
        )
    }

    /// Fit a `data_aspect` x 1 plane into the container without distortion.
    pub fn fit(data_aspect: f32, container: ContainerSize) -> Self {
        let container_aspect = container.aspect();
        let (half_width, half_height) = if data_aspect > container_aspect {
            let half_width = data_aspect * 0.5;
            (half_width, half_width / container_aspect)
        } else {
            let half_height = 0.5;
            (half_height * container_aspect, half_height)
        };
        Self {
            left: -half_width,
            right: half_width,
            top: half_height,
            bottom: -half_height,
        }
    }

    fn zoomed(&self, zoom: f32, pan: Vec2) -> Self {
        Self {
            left: self.left / zoom + pan.x,
            right: self.right / zoom + pan.x,
            top: self.top / zoom + pan.y,
            bottom: self.bottom / zoom + pan.y,
        }
    }
}

/// Physical width over height of an orientation's plane.
pub fn data_aspect(orientation: Orientation, dims: Dimensions, spacing: Spacing) -> f32 {
    let (w_axis, h_axis) = orientation.plane_axes();
    let width = dims.axis(w_axis) as f32 * spacing.axis(w_axis);
    let height = dims.axis(h_axis) as f32 * spacing.axis(h_axis);
    if width > 0.0 && height > 0.0 {
        width / height
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub slice_index: usize,
    pub zoom_level: f32,
    pub pan_offset: Vec2,
    pub base_camera_bounds: CameraBounds,
}

/// What a navigation event requires the host to redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redraw {
    Nothing,
    /// Only this view's projection changed.
    Projection(Orientation),
    /// `slice` shows a new plane; `crosshairs` must be recomputed.
    Navigate {
        slice: Orientation,
        crosshairs: [Orientation; 2],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Interaction {
    #[default]
    Idle,
    Dragging,
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    orientation: Orientation,
    depth: usize,
    data_aspect: f32,
    zoom_min: f32,
    zoom_max: f32,
    fast_step: usize,
    container: ContainerSize,
    state: Option<ViewState>,
    interaction: Interaction,
}

impl ViewportController {
    pub fn new(orientation: Orientation, depth: usize, data_aspect: f32, config: &ViewerConfig) -> Self {
        Self {
            orientation,
            depth,
            data_aspect: if data_aspect.is_finite() && data_aspect > 0.0 {
                data_aspect
            } else {
                1.0
            },
            zoom_min: config.zoom_min,
            zoom_max: config.zoom_max,
            fast_step: config.fast_scroll_step,
            container: ContainerSize::default(),
            state: None,
            interaction: Interaction::Idle,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&ViewState> {
        self.state.as_ref()
    }

    pub fn container(&self) -> ContainerSize {
        self.container
    }

    pub fn is_dragging(&self) -> bool {
        self.interaction == Interaction::Dragging
    }

    pub fn slice_index(&self) -> Option<usize> {
        self.state.map(|s| s.slice_index)
    }

    /// Fit the plane to `container` and start at the middle slice.
    pub fn initialize(&mut self, container: ContainerSize) -> Result<(), ViewportError> {
        if container.is_empty() {
            return Err(ViewportError::ContainerNotReady(self.orientation));
        }
        self.container = container;
        self.state = Some(ViewState {
            slice_index: self.depth / 2,
            zoom_level: 1.0,
            pan_offset: Vec2::ZERO,
            base_camera_bounds: CameraBounds::fit(self.data_aspect, container),
        });
        self.interaction = Interaction::Idle;
        debug!(
            "{:?} view initialized at {}x{}",
            self.orientation, container.width, container.height
        );
        Ok(())
    }

    fn state_mut(&mut self) -> Result<&mut ViewState, ViewportError> {
        let orientation = self.orientation;
        self.state
            .as_mut()
            .ok_or(ViewportError::NotInitialized(orientation))
    }

    /// Current camera bounds: base extents divided by zoom, offset by pan.
    pub fn camera_bounds(&self) -> Option<CameraBounds> {
        self.state
            .map(|s| s.base_camera_bounds.zoomed(s.zoom_level, s.pan_offset))
    }

    pub fn set_slice_index(&mut self, index: usize) -> Result<Redraw, ViewportError> {
        let max_index = self.depth.saturating_sub(1);
        let orientation = self.orientation;
        let state = self.state_mut()?;
        let index = index.min(max_index);
        if index == state.slice_index {
            return Ok(Redraw::Nothing);
        }
        state.slice_index = index;
        Ok(Redraw::Navigate {
            slice: orientation,
            crosshairs: orientation.others(),
        })
    }

    pub fn scroll(&mut self, direction: ScrollDirection, fast: bool) -> Result<Redraw, ViewportError> {
        let step = if fast { self.fast_step as i64 } else { 1 };
        let current = self
            .slice_index()
            .ok_or(ViewportError::NotInitialized(self.orientation))? as i64;
        let max_index = self.depth.saturating_sub(1) as i64;
        let next = (current + direction.sign() * step).clamp(0, max_index);
        self.set_slice_index(next as usize)
    }

    pub fn zoom(&mut self, delta: f32) -> Result<Redraw, ViewportError> {
        let (zoom_min, zoom_max) = (self.zoom_min, self.zoom_max);
        let orientation = self.orientation;
        let state = self.state_mut()?;
        let delta = if delta.is_finite() { delta } else { 0.0 };
        state.zoom_level = (state.zoom_level + delta).clamp(zoom_min, zoom_max);
        if state.zoom_level <= 1.0 {
            state.pan_offset = Vec2::ZERO;
        }
        Ok(Redraw::Projection(orientation))
    }

    pub fn begin_drag(&mut self) {
        if self.is_ready() {
            self.interaction = Interaction::Dragging;
        }
    }

    pub fn end_drag(&mut self) {
        self.interaction = Interaction::Idle;
    }

    /// Pan by a pointer delta in pixels. Ignored while not zoomed in.
    ///
    /// `pan_offset` moves the camera, not the content, so the x delta is
    /// subtracted and the y delta added to follow screen y pointing down.
    pub fn drag(&mut self, delta_x: f32, delta_y: f32) -> Result<Redraw, ViewportError> {
        let container = self.container;
        let orientation = self.orientation;
        let bounds = self
            .camera_bounds()
            .ok_or(ViewportError::NotInitialized(orientation))?;
        let state = self.state_mut()?;
        if state.zoom_level <= 1.0 {
            return Ok(Redraw::Nothing);
        }
        let world_per_pixel = Vec2::new(
            bounds.width() / container.width,
            bounds.height() / container.height,
        );
        state.pan_offset.x -= delta_x * world_per_pixel.x;
        state.pan_offset.y += delta_y * world_per_pixel.y;
        Ok(Redraw::Projection(orientation))
    }

    /// Refit to a new container size, keeping zoom and pan.
    pub fn resize(&mut self, container: ContainerSize) -> Result<Redraw, ViewportError> {
        if container.is_empty() {
            return Err(ViewportError::ContainerNotReady(self.orientation));
        }
        let data_aspect = self.data_aspect;
        let orientation = self.orientation;
        let state = self.state_mut()?;
        state.base_camera_bounds = CameraBounds::fit(data_aspect, container);
        self.container = container;
        Ok(Redraw::Projection(orientation))
    }
}

/// Outcome of one deferred initialization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitProgress {
    Ready,
    RetryAfter(Duration),
}

/// Retries [`ViewportController::initialize`] until the container has a size,
/// giving up after the policy's attempt cap.
#[derive(Debug, Clone)]
pub struct DeferredInit {
    policy: RetryPolicy,
    attempts: u32,
}

impl DeferredInit {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn attempt(
        &mut self,
        controller: &mut ViewportController,
        container: ContainerSize,
    ) -> Result<InitProgress, ViewportError> {
        self.attempts += 1;
        match controller.initialize(container) {
            Ok(()) => Ok(InitProgress::Ready),
            Err(ViewportError::ContainerNotReady(orientation)) => {
                if self.attempts >= self.policy.max_attempts {
                    warn!(
                        "{orientation:?} view container never got a size after {} attempts",
                        self.attempts
                    );
                    Err(ViewportError::ContainerNeverReady {
                        orientation,
                        attempts: self.attempts,
                    })
                } else {
                    Ok(InitProgress::RetryAfter(self.policy.interval))
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Measure the container size until initialization succeeds or the cap is hit.
pub async fn initialize_when_ready(
    controller: &mut ViewportController,
    policy: RetryPolicy,
    mut measure: impl FnMut() -> ContainerSize,
) -> Result<(), ViewportError> {
    let mut deferred = DeferredInit::new(policy);
    loop {
        match deferred.attempt(controller, measure())? {
            InitProgress::Ready => return Ok(()),
            InitProgress::RetryAfter(interval) => tokio::time::sleep(interval).await,
        }
    }
}

//! One loaded volume shown in three linked views plus the 3D atlas.
//!
//! The session is either not initialized (no volume) or ready. Decoding
//! failures always drop back to not initialized so no half-built volume is
//! ever displayed.

use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;
use web_time::Instant;

use crate::atlas::{AtlasError, AtlasKey, VolumeAtlas, fit_downsample};
use crate::config::{Downsample, ViewerConfig};
use crate::crosshair::{Crosshair, crosshair_for};
use crate::debounce::Debouncer;
use crate::enums::{Orientation, ScrollDirection};
use crate::raymarch::{Aabb, volume_box};
use crate::slice::Slice;
use crate::source::FetchOutcome;
use crate::viewport::{ContainerSize, Redraw, ViewportController, ViewportError, initialize_when_ready};
use crate::volume::{Histogram, Volume};
use crate::volume_loader::{DecodedVolume, DimensionWarning, LoadStatus, VolumeLoader, VolumeLoaderError};
use crate::window::{WindowController, WindowParams, WindowState};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] VolumeLoaderError),

    #[error(transparent)]
    Viewport(#[from] ViewportError),

    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error("no volume is loaded")]
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    /// Upstream is still working; the previous state is kept.
    Pending(String),
    /// Upstream gave up; the session is not initialized.
    Unavailable(String),
}

/// Something the host must act on after [`MprSession::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    View(Redraw),
    /// Every slice and the atlas need rebuilding.
    WindowChanged,
}

pub struct MprSession {
    config: ViewerConfig,
    volume: Option<Arc<Volume>>,
    warnings: Vec<DimensionWarning>,
    window: WindowController,
    /// Indexed by [`Orientation::index`].
    views: Option<[ViewportController; 3]>,
    atlas: Option<(AtlasKey, Arc<VolumeAtlas>)>,
    pending_window: Debouncer<WindowState>,
    pending_resize: [Debouncer<ContainerSize>; 3],
}

impl MprSession {
    pub fn new(config: ViewerConfig) -> Self {
        let pending_window = Debouncer::new(config.window_debounce);
        let pending_resize = std::array::from_fn(|_| Debouncer::new(config.resize_debounce));
        Self {
            config,
            volume: None,
            warnings: Vec::new(),
            window: WindowController::new(Histogram::default(), WindowState::default()),
            views: None,
            atlas: None,
            pending_window,
            pending_resize,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.volume.is_some()
    }

    pub fn volume(&self) -> Option<&Arc<Volume>> {
        self.volume.as_ref()
    }

    pub fn warnings(&self) -> &[DimensionWarning] {
        &self.warnings
    }

    pub fn window(&self) -> &WindowController {
        &self.window
    }

    /// Feed an upstream fetch outcome through the decoder.
    ///
    /// # Errors
    ///
    /// Any decode failure is returned after the session has been reset.
    pub async fn apply_load(&mut self, outcome: FetchOutcome) -> Result<SessionStatus, SessionError> {
        match VolumeLoader::load(outcome).await {
            Ok(LoadStatus::Ready(decoded)) => {
                self.install(decoded);
                Ok(SessionStatus::Ready)
            }
            Ok(LoadStatus::Pending(message)) => {
                info!("volume still processing: {message}");
                Ok(SessionStatus::Pending(message))
            }
            Ok(LoadStatus::Unavailable(message)) => {
                warn!("volume unavailable: {message}");
                self.reset();
                Ok(SessionStatus::Unavailable(message))
            }
            Err(e) => {
                error!("failed to decode volume ({}): {e}", e.code());
                self.reset();
                Err(e.into())
            }
        }
    }

    /// Show an already decoded volume.
    pub fn install(&mut self, decoded: DecodedVolume) {
        let volume = decoded.volume;
        let dims = volume.dimensions();
        info!(
            "volume ready: {}x{}x{} {} voxels, range [{}, {}]",
            dims.x,
            dims.y,
            dims.z,
            decoded.datatype,
            volume.histogram().min,
            volume.histogram().max
        );
        self.window.set_histogram(volume.histogram());
        self.warnings = decoded.warnings;
        self.atlas = None;
        self.volume = Some(volume);
        self.attach_views();
    }

    fn reset(&mut self) {
        self.volume = None;
        self.warnings.clear();
        self.views = None;
        self.atlas = None;
        self.pending_window.cancel();
        for pending in &mut self.pending_resize {
            pending.cancel();
        }
    }

    /// Fresh, uninitialized controllers for the loaded volume.
    pub fn attach_views(&mut self) {
        let Some(volume) = self.volume.as_ref() else {
            return;
        };
        let config = &self.config;
        self.views = Some(Orientation::ALL.map(|orientation| {
            ViewportController::new(
                orientation,
                volume.depth_of(orientation),
                volume.plane_aspect(orientation),
                config,
            )
        }));
    }

    /// Drop the view controllers but keep the volume and atlas cached.
    pub fn detach_views(&mut self) {
        debug!("views detached, volume kept");
        self.views = None;
        for pending in &mut self.pending_resize {
            pending.cancel();
        }
    }

    pub fn view(&self, orientation: Orientation) -> Option<&ViewportController> {
        self.views.as_ref().map(|views| &views[orientation.index()])
    }

    fn view_mut(&mut self, orientation: Orientation) -> Result<&mut ViewportController, SessionError> {
        self.views
            .as_mut()
            .map(|views| &mut views[orientation.index()])
            .ok_or(SessionError::NotInitialized)
    }

    pub fn initialize_view(
        &mut self,
        orientation: Orientation,
        container: ContainerSize,
    ) -> Result<(), SessionError> {
        self.view_mut(orientation)?.initialize(container)?;
        Ok(())
    }

    /// Initialize every view, waiting for each container to get a layout size.
    pub async fn initialize_views(
        &mut self,
        mut measure: impl FnMut(Orientation) -> ContainerSize,
    ) -> Result<(), SessionError> {
        let policy = self.config.container_retry;
        for orientation in Orientation::ALL {
            let view = self.view_mut(orientation)?;
            initialize_when_ready(view, policy, || measure(orientation)).await?;
        }
        Ok(())
    }

    pub fn scroll(
        &mut self,
        orientation: Orientation,
        direction: ScrollDirection,
        fast: bool,
    ) -> Result<Redraw, SessionError> {
        Ok(self.view_mut(orientation)?.scroll(direction, fast)?)
    }

    pub fn set_slice_index(&mut self, orientation: Orientation, index: usize) -> Result<Redraw, SessionError> {
        Ok(self.view_mut(orientation)?.set_slice_index(index)?)
    }

    pub fn zoom(&mut self, orientation: Orientation, delta: f32) -> Result<Redraw, SessionError> {
        Ok(self.view_mut(orientation)?.zoom(delta)?)
    }

    pub fn begin_drag(&mut self, orientation: Orientation) -> Result<(), SessionError> {
        self.view_mut(orientation)?.begin_drag();
        Ok(())
    }

    pub fn end_drag(&mut self, orientation: Orientation) -> Result<(), SessionError> {
        self.view_mut(orientation)?.end_drag();
        Ok(())
    }

    pub fn drag(&mut self, orientation: Orientation, delta_x: f32, delta_y: f32) -> Result<Redraw, SessionError> {
        Ok(self.view_mut(orientation)?.drag(delta_x, delta_y)?)
    }

    /// Apply a container size change right away.
    pub fn resize(&mut self, orientation: Orientation, container: ContainerSize) -> Result<Redraw, SessionError> {
        self.pending_resize[orientation.index()].cancel();
        Ok(self.view_mut(orientation)?.resize(container)?)
    }

    /// Queue a container size change; applied by [`MprSession::poll`].
    pub fn request_resize(&mut self, orientation: Orientation, container: ContainerSize, now: Instant) {
        self.pending_resize[orientation.index()].push(container, now);
    }

    /// Apply window sliders right away, as on pointer release.
    pub fn set_window(&mut self, state: WindowState) -> SessionUpdate {
        self.pending_window.cancel();
        let before = self.window.generation();
        self.window.set_state(state);
        if self.window.generation() == before {
            SessionUpdate::View(Redraw::Nothing)
        } else {
            SessionUpdate::WindowChanged
        }
    }

    /// Queue window slider movement; applied by [`MprSession::poll`].
    pub fn request_window(&mut self, state: WindowState, now: Instant) {
        self.pending_window.push(state, now);
    }

    /// Apply every queued change whose quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        if let Some(state) = self.pending_window.poll(now) {
            if let SessionUpdate::WindowChanged = self.set_window(state) {
                updates.push(SessionUpdate::WindowChanged);
            }
        }
        for orientation in Orientation::ALL {
            let Some(container) = self.pending_resize[orientation.index()].poll(now) else {
                continue;
            };
            match self.resize(orientation, container) {
                Ok(redraw) => updates.push(SessionUpdate::View(redraw)),
                Err(e) => debug!("queued resize dropped: {e}"),
            }
        }
        updates
    }

    pub fn window_params(&mut self) -> WindowParams {
        self.window.params()
    }

    /// The current plane of `orientation`, windowed.
    pub fn slice_image(&mut self, orientation: Orientation) -> Result<Slice, SessionError> {
        let index = self
            .view(orientation)
            .ok_or(SessionError::NotInitialized)?
            .slice_index()
            .ok_or(ViewportError::NotInitialized(orientation))?;
        let volume = Arc::clone(self.volume.as_ref().ok_or(SessionError::NotInitialized)?);
        let params = self.window.params();
        Ok(volume.slice(orientation, index, &params))
    }

    /// Where the other two views are slicing, drawn on `orientation`.
    pub fn crosshair(&self, orientation: Orientation) -> Result<Crosshair, SessionError> {
        let volume = self.volume.as_ref().ok_or(SessionError::NotInitialized)?;
        let views = self.views.as_ref().ok_or(SessionError::NotInitialized)?;
        let mut indices = [0usize; 3];
        for (slot, view) in indices.iter_mut().zip(views) {
            *slot = view
                .slice_index()
                .ok_or(ViewportError::NotInitialized(view.orientation()))?;
        }
        Ok(crosshair_for(orientation, indices, volume.dimensions()))
    }

    pub fn downsample_factor(&self) -> Result<usize, SessionError> {
        let volume = self.volume.as_ref().ok_or(SessionError::NotInitialized)?;
        Ok(match self.config.downsample {
            Downsample::Fixed(factor) => factor,
            Downsample::FitTexture(limit) => fit_downsample(volume.dimensions(), limit),
        })
    }

    /// The packed atlas, rebuilt only when the factor or window changed.
    pub fn atlas(&mut self) -> Result<Arc<VolumeAtlas>, SessionError> {
        let factor = self.downsample_factor()?;
        let key = AtlasKey {
            factor,
            window_generation: self.window.generation(),
        };
        if let Some((cached_key, atlas)) = &self.atlas {
            if *cached_key == key {
                return Ok(Arc::clone(atlas));
            }
        }
        let volume = Arc::clone(self.volume.as_ref().ok_or(SessionError::NotInitialized)?);
        let params = self.window.params();
        let atlas = Arc::new(VolumeAtlas::pack(&volume, factor, &params)?);
        self.atlas = Some((key, Arc::clone(&atlas)));
        Ok(atlas)
    }

    /// World-space box the renderer marches through.
    pub fn render_bounds(&self) -> Result<Aabb, SessionError> {
        let volume = self.volume.as_ref().ok_or(SessionError::NotInitialized)?;
        Ok(volume_box(volume.dimensions(), volume.spacing()))
    }
}

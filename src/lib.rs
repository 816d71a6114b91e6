//! # NIfTI-volume library
//!
//! This crate decodes NIfTI-1 and NIfTI-2 files (`.nii` or gzip-compressed
//! `.nii.gz`) into calibrated volumes, and provides everything needed to show
//! them as three linked slice views and a pseudo-3D rendering.
//!
//! Voxels are converted to `f32` with the header's slope and intercept in a
//! single parallel pass that also collects the intensity range, using rayon.
//! The volume can be sliced in the three different medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  Display intensities come from a percentile window over the volume's
//!  range. Each view keeps its own slice index, zoom and pan, and draws
//!  crosshairs where the other two views are slicing. For the 3D view the
//!  volume is downsampled and packed into one square texture atlas that a
//!  WGPU fragment shader ray marches in one of three modes:
//!   - Maximum intensity projection
//!   - Translucent front-to-back compositing
//!   - Attenuated (x-ray like) compositing
//!
//!  A CPU twin of the ray marcher is available where no adapter is.
//!
//! # Examples
//!
//! ## Reading a NIfTI file and saving a slice
//!
//! Decode a compressed file, window it to the 1st..99th percentile of its
//! range and save the center sagittal slice.
//!
//! ```no_run
//! # use nifti_volume::{VolumeLoader, Orientation, WindowState, compute_window};
//! let decoded = VolumeLoader::load_from_path("brain.nii.gz")
//!     .expect("should have decoded the file");
//! let volume = decoded.volume;
//! let window = compute_window(&volume.histogram(), &WindowState::new(1.0, 99.0));
//! let slice = volume.slice(
//!     Orientation::Sagittal,
//!     volume.depth_of(Orientation::Sagittal) / 2,
//!     &window,
//! );
//! slice.to_image().expect("slice matches its size").save("result.png");
//! ```
//!
//! ## Rendering the volume
//!
//! ```no_run
//! # use nifti_volume::{MprSession, ViewerConfig, FetchOutcome, RenderMode};
//! # use nifti_volume::raymarch::{OrbitCamera, render_cpu};
//! # async fn run(bytes: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = MprSession::new(ViewerConfig::default());
//! session.apply_load(FetchOutcome::Bytes(bytes)).await?;
//! let atlas = session.atlas()?;
//! let frame = OrbitCamera::default().frame(1.0);
//! let image = render_cpu(
//!     &atlas,
//!     &session.render_bounds()?,
//!     RenderMode::MaximumIntensity,
//!     &session.config().march,
//!     &frame,
//!     256,
//!     256,
//! );
//! image.save("mip.png")?;
//! # Ok(())
//! # }
//! ```

pub mod atlas;
pub mod config;
pub mod crosshair;
pub mod debounce;
pub mod enums;
pub mod gpu_renderer;
pub mod header;
mod interpolator;
pub mod raymarch;
pub mod session;
pub mod slice;
pub mod source;
pub mod viewport;
pub mod volume;
pub mod volume_loader;
pub mod window;

pub use config::ViewerConfig;
pub use enums::{Interpolation, Orientation, ScrollDirection};
pub use raymarch::RenderMode;
pub use session::{MprSession, SessionError, SessionStatus};
pub use source::FetchOutcome;
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
pub use window::{WindowState, compute_window};

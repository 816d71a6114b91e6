use std::path::PathBuf;

use image::RgbaImage;
use log::{error, info, warn};
use nifti_volume::{
    MprSession, Orientation, RenderMode, SessionStatus, ViewerConfig,
    atlas::VolumeAtlas,
    gpu_renderer::{RenderError, VolumeRenderer, WGPU},
    raymarch::{Aabb, CameraFrame, MarchSettings, OrbitCamera, render_cpu},
    source::{ByteSource, FileSource},
    viewport::ContainerSize,
};

const RENDER_SIZE: u32 = 512;
const USAGE: &str = "usage: nifti-volume <file.nii[.gz]> [mip|translucent|attenuated]";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().ok_or(USAGE)?);
    let mode = match args.next() {
        Some(name) => name.parse::<RenderMode>()?,
        None => RenderMode::default(),
    };

    let mut session = MprSession::new(ViewerConfig::default().with_render_mode(mode));
    let outcome = FileSource::new(path).fetch().await;
    match session.apply_load(outcome).await? {
        SessionStatus::Ready => {}
        SessionStatus::Pending(message) | SessionStatus::Unavailable(message) => {
            return Err(message.into());
        }
    }

    session
        .initialize_views(|_| ContainerSize::new(RENDER_SIZE as f32, RENDER_SIZE as f32))
        .await?;
    for orientation in Orientation::ALL {
        let name = format!("{orientation:?}.png").to_lowercase();
        session
            .slice_image(orientation)?
            .to_image()
            .ok_or("slice buffer does not match its size")?
            .save(&name)?;
        info!("saved {name}");
    }

    let atlas = session.atlas()?;
    let bounds = session.render_bounds()?;
    let settings = session.config().march;
    let frame = OrbitCamera::default().frame(1.0);
    let image = match render_gpu(&atlas, bounds, mode, settings, &frame).await {
        Ok(image) => image,
        Err(e) => {
            warn!("GPU rendering unavailable ({e}), falling back to CPU");
            render_cpu(&atlas, &bounds, mode, &settings, &frame, RENDER_SIZE, RENDER_SIZE)
        }
    };
    let name = format!("{}.png", mode.name());
    image.save(&name)?;
    info!("saved {name}");
    Ok(())
}

async fn render_gpu(
    atlas: &VolumeAtlas,
    bounds: Aabb,
    mode: RenderMode,
    settings: MarchSettings,
    frame: &CameraFrame,
) -> Result<RgbaImage, RenderError> {
    let mut renderer = VolumeRenderer::new(WGPU::request().await?, bounds, mode, settings);
    renderer.upload_atlas(atlas)?;
    renderer.render_frame(frame, RENDER_SIZE, RENDER_SIZE).await
}

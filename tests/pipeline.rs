mod common;

use byteorder::LittleEndian;
use common::{INT16, Nifti1, gzip};
use nifti_volume::atlas::AtlasError;
use nifti_volume::config::Downsample;
use nifti_volume::raymarch::{OrbitCamera, render_cpu};
use nifti_volume::viewport::{ContainerSize, Redraw};
use nifti_volume::{
    FetchOutcome, MprSession, Orientation, RenderMode, ScrollDirection, SessionError, SessionStatus,
    ViewerConfig, WindowState,
};

/// A bright 16³ cube centred in an otherwise dark 64³ volume.
fn phantom() -> Vec<u8> {
    let image = Nifti1::new([64, 64, 64], INT16, 16).calibrated(1.0, -1024.0);
    let inside = |c: usize| (24..40).contains(&c);
    gzip(&image.int16_file::<LittleEndian>(|x, y, z| {
        if inside(x) && inside(y) && inside(z) { 2024 } else { 0 }
    }))
}

async fn loaded(config: ViewerConfig) -> MprSession {
    let mut session = MprSession::new(config);
    let status = session.apply_load(FetchOutcome::Bytes(phantom())).await.unwrap();
    assert_eq!(status, SessionStatus::Ready);
    session
        .initialize_views(|_| ContainerSize::new(256.0, 256.0))
        .await
        .unwrap();
    session
}

#[tokio::test(flavor = "current_thread")]
async fn test_atlas_geometry_for_downsampled_cube() {
    let mut session = loaded(ViewerConfig::default().with_downsample(Downsample::Fixed(2))).await;
    let atlas = session.atlas().unwrap();
    assert_eq!(atlas.grid_size(), 6);
    assert_eq!(atlas.texture_size(), 192);
    assert_eq!(atlas.data().len(), 192 * 192);
}

#[tokio::test(flavor = "current_thread")]
async fn test_zero_downsample_factor_is_rejected() {
    let mut session = loaded(ViewerConfig::default().with_downsample(Downsample::Fixed(0))).await;
    assert!(matches!(
        session.atlas(),
        Err(SessionError::Atlas(AtlasError::ZeroFactor))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn test_centre_slices_show_the_cube() {
    let mut session = loaded(ViewerConfig::default()).await;
    for orientation in Orientation::ALL {
        let slice = session.slice_image(orientation).unwrap();
        assert_eq!((slice.width, slice.height), (64, 64));
        let centre = slice.pixels[32 * 64 + 32];
        let corner = slice.pixels[0];
        assert_eq!(centre, 255, "{orientation:?}");
        assert_eq!(corner, 0, "{orientation:?}");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_scrolling_out_of_the_cube_darkens_the_slice() {
    let mut session = loaded(ViewerConfig::default()).await;
    let redraw = session
        .scroll(Orientation::Axial, ScrollDirection::Forward, true)
        .unwrap();
    assert!(matches!(redraw, Redraw::Navigate { slice: Orientation::Axial, .. }));
    let slice = session.slice_image(Orientation::Axial).unwrap();
    assert!(slice.pixels.iter().all(|&b| b == 0));

    let crosshair = session.crosshair(Orientation::Sagittal).unwrap();
    let axial_line = crosshair
        .lines
        .iter()
        .find(|line| line.source == Orientation::Axial)
        .unwrap();
    // slice 42 of 64
    assert!((axial_line.start.y - (2.0 * 42.0 / 63.0 - 1.0)).abs() < 1e-6);
}

#[tokio::test(flavor = "current_thread")]
async fn test_narrow_window_saturates_cube() {
    let mut session = loaded(ViewerConfig::default()).await;
    session.set_window(WindowState::new(0.0, 10.0));
    let slice = session.slice_image(Orientation::Coronal).unwrap();
    // background -1024 sits at the window floor, the cube far above its ceiling
    assert_eq!(slice.pixels[0], 0);
    assert_eq!(slice.pixels[32 * 64 + 32], 255);
}

#[tokio::test(flavor = "current_thread")]
async fn test_cpu_render_sees_cube_in_every_mode() {
    let mut session = loaded(ViewerConfig::default().with_downsample(Downsample::Fixed(2))).await;
    let atlas = session.atlas().unwrap();
    let bounds = session.render_bounds().unwrap();
    let settings = session.config().march;
    let frame = OrbitCamera::default().frame(1.0);
    for mode in RenderMode::ALL {
        let image = render_cpu(&atlas, &bounds, mode, &settings, &frame, 32, 32);
        assert!(image.get_pixel(16, 16).0[3] > 0, "{mode:?}");
        assert_eq!(image.get_pixel(0, 0).0[3], 0, "{mode:?}");
    }
}

//! Multi-planar slice reconstruction.

use image::GrayImage;
use rayon::prelude::*;

use crate::enums::Orientation;
use crate::volume::Volume;
use crate::window::{WindowParams, map_intensity};

/// A windowed 2D plane ready for texture upload, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Slice {
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn to_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// Extract one plane and window it.
///
/// | orientation | width | height | fixed |
/// |-------------|-------|--------|-------|
/// | axial       | x     | y      | z     |
/// | sagittal    | y     | z      | x     |
/// | coronal     | x     | z      | y     |
///
/// Voxels whose flat index falls outside the data are left at zero.
pub fn reconstruct_slice(
    orientation: Orientation,
    index: usize,
    volume: &Volume,
    window: &WindowParams,
) -> Slice {
    let dims = volume.dimensions();
    let data = volume.as_slice();
    let (w_axis, h_axis) = orientation.plane_axes();
    let width = dims.axis(w_axis);
    let height = dims.axis(h_axis);

    let mut pixels = vec![0u8; width * height];
    if width == 0 || index >= dims.axis(orientation.depth_axis()) {
        return Slice {
            width: width as u32,
            height: height as u32,
            pixels,
        };
    }

    pixels
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, pixel) in out_row.iter_mut().enumerate() {
                let flat = match orientation {
                    Orientation::Axial => dims.flat_index(col, row, index),
                    Orientation::Sagittal => dims.flat_index(index, col, row),
                    Orientation::Coronal => dims.flat_index(col, index, row),
                };
                if let Some(&value) = data.get(flat) {
                    *pixel = map_intensity(value, window);
                }
            }
        });

    Slice {
        width: width as u32,
        height: height as u32,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{WindowState, compute_window};
    use ndarray::Array3;

    /// Value encodes its own coordinates so every plane can be checked.
    fn coded_volume() -> Volume {
        let data = Array3::from_shape_fn((4, 3, 2), |(z, y, x)| (x + 10 * y + 100 * z) as f32);
        Volume::new(data, (1.0, 1.0, 1.0))
    }

    fn identity_window() -> WindowParams {
        WindowParams::from_bounds(0.0, 255.0)
    }

    #[test]
    fn test_axial_plane_layout() {
        let volume = coded_volume();
        let slice = reconstruct_slice(Orientation::Axial, 1, &volume, &identity_window());
        assert_eq!((slice.width, slice.height), (2, 3));
        assert_eq!(slice.pixels, vec![100, 101, 110, 111, 120, 121]);
    }

    #[test]
    fn test_sagittal_plane_layout() {
        let volume = coded_volume();
        let slice = reconstruct_slice(Orientation::Sagittal, 1, &volume, &identity_window());
        assert_eq!((slice.width, slice.height), (3, 4));
        // row z=2, column y=1 at fixed x=1
        assert_eq!(slice.pixels[2 * 3 + 1], 211);
    }

    #[test]
    fn test_coronal_plane_layout() {
        let volume = coded_volume();
        let slice = reconstruct_slice(Orientation::Coronal, 2, &volume, &identity_window());
        assert_eq!((slice.width, slice.height), (2, 4));
        // row z=1, column x=1 at fixed y=2
        assert_eq!(slice.pixels[2 + 1], 121);
    }

    #[test]
    fn test_out_of_range_index_is_blank() {
        let volume = coded_volume();
        let slice = reconstruct_slice(Orientation::Axial, 99, &volume, &identity_window());
        assert_eq!(slice.pixels.len(), 6);
        assert!(slice.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_reconstruction_is_pure() {
        let volume = coded_volume();
        let window = compute_window(&volume.histogram(), &WindowState::new(10.0, 90.0));
        for orientation in Orientation::ALL {
            let first = reconstruct_slice(orientation, 1, &volume, &window);
            let second = reconstruct_slice(orientation, 1, &volume, &window);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_uniform_volume_degenerate_window_is_black() {
        let volume = Volume::new(Array3::from_elem((16, 16, 16), -900.0), (1.0, 1.0, 1.0));
        let window = compute_window(&volume.histogram(), &WindowState::default());
        let slice = reconstruct_slice(Orientation::Coronal, 8, &volume, &window);
        assert!(slice.pixels.iter().all(|&p| p == 0));
    }
}

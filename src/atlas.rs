//! Packs a volume into one square 2D texture, slices laid out on a grid.
//!
//! Cell `z` sits at column `z % grid_size`, row `z / grid_size`. The voxels
//! are stored already windowed so the shader samples display-ready bytes.

use log::debug;
use rayon::prelude::*;
use thiserror::Error;

use crate::volume::{Dimensions, Volume};
use crate::window::{WindowParams, map_intensity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtlasError {
    #[error("downsample factor must be at least 1")]
    ZeroFactor,

    #[error("volume is empty")]
    EmptyVolume,
}

/// What an atlas was built from; a differing key means the atlas is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasKey {
    pub factor: usize,
    pub window_generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeAtlas {
    grid_size: usize,
    texture_size: usize,
    slice_dims: Dimensions,
    factor: usize,
    data: Vec<u8>,
}

/// Downsampled voxel counts for an integer factor.
pub fn downsampled_dims(dims: Dimensions, factor: usize) -> Dimensions {
    let factor = factor.max(1);
    Dimensions::new(
        dims.x.div_ceil(factor),
        dims.y.div_ceil(factor),
        dims.z.div_ceil(factor),
    )
}

/// `(grid_size, texture_size)` for post-downsample dimensions.
pub fn atlas_geometry(slice_dims: Dimensions) -> (usize, usize) {
    let grid_size = (slice_dims.z as f64).sqrt().ceil() as usize;
    let grid_size = grid_size.max(1);
    (grid_size, grid_size * slice_dims.x.max(slice_dims.y))
}

/// Smallest factor whose atlas side fits `max_texture_dimension`.
pub fn fit_downsample(dims: Dimensions, max_texture_dimension: u32) -> usize {
    let limit = max_texture_dimension.max(1) as usize;
    let largest = dims.x.max(dims.y).max(dims.z).max(1);
    (1..=largest)
        .find(|&factor| atlas_geometry(downsampled_dims(dims, factor)).1 <= limit)
        .unwrap_or(largest)
}

impl VolumeAtlas {
    /// Downsample by `factor` (nearest neighbour) and pack, windowing every voxel.
    pub fn pack(volume: &Volume, factor: usize, window: &WindowParams) -> Result<Self, AtlasError> {
        if factor == 0 {
            return Err(AtlasError::ZeroFactor);
        }
        let source_dims = volume.dimensions();
        if source_dims.voxel_count() == 0 {
            return Err(AtlasError::EmptyVolume);
        }
        let slice_dims = downsampled_dims(source_dims, factor);
        let (grid_size, texture_size) = atlas_geometry(slice_dims);
        let source = volume.as_slice();

        let mut data = vec![0u8; texture_size * texture_size];
        let cell_row_bytes = texture_size * slice_dims.y;

        // One band of cells at a time; bands never overlap so they pack in parallel.
        data.par_chunks_mut(cell_row_bytes)
            .enumerate()
            .for_each(|(grid_row, band)| {
                for grid_col in 0..grid_size {
                    let z = grid_row * grid_size + grid_col;
                    if z >= slice_dims.z {
                        break;
                    }
                    let src_z = z * factor;
                    for local_y in 0..slice_dims.y {
                        let src_y = local_y * factor;
                        let row_start = local_y * texture_size + grid_col * slice_dims.x;
                        let Some(row) = band.get_mut(row_start..row_start + slice_dims.x) else {
                            continue;
                        };
                        for (local_x, texel) in row.iter_mut().enumerate() {
                            let flat = source_dims.flat_index(local_x * factor, src_y, src_z);
                            if let Some(&value) = source.get(flat) {
                                *texel = map_intensity(value, window);
                            }
                        }
                    }
                }
            });

        debug!(
            "packed {}x{}x{} atlas: grid {}, texture {}",
            slice_dims.x, slice_dims.y, slice_dims.z, grid_size, texture_size
        );

        Ok(Self {
            grid_size,
            texture_size,
            slice_dims,
            factor,
            data,
        })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn texture_size(&self) -> usize {
        self.texture_size
    }

    pub fn slice_dims(&self) -> Dimensions {
        self.slice_dims
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Texel coordinate of a voxel in the packed texture.
    #[inline]
    pub fn atlas_texel(&self, z: usize, local_x: usize, local_y: usize) -> (usize, usize) {
        (
            (z % self.grid_size) * self.slice_dims.x + local_x,
            (z / self.grid_size) * self.slice_dims.y + local_y,
        )
    }

    /// Normalized texture coordinate of a voxel, as the shader computes it.
    pub fn atlas_uv(&self, z: usize, local_x: usize, local_y: usize) -> (f32, f32) {
        let (px, py) = self.atlas_texel(z, local_x, local_y);
        let size = self.texture_size as f32;
        (px as f32 / size, py as f32 / size)
    }

    /// Atlas byte at a downsampled voxel.
    #[inline]
    pub fn sample(&self, x: usize, y: usize, z: usize) -> u8 {
        let x = x.min(self.slice_dims.x.saturating_sub(1));
        let y = y.min(self.slice_dims.y.saturating_sub(1));
        let z = z.min(self.slice_dims.z.saturating_sub(1));
        let (px, py) = self.atlas_texel(z, x, y);
        self.data
            .get(py * self.texture_size + px)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{WindowState, compute_window};
    use ndarray::Array3;

    fn ramp(shape: (usize, usize, usize)) -> Volume {
        let data = Array3::from_shape_fn(shape, |(z, _, _)| z as f32);
        Volume::new(data, (1.0, 1.0, 1.0))
    }

    #[test]
    fn test_64_cubed_downsampled_by_two() {
        let volume = ramp((64, 64, 64));
        let window = compute_window(&volume.histogram(), &WindowState::default());
        let atlas = VolumeAtlas::pack(&volume, 2, &window).unwrap();
        assert_eq!(atlas.slice_dims(), Dimensions::new(32, 32, 32));
        assert_eq!(atlas.grid_size(), 6);
        assert_eq!(atlas.texture_size(), 192);
        assert_eq!(atlas.data().len(), 192 * 192);
    }

    #[test]
    fn test_cells_hold_windowed_slices() {
        let volume = ramp((5, 4, 3));
        let window = WindowParams::from_bounds(0.0, 4.0);
        let atlas = VolumeAtlas::pack(&volume, 1, &window).unwrap();
        assert_eq!(atlas.grid_size(), 3);
        for z in 0..5 {
            let expected = map_intensity(z as f32, &window);
            for y in 0..4 {
                for x in 0..3 {
                    assert_eq!(atlas.sample(x, y, z), expected, "voxel ({x},{y},{z})");
                }
            }
        }
        // cell 4 sits in grid row 1, column 1
        assert_eq!(atlas.atlas_texel(4, 0, 0), (3, 4));
        let size = atlas.texture_size() as f32;
        assert_eq!(atlas.atlas_uv(4, 0, 0), (3.0 / size, 4.0 / size));
        assert_eq!(atlas.atlas_uv(4, 2, 3), (5.0 / size, 7.0 / size));
    }

    #[test]
    fn test_unused_cells_stay_zero() {
        let volume = ramp((2, 10, 10));
        let window = WindowParams::from_bounds(0.0, 1.0);
        let atlas = VolumeAtlas::pack(&volume, 1, &window).unwrap();
        // grid 2x2 with only two slices: bottom row is empty
        let half = atlas.texture_size() * atlas.texture_size() / 2;
        assert!(atlas.data()[half..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_factor_rejected() {
        let volume = ramp((4, 4, 4));
        let window = WindowParams::from_bounds(0.0, 1.0);
        assert_eq!(
            VolumeAtlas::pack(&volume, 0, &window),
            Err(AtlasError::ZeroFactor)
        );
    }

    #[test]
    fn test_fit_downsample_respects_limit() {
        let dims = Dimensions::new(512, 512, 400);
        let factor = fit_downsample(dims, 4096);
        let (_, size) = atlas_geometry(downsampled_dims(dims, factor));
        assert!(size <= 4096);
        let (_, coarser) = atlas_geometry(downsampled_dims(dims, factor - 1));
        assert!(coarser > 4096);
    }

    #[test]
    fn test_tall_slices_fit_texture() {
        let dims = Dimensions::new(8, 20, 9);
        let (grid, size) = atlas_geometry(dims);
        assert_eq!(grid, 3);
        assert!(size >= grid * dims.y);
    }
}

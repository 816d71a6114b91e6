use crate::enums::Interpolation;
use crate::enums::Orientation;
use crate::interpolator::Interpolator;
use crate::slice::{Slice, reconstruct_slice};
use crate::viewport::data_aspect;
use crate::window::WindowParams;

use image::GrayImage;
use ndarray::Array3;

/// Smallest and largest per-axis voxel counts treated as a normal scan.
pub const EXPECTED_DIM_RANGE: std::ops::RangeInclusive<usize> = 10..=2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dimensions {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub const fn voxel_count(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Voxel count, or `None` when the product does not fit in `usize`.
    pub fn checked_voxel_count(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    /// Voxel count along axis 0 = x, 1 = y, 2 = z.
    pub const fn axis(&self, axis: usize) -> usize {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    #[inline]
    pub const fn flat_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.x + z * self.x * self.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Spacing {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

impl Spacing {
    pub const fn axis(&self, axis: usize) -> f32 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl From<(f32, f32, f32)> for Spacing {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self { x, y, z }
    }
}

/// Running extrema over finite calibrated values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl Histogram {
    #[inline]
    pub fn observe(&mut self, value: f32) {
        if value.is_finite() {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// No finite value was observed.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f32>) -> Self {
        let mut histogram = Self::default();
        for &v in values {
            histogram.observe(v);
        }
        histogram
    }
}

/// A calibrated scalar volume. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    data: Array3<f32>,
    spacing: Spacing,
    histogram: Histogram,
}

impl Volume {
    /// Wrap a `(z, y, x)` array, computing its histogram.
    pub fn new(data: Array3<f32>, spacing: impl Into<Spacing>) -> Self {
        let data = data.as_standard_layout().into_owned();
        let histogram = Histogram::from_values(data.iter());
        Self {
            data,
            spacing: spacing.into(),
            histogram,
        }
    }

    /// Build from an already calibrated flat buffer (x fastest) and its extrema.
    ///
    /// Returns `None` when `data.len()` does not match the dimensions.
    pub fn from_parts(
        dimensions: Dimensions,
        spacing: impl Into<Spacing>,
        data: Vec<f32>,
        histogram: Histogram,
    ) -> Option<Self> {
        let data = Array3::from_shape_vec((dimensions.z, dimensions.y, dimensions.x), data).ok()?;
        Some(Self {
            data,
            spacing: spacing.into(),
            histogram,
        })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn dimensions(&self) -> Dimensions {
        let (z, y, x) = self.data.dim();
        Dimensions { x, y, z }
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Flat calibrated samples, x fastest, then y, then z.
    pub fn as_slice(&self) -> &[f32] {
        // `new` and `from_parts` only ever store standard-layout arrays.
        self.data.as_slice().unwrap_or(&[])
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn histogram(&self) -> Histogram {
        self.histogram
    }

    /// Number of slices available for an orientation.
    pub fn depth_of(&self, orientation: Orientation) -> usize {
        self.dimensions().axis(orientation.depth_axis())
    }

    /// Windowed slice, optionally resampled to physical aspect.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
        window: &WindowParams,
    ) -> Option<GrayImage> {
        if !self.is_valid_index(index, &orientation) {
            return None;
        }
        let slice = reconstruct_slice(orientation, index, self, window);

        match interpolation {
            Interpolation::None => slice.to_image(),
            Interpolation::Bilinear => {
                // Axial doesn't need interpolation (already isotropic in-plane)
                if matches!(orientation, Orientation::Axial) {
                    return slice.to_image();
                }
                let (width, height) = self.get_output_dimensions(&orientation);
                Interpolator::resample(&slice, width, height).to_image()
            }
        }
    }

    fn get_output_dimensions(&self, orientation: &Orientation) -> (u32, u32) {
        let spacing = self.spacing;
        let (new_z, new_y, new_x) = Interpolator::get_isotropic_dimensions(
            (spacing.x, spacing.y, spacing.z),
            self.dim(),
        );
        match orientation {
            Orientation::Axial => (new_x, new_y),
            Orientation::Coronal => (new_x, new_z),
            Orientation::Sagittal => (new_y, new_z),
        }
    }

    /// Physical width over height of an orientation's plane.
    pub fn plane_aspect(&self, orientation: Orientation) -> f32 {
        data_aspect(orientation, self.dimensions(), self.spacing)
    }

    pub fn slice(&self, orientation: Orientation, index: usize, window: &WindowParams) -> Slice {
        reconstruct_slice(orientation, index, self, window)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        index < self.depth_of(*orientation)
    }
}

use rayon::prelude::*;

use crate::slice::Slice;

pub(crate) struct Interpolator;

impl Interpolator {
    pub(crate) fn get_isotropic_dimensions(
        spacing: (f32, f32, f32),
        original_dim: (usize, usize, usize),
    ) -> (u32, u32, u32) {
        let (x_spacing, y_spacing, z_spacing) = spacing;
        let min_spacing = x_spacing.min(y_spacing).min(z_spacing);
        let inv_min_spacing = 1.0 / min_spacing; // Multiply instead of divide

        // original_dim is (depth, height, width) corresponding to (z, y, x)
        let new_x = (original_dim.2 as f32 * x_spacing * inv_min_spacing).round() as u32;
        let new_y = (original_dim.1 as f32 * y_spacing * inv_min_spacing).round() as u32;
        let new_z = (original_dim.0 as f32 * z_spacing * inv_min_spacing).round() as u32;

        (new_z.max(1), new_y.max(1), new_x.max(1))
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &Slice, y: f32, x: f32) -> f32 {
        let (width, height) = (slice.width as usize, slice.height as usize);
        let sample = |yy: usize, xx: usize| slice.pixels[yy * width + xx] as f32;

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = sample(y0, x0);
        let v01 = sample(y0, x1);
        let v10 = sample(y1, x0);
        let v11 = sample(y1, x1);

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }

    /// Bilinear resample of a windowed slice to `width` x `height`.
    pub(crate) fn resample(slice: &Slice, width: u32, height: u32) -> Slice {
        if slice.width == 0 || slice.height == 0 || width == 0 || height == 0 {
            return Slice::zeroed(width, height);
        }
        let (slice_width, slice_height) = (slice.width as f32, slice.height as f32);

        let pixels: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    // Normalized coordinates with half-pixel offset
                    let norm_x = (x as f32 + 0.5) / width as f32;
                    let norm_y = (y as f32 + 0.5) / height as f32;

                    let src_x = (norm_x * slice_width - 0.5).clamp(0.0, slice_width - 1.0);
                    let src_y = (norm_y * slice_height - 0.5).clamp(0.0, slice_height - 1.0);

                    Self::bilinear_interpolate(slice, src_y, src_x)
                        .round()
                        .clamp(0.0, 255.0) as u8
                })
            })
            .collect();

        Slice {
            width,
            height,
            pixels,
        }
    }
}

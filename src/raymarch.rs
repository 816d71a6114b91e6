//! Ray marching through an atlas-packed volume.
//!
//! This is the host-side twin of `shaders/raymarch.wgsl`: the same slab test,
//! atlas lookup, transfer curves and compositing, evaluated on the CPU. The
//! GPU renderer feeds the shader from these types so both stay in step.

use glam::{Vec2, Vec3};
use image::RgbaImage;
use rayon::prelude::*;

use crate::atlas::VolumeAtlas;
use crate::volume::{Dimensions, Spacing};

/// How samples along a ray are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compositing {
    /// Keep the brightest sample.
    Maximum,
    /// Classic front-to-back alpha blending with early exit.
    FrontToBack,
}

impl Compositing {
    /// Value of the shader's `compositing` uniform.
    pub const fn shader_code(self) -> u32 {
        match self {
            Compositing::Maximum => 0,
            Compositing::FrontToBack => 1,
        }
    }
}

/// Piecewise-linear intensity to opacity mapping with three bands.
///
/// Below `cutoff` a sample is invisible. Faint tissue between `cutoff` and
/// `soft_threshold` ramps up to `soft_opacity`, the middle band ramps to
/// `mid_opacity`, and dense material above `dense_threshold` ramps to
/// `dense_opacity`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferCurve {
    pub cutoff: f32,
    pub soft_threshold: f32,
    pub dense_threshold: f32,
    pub soft_opacity: f32,
    pub mid_opacity: f32,
    pub dense_opacity: f32,
    pub gamma: f32,
    pub brightness: f32,
}

fn ramp(value: f32, from: f32, to: f32) -> f32 {
    if to <= from {
        return 1.0;
    }
    ((value - from) / (to - from)).clamp(0.0, 1.0)
}

impl TransferCurve {
    pub fn opacity(&self, value: f32) -> f32 {
        if value < self.cutoff {
            return 0.0;
        }
        let alpha = if value < self.soft_threshold {
            self.soft_opacity * ramp(value, self.cutoff, self.soft_threshold)
        } else if value < self.dense_threshold {
            self.soft_opacity
                + (self.mid_opacity - self.soft_opacity)
                    * ramp(value, self.soft_threshold, self.dense_threshold)
        } else {
            self.mid_opacity
                + (self.dense_opacity - self.mid_opacity) * ramp(value, self.dense_threshold, 1.0)
        };
        alpha.clamp(0.0, 1.0)
    }

    /// Gamma below 1 lifts faint structures.
    pub fn brightness_of(&self, value: f32) -> f32 {
        if value < self.cutoff {
            return 0.0;
        }
        (value.max(0.0).powf(self.gamma) * self.brightness).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    MaximumIntensity,
    #[default]
    Translucent,
    Attenuated,
}

impl RenderMode {
    pub const ALL: [RenderMode; 3] = [
        RenderMode::MaximumIntensity,
        RenderMode::Translucent,
        RenderMode::Attenuated,
    ];

    pub const fn compositing(self) -> Compositing {
        match self {
            RenderMode::MaximumIntensity => Compositing::Maximum,
            RenderMode::Translucent | RenderMode::Attenuated => Compositing::FrontToBack,
        }
    }

    pub const fn curve(self) -> TransferCurve {
        match self {
            RenderMode::MaximumIntensity => TransferCurve {
                cutoff: 0.02,
                soft_threshold: 0.2,
                dense_threshold: 0.5,
                soft_opacity: 1.0,
                mid_opacity: 1.0,
                dense_opacity: 1.0,
                gamma: 1.0,
                brightness: 1.0,
            },
            RenderMode::Translucent => TransferCurve {
                cutoff: 0.08,
                soft_threshold: 0.3,
                dense_threshold: 0.6,
                soft_opacity: 0.02,
                mid_opacity: 0.15,
                dense_opacity: 0.9,
                gamma: 0.7,
                brightness: 1.2,
            },
            RenderMode::Attenuated => TransferCurve {
                cutoff: 0.05,
                soft_threshold: 0.25,
                dense_threshold: 0.55,
                soft_opacity: 0.01,
                mid_opacity: 0.04,
                dense_opacity: 0.25,
                gamma: 1.0,
                brightness: 1.0,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderMode::MaximumIntensity => "mip",
            RenderMode::Translucent => "translucent",
            RenderMode::Attenuated => "attenuated",
        }
    }
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mip" | "maximum" | "maximum-intensity" => Ok(RenderMode::MaximumIntensity),
            "translucent" => Ok(RenderMode::Translucent),
            "attenuated" | "xray" => Ok(RenderMode::Attenuated),
            other => Err(format!("unknown render mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarchSettings {
    /// World-space distance between samples.
    pub step_size: f32,
    pub max_steps: u32,
    /// Front-to-back marching stops once accumulated alpha exceeds this.
    pub early_exit_alpha: f32,
}

impl Default for MarchSettings {
    fn default() -> Self {
        Self {
            step_size: 0.01,
            max_steps: 200,
            early_exit_alpha: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Slab test. Returns `(t_enter, t_exit)` with `t_enter` clamped to 0.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, f32)> {
        let inv = ray.direction.recip();
        let t0 = (self.min - ray.origin) * inv;
        let t1 = (self.max - ray.origin) * inv;
        let t_enter = t0.min(t1).max_element().max(0.0);
        let t_exit = t0.max(t1).min_element();
        if t_exit.is_nan() || t_enter.is_nan() || t_exit < t_enter {
            None
        } else {
            Some((t_enter, t_exit))
        }
    }

    /// World position to [0,1]³ box coordinates.
    pub fn normalize(&self, p: Vec3) -> Vec3 {
        (p - self.min) / (self.max - self.min)
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }
}

/// World-space box of a volume: centred on the origin, longest side 1.0.
pub fn volume_box(dims: Dimensions, spacing: Spacing) -> Aabb {
    let extent = Vec3::new(
        dims.x as f32 * spacing.x,
        dims.y as f32 * spacing.y,
        dims.z as f32 * spacing.z,
    );
    let longest = extent.max_element();
    let half = if longest > 0.0 {
        extent / longest * 0.5
    } else {
        Vec3::splat(0.5)
    };
    Aabb {
        min: -half,
        max: half,
    }
}

/// Sample the atlas at a normalized volume coordinate (nearest voxel).
pub fn sample_atlas(atlas: &VolumeAtlas, p: Vec3) -> f32 {
    let dims = atlas.slice_dims();
    let voxel = |c: f32, n: usize| ((c * n as f32).floor().max(0.0) as usize).min(n.saturating_sub(1));
    let x = voxel(p.x, dims.x);
    let y = voxel(p.y, dims.y);
    let z = voxel(p.z, dims.z);
    atlas.sample(x, y, z) as f32 / 255.0
}

/// March one ray and return premultiplied RGBA in [0,1].
pub fn march(
    ray: &Ray,
    atlas: &VolumeAtlas,
    bounds: &Aabb,
    mode: RenderMode,
    settings: &MarchSettings,
) -> [f32; 4] {
    let Some((t_enter, t_exit)) = bounds.intersect(ray) else {
        return [0.0; 4];
    };
    let curve = mode.curve();
    let step = settings.step_size.max(1e-4);

    let mut color = 0.0f32;
    let mut alpha = 0.0f32;
    let mut brightest = 0.0f32;

    let mut t = t_enter + step * 0.5;
    let mut steps = 0;
    while t <= t_exit && steps < settings.max_steps {
        let p = bounds.normalize(ray.at(t)).clamp(Vec3::ZERO, Vec3::ONE);
        let value = sample_atlas(atlas, p);
        match mode.compositing() {
            Compositing::Maximum => brightest = brightest.max(value),
            Compositing::FrontToBack => {
                let sample_alpha = curve.opacity(value);
                if sample_alpha > 0.0 {
                    let weight = sample_alpha * (1.0 - alpha);
                    color += curve.brightness_of(value) * weight;
                    alpha += weight;
                    if alpha > settings.early_exit_alpha {
                        break;
                    }
                }
            }
        }
        t += step;
        steps += 1;
    }

    if mode.compositing() == Compositing::Maximum {
        if brightest < curve.cutoff {
            return [0.0; 4];
        }
        let c = curve.brightness_of(brightest);
        return [c, c, c, 1.0];
    }
    [color, color, color, alpha]
}

/// Orbiting perspective camera around the volume centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub fov_y: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            distance: 2.0,
            fov_y: 45f32.to_radians(),
        }
    }
}

const ORBIT_RADIANS_PER_PIXEL: f32 = 0.01;
const PITCH_LIMIT: f32 = 1.5;

impl OrbitCamera {
    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        self.yaw -= delta_x * ORBIT_RADIANS_PER_PIXEL;
        self.pitch = (self.pitch + delta_y * ORBIT_RADIANS_PER_PIXEL).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn dolly(&mut self, delta: f32) {
        self.distance = (self.distance * (1.0 + delta * 0.1)).clamp(0.5, 10.0);
    }

    pub fn eye(&self) -> Vec3 {
        Vec3::new(
            self.distance * self.pitch.cos() * self.yaw.sin(),
            self.distance * self.pitch.sin(),
            self.distance * self.pitch.cos() * self.yaw.cos(),
        )
    }

    pub fn frame(&self, aspect: f32) -> CameraFrame {
        let eye = self.eye();
        let forward = (-eye).normalize_or_zero();
        let right = forward.cross(Vec3::Y).normalize_or(Vec3::X);
        let up = right.cross(forward);
        CameraFrame {
            eye,
            forward,
            right,
            up,
            tan_half_fov: (self.fov_y * 0.5).tan(),
            aspect: if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 },
        }
    }
}

/// Everything needed to build a primary ray per pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    pub eye: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub tan_half_fov: f32,
    pub aspect: f32,
}

impl CameraFrame {
    /// Ray through normalized device coordinates (`y` up).
    pub fn ray(&self, ndc: Vec2) -> Ray {
        let direction = self.forward
            + self.right * (ndc.x * self.tan_half_fov * self.aspect)
            + self.up * (ndc.y * self.tan_half_fov);
        Ray::new(self.eye, direction)
    }

    pub fn pixel_ndc(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / width as f32 * 2.0 - 1.0,
            1.0 - (y as f32 + 0.5) / height as f32 * 2.0,
        )
    }
}

/// Render the pseudo-3D view on the CPU.
pub fn render_cpu(
    atlas: &VolumeAtlas,
    bounds: &Aabb,
    mode: RenderMode,
    settings: &MarchSettings,
    frame: &CameraFrame,
    width: u32,
    height: u32,
) -> RgbaImage {
    let mut image = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return image;
    }
    image
        .par_chunks_mut(width as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let ndc = CameraFrame::pixel_ndc(x as u32, y as u32, width, height);
                let rgba = march(&frame.ray(ndc), atlas, bounds, mode, settings);
                for (channel, value) in pixel.iter_mut().zip(rgba) {
                    *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        });
    image
}

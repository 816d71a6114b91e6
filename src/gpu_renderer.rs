use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;
use log::{debug, error, warn};
use thiserror::Error;
use wgpu::PollType;

use crate::atlas::VolumeAtlas;
use crate::raymarch::{Aabb, CameraFrame, MarchSettings, RenderMode};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("rendering context was lost")]
    ContextLost,

    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),

    #[error("failed to create GPU device: {0}")]
    Device(String),

    #[error("atlas of {size}px exceeds the {limit}px texture limit")]
    AtlasTooLarge { size: usize, limit: u32 },

    #[error("no atlas has been uploaded")]
    NoAtlas,

    #[error("frame readback failed: {0}")]
    Readback(String),
}

pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WGPU {
    /// Request a device from the default adapter.
    pub async fn request() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| RenderError::NoAdapter(e.to_string()))?;
        debug!("using adapter {:?}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Volume Render Device"),
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;
        Ok(Self { device, queue })
    }
}

/// Mirrors `Uniforms` in `shaders/raymarch.wgsl`; every field is a 16-byte vector.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    eye: [f32; 4],
    forward: [f32; 4],
    right: [f32; 4],
    up: [f32; 4],
    box_min: [f32; 4],
    box_max: [f32; 4],
    atlas: [f32; 4],
    march: [f32; 4],
    bands: [f32; 4],
    opacity: [f32; 4],
    mode: [u32; 4],
}

/// Atlas geometry as the shader sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AtlasLayout {
    slice_dims: [f32; 3],
    grid_size: f32,
    texture_size: f32,
}

impl From<&VolumeAtlas> for AtlasLayout {
    fn from(atlas: &VolumeAtlas) -> Self {
        let dims = atlas.slice_dims();
        Self {
            slice_dims: [dims.x as f32, dims.y as f32, dims.z as f32],
            grid_size: atlas.grid_size() as f32,
            texture_size: atlas.texture_size() as f32,
        }
    }
}

struct AtlasTexture {
    // kept alive for the bind group's view
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    layout: AtlasLayout,
}

struct Target {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row: u32,
}

/// Offscreen ray-marching renderer over an uploaded atlas.
pub struct VolumeRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    atlas: Option<AtlasTexture>,
    target: Option<Target>,
    bounds: Aabb,
    mode: RenderMode,
    settings: MarchSettings,
    lost: LostLatch,
}

/// Set once the device reports loss and never cleared.
#[derive(Debug, Clone, Default)]
struct LostLatch(Arc<AtomicBool>);

impl LostLatch {
    fn latch(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RenderError> {
        if self.is_set() {
            Err(RenderError::ContextLost)
        } else {
            Ok(())
        }
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * 4;
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

fn build_uniforms(
    frame: &CameraFrame,
    bounds: &Aabb,
    atlas: &AtlasLayout,
    mode: RenderMode,
    settings: &MarchSettings,
) -> Uniforms {
    let curve = mode.curve();
    let vec = |v: glam::Vec3, w: f32| [v.x, v.y, v.z, w];
    Uniforms {
        eye: vec(frame.eye, frame.tan_half_fov),
        forward: vec(frame.forward, frame.aspect),
        right: vec(frame.right, 0.0),
        up: vec(frame.up, 0.0),
        box_min: vec(bounds.min, 0.0),
        box_max: vec(bounds.max, 0.0),
        atlas: [
            atlas.slice_dims[0],
            atlas.slice_dims[1],
            atlas.slice_dims[2],
            atlas.grid_size,
        ],
        march: [
            settings.step_size,
            settings.max_steps as f32,
            settings.early_exit_alpha,
            atlas.texture_size,
        ],
        bands: [
            curve.cutoff,
            curve.soft_threshold,
            curve.dense_threshold,
            curve.gamma,
        ],
        opacity: [
            curve.soft_opacity,
            curve.mid_opacity,
            curve.dense_opacity,
            curve.brightness,
        ],
        mode: [mode.compositing().shader_code(), 0, 0, 0],
    }
}

impl VolumeRenderer {
    pub fn new(wgpu: WGPU, bounds: Aabb, mode: RenderMode, settings: MarchSettings) -> Self {
        let WGPU { device, queue } = wgpu;

        let lost = LostLatch::default();
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!("GPU device lost ({reason:?}): {message}");
            flag.latch();
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ray March Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shaders/raymarch.wgsl"))),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ray March Bind Group Layout"),
            entries: &[
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Atlas
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray March Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Ray March Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Ray March Uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            atlas: None,
            target: None,
            bounds,
            mode,
            settings,
            lost,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_set()
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Switching modes only changes uniforms; the atlas stays resident.
    pub fn set_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Upload a packed atlas as an R8 texture, replacing any previous one.
    pub fn upload_atlas(&mut self, atlas: &VolumeAtlas) -> Result<(), RenderError> {
        self.lost.check()?;
        let limit = self.max_texture_dimension();
        let size = atlas.texture_size();
        if size > limit as usize {
            return Err(RenderError::AtlasTooLarge { size, limit });
        }
        let side = size as u32;
        let extent = wgpu::Extent3d {
            width: side,
            height: side,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Volume Atlas Texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            atlas.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(side),
                rows_per_image: Some(side),
            },
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray March Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        let dims = atlas.slice_dims();
        debug!(
            "uploaded {side}x{side} atlas ({}x{}x{} cells)",
            dims.x, dims.y, dims.z
        );
        self.atlas = Some(AtlasTexture {
            _texture: texture,
            bind_group,
            layout: AtlasLayout::from(atlas),
        });
        Ok(())
    }

    fn ensure_target(&mut self, width: u32, height: u32) {
        let stale = self
            .target
            .as_ref()
            .is_none_or(|t| t.width != width || t.height != height);
        if stale {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Ray March Target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let padded_row = padded_row_bytes(width);
            let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Ray March Readback"),
                size: padded_row as u64 * height as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.target = Some(Target {
                width,
                height,
                texture,
                view,
                readback,
                padded_row,
            });
        }
    }

    /// Render one frame and read it back as premultiplied RGBA.
    pub async fn render_frame(
        &mut self,
        frame: &CameraFrame,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RenderError> {
        if let Err(e) = self.lost.check() {
            error!("render skipped: GPU context lost");
            return Err(e);
        }
        let Some(layout) = self.atlas.as_ref().map(|a| a.layout) else {
            return Err(RenderError::NoAtlas);
        };
        if width == 0 || height == 0 {
            return Ok(RgbaImage::new(width, height));
        }

        let uniforms = build_uniforms(frame, &self.bounds, &layout, self.mode, &self.settings);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        self.ensure_target(width, height);
        let (Some(atlas), Some(target)) = (self.atlas.as_ref(), self.target.as_ref()) else {
            return Err(RenderError::NoAtlas);
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Ray March Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Ray March Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &atlas.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = target.readback.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        if let Err(e) = self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            warn!("device poll failed: {e}");
        }
        receiver
            .await
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        if let Err(e) = self.lost.check() {
            target.readback.unmap();
            return Err(e);
        }

        let row_bytes = width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        {
            let mapped = buffer_slice.get_mapped_range();
            for row in mapped.chunks(target.padded_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        target.readback.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Readback("readback size mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raymarch::{OrbitCamera, volume_box};
    use crate::volume::Volume;
    use crate::window::WindowParams;
    use ndarray::Array3;

    #[test]
    fn test_lost_latch_is_shared_and_sticky() {
        let lost = LostLatch::default();
        assert!(lost.check().is_ok());

        let callback_side = lost.clone();
        callback_side.latch();
        assert!(lost.is_set());
        assert!(matches!(lost.check(), Err(RenderError::ContextLost)));

        callback_side.latch();
        assert!(matches!(lost.check(), Err(RenderError::ContextLost)));
    }

    #[test]
    fn test_uniforms_are_vec4_aligned() {
        assert_eq!(std::mem::size_of::<Uniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<Uniforms>(), 11 * 16);
    }

    #[test]
    fn test_padded_rows_meet_copy_alignment() {
        assert_eq!(padded_row_bytes(1), 256);
        assert_eq!(padded_row_bytes(64), 256);
        assert_eq!(padded_row_bytes(65), 512);
    }

    #[test]
    fn test_uniforms_follow_mode() {
        let volume = Volume::new(Array3::from_elem((4, 6, 8), 1.0), (1.0, 1.0, 1.0));
        let atlas = VolumeAtlas::pack(&volume, 1, &WindowParams::from_bounds(0.0, 1.0)).unwrap();
        let layout = AtlasLayout::from(&atlas);
        assert_eq!(layout.slice_dims, [8.0, 6.0, 4.0]);
        assert_eq!(layout.grid_size, 2.0);

        let frame = OrbitCamera::default().frame(1.0);
        let bounds = volume_box(volume.dimensions(), volume.spacing());
        let settings = MarchSettings::default();
        for mode in RenderMode::ALL {
            let uniforms = build_uniforms(&frame, &bounds, &layout, mode, &settings);
            assert_eq!(uniforms.mode[0], mode.compositing().shader_code());
            assert_eq!(uniforms.bands[0], mode.curve().cutoff);
            assert_eq!(uniforms.opacity[2], mode.curve().dense_opacity);
            assert_eq!(uniforms.march[1], 200.0);
            assert_eq!(uniforms.eye[3], frame.tan_half_fov);
        }
    }
}

use super::wgsl::{COMPOSITE_FILE, COMPOSITE_SRC, POINTS_FILE, POINTS_SRC, SACRED_FILE, SACRED_SRC};
use super::{CloudSlots, RenderCtx, VisualEngine};
use crate::cloud::{PointCloud, normalized_category};
use crate::error::RenderError;
use crate::post::{FEEDBACK_GAIN, MAX_ITERATIONS, PingPong, PostParams, PostState, pass_fade};
use bytemuck::{Pod, Zeroable};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const REBUILD_INTERVAL: Duration = Duration::from_secs(1);
const PASSES: usize = MAX_ITERATIONS as usize;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct PointInstance {
    position: [f32; 3],
    color: [f32; 3],
    /// Category id scaled to [0,1].
    category: f32,
}

/// Matches `Field` in `POINTS_SRC`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FieldUniform {
    view_proj: [[f32; 4]; 4],
    eye_time: [f32; 4],
    bands_lo: [f32; 4],
    bands_hi: [f32; 4],
    energy: [f32; 4],
    params: [f32; 4],
    // alpha, aspect, viewport height, projection y scale
    frame: [f32; 4],
}

impl FieldUniform {
    fn new(ctx: &RenderCtx, alpha: f32, iw: u32, ih: u32) -> Self {
        let cam = &ctx.camera;
        let a = &ctx.audio;
        let p = &ctx.params;
        Self {
            view_proj: cam.view_projection().to_cols_array_2d(),
            eye_time: [cam.eye.x, cam.eye.y, cam.eye.z, ctx.t],
            bands_lo: [a.bands[0], a.bands[1], a.bands[2], a.bands[3]],
            bands_hi: [a.bands[4], a.bands[5], a.bands[6], a.bands[7]],
            energy: [a.bass, a.mid, a.high, a.beat],
            params: [p.coherence, p.form, p.point_scale, p.highlight as f32],
            frame: [
                alpha,
                iw.max(1) as f32 / ih.max(1) as f32,
                ih as f32,
                cam.projection.y_axis.y,
            ],
        }
    }
}

/// Matches `Post` in `COMPOSITE_SRC` / `SACRED_SRC`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct PostUniform {
    a: [f32; 4],
    b: [f32; 4],
    c: [f32; 4],
    d: [f32; 4],
    e: [f32; 4],
}

impl PostUniform {
    fn new(pp: &PostParams, iteration: u32, iw: u32, ih: u32, aspect: f32) -> Self {
        Self {
            a: [
                pp.time,
                pp.kaleido_amount,
                pp.kaleido_rotation,
                pp.feedback_amount * pass_fade(iteration) * FEEDBACK_GAIN,
            ],
            b: [pp.zoom_in, pp.zoom_out, pp.spiral_angle, pp.chroma_offset],
            c: [
                pp.glitch_amount,
                f32::from_bits(pp.glitch_seed),
                pp.bloom_threshold,
                pp.bloom_strength,
            ],
            d: [pp.hue_shift, pp.sacred_activation, pp.tunnel_amount, pp.beat],
            e: [iw as f32, ih as f32, aspect, pp.draw_sacred as u32 as f32],
        }
    }
}

/// WGSL text for the three stages, built-in unless overridden from a directory.
#[derive(Debug, Clone)]
pub struct ShaderSources {
    pub points: String,
    pub composite: String,
    pub sacred: String,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            points: POINTS_SRC.to_string(),
            composite: COMPOSITE_SRC.to_string(),
            sacred: SACRED_SRC.to_string(),
        }
    }
}

impl ShaderSources {
    /// Files missing from `dir` fall back to the built-in source.
    pub fn load(dir: &Path) -> Self {
        let read = |name: &str, builtin: &str| {
            std::fs::read_to_string(dir.join(name)).unwrap_or_else(|_| builtin.to_string())
        };
        Self {
            points: read(POINTS_FILE, POINTS_SRC),
            composite: read(COMPOSITE_FILE, COMPOSITE_SRC),
            sacred: read(SACRED_FILE, SACRED_SRC),
        }
    }
}

struct Pipelines {
    points: wgpu::RenderPipeline,
    composite: wgpu::RenderPipeline,
    sacred: wgpu::RenderPipeline,
}

struct Layouts {
    field: wgpu::BindGroupLayout,
    composite: wgpu::BindGroupLayout,
    sacred: wgpu::BindGroupLayout,
}

struct GpuCloud {
    instances: wgpu::Buffer,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    count: u32,
}

/// One side of the feedback pair, with the composite bind groups that read it as history.
struct FeedbackTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    history_groups: Vec<wgpu::BindGroup>,
}

struct Targets {
    iw: u32,
    ih: u32,
    scene: wgpu::TextureView,
    depth: wgpu::TextureView,
    scratch: [wgpu::TextureView; 2],
    feedback: PingPong<FeedbackTarget>,
    readback: wgpu::Buffer,
    padded_bpr: u32,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layouts: Layouts,
    pipelines: Pipelines,
    sampler: wgpu::Sampler,
    post_uniforms: [wgpu::Buffer; PASSES],
    sacred_group: wgpu::BindGroup,
    targets: Option<Targets>,
}

impl GpuContext {
    fn new(sources: &ShaderSources, lost: Arc<AtomicBool>) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::NoAdapter(e.to_string()))?;
        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "gpu adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("pointcloud device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: Default::default(),
            ..Default::default()
        }))
        .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

        device.set_device_lost_callback(move |reason, message| {
            if !matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                warn!(?reason, %message, "gpu device lost");
                lost.store(true, Ordering::SeqCst);
            }
        });

        let layouts = create_layouts(&device);
        let pipelines = build_pipelines(&device, &layouts, sources)?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("post sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let post_uniforms: [wgpu::Buffer; PASSES] = std::array::from_fn(|_| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("post uniform"),
                size: std::mem::size_of::<PostUniform>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let sacred_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sacred bind group"),
            layout: &layouts.sacred,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: post_uniforms[0].as_entire_binding(),
            }],
        });

        Ok(Self {
            device,
            queue,
            layouts,
            pipelines,
            sampler,
            post_uniforms,
            sacred_group,
            targets: None,
        })
    }

    fn upload(&self, cloud: &PointCloud) -> GpuCloud {
        let mut instances: Vec<PointInstance> = (0..cloud.len())
            .map(|i| PointInstance {
                position: cloud.positions()[i],
                color: cloud.colors()[i],
                category: normalized_category(cloud.categories()[i]),
            })
            .collect();
        let count = instances.len() as u32;
        if instances.is_empty() {
            instances.push(PointInstance::zeroed());
        }
        let instances = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("point instances"),
            contents: bytemuck::cast_slice(&instances),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let uniform = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("field uniform"),
            size: std::mem::size_of::<FieldUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("field bind group"),
            layout: &self.layouts.field,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            }],
        });
        GpuCloud {
            instances,
            uniform,
            bind_group,
            count,
        }
    }

    fn ensure_targets(&mut self, iw: u32, ih: u32) {
        if matches!(&self.targets, Some(t) if t.iw == iw && t.ih == ih) {
            return;
        }
        debug!(iw, ih, "allocating render targets");
        let color = |label: &str, extra: wgpu::TextureUsages| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: iw,
                    height: ih,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COLOR_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | extra,
                view_formats: &[],
            })
        };
        let view = |t: &wgpu::Texture| t.create_view(&wgpu::TextureViewDescriptor::default());

        let scene = view(&color("scene", wgpu::TextureUsages::empty()));
        let scratch = [
            view(&color("scratch 0", wgpu::TextureUsages::empty())),
            view(&color("scratch 1", wgpu::TextureUsages::empty())),
        ];
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth"),
            size: wgpu::Extent3d {
                width: iw,
                height: ih,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth = view(&depth);

        let make_feedback = |label: &str| {
            let texture = color(label, wgpu::TextureUsages::COPY_SRC);
            let v = view(&texture);
            (texture, v)
        };
        let (tex_a, view_a) = make_feedback("feedback a");
        let (tex_b, view_b) = make_feedback("feedback b");
        let sources = [&scene, &scratch[0], &scratch[1]];
        let groups_for = |history: &wgpu::TextureView| -> Vec<wgpu::BindGroup> {
            (0..PASSES)
                .map(|i| {
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("composite bind group"),
                        layout: &self.layouts.composite,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: self.post_uniforms[i].as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::TextureView(sources[i]),
                            },
                            wgpu::BindGroupEntry {
                                binding: 2,
                                resource: wgpu::BindingResource::TextureView(history),
                            },
                            wgpu::BindGroupEntry {
                                binding: 3,
                                resource: wgpu::BindingResource::Sampler(&self.sampler),
                            },
                        ],
                    })
                })
                .collect()
        };
        let groups_a = groups_for(&view_a);
        let groups_b = groups_for(&view_b);

        let unpadded = iw * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bpr = unpadded.div_ceil(align) * align;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded_bpr * ih) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        // Current writes into A and reads B as history; the groups stored on
        // each target are the ones that sample it as history.
        self.targets = Some(Targets {
            iw,
            ih,
            scene,
            depth,
            scratch,
            feedback: PingPong::new(
                FeedbackTarget {
                    texture: tex_a,
                    view: view_a,
                    history_groups: groups_a,
                },
                FeedbackTarget {
                    texture: tex_b,
                    view: view_b,
                    history_groups: groups_b,
                },
            ),
            readback,
            padded_bpr,
        });
    }

    /// Draws one frame into the current feedback target and reads it back into `pixels`.
    fn draw(
        &mut self,
        ctx: &RenderCtx,
        slots: &CloudSlots<GpuCloud>,
        pixels: &mut Vec<u8>,
    ) -> Result<(), RenderError> {
        let Some(targets) = self.targets.as_mut() else {
            return Ok(());
        };
        let (iw, ih) = (targets.iw, targets.ih);
        let aspect = iw as f32 / ih.max(1) as f32;

        for (gc, alpha) in slots.live(ctx.t) {
            let u = FieldUniform::new(ctx, alpha, iw, ih);
            self.queue.write_buffer(&gc.uniform, 0, bytemuck::bytes_of(&u));
        }

        let pp = PostParams::compute(ctx.params.coherence, &ctx.audio, ctx.t);
        let n = pp.iterations.clamp(1, MAX_ITERATIONS) as usize;
        for (i, buf) in self.post_uniforms.iter().enumerate() {
            let u = PostUniform::new(&pp, i as u32, iw, ih, aspect);
            self.queue.write_buffer(buf, 0, bytemuck::bytes_of(&u));
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("points"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.scene,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.points);
            for (gc, _) in slots.live(ctx.t) {
                if gc.count == 0 {
                    continue;
                }
                pass.set_bind_group(0, &gc.bind_group, &[]);
                pass.set_vertex_buffer(0, gc.instances.slice(..));
                pass.draw(0..6, 0..gc.count);
            }
        }

        let (current, history) = targets.feedback.split();
        for i in 0..n {
            let target = if i + 1 == n { &current.view } else { &targets.scratch[i] };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.composite);
            pass.set_bind_group(0, &history.history_groups[i], &[]);
            pass.draw(0..3, 0..1);
        }

        if pp.draw_sacred {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sacred"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &current.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.sacred);
            pass.set_bind_group(0, &self.sacred_group, &[]);
            pass.draw(0..3, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &current.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &targets.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_bpr),
                    rows_per_image: Some(ih),
                },
            },
            wgpu::Extent3d {
                width: iw,
                height: ih,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = targets.readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RenderError::Readback(e.to_string())),
            Err(_) => return Err(RenderError::Readback("map callback dropped".to_string())),
        }

        let row = (iw * 4) as usize;
        pixels.resize(row * ih as usize, 0);
        {
            let data = slice.get_mapped_range();
            for y in 0..ih as usize {
                let src = y * targets.padded_bpr as usize;
                pixels[y * row..(y + 1) * row].copy_from_slice(&data[src..src + row]);
            }
        }
        targets.readback.unmap();
        targets.feedback.swap();
        Ok(())
    }

    fn clear_feedback(&mut self) {
        let Some(targets) = &self.targets else {
            return;
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear feedback"),
        });
        for view in [&targets.feedback.current().view, &targets.feedback.history().view] {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

fn create_layouts(device: &wgpu::Device) -> Layouts {
    let uniform_entry = |visibility| wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    Layouts {
        field: device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("field layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::VERTEX_FRAGMENT)],
        }),
        composite: device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite layout"),
            entries: &[
                uniform_entry(wgpu::ShaderStages::FRAGMENT),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        }),
        sacred: device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sacred layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::FRAGMENT)],
        }),
    }
}

fn compile(
    device: &wgpu::Device,
    stage: &'static str,
    src: &str,
) -> Result<wgpu::ShaderModule, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(stage),
        source: wgpu::ShaderSource::Wgsl(src.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RenderError::ShaderCompilation {
            stage,
            message: err.to_string(),
        }),
        None => Ok(module),
    }
}

fn build_pipelines(
    device: &wgpu::Device,
    layouts: &Layouts,
    sources: &ShaderSources,
) -> Result<Pipelines, RenderError> {
    let points_module = compile(device, "points", &sources.points)?;
    let composite_module = compile(device, "composite", &sources.composite)?;
    let sacred_module = compile(device, "sacred", &sources.sacred)?;

    let layout = |label: &str, group: &wgpu::BindGroupLayout| {
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[group],
            push_constant_ranges: &[],
        })
    };
    let primitive = wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        unclipped_depth: false,
        polygon_mode: wgpu::PolygonMode::Fill,
        conservative: false,
    };
    let fullscreen = |label: &str,
                      module: &wgpu::ShaderModule,
                      group: &wgpu::BindGroupLayout,
                      blend: Option<wgpu::BlendState>| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout(label, group)),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive,
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    };

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let points = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("points"),
        layout: Some(&layout("points", &layouts.field)),
        vertex: wgpu::VertexState {
            module: &points_module,
            entry_point: Some("vs_main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<PointInstance>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &wgpu::vertex_attr_array![
                    0 => Float32x3,
                    1 => Float32x3,
                    2 => Float32,
                ],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &points_module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive,
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    let composite = fullscreen("composite", &composite_module, &layouts.composite, None);
    let additive = wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent::OVER,
    };
    let sacred = fullscreen("sacred", &sacred_module, &layouts.sacred, Some(additive));
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(RenderError::ShaderCompilation {
            stage: "pipeline",
            message: err.to_string(),
        });
    }

    Ok(Pipelines {
        points,
        composite,
        sacred,
    })
}

/// wgpu point renderer + feedback compositor. Renders at w/scale and reads back RGBA8.
pub struct GpuEngine {
    gpu: Option<GpuContext>,
    sources: ShaderSources,
    slots: CloudSlots<GpuCloud>,
    pending: Option<Arc<PointCloud>>,
    state: PostState,
    errors: Vec<RenderError>,
    lost: Arc<AtomicBool>,
    resubmit: bool,
    last_rebuild: Instant,
    w: usize,
    h: usize,
    pixels: Vec<u8>,
    out: Vec<u8>,
}

impl GpuEngine {
    pub fn new(crossfade_secs: f32, shader_dir: Option<&Path>) -> Result<Self, RenderError> {
        let sources = shader_dir.map(ShaderSources::load).unwrap_or_default();
        let lost = Arc::new(AtomicBool::new(false));
        let gpu = GpuContext::new(&sources, lost.clone())?;
        Ok(Self {
            gpu: Some(gpu),
            sources,
            slots: CloudSlots::new(crossfade_secs),
            pending: None,
            state: PostState::Idle,
            errors: Vec::new(),
            lost,
            resubmit: false,
            last_rebuild: Instant::now(),
            w: 0,
            h: 0,
            pixels: Vec::new(),
            out: Vec::new(),
        })
    }

    fn handle_context_loss(&mut self) {
        if !self.lost.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!("dropping gpu resources after context loss");
        self.slots.clear();
        self.pending = None;
        self.gpu = None;
        self.resubmit = true;
        self.state = PostState::ContextLost;
        self.errors
            .push(RenderError::DeviceLost("device lost; rebuilding".to_string()));
        self.last_rebuild = Instant::now();
    }

    fn try_rebuild(&mut self) {
        if self.gpu.is_some() || self.last_rebuild.elapsed() < REBUILD_INTERVAL {
            return;
        }
        self.last_rebuild = Instant::now();
        match GpuContext::new(&self.sources, self.lost.clone()) {
            Ok(gpu) => {
                info!("gpu context rebuilt");
                self.gpu = Some(gpu);
                self.resubmit = true;
            }
            Err(e) => warn!(error = %e, "gpu rebuild failed"),
        }
    }

    fn blank(&mut self) -> &[u8] {
        self.out.fill(0);
        for px in self.out.chunks_exact_mut(4) {
            px[3] = 255;
        }
        &self.out
    }
}

impl VisualEngine for GpuEngine {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn resize(&mut self, w: usize, h: usize) {
        self.w = w;
        self.h = h;
        self.out.resize(w * h * 4, 0);
    }

    fn submit_cloud(&mut self, cloud: Arc<PointCloud>, _now: f32) {
        self.pending = Some(cloud);
    }

    fn resident_clouds(&self) -> usize {
        self.slots.len()
    }

    fn post_state(&self) -> PostState {
        self.state
    }

    fn take_errors(&mut self) -> Vec<RenderError> {
        std::mem::take(&mut self.errors)
    }

    fn needs_resubmit(&mut self) -> bool {
        // Only once a context exists to upload into.
        if self.resubmit && self.gpu.is_some() {
            self.resubmit = false;
            return true;
        }
        false
    }

    fn reload_shaders(&mut self, dir: &Path) -> Result<(), RenderError> {
        let sources = ShaderSources::load(dir);
        let Some(gpu) = self.gpu.as_mut() else {
            self.sources = sources;
            return Ok(());
        };
        match build_pipelines(&gpu.device, &gpu.layouts, &sources) {
            Ok(p) => {
                gpu.pipelines = p;
                self.sources = sources;
                info!(dir = %dir.display(), "shaders reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "shader reload failed; keeping previous pipelines");
                self.errors.push(e.clone());
                Err(e)
            }
        }
    }

    fn render(&mut self, ctx: &RenderCtx) -> &[u8] {
        if self.w != ctx.w || self.h != ctx.h {
            self.resize(ctx.w, ctx.h);
        }
        self.handle_context_loss();
        self.try_rebuild();
        if ctx.w == 0 || ctx.h == 0 {
            return &self.out;
        }
        let scale = ctx.scale.max(1);
        let iw = ctx.w.div_ceil(scale) as u32;
        let ih = ctx.h.div_ceil(scale) as u32;

        let Some(gpu) = self.gpu.as_mut() else {
            self.state = self.state.on_frame(false, false);
            return self.blank();
        };
        gpu.ensure_targets(iw, ih);

        if self.slots.begin_frame(ctx.t).is_some() {
            debug!("outgoing cloud released");
        }
        if !self.slots.is_fading() {
            if let Some(cloud) = self.pending.take() {
                debug!(points = cloud.len(), "crossfade started");
                let uploaded = gpu.upload(&cloud);
                self.slots.push(uploaded, ctx.t);
            }
        }

        let next = self.state.on_frame(!self.slots.is_empty(), true);
        if next == PostState::Idle {
            if self.state != PostState::Idle {
                gpu.clear_feedback();
            }
            self.state = next;
            return self.blank();
        }
        self.state = next;

        if let Err(e) = gpu.draw(ctx, &self.slots, &mut self.pixels) {
            warn!(error = %e, "gpu frame failed");
            self.errors.push(e);
            return &self.out;
        }

        let (w, h, iw, ih) = (ctx.w, ctx.h, iw as usize, ih as usize);
        for y in 0..h {
            let sy = (y * ih / h).min(ih - 1);
            for x in 0..w {
                let sx = (x * iw / w).min(iw - 1);
                let s = (sy * iw + sx) * 4;
                let o = (y * w + x) * 4;
                self.out[o..o + 3].copy_from_slice(&self.pixels[s..s + 3]);
                self.out[o + 3] = 255;
            }
        }
        &self.out
    }
}

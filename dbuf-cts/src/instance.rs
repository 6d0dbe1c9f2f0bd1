//! One test case, run end to end against a device.

use hal::{
    Adapter as _, BufferAddress, BufferUses, CommandEncoder as _, CreateFlags, Device as _,
    Queue as _, TextureFormat, TextureUses,
};

use crate::{
    alloc::{self, DescriptorBufferAllocation, Residency},
    bind::{self, BindCommand, BindLimits, SetBinding},
    binding::SimpleBinding,
    caps::CapabilityModel,
    config::InstanceConfig,
    error::TestError,
    layout::{self, SetLayout, SetStorage},
    params::{Stage, TestParams, Variant},
    plan, program,
    push::{self, PushUpdate},
    registry::{BufferResource, Registry, Resource},
    verify::{self, ResultPayload, TestStatus},
    writer::{self, DescriptorWriter},
    RENDER_EXTENT, RESULT_BUFFER_DWORDS,
};

/// Placement of one set, as seen after allocation.
#[derive(Clone, Debug, PartialEq)]
pub struct SetSummary {
    pub storage: SetStorage,
    pub size: BufferAddress,
    pub buffer_index: Option<u32>,
    pub buffer_offset: BufferAddress,
    pub staging_offset: Option<BufferAddress>,
    /// Device reported offset of every binding, in binding order.
    pub binding_offsets: Vec<BufferAddress>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferSummary {
    pub size: BufferAddress,
    pub address: BufferAddress,
    pub usage: BufferUses,
    pub residency: Residency,
    pub first_set: u32,
    pub num_sets: u32,
}

/// Everything an iteration produced, for inspection by callers.
#[derive(Clone, Debug)]
pub struct IterationReport {
    pub status: TestStatus,
    pub sets: Vec<SetSummary>,
    pub buffers: Vec<BufferSummary>,
    pub bind_commands: Vec<BindCommand>,
    pub payload: ResultPayload,
    pub expected: u32,
}

/// Objects created by one iteration. Torn down whether it succeeded or not.
struct Iteration<A: hal::Api> {
    sets: Vec<SetLayout<A>>,
    registry: Registry<Resource<A>>,
    allocation: Option<DescriptorBufferAllocation<A>>,
    pipeline_layout: Option<A::PipelineLayout>,
    modules: Vec<A::ShaderModule>,
    pipeline: Option<A::Pipeline>,
    template: Option<A::DescriptorUpdateTemplate>,
    color_target: Option<(A::Texture, A::TextureView)>,
    readback: Option<BufferResource<A>>,
    encoder: Option<A::CommandEncoder>,
}

impl<A: hal::Api> Iteration<A> {
    fn new() -> Self {
        Self {
            sets: Vec::new(),
            registry: Registry::new("resource"),
            allocation: None,
            pipeline_layout: None,
            modules: Vec::new(),
            pipeline: None,
            template: None,
            color_target: None,
            readback: None,
            encoder: None,
        }
    }

    unsafe fn destroy(mut self, device: &A::Device) {
        if let Some(encoder) = self.encoder.take() {
            device.destroy_command_encoder(encoder);
        }
        if let Some(pipeline) = self.pipeline.take() {
            device.destroy_pipeline(pipeline);
        }
        for module in self.modules.drain(..) {
            device.destroy_shader_module(module);
        }
        if let Some(template) = self.template.take() {
            device.destroy_descriptor_update_template(template);
        }
        if let Some(pipeline_layout) = self.pipeline_layout.take() {
            device.destroy_pipeline_layout(pipeline_layout);
        }
        if let Some(allocation) = self.allocation.take() {
            allocation.destroy(device);
        }
        for set in self.sets.iter() {
            // An id released through an earlier binding is skipped.
            for id in writer::set_resources(set) {
                if let Ok(resource) = self.registry.remove(id) {
                    resource.destroy(device);
                }
            }
        }
        if !self.registry.is_empty() {
            log::debug!("{} resources outside of any set", self.registry.len());
        }
        for resource in self.registry.drain() {
            resource.destroy(device);
        }
        layout::destroy_device_layouts(device, &mut self.sets);
        if let Some((texture, view)) = self.color_target.take() {
            device.destroy_texture_view(view);
            device.destroy_texture(texture);
        }
        if let Some(readback) = self.readback.take() {
            readback.destroy(device);
        }
    }
}

fn missing(what: &str) -> TestError {
    TestError::Internal(format!("{} was not created", what))
}

/// Stages of the graphics pipeline that reads through `stage`.
fn graphics_stages(stage: Stage) -> Vec<Stage> {
    let mut stages = vec![Stage::Vertex];
    match stage {
        Stage::TessellationControl | Stage::TessellationEvaluation => {
            stages.push(Stage::TessellationControl);
            stages.push(Stage::TessellationEvaluation);
        }
        Stage::Geometry => stages.push(Stage::Geometry),
        Stage::Vertex | Stage::Fragment | Stage::Compute => {}
    }
    stages.push(Stage::Fragment);
    stages
}

pub struct TestInstance<A: hal::Api> {
    params: TestParams,
    config: InstanceConfig,
    bindings: Vec<SimpleBinding>,
    caps: CapabilityModel,
    device: A::Device,
    queue: A::Queue,
}

impl<A: hal::Api> TestInstance<A> {
    /// Plans the test and opens a device for it.
    ///
    /// Returns `TestError::NotSupported` if the adapter can't run it.
    pub fn new(
        adapter: &hal::ExposedAdapter<A>,
        params: TestParams,
        config: InstanceConfig,
    ) -> Result<Self, TestError> {
        let bindings = plan::plan_bindings(&params)?;
        let caps = CapabilityModel::new(&adapter.capabilities)
            .with_robust_buffer_access(params.variant == Variant::Robustness);
        caps.check_support(&params, &bindings)?;

        let features = CapabilityModel::required_features(&params, &bindings);
        let hal::OpenDevice { device, queue } =
            unsafe { adapter.adapter.open(features, params.queue)? };
        log::info!(
            "Test {:?} on {} (hash {:#010x})",
            params.variant,
            adapter.info.name,
            params.content_hash()
        );
        Ok(Self {
            params,
            config,
            bindings,
            caps,
            device,
            queue,
        })
    }

    pub fn params(&self) -> &TestParams {
        &self.params
    }

    pub fn bindings(&self) -> &[SimpleBinding] {
        &self.bindings
    }

    /// Runs one iteration and returns its verdict.
    pub fn iterate(&mut self) -> Result<TestStatus, TestError> {
        self.run().map(|report| report.status)
    }

    /// Runs one iteration with fresh objects, and tears them down afterwards.
    pub fn run(&mut self) -> Result<IterationReport, TestError> {
        profiling::scope!("iteration");
        let mut iteration = Iteration::new();
        let result = unsafe { self.execute(&mut iteration) };
        if let Err(ref err) = result {
            log::warn!("Iteration failed: {}", err);
        }
        unsafe { iteration.destroy(&self.device) };
        result
    }

    fn create_flags(&self) -> CreateFlags {
        match self.params.variant {
            Variant::CaptureReplay => CreateFlags::CAPTURE_REPLAY,
            _ => CreateFlags::empty(),
        }
    }

    unsafe fn execute(&mut self, it: &mut Iteration<A>) -> Result<IterationReport, TestError> {
        let params = &self.params;
        let device = &self.device;
        let create_flags = self.create_flags();
        let writer = DescriptorWriter::<A> {
            device,
            caps: &self.caps,
            params,
            hash: params.content_hash(),
            create_flags,
        };

        it.sets = layout::build_set_layouts(&self.bindings)?;
        writer.create_samplers(&mut it.sets, &mut it.registry)?;
        layout::assign_sampler_modes(&mut it.sets, params)?;
        layout::create_device_layouts(device, &mut it.sets, &it.registry, params.stage.to_stages())?;

        it.allocation = Some(alloc::allocate_descriptor_buffers(
            device,
            &self.caps,
            &mut it.sets,
            params.sets_per_buffer,
            self.config.upload_policy,
            create_flags,
        )?);
        let allocation = it.allocation.as_ref().ok_or_else(|| missing("allocation"))?;

        {
            profiling::scope!("write descriptors");
            for (index, set) in it.sets.iter_mut().enumerate() {
                writer.initialize_set(index as u32, set, allocation, &mut it.registry)?;
            }
        }

        let set_layouts = it
            .sets
            .iter()
            .map(|set| set.raw.as_ref().ok_or_else(|| missing("set layout")))
            .collect::<Result<Vec<_>, _>>()?;
        it.pipeline_layout = Some(device.create_pipeline_layout(&hal::PipelineLayoutDescriptor {
            label: Some("descriptor buffer pipeline layout"),
            set_layouts: &set_layouts,
        })?);
        let pipeline_layout = it
            .pipeline_layout
            .as_ref()
            .ok_or_else(|| missing("pipeline layout"))?;

        let program = program::build_program(params, &self.bindings)?;
        let stages = if params.is_compute() {
            vec![Stage::Compute]
        } else {
            graphics_stages(params.stage)
        };
        for &stage in stages.iter() {
            let label = format!("{:?} shader", stage);
            let module = device.create_shader_module(&hal::ShaderModuleDescriptor {
                label: Some(label.as_str()),
                stage,
                program: if stage == params.stage {
                    Some(&program)
                } else {
                    None
                },
            })?;
            it.modules.push(module);
        }
        let modules = it.modules.iter().collect::<Vec<_>>();
        it.pipeline = Some(device.create_pipeline(&hal::PipelineDescriptor {
            label: Some("descriptor buffer pipeline"),
            layout: pipeline_layout,
            bind_point: params.bind_point(),
            flags: hal::PipelineFlags::DESCRIPTOR_BUFFER,
            modules: &modules,
            color_format: if params.is_graphics() {
                Some(TextureFormat::R32Uint)
            } else {
                None
            },
        })?);
        let pipeline = it.pipeline.as_ref().ok_or_else(|| missing("pipeline"))?;

        if params.is_graphics() {
            let texture = device.create_texture(&hal::TextureDescriptor {
                label: Some("color target"),
                size: RENDER_EXTENT,
                format: TextureFormat::R32Uint,
                usage: TextureUses::COLOR_TARGET | TextureUses::TRANSFER_SRC,
                flags: CreateFlags::empty(),
            })?;
            let view = match device.create_texture_view(
                &texture,
                &hal::TextureViewDescriptor {
                    label: Some("color target"),
                    format: TextureFormat::R32Uint,
                    usage: TextureUses::COLOR_TARGET,
                    flags: CreateFlags::empty(),
                },
            ) {
                Ok(view) => view,
                Err(err) => {
                    device.destroy_texture(texture);
                    return Err(err.into());
                }
            };
            it.color_target = Some((texture, view));

            let size = (RENDER_EXTENT.width * TextureFormat::R32Uint.block_size()) as BufferAddress;
            let (raw, mapping) = alloc::create_host_buffer::<A>(
                device,
                &self.caps,
                &hal::BufferDescriptor {
                    label: Some("color readback"),
                    size,
                    usage: BufferUses::TRANSFER_DST | BufferUses::HOST_READ,
                    flags: CreateFlags::empty(),
                },
            )?;
            it.readback = Some(BufferResource {
                raw,
                size,
                address: 0,
                mapping,
            });
        }

        let push_update = if params.is_push_descriptor_test() {
            let index = params.push_descriptor_set_index;
            let set = it
                .sets
                .get(index as usize)
                .ok_or_else(|| missing("push descriptor set"))?;
            let update = PushUpdate::collect(set, &it.registry)?;
            log::debug!(
                "Pushing {} descriptors to set {}",
                update.descriptor_count(),
                index
            );
            if params.variant == Variant::PushTemplate {
                it.template = Some(push::create_template(
                    device,
                    &update,
                    params.bind_point(),
                    pipeline_layout,
                    index,
                )?);
            }
            Some(update)
        } else {
            None
        };

        let set_bindings = it
            .sets
            .iter()
            .map(SetBinding::from_layout)
            .collect::<Result<Vec<_>, _>>()?;
        let buffer_count = allocation.buffers.len() as u32;
        let limits = self.config.bind_limits.unwrap_or_else(|| {
            BindLimits::for_params(params, buffer_count, set_bindings.len() as u32)
        });
        let bind_commands = bind::plan_bind_commands(&set_bindings, buffer_count, limits)?;
        bind::replay(&bind_commands, buffer_count, set_bindings.len() as u32)
            .map_err(TestError::Internal)?;
        log::debug!("Bind sequence with {:?}: {:?}", limits, bind_commands);

        it.encoder = Some(device.create_command_encoder(&hal::CommandEncoderDescriptor {
            label: Some("descriptor buffer test"),
            queue: params.queue,
        })?);
        let encoder = it.encoder.as_mut().ok_or_else(|| missing("command encoder"))?;
        encoder.begin_encoding(Some("descriptor buffer test"))?;
        {
            profiling::scope!("record");
            encoder.bind_pipeline(pipeline);
            writer::record_staged_copies(encoder, &it.sets, allocation)?;
            writer::record_image_uploads(encoder, &it.sets, &it.registry)?;
            bind::encode(
                encoder,
                &bind_commands,
                &allocation.buffers,
                params.bind_point(),
                pipeline_layout,
            );
            if let Some(ref update) = push_update {
                let set = params.push_descriptor_set_index;
                match it.template {
                    Some(ref template) => {
                        update.record_with_template(encoder, template, pipeline_layout, set)
                    }
                    None => update.record(encoder, params.bind_point(), pipeline_layout, set),
                }
            }

            match (&it.color_target, &it.readback) {
                (&Some((ref texture, ref view)), &Some(ref readback)) => {
                    encoder.begin_render_pass(&hal::RenderPassDescriptor {
                        label: Some("descriptor buffer pass"),
                        extent: RENDER_EXTENT,
                        color_target: view,
                    });
                    encoder.draw(0, 6, 0, 1);
                    encoder.end_render_pass();
                    encoder.copy_texture_to_buffer(
                        texture,
                        &readback.raw,
                        std::iter::once(hal::BufferTextureCopy {
                            buffer_offset: 0,
                            size: RENDER_EXTENT,
                        }),
                    );
                    encoder.transition_buffers(std::iter::once(hal::BufferBarrier {
                        buffer: &readback.raw,
                        usage: BufferUses::TRANSFER_DST..BufferUses::HOST_READ,
                    }));
                }
                _ if params.is_graphics() => return Err(missing("color target")),
                _ => encoder.dispatch([1, 1, 1]),
            }
        }
        let cmd_buf = encoder.end_encoding()?;
        {
            profiling::scope!("submit");
            self.queue.submit(&[&cmd_buf])?;
            self.queue.wait_idle()?;
        }

        let words = match it.readback {
            Some(ref readback) => {
                readback.mapping.invalidate::<A>(device, &readback.raw);
                readback.mapping.read_u32s(0, RESULT_BUFFER_DWORDS as usize)?
            }
            None => {
                let result = result_buffer(&it.sets, &it.registry)?;
                result.mapping.invalidate::<A>(device, &result.raw);
                result.mapping.read_u32s(0, RESULT_BUFFER_DWORDS as usize)?
            }
        };
        let payload = ResultPayload::from_words(&words)
            .ok_or_else(|| TestError::Internal("short result payload".to_string()))?;
        let expected = verify::expected_count(params, &self.bindings);
        let status = verify::verify(params, expected, payload);
        log::info!("Result {:?}, expected {}: {}", payload, expected, status);

        Ok(IterationReport {
            status,
            sets: it.sets.iter().map(summarize_set).collect(),
            buffers: allocation
                .buffers
                .iter()
                .map(|buffer| BufferSummary {
                    size: buffer.size,
                    address: buffer.address,
                    usage: buffer.usage,
                    residency: buffer.residency,
                    first_set: buffer.first_set,
                    num_sets: buffer.num_sets,
                })
                .collect(),
            bind_commands,
            payload,
            expected,
        })
    }
}

fn summarize_set<A: hal::Api>(set: &SetLayout<A>) -> SetSummary {
    SetSummary {
        storage: set.storage(),
        size: set.size,
        buffer_index: set.buffer_index,
        buffer_offset: set.buffer_offset,
        staging_offset: set.staging_offset,
        binding_offsets: set.bindings.iter().map(|binding| binding.offset).collect(),
    }
}

/// The storage buffer a compute program writes its result to.
fn result_buffer<'a, A: hal::Api>(
    sets: &[SetLayout<A>],
    registry: &'a Registry<Resource<A>>,
) -> Result<&'a BufferResource<A>, TestError> {
    let id = sets
        .iter()
        .flat_map(|set| set.bindings.iter())
        .find(|binding| binding.is_result_buffer)
        .and_then(|binding| binding.resources.first().copied())
        .ok_or_else(|| missing("result buffer"))?;
    registry
        .get(id)?
        .buffer
        .as_ref()
        .ok_or_else(|| missing("result buffer memory"))
}

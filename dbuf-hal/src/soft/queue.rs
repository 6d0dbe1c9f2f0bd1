use super::{conv, Command as C, Objects, PipelineInfo, PipelineLayoutInfo, Resolved};

use fxhash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Descriptor state of one bind point.
#[derive(Debug, Default)]
struct BindState {
    /// `(buffer index, offset)` of every set pointed into a descriptor buffer.
    set_offsets: FxHashMap<u32, (u32, crate::BufferAddress)>,
    embedded_sets: FxHashSet<u32>,
    pushed: FxHashMap<(u32, u32, u32), Resolved>,
}

#[derive(Debug, Default)]
struct State {
    pipeline: Option<Arc<PipelineInfo>>,
    descriptor_buffers: Vec<Option<crate::DescriptorBufferBinding>>,
    compute: BindState,
    graphics: BindState,
    render_target: Option<u32>,
}

impl State {
    fn bind_state(&mut self, bind_point: crate::BindPoint) -> &mut BindState {
        match bind_point {
            crate::BindPoint::Compute => &mut self.compute,
            crate::BindPoint::Graphics => &mut self.graphics,
        }
    }
}

fn record(result: &mut [u32; 4], probe: &crate::Probe, ok: bool, element: u32) {
    if ok {
        result[0] += 1;
    } else if result[1] == 0 {
        result[1] = probe.failure_tag;
        match probe.failure_detail {
            crate::FailureDetail::None => {}
            crate::FailureDetail::Element => result[2] = element,
            crate::FailureDetail::Value(value) => result[2] = value,
        }
    }
}

/// Evaluates verification programs against a snapshot of the device state.
struct Executor<'a> {
    objects: &'a Objects,
    props: &'a crate::DescriptorBufferProperties,
    robust: bool,
    buffers: &'a [Option<crate::DescriptorBufferBinding>],
    bind: &'a BindState,
    layout: &'a PipelineLayoutInfo,
}

impl<'a> Executor<'a> {
    fn read(&self, address: crate::BufferAddress, size: usize) -> Option<&'a [u8]> {
        self.objects.memory_at(address, size as crate::BufferAddress)
    }

    fn resolve(&self, location: crate::BindingLocation, ty: crate::DescriptorType) -> Option<Resolved> {
        use crate::DescriptorType as Dt;

        let set_layout = self.layout.sets.get(location.set as usize)?;
        let entry = set_layout.entry(location.binding)?;
        if entry.ty != ty || (ty != Dt::InlineUniformBlock && location.array_index >= entry.count)
        {
            return None;
        }
        let element = location.array_index as usize;
        let immutable = entry.immutable_samplers.get(element).cloned();

        if set_layout
            .flags
            .contains(crate::DescriptorSetLayoutFlags::PUSH_DESCRIPTOR)
        {
            let pushed = *self.bind.pushed.get(&(
                location.set,
                location.binding,
                location.array_index,
            ))?;
            return Some(match pushed {
                Resolved::Image { view, layout, sampler } => Resolved::Image {
                    view,
                    layout,
                    sampler: immutable.or(sampler),
                },
                Resolved::Sampler(sampler) => Resolved::Sampler(immutable.unwrap_or(sampler)),
                other => other,
            });
        }

        if set_layout
            .flags
            .contains(crate::DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS)
        {
            if ty != Dt::Sampler || !self.bind.embedded_sets.contains(&location.set) {
                return None;
            }
            return immutable.map(Resolved::Sampler);
        }

        let &(buffer_index, set_offset) = self.bind.set_offsets.get(&location.set)?;
        let binding = (*self.buffers.get(buffer_index as usize)?)?;
        let required = match ty {
            Dt::Sampler => crate::BufferUses::SAMPLER_DESCRIPTORS,
            Dt::CombinedImageSampler => {
                crate::BufferUses::SAMPLER_DESCRIPTORS | crate::BufferUses::RESOURCE_DESCRIPTORS
            }
            _ => crate::BufferUses::RESOURCE_DESCRIPTORS,
        };
        if !binding.usage.contains(required) {
            log::warn!(
                "Set {} reads {:?} from descriptor buffer {} bound with {:?}",
                location.set,
                ty,
                buffer_index,
                binding.usage
            );
            return None;
        }

        let base = binding.address + set_offset + entry.offset;
        let size = conv::descriptor_size(self.props, ty, self.robust);
        let at = base + (element * size) as crate::BufferAddress;
        match ty {
            Dt::Sampler => immutable
                .or_else(|| conv::decode_sampler(self.read(at, size)?))
                .map(Resolved::Sampler),
            Dt::CombinedImageSampler => {
                let image_part = conv::combined_image_part(self.props);
                let sampler_size = self.props.sampler_descriptor_size;
                let (image_at, sampler_at) = if self.props.split_combined_image_samplers {
                    let samplers = base + (entry.count as usize * image_part) as crate::BufferAddress;
                    (
                        base + (element * image_part) as crate::BufferAddress,
                        samplers + (element * sampler_size) as crate::BufferAddress,
                    )
                } else {
                    (at, at + image_part as crate::BufferAddress)
                };
                let image = conv::decode_image(self.read(image_at, image_part)?, ty)?;
                let sampler = immutable
                    .or_else(|| conv::decode_sampler(self.read(sampler_at, sampler_size)?));
                match image {
                    Resolved::Image { view, layout, .. } => Some(Resolved::Image {
                        view,
                        layout,
                        sampler,
                    }),
                    _ => None,
                }
            }
            Dt::SampledImage | Dt::StorageImage | Dt::InputAttachment => {
                conv::decode_image(self.read(at, size)?, ty)
            }
            Dt::UniformTexelBuffer | Dt::StorageTexelBuffer | Dt::UniformBuffer | Dt::StorageBuffer => {
                conv::decode_address(self.read(at, size)?, ty)
            }
            Dt::AccelerationStructure => conv::decode_acceleration_structure(self.read(at, size)?),
            // The block's bytes live in the set itself.
            Dt::InlineUniformBlock => Some(Resolved::Address {
                address: base,
                range: entry.count as crate::BufferAddress,
            }),
        }
    }

    /// Reads dword `index` through an address descriptor.
    fn load(&self, descriptor: Option<Resolved>, index: u32) -> Option<u32> {
        match descriptor? {
            Resolved::Address { address, range } => {
                let offset = 4 * index as crate::BufferAddress;
                if offset + 4 > range {
                    // Out of bounds reads return zero under robust buffer access.
                    return if self.robust { Some(0) } else { None };
                }
                conv::read_u32(self.read(address + offset, 4)?)
            }
            _ => None,
        }
    }

    /// First texel of the image behind a view, if it is in the layout the descriptor claims.
    fn texel(&self, view: u32, layout: crate::TextureLayout) -> Option<u32> {
        let texture = super::get(&self.objects.textures, *super::get(&self.objects.views, view)?)?;
        if texture.layout != layout {
            log::warn!(
                "Image is in {:?} but its descriptor says {:?}",
                texture.layout,
                layout
            );
            return None;
        }
        conv::read_u32(&texture.data)
    }

    /// Samples one texel inside the image and one outside of it.
    fn sample(&self, view: u32, layout: crate::TextureLayout, sampler: u32) -> Option<(u32, [u32; 4])> {
        let inside = self.texel(view, layout)?;
        let state = super::get(&self.objects.samplers, sampler)?;
        let outside = match state.address_mode {
            crate::AddressMode::ClampToBorder => state.border_color.to_uint(),
            crate::AddressMode::ClampToEdge | crate::AddressMode::Repeat => [inside, 0, 0, 1],
        };
        Some((inside, outside))
    }

    fn check(&self, probe: &crate::Probe, result: &mut [u32; 4]) {
        use crate::DescriptorType as Dt;

        let descriptor = self.resolve(probe.location, probe.ty);
        match probe.ty {
            Dt::UniformBuffer
            | Dt::StorageBuffer
            | Dt::InlineUniformBlock
            | Dt::UniformTexelBuffer
            | Dt::StorageTexelBuffer => {
                for index in 0..probe.count {
                    let value = self.load(descriptor, index);
                    let ok = value == Some(probe.expected.wrapping_add(index));
                    record(result, probe, ok, index);
                }
            }
            Dt::StorageImage | Dt::InputAttachment => {
                let value = match descriptor {
                    Some(Resolved::Image { view, layout, .. }) => self.texel(view, layout),
                    _ => None,
                };
                record(result, probe, value == Some(probe.expected), 0);
            }
            Dt::SampledImage | Dt::CombinedImageSampler => {
                let sampler = match (probe.ty, descriptor) {
                    (Dt::CombinedImageSampler, Some(Resolved::Image { sampler, .. })) => sampler,
                    _ => match probe
                        .sampler
                        .and_then(|location| self.resolve(location, Dt::Sampler))
                    {
                        Some(Resolved::Sampler(id)) => Some(id),
                        _ => None,
                    },
                };
                let sampled = match (descriptor, sampler) {
                    (Some(Resolved::Image { view, layout, .. }), Some(sampler)) => {
                        self.sample(view, layout, sampler)
                    }
                    _ => None,
                };
                let ok = match sampled {
                    Some((inside, outside)) => inside == probe.expected && outside == [0, 0, 0, 1],
                    None => false,
                };
                record(result, probe, ok, 0);
            }
            Dt::Sampler => record(result, probe, descriptor.is_some(), 0),
            Dt::AccelerationStructure => {
                log::error!("Acceleration structures can not be traversed");
                record(result, probe, false, 0);
            }
        }
    }

    fn run(&self, program: &crate::VerificationProgram) -> [u32; 4] {
        let mut result = [0; 4];
        for probe in program.probes.iter() {
            self.check(probe, &mut result);
        }
        result
    }
}

impl super::Queue {
    /// Runs the bound pipeline's program, returning its result and the resolved result binding.
    fn execute(
        &self,
        objects: &Objects,
        state: &State,
        bind_point: crate::BindPoint,
    ) -> Option<([u32; 4], Option<Resolved>)> {
        let pipeline = match state.pipeline {
            Some(ref pipeline) if pipeline.bind_point == bind_point => Arc::clone(pipeline),
            _ => {
                log::error!("No {:?} pipeline is bound", bind_point);
                return None;
            }
        };
        let executor = Executor {
            objects,
            props: &self.shared.options.properties,
            robust: self.shared.robust,
            buffers: &state.descriptor_buffers,
            bind: match bind_point {
                crate::BindPoint::Compute => &state.compute,
                crate::BindPoint::Graphics => &state.graphics,
            },
            layout: &pipeline.layout,
        };
        let result = executor.run(&pipeline.program);
        let target = pipeline
            .program
            .result
            .and_then(|location| executor.resolve(location, crate::DescriptorType::StorageBuffer));
        log::debug!("{:?} program produced {:?}", bind_point, result);
        Some((result, target))
    }

    fn process(&self, objects: &mut Objects, state: &mut State, command: &C) {
        match *command {
            C::BindPipeline(ref pipeline) => state.pipeline = Some(Arc::clone(pipeline)),
            C::BindDescriptorBuffers {
                first_buffer,
                ref bindings,
            } => {
                let end = first_buffer as usize + bindings.len();
                if state.descriptor_buffers.len() < end {
                    state.descriptor_buffers.resize(end, None);
                }
                for (slot, binding) in state.descriptor_buffers[first_buffer as usize..]
                    .iter_mut()
                    .zip(bindings.iter())
                {
                    *slot = Some(*binding);
                }
            }
            C::SetDescriptorBufferOffsets {
                bind_point,
                ref layout,
                first_set,
                ref buffer_indices,
                ref offsets,
            } => {
                let bind = state.bind_state(bind_point);
                for (i, (&buffer_index, &offset)) in
                    buffer_indices.iter().zip(offsets.iter()).enumerate()
                {
                    let set = first_set + i as u32;
                    let flags = match layout.sets.get(set as usize) {
                        Some(set_layout) => set_layout.flags,
                        None => {
                            log::error!("Offset set for set {} which is not in the layout", set);
                            continue;
                        }
                    };
                    if flags.intersects(
                        crate::DescriptorSetLayoutFlags::PUSH_DESCRIPTOR
                            | crate::DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS,
                    ) {
                        log::error!("Set {} has no descriptor buffer storage", set);
                        continue;
                    }
                    bind.set_offsets.insert(set, (buffer_index, offset));
                }
            }
            C::BindEmbeddedSamplers {
                bind_point,
                ref layout,
                set,
            } => {
                let embedded = layout.sets.get(set as usize).map_or(false, |set_layout| {
                    set_layout
                        .flags
                        .contains(crate::DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS)
                });
                if embedded {
                    state.bind_state(bind_point).embedded_sets.insert(set);
                } else {
                    log::error!("Set {} has no embedded immutable samplers", set);
                }
            }
            C::PushDescriptors {
                bind_point,
                ref layout,
                set,
                ref descriptors,
            } => {
                let push = layout.sets.get(set as usize).map_or(false, |set_layout| {
                    set_layout
                        .flags
                        .contains(crate::DescriptorSetLayoutFlags::PUSH_DESCRIPTOR)
                });
                if !push {
                    log::error!("Set {} is not a push descriptor set", set);
                    return;
                }
                let bind = state.bind_state(bind_point);
                bind.pushed.retain(|&(pushed_set, _, _), _| pushed_set != set);
                for pushed in descriptors.iter() {
                    bind.pushed.insert(
                        (set, pushed.binding, pushed.array_element),
                        pushed.descriptor,
                    );
                }
            }
            C::CopyBufferToBuffer {
                src,
                dst,
                ref regions,
            } => {
                for region in regions.iter() {
                    let start = region.src_offset as usize;
                    let end = start + region.size as usize;
                    let data = match super::get(&objects.buffers, src)
                        .and_then(|buffer| buffer.memory.as_ref())
                        .and_then(|memory| memory.contents.get(start..end))
                    {
                        Some(data) => data.to_vec(),
                        None => {
                            log::error!("Copy source range {}..{} is out of bounds", start, end);
                            continue;
                        }
                    };
                    let dst_start = region.dst_offset as usize;
                    match super::get_mut(&mut objects.buffers, dst)
                        .and_then(|buffer| buffer.memory.as_mut())
                        .and_then(|memory| memory.contents.get_mut(dst_start..dst_start + data.len()))
                    {
                        Some(target) => target.copy_from_slice(&data),
                        None => log::error!("Copy destination range is out of bounds"),
                    }
                }
            }
            C::CopyBufferToTexture {
                src,
                dst,
                ref regions,
            } => {
                for region in regions.iter() {
                    let (layout, bytes) = match super::get(&objects.textures, dst) {
                        Some(texture)
                            if region.size.width > texture.size.width
                                || region.size.height > texture.size.height =>
                        {
                            log::error!("Copy of {:?} overruns texture {}", region.size, dst);
                            continue;
                        }
                        Some(texture) => (
                            texture.layout,
                            (region.size.width * region.size.height * texture.format.block_size())
                                as usize,
                        ),
                        None => continue,
                    };
                    if layout != crate::TextureLayout::TransferDst {
                        log::warn!("Copy into texture {} in {:?} is ignored", dst, layout);
                        continue;
                    }
                    let start = region.buffer_offset as usize;
                    let data = match super::get(&objects.buffers, src)
                        .and_then(|buffer| buffer.memory.as_ref())
                        .and_then(|memory| memory.contents.get(start..start + bytes))
                    {
                        Some(data) => data.to_vec(),
                        None => continue,
                    };
                    if let Some(texture) = super::get_mut(&mut objects.textures, dst) {
                        let len = data.len().min(texture.data.len());
                        texture.data[..len].copy_from_slice(&data[..len]);
                    }
                }
            }
            C::CopyTextureToBuffer {
                src,
                dst,
                ref regions,
            } => {
                for region in regions.iter() {
                    let data = match super::get(&objects.textures, src) {
                        Some(texture) if texture.layout == crate::TextureLayout::TransferSrc => {
                            let bytes = (region.size.width
                                * region.size.height
                                * texture.format.block_size())
                                as usize;
                            texture.data[..bytes.min(texture.data.len())].to_vec()
                        }
                        Some(texture) => {
                            log::warn!("Copy from texture {} in {:?} is ignored", src, texture.layout);
                            continue;
                        }
                        None => continue,
                    };
                    let start = region.buffer_offset as usize;
                    if let Some(target) = super::get_mut(&mut objects.buffers, dst)
                        .and_then(|buffer| buffer.memory.as_mut())
                        .and_then(|memory| memory.contents.get_mut(start..start + data.len()))
                    {
                        target.copy_from_slice(&data);
                    }
                }
            }
            C::BufferBarrier { buffer, ref usage } => {
                log::trace!("Buffer {} barrier {:?}", buffer, usage);
            }
            C::TextureBarrier {
                texture,
                ref layout,
            } => {
                if let Some(current) = super::get_mut(&mut objects.textures, texture) {
                    if layout.start != crate::TextureLayout::Undefined
                        && layout.start != current.layout
                    {
                        log::warn!(
                            "Texture {} transitioned from {:?} but is in {:?}",
                            texture,
                            layout.start,
                            current.layout
                        );
                    }
                    current.layout = layout.end;
                }
            }
            C::BeginRenderPass { target } => {
                let texture = super::get(&objects.views, target).cloned();
                if let Some(current) =
                    texture.and_then(|id| super::get_mut(&mut objects.textures, id))
                {
                    current.layout = crate::TextureLayout::ColorAttachment;
                }
                state.render_target = texture;
            }
            C::EndRenderPass => {
                // Render passes leave their color target ready to be copied.
                if let Some(target) = state.render_target.take() {
                    if let Some(texture) = super::get_mut(&mut objects.textures, target) {
                        texture.layout = crate::TextureLayout::TransferSrc;
                    }
                }
            }
            C::Draw {
                vertex_count,
                instance_count,
            } => {
                if self.kind != crate::QueueKind::Graphics {
                    log::error!("Draw submitted to a compute queue");
                    return;
                }
                if vertex_count == 0 || instance_count == 0 {
                    return;
                }
                let result = match self.execute(objects, state, crate::BindPoint::Graphics) {
                    Some((result, _)) => result,
                    None => return,
                };
                let target = match state.render_target {
                    Some(target) => target,
                    None => {
                        log::error!("Draw outside of a render pass");
                        return;
                    }
                };
                if let Some(texture) = super::get_mut(&mut objects.textures, target) {
                    match texture.format {
                        // Pixel `i` receives component `i` of the result.
                        crate::TextureFormat::R32Uint => {
                            for (i, pixel) in texture.data.chunks_exact_mut(4).enumerate() {
                                conv::write_words(pixel, &[result[i % result.len()]]);
                            }
                        }
                        crate::TextureFormat::Rgba32Uint => {
                            for pixel in texture.data.chunks_exact_mut(16) {
                                conv::write_words(pixel, &result);
                            }
                        }
                    }
                }
            }
            C::Dispatch(count) => {
                if count.iter().any(|&c| c == 0) {
                    return;
                }
                let (result, target) = match self.execute(objects, state, crate::BindPoint::Compute) {
                    Some(outcome) => outcome,
                    None => return,
                };
                match target {
                    Some(Resolved::Address { address, range }) if range >= 16 => {
                        if let Some(memory) = objects.memory_at_mut(address, 16) {
                            conv::write_words(memory, &result);
                        }
                    }
                    _ => log::error!("Compute result binding is not a storage buffer"),
                }
            }
        }
    }
}

impl crate::Queue<super::Api> for super::Queue {
    unsafe fn submit(
        &mut self,
        command_buffers: &[&super::CommandBuffer],
    ) -> Result<(), crate::DeviceError> {
        let shared = Arc::clone(&self.shared);
        let mut objects = shared.objects.lock();
        for cmd_buf in command_buffers.iter() {
            // Command buffers do not inherit state from each other.
            let mut state = State::default();
            if let Some(ref label) = cmd_buf.label {
                log::debug!("Executing {} with {} commands", label, cmd_buf.commands.len());
            }
            for command in cmd_buf.commands.iter() {
                self.process(&mut objects, &mut state, command);
            }
        }
        Ok(())
    }

    unsafe fn wait_idle(&mut self) -> Result<(), crate::DeviceError> {
        Ok(())
    }
}

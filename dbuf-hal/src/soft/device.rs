use super::{conv, DeviceResult};

use std::{ptr::NonNull, sync::Arc};

fn align_to(value: crate::BufferAddress, alignment: crate::BufferAddress) -> crate::BufferAddress {
    match value % alignment {
        0 => value,
        other => value - other + alignment,
    }
}

impl super::Device {
    /// Places the bindings of a set layout and returns the entries and the total size.
    fn place_bindings(
        &self,
        desc: &crate::DescriptorSetLayoutDescriptor<super::Api>,
    ) -> (Vec<super::SetLayoutEntry>, crate::BufferAddress) {
        let options = &self.shared.options;
        let embedded = desc
            .flags
            .contains(crate::DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS);

        let mut sorted = desc.entries.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|entry| entry.binding);

        let mut offset = options.set_header_size;
        let mut entries = Vec::with_capacity(sorted.len());
        for entry in sorted {
            let size = match entry.ty {
                crate::DescriptorType::InlineUniformBlock => entry.count as crate::BufferAddress,
                crate::DescriptorType::Sampler if embedded => 0,
                ty => (self.shared.descriptor_size(ty) * entry.count as usize) as crate::BufferAddress,
            };
            offset = align_to(offset, options.binding_alignment);
            entries.push(super::SetLayoutEntry {
                binding: entry.binding,
                ty: entry.ty,
                count: entry.count,
                offset,
                immutable_samplers: entry
                    .immutable_samplers
                    .iter()
                    .map(|sampler| sampler.id)
                    .collect(),
            });
            offset += size;
        }
        (entries, align_to(offset, options.binding_alignment))
    }
}

impl crate::Device<super::Api> for super::Device {
    unsafe fn create_buffer(&self, desc: &crate::BufferDescriptor) -> DeviceResult<super::Buffer> {
        let mut objects = self.shared.objects.lock();
        let id = super::insert(
            &mut objects.buffers,
            super::BufferState {
                size: desc.size,
                usage: desc.usage,
                memory: None,
                address: 0,
            },
        );
        log::trace!("Created buffer {} {:?} of {} bytes", id, desc.label, desc.size);
        Ok(super::Buffer {
            id,
            size: desc.size,
            usage: desc.usage,
            address: 0,
        })
    }

    unsafe fn destroy_buffer(&self, buffer: super::Buffer) {
        super::remove(&mut self.shared.objects.lock().buffers, buffer.id);
    }

    unsafe fn buffer_memory_requirements(
        &self,
        buffer: &super::Buffer,
    ) -> crate::MemoryRequirements {
        let options = &self.shared.options;
        let mut memory_type_bits = (0..options.memory_types.len())
            .fold(0, |bits, index| bits | super::type_bit(index));
        if buffer.usage.intersects(crate::BufferUses::DESCRIPTOR_BUFFER) {
            memory_type_bits &= options.descriptor_buffer_memory_types;
        }
        crate::MemoryRequirements {
            size: align_to(buffer.size.max(1), 4),
            alignment: super::ADDRESS_ALIGNMENT,
            memory_type_bits,
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: &mut super::Buffer,
        memory_type: u32,
    ) -> DeviceResult<()> {
        let flags = self
            .shared
            .options
            .memory_types
            .get(memory_type as usize)
            .ok_or(crate::DeviceError::IncompatibleMemoryType(memory_type))?
            .flags;
        let reqs = crate::Device::buffer_memory_requirements(self, buffer);
        if reqs.memory_type_bits & super::type_bit(memory_type as usize) == 0 {
            return Err(crate::DeviceError::IncompatibleMemoryType(memory_type));
        }

        let mut objects = self.shared.objects.lock();
        if objects.next_address == 0 {
            objects.next_address = super::BASE_ADDRESS;
        }
        let address = objects.next_address;
        let state =
            super::get_mut(&mut objects.buffers, buffer.id).ok_or(crate::DeviceError::Lost)?;

        let size = state.size.max(1) as usize;
        let host_visible = flags.contains(crate::MemoryFlags::HOST_VISIBLE);
        let coherent = flags.contains(crate::MemoryFlags::HOST_COHERENT);
        state.memory = Some(super::Memory {
            flags,
            contents: vec![0; size].into_boxed_slice(),
            shadow: if host_visible && !coherent {
                Some(vec![0; size].into_boxed_slice())
            } else {
                None
            },
        });
        if state
            .usage
            .contains(crate::BufferUses::SHADER_DEVICE_ADDRESS)
        {
            state.address = address;
            buffer.address = address;
            objects.next_address = align_to(address + size as u64, super::ADDRESS_ALIGNMENT);
        }
        Ok(())
    }

    unsafe fn buffer_device_address(&self, buffer: &super::Buffer) -> crate::BufferAddress {
        buffer.address
    }

    unsafe fn map_buffer(&self, buffer: &super::Buffer) -> DeviceResult<crate::BufferMapping> {
        let mut objects = self.shared.objects.lock();
        let state =
            super::get_mut(&mut objects.buffers, buffer.id).ok_or(crate::DeviceError::Lost)?;
        let memory = state
            .memory
            .as_mut()
            .ok_or(crate::DeviceError::NotMappable)?;
        if !memory.flags.contains(crate::MemoryFlags::HOST_VISIBLE) {
            return Err(crate::DeviceError::NotMappable);
        }
        let is_coherent = memory.shadow.is_none();
        let host = match memory.shadow {
            Some(ref mut shadow) => shadow,
            None => &mut memory.contents,
        };
        Ok(crate::BufferMapping {
            ptr: NonNull::new_unchecked(host.as_mut_ptr()),
            is_coherent,
        })
    }

    unsafe fn unmap_buffer(&self, _buffer: &super::Buffer) -> DeviceResult<()> {
        Ok(())
    }

    unsafe fn flush_mapped_ranges<I>(&self, buffer: &super::Buffer, ranges: I)
    where
        I: Iterator<Item = crate::MemoryRange>,
    {
        let mut objects = self.shared.objects.lock();
        let memory = match super::get_mut(&mut objects.buffers, buffer.id)
            .and_then(|state| state.memory.as_mut())
        {
            Some(memory) => memory,
            None => return,
        };
        if let Some(ref shadow) = memory.shadow {
            for range in ranges {
                let range = range.start as usize..(range.end as usize).min(shadow.len());
                memory.contents[range.clone()].copy_from_slice(&shadow[range]);
            }
        }
    }

    unsafe fn invalidate_mapped_ranges<I>(&self, buffer: &super::Buffer, ranges: I)
    where
        I: Iterator<Item = crate::MemoryRange>,
    {
        let mut objects = self.shared.objects.lock();
        let memory = match super::get_mut(&mut objects.buffers, buffer.id)
            .and_then(|state| state.memory.as_mut())
        {
            Some(memory) => memory,
            None => return,
        };
        if let Some(ref mut shadow) = memory.shadow {
            for range in ranges {
                let range = range.start as usize..(range.end as usize).min(shadow.len());
                shadow[range.clone()].copy_from_slice(&memory.contents[range]);
            }
        }
    }

    unsafe fn create_buffer_view(
        &self,
        buffer: &super::Buffer,
        desc: &crate::BufferViewDescriptor,
    ) -> DeviceResult<super::BufferView> {
        Ok(super::BufferView {
            id: buffer.id,
            address: buffer.address + desc.range.start,
            range: desc.range.end - desc.range.start,
            format: desc.format,
        })
    }

    unsafe fn destroy_buffer_view(&self, _view: super::BufferView) {}

    unsafe fn create_texture(&self, desc: &crate::TextureDescriptor) -> DeviceResult<super::Texture> {
        let size = (desc.size.width * desc.size.height * desc.format.block_size()) as usize;
        let id = super::insert(
            &mut self.shared.objects.lock().textures,
            super::TextureState {
                size: desc.size,
                format: desc.format,
                layout: crate::TextureLayout::Undefined,
                data: vec![0; size],
            },
        );
        Ok(super::Texture { id })
    }

    unsafe fn destroy_texture(&self, texture: super::Texture) {
        super::remove(&mut self.shared.objects.lock().textures, texture.id);
    }

    unsafe fn create_texture_view(
        &self,
        texture: &super::Texture,
        _desc: &crate::TextureViewDescriptor,
    ) -> DeviceResult<super::TextureView> {
        let id = super::insert(&mut self.shared.objects.lock().views, texture.id);
        Ok(super::TextureView { id })
    }

    unsafe fn destroy_texture_view(&self, view: super::TextureView) {
        super::remove(&mut self.shared.objects.lock().views, view.id);
    }

    unsafe fn create_sampler(&self, desc: &crate::SamplerDescriptor) -> DeviceResult<super::Sampler> {
        let state = super::SamplerState {
            address_mode: desc.address_mode,
            border_color: desc.border_color,
        };
        let id = super::insert(&mut self.shared.objects.lock().samplers, state);
        Ok(super::Sampler { id, state })
    }

    unsafe fn destroy_sampler(&self, sampler: super::Sampler) {
        super::remove(&mut self.shared.objects.lock().samplers, sampler.id);
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        desc: &crate::DescriptorSetLayoutDescriptor<super::Api>,
    ) -> DeviceResult<super::DescriptorSetLayout> {
        let (entries, size) = self.place_bindings(desc);
        log::debug!(
            "Set layout {:?} with {} bindings occupies {} bytes",
            desc.label,
            entries.len(),
            size
        );
        Ok(super::DescriptorSetLayout {
            info: Arc::new(super::SetLayoutInfo {
                flags: desc.flags,
                entries,
                size,
            }),
        })
    }

    unsafe fn destroy_descriptor_set_layout(&self, _layout: super::DescriptorSetLayout) {}

    unsafe fn descriptor_set_layout_size(
        &self,
        layout: &super::DescriptorSetLayout,
    ) -> crate::BufferAddress {
        layout.info.size
    }

    unsafe fn descriptor_set_layout_binding_offset(
        &self,
        layout: &super::DescriptorSetLayout,
        binding: u32,
    ) -> crate::BufferAddress {
        layout.info.entry(binding).map_or(0, |entry| entry.offset)
    }

    unsafe fn get_descriptor(&self, data: &crate::DescriptorData<super::Api>, dst: &mut [u8]) {
        use crate::DescriptorData as Dd;

        let ty = data.ty();
        if dst.len() < conv::payload_size(ty) {
            log::error!(
                "Descriptor of {:?} needs {} bytes, got {}",
                ty,
                conv::payload_size(ty),
                dst.len()
            );
            return;
        }
        for byte in dst.iter_mut() {
            *byte = 0;
        }
        match *data {
            Dd::Sampler(sampler) => conv::encode_sampler(dst, Some(sampler)),
            Dd::CombinedImageSampler { ref image, sampler } => {
                let split = conv::combined_image_part(&self.shared.options.properties);
                let (image_part, sampler_part) = dst.split_at_mut(split);
                conv::encode_image(image_part, ty, image);
                conv::encode_sampler(sampler_part, sampler);
            }
            Dd::SampledImage(ref image)
            | Dd::StorageImage(ref image)
            | Dd::InputAttachment(ref image) => conv::encode_image(dst, ty, image),
            Dd::UniformTexelBuffer(ref info)
            | Dd::StorageTexelBuffer(ref info)
            | Dd::UniformBuffer(ref info)
            | Dd::StorageBuffer(ref info) => conv::encode_address(dst, ty, info),
            Dd::AccelerationStructure(address) => {
                conv::encode_acceleration_structure(dst, address)
            }
        }
    }

    unsafe fn create_pipeline_layout(
        &self,
        desc: &crate::PipelineLayoutDescriptor<super::Api>,
    ) -> DeviceResult<super::PipelineLayout> {
        Ok(super::PipelineLayout {
            info: Arc::new(super::PipelineLayoutInfo {
                sets: desc
                    .set_layouts
                    .iter()
                    .map(|layout| Arc::clone(&layout.info))
                    .collect(),
            }),
        })
    }

    unsafe fn destroy_pipeline_layout(&self, _pipeline_layout: super::PipelineLayout) {}

    unsafe fn create_descriptor_update_template(
        &self,
        desc: &crate::DescriptorUpdateTemplateDescriptor<super::Api>,
    ) -> DeviceResult<super::DescriptorUpdateTemplate> {
        let push = desc
            .layout
            .info
            .sets
            .get(desc.set as usize)
            .map_or(false, |set| {
                set.flags
                    .contains(crate::DescriptorSetLayoutFlags::PUSH_DESCRIPTOR)
            });
        if !push {
            log::warn!(
                "Update template {:?} targets set {} which is not a push descriptor set",
                desc.label,
                desc.set
            );
        }
        Ok(super::DescriptorUpdateTemplate {
            bind_point: desc.bind_point,
            entries: desc.entries.to_vec(),
        })
    }

    unsafe fn destroy_descriptor_update_template(&self, _template: super::DescriptorUpdateTemplate) {}

    unsafe fn create_shader_module(
        &self,
        desc: &crate::ShaderModuleDescriptor,
    ) -> Result<super::ShaderModule, crate::ShaderError> {
        if let Some(program) = desc.program {
            if desc.stage == crate::ShaderStage::Compute && program.result.is_none() {
                return Err(crate::ShaderError::Compilation(
                    "compute program has no result binding".to_string(),
                ));
            }
        }
        Ok(super::ShaderModule {
            stage: desc.stage,
            program: desc.program.map(|program| Arc::new(program.clone())),
        })
    }

    unsafe fn destroy_shader_module(&self, _module: super::ShaderModule) {}

    unsafe fn create_pipeline(
        &self,
        desc: &crate::PipelineDescriptor<super::Api>,
    ) -> Result<super::Pipeline, crate::PipelineError> {
        let mut programs = desc
            .modules
            .iter()
            .filter_map(|module| Some((module.stage, module.program.as_ref()?)));
        let (stage, program) = programs.next().ok_or_else(|| {
            crate::PipelineError::Linkage(
                match desc.bind_point {
                    crate::BindPoint::Compute => crate::ShaderStage::Compute,
                    crate::BindPoint::Graphics => crate::ShaderStage::Fragment,
                },
                "no stage verifies anything".to_string(),
            )
        })?;
        if let Some((other, _)) = programs.next() {
            return Err(crate::PipelineError::Linkage(
                other,
                "only one stage may carry a verification program".to_string(),
            ));
        }
        if desc.bind_point == crate::BindPoint::Graphics && desc.color_format.is_none() {
            return Err(crate::PipelineError::Linkage(
                stage,
                "graphics pipelines need a color target".to_string(),
            ));
        }
        log::debug!(
            "Pipeline {:?} verifies {} probes in the {:?} stage",
            desc.label,
            program.probes.len(),
            stage
        );
        Ok(super::Pipeline {
            info: Arc::new(super::PipelineInfo {
                bind_point: desc.bind_point,
                layout: Arc::clone(&desc.layout.info),
                program: Arc::clone(program),
            }),
        })
    }

    unsafe fn destroy_pipeline(&self, _pipeline: super::Pipeline) {}

    unsafe fn create_command_encoder(
        &self,
        desc: &crate::CommandEncoderDescriptor,
    ) -> DeviceResult<super::CommandEncoder> {
        Ok(super::CommandEncoder {
            shared: Arc::clone(&self.shared),
            queue: desc.queue,
            cmd_buffer: super::CommandBuffer::default(),
            in_render_pass: false,
        })
    }

    unsafe fn destroy_command_encoder(&self, _encoder: super::CommandEncoder) {}
}

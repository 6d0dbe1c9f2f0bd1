use super::{Command as C, PushedDescriptor, Resolved};

use std::{mem, sync::Arc};

fn resolve_resource(resource: &crate::DescriptorResource<super::Api>) -> Resolved {
    use crate::DescriptorResource as Dr;
    match *resource {
        Dr::Sampler(sampler) => Resolved::Sampler(sampler.id),
        Dr::Image {
            view,
            layout,
            sampler,
        } => Resolved::Image {
            view: view.id,
            layout,
            sampler: sampler.map(|sampler| sampler.id),
        },
        Dr::TexelBuffer(view) => {
            log::trace!("Pushing texel buffer view of buffer {} as {:?}", view.id, view.format);
            Resolved::Address {
                address: view.address,
                range: view.range,
            }
        }
        Dr::Buffer(ref binding) => Resolved::Address {
            address: binding.buffer.address + binding.offset,
            range: binding.size,
        },
    }
}

impl super::CommandBuffer {
    fn clear(&mut self) {
        self.label = None;
        self.commands.clear();
    }
}

impl crate::CommandEncoder<super::Api> for super::CommandEncoder {
    unsafe fn begin_encoding(&mut self, label: crate::Label) -> Result<(), crate::DeviceError> {
        self.cmd_buffer.clear();
        self.cmd_buffer.label = label.map(str::to_string);
        self.in_render_pass = false;
        Ok(())
    }
    unsafe fn discard_encoding(&mut self) {
        self.cmd_buffer.clear();
    }
    unsafe fn end_encoding(&mut self) -> Result<super::CommandBuffer, crate::DeviceError> {
        if self.in_render_pass {
            log::error!("Command buffer ended inside a render pass");
        }
        Ok(mem::take(&mut self.cmd_buffer))
    }

    unsafe fn transition_buffers<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = crate::BufferBarrier<'a, super::Api>>,
    {
        for bar in barriers {
            self.cmd_buffer.commands.push(C::BufferBarrier {
                buffer: bar.buffer.id,
                usage: bar.usage,
            });
        }
    }

    unsafe fn transition_textures<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = crate::TextureBarrier<'a, super::Api>>,
    {
        for bar in barriers {
            self.cmd_buffer.commands.push(C::TextureBarrier {
                texture: bar.texture.id,
                layout: bar.layout,
            });
        }
    }

    unsafe fn copy_buffer_to_buffer<T>(
        &mut self,
        src: &super::Buffer,
        dst: &super::Buffer,
        regions: T,
    ) where
        T: Iterator<Item = crate::BufferCopy>,
    {
        self.cmd_buffer.commands.push(C::CopyBufferToBuffer {
            src: src.id,
            dst: dst.id,
            regions: regions.collect(),
        });
    }

    unsafe fn copy_buffer_to_texture<T>(
        &mut self,
        src: &super::Buffer,
        dst: &super::Texture,
        regions: T,
    ) where
        T: Iterator<Item = crate::BufferTextureCopy>,
    {
        self.cmd_buffer.commands.push(C::CopyBufferToTexture {
            src: src.id,
            dst: dst.id,
            regions: regions.collect(),
        });
    }

    unsafe fn copy_texture_to_buffer<T>(
        &mut self,
        src: &super::Texture,
        dst: &super::Buffer,
        regions: T,
    ) where
        T: Iterator<Item = crate::BufferTextureCopy>,
    {
        self.cmd_buffer.commands.push(C::CopyTextureToBuffer {
            src: src.id,
            dst: dst.id,
            regions: regions.collect(),
        });
    }

    unsafe fn bind_pipeline(&mut self, pipeline: &super::Pipeline) {
        self.cmd_buffer
            .commands
            .push(C::BindPipeline(Arc::clone(&pipeline.info)));
    }

    unsafe fn bind_descriptor_buffers(
        &mut self,
        first_buffer: u32,
        bindings: &[crate::DescriptorBufferBinding],
    ) {
        let max = self.shared.options.properties.max_descriptor_buffer_bindings;
        if first_buffer as usize + bindings.len() > max as usize {
            log::error!(
                "Binding descriptor buffers {}..{} exceeds the limit of {}",
                first_buffer,
                first_buffer as usize + bindings.len(),
                max
            );
        }
        self.cmd_buffer.commands.push(C::BindDescriptorBuffers {
            first_buffer,
            bindings: bindings.to_vec(),
        });
    }

    unsafe fn set_descriptor_buffer_offsets(
        &mut self,
        bind_point: crate::BindPoint,
        layout: &super::PipelineLayout,
        first_set: u32,
        buffer_indices: &[u32],
        offsets: &[crate::BufferAddress],
    ) {
        let alignment = self
            .shared
            .options
            .properties
            .descriptor_buffer_offset_alignment;
        if let Some(offset) = offsets.iter().find(|&&offset| offset % alignment != 0) {
            log::error!(
                "Descriptor buffer offset {} is not aligned to {}",
                offset,
                alignment
            );
        }
        self.cmd_buffer.commands.push(C::SetDescriptorBufferOffsets {
            bind_point,
            layout: Arc::clone(&layout.info),
            first_set,
            buffer_indices: buffer_indices.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    unsafe fn bind_descriptor_buffer_embedded_samplers(
        &mut self,
        bind_point: crate::BindPoint,
        layout: &super::PipelineLayout,
        set: u32,
    ) {
        self.cmd_buffer.commands.push(C::BindEmbeddedSamplers {
            bind_point,
            layout: Arc::clone(&layout.info),
            set,
        });
    }

    unsafe fn push_descriptor_set(
        &mut self,
        bind_point: crate::BindPoint,
        layout: &super::PipelineLayout,
        set: u32,
        writes: &[crate::DescriptorWrite<super::Api>],
    ) {
        let mut descriptors = Vec::new();
        for write in writes {
            for (index, resource) in write.resources.iter().enumerate() {
                descriptors.push(PushedDescriptor {
                    binding: write.binding,
                    array_element: write.array_element + index as u32,
                    descriptor: resolve_resource(resource),
                });
            }
        }
        self.cmd_buffer.commands.push(C::PushDescriptors {
            bind_point,
            layout: Arc::clone(&layout.info),
            set,
            descriptors,
        });
    }

    unsafe fn push_descriptor_set_with_template(
        &mut self,
        template: &super::DescriptorUpdateTemplate,
        layout: &super::PipelineLayout,
        set: u32,
        data: &[crate::DescriptorResource<super::Api>],
    ) {
        let mut descriptors = Vec::new();
        for entry in template.entries.iter() {
            for index in 0..entry.count as usize {
                let resource = match data.get(entry.offset + index * entry.stride) {
                    Some(resource) => resource,
                    None => {
                        log::error!(
                            "Update template entry for binding {} reads past the data",
                            entry.binding
                        );
                        continue;
                    }
                };
                descriptors.push(PushedDescriptor {
                    binding: entry.binding,
                    array_element: entry.array_element + index as u32,
                    descriptor: resolve_resource(resource),
                });
            }
        }
        self.cmd_buffer.commands.push(C::PushDescriptors {
            bind_point: template.bind_point,
            layout: Arc::clone(&layout.info),
            set,
            descriptors,
        });
    }

    unsafe fn begin_render_pass(&mut self, desc: &crate::RenderPassDescriptor<super::Api>) {
        if self.queue != crate::QueueKind::Graphics {
            log::error!("Render pass {:?} recorded on a compute queue", desc.label);
        }
        self.in_render_pass = true;
        self.cmd_buffer.commands.push(C::BeginRenderPass {
            target: desc.color_target.id,
        });
    }

    unsafe fn end_render_pass(&mut self) {
        self.in_render_pass = false;
        self.cmd_buffer.commands.push(C::EndRenderPass);
    }

    unsafe fn draw(
        &mut self,
        _start_vertex: u32,
        vertex_count: u32,
        _start_instance: u32,
        instance_count: u32,
    ) {
        self.cmd_buffer.commands.push(C::Draw {
            vertex_count,
            instance_count,
        });
    }

    unsafe fn dispatch(&mut self, count: [u32; 3]) {
        self.cmd_buffer.commands.push(C::Dispatch(count));
    }
}

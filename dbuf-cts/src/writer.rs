//! Creates the resources behind every binding and serializes their descriptors.

use hal::{
    BufferAddress, BufferUses, CommandEncoder as _, CreateFlags, DescriptorAddressInfo,
    DescriptorData, Device as _, ImageDescriptorInfo, TextureFormat, TextureLayout, TextureUses,
};

use crate::{
    alloc::{self, DescriptorBufferAllocation, HostMapping},
    binding::{expected_data, DescriptorKind},
    caps::CapabilityModel,
    error::TestError,
    layout::{BindingRecord, SetLayout, SetStorage},
    params::{TestParams, Variant},
    registry::{BufferResource, ImageResource, Registry, Resource, ResourceId},
    INLINE_BLOCK_DWORDS, RENDER_EXTENT, RESULT_BUFFER_DWORDS, UNIFORM_BUFFER_DWORDS,
};

/// Rearranges an array of combined image sampler descriptors in place.
///
/// `[image0, sampler0, image1, sampler1, ..]` becomes
/// `[image0, image1, .., sampler0, sampler1, ..]`. The span keeps its size.
pub fn split_combined_image_samplers(
    span: &mut [u8],
    count: usize,
    image_size: usize,
    sampler_size: usize,
) -> Result<(), TestError> {
    let combined_size = image_size + sampler_size;
    if span.len() != count * combined_size {
        return Err(TestError::Internal(format!(
            "split span is {} bytes, expected {} elements of {}",
            span.len(),
            count,
            combined_size
        )));
    }
    let scratch = span.to_vec();
    for byte in span.iter_mut() {
        *byte = 0;
    }
    let samplers_start = count * image_size;
    for (index, element) in scratch.chunks_exact(combined_size).enumerate() {
        let (image, sampler) = element.split_at(image_size);
        span[index * image_size..(index + 1) * image_size].copy_from_slice(image);
        let start = samplers_start + index * sampler_size;
        span[start..start + sampler_size].copy_from_slice(sampler);
    }
    Ok(())
}

/// Value written to element `array_index` of a binding.
///
/// Input attachments are numbered by attachment index rather than array index.
pub fn binding_data(hash: u32, set: u32, binding: &BindingRecord, array_index: u32) -> u32 {
    let index = match binding.kind {
        DescriptorKind::InputAttachment => binding.input_attachment_index + array_index,
        _ => array_index,
    };
    expected_data(hash, set, binding.binding, index)
}

/// Host memory the descriptors of a set are written to.
struct SetTarget<'m, A: hal::Api> {
    buffer: &'m A::Buffer,
    mapping: &'m HostMapping,
    /// Offset of the set inside the mapping.
    base: BufferAddress,
}

pub struct DescriptorWriter<'a, A: hal::Api> {
    pub device: &'a A::Device,
    pub caps: &'a CapabilityModel,
    pub params: &'a TestParams,
    /// Salt of every value written.
    pub hash: u32,
    pub create_flags: CreateFlags,
}

impl<'a, A: hal::Api> DescriptorWriter<'a, A> {
    /// Creates one sampler per element of every sampler and combined binding.
    ///
    /// Runs before the device layouts exist, so that they can take immutable samplers.
    pub unsafe fn create_samplers(
        &self,
        sets: &mut [SetLayout<A>],
        registry: &mut Registry<Resource<A>>,
    ) -> Result<(), TestError> {
        for (set_index, set) in sets.iter_mut().enumerate() {
            for binding in set.bindings.iter_mut() {
                if !binding.kind.uses_sampler() {
                    continue;
                }
                for array_index in 0..binding.count {
                    let label = format!(
                        "sampler ({}, {}, {})",
                        set_index, binding.binding, array_index
                    );
                    let sampler = self.device.create_sampler(&hal::SamplerDescriptor {
                        label: Some(label.as_str()),
                        mag_filter: hal::FilterMode::Nearest,
                        min_filter: hal::FilterMode::Nearest,
                        address_mode: hal::AddressMode::ClampToBorder,
                        border_color: hal::BorderColor::IntOpaqueBlack,
                        flags: self.create_flags,
                    })?;
                    let id = registry.insert(Resource {
                        sampler: Some(sampler),
                        ..Resource::empty()
                    });
                    binding.resources.push(id);
                }
            }
        }
        Ok(())
    }

    /// Creates the resources of a set and writes its descriptors.
    ///
    /// Push descriptor sets only get resources. Embedded sampler sets are left alone.
    pub unsafe fn initialize_set(
        &self,
        set_index: u32,
        set: &mut SetLayout<A>,
        allocation: &DescriptorBufferAllocation<A>,
        registry: &mut Registry<Resource<A>>,
    ) -> Result<(), TestError> {
        let storage = set.storage();
        if storage == SetStorage::EmbeddedSamplers {
            return Ok(());
        }

        for binding in set.bindings.iter_mut() {
            self.create_binding_resources(set_index, binding, registry)?;
        }
        if storage == SetStorage::PushDescriptors {
            return Ok(());
        }

        let target = self.target(set, allocation)?;
        for binding in set.bindings.iter() {
            self.write_binding(set_index, binding, &target, registry)?;
        }
        target.mapping.flush::<A>(self.device, target.buffer);
        Ok(())
    }

    fn target<'m>(
        &self,
        set: &SetLayout<A>,
        allocation: &'m DescriptorBufferAllocation<A>,
    ) -> Result<SetTarget<'m, A>, TestError> {
        if let Some(offset) = set.staging_offset {
            let staging = allocation.staging.as_ref().ok_or_else(|| {
                TestError::Internal("staged set without a staging buffer".to_string())
            })?;
            return Ok(SetTarget {
                buffer: &staging.raw,
                mapping: &staging.mapping,
                base: offset,
            });
        }
        let buffer = set
            .buffer_index
            .and_then(|index| allocation.buffers.get(index as usize))
            .ok_or_else(|| TestError::Internal("set has no descriptor buffer".to_string()))?;
        let mapping = buffer.mapping.as_ref().ok_or_else(|| {
            TestError::Internal("direct descriptor buffer is not mapped".to_string())
        })?;
        Ok(SetTarget {
            buffer: &buffer.raw,
            mapping,
            base: set.buffer_offset,
        })
    }

    unsafe fn create_binding_resources(
        &self,
        set_index: u32,
        binding: &mut BindingRecord,
        registry: &mut Registry<Resource<A>>,
    ) -> Result<(), TestError> {
        for array_index in 0..binding.count {
            let existing = binding.resources.get(array_index as usize).copied();
            match binding.kind {
                DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => {
                    let buffer = self.create_buffer_resource(set_index, binding, array_index)?;
                    binding.resources.push(registry.insert(Resource {
                        buffer: Some(buffer),
                        ..Resource::empty()
                    }));
                }
                DescriptorKind::UniformTexelBuffer | DescriptorKind::StorageTexelBuffer => {
                    let resource = self.create_texel_buffer_resource(set_index, binding, array_index)?;
                    binding.resources.push(registry.insert(resource));
                }
                DescriptorKind::SampledImage
                | DescriptorKind::StorageImage
                | DescriptorKind::InputAttachment
                | DescriptorKind::CombinedImageSampler => {
                    let image = self.create_image_resource(set_index, binding, array_index)?;
                    match existing {
                        // Combined bindings already hold their sampler.
                        Some(id) => registry.get_mut(id)?.image = Some(image),
                        None => binding.resources.push(registry.insert(Resource {
                            image: Some(image),
                            ..Resource::empty()
                        })),
                    }
                }
                DescriptorKind::Sampler => {
                    if existing.is_none() {
                        return Err(TestError::Internal(format!(
                            "sampler binding {} of set {} has no sampler",
                            binding.binding, set_index
                        )));
                    }
                }
                DescriptorKind::InlineUniformBlock => {}
                DescriptorKind::AccelerationStructure => {
                    return Err(TestError::NotImplemented(
                        "acceleration structure descriptors".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    unsafe fn create_buffer_resource(
        &self,
        set_index: u32,
        binding: &BindingRecord,
        array_index: u32,
    ) -> Result<BufferResource<A>, TestError> {
        let (usage, dwords) = match binding.kind {
            DescriptorKind::UniformBuffer => (BufferUses::UNIFORM, UNIFORM_BUFFER_DWORDS),
            _ if binding.is_result_buffer => (BufferUses::STORAGE, RESULT_BUFFER_DWORDS),
            _ => (BufferUses::STORAGE, UNIFORM_BUFFER_DWORDS),
        };
        let size = dwords as BufferAddress * 4;
        let label = format!("buffer ({}, {}, {})", set_index, binding.binding, array_index);
        let (raw, mapping) = alloc::create_host_buffer::<A>(
            self.device,
            self.caps,
            &hal::BufferDescriptor {
                label: Some(label.as_str()),
                size,
                usage: usage | BufferUses::SHADER_DEVICE_ADDRESS,
                flags: self.create_flags,
            },
        )?;
        if binding.is_result_buffer {
            mapping.write_u32s(0, (0..dwords).map(|_| 0))?;
        } else {
            let data = binding_data(self.hash, set_index, binding, array_index);
            mapping.write_u32s(0, (0..dwords).map(|i| data.wrapping_add(i)))?;
        }
        mapping.flush::<A>(self.device, &raw);
        let address = self.device.buffer_device_address(&raw);
        Ok(BufferResource {
            raw,
            size,
            address,
            mapping,
        })
    }

    unsafe fn create_texel_buffer_resource(
        &self,
        set_index: u32,
        binding: &BindingRecord,
        array_index: u32,
    ) -> Result<Resource<A>, TestError> {
        let usage = match binding.kind {
            DescriptorKind::UniformTexelBuffer => BufferUses::UNIFORM_TEXEL,
            _ => BufferUses::STORAGE_TEXEL,
        };
        let size = TextureFormat::R32Uint.block_size() as BufferAddress;
        let label = format!("texel buffer ({}, {}, {})", set_index, binding.binding, array_index);
        let (raw, mapping) = alloc::create_host_buffer::<A>(
            self.device,
            self.caps,
            &hal::BufferDescriptor {
                label: Some(label.as_str()),
                size,
                usage: usage | BufferUses::SHADER_DEVICE_ADDRESS,
                flags: self.create_flags,
            },
        )?;
        let data = binding_data(self.hash, set_index, binding, array_index);
        mapping.write_u32s(0, std::iter::once(data))?;
        mapping.flush::<A>(self.device, &raw);
        let address = self.device.buffer_device_address(&raw);

        // Push descriptors reference texel buffers through views.
        let buffer_view = if self.params.is_push_descriptor_test() {
            Some(self.device.create_buffer_view(
                &raw,
                &hal::BufferViewDescriptor {
                    label: Some(label.as_str()),
                    format: TextureFormat::R32Uint,
                    range: 0..size,
                },
            )?)
        } else {
            None
        };
        Ok(Resource {
            buffer: Some(BufferResource {
                raw,
                size,
                address,
                mapping,
            }),
            buffer_view,
            ..Resource::empty()
        })
    }

    unsafe fn create_image_resource(
        &self,
        set_index: u32,
        binding: &BindingRecord,
        array_index: u32,
    ) -> Result<ImageResource<A>, TestError> {
        let (usage, layout) = match binding.kind {
            DescriptorKind::StorageImage => (TextureUses::STORAGE, TextureLayout::General),
            DescriptorKind::InputAttachment => {
                (TextureUses::INPUT_ATTACHMENT, TextureLayout::ShaderReadOnly)
            }
            _ => (TextureUses::SAMPLED, TextureLayout::ShaderReadOnly),
        };
        let label = format!("image ({}, {}, {})", set_index, binding.binding, array_index);
        let texture = self.device.create_texture(&hal::TextureDescriptor {
            label: Some(label.as_str()),
            size: RENDER_EXTENT,
            format: TextureFormat::R32Uint,
            usage: usage | TextureUses::TRANSFER_DST,
            flags: self.create_flags,
        })?;
        let view = match self.device.create_texture_view(
            &texture,
            &hal::TextureViewDescriptor {
                label: Some(label.as_str()),
                format: TextureFormat::R32Uint,
                usage,
                flags: self.create_flags,
            },
        ) {
            Ok(view) => view,
            Err(err) => {
                self.device.destroy_texture(texture);
                return Err(err.into());
            }
        };

        let pixels = RENDER_EXTENT.width * RENDER_EXTENT.height;
        let staging = alloc::create_host_buffer::<A>(
            self.device,
            self.caps,
            &hal::BufferDescriptor {
                label: Some("image staging"),
                size: pixels as BufferAddress * 4,
                usage: BufferUses::TRANSFER_SRC | BufferUses::HOST_WRITE,
                flags: CreateFlags::empty(),
            },
        );
        let (raw, mapping) = match staging {
            Ok(staging) => staging,
            Err(err) => {
                self.device.destroy_texture_view(view);
                self.device.destroy_texture(texture);
                return Err(err);
            }
        };
        let data = binding_data(self.hash, set_index, binding, array_index);
        mapping.write_u32s(0, (0..pixels).map(|_| data))?;
        mapping.flush::<A>(self.device, &raw);

        Ok(ImageResource {
            texture,
            view,
            layout,
            staging: BufferResource {
                raw,
                size: pixels as BufferAddress * 4,
                address: 0,
                mapping,
            },
        })
    }

    /// Input to `get_descriptor` for one element of a binding.
    fn descriptor_data<'r>(
        &self,
        binding: &BindingRecord,
        resource: &'r Resource<A>,
    ) -> Result<DescriptorData<'r, A>, TestError> {
        let missing = || {
            TestError::Internal(format!(
                "binding {} lacks the resource of a {:?} descriptor",
                binding.binding, binding.kind
            ))
        };
        let address_info = |format| -> Result<DescriptorAddressInfo, TestError> {
            let buffer = resource.buffer.as_ref().ok_or_else(missing)?;
            Ok(DescriptorAddressInfo {
                address: buffer.address,
                range: buffer.size,
                format,
            })
        };
        let image_info = || -> Result<ImageDescriptorInfo<'r, A>, TestError> {
            let image = resource.image.as_ref().ok_or_else(missing)?;
            Ok(ImageDescriptorInfo {
                view: &image.view,
                layout: image.layout,
            })
        };

        Ok(match binding.kind {
            DescriptorKind::Sampler => {
                DescriptorData::Sampler(resource.sampler.as_ref().ok_or_else(missing)?)
            }
            DescriptorKind::CombinedImageSampler => DescriptorData::CombinedImageSampler {
                image: image_info()?,
                sampler: match self.params.variant {
                    Variant::EmbeddedImmutableSamplers => None,
                    _ => Some(resource.sampler.as_ref().ok_or_else(missing)?),
                },
            },
            DescriptorKind::SampledImage => DescriptorData::SampledImage(image_info()?),
            DescriptorKind::StorageImage => DescriptorData::StorageImage(image_info()?),
            DescriptorKind::InputAttachment => DescriptorData::InputAttachment(image_info()?),
            DescriptorKind::UniformTexelBuffer => {
                DescriptorData::UniformTexelBuffer(address_info(Some(TextureFormat::R32Uint))?)
            }
            DescriptorKind::StorageTexelBuffer => {
                DescriptorData::StorageTexelBuffer(address_info(Some(TextureFormat::R32Uint))?)
            }
            DescriptorKind::UniformBuffer => DescriptorData::UniformBuffer(address_info(None)?),
            DescriptorKind::StorageBuffer => DescriptorData::StorageBuffer(address_info(None)?),
            DescriptorKind::InlineUniformBlock => {
                return Err(TestError::Internal(
                    "inline uniform blocks have no descriptor".to_string(),
                ))
            }
            DescriptorKind::AccelerationStructure => {
                return Err(TestError::NotImplemented(
                    "acceleration structure descriptors".to_string(),
                ))
            }
        })
    }

    unsafe fn write_binding(
        &self,
        set_index: u32,
        binding: &BindingRecord,
        target: &SetTarget<A>,
        registry: &Registry<Resource<A>>,
    ) -> Result<(), TestError> {
        let start = target.base + binding.offset;

        if binding.kind == DescriptorKind::InlineUniformBlock {
            let data = binding_data(self.hash, set_index, binding, 0);
            return target
                .mapping
                .write_u32s(start, (0..INLINE_BLOCK_DWORDS).map(|i| data.wrapping_add(i)));
        }

        let size = self.caps.descriptor_size(binding.kind);
        for (array_index, &id) in binding.resources.iter().enumerate() {
            let resource = registry.get(id)?;
            let data = self.descriptor_data(binding, resource)?;
            let dst = target
                .mapping
                .bytes_mut(start + (array_index * size) as BufferAddress, size)?;
            self.device.get_descriptor(&data, dst);
        }

        let props = &self.caps.props;
        if binding.kind == DescriptorKind::CombinedImageSampler
            && binding.count > 1
            && props.split_combined_image_samplers
        {
            let image_size = props.sampled_image_descriptor_size;
            let sampler_size = props.sampler_descriptor_size;
            if image_size + sampler_size != props.combined_image_sampler_descriptor_size {
                return Err(TestError::Internal(format!(
                    "split combined descriptors of {} bytes don't add up to {} + {}",
                    props.combined_image_sampler_descriptor_size, image_size, sampler_size
                )));
            }
            let count = binding.count as usize;
            let span = target.mapping.bytes_mut(start, count * size)?;
            split_combined_image_samplers(span, count, image_size, sampler_size)?;
        }
        Ok(())
    }
}

/// Records the copies of staged sets into their descriptor buffers.
pub unsafe fn record_staged_copies<A: hal::Api>(
    encoder: &mut A::CommandEncoder,
    sets: &[SetLayout<A>],
    allocation: &DescriptorBufferAllocation<A>,
) -> Result<(), TestError> {
    let staging = match allocation.staging {
        Some(ref staging) => staging,
        None => return Ok(()),
    };
    for (set_index, set) in sets.iter().enumerate() {
        let src_offset = match set.staging_offset {
            Some(offset) => offset,
            None => continue,
        };
        let buffer = set
            .buffer_index
            .and_then(|index| allocation.buffers.get(index as usize))
            .ok_or_else(|| {
                TestError::Internal(format!("staged set {} has no descriptor buffer", set_index))
            })?;
        encoder.copy_buffer_to_buffer(
            &staging.raw,
            &buffer.raw,
            std::iter::once(hal::BufferCopy {
                src_offset,
                dst_offset: set.buffer_offset,
                size: set.size,
            }),
        );
        encoder.transition_buffers(std::iter::once(hal::BufferBarrier {
            buffer: &buffer.raw,
            usage: BufferUses::TRANSFER_DST..buffer.usage,
        }));
    }
    Ok(())
}

/// Records the upload of every image from its staging buffer.
pub unsafe fn record_image_uploads<A: hal::Api>(
    encoder: &mut A::CommandEncoder,
    sets: &[SetLayout<A>],
    registry: &Registry<Resource<A>>,
) -> Result<(), TestError> {
    for binding in sets.iter().flat_map(|set| set.bindings.iter()) {
        for &id in binding.resources.iter() {
            let image = match registry.get(id)?.image {
                Some(ref image) => image,
                None => continue,
            };
            encoder.transition_textures(std::iter::once(hal::TextureBarrier {
                texture: &image.texture,
                layout: TextureLayout::Undefined..TextureLayout::TransferDst,
            }));
            encoder.copy_buffer_to_texture(
                &image.staging.raw,
                &image.texture,
                std::iter::once(hal::BufferTextureCopy {
                    buffer_offset: 0,
                    size: RENDER_EXTENT,
                }),
            );
            encoder.transition_textures(std::iter::once(hal::TextureBarrier {
                texture: &image.texture,
                layout: TextureLayout::TransferDst..image.layout,
            }));
        }
    }
    Ok(())
}

/// Resource ids referenced by the bindings of a set.
pub fn set_resources<A: hal::Api>(set: &SetLayout<A>) -> impl Iterator<Item = ResourceId> + '_ {
    set.bindings
        .iter()
        .flat_map(|binding| binding.resources.iter().copied())
}

//! Set layouts and the placement of their bindings in descriptor memory.

use arrayvec::ArrayVec;
use hal::{BufferAddress, BufferUses, DescriptorSetLayoutFlags, Device as _};

use crate::{
    binding::{BindingLocation, DescriptorKind, SimpleBinding},
    error::TestError,
    params::{SubCase, TestParams, Variant},
    registry::{Registry, Resource, ResourceId},
    INLINE_BLOCK_DWORDS, MAX_DESCRIPTOR_ARRAY_SIZE,
};

/// One binding of a set layout, as placed by the device.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingRecord {
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Array size. Inline uniform blocks have 1.
    pub count: u32,
    /// Byte offset relative to the start of the set, queried from the device.
    pub offset: BufferAddress,
    pub input_attachment_index: u32,
    pub is_result_buffer: bool,
    pub is_embedded_immutable_sampler: bool,
    /// Backing resource of every array element.
    pub resources: ArrayVec<ResourceId, MAX_DESCRIPTOR_ARRAY_SIZE>,
    /// Samplers baked into the layout, one per array element.
    pub immutable_samplers: ArrayVec<ResourceId, MAX_DESCRIPTOR_ARRAY_SIZE>,
}

impl BindingRecord {
    fn new(sb: &SimpleBinding) -> Self {
        Self {
            binding: sb.binding,
            kind: sb.kind,
            count: sb.count,
            offset: 0,
            input_attachment_index: sb.input_attachment_index,
            is_result_buffer: sb.is_result_buffer,
            is_embedded_immutable_sampler: sb.is_embedded_immutable_sampler,
            resources: ArrayVec::new(),
            immutable_samplers: ArrayVec::new(),
        }
    }

    /// Count declared in the device layout. For inline uniform blocks this is a byte size.
    pub fn layout_count(&self) -> u32 {
        match self.kind {
            DescriptorKind::InlineUniformBlock => INLINE_BLOCK_DWORDS * 4,
            _ => self.count,
        }
    }

    pub fn location(&self, set: u32, array_index: u32) -> BindingLocation {
        BindingLocation {
            set,
            binding: self.binding,
            array_index,
        }
    }
}

/// Where the descriptors of a set live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetStorage {
    DescriptorBuffer,
    /// Only embedded immutable samplers, bound without any buffer.
    EmbeddedSamplers,
    PushDescriptors,
}

#[derive(Debug)]
pub struct SetLayout<A: hal::Api> {
    pub bindings: Vec<BindingRecord>,
    /// Bytes the set occupies in descriptor memory.
    pub size: BufferAddress,
    /// Descriptor buffer holding the set, if any.
    pub buffer_index: Option<u32>,
    pub buffer_offset: BufferAddress,
    /// Offset inside the staging buffer, if the set is uploaded through it.
    pub staging_offset: Option<BufferAddress>,
    pub has_embedded_immutable_samplers: bool,
    pub use_push_descriptors: bool,
    pub raw: Option<A::DescriptorSetLayout>,
}

impl<A: hal::Api> SetLayout<A> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            size: 0,
            buffer_index: None,
            buffer_offset: 0,
            staging_offset: None,
            has_embedded_immutable_samplers: false,
            use_push_descriptors: false,
            raw: None,
        }
    }

    pub fn storage(&self) -> SetStorage {
        if self.has_embedded_immutable_samplers {
            SetStorage::EmbeddedSamplers
        } else if self.use_push_descriptors {
            SetStorage::PushDescriptors
        } else {
            SetStorage::DescriptorBuffer
        }
    }

    /// Descriptor buffer usage needed to hold this set.
    pub fn buffer_usage(&self) -> BufferUses {
        let mut usage = BufferUses::empty();
        for binding in self.bindings.iter() {
            usage |= match binding.kind {
                DescriptorKind::Sampler => BufferUses::SAMPLER_DESCRIPTORS,
                DescriptorKind::CombinedImageSampler => {
                    BufferUses::SAMPLER_DESCRIPTORS | BufferUses::RESOURCE_DESCRIPTORS
                }
                _ => BufferUses::RESOURCE_DESCRIPTORS,
            };
        }
        usage
    }

    pub fn layout_flags(&self) -> DescriptorSetLayoutFlags {
        let mut flags = DescriptorSetLayoutFlags::DESCRIPTOR_BUFFER;
        match self.storage() {
            SetStorage::EmbeddedSamplers => {
                flags |= DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS
            }
            SetStorage::PushDescriptors => flags |= DescriptorSetLayoutFlags::PUSH_DESCRIPTOR,
            SetStorage::DescriptorBuffer => {}
        }
        flags
    }

    pub fn binding(&self, binding: u32) -> Option<&BindingRecord> {
        self.bindings.iter().find(|record| record.binding == binding)
    }
}

/// Groups the planned bindings into set layouts, indexed by set number.
pub fn build_set_layouts<A: hal::Api>(
    bindings: &[SimpleBinding],
) -> Result<Vec<SetLayout<A>>, TestError> {
    let mut sets: Vec<SetLayout<A>> = Vec::new();
    for sb in bindings {
        if sb.count == 0 || sb.count as usize > MAX_DESCRIPTOR_ARRAY_SIZE {
            return Err(TestError::Internal(format!(
                "binding ({}, {}) has {} elements",
                sb.set, sb.binding, sb.count
            )));
        }
        while sets.len() <= sb.set as usize {
            sets.push(SetLayout::new());
        }
        let set = &mut sets[sb.set as usize];
        if set.binding(sb.binding).is_some() {
            return Err(TestError::Internal(format!(
                "binding {} of set {} is declared twice",
                sb.binding, sb.set
            )));
        }
        set.bindings.push(BindingRecord::new(sb));
        if sb.is_embedded_immutable_sampler {
            set.has_embedded_immutable_samplers = true;
        }
    }
    if let Some(index) = sets.iter().position(|set| set.bindings.is_empty()) {
        return Err(TestError::Internal(format!("set {} has no bindings", index)));
    }
    Ok(sets)
}

/// Decides which bindings get immutable samplers and which set is pushed.
///
/// Expects the samplers of every sampler and combined binding to exist already.
pub fn assign_sampler_modes<A: hal::Api>(
    sets: &mut [SetLayout<A>],
    params: &TestParams,
) -> Result<(), TestError> {
    if params.variant == Variant::EmbeddedImmutableSamplers
        || params.subcase == SubCase::ImmutableSamplers
    {
        for binding in sets.iter_mut().flat_map(|set| set.bindings.iter_mut()) {
            if binding.kind.uses_sampler() {
                binding.immutable_samplers = binding.resources.clone();
            }
        }
    }
    if params.is_push_descriptor_test() {
        let index = params.push_descriptor_set_index as usize;
        let set = sets.get_mut(index).ok_or_else(|| {
            TestError::InvalidParams(format!("push descriptor set {} does not exist", index))
        })?;
        if set.has_embedded_immutable_samplers {
            return Err(TestError::Internal(format!(
                "set {} can't hold both embedded samplers and push descriptors",
                index
            )));
        }
        set.use_push_descriptors = true;
    }
    Ok(())
}

/// Creates the device layouts, then queries their sizes and binding offsets.
pub unsafe fn create_device_layouts<A: hal::Api>(
    device: &A::Device,
    sets: &mut [SetLayout<A>],
    registry: &Registry<Resource<A>>,
    visibility: hal::ShaderStages,
) -> Result<(), TestError> {
    profiling::scope!("create_device_layouts");

    for (index, set) in sets.iter_mut().enumerate() {
        let mut samplers = Vec::with_capacity(set.bindings.len());
        for binding in set.bindings.iter() {
            let mut list = Vec::with_capacity(binding.immutable_samplers.len());
            for &id in binding.immutable_samplers.iter() {
                let sampler = registry.get(id)?.sampler.as_ref().ok_or_else(|| {
                    TestError::Internal(format!(
                        "immutable sampler of binding {} has no sampler",
                        binding.binding
                    ))
                })?;
                list.push(sampler);
            }
            samplers.push(list);
        }
        let entries = set
            .bindings
            .iter()
            .zip(samplers.iter())
            .map(|(binding, samplers)| hal::DescriptorSetLayoutBinding {
                binding: binding.binding,
                ty: binding.kind,
                count: binding.layout_count(),
                visibility,
                immutable_samplers: samplers,
            })
            .collect::<Vec<_>>();

        let label = format!("set{}", index);
        let raw = device.create_descriptor_set_layout(&hal::DescriptorSetLayoutDescriptor {
            label: Some(label.as_str()),
            flags: set.layout_flags(),
            entries: &entries,
        })?;

        set.size = device.descriptor_set_layout_size(&raw);
        for binding in set.bindings.iter_mut() {
            binding.offset = device.descriptor_set_layout_binding_offset(&raw, binding.binding);
        }
        log::trace!(
            "Set {} ({:?}) is {} bytes, offsets {:?}",
            index,
            set.storage(),
            set.size,
            set.bindings
                .iter()
                .map(|binding| binding.offset)
                .collect::<Vec<_>>()
        );
        set.raw = Some(raw);
    }
    Ok(())
}

pub unsafe fn destroy_device_layouts<A: hal::Api>(device: &A::Device, sets: &mut [SetLayout<A>]) {
    for set in sets.iter_mut() {
        if let Some(raw) = set.raw.take() {
            device.destroy_descriptor_set_layout(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Stage;

    type Api = hal::soft::Api;

    #[test]
    fn sets_follow_the_plan() {
        let params = TestParams::embedded(Stage::Compute, 2, 1);
        let bindings = crate::plan::plan_bindings(&params).unwrap();
        let sets = build_set_layouts::<Api>(&bindings).unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].storage(), SetStorage::EmbeddedSamplers);
        assert_eq!(sets[1].storage(), SetStorage::EmbeddedSamplers);
        assert_eq!(sets[2].storage(), SetStorage::DescriptorBuffer);
        assert!(sets[0]
            .layout_flags()
            .contains(DescriptorSetLayoutFlags::EMBEDDED_IMMUTABLE_SAMPLERS));
        assert_eq!(
            sets[2].buffer_usage(),
            BufferUses::SAMPLER_DESCRIPTORS | BufferUses::RESOURCE_DESCRIPTORS
        );
    }

    #[test]
    fn push_set_is_marked() {
        let params = TestParams::push(Stage::Compute, 2, 1, false);
        let bindings = crate::plan::plan_bindings(&params).unwrap();
        let mut sets = build_set_layouts::<Api>(&bindings).unwrap();
        assign_sampler_modes(&mut sets, &params).unwrap();
        let storage = sets.iter().map(|set| set.storage()).collect::<Vec<_>>();
        assert_eq!(
            storage,
            [
                SetStorage::DescriptorBuffer,
                SetStorage::PushDescriptors,
                SetStorage::DescriptorBuffer
            ]
        );
    }

    #[test]
    fn duplicate_bindings_are_rejected() {
        let bindings = [
            SimpleBinding::new(0, 0, DescriptorKind::Sampler, 1),
            SimpleBinding::new(0, 0, DescriptorKind::SampledImage, 1),
        ];
        assert!(build_set_layouts::<Api>(&bindings).is_err());
    }

    #[test]
    fn inline_blocks_declare_bytes() {
        let bindings = [SimpleBinding::new(0, 0, DescriptorKind::InlineUniformBlock, 1)];
        let sets = build_set_layouts::<Api>(&bindings).unwrap();
        assert_eq!(sets[0].bindings[0].layout_count(), 256);
    }
}

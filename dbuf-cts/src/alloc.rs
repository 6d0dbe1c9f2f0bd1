//! Groups sets into descriptor buffers and allocates them.
//!
//! Sets are walked in order. Consecutive sets backed by descriptor memory
//! are accumulated into a group until `sets_per_buffer` is reached, then the
//! group is finalized into one buffer. Each set lands at the group's running
//! byte cursor, and the cursor advances by the set size aligned to the
//! device's offset alignment. Embedded sampler sets and push descriptor sets
//! take no descriptor memory and only move the start of the next group.

use std::ptr::NonNull;

use hal::{BufferAddress, BufferUses, CreateFlags, Device as _, MemoryFlags};

use crate::{
    caps::CapabilityModel,
    config::UploadPolicy,
    error::TestError,
    layout::{SetLayout, SetStorage},
};

fn align_to(value: BufferAddress, alignment: BufferAddress) -> BufferAddress {
    match value % alignment {
        0 => value,
        other => value - other + alignment,
    }
}

/// Persistent host mapping of a buffer.
#[derive(Debug)]
pub struct HostMapping {
    ptr: NonNull<u8>,
    size: usize,
    is_coherent: bool,
}

impl HostMapping {
    pub unsafe fn new<A: hal::Api>(
        device: &A::Device,
        buffer: &A::Buffer,
        size: BufferAddress,
    ) -> Result<Self, TestError> {
        let mapping = device.map_buffer(buffer)?;
        Ok(Self {
            ptr: mapping.ptr,
            size: size as usize,
            is_coherent: mapping.is_coherent,
        })
    }

    /// Mapped bytes `offset..offset + len`.
    ///
    /// The caller must not hold two overlapping slices at once.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: BufferAddress, len: usize) -> Result<&mut [u8], TestError> {
        let start = offset as usize;
        if start + len > self.size {
            return Err(TestError::Internal(format!(
                "host write {}..{} exceeds the {} mapped bytes",
                start,
                start + len,
                self.size
            )));
        }
        Ok(std::slice::from_raw_parts_mut(
            self.ptr.as_ptr().add(start),
            len,
        ))
    }

    pub unsafe fn write_u32s<I>(&self, offset: BufferAddress, values: I) -> Result<(), TestError>
    where
        I: ExactSizeIterator<Item = u32>,
    {
        let bytes = self.bytes_mut(offset, values.len() * 4)?;
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    pub unsafe fn read_u32s(&self, offset: BufferAddress, count: usize) -> Result<Vec<u32>, TestError> {
        let bytes = self.bytes_mut(offset, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Makes host writes visible to the device.
    pub unsafe fn flush<A: hal::Api>(&self, device: &A::Device, buffer: &A::Buffer) {
        if !self.is_coherent {
            device.flush_mapped_ranges(buffer, std::iter::once(0..self.size as BufferAddress));
        }
    }

    /// Makes device writes visible to the host.
    pub unsafe fn invalidate<A: hal::Api>(&self, device: &A::Device, buffer: &A::Buffer) {
        if !self.is_coherent {
            device.invalidate_mapped_ranges(buffer, std::iter::once(0..self.size as BufferAddress));
        }
    }
}

/// Consecutive sets sharing one descriptor buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferGroup {
    pub first_set: u32,
    pub num_sets: u32,
    pub usage: BufferUses,
    /// Byte cursor: the sum of the aligned sizes of the sets so far.
    pub size: BufferAddress,
}

impl BufferGroup {
    fn starting_at(first_set: u32) -> Self {
        Self {
            first_set,
            num_sets: 0,
            usage: BufferUses::empty(),
            size: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    Accumulating(BufferGroup),
    /// The group reached `sets_per_buffer` and becomes a buffer.
    Finalized(BufferGroup),
}

/// Adds set `index` to `group`, assigning its buffer and offset.
fn accumulate<A: hal::Api>(
    mut group: BufferGroup,
    index: u32,
    set: &mut SetLayout<A>,
    buffer_index: u32,
    sets_per_buffer: u32,
    alignment: BufferAddress,
) -> Result<GroupState, TestError> {
    if set.storage() != SetStorage::DescriptorBuffer {
        if group.num_sets != 0 {
            return Err(TestError::Internal(format!(
                "set {} without descriptor memory splits buffer {}",
                index, buffer_index
            )));
        }
        set.buffer_index = None;
        group.first_set = index + 1;
        return Ok(GroupState::Accumulating(group));
    }

    group.usage |= BufferUses::SHADER_DEVICE_ADDRESS | set.buffer_usage();
    set.buffer_index = Some(buffer_index);
    set.buffer_offset = group.size;
    group.num_sets += 1;
    group.size += align_to(set.size, alignment);

    Ok(if group.num_sets == sets_per_buffer {
        GroupState::Finalized(group)
    } else {
        GroupState::Accumulating(group)
    })
}

/// Assigns every set backed by descriptor memory to a buffer group.
///
/// A trailing group that never reached `sets_per_buffer` still becomes a buffer.
pub fn group_sets<A: hal::Api>(
    sets: &mut [SetLayout<A>],
    sets_per_buffer: u32,
    alignment: BufferAddress,
) -> Result<Vec<BufferGroup>, TestError> {
    if sets_per_buffer == 0 {
        return Err(TestError::InvalidParams(
            "sets_per_buffer must be at least 1".to_string(),
        ));
    }
    let mut groups = Vec::new();
    let mut state = GroupState::Accumulating(BufferGroup::starting_at(0));

    for (index, set) in sets.iter_mut().enumerate() {
        let index = index as u32;
        let group = match state {
            GroupState::Accumulating(group) => group,
            GroupState::Finalized(group) => {
                groups.push(group);
                BufferGroup::starting_at(index)
            }
        };
        state = accumulate(
            group,
            index,
            set,
            groups.len() as u32,
            sets_per_buffer,
            alignment,
        )?;
    }

    match state {
        GroupState::Finalized(group) => groups.push(group),
        GroupState::Accumulating(group) if group.num_sets != 0 => {
            log::debug!(
                "Last buffer holds {} of {} sets",
                group.num_sets,
                sets_per_buffer
            );
            groups.push(group);
        }
        GroupState::Accumulating(_) => {}
    }
    Ok(groups)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Device local memory written directly by the host.
    DirectDeviceLocal,
    /// Device local memory filled by a copy from the staging buffer.
    StagedViaHostBuffer,
}

#[derive(Debug)]
pub struct DescriptorBuffer<A: hal::Api> {
    pub raw: A::Buffer,
    pub size: BufferAddress,
    pub address: BufferAddress,
    /// Descriptor usage the buffer is bound with.
    pub usage: BufferUses,
    pub residency: Residency,
    pub first_set: u32,
    pub num_sets: u32,
    /// Present for direct residency only.
    pub mapping: Option<HostMapping>,
}

impl<A: hal::Api> DescriptorBuffer<A> {
    pub fn binding(&self) -> hal::DescriptorBufferBinding {
        hal::DescriptorBufferBinding {
            address: self.address,
            usage: self.usage,
        }
    }
}

/// Host visible buffer all staged sets are written to.
#[derive(Debug)]
pub struct StagingBuffer<A: hal::Api> {
    pub raw: A::Buffer,
    pub size: BufferAddress,
    pub mapping: HostMapping,
}

#[derive(Debug)]
pub struct DescriptorBufferAllocation<A: hal::Api> {
    pub buffers: Vec<DescriptorBuffer<A>>,
    pub staging: Option<StagingBuffer<A>>,
}

impl<A: hal::Api> DescriptorBufferAllocation<A> {
    pub unsafe fn destroy(self, device: &A::Device) {
        for buffer in self.buffers {
            if buffer.mapping.is_some() {
                if let Err(err) = device.unmap_buffer(&buffer.raw) {
                    log::warn!("Failed to unmap descriptor buffer: {}", err);
                }
            }
            device.destroy_buffer(buffer.raw);
        }
        if let Some(staging) = self.staging {
            if let Err(err) = device.unmap_buffer(&staging.raw) {
                log::warn!("Failed to unmap staging buffer: {}", err);
            }
            device.destroy_buffer(staging.raw);
        }
    }
}

/// Rejects groupings the device can't bind at once.
fn check_binding_limits(caps: &CapabilityModel, groups: &[BufferGroup]) -> Result<(), TestError> {
    let props = &caps.props;
    let samplers = groups
        .iter()
        .filter(|group| group.usage.contains(BufferUses::SAMPLER_DESCRIPTORS))
        .count() as u32;
    let resources = groups
        .iter()
        .filter(|group| group.usage.contains(BufferUses::RESOURCE_DESCRIPTORS))
        .count() as u32;
    if groups.len() as u32 > props.max_descriptor_buffer_bindings {
        return Err(TestError::NotSupported(format!(
            "{} descriptor buffers exceed max_descriptor_buffer_bindings",
            groups.len()
        )));
    }
    if samplers > props.max_sampler_descriptor_buffer_bindings {
        return Err(TestError::NotSupported(format!(
            "{} sampler descriptor buffers exceed max_sampler_descriptor_buffer_bindings",
            samplers
        )));
    }
    if resources > props.max_resource_descriptor_buffer_bindings {
        return Err(TestError::NotSupported(format!(
            "{} resource descriptor buffers exceed max_resource_descriptor_buffer_bindings",
            resources
        )));
    }
    Ok(())
}

/// Binds `raw` to the first memory type in `type_bits` with `required` properties.
/// The buffer is destroyed on failure.
unsafe fn bind_memory<A: hal::Api>(
    device: &A::Device,
    caps: &CapabilityModel,
    mut raw: A::Buffer,
    type_bits: u32,
    required: MemoryFlags,
) -> Result<A::Buffer, TestError> {
    let memory_type = match caps.find_memory_type(type_bits, required) {
        Some(memory_type) => memory_type,
        None => {
            device.destroy_buffer(raw);
            return Err(hal::DeviceError::NoCompatibleMemory.into());
        }
    };
    if let Err(err) = device.bind_buffer_memory(&mut raw, memory_type) {
        device.destroy_buffer(raw);
        return Err(err.into());
    }
    Ok(raw)
}

/// Creates a buffer and binds it to the first memory type with `required` properties.
unsafe fn create_bound_buffer<A: hal::Api>(
    device: &A::Device,
    caps: &CapabilityModel,
    desc: &hal::BufferDescriptor,
    required: MemoryFlags,
) -> Result<A::Buffer, TestError> {
    let raw = device.create_buffer(desc)?;
    let reqs = device.buffer_memory_requirements(&raw);
    bind_memory::<A>(device, caps, raw, reqs.memory_type_bits, required)
}

/// Creates a host visible buffer with a persistent mapping.
pub unsafe fn create_host_buffer<A: hal::Api>(
    device: &A::Device,
    caps: &CapabilityModel,
    desc: &hal::BufferDescriptor,
) -> Result<(A::Buffer, HostMapping), TestError> {
    let raw = create_bound_buffer::<A>(device, caps, desc, MemoryFlags::HOST_VISIBLE)?;
    match HostMapping::new::<A>(device, &raw, desc.size) {
        Ok(mapping) => Ok((raw, mapping)),
        Err(err) => {
            device.destroy_buffer(raw);
            Err(err)
        }
    }
}

/// Groups the sets, then creates the descriptor buffers and the staging buffer.
pub unsafe fn allocate_descriptor_buffers<A: hal::Api>(
    device: &A::Device,
    caps: &CapabilityModel,
    sets: &mut [SetLayout<A>],
    sets_per_buffer: u32,
    policy: UploadPolicy,
    create_flags: CreateFlags,
) -> Result<DescriptorBufferAllocation<A>, TestError> {
    profiling::scope!("allocate_descriptor_buffers");

    let groups = group_sets(sets, sets_per_buffer, caps.offset_alignment())?;
    check_binding_limits(caps, &groups)?;

    let mut allocation = DescriptorBufferAllocation {
        buffers: Vec::with_capacity(groups.len()),
        staging: None,
    };
    let mut staging_size = 0;

    for (buffer_index, group) in groups.iter().enumerate() {
        let buffer_index = buffer_index as u32;
        let label = format!("descriptor buffer {}", buffer_index);
        let desc = hal::BufferDescriptor {
            label: Some(label.as_str()),
            size: group.size,
            usage: group.usage | BufferUses::TRANSFER_DST,
            flags: create_flags,
        };
        let raw = match device.create_buffer(&desc) {
            Ok(raw) => raw,
            Err(err) => {
                allocation.destroy(device);
                return Err(err.into());
            }
        };
        let type_bits = device.buffer_memory_requirements(&raw).memory_type_bits;

        let both = MemoryFlags::DEVICE_LOCAL | MemoryFlags::HOST_VISIBLE;
        let mut staged = policy.prefers_staged(buffer_index);
        if !staged && caps.find_memory_type(type_bits, both).is_none() {
            log::info!(
                "No device local and host visible memory for descriptor buffer {}, staging it",
                buffer_index
            );
            staged = true;
        }
        let required = if staged {
            MemoryFlags::DEVICE_LOCAL
        } else {
            both
        };
        let raw = match bind_memory::<A>(device, caps, raw, type_bits, required) {
            Ok(raw) => raw,
            Err(err) => {
                allocation.destroy(device);
                return Err(err);
            }
        };
        let mapping = if staged {
            None
        } else {
            match HostMapping::new::<A>(device, &raw, group.size) {
                Ok(mapping) => Some(mapping),
                Err(err) => {
                    device.destroy_buffer(raw);
                    allocation.destroy(device);
                    return Err(err);
                }
            }
        };
        let address = device.buffer_device_address(&raw);

        if staged {
            let range = group.first_set as usize..(group.first_set + group.num_sets) as usize;
            for set in sets[range].iter_mut() {
                set.staging_offset = Some(staging_size);
                staging_size += set.size;
            }
        }

        log::debug!(
            "Descriptor buffer {}: sets {}..{}, {} bytes at {:#x}, {:?}",
            buffer_index,
            group.first_set,
            group.first_set + group.num_sets,
            group.size,
            address,
            group.usage
        );
        allocation.buffers.push(DescriptorBuffer {
            raw,
            size: group.size,
            address,
            usage: group.usage,
            residency: if staged {
                Residency::StagedViaHostBuffer
            } else {
                Residency::DirectDeviceLocal
            },
            first_set: group.first_set,
            num_sets: group.num_sets,
            mapping,
        });
    }

    if allocation
        .buffers
        .iter()
        .any(|buffer| buffer.residency == Residency::StagedViaHostBuffer)
    {
        let desc = hal::BufferDescriptor {
            label: Some("descriptor staging"),
            size: staging_size,
            usage: BufferUses::TRANSFER_SRC | BufferUses::HOST_WRITE,
            flags: CreateFlags::empty(),
        };
        match create_host_buffer::<A>(device, caps, &desc) {
            Ok((raw, mapping)) => {
                allocation.staging = Some(StagingBuffer {
                    raw,
                    size: staging_size,
                    mapping,
                })
            }
            Err(err) => {
                allocation.destroy(device);
                return Err(err);
            }
        }
    }
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SetLayout;

    type Api = hal::soft::Api;

    fn set(size: BufferAddress) -> SetLayout<Api> {
        let mut set = SetLayout::new();
        set.size = size;
        set
    }

    #[test]
    fn buffer_size_is_sum_of_aligned_sets() {
        let mut sets = vec![set(40), set(64), set(100), set(8), set(200)];
        let groups = group_sets(&mut sets, 3, 64).unwrap();
        assert_eq!(groups.len(), 2);

        for group in groups.iter() {
            let range = group.first_set as usize..(group.first_set + group.num_sets) as usize;
            let mut cursor = 0;
            for set in sets[range].iter() {
                assert_eq!(set.buffer_offset, cursor);
                assert_eq!(set.buffer_offset % 64, 0);
                cursor += align_to(set.size, 64);
            }
            assert_eq!(cursor, group.size);
        }
        assert_eq!(groups[0].size, 64 + 64 + 128);
        assert_eq!(groups[1].size, 64 + 256);
        let indices = sets.iter().map(|set| set.buffer_index).collect::<Vec<_>>();
        assert_eq!(indices, [Some(0), Some(0), Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn embedded_and_push_sets_are_skipped() {
        let mut sets = vec![set(0), set(0), set(96), set(32), set(48)];
        sets[0].has_embedded_immutable_samplers = true;
        sets[1].has_embedded_immutable_samplers = true;
        sets[3].use_push_descriptors = true;
        let groups = group_sets(&mut sets, 1, 64).unwrap();

        let indices = sets.iter().map(|set| set.buffer_index).collect::<Vec<_>>();
        assert_eq!(indices, [None, None, Some(0), None, Some(1)]);
        assert_eq!(groups[0].first_set, 2);
        assert_eq!(groups[1].first_set, 4);
        assert_eq!(groups[1].size, 64);
    }

    #[test]
    fn set_without_memory_inside_a_group_is_an_error() {
        let mut sets = vec![set(32), set(32), set(32)];
        sets[1].use_push_descriptors = true;
        match group_sets(&mut sets, 2, 16) {
            Err(TestError::Internal(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}

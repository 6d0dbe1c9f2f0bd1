//! The planner's output unit, and the ids that make verification data unique.

pub use hal::{BindingLocation, DescriptorType as DescriptorKind};

/// One binding as requested by the planner, before any device placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimpleBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Array size. Inline uniform blocks always have 1.
    pub count: u32,
    /// First input attachment index of an input attachment binding, 0 otherwise.
    pub input_attachment_index: u32,
    /// The storage buffer receiving a compute result.
    pub is_result_buffer: bool,
    pub is_embedded_immutable_sampler: bool,
}

impl SimpleBinding {
    pub fn new(set: u32, binding: u32, kind: DescriptorKind, count: u32) -> Self {
        Self {
            set,
            binding,
            kind,
            count,
            input_attachment_index: 0,
            is_result_buffer: false,
            is_embedded_immutable_sampler: false,
        }
    }

    pub fn result_buffer(set: u32, binding: u32) -> Self {
        Self {
            is_result_buffer: true,
            ..Self::new(set, binding, DescriptorKind::StorageBuffer, 1)
        }
    }

    pub fn location(&self, array_index: u32) -> BindingLocation {
        BindingLocation {
            set: self.set,
            binding: self.binding,
            array_index,
        }
    }
}

/// Packs a binding location into a 32-bit id.
///
/// The array index takes the upper half, set and binding one byte each.
pub fn pack(set: u32, binding: u32, array_index: u32) -> u32 {
    (array_index << 16) | ((set & 0xFF) << 8) | (binding & 0xFF)
}

pub fn pack_location(location: BindingLocation) -> u32 {
    pack(location.set, location.binding, location.array_index)
}

pub fn unpack(id: u32) -> BindingLocation {
    BindingLocation {
        set: (id >> 8) & 0xFF,
        binding: id & 0xFF,
        array_index: id >> 16,
    }
}

/// Value stored in the resource behind `(set, binding, array_index)`.
pub fn expected_data(hash: u32, set: u32, binding: u32, array_index: u32) -> u32 {
    hash ^ pack(set, binding, array_index)
}

/// Index of the result buffer binding, if the plan has one.
pub fn result_binding_index(bindings: &[SimpleBinding]) -> Option<usize> {
    bindings.iter().position(|sb| sb.is_result_buffer)
}

/// Number of sets referenced by the bindings.
pub fn set_count(bindings: &[SimpleBinding]) -> u32 {
    bindings.iter().map(|sb| sb.set + 1).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout() {
        assert_eq!(pack(1, 2, 3), 0x0003_0102);
        assert_eq!(pack(0x1FF, 0x1FE, 0), 0xFFFE);
        let location = unpack(pack(7, 9, 2));
        assert_eq!(
            location,
            BindingLocation {
                set: 7,
                binding: 9,
                array_index: 2
            }
        );
    }

    #[test]
    fn expected_data_is_salted() {
        let hash = 0xDEAD_0000;
        assert_eq!(expected_data(hash, 0, 0, 0), hash);
        assert_eq!(expected_data(hash, 1, 2, 3) ^ hash, pack(1, 2, 3));
        assert_ne!(expected_data(hash, 0, 1, 0), expected_data(hash, 0, 1, 1));
    }
}

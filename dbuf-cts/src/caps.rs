//! Immutable view of what the device can do, queried once per iteration.

use std::convert::TryFrom;

use hal::{DescriptorBufferProperties, Features, MemoryFlags, MemoryType, QueueFlags, QueueKind};

use crate::{
    binding::{DescriptorKind, SimpleBinding},
    error::TestError,
    params::{TestParams, Variant},
    verify::TestStatus,
};

#[derive(Clone, Debug)]
pub struct CapabilityModel {
    pub features: Features,
    pub props: DescriptorBufferProperties,
    pub memory_types: Vec<MemoryType>,
    pub queues: QueueFlags,
    /// Buffer descriptors use their robust sizes.
    pub robust_buffer_access: bool,
}

impl CapabilityModel {
    pub fn new(caps: &hal::Capabilities) -> Self {
        Self {
            features: caps.features,
            props: caps.descriptor_buffer.clone(),
            memory_types: caps.memory_types.clone(),
            queues: caps.queues,
            robust_buffer_access: false,
        }
    }

    /// Descriptor sizes as seen by a device opened with robust buffer access.
    pub fn with_robust_buffer_access(self, robust_buffer_access: bool) -> Self {
        Self {
            robust_buffer_access,
            ..self
        }
    }

    /// Size of one array element of a binding in descriptor memory.
    ///
    /// Inline uniform blocks have no descriptor and report 0.
    pub fn descriptor_size(&self, kind: DescriptorKind) -> usize {
        let props = &self.props;
        let robust = self.robust_buffer_access;
        match kind {
            DescriptorKind::Sampler => props.sampler_descriptor_size,
            DescriptorKind::CombinedImageSampler => props.combined_image_sampler_descriptor_size,
            DescriptorKind::SampledImage => props.sampled_image_descriptor_size,
            DescriptorKind::StorageImage => props.storage_image_descriptor_size,
            DescriptorKind::UniformTexelBuffer if robust => {
                props.robust_uniform_texel_buffer_descriptor_size
            }
            DescriptorKind::UniformTexelBuffer => props.uniform_texel_buffer_descriptor_size,
            DescriptorKind::StorageTexelBuffer if robust => {
                props.robust_storage_texel_buffer_descriptor_size
            }
            DescriptorKind::StorageTexelBuffer => props.storage_texel_buffer_descriptor_size,
            DescriptorKind::UniformBuffer if robust => props.robust_uniform_buffer_descriptor_size,
            DescriptorKind::UniformBuffer => props.uniform_buffer_descriptor_size,
            DescriptorKind::StorageBuffer if robust => props.robust_storage_buffer_descriptor_size,
            DescriptorKind::StorageBuffer => props.storage_buffer_descriptor_size,
            DescriptorKind::InlineUniformBlock => 0,
            DescriptorKind::InputAttachment => props.input_attachment_descriptor_size,
            DescriptorKind::AccelerationStructure => props.acceleration_structure_descriptor_size,
        }
    }

    pub fn offset_alignment(&self) -> hal::BufferAddress {
        self.props.descriptor_buffer_offset_alignment.max(1)
    }

    /// First memory type allowed by `type_bits` that has all the `required` flags.
    pub fn find_memory_type(&self, type_bits: u32, required: MemoryFlags) -> Option<u32> {
        self.memory_types
            .iter()
            .enumerate()
            .position(|(index, ty)| {
                let bit = 1u32.checked_shl(index as u32).unwrap_or(0);
                type_bits & bit != 0 && ty.flags.contains(required)
            })
            .map(|index| index as u32)
    }

    /// Features a device must be opened with to run the test.
    pub fn required_features(params: &TestParams, bindings: &[SimpleBinding]) -> Features {
        let mut features = Features::DESCRIPTOR_BUFFER
            | Features::BUFFER_DEVICE_ADDRESS
            | Features::SYNCHRONIZATION_2;
        if bindings
            .iter()
            .any(|sb| sb.kind == DescriptorKind::InlineUniformBlock)
        {
            features |= Features::INLINE_UNIFORM_BLOCK;
        }
        if params.is_push_descriptor_test() {
            features |= Features::PUSH_DESCRIPTOR;
        }
        match params.variant {
            Variant::CaptureReplay => features |= Features::DESCRIPTOR_BUFFER_CAPTURE_REPLAY,
            Variant::Robustness => features |= Features::ROBUST_BUFFER_ACCESS,
            _ => {}
        }
        if params.is_tessellation() {
            features |= Features::TESSELLATION_SHADER;
        }
        if params.is_geometry() {
            features |= Features::GEOMETRY_SHADER;
        }
        features
    }

    /// Decide whether the test can run here, before anything is allocated.
    pub fn check_support(
        &self,
        params: &TestParams,
        bindings: &[SimpleBinding],
    ) -> Result<(), TestError> {
        let needed = Self::required_features(params, bindings);
        for &(feature, name) in &[
            (Features::DESCRIPTOR_BUFFER, "descriptor buffer"),
            (Features::BUFFER_DEVICE_ADDRESS, "buffer device address"),
            (Features::SYNCHRONIZATION_2, "synchronization2"),
            (Features::INLINE_UNIFORM_BLOCK, "inline uniform block"),
            (Features::DESCRIPTOR_BUFFER_CAPTURE_REPLAY, "descriptor buffer capture replay"),
            (Features::ROBUST_BUFFER_ACCESS, "robust buffer access"),
            (Features::TESSELLATION_SHADER, "tessellation shader"),
            (Features::GEOMETRY_SHADER, "geometry shader"),
            (Features::PUSH_DESCRIPTOR, "push descriptor"),
        ] {
            if needed.contains(feature) && !self.features.contains(feature) {
                return Err(TestError::NotSupported(format!("{} feature", name)));
            }
        }

        let queue = match params.queue {
            QueueKind::Graphics => QueueFlags::GRAPHICS,
            QueueKind::Compute => QueueFlags::COMPUTE,
        };
        if !self.queues.contains(queue) {
            return Err(TestError::NotSupported(format!("{:?} queue", params.queue)));
        }

        let props = &self.props;
        if params.is_push_descriptor_test() && props.push_descriptors_require_buffer {
            return Err(TestError::NotSupported(
                "push descriptors that require a buffer".to_string(),
            ));
        }
        if params.buffer_binding_count > props.max_descriptor_buffer_bindings {
            return Err(TestError::NotSupported(
                "max_descriptor_buffer_bindings is too small".to_string(),
            ));
        }
        if params.sampler_buffer_binding_count > props.max_sampler_descriptor_buffer_bindings {
            return Err(TestError::NotSupported(
                "max_sampler_descriptor_buffer_bindings is too small".to_string(),
            ));
        }
        if params.resource_buffer_binding_count > props.max_resource_descriptor_buffer_bindings {
            return Err(TestError::NotSupported(
                "max_resource_descriptor_buffer_bindings is too small".to_string(),
            ));
        }
        if params.embedded_immutable_sampler_buffer_binding_count
            > props.max_embedded_immutable_sampler_bindings
        {
            return Err(TestError::NotSupported(
                "max_embedded_immutable_sampler_bindings is too small".to_string(),
            ));
        }
        let embedded_samplers = params.embedded_immutable_sampler_buffer_binding_count
            * params.embedded_immutable_samplers_per_buffer;
        if embedded_samplers > props.max_embedded_immutable_samplers {
            return Err(TestError::NotSupported(
                "max_embedded_immutable_samplers is too small".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks the reported properties against the minimum requirements of descriptor buffers.
    pub fn check_limits(&self) -> Result<TestStatus, TestError> {
        if !self.features.contains(Features::DESCRIPTOR_BUFFER) {
            return Err(TestError::NotSupported(
                "descriptor buffer feature".to_string(),
            ));
        }
        fn widen<T>(value: T) -> u64
        where
            u64: TryFrom<T>,
        {
            u64::try_from(value).unwrap_or(u64::MAX)
        }

        let props = &self.props;
        let mut max_checks: Vec<(&str, u64, u64)> = Vec::new();
        let mut min_checks: Vec<(&str, u64, u64)> = Vec::new();

        macro_rules! max_limit {
            ($field:ident, $limit:expr) => {
                max_checks.push((stringify!($field), widen(props.$field), $limit))
            };
        }
        macro_rules! min_limit {
            ($field:ident, $limit:expr) => {
                min_checks.push((stringify!($field), widen(props.$field), $limit))
            };
        }

        if self.features.contains(Features::ROBUST_BUFFER_ACCESS) {
            max_limit!(robust_uniform_texel_buffer_descriptor_size, 64);
            max_limit!(robust_storage_texel_buffer_descriptor_size, 128);
            max_limit!(robust_uniform_buffer_descriptor_size, 64);
            max_limit!(robust_storage_buffer_descriptor_size, 128);
        }
        let ray_tracing = self.features.contains(Features::ACCELERATION_STRUCTURE);
        if self
            .features
            .contains(Features::DESCRIPTOR_BUFFER_CAPTURE_REPLAY)
        {
            max_limit!(buffer_capture_replay_descriptor_data_size, 64);
            max_limit!(image_capture_replay_descriptor_data_size, 64);
            max_limit!(image_view_capture_replay_descriptor_data_size, 64);
            max_limit!(sampler_capture_replay_descriptor_data_size, 64);
            if ray_tracing {
                max_limit!(acceleration_structure_capture_replay_descriptor_data_size, 64);
            }
        }
        if ray_tracing {
            max_limit!(acceleration_structure_descriptor_size, 64);
        }
        max_limit!(descriptor_buffer_offset_alignment, 256);

        min_limit!(max_descriptor_buffer_bindings, 3);
        min_limit!(max_resource_descriptor_buffer_bindings, 1);
        min_limit!(max_sampler_descriptor_buffer_bindings, 1);
        min_limit!(max_embedded_immutable_sampler_bindings, 1);
        min_limit!(max_embedded_immutable_samplers, 2032);

        max_limit!(sampler_descriptor_size, 64);
        max_limit!(combined_image_sampler_descriptor_size, 128);
        max_limit!(sampled_image_descriptor_size, 64);
        max_limit!(storage_image_descriptor_size, 64);
        max_limit!(uniform_texel_buffer_descriptor_size, 64);
        max_limit!(storage_texel_buffer_descriptor_size, 128);
        max_limit!(uniform_buffer_descriptor_size, 64);
        max_limit!(storage_buffer_descriptor_size, 128);
        max_limit!(input_attachment_descriptor_size, 64);

        min_limit!(max_sampler_descriptor_buffer_range, 1 << 27);
        min_limit!(max_resource_descriptor_buffer_range, 1 << 27);
        min_limit!(resource_descriptor_buffer_address_space_size, 1 << 27);
        min_limit!(sampler_descriptor_buffer_address_space_size, 1 << 27);
        min_limit!(descriptor_buffer_address_space_size, 1 << 27);

        for &(name, value, limit) in max_checks.iter() {
            if value == 0 {
                return Ok(TestStatus::Fail(format!("{} is 0", name)));
            }
            if value > limit {
                return Ok(TestStatus::Fail(format!(
                    "{} is greater than {}",
                    name, limit
                )));
            }
        }
        for &(name, value, limit) in min_checks.iter() {
            if value < limit {
                return Ok(TestStatus::Fail(format!("{} is less than {}", name, limit)));
            }
        }

        if props.split_combined_image_samplers
            && props.sampled_image_descriptor_size + props.sampler_descriptor_size
                != props.combined_image_sampler_descriptor_size
        {
            return Ok(TestStatus::Fail(
                "With split combined image samplers, the sampled image size and the sampler size \
                 are expected to add up to the combined image sampler size."
                    .to_string(),
            ));
        }
        Ok(TestStatus::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::Instance as _;

    fn soft_caps(options: hal::soft::Options) -> CapabilityModel {
        let instance = hal::soft::Instance::new(options);
        let adapters = unsafe { instance.enumerate_adapters() };
        CapabilityModel::new(&adapters[0].capabilities)
    }

    #[test]
    fn default_soft_device_meets_limits() {
        let caps = soft_caps(hal::soft::Options::default());
        assert_eq!(caps.check_limits().unwrap(), TestStatus::Pass);
    }

    #[test]
    fn limit_violations_fail() {
        let mut options = hal::soft::Options::default();
        options.properties.max_descriptor_buffer_bindings = 2;
        match soft_caps(options).check_limits().unwrap() {
            TestStatus::Fail(msg) => assert!(msg.contains("max_descriptor_buffer_bindings")),
            TestStatus::Pass => panic!("limit not checked"),
        }

        let mut options = hal::soft::Options::default();
        options.properties.sampler_descriptor_size = 0;
        match soft_caps(options).check_limits().unwrap() {
            TestStatus::Fail(msg) => assert_eq!(msg, "sampler_descriptor_size is 0"),
            TestStatus::Pass => panic!("zero size accepted"),
        }

        let mut options = hal::soft::Options::default();
        options.properties.split_combined_image_samplers = true;
        options.properties.combined_image_sampler_descriptor_size = 64;
        assert_ne!(soft_caps(options).check_limits().unwrap(), TestStatus::Pass);
    }

    #[test]
    fn u64_limits_are_checked() {
        let mut options = hal::soft::Options::default();
        options.properties.descriptor_buffer_address_space_size = 1 << 26;
        match soft_caps(options).check_limits().unwrap() {
            TestStatus::Fail(msg) => {
                assert!(msg.contains("descriptor_buffer_address_space_size"), "{}", msg)
            }
            TestStatus::Pass => panic!("address space size not checked"),
        }
    }

    #[test]
    fn memory_types_past_the_mask() {
        let mut options = hal::soft::Options::default();
        let plain = hal::MemoryType {
            flags: MemoryFlags::DEVICE_LOCAL,
        };
        let both = hal::MemoryType {
            flags: MemoryFlags::DEVICE_LOCAL | MemoryFlags::HOST_VISIBLE,
        };
        options.memory_types = vec![plain; 34];
        options.memory_types[33] = both;
        let caps = soft_caps(options.clone());
        let required = MemoryFlags::DEVICE_LOCAL | MemoryFlags::HOST_VISIBLE;
        assert_eq!(caps.find_memory_type(!0, required), None);
        assert_eq!(caps.find_memory_type(!0, MemoryFlags::DEVICE_LOCAL), Some(0));

        options.memory_types[31] = both;
        let caps = soft_caps(options);
        assert_eq!(caps.find_memory_type(!0, required), Some(31));
        assert_eq!(caps.find_memory_type(!(1 << 31), required), None);
    }

    #[test]
    fn robust_sizes() {
        let caps = soft_caps(hal::soft::Options::default());
        let plain = caps.descriptor_size(DescriptorKind::StorageBuffer);
        let caps = caps.with_robust_buffer_access(true);
        assert_eq!(
            caps.descriptor_size(DescriptorKind::StorageBuffer),
            caps.props.robust_storage_buffer_descriptor_size
        );
        assert_ne!(plain, caps.descriptor_size(DescriptorKind::StorageBuffer));
        assert_eq!(
            caps.descriptor_size(DescriptorKind::Sampler),
            caps.props.sampler_descriptor_size
        );
    }

    #[test]
    fn memory_type_selection() {
        let caps = soft_caps(hal::soft::Options::default());
        let both = MemoryFlags::DEVICE_LOCAL | MemoryFlags::HOST_VISIBLE;
        assert_eq!(caps.find_memory_type(!0, both), Some(3));
        assert_eq!(caps.find_memory_type(!0, MemoryFlags::HOST_VISIBLE), Some(1));
        assert_eq!(caps.find_memory_type(0b0001, MemoryFlags::HOST_VISIBLE), None);

        let caps = soft_caps(hal::soft::Options::default().without_device_local_host_visible());
        assert_eq!(caps.find_memory_type(!0, both), None);
    }

    #[test]
    fn unsupported_features_are_reported() {
        let caps = soft_caps(
            hal::soft::Options::default().without_features(Features::GEOMETRY_SHADER),
        );
        let params = TestParams::single(
            crate::params::Stage::Geometry,
            DescriptorKind::StorageBuffer,
        );
        let err = caps.check_support(&params, &[]).unwrap_err();
        assert!(err.is_not_supported());
    }
}

//! Test parameters and their content hash.

use std::hash::{Hash, Hasher};

use crate::{binding::DescriptorKind, error::TestError};

pub use hal::{QueueKind, ShaderStage as Stage};

/// General shape of a test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    /// One binding of a chosen kind.
    Single,
    /// Several sets of randomly ordered bindings of every kind.
    Multiple,
    /// Sampler-only and resource-only buffers, as many as requested.
    Max,
    /// Sets holding only embedded immutable samplers, and one image set using them.
    EmbeddedImmutableSamplers,
    /// Like `Multiple`, with one extra set updated through push descriptors.
    PushDescriptor,
    /// Like `PushDescriptor`, updated through a descriptor update template.
    PushTemplate,
    /// Like `Single`, on a device with robust buffer access.
    Robustness,
    /// Like `Single`, with every resource created for capture and replay.
    CaptureReplay,
}

/// Variation of a test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubCase {
    None,
    /// Sampler and combined bindings get immutable samplers in their layout.
    ImmutableSamplers,
    /// Buffers and offsets are bound over several calls.
    IncrementalBind,
}

/// Immutable configuration of one test case.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestParams {
    pub variant: Variant,
    pub subcase: SubCase,
    /// Stage reading the descriptors.
    pub stage: Stage,
    pub queue: QueueKind,
    /// Number of descriptor buffers to bind.
    pub buffer_binding_count: u32,
    /// Number of sets sharing one descriptor buffer.
    pub sets_per_buffer: u32,
    /// Descriptor kind of the single binding tests.
    pub descriptor: DescriptorKind,
    pub sampler_buffer_binding_count: u32,
    pub resource_buffer_binding_count: u32,
    pub embedded_immutable_sampler_buffer_binding_count: u32,
    pub embedded_immutable_samplers_per_buffer: u32,
    /// Set updated with push descriptors.
    pub push_descriptor_set_index: u32,
}

impl TestParams {
    fn base(variant: Variant, stage: Stage) -> Self {
        Self {
            variant,
            subcase: SubCase::None,
            stage,
            queue: QueueKind::Graphics,
            buffer_binding_count: 1,
            sets_per_buffer: 1,
            descriptor: DescriptorKind::Sampler,
            sampler_buffer_binding_count: 0,
            resource_buffer_binding_count: 0,
            embedded_immutable_sampler_buffer_binding_count: 0,
            embedded_immutable_samplers_per_buffer: 0,
            push_descriptor_set_index: 0,
        }
    }

    pub fn single(stage: Stage, descriptor: DescriptorKind) -> Self {
        Self {
            descriptor,
            ..Self::base(Variant::Single, stage)
        }
    }

    pub fn multiple(stage: Stage, buffer_binding_count: u32, sets_per_buffer: u32) -> Self {
        Self {
            buffer_binding_count,
            sets_per_buffer,
            ..Self::base(Variant::Multiple, stage)
        }
    }

    pub fn max(stage: Stage, sampler_buffers: u32, resource_buffers: u32) -> Self {
        Self {
            buffer_binding_count: sampler_buffers + resource_buffers,
            sampler_buffer_binding_count: sampler_buffers,
            resource_buffer_binding_count: resource_buffers,
            ..Self::base(Variant::Max, stage)
        }
    }

    /// `buffers` embedded sampler sets holding `samplers_per_buffer` samplers each.
    pub fn embedded(stage: Stage, buffers: u32, samplers_per_buffer: u32) -> Self {
        Self {
            buffer_binding_count: buffers + 1,
            embedded_immutable_sampler_buffer_binding_count: buffers,
            embedded_immutable_samplers_per_buffer: samplers_per_buffer,
            ..Self::base(Variant::EmbeddedImmutableSamplers, stage)
        }
    }

    /// `template` selects the update template path.
    pub fn push(stage: Stage, buffer_binding_count: u32, push_set_index: u32, template: bool) -> Self {
        let variant = if template {
            Variant::PushTemplate
        } else {
            Variant::PushDescriptor
        };
        Self {
            buffer_binding_count,
            push_descriptor_set_index: push_set_index,
            ..Self::base(variant, stage)
        }
    }

    pub fn robustness(stage: Stage, descriptor: DescriptorKind) -> Self {
        Self {
            descriptor,
            ..Self::base(Variant::Robustness, stage)
        }
    }

    pub fn capture_replay(stage: Stage, descriptor: DescriptorKind) -> Self {
        Self {
            descriptor,
            ..Self::base(Variant::CaptureReplay, stage)
        }
    }

    /// Run on the given queue. A compute queue only runs the compute stage.
    pub fn with_queue(self, queue: QueueKind) -> Self {
        Self { queue, ..self }
    }

    pub fn with_subcase(self, subcase: SubCase) -> Self {
        Self { subcase, ..self }
    }

    pub fn is_compute(&self) -> bool {
        self.stage == Stage::Compute
    }

    pub fn is_graphics(&self) -> bool {
        !self.is_compute()
    }

    pub fn is_geometry(&self) -> bool {
        self.stage == Stage::Geometry
    }

    pub fn is_tessellation(&self) -> bool {
        match self.stage {
            Stage::TessellationControl | Stage::TessellationEvaluation => true,
            _ => false,
        }
    }

    pub fn is_push_descriptor_test(&self) -> bool {
        match self.variant {
            Variant::PushDescriptor | Variant::PushTemplate => true,
            _ => false,
        }
    }

    /// Variants whose bindings are planned like `Variant::Single`.
    pub fn is_single_binding_test(&self) -> bool {
        match self.variant {
            Variant::Single | Variant::Robustness | Variant::CaptureReplay => true,
            _ => false,
        }
    }

    pub fn bind_point(&self) -> hal::BindPoint {
        if self.is_compute() {
            hal::BindPoint::Compute
        } else {
            hal::BindPoint::Graphics
        }
    }

    /// Number of sets the planner creates.
    pub fn set_count(&self) -> u32 {
        match self.variant {
            Variant::Single | Variant::Robustness | Variant::CaptureReplay => 1,
            Variant::Multiple => self.buffer_binding_count * self.sets_per_buffer,
            Variant::PushDescriptor | Variant::PushTemplate => {
                self.buffer_binding_count * self.sets_per_buffer + 1
            }
            Variant::Max => {
                self.sampler_buffer_binding_count + self.resource_buffer_binding_count
            }
            Variant::EmbeddedImmutableSamplers => {
                self.embedded_immutable_sampler_buffer_binding_count + 1
            }
        }
    }

    /// Content hash of every field, used to salt the verification data.
    ///
    /// Equal parameters hash equally, and any changed field changes the hash.
    pub fn content_hash(&self) -> u32 {
        let mut hasher = fxhash::FxHasher64::default();
        self.hash(&mut hasher);
        let wide = hasher.finish();
        (wide as u32) ^ ((wide >> 32) as u32)
    }

    /// Reject parameter combinations that no plan can satisfy.
    pub fn validate(&self) -> Result<(), TestError> {
        if self.queue == QueueKind::Compute && !self.is_compute() {
            return Err(TestError::InvalidParams(format!(
                "a compute queue can't run the {:?} stage",
                self.stage
            )));
        }
        if self.sets_per_buffer == 0 {
            return Err(TestError::InvalidParams(
                "sets_per_buffer must be at least 1".to_string(),
            ));
        }
        if self.is_single_binding_test() {
            if self.descriptor == DescriptorKind::InputAttachment && self.stage != Stage::Fragment
            {
                return Err(TestError::InvalidParams(
                    "input attachments are only readable in the fragment stage".to_string(),
                ));
            }
            if self.variant == Variant::Robustness && !self.descriptor.is_buffer() {
                log::debug!(
                    "Robustness test of {:?} only changes the descriptor sizes",
                    self.descriptor
                );
            }
        }
        match self.variant {
            Variant::Multiple if self.buffer_binding_count == 0 => {
                return Err(TestError::InvalidParams(
                    "at least one buffer binding is required".to_string(),
                ));
            }
            Variant::PushDescriptor | Variant::PushTemplate => {
                if self.sets_per_buffer != 1 {
                    return Err(TestError::InvalidParams(
                        "push descriptor tests use one set per buffer".to_string(),
                    ));
                }
                if self.push_descriptor_set_index >= self.set_count() {
                    return Err(TestError::InvalidParams(format!(
                        "push descriptor set {} is out of range of {} sets",
                        self.push_descriptor_set_index,
                        self.set_count()
                    )));
                }
            }
            Variant::Max => {
                if self.sampler_buffer_binding_count == 0 || self.resource_buffer_binding_count == 0
                {
                    return Err(TestError::InvalidParams(
                        "max bindings tests need both sampler and resource buffers".to_string(),
                    ));
                }
            }
            Variant::EmbeddedImmutableSamplers => {
                if self.embedded_immutable_sampler_buffer_binding_count == 0
                    || self.embedded_immutable_samplers_per_buffer == 0
                {
                    return Err(TestError::InvalidParams(
                        "embedded sampler tests need at least one sampler".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_content_based() {
        let a = TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer);
        let b = TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer);
        assert_eq!(a.content_hash(), b.content_hash());

        let c = a.clone().with_queue(QueueKind::Compute);
        assert_ne!(a.content_hash(), c.content_hash());
        let d = a.clone().with_subcase(SubCase::IncrementalBind);
        assert_ne!(a.content_hash(), d.content_hash());
        let e = TestParams::single(Stage::Compute, DescriptorKind::UniformBuffer);
        assert_ne!(a.content_hash(), e.content_hash());
    }

    #[test]
    fn push_set_index_is_validated() {
        let ok = TestParams::push(Stage::Compute, 2, 2, false);
        assert_eq!(ok.set_count(), 3);
        assert!(ok.validate().is_ok());

        let bad = TestParams::push(Stage::Compute, 2, 3, true);
        match bad.validate() {
            Err(TestError::InvalidParams(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn compute_queue_needs_compute_stage() {
        let params = TestParams::multiple(Stage::Fragment, 1, 1).with_queue(QueueKind::Compute);
        assert!(params.validate().is_err());
    }
}

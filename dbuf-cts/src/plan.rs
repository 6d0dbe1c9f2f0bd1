//! Expands test parameters into the bindings a test declares.

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    binding::{DescriptorKind, SimpleBinding},
    error::TestError,
    params::{Stage, TestParams, Variant},
    MAX_DESCRIPTOR_ARRAY_SIZE,
};

/// Kinds every generated set of the multiple bindings tests draws from.
const CANDIDATE_KINDS: [DescriptorKind; 8] = [
    DescriptorKind::Sampler,
    DescriptorKind::CombinedImageSampler,
    DescriptorKind::SampledImage,
    DescriptorKind::StorageImage,
    DescriptorKind::UniformTexelBuffer,
    DescriptorKind::StorageTexelBuffer,
    DescriptorKind::UniformBuffer,
    DescriptorKind::StorageBuffer,
];

/// Produce the ordered bindings of a test.
///
/// The result is reproducible from the parameters alone: random choices are
/// drawn from a generator seeded with the content hash.
pub fn plan_bindings(params: &TestParams) -> Result<Vec<SimpleBinding>, TestError> {
    params.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(params.content_hash() as u64);
    let bindings = match params.variant {
        Variant::Single | Variant::Robustness | Variant::CaptureReplay => plan_single(params),
        Variant::Multiple | Variant::PushDescriptor | Variant::PushTemplate => {
            plan_multiple(params, &mut rng)
        }
        Variant::Max => plan_max(params),
        Variant::EmbeddedImmutableSamplers => plan_embedded(params),
    };
    log::debug!(
        "Planned {} bindings in {} sets for {:?}",
        bindings.len(),
        crate::binding::set_count(&bindings),
        params.variant
    );
    Ok(bindings)
}

fn plan_single(params: &TestParams) -> Vec<SimpleBinding> {
    let mut bindings = vec![SimpleBinding::new(0, 0, params.descriptor, 1)];
    if params.descriptor == DescriptorKind::SampledImage {
        let binding = bindings.len() as u32;
        bindings.push(SimpleBinding::new(0, binding, DescriptorKind::Sampler, 1));
    }
    if params.is_compute() {
        let binding = bindings.len() as u32;
        bindings.push(SimpleBinding::result_buffer(0, binding));
    }
    bindings
}

fn plan_multiple(params: &TestParams, rng: &mut ChaCha8Rng) -> Vec<SimpleBinding> {
    let mut bindings = Vec::new();
    let mut attachment_index = 0;

    for set in 0..params.set_count() {
        let mut kinds = CANDIDATE_KINDS.to_vec();
        if !params.is_push_descriptor_test() || set != params.push_descriptor_set_index {
            kinds.push(DescriptorKind::InlineUniformBlock);
        }
        if params.stage == Stage::Fragment {
            kinds.push(DescriptorKind::InputAttachment);
        }
        kinds.shuffle(rng);

        for (binding, &kind) in kinds.iter().enumerate() {
            let count = match kind {
                DescriptorKind::InlineUniformBlock => 1,
                _ => rng.gen_range(1..MAX_DESCRIPTOR_ARRAY_SIZE as u32),
            };
            let mut sb = SimpleBinding::new(set, binding as u32, kind, count);
            if kind == DescriptorKind::InputAttachment {
                sb.input_attachment_index = attachment_index;
                attachment_index += count;
            }
            bindings.push(sb);
        }

        if params.is_compute() && set == 0 {
            let binding = bindings.len() as u32;
            bindings.push(SimpleBinding::result_buffer(set, binding));
        }
    }
    bindings
}

fn plan_max(params: &TestParams) -> Vec<SimpleBinding> {
    let mut bindings = Vec::new();
    let mut set = 0;
    let rounds = params
        .sampler_buffer_binding_count
        .max(params.resource_buffer_binding_count);

    for round in 0..rounds {
        if round < params.sampler_buffer_binding_count {
            bindings.push(SimpleBinding::new(set, 0, DescriptorKind::Sampler, 1));
            set += 1;
        }
        if round < params.resource_buffer_binding_count {
            bindings.push(SimpleBinding::new(set, 0, DescriptorKind::SampledImage, 1));
            if params.is_compute() && round == 0 {
                bindings.push(SimpleBinding::result_buffer(set, 1));
            }
            set += 1;
        }
    }
    bindings
}

fn plan_embedded(params: &TestParams) -> Vec<SimpleBinding> {
    let buffers = params.embedded_immutable_sampler_buffer_binding_count;
    let per_buffer = params.embedded_immutable_samplers_per_buffer;
    let mut bindings = Vec::new();

    for set in 0..buffers {
        for binding in 0..per_buffer {
            bindings.push(SimpleBinding {
                is_embedded_immutable_sampler: true,
                ..SimpleBinding::new(set, binding, DescriptorKind::Sampler, 1)
            });
        }
    }

    let image_set = buffers;
    let sampler_count = buffers * per_buffer;
    for binding in 0..sampler_count {
        let kind = if binding % 2 == 0 {
            DescriptorKind::SampledImage
        } else {
            DescriptorKind::CombinedImageSampler
        };
        bindings.push(SimpleBinding::new(image_set, binding, kind, 1));
    }
    if params.is_compute() {
        bindings.push(SimpleBinding::result_buffer(image_set, sampler_count));
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::result_binding_index;

    #[test]
    fn single_sampled_image_gets_a_sampler() {
        let params = TestParams::single(Stage::Compute, DescriptorKind::SampledImage);
        let bindings = plan_bindings(&params).unwrap();
        let kinds = bindings.iter().map(|sb| sb.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                DescriptorKind::SampledImage,
                DescriptorKind::Sampler,
                DescriptorKind::StorageBuffer
            ]
        );
        assert_eq!(result_binding_index(&bindings), Some(2));
        assert_eq!(bindings[2].binding, 2);
    }

    #[test]
    fn single_graphics_has_no_result_buffer() {
        let params = TestParams::single(Stage::Fragment, DescriptorKind::UniformBuffer);
        let bindings = plan_bindings(&params).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(result_binding_index(&bindings), None);
    }

    #[test]
    fn multiple_is_reproducible() {
        let params = TestParams::multiple(Stage::Fragment, 2, 4);
        let first = plan_bindings(&params).unwrap();
        let second = plan_bindings(&params).unwrap();
        assert_eq!(first, second);
        assert_eq!(crate::binding::set_count(&first), 8);

        for set in 0..8 {
            let in_set = first.iter().filter(|sb| sb.set == set).collect::<Vec<_>>();
            // Eight candidates, inline block and input attachment.
            assert_eq!(in_set.len(), 10);
            for (index, sb) in in_set.iter().enumerate() {
                assert_eq!(sb.binding, index as u32);
                assert!(sb.count >= 1 && sb.count <= 3);
                if sb.kind == DescriptorKind::InlineUniformBlock {
                    assert_eq!(sb.count, 1);
                }
            }
        }
    }

    #[test]
    fn input_attachment_indices_accumulate() {
        let params = TestParams::multiple(Stage::Fragment, 3, 1);
        let bindings = plan_bindings(&params).unwrap();
        let mut next = 0;
        for sb in bindings
            .iter()
            .filter(|sb| sb.kind == DescriptorKind::InputAttachment)
        {
            assert_eq!(sb.input_attachment_index, next);
            next += sb.count;
        }
        assert!(next >= 3);
    }

    #[test]
    fn multiple_compute_result_in_first_set() {
        let params = TestParams::multiple(Stage::Compute, 3, 1);
        let bindings = plan_bindings(&params).unwrap();
        let result = &bindings[result_binding_index(&bindings).unwrap()];
        assert_eq!(result.set, 0);
        assert_eq!(result.binding, 9);
        assert_eq!(bindings.iter().filter(|sb| sb.is_result_buffer).count(), 1);
    }

    #[test]
    fn push_set_has_no_inline_block() {
        let params = TestParams::push(Stage::Compute, 2, 1, false);
        let bindings = plan_bindings(&params).unwrap();
        assert_eq!(crate::binding::set_count(&bindings), 3);
        assert!(bindings
            .iter()
            .filter(|sb| sb.set == 1)
            .all(|sb| sb.kind != DescriptorKind::InlineUniformBlock));
        assert!(bindings
            .iter()
            .any(|sb| sb.set == 0 && sb.kind == DescriptorKind::InlineUniformBlock));
    }

    #[test]
    fn max_alternates_sets() {
        let params = TestParams::max(Stage::Compute, 1, 3);
        let bindings = plan_bindings(&params).unwrap();
        let summary = bindings
            .iter()
            .map(|sb| (sb.set, sb.binding, sb.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            [
                (0, 0, DescriptorKind::Sampler),
                (1, 0, DescriptorKind::SampledImage),
                (1, 1, DescriptorKind::StorageBuffer),
                (2, 0, DescriptorKind::SampledImage),
                (3, 0, DescriptorKind::SampledImage),
            ]
        );
        assert!(bindings[2].is_result_buffer);
    }

    #[test]
    fn embedded_layout() {
        let params = TestParams::embedded(Stage::Compute, 2, 2);
        let bindings = plan_bindings(&params).unwrap();
        let samplers = bindings
            .iter()
            .filter(|sb| sb.is_embedded_immutable_sampler)
            .collect::<Vec<_>>();
        assert_eq!(samplers.len(), 4);
        assert!(samplers.iter().all(|sb| sb.set < 2));

        let images = bindings
            .iter()
            .filter(|sb| sb.set == 2 && !sb.is_result_buffer)
            .map(|sb| sb.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            images,
            [
                DescriptorKind::SampledImage,
                DescriptorKind::CombinedImageSampler,
                DescriptorKind::SampledImage,
                DescriptorKind::CombinedImageSampler,
            ]
        );
        let result = bindings.last().unwrap();
        assert!(result.is_result_buffer);
        assert_eq!((result.set, result.binding), (2, 4));
    }
}

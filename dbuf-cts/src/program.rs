//! Builds the verification program the device runs against the bindings.
//!
//! Every probe reads through one descriptor and compares what it finds with
//! the value the writer filled in. Samplers are not probed on their own;
//! they are exercised by the sampled images paired with them.

use hal::{FailureDetail, Probe, VerificationProgram};

use crate::{
    binding::{expected_data, pack, pack_location, BindingLocation, DescriptorKind, SimpleBinding},
    error::TestError,
    params::{TestParams, Variant},
    INLINE_BLOCK_DWORDS, UNIFORM_BUFFER_DWORDS,
};

/// Number of consecutive values a probe checks for each kind.
pub fn probe_count(kind: DescriptorKind) -> u32 {
    match kind {
        DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => UNIFORM_BUFFER_DWORDS,
        DescriptorKind::InlineUniformBlock => INLINE_BLOCK_DWORDS,
        _ => 1,
    }
}

fn sampled_image_probe(
    hash: u32,
    image: &SimpleBinding,
    sampler: &SimpleBinding,
    kind: DescriptorKind,
) -> Probe {
    let sampler_location = sampler.location(0);
    Probe {
        location: image.location(0),
        ty: kind,
        expected: expected_data(hash, image.set, image.binding, 0),
        count: 1,
        sampler: match kind {
            DescriptorKind::SampledImage => Some(sampler_location),
            _ => None,
        },
        failure_tag: pack(image.set, image.binding, 0),
        failure_detail: FailureDetail::Value(pack_location(sampler_location)),
    }
}

fn probe_generic(
    hash: u32,
    bindings: &[SimpleBinding],
    probes: &mut Vec<Probe>,
) -> Result<(), TestError> {
    for sb in bindings.iter() {
        if sb.is_result_buffer || sb.kind == DescriptorKind::Sampler {
            continue;
        }
        if sb.kind == DescriptorKind::AccelerationStructure {
            return Err(TestError::NotImplemented(
                "acceleration structure probes".to_string(),
            ));
        }
        // Sampled images use the first sampler of their set.
        let sampler = match sb.kind {
            DescriptorKind::SampledImage => Some(
                bindings
                    .iter()
                    .find(|other| other.set == sb.set && other.kind == DescriptorKind::Sampler)
                    .ok_or_else(|| {
                        TestError::Internal(format!(
                            "sampled image ({}, {}) has no sampler in its set",
                            sb.set, sb.binding
                        ))
                    })?,
            ),
            _ => None,
        };
        let count = probe_count(sb.kind);

        for array_index in 0..sb.count {
            let data_index = sb.input_attachment_index + array_index;
            probes.push(Probe {
                location: sb.location(array_index),
                ty: sb.kind,
                expected: expected_data(hash, sb.set, sb.binding, data_index),
                count,
                sampler: sampler.map(|sampler| sampler.location(array_index % sampler.count)),
                failure_tag: pack(sb.set, sb.binding, data_index),
                failure_detail: if count > 1 {
                    FailureDetail::Element
                } else {
                    FailureDetail::None
                },
            });
        }
    }
    Ok(())
}

/// Pairs samplers and images round robin until each was used once.
fn probe_max(hash: u32, bindings: &[SimpleBinding], probes: &mut Vec<Probe>) -> Result<(), TestError> {
    let samplers = bindings
        .iter()
        .filter(|sb| sb.kind == DescriptorKind::Sampler)
        .collect::<Vec<_>>();
    let images = bindings
        .iter()
        .filter(|sb| sb.kind == DescriptorKind::SampledImage)
        .collect::<Vec<_>>();
    if samplers.is_empty() || images.is_empty() {
        return Err(TestError::Internal(
            "max bindings plan lacks samplers or images".to_string(),
        ));
    }
    for index in 0..samplers.len().max(images.len()) {
        let sampler = samplers[index % samplers.len()];
        let image = images[index % images.len()];
        probes.push(sampled_image_probe(
            hash,
            image,
            sampler,
            DescriptorKind::SampledImage,
        ));
    }
    Ok(())
}

/// Image `i` of the last set pairs with embedded sampler `i`.
fn probe_embedded(
    hash: u32,
    bindings: &[SimpleBinding],
    probes: &mut Vec<Probe>,
) -> Result<(), TestError> {
    let samplers = bindings
        .iter()
        .filter(|sb| sb.is_embedded_immutable_sampler)
        .collect::<Vec<_>>();
    let images = bindings.iter().filter(|sb| match sb.kind {
        DescriptorKind::SampledImage | DescriptorKind::CombinedImageSampler => true,
        _ => false,
    });
    for (index, image) in images.enumerate() {
        let sampler = samplers.get(index).ok_or_else(|| {
            TestError::Internal(format!("image {} has no embedded sampler", index))
        })?;
        let mut probe = sampled_image_probe(hash, image, sampler, image.kind);
        if image.kind == DescriptorKind::CombinedImageSampler {
            probe.failure_detail = FailureDetail::None;
        }
        probes.push(probe);
    }
    Ok(())
}

/// Builds the program checking every binding of the plan.
pub fn build_program(
    params: &TestParams,
    bindings: &[SimpleBinding],
) -> Result<VerificationProgram, TestError> {
    let hash = params.content_hash();
    let mut probes = Vec::new();
    match params.variant {
        Variant::Single
        | Variant::Multiple
        | Variant::PushDescriptor
        | Variant::PushTemplate
        | Variant::Robustness
        | Variant::CaptureReplay => probe_generic(hash, bindings, &mut probes)?,
        Variant::Max => probe_max(hash, bindings, &mut probes)?,
        Variant::EmbeddedImmutableSamplers => probe_embedded(hash, bindings, &mut probes)?,
    }

    let result = bindings
        .iter()
        .find(|sb| sb.is_result_buffer)
        .map(|sb| sb.location(0));
    if params.is_compute() != result.is_some() {
        return Err(TestError::Internal(format!(
            "{:?} stage plan with result binding {:?}",
            params.stage, result
        )));
    }
    log::debug!(
        "Verification program: {} probes, result at {:?}",
        probes.len(),
        result.map(|location: BindingLocation| (location.set, location.binding))
    );
    Ok(VerificationProgram { probes, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::Stage, plan::plan_bindings};

    #[test]
    fn single_storage_buffer() {
        let params = TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer);
        let bindings = plan_bindings(&params).unwrap();
        let program = build_program(&params, &bindings).unwrap();
        assert_eq!(program.probes.len(), 1);
        let probe = &program.probes[0];
        assert_eq!(probe.count, 4096);
        assert_eq!(
            probe.expected,
            params.content_hash() ^ pack(0, 0, 0)
        );
        assert_eq!(program.result.map(|location| location.binding), Some(1));
    }

    #[test]
    fn sampled_image_uses_its_sets_sampler() {
        let params = TestParams::single(Stage::Fragment, DescriptorKind::SampledImage);
        let bindings = plan_bindings(&params).unwrap();
        let program = build_program(&params, &bindings).unwrap();
        assert_eq!(program.probes.len(), 1);
        assert_eq!(
            program.probes[0].sampler,
            Some(BindingLocation {
                set: 0,
                binding: 1,
                array_index: 0
            })
        );
        assert_eq!(program.result, None);
    }

    #[test]
    fn input_attachment_tags_use_attachment_index() {
        let params = TestParams::multiple(Stage::Fragment, 2, 1);
        let bindings = plan_bindings(&params).unwrap();
        let program = build_program(&params, &bindings).unwrap();
        for sb in bindings
            .iter()
            .filter(|sb| sb.kind == DescriptorKind::InputAttachment)
        {
            for array_index in 0..sb.count {
                let probe = program
                    .probes
                    .iter()
                    .find(|probe| probe.location == sb.location(array_index))
                    .unwrap();
                let data_index = sb.input_attachment_index + array_index;
                assert_eq!(probe.failure_tag, pack(sb.set, sb.binding, data_index));
            }
        }
    }

    #[test]
    fn max_pairs_every_sampler_and_image() {
        let params = TestParams::max(Stage::Compute, 3, 2);
        let bindings = plan_bindings(&params).unwrap();
        let program = build_program(&params, &bindings).unwrap();
        assert_eq!(program.probes.len(), 3);
        let samplers = program
            .probes
            .iter()
            .filter_map(|probe| probe.sampler)
            .map(|location| location.set)
            .collect::<Vec<_>>();
        assert_eq!(samplers, [0, 2, 4]);
        for probe in program.probes.iter() {
            match probe.failure_detail {
                FailureDetail::Value(packed) => {
                    assert_eq!(Some(packed), probe.sampler.map(pack_location))
                }
                other => panic!("unexpected detail {:?}", other),
            }
        }
    }

    #[test]
    fn embedded_images_pair_with_embedded_samplers() {
        let params = TestParams::embedded(Stage::Compute, 2, 1);
        let bindings = plan_bindings(&params).unwrap();
        let program = build_program(&params, &bindings).unwrap();
        assert_eq!(program.probes.len(), 2);
        assert_eq!(program.probes[0].ty, DescriptorKind::SampledImage);
        assert_eq!(program.probes[0].sampler.map(|location| location.set), Some(0));
        assert_eq!(program.probes[1].ty, DescriptorKind::CombinedImageSampler);
        assert_eq!(program.probes[1].sampler, None);
    }
}

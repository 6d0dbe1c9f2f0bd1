use dbuf_cts::{
    params::{QueueKind, Stage},
    DescriptorKind, SubCase, TestError, TestParams,
};

use crate::common::{run_pass, try_run, TestParameters};

const KINDS: [DescriptorKind; 9] = [
    DescriptorKind::Sampler,
    DescriptorKind::CombinedImageSampler,
    DescriptorKind::SampledImage,
    DescriptorKind::StorageImage,
    DescriptorKind::UniformTexelBuffer,
    DescriptorKind::StorageTexelBuffer,
    DescriptorKind::UniformBuffer,
    DescriptorKind::StorageBuffer,
    DescriptorKind::InlineUniformBlock,
];

const GRAPHICS_STAGES: [Stage; 5] = [
    Stage::Vertex,
    Stage::TessellationControl,
    Stage::TessellationEvaluation,
    Stage::Geometry,
    Stage::Fragment,
];

#[test]
fn compute_storage_buffer_checks_every_dword() {
    let report = run_pass(TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer));
    assert_eq!(report.expected, 4096);
    assert_eq!(report.payload.passed, 4096);
    assert_eq!(report.sets.len(), 1);
    // The storage buffer and the result buffer.
    assert_eq!(report.sets[0].binding_offsets.len(), 2);
}

#[test]
fn every_kind_on_both_queues() {
    for &queue in &[QueueKind::Graphics, QueueKind::Compute] {
        for &kind in KINDS.iter() {
            let params = TestParams::single(Stage::Compute, kind).with_queue(queue);
            run_pass(params);
        }
    }
}

#[test]
fn every_kind_in_every_graphics_stage() {
    for &stage in GRAPHICS_STAGES.iter() {
        for &kind in KINDS.iter() {
            run_pass(TestParams::single(stage, kind));
        }
    }
}

#[test]
fn input_attachment_in_fragment() {
    let report = run_pass(TestParams::single(
        Stage::Fragment,
        DescriptorKind::InputAttachment,
    ));
    assert_eq!(report.expected, 1);
}

#[test]
fn input_attachment_outside_fragment_is_invalid() {
    let params = TestParams::single(Stage::Vertex, DescriptorKind::InputAttachment);
    match try_run(TestParameters::default(), params) {
        Err(TestError::InvalidParams(_)) => {}
        other => panic!("unexpected {:?}", other.map(|report| report.status)),
    }
}

#[test]
fn sampler_only_expects_nothing() {
    let report = run_pass(TestParams::single(Stage::Compute, DescriptorKind::Sampler));
    assert_eq!(report.expected, 0);
}

#[test]
fn subcases() {
    for &subcase in &[SubCase::ImmutableSamplers, SubCase::IncrementalBind] {
        for &kind in &[
            DescriptorKind::Sampler,
            DescriptorKind::CombinedImageSampler,
            DescriptorKind::SampledImage,
        ] {
            run_pass(TestParams::single(Stage::Compute, kind).with_subcase(subcase));
            run_pass(TestParams::single(Stage::Fragment, kind).with_subcase(subcase));
        }
    }
}

#[test]
fn acceleration_structure_is_not_implemented() {
    let params = TestParams::single(Stage::Compute, DescriptorKind::AccelerationStructure);
    match try_run(TestParameters::default(), params) {
        Err(TestError::NotImplemented(_)) => {}
        other => panic!("unexpected {:?}", other.map(|report| report.status)),
    }
}

#[test]
fn iterations_are_repeatable() {
    let params = TestParams::single(Stage::Compute, DescriptorKind::UniformTexelBuffer);
    let adapter = crate::common::soft_adapter(hal::soft::Options::default());
    let mut instance = dbuf_cts::TestInstance::<crate::common::Api>::new(
        &adapter,
        params,
        Default::default(),
    )
    .unwrap();
    for _ in 0..3 {
        assert!(instance.iterate().unwrap().is_pass());
    }
}

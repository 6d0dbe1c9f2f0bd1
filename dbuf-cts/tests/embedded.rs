use dbuf_cts::{
    bind::BindCommand,
    layout::SetStorage,
    params::{QueueKind, Stage},
    SubCase, TestParams,
};

use crate::common::run_pass;

#[test]
fn sampler_sets_take_no_buffer() {
    let report = run_pass(TestParams::embedded(Stage::Compute, 2, 2));
    assert_eq!(report.sets.len(), 3);
    for set in report.sets[..2].iter() {
        assert_eq!(set.storage, SetStorage::EmbeddedSamplers);
        assert_eq!(set.buffer_index, None);
    }
    assert_eq!(report.sets[2].storage, SetStorage::DescriptorBuffer);
    assert_eq!(report.sets[2].buffer_index, Some(0));
    assert_eq!(report.buffers.len(), 1);
    assert_eq!(report.buffers[0].first_set, 2);
    // Four images, one per embedded sampler.
    assert_eq!(report.expected, 4);
}

#[test]
fn embedded_sets_are_bound_first() {
    let report = run_pass(TestParams::embedded(Stage::Compute, 3, 1));
    assert_eq!(
        report.bind_commands[..3],
        [
            BindCommand::BindEmbeddedSamplers { set: 0 },
            BindCommand::BindEmbeddedSamplers { set: 1 },
            BindCommand::BindEmbeddedSamplers { set: 2 },
        ]
    );
    match report.bind_commands[3] {
        BindCommand::BindBuffers {
            first_buffer: 0,
            count: 1,
        } => {}
        ref other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn every_stage() {
    for &stage in &[
        Stage::Vertex,
        Stage::TessellationControl,
        Stage::TessellationEvaluation,
        Stage::Geometry,
        Stage::Fragment,
    ] {
        run_pass(TestParams::embedded(stage, 1, 2));
    }
    run_pass(TestParams::embedded(Stage::Compute, 2, 1).with_queue(QueueKind::Compute));
}

#[test]
fn incremental_bind() {
    run_pass(TestParams::embedded(Stage::Compute, 2, 3).with_subcase(SubCase::IncrementalBind));
}

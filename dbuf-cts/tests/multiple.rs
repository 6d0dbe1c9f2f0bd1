use dbuf_cts::{
    bind::BindCommand,
    instance::IterationReport,
    params::{QueueKind, Stage},
    SubCase, TestParams,
};

use crate::common::{run_pass, TestParameters};

fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// Every buffer is exactly as large as its aligned sets, laid out back to back.
fn check_buffer_sizes(report: &IterationReport, alignment: u64) {
    for (index, buffer) in report.buffers.iter().enumerate() {
        let mut cursor = 0;
        for set in report
            .sets
            .iter()
            .filter(|set| set.buffer_index == Some(index as u32))
        {
            assert_eq!(set.buffer_offset, cursor);
            cursor += align_to(set.size, alignment);
        }
        assert_eq!(cursor, buffer.size, "buffer {}", index);
    }
}

#[test]
fn three_buffers_one_set_each() {
    let report = run_pass(TestParams::multiple(Stage::Compute, 3, 1));
    assert_eq!(report.sets.len(), 3);
    let indices = report
        .sets
        .iter()
        .map(|set| set.buffer_index)
        .collect::<Vec<_>>();
    assert_eq!(indices, [Some(0), Some(1), Some(2)]);
    assert_eq!(report.buffers.len(), 3);
    for buffer in report.buffers.iter() {
        assert_ne!(buffer.address, 0);
        assert_eq!(buffer.num_sets, 1);
    }
    check_buffer_sizes(&report, 64);
}

#[test]
fn sets_share_buffers() {
    for &(buffers, sets_per_buffer) in &[(1, 2), (2, 3), (3, 4)] {
        let report = run_pass(TestParams::multiple(Stage::Compute, buffers, sets_per_buffer));
        assert_eq!(report.buffers.len() as u32, buffers);
        assert_eq!(report.sets.len() as u32, buffers * sets_per_buffer);
        for buffer in report.buffers.iter() {
            assert_eq!(buffer.num_sets, sets_per_buffer);
        }
        check_buffer_sizes(&report, 64);
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
        Stage::Compute,
    ] {
        run_pass(TestParams::multiple(stage, 2, 1));
    }
}

#[test]
fn compute_queue() {
    run_pass(TestParams::multiple(Stage::Compute, 2, 2).with_queue(QueueKind::Compute));
}

#[test]
fn every_element_is_checked() {
    let params = TestParams::multiple(Stage::Fragment, 2, 2);
    let bindings = dbuf_cts::plan::plan_bindings(&params).unwrap();
    let elements = bindings
        .iter()
        .filter(|sb| sb.kind != dbuf_cts::DescriptorKind::Sampler)
        .count();
    let report = run_pass(params.clone());
    assert_eq!(
        report.expected,
        dbuf_cts::verify::expected_count(&params, &bindings)
    );
    assert!(report.expected as usize >= elements);
}

fn bind_calls(report: &IterationReport) -> usize {
    report
        .bind_commands
        .iter()
        .filter(|command| match **command {
            BindCommand::BindBuffers { .. } => true,
            _ => false,
        })
        .count()
}

#[test]
fn incremental_bind_matches_unlimited() {
    let params = TestParams::multiple(Stage::Compute, 3, 2);
    let unlimited = run_pass(params.clone());
    assert_eq!(bind_calls(&unlimited), 1);

    for &(buffers, sets) in &[(1, 1), (2, 1), (1, 2)] {
        let incremental = crate::common::run(
            TestParameters::default().bind_limits(buffers, sets),
            params.clone(),
        );
        crate::common::assert_pass(&incremental);
        assert_eq!(unlimited.payload, incremental.payload, "{:?}", (buffers, sets));
        assert_eq!(unlimited.sets.len(), incremental.sets.len());
        assert!(bind_calls(&incremental) > 1);
    }
}

#[test]
fn incremental_bind_subcase() {
    for &stage in &[Stage::Compute, Stage::Fragment] {
        let params = TestParams::multiple(stage, 3, 2).with_subcase(SubCase::IncrementalBind);
        let report = run_pass(params);
        assert!(bind_calls(&report) > 1);
    }
}

#[test]
fn immutable_samplers() {
    run_pass(TestParams::multiple(Stage::Compute, 2, 1).with_subcase(SubCase::ImmutableSamplers));
    run_pass(TestParams::multiple(Stage::Fragment, 1, 2).with_subcase(SubCase::ImmutableSamplers));
}

#[test]
fn alignment_and_set_header() {
    for &alignment in &[16, 256] {
        let parameters = TestParameters::default()
            .options(|options| options.with_offset_alignment(alignment).with_set_header(24));
        let report = crate::common::run(parameters, TestParams::multiple(Stage::Compute, 2, 3));
        crate::common::assert_pass(&report);
        check_buffer_sizes(&report, alignment);
        for set in report.sets.iter() {
            assert!(set.binding_offsets.iter().all(|&offset| offset >= 24));
        }
    }
}

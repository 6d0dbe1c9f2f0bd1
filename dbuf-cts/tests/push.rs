use dbuf_cts::{
    layout::SetStorage,
    params::{QueueKind, Stage},
    SubCase, TestError, TestParams,
};

use crate::common::{run_pass, try_run, TestParameters};

#[test]
fn pushed_set_has_no_buffer() {
    for &template in &[false, true] {
        for push_set in 0..3 {
            let report = run_pass(TestParams::push(Stage::Compute, 2, push_set, template));
            assert_eq!(report.sets.len(), 3);
            assert_eq!(report.buffers.len(), 2);
            for (index, set) in report.sets.iter().enumerate() {
                if index as u32 == push_set {
                    assert_eq!(set.storage, SetStorage::PushDescriptors);
                    assert_eq!(set.buffer_index, None);
                } else {
                    assert_eq!(set.storage, SetStorage::DescriptorBuffer);
                    assert!(set.buffer_index.is_some());
                }
            }
        }
    }
}

#[test]
fn every_stage() {
    for &template in &[false, true] {
        for &stage in &[
            Stage::Vertex,
            Stage::TessellationControl,
            Stage::TessellationEvaluation,
            Stage::Geometry,
            Stage::Fragment,
            Stage::Compute,
        ] {
            run_pass(TestParams::push(stage, 1, 1, template));
        }
        run_pass(TestParams::push(Stage::Compute, 2, 0, template).with_queue(QueueKind::Compute));
    }
}

#[test]
fn subcases() {
    for &subcase in &[SubCase::ImmutableSamplers, SubCase::IncrementalBind] {
        run_pass(TestParams::push(Stage::Compute, 3, 1, false).with_subcase(subcase));
        run_pass(TestParams::push(Stage::Fragment, 3, 2, true).with_subcase(subcase));
    }
}

#[test]
fn only_the_pushed_set() {
    let report = run_pass(TestParams::push(Stage::Compute, 0, 0, false));
    assert!(report.buffers.is_empty());
    assert!(report.bind_commands.is_empty());
}

#[test]
fn push_set_out_of_range() {
    let params = TestParams::push(Stage::Compute, 1, 2, false);
    match try_run(TestParameters::default(), params) {
        Err(TestError::InvalidParams(_)) => {}
        other => panic!("unexpected {:?}", other.map(|report| report.status)),
    }
}

#[test]
fn push_descriptors_need_the_feature() {
    let parameters = TestParameters::default()
        .options(|options| options.without_features(hal::Features::PUSH_DESCRIPTOR));
    let err = try_run(parameters, TestParams::push(Stage::Compute, 1, 0, true)).unwrap_err();
    assert!(err.is_not_supported(), "{}", err);

    let parameters = TestParameters::default().options(|mut options| {
        options.properties.push_descriptors_require_buffer = true;
        options
    });
    let err = try_run(parameters, TestParams::push(Stage::Compute, 1, 0, false)).unwrap_err();
    assert!(err.is_not_supported(), "{}", err);
}

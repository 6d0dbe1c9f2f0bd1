//! Tests that a device lacking what a case needs skips it instead of failing.

use dbuf_cts::{
    caps::CapabilityModel,
    params::{QueueKind, Stage},
    DescriptorKind, TestError, TestParams, TestStatus,
};
use hal::Features;

use crate::common::{soft_adapter, try_run, TestParameters};

fn expect_not_supported(parameters: TestParameters, params: TestParams) {
    match try_run(parameters, params.clone()) {
        Err(ref err) if err.is_not_supported() => {}
        other => panic!(
            "{:?} was not skipped: {:?}",
            params,
            other.map(|report| report.status)
        ),
    }
}

fn without(features: Features) -> TestParameters {
    TestParameters::default().options(|options| options.without_features(features))
}

#[test]
fn missing_features() {
    let storage = TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer);
    expect_not_supported(without(Features::DESCRIPTOR_BUFFER), storage.clone());
    expect_not_supported(without(Features::BUFFER_DEVICE_ADDRESS), storage);
    expect_not_supported(
        without(Features::GEOMETRY_SHADER),
        TestParams::single(Stage::Geometry, DescriptorKind::StorageBuffer),
    );
    expect_not_supported(
        without(Features::TESSELLATION_SHADER),
        TestParams::multiple(Stage::TessellationEvaluation, 1, 1),
    );
    expect_not_supported(
        without(Features::INLINE_UNIFORM_BLOCK),
        TestParams::single(Stage::Compute, DescriptorKind::InlineUniformBlock),
    );
}

#[test]
fn unused_features_are_not_needed() {
    let parameters = without(
        Features::GEOMETRY_SHADER
            | Features::TESSELLATION_SHADER
            | Features::PUSH_DESCRIPTOR
            | Features::ROBUST_BUFFER_ACCESS
            | Features::DESCRIPTOR_BUFFER_CAPTURE_REPLAY
            | Features::INLINE_UNIFORM_BLOCK,
    );
    let report = try_run(
        parameters,
        TestParams::single(Stage::Fragment, DescriptorKind::StorageImage),
    )
    .unwrap();
    assert_eq!(report.status, TestStatus::Pass);
}

#[test]
fn missing_queue() {
    let parameters = TestParameters::default().options(|mut options| {
        options.queues = hal::QueueFlags::GRAPHICS | hal::QueueFlags::TRANSFER;
        options
    });
    expect_not_supported(
        parameters,
        TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer)
            .with_queue(QueueKind::Compute),
    );
}

#[test]
fn binding_limits() {
    expect_not_supported(
        TestParameters::default().options(|options| options.with_max_bindings(4, 4, 4)),
        TestParams::multiple(Stage::Compute, 5, 1),
    );
    expect_not_supported(
        TestParameters::default().options(|options| options.with_max_bindings(8, 2, 8)),
        TestParams::max(Stage::Compute, 3, 1),
    );
    expect_not_supported(
        TestParameters::default().options(|mut options| {
            options.properties.max_embedded_immutable_sampler_bindings = 1;
            options
        }),
        TestParams::embedded(Stage::Compute, 2, 1),
    );
}

/// Multiple bindings sets hold samplers and resources, so every buffer counts
/// against both the sampler and the resource limits.
#[test]
fn grouped_binding_limits() {
    let parameters =
        TestParameters::default().options(|options| options.with_max_bindings(8, 2, 8));
    match try_run(parameters, TestParams::multiple(Stage::Compute, 3, 1)) {
        Err(TestError::NotSupported(msg)) => {
            assert!(msg.contains("max_sampler_descriptor_buffer_bindings"), "{}", msg)
        }
        other => panic!("unexpected {:?}", other.map(|report| report.status)),
    }
}

#[test]
fn limits() {
    let caps = |options| CapabilityModel::new(&soft_adapter(options).capabilities);
    assert_eq!(
        caps(hal::soft::Options::default()).check_limits().unwrap(),
        TestStatus::Pass
    );
    assert_eq!(
        caps(hal::soft::Options::default().with_split_combined_image_samplers())
            .check_limits()
            .unwrap(),
        TestStatus::Pass
    );
    assert_ne!(
        caps(hal::soft::Options::default().with_offset_alignment(512))
            .check_limits()
            .unwrap(),
        TestStatus::Pass
    );
    assert!(caps(hal::soft::Options::default().without_features(Features::DESCRIPTOR_BUFFER))
        .check_limits()
        .unwrap_err()
        .is_not_supported());
}

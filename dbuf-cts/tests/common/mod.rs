//! This module contains common test-only code that needs to be shared between the test modules.

use dbuf_cts::{
    bind::BindLimits, InstanceConfig, IterationReport, TestError, TestInstance, TestParams, TestStatus,
    UploadPolicy,
};
use hal::{soft, Instance as _};

pub type Api = soft::Api;

/// Device and engine setup a test runs under.
#[derive(Clone, Debug)]
pub struct TestParameters {
    pub options: soft::Options,
    pub config: InstanceConfig,
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            options: soft::Options::default(),
            config: InstanceConfig::default(),
        }
    }
}

impl TestParameters {
    pub fn options(mut self, map: impl FnOnce(soft::Options) -> soft::Options) -> Self {
        self.options = map(self.options);
        self
    }

    pub fn upload_policy(mut self, upload_policy: UploadPolicy) -> Self {
        self.config.upload_policy = upload_policy;
        self
    }

    pub fn bind_limits(mut self, buffers: u32, sets: u32) -> Self {
        self.config.bind_limits = Some(BindLimits { buffers, sets });
        self
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn soft_adapter(options: soft::Options) -> hal::ExposedAdapter<Api> {
    init_logger();
    let instance = soft::Instance::new(options);
    let mut adapters = unsafe { instance.enumerate_adapters() };
    assert!(!adapters.is_empty(), "soft instance exposes no adapter");
    adapters.swap_remove(0)
}

/// Runs one iteration of `params` on a fresh device.
pub fn try_run(parameters: TestParameters, params: TestParams) -> Result<IterationReport, TestError> {
    let adapter = soft_adapter(parameters.options);
    let mut instance = TestInstance::<Api>::new(&adapter, params, parameters.config)?;
    instance.run()
}

pub fn run(parameters: TestParameters, params: TestParams) -> IterationReport {
    match try_run(parameters, params.clone()) {
        Ok(report) => report,
        Err(err) => panic!("{:?} did not run: {}", params, err),
    }
}

pub fn assert_pass(report: &IterationReport) {
    assert_eq!(
        report.status,
        TestStatus::Pass,
        "payload {:?}, expected {}",
        report.payload,
        report.expected
    );
    assert_eq!(report.payload.passed, report.expected);
    assert_eq!(report.payload.first_failure, 0);
}

/// Runs `params` under default setup and checks that it passes.
pub fn run_pass(params: TestParams) -> IterationReport {
    let report = run(TestParameters::default(), params);
    assert_pass(&report);
    report
}

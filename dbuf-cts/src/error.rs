use thiserror::Error;

use crate::registry::InvalidId;

/// Why a test iteration could not produce a verdict.
///
/// A wrong result is not an error: it is reported as `TestStatus::Fail`.
#[derive(Clone, Debug, Error)]
pub enum TestError {
    /// A feature or limit the test needs is absent. The test is skipped.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// The test reached a descriptor kind or variant it has no rule for.
    #[error("{0} is not implemented")]
    NotImplemented(String),
    /// The parameters contradict each other.
    #[error("invalid test parameters: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Device(#[from] hal::DeviceError),
    #[error(transparent)]
    Shader(#[from] hal::ShaderError),
    #[error(transparent)]
    Pipeline(#[from] hal::PipelineError),
}

impl From<InvalidId> for TestError {
    fn from(err: InvalidId) -> Self {
        Self::Internal(err.to_string())
    }
}

impl TestError {
    /// Whether the test should be reported as skipped rather than failed.
    pub fn is_not_supported(&self) -> bool {
        match *self {
            Self::NotSupported(_) => true,
            Self::Device(hal::DeviceError::UnsupportedFeatures(_)) => true,
            _ => false,
        }
    }
}

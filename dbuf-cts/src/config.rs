//! Knobs that change how an iteration runs without changing what it tests.

use crate::bind::BindLimits;

/// How descriptor buffer memory receives its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadPolicy {
    /// Every other descriptor buffer is uploaded through a staging buffer,
    /// the rest are written directly.
    Mixed,
    /// Write every descriptor buffer directly, falling back to staging when
    /// no memory is both device local and host visible.
    AllDirect,
    /// Upload every descriptor buffer through a staging buffer.
    AllStaged,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::Mixed
    }
}

impl UploadPolicy {
    /// Get an upload policy from the environment variable `DBUF_UPLOAD_POLICY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("DBUF_UPLOAD_POLICY")
            .as_deref()
            .map(str::to_lowercase)
            .ok()
            .as_deref()
            .and_then(Self::parse)
    }

    pub fn parse(string: &str) -> Option<Self> {
        Some(match string.trim() {
            "mixed" => Self::Mixed,
            "direct" | "all_direct" => Self::AllDirect,
            "staged" | "all_staged" => Self::AllStaged,
            _ => return None,
        })
    }

    /// Whether the buffer with the given creation index starts out staged.
    pub fn prefers_staged(self, buffer_index: u32) -> bool {
        match self {
            Self::Mixed => buffer_index % 2 == 1,
            Self::AllDirect => false,
            Self::AllStaged => true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InstanceConfig {
    pub upload_policy: UploadPolicy,
    /// Replaces the bind call limits derived from the test parameters.
    pub bind_limits: Option<BindLimits>,
}

impl InstanceConfig {
    /// Default configuration, overridden by the environment.
    pub fn from_env() -> Self {
        let upload_policy = UploadPolicy::from_env().unwrap_or_default();
        log::debug!("Descriptor upload policy: {:?}", upload_policy);
        Self {
            upload_policy,
            bind_limits: None,
        }
    }
}

#[test]
fn test_upload_policy_parse() {
    assert_eq!(UploadPolicy::parse("mixed"), Some(UploadPolicy::Mixed));
    assert_eq!(UploadPolicy::parse("all_staged"), Some(UploadPolicy::AllStaged));
    assert_eq!(UploadPolicy::parse(" direct"), Some(UploadPolicy::AllDirect));
    assert_eq!(UploadPolicy::parse("sometimes"), None);

    let staged = (0..4)
        .filter(|&index| UploadPolicy::Mixed.prefers_staged(index))
        .collect::<Vec<_>>();
    assert_eq!(staged, [1, 3]);
}

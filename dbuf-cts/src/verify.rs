//! Compares the device's verdict with what the bindings should produce.

use std::fmt;

use crate::{
    binding::{unpack, DescriptorKind, SimpleBinding},
    params::{TestParams, Variant},
    INLINE_BLOCK_DWORDS, UNIFORM_BUFFER_DWORDS,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail(String),
}

impl TestStatus {
    pub fn is_pass(&self) -> bool {
        *self == Self::Pass
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Pass => write!(f, "Pass"),
            Self::Fail(ref msg) => write!(f, "Fail: {}", msg),
        }
    }
}

/// The four words a verification program writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResultPayload {
    /// Successful checks.
    pub passed: u32,
    /// Packed location of the first failed check, 0 if none.
    pub first_failure: u32,
    /// Element index, or packed sampler location, of the first failure.
    pub detail: u32,
    pub reserved: u32,
}

impl ResultPayload {
    pub fn from_words(words: &[u32]) -> Option<Self> {
        match *words {
            [passed, first_failure, detail, reserved, ..] => Some(Self {
                passed,
                first_failure,
                detail,
                reserved,
            }),
            _ => None,
        }
    }
}

/// Number of checks a correct device passes.
pub fn expected_count(params: &TestParams, bindings: &[SimpleBinding]) -> u32 {
    if params.variant == Variant::Max {
        // Every sampler and every image is used at least once.
        return params
            .sampler_buffer_binding_count
            .max(params.resource_buffer_binding_count);
    }
    bindings
        .iter()
        .filter(|sb| !sb.is_result_buffer)
        .map(|sb| match sb.kind {
            DescriptorKind::InlineUniformBlock => INLINE_BLOCK_DWORDS,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => {
                UNIFORM_BUFFER_DWORDS * sb.count
            }
            DescriptorKind::Sampler => 0,
            _ => sb.count,
        })
        .sum()
}

pub fn verify(params: &TestParams, expected: u32, payload: ResultPayload) -> TestStatus {
    if payload.passed == expected {
        return TestStatus::Pass;
    }
    let bad = unpack(payload.first_failure);
    let mut msg = format!(
        "Wrong value in result buffer. Expected ({}) but got ({}). \
         The first wrong binding is (set = {}, binding = {})",
        expected, payload.passed, bad.set, bad.binding
    );
    if params.variant == Variant::Max {
        let sampler = unpack(payload.detail);
        msg += &format!(
            " which used a sampler (set = {}, binding = {})",
            sampler.set, sampler.binding
        );
    } else if bad.array_index > 0 {
        msg += &format!(" at array index {}", bad.array_index);
    }
    msg.push('.');
    log::warn!("{}", msg);
    TestStatus::Fail(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{binding::pack, params::Stage, plan::plan_bindings};

    #[test]
    fn single_storage_buffer_expects_every_dword() {
        let params = TestParams::single(Stage::Compute, DescriptorKind::StorageBuffer);
        let bindings = plan_bindings(&params).unwrap();
        assert_eq!(expected_count(&params, &bindings), 4096);
    }

    #[test]
    fn samplers_count_through_images() {
        let bindings = [
            SimpleBinding::new(0, 0, DescriptorKind::SampledImage, 3),
            SimpleBinding::new(0, 1, DescriptorKind::Sampler, 2),
            SimpleBinding::new(0, 2, DescriptorKind::InlineUniformBlock, 1),
            SimpleBinding::new(0, 3, DescriptorKind::UniformBuffer, 2),
            SimpleBinding::result_buffer(0, 4),
        ];
        let params = TestParams::multiple(Stage::Compute, 1, 1);
        assert_eq!(expected_count(&params, &bindings), 3 + 64 + 2 * 4096);
    }

    #[test]
    fn max_counts_pairs() {
        let params = TestParams::max(Stage::Compute, 2, 5);
        let bindings = plan_bindings(&params).unwrap();
        assert_eq!(expected_count(&params, &bindings), 5);
    }

    #[test]
    fn mismatch_names_the_binding() {
        let params = TestParams::multiple(Stage::Compute, 2, 1);
        let payload = ResultPayload {
            passed: 10,
            first_failure: pack(1, 4, 2),
            detail: 0,
            reserved: 0,
        };
        match verify(&params, 12, payload) {
            TestStatus::Fail(msg) => {
                assert!(msg.contains("Expected (12) but got (10)"));
                assert!(msg.contains("(set = 1, binding = 4) at array index 2."));
            }
            TestStatus::Pass => panic!("mismatch accepted"),
        }
        assert_eq!(
            verify(&params, 10, payload),
            TestStatus::Pass
        );
    }

    #[test]
    fn max_mismatch_names_the_sampler() {
        let params = TestParams::max(Stage::Compute, 2, 2);
        let payload = ResultPayload {
            passed: 1,
            first_failure: pack(3, 0, 0),
            detail: pack(2, 0, 0),
            reserved: 0,
        };
        match verify(&params, 2, payload) {
            TestStatus::Fail(msg) => {
                assert!(msg.ends_with("which used a sampler (set = 2, binding = 0)."))
            }
            TestStatus::Pass => panic!("mismatch accepted"),
        }
    }
}

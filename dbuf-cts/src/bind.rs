//! Plans the commands that attach descriptor buffers and point sets into them.
//!
//! Planning is pure: `plan_bind_commands` turns the set placement into a list
//! of `BindCommand`s, `replay` checks what such a list leaves bound, and
//! `encode` records it. Two batch limits cap how many buffers and how many
//! set offsets go into a single call.

use hal::{BufferAddress, CommandEncoder as _};
use smallvec::SmallVec;

use crate::{
    alloc::DescriptorBuffer,
    error::TestError,
    layout::{SetLayout, SetStorage},
    params::{SubCase, TestParams},
};

/// Maximum number of buffers per bind call and of sets per offsets call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindLimits {
    pub buffers: u32,
    pub sets: u32,
}

impl BindLimits {
    pub fn unlimited(buffer_count: u32, set_count: u32) -> Self {
        Self {
            buffers: buffer_count.max(1),
            sets: set_count.max(1),
        }
    }

    /// The incremental bind sub-case splits the calls on purpose.
    pub fn for_params(params: &TestParams, buffer_count: u32, set_count: u32) -> Self {
        match params.subcase {
            SubCase::IncrementalBind => Self {
                buffers: if buffer_count > 2 { 2 } else { 1 },
                sets: (params.sets_per_buffer / 2).max(1),
            },
            SubCase::None | SubCase::ImmutableSamplers => {
                Self::unlimited(buffer_count, set_count)
            }
        }
    }
}

/// How a set is reached at bind time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetBinding {
    /// Offset `offset` inside descriptor buffer `buffer_index`.
    Buffer {
        buffer_index: u32,
        offset: BufferAddress,
    },
    EmbeddedSamplers,
    /// Push descriptors, handled outside of the bind sequence.
    Unbound,
}

impl SetBinding {
    pub fn from_layout<A: hal::Api>(set: &SetLayout<A>) -> Result<Self, TestError> {
        Ok(match set.storage() {
            SetStorage::EmbeddedSamplers => Self::EmbeddedSamplers,
            SetStorage::PushDescriptors => Self::Unbound,
            SetStorage::DescriptorBuffer => Self::Buffer {
                buffer_index: set.buffer_index.ok_or_else(|| {
                    TestError::Internal("descriptor buffer set has no buffer".to_string())
                })?,
                offset: set.buffer_offset,
            },
        })
    }

    fn buffer_index(&self) -> Option<u32> {
        match *self {
            Self::Buffer { buffer_index, .. } => Some(buffer_index),
            Self::EmbeddedSamplers | Self::Unbound => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindCommand {
    BindEmbeddedSamplers {
        set: u32,
    },
    /// Binds buffers `first_buffer..first_buffer + count`.
    BindBuffers {
        first_buffer: u32,
        count: u32,
    },
    SetOffsets {
        first_set: u32,
        buffer_indices: SmallVec<[u32; 4]>,
        offsets: SmallVec<[BufferAddress; 4]>,
    },
}

/// Pending `(buffer index, offset)` pairs of consecutive sets.
#[derive(Default)]
struct PendingOffsets {
    buffer_indices: SmallVec<[u32; 4]>,
    offsets: SmallVec<[BufferAddress; 4]>,
}

impl PendingOffsets {
    fn len(&self) -> u32 {
        self.buffer_indices.len() as u32
    }

    fn flush(&mut self, first_set: u32, commands: &mut Vec<BindCommand>) {
        if self.buffer_indices.is_empty() {
            return;
        }
        commands.push(BindCommand::SetOffsets {
            first_set,
            buffer_indices: std::mem::take(&mut self.buffer_indices),
            offsets: std::mem::take(&mut self.offsets),
        });
    }
}

/// Plans the bind sequence for `sets` over `buffer_count` descriptor buffers.
///
/// Embedded sampler sets come first and are bound one by one. Then buffers
/// are bound in batches of `limits.buffers`, and after each batch the offsets
/// of every set whose buffer is bound are set in batches of `limits.sets`.
pub fn plan_bind_commands(
    sets: &[SetBinding],
    buffer_count: u32,
    limits: BindLimits,
) -> Result<Vec<BindCommand>, TestError> {
    if limits.buffers == 0 || limits.sets == 0 {
        return Err(TestError::Internal(format!("bind limits {:?}", limits)));
    }
    let set_count = sets.len() as u32;
    let mut commands = Vec::new();
    let mut first_set = 0;

    for (index, set) in sets.iter().enumerate() {
        if *set != SetBinding::EmbeddedSamplers {
            continue;
        }
        let index = index as u32;
        if index != first_set {
            return Err(TestError::Internal(format!(
                "embedded sampler set {} follows a set with descriptor memory",
                index
            )));
        }
        commands.push(BindCommand::BindEmbeddedSamplers { set: index });
        first_set = index + 1;
    }

    let mut next_buffer = 0;
    let mut pending = PendingOffsets::default();
    loop {
        let first_buffer = next_buffer;
        next_buffer = (next_buffer + limits.buffers).min(buffer_count);
        if next_buffer > first_buffer {
            commands.push(BindCommand::BindBuffers {
                first_buffer,
                count: next_buffer - first_buffer,
            });
        }

        let mut set_index = first_set;
        while set_index < set_count {
            let set = sets[set_index as usize];
            let buffer_index = set.buffer_index();
            let is_bound = buffer_index.map_or(false, |index| index < next_buffer);
            if let Some(index) = buffer_index {
                if index >= buffer_count {
                    return Err(TestError::Internal(format!(
                        "set {} uses buffer {} of {}",
                        set_index, index, buffer_count
                    )));
                }
            }

            if is_bound {
                if let SetBinding::Buffer {
                    buffer_index,
                    offset,
                } = set
                {
                    pending.buffer_indices.push(buffer_index);
                    pending.offsets.push(offset);
                }
                if pending.len() == limits.sets || set_index + 1 == set_count {
                    pending.flush(first_set, &mut commands);
                    first_set = set_index + 1;
                }
            } else {
                pending.flush(first_set, &mut commands);
                first_set = set_index;
                if buffer_index.is_some() {
                    // Retry once more buffers are bound.
                    break;
                }
                first_set += 1;
            }
            set_index += 1;
        }

        if next_buffer >= buffer_count {
            break;
        }
    }
    Ok(commands)
}

/// Final state of one bind point after replaying a command list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindState {
    pub buffers_bound: Vec<bool>,
    /// `(buffer index, offset)` of every set, once set.
    pub set_offsets: Vec<Option<(u32, BufferAddress)>>,
    pub embedded_sets: Vec<u32>,
}

/// Replays `commands`, rejecting offsets into unbound buffers and sets assigned twice.
pub fn replay(
    commands: &[BindCommand],
    buffer_count: u32,
    set_count: u32,
) -> Result<BindState, String> {
    let mut state = BindState {
        buffers_bound: vec![false; buffer_count as usize],
        set_offsets: vec![None; set_count as usize],
        embedded_sets: Vec::new(),
    };
    for command in commands {
        match *command {
            BindCommand::BindEmbeddedSamplers { set } => state.embedded_sets.push(set),
            BindCommand::BindBuffers {
                first_buffer,
                count,
            } => {
                for index in first_buffer..first_buffer + count {
                    match state.buffers_bound.get_mut(index as usize) {
                        Some(bound) => *bound = true,
                        None => return Err(format!("buffer {} does not exist", index)),
                    }
                }
            }
            BindCommand::SetOffsets {
                first_set,
                ref buffer_indices,
                ref offsets,
            } => {
                if buffer_indices.len() != offsets.len() {
                    return Err(format!("offsets of set {} are mismatched", first_set));
                }
                for (i, (&buffer_index, &offset)) in
                    buffer_indices.iter().zip(offsets.iter()).enumerate()
                {
                    let set = first_set as usize + i;
                    if !state
                        .buffers_bound
                        .get(buffer_index as usize)
                        .copied()
                        .unwrap_or(false)
                    {
                        return Err(format!(
                            "set {} points into unbound buffer {}",
                            set, buffer_index
                        ));
                    }
                    let slot = state
                        .set_offsets
                        .get_mut(set)
                        .ok_or_else(|| format!("set {} does not exist", set))?;
                    if slot.is_some() {
                        return Err(format!("set {} is set twice", set));
                    }
                    *slot = Some((buffer_index, offset));
                }
            }
        }
    }
    Ok(state)
}

/// Records the planned commands.
pub unsafe fn encode<A: hal::Api>(
    encoder: &mut A::CommandEncoder,
    commands: &[BindCommand],
    buffers: &[DescriptorBuffer<A>],
    bind_point: hal::BindPoint,
    layout: &A::PipelineLayout,
) {
    for command in commands {
        match *command {
            BindCommand::BindEmbeddedSamplers { set } => {
                encoder.bind_descriptor_buffer_embedded_samplers(bind_point, layout, set)
            }
            BindCommand::BindBuffers {
                first_buffer,
                count,
            } => {
                let bindings = buffers[first_buffer as usize..(first_buffer + count) as usize]
                    .iter()
                    .map(DescriptorBuffer::binding)
                    .collect::<SmallVec<[_; 4]>>();
                encoder.bind_descriptor_buffers(first_buffer, &bindings);
            }
            BindCommand::SetOffsets {
                first_set,
                ref buffer_indices,
                ref offsets,
            } => encoder.set_descriptor_buffer_offsets(
                bind_point,
                layout,
                first_set,
                buffer_indices,
                offsets,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_sets(sets_per_buffer: u32, buffer_count: u32) -> Vec<SetBinding> {
        (0..buffer_count * sets_per_buffer)
            .map(|set| SetBinding::Buffer {
                buffer_index: set / sets_per_buffer,
                offset: (set % sets_per_buffer) as BufferAddress * 64,
            })
            .collect()
    }

    fn expected_offsets(sets: &[SetBinding]) -> Vec<Option<(u32, BufferAddress)>> {
        sets.iter()
            .map(|set| match *set {
                SetBinding::Buffer {
                    buffer_index,
                    offset,
                } => Some((buffer_index, offset)),
                SetBinding::EmbeddedSamplers | SetBinding::Unbound => None,
            })
            .collect()
    }

    #[test]
    fn unlimited_binds_in_two_calls() {
        let sets = buffer_sets(2, 3);
        let commands = plan_bind_commands(&sets, 3, BindLimits::unlimited(3, 6)).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            BindCommand::BindBuffers {
                first_buffer: 0,
                count: 3
            }
        );
        let state = replay(&commands, 3, 6).unwrap();
        assert_eq!(state.set_offsets, expected_offsets(&sets));
    }

    #[test]
    fn every_limit_binds_the_same() {
        for &(sets_per_buffer, buffer_count) in &[(1, 1), (1, 3), (2, 3), (3, 4), (4, 2)] {
            let sets = buffer_sets(sets_per_buffer, buffer_count);
            let set_count = sets.len() as u32;
            for buffers in 1..=buffer_count + 1 {
                for set_limit in 1..=set_count + 1 {
                    let limits = BindLimits {
                        buffers,
                        sets: set_limit,
                    };
                    let commands = plan_bind_commands(&sets, buffer_count, limits).unwrap();
                    let state = replay(&commands, buffer_count, set_count).unwrap();
                    assert_eq!(state.set_offsets, expected_offsets(&sets), "{:?}", limits);
                    assert!(state.buffers_bound.iter().all(|&bound| bound));
                    for command in commands.iter() {
                        match *command {
                            BindCommand::BindBuffers { count, .. } => assert!(count <= buffers),
                            BindCommand::SetOffsets {
                                ref buffer_indices, ..
                            } => assert!(buffer_indices.len() as u32 <= set_limit),
                            BindCommand::BindEmbeddedSamplers { .. } => {}
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn push_and_embedded_sets_are_skipped() {
        let sets = vec![
            SetBinding::EmbeddedSamplers,
            SetBinding::EmbeddedSamplers,
            SetBinding::Buffer {
                buffer_index: 0,
                offset: 0,
            },
            SetBinding::Unbound,
            SetBinding::Buffer {
                buffer_index: 1,
                offset: 0,
            },
        ];
        let limits = BindLimits {
            buffers: 1,
            sets: 1,
        };
        let commands = plan_bind_commands(&sets, 2, limits).unwrap();
        assert_eq!(
            &commands[..2],
            &[
                BindCommand::BindEmbeddedSamplers { set: 0 },
                BindCommand::BindEmbeddedSamplers { set: 1 },
            ]
        );
        let state = replay(&commands, 2, 5).unwrap();
        assert_eq!(state.embedded_sets, [0, 1]);
        assert_eq!(state.set_offsets, expected_offsets(&sets));
        for command in commands.iter() {
            if let BindCommand::SetOffsets { first_set, .. } = *command {
                assert!(first_set == 2 || first_set == 4);
            }
        }
    }

    #[test]
    fn only_push_sets_bind_nothing() {
        let sets = vec![SetBinding::Unbound];
        let commands = plan_bind_commands(&sets, 0, BindLimits::unlimited(0, 1)).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn embedded_sets_must_come_first() {
        let sets = vec![
            SetBinding::Buffer {
                buffer_index: 0,
                offset: 0,
            },
            SetBinding::EmbeddedSamplers,
        ];
        assert!(plan_bind_commands(&sets, 1, BindLimits::unlimited(1, 2)).is_err());
    }

    #[test]
    fn replay_rejects_offsets_before_binding() {
        let commands = [
            BindCommand::SetOffsets {
                first_set: 0,
                buffer_indices: SmallVec::from_slice(&[0]),
                offsets: SmallVec::from_slice(&[0]),
            },
            BindCommand::BindBuffers {
                first_buffer: 0,
                count: 1,
            },
        ];
        assert!(replay(&commands, 1, 1).is_err());
    }

    #[test]
    fn incremental_limits() {
        let params = TestParams::multiple(crate::params::Stage::Compute, 3, 4)
            .with_subcase(SubCase::IncrementalBind);
        assert_eq!(
            BindLimits::for_params(&params, 3, 12),
            BindLimits {
                buffers: 2,
                sets: 2
            }
        );
        let params = TestParams::multiple(crate::params::Stage::Compute, 2, 1)
            .with_subcase(SubCase::IncrementalBind);
        assert_eq!(
            BindLimits::for_params(&params, 2, 2),
            BindLimits {
                buffers: 1,
                sets: 1
            }
        );
    }
}

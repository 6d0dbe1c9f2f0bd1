/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/*! Conformance engine for descriptor buffers.
 *
 *  One test iteration runs through the following stages, each in its own
 *  module:
 *  - `plan` expands `TestParams` into `SimpleBinding`s.
 *  - `layout` groups them into set layouts and lets the device place them.
 *  - `alloc` groups sets into descriptor buffers and picks their residency.
 *  - `writer` creates the backing resources and serializes descriptors.
 *  - `bind` plans and records the descriptor buffer binding commands.
 *  - `verify` checks what the device computed.
 *
 *  `instance::TestInstance` drives all of them against any `hal::Api`.
 */

#![allow(
    // We use loops for getting early-out of scope without closures.
    clippy::never_loop,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod alloc;
pub mod bind;
pub mod binding;
pub mod caps;
pub mod config;
pub mod error;
pub mod instance;
pub mod layout;
pub mod params;
pub mod plan;
pub mod program;
mod push;
pub mod registry;
pub mod verify;
pub mod writer;

pub use binding::{DescriptorKind, SimpleBinding};
pub use config::{InstanceConfig, UploadPolicy};
pub use error::TestError;
pub use instance::{IterationReport, TestInstance};
pub use params::{SubCase, TestParams, Variant};
pub use verify::TestStatus;

/// Dwords in the buffer receiving a compute result.
pub const RESULT_BUFFER_DWORDS: u32 = 4;
/// Dwords held by an inline uniform block binding.
pub const INLINE_BLOCK_DWORDS: u32 = 64;
/// Dwords held by every uniform and storage buffer.
pub const UNIFORM_BUFFER_DWORDS: u32 = 4096;
/// Largest array a generated binding may have.
pub const MAX_DESCRIPTOR_ARRAY_SIZE: usize = 4;

/// Size of every image, and of the graphics render area.
pub const RENDER_EXTENT: hal::Extent = hal::Extent {
    width: 4,
    height: 1,
};

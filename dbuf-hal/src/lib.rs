/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/*! This library describes the device abstraction used by the descriptor
 *  buffer conformance engine. It follows the Vulkan descriptor buffer model
 *  for the most part, with the following deviations:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Mapping is persistent, with explicit synchronization.
 *  - Resource transitions are explicit.
 *  - Descriptor memory is plain buffer memory. Layouts report their sizes
 *    and binding offsets, and descriptors are serialized by the device
 *    straight into caller-provided bytes.
 *  - Shaders are handed over as a `VerificationProgram`, a list of probes
 *    that a backend lowers into its own shading language.
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
    // Descriptor calls mirror the device entry points one to one.
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

#[cfg(feature = "soft")]
pub mod soft;

use std::{fmt, ops::Range, ptr::NonNull};

use bitflags::bitflags;
use thiserror::Error;

pub type Label<'a> = Option<&'a str>;
pub type BufferAddress = u64;
pub type MemoryRange = Range<BufferAddress>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
    #[error("memory type {0} can not back this resource")]
    IncompatibleMemoryType(u32),
    #[error("no memory type has the required properties")]
    NoCompatibleMemory,
    #[error("buffer memory is not host visible")]
    NotMappable,
    #[error("features {0:?} are not supported by the adapter")]
    UnsupportedFeatures(Features),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ShaderError {
    #[error("compilation failed: {0:?}")]
    Compilation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum PipelineError {
    #[error("linkage failed for stage {0:?}: {1}")]
    Linkage(ShaderStage, String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub trait Api: Clone + Sized {
    type Instance: Instance<Self>;
    type Adapter: Adapter<Self>;
    type Device: Device<Self>;
    type Queue: Queue<Self>;

    type CommandEncoder: CommandEncoder<Self>;
    type CommandBuffer: fmt::Debug + Send + Sync;

    type Buffer: fmt::Debug + Send + Sync + 'static;
    type BufferView: fmt::Debug + Send + Sync;
    type Texture: fmt::Debug + Send + Sync + 'static;
    type TextureView: fmt::Debug + Send + Sync;
    type Sampler: fmt::Debug + Send + Sync;

    type DescriptorSetLayout: fmt::Debug + Send + Sync;
    type PipelineLayout: fmt::Debug + Send + Sync;
    type DescriptorUpdateTemplate: fmt::Debug + Send + Sync;
    type ShaderModule: fmt::Debug + Send + Sync;
    type Pipeline: fmt::Debug + Send + Sync;
}

pub trait Instance<A: Api>: Sized + Send + Sync {
    unsafe fn enumerate_adapters(&self) -> Vec<ExposedAdapter<A>>;
}

pub trait Adapter<A: Api>: Send + Sync {
    /// Create a device with the given features enabled, and a queue of the given kind.
    unsafe fn open(&self, features: Features, queue: QueueKind)
        -> Result<OpenDevice<A>, DeviceError>;
}

pub trait Device<A: Api>: Send + Sync {
    /// Creates a new buffer without any memory bound to it.
    unsafe fn create_buffer(&self, desc: &BufferDescriptor) -> Result<A::Buffer, DeviceError>;
    unsafe fn destroy_buffer(&self, buffer: A::Buffer);
    unsafe fn buffer_memory_requirements(&self, buffer: &A::Buffer) -> MemoryRequirements;
    /// Allocates dedicated memory of the given type and binds it to the buffer.
    unsafe fn bind_buffer_memory(
        &self,
        buffer: &mut A::Buffer,
        memory_type: u32,
    ) -> Result<(), DeviceError>;
    /// Requires memory to be bound.
    unsafe fn buffer_device_address(&self, buffer: &A::Buffer) -> BufferAddress;
    unsafe fn map_buffer(&self, buffer: &A::Buffer) -> Result<BufferMapping, DeviceError>;
    unsafe fn unmap_buffer(&self, buffer: &A::Buffer) -> Result<(), DeviceError>;
    unsafe fn flush_mapped_ranges<I>(&self, buffer: &A::Buffer, ranges: I)
    where
        I: Iterator<Item = MemoryRange>;
    unsafe fn invalidate_mapped_ranges<I>(&self, buffer: &A::Buffer, ranges: I)
    where
        I: Iterator<Item = MemoryRange>;

    unsafe fn create_buffer_view(
        &self,
        buffer: &A::Buffer,
        desc: &BufferViewDescriptor,
    ) -> Result<A::BufferView, DeviceError>;
    unsafe fn destroy_buffer_view(&self, view: A::BufferView);

    /// Creates a texture backed by device-local memory.
    unsafe fn create_texture(&self, desc: &TextureDescriptor) -> Result<A::Texture, DeviceError>;
    unsafe fn destroy_texture(&self, texture: A::Texture);
    unsafe fn create_texture_view(
        &self,
        texture: &A::Texture,
        desc: &TextureViewDescriptor,
    ) -> Result<A::TextureView, DeviceError>;
    unsafe fn destroy_texture_view(&self, view: A::TextureView);
    unsafe fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<A::Sampler, DeviceError>;
    unsafe fn destroy_sampler(&self, sampler: A::Sampler);

    unsafe fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor<A>,
    ) -> Result<A::DescriptorSetLayout, DeviceError>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: A::DescriptorSetLayout);
    /// Number of bytes the layout occupies in descriptor buffer memory.
    unsafe fn descriptor_set_layout_size(&self, layout: &A::DescriptorSetLayout) -> BufferAddress;
    /// Byte offset of a binding relative to the start of the set.
    unsafe fn descriptor_set_layout_binding_offset(
        &self,
        layout: &A::DescriptorSetLayout,
        binding: u32,
    ) -> BufferAddress;
    /// Serializes one descriptor into `dst`, which is exactly one descriptor in size.
    unsafe fn get_descriptor(&self, data: &DescriptorData<A>, dst: &mut [u8]);

    unsafe fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDescriptor<A>,
    ) -> Result<A::PipelineLayout, DeviceError>;
    unsafe fn destroy_pipeline_layout(&self, pipeline_layout: A::PipelineLayout);
    unsafe fn create_descriptor_update_template(
        &self,
        desc: &DescriptorUpdateTemplateDescriptor<A>,
    ) -> Result<A::DescriptorUpdateTemplate, DeviceError>;
    unsafe fn destroy_descriptor_update_template(&self, template: A::DescriptorUpdateTemplate);

    unsafe fn create_shader_module(
        &self,
        desc: &ShaderModuleDescriptor,
    ) -> Result<A::ShaderModule, ShaderError>;
    unsafe fn destroy_shader_module(&self, module: A::ShaderModule);
    unsafe fn create_pipeline(
        &self,
        desc: &PipelineDescriptor<A>,
    ) -> Result<A::Pipeline, PipelineError>;
    unsafe fn destroy_pipeline(&self, pipeline: A::Pipeline);

    unsafe fn create_command_encoder(
        &self,
        desc: &CommandEncoderDescriptor,
    ) -> Result<A::CommandEncoder, DeviceError>;
    unsafe fn destroy_command_encoder(&self, pool: A::CommandEncoder);
}

pub trait Queue<A: Api>: Send + Sync {
    unsafe fn submit(&mut self, command_buffers: &[&A::CommandBuffer]) -> Result<(), DeviceError>;
    /// Blocks until all submitted work is complete.
    unsafe fn wait_idle(&mut self) -> Result<(), DeviceError>;
}

pub trait CommandEncoder<A: Api>: Send + Sync {
    /// Begin encoding a new command buffer.
    unsafe fn begin_encoding(&mut self, label: Label) -> Result<(), DeviceError>;
    /// Discard currently recorded list, if any.
    unsafe fn discard_encoding(&mut self);
    unsafe fn end_encoding(&mut self) -> Result<A::CommandBuffer, DeviceError>;

    unsafe fn transition_buffers<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = BufferBarrier<'a, A>>;
    unsafe fn transition_textures<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = TextureBarrier<'a, A>>;

    unsafe fn copy_buffer_to_buffer<T>(&mut self, src: &A::Buffer, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferCopy>;
    /// Note: `dst` current usage has to be `TextureLayout::TransferDst`.
    unsafe fn copy_buffer_to_texture<T>(&mut self, src: &A::Buffer, dst: &A::Texture, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;
    /// Note: `src` current usage has to be `TextureLayout::TransferSrc`.
    unsafe fn copy_texture_to_buffer<T>(&mut self, src: &A::Texture, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;

    unsafe fn bind_pipeline(&mut self, pipeline: &A::Pipeline);

    /// Binds descriptor buffers to the consecutive binding slots starting at `first_buffer`.
    unsafe fn bind_descriptor_buffers(
        &mut self,
        first_buffer: u32,
        bindings: &[DescriptorBufferBinding],
    );
    /// Points sets `first_set..` at `(buffer_indices[i], offsets[i])`.
    unsafe fn set_descriptor_buffer_offsets(
        &mut self,
        bind_point: BindPoint,
        layout: &A::PipelineLayout,
        first_set: u32,
        buffer_indices: &[u32],
        offsets: &[BufferAddress],
    );
    unsafe fn bind_descriptor_buffer_embedded_samplers(
        &mut self,
        bind_point: BindPoint,
        layout: &A::PipelineLayout,
        set: u32,
    );
    unsafe fn push_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        layout: &A::PipelineLayout,
        set: u32,
        writes: &[DescriptorWrite<A>],
    );
    /// `data` is indexed through the template entries' offsets and strides.
    unsafe fn push_descriptor_set_with_template(
        &mut self,
        template: &A::DescriptorUpdateTemplate,
        layout: &A::PipelineLayout,
        set: u32,
        data: &[DescriptorResource<A>],
    );

    unsafe fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<A>);
    unsafe fn end_render_pass(&mut self);
    unsafe fn draw(
        &mut self,
        start_vertex: u32,
        vertex_count: u32,
        start_instance: u32,
        instance_count: u32,
    );
    unsafe fn dispatch(&mut self, count: [u32; 3]);
}

bitflags! {
    /// Optional device features.
    pub struct Features: u32 {
        const DESCRIPTOR_BUFFER = 1 << 0;
        const DESCRIPTOR_BUFFER_CAPTURE_REPLAY = 1 << 1;
        const BUFFER_DEVICE_ADDRESS = 1 << 2;
        const SYNCHRONIZATION_2 = 1 << 3;
        const INLINE_UNIFORM_BLOCK = 1 << 4;
        const PUSH_DESCRIPTOR = 1 << 5;
        const TESSELLATION_SHADER = 1 << 6;
        const GEOMETRY_SHADER = 1 << 7;
        const ROBUST_BUFFER_ACCESS = 1 << 8;
        const ACCELERATION_STRUCTURE = 1 << 9;
    }
}

bitflags! {
    pub struct MemoryFlags: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

bitflags! {
    /// Flags shared by every resource creation call.
    pub struct CreateFlags: u32 {
        /// The resource may be recreated with the same opaque data on replay.
        const CAPTURE_REPLAY = 1 << 0;
    }
}

bitflags! {
    pub struct BufferUses: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM_TEXEL = 1 << 2;
        const STORAGE_TEXEL = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
        const SHADER_DEVICE_ADDRESS = 1 << 6;
        const SAMPLER_DESCRIPTORS = 1 << 7;
        const RESOURCE_DESCRIPTORS = 1 << 8;
        const PUSH_DESCRIPTORS = 1 << 9;
        const HOST_READ = 1 << 10;
        const HOST_WRITE = 1 << 11;
        /// The combination of usages that can be used together with a descriptor buffer binding.
        const DESCRIPTOR_BUFFER = Self::SAMPLER_DESCRIPTORS.bits | Self::RESOURCE_DESCRIPTORS.bits | Self::PUSH_DESCRIPTORS.bits;
    }
}

bitflags! {
    pub struct TextureUses: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_TARGET = 1 << 4;
        const INPUT_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
    }
}

bitflags! {
    pub struct DescriptorSetLayoutFlags: u32 {
        /// The layout is used with descriptor buffers rather than descriptor pools.
        const DESCRIPTOR_BUFFER = 1 << 0;
        /// All samplers of the layout are embedded in it and need no descriptor memory.
        const EMBEDDED_IMMUTABLE_SAMPLERS = 1 << 1;
        /// The set is updated with push descriptors.
        const PUSH_DESCRIPTOR = 1 << 2;
    }
}

bitflags! {
    pub struct PipelineFlags: u32 {
        const DESCRIPTOR_BUFFER = 1 << 0;
    }
}

bitflags! {
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_stages(self) -> ShaderStages {
        match self {
            Self::Vertex => ShaderStages::VERTEX,
            Self::TessellationControl => ShaderStages::TESSELLATION_CONTROL,
            Self::TessellationEvaluation => ShaderStages::TESSELLATION_EVALUATION,
            Self::Geometry => ShaderStages::GEOMETRY,
            Self::Fragment => ShaderStages::FRAGMENT,
            Self::Compute => ShaderStages::COMPUTE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Every kind of descriptor a set layout binding may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    /// Raw bytes stored directly in the set; the binding count is a byte size.
    InlineUniformBlock,
    InputAttachment,
    AccelerationStructure,
}

impl DescriptorType {
    pub fn is_image(self) -> bool {
        match self {
            Self::CombinedImageSampler
            | Self::SampledImage
            | Self::StorageImage
            | Self::InputAttachment => true,
            _ => false,
        }
    }

    pub fn is_texel_buffer(self) -> bool {
        match self {
            Self::UniformTexelBuffer | Self::StorageTexelBuffer => true,
            _ => false,
        }
    }

    pub fn is_buffer(self) -> bool {
        match self {
            Self::UniformBuffer | Self::StorageBuffer => true,
            _ => false,
        }
    }

    pub fn uses_sampler(self) -> bool {
        match self {
            Self::Sampler | Self::CombinedImageSampler => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R32Uint,
    Rgba32Uint,
}

impl TextureFormat {
    pub fn block_size(self) -> u32 {
        match self {
            Self::R32Uint => 4,
            Self::Rgba32Uint => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureLayout {
    Undefined,
    General,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    ClampToBorder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BorderColor {
    FloatTransparentBlack,
    IntTransparentBlack,
    FloatOpaqueBlack,
    IntOpaqueBlack,
    FloatOpaqueWhite,
    IntOpaqueWhite,
}

impl BorderColor {
    /// Value returned by integer texture reads outside of the image.
    pub fn to_uint(self) -> [u32; 4] {
        match self {
            Self::FloatTransparentBlack | Self::IntTransparentBlack => [0, 0, 0, 0],
            Self::FloatOpaqueBlack | Self::IntOpaqueBlack => [0, 0, 0, 1],
            Self::FloatOpaqueWhite | Self::IntOpaqueWhite => [1, 1, 1, 1],
        }
    }
}

/// Per-descriptor-type sizes, alignment and binding limits of the descriptor buffer model.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorBufferProperties {
    pub combined_image_sampler_descriptor_single_array: bool,
    pub bufferless_push_descriptors: bool,
    pub allow_sampler_image_view_post_submit_creation: bool,
    pub descriptor_buffer_offset_alignment: BufferAddress,
    pub max_descriptor_buffer_bindings: u32,
    pub max_resource_descriptor_buffer_bindings: u32,
    pub max_sampler_descriptor_buffer_bindings: u32,
    pub max_embedded_immutable_sampler_bindings: u32,
    pub max_embedded_immutable_samplers: u32,
    pub buffer_capture_replay_descriptor_data_size: usize,
    pub image_capture_replay_descriptor_data_size: usize,
    pub image_view_capture_replay_descriptor_data_size: usize,
    pub sampler_capture_replay_descriptor_data_size: usize,
    pub acceleration_structure_capture_replay_descriptor_data_size: usize,
    pub sampler_descriptor_size: usize,
    pub combined_image_sampler_descriptor_size: usize,
    pub sampled_image_descriptor_size: usize,
    pub storage_image_descriptor_size: usize,
    pub uniform_texel_buffer_descriptor_size: usize,
    pub robust_uniform_texel_buffer_descriptor_size: usize,
    pub storage_texel_buffer_descriptor_size: usize,
    pub robust_storage_texel_buffer_descriptor_size: usize,
    pub uniform_buffer_descriptor_size: usize,
    pub robust_uniform_buffer_descriptor_size: usize,
    pub storage_buffer_descriptor_size: usize,
    pub robust_storage_buffer_descriptor_size: usize,
    pub input_attachment_descriptor_size: usize,
    pub acceleration_structure_descriptor_size: usize,
    pub max_sampler_descriptor_buffer_range: BufferAddress,
    pub max_resource_descriptor_buffer_range: BufferAddress,
    pub sampler_descriptor_buffer_address_space_size: BufferAddress,
    pub resource_descriptor_buffer_address_space_size: BufferAddress,
    pub descriptor_buffer_address_space_size: BufferAddress,
    /// Combined image samplers of an array binding are stored as all images, then all samplers.
    pub split_combined_image_samplers: bool,
    pub push_descriptors_require_buffer: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryType {
    pub flags: MemoryFlags,
}

#[derive(Clone, Debug)]
pub struct Capabilities {
    pub features: Features,
    pub descriptor_buffer: DescriptorBufferProperties,
    pub memory_types: Vec<MemoryType>,
    pub queues: QueueFlags,
}

#[derive(Clone, Debug, Default)]
pub struct AdapterInfo {
    pub name: String,
    pub driver: String,
}

pub struct ExposedAdapter<A: Api> {
    pub adapter: A::Adapter,
    pub info: AdapterInfo,
    pub capabilities: Capabilities,
}

pub struct OpenDevice<A: Api> {
    pub device: A::Device,
    pub queue: A::Queue,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryRequirements {
    pub size: BufferAddress,
    pub alignment: BufferAddress,
    /// Bit `i` is set if memory type `i` can back the resource.
    pub memory_type_bits: u32,
}

#[derive(Debug)]
pub struct BufferMapping {
    pub ptr: NonNull<u8>,
    pub is_coherent: bool,
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: Label<'a>,
    pub size: BufferAddress,
    pub usage: BufferUses,
    pub flags: CreateFlags,
}

#[derive(Clone, Debug)]
pub struct BufferViewDescriptor<'a> {
    pub label: Label<'a>,
    pub format: TextureFormat,
    pub range: MemoryRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: Label<'a>,
    pub size: Extent,
    pub format: TextureFormat,
    pub usage: TextureUses,
    pub flags: CreateFlags,
}

#[derive(Clone, Debug)]
pub struct TextureViewDescriptor<'a> {
    pub label: Label<'a>,
    pub format: TextureFormat,
    pub usage: TextureUses,
    pub flags: CreateFlags,
}

#[derive(Clone, Debug)]
pub struct SamplerDescriptor<'a> {
    pub label: Label<'a>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode: AddressMode,
    pub border_color: BorderColor,
    pub flags: CreateFlags,
}

#[derive(Debug)]
pub struct DescriptorSetLayoutBinding<'a, A: Api> {
    pub binding: u32,
    pub ty: DescriptorType,
    /// Array size, or the byte size of an inline uniform block.
    pub count: u32,
    pub visibility: ShaderStages,
    /// Either empty, or one sampler per array element.
    pub immutable_samplers: &'a [&'a A::Sampler],
}

#[derive(Debug)]
pub struct DescriptorSetLayoutDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub flags: DescriptorSetLayoutFlags,
    pub entries: &'a [DescriptorSetLayoutBinding<'a, A>],
}

#[derive(Debug)]
pub struct PipelineLayoutDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub set_layouts: &'a [&'a A::DescriptorSetLayout],
}

/// Address-based description of a buffer or texel buffer descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorAddressInfo {
    pub address: BufferAddress,
    pub range: BufferAddress,
    /// Only used by texel buffers.
    pub format: Option<TextureFormat>,
}

#[derive(Debug)]
pub struct ImageDescriptorInfo<'a, A: Api> {
    pub view: &'a A::TextureView,
    pub layout: TextureLayout,
}

/// Input to `Device::get_descriptor`. The variant determines the descriptor type.
#[derive(Debug)]
pub enum DescriptorData<'a, A: Api> {
    Sampler(&'a A::Sampler),
    CombinedImageSampler {
        image: ImageDescriptorInfo<'a, A>,
        /// `None` when the binding uses an immutable sampler.
        sampler: Option<&'a A::Sampler>,
    },
    SampledImage(ImageDescriptorInfo<'a, A>),
    StorageImage(ImageDescriptorInfo<'a, A>),
    InputAttachment(ImageDescriptorInfo<'a, A>),
    UniformTexelBuffer(DescriptorAddressInfo),
    StorageTexelBuffer(DescriptorAddressInfo),
    UniformBuffer(DescriptorAddressInfo),
    StorageBuffer(DescriptorAddressInfo),
    AccelerationStructure(BufferAddress),
}

impl<A: Api> DescriptorData<'_, A> {
    pub fn ty(&self) -> DescriptorType {
        match *self {
            Self::Sampler(_) => DescriptorType::Sampler,
            Self::CombinedImageSampler { .. } => DescriptorType::CombinedImageSampler,
            Self::SampledImage(_) => DescriptorType::SampledImage,
            Self::StorageImage(_) => DescriptorType::StorageImage,
            Self::InputAttachment(_) => DescriptorType::InputAttachment,
            Self::UniformTexelBuffer(_) => DescriptorType::UniformTexelBuffer,
            Self::StorageTexelBuffer(_) => DescriptorType::StorageTexelBuffer,
            Self::UniformBuffer(_) => DescriptorType::UniformBuffer,
            Self::StorageBuffer(_) => DescriptorType::StorageBuffer,
            Self::AccelerationStructure(_) => DescriptorType::AccelerationStructure,
        }
    }
}

#[derive(Debug)]
pub struct BufferBinding<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub offset: BufferAddress,
    pub size: BufferAddress,
}

/// One descriptor of a push descriptor update.
#[derive(Debug)]
pub enum DescriptorResource<'a, A: Api> {
    Sampler(&'a A::Sampler),
    Image {
        view: &'a A::TextureView,
        layout: TextureLayout,
        sampler: Option<&'a A::Sampler>,
    },
    TexelBuffer(&'a A::BufferView),
    Buffer(BufferBinding<'a, A>),
}

#[derive(Debug)]
pub struct DescriptorWrite<'a, A: Api> {
    pub binding: u32,
    pub array_element: u32,
    pub ty: DescriptorType,
    pub resources: &'a [DescriptorResource<'a, A>],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorUpdateTemplateEntry {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    pub ty: DescriptorType,
    /// Index of the first resource in the update data.
    pub offset: usize,
    /// Distance between consecutive resources in the update data.
    pub stride: usize,
}

#[derive(Debug)]
pub struct DescriptorUpdateTemplateDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub entries: &'a [DescriptorUpdateTemplateEntry],
    pub bind_point: BindPoint,
    pub layout: &'a A::PipelineLayout,
    pub set: u32,
}

/// A location inside the sets of a pipeline layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BindingLocation {
    pub set: u32,
    pub binding: u32,
    pub array_index: u32,
}

/// What a failed probe reports in `result.z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDetail {
    None,
    /// Index of the first mismatching value.
    Element,
    Value(u32),
}

/// One read through a descriptor, compared against a known value.
#[derive(Clone, Debug, PartialEq)]
pub struct Probe {
    pub location: BindingLocation,
    pub ty: DescriptorType,
    /// Expected first value; value `i` of a buffer equals `expected + i`.
    pub expected: u32,
    /// Number of consecutive values checked.
    pub count: u32,
    /// Separate sampler used to sample a sampled image.
    pub sampler: Option<BindingLocation>,
    /// Written to `result.y` by the first failing probe.
    pub failure_tag: u32,
    pub failure_detail: FailureDetail,
}

/// Device-facing shader program: every successful check increments `result.x`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerificationProgram {
    pub probes: Vec<Probe>,
    /// Storage buffer receiving the result of a compute program.
    pub result: Option<BindingLocation>,
}

#[derive(Debug)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Label<'a>,
    pub stage: ShaderStage,
    /// `None` for stages that only pass data through.
    pub program: Option<&'a VerificationProgram>,
}

#[derive(Debug)]
pub struct PipelineDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a A::PipelineLayout,
    pub bind_point: BindPoint,
    pub flags: PipelineFlags,
    pub modules: &'a [&'a A::ShaderModule],
    pub color_format: Option<TextureFormat>,
}

#[derive(Clone, Debug)]
pub struct CommandEncoderDescriptor<'a> {
    pub label: Label<'a>,
    pub queue: QueueKind,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorBufferBinding {
    pub address: BufferAddress,
    pub usage: BufferUses,
}

#[derive(Debug)]
pub struct BufferBarrier<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub usage: Range<BufferUses>,
}

#[derive(Debug)]
pub struct TextureBarrier<'a, A: Api> {
    pub texture: &'a A::Texture,
    pub layout: Range<TextureLayout>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferCopy {
    pub src_offset: BufferAddress,
    pub dst_offset: BufferAddress,
    pub size: BufferAddress,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferTextureCopy {
    pub buffer_offset: BufferAddress,
    pub size: Extent,
}

#[derive(Debug)]
pub struct RenderPassDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub extent: Extent,
    pub color_target: &'a A::TextureView,
}

#[test]
fn test_border_color_values() {
    assert_eq!(BorderColor::IntOpaqueBlack.to_uint(), [0, 0, 0, 1]);
    assert_eq!(BorderColor::FloatTransparentBlack.to_uint(), [0; 4]);
}

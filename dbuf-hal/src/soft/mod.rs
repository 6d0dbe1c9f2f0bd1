/*!
# Software reference driver

Implements the whole abstraction on the CPU, so the engine can be exercised
without a GPU. The behavior follows a descriptor buffer driver closely:

- Memory has a device copy and, when host visible but not coherent, a host
  shadow. `map_buffer` hands out the shadow, flushing copies it to the device
  copy and invalidation copies it back.
- Set layouts place bindings by their own rule (optional header, each binding
  aligned to a granule), so callers must query offsets.
- Descriptors are tagged payloads holding object ids or addresses.
- Commands are recorded into a list and replayed on submit. Dispatches and
  draws interpret the pipeline's `VerificationProgram` against the bound
  descriptor state.
*/

mod command;
mod conv;
mod device;
mod queue;

use std::{ops::Range, sync::Arc};

use arrayvec::ArrayVec;
use parking_lot::Mutex;

type DeviceResult<T> = Result<T, crate::DeviceError>;

/// Address of the first buffer handed out by the device.
const BASE_ADDRESS: crate::BufferAddress = 0x1_0000_0000;
const ADDRESS_ALIGNMENT: crate::BufferAddress = 0x100;
const MAX_ARRAY_SIZE: usize = 16;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Instance = Instance;
    type Adapter = Adapter;
    type Device = Device;
    type Queue = Queue;

    type CommandEncoder = CommandEncoder;
    type CommandBuffer = CommandBuffer;

    type Buffer = Buffer;
    type BufferView = BufferView;
    type Texture = Texture;
    type TextureView = TextureView;
    type Sampler = Sampler;

    type DescriptorSetLayout = DescriptorSetLayout;
    type PipelineLayout = PipelineLayout;
    type DescriptorUpdateTemplate = DescriptorUpdateTemplate;
    type ShaderModule = ShaderModule;
    type Pipeline = Pipeline;
}

/// Everything that can be configured about the simulated device.
#[derive(Clone, Debug)]
pub struct Options {
    pub name: String,
    pub features: crate::Features,
    pub properties: crate::DescriptorBufferProperties,
    pub memory_types: Vec<crate::MemoryType>,
    pub queues: crate::QueueFlags,
    /// Bytes reserved at the start of every set layout.
    pub set_header_size: crate::BufferAddress,
    /// Every binding starts at a multiple of this.
    pub binding_alignment: crate::BufferAddress,
    /// Memory types descriptor buffers may be bound to, as a bit mask.
    pub descriptor_buffer_memory_types: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "soft".to_string(),
            features: crate::Features::all(),
            properties: crate::DescriptorBufferProperties {
                combined_image_sampler_descriptor_single_array: false,
                bufferless_push_descriptors: true,
                allow_sampler_image_view_post_submit_creation: false,
                descriptor_buffer_offset_alignment: 64,
                max_descriptor_buffer_bindings: 32,
                max_resource_descriptor_buffer_bindings: 32,
                max_sampler_descriptor_buffer_bindings: 32,
                max_embedded_immutable_sampler_bindings: 32,
                max_embedded_immutable_samplers: 2032,
                buffer_capture_replay_descriptor_data_size: 8,
                image_capture_replay_descriptor_data_size: 8,
                image_view_capture_replay_descriptor_data_size: 8,
                sampler_capture_replay_descriptor_data_size: 8,
                acceleration_structure_capture_replay_descriptor_data_size: 8,
                sampler_descriptor_size: 16,
                combined_image_sampler_descriptor_size: 48,
                sampled_image_descriptor_size: 32,
                storage_image_descriptor_size: 32,
                uniform_texel_buffer_descriptor_size: 32,
                robust_uniform_texel_buffer_descriptor_size: 48,
                storage_texel_buffer_descriptor_size: 32,
                robust_storage_texel_buffer_descriptor_size: 48,
                uniform_buffer_descriptor_size: 32,
                robust_uniform_buffer_descriptor_size: 48,
                storage_buffer_descriptor_size: 32,
                robust_storage_buffer_descriptor_size: 48,
                input_attachment_descriptor_size: 32,
                acceleration_structure_descriptor_size: 16,
                max_sampler_descriptor_buffer_range: 1 << 27,
                max_resource_descriptor_buffer_range: 1 << 27,
                sampler_descriptor_buffer_address_space_size: 1 << 27,
                resource_descriptor_buffer_address_space_size: 1 << 27,
                descriptor_buffer_address_space_size: 1 << 27,
                split_combined_image_samplers: false,
                push_descriptors_require_buffer: false,
            },
            memory_types: vec![
                crate::MemoryType {
                    flags: crate::MemoryFlags::DEVICE_LOCAL,
                },
                crate::MemoryType {
                    flags: crate::MemoryFlags::HOST_VISIBLE,
                },
                crate::MemoryType {
                    flags: crate::MemoryFlags::HOST_VISIBLE | crate::MemoryFlags::HOST_COHERENT,
                },
                crate::MemoryType {
                    flags: crate::MemoryFlags::DEVICE_LOCAL | crate::MemoryFlags::HOST_VISIBLE,
                },
            ],
            queues: crate::QueueFlags::all(),
            set_header_size: 0,
            binding_alignment: 16,
            descriptor_buffer_memory_types: !0,
        }
    }
}

impl Options {
    /// Store combined image samplers of array bindings as all images, then all samplers.
    pub fn with_split_combined_image_samplers(mut self) -> Self {
        let props = &mut self.properties;
        props.split_combined_image_samplers = true;
        props.combined_image_sampler_descriptor_size =
            props.sampled_image_descriptor_size + props.sampler_descriptor_size;
        self
    }

    /// Drop every memory type that is both device local and host visible.
    pub fn without_device_local_host_visible(mut self) -> Self {
        let both = crate::MemoryFlags::DEVICE_LOCAL | crate::MemoryFlags::HOST_VISIBLE;
        self.memory_types.retain(|ty| !ty.flags.contains(both));
        self
    }

    /// Keep descriptor buffers out of memory that is both device local and host visible,
    /// while the memory type itself stays available to other buffers.
    pub fn with_descriptor_buffers_device_only(mut self) -> Self {
        let both = crate::MemoryFlags::DEVICE_LOCAL | crate::MemoryFlags::HOST_VISIBLE;
        for (index, ty) in self.memory_types.iter().enumerate() {
            if ty.flags.contains(both) {
                self.descriptor_buffer_memory_types &= !type_bit(index);
            }
        }
        self
    }

    pub fn without_features(mut self, features: crate::Features) -> Self {
        self.features.remove(features);
        self
    }

    pub fn with_set_header(mut self, size: crate::BufferAddress) -> Self {
        self.set_header_size = size;
        self
    }

    pub fn with_offset_alignment(mut self, alignment: crate::BufferAddress) -> Self {
        self.properties.descriptor_buffer_offset_alignment = alignment;
        self
    }

    pub fn with_max_bindings(mut self, total: u32, samplers: u32, resources: u32) -> Self {
        let props = &mut self.properties;
        props.max_descriptor_buffer_bindings = total;
        props.max_sampler_descriptor_buffer_bindings = samplers;
        props.max_resource_descriptor_buffer_bindings = resources;
        self
    }

    fn capabilities(&self) -> crate::Capabilities {
        crate::Capabilities {
            features: self.features,
            descriptor_buffer: self.properties.clone(),
            memory_types: self.memory_types.clone(),
            queues: self.queues,
        }
    }
}

pub struct Instance {
    options: Arc<Options>,
}

impl Instance {
    pub fn new(options: Options) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl crate::Instance<Api> for Instance {
    unsafe fn enumerate_adapters(&self) -> Vec<crate::ExposedAdapter<Api>> {
        vec![crate::ExposedAdapter {
            adapter: Adapter {
                options: Arc::clone(&self.options),
            },
            info: crate::AdapterInfo {
                name: self.options.name.clone(),
                driver: "dbuf-soft".to_string(),
            },
            capabilities: self.options.capabilities(),
        }]
    }
}

pub struct Adapter {
    options: Arc<Options>,
}

impl crate::Adapter<Api> for Adapter {
    unsafe fn open(
        &self,
        features: crate::Features,
        queue: crate::QueueKind,
    ) -> DeviceResult<crate::OpenDevice<Api>> {
        let missing = features - self.options.features;
        if !missing.is_empty() {
            return Err(crate::DeviceError::UnsupportedFeatures(missing));
        }
        log::info!(
            "Opening soft device with {:?} on a {:?} queue",
            features,
            queue
        );
        let shared = Arc::new(Shared {
            options: Arc::clone(&self.options),
            robust: features.contains(crate::Features::ROBUST_BUFFER_ACCESS),
            objects: Mutex::new(Objects::default()),
        });
        Ok(crate::OpenDevice {
            device: Device {
                shared: Arc::clone(&shared),
            },
            queue: Queue { shared, kind: queue },
        })
    }
}

struct Shared {
    options: Arc<Options>,
    robust: bool,
    objects: Mutex<Objects>,
}

impl Shared {
    fn descriptor_size(&self, ty: crate::DescriptorType) -> usize {
        conv::descriptor_size(&self.options.properties, ty, self.robust)
    }
}

/// Backing store of one allocation.
struct Memory {
    flags: crate::MemoryFlags,
    /// What the device sees.
    contents: Box<[u8]>,
    /// What the host sees, if it differs from `contents`.
    shadow: Option<Box<[u8]>>,
}

struct BufferState {
    size: crate::BufferAddress,
    usage: crate::BufferUses,
    memory: Option<Memory>,
    address: crate::BufferAddress,
}

struct TextureState {
    size: crate::Extent,
    format: crate::TextureFormat,
    layout: crate::TextureLayout,
    data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SamplerState {
    address_mode: crate::AddressMode,
    border_color: crate::BorderColor,
}

#[derive(Default)]
struct Objects {
    buffers: Vec<Option<BufferState>>,
    textures: Vec<Option<TextureState>>,
    /// Texture id of every view.
    views: Vec<Option<u32>>,
    samplers: Vec<Option<SamplerState>>,
    next_address: crate::BufferAddress,
}

/// Bit of the memory type at `index` in a type mask; types past 31 have none.
fn type_bit(index: usize) -> u32 {
    1u32.checked_shl(index as u32).unwrap_or(0)
}

/// Inserts into the first vacant slot. Ids start at 1, so that 0 is never a valid id.
fn insert<T>(slots: &mut Vec<Option<T>>, value: T) -> u32 {
    let index = match slots.iter().position(Option::is_none) {
        Some(index) => {
            slots[index] = Some(value);
            index
        }
        None => {
            slots.push(Some(value));
            slots.len() - 1
        }
    };
    index as u32 + 1
}

fn get<T>(slots: &[Option<T>], id: u32) -> Option<&T> {
    let index = id.checked_sub(1)? as usize;
    slots.get(index).and_then(Option::as_ref)
}

fn get_mut<T>(slots: &mut [Option<T>], id: u32) -> Option<&mut T> {
    let index = id.checked_sub(1)? as usize;
    slots.get_mut(index).and_then(Option::as_mut)
}

fn remove<T>(slots: &mut [Option<T>], id: u32) -> Option<T> {
    let index = id.checked_sub(1)? as usize;
    slots.get_mut(index).and_then(Option::take)
}

impl Objects {
    /// Finds the device copy of the memory containing `address..address + size`.
    fn memory_at(
        &self,
        address: crate::BufferAddress,
        size: crate::BufferAddress,
    ) -> Option<&[u8]> {
        self.buffers.iter().flatten().find_map(|buffer| {
            let memory = buffer.memory.as_ref()?;
            let start = address.checked_sub(buffer.address)?;
            if buffer.address == 0 || start + size > buffer.size {
                return None;
            }
            Some(&memory.contents[start as usize..(start + size) as usize])
        })
    }

    fn memory_at_mut(
        &mut self,
        address: crate::BufferAddress,
        size: crate::BufferAddress,
    ) -> Option<&mut [u8]> {
        self.buffers.iter_mut().flatten().find_map(|buffer| {
            let start = address.checked_sub(buffer.address)?;
            if buffer.address == 0 || start + size > buffer.size {
                return None;
            }
            let memory = buffer.memory.as_mut()?;
            Some(&mut memory.contents[start as usize..(start + size) as usize])
        })
    }
}

#[derive(Debug)]
pub struct Buffer {
    id: u32,
    size: crate::BufferAddress,
    usage: crate::BufferUses,
    address: crate::BufferAddress,
}

#[derive(Debug)]
pub struct BufferView {
    id: u32,
    address: crate::BufferAddress,
    range: crate::BufferAddress,
    format: crate::TextureFormat,
}

#[derive(Debug)]
pub struct Texture {
    id: u32,
}

#[derive(Debug)]
pub struct TextureView {
    id: u32,
}

#[derive(Debug)]
pub struct Sampler {
    id: u32,
    state: SamplerState,
}

#[derive(Debug)]
struct SetLayoutEntry {
    binding: u32,
    ty: crate::DescriptorType,
    count: u32,
    offset: crate::BufferAddress,
    immutable_samplers: ArrayVec<u32, MAX_ARRAY_SIZE>,
}

#[derive(Debug)]
struct SetLayoutInfo {
    flags: crate::DescriptorSetLayoutFlags,
    entries: Vec<SetLayoutEntry>,
    size: crate::BufferAddress,
}

impl SetLayoutInfo {
    fn entry(&self, binding: u32) -> Option<&SetLayoutEntry> {
        self.entries.iter().find(|entry| entry.binding == binding)
    }
}

#[derive(Debug)]
pub struct DescriptorSetLayout {
    info: Arc<SetLayoutInfo>,
}

#[derive(Debug)]
struct PipelineLayoutInfo {
    sets: Vec<Arc<SetLayoutInfo>>,
}

#[derive(Debug)]
pub struct PipelineLayout {
    info: Arc<PipelineLayoutInfo>,
}

#[derive(Debug)]
pub struct DescriptorUpdateTemplate {
    bind_point: crate::BindPoint,
    entries: Vec<crate::DescriptorUpdateTemplateEntry>,
}

#[derive(Debug)]
pub struct ShaderModule {
    stage: crate::ShaderStage,
    program: Option<Arc<crate::VerificationProgram>>,
}

#[derive(Debug)]
struct PipelineInfo {
    bind_point: crate::BindPoint,
    layout: Arc<PipelineLayoutInfo>,
    program: Arc<crate::VerificationProgram>,
}

#[derive(Debug)]
pub struct Pipeline {
    info: Arc<PipelineInfo>,
}

/// A descriptor after decoding, referring to objects by id.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Resolved {
    Sampler(u32),
    Image {
        view: u32,
        layout: crate::TextureLayout,
        sampler: Option<u32>,
    },
    Address {
        address: crate::BufferAddress,
        range: crate::BufferAddress,
    },
    AccelerationStructure(crate::BufferAddress),
}

#[derive(Debug)]
struct PushedDescriptor {
    binding: u32,
    array_element: u32,
    descriptor: Resolved,
}

#[derive(Debug)]
enum Command {
    BindPipeline(Arc<PipelineInfo>),
    BindDescriptorBuffers {
        first_buffer: u32,
        bindings: Vec<crate::DescriptorBufferBinding>,
    },
    SetDescriptorBufferOffsets {
        bind_point: crate::BindPoint,
        layout: Arc<PipelineLayoutInfo>,
        first_set: u32,
        buffer_indices: Vec<u32>,
        offsets: Vec<crate::BufferAddress>,
    },
    BindEmbeddedSamplers {
        bind_point: crate::BindPoint,
        layout: Arc<PipelineLayoutInfo>,
        set: u32,
    },
    PushDescriptors {
        bind_point: crate::BindPoint,
        layout: Arc<PipelineLayoutInfo>,
        set: u32,
        descriptors: Vec<PushedDescriptor>,
    },
    CopyBufferToBuffer {
        src: u32,
        dst: u32,
        regions: Vec<crate::BufferCopy>,
    },
    CopyBufferToTexture {
        src: u32,
        dst: u32,
        regions: Vec<crate::BufferTextureCopy>,
    },
    CopyTextureToBuffer {
        src: u32,
        dst: u32,
        regions: Vec<crate::BufferTextureCopy>,
    },
    BufferBarrier {
        buffer: u32,
        usage: Range<crate::BufferUses>,
    },
    TextureBarrier {
        texture: u32,
        layout: Range<crate::TextureLayout>,
    },
    BeginRenderPass {
        target: u32,
    },
    EndRenderPass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch([u32; 3]),
}

#[derive(Debug, Default)]
pub struct CommandBuffer {
    label: Option<String>,
    commands: Vec<Command>,
}

pub struct CommandEncoder {
    shared: Arc<Shared>,
    queue: crate::QueueKind,
    cmd_buffer: CommandBuffer,
    in_render_pass: bool,
}

pub struct Device {
    shared: Arc<Shared>,
}

pub struct Queue {
    shared: Arc<Shared>,
    kind: crate::QueueKind,
}

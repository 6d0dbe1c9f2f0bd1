//! Descriptor payload encoding.
//!
//! Every payload starts with a tag word identifying the descriptor type, so
//! zeroed memory never decodes as a valid descriptor. All words are little
//! endian.

use super::Resolved;

const TAG_BASE: u32 = 0xDB00_0000;

const SAMPLER_WORDS: usize = 2;
const IMAGE_WORDS: usize = 3;
const ADDRESS_WORDS: usize = 6;
const ACCELERATION_STRUCTURE_WORDS: usize = 3;

pub(super) fn descriptor_size(
    props: &crate::DescriptorBufferProperties,
    ty: crate::DescriptorType,
    robust: bool,
) -> usize {
    use crate::DescriptorType as Dt;
    match ty {
        Dt::Sampler => props.sampler_descriptor_size,
        Dt::CombinedImageSampler => props.combined_image_sampler_descriptor_size,
        Dt::SampledImage => props.sampled_image_descriptor_size,
        Dt::StorageImage => props.storage_image_descriptor_size,
        Dt::UniformTexelBuffer if robust => props.robust_uniform_texel_buffer_descriptor_size,
        Dt::UniformTexelBuffer => props.uniform_texel_buffer_descriptor_size,
        Dt::StorageTexelBuffer if robust => props.robust_storage_texel_buffer_descriptor_size,
        Dt::StorageTexelBuffer => props.storage_texel_buffer_descriptor_size,
        Dt::UniformBuffer if robust => props.robust_uniform_buffer_descriptor_size,
        Dt::UniformBuffer => props.uniform_buffer_descriptor_size,
        Dt::StorageBuffer if robust => props.robust_storage_buffer_descriptor_size,
        Dt::StorageBuffer => props.storage_buffer_descriptor_size,
        Dt::InputAttachment => props.input_attachment_descriptor_size,
        Dt::AccelerationStructure => props.acceleration_structure_descriptor_size,
        Dt::InlineUniformBlock => 0,
    }
}

/// Size of the image part of a combined image sampler payload.
pub(super) fn combined_image_part(props: &crate::DescriptorBufferProperties) -> usize {
    props.combined_image_sampler_descriptor_size - props.sampler_descriptor_size
}

fn tag(ty: crate::DescriptorType) -> u32 {
    use crate::DescriptorType as Dt;
    let index = match ty {
        Dt::Sampler => 0,
        Dt::CombinedImageSampler => 1,
        Dt::SampledImage => 2,
        Dt::StorageImage => 3,
        Dt::UniformTexelBuffer => 4,
        Dt::StorageTexelBuffer => 5,
        Dt::UniformBuffer => 6,
        Dt::StorageBuffer => 7,
        Dt::InlineUniformBlock => 8,
        Dt::InputAttachment => 9,
        Dt::AccelerationStructure => 10,
    };
    TAG_BASE | index
}

fn map_layout(layout: crate::TextureLayout) -> u32 {
    use crate::TextureLayout as Tl;
    match layout {
        Tl::Undefined => 0,
        Tl::General => 1,
        Tl::TransferSrc => 2,
        Tl::TransferDst => 3,
        Tl::ShaderReadOnly => 4,
        Tl::ColorAttachment => 5,
    }
}

fn unmap_layout(raw: u32) -> Option<crate::TextureLayout> {
    use crate::TextureLayout as Tl;
    Some(match raw {
        0 => Tl::Undefined,
        1 => Tl::General,
        2 => Tl::TransferSrc,
        3 => Tl::TransferDst,
        4 => Tl::ShaderReadOnly,
        5 => Tl::ColorAttachment,
        _ => return None,
    })
}

pub(super) fn write_words(dst: &mut [u8], words: &[u32]) {
    for (chunk, word) in dst.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

fn read_words<const N: usize>(src: &[u8]) -> Option<[u32; N]> {
    if src.len() < N * 4 {
        return None;
    }
    let mut words = [0; N];
    for (word, chunk) in words.iter_mut().zip(src.chunks_exact(4)) {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(chunk);
        *word = u32::from_le_bytes(bytes);
    }
    Some(words)
}

pub(super) fn read_u32(src: &[u8]) -> Option<u32> {
    read_words::<1>(src).map(|[word]| word)
}

fn split_address(address: crate::BufferAddress) -> [u32; 2] {
    [address as u32, (address >> 32) as u32]
}

fn join_address(lo: u32, hi: u32) -> crate::BufferAddress {
    lo as crate::BufferAddress | ((hi as crate::BufferAddress) << 32)
}

pub(super) fn encode_sampler(dst: &mut [u8], sampler: Option<&super::Sampler>) {
    let id = sampler.map_or(0, |sampler| sampler.id);
    write_words(dst, &[tag(crate::DescriptorType::Sampler), id]);
}

pub(super) fn encode_image(
    dst: &mut [u8],
    ty: crate::DescriptorType,
    image: &crate::ImageDescriptorInfo<super::Api>,
) {
    write_words(dst, &[tag(ty), image.view.id, map_layout(image.layout)]);
}

pub(super) fn encode_address(
    dst: &mut [u8],
    ty: crate::DescriptorType,
    info: &crate::DescriptorAddressInfo,
) {
    let [address_lo, address_hi] = split_address(info.address);
    let [range_lo, range_hi] = split_address(info.range);
    let format = info.format.map_or(0, |format| format.block_size());
    write_words(
        dst,
        &[tag(ty), address_lo, address_hi, range_lo, range_hi, format],
    );
}

pub(super) fn encode_acceleration_structure(dst: &mut [u8], address: crate::BufferAddress) {
    let [lo, hi] = split_address(address);
    write_words(
        dst,
        &[tag(crate::DescriptorType::AccelerationStructure), lo, hi],
    );
}

/// Minimum payload size the encoding needs for a descriptor type.
pub(super) fn payload_size(ty: crate::DescriptorType) -> usize {
    use crate::DescriptorType as Dt;
    4 * match ty {
        Dt::Sampler => SAMPLER_WORDS,
        Dt::CombinedImageSampler => IMAGE_WORDS + SAMPLER_WORDS,
        Dt::SampledImage | Dt::StorageImage | Dt::InputAttachment => IMAGE_WORDS,
        Dt::UniformTexelBuffer | Dt::StorageTexelBuffer | Dt::UniformBuffer | Dt::StorageBuffer => {
            ADDRESS_WORDS
        }
        Dt::AccelerationStructure => ACCELERATION_STRUCTURE_WORDS,
        Dt::InlineUniformBlock => 0,
    }
}

pub(super) fn decode_sampler(src: &[u8]) -> Option<u32> {
    let [raw_tag, id] = read_words::<SAMPLER_WORDS>(src)?;
    if raw_tag != tag(crate::DescriptorType::Sampler) || id == 0 {
        return None;
    }
    Some(id)
}

pub(super) fn decode_image(src: &[u8], ty: crate::DescriptorType) -> Option<Resolved> {
    let [raw_tag, view, layout] = read_words::<IMAGE_WORDS>(src)?;
    if raw_tag != tag(ty) || view == 0 {
        return None;
    }
    Some(Resolved::Image {
        view,
        layout: unmap_layout(layout)?,
        sampler: None,
    })
}

pub(super) fn decode_address(src: &[u8], ty: crate::DescriptorType) -> Option<Resolved> {
    let [raw_tag, address_lo, address_hi, range_lo, range_hi, _format] =
        read_words::<ADDRESS_WORDS>(src)?;
    if raw_tag != tag(ty) {
        return None;
    }
    Some(Resolved::Address {
        address: join_address(address_lo, address_hi),
        range: join_address(range_lo, range_hi),
    })
}

pub(super) fn decode_acceleration_structure(src: &[u8]) -> Option<Resolved> {
    let [raw_tag, lo, hi] = read_words::<ACCELERATION_STRUCTURE_WORDS>(src)?;
    if raw_tag != tag(crate::DescriptorType::AccelerationStructure) {
        return None;
    }
    Some(Resolved::AccelerationStructure(join_address(lo, hi)))
}

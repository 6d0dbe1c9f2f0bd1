//! Updates of the push descriptor set, plain or through an update template.

use std::ops::Range;

use hal::{CommandEncoder as _, Device as _};

use crate::{
    binding::DescriptorKind,
    error::TestError,
    layout::{BindingRecord, SetLayout},
    registry::{Registry, Resource},
};

#[derive(Clone, Debug, PartialEq)]
struct PushSpan {
    binding: u32,
    kind: DescriptorKind,
    /// Elements of the binding inside `PushUpdate::resources`.
    range: Range<usize>,
}

/// Every descriptor of a push descriptor set, in binding then element order.
#[derive(Debug)]
pub(crate) struct PushUpdate<'r, A: hal::Api> {
    resources: Vec<hal::DescriptorResource<'r, A>>,
    spans: Vec<PushSpan>,
}

fn push_resource<'r, A: hal::Api>(
    binding: &BindingRecord,
    resource: &'r Resource<A>,
) -> Result<hal::DescriptorResource<'r, A>, TestError> {
    let missing = || {
        TestError::Internal(format!(
            "pushed binding {} lacks the resource of a {:?} descriptor",
            binding.binding, binding.kind
        ))
    };
    Ok(match binding.kind {
        DescriptorKind::Sampler => {
            hal::DescriptorResource::Sampler(resource.sampler.as_ref().ok_or_else(missing)?)
        }
        DescriptorKind::CombinedImageSampler
        | DescriptorKind::SampledImage
        | DescriptorKind::StorageImage
        | DescriptorKind::InputAttachment => {
            let image = resource.image.as_ref().ok_or_else(missing)?;
            hal::DescriptorResource::Image {
                view: &image.view,
                layout: image.layout,
                sampler: match binding.kind {
                    DescriptorKind::CombinedImageSampler => {
                        Some(resource.sampler.as_ref().ok_or_else(missing)?)
                    }
                    _ => None,
                },
            }
        }
        DescriptorKind::UniformTexelBuffer | DescriptorKind::StorageTexelBuffer => {
            hal::DescriptorResource::TexelBuffer(resource.buffer_view.as_ref().ok_or_else(missing)?)
        }
        DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => {
            let buffer = resource.buffer.as_ref().ok_or_else(missing)?;
            hal::DescriptorResource::Buffer(hal::BufferBinding {
                buffer: &buffer.raw,
                offset: 0,
                size: buffer.size,
            })
        }
        DescriptorKind::InlineUniformBlock => {
            return Err(TestError::Internal(format!(
                "inline uniform block {} can't be pushed",
                binding.binding
            )))
        }
        DescriptorKind::AccelerationStructure => {
            return Err(TestError::NotImplemented(
                "pushed acceleration structures".to_string(),
            ))
        }
    })
}

impl<'r, A: hal::Api> PushUpdate<'r, A> {
    pub fn collect(
        set: &SetLayout<A>,
        registry: &'r Registry<Resource<A>>,
    ) -> Result<Self, TestError> {
        let mut resources = Vec::new();
        let mut spans = Vec::with_capacity(set.bindings.len());
        for binding in set.bindings.iter() {
            let start = resources.len();
            for &id in binding.resources.iter() {
                resources.push(push_resource(binding, registry.get(id)?)?);
            }
            spans.push(PushSpan {
                binding: binding.binding,
                kind: binding.kind,
                range: start..resources.len(),
            });
        }
        Ok(Self { resources, spans })
    }

    pub fn descriptor_count(&self) -> usize {
        self.resources.len()
    }

    pub fn template_entries(&self) -> Vec<hal::DescriptorUpdateTemplateEntry> {
        self.spans
            .iter()
            .map(|span| hal::DescriptorUpdateTemplateEntry {
                binding: span.binding,
                array_element: 0,
                count: span.range.len() as u32,
                ty: span.kind,
                offset: span.range.start,
                stride: 1,
            })
            .collect()
    }

    pub unsafe fn record(
        &self,
        encoder: &mut A::CommandEncoder,
        bind_point: hal::BindPoint,
        layout: &A::PipelineLayout,
        set: u32,
    ) {
        let writes = self
            .spans
            .iter()
            .map(|span| hal::DescriptorWrite {
                binding: span.binding,
                array_element: 0,
                ty: span.kind,
                resources: &self.resources[span.range.clone()],
            })
            .collect::<Vec<_>>();
        log::trace!("Pushing {} writes to set {}", writes.len(), set);
        encoder.push_descriptor_set(bind_point, layout, set, &writes);
    }

    pub unsafe fn record_with_template(
        &self,
        encoder: &mut A::CommandEncoder,
        template: &A::DescriptorUpdateTemplate,
        layout: &A::PipelineLayout,
        set: u32,
    ) {
        encoder.push_descriptor_set_with_template(template, layout, set, &self.resources);
    }
}

pub(crate) unsafe fn create_template<A: hal::Api>(
    device: &A::Device,
    update: &PushUpdate<A>,
    bind_point: hal::BindPoint,
    layout: &A::PipelineLayout,
    set: u32,
) -> Result<A::DescriptorUpdateTemplate, TestError> {
    let entries = update.template_entries();
    let label = format!("push template set{}", set);
    Ok(device.create_descriptor_update_template(&hal::DescriptorUpdateTemplateDescriptor {
        label: Some(label.as_str()),
        entries: &entries,
        bind_point,
        layout,
        set,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_entries_index_the_flat_data() {
        let update = PushUpdate::<hal::soft::Api> {
            resources: Vec::new(),
            spans: vec![
                PushSpan {
                    binding: 0,
                    kind: DescriptorKind::StorageBuffer,
                    range: 0..3,
                },
                PushSpan {
                    binding: 1,
                    kind: DescriptorKind::Sampler,
                    range: 3..4,
                },
                PushSpan {
                    binding: 2,
                    kind: DescriptorKind::StorageImage,
                    range: 4..6,
                },
            ],
        };
        let entries = update.template_entries();
        let summary = entries
            .iter()
            .map(|entry| (entry.binding, entry.offset, entry.count, entry.stride))
            .collect::<Vec<_>>();
        assert_eq!(summary, [(0, 0, 3, 1), (1, 3, 1, 1), (2, 4, 2, 1)]);
        assert_eq!(entries[2].ty, DescriptorKind::StorageImage);
    }
}

//! Resources backing the bindings of one iteration.
//!
//! Binding records refer to resources through a `ResourceId`, an index into
//! the registry plus the epoch at which the slot was filled. A removed slot
//! can be reused, and stale ids are detected instead of aliasing the new
//! occupant.

use thiserror::Error;

use hal::Device as _;

use crate::alloc::HostMapping;

type Epoch = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    index: u32,
    epoch: Epoch,
}

#[derive(Clone, Debug, Error)]
#[error("{kind}[{index}] is no longer alive")]
pub struct InvalidId {
    kind: &'static str,
    index: u32,
}

/// An entry in a `Registry::map` table.
#[derive(Debug)]
enum Element<T> {
    /// No live id has this index. Holds the epoch the next occupant gets.
    Vacant(Epoch),
    Occupied(T, Epoch),
}

/// A table of `T` values indexed by `ResourceId`.
#[derive(Debug)]
pub struct Registry<T> {
    map: Vec<Element<T>>,
    kind: &'static str,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            map: Vec::new(),
            kind,
        }
    }

    pub fn insert(&mut self, value: T) -> ResourceId {
        let vacant = self.map.iter().position(|element| match *element {
            Element::Vacant(_) => true,
            Element::Occupied(..) => false,
        });
        match vacant {
            Some(index) => {
                let epoch = match self.map[index] {
                    Element::Vacant(epoch) => epoch,
                    Element::Occupied(..) => unreachable!(),
                };
                self.map[index] = Element::Occupied(value, epoch);
                ResourceId {
                    index: index as u32,
                    epoch,
                }
            }
            None => {
                self.map.push(Element::Occupied(value, 1));
                ResourceId {
                    index: self.map.len() as u32 - 1,
                    epoch: 1,
                }
            }
        }
    }

    fn invalid(&self, id: ResourceId) -> InvalidId {
        InvalidId {
            kind: self.kind,
            index: id.index,
        }
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        match self.map.get(id.index as usize) {
            Some(&Element::Occupied(_, epoch)) => epoch == id.epoch,
            Some(&Element::Vacant(_)) | None => false,
        }
    }

    pub fn get(&self, id: ResourceId) -> Result<&T, InvalidId> {
        match self.map.get(id.index as usize) {
            Some(&Element::Occupied(ref value, epoch)) if epoch == id.epoch => Ok(value),
            _ => Err(self.invalid(id)),
        }
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Result<&mut T, InvalidId> {
        let invalid = self.invalid(id);
        match self.map.get_mut(id.index as usize) {
            Some(&mut Element::Occupied(ref mut value, epoch)) if epoch == id.epoch => Ok(value),
            _ => Err(invalid),
        }
    }

    pub fn remove(&mut self, id: ResourceId) -> Result<T, InvalidId> {
        if !self.contains(id) {
            return Err(self.invalid(id));
        }
        let slot = &mut self.map[id.index as usize];
        match std::mem::replace(slot, Element::Vacant(id.epoch + 1)) {
            Element::Occupied(value, _) => Ok(value),
            Element::Vacant(_) => unreachable!(),
        }
    }

    pub fn len(&self) -> usize {
        self.map
            .iter()
            .filter(|element| match **element {
                Element::Occupied(..) => true,
                Element::Vacant(_) => false,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every live value, in index order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.map.drain(..).filter_map(|element| match element {
            Element::Occupied(value, _) => Some(value),
            Element::Vacant(_) => None,
        })
    }
}

/// A host visible buffer and its persistent mapping.
#[derive(Debug)]
pub struct BufferResource<A: hal::Api> {
    pub raw: A::Buffer,
    pub size: hal::BufferAddress,
    /// Zero unless the buffer was created for device address use.
    pub address: hal::BufferAddress,
    pub mapping: HostMapping,
}

impl<A: hal::Api> BufferResource<A> {
    pub unsafe fn destroy(self, device: &A::Device) {
        if let Err(err) = device.unmap_buffer(&self.raw) {
            log::warn!("Failed to unmap buffer: {}", err);
        }
        device.destroy_buffer(self.raw);
    }
}

#[derive(Debug)]
pub struct ImageResource<A: hal::Api> {
    pub texture: A::Texture,
    pub view: A::TextureView,
    /// Layout the image is in when the descriptors are read.
    pub layout: hal::TextureLayout,
    /// Holds the contents uploaded before the first use.
    pub staging: BufferResource<A>,
}

/// Backing objects of one binding array element.
#[derive(Debug)]
pub struct Resource<A: hal::Api> {
    pub buffer: Option<BufferResource<A>>,
    pub buffer_view: Option<A::BufferView>,
    pub image: Option<ImageResource<A>>,
    pub sampler: Option<A::Sampler>,
}

impl<A: hal::Api> Resource<A> {
    pub fn empty() -> Self {
        Self {
            buffer: None,
            buffer_view: None,
            image: None,
            sampler: None,
        }
    }

    pub unsafe fn destroy(self, device: &A::Device) {
        if let Some(view) = self.buffer_view {
            device.destroy_buffer_view(view);
        }
        if let Some(buffer) = self.buffer {
            buffer.destroy(device);
        }
        if let Some(image) = self.image {
            device.destroy_texture_view(image.view);
            device.destroy_texture(image.texture);
            image.staging.destroy(device);
        }
        if let Some(sampler) = self.sampler {
            device.destroy_sampler(sampler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_ids_are_rejected() {
        let mut registry = Registry::new("value");
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_eq!(registry.len(), 2);
        assert_eq!(*registry.get(b).unwrap(), "b");

        assert_eq!(registry.remove(a).unwrap(), "a");
        assert!(!registry.contains(a));
        assert!(registry.get(a).is_err());

        // The slot is reused under a new epoch.
        let c = registry.insert("c");
        assert_eq!(c.index, a.index);
        assert_ne!(c, a);
        assert!(registry.get(a).is_err());
        assert_eq!(*registry.get(c).unwrap(), "c");

        *registry.get_mut(c).unwrap() = "d";
        let drained = registry.drain().collect::<Vec<_>>();
        assert_eq!(drained, ["d", "b"]);
        assert!(registry.is_empty());
    }
}

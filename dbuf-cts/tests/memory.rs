use dbuf_cts::{alloc::Residency, params::Stage, DescriptorKind, TestParams, UploadPolicy};
use hal::{
    Adapter as _, BufferUses, CommandEncoder as _, CreateFlags, Device as _, MemoryFlags,
    Queue as _,
};

use crate::common::{assert_pass, run, soft_adapter, Api, TestParameters};

fn residencies(parameters: TestParameters, params: TestParams) -> Vec<Residency> {
    let report = run(parameters, params);
    assert_pass(&report);
    report.buffers.iter().map(|buffer| buffer.residency).collect()
}

#[test]
fn upload_policies() {
    let params = TestParams::multiple(Stage::Compute, 3, 1);
    assert_eq!(
        residencies(
            TestParameters::default().upload_policy(UploadPolicy::AllDirect),
            params.clone()
        ),
        [Residency::DirectDeviceLocal; 3]
    );
    assert_eq!(
        residencies(
            TestParameters::default().upload_policy(UploadPolicy::AllStaged),
            params.clone()
        ),
        [Residency::StagedViaHostBuffer; 3]
    );
    assert_eq!(
        residencies(TestParameters::default(), params),
        [
            Residency::DirectDeviceLocal,
            Residency::StagedViaHostBuffer,
            Residency::DirectDeviceLocal
        ]
    );
}

#[test]
fn no_device_local_host_visible_memory() {
    let parameters = TestParameters::default()
        .upload_policy(UploadPolicy::AllDirect)
        .options(|options| options.without_device_local_host_visible());
    assert_eq!(
        residencies(parameters, TestParams::multiple(Stage::Fragment, 2, 2)),
        [Residency::StagedViaHostBuffer; 2]
    );
}

#[test]
fn descriptor_buffers_outside_host_visible_memory() {
    let parameters = |policy| {
        TestParameters::default()
            .upload_policy(policy)
            .options(|options| options.with_descriptor_buffers_device_only())
    };
    for &policy in &[UploadPolicy::AllDirect, UploadPolicy::Mixed] {
        assert_eq!(
            residencies(parameters(policy), TestParams::multiple(Stage::Compute, 3, 1)),
            [Residency::StagedViaHostBuffer; 3]
        );
    }
    let report = run(
        parameters(UploadPolicy::AllDirect),
        TestParams::single(Stage::Fragment, DescriptorKind::SampledImage),
    );
    assert_pass(&report);
}

#[test]
fn descriptor_buffer_memory_follows_requirements() {
    let exposed = soft_adapter(hal::soft::Options::default().with_descriptor_buffers_device_only());
    let direct = exposed
        .capabilities
        .memory_types
        .iter()
        .position(|ty| {
            ty.flags
                .contains(MemoryFlags::DEVICE_LOCAL | MemoryFlags::HOST_VISIBLE)
        })
        .unwrap() as u32;

    unsafe {
        let hal::OpenDevice { device, .. } = exposed
            .adapter
            .open(hal::Features::empty(), hal::QueueKind::Graphics)
            .unwrap();
        let mut descriptors = device
            .create_buffer(&hal::BufferDescriptor {
                label: Some("descriptors"),
                size: 64,
                usage: BufferUses::RESOURCE_DESCRIPTORS,
                flags: CreateFlags::empty(),
            })
            .unwrap();
        let reqs = device.buffer_memory_requirements(&descriptors);
        assert_eq!(reqs.memory_type_bits & (1 << direct), 0);
        assert!(device.bind_buffer_memory(&mut descriptors, direct).is_err());

        let mut plain = device
            .create_buffer(&hal::BufferDescriptor {
                label: Some("plain"),
                size: 64,
                usage: BufferUses::TRANSFER_SRC,
                flags: CreateFlags::empty(),
            })
            .unwrap();
        device.bind_buffer_memory(&mut plain, direct).unwrap();

        device.destroy_buffer(descriptors);
        device.destroy_buffer(plain);
    }
}

#[test]
fn split_combined_image_samplers() {
    let parameters =
        || TestParameters::default().options(|options| options.with_split_combined_image_samplers());
    for &stage in &[Stage::Compute, Stage::Fragment] {
        let report = run(
            parameters(),
            TestParams::single(stage, DescriptorKind::CombinedImageSampler),
        );
        assert_pass(&report);
        let report = run(parameters(), TestParams::multiple(stage, 2, 2));
        assert_pass(&report);
    }
    let report = run(
        parameters().upload_policy(UploadPolicy::AllStaged),
        TestParams::push(Stage::Compute, 2, 1, false),
    );
    assert_pass(&report);
}

/// Host writes to non-coherent memory only reach the device after a flush.
#[test]
fn missing_flush_is_observable() {
    let exposed = soft_adapter(hal::soft::Options::default());
    let caps = &exposed.capabilities;
    let find = |required: MemoryFlags, excluded: MemoryFlags| {
        caps.memory_types
            .iter()
            .position(|ty| ty.flags.contains(required) && !ty.flags.intersects(excluded))
            .unwrap() as u32
    };
    let non_coherent = find(MemoryFlags::HOST_VISIBLE, MemoryFlags::HOST_COHERENT);
    let coherent = find(
        MemoryFlags::HOST_VISIBLE | MemoryFlags::HOST_COHERENT,
        MemoryFlags::empty(),
    );

    unsafe {
        let hal::OpenDevice {
            device,
            mut queue,
        } = exposed
            .adapter
            .open(hal::Features::empty(), hal::QueueKind::Graphics)
            .unwrap();
        let buffer = |label: &str, usage, memory_type| {
            let mut raw = device
                .create_buffer(&hal::BufferDescriptor {
                    label: Some(label),
                    size: 16,
                    usage,
                    flags: CreateFlags::empty(),
                })
                .unwrap();
            device.bind_buffer_memory(&mut raw, memory_type).unwrap();
            raw
        };
        let src = buffer(
            "src",
            BufferUses::TRANSFER_SRC | BufferUses::HOST_WRITE,
            non_coherent,
        );
        let dst = buffer(
            "dst",
            BufferUses::TRANSFER_DST | BufferUses::HOST_READ,
            coherent,
        );
        let src_mapping = device.map_buffer(&src).unwrap();
        let dst_mapping = device.map_buffer(&dst).unwrap();
        assert!(!src_mapping.is_coherent);
        assert!(dst_mapping.is_coherent);
        std::ptr::copy_nonoverlapping([7u8; 16].as_ptr(), src_mapping.ptr.as_ptr(), 16);

        let copy_and_read = |queue: &mut <Api as hal::Api>::Queue| {
            let mut encoder = device
                .create_command_encoder(&hal::CommandEncoderDescriptor {
                    label: None,
                    queue: hal::QueueKind::Graphics,
                })
                .unwrap();
            encoder.begin_encoding(Some("copy")).unwrap();
            encoder.copy_buffer_to_buffer(
                &src,
                &dst,
                std::iter::once(hal::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: 16,
                }),
            );
            let cmd_buf = encoder.end_encoding().unwrap();
            queue.submit(&[&cmd_buf]).unwrap();
            queue.wait_idle().unwrap();
            device.destroy_command_encoder(encoder);
            std::slice::from_raw_parts(dst_mapping.ptr.as_ptr(), 16).to_vec()
        };

        assert_eq!(copy_and_read(&mut queue), [0u8; 16]);
        device.flush_mapped_ranges(&src, std::iter::once(0..16));
        assert_eq!(copy_and_read(&mut queue), [7u8; 16]);

        device.unmap_buffer(&src).unwrap();
        device.unmap_buffer(&dst).unwrap();
        device.destroy_buffer(src);
        device.destroy_buffer(dst);
    }
}

#[test]
fn requirements_with_many_memory_types() {
    let mut options = hal::soft::Options::default();
    options.memory_types = vec![
        hal::MemoryType {
            flags: MemoryFlags::DEVICE_LOCAL,
        };
        33
    ];
    let exposed = soft_adapter(options);
    unsafe {
        let hal::OpenDevice { device, .. } = exposed
            .adapter
            .open(hal::Features::empty(), hal::QueueKind::Graphics)
            .unwrap();
        let mut buffer = device
            .create_buffer(&hal::BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUses::TRANSFER_DST,
                flags: CreateFlags::empty(),
            })
            .unwrap();
        assert_eq!(device.buffer_memory_requirements(&buffer).memory_type_bits, !0);
        assert!(device.bind_buffer_memory(&mut buffer, 32).is_err());
        device.bind_buffer_memory(&mut buffer, 31).unwrap();
        device.destroy_buffer(buffer);
    }
}

//! GPGPU fill batches for every supported generation, checked at the
//! execbuffer boundary.

use assert_matches::assert_matches;
use igt_gpu_tools::IgtResult;
use igt_gpu_tools::drm::ioctl::{
    EXEC_OBJECT_PINNED, EXEC_OBJECT_SUPPORTS_48B_ADDRESS, EXEC_OBJECT_WRITE, I915_EXEC_NO_RELOC,
    I915ExecObject2, I915RelocationEntry,
};
use igt_gpu_tools::intel::{
    BatchExecutor, ExecBatch, FillPipeline, FillRegion, IntelBuf, device_info, gpgpu_fillfunc,
};
use std::cell::RefCell;
use std::collections::HashMap;

const MI_BATCH_BUFFER_END: u32 = 0x0a << 23;

#[derive(Debug, Clone)]
struct Submission {
    objects: Vec<I915ExecObject2>,
    relocs: Vec<I915RelocationEntry>,
    batch_len: u32,
    flags: u64,
}

/// Keeps BO contents in memory and captures each execbuffer.
#[derive(Debug, Default)]
struct MemoryExecutor {
    next_handle: RefCell<u32>,
    bos: RefCell<HashMap<u32, Vec<u8>>>,
    submissions: RefCell<Vec<Submission>>,
}

impl MemoryExecutor {
    fn dwords(&self, handle: u32) -> Vec<u32> {
        self.bos.borrow()[&handle]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl BatchExecutor for MemoryExecutor {
    fn gem_create(&self, size: u64) -> IgtResult<u32> {
        let mut next = self.next_handle.borrow_mut();
        *next += 1;
        self.bos
            .borrow_mut()
            .insert(*next, vec![0; usize::try_from(size).unwrap()]);
        Ok(*next)
    }

    fn gem_write(&self, handle: u32, offset: u64, data: &[u8]) -> IgtResult<()> {
        let mut bos = self.bos.borrow_mut();
        let bo = bos.get_mut(&handle).unwrap();
        let at = usize::try_from(offset).unwrap();
        bo[at..at + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn gem_close(&self, handle: u32) -> IgtResult<()> {
        self.bos.borrow_mut().remove(&handle);
        Ok(())
    }

    fn execbuf(&self, exec: &mut ExecBatch<'_>) -> IgtResult<()> {
        let batch = exec.objects.last().unwrap();
        assert_eq!(batch.relocation_count as usize, exec.relocs.len());
        if !exec.relocs.is_empty() {
            assert_eq!(batch.relocs_ptr, exec.relocs.as_ptr() as u64);
        }
        self.submissions.borrow_mut().push(Submission {
            objects: exec.objects.to_vec(),
            relocs: exec.relocs.to_vec(),
            batch_len: exec.batch_len,
            flags: exec.flags,
        });
        Ok(())
    }

    fn gem_wait(&self, _handle: u32, timeout_ns: i64) -> IgtResult<()> {
        assert_eq!(timeout_ns, -1);
        Ok(())
    }
}

fn fill_on(devid: u16) -> (Submission, IntelBuf) {
    let exec = MemoryExecutor::default();
    let info = *device_info(devid).unwrap();
    let handle = exec.gem_create(64 * 64).unwrap();
    let mut buf = IntelBuf::linear(handle, 16, 64, 32).unwrap();

    let fill = gpgpu_fillfunc(&info).unwrap();
    fill(&exec, &info, &mut buf, FillRegion::new(0, 0, 16, 16), 0x4c).unwrap();

    let submission = exec.submissions.borrow()[0].clone();
    let batch_handle = submission.objects.last().unwrap().handle;
    assert!(!exec.bos.borrow().contains_key(&batch_handle));
    (submission, buf)
}

#[test]
fn every_generation_submits_one_terminated_batch() {
    for devid in [0x0166, 0x0d22, 0x1616, 0x22b0, 0x1912, 0x8a52, 0x9a49, 0x5690, 0x7d55] {
        let exec = MemoryExecutor::default();
        let info = *device_info(devid).unwrap();
        let handle = exec.gem_create(64 * 64).unwrap();
        let mut buf = IntelBuf::linear(handle, 16, 64, 32).unwrap();

        let fill = gpgpu_fillfunc(&info).unwrap();
        fill(&exec, &info, &mut buf, FillRegion::new(0, 0, 16, 16), 0x4c).unwrap();

        let submissions = exec.submissions.borrow();
        assert_eq!(submissions.len(), 1, "{}", info.codename);
        let submission = &submissions[0];
        assert_eq!(submission.objects.len(), 2, "{}", info.codename);
        assert_eq!(submission.objects[0].handle, handle);
        assert_ne!(submission.objects[0].flags & EXEC_OBJECT_WRITE, 0);
        assert_ne!(submission.flags & I915_EXEC_NO_RELOC, 0);
        assert_eq!(submission.batch_len % 32, 0);
        assert!(buf.addr.is_some());

        let wide = info.graphics_major() >= 8;
        for object in &submission.objects {
            assert_eq!(
                object.flags & EXEC_OBJECT_SUPPORTS_48B_ADDRESS != 0,
                wide,
                "{}",
                info.codename
            );
        }
    }
}

#[test]
fn batch_ends_with_batch_buffer_end() {
    let exec = MemoryExecutor::default();
    let info = *device_info(0x9a49).unwrap();
    let handle = exec.gem_create(64 * 64).unwrap();
    let mut buf = IntelBuf::linear(handle, 16, 64, 32).unwrap();

    // snapshot every upload before the batch is closed
    struct Snooping<'a>(&'a MemoryExecutor, RefCell<Vec<(u32, Vec<u32>)>>);
    impl BatchExecutor for Snooping<'_> {
        fn gem_create(&self, size: u64) -> IgtResult<u32> {
            self.0.gem_create(size)
        }
        fn gem_write(&self, handle: u32, offset: u64, data: &[u8]) -> IgtResult<()> {
            self.0.gem_write(handle, offset, data)?;
            self.1.borrow_mut().push((handle, self.0.dwords(handle)));
            Ok(())
        }
        fn gem_close(&self, handle: u32) -> IgtResult<()> {
            self.0.gem_close(handle)
        }
        fn execbuf(&self, exec: &mut ExecBatch<'_>) -> IgtResult<()> {
            self.0.execbuf(exec)
        }
        fn gem_wait(&self, handle: u32, timeout_ns: i64) -> IgtResult<()> {
            self.0.gem_wait(handle, timeout_ns)
        }
    }

    let snoop = Snooping(&exec, RefCell::new(Vec::new()));
    let fill = gpgpu_fillfunc(&info).unwrap();
    fill(&snoop, &info, &mut buf, FillRegion::new(0, 0, 16, 16), 0x4c).unwrap();

    let uploads = snoop.1.borrow();
    let (batch_handle, batch) = &uploads[0];
    let submission = exec.submissions.borrow()[0].clone();
    assert_eq!(submission.objects.last().unwrap().handle, *batch_handle);

    let end = submission.batch_len as usize / 4;
    let commands = &batch[..end];
    let bbe = commands
        .iter()
        .rposition(|&dw| dw == MI_BATCH_BUFFER_END)
        .unwrap();
    assert!(commands[bbe + 1..].iter().all(|&dw| dw == 0));
    // the colour sits in the state area above the commands
    assert!(batch[end..].contains(&0x4c));
}

#[test]
fn relocations_target_known_objects() {
    for devid in [0x0166, 0x1912, 0x9a49] {
        let (submission, buf) = fill_on(devid);
        assert!(!submission.relocs.is_empty());
        let handles: Vec<u32> = submission.objects.iter().map(|o| o.handle).collect();
        for reloc in &submission.relocs {
            assert!(handles.contains(&reloc.target_handle));
            assert!(reloc.offset < 4096);
            assert_eq!(reloc.offset % 4, 0);
        }
        let surface = submission
            .relocs
            .iter()
            .find(|r| r.target_handle == buf.handle)
            .unwrap();
        assert_ne!(surface.write_domain, 0);
    }
}

#[test]
fn softpin_parts_pin_every_object() {
    for devid in [0x5690, 0x7d55] {
        let (submission, buf) = fill_on(devid);
        assert!(submission.relocs.is_empty());
        assert!(
            submission
                .objects
                .iter()
                .all(|o| o.flags & EXEC_OBJECT_PINNED != 0)
        );
        let target = submission.objects[0];
        assert_eq!(buf.addr, Some(target.offset));
        assert_eq!(target.offset % 4096, 0);
        assert_ne!(target.offset, submission.objects[1].offset);
    }
}

#[test]
fn newest_parts_have_no_fill() {
    let info = device_info(0x64a0).unwrap();
    assert_matches!(FillPipeline::for_device(info), None);
    assert!(gpgpu_fillfunc(info).is_none());
}

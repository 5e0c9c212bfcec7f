#![allow(clippy::cast_possible_truncation)]

use crate::aperture::{Aperture, VaAllocator};
use crate::drm::ioctl::{
    EXEC_OBJECT_PINNED, EXEC_OBJECT_SUPPORTS_48B_ADDRESS, EXEC_OBJECT_WRITE, I915ExecObject2,
    I915RelocationEntry,
};
use crate::error::{IgtError, IgtResult};
use crate::intel::buf::IntelBuf;
use crate::intel::devinfo::{DeviceInfo, IpVer};
use crate::utils::{align_up, lower_32_bits, upper_32_bits};

/// Size of the batches the fill helpers build.
pub const BATCH_SZ: u32 = 4096;

const GTT_BASE: u64 = 0x10_0000;
const GTT_END_32: u64 = 1 << 32;
const GTT_END_48: u64 = 1 << 48;

/// One `EXECBUFFER2` call, as handed to a [`BatchExecutor`].
///
/// The batch is the last object. Its `relocs_ptr` points into `relocs`.
#[derive(Debug)]
pub struct ExecBatch<'a> {
    pub objects: &'a mut [I915ExecObject2],
    pub relocs: &'a [I915RelocationEntry],
    pub batch_len: u32,
    pub flags: u64,
}

/// The driver operations a batch needs.
///
/// `I915Device` implements this over the real ioctls; tests record the
/// submission instead.
pub trait BatchExecutor {
    fn gem_create(&self, size: u64) -> IgtResult<u32>;

    fn gem_write(&self, handle: u32, offset: u64, data: &[u8]) -> IgtResult<()>;

    fn gem_close(&self, handle: u32) -> IgtResult<()>;

    /// Submit the batch. The kernel may update `objects[..].offset`.
    fn execbuf(&self, exec: &mut ExecBatch<'_>) -> IgtResult<()>;

    /// Wait for all rendering to `handle`. A negative timeout waits forever.
    fn gem_wait(&self, handle: u32, timeout_ns: i64) -> IgtResult<()>;
}

/// A buffer referenced by the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BbObject {
    pub handle: u32,
    pub offset: u64,
    pub size: u64,
    pub write: bool,
}

/// A batch buffer with a movable write pointer.
///
/// Commands and indirect state share the same page. State is written at
/// explicit offsets, commands through [`IntelBb::out`]. GPU addresses come
/// from a per-batch offset allocator: with softpin they are final, otherwise
/// they are presumed offsets backed by relocation entries.
pub struct IntelBb<'a> {
    exec: &'a dyn BatchExecutor,
    info: DeviceInfo,
    handle: u32,
    size: u32,
    batch: Vec<u8>,
    ptr: u32,
    softpin: bool,
    gtt: Aperture,
    objects: Vec<BbObject>,
    relocs: Vec<I915RelocationEntry>,
}

impl std::fmt::Debug for IntelBb<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntelBb")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("ptr", &self.ptr)
            .field("softpin", &self.softpin)
            .field("objects", &self.objects)
            .field("relocs", &self.relocs.len())
            .finish_non_exhaustive()
    }
}

impl<'a> IntelBb<'a> {
    /// Create a `size`-byte batch. Softpin is used on graphics 12.50 and later.
    ///
    /// # Errors
    /// Returns the GEM create error, or `InvalidArgument` for a size that is
    /// not a non-zero multiple of 4096.
    pub fn create(exec: &'a dyn BatchExecutor, info: &DeviceInfo, size: u32) -> IgtResult<Self> {
        Self::with_softpin(exec, info, size, info.graphics_ver >= IpVer::new(12, 50))
    }

    /// # Errors
    /// As [`IntelBb::create`].
    pub fn with_softpin(
        exec: &'a dyn BatchExecutor,
        info: &DeviceInfo,
        size: u32,
        softpin: bool,
    ) -> IgtResult<Self> {
        if size == 0 || size % 4096 != 0 {
            return Err(IgtError::InvalidArgument(format!("batch size {size}")));
        }
        let handle = exec.gem_create(u64::from(size))?;
        let end = if info.needs_32bit_relocs() { GTT_END_32 } else { GTT_END_48 };

        let mut bb = Self {
            exec,
            info: *info,
            handle,
            size,
            batch: vec![0; size as usize],
            ptr: 0,
            softpin,
            gtt: Aperture::new(GTT_BASE, end, Aperture::PAGE_SIZE, 0),
            objects: Vec::new(),
            relocs: Vec::new(),
        };
        bb.add_object(handle, u64::from(size), None, false)?;

        log::debug!(
            "[IntelBb] created batch {handle} ({size} bytes, {}, gen {})",
            if softpin { "softpin" } else { "relocations" },
            info.graphics_ver
        );
        Ok(bb)
    }

    #[must_use]
    pub const fn handle(&self) -> u32 {
        self.handle
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[must_use]
    pub const fn r#gen(&self) -> u32 {
        self.info.graphics_ver.major
    }

    #[must_use]
    pub const fn is_softpin(&self) -> bool {
        self.softpin
    }

    #[must_use]
    pub fn objects(&self) -> &[BbObject] {
        &self.objects
    }

    #[must_use]
    pub fn relocs(&self) -> &[I915RelocationEntry] {
        &self.relocs
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.batch
    }

    // ===========================================================================================
    // Write pointer
    // ===========================================================================================

    /// Current write offset in bytes.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.ptr
    }

    /// # Panics
    /// If `offset` lies past the end of the batch.
    pub fn ptr_set(&mut self, offset: u32) {
        assert!(offset <= self.size, "batch offset {offset} past {}", self.size);
        self.ptr = offset;
    }

    /// Advance by `size` bytes.
    ///
    /// # Panics
    /// If the result lies past the end of the batch.
    pub fn ptr_add(&mut self, size: u32) {
        self.ptr_set(self.ptr + size);
    }

    /// Advance by `size` bytes and return the offset before the move.
    pub fn ptr_add_return_prev_offset(&mut self, size: u32) -> u32 {
        let prev = self.ptr;
        self.ptr_add(size);
        prev
    }

    /// Align the write pointer up and return the new offset.
    pub fn ptr_align(&mut self, alignment: u32) -> u32 {
        let aligned = align_up(u64::from(self.ptr), u64::from(alignment)) as u32;
        self.ptr_set(aligned);
        aligned
    }

    /// Emit one dword at the write pointer.
    ///
    /// # Panics
    /// If the batch is full.
    pub fn out(&mut self, dword: u32) {
        self.write_at(self.ptr, &[dword]);
        self.ptr += 4;
    }

    /// Copy `data` to the write pointer without moving it.
    ///
    /// # Panics
    /// If `data` does not fit.
    pub fn write_bytes(&mut self, data: &[u8]) {
        let start = self.ptr as usize;
        assert!(start + data.len() <= self.batch.len(), "batch overflow");
        self.batch[start..start + data.len()].copy_from_slice(data);
    }

    /// Store dwords at a byte offset, leaving the write pointer alone.
    ///
    /// # Panics
    /// If the dwords do not fit.
    pub fn write_at(&mut self, offset: u32, dwords: &[u32]) {
        let start = offset as usize;
        assert!(start + dwords.len() * 4 <= self.batch.len(), "batch overflow at {offset}");
        for (chunk, dw) in self.batch[start..].chunks_exact_mut(4).zip(dwords) {
            chunk.copy_from_slice(&dw.to_le_bytes());
        }
    }

    /// The dword stored at a byte offset.
    #[must_use]
    pub fn dword_at(&self, offset: u32) -> u32 {
        let start = offset as usize;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.batch[start..start + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Dwords `[from, to)` by byte offset.
    #[must_use]
    pub fn dwords(&self, from: u32, to: u32) -> Vec<u32> {
        (from..to).step_by(4).map(|off| self.dword_at(off)).collect()
    }

    // ===========================================================================================
    // Objects and relocations
    // ===========================================================================================

    /// Add `handle` to the object list, or widen an existing entry to
    /// `write`. Returns its GPU offset.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the offset space is exhausted.
    pub fn add_object(
        &mut self,
        handle: u32,
        size: u64,
        presumed: Option<u64>,
        write: bool,
    ) -> IgtResult<u64> {
        if let Some(obj) = self.objects.iter_mut().find(|o| o.handle == handle) {
            obj.write |= write;
            return Ok(obj.offset);
        }

        let size = align_up(size.max(Aperture::PAGE_SIZE), Aperture::PAGE_SIZE);
        let offset = match presumed {
            Some(addr) if !self.softpin => addr,
            _ => self
                .gtt
                .allocate_va(size, Aperture::PAGE_SIZE)
                .ok_or(IgtError::OutOfMemory)?,
        };
        self.objects.push(BbObject {
            handle,
            offset,
            size,
            write,
        });
        Ok(offset)
    }

    /// Add a surface, recording its GPU offset in `buf.addr`.
    ///
    /// # Errors
    /// As [`IntelBb::add_object`].
    pub fn add_intel_buf(&mut self, buf: &mut IntelBuf, write: bool) -> IgtResult<u64> {
        let offset = self.add_object(buf.handle, buf.size, buf.addr, write)?;
        buf.addr = Some(offset);
        Ok(offset)
    }

    fn add_reloc(
        &mut self,
        handle: u32,
        read_domains: u32,
        write_domain: u32,
        delta: u32,
        offset: u32,
        presumed: Option<u64>,
    ) -> IgtResult<u64> {
        let address = self.add_object(handle, 0, presumed, write_domain != 0)?;
        if !self.softpin {
            self.relocs.push(I915RelocationEntry {
                target_handle: handle,
                delta,
                offset: u64::from(offset),
                presumed_offset: address,
                read_domains,
                write_domain,
            });
        }
        Ok(address)
    }

    /// Emit the address of `handle` plus `delta` at the write pointer: one
    /// dword before gen8, two after. Returns the object's offset.
    ///
    /// # Errors
    /// As [`IntelBb::add_object`], or `InvalidArgument` for an address above
    /// 4 GiB on a 32-bit part.
    pub fn emit_reloc(
        &mut self,
        handle: u32,
        read_domains: u32,
        write_domain: u32,
        delta: u32,
        presumed: Option<u64>,
    ) -> IgtResult<u64> {
        let address =
            self.add_reloc(handle, read_domains, write_domain, delta, self.ptr, presumed)?;
        let value = address + u64::from(delta);
        if self.r#gen() >= 8 {
            self.out(lower_32_bits(value));
            self.out(upper_32_bits(value));
        } else {
            if upper_32_bits(value) != 0 {
                return Err(IgtError::InvalidArgument(format!(
                    "address 0x{value:x} of handle {handle} above 4G"
                )));
            }
            self.out(lower_32_bits(value));
        }
        Ok(address)
    }

    /// Record a relocation at an explicit batch offset and return the
    /// object's address. The caller stores the address itself.
    ///
    /// # Errors
    /// As [`IntelBb::add_object`].
    pub fn offset_reloc(
        &mut self,
        handle: u32,
        read_domains: u32,
        write_domain: u32,
        offset: u32,
        presumed: Option<u64>,
    ) -> IgtResult<u64> {
        self.add_reloc(handle, read_domains, write_domain, 0, offset, presumed)
    }

    /// Rewind to an empty batch, keeping only the batch object itself.
    pub fn reset(&mut self) {
        self.batch.fill(0);
        self.ptr = 0;
        self.relocs.clear();
        let batch = self.handle;
        for obj in self.objects.iter().filter(|o| o.handle != batch) {
            self.gtt.free_va(obj.offset, obj.size);
        }
        self.objects.retain(|o| o.handle == batch);
    }

    // ===========================================================================================
    // Execution
    // ===========================================================================================

    fn exec_objects(&self) -> Vec<I915ExecObject2> {
        let mut flags = 0;
        if self.r#gen() >= 8 {
            flags |= EXEC_OBJECT_SUPPORTS_48B_ADDRESS;
        }
        if self.softpin {
            flags |= EXEC_OBJECT_PINNED;
        }

        // The batch goes last.
        let mut objects: Vec<I915ExecObject2> = self
            .objects
            .iter()
            .filter(|o| o.handle != self.handle)
            .chain(self.objects.iter().filter(|o| o.handle == self.handle))
            .map(|o| I915ExecObject2 {
                handle: o.handle,
                offset: o.offset,
                flags: flags | if o.write { EXEC_OBJECT_WRITE } else { 0 },
                ..Default::default()
            })
            .collect();

        if let Some(batch) = objects.last_mut() {
            batch.relocation_count = self.relocs.len() as u32;
            batch.relocs_ptr = self.relocs.as_ptr() as u64;
        }
        objects
    }

    /// Upload the batch and submit it, running up to `end_offset`.
    ///
    /// # Errors
    /// Returns the upload, submission or wait error.
    pub fn exec(&mut self, end_offset: u32, flags: u64, sync: bool) -> IgtResult<()> {
        if end_offset == 0 || end_offset > self.size {
            return Err(IgtError::InvalidArgument(format!("batch end {end_offset}")));
        }
        self.exec.gem_write(self.handle, 0, &self.batch)?;

        let mut objects = self.exec_objects();
        let mut request = ExecBatch {
            objects: &mut objects,
            relocs: &self.relocs,
            batch_len: end_offset,
            flags,
        };
        self.exec.execbuf(&mut request)?;

        for placed in &objects {
            if let Some(obj) = self.objects.iter_mut().find(|o| o.handle == placed.handle) {
                if obj.offset != placed.offset {
                    log::debug!(
                        "[IntelBb] handle {} moved 0x{:x} -> 0x{:x}",
                        obj.handle,
                        obj.offset,
                        placed.offset
                    );
                    obj.offset = placed.offset;
                }
            }
        }

        if sync {
            self.exec.gem_wait(self.handle, -1)?;
        }
        Ok(())
    }
}

impl Drop for IntelBb<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.exec.gem_close(self.handle) {
            log::error!("[IntelBb] closing batch {} failed: {e}", self.handle);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// A submission captured by [`RecordingExecutor`].
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub objects: Vec<I915ExecObject2>,
        pub relocs: Vec<I915RelocationEntry>,
        pub batch_len: u32,
        pub flags: u64,
    }

    /// Records uploads and submissions instead of touching hardware.
    #[derive(Debug, Default)]
    pub struct RecordingExecutor {
        pub next_handle: RefCell<u32>,
        pub writes: RefCell<Vec<(u32, Vec<u8>)>>,
        pub execs: RefCell<Vec<Recorded>>,
        pub closed: RefCell<Vec<u32>>,
        pub waits: RefCell<u32>,
    }

    impl BatchExecutor for RecordingExecutor {
        fn gem_create(&self, _size: u64) -> IgtResult<u32> {
            let mut next = self.next_handle.borrow_mut();
            *next += 1;
            Ok(*next + 100)
        }

        fn gem_write(&self, handle: u32, _offset: u64, data: &[u8]) -> IgtResult<()> {
            self.writes.borrow_mut().push((handle, data.to_vec()));
            Ok(())
        }

        fn gem_close(&self, handle: u32) -> IgtResult<()> {
            self.closed.borrow_mut().push(handle);
            Ok(())
        }

        fn execbuf(&self, exec: &mut ExecBatch<'_>) -> IgtResult<()> {
            self.execs.borrow_mut().push(Recorded {
                objects: exec.objects.to_vec(),
                relocs: exec.relocs.to_vec(),
                batch_len: exec.batch_len,
                flags: exec.flags,
            });
            Ok(())
        }

        fn gem_wait(&self, _handle: u32, _timeout_ns: i64) -> IgtResult<()> {
            *self.waits.borrow_mut() += 1;
            Ok(())
        }
    }
}

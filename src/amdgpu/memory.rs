#![allow(clippy::cast_possible_truncation)]

use crate::drm::ioctl::{
    AMDGPU_GEM_CREATE_CPU_ACCESS_REQUIRED, AMDGPU_GEM_CREATE_CPU_GTT_USWC,
    AMDGPU_GEM_CREATE_ENCRYPTED, AMDGPU_GEM_CREATE_EXPLICIT_SYNC, AMDGPU_GEM_CREATE_NO_CPU_ACCESS,
    AMDGPU_GEM_CREATE_VM_ALWAYS_VALID, AMDGPU_GEM_CREATE_VRAM_CLEARED,
    AMDGPU_GEM_CREATE_VRAM_CONTIGUOUS, AMDGPU_GEM_DOMAIN_CPU, AMDGPU_GEM_DOMAIN_DOORBELL,
    AMDGPU_GEM_DOMAIN_GDS, AMDGPU_GEM_DOMAIN_GTT, AMDGPU_GEM_DOMAIN_GWS, AMDGPU_GEM_DOMAIN_OA,
    AMDGPU_GEM_DOMAIN_VRAM, AMDGPU_VM_MTYPE_CC, AMDGPU_VM_MTYPE_DEFAULT, AMDGPU_VM_MTYPE_NC,
    AMDGPU_VM_MTYPE_RW, AMDGPU_VM_MTYPE_UC, AMDGPU_VM_MTYPE_WC, AMDGPU_VM_PAGE_EXECUTABLE,
    AMDGPU_VM_PAGE_READABLE, AMDGPU_VM_PAGE_WRITEABLE,
};
use crate::error::{IgtError, IgtResult};
use bitflags::bitflags;
use std::ptr::NonNull;

bitflags! {
    /// Placement domains for `GEM_CREATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GemDomain: u32 {
        const CPU = AMDGPU_GEM_DOMAIN_CPU;
        const GTT = AMDGPU_GEM_DOMAIN_GTT;
        const VRAM = AMDGPU_GEM_DOMAIN_VRAM;
        const GDS = AMDGPU_GEM_DOMAIN_GDS;
        const GWS = AMDGPU_GEM_DOMAIN_GWS;
        const OA = AMDGPU_GEM_DOMAIN_OA;
        const DOORBELL = AMDGPU_GEM_DOMAIN_DOORBELL;
    }

    /// `AMDGPU_GEM_CREATE_*` allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GemCreateFlags: u64 {
        const CPU_ACCESS_REQUIRED = AMDGPU_GEM_CREATE_CPU_ACCESS_REQUIRED;
        const NO_CPU_ACCESS = AMDGPU_GEM_CREATE_NO_CPU_ACCESS;
        const CPU_GTT_USWC = AMDGPU_GEM_CREATE_CPU_GTT_USWC;
        const VRAM_CLEARED = AMDGPU_GEM_CREATE_VRAM_CLEARED;
        const VRAM_CONTIGUOUS = AMDGPU_GEM_CREATE_VRAM_CONTIGUOUS;
        const VM_ALWAYS_VALID = AMDGPU_GEM_CREATE_VM_ALWAYS_VALID;
        const EXPLICIT_SYNC = AMDGPU_GEM_CREATE_EXPLICIT_SYNC;
        const ENCRYPTED = AMDGPU_GEM_CREATE_ENCRYPTED;
    }
}

/// GPU page-table memory type used when mapping a BO into the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryType {
    #[default]
    Default,
    Nc,
    Wc,
    Cc,
    Uc,
    Rw,
}

impl MemoryType {
    /// `GEM_VA` flags for a readable, writeable, executable mapping of this type.
    #[must_use]
    pub const fn va_flags(self) -> u32 {
        let mtype = match self {
            Self::Default => AMDGPU_VM_MTYPE_DEFAULT,
            Self::Nc => AMDGPU_VM_MTYPE_NC,
            Self::Wc => AMDGPU_VM_MTYPE_WC,
            Self::Cc => AMDGPU_VM_MTYPE_CC,
            Self::Uc => AMDGPU_VM_MTYPE_UC,
            Self::Rw => AMDGPU_VM_MTYPE_RW,
        };
        AMDGPU_VM_PAGE_READABLE | AMDGPU_VM_PAGE_WRITEABLE | AMDGPU_VM_PAGE_EXECUTABLE | mtype
    }
}

/// Everything needed to allocate one BO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoRequest {
    pub size: u64,
    pub alignment: u64,
    pub domain: GemDomain,
    pub flags: GemCreateFlags,
    pub mtype: MemoryType,
}

impl BoRequest {
    #[must_use]
    pub const fn new(size: u64) -> Self {
        Self {
            size,
            alignment: 4096,
            domain: GemDomain::GTT,
            flags: GemCreateFlags::empty(),
            mtype: MemoryType::Default,
        }
    }

    #[must_use]
    pub const fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub const fn vram(mut self) -> Self {
        self.domain = GemDomain::VRAM;
        self
    }

    #[must_use]
    pub const fn gtt(mut self) -> Self {
        self.domain = GemDomain::GTT;
        self
    }

    #[must_use]
    pub const fn flags(mut self, flags: GemCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub const fn uncached(mut self) -> Self {
        self.mtype = MemoryType::Uc;
        self
    }
}

// ===============================================================================================
// CPU views of buffer objects
// ===============================================================================================

#[derive(Debug)]
enum Backing {
    Mmap,
    Host(#[allow(dead_code)] Box<[u32]>),
}

/// A CPU view of a buffer object.
///
/// Accesses are volatile because the GPU writes the memory behind our back.
/// A mapping is either an `mmap` of the DRM fd (unmapped on drop) or plain
/// host memory standing in for a BO.
#[derive(Debug)]
pub struct CpuMapping {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// The mapping is exclusively owned; moving it between threads is fine.
unsafe impl Send for CpuMapping {}

impl CpuMapping {
    /// Take ownership of an `mmap`ed range.
    ///
    /// # Safety
    /// `ptr` must come from a successful `mmap` of exactly `len` bytes that nothing else unmaps.
    pub(crate) unsafe fn from_mmap(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            backing: Backing::Mmap,
        }
    }

    /// Zeroed, dword-aligned host memory.
    #[must_use]
    pub fn host(len: usize) -> Self {
        let mut storage = vec![0u32; len.div_ceil(4)].into_boxed_slice();
        let ptr = NonNull::from(&mut storage[..]).cast::<u8>();
        Self {
            ptr,
            len,
            backing: Backing::Host(storage),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn dword_len(&self) -> usize {
        self.len / 4
    }

    #[must_use]
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn read_u32(&self, index: usize) -> u32 {
        assert!(index < self.dword_len(), "dword {index} out of {}", self.dword_len());
        unsafe { self.ptr.as_ptr().cast::<u32>().add(index).read_volatile() }
    }

    pub fn write_u32(&self, index: usize, value: u32) {
        assert!(index < self.dword_len(), "dword {index} out of {}", self.dword_len());
        unsafe { self.ptr.as_ptr().cast::<u32>().add(index).write_volatile(value) }
    }

    /// Like [`read_u32`](Self::read_u32), but an index past the end is an error.
    pub fn get_u32(&self, index: usize) -> IgtResult<u32> {
        self.check_dword(index)?;
        Ok(self.read_u32(index))
    }

    /// Like [`write_u32`](Self::write_u32), but an index past the end is an error.
    pub fn set_u32(&self, index: usize, value: u32) -> IgtResult<()> {
        self.check_dword(index)?;
        self.write_u32(index, value);
        Ok(())
    }

    fn check_dword(&self, index: usize) -> IgtResult<()> {
        if index < self.dword_len() {
            Ok(())
        } else {
            Err(IgtError::InvalidArgument(format!(
                "dword {index} out of {}",
                self.dword_len()
            )))
        }
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.len, "byte {offset} out of {}", self.len);
        unsafe { self.ptr.as_ptr().add(offset).read_volatile() }
    }

    pub fn write_u8(&self, offset: usize, value: u8) {
        assert!(offset < self.len, "byte {offset} out of {}", self.len);
        unsafe { self.ptr.as_ptr().add(offset).write_volatile(value) }
    }

    /// `memset` over the first `len` bytes.
    pub fn fill(&self, value: u8, len: usize) {
        let len = len.min(self.len);
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), value, len) }
    }

    /// Copy dwords to the start of the mapping, truncated to its size.
    pub fn copy_from_u32(&self, src: &[u32]) {
        let count = src.len().min(self.dword_len());
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().cast::<u32>(), count);
        }
    }

    #[must_use]
    pub fn to_vec_u32(&self) -> Vec<u32> {
        (0..self.dword_len()).map(|i| self.read_u32(i)).collect()
    }
}

impl Drop for CpuMapping {
    fn drop(&mut self) {
        if matches!(self.backing, Backing::Mmap) {
            let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
            if ret != 0 {
                log::error!(
                    "[CpuMapping] munmap of {:p} ({} bytes) failed: {}",
                    self.ptr,
                    self.len,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

// ===============================================================================================
// Buffer objects
// ===============================================================================================

/// A GEM object bound into the GPU VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBo {
    pub handle: u32,
    pub gpu_va: u64,
    pub size: u64,
}

/// A GEM object bound into the GPU VM and mapped for the CPU.
#[derive(Debug)]
pub struct MappedBo {
    pub bo: GpuBo,
    pub cpu: CpuMapping,
}

impl MappedBo {
    #[must_use]
    pub const fn handle(&self) -> u32 {
        self.bo.handle
    }

    #[must_use]
    pub const fn gpu_va(&self) -> u64 {
        self.bo.gpu_va
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.bo.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn host_mapping_reads_back() {
        let map = CpuMapping::host(16);
        assert_eq!(map.dword_len(), 4);
        map.fill(0xaa, 8);
        assert_eq!(map.read_u32(0), 0xaaaa_aaaa);
        assert_eq!(map.read_u32(2), 0);
        map.write_u32(3, 0xdead_beaf);
        assert_eq!(map.read_u8(12), 0xaf);
        map.copy_from_u32(&[1, 2]);
        assert_eq!(map.to_vec_u32(), [1, 2, 0, 0xdead_beaf]);
    }

    #[test]
    #[should_panic(expected = "out of")]
    fn out_of_bounds_access_panics() {
        let map = CpuMapping::host(8);
        let _ = map.read_u32(2);
    }

    #[test]
    fn checked_access_rejects_out_of_range() {
        let map = CpuMapping::host(8);
        map.set_u32(1, 0x1234_5678).unwrap();
        assert_eq!(map.get_u32(1).unwrap(), 0x1234_5678);
        assert_matches!(
            map.get_u32(2),
            Err(IgtError::InvalidArgument(msg)) if msg == "dword 2 out of 2"
        );
        assert_matches!(map.set_u32(5, 0), Err(IgtError::InvalidArgument(_)));
        assert_eq!(map.to_vec_u32(), [0, 0x1234_5678]);
    }

    #[test]
    fn va_flags_include_mtype() {
        let flags = MemoryType::Uc.va_flags();
        assert_eq!(flags & AMDGPU_VM_MTYPE_UC, AMDGPU_VM_MTYPE_UC);
        assert_ne!(flags & AMDGPU_VM_PAGE_WRITEABLE, 0);
    }

    #[test]
    fn request_builder() {
        let req = BoRequest::new(8192)
            .vram()
            .flags(GemCreateFlags::CPU_ACCESS_REQUIRED)
            .uncached();
        assert_eq!(req.domain, GemDomain::VRAM);
        assert_eq!(req.alignment, 4096);
        assert_eq!(req.mtype, MemoryType::Uc);
    }
}

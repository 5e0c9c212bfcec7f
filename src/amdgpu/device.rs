#![allow(clippy::cast_possible_truncation)]

use crate::amdgpu::cs::{CsFence, CsRequest, IbInfo, SubmitBackend};
use crate::amdgpu::ip_blocks::{IpBlocks, setup_amdgpu_ip_blocks};
use crate::amdgpu::memory::{
    BoRequest, CpuMapping, GemCreateFlags, GemDomain, GpuBo, MappedBo, MemoryType,
};
use crate::aperture::{Aperture, VaAllocator};
use crate::config::TIMEOUT_INFINITE;
use crate::drm::device::{DriverVersion, DrmDevice};
use crate::drm::ioctl::{
    AMDGPU_BO_LIST_OP_CREATE, AMDGPU_BO_LIST_OP_DESTROY, AMDGPU_CHUNK_ID_IB,
    AMDGPU_CTX_OP_ALLOC_CTX, AMDGPU_CTX_OP_FREE_CTX, AMDGPU_CTX_OP_QUERY_STATE,
    AMDGPU_INFO_DEV_INFO, AMDGPU_INFO_HW_IP_COUNT, AMDGPU_INFO_HW_IP_INFO, AMDGPU_VA_OP_MAP,
    AMDGPU_VA_OP_UNMAP, AmdgpuFence, BoListArgs, BoListEntry, CsArgs, CsChunk, CsChunkIb,
    CtxArgs, DRM_IOCTL_AMDGPU_BO_LIST, DRM_IOCTL_AMDGPU_CS, DRM_IOCTL_AMDGPU_CTX,
    DRM_IOCTL_AMDGPU_FENCE_TO_HANDLE, DRM_IOCTL_AMDGPU_GEM_CREATE, DRM_IOCTL_AMDGPU_GEM_MMAP,
    DRM_IOCTL_AMDGPU_GEM_VA, DRM_IOCTL_AMDGPU_INFO, DRM_IOCTL_AMDGPU_WAIT_CS,
    FenceToHandleArgs, GemCreateArgs, GemCreateIn, GemMmapArgs, GemVaArgs, InfoArgs,
    InfoDevice, InfoHwIp, InfoQueryHwIp, WaitCsArgs,
};
use crate::error::{IgtError, IgtResult};
use crate::utils::{align_up, deadline_from_timeout};
use std::mem::size_of;
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock};

/// Context reset state from `AMDGPU_CTX_OP_QUERY_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetState {
    pub status: u32,
    pub hangs: u32,
}

/// An initialised amdgpu DRM device.
///
/// Owns the GPU VA window of this fd and hands out ranges from it for every
/// BO mapped through it.
#[derive(Debug)]
pub struct AmdgpuDevice {
    drm: DrmDevice,
    version: DriverVersion,
    info: InfoDevice,
    va: Mutex<Aperture>,
    ip_blocks: OnceLock<Arc<IpBlocks>>,
    fence_timeout_ns: u64,
}

impl AmdgpuDevice {
    /// Check the driver, query device info and set up the VA window.
    ///
    /// # Errors
    /// Returns `Unsupported` if the fd does not belong to amdgpu, or the
    /// ioctl error of the version or info query.
    pub fn initialize(drm: DrmDevice) -> IgtResult<Self> {
        let version = drm.version()?;
        if version.name != "amdgpu" {
            return Err(IgtError::Unsupported(format!(
                "{} is driven by {}, not amdgpu",
                drm.path().display(),
                version.name
            )));
        }

        let mut info = InfoDevice::default();
        query_info(&drm, AMDGPU_INFO_DEV_INFO, InfoQueryHwIp::default(), &mut info)?;

        let align = u64::from(info.virtual_address_alignment).max(Aperture::PAGE_SIZE);
        let va = Aperture::new(
            align_up(info.virtual_address_offset.max(align), align),
            info.virtual_address_max,
            align,
            0,
        );

        log::info!(
            "amdgpu {}.{}.{} on {}: device 0x{:04x} family {} VA [0x{:x}, 0x{:x})",
            version.major,
            version.minor,
            version.patchlevel,
            drm.path().display(),
            info.device_id,
            info.family,
            info.virtual_address_offset,
            info.virtual_address_max
        );

        Ok(Self {
            drm,
            version,
            info,
            va: Mutex::new(va),
            ip_blocks: OnceLock::new(),
            fence_timeout_ns: TIMEOUT_INFINITE,
        })
    }

    /// Bound the fence waits of the submission flows run on this device.
    #[must_use]
    pub const fn with_fence_timeout(mut self, ns: u64) -> Self {
        self.fence_timeout_ns = ns;
        self
    }

    #[must_use]
    pub const fn drm(&self) -> &DrmDevice {
        &self.drm
    }

    #[must_use]
    pub const fn version(&self) -> &DriverVersion {
        &self.version
    }

    #[must_use]
    pub const fn info(&self) -> &InfoDevice {
        &self.info
    }

    #[must_use]
    pub const fn family_id(&self) -> u32 {
        self.info.family
    }

    /// The IP tables of this device, built on first use.
    ///
    /// # Errors
    /// Returns `Unsupported` for families without packet tables.
    pub fn ip_blocks(&self) -> IgtResult<Arc<IpBlocks>> {
        if let Some(blocks) = self.ip_blocks.get() {
            return Ok(Arc::clone(blocks));
        }
        let blocks = Arc::new(setup_amdgpu_ip_blocks(
            self.version.major,
            self.version.minor,
            self.info.family,
        )?);
        Ok(Arc::clone(self.ip_blocks.get_or_init(|| blocks)))
    }

    // ===========================================================================================
    // Queries
    // ===========================================================================================

    /// # Errors
    /// Returns the ioctl error.
    pub fn query_hw_ip_info(&self, ip_type: u32, ip_instance: u32) -> IgtResult<InfoHwIp> {
        let mut info = InfoHwIp::default();
        query_info(
            &self.drm,
            AMDGPU_INFO_HW_IP_INFO,
            InfoQueryHwIp {
                type_: ip_type,
                ip_instance,
            },
            &mut info,
        )?;
        Ok(info)
    }

    /// Number of instances of `ip_type`.
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn query_hw_ip_count(&self, ip_type: u32) -> IgtResult<u32> {
        let mut count = 0u32;
        query_info(
            &self.drm,
            AMDGPU_INFO_HW_IP_COUNT,
            InfoQueryHwIp {
                type_: ip_type,
                ip_instance: 0,
            },
            &mut count,
        )?;
        Ok(count)
    }

    // ===========================================================================================
    // GEM and VA
    // ===========================================================================================

    /// # Errors
    /// Returns the ioctl error.
    pub fn gem_create(
        &self,
        size: u64,
        alignment: u64,
        domain: GemDomain,
        flags: GemCreateFlags,
    ) -> IgtResult<u32> {
        let mut args = GemCreateArgs {
            input: GemCreateIn {
                bo_size: size,
                alignment,
                domains: u64::from(domain.bits()),
                domain_flags: flags.bits(),
            },
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_GEM_CREATE, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_GEM_CREATE", &e))?;
        Ok(args.handle())
    }

    /// Map `size` bytes of a BO into this process.
    ///
    /// # Errors
    /// Returns the ioctl or `mmap` error.
    pub fn gem_mmap(&self, handle: u32, size: u64) -> IgtResult<CpuMapping> {
        let mut args = GemMmapArgs {
            data: u64::from(handle),
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_GEM_MMAP, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_GEM_MMAP", &e))?;

        let len = usize::try_from(size)
            .map_err(|_| IgtError::InvalidArgument(format!("mapping of {size} bytes")))?;
        let offset = libc::off_t::try_from(args.data)
            .map_err(|_| IgtError::General(format!("mmap offset 0x{:x}", args.data)))?;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.drm.raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| IgtError::General("mmap returned NULL".into()))?;
        Ok(unsafe { CpuMapping::from_mmap(ptr, len) })
    }

    /// Map or unmap a BO at `va` in the GPU VM.
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn gem_va(
        &self,
        operation: u32,
        handle: u32,
        va: u64,
        size: u64,
        flags: u32,
    ) -> IgtResult<()> {
        let mut args = GemVaArgs {
            handle,
            operation,
            flags,
            va_address: va,
            offset_in_bo: 0,
            map_size: size,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_GEM_VA, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_GEM_VA", &e))
    }

    /// Reserve a GPU VA range.
    ///
    /// # Errors
    /// Returns `OutOfMemory` when the window has no hole large enough.
    pub fn va_range_alloc(&self, size: u64, alignment: u64) -> IgtResult<u64> {
        let mut va = self
            .va
            .lock()
            .map_err(|_| IgtError::General("VA allocator poisoned".into()))?;
        va.allocate_va(size, alignment).ok_or(IgtError::OutOfMemory)
    }

    pub fn va_range_free(&self, addr: u64, size: u64) {
        match self.va.lock() {
            Ok(mut va) => va.free_va(addr, size),
            Err(_) => log::error!("VA allocator poisoned, leaking 0x{addr:x}"),
        }
    }

    /// Create a BO and map it into the GPU VM, without a CPU mapping.
    ///
    /// # Errors
    /// Returns the first failing step; earlier steps are rolled back.
    pub fn gpu_mem_alloc(&self, request: &BoRequest) -> IgtResult<GpuBo> {
        let size = align_up(request.size, Aperture::PAGE_SIZE);
        let handle = self.gem_create(size, request.alignment, request.domain, request.flags)?;

        let gpu_va = match self.va_range_alloc(size, request.alignment) {
            Ok(va) => va,
            Err(e) => {
                self.close_quietly(handle);
                return Err(e);
            }
        };
        let flags = request.mtype.va_flags();
        if let Err(e) = self.gem_va(AMDGPU_VA_OP_MAP, handle, gpu_va, size, flags) {
            self.va_range_free(gpu_va, size);
            self.close_quietly(handle);
            return Err(e);
        }

        Ok(GpuBo {
            handle,
            gpu_va,
            size,
        })
    }

    /// Undo [`gpu_mem_alloc`](Self::gpu_mem_alloc). Every step is attempted;
    /// the first error is returned.
    ///
    /// # Errors
    /// Returns the VA unmap or GEM close error.
    pub fn gpu_mem_free(&self, bo: GpuBo) -> IgtResult<()> {
        let unmapped = self.gem_va(
            AMDGPU_VA_OP_UNMAP,
            bo.handle,
            bo.gpu_va,
            bo.size,
            MemoryType::Default.va_flags(),
        );
        self.va_range_free(bo.gpu_va, bo.size);
        let closed = self
            .drm
            .gem_close(bo.handle)
            .map_err(|e| IgtError::driver("GEM_CLOSE", &e));
        unmapped.and(closed)
    }

    fn close_quietly(&self, handle: u32) {
        if let Err(e) = self.drm.gem_close(handle) {
            log::warn!("GEM_CLOSE of {handle} failed: {e}");
        }
    }

    /// Export a BO as a dma-buf.
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn bo_export_dmabuf(&self, handle: u32) -> IgtResult<OwnedFd> {
        self.drm
            .prime_handle_to_fd(handle)
            .map_err(|e| IgtError::driver("PRIME_HANDLE_TO_FD", &e))
    }

    // ===========================================================================================
    // Contexts
    // ===========================================================================================

    /// # Errors
    /// Returns the ioctl error.
    pub fn ctx_alloc(&self) -> IgtResult<u32> {
        let mut args = CtxArgs {
            op: AMDGPU_CTX_OP_ALLOC_CTX,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_CTX, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_CTX", &e))?;
        Ok(args.out_ctx_id())
    }

    /// # Errors
    /// Returns the ioctl error.
    pub fn ctx_release(&self, ctx_id: u32) -> IgtResult<()> {
        let mut args = CtxArgs {
            op: AMDGPU_CTX_OP_FREE_CTX,
            ctx_id,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_CTX, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_CTX", &e))
    }

    /// # Errors
    /// Returns the ioctl error.
    pub fn ctx_query_reset_state(&self, ctx_id: u32) -> IgtResult<ResetState> {
        let mut args = CtxArgs {
            op: AMDGPU_CTX_OP_QUERY_STATE,
            ctx_id,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_CTX, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_CTX", &e))?;
        Ok(ResetState {
            status: args.out_reset_status(),
            hangs: args.out_hangs(),
        })
    }

    // ===========================================================================================
    // Submission
    // ===========================================================================================

    /// # Errors
    /// Returns the ioctl error.
    pub fn bo_list_create(&self, handles: &[u32]) -> IgtResult<u32> {
        let entries: Vec<BoListEntry> = handles
            .iter()
            .map(|&bo_handle| BoListEntry {
                bo_handle,
                bo_priority: 0,
            })
            .collect();
        let mut args = BoListArgs {
            operation: AMDGPU_BO_LIST_OP_CREATE,
            list_handle: 0,
            bo_number: entries.len() as u32,
            bo_info_size: size_of::<BoListEntry>() as u32,
            bo_info_ptr: entries.as_ptr() as u64,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_BO_LIST, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_BO_LIST", &e))?;
        Ok(args.out_list_handle())
    }

    /// # Errors
    /// Returns the ioctl error.
    pub fn bo_list_destroy(&self, list: u32) -> IgtResult<()> {
        let mut args = BoListArgs {
            operation: AMDGPU_BO_LIST_OP_DESTROY,
            list_handle: list,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_BO_LIST, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_BO_LIST", &e))
    }

    /// Submit the IBs of `request` and return the fence sequence number.
    ///
    /// # Errors
    /// Returns the ioctl error (`ECANCELED` after a reset, `ENODEV` after unplug).
    pub fn cs_submit(&self, ctx_id: u32, request: &CsRequest) -> IgtResult<u64> {
        if request.ibs.is_empty() {
            return Err(IgtError::InvalidArgument("submission without IBs".into()));
        }
        let ib_chunks: Vec<CsChunkIb> = request
            .ibs
            .iter()
            .map(|ib: &IbInfo| CsChunkIb {
                pad: 0,
                flags: ib.flags,
                va_start: ib.gpu_va,
                ib_bytes: ib.size_dw * 4,
                ip_type: request.ip_type,
                ip_instance: request.ip_instance,
                ring: request.ring,
            })
            .collect();
        let chunks: Vec<CsChunk> = ib_chunks
            .iter()
            .map(|ib| CsChunk {
                chunk_id: AMDGPU_CHUNK_ID_IB,
                length_dw: (size_of::<CsChunkIb>() / 4) as u32,
                chunk_data: std::ptr::from_ref(ib) as u64,
            })
            .collect();
        let chunk_ptrs: Vec<u64> = chunks.iter().map(|c| std::ptr::from_ref(c) as u64).collect();

        let mut args = CsArgs {
            ctx_id,
            bo_list_handle: request.bo_list,
            num_chunks: chunk_ptrs.len() as u32,
            flags: 0,
            chunks: chunk_ptrs.as_ptr() as u64,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_CS, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_CS", &e))?;
        Ok(args.out_handle())
    }

    /// Wait for a submission. Returns `true` if it signalled before the timeout.
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn wait_cs(&self, fence: &CsFence, timeout_ns: u64) -> IgtResult<bool> {
        let mut args = WaitCsArgs {
            handle: fence.seq_no,
            timeout: deadline_from_timeout(timeout_ns),
            ip_type: fence.ip_type,
            ip_instance: fence.ip_instance,
            ring: fence.ring,
            ctx_id: fence.ctx_id,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_WAIT_CS, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_WAIT_CS", &e))?;
        Ok(args.out_status() == 0)
    }

    /// Convert a submission fence into a syncobj handle or fd (`AMDGPU_FENCE_TO_HANDLE_*`).
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn fence_to_handle(&self, fence: &CsFence, what: u32) -> IgtResult<u32> {
        let mut args = FenceToHandleArgs {
            fence: AmdgpuFence {
                ctx_id: fence.ctx_id,
                ip_type: fence.ip_type,
                ip_instance: fence.ip_instance,
                ring: fence.ring,
                seq_no: fence.seq_no,
            },
            what,
            pad: 0,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_AMDGPU_FENCE_TO_HANDLE, &mut args) }
            .map_err(|e| IgtError::driver("AMDGPU_FENCE_TO_HANDLE", &e))?;
        Ok(args.out_handle())
    }
}

fn query_info<T>(drm: &DrmDevice, query: u32, hw_ip: InfoQueryHwIp, out: &mut T) -> IgtResult<()> {
    let mut args = InfoArgs {
        return_pointer: std::ptr::from_mut(out) as u64,
        return_size: size_of::<T>() as u32,
        query,
        query_hw_ip: hw_ip,
        pad: [0; 2],
    };
    unsafe { drm.ioctl(DRM_IOCTL_AMDGPU_INFO, &mut args) }
        .map_err(|e| IgtError::driver("AMDGPU_INFO", &e))
}

impl AsRawFd for AmdgpuDevice {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.drm.raw_fd()
    }
}

impl SubmitBackend for AmdgpuDevice {
    fn query_hw_ip_info(&self, ip_type: u32, ip_instance: u32) -> IgtResult<InfoHwIp> {
        Self::query_hw_ip_info(self, ip_type, ip_instance)
    }

    fn ctx_create(&self) -> IgtResult<u32> {
        self.ctx_alloc()
    }

    fn ctx_free(&self, ctx_id: u32) -> IgtResult<()> {
        self.ctx_release(ctx_id)
    }

    fn alloc_and_map(&self, request: &BoRequest) -> IgtResult<MappedBo> {
        let bo = self.gpu_mem_alloc(request)?;
        match self.gem_mmap(bo.handle, bo.size) {
            Ok(cpu) => Ok(MappedBo { bo, cpu }),
            Err(e) => {
                if let Err(free_err) = self.gpu_mem_free(bo) {
                    log::warn!("rollback of BO {} failed: {free_err}", bo.handle);
                }
                Err(e)
            }
        }
    }

    fn unmap_and_free(&self, bo: MappedBo) -> IgtResult<()> {
        let MappedBo { bo, cpu } = bo;
        drop(cpu);
        self.gpu_mem_free(bo)
    }

    fn bo_list_create(&self, handles: &[u32]) -> IgtResult<u32> {
        Self::bo_list_create(self, handles)
    }

    fn bo_list_destroy(&self, list: u32) -> IgtResult<()> {
        Self::bo_list_destroy(self, list)
    }

    fn cs_submit(&self, ctx_id: u32, request: &mut CsRequest) -> IgtResult<()> {
        request.seq_no = Self::cs_submit(self, ctx_id, request)?;
        Ok(())
    }

    fn fence_wait(&self, fence: &CsFence, timeout_ns: u64) -> IgtResult<bool> {
        self.wait_cs(fence, timeout_ns)
    }

    fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ns
    }
}

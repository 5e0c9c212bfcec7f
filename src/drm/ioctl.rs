use crate::utils::{drm_cmd_iow, drm_cmd_iowr, drm_iow, drm_iowr};

// ===============================================================================================
// DRM core
// ===============================================================================================

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmVersion {
    pub version_major: i32,
    pub version_minor: i32,
    pub version_patchlevel: i32,
    pub name_len: usize,
    pub name: u64,
    pub date_len: usize,
    pub date: u64,
    pub desc_len: usize,
    pub desc: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmGemClose {
    pub handle: u32,
    pub pad: u32,
}

pub const DRM_CLOEXEC: u32 = libc::O_CLOEXEC as u32;
pub const DRM_RDWR: u32 = libc::O_RDWR as u32;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmPrimeHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjCreate {
    pub handle: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjDestroy {
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
    pub pad: u32,
}

pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_ALL: u32 = 1 << 0;
pub const DRM_SYNCOBJ_WAIT_FLAGS_WAIT_FOR_SUBMIT: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct DrmSyncobjWait {
    pub handles: u64,
    pub timeout_nsec: i64,
    pub count_handles: u32,
    pub flags: u32,
    pub first_signaled: u32,
    pub pad: u32,
}

pub const DRM_IOCTL_VERSION: u32 = drm_iowr::<DrmVersion>(0x00);
pub const DRM_IOCTL_GEM_CLOSE: u32 = drm_iow::<DrmGemClose>(0x09);
pub const DRM_IOCTL_PRIME_HANDLE_TO_FD: u32 = drm_iowr::<DrmPrimeHandle>(0x2d);
pub const DRM_IOCTL_PRIME_FD_TO_HANDLE: u32 = drm_iowr::<DrmPrimeHandle>(0x2e);
pub const DRM_IOCTL_SYNCOBJ_CREATE: u32 = drm_iowr::<DrmSyncobjCreate>(0xBF);
pub const DRM_IOCTL_SYNCOBJ_DESTROY: u32 = drm_iowr::<DrmSyncobjDestroy>(0xC0);
pub const DRM_IOCTL_SYNCOBJ_HANDLE_TO_FD: u32 = drm_iowr::<DrmSyncobjHandle>(0xC1);
pub const DRM_IOCTL_SYNCOBJ_FD_TO_HANDLE: u32 = drm_iowr::<DrmSyncobjHandle>(0xC2);
pub const DRM_IOCTL_SYNCOBJ_WAIT: u32 = drm_iowr::<DrmSyncobjWait>(0xC3);

// ===============================================================================================
// amdgpu: Memory
// ===============================================================================================

pub const AMDGPU_GEM_DOMAIN_CPU: u32 = 0x1;
pub const AMDGPU_GEM_DOMAIN_GTT: u32 = 0x2;
pub const AMDGPU_GEM_DOMAIN_VRAM: u32 = 0x4;
pub const AMDGPU_GEM_DOMAIN_GDS: u32 = 0x8;
pub const AMDGPU_GEM_DOMAIN_GWS: u32 = 0x10;
pub const AMDGPU_GEM_DOMAIN_OA: u32 = 0x20;
pub const AMDGPU_GEM_DOMAIN_DOORBELL: u32 = 0x40;

pub const AMDGPU_GEM_CREATE_CPU_ACCESS_REQUIRED: u64 = 1 << 0;
pub const AMDGPU_GEM_CREATE_NO_CPU_ACCESS: u64 = 1 << 1;
pub const AMDGPU_GEM_CREATE_CPU_GTT_USWC: u64 = 1 << 2;
pub const AMDGPU_GEM_CREATE_VRAM_CLEARED: u64 = 1 << 3;
pub const AMDGPU_GEM_CREATE_VRAM_CONTIGUOUS: u64 = 1 << 5;
pub const AMDGPU_GEM_CREATE_VM_ALWAYS_VALID: u64 = 1 << 6;
pub const AMDGPU_GEM_CREATE_EXPLICIT_SYNC: u64 = 1 << 7;
pub const AMDGPU_GEM_CREATE_ENCRYPTED: u64 = 1 << 10;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemCreateIn {
    pub bo_size: u64,
    pub alignment: u64,
    pub domains: u64,
    pub domain_flags: u64,
}

/// `union drm_amdgpu_gem_create`; the kernel writes the handle over the first dword.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemCreateArgs {
    pub input: GemCreateIn,
}

impl GemCreateArgs {
    #[must_use]
    pub const fn handle(&self) -> u32 {
        self.input.bo_size as u32
    }
}

/// `union drm_amdgpu_gem_mmap`: handle in, fake mmap offset out.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemMmapArgs {
    pub data: u64,
}

pub const AMDGPU_VA_OP_MAP: u32 = 1;
pub const AMDGPU_VA_OP_UNMAP: u32 = 2;
pub const AMDGPU_VA_OP_CLEAR: u32 = 3;
pub const AMDGPU_VA_OP_REPLACE: u32 = 4;

pub const AMDGPU_VM_DELAY_UPDATE: u32 = 1 << 0;
pub const AMDGPU_VM_PAGE_READABLE: u32 = 1 << 1;
pub const AMDGPU_VM_PAGE_WRITEABLE: u32 = 1 << 2;
pub const AMDGPU_VM_PAGE_EXECUTABLE: u32 = 1 << 3;
pub const AMDGPU_VM_PAGE_PRT: u32 = 1 << 4;
pub const AMDGPU_VM_MTYPE_MASK: u32 = 0xf << 5;
pub const AMDGPU_VM_MTYPE_DEFAULT: u32 = 0 << 5;
pub const AMDGPU_VM_MTYPE_NC: u32 = 1 << 5;
pub const AMDGPU_VM_MTYPE_WC: u32 = 2 << 5;
pub const AMDGPU_VM_MTYPE_CC: u32 = 3 << 5;
pub const AMDGPU_VM_MTYPE_UC: u32 = 4 << 5;
pub const AMDGPU_VM_MTYPE_RW: u32 = 5 << 5;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemVaArgs {
    pub handle: u32,
    pub pad: u32,
    pub operation: u32,
    pub flags: u32,
    pub va_address: u64,
    pub offset_in_bo: u64,
    pub map_size: u64,
}

// ===============================================================================================
// amdgpu: Contexts and BO lists
// ===============================================================================================

pub const AMDGPU_CTX_OP_ALLOC_CTX: u32 = 1;
pub const AMDGPU_CTX_OP_FREE_CTX: u32 = 2;
pub const AMDGPU_CTX_OP_QUERY_STATE: u32 = 3;
pub const AMDGPU_CTX_OP_QUERY_STATE2: u32 = 4;

pub const AMDGPU_CTX_NO_RESET: u32 = 0;
pub const AMDGPU_CTX_GUILTY_RESET: u32 = 1;
pub const AMDGPU_CTX_INNOCENT_RESET: u32 = 2;
pub const AMDGPU_CTX_UNKNOWN_RESET: u32 = 3;

/// `union drm_amdgpu_ctx`. Input is `op, flags, ctx_id, priority`; output reuses the
/// same 16 bytes as `ctx_id` (alloc) or `flags:u64, hangs, reset_status` (query).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CtxArgs {
    pub op: u32,
    pub flags: u32,
    pub ctx_id: u32,
    pub priority: i32,
}

impl CtxArgs {
    #[must_use]
    pub const fn out_ctx_id(&self) -> u32 {
        self.op
    }

    #[must_use]
    pub const fn out_hangs(&self) -> u32 {
        self.ctx_id
    }

    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn out_reset_status(&self) -> u32 {
        self.priority as u32
    }
}

pub const AMDGPU_BO_LIST_OP_CREATE: u32 = 0;
pub const AMDGPU_BO_LIST_OP_DESTROY: u32 = 1;
pub const AMDGPU_BO_LIST_OP_UPDATE: u32 = 2;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BoListEntry {
    pub bo_handle: u32,
    pub bo_priority: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BoListArgs {
    pub operation: u32,
    pub list_handle: u32,
    pub bo_number: u32,
    pub bo_info_size: u32,
    pub bo_info_ptr: u64,
}

impl BoListArgs {
    /// The new list handle, written over `operation` by `OP_CREATE`.
    #[must_use]
    pub const fn out_list_handle(&self) -> u32 {
        self.operation
    }
}

// ===============================================================================================
// amdgpu: Command submission
// ===============================================================================================

pub const AMDGPU_CHUNK_ID_IB: u32 = 0x01;
pub const AMDGPU_CHUNK_ID_FENCE: u32 = 0x02;
pub const AMDGPU_CHUNK_ID_DEPENDENCIES: u32 = 0x03;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_IN: u32 = 0x04;
pub const AMDGPU_CHUNK_ID_SYNCOBJ_OUT: u32 = 0x05;
pub const AMDGPU_CHUNK_ID_BO_HANDLES: u32 = 0x06;

pub const AMDGPU_IB_FLAG_CE: u32 = 1 << 0;
pub const AMDGPU_IB_FLAG_PREAMBLE: u32 = 1 << 1;
pub const AMDGPU_IB_FLAG_PREEMPT: u32 = 1 << 2;
pub const AMDGPU_IB_FLAGS_SECURE: u32 = 1 << 5;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CsChunk {
    pub chunk_id: u32,
    pub length_dw: u32,
    pub chunk_data: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CsChunkIb {
    pub pad: u32,
    pub flags: u32,
    pub va_start: u64,
    pub ib_bytes: u32,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
}

/// `union drm_amdgpu_cs`; on return the first qword holds the fence sequence number.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CsArgs {
    pub ctx_id: u32,
    pub bo_list_handle: u32,
    pub num_chunks: u32,
    pub flags: u32,
    pub chunks: u64,
}

impl CsArgs {
    #[must_use]
    pub const fn out_handle(&self) -> u64 {
        (self.ctx_id as u64) | ((self.bo_list_handle as u64) << 32)
    }
}

/// `union drm_amdgpu_wait_cs`; `timeout` is an absolute `CLOCK_MONOTONIC` deadline.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct WaitCsArgs {
    pub handle: u64,
    pub timeout: u64,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub ctx_id: u32,
}

impl WaitCsArgs {
    /// Non-zero when the fence has not signalled before the deadline.
    #[must_use]
    pub const fn out_status(&self) -> u64 {
        self.handle
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct AmdgpuFence {
    pub ctx_id: u32,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub seq_no: u64,
}

pub const AMDGPU_FENCE_TO_HANDLE_GET_SYNCOBJ: u32 = 0;
pub const AMDGPU_FENCE_TO_HANDLE_GET_SYNCOBJ_FD: u32 = 1;
pub const AMDGPU_FENCE_TO_HANDLE_GET_SYNC_FILE_FD: u32 = 2;

/// `union drm_amdgpu_fence_to_handle`; the handle comes back in the first dword.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct FenceToHandleArgs {
    pub fence: AmdgpuFence,
    pub what: u32,
    pub pad: u32,
}

impl FenceToHandleArgs {
    #[must_use]
    pub const fn out_handle(&self) -> u32 {
        self.fence.ctx_id
    }
}

// ===============================================================================================
// amdgpu: Queries
// ===============================================================================================

pub const AMDGPU_HW_IP_GFX: u32 = 0;
pub const AMDGPU_HW_IP_COMPUTE: u32 = 1;
pub const AMDGPU_HW_IP_DMA: u32 = 2;
pub const AMDGPU_HW_IP_UVD: u32 = 3;
pub const AMDGPU_HW_IP_VCE: u32 = 4;
pub const AMDGPU_HW_IP_UVD_ENC: u32 = 5;
pub const AMDGPU_HW_IP_VCN_DEC: u32 = 6;
pub const AMDGPU_HW_IP_VCN_ENC: u32 = 7;
pub const AMDGPU_HW_IP_VCN_JPEG: u32 = 8;
pub const AMDGPU_HW_IP_VPE: u32 = 9;
pub const AMDGPU_HW_IP_NUM: u32 = 10;

pub const AMDGPU_INFO_ACCEL_WORKING: u32 = 0x00;
pub const AMDGPU_INFO_HW_IP_INFO: u32 = 0x02;
pub const AMDGPU_INFO_HW_IP_COUNT: u32 = 0x03;
pub const AMDGPU_INFO_DEV_INFO: u32 = 0x16;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct InfoQueryHwIp {
    pub type_: u32,
    pub ip_instance: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct InfoArgs {
    pub return_pointer: u64,
    pub return_size: u32,
    pub query: u32,
    pub query_hw_ip: InfoQueryHwIp,
    pub pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct InfoHwIp {
    pub hw_ip_version_major: u32,
    pub hw_ip_version_minor: u32,
    pub capabilities_flags: u64,
    pub ib_start_alignment: u32,
    pub ib_size_alignment: u32,
    pub available_rings: u32,
    pub ip_discovery_version: u32,
}

/// Leading part of `struct drm_amdgpu_info_device`; the kernel copies at most
/// `return_size` bytes so a prefix is enough.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct InfoDevice {
    pub device_id: u32,
    pub chip_rev: u32,
    pub external_rev: u32,
    pub pci_rev: u32,
    pub family: u32,
    pub num_shader_engines: u32,
    pub num_shader_arrays_per_engine: u32,
    pub gpu_counter_freq: u32,
    pub max_engine_clock: u64,
    pub max_memory_clock: u64,
    pub cu_active_number: u32,
    pub cu_ao_mask: u32,
    pub cu_bitmap: [[u32; 4]; 4],
    pub enabled_rb_pipes_mask: u32,
    pub num_rb_pipes: u32,
    pub num_hw_gfx_contexts: u32,
    pub pcie_gen: u32,
    pub ids_flags: u64,
    pub virtual_address_offset: u64,
    pub virtual_address_max: u64,
    pub virtual_address_alignment: u32,
    pub pte_fragment_size: u32,
    pub gart_page_size: u32,
    pub ce_ram_size: u32,
    pub vram_type: u32,
    pub vram_bit_width: u32,
    pub vce_harvest_config: u32,
    pub gc_double_offchip_lds_buf: u32,
    pub prim_buf_gpu_addr: u64,
    pub pos_buf_gpu_addr: u64,
    pub cntl_sb_buf_gpu_addr: u64,
    pub param_buf_gpu_addr: u64,
    pub prim_buf_size: u32,
    pub pos_buf_size: u32,
    pub cntl_sb_buf_size: u32,
    pub param_buf_size: u32,
    pub wave_front_size: u32,
    pub num_shader_visible_vgprs: u32,
    pub num_cu_per_sh: u32,
    pub num_tcc_blocks: u32,
    pub gs_vgt_table_depth: u32,
    pub gs_prim_buffer_depth: u32,
    pub max_gs_waves_per_vgt: u32,
    pub pcie_num_lanes: u32,
    pub cu_ao_bitmap: [[u32; 4]; 4],
    pub high_va_offset: u64,
    pub high_va_max: u64,
}

pub const DRM_IOCTL_AMDGPU_GEM_CREATE: u32 = drm_cmd_iowr::<GemCreateArgs>(0x00);
pub const DRM_IOCTL_AMDGPU_GEM_MMAP: u32 = drm_cmd_iowr::<GemMmapArgs>(0x01);
pub const DRM_IOCTL_AMDGPU_CTX: u32 = drm_cmd_iowr::<CtxArgs>(0x02);
pub const DRM_IOCTL_AMDGPU_BO_LIST: u32 = drm_cmd_iowr::<BoListArgs>(0x03);
pub const DRM_IOCTL_AMDGPU_CS: u32 = drm_cmd_iowr::<CsArgs>(0x04);
pub const DRM_IOCTL_AMDGPU_INFO: u32 = drm_cmd_iow::<InfoArgs>(0x05);
pub const DRM_IOCTL_AMDGPU_GEM_VA: u32 = drm_cmd_iow::<GemVaArgs>(0x08);
pub const DRM_IOCTL_AMDGPU_WAIT_CS: u32 = drm_cmd_iowr::<WaitCsArgs>(0x09);
pub const DRM_IOCTL_AMDGPU_FENCE_TO_HANDLE: u32 = drm_cmd_iowr::<FenceToHandleArgs>(0x14);

// ===============================================================================================
// i915
// ===============================================================================================

pub const I915_PARAM_CHIPSET_ID: i32 = 4;

pub const I915_GEM_DOMAIN_CPU: u32 = 0x01;
pub const I915_GEM_DOMAIN_RENDER: u32 = 0x02;
pub const I915_GEM_DOMAIN_SAMPLER: u32 = 0x04;
pub const I915_GEM_DOMAIN_COMMAND: u32 = 0x08;
pub const I915_GEM_DOMAIN_INSTRUCTION: u32 = 0x10;
pub const I915_GEM_DOMAIN_VERTEX: u32 = 0x20;
pub const I915_GEM_DOMAIN_GTT: u32 = 0x40;

pub const EXEC_OBJECT_NEEDS_FENCE: u64 = 1 << 0;
pub const EXEC_OBJECT_WRITE: u64 = 1 << 2;
pub const EXEC_OBJECT_SUPPORTS_48B_ADDRESS: u64 = 1 << 3;
pub const EXEC_OBJECT_PINNED: u64 = 1 << 4;

pub const I915_EXEC_DEFAULT: u64 = 0;
pub const I915_EXEC_RENDER: u64 = 1;
pub const I915_EXEC_NO_RELOC: u64 = 1 << 11;
pub const I915_EXEC_HANDLE_LUT: u64 = 1 << 12;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915GetParam {
    pub param: i32,
    pub pad: u32,
    pub value: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915GemCreate {
    pub size: u64,
    pub handle: u32,
    pub pad: u32,
}

/// Shared by `GEM_PREAD` and `GEM_PWRITE`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915GemRw {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
    pub size: u64,
    pub data_ptr: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915RelocationEntry {
    pub target_handle: u32,
    pub delta: u32,
    pub offset: u64,
    pub presumed_offset: u64,
    pub read_domains: u32,
    pub write_domain: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915ExecObject2 {
    pub handle: u32,
    pub relocation_count: u32,
    pub relocs_ptr: u64,
    pub alignment: u64,
    pub offset: u64,
    pub flags: u64,
    pub rsvd1: u64,
    pub rsvd2: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915Execbuffer2 {
    pub buffers_ptr: u64,
    pub buffer_count: u32,
    pub batch_start_offset: u32,
    pub batch_len: u32,
    pub dr1: u32,
    pub dr4: u32,
    pub num_cliprects: u32,
    pub cliprects_ptr: u64,
    pub flags: u64,
    pub rsvd1: u64,
    pub rsvd2: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915GemWait {
    pub bo_handle: u32,
    pub flags: u32,
    pub timeout_ns: i64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct I915GemMmapOffset {
    pub handle: u32,
    pub pad: u32,
    /// Out: fake offset to pass to `mmap`.
    pub offset: u64,
    pub flags: u64,
    pub extensions: u64,
}

pub const I915_MMAP_OFFSET_WC: u64 = 1;
pub const I915_MMAP_OFFSET_WB: u64 = 2;
pub const I915_MMAP_OFFSET_FIXED: u64 = 4;

pub const DRM_IOCTL_I915_GETPARAM: u32 = drm_cmd_iowr::<I915GetParam>(0x06);
pub const DRM_IOCTL_I915_GEM_CREATE: u32 = drm_cmd_iowr::<I915GemCreate>(0x1b);
pub const DRM_IOCTL_I915_GEM_PREAD: u32 = drm_cmd_iow::<I915GemRw>(0x1c);
pub const DRM_IOCTL_I915_GEM_PWRITE: u32 = drm_cmd_iow::<I915GemRw>(0x1d);
pub const DRM_IOCTL_I915_GEM_EXECBUFFER2: u32 = drm_cmd_iow::<I915Execbuffer2>(0x29);
pub const DRM_IOCTL_I915_GEM_MMAP_OFFSET: u32 = drm_cmd_iowr::<I915GemMmapOffset>(0x24);
pub const DRM_IOCTL_I915_GEM_WAIT: u32 = drm_cmd_iowr::<I915GemWait>(0x2c);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn uapi_struct_sizes() {
        assert_eq!(size_of::<GemCreateArgs>(), 32);
        assert_eq!(size_of::<CtxArgs>(), 16);
        assert_eq!(size_of::<BoListArgs>(), 24);
        assert_eq!(size_of::<CsArgs>(), 24);
        assert_eq!(size_of::<CsChunkIb>(), 32);
        assert_eq!(size_of::<InfoArgs>(), 32);
        assert_eq!(size_of::<GemVaArgs>(), 40);
        assert_eq!(size_of::<WaitCsArgs>(), 32);
        assert_eq!(size_of::<FenceToHandleArgs>(), 32);
        assert_eq!(size_of::<InfoHwIp>(), 32);
        assert_eq!(size_of::<DrmSyncobjWait>(), 32);
        assert_eq!(size_of::<I915ExecObject2>(), 56);
        assert_eq!(size_of::<I915Execbuffer2>(), 64);
        assert_eq!(size_of::<I915GemMmapOffset>(), 32);
    }

    #[test]
    fn well_known_ioctl_numbers() {
        assert_eq!(DRM_IOCTL_AMDGPU_CS, 0xc018_6444);
        assert_eq!(DRM_IOCTL_AMDGPU_INFO, 0x4020_6445);
        assert_eq!(DRM_IOCTL_GEM_CLOSE, 0x4008_6409);
        assert_eq!(DRM_IOCTL_I915_GEM_EXECBUFFER2, 0x4040_6469);
    }
}

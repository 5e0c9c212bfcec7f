//! Per-generation IP function tables.
//!
//! Each GPU generation gets one [`IpBlockVersion`] per engine type. The
//! version points at an [`IpFuncs`] implementation that knows how to encode
//! the basic memory packets for that engine. [`setup_amdgpu_ip_blocks`] picks
//! the tables from the ASIC family reported by the kernel.

use crate::amdgpu::cs::SubmitBackend;
use crate::amdgpu::pm4::{
    DMA_DATA_CP_SYNC, DMA_DATA_SI_CP_SYNC, GFX_COMPUTE_NOP, PACKET3_ATOMIC_MEM, PACKET3_DMA_DATA,
    PACKET3_DMA_DATA_SI, PACKET3_WAIT_REG_MEM, PACKET3_WRITE_DATA, SDMA_COPY_SUB_OPCODE_LINEAR,
    SDMA_NOP, SDMA_NOP_SI, SDMA_OPCODE_ATOMIC, SDMA_OPCODE_CONSTANT_FILL,
    SDMA_OPCODE_CONSTANT_FILL_SI, SDMA_OPCODE_COPY, SDMA_OPCODE_COPY_SI,
    SDMA_OPCODE_POLL_REGMEM, SDMA_OPCODE_WRITE, SDMA_OPCODE_WRITE_SI,
    SDMA_POLL_REGMEM_EXTRA_M, SDMA_WRITE_SUB_OPCODE_LINEAR, TC_OP_ATOMIC_CMPSWAP_RTN_32,
    WAIT_REG_MEM_FUNC_EQUAL, WR_CONFIRM, WRITE_DATA_DST_SEL_MEM_ASYNC, atomic_mem_cache_policy,
    atomic_mem_command, atomic_mem_engine_sel, dma_data_dst_sel, dma_data_engine,
    dma_data_si_dst_sel, dma_data_si_engine, dma_data_si_src_sel, dma_data_src_sel, packet3,
    sdma_atomic_loop, sdma_atomic_opcode, sdma_atomic_tmz, sdma_constant_fill_extra_size,
    sdma_packet, sdma_packet_si, sdma_poll_regmem_dw5_interval,
    sdma_poll_regmem_dw5_retry_count, sdma_poll_regmem_extra_func, wait_reg_mem_function,
    wait_reg_mem_mem_space, write_data_dst_sel,
};
use crate::amdgpu::ring_context::RingContext;
use crate::drm::ioctl::{
    AMDGPU_HW_IP_COMPUTE, AMDGPU_HW_IP_DMA, AMDGPU_HW_IP_GFX, AMDGPU_HW_IP_NUM, AMDGPU_HW_IP_UVD,
    AMDGPU_HW_IP_UVD_ENC, AMDGPU_HW_IP_VCE, AMDGPU_HW_IP_VCN_DEC, AMDGPU_HW_IP_VCN_ENC,
    AMDGPU_HW_IP_VCN_JPEG, AMDGPU_HW_IP_VPE,
};
use crate::error::{IgtError, IgtResult};
use crate::utils::{lower_32_bits, upper_32_bits};
use std::fmt::Debug;
use std::sync::Arc;

// ===============================================================================================
// ASIC families
// ===============================================================================================

pub const AMDGPU_FAMILY_SI: u32 = 110;
pub const AMDGPU_FAMILY_CI: u32 = 120;
pub const AMDGPU_FAMILY_KV: u32 = 125;
pub const AMDGPU_FAMILY_VI: u32 = 130;
pub const AMDGPU_FAMILY_CZ: u32 = 135;
pub const AMDGPU_FAMILY_AI: u32 = 141;
pub const AMDGPU_FAMILY_RV: u32 = 142;
pub const AMDGPU_FAMILY_NV: u32 = 143;
pub const AMDGPU_FAMILY_VGH: u32 = 144;
pub const AMDGPU_FAMILY_GC_11_0_0: u32 = 145;
pub const AMDGPU_FAMILY_YC: u32 = 146;
pub const AMDGPU_FAMILY_GC_11_0_1: u32 = 148;
pub const AMDGPU_FAMILY_GC_10_3_6: u32 = 149;
pub const AMDGPU_FAMILY_GC_11_5_0: u32 = 150;
pub const AMDGPU_FAMILY_GC_10_3_7: u32 = 151;
pub const AMDGPU_FAMILY_GC_12_0_0: u32 = 152;

/// Value the memory packets write and the compare helpers expect.
pub const DEADBEAF: u32 = 0xdead_beaf;
/// Byte pattern used by the copy tests (`0xaa` in every byte).
pub const PATTERN: u32 = 0xaaaa_aaaa;

// ===============================================================================================
// Engine types
// ===============================================================================================

/// Engine kinds, numbered like `AMDGPU_HW_IP_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum IpBlockType {
    Gfx = AMDGPU_HW_IP_GFX,
    Compute = AMDGPU_HW_IP_COMPUTE,
    Dma = AMDGPU_HW_IP_DMA,
    Uvd = AMDGPU_HW_IP_UVD,
    Vce = AMDGPU_HW_IP_VCE,
    UvdEnc = AMDGPU_HW_IP_UVD_ENC,
    VcnDec = AMDGPU_HW_IP_VCN_DEC,
    VcnEnc = AMDGPU_HW_IP_VCN_ENC,
    VcnJpeg = AMDGPU_HW_IP_VCN_JPEG,
    Vpe = AMDGPU_HW_IP_VPE,
}

/// Number of engine kinds.
pub const AMD_IP_MAX: usize = AMDGPU_HW_IP_NUM as usize;

impl IpBlockType {
    /// The unified VCN engine shares the encoder's slot.
    pub const VCN_UNIFIED: Self = Self::VcnEnc;

    pub const ALL: [Self; AMD_IP_MAX] = [
        Self::Gfx,
        Self::Compute,
        Self::Dma,
        Self::Uvd,
        Self::Vce,
        Self::UvdEnc,
        Self::VcnDec,
        Self::VcnEnc,
        Self::VcnJpeg,
        Self::Vpe,
    ];

    #[must_use]
    pub const fn hw_ip(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_hw_ip(ip: u32) -> Option<Self> {
        Self::ALL.get(ip as usize).copied()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gfx => "gfx",
            Self::Compute => "compute",
            Self::Dma => "sdma",
            Self::Uvd => "uvd",
            Self::Vce => "vce",
            Self::UvdEnc => "uvd_enc",
            Self::VcnDec => "vcn_dec",
            Self::VcnEnc => "vcn_enc",
            Self::VcnJpeg => "vcn_jpeg",
            Self::Vpe => "vpe",
        }
    }
}

impl std::fmt::Display for IpBlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ===============================================================================================
// Register offsets
// ===============================================================================================

/// Compute registers programmed by tests through `SET_SH_REG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralReg {
    ComputeNumThreadX,
    ComputeNumThreadY,
    ComputeNumThreadZ,
    ComputePgmLo,
    ComputePgmRsrc1,
    ComputePgmRsrc2,
    ComputeResourceLimits,
    ComputeTmpringSize,
    ComputeUserData0,
    ComputeDispatchInitiator,
}

/// Offsets relative to the persistent SH register base (`0x2c00`), ready to
/// use as the first dword of a `SET_SH_REG` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxRegOffsets {
    pub compute_num_thread_x: u32,
    pub compute_num_thread_y: u32,
    pub compute_num_thread_z: u32,
    pub compute_pgm_lo: u32,
    pub compute_pgm_rsrc1: u32,
    pub compute_pgm_rsrc2: u32,
    pub compute_resource_limits: u32,
    pub compute_tmpring_size: u32,
    pub compute_user_data_0: u32,
    pub compute_dispatch_initiator: u32,
}

impl GfxRegOffsets {
    #[must_use]
    pub const fn get(&self, reg: GeneralReg) -> u32 {
        match reg {
            GeneralReg::ComputeNumThreadX => self.compute_num_thread_x,
            GeneralReg::ComputeNumThreadY => self.compute_num_thread_y,
            GeneralReg::ComputeNumThreadZ => self.compute_num_thread_z,
            GeneralReg::ComputePgmLo => self.compute_pgm_lo,
            GeneralReg::ComputePgmRsrc1 => self.compute_pgm_rsrc1,
            GeneralReg::ComputePgmRsrc2 => self.compute_pgm_rsrc2,
            GeneralReg::ComputeResourceLimits => self.compute_resource_limits,
            GeneralReg::ComputeTmpringSize => self.compute_tmpring_size,
            GeneralReg::ComputeUserData0 => self.compute_user_data_0,
            GeneralReg::ComputeDispatchInitiator => self.compute_dispatch_initiator,
        }
    }
}

/// The compute block has kept its SH layout from gfx8 through gfx12, so all
/// generations share this table.
pub static GFX_COMPUTE_REGS: GfxRegOffsets = GfxRegOffsets {
    compute_num_thread_x: 0x207,
    compute_num_thread_y: 0x208,
    compute_num_thread_z: 0x209,
    compute_pgm_lo: 0x20c,
    compute_pgm_rsrc1: 0x212,
    compute_pgm_rsrc2: 0x213,
    compute_resource_limits: 0x215,
    compute_tmpring_size: 0x218,
    compute_user_data_0: 0x240,
    compute_dispatch_initiator: 0x200,
};

// ===============================================================================================
// Function tables
// ===============================================================================================

/// Packet builders and result checks for one engine family.
///
/// The builders reset `ctx.pm4`, encode one packet into it, store the dword
/// count in `ctx.pm4_dw` and return it.
pub trait IpFuncs: Send + Sync + Debug {
    fn family_id(&self) -> u32;

    fn align_mask(&self) -> u32 {
        0xff
    }

    fn nop(&self) -> u32;

    fn deadbeaf(&self) -> u32 {
        DEADBEAF
    }

    fn pattern(&self) -> u32 {
        PATTERN
    }

    /// Write `ctx.write_length` dwords of `deadbeaf` to `ctx.bo_mc`. With
    /// `ctx.secure` set, emits the atomic compare-swap instead.
    fn write_linear(&self, ctx: &mut RingContext) -> u32;

    /// Compare-swap `0x12345678` into `ctx.bo_mc` when it holds `deadbeaf`.
    fn write_linear_atomic(&self, ctx: &mut RingContext) -> u32;

    /// Fill `ctx.write_length` bytes at `ctx.bo_mc` with `deadbeaf`.
    fn const_fill(&self, ctx: &mut RingContext) -> u32;

    /// Copy `ctx.write_length` bytes from `ctx.bo_mc` to `ctx.bo_mc2`.
    fn copy_linear(&self, ctx: &mut RingContext) -> u32;

    /// Block the ring until `ctx.bo_mc` reads `deadbeaf`.
    fn wait_reg_mem(&self, ctx: &mut RingContext) -> u32;

    /// Check that the first `write_length / div` dwords of `bo` hold `deadbeaf`.
    fn compare(&self, ctx: &RingContext, div: u32) -> IgtResult<()> {
        let cpu = ctx
            .bo_cpu()
            .ok_or_else(|| IgtError::InvalidArgument("compare without a mapped bo".into()))?;
        compare_dwords(cpu, ctx.write_length, div, self.deadbeaf())
    }

    /// Check that the first `write_length / div` dwords of `bo2` hold `pattern`.
    fn compare_pattern(&self, ctx: &RingContext, div: u32) -> IgtResult<()> {
        let cpu = ctx
            .bo2_cpu()
            .ok_or_else(|| IgtError::InvalidArgument("compare without a mapped bo2".into()))?;
        compare_dwords(cpu, ctx.write_length, div, self.pattern())
    }

    /// Check that the first `write_length2` dwords of `bo3` hold `deadbeaf`.
    fn compare_second(&self, ctx: &RingContext) -> IgtResult<()> {
        let cpu = ctx
            .bo3_cpu()
            .ok_or_else(|| IgtError::InvalidArgument("compare without a mapped bo3".into()))?;
        compare_dwords(cpu, ctx.write_length2, 1, self.deadbeaf())
    }

    /// Offset of `reg` for `SET_SH_REG`.
    fn get_reg_offset(&self, reg: GeneralReg) -> u32;
}

fn compare_dwords(
    cpu: &crate::amdgpu::memory::CpuMapping,
    write_length: u32,
    div: u32,
    expected: u32,
) -> IgtResult<()> {
    if div == 0 {
        return Err(IgtError::InvalidArgument("compare divisor is 0".into()));
    }
    let count = (write_length / div) as usize;
    if count > cpu.dword_len() {
        return Err(IgtError::InvalidArgument(format!(
            "compare of {count} dwords exceeds the {}-dword mapping",
            cpu.dword_len()
        )));
    }
    for index in 0..count {
        let found = cpu.read_u32(index);
        if found != expected {
            return Err(IgtError::CompareMismatch {
                index,
                expected,
                found,
            });
        }
    }
    Ok(())
}

fn finish(ctx: &mut RingContext) -> u32 {
    ctx.pm4_dw = ctx.pm4.cdw();
    ctx.pm4_dw
}

/// PM4 encodings for the GFX and compute rings.
#[derive(Debug, Clone, Copy)]
pub struct GfxFuncs {
    family_id: u32,
    regs: &'static GfxRegOffsets,
}

impl GfxFuncs {
    #[must_use]
    pub const fn new(family_id: u32) -> Self {
        Self {
            family_id,
            regs: &GFX_COMPUTE_REGS,
        }
    }

    const fn is_si(&self) -> bool {
        self.family_id == AMDGPU_FAMILY_SI
    }
}

impl IpFuncs for GfxFuncs {
    fn family_id(&self) -> u32 {
        self.family_id
    }

    fn nop(&self) -> u32 {
        GFX_COMPUTE_NOP
    }

    fn write_linear(&self, ctx: &mut RingContext) -> u32 {
        if ctx.secure {
            return self.write_linear_atomic(ctx);
        }
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        pm4.emit(packet3(PACKET3_WRITE_DATA, 2 + ctx.write_length));
        pm4.emit(write_data_dst_sel(WRITE_DATA_DST_SEL_MEM_ASYNC) | WR_CONFIRM);
        pm4.emit(lower_32_bits(ctx.bo_mc) & 0xffff_fffc);
        pm4.emit(upper_32_bits(ctx.bo_mc));
        pm4.emit_repeat(self.deadbeaf(), ctx.write_length);
        finish(ctx)
    }

    fn write_linear_atomic(&self, ctx: &mut RingContext) -> u32 {
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        pm4.emit(packet3(PACKET3_ATOMIC_MEM, 7));
        // 32-bit compare-swap that returns the pre-op value
        pm4.emit(
            atomic_mem_command(1)
                | atomic_mem_cache_policy(0)
                | atomic_mem_engine_sel(0)
                | TC_OP_ATOMIC_CMPSWAP_RTN_32,
        );
        pm4.emit(lower_32_bits(ctx.bo_mc));
        pm4.emit(upper_32_bits(ctx.bo_mc));
        pm4.emit(0x1234_5678);
        pm4.emit(0);
        pm4.emit(self.deadbeaf());
        pm4.emit(0);
        pm4.emit(0x100);
        finish(ctx)
    }

    fn const_fill(&self, ctx: &mut RingContext) -> u32 {
        let deadbeaf = self.deadbeaf();
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        if self.is_si() {
            pm4.emit(packet3(PACKET3_DMA_DATA_SI, 4));
            pm4.emit(deadbeaf);
            pm4.emit(
                dma_data_si_engine(0)
                    | dma_data_si_dst_sel(0)
                    | dma_data_si_src_sel(2)
                    | DMA_DATA_SI_CP_SYNC,
            );
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(ctx.write_length);
        } else {
            pm4.emit(packet3(PACKET3_DMA_DATA, 5));
            pm4.emit(
                dma_data_engine(0) | dma_data_dst_sel(0) | dma_data_src_sel(2) | DMA_DATA_CP_SYNC,
            );
            pm4.emit(deadbeaf);
            pm4.emit(0);
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(ctx.write_length);
        }
        finish(ctx)
    }

    fn copy_linear(&self, ctx: &mut RingContext) -> u32 {
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        if self.is_si() {
            pm4.emit(packet3(PACKET3_DMA_DATA_SI, 4));
            pm4.emit(lower_32_bits(ctx.bo_mc) & 0xffff_fffc);
            pm4.emit(
                dma_data_si_engine(0)
                    | dma_data_si_dst_sel(0)
                    | dma_data_si_src_sel(0)
                    | DMA_DATA_SI_CP_SYNC
                    | (upper_32_bits(ctx.bo_mc) & 0xffff),
            );
            pm4.emit(lower_32_bits(ctx.bo_mc2) & 0xffff_fffc);
            pm4.emit(upper_32_bits(ctx.bo_mc2));
            pm4.emit(ctx.write_length);
        } else {
            pm4.emit(packet3(PACKET3_DMA_DATA, 5));
            pm4.emit(
                dma_data_engine(0) | dma_data_dst_sel(0) | dma_data_src_sel(0) | DMA_DATA_CP_SYNC,
            );
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(lower_32_bits(ctx.bo_mc2));
            pm4.emit(upper_32_bits(ctx.bo_mc2));
            pm4.emit(ctx.write_length);
        }
        finish(ctx)
    }

    fn wait_reg_mem(&self, ctx: &mut RingContext) -> u32 {
        let deadbeaf = self.deadbeaf();
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        pm4.emit(packet3(PACKET3_WAIT_REG_MEM, 5));
        pm4.emit(wait_reg_mem_mem_space(1) | wait_reg_mem_function(WAIT_REG_MEM_FUNC_EQUAL));
        pm4.emit(lower_32_bits(ctx.bo_mc));
        pm4.emit(upper_32_bits(ctx.bo_mc));
        pm4.emit(deadbeaf);
        pm4.emit(0xffff_ffff);
        pm4.emit(4);
        finish(ctx)
    }

    fn get_reg_offset(&self, reg: GeneralReg) -> u32 {
        self.regs.get(reg)
    }
}

/// SDMA encodings. SI parts use the older DMA engine packets.
#[derive(Debug, Clone, Copy)]
pub struct SdmaFuncs {
    family_id: u32,
}

impl SdmaFuncs {
    #[must_use]
    pub const fn new(family_id: u32) -> Self {
        Self { family_id }
    }

    const fn is_si(&self) -> bool {
        self.family_id == AMDGPU_FAMILY_SI
    }

    /// From gfx9 on, SDMA byte and dword counts are encoded as `n - 1`.
    const fn count(&self, n: u32) -> u32 {
        if self.family_id >= AMDGPU_FAMILY_AI {
            n.saturating_sub(1)
        } else {
            n
        }
    }
}

impl IpFuncs for SdmaFuncs {
    fn family_id(&self) -> u32 {
        self.family_id
    }

    fn nop(&self) -> u32 {
        if self.is_si() { SDMA_NOP_SI } else { SDMA_NOP }
    }

    fn write_linear(&self, ctx: &mut RingContext) -> u32 {
        if ctx.secure {
            return self.write_linear_atomic(ctx);
        }
        let count = self.count(ctx.write_length);
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        if self.is_si() {
            pm4.emit(sdma_packet_si(SDMA_OPCODE_WRITE_SI, 0, 0, 0, ctx.write_length));
            pm4.emit(lower_32_bits(ctx.bo_mc) & 0xffff_fffc);
            pm4.emit(upper_32_bits(ctx.bo_mc) & 0xff);
        } else {
            pm4.emit(sdma_packet(SDMA_OPCODE_WRITE, SDMA_WRITE_SUB_OPCODE_LINEAR, 0));
            pm4.emit(lower_32_bits(ctx.bo_mc) & 0xffff_fffc);
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(count);
        }
        pm4.emit_repeat(self.deadbeaf(), ctx.write_length);
        finish(ctx)
    }

    fn write_linear_atomic(&self, ctx: &mut RingContext) -> u32 {
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        pm4.emit(sdma_packet(
            SDMA_OPCODE_ATOMIC,
            0,
            sdma_atomic_loop(1)
                | sdma_atomic_tmz(1)
                | sdma_atomic_opcode(TC_OP_ATOMIC_CMPSWAP_RTN_32),
        ));
        pm4.emit(lower_32_bits(ctx.bo_mc));
        pm4.emit(upper_32_bits(ctx.bo_mc));
        pm4.emit(0x1234_5678);
        pm4.emit(0);
        pm4.emit(self.deadbeaf());
        pm4.emit(0);
        pm4.emit(0x100);
        finish(ctx)
    }

    fn const_fill(&self, ctx: &mut RingContext) -> u32 {
        let deadbeaf = self.deadbeaf();
        let count = self.count(ctx.write_length);
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        if self.is_si() {
            pm4.emit(sdma_packet_si(
                SDMA_OPCODE_CONSTANT_FILL_SI,
                0,
                0,
                0,
                ctx.write_length / 4,
            ));
            pm4.emit(lower_32_bits(ctx.bo_mc) & 0xffff_fffc);
            pm4.emit(deadbeaf);
            // high address bits live in [31:16]
            #[allow(clippy::cast_possible_truncation)]
            pm4.emit(((ctx.bo_mc & 0xffff_ffff_0000_0000) >> 16) as u32);
        } else {
            pm4.emit(sdma_packet(
                SDMA_OPCODE_CONSTANT_FILL,
                0,
                sdma_constant_fill_extra_size(2),
            ));
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(deadbeaf);
            pm4.emit(count);
        }
        finish(ctx)
    }

    fn copy_linear(&self, ctx: &mut RingContext) -> u32 {
        let count = self.count(ctx.write_length);
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        if self.is_si() {
            pm4.emit(sdma_packet_si(SDMA_OPCODE_COPY_SI, 0, 0, 0, ctx.write_length));
            pm4.emit(lower_32_bits(ctx.bo_mc2));
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc2) & 0xff);
            pm4.emit(upper_32_bits(ctx.bo_mc) & 0xff);
        } else {
            let tmz = if ctx.secure { sdma_atomic_tmz(1) } else { 0 };
            pm4.emit(sdma_packet(SDMA_OPCODE_COPY, SDMA_COPY_SUB_OPCODE_LINEAR, tmz));
            pm4.emit(count);
            pm4.emit(0);
            pm4.emit(lower_32_bits(ctx.bo_mc));
            pm4.emit(upper_32_bits(ctx.bo_mc));
            pm4.emit(lower_32_bits(ctx.bo_mc2));
            pm4.emit(upper_32_bits(ctx.bo_mc2));
        }
        finish(ctx)
    }

    fn wait_reg_mem(&self, ctx: &mut RingContext) -> u32 {
        let deadbeaf = self.deadbeaf();
        let pm4 = &mut ctx.pm4;
        pm4.reset();
        pm4.emit(sdma_packet(
            SDMA_OPCODE_POLL_REGMEM,
            0,
            sdma_poll_regmem_extra_func(WAIT_REG_MEM_FUNC_EQUAL) | SDMA_POLL_REGMEM_EXTRA_M,
        ));
        pm4.emit(lower_32_bits(ctx.bo_mc));
        pm4.emit(upper_32_bits(ctx.bo_mc));
        pm4.emit(deadbeaf);
        pm4.emit(0xffff_ffff);
        pm4.emit(sdma_poll_regmem_dw5_interval(10) | sdma_poll_regmem_dw5_retry_count(0xfff));
        finish(ctx)
    }

    fn get_reg_offset(&self, reg: GeneralReg) -> u32 {
        GFX_COMPUTE_REGS.get(reg)
    }
}

// ===============================================================================================
// Registry
// ===============================================================================================

/// One engine of one generation. Immutable once set up.
#[derive(Debug, Clone)]
pub struct IpBlockVersion {
    pub ip_type: IpBlockType,
    pub major: u32,
    pub minor: u32,
    pub rev: u32,
    pub funcs: Arc<dyn IpFuncs>,
}

/// The IP blocks of one device.
#[derive(Debug, Default)]
pub struct IpBlocks {
    blocks: Vec<IpBlockVersion>,
    family_id: u32,
}

impl IpBlocks {
    /// Register `block`. A second block of the same type is rejected.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if a block of that type already exists.
    pub fn add(&mut self, block: IpBlockVersion) -> IgtResult<()> {
        if self.get_ip_block(block.ip_type).is_some() {
            return Err(IgtError::InvalidArgument(format!(
                "ip block {} registered twice",
                block.ip_type
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    #[must_use]
    pub fn get_ip_block(&self, ip_type: IpBlockType) -> Option<&IpBlockVersion> {
        self.blocks.iter().find(|b| b.ip_type == ip_type)
    }

    #[must_use]
    pub fn num_ip_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub const fn family_id(&self) -> u32 {
        self.family_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpBlockVersion> {
        self.blocks.iter()
    }
}

/// `(gfx major, sdma major)` of a family.
fn family_generation(family_id: u32) -> Option<(u32, u32)> {
    Some(match family_id {
        AMDGPU_FAMILY_SI => (6, 1),
        AMDGPU_FAMILY_CI | AMDGPU_FAMILY_KV => (7, 2),
        AMDGPU_FAMILY_VI | AMDGPU_FAMILY_CZ => (8, 3),
        AMDGPU_FAMILY_AI | AMDGPU_FAMILY_RV => (9, 4),
        AMDGPU_FAMILY_NV
        | AMDGPU_FAMILY_VGH
        | AMDGPU_FAMILY_YC
        | AMDGPU_FAMILY_GC_10_3_6
        | AMDGPU_FAMILY_GC_10_3_7 => (10, 5),
        AMDGPU_FAMILY_GC_11_0_0 | AMDGPU_FAMILY_GC_11_0_1 | AMDGPU_FAMILY_GC_11_5_0 => (11, 6),
        AMDGPU_FAMILY_GC_12_0_0 => (12, 7),
        _ => return None,
    })
}

/// Build the IP table for a device of `family_id`.
///
/// `drm_major`/`drm_minor` are the driver version, only logged.
///
/// # Errors
/// Returns `Unsupported` for families without packet tables.
pub fn setup_amdgpu_ip_blocks(
    drm_major: u32,
    drm_minor: u32,
    family_id: u32,
) -> IgtResult<IpBlocks> {
    let (gfx_major, sdma_major) = family_generation(family_id).ok_or_else(|| {
        IgtError::Unsupported(format!("ASIC family {family_id} has no IP tables"))
    })?;

    let gfx: Arc<dyn IpFuncs> = Arc::new(GfxFuncs::new(family_id));
    let sdma: Arc<dyn IpFuncs> = Arc::new(SdmaFuncs::new(family_id));

    let mut blocks = IpBlocks {
        blocks: Vec::with_capacity(3),
        family_id,
    };
    for ip_type in [IpBlockType::Gfx, IpBlockType::Compute] {
        blocks.add(IpBlockVersion {
            ip_type,
            major: gfx_major,
            minor: 0,
            rev: 0,
            funcs: Arc::clone(&gfx),
        })?;
    }
    blocks.add(IpBlockVersion {
        ip_type: IpBlockType::Dma,
        major: sdma_major,
        minor: 0,
        rev: 0,
        funcs: sdma,
    })?;

    log::debug!(
        "amdgpu {drm_major}.{drm_minor}: family {family_id} -> gfx v{gfx_major}, sdma v{sdma_major}"
    );
    Ok(blocks)
}

/// For every engine type, whether `available_rings & mask` is non-zero.
///
/// Engines whose query fails are reported as not ready.
pub fn asic_rings_readiness<B: SubmitBackend + ?Sized>(
    backend: &B,
    mask: u32,
) -> [bool; AMD_IP_MAX] {
    let mut ready = [false; AMD_IP_MAX];
    for (slot, ip_type) in ready.iter_mut().zip(IpBlockType::ALL) {
        *slot = match backend.query_hw_ip_info(ip_type.hw_ip(), 0) {
            Ok(info) => info.available_rings & mask != 0,
            Err(e) => {
                log::debug!("hw ip info for {ip_type} failed: {e}");
                false
            }
        };
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amdgpu::memory::{CpuMapping, GpuBo, MappedBo};
    use crate::amdgpu::pm4::{PACKET3_DMA_DATA_SI, SDMA_OPCODE_WRITE};
    use crate::amdgpu::ring_context::RingContextBuilder;
    use assert_matches::assert_matches;

    const BO_VA: u64 = 0x0000_8001_0000_1000;
    const BO2_VA: u64 = 0x0000_8002_0000_2000;

    fn context(write_length: u32) -> RingContext {
        let mut ctx = RingContextBuilder::new().write_length(write_length).build();
        ctx.bo_mc = BO_VA;
        ctx.bo_mc2 = BO2_VA;
        ctx
    }

    #[test]
    fn gfx_write_linear_layout() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = context(4);
        assert_eq!(funcs.write_linear(&mut ctx), 8);
        assert_eq!(
            ctx.pm4.as_slice(),
            [
                packet3(PACKET3_WRITE_DATA, 6),
                (5 << 8) | (1 << 20),
                0x0000_1000,
                0x8001,
                DEADBEAF,
                DEADBEAF,
                DEADBEAF,
                DEADBEAF
            ]
        );
        assert_eq!(ctx.pm4_dw, 8);
    }

    #[test]
    fn secure_write_uses_atomic() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = context(128);
        ctx.secure = true;
        assert_eq!(funcs.write_linear(&mut ctx), 9);
        assert_eq!(ctx.pm4.as_slice()[0], packet3(PACKET3_ATOMIC_MEM, 7));
        assert_eq!(ctx.pm4.as_slice()[4], 0x1234_5678);
        assert_eq!(ctx.pm4.as_slice()[6], DEADBEAF);
    }

    #[test]
    fn gfx_const_fill_si_and_later() {
        let mut ctx = context(1024);
        assert_eq!(GfxFuncs::new(AMDGPU_FAMILY_SI).const_fill(&mut ctx), 6);
        assert_eq!(ctx.pm4.as_slice()[0], packet3(PACKET3_DMA_DATA_SI, 4));
        assert_eq!(ctx.pm4.as_slice()[1], DEADBEAF);

        assert_eq!(GfxFuncs::new(AMDGPU_FAMILY_VI).const_fill(&mut ctx), 7);
        assert_eq!(ctx.pm4.as_slice()[1], 0xC000_0000);
        assert_eq!(ctx.pm4.as_slice()[2], DEADBEAF);
        assert_eq!(ctx.pm4.as_slice()[6], 1024);
    }

    #[test]
    fn sdma_counts_are_minus_one_from_gfx9() {
        let mut ctx = context(16);
        SdmaFuncs::new(AMDGPU_FAMILY_VI).write_linear(&mut ctx);
        assert_eq!(ctx.pm4.as_slice()[3], 16);
        SdmaFuncs::new(AMDGPU_FAMILY_AI).write_linear(&mut ctx);
        assert_eq!(ctx.pm4.as_slice()[0], SDMA_OPCODE_WRITE);
        assert_eq!(ctx.pm4.as_slice()[3], 15);
        assert_eq!(ctx.pm4_dw, 4 + 16);

        SdmaFuncs::new(AMDGPU_FAMILY_GC_11_0_0).copy_linear(&mut ctx);
        assert_eq!(
            ctx.pm4.as_slice(),
            [1, 15, 0, 0x0000_1000, 0x8001, 0x0000_2000, 0x8002]
        );
    }

    #[test]
    fn sdma_si_packets() {
        let funcs = SdmaFuncs::new(AMDGPU_FAMILY_SI);
        let mut ctx = context(1024);
        assert_eq!(funcs.nop(), SDMA_NOP_SI);
        assert_eq!(funcs.const_fill(&mut ctx), 4);
        assert_eq!(
            ctx.pm4.as_slice()[0],
            sdma_packet_si(SDMA_OPCODE_CONSTANT_FILL_SI, 0, 0, 0, 256)
        );
        assert_eq!(ctx.pm4.as_slice()[3], 0x8001_0000);
    }

    #[test]
    fn wait_reg_mem_polls_for_deadbeaf() {
        let mut ctx = context(0);
        assert_eq!(GfxFuncs::new(AMDGPU_FAMILY_AI).wait_reg_mem(&mut ctx), 7);
        assert_eq!(ctx.pm4.as_slice()[1], (1 << 4) | 3);
        assert_eq!(SdmaFuncs::new(AMDGPU_FAMILY_AI).wait_reg_mem(&mut ctx), 6);
        assert_eq!(ctx.pm4.as_slice()[5], 10 | (0xfff << 16));
    }

    #[test]
    fn compare_reports_first_mismatch() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = context(8);
        let cpu = CpuMapping::host(32);
        for i in 0..8 {
            cpu.write_u32(i, DEADBEAF);
        }
        cpu.write_u32(5, 0);
        ctx.set_bo(
            0,
            MappedBo {
                bo: GpuBo {
                    handle: 1,
                    gpu_va: BO_VA,
                    size: 32,
                },
                cpu,
            },
        );

        assert!(funcs.compare(&ctx, 2).is_ok());
        assert_matches!(
            funcs.compare(&ctx, 1),
            Err(IgtError::CompareMismatch { index: 5, found: 0, .. })
        );
        assert_matches!(funcs.compare_pattern(&ctx, 1), Err(IgtError::InvalidArgument(_)));
    }

    #[test]
    fn families_map_to_generations() {
        let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_GC_10_3_7).unwrap();
        assert_eq!(blocks.num_ip_blocks(), 3);
        let gfx = blocks.get_ip_block(IpBlockType::Gfx).unwrap();
        assert_eq!(gfx.major, 10);
        assert_eq!(blocks.get_ip_block(IpBlockType::Dma).unwrap().major, 5);
        assert_eq!(
            gfx.funcs.get_reg_offset(GeneralReg::ComputePgmLo),
            0x20c
        );
        assert!(blocks.get_ip_block(IpBlockType::VcnJpeg).is_none());

        assert_matches!(setup_amdgpu_ip_blocks(3, 0, 100), Err(IgtError::Unsupported(_)));
    }

    #[test]
    fn ip_type_numbering() {
        assert_eq!(IpBlockType::VCN_UNIFIED, IpBlockType::VcnEnc);
        assert_eq!(IpBlockType::Dma.hw_ip(), 2);
        assert_eq!(IpBlockType::from_hw_ip(9), Some(IpBlockType::Vpe));
        assert_eq!(IpBlockType::from_hw_ip(10), None);
    }
}

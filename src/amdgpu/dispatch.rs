//! Compute dispatch: register setup for a `DISPATCH_DIRECT` and the
//! buffer-clear / buffer-copy shader runs built on it.

use crate::amdgpu::cmd_base::CmdBase;
use crate::amdgpu::cs::SubmitBackend;
use crate::amdgpu::ip_blocks::{GFX_COMPUTE_REGS, GeneralReg, IpBlockVersion};
use crate::amdgpu::memory::{BoRequest, MappedBo};
use crate::amdgpu::pm4::{
    GFX_COMPUTE_NOP, PACKET3_CONTEXT_CONTROL, PACKET3_DISPATCH_DIRECT, PACKET3_SET_SH_REG,
    PACKET3_SET_SH_REG_INDEX, PACKET3_SET_UCONFIG_REG, SH_REG_BASE, packet3, packet3_compute,
};
use crate::amdgpu::ring_context::{ErrCodes, RingContext, RingContextBuilder};
use crate::amdgpu::submission::{exec_cs_helper, for_each_ring, release_slot};
use crate::drm::ioctl::AMDGPU_HW_IP_GFX;
use crate::error::{IgtError, IgtResult};

/// How a test stream is expected to break the engine, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CmdErrorType {
    #[default]
    CmdStreamExecSuccess,
    CmdStreamExecInvalidOpcode,
    CmdStreamExecInvalidPacketLength,
    CmdStreamExecInvalidPacketEopQueue,
    CmdStreamTransBadRegAddress,
    CmdStreamTransBadMemAddress,
    CmdStreamTransBadMemAddressBySync,
    BackendSeGcShaderExecSuccess,
    BackendSeGcShaderInvalidShader,
    BackendSeGcShaderInvalidProgramAddr,
    BackendSeGcShaderInvalidProgramSetting,
    BackendSeGcShaderInvalidUserData,
    DmaCorruptedHeaderHang,
    DmaSlowLinearcopyHang,
}

impl CmdErrorType {
    /// True for the two variants that describe a job running to completion.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::CmdStreamExecSuccess | Self::BackendSeGcShaderExecSuccess
        )
    }
}

// SH register offsets, relative to `SH_REG_BASE`
const COMPUTE_START_X: u32 = 0x204;
const COMPUTE_STATIC_THREAD_MGMT_SE0: u32 = 0x216;
const COMPUTE_STATIC_THREAD_MGMT_SE2: u32 = 0x219;
const COMPUTE_THREAD_TRACE_ENABLE: u32 = 0x22a;
const COMPUTE_SHADER_CHKSUM: u32 = 0x222;
const COMPUTE_DISPATCH_TUNNEL: u32 = 0x224;
const COMPUTE_PGM_RSRC3: u32 = 0x228;
const COMPUTE_USER_DATA_4: u32 = 0x244;

/// `SET_SH_REG_INDEX` index field selecting the per-SE thread-mask write.
const SH_REG_INDEX_SE_MASK: u32 = 3 << 28;
/// `CP_COHER_START_DELAY` in UCONFIG space.
const UCONFIG_CP_COHER_START_DELAY: u32 = 0x7b;
/// RSRC1 bit that must be clear from gfx11 on.
const RSRC1_GFX11_RESERVED: u32 = 1 << 29;

const DISPATCH_GROUPS_X: u32 = 0x10;
const DST_SIZE: u64 = 0x4000;
const SHADER_SIZE: u64 = 4096;
const MEMSET_VALUE: u32 = 0x2222_2222;
const MEMCPY_BYTE: u8 = 0x55;

/// Emit the compute preamble for `version` and return the dwords written.
pub fn dispatch_init(base: &mut CmdBase, ip_type: u32, version: u32) -> u32 {
    let start = base.cdw();

    if ip_type == AMDGPU_HW_IP_GFX {
        base.emit(packet3(PACKET3_CONTEXT_CONTROL, 1));
        base.emit(0x8000_0000);
        base.emit(0x8000_0000);
    }

    // clear COMPUTE_START_X/Y/Z
    base.emit(packet3_compute(PACKET3_SET_SH_REG, 3));
    base.emit(COMPUTE_START_X);
    base.emit_repeat(0, 3);

    base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
    base.emit(GFX_COMPUTE_REGS.get(GeneralReg::ComputeTmpringSize));
    base.emit(0);

    match version {
        10 => {
            base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
            base.emit(COMPUTE_THREAD_TRACE_ENABLE);
            base.emit(0);

            // the header announces six body dwords and the offset fills all seven
            base.emit(packet3_compute(PACKET3_SET_SH_REG, 6));
            base.emit_repeat(COMPUTE_SHADER_CHKSUM, 7);

            base.emit(packet3(PACKET3_SET_UCONFIG_REG, 1));
            base.emit(UCONFIG_CP_COHER_START_DELAY);
            base.emit(0x20);
        }
        11 => {
            base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
            base.emit(COMPUTE_SHADER_CHKSUM);
            base.emit(0);

            base.emit(packet3_compute(PACKET3_SET_SH_REG, 4));
            base.emit(COMPUTE_DISPATCH_TUNNEL);
            base.emit_repeat(0, 4);

            base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
            base.emit(COMPUTE_THREAD_TRACE_ENABLE);
            base.emit(0);
        }
        _ => {}
    }

    base.cdw() - start
}

/// Enable every CU on every shader engine.
pub fn dispatch_write_cumask(base: &mut CmdBase, version: u32) -> u32 {
    let start = base.cdw();

    match version {
        9 => {
            base.emit(packet3_compute(PACKET3_SET_SH_REG, 2));
            base.emit(COMPUTE_STATIC_THREAD_MGMT_SE0);
        }
        10 | 11 => {
            base.emit(packet3_compute(PACKET3_SET_SH_REG_INDEX, 2));
            base.emit(SH_REG_INDEX_SE_MASK | COMPUTE_STATIC_THREAD_MGMT_SE0);
        }
        _ => {}
    }
    if matches!(version, 9..=11) {
        base.emit(0xffff_ffff);
        base.emit(0xffff_ffff);
    }

    base.emit(packet3_compute(PACKET3_SET_SH_REG_INDEX, 2));
    base.emit(COMPUTE_STATIC_THREAD_MGMT_SE2);
    base.emit(0xffff_ffff);
    base.emit(0xffff_ffff);

    base.cdw() - start
}

/// `(absolute register, value)` rows written after the program address.
fn shader_register_rows(version: u32, hang: CmdErrorType) -> [(u32, u32); 5] {
    let invalid = hang == CmdErrorType::BackendSeGcShaderInvalidProgramSetting;
    let (rsrc1, rsrc2) = if invalid {
        (0xffff_ffff, 0xffff_ffff)
    } else if version >= 11 {
        (0x600c_0041, 0x90)
    } else {
        (0x000c_0041, 0x90)
    };
    let rsrc1 = if version >= 11 {
        rsrc1 & !RSRC1_GFX11_RESERVED
    } else {
        rsrc1
    };

    let abs = |reg: GeneralReg| SH_REG_BASE + GFX_COMPUTE_REGS.get(reg);
    [
        (abs(GeneralReg::ComputePgmRsrc1), rsrc1),
        (abs(GeneralReg::ComputePgmRsrc2), rsrc2),
        (abs(GeneralReg::ComputeNumThreadX), 0x40),
        (abs(GeneralReg::ComputeNumThreadY), 1),
        (abs(GeneralReg::ComputeNumThreadZ), 1),
    ]
}

/// Point the compute pipe at the shader at `shader_addr` and program its
/// resource and thread-count registers.
///
/// `BackendSeGcShaderInvalidProgramSetting` writes all-ones resource words.
pub fn dispatch_write2hw(
    base: &mut CmdBase,
    shader_addr: u64,
    version: u32,
    hang: CmdErrorType,
) -> u32 {
    let start = base.cdw();

    #[allow(clippy::cast_possible_truncation)]
    {
        base.emit(packet3_compute(PACKET3_SET_SH_REG, 2));
        base.emit(GFX_COMPUTE_REGS.get(GeneralReg::ComputePgmLo));
        base.emit((shader_addr >> 8) as u32);
        base.emit((shader_addr >> 40) as u32);
    }

    for (reg, value) in shader_register_rows(version, hang) {
        base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
        base.emit(reg - SH_REG_BASE);
        base.emit(value);
    }

    let rsrc3 = match version {
        10 => Some(0),
        11 => Some(0x3f0),
        _ => None,
    };
    if let Some(value) = rsrc3 {
        base.emit(packet3_compute(PACKET3_SET_SH_REG, 1));
        base.emit(COMPUTE_PGM_RSRC3);
        base.emit(value);
    }

    base.cdw() - start
}

// ===============================================================================================
// Shaders
// ===============================================================================================

/// Prebuilt compute shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsShader {
    /// Stores user data 4..7 to every dword of the buffer in user data 0..3.
    BufferClear,
    /// Copies the buffer in user data 0..3 to the one in user data 4..7.
    BufferCopy,
}

static BUFFER_CLEAR_GFX9: [u32; 13] = [
    0x2600_00ff, 0x0000_03ff, 0xd1fd_0000, 0x0401_0c08, 0x7e02_0280, 0x7e04_0204, 0x7e06_0205,
    0x7e08_0206, 0x7e0a_0207, 0xe01c_2000, 0x8000_0200, 0xbf8c_0000, 0xbf81_0000,
];

static BUFFER_COPY_GFX9: [u32; 11] = [
    0x2600_00ff, 0x0000_03ff, 0xd1fd_0000, 0x0401_0c08, 0x7e02_0280, 0xe00c_2000, 0x8000_0200,
    0xbf8c_0f70, 0xe01c_2000, 0x8001_0200, 0xbf81_0000,
];

static BUFFER_CLEAR_GFX10: [u32; 9] = [
    0xd746_0004, 0x0401_0c08, 0x7e00_0204, 0x7e02_0205, 0x7e04_0206, 0x7e06_0207, 0xe01c_2000,
    0x8000_0004, 0xbf81_0000,
];

static BUFFER_COPY_GFX10: [u32; 8] = [
    0xd746_0001, 0x0401_0c08, 0xe00c_2000, 0x8000_0201, 0xbf8c_3f70, 0xe01c_2000, 0x8001_0201,
    0xbf81_0000,
];

/// The binary of `shader` for gfx `version`.
///
/// # Errors
/// Returns `Unsupported` for versions without a prebuilt binary.
pub fn cs_shader(shader: CsShader, version: u32) -> IgtResult<&'static [u32]> {
    match (shader, version) {
        (CsShader::BufferClear, 9) => Ok(&BUFFER_CLEAR_GFX9),
        (CsShader::BufferCopy, 9) => Ok(&BUFFER_COPY_GFX9),
        (CsShader::BufferClear, 10) => Ok(&BUFFER_CLEAR_GFX10),
        (CsShader::BufferCopy, 10) => Ok(&BUFFER_COPY_GFX10),
        _ => Err(IgtError::Unsupported(format!(
            "no {shader:?} shader for gfx{version}"
        ))),
    }
}

/// Last dword of a buffer resource descriptor (format and swizzle bits).
const fn buffer_descriptor_word3(version: u32) -> u32 {
    match version {
        9 => 0x0007_4fac,
        10 => 0x1104_bfac,
        _ => 0x1003_dfac,
    }
}

/// Write a 4-dword buffer descriptor for `addr` into user data at `reg`.
#[allow(clippy::cast_possible_truncation)]
fn emit_buffer_descriptor(base: &mut CmdBase, reg: u32, addr: u64, version: u32) {
    base.emit(packet3_compute(PACKET3_SET_SH_REG, 4));
    base.emit(reg);
    base.emit(addr as u32);
    base.emit((addr >> 32) as u32 | 0x10_0000);
    base.emit(0x400);
    base.emit(buffer_descriptor_word3(version));
}

fn emit_dispatch_direct(base: &mut CmdBase) {
    base.emit(packet3_compute(PACKET3_DISPATCH_DIRECT, 3));
    base.emit(DISPATCH_GROUPS_X);
    base.emit(1);
    base.emit(1);
    base.emit(1);
    base.emit_aligned(7, GFX_COMPUTE_NOP);
}

fn alloc_vram<B: SubmitBackend + ?Sized>(backend: &B, size: u64) -> IgtResult<MappedBo> {
    backend.alloc_and_map(&BoRequest::new(size).alignment(4096).vram())
}

fn load_shader<B: SubmitBackend + ?Sized>(
    backend: &B,
    shader: CsShader,
    version: u32,
) -> IgtResult<MappedBo> {
    let code = cs_shader(shader, version)?;
    let bo = alloc_vram(backend, SHADER_SIZE)?;
    bo.cpu.fill(0, bo.cpu.len());
    bo.cpu.copy_from_u32(code);
    Ok(bo)
}

fn verify_dwords(bo: &MappedBo, expected: u32) -> IgtResult<()> {
    (0..bo.cpu.dword_len())
        .map(|index| (index, bo.cpu.read_u32(index)))
        .find(|&(_, found)| found != expected)
        .map_or(Ok(()), |(index, found)| {
            Err(IgtError::CompareMismatch {
                index,
                expected,
                found,
            })
        })
}

fn release_all<B: SubmitBackend + ?Sized>(backend: &B, ctx: &mut RingContext) -> IgtResult<()> {
    (0..3).fold(Ok(()), |acc, index| acc.and(release_slot(backend, ctx, index)))
}

/// Clear a 16 KiB VRAM buffer to `0x22` with the buffer-clear shader on the
/// current ring of `ctx`.
///
/// # Errors
/// Returns `Unsupported` for versions without a shader binary, then any
/// allocation, submission or verification failure.
pub fn memset_dispatch_on_ring<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx: &mut RingContext,
    ip_type: u32,
    version: u32,
) -> IgtResult<()> {
    ctx.set_bo(1, load_shader(backend, CsShader::BufferClear, version)?);
    let outcome = alloc_vram(backend, DST_SIZE).and_then(|dst| {
        dst.cpu.fill(0, dst.cpu.len());
        ctx.set_bo(0, dst);
        ctx.res_cnt = 2;

        let base = &mut ctx.pm4;
        base.reset();
        dispatch_init(base, ip_type, version);
        dispatch_write_cumask(base, version);
        dispatch_write2hw(base, ctx.bo_mc2, version, CmdErrorType::BackendSeGcShaderExecSuccess);
        emit_buffer_descriptor(
            base,
            GFX_COMPUTE_REGS.get(GeneralReg::ComputeUserData0),
            ctx.bo_mc,
            version,
        );

        base.emit(packet3_compute(PACKET3_SET_SH_REG, 4));
        base.emit(COMPUTE_USER_DATA_4);
        base.emit_repeat(MEMSET_VALUE, 4);

        emit_dispatch_direct(base);
        ctx.pm4_dw = base.cdw();

        exec_cs_helper(backend, ip_type, ctx, false)?;
        match ctx.bo.as_ref() {
            Some(dst) => verify_dwords(dst, MEMSET_VALUE),
            None => Ok(()),
        }
    });

    let freed = release_all(backend, ctx);
    outcome.and(freed)
}

fn run_memcpy<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx: &mut RingContext,
    ip_type: u32,
    version: u32,
    hang: CmdErrorType,
) -> IgtResult<ErrCodes> {
    let src = alloc_vram(backend, DST_SIZE)?;
    src.cpu.fill(MEMCPY_BYTE, src.cpu.len());
    ctx.set_bo(2, src);
    let dst = alloc_vram(backend, DST_SIZE)?;
    dst.cpu.fill(0, dst.cpu.len());
    ctx.set_bo(0, dst);
    ctx.res_cnt = 3;

    let base = &mut ctx.pm4;
    base.reset();
    dispatch_init(base, ip_type, version);
    dispatch_write_cumask(base, version);
    dispatch_write2hw(base, ctx.bo_mc2, version, hang);
    emit_buffer_descriptor(
        base,
        GFX_COMPUTE_REGS.get(GeneralReg::ComputeUserData0),
        ctx.bo_mc3,
        version,
    );
    emit_buffer_descriptor(base, COMPUTE_USER_DATA_4, ctx.bo_mc, version);
    emit_dispatch_direct(base);
    ctx.pm4_dw = base.cdw();

    ctx.err_codes = ErrCodes::default();
    let expect_failure = !hang.is_success();
    exec_cs_helper(backend, ip_type, ctx, expect_failure)?;
    if !expect_failure {
        if let Some(dst) = ctx.bo.as_ref() {
            verify_dwords(dst, u32::from_ne_bytes([MEMCPY_BYTE; 4]))?;
        }
    }
    Ok(ctx.err_codes)
}

/// Copy a 16 KiB VRAM buffer of `0x55` bytes to a second one with the
/// buffer-copy shader on the current ring of `ctx`.
///
/// With a failing `hang` kind the job is submitted as an expected failure
/// and the copy is not verified. The returned codes are those of the submit.
///
/// # Errors
/// Returns `Unsupported` for versions without a shader binary, then any
/// allocation, submission or verification failure.
pub fn memcpy_dispatch_on_ring<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx: &mut RingContext,
    ip_type: u32,
    version: u32,
    hang: CmdErrorType,
) -> IgtResult<ErrCodes> {
    ctx.set_bo(1, load_shader(backend, CsShader::BufferCopy, version)?);
    let outcome = run_memcpy(backend, ctx, ip_type, version, hang);

    let freed = release_all(backend, ctx);
    let codes = outcome?;
    freed?;
    Ok(codes)
}

fn dispatch_context(timeout_ns: u64) -> RingContext {
    RingContextBuilder::new()
        .write_length(4096)
        .pm4_size(256)
        .res_cnt(3)
        .timeout(timeout_ns)
        .build()
}

/// Run [`memset_dispatch_on_ring`] on every available ring of `ip_block`.
///
/// # Errors
/// Returns the first failure.
pub fn memset_dispatch_test<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
    version: u32,
) -> IgtResult<()> {
    let ip_type = ip_block.ip_type.hw_ip();
    let mut ctx = dispatch_context(backend.fence_timeout_ns());
    for_each_ring(backend, ip_block, &mut ctx, |ctx| {
        log::debug!("memset dispatch on {} ring {}", ip_block.ip_type, ctx.ring_id);
        memset_dispatch_on_ring(backend, ctx, ip_type, version)
    })
}

/// Run [`memcpy_dispatch_on_ring`] on every available ring of `ip_block`.
///
/// # Errors
/// Returns the first failure.
pub fn memcpy_dispatch_test<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
    version: u32,
) -> IgtResult<()> {
    let ip_type = ip_block.ip_type.hw_ip();
    let mut ctx = dispatch_context(backend.fence_timeout_ns());
    for_each_ring(backend, ip_block, &mut ctx, |ctx| {
        log::debug!("memcpy dispatch on {} ring {}", ip_block.ip_type, ctx.ring_id);
        memcpy_dispatch_on_ring(backend, ctx, ip_type, version, CmdErrorType::default()).map(|_| ())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::ioctl::AMDGPU_HW_IP_COMPUTE;
    use assert_matches::assert_matches;

    #[test]
    fn init_gfx9_on_gfx_ring() {
        let mut base = CmdBase::with_capacity(64);
        assert_eq!(dispatch_init(&mut base, AMDGPU_HW_IP_GFX, 9), 11);
        assert_eq!(
            base.as_slice(),
            [
                packet3(PACKET3_CONTEXT_CONTROL, 1),
                0x8000_0000,
                0x8000_0000,
                packet3_compute(PACKET3_SET_SH_REG, 3),
                0x204,
                0,
                0,
                0,
                packet3_compute(PACKET3_SET_SH_REG, 1),
                0x218,
                0
            ]
        );
    }

    #[test]
    fn init_gfx10_compute_extras() {
        let mut base = CmdBase::with_capacity(64);
        assert_eq!(dispatch_init(&mut base, AMDGPU_HW_IP_COMPUTE, 10), 22);
        let dw = base.as_slice();
        assert_eq!(dw[0], packet3_compute(PACKET3_SET_SH_REG, 3));
        assert_eq!(dw[8..11], [packet3_compute(PACKET3_SET_SH_REG, 1), 0x22a, 0]);
        assert_eq!(dw[11], packet3_compute(PACKET3_SET_SH_REG, 6));
        assert_eq!(dw[12..19], [0x222; 7]);
        assert_eq!(dw[19..], [packet3(PACKET3_SET_UCONFIG_REG, 1), 0x7b, 0x20]);
    }

    #[test]
    fn init_gfx11_compute_extras() {
        let mut base = CmdBase::with_capacity(64);
        assert_eq!(dispatch_init(&mut base, AMDGPU_HW_IP_COMPUTE, 11), 20);
        assert_eq!(base.as_slice()[11..14], [packet3_compute(PACKET3_SET_SH_REG, 4), 0x224, 0]);
    }

    #[test]
    fn cumask_per_version() {
        let mut base = CmdBase::with_capacity(16);
        assert_eq!(dispatch_write_cumask(&mut base, 9), 8);
        assert_eq!(base.as_slice()[..2], [packet3_compute(PACKET3_SET_SH_REG, 2), 0x216]);

        base.reset();
        dispatch_write_cumask(&mut base, 10);
        assert_eq!(
            base.as_slice()[..2],
            [packet3_compute(PACKET3_SET_SH_REG_INDEX, 2), 0x3000_0216]
        );
        assert_eq!(base.as_slice()[5], 0x219);

        base.reset();
        assert_eq!(dispatch_write_cumask(&mut base, 12), 4);
    }

    #[test]
    fn write2hw_gfx9_and_gfx11() {
        let addr = 0x0000_1234_5678_9a00;
        let mut base = CmdBase::with_capacity(32);
        assert_eq!(dispatch_write2hw(&mut base, addr, 9, CmdErrorType::default()), 19);
        let dw = base.as_slice();
        assert_eq!(dw[1..4], [0x20c, 0x3456_789a, 0x12]);
        assert_eq!(dw[4..7], [packet3_compute(PACKET3_SET_SH_REG, 1), 0x212, 0x000c_0041]);
        assert_eq!(dw[16..], [packet3_compute(PACKET3_SET_SH_REG, 1), 0x209, 1]);

        base.reset();
        assert_eq!(dispatch_write2hw(&mut base, addr, 11, CmdErrorType::default()), 22);
        let dw = base.as_slice();
        assert_eq!(dw[6], 0x400c_0041);
        assert_eq!(dw[19..], [packet3_compute(PACKET3_SET_SH_REG, 1), 0x228, 0x3f0]);
    }

    #[test]
    fn invalid_program_setting_uses_all_ones() {
        let mut base = CmdBase::with_capacity(32);
        dispatch_write2hw(&mut base, 0, 11, CmdErrorType::BackendSeGcShaderInvalidProgramSetting);
        assert_eq!(base.as_slice()[6], 0xdfff_ffff);
        assert_eq!(base.as_slice()[9], 0xffff_ffff);
    }

    #[test]
    fn shaders_only_for_gfx9_and_gfx10() {
        assert_eq!(cs_shader(CsShader::BufferClear, 9).unwrap().len(), 13);
        assert_eq!(cs_shader(CsShader::BufferCopy, 10).unwrap()[0], 0xd746_0001);
        assert_matches!(
            cs_shader(CsShader::BufferCopy, 11),
            Err(IgtError::Unsupported(_))
        );
    }
}

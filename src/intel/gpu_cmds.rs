//! GPGPU pipeline commands and indirect state for Intel render engines.
//!
//! State helpers write at the batch write pointer and return the byte offset
//! of what they wrote; command emitters append dwords.

use crate::drm::ioctl::{
    I915_GEM_DOMAIN_INSTRUCTION, I915_GEM_DOMAIN_RENDER, I915_GEM_DOMAIN_SAMPLER,
};
use crate::error::{IgtError, IgtResult};
use crate::intel::batchbuffer::IntelBb;
use crate::intel::buf::IntelBuf;
use crate::intel::devinfo::IpVer;
use crate::utils::{align_up, lower_32_bits, upper_32_bits};

const fn gfxpipe(pipeline: u32, opcode: u32, subopcode: u32) -> u32 {
    (3 << 29) | (pipeline << 27) | (opcode << 24) | (subopcode << 16)
}

pub const MI_BATCH_BUFFER_END: u32 = 0x0a << 23;

pub const GEN7_PIPELINE_SELECT: u32 = gfxpipe(1, 1, 4);
pub const PIPELINE_SELECT_GPGPU: u32 = 2;
pub const GEN9_PIPELINE_SELECTION_MASK: u32 = 3 << 8;

pub const GEN7_STATE_BASE_ADDRESS: u32 = gfxpipe(0, 1, 1);
pub const GEN8_STATE_BASE_ADDRESS: u32 = GEN7_STATE_BASE_ADDRESS;
pub const BASE_ADDRESS_MODIFY: u32 = 1;

pub const GEN7_MEDIA_VFE_STATE: u32 = gfxpipe(2, 0, 0);
pub const GEN7_MEDIA_CURBE_LOAD: u32 = gfxpipe(2, 0, 1);
pub const GEN7_MEDIA_INTERFACE_DESCRIPTOR_LOAD: u32 = gfxpipe(2, 0, 2);
pub const GEN8_MEDIA_STATE_FLUSH: u32 = gfxpipe(2, 0, 4);
pub const GEN7_MEDIA_OBJECT: u32 = gfxpipe(2, 1, 0);
pub const GEN7_GPGPU_WALKER: u32 = gfxpipe(2, 1, 5);

pub const XEHP_CFE_STATE: u32 = gfxpipe(2, 2, 0);
pub const XEHP_COMPUTE_WALKER: u32 = gfxpipe(2, 2, 2);
pub const XEHP_STATE_COMPUTE_MODE: u32 = gfxpipe(0, 1, 5);
pub const GEN8_3DSTATE_BINDING_TABLE_POOL_ALLOC: u32 = gfxpipe(3, 1, 0x19);

pub const SURFACE_1D: u32 = 0;
pub const SURFACE_2D: u32 = 1;
pub const SURFACE_BUFFER: u32 = 4;

pub const SURFACEFORMAT_R32G32B32A32_FLOAT: u32 = 0x000;
pub const SURFACEFORMAT_R8G8B8A8_UNORM: u32 = 0x0c7;
pub const SURFACEFORMAT_R8_UNORM: u32 = 0x140;
pub const SURFACEFORMAT_RAW: u32 = 0x1ff;

pub const I915_MOCS_PTE: u32 = 1;

/// Size of the gen7 and gen8 interface descriptors, in bytes.
pub const INTERFACE_DESCRIPTOR_SIZE: u32 = 32;

const SURFACE_STATE_SIZE: u32 = 64;
const BINDING_TABLE_SIZE: u32 = 64;

// Surface state channel selects: R, G, B, A = 4, 5, 6, 7.
const SS7_CHANNEL_SELECT: u32 = (7 << 16) | (6 << 19) | (5 << 22) | (4 << 25);

// CFE_STATE dword 3: disables fused-EU dispatch.
const CFE_LEGACY_MODE: u32 = 1 << 6;

// Interface descriptor bits.
const IDD_SINGLE_PROGRAM_FLOW: u32 = 1 << 18;
const IDD_CURBE_READ_LENGTH_1: u32 = 1 << 16;

const fn domains(is_dst: bool) -> (u32, u32) {
    if is_dst {
        (I915_GEM_DOMAIN_RENDER, I915_GEM_DOMAIN_RENDER)
    } else {
        (I915_GEM_DOMAIN_SAMPLER, 0)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn state_size(ibb: &IntelBb<'_>) -> u32 {
    align_up(u64::from(ibb.size()), 1 << 12) as u32
}

/// Thread-group geometry for a SIMD16 dispatch with 16x1 groups.
///
/// Returns `(x_dim, y_dim, right_mask)`.
#[must_use]
pub const fn walker_dims(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32) {
    let x_dim = (x + width + 15) / 16;
    let y_dim = y + height;
    let rem = (x + width) & 15;
    let right_mask = if rem == 0 { 0xffff } else { (1 << rem) - 1 };
    (x_dim, y_dim, right_mask)
}

// ===============================================================================================
// Indirect state
// ===============================================================================================

/// One dword of colour for the fill kernels.
pub fn gen7_fill_curbe_buffer_data(ibb: &mut IntelBb<'_>, color: u8) -> u32 {
    let offset = ibb.ptr_align(64);
    ibb.write_at(offset, &[u32::from(color)]);
    ibb.ptr_add(32);
    offset
}

pub fn gen11_fill_curbe_buffer_data(ibb: &mut IntelBb<'_>) -> u32 {
    let offset = ibb.ptr_align(64);
    ibb.write_at(offset, &[0, 1]);
    ibb.ptr_add(64);
    offset
}

/// Copy a kernel binary into the batch, 64-byte aligned.
#[allow(clippy::cast_possible_truncation)]
pub fn fill_kernel(ibb: &mut IntelBb<'_>, kernel: &[[u32; 4]]) -> u32 {
    let offset = ibb.ptr_align(64);
    let dwords: Vec<u32> = kernel.iter().flatten().copied().collect();
    ibb.write_at(offset, &dwords);
    ibb.ptr_add((dwords.len() * 4) as u32);
    offset
}

/// Surface-state fields shared by the gen8+ layouts.
#[derive(Debug, Clone, Copy)]
struct SurfaceLayout {
    surface_type: u32,
    format: u32,
    valign: u32,
    halign: u32,
    tiled_mode: u32,
    ss1: u32,
    width: u32,
    height: u32,
    pitch: u32,
    ss5: u32,
    ss7: u32,
}

impl SurfaceLayout {
    fn linear_2d(buf: &IntelBuf, format: u32, ss1: u32) -> Self {
        Self {
            surface_type: SURFACE_2D,
            format,
            valign: 1,
            halign: 1,
            tiled_mode: buf.tiling.surface_mode(),
            ss1,
            width: buf.width() - 1,
            height: buf.height() - 1,
            pitch: buf.stride - 1,
            ss5: 0,
            ss7: SS7_CHANNEL_SELECT,
        }
    }

    fn gen8_dwords(&self, address: u64) -> [u32; 16] {
        let mut ss = [0u32; 16];
        ss[0] = (1 << 8)
            | (self.tiled_mode << 12)
            | (self.halign << 14)
            | (self.valign << 16)
            | (self.format << 18)
            | (self.surface_type << 29);
        ss[1] = self.ss1;
        ss[2] = self.width | (self.height << 16);
        ss[3] = self.pitch;
        ss[5] = self.ss5;
        ss[7] = self.ss7;
        ss[8] = lower_32_bits(address);
        ss[9] = upper_32_bits(address);
        ss
    }
}

fn mocs_bits(index: u32) -> u32 {
    (index & 0x3f) << 25
}

fn alloc_surface_state(ibb: &mut IntelBb<'_>) -> u32 {
    ibb.ptr_align(64);
    ibb.ptr_add_return_prev_offset(SURFACE_STATE_SIZE)
}

/// # Errors
/// Returns `InvalidArgument` if the surface lands above 4 GiB.
pub fn gen7_fill_surface_state(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    format: u32,
    is_dst: bool,
) -> IgtResult<u32> {
    let (read, write) = domains(is_dst);
    let offset = alloc_surface_state(ibb);

    let address = ibb.offset_reloc(buf.handle, read, write, offset + 4, buf.addr)?;
    if upper_32_bits(address) != 0 {
        return Err(IgtError::InvalidArgument(format!(
            "surface at 0x{address:x} not addressable on gen7"
        )));
    }

    let mut ss = [0u32; 8];
    ss[0] = (1 << 8) | (buf.tiling.surface_mode() << 13) | (format << 18) | (SURFACE_2D << 29);
    ss[1] = lower_32_bits(address);
    ss[2] = (buf.width() - 1) | ((buf.height() - 1) << 16);
    ss[3] = buf.stride - 1;
    ss[7] = SS7_CHANNEL_SELECT;
    ibb.write_at(offset, &ss);
    Ok(offset)
}

/// # Errors
/// Returns the relocation error.
pub fn gen8_fill_surface_state(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    format: u32,
    is_dst: bool,
) -> IgtResult<u32> {
    let (read, write) = domains(is_dst);
    let offset = alloc_surface_state(ibb);
    let address = ibb.offset_reloc(buf.handle, read, write, offset + 4 * 8, buf.addr)?;
    let ss = SurfaceLayout::linear_2d(buf, format, 0).gen8_dwords(address);
    ibb.write_at(offset, &ss);
    Ok(offset)
}

/// Like gen8 plus the buffer's MOCS index.
///
/// # Errors
/// Returns the relocation error.
pub fn gen9_fill_surface_state(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    format: u32,
    is_dst: bool,
) -> IgtResult<u32> {
    let (read, write) = domains(is_dst);
    let offset = alloc_surface_state(ibb);
    let address = ibb.offset_reloc(buf.handle, read, write, offset + 4 * 8, buf.addr)?;
    let layout = SurfaceLayout::linear_2d(buf, format, mocs_bits(u32::from(buf.mocs_index)));
    ibb.write_at(offset, &layout.gen8_dwords(address));
    Ok(offset)
}

/// Fixed-geometry surfaces for the gen11 two-surface kernels: a 1D float
/// source and a raw buffer destination.
///
/// # Errors
/// Returns the relocation error.
pub fn gen11_fill_surface_state(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    surface_type: u32,
    format: u32,
    valign: u32,
    halign: u32,
    is_dst: bool,
) -> IgtResult<u32> {
    let (read, write) = domains(is_dst);
    let offset = alloc_surface_state(ibb);
    let address = ibb.offset_reloc(buf.handle, read, write, offset + 4 * 8, buf.addr)?;

    let mut layout = SurfaceLayout {
        surface_type,
        format,
        valign,
        halign,
        tiled_mode: buf.tiling.surface_mode(),
        ss1: 0,
        width: 0,
        height: 0,
        pitch: 0,
        ss5: 0,
        ss7: 0,
    };
    if is_dst {
        layout.ss1 = mocs_bits(I915_MOCS_PTE);
        layout.width = 95;
        layout.height = 1;
        layout.ss7 = SS7_CHANNEL_SELECT;
    } else {
        layout.ss1 = mocs_bits(u32::from(buf.mocs_index)) | 4040 | (31 << 19);
        layout.width = 1019;
        layout.height = 9216;
        layout.pitch = 64;
        layout.ss5 = 2;
    }
    ibb.write_at(offset, &layout.gen8_dwords(address));
    Ok(offset)
}

/// # Errors
/// Returns the relocation error.
pub fn xehp_fill_surface_state(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    format: u32,
    is_dst: bool,
) -> IgtResult<u32> {
    let (read, write) = domains(is_dst);
    let offset = alloc_surface_state(ibb);
    let address = ibb.offset_reloc(buf.handle, read, write, offset + 4 * 8, buf.addr)?;
    let layout = SurfaceLayout::linear_2d(buf, format, mocs_bits(u32::from(buf.mocs_index)));
    ibb.write_at(offset, &layout.gen8_dwords(address));
    Ok(offset)
}

/// A one-entry binding table pointing at a render-target view of `buf`.
///
/// # Errors
/// Returns `Unsupported` for a Xe2 surface that is neither 8 nor 32 bpp, or
/// the surface-state error.
pub fn fill_binding_table(ibb: &mut IntelBb<'_>, buf: &IntelBuf) -> IgtResult<u32> {
    let bt = ibb.ptr_align(64);
    ibb.ptr_add(BINDING_TABLE_SIZE);

    let ver = ibb.info().graphics_ver;
    let surface = if ver >= IpVer::new(20, 0) {
        // Typed block stores honour the format, so it has to match bpp.
        let format = match buf.bpp {
            32 => SURFACEFORMAT_R8G8B8A8_UNORM,
            8 => SURFACEFORMAT_R8_UNORM,
            bpp => {
                return Err(IgtError::Unsupported(format!(
                    "surface state for {bpp} bpp"
                )));
            }
        };
        xehp_fill_surface_state(ibb, buf, format, true)?
    } else if ver >= IpVer::new(12, 50) {
        xehp_fill_surface_state(ibb, buf, SURFACEFORMAT_R8_UNORM, true)?
    } else if ver >= IpVer::new(9, 0) {
        gen9_fill_surface_state(ibb, buf, SURFACEFORMAT_R8_UNORM, true)?
    } else if ver >= IpVer::new(8, 0) {
        gen8_fill_surface_state(ibb, buf, SURFACEFORMAT_R8_UNORM, true)?
    } else {
        gen7_fill_surface_state(ibb, buf, SURFACEFORMAT_R8_UNORM, true)?
    };

    ibb.write_at(bt, &[surface]);
    Ok(bt)
}

/// # Errors
/// Returns the surface-state error.
pub fn gen11_fill_binding_table(
    ibb: &mut IntelBb<'_>,
    src: &IntelBuf,
    dst: &IntelBuf,
) -> IgtResult<u32> {
    let bt = ibb.ptr_align(64);
    ibb.ptr_add(BINDING_TABLE_SIZE);

    let src_ss = gen11_fill_surface_state(
        ibb,
        src,
        SURFACE_1D,
        SURFACEFORMAT_R32G32B32A32_FLOAT,
        0,
        0,
        false,
    )?;
    let dst_ss = gen11_fill_surface_state(ibb, dst, SURFACE_BUFFER, SURFACEFORMAT_RAW, 1, 1, true)?;

    ibb.write_at(bt, &[src_ss, dst_ss]);
    Ok(bt)
}

fn write_idd(ibb: &mut IntelBb<'_>, desc: &[u32; 8]) -> u32 {
    let offset = ibb.ptr_align(64);
    ibb.write_at(offset, desc);
    ibb.ptr_add(INTERFACE_DESCRIPTOR_SIZE);
    offset
}

/// Binding table, kernel and a gen7 interface descriptor, in that order.
///
/// # Errors
/// Returns the binding-table error.
pub fn gen7_fill_interface_descriptor(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    kernel: &[[u32; 4]],
) -> IgtResult<u32> {
    let bt = fill_binding_table(ibb, buf)?;
    let kernel_offset = fill_kernel(ibb, kernel);

    let mut desc = [0u32; 8];
    desc[0] = kernel_offset & !0x3f;
    desc[1] = IDD_SINGLE_PROGRAM_FLOW;
    desc[3] = bt & !0x1f;
    desc[4] = IDD_CURBE_READ_LENGTH_1;
    Ok(write_idd(ibb, &desc))
}

fn gen8_idd(kernel_offset: u32, bt: u32) -> [u32; 8] {
    let mut desc = [0u32; 8];
    desc[0] = kernel_offset & !0x3f;
    desc[2] = IDD_SINGLE_PROGRAM_FLOW;
    desc[4] = bt & 0x001f_ffe0;
    desc[5] = IDD_CURBE_READ_LENGTH_1;
    desc[6] = 1;
    desc
}

/// # Errors
/// Returns the binding-table error.
pub fn gen8_fill_interface_descriptor(
    ibb: &mut IntelBb<'_>,
    buf: &IntelBuf,
    kernel: &[[u32; 4]],
) -> IgtResult<u32> {
    let bt = fill_binding_table(ibb, buf)?;
    let kernel_offset = fill_kernel(ibb, kernel);
    Ok(write_idd(ibb, &gen8_idd(kernel_offset, bt)))
}

/// # Errors
/// Returns the binding-table error.
pub fn gen11_fill_interface_descriptor(
    ibb: &mut IntelBb<'_>,
    src: &IntelBuf,
    dst: &IntelBuf,
    kernel: &[[u32; 4]],
) -> IgtResult<u32> {
    let bt = gen11_fill_binding_table(ibb, src, dst)?;
    let kernel_offset = fill_kernel(ibb, kernel);
    Ok(write_idd(ibb, &gen8_idd(kernel_offset, bt)))
}

/// Interface descriptor carried inline by `COMPUTE_WALKER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XehpInterfaceDescriptor(pub [u32; 8]);

/// Binding table and kernel in the batch; the descriptor itself is returned.
///
/// # Errors
/// Returns the binding-table error.
pub fn xehp_fill_interface_descriptor(
    ibb: &mut IntelBb<'_>,
    dst: &IntelBuf,
    kernel: &[[u32; 4]],
) -> IgtResult<XehpInterfaceDescriptor> {
    let bt = fill_binding_table(ibb, dst)?;
    let kernel_offset = fill_kernel(ibb, kernel);

    let mut desc = [0u32; 8];
    desc[0] = kernel_offset & !0x3f;
    desc[2] = IDD_SINGLE_PROGRAM_FLOW;
    desc[4] = bt & 0x001f_ffe0;
    desc[5] = 1;
    Ok(XehpInterfaceDescriptor(desc))
}

// ===============================================================================================
// Pipeline state
// ===============================================================================================

fn emit_self_reloc(ibb: &mut IntelBb<'_>, read_domains: u32) -> IgtResult<()> {
    let handle = ibb.handle();
    ibb.emit_reloc(handle, read_domains, 0, BASE_ADDRESS_MODIFY, None)?;
    Ok(())
}

/// # Errors
/// Returns the relocation error.
pub fn gen7_emit_state_base_address(ibb: &mut IntelBb<'_>) -> IgtResult<()> {
    ibb.out(GEN7_STATE_BASE_ADDRESS | (10 - 2));
    ibb.out(0); // general
    emit_self_reloc(ibb, I915_GEM_DOMAIN_INSTRUCTION)?; // surface
    emit_self_reloc(ibb, I915_GEM_DOMAIN_INSTRUCTION)?; // dynamic
    ibb.out(0); // indirect
    emit_self_reloc(ibb, I915_GEM_DOMAIN_INSTRUCTION)?; // instruction

    // upper bounds
    ibb.out(0);
    ibb.out(BASE_ADDRESS_MODIFY);
    ibb.out(0);
    ibb.out(BASE_ADDRESS_MODIFY);
    Ok(())
}

fn gen8_state_base_address_body(ibb: &mut IntelBb<'_>, stateless_modify: u32) -> IgtResult<()> {
    ibb.out(BASE_ADDRESS_MODIFY); // general
    ibb.out(0);
    ibb.out(stateless_modify);
    emit_self_reloc(ibb, I915_GEM_DOMAIN_SAMPLER)?; // surface
    emit_self_reloc(ibb, I915_GEM_DOMAIN_RENDER | I915_GEM_DOMAIN_INSTRUCTION)?; // dynamic
    ibb.out(0); // indirect
    ibb.out(0);
    emit_self_reloc(ibb, I915_GEM_DOMAIN_INSTRUCTION)?; // instruction
    Ok(())
}

/// # Errors
/// Returns the relocation error.
pub fn gen8_emit_state_base_address(ibb: &mut IntelBb<'_>) -> IgtResult<()> {
    ibb.out(GEN8_STATE_BASE_ADDRESS | (16 - 2));
    gen8_state_base_address_body(ibb, BASE_ADDRESS_MODIFY)?;

    let size = state_size(ibb);
    ibb.out(0xffff_f000 | 1); // general state size
    ibb.out(size | 1); // dynamic state size
    ibb.out(0xffff_f000 | 1); // indirect object size
    // The modify bit must be set or the GPU may hang.
    ibb.out(size | 1);
    Ok(())
}

/// Gen8 layout plus the bindless surface base.
///
/// # Errors
/// Returns the relocation error.
pub fn gen9_emit_state_base_address(ibb: &mut IntelBb<'_>) -> IgtResult<()> {
    ibb.out(GEN8_STATE_BASE_ADDRESS | (19 - 2));
    gen8_state_base_address_body(ibb, BASE_ADDRESS_MODIFY)?;

    let size = state_size(ibb);
    ibb.out(0xffff_f000 | 1);
    ibb.out(size | 1);
    ibb.out(0xffff_f000 | 1);
    ibb.out(size | 1);

    // bindless surface state
    ibb.out(BASE_ADDRESS_MODIFY);
    ibb.out(0);
    ibb.out(0xffff_f000);
    Ok(())
}

/// # Errors
/// Returns the relocation error.
pub fn xehp_emit_state_base_address(ibb: &mut IntelBb<'_>) -> IgtResult<()> {
    let xe2 = ibb.info().graphics_ver >= IpVer::new(20, 0);

    ibb.out(GEN8_STATE_BASE_ADDRESS | 0x14);
    gen8_state_base_address_body(ibb, if xe2 { 0 } else { BASE_ADDRESS_MODIFY })?;

    let size = state_size(ibb);
    ibb.out(0xffff_f000 | 1);
    ibb.out(size | 1);
    ibb.out(if xe2 { 0 } else { 0xffff_f000 | 1 });
    ibb.out(size | 1);

    // bindless surface state
    ibb.out(BASE_ADDRESS_MODIFY);
    ibb.out(0);
    ibb.out(0xffff_f000);

    // bindless sampler state
    ibb.out(BASE_ADDRESS_MODIFY);
    ibb.out(0);
    ibb.out(0);
    Ok(())
}

/// `mode` selects GPGPU (1) or media (0).
pub fn gen7_emit_vfe_state(
    ibb: &mut IntelBb<'_>,
    threads: u32,
    urb_entries: u32,
    urb_size: u32,
    curbe_size: u32,
    mode: u32,
) {
    ibb.out(GEN7_MEDIA_VFE_STATE | (8 - 2));
    ibb.out(0); // scratch
    ibb.out((threads << 16) | (urb_entries << 8) | (mode << 2));
    ibb.out(0);
    ibb.out((urb_size << 16) | curbe_size);
    // scoreboard
    ibb.out(0);
    ibb.out(0);
    ibb.out(0);
}

/// Gen8+ `MEDIA_VFE_STATE`. Sizes are in 256-bit units.
pub fn gen8_emit_vfe_state(
    ibb: &mut IntelBb<'_>,
    threads: u32,
    urb_entries: u32,
    urb_size: u32,
    curbe_size: u32,
) {
    xelp_emit_vfe_state(ibb, threads, urb_entries, urb_size, curbe_size, false);
}

/// `MEDIA_VFE_STATE` for XeLP. With `legacy_mode` threads are dispatched one
/// at a time instead of in fused-EU pairs.
pub fn xelp_emit_vfe_state(
    ibb: &mut IntelBb<'_>,
    threads: u32,
    urb_entries: u32,
    urb_size: u32,
    curbe_size: u32,
    legacy_mode: bool,
) {
    ibb.out(GEN7_MEDIA_VFE_STATE | (9 - 2));
    ibb.out(0); // scratch
    ibb.out(0);
    ibb.out((threads << 16) | (urb_entries << 8) | (u32::from(legacy_mode) << 6));
    ibb.out(0);
    ibb.out((urb_size << 16) | curbe_size);
    ibb.out(0);
    ibb.out(0);
    ibb.out(0);
}

/// `curbe_buffer` is relative to the dynamic state base.
pub fn gen7_emit_curbe_load(ibb: &mut IntelBb<'_>, curbe_buffer: u32) {
    ibb.out(GEN7_MEDIA_CURBE_LOAD | (4 - 2));
    ibb.out(0);
    ibb.out(64);
    ibb.out(curbe_buffer);
}

pub fn gen7_emit_interface_descriptor_load(ibb: &mut IntelBb<'_>, interface_descriptor: u32) {
    ibb.out(GEN7_MEDIA_INTERFACE_DESCRIPTOR_LOAD | (4 - 2));
    ibb.out(0);
    ibb.out(INTERFACE_DESCRIPTOR_SIZE);
    ibb.out(interface_descriptor);
}

pub fn gen7_emit_gpgpu_walk(ibb: &mut IntelBb<'_>, x: u32, y: u32, width: u32, height: u32) {
    let (x_dim, y_dim, right_mask) = walker_dims(x, y, width, height);

    ibb.out(GEN7_GPGPU_WALKER | 9);
    ibb.out(0); // interface descriptor offset
    ibb.out(1 << 30); // SIMD16, thread w/h/d 1
    ibb.out(x / 16);
    ibb.out(x_dim);
    ibb.out(y);
    ibb.out(y_dim);
    ibb.out(0);
    ibb.out(1);
    ibb.out(right_mask);
    ibb.out(0xffff_ffff);
}

pub fn gen8_emit_gpgpu_walk(ibb: &mut IntelBb<'_>, x: u32, y: u32, width: u32, height: u32) {
    let (x_dim, y_dim, right_mask) = walker_dims(x, y, width, height);

    ibb.out(GEN7_GPGPU_WALKER | 13);
    ibb.out(0); // kernel offset
    ibb.out(0); // indirect data length
    ibb.out(0); // indirect data offset
    ibb.out(1 << 30);
    ibb.out(x / 16);
    ibb.out(0);
    ibb.out(x_dim);
    ibb.out(y);
    ibb.out(0);
    ibb.out(y_dim);
    ibb.out(0);
    ibb.out(1);
    ibb.out(right_mask);
    ibb.out(0xffff_ffff);
}

pub fn gen8_emit_media_state_flush(ibb: &mut IntelBb<'_>) {
    ibb.out(GEN8_MEDIA_STATE_FLUSH);
    ibb.out(0);
}

/// One `MEDIA_OBJECT` with `(xoffset, yoffset)` as inline data.
pub fn gen_emit_media_object(ibb: &mut IntelBb<'_>, xoffset: u32, yoffset: u32) {
    ibb.out(GEN7_MEDIA_OBJECT | (8 - 2));
    ibb.out(0); // interface descriptor offset
    ibb.out(0); // no indirect data
    ibb.out(0);
    ibb.out(0); // scoreboard
    ibb.out(0);
    ibb.out(xoffset);
    ibb.out(yoffset);

    let info = *ibb.info();
    if info.graphics_major() >= 8 && !info.is_cherryview {
        gen8_emit_media_state_flush(ibb);
    }
}

/// A media object per 16x16 block.
pub fn gen7_emit_media_objects(ibb: &mut IntelBb<'_>, x: u32, y: u32, width: u32, height: u32) {
    for i in 0..width / 16 {
        for j in 0..height / 16 {
            gen_emit_media_object(ibb, x + i * 16, y + j * 16);
        }
    }
}

/// Parts with fused EUs get legacy mode, which turns fused dispatch off.
pub fn xehp_emit_cfe_state(ibb: &mut IntelBb<'_>, threads: u32) {
    let legacy = if ibb.info().can_disable_fused_eu_dispatch() {
        CFE_LEGACY_MODE
    } else {
        0
    };
    ibb.out(XEHP_CFE_STATE | (6 - 2));
    ibb.out(0); // scratch
    ibb.out(0);
    ibb.out(((threads.max(64) - 1) << 16) | legacy);
    ibb.out(0);
    ibb.out(0);
}

/// `vrt` enables a variable number of threads.
pub fn xehp_emit_state_compute_mode(ibb: &mut IntelBb<'_>, vrt: bool) {
    let xe2 = ibb.info().graphics_ver >= IpVer::new(20, 0);
    ibb.out(XEHP_STATE_COMPUTE_MODE | u32::from(xe2));
    ibb.out(if vrt { 0x10001 << 10 } else { 0 });
    if xe2 {
        ibb.out(0);
    }
}

/// # Errors
/// Returns the relocation error.
pub fn xehp_emit_state_binding_table_pool_alloc(ibb: &mut IntelBb<'_>) -> IgtResult<()> {
    ibb.out(GEN8_3DSTATE_BINDING_TABLE_POOL_ALLOC | 2);
    let handle = ibb.handle();
    ibb.emit_reloc(
        handle,
        I915_GEM_DOMAIN_RENDER | I915_GEM_DOMAIN_INSTRUCTION,
        0,
        0,
        None,
    )?;
    ibb.out(1 << 12);
    Ok(())
}

/// `COMPUTE_WALKER` with the descriptor and colour inline.
pub fn xehp_emit_compute_walk(
    ibb: &mut IntelBb<'_>,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    idd: &XehpInterfaceDescriptor,
    color: u8,
) {
    let (x_dim, y_dim, mask) = walker_dims(x, y, width, height);
    let xe2 = ibb.info().graphics_ver >= IpVer::new(20, 0);

    ibb.out(XEHP_COMPUTE_WALKER | if xe2 { 0x26 } else { 0x25 });
    ibb.out(0); // debug object
    ibb.out(0); // indirect data length
    ibb.out(0); // indirect data offset
    ibb.out((1 << 30) | (1 << 25) | (1 << 17)); // SIMD16, inline data, message SIMD16
    ibb.out(mask);
    ibb.out((x_dim << 20) | (y_dim << 10) | 1);
    ibb.out(x_dim);
    ibb.out(y_dim);
    ibb.out(1);
    ibb.out(x / 16);
    ibb.out(y);
    ibb.out(0);
    // partition id/size, preempt x/y/z
    for _ in 0..5 {
        ibb.out(0);
    }
    if xe2 {
        ibb.out(0);
    }
    for dw in idd.0 {
        ibb.out(dw);
    }
    // postsync
    for _ in 0..5 {
        ibb.out(0);
    }
    ibb.out(u32::from(color));
    for _ in 0..7 {
        ibb.out(0);
    }
}

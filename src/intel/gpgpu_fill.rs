//! Fill a rectangle of a linear surface with one colour byte using the
//! GPGPU pipeline.
//!
//! Every fill builds a single page: commands from offset 0 and indirect state
//! from offset 2048.

use crate::drm::ioctl::{I915_EXEC_DEFAULT, I915_EXEC_NO_RELOC, I915_EXEC_RENDER};
use crate::error::IgtResult;
use crate::intel::batchbuffer::{BatchExecutor, IntelBb};
use crate::intel::buf::IntelBuf;
use crate::intel::devinfo::{DeviceInfo, IpVer};
use crate::intel::gpu_cmds::{
    GEN7_PIPELINE_SELECT, GEN9_PIPELINE_SELECTION_MASK, MI_BATCH_BUFFER_END,
    PIPELINE_SELECT_GPGPU, gen7_emit_curbe_load, gen7_emit_gpgpu_walk,
    gen7_emit_interface_descriptor_load, gen7_emit_state_base_address, gen7_emit_vfe_state,
    gen7_fill_curbe_buffer_data, gen7_fill_interface_descriptor, gen8_emit_gpgpu_walk,
    gen8_emit_state_base_address, gen8_emit_vfe_state, gen8_fill_interface_descriptor,
    gen9_emit_state_base_address, xehp_emit_cfe_state, xehp_emit_compute_walk,
    xehp_emit_state_base_address, xehp_emit_state_binding_table_pool_alloc,
    xehp_emit_state_compute_mode, xehp_fill_interface_descriptor,
};

const PAGE_SIZE: u32 = 4096;
const BATCH_STATE_SPLIT: u32 = 2048;

// MEDIA_VFE_STATE parameters
const THREADS: u32 = 1;
const GEN7_GPGPU_URB_ENTRIES: u32 = 0;
const GEN8_GPGPU_URB_ENTRIES: u32 = 1;
const GPGPU_URB_SIZE: u32 = 0;
const GPGPU_CURBE_SIZE: u32 = 1;
const GEN7_VFE_STATE_GPGPU_MODE: u32 = 1;

static GEN7_GPGPU_KERNEL: [[u32; 4]; 10] = [
    [0x0040_0001, 0x2020_0231, 0x0000_0020, 0x0000_0000],
    [0x0000_0041, 0x2040_0c21, 0x0000_0004, 0x0000_0010],
    [0x0000_0001, 0x2044_0021, 0x0000_0018, 0x0000_0000],
    [0x0060_0001, 0x2080_0021, 0x008d_0000, 0x0000_0000],
    [0x0020_0001, 0x2080_0021, 0x0045_0040, 0x0000_0000],
    [0x0000_0001, 0x2088_0061, 0x0000_0000, 0x0000_000f],
    [0x0080_0001, 0x20a0_0021, 0x0000_0020, 0x0000_0000],
    [0x0580_0031, 0x2400_1ca8, 0x0000_0080, 0x060a_8000],
    [0x0060_0001, 0x2e00_0021, 0x008d_0000, 0x0000_0000],
    [0x0780_0031, 0x2000_1ca8, 0x0000_0e00, 0x8200_0010],
];

static GEN8_GPGPU_KERNEL: [[u32; 4]; 10] = [
    [0x0040_0001, 0x2020_2288, 0x0000_0020, 0x0000_0000],
    [0x0000_0041, 0x2040_0208, 0x0600_0004, 0x0000_0010],
    [0x0000_0001, 0x2044_0208, 0x0000_0018, 0x0000_0000],
    [0x0060_0001, 0x2080_0208, 0x008d_0000, 0x0000_0000],
    [0x0020_0001, 0x2080_0208, 0x0045_0040, 0x0000_0000],
    [0x0000_0001, 0x2088_0608, 0x0000_0000, 0x0000_000f],
    [0x0080_0001, 0x20a0_0208, 0x0000_0020, 0x0000_0000],
    [0x0c80_0031, 0x2400_0a40, 0x0e00_0080, 0x060a_8000],
    [0x0060_0001, 0x2e00_0208, 0x008d_0000, 0x0000_0000],
    [0x0780_0031, 0x2000_0a40, 0x0e00_0e00, 0x8200_0010],
];

static GEN9_GPGPU_KERNEL: [[u32; 4]; 10] = [
    [0x0040_0001, 0x2020_2288, 0x0000_0020, 0x0000_0000],
    [0x0000_0041, 0x2040_0208, 0x0600_0004, 0x0000_0010],
    [0x0000_0001, 0x2044_0208, 0x0000_0018, 0x0000_0000],
    [0x0060_0001, 0x2080_0208, 0x008d_0000, 0x0000_0000],
    [0x0020_0001, 0x2080_0208, 0x0045_0040, 0x0000_0000],
    [0x0000_0001, 0x2088_0608, 0x0000_0000, 0x0000_000f],
    [0x0080_0001, 0x20a0_0208, 0x0000_0020, 0x0000_0000],
    [0x0c80_0031, 0x2400_0a40, 0x0600_0080, 0x060a_8000],
    [0x0060_0001, 0x2e00_0208, 0x008d_0000, 0x0000_0000],
    [0x0780_0031, 0x2000_0a40, 0x0600_0e00, 0x8200_0010],
];

static GEN11_GPGPU_KERNEL: [[u32; 4]; 10] = [
    [0x0040_0001, 0x2020_2288, 0x0000_0020, 0x0000_0000],
    [0x0000_0009, 0x2040_0208, 0x0600_0004, 0x0000_0004],
    [0x0000_0001, 0x2044_0208, 0x0000_0018, 0x0000_0000],
    [0x0060_0001, 0x2080_0208, 0x008d_0000, 0x0000_0000],
    [0x0020_0001, 0x2080_0208, 0x0045_0040, 0x0000_0000],
    [0x0000_0001, 0x2088_0608, 0x0000_0000, 0x0000_000f],
    [0x0080_0001, 0x20a0_0208, 0x0000_0020, 0x0000_0000],
    [0x0c80_0031, 0x2400_0a40, 0x0600_0080, 0x040a_8000],
    [0x0060_0001, 0x2e00_0208, 0x008d_0000, 0x0000_0000],
    [0x0780_0031, 0x2000_0a40, 0x0600_0e00, 0x8200_0010],
];

static GEN12_GPGPU_KERNEL: [[u32; 4]; 10] = [
    [0x0002_0061, 0x0105_0000, 0x0000_0104, 0x0000_0000],
    [0x0000_0069, 0x0205_8220, 0x0200_0024, 0x0000_0004],
    [0x0000_0061, 0x0225_0220, 0x0000_00c4, 0x0000_0000],
    [0x0003_0061, 0x0405_0220, 0x0046_0005, 0x0000_0000],
    [0x0001_0261, 0x0405_0220, 0x0022_0205, 0x0000_0000],
    [0x0000_0061, 0x0445_4220, 0x0000_0000, 0x0000_000f],
    [0x0004_0661, 0x0505_0220, 0x0000_0104, 0x0000_0000],
    [0x0004_9031, 0x0000_0000, 0xc000_0414, 0x02a0_0000],
    [0x0003_0061, 0x7005_0220, 0x0046_0005, 0x0000_0000],
    [0x0004_0131, 0x0000_0004, 0x7020_700c, 0x1000_0000],
];

/// The rectangle to fill, in bytes along x and rows along y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FillRegion {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Submits one fill and waits for it to complete.
pub type GpgpuFillFn =
    fn(&dyn BatchExecutor, &DeviceInfo, &mut IntelBuf, FillRegion, u8) -> IgtResult<()>;

fn begin<'a>(
    exec: &'a dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
) -> IgtResult<IntelBb<'a>> {
    let mut ibb = IntelBb::create(exec, info, PAGE_SIZE)?;
    ibb.add_intel_buf(buf, true)?;
    ibb.ptr_set(BATCH_STATE_SPLIT);
    Ok(ibb)
}

fn finish(ibb: &mut IntelBb<'_>, flags: u64) -> IgtResult<()> {
    ibb.out(MI_BATCH_BUFFER_END);
    ibb.ptr_align(32);
    let end = ibb.offset();
    log::debug!(
        "[gpgpu_fill] batch {}: {end} bytes of commands, {} relocations",
        ibb.handle(),
        ibb.relocs().len()
    );
    ibb.exec(end, flags | I915_EXEC_NO_RELOC, true)
}

/// # Errors
/// Returns the batch construction or submission error.
pub fn gen7_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    let mut ibb = begin(exec, info, buf)?;

    // One thread per group, so a single CURBE entry serves every thread.
    let curbe_buffer = gen7_fill_curbe_buffer_data(&mut ibb, color);
    let interface_descriptor = gen7_fill_interface_descriptor(&mut ibb, buf, &GEN7_GPGPU_KERNEL)?;

    ibb.ptr_set(0);
    ibb.out(GEN7_PIPELINE_SELECT | PIPELINE_SELECT_GPGPU);
    gen7_emit_state_base_address(&mut ibb)?;
    gen7_emit_vfe_state(
        &mut ibb,
        THREADS,
        GEN7_GPGPU_URB_ENTRIES,
        GPGPU_URB_SIZE,
        GPGPU_CURBE_SIZE,
        GEN7_VFE_STATE_GPGPU_MODE,
    );
    gen7_emit_curbe_load(&mut ibb, curbe_buffer);
    gen7_emit_interface_descriptor_load(&mut ibb, interface_descriptor);
    gen7_emit_gpgpu_walk(&mut ibb, region.x, region.y, region.width, region.height);

    finish(&mut ibb, I915_EXEC_DEFAULT)
}

/// # Errors
/// Returns the batch construction or submission error.
pub fn gen8_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    let mut ibb = begin(exec, info, buf)?;

    let curbe_buffer = gen7_fill_curbe_buffer_data(&mut ibb, color);
    let interface_descriptor = gen8_fill_interface_descriptor(&mut ibb, buf, &GEN8_GPGPU_KERNEL)?;

    ibb.ptr_set(0);
    ibb.out(GEN7_PIPELINE_SELECT | PIPELINE_SELECT_GPGPU);
    gen8_emit_state_base_address(&mut ibb)?;
    gen8_emit_vfe_state(
        &mut ibb,
        THREADS,
        GEN8_GPGPU_URB_ENTRIES,
        GPGPU_URB_SIZE,
        GPGPU_CURBE_SIZE,
    );
    gen7_emit_curbe_load(&mut ibb, curbe_buffer);
    gen7_emit_interface_descriptor_load(&mut ibb, interface_descriptor);
    gen8_emit_gpgpu_walk(&mut ibb, region.x, region.y, region.width, region.height);

    finish(&mut ibb, I915_EXEC_DEFAULT)
}

fn gen9_fill_with_kernel(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
    kernel: &[[u32; 4]],
) -> IgtResult<()> {
    let mut ibb = begin(exec, info, buf)?;

    let curbe_buffer = gen7_fill_curbe_buffer_data(&mut ibb, color);
    let interface_descriptor = gen8_fill_interface_descriptor(&mut ibb, buf, kernel)?;

    ibb.ptr_set(0);
    ibb.out(GEN7_PIPELINE_SELECT | GEN9_PIPELINE_SELECTION_MASK | PIPELINE_SELECT_GPGPU);
    gen9_emit_state_base_address(&mut ibb)?;
    gen8_emit_vfe_state(
        &mut ibb,
        THREADS,
        GEN8_GPGPU_URB_ENTRIES,
        GPGPU_URB_SIZE,
        GPGPU_CURBE_SIZE,
    );
    gen7_emit_curbe_load(&mut ibb, curbe_buffer);
    gen7_emit_interface_descriptor_load(&mut ibb, interface_descriptor);
    gen8_emit_gpgpu_walk(&mut ibb, region.x, region.y, region.width, region.height);

    finish(&mut ibb, I915_EXEC_RENDER)
}

/// Gen9 and gen10.
///
/// # Errors
/// Returns the batch construction or submission error.
pub fn gen9_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    gen9_fill_with_kernel(exec, info, buf, region, color, &GEN9_GPGPU_KERNEL)
}

/// # Errors
/// Returns the batch construction or submission error.
pub fn gen11_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    gen9_fill_with_kernel(exec, info, buf, region, color, &GEN11_GPGPU_KERNEL)
}

/// # Errors
/// Returns the batch construction or submission error.
pub fn gen12_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    gen9_fill_with_kernel(exec, info, buf, region, color, &GEN12_GPGPU_KERNEL)
}

/// Graphics 12.50+ through `COMPUTE_WALKER`, with the descriptor and colour
/// carried inline.
///
/// # Errors
/// Returns the batch construction or submission error.
pub fn xehp_gpgpu_fillfunc(
    exec: &dyn BatchExecutor,
    info: &DeviceInfo,
    buf: &mut IntelBuf,
    region: FillRegion,
    color: u8,
) -> IgtResult<()> {
    let mut ibb = begin(exec, info, buf)?;

    let idd = xehp_fill_interface_descriptor(&mut ibb, buf, &GEN12_GPGPU_KERNEL)?;

    ibb.ptr_set(0);
    ibb.out(GEN7_PIPELINE_SELECT | GEN9_PIPELINE_SELECTION_MASK | PIPELINE_SELECT_GPGPU);
    xehp_emit_state_base_address(&mut ibb)?;
    xehp_emit_state_compute_mode(&mut ibb, false);
    xehp_emit_state_binding_table_pool_alloc(&mut ibb)?;
    xehp_emit_cfe_state(&mut ibb, THREADS);
    xehp_emit_compute_walk(
        &mut ibb,
        region.x,
        region.y,
        region.width,
        region.height,
        &idd,
        color,
    );

    finish(&mut ibb, I915_EXEC_RENDER)
}

/// Which fill pipeline a device takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPipeline {
    Gen7,
    Gen8,
    /// Gen9 and gen10.
    Gen9,
    Gen11,
    Gen12,
    XeHp,
}

impl FillPipeline {
    /// Graphics 20 and later have no fill kernel.
    #[must_use]
    pub fn for_device(info: &DeviceInfo) -> Option<Self> {
        let ver = info.graphics_ver;
        if ver >= IpVer::new(20, 0) {
            return None;
        }
        if ver >= IpVer::new(12, 50) {
            return Some(Self::XeHp);
        }
        match ver.major {
            7 => Some(Self::Gen7),
            8 => Some(Self::Gen8),
            9 | 10 => Some(Self::Gen9),
            11 => Some(Self::Gen11),
            12 => Some(Self::Gen12),
            _ => None,
        }
    }

    #[must_use]
    pub fn fillfunc(self) -> GpgpuFillFn {
        match self {
            Self::Gen7 => gen7_gpgpu_fillfunc,
            Self::Gen8 => gen8_gpgpu_fillfunc,
            Self::Gen9 => gen9_gpgpu_fillfunc,
            Self::Gen11 => gen11_gpgpu_fillfunc,
            Self::Gen12 => gen12_gpgpu_fillfunc,
            Self::XeHp => xehp_gpgpu_fillfunc,
        }
    }
}

/// The fill routine for a device, if there is one.
#[must_use]
pub fn gpgpu_fillfunc(info: &DeviceInfo) -> Option<GpgpuFillFn> {
    FillPipeline::for_device(info).map(FillPipeline::fillfunc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::batchbuffer::testing::{RecordingExecutor, Recorded};
    use crate::intel::devinfo::device_info;
    use crate::intel::gpu_cmds::{
        GEN7_GPGPU_WALKER, GEN7_MEDIA_CURBE_LOAD, GEN7_MEDIA_VFE_STATE, GEN8_STATE_BASE_ADDRESS,
        XEHP_COMPUTE_WALKER,
    };

    fn run(devid: u16, region: FillRegion) -> (Vec<u32>, Recorded) {
        let exec = RecordingExecutor::default();
        let info = *device_info(devid).unwrap();
        let mut buf = IntelBuf::linear(1, 16, 64, 32).unwrap();
        let fill = gpgpu_fillfunc(&info).unwrap();
        fill(&exec, &info, &mut buf, region, 0x4c).unwrap();

        let writes = exec.writes.borrow();
        let (_, bytes) = &writes[0];
        let batch = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let recorded = exec.execs.borrow()[0].clone();
        assert_eq!(*exec.waits.borrow(), 1);
        (batch, recorded)
    }

    fn find(batch: &[u32], header: u32) -> usize {
        batch
            .iter()
            .position(|&dw| dw & 0xffff_0000 == header)
            .unwrap()
    }

    #[test]
    fn selects_fill_by_generation() {
        let pick = |devid| FillPipeline::for_device(device_info(devid).unwrap());
        assert_eq!(pick(0x0166), Some(FillPipeline::Gen7));
        assert_eq!(pick(0x22b0), Some(FillPipeline::Gen8));
        assert_eq!(pick(0x5916), Some(FillPipeline::Gen9));
        assert_eq!(pick(0x8a52), Some(FillPipeline::Gen11));
        assert_eq!(pick(0x9a49), Some(FillPipeline::Gen12));
        assert_eq!(pick(0x7d55), Some(FillPipeline::XeHp));
        assert_eq!(pick(0x6420), None);
        assert!(gpgpu_fillfunc(device_info(0x6420).unwrap()).is_none());
    }

    #[test]
    fn gen9_batch_layout() {
        let (batch, recorded) = run(0x1912, FillRegion::new(0, 0, 32, 32));

        assert_eq!(
            batch[0],
            GEN7_PIPELINE_SELECT | GEN9_PIPELINE_SELECTION_MASK | PIPELINE_SELECT_GPGPU
        );
        assert_eq!(batch[1], GEN8_STATE_BASE_ADDRESS | (19 - 2));
        assert_eq!(batch[20], GEN7_MEDIA_VFE_STATE | (9 - 2));

        // state starts at the split with the colour
        let curbe = find(&batch, GEN7_MEDIA_CURBE_LOAD);
        assert_eq!(batch[curbe + 3], BATCH_STATE_SPLIT);
        assert_eq!(batch[BATCH_STATE_SPLIT as usize / 4], 0x4c);

        let walker = find(&batch, GEN7_GPGPU_WALKER);
        assert_eq!(batch[walker + 7], 2); // x_dim
        assert_eq!(batch[walker + 10], 32); // y_dim
        assert_eq!(batch[walker + 13], 0xffff);
        assert_eq!(batch[walker + 15], MI_BATCH_BUFFER_END);

        assert_eq!(recorded.flags, I915_EXEC_RENDER | I915_EXEC_NO_RELOC);
        assert_eq!(recorded.batch_len % 32, 0);
        assert!(recorded.batch_len as usize >= (walker + 16) * 4);
        // the surface plus three state base relocations
        assert_eq!(recorded.relocs.len(), 4);
    }

    #[test]
    fn gen7_uses_the_default_ring() {
        let (batch, recorded) = run(0x0166, FillRegion::new(16, 16, 8, 8));
        assert_eq!(batch[0], GEN7_PIPELINE_SELECT | PIPELINE_SELECT_GPGPU);
        assert_eq!(recorded.flags, I915_EXEC_DEFAULT | I915_EXEC_NO_RELOC);

        let walker = find(&batch, GEN7_GPGPU_WALKER);
        assert_eq!(batch[walker + 3], 1); // x / 16
        assert_eq!(batch[walker + 4], 2); // x_dim
        assert_eq!(batch[walker + 9], 0xff); // right mask
    }

    #[test]
    fn xehp_inlines_the_descriptor() {
        let (batch, recorded) = run(0x56a0, FillRegion::new(0, 0, 16, 16));
        let walker = find(&batch, XEHP_COMPUTE_WALKER);
        assert_eq!(batch[walker] & 0xff, 0x25);
        assert_eq!(batch[walker + 31], 0x4c);

        let kernel_offset = batch[walker + 18];
        assert!(kernel_offset >= BATCH_STATE_SPLIT);
        assert_eq!(batch[kernel_offset as usize / 4], GEN12_GPGPU_KERNEL[0][0]);

        assert!(recorded.relocs.is_empty());
        assert!(recorded
            .objects
            .iter()
            .all(|o| o.flags & crate::drm::ioctl::EXEC_OBJECT_PINNED != 0));
    }

    #[test]
    fn region_bounds() {
        let r = FillRegion::new(16, 8, 32, 4);
        assert!(r.contains(16, 8));
        assert!(r.contains(47, 11));
        assert!(!r.contains(48, 8));
        assert!(!r.contains(16, 12));
    }
}

use crate::amdgpu::cmd_base::CmdBase;
use crate::amdgpu::cs::{CsRequest, IbInfo};
use crate::amdgpu::ip_blocks::IpFuncs;
use crate::amdgpu::memory::{CpuMapping, MappedBo};
use crate::config::TIMEOUT_INFINITE;
use crate::drm::ioctl::InfoHwIp;
use crate::error::{IgtError, IgtResult};

/// Errors recorded by the last `exec_cs_helper` run, as negative errnos (0 on success).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrCodes {
    pub err_code_cs_submit: i32,
    pub err_code_wait_for_fence: i32,
}

/// State for one test workload on one ring.
///
/// Fields are public and reset by the caller between submissions; nothing
/// here clears itself.
#[derive(Debug)]
pub struct RingContext {
    pub ring_id: u32,
    /// Number of entries of `resources` that go into the BO list.
    pub res_cnt: usize,

    pub write_length: u32,
    pub write_length2: u32,
    pub pm4: CmdBase,
    pub pm4_size: u32,
    pub secure: bool,

    pub bo_mc: u64,
    pub bo_mc2: u64,
    pub bo_mc3: u64,
    pub bo_mc4: u64,

    pub pm4_dw: u32,
    pub pm4_dw2: u32,

    pub bo: Option<MappedBo>,
    pub bo2: Option<MappedBo>,
    pub bo3: Option<MappedBo>,
    pub bo4: Option<MappedBo>,
    pub bo_cpu_origin: u32,

    pub resources: [u32; 4],
    pub context_handle: u32,
    pub hw_ip_info: InfoHwIp,

    pub ib_info: IbInfo,
    pub ibs_request: CsRequest,
    pub err_codes: ErrCodes,
    pub timeout_ns: u64,
}

impl RingContext {
    fn slot(&mut self, index: usize) -> (&mut Option<MappedBo>, &mut u64) {
        match index {
            0 => (&mut self.bo, &mut self.bo_mc),
            1 => (&mut self.bo2, &mut self.bo_mc2),
            2 => (&mut self.bo3, &mut self.bo_mc3),
            _ => (&mut self.bo4, &mut self.bo_mc4),
        }
    }

    /// Install `bo` in slot `index` (0..4): its GPU address goes to the
    /// matching `bo_mc*` field and its handle to `resources[index]`.
    ///
    /// Returns the BO previously held by the slot.
    pub fn set_bo(&mut self, index: usize, bo: MappedBo) -> Option<MappedBo> {
        let index = index.min(3);
        let handle = bo.handle();
        let (slot, mc) = self.slot(index);
        *mc = bo.gpu_va();
        let old = slot.replace(bo);
        self.resources[index] = handle;
        old
    }

    /// Remove the BO from slot `index`, clearing its address and resource handle.
    pub fn take_bo(&mut self, index: usize) -> Option<MappedBo> {
        let index = index.min(3);
        let (slot, mc) = self.slot(index);
        *mc = 0;
        let bo = slot.take();
        self.resources[index] = 0;
        bo
    }

    #[must_use]
    pub fn bo_cpu(&self) -> Option<&CpuMapping> {
        self.bo.as_ref().map(|bo| &bo.cpu)
    }

    #[must_use]
    pub fn bo2_cpu(&self) -> Option<&CpuMapping> {
        self.bo2.as_ref().map(|bo| &bo.cpu)
    }

    #[must_use]
    pub fn bo3_cpu(&self) -> Option<&CpuMapping> {
        self.bo3.as_ref().map(|bo| &bo.cpu)
    }

    #[must_use]
    pub fn bo4_cpu(&self) -> Option<&CpuMapping> {
        self.bo4.as_ref().map(|bo| &bo.cpu)
    }

    /// Encode the second IB of a gang submission into `bo4`.
    ///
    /// The IB writes `write_length2` dwords of `deadbeaf` to `bo_mc3`, then
    /// blocks until the last dword of the primary write at `bo_mc` lands.
    /// Stores the IB size in `pm4_dw2` and returns it. `bo_mc` and
    /// `write_length` are restored; `pm4` is left holding the wait packet.
    pub fn encode_second_ib(&mut self, funcs: &dyn IpFuncs) -> IgtResult<u32> {
        if self.bo4.is_none() {
            return Err(IgtError::InvalidArgument("second ib without a mapped bo4".into()));
        }
        let (bo_mc, write_length) = (self.bo_mc, self.write_length);

        self.bo_mc = self.bo_mc3;
        self.write_length = self.write_length2;
        let mut dwords = funcs.write_linear(self);
        let mut packets = self.pm4.as_slice().to_vec();

        self.bo_mc = bo_mc + u64::from(write_length.saturating_sub(1)) * 4;
        dwords += funcs.wait_reg_mem(self);
        packets.extend_from_slice(self.pm4.as_slice());

        self.bo_mc = bo_mc;
        self.write_length = write_length;

        if let Some(ib) = self.bo4_cpu() {
            for (index, dw) in packets.iter().enumerate() {
                ib.set_u32(index, *dw)?;
            }
        }
        self.pm4_dw2 = dwords;
        Ok(dwords)
    }

    /// Handles that go into the BO list of the next submission.
    #[must_use]
    pub fn active_resources(&self) -> &[u32] {
        &self.resources[..self.res_cnt.min(self.resources.len())]
    }
}

/// Builder for [`RingContext`].
#[derive(Debug, Clone)]
pub struct RingContextBuilder {
    write_length: u32,
    pm4_size: u32,
    secure: bool,
    res_cnt: usize,
    timeout_ns: u64,
}

impl Default for RingContextBuilder {
    fn default() -> Self {
        Self {
            write_length: 0,
            pm4_size: 256,
            secure: false,
            res_cnt: 1,
            timeout_ns: TIMEOUT_INFINITE,
        }
    }
}

impl RingContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn write_length(mut self, len: u32) -> Self {
        self.write_length = len;
        self
    }

    #[must_use]
    pub const fn pm4_size(mut self, dwords: u32) -> Self {
        self.pm4_size = dwords;
        self
    }

    #[must_use]
    pub const fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub const fn res_cnt(mut self, count: usize) -> Self {
        self.res_cnt = count;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, ns: u64) -> Self {
        self.timeout_ns = ns;
        self
    }

    #[must_use]
    pub fn build(self) -> RingContext {
        RingContext {
            ring_id: 0,
            res_cnt: self.res_cnt,
            write_length: self.write_length,
            write_length2: 0,
            pm4: CmdBase::with_capacity(self.pm4_size),
            pm4_size: self.pm4_size,
            secure: self.secure,
            bo_mc: 0,
            bo_mc2: 0,
            bo_mc3: 0,
            bo_mc4: 0,
            pm4_dw: 0,
            pm4_dw2: 0,
            bo: None,
            bo2: None,
            bo3: None,
            bo4: None,
            bo_cpu_origin: 0,
            resources: [0; 4],
            context_handle: 0,
            hw_ip_info: InfoHwIp::default(),
            ib_info: IbInfo::default(),
            ibs_request: CsRequest::default(),
            err_codes: ErrCodes::default(),
            timeout_ns: self.timeout_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amdgpu::ip_blocks::{GfxFuncs, AMDGPU_FAMILY_NV, DEADBEAF};
    use crate::amdgpu::memory::GpuBo;
    use crate::amdgpu::pm4::{packet3, PACKET3_WAIT_REG_MEM, PACKET3_WRITE_DATA};
    use assert_matches::assert_matches;

    fn host_bo(handle: u32, gpu_va: u64) -> MappedBo {
        MappedBo {
            bo: GpuBo {
                handle,
                gpu_va,
                size: 64,
            },
            cpu: CpuMapping::host(64),
        }
    }

    #[test]
    fn builder_defaults() {
        let ctx = RingContextBuilder::new().write_length(128).build();
        assert_eq!(ctx.write_length, 128);
        assert_eq!(ctx.pm4_size, 256);
        assert_eq!(ctx.pm4.max_dw(), 256);
        assert_eq!(ctx.res_cnt, 1);
        assert_eq!(ctx.timeout_ns, TIMEOUT_INFINITE);
        assert!(ctx.bo_cpu().is_none());
    }

    #[test]
    fn slots_track_address_and_handle() {
        let mut ctx = RingContextBuilder::new().res_cnt(2).build();
        assert!(ctx.set_bo(0, host_bo(7, 0x10_0000)).is_none());
        ctx.set_bo(1, host_bo(9, 0x20_0000));
        assert_eq!(ctx.bo_mc, 0x10_0000);
        assert_eq!(ctx.bo_mc2, 0x20_0000);
        assert_eq!(ctx.active_resources(), [7, 9]);

        let old = ctx.set_bo(0, host_bo(8, 0x30_0000)).unwrap();
        assert_eq!(old.handle(), 7);
        assert_eq!(ctx.resources[0], 8);

        let taken = ctx.take_bo(1).unwrap();
        assert_eq!(taken.gpu_va(), 0x20_0000);
        assert_eq!(ctx.bo_mc2, 0);
        assert!(ctx.bo2_cpu().is_none());
    }

    #[test]
    fn second_ib_targets_bo3_and_waits_on_primary() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = RingContextBuilder::new().write_length(16).res_cnt(4).build();
        ctx.write_length2 = 4;
        ctx.set_bo(0, host_bo(1, 0x10_0000));
        ctx.set_bo(2, host_bo(3, 0x30_0000));
        ctx.set_bo(3, host_bo(4, 0x40_0000));

        assert_eq!(ctx.encode_second_ib(&funcs).unwrap(), 8 + 7);
        assert_eq!(ctx.pm4_dw2, 15);
        assert_eq!(ctx.bo_mc, 0x10_0000);
        assert_eq!(ctx.write_length, 16);
        assert_eq!(ctx.active_resources(), [1, 0, 3, 4]);

        let ib = ctx.bo4_cpu().unwrap();
        assert_eq!(ib.read_u32(0), packet3(PACKET3_WRITE_DATA, 6));
        assert_eq!(ib.read_u32(2), 0x30_0000);
        assert_eq!(ib.read_u32(7), DEADBEAF);
        assert_eq!(ib.read_u32(8), packet3(PACKET3_WAIT_REG_MEM, 5));
        assert_eq!(ib.read_u32(10), 0x10_0000 + 15 * 4);
        assert_eq!(ib.read_u32(12), DEADBEAF);
    }

    #[test]
    fn second_write_is_checked_in_bo3() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = RingContextBuilder::new().build();
        ctx.write_length2 = 4;
        assert_matches!(funcs.compare_second(&ctx), Err(IgtError::InvalidArgument(_)));

        ctx.set_bo(2, host_bo(3, 0x30_0000));
        let out = ctx.bo3_cpu().unwrap();
        for index in 0..4 {
            out.write_u32(index, DEADBEAF);
        }
        assert!(funcs.compare_second(&ctx).is_ok());
        out.write_u32(3, 0);
        assert_matches!(
            funcs.compare_second(&ctx),
            Err(IgtError::CompareMismatch { index: 3, .. })
        );
    }

    #[test]
    fn second_ib_needs_bo4() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = RingContextBuilder::new().build();
        ctx.write_length2 = 4;
        assert_matches!(ctx.encode_second_ib(&funcs), Err(IgtError::InvalidArgument(_)));
        assert_eq!(ctx.pm4_dw2, 0);
    }

    #[test]
    fn oversized_second_ib_is_an_error() {
        let funcs = GfxFuncs::new(AMDGPU_FAMILY_NV);
        let mut ctx = RingContextBuilder::new().build();
        ctx.write_length2 = 32;
        ctx.set_bo(3, host_bo(4, 0x40_0000));
        assert_matches!(ctx.encode_second_ib(&funcs), Err(IgtError::InvalidArgument(_)));
        assert_eq!(ctx.bo_mc, 0);
        assert_eq!(ctx.write_length, 0);
    }
}

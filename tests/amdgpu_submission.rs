//! The memory submission flows against a fake GPU that executes PM4 and SDMA
//! packets on host memory.

use assert_matches::assert_matches;
use igt_gpu_tools::amdgpu::ip_blocks::{AMDGPU_FAMILY_NV, asic_rings_readiness};
use igt_gpu_tools::amdgpu::pm4::{
    GFX_COMPUTE_NOP, PACKET3_ATOMIC_MEM, PACKET3_DMA_DATA, PACKET3_NOP, PACKET3_WRITE_DATA,
    SDMA_OPCODE_ATOMIC, SDMA_OPCODE_CONSTANT_FILL, SDMA_OPCODE_COPY, SDMA_OPCODE_NOP,
    SDMA_OPCODE_POLL_REGMEM, SDMA_OPCODE_WRITE,
};
use igt_gpu_tools::amdgpu::ring_context::RingContextBuilder;
use igt_gpu_tools::amdgpu::submission::{
    MAX_IB_DWORDS, NopCsOptions, const_fill_helper, copy_linear_helper, exec_cs_helper, nop_cs,
    write_linear_helper,
};
use igt_gpu_tools::amdgpu::{
    BoRequest, CpuMapping, CsFence, CsRequest, GpuBo, IpBlockType, MappedBo, SubmitBackend,
    setup_amdgpu_ip_blocks,
};
use igt_gpu_tools::config::TIMEOUT_INFINITE;
use igt_gpu_tools::drm::ioctl::InfoHwIp;
use igt_gpu_tools::{IgtError, IgtResult};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

const VA_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, Copy)]
struct Region {
    va: u64,
    addr: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u32,
    next_va: u64,
    next_ctx: u32,
    next_list: u32,
    seq_no: u64,
    live: HashMap<u32, Region>,
    contexts: HashSet<u32>,
    bo_lists: HashMap<u32, Vec<u32>>,
    submitted: Vec<CsRequest>,
    wait_timeouts: Vec<u64>,
}

impl State {
    fn span(&self, va: u64, len: usize) -> IgtResult<*mut u8> {
        self.live
            .values()
            .find(|r| va >= r.va && va + len as u64 <= r.va + r.len as u64)
            .map(|r| (r.addr + (va - r.va) as usize) as *mut u8)
            .ok_or_else(|| IgtError::General(format!("GPU page fault at 0x{va:x}+{len}")))
    }

    fn read_u32(&self, va: u64) -> IgtResult<u32> {
        let ptr = self.span(va, 4)?;
        Ok(unsafe { ptr.cast::<u32>().read_unaligned() })
    }

    fn write_dwords(&self, va: u64, data: &[u32]) -> IgtResult<()> {
        let ptr = self.span(va, data.len() * 4)?;
        for (i, dword) in data.iter().enumerate() {
            unsafe { ptr.cast::<u32>().add(i).write_unaligned(*dword) };
        }
        Ok(())
    }

    fn fill_dword(&self, va: u64, value: u32, bytes: usize) -> IgtResult<()> {
        self.write_dwords(va, &vec![value; bytes / 4])
    }

    fn copy(&self, src: u64, dst: u64, bytes: usize) -> IgtResult<()> {
        let from = self.span(src, bytes)?;
        let to = self.span(dst, bytes)?;
        unsafe { std::ptr::copy(from, to, bytes) };
        Ok(())
    }

    fn compare_swap(&self, va: u64, src: u32, cmp: u32) -> IgtResult<()> {
        if self.read_u32(va)? == cmp {
            self.write_dwords(va, &[src])?;
        }
        Ok(())
    }
}

fn addr(lo: u32, hi: u32) -> u64 {
    u64::from(lo) | (u64::from(hi) << 32)
}

fn truncated() -> IgtError {
    IgtError::General("packet runs past the end of the IB".into())
}

/// Executes one GFX/compute packet and returns its length in dwords.
fn exec_pm4(state: &State, p: &[u32]) -> IgtResult<usize> {
    let header = p[0];
    if header == GFX_COMPUTE_NOP {
        return Ok(1);
    }
    if header >> 30 != 3 {
        return Err(IgtError::General(format!("not a type-3 header: 0x{header:08x}")));
    }
    let op = (header >> 8) & 0xff;
    let len = ((header >> 16) & 0x3fff) as usize + 2;
    let body = p.get(1..len).ok_or_else(truncated)?;

    match op {
        PACKET3_NOP => {}
        PACKET3_WRITE_DATA => state.write_dwords(addr(body[1], body[2]), &body[3..])?,
        PACKET3_DMA_DATA => {
            let src_sel = (body[0] >> 29) & 0x3;
            let dst = addr(body[3], body[4]);
            let bytes = body[5] as usize;
            match src_sel {
                0 => state.copy(addr(body[1], body[2]), dst, bytes)?,
                2 => state.fill_dword(dst, body[1], bytes)?,
                other => return Err(IgtError::General(format!("DMA_DATA src_sel {other}"))),
            }
        }
        PACKET3_ATOMIC_MEM => state.compare_swap(addr(body[1], body[2]), body[3], body[5])?,
        other => return Err(IgtError::General(format!("unhandled PM4 opcode 0x{other:x}"))),
    }
    Ok(len)
}

/// Executes one SDMA packet (gfx9+ count encoding) and returns its length.
fn exec_sdma(state: &State, p: &[u32]) -> IgtResult<usize> {
    let field = |i: usize| p.get(i).copied().ok_or_else(truncated);
    match p[0] & 0xff {
        SDMA_OPCODE_NOP => Ok(1),
        SDMA_OPCODE_WRITE => {
            let count = field(3)? as usize + 1;
            let data = p.get(4..4 + count).ok_or_else(truncated)?;
            state.write_dwords(addr(field(1)?, field(2)?), data)?;
            Ok(4 + count)
        }
        SDMA_OPCODE_CONSTANT_FILL => {
            state.fill_dword(addr(field(1)?, field(2)?), field(3)?, field(4)? as usize + 1)?;
            Ok(5)
        }
        SDMA_OPCODE_COPY => {
            let bytes = field(1)? as usize + 1;
            state.copy(addr(field(3)?, field(4)?), addr(field(5)?, field(6)?), bytes)?;
            Ok(7)
        }
        SDMA_OPCODE_ATOMIC => {
            state.compare_swap(addr(field(1)?, field(2)?), field(3)?, field(5)?)?;
            Ok(8)
        }
        SDMA_OPCODE_POLL_REGMEM => Ok(6),
        other => Err(IgtError::General(format!("unhandled SDMA opcode {other}"))),
    }
}

/// A GPU whose engines run synchronously inside `cs_submit`.
#[derive(Debug)]
struct FakeGpu {
    available_rings: u32,
    /// Accept submissions without executing them.
    lose_writes: bool,
    fence_timeout_ns: u64,
    state: Mutex<State>,
}

impl FakeGpu {
    fn new(available_rings: u32) -> Self {
        Self {
            available_rings,
            lose_writes: false,
            fence_timeout_ns: TIMEOUT_INFINITE,
            state: Mutex::new(State {
                next_handle: 1,
                next_va: VA_BASE,
                next_ctx: 1,
                next_list: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl SubmitBackend for FakeGpu {
    fn query_hw_ip_info(&self, ip_type: u32, _ip_instance: u32) -> IgtResult<InfoHwIp> {
        let rings = match IpBlockType::from_hw_ip(ip_type) {
            Some(IpBlockType::Gfx | IpBlockType::Compute | IpBlockType::Dma) => {
                self.available_rings
            }
            Some(_) => 0,
            None => return Err(IgtError::InvalidArgument(format!("hw ip {ip_type}"))),
        };
        Ok(InfoHwIp {
            hw_ip_version_major: 10,
            available_rings: rings,
            ..InfoHwIp::default()
        })
    }

    fn ctx_create(&self) -> IgtResult<u32> {
        let mut state = self.state();
        let id = state.next_ctx;
        state.next_ctx += 1;
        state.contexts.insert(id);
        Ok(id)
    }

    fn ctx_free(&self, ctx_id: u32) -> IgtResult<()> {
        if self.state().contexts.remove(&ctx_id) {
            Ok(())
        } else {
            Err(IgtError::InvalidArgument(format!("context {ctx_id}")))
        }
    }

    fn alloc_and_map(&self, request: &BoRequest) -> IgtResult<MappedBo> {
        let len = usize::try_from(request.size).map_err(|_| IgtError::OutOfMemory)?;
        let cpu = CpuMapping::host(len);
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        let va = state.next_va;
        state.next_va += request.size.next_multiple_of(0x10_0000);
        state.live.insert(
            handle,
            Region {
                va,
                addr: cpu.as_mut_ptr() as usize,
                len,
            },
        );
        Ok(MappedBo {
            bo: GpuBo {
                handle,
                gpu_va: va,
                size: request.size,
            },
            cpu,
        })
    }

    fn unmap_and_free(&self, bo: MappedBo) -> IgtResult<()> {
        match self.state().live.remove(&bo.handle()) {
            Some(_) => Ok(()),
            None => Err(IgtError::InvalidArgument(format!("double free of bo {}", bo.handle()))),
        }
    }

    fn bo_list_create(&self, handles: &[u32]) -> IgtResult<u32> {
        let mut state = self.state();
        if let Some(handle) = handles.iter().find(|h| !state.live.contains_key(h)) {
            return Err(IgtError::InvalidArgument(format!("bo {handle} in list is not live")));
        }
        let id = state.next_list;
        state.next_list += 1;
        state.bo_lists.insert(id, handles.to_vec());
        Ok(id)
    }

    fn bo_list_destroy(&self, list: u32) -> IgtResult<()> {
        match self.state().bo_lists.remove(&list) {
            Some(_) => Ok(()),
            None => Err(IgtError::InvalidArgument(format!("bo list {list}"))),
        }
    }

    fn cs_submit(&self, ctx_id: u32, request: &mut CsRequest) -> IgtResult<()> {
        let mut state = self.state();
        if !state.contexts.contains(&ctx_id) {
            return Err(IgtError::Driver {
                op: "AMDGPU_CS",
                errno: libc::EINVAL,
            });
        }
        if !state.bo_lists.contains_key(&request.bo_list) {
            return Err(IgtError::InvalidArgument(format!("bo list {}", request.bo_list)));
        }

        if !self.lose_writes {
            for ib in &request.ibs {
                let ptr = state.span(ib.gpu_va, ib.size_dw as usize * 4)?;
                let dwords = unsafe {
                    std::slice::from_raw_parts(ptr.cast::<u32>(), ib.size_dw as usize).to_vec()
                };
                let mut at = 0;
                while at < dwords.len() {
                    at += if request.ip_type == IpBlockType::Dma.hw_ip() {
                        exec_sdma(&state, &dwords[at..])?
                    } else {
                        exec_pm4(&state, &dwords[at..])?
                    };
                }
            }
        }

        state.seq_no += 1;
        request.seq_no = state.seq_no;
        state.submitted.push(request.clone());
        Ok(())
    }

    fn fence_wait(&self, fence: &CsFence, timeout_ns: u64) -> IgtResult<bool> {
        let mut state = self.state();
        state.wait_timeouts.push(timeout_ns);
        Ok(fence.seq_no <= state.seq_no)
    }

    fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ns
    }
}

fn assert_no_leaks(gpu: &FakeGpu) {
    let state = gpu.state();
    assert!(state.live.is_empty(), "leaked bos: {:?}", state.live.keys());
    assert!(state.contexts.is_empty());
    assert!(state.bo_lists.is_empty());
}

#[test]
fn write_linear_on_every_engine() {
    let gpu = FakeGpu::new(0b11);
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();

    for block in blocks.iter() {
        write_linear_helper(&gpu, block, false).unwrap();
    }

    // two rings, two memory variants, three engines
    assert_eq!(gpu.state().submitted.len(), 2 * 2 * 3);
    assert_no_leaks(&gpu);
}

#[test]
fn const_fill_on_every_engine() {
    let gpu = FakeGpu::new(0b1);
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();

    for block in blocks.iter() {
        const_fill_helper(&gpu, block).unwrap();
    }
    assert_no_leaks(&gpu);
}

#[test]
fn copy_linear_covers_all_memory_pairings() {
    let gpu = FakeGpu::new(0b1);
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();
    let sdma = blocks.get_ip_block(IpBlockType::Dma).unwrap();

    copy_linear_helper(&gpu, sdma).unwrap();

    let state = gpu.state();
    assert_eq!(state.submitted.len(), 4);
    assert!(state.submitted.iter().all(|r| r.ip_type == IpBlockType::Dma.hw_ip()));
    drop(state);
    assert_no_leaks(&gpu);
}

#[test]
fn lost_writes_are_reported() {
    let mut gpu = FakeGpu::new(0b1);
    gpu.lose_writes = true;
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();
    let gfx = blocks.get_ip_block(IpBlockType::Gfx).unwrap();

    let err = write_linear_helper(&gpu, gfx, false).unwrap_err();
    assert_matches!(
        err,
        IgtError::CompareMismatch {
            index: 0,
            expected: 0xdead_beaf,
            found: 0
        }
    );
    assert_no_leaks(&gpu);
}

#[test]
fn oversized_ib_is_rejected_before_submission() {
    let gpu = FakeGpu::new(0b1);
    let mut ctx = RingContextBuilder::new().pm4_size(16).build();
    ctx.context_handle = gpu.ctx_create().unwrap();
    ctx.pm4_dw = MAX_IB_DWORDS + 1;

    let err = exec_cs_helper(&gpu, IpBlockType::Gfx.hw_ip(), &mut ctx, false).unwrap_err();
    assert_matches!(err, IgtError::InvalidArgument(_));
    assert!(gpu.state().submitted.is_empty());
}

#[test]
fn failed_submission_is_recorded_when_expected() {
    let gpu = FakeGpu::new(0b1);
    let mut ctx = RingContextBuilder::new().write_length(64).pm4_size(16).build();
    ctx.context_handle = 77;
    ctx.pm4.emit(GFX_COMPUTE_NOP);
    ctx.pm4_dw = 1;

    exec_cs_helper(&gpu, IpBlockType::Gfx.hw_ip(), &mut ctx, true).unwrap();
    assert_eq!(ctx.err_codes.err_code_cs_submit, -libc::EINVAL);
    assert_no_leaks(&gpu);
}

#[test]
fn ring_readiness_follows_the_mask() {
    let gpu = FakeGpu::new(0b10);
    let ready = asic_rings_readiness(&gpu, 0b10);
    assert!(ready[IpBlockType::Gfx.hw_ip() as usize]);
    assert!(ready[IpBlockType::Dma.hw_ip() as usize]);
    assert!(!ready[IpBlockType::Uvd.hw_ip() as usize]);

    let none = asic_rings_readiness(&gpu, 0b01);
    assert!(none.iter().all(|ready| !ready));
}

#[test]
fn nop_cs_workers_share_a_context() {
    let gpu = FakeGpu::new(0b1);
    let ctx = gpu.ctx_create().unwrap();
    let options = NopCsOptions {
        duration: Duration::from_millis(20),
        sync: true,
        workers: 2,
        ..NopCsOptions::default()
    };

    let stats = nop_cs(&gpu, ctx, &options).unwrap();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.cycles > 0));
    gpu.ctx_free(ctx).unwrap();
    assert_no_leaks(&gpu);
}

#[test]
fn flows_wait_with_the_configured_timeout() {
    let mut gpu = FakeGpu::new(0b1);
    gpu.fence_timeout_ns = 5_000_000;
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();
    let gfx = blocks.get_ip_block(IpBlockType::Gfx).unwrap();

    write_linear_helper(&gpu, gfx, false).unwrap();
    const_fill_helper(&gpu, gfx).unwrap();
    copy_linear_helper(&gpu, gfx).unwrap();

    let state = gpu.state();
    // 2 write, 2 fill and 4 copy submissions
    assert_eq!(state.wait_timeouts.len(), 8);
    assert!(state.wait_timeouts.iter().all(|&t| t == 5_000_000));
}

#[test]
fn nop_cs_waits_with_the_configured_timeout() {
    let mut gpu = FakeGpu::new(0b1);
    gpu.fence_timeout_ns = 1_000;
    let ctx = gpu.ctx_create().unwrap();
    let options = NopCsOptions {
        duration: Duration::from_millis(5),
        sync: true,
        ..NopCsOptions::default()
    };

    nop_cs(&gpu, ctx, &options).unwrap();
    gpu.ctx_free(ctx).unwrap();

    let state = gpu.state();
    assert!(!state.wait_timeouts.is_empty());
    assert!(state.wait_timeouts.iter().all(|&t| t == 1_000));
}

#[test]
fn timeout_defaults_to_infinite() {
    let gpu = FakeGpu::new(0b1);
    let blocks = setup_amdgpu_ip_blocks(3, 57, AMDGPU_FAMILY_NV).unwrap();
    const_fill_helper(&gpu, blocks.get_ip_block(IpBlockType::Dma).unwrap()).unwrap();
    assert!(gpu.state().wait_timeouts.iter().all(|&t| t == TIMEOUT_INFINITE));
}

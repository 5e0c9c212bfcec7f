//! Command-submission flows shared by the basic memory tests.
//!
//! Everything here runs against a [`SubmitBackend`], so the flows work the
//! same on a real device and on a host-memory fake.

use crate::amdgpu::cs::{CsRequest, IbInfo, SubmitBackend};
use crate::amdgpu::ip_blocks::{IpBlockType, IpBlockVersion};
use crate::amdgpu::memory::{BoRequest, GemCreateFlags, MappedBo};
use crate::amdgpu::pm4::GFX_COMPUTE_NOP;
use crate::amdgpu::ring_context::{RingContext, RingContextBuilder};
use crate::drm::ioctl::AMDGPU_IB_FLAGS_SECURE;
use crate::error::{IgtError, IgtResult};
use std::time::{Duration, Instant};

/// Largest PM4 stream that fits the 4 KiB IB.
pub const MAX_IB_DWORDS: u32 = 1024;
const IB_SIZE: u64 = 4096;

/// Submit errors a good job may still report while other tests reset the GPU.
const TOLERATED_SUBMIT_ERRNOS: [i32; 3] = [libc::ECANCELED, libc::ENODATA, libc::EHWPOISON];
const TOLERATED_WAIT_ERRNOS: [i32; 2] = [libc::ECANCELED, libc::ENODATA];

fn neg_errno(err: &IgtError) -> i32 {
    -err.errno().unwrap_or(libc::EIO)
}

fn tolerated(err: &IgtError, allowed: &[i32]) -> bool {
    err.errno().is_some_and(|errno| allowed.contains(&errno))
}

/// Rings `0..n` for the leading run of set bits in `available_rings`.
pub fn available_ring_ids(available_rings: u32) -> impl Iterator<Item = u32> {
    (0..32).take_while(move |ring| available_rings & (1 << ring) != 0)
}

/// Copy `ctx.pm4` into a fresh IB, submit it with `ctx.resources` and wait
/// for the fence.
///
/// Submit and wait results land in `ctx.err_codes` as negative errnos. With
/// `expect_failure` they are only logged; otherwise anything but the
/// tolerated reset errnos is returned as an error.
///
/// # Errors
/// Returns allocation or BO-list failures, and submit/wait failures of a job
/// that was expected to succeed.
pub fn exec_cs_helper<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_type: u32,
    ctx: &mut RingContext,
    expect_failure: bool,
) -> IgtResult<()> {
    let ib_size = if expect_failure {
        u64::from(ctx.write_length)
    } else {
        if ctx.pm4_dw > MAX_IB_DWORDS {
            return Err(IgtError::InvalidArgument(format!(
                "{} PM4 dwords do not fit a {IB_SIZE}-byte IB",
                ctx.pm4_dw
            )));
        }
        IB_SIZE
    };

    let ib = backend.alloc_and_map(&BoRequest::new(ib_size).alignment(4096).gtt().uncached())?;
    let pm4 = ctx.pm4.as_slice();
    ib.cpu.copy_from_u32(&pm4[..(ctx.pm4_dw as usize).min(pm4.len())]);

    ctx.ib_info.gpu_va = ib.gpu_va();
    ctx.ib_info.size_dw = ctx.pm4_dw;
    if ctx.secure {
        ctx.ib_info.flags |= AMDGPU_IB_FLAGS_SECURE;
    }
    ctx.ibs_request.ip_type = ip_type;
    ctx.ibs_request.ip_instance = 0;
    ctx.ibs_request.ring = ctx.ring_id;
    ctx.ibs_request.ibs = vec![ctx.ib_info];

    let mut handles = ctx.active_resources().to_vec();
    handles.push(ib.handle());

    let outcome = submit_and_wait(backend, ctx, &handles, expect_failure);
    let freed = backend.unmap_and_free(ib);
    outcome.and(freed)
}

fn submit_and_wait<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx: &mut RingContext,
    handles: &[u32],
    expect_failure: bool,
) -> IgtResult<()> {
    ctx.ibs_request.bo_list = backend.bo_list_create(handles)?;

    let submitted = backend.cs_submit(ctx.context_handle, &mut ctx.ibs_request);
    ctx.err_codes.err_code_cs_submit = submitted.as_ref().map_or_else(neg_errno, |_| 0);
    let submit_check = match submitted {
        Err(e) if expect_failure => {
            log::info!("cs submit failed as expected: {e}");
            Ok(())
        }
        Err(e) if !tolerated(&e, &TOLERATED_SUBMIT_ERRNOS) => Err(e),
        _ => Ok(()),
    };

    let destroyed = backend.bo_list_destroy(ctx.ibs_request.bo_list);
    submit_check?;
    destroyed?;

    let fence = ctx.ibs_request.fence(ctx.context_handle);
    let waited = backend.fence_wait(&fence, ctx.timeout_ns);
    ctx.err_codes.err_code_wait_for_fence = match &waited {
        Ok(true) => 0,
        Ok(false) => -libc::ETIME,
        Err(e) => neg_errno(e),
    };
    match waited {
        _ if expect_failure => {
            log::info!(
                "expected failure: fence wait returned {}",
                ctx.err_codes.err_code_wait_for_fence
            );
            Ok(())
        }
        Ok(true) => Ok(()),
        Ok(false) => Err(IgtError::WaitTimeout),
        Err(e) if tolerated(&e, &TOLERATED_WAIT_ERRNOS) => {
            log::warn!("fence wait on ring {} tolerated: {e}", ctx.ring_id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// A mapped, uncached GTT buffer for one test iteration, every byte set to `fill`.
fn alloc_test_bo<B: SubmitBackend + ?Sized>(
    backend: &B,
    size: u64,
    flags: GemCreateFlags,
    fill: u8,
) -> IgtResult<MappedBo> {
    let bo = backend.alloc_and_map(
        &BoRequest::new(size)
            .alignment(4096)
            .gtt()
            .flags(flags)
            .uncached(),
    )?;
    bo.cpu.fill(fill, usize::try_from(size).unwrap_or(usize::MAX));
    Ok(bo)
}

pub(crate) fn release_slot<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx: &mut RingContext,
    index: usize,
) -> IgtResult<()> {
    match ctx.take_bo(index) {
        Some(bo) => backend.unmap_and_free(bo),
        None => Ok(()),
    }
}

/// Run `body` once per available ring of `ip_block` with a fresh context,
/// freeing the context afterwards.
pub(crate) fn for_each_ring<B, F>(
    backend: &B,
    ip_block: &IpBlockVersion,
    ctx: &mut RingContext,
    mut body: F,
) -> IgtResult<()>
where
    B: SubmitBackend + ?Sized,
    F: FnMut(&mut RingContext) -> IgtResult<()>,
{
    ctx.hw_ip_info = backend.query_hw_ip_info(ip_block.ip_type.hw_ip(), 0)?;
    ctx.context_handle = backend.ctx_create()?;

    let mut outcome = Ok(());
    for ring_id in available_ring_ids(ctx.hw_ip_info.available_rings) {
        ctx.ring_id = ring_id;
        outcome = body(ctx);
        if outcome.is_err() {
            break;
        }
    }

    let freed = backend.ctx_free(ctx.context_handle);
    outcome.and(freed)
}

fn gtt_variants(extra: GemCreateFlags) -> [GemCreateFlags; 2] {
    [extra, GemCreateFlags::CPU_GTT_USWC | extra]
}

/// Write 128 dwords of `deadbeaf` on every ring, in cached and USWC GTT.
///
/// With `secure`, the buffers are encrypted and the atomic TMZ path is
/// checked instead: on SDMA the first compare-swap must change the first
/// dword and the second must leave it alone.
///
/// # Errors
/// Returns the first submission or verification failure.
pub fn write_linear_helper<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
    secure: bool,
) -> IgtResult<()> {
    let mut ctx = RingContextBuilder::new()
        .write_length(128)
        .pm4_size(256)
        .secure(secure)
        .res_cnt(1)
        .timeout(backend.fence_timeout_ns())
        .build();
    let extra = if secure {
        GemCreateFlags::ENCRYPTED
    } else {
        GemCreateFlags::empty()
    };
    let funcs = &ip_block.funcs;
    let hw_ip = ip_block.ip_type.hw_ip();

    for_each_ring(backend, ip_block, &mut ctx, |ctx| {
        for flags in gtt_variants(extra) {
            let bo = alloc_test_bo(backend, u64::from(ctx.write_length) * 4, flags, 0)?;
            ctx.set_bo(0, bo);

            funcs.write_linear(ctx);
            let outcome = exec_cs_helper(backend, hw_ip, ctx, false).and_then(|()| {
                if !secure {
                    return funcs.compare(ctx, 1);
                }
                match ip_block.ip_type {
                    IpBlockType::Gfx => {
                        funcs.write_linear_atomic(ctx);
                        exec_cs_helper(backend, hw_ip, ctx, false)
                    }
                    IpBlockType::Dma => check_secure_atomic(backend, ip_block, ctx),
                    _ => Ok(()),
                }
            });

            let freed = release_slot(backend, ctx, 0);
            outcome.and(freed)?;
        }
        Ok(())
    })
}

fn first_dword(ctx: &RingContext) -> IgtResult<u32> {
    ctx.bo_cpu()
        .ok_or_else(|| IgtError::InvalidArgument("no mapped bo".into()))?
        .get_u32(0)
}

fn check_secure_atomic<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
    ctx: &mut RingContext,
) -> IgtResult<()> {
    let hw_ip = ip_block.ip_type.hw_ip();

    ctx.bo_cpu_origin = first_dword(ctx)?;
    ip_block.funcs.write_linear_atomic(ctx);
    exec_cs_helper(backend, hw_ip, ctx, false)?;
    let swapped = first_dword(ctx)?;
    if swapped == ctx.bo_cpu_origin {
        return Err(IgtError::General(format!(
            "secure compare-swap left 0x{swapped:08x} unchanged"
        )));
    }

    // the buffer no longer holds the compare value, so this one must not swap
    ctx.bo_cpu_origin = swapped;
    ip_block.funcs.write_linear_atomic(ctx);
    exec_cs_helper(backend, hw_ip, ctx, false)?;
    let found = first_dword(ctx)?;
    if found != ctx.bo_cpu_origin {
        return Err(IgtError::CompareMismatch {
            index: 0,
            expected: ctx.bo_cpu_origin,
            found,
        });
    }
    Ok(())
}

/// Fill 1 MiB with `deadbeaf` on every ring and verify it.
///
/// # Errors
/// Returns the first submission or verification failure.
pub fn const_fill_helper<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
) -> IgtResult<()> {
    let mut ctx = RingContextBuilder::new()
        .write_length(1024 * 1024)
        .pm4_size(256)
        .res_cnt(1)
        .timeout(backend.fence_timeout_ns())
        .build();
    let funcs = &ip_block.funcs;
    let hw_ip = ip_block.ip_type.hw_ip();

    for_each_ring(backend, ip_block, &mut ctx, |ctx| {
        for flags in gtt_variants(GemCreateFlags::empty()) {
            let bo = alloc_test_bo(backend, u64::from(ctx.write_length), flags, 0)?;
            ctx.set_bo(0, bo);

            funcs.const_fill(ctx);
            let outcome =
                exec_cs_helper(backend, hw_ip, ctx, false).and_then(|()| funcs.compare(ctx, 4));

            let freed = release_slot(backend, ctx, 0);
            outcome.and(freed)?;
        }
        Ok(())
    })
}

/// Copy 1 KiB of the pattern between every pairing of cached and USWC GTT
/// buffers on every ring.
///
/// # Errors
/// Returns the first submission or verification failure.
pub fn copy_linear_helper<B: SubmitBackend + ?Sized>(
    backend: &B,
    ip_block: &IpBlockVersion,
) -> IgtResult<()> {
    let mut ctx = RingContextBuilder::new()
        .write_length(1024)
        .pm4_size(256)
        .res_cnt(2)
        .timeout(backend.fence_timeout_ns())
        .build();
    let funcs = &ip_block.funcs;
    let hw_ip = ip_block.ip_type.hw_ip();
    #[allow(clippy::cast_possible_truncation)]
    let pattern_byte = funcs.pattern() as u8;

    for_each_ring(backend, ip_block, &mut ctx, |ctx| {
        let variants = gtt_variants(GemCreateFlags::empty());
        for src_flags in variants {
            for dst_flags in variants {
                let len = u64::from(ctx.write_length);
                let src = alloc_test_bo(backend, len, src_flags, pattern_byte)?;
                ctx.set_bo(0, src);
                let dst = match alloc_test_bo(backend, len, dst_flags, 0) {
                    Ok(dst) => dst,
                    Err(e) => {
                        release_slot(backend, ctx, 0)?;
                        return Err(e);
                    }
                };
                ctx.set_bo(1, dst);

                funcs.copy_linear(ctx);
                let outcome = exec_cs_helper(backend, hw_ip, ctx, false)
                    .and_then(|()| funcs.compare_pattern(ctx, 4));

                let freed_src = release_slot(backend, ctx, 0);
                let freed_dst = release_slot(backend, ctx, 1);
                outcome.and(freed_src).and(freed_dst)?;
            }
        }
        Ok(())
    })
}

// ===============================================================================================
// NOP throughput
// ===============================================================================================

/// How [`nop_cs`] paces its submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NopCsOptions {
    pub ip_type: u32,
    pub ring: u32,
    pub duration: Duration,
    /// Wait for every submission before the next one.
    pub sync: bool,
    /// Number of threads submitting concurrently on the same context.
    pub workers: usize,
}

impl Default for NopCsOptions {
    fn default() -> Self {
        Self {
            ip_type: IpBlockType::Gfx.hw_ip(),
            ring: 0,
            duration: Duration::from_secs(20),
            sync: false,
            workers: 1,
        }
    }
}

/// Per-worker result of [`nop_cs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NopCsStats {
    pub cycles: u64,
    /// Elapsed time when the last submission returned.
    pub submit_time: Duration,
    /// Elapsed time when the last fence signalled.
    pub sync_time: Duration,
}

impl NopCsStats {
    /// Average submit and sync time per cycle in microseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn per_cycle_us(&self) -> (f64, f64) {
        let cycles = self.cycles.max(1) as f64;
        (
            self.submit_time.as_secs_f64() * 1e6 / cycles,
            self.sync_time.as_secs_f64() * 1e6 / cycles,
        )
    }
}

/// Submit a 16-dword NOP IB on `ctx_id` for `options.duration` and report
/// the cycle count and timings of every worker.
///
/// # Errors
/// Returns the first allocation, submit or wait failure.
pub fn nop_cs<B: SubmitBackend + Sync + ?Sized>(
    backend: &B,
    ctx_id: u32,
    options: &NopCsOptions,
) -> IgtResult<Vec<NopCsStats>> {
    let ib = backend.alloc_and_map(&BoRequest::new(IB_SIZE).alignment(4096).gtt().uncached())?;
    for index in 0..16 {
        ib.cpu.write_u32(index, GFX_COMPUTE_NOP);
    }

    let outcome = backend.bo_list_create(&[ib.handle()]).and_then(|bo_list| {
        let request = CsRequest {
            ip_type: options.ip_type,
            ip_instance: 0,
            ring: options.ring,
            bo_list,
            ibs: vec![IbInfo {
                gpu_va: ib.gpu_va(),
                size_dw: 16,
                flags: 0,
            }],
            seq_no: 0,
        };

        let workers = options.workers.max(1);
        let results: Vec<IgtResult<NopCsStats>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let mut request = request.clone();
                    scope.spawn(move || nop_worker(backend, ctx_id, &mut request, options))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(IgtError::General("nop worker panicked".into())))
                })
                .collect()
        });

        let destroyed = backend.bo_list_destroy(bo_list);
        let stats = results.into_iter().collect::<IgtResult<Vec<_>>>()?;
        destroyed?;
        Ok(stats)
    });

    let freed = backend.unmap_and_free(ib);
    let stats = outcome?;
    freed?;
    Ok(stats)
}

fn nop_worker<B: SubmitBackend + ?Sized>(
    backend: &B,
    ctx_id: u32,
    request: &mut CsRequest,
    options: &NopCsOptions,
) -> IgtResult<NopCsStats> {
    let start = Instant::now();
    let mut cycles = 0u64;

    while start.elapsed() < options.duration {
        backend.cs_submit(ctx_id, request)?;
        if options.sync {
            wait_signalled(backend, request, ctx_id)?;
        }
        cycles += 1;
    }
    let submit_time = start.elapsed();
    if cycles > 0 {
        wait_signalled(backend, request, ctx_id)?;
    }
    let sync_time = start.elapsed();

    let stats = NopCsStats {
        cycles,
        submit_time,
        sync_time,
    };
    let (submit_us, sync_us) = stats.per_cycle_us();
    log::info!(
        "ip {} ring {}: {cycles} cycles, submit {submit_us:.2}us, sync {sync_us:.2}us",
        options.ip_type,
        options.ring
    );
    Ok(stats)
}

fn wait_signalled<B: SubmitBackend + ?Sized>(
    backend: &B,
    request: &CsRequest,
    ctx_id: u32,
) -> IgtResult<()> {
    if backend.fence_wait(&request.fence(ctx_id), backend.fence_timeout_ns())? {
        Ok(())
    } else {
        Err(IgtError::WaitTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_ids_stop_at_first_gap() {
        assert_eq!(available_ring_ids(0b1011).collect::<Vec<_>>(), [0, 1]);
        assert_eq!(available_ring_ids(0).count(), 0);
        assert_eq!(available_ring_ids(u32::MAX).count(), 32);
    }

    #[test]
    fn tolerated_errnos() {
        let canceled = IgtError::Driver {
            op: "AMDGPU_CS",
            errno: libc::ECANCELED,
        };
        assert!(tolerated(&canceled, &TOLERATED_SUBMIT_ERRNOS));
        assert_eq!(neg_errno(&canceled), -libc::ECANCELED);
        assert!(!tolerated(&IgtError::WaitTimeout, &TOLERATED_WAIT_ERRNOS));
    }
}

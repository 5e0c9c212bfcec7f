//! PCI hot-unplug harness: remove an amdgpu device through sysfs while it is
//! in use, tear down, then rescan the bus.

use crate::amdgpu::cs::{CsRequest, IbInfo, SubmitBackend};
use crate::amdgpu::device::AmdgpuDevice;
use crate::amdgpu::memory::{BoRequest, CpuMapping, GemCreateFlags, GpuBo, MemoryType};
use crate::amdgpu::pm4::GFX_COMPUTE_NOP;
use crate::config::IgtConfig;
use crate::drm::device::DrmDevice;
use crate::drm::ioctl::{AMDGPU_FENCE_TO_HANDLE_GET_SYNCOBJ, AMDGPU_HW_IP_GFX, AMDGPU_VA_OP_UNMAP};
use crate::drm::sysfs::{device_sysfs_path_from_fd, open_devices};
use crate::error::{IgtError, IgtResult};
use crate::utils::monotonic_ns;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

const NOP_IB_SIZE: u64 = 4096;
const NOP_IB_DWORDS: u32 = 16;
const STALE_WRITE: u32 = 0xdeaf_beef;
/// How long device 2 waits on the imported fence after device 1 is gone.
const IMPORTED_FENCE_WAIT_NS: u64 = 100_000_000;

/// What a hotplug flow needs opened before the remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PciUnplugSetup {
    /// Lowest amdgpu DRM minor version the flow runs on.
    pub minor_version_req: u32,
    /// Keep an initialised handle on the first device.
    pub open_device: bool,
    /// Also initialise the second device.
    pub open_device2: bool,
}

/// Write `"1"` to a sysfs trigger file and return the byte count written.
///
/// # Errors
/// Returns the open or write error.
pub fn trigger(path: &Path) -> IgtResult<usize> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    Ok(file.write(b"1")?)
}

/// State of one hotplug test.
#[derive(Debug)]
pub struct PciUnplug {
    config: IgtConfig,
    fds: Vec<DrmDevice>,
    device: Option<Arc<AmdgpuDevice>>,
    device2: Option<Arc<AmdgpuDevice>>,
    sysfs_remove: Option<PathBuf>,
    do_cs: Arc<AtomicBool>,
}

impl PciUnplug {
    #[must_use]
    pub fn new(config: IgtConfig) -> Self {
        Self {
            config,
            fds: Vec::new(),
            device: None,
            device2: None,
            sysfs_remove: None,
            do_cs: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.fds.len()
    }

    #[must_use]
    pub fn sysfs_remove(&self) -> Option<&Path> {
        self.sysfs_remove.as_deref()
    }

    /// The initialised first device.
    ///
    /// # Errors
    /// Returns `InvalidArgument` unless set up with `open_device`.
    pub fn device(&self) -> IgtResult<Arc<AmdgpuDevice>> {
        self.device
            .clone()
            .ok_or_else(|| IgtError::InvalidArgument("first device not opened".into()))
    }

    /// # Errors
    /// Returns `InvalidArgument` unless set up with `open_device2`.
    pub fn device2(&self) -> IgtResult<Arc<AmdgpuDevice>> {
        self.device2
            .clone()
            .ok_or_else(|| IgtError::InvalidArgument("second device not opened".into()))
    }

    /// Open the amdgpu nodes, resolve the sysfs `remove` file of the first
    /// one and initialise the devices `setup` asks for.
    ///
    /// # Errors
    /// `DeviceNotFound` without amdgpu nodes, `Unsupported` when a second
    /// GPU is needed but absent or the driver is older than
    /// `minor_version_req`, otherwise the failing open or query.
    ///
    /// A failed setup leaves nothing open.
    pub fn setup_test(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        let opened = self.open_for_test(setup);
        if opened.is_err() {
            self.teardown_test();
        }
        opened
    }

    fn open_for_test(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        self.fds = open_devices(&self.config, "amdgpu")?;
        require_devices(setup, self.fds.len())?;

        let first = &self.fds[0];
        self.sysfs_remove = Some(device_sysfs_path_from_fd(&self.config, first)?.join("remove"));

        // the version check needs an initialised device even when the flow does not
        let timeout = self.config.fence_timeout_ns;
        let device = AmdgpuDevice::initialize(first.clone())?;
        let device = Arc::new(device.with_fence_timeout(timeout));
        check_minor(&device, setup.minor_version_req)?;
        if setup.open_device {
            self.device = Some(device);
        }

        if setup.open_device2 {
            let device2 = AmdgpuDevice::initialize(self.fds[1].clone())?;
            let device2 = Arc::new(device2.with_fence_timeout(timeout));
            check_minor(&device2, setup.minor_version_req)?;
            self.device2 = Some(device2);
        }

        log::info!(
            "hotunplug setup: {} device(s), remove via {}",
            self.fds.len(),
            self.sysfs_remove
                .as_deref()
                .map_or_else(|| "?".into(), |p| p.display().to_string())
        );
        Ok(())
    }

    /// Drop every handle and fd opened by [`setup_test`](Self::setup_test).
    pub fn teardown_test(&mut self) {
        self.device = None;
        self.device2 = None;
        self.fds.clear();
        self.sysfs_remove = None;
    }

    /// Write the sysfs `remove` file of the first device.
    ///
    /// # Errors
    /// Fails if setup has not run or nothing was written.
    pub fn remove(&self) -> IgtResult<usize> {
        let path = self
            .sysfs_remove
            .as_deref()
            .ok_or_else(|| IgtError::InvalidArgument("no device set up for removal".into()))?;
        log::info!("removing {}", path.display());
        written(path, trigger(path)?)
    }

    /// Write `/sys/bus/pci/rescan`.
    ///
    /// # Errors
    /// Fails if the write fails or writes nothing.
    pub fn rescan(&self) -> IgtResult<usize> {
        let path = self.config.pci_rescan_path();
        log::info!("rescanning PCI bus");
        written(&path, trigger(&path)?)
    }

    /// Start a thread that submits NOP IBs on GFX ring 0 of the first device
    /// until [`wait_cs_thread`](Self::wait_cs_thread). Returns once the thread
    /// has its buffers set up and is about to submit.
    ///
    /// # Errors
    /// Returns the thread's setup error if it stopped before starting.
    pub fn create_cs_thread(&self) -> IgtResult<JoinHandle<IgtResult<u64>>> {
        spawn_cs_thread(self.device()?, &self.do_cs)
    }

    /// Stop the CS thread and collect its submission count.
    ///
    /// # Errors
    /// Returns the thread's teardown error, or `General` if it panicked.
    pub fn wait_cs_thread(&self, handle: JoinHandle<IgtResult<u64>>) -> IgtResult<u64> {
        join_cs_thread(&self.do_cs, handle)
    }

    fn run(&mut self, setup: &PciUnplugSetup, with_cs: bool) -> IgtResult<()> {
        self.setup_test(setup)?;

        let thread = if with_cs {
            match self.create_cs_thread() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    self.teardown_test();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let removed = self.remove();
        let joined = thread.map(|handle| self.wait_cs_thread(handle));
        self.teardown_test();
        removed?;
        match joined {
            Some(Ok(submits)) => log::info!("CS thread made {submits} submissions"),
            Some(Err(e)) => log::warn!("CS thread after unplug: {e}"),
            None => {}
        }

        self.rescan().map(|_| ())
    }

    /// setup, remove, teardown, rescan.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub fn hotunplug_simple(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        self.run(setup, false)
    }

    /// Like [`hotunplug_simple`](Self::hotunplug_simple) with NOP submissions
    /// running on the device while it is removed.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub fn hotunplug_with_cs(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        let setup = PciUnplugSetup {
            open_device: true,
            ..*setup
        };
        self.run(&setup, true)
    }

    /// Remove the device while a VRAM BO of it is exported as a dma-buf and
    /// mapped, then write through the stale mapping and release the BO.
    ///
    /// # Errors
    /// Returns the first failing step. The VA unmap after removal is
    /// expected to fail and is only logged.
    pub fn hotunplug_with_exported_bo(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        let setup = PciUnplugSetup {
            open_device: true,
            ..*setup
        };
        self.setup_test(&setup)?;
        let exported = self
            .device()
            .and_then(|device| export_vram_bo(&device).map(|exported| (device, exported)));
        let (device, ExportedBo { bo, dma_buf, cpu }) = match exported {
            Ok(exported) => exported,
            Err(e) => {
                self.teardown_test();
                return Err(e);
            }
        };

        let removed = self.remove();
        self.teardown_test();
        removed?;

        if let Some(cpu) = cpu {
            cpu.write_u32(0, STALE_WRITE);
        }

        if let Err(e) = device.gem_va(
            AMDGPU_VA_OP_UNMAP,
            bo.handle,
            bo.gpu_va,
            bo.size,
            MemoryType::Default.va_flags(),
        ) {
            log::info!("VA unmap after unplug failed as expected: {e}");
        }
        device.va_range_free(bo.gpu_va, bo.size);
        if let Err(e) = device.drm().gem_close(bo.handle) {
            log::info!("GEM_CLOSE after unplug: {e}");
        }
        drop(dma_buf);
        drop(device);

        self.rescan().map(|_| ())
    }

    /// Share a submission fence of device 1 with device 2 through a syncobj
    /// fd, remove device 1 and wait on the fence from device 2.
    ///
    /// Skipped (with a warning) on systems with a single GPU.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub fn hotunplug_with_exported_fence(&mut self, setup: &PciUnplugSetup) -> IgtResult<()> {
        let setup = PciUnplugSetup {
            open_device: true,
            open_device2: true,
            ..*setup
        };
        match self.setup_test(&setup) {
            Ok(()) => {}
            Err(IgtError::Unsupported(reason)) => {
                log::warn!("SKIP exported fence unplug: {reason}");
                self.teardown_test();
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        let shared = self.device().and_then(|device| {
            let device2 = self.device2()?;
            let shared = export_nop_fence(&device)?;
            let imported = device2
                .drm()
                .syncobj_fd_to_handle(&shared)
                .map_err(|e| IgtError::driver("SYNCOBJ_FD_TO_HANDLE", &e))?;
            Ok((device2, imported))
        });
        let (device2, imported) = match shared {
            Ok(shared) => shared,
            Err(e) => {
                self.teardown_test();
                return Err(e);
            }
        };

        let waited = self.remove().and_then(|_| {
            let deadline = monotonic_ns().saturating_add(IMPORTED_FENCE_WAIT_NS);
            let deadline = i64::try_from(deadline).unwrap_or(i64::MAX);
            device2
                .drm()
                .syncobj_wait(&[imported], deadline, 0)
                .map_err(|e| IgtError::driver("SYNCOBJ_WAIT", &e))
        });
        let destroyed = device2
            .drm()
            .syncobj_destroy(imported)
            .map_err(|e| IgtError::driver("SYNCOBJ_DESTROY", &e));
        drop(device2);
        self.teardown_test();
        waited?;
        destroyed?;

        self.rescan().map(|_| ())
    }
}

fn check_minor(device: &AmdgpuDevice, required: u32) -> IgtResult<()> {
    let minor = device.version().minor;
    if minor < required {
        return Err(IgtError::Unsupported(format!(
            "amdgpu DRM minor {minor} < required {required}"
        )));
    }
    Ok(())
}

fn require_devices(setup: &PciUnplugSetup, found: usize) -> IgtResult<()> {
    if setup.open_device && setup.open_device2 && found < 2 {
        return Err(IgtError::Unsupported(
            "more than 1 GPU is required for this test".into(),
        ));
    }
    Ok(())
}

fn written(path: &Path, count: usize) -> IgtResult<usize> {
    if count == 0 {
        return Err(IgtError::General(format!("nothing written to {}", path.display())));
    }
    Ok(count)
}

fn nop_request(ib_va: u64, bo_list: u32) -> CsRequest {
    CsRequest {
        ip_type: AMDGPU_HW_IP_GFX,
        ip_instance: 0,
        ring: 0,
        bo_list,
        ibs: vec![IbInfo {
            gpu_va: ib_va,
            size_dw: NOP_IB_DWORDS,
            flags: 0,
        }],
        seq_no: 0,
    }
}

/// Run `body` with a NOP request on a fresh context, releasing the IB, the
/// BO list and the context whatever `body` returns.
fn with_nop_request<B, T, F>(backend: &B, body: F) -> IgtResult<T>
where
    B: SubmitBackend + ?Sized,
    F: FnOnce(u32, CsRequest) -> IgtResult<T>,
{
    let ctx_id = backend.ctx_create()?;
    let outcome = backend
        .alloc_and_map(&BoRequest::new(NOP_IB_SIZE).alignment(4096).gtt())
        .and_then(|ib| {
            ib.cpu.fill(0, ib.cpu.len());
            for index in 0..NOP_IB_DWORDS as usize {
                ib.cpu.write_u32(index, GFX_COMPUTE_NOP);
            }
            let outcome = backend.bo_list_create(&[ib.handle()]).and_then(|bo_list| {
                let result = body(ctx_id, nop_request(ib.gpu_va(), bo_list));
                let destroyed = backend.bo_list_destroy(bo_list);
                let value = result?;
                destroyed?;
                Ok(value)
            });
            let freed = backend.unmap_and_free(ib);
            let value = outcome?;
            freed?;
            Ok(value)
        });
    let released = backend.ctx_free(ctx_id);
    let value = outcome?;
    released?;
    Ok(value)
}

fn nop_cs_loop<B: SubmitBackend + ?Sized>(
    backend: &B,
    do_cs: &AtomicBool,
    started: &mpsc::Sender<()>,
) -> IgtResult<u64> {
    with_nop_request(backend, |ctx_id, mut request| {
        // the receiver only cares that the loop is about to start
        let _ = started.send(());

        let mut submits = 0u64;
        while do_cs.load(Ordering::SeqCst) {
            if backend.cs_submit(ctx_id, &mut request).is_ok() {
                submits += 1;
            }
        }
        log::debug!("CS thread stopping after {submits} submissions");

        // the device is gone by now; teardown errors are expected
        let fence = request.fence(ctx_id);
        if let Err(e) = backend.fence_wait(&fence, backend.fence_timeout_ns()) {
            log::debug!("final fence wait: {e}");
        }
        Ok(submits)
    })
}

/// Start a thread submitting NOP IBs on GFX ring 0 of `backend` until
/// `do_cs` clears. Returns once the thread has its buffers set up and is
/// about to submit.
///
/// # Errors
/// Returns the thread's setup error if it stopped before starting.
pub fn spawn_cs_thread<B>(
    backend: Arc<B>,
    do_cs: &Arc<AtomicBool>,
) -> IgtResult<JoinHandle<IgtResult<u64>>>
where
    B: SubmitBackend + Send + Sync + 'static,
{
    do_cs.store(true, Ordering::SeqCst);
    let flag = Arc::clone(do_cs);
    let (started_tx, started_rx) = mpsc::channel();

    let handle = thread::Builder::new()
        .name("amdgpu-nop-cs".into())
        .spawn(move || nop_cs_loop(&*backend, &flag, &started_tx))?;

    if started_rx.recv().is_err() {
        do_cs.store(false, Ordering::SeqCst);
        return match handle.join() {
            Ok(Err(e)) => Err(e),
            _ => Err(IgtError::General("CS thread exited before starting".into())),
        };
    }
    Ok(handle)
}

/// Clear `do_cs` and join the thread from [`spawn_cs_thread`].
///
/// # Errors
/// Returns the thread's teardown error, or `General` if it panicked.
pub fn join_cs_thread(do_cs: &AtomicBool, handle: JoinHandle<IgtResult<u64>>) -> IgtResult<u64> {
    do_cs.store(false, Ordering::SeqCst);
    handle
        .join()
        .unwrap_or_else(|_| Err(IgtError::General("CS thread panicked".into())))
}

/// Submit one NOP IB on device 1 and export its fence as a syncobj fd.
fn export_nop_fence(device: &AmdgpuDevice) -> IgtResult<OwnedFd> {
    with_nop_request(device, |ctx_id, mut request| {
        submit_and_export(device, ctx_id, &mut request)
    })
}

struct ExportedBo {
    bo: GpuBo,
    dma_buf: OwnedFd,
    cpu: Option<CpuMapping>,
}

/// A CPU-visible VRAM BO exported as a dma-buf. The BO is freed again if the
/// export fails.
fn export_vram_bo(device: &AmdgpuDevice) -> IgtResult<ExportedBo> {
    let bo = device.gpu_mem_alloc(
        &BoRequest::new(4096)
            .alignment(4096)
            .vram()
            .flags(GemCreateFlags::CPU_ACCESS_REQUIRED),
    )?;
    let dma_buf = match device.bo_export_dmabuf(bo.handle) {
        Ok(fd) => fd,
        Err(e) => {
            if let Err(free_err) = device.gpu_mem_free(bo) {
                log::warn!("freeing BO {} after failed export: {free_err}", bo.handle);
            }
            return Err(e);
        }
    };
    let cpu = match device.gem_mmap(bo.handle, bo.size) {
        Ok(cpu) => Some(cpu),
        Err(e) => {
            log::warn!("CPU map of exported BO failed: {e}");
            None
        }
    };
    Ok(ExportedBo { bo, dma_buf, cpu })
}

fn submit_and_export(
    device: &AmdgpuDevice,
    ctx_id: u32,
    request: &mut CsRequest,
) -> IgtResult<OwnedFd> {
    request.seq_no = device.cs_submit(ctx_id, request)?;
    let syncobj =
        device.fence_to_handle(&request.fence(ctx_id), AMDGPU_FENCE_TO_HANDLE_GET_SYNCOBJ)?;
    let fd = device
        .drm()
        .syncobj_handle_to_fd(syncobj)
        .map_err(|e| IgtError::driver("SYNCOBJ_HANDLE_TO_FD", &e));
    // the exported fd keeps the fence alive
    let destroyed = device
        .drm()
        .syncobj_destroy(syncobj)
        .map_err(|e| IgtError::driver("SYNCOBJ_DESTROY", &e));
    let fd = fd?;
    destroyed?;
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amdgpu::cs::testing::HostBackend;
    use assert_matches::assert_matches;
    use std::fs;
    use std::time::{Duration, Instant};

    #[test]
    fn trigger_writes_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remove");
        fs::write(&path, b"").unwrap();
        assert_eq!(trigger(&path).unwrap(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"1");
    }

    #[test]
    fn trigger_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(trigger(&dir.path().join("nope")), Err(IgtError::Io(_)));
    }

    #[test]
    fn rescan_goes_through_sysfs_root() {
        let root = tempfile::tempdir().unwrap();
        let bus = root.path().join("bus/pci");
        fs::create_dir_all(&bus).unwrap();
        fs::write(bus.join("rescan"), b"").unwrap();

        let unplug = PciUnplug::new(IgtConfig::default().with_sysfs_root(root.path()));
        assert_eq!(unplug.rescan().unwrap(), 1);
        assert_eq!(fs::read(bus.join("rescan")).unwrap(), b"1");
    }

    #[test]
    fn remove_needs_setup() {
        let unplug = PciUnplug::new(IgtConfig::default());
        assert_eq!(unplug.num_devices(), 0);
        assert!(unplug.sysfs_remove().is_none());
        assert_matches!(unplug.remove(), Err(IgtError::InvalidArgument(_)));
        assert_matches!(unplug.device(), Err(IgtError::InvalidArgument(_)));
    }

    #[test]
    fn setup_without_devices() {
        let dri = tempfile::tempdir().unwrap();
        let mut unplug = PciUnplug::new(IgtConfig::default().with_dri_dir(dri.path()));
        assert_matches!(
            unplug.hotunplug_simple(&PciUnplugSetup::default()),
            Err(IgtError::DeviceNotFound)
        );
    }

    fn wait_for_submits(backend: &HostBackend, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.state().submits < count {
            assert!(Instant::now() < deadline, "CS thread never submitted");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn cs_thread_submits_until_stopped() {
        let backend = Arc::new(HostBackend::default());
        let do_cs = Arc::new(AtomicBool::new(false));

        let handle = spawn_cs_thread(Arc::clone(&backend), &do_cs).unwrap();
        assert!(do_cs.load(Ordering::SeqCst));
        // started means the IB, BO list and context are all in place
        {
            let state = backend.state();
            assert_eq!(state.contexts.len(), 1);
            assert_eq!(state.bos.len(), 1);
            assert_eq!(state.bo_lists.len(), 1);
        }
        wait_for_submits(&backend, 3);

        let submits = join_cs_thread(&do_cs, handle).unwrap();
        assert!(!do_cs.load(Ordering::SeqCst));
        assert!(submits >= 3);
        assert_eq!(backend.state().submits, submits);
        backend.assert_released();
    }

    #[test]
    fn cs_thread_final_wait_uses_the_fence_timeout() {
        let backend = Arc::new(HostBackend {
            fence_timeout_ns: Some(2_000_000),
            ..HostBackend::default()
        });
        let do_cs = Arc::new(AtomicBool::new(false));

        let handle = spawn_cs_thread(Arc::clone(&backend), &do_cs).unwrap();
        join_cs_thread(&do_cs, handle).unwrap();
        assert_eq!(backend.state().wait_timeouts, [2_000_000]);
    }

    #[test]
    fn cs_thread_setup_failure_is_reported() {
        let backend = Arc::new(HostBackend {
            fail_alloc: true,
            ..HostBackend::default()
        });
        let do_cs = Arc::new(AtomicBool::new(false));

        assert_matches!(
            spawn_cs_thread(Arc::clone(&backend), &do_cs),
            Err(IgtError::OutOfMemory)
        );
        assert!(!do_cs.load(Ordering::SeqCst));
        assert_eq!(backend.state().submits, 0);
        backend.assert_released();
    }

    #[test]
    fn nop_request_releases_everything_when_the_bo_list_fails() {
        let backend = HostBackend {
            fail_bo_list: true,
            ..HostBackend::default()
        };
        let result = with_nop_request(&backend, |_, _| -> IgtResult<()> {
            panic!("body must not run without a BO list")
        });
        assert_matches!(result, Err(IgtError::Driver { errno: libc::ENOMEM, .. }));
        backend.assert_released();
    }

    #[test]
    fn nop_request_releases_everything_when_the_body_fails() {
        let backend = HostBackend::default();
        let result = with_nop_request(&backend, |ctx_id, mut request| {
            assert_eq!(request.ibs[0].size_dw, NOP_IB_DWORDS);
            backend.cs_submit(ctx_id, &mut request)?;
            Err::<(), _>(IgtError::WaitTimeout)
        });
        assert_matches!(result, Err(IgtError::WaitTimeout));
        assert_eq!(backend.state().submits, 1);
        backend.assert_released();
    }

    #[test]
    fn second_gpu_is_only_needed_with_both_devices() {
        let both = PciUnplugSetup {
            open_device: true,
            open_device2: true,
            ..PciUnplugSetup::default()
        };
        assert_matches!(require_devices(&both, 1), Err(IgtError::Unsupported(_)));
        assert_matches!(require_devices(&both, 2), Ok(()));

        let single = PciUnplugSetup {
            open_device: true,
            ..PciUnplugSetup::default()
        };
        assert_matches!(require_devices(&single, 1), Ok(()));
    }

    #[test]
    fn failed_setup_leaves_nothing_open() {
        let dri = tempfile::tempdir().unwrap();
        let config = IgtConfig::default().with_dri_dir(dri.path());
        let mut unplug = PciUnplug::new(config);

        // no GPU at all is an error, not the single-GPU skip
        assert_matches!(
            unplug.hotunplug_with_exported_fence(&PciUnplugSetup::default()),
            Err(IgtError::DeviceNotFound)
        );
        assert_matches!(
            unplug.hotunplug_with_cs(&PciUnplugSetup::default()),
            Err(IgtError::DeviceNotFound)
        );
        assert_matches!(
            unplug.hotunplug_with_exported_bo(&PciUnplugSetup::default()),
            Err(IgtError::DeviceNotFound)
        );
        assert_eq!(unplug.num_devices(), 0);
        assert!(unplug.sysfs_remove().is_none());
        assert_matches!(unplug.device(), Err(IgtError::InvalidArgument(_)));
    }
}

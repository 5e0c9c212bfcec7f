use crate::amdgpu::memory::{BoRequest, MappedBo};
use crate::config::TIMEOUT_INFINITE;
use crate::drm::ioctl::InfoHwIp;
use crate::error::IgtResult;

/// One indirect buffer of a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IbInfo {
    pub gpu_va: u64,
    pub size_dw: u32,
    pub flags: u32,
}

/// A command-submission request. `seq_no` is filled in by the submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsRequest {
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub bo_list: u32,
    pub ibs: Vec<IbInfo>,
    pub seq_no: u64,
}

impl CsRequest {
    /// The fence that signals when this request retires.
    #[must_use]
    pub const fn fence(&self, ctx_id: u32) -> CsFence {
        CsFence {
            ctx_id,
            ip_type: self.ip_type,
            ip_instance: self.ip_instance,
            ring: self.ring,
            seq_no: self.seq_no,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsFence {
    pub ctx_id: u32,
    pub ip_type: u32,
    pub ip_instance: u32,
    pub ring: u32,
    pub seq_no: u64,
}

/// The driver operations the submission helpers need.
///
/// `AmdgpuDevice` implements this over the real ioctls; tests supply a
/// host-memory implementation.
pub trait SubmitBackend {
    fn query_hw_ip_info(&self, ip_type: u32, ip_instance: u32) -> IgtResult<InfoHwIp>;

    fn ctx_create(&self) -> IgtResult<u32>;

    fn ctx_free(&self, ctx_id: u32) -> IgtResult<()>;

    /// Create a BO, bind it into the GPU VM and map it for the CPU.
    fn alloc_and_map(&self, request: &BoRequest) -> IgtResult<MappedBo>;

    fn unmap_and_free(&self, bo: MappedBo) -> IgtResult<()>;

    fn bo_list_create(&self, handles: &[u32]) -> IgtResult<u32>;

    fn bo_list_destroy(&self, list: u32) -> IgtResult<()>;

    /// Submit `request` on `ctx_id` and store the returned sequence number in it.
    fn cs_submit(&self, ctx_id: u32, request: &mut CsRequest) -> IgtResult<()>;

    /// Wait for `fence`. Returns `true` once it has signalled, `false` on timeout.
    fn fence_wait(&self, fence: &CsFence, timeout_ns: u64) -> IgtResult<bool>;

    /// Timeout the submission flows pass to [`fence_wait`](Self::fence_wait).
    fn fence_timeout_ns(&self) -> u64 {
        TIMEOUT_INFINITE
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::amdgpu::memory::{CpuMapping, GpuBo};
    use crate::error::IgtError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// What [`HostBackend`] currently holds and has been asked to do.
    #[derive(Debug, Default)]
    pub struct HostState {
        pub next_id: u32,
        pub contexts: HashSet<u32>,
        pub bos: HashSet<u32>,
        pub bo_lists: HashSet<u32>,
        pub submits: u64,
        pub wait_timeouts: Vec<u64>,
    }

    impl HostState {
        fn next(&mut self) -> u32 {
            self.next_id += 1;
            self.next_id
        }
    }

    /// Accepts every submission without executing it. BOs are host memory.
    #[derive(Debug, Default)]
    pub struct HostBackend {
        pub fail_alloc: bool,
        pub fail_bo_list: bool,
        pub fence_timeout_ns: Option<u64>,
        pub state: Mutex<HostState>,
    }

    impl HostBackend {
        pub fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
            self.state.lock().unwrap()
        }

        pub fn assert_released(&self) {
            let state = self.state();
            assert!(state.contexts.is_empty(), "contexts: {:?}", state.contexts);
            assert!(state.bos.is_empty(), "bos: {:?}", state.bos);
            assert!(state.bo_lists.is_empty(), "bo lists: {:?}", state.bo_lists);
        }
    }

    impl SubmitBackend for HostBackend {
        fn query_hw_ip_info(&self, _ip_type: u32, _ip_instance: u32) -> IgtResult<InfoHwIp> {
            Ok(InfoHwIp {
                available_rings: 1,
                ..InfoHwIp::default()
            })
        }

        fn ctx_create(&self) -> IgtResult<u32> {
            let mut state = self.state();
            let id = state.next();
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
            if self.fail_alloc {
                return Err(IgtError::OutOfMemory);
            }
            let mut state = self.state();
            let handle = state.next();
            state.bos.insert(handle);
            Ok(MappedBo {
                bo: GpuBo {
                    handle,
                    gpu_va: u64::from(handle) << 20,
                    size: request.size,
                },
                cpu: CpuMapping::host(usize::try_from(request.size).unwrap()),
            })
        }

        fn unmap_and_free(&self, bo: MappedBo) -> IgtResult<()> {
            if self.state().bos.remove(&bo.handle()) {
                Ok(())
            } else {
                Err(IgtError::InvalidArgument(format!("bo {}", bo.handle())))
            }
        }

        fn bo_list_create(&self, _handles: &[u32]) -> IgtResult<u32> {
            if self.fail_bo_list {
                return Err(IgtError::Driver {
                    op: "AMDGPU_BO_LIST",
                    errno: libc::ENOMEM,
                });
            }
            let mut state = self.state();
            let id = state.next();
            state.bo_lists.insert(id);
            Ok(id)
        }

        fn bo_list_destroy(&self, list: u32) -> IgtResult<()> {
            if self.state().bo_lists.remove(&list) {
                Ok(())
            } else {
                Err(IgtError::InvalidArgument(format!("bo list {list}")))
            }
        }

        fn cs_submit(&self, _ctx_id: u32, request: &mut CsRequest) -> IgtResult<()> {
            let mut state = self.state();
            state.submits += 1;
            request.seq_no = state.submits;
            Ok(())
        }

        fn fence_wait(&self, _fence: &CsFence, timeout_ns: u64) -> IgtResult<bool> {
            self.state().wait_timeouts.push(timeout_ns);
            Ok(true)
        }

        fn fence_timeout_ns(&self) -> u64 {
            self.fence_timeout_ns.unwrap_or(TIMEOUT_INFINITE)
        }
    }
}

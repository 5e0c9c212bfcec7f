use crate::drm::ioctl::{
    DRM_CLOEXEC, DRM_IOCTL_GEM_CLOSE, DRM_IOCTL_PRIME_FD_TO_HANDLE, DRM_IOCTL_PRIME_HANDLE_TO_FD,
    DRM_IOCTL_SYNCOBJ_CREATE, DRM_IOCTL_SYNCOBJ_DESTROY, DRM_IOCTL_SYNCOBJ_FD_TO_HANDLE,
    DRM_IOCTL_SYNCOBJ_HANDLE_TO_FD, DRM_IOCTL_SYNCOBJ_WAIT, DRM_IOCTL_VERSION, DRM_RDWR,
    DrmGemClose, DrmPrimeHandle, DrmSyncobjCreate, DrmSyncobjDestroy, DrmSyncobjHandle,
    DrmSyncobjWait, DrmVersion,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kernel driver version as reported by `DRM_IOCTL_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub patchlevel: u32,
    pub name: String,
}

/// A handle to a DRM character device (`/dev/dri/cardN` or `/dev/dri/renderDN`).
///
/// The file is wrapped in an `Arc`, so clones are cheap and can outlive the
/// object that opened them (a CS thread, an exported BO).
#[derive(Clone, Debug)]
pub struct DrmDevice {
    pub file: Arc<File>,
    path: PathBuf,
}

impl DrmDevice {
    /// Opens a DRM node read-write.
    ///
    /// # Errors
    /// Returns an error if the node cannot be opened (missing driver, permissions).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// `(major, minor)` of the character device behind the fd.
    ///
    /// # Errors
    /// Returns an error if `fstat` fails or the fd is not a character device.
    pub fn rdev(&self) -> io::Result<(u32, u32)> {
        let meta = self.file.metadata()?;
        if meta.mode() & libc::S_IFMT != libc::S_IFCHR {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a character device",
            ));
        }
        let rdev = meta.rdev();
        Ok((libc::major(rdev), libc::minor(rdev)))
    }

    /// Generic unsafe helper to execute an IOCTL, retrying on `EINTR`/`EAGAIN`
    /// the way libdrm's `drmIoctl` does.
    ///
    /// # Safety
    /// The caller must ensure that `arg` points to valid memory appropriate for the specific `cmd`.
    pub(crate) unsafe fn ioctl<T>(&self, cmd: u32, arg: &mut T) -> io::Result<()> {
        loop {
            let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), cmd as _, arg as *mut T) };
            if ret >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR | libc::EAGAIN) => {}
                _ => return Err(err),
            }
        }
    }

    // ===========================================================================================
    // Versioning
    // ===========================================================================================

    /// Query driver name and version.
    pub fn version(&self) -> io::Result<DriverVersion> {
        let mut args = DrmVersion::default();
        unsafe {
            self.ioctl(DRM_IOCTL_VERSION, &mut args)?;
        }

        let mut name = vec![0u8; args.name_len];
        let mut second = DrmVersion {
            name_len: name.len(),
            name: name.as_mut_ptr() as u64,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_VERSION, &mut second)?;
        }
        name.truncate(second.name_len.min(name.len()));

        #[allow(clippy::cast_sign_loss)]
        Ok(DriverVersion {
            major: second.version_major as u32,
            minor: second.version_minor as u32,
            patchlevel: second.version_patchlevel as u32,
            name: String::from_utf8_lossy(&name).into_owned(),
        })
    }

    // ===========================================================================================
    // GEM and PRIME
    // ===========================================================================================

    pub fn gem_close(&self, handle: u32) -> io::Result<()> {
        let mut args = DrmGemClose { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_GEM_CLOSE, &mut args) }
    }

    /// Export a GEM handle as a dma-buf fd.
    pub fn prime_handle_to_fd(&self, handle: u32) -> io::Result<OwnedFd> {
        let mut args = DrmPrimeHandle {
            handle,
            flags: DRM_CLOEXEC | DRM_RDWR,
            fd: -1,
        };
        unsafe {
            self.ioctl(DRM_IOCTL_PRIME_HANDLE_TO_FD, &mut args)?;
            Ok(OwnedFd::from_raw_fd(args.fd))
        }
    }

    pub fn prime_fd_to_handle(&self, fd: &impl AsRawFd) -> io::Result<u32> {
        let mut args = DrmPrimeHandle {
            fd: fd.as_raw_fd(),
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut args)?;
        }
        Ok(args.handle)
    }

    // ===========================================================================================
    // Sync objects
    // ===========================================================================================

    pub fn syncobj_create(&self, flags: u32) -> io::Result<u32> {
        let mut args = DrmSyncobjCreate { handle: 0, flags };
        unsafe {
            self.ioctl(DRM_IOCTL_SYNCOBJ_CREATE, &mut args)?;
        }
        Ok(args.handle)
    }

    pub fn syncobj_destroy(&self, handle: u32) -> io::Result<()> {
        let mut args = DrmSyncobjDestroy { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_SYNCOBJ_DESTROY, &mut args) }
    }

    pub fn syncobj_handle_to_fd(&self, handle: u32) -> io::Result<OwnedFd> {
        let mut args = DrmSyncobjHandle {
            handle,
            fd: -1,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_SYNCOBJ_HANDLE_TO_FD, &mut args)?;
            Ok(OwnedFd::from_raw_fd(args.fd))
        }
    }

    pub fn syncobj_fd_to_handle(&self, fd: &impl AsRawFd) -> io::Result<u32> {
        let mut args = DrmSyncobjHandle {
            fd: fd.as_raw_fd(),
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_SYNCOBJ_FD_TO_HANDLE, &mut args)?;
        }
        Ok(args.handle)
    }

    /// Wait for sync objects. `deadline_ns` is an absolute `CLOCK_MONOTONIC` time.
    ///
    /// Returns the index of the first signalled handle.
    pub fn syncobj_wait(&self, handles: &[u32], deadline_ns: i64, flags: u32) -> io::Result<u32> {
        let mut args = DrmSyncobjWait {
            handles: handles.as_ptr() as u64,
            timeout_nsec: deadline_ns,
            count_handles: u32::try_from(handles.len())
                .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?,
            flags,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_SYNCOBJ_WAIT, &mut args)?;
        }
        Ok(args.first_signaled)
    }
}

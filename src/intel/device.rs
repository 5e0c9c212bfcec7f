#![allow(clippy::cast_possible_truncation)]

use crate::amdgpu::memory::CpuMapping;
use crate::drm::device::{DriverVersion, DrmDevice};
use crate::drm::ioctl::{
    DRM_IOCTL_I915_GEM_CREATE, DRM_IOCTL_I915_GEM_EXECBUFFER2, DRM_IOCTL_I915_GEM_MMAP_OFFSET,
    DRM_IOCTL_I915_GEM_PREAD, DRM_IOCTL_I915_GEM_PWRITE, DRM_IOCTL_I915_GEM_WAIT,
    DRM_IOCTL_I915_GETPARAM, I915_MMAP_OFFSET_FIXED, I915_MMAP_OFFSET_WB, I915_MMAP_OFFSET_WC,
    I915_PARAM_CHIPSET_ID, I915Execbuffer2, I915GemCreate, I915GemMmapOffset, I915GemRw,
    I915GemWait, I915GetParam,
};
use crate::error::{IgtError, IgtResult};
use crate::intel::batchbuffer::{BatchExecutor, ExecBatch};
use crate::intel::devinfo::{DeviceInfo, device_info};
use std::ptr::NonNull;

/// An open i915 render or primary node.
#[derive(Debug, Clone)]
pub struct I915Device {
    drm: DrmDevice,
    version: DriverVersion,
    info: DeviceInfo,
}

impl I915Device {
    /// Check the driver and identify the GPU.
    ///
    /// # Errors
    /// Returns `Unsupported` for another driver or an unknown device id.
    pub fn open(drm: DrmDevice) -> IgtResult<Self> {
        let version = drm.version()?;
        if version.name != "i915" {
            return Err(IgtError::Unsupported(format!(
                "{} is driven by {}, not i915",
                drm.path().display(),
                version.name
            )));
        }

        let devid = getparam(&drm, I915_PARAM_CHIPSET_ID)?;
        let devid = u16::try_from(devid)
            .map_err(|_| IgtError::General(format!("chipset id 0x{devid:x}")))?;
        let info = *device_info(devid)
            .ok_or_else(|| IgtError::Unsupported(format!("unknown Intel device 0x{devid:04x}")))?;

        log::info!(
            "i915 {}.{}.{} on {}: device 0x{devid:04x} ({}, graphics {})",
            version.major,
            version.minor,
            version.patchlevel,
            drm.path().display(),
            info.codename,
            info.graphics_ver
        );
        Ok(Self { drm, version, info })
    }

    #[must_use]
    pub const fn drm(&self) -> &DrmDevice {
        &self.drm
    }

    #[must_use]
    pub const fn version(&self) -> &DriverVersion {
        &self.version
    }

    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Read `data.len()` bytes of a BO at `offset`.
    ///
    /// # Errors
    /// Returns the ioctl error.
    pub fn gem_read(&self, handle: u32, offset: u64, data: &mut [u8]) -> IgtResult<()> {
        let mut args = I915GemRw {
            handle,
            pad: 0,
            offset,
            size: data.len() as u64,
            data_ptr: data.as_mut_ptr() as u64,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_PREAD, &mut args) }
            .map_err(|e| IgtError::driver("I915_GEM_PREAD", &e))
    }

    /// Map a BO for the CPU through `GEM_MMAP_OFFSET`.
    ///
    /// Discrete parts only accept the fixed mapping type; integrated ones get
    /// write-back, falling back to write-combined.
    ///
    /// # Errors
    /// Returns the ioctl or `mmap` error.
    pub fn gem_mmap(&self, handle: u32, size: u64) -> IgtResult<CpuMapping> {
        let mut last = None;
        for flags in [I915_MMAP_OFFSET_FIXED, I915_MMAP_OFFSET_WB, I915_MMAP_OFFSET_WC] {
            let mut args = I915GemMmapOffset {
                handle,
                flags,
                ..Default::default()
            };
            match unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_MMAP_OFFSET, &mut args) } {
                Ok(()) => return self.map_fake_offset(args.offset, size),
                Err(e) => last = Some(e),
            }
        }
        Err(match last {
            Some(e) => IgtError::driver("I915_GEM_MMAP_OFFSET", &e),
            None => IgtError::General("no mmap type".into()),
        })
    }

    fn map_fake_offset(&self, offset: u64, size: u64) -> IgtResult<CpuMapping> {
        let len = usize::try_from(size)
            .map_err(|_| IgtError::InvalidArgument(format!("mapping of {size} bytes")))?;
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| IgtError::General(format!("mmap offset 0x{offset:x}")))?;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.drm.raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| IgtError::General("mmap returned NULL".into()))?;
        Ok(unsafe { CpuMapping::from_mmap(ptr, len) })
    }
}

fn getparam(drm: &DrmDevice, param: i32) -> IgtResult<u32> {
    let mut value: i32 = 0;
    let mut args = I915GetParam {
        param,
        pad: 0,
        value: std::ptr::addr_of_mut!(value) as u64,
    };
    unsafe { drm.ioctl(DRM_IOCTL_I915_GETPARAM, &mut args) }
        .map_err(|e| IgtError::driver("I915_GETPARAM", &e))?;
    u32::try_from(value).map_err(|_| IgtError::General(format!("param {param} = {value}")))
}

impl BatchExecutor for I915Device {
    fn gem_create(&self, size: u64) -> IgtResult<u32> {
        let mut args = I915GemCreate {
            size,
            ..Default::default()
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_CREATE, &mut args) }
            .map_err(|e| IgtError::driver("I915_GEM_CREATE", &e))?;
        Ok(args.handle)
    }

    fn gem_write(&self, handle: u32, offset: u64, data: &[u8]) -> IgtResult<()> {
        let mut args = I915GemRw {
            handle,
            pad: 0,
            offset,
            size: data.len() as u64,
            data_ptr: data.as_ptr() as u64,
        };
        unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_PWRITE, &mut args) }
            .map_err(|e| IgtError::driver("I915_GEM_PWRITE", &e))
    }

    fn gem_close(&self, handle: u32) -> IgtResult<()> {
        self.drm
            .gem_close(handle)
            .map_err(|e| IgtError::driver("GEM_CLOSE", &e))
    }

    fn execbuf(&self, exec: &mut ExecBatch<'_>) -> IgtResult<()> {
        let mut args = I915Execbuffer2 {
            buffers_ptr: exec.objects.as_mut_ptr() as u64,
            buffer_count: exec.objects.len() as u32,
            batch_len: exec.batch_len,
            flags: exec.flags,
            ..Default::default()
        };
        log::debug!(
            "[I915Device] execbuf: {} objects, {} relocs, {} bytes, flags 0x{:x}",
            args.buffer_count,
            exec.relocs.len(),
            exec.batch_len,
            exec.flags
        );
        unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_EXECBUFFER2, &mut args) }
            .map_err(|e| IgtError::driver("I915_GEM_EXECBUFFER2", &e))
    }

    fn gem_wait(&self, handle: u32, timeout_ns: i64) -> IgtResult<()> {
        let mut args = I915GemWait {
            bo_handle: handle,
            flags: 0,
            timeout_ns,
        };
        match unsafe { self.drm.ioctl(DRM_IOCTL_I915_GEM_WAIT, &mut args) } {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ETIME) => Err(IgtError::WaitTimeout),
            Err(e) => Err(IgtError::driver("I915_GEM_WAIT", &e)),
        }
    }
}

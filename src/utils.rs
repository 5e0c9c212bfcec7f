#![allow(clippy::used_underscore_items, clippy::cast_possible_truncation)]

const _IOC_NRBITS: u32 = 8;
const _IOC_TYPEBITS: u32 = 8;
const _IOC_SIZEBITS: u32 = 14;

const _IOC_NRSHIFT: u32 = 0;
const _IOC_TYPESHIFT: u32 = _IOC_NRSHIFT + _IOC_NRBITS;
const _IOC_SIZESHIFT: u32 = _IOC_TYPESHIFT + _IOC_TYPEBITS;
const _IOC_DIRSHIFT: u32 = _IOC_SIZESHIFT + _IOC_SIZEBITS;

const _IOC_NONE: u32 = 0;
const _IOC_WRITE: u32 = 1;
const _IOC_READ: u32 = 2;

/// `'d'`, the ioctl type shared by the DRM core and every driver.
pub const DRM_IOCTL_BASE: u32 = 0x64;
/// Driver-private ioctls start here.
pub const DRM_COMMAND_BASE: u32 = 0x40;

#[must_use]
pub const fn _ioc(dir: u32, type_: u32, nr: u32, size: usize) -> u32 {
    (dir << _IOC_DIRSHIFT)
        | (type_ << _IOC_TYPESHIFT)
        | (nr << _IOC_NRSHIFT)
        | ((size as u32) << _IOC_SIZESHIFT)
}

#[must_use]
pub const fn io(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_NONE, type_, nr, 0)
}

#[must_use]
pub const fn ior<T>(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_READ, type_, nr, std::mem::size_of::<T>())
}

#[must_use]
pub const fn iow<T>(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_WRITE, type_, nr, std::mem::size_of::<T>())
}

#[must_use]
pub const fn iowr<T>(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_READ | _IOC_WRITE, type_, nr, std::mem::size_of::<T>())
}

// ===============================================================================================
// DRM shorthands
// ===============================================================================================

#[must_use]
pub const fn drm_iow<T>(nr: u32) -> u32 {
    iow::<T>(DRM_IOCTL_BASE, nr)
}

#[must_use]
pub const fn drm_iowr<T>(nr: u32) -> u32 {
    iowr::<T>(DRM_IOCTL_BASE, nr)
}

/// Driver-specific command, offset from `DRM_COMMAND_BASE`.
#[must_use]
pub const fn drm_cmd_iow<T>(nr: u32) -> u32 {
    iow::<T>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + nr)
}

#[must_use]
pub const fn drm_cmd_iowr<T>(nr: u32) -> u32 {
    iowr::<T>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + nr)
}

// ===============================================================================================
// Arithmetic helpers
// ===============================================================================================

#[must_use]
pub const fn align_up(val: u64, align: u64) -> u64 {
    (val + align - 1) & !(align - 1)
}

#[must_use]
pub const fn lower_32_bits(val: u64) -> u32 {
    val as u32
}

#[must_use]
pub const fn upper_32_bits(val: u64) -> u32 {
    (val >> 32) as u32
}

/// Current `CLOCK_MONOTONIC` time in nanoseconds, the clock DRM uses for absolute timeouts.
#[must_use]
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime cannot fail for CLOCK_MONOTONIC with a valid pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &raw mut ts);
    }
    #[allow(clippy::cast_sign_loss)]
    let ns = (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64;
    ns
}

/// Converts a relative timeout into the absolute deadline DRM wait ioctls expect.
/// `u64::MAX` stays infinite.
#[must_use]
pub fn deadline_from_timeout(timeout_ns: u64) -> u64 {
    if timeout_ns == u64::MAX {
        return u64::MAX;
    }
    monotonic_ns().saturating_add(timeout_ns)
}

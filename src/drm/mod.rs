pub mod device;
pub mod ioctl;
pub mod sysfs;

pub use device::{DriverVersion, DrmDevice};

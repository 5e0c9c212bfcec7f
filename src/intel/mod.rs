pub mod batchbuffer;
pub mod buf;
pub mod device;
pub mod devinfo;
pub mod gpgpu_fill;
pub mod gpu_cmds;

pub use batchbuffer::{BATCH_SZ, BatchExecutor, BbObject, ExecBatch, IntelBb};
pub use buf::{IntelBuf, Tiling};
pub use device::I915Device;
pub use devinfo::{DeviceInfo, IpVer, device_info};
pub use gpgpu_fill::{FillPipeline, FillRegion, GpgpuFillFn, gpgpu_fillfunc};

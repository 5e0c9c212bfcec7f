pub mod cmd_base;
pub mod cs;
pub mod device;
pub mod dispatch;
pub mod ip_blocks;
pub mod memory;
pub mod pci_unplug;
pub mod pm4;
pub mod ring_context;
pub mod submission;

pub use cmd_base::CmdBase;
pub use cs::{CsFence, CsRequest, IbInfo, SubmitBackend};
pub use device::AmdgpuDevice;
pub use dispatch::CmdErrorType;
pub use ip_blocks::{IpBlockType, IpBlockVersion, IpBlocks, IpFuncs, setup_amdgpu_ip_blocks};
pub use memory::{BoRequest, CpuMapping, GemCreateFlags, GemDomain, GpuBo, MappedBo, MemoryType};
pub use pci_unplug::{PciUnplug, PciUnplugSetup};
pub use ring_context::{ErrCodes, RingContext, RingContextBuilder};

use clap::Parser;
use igt_gpu_tools::IgtConfig;
use igt_gpu_tools::amdgpu::ip_blocks::asic_rings_readiness;
use igt_gpu_tools::amdgpu::{AmdgpuDevice, IpBlockType};
use igt_gpu_tools::drm::sysfs::open_devices;

/// Print the IP blocks and ring readiness of every amdgpu device.
#[derive(Debug, Parser)]
struct Args {
    /// Open primary nodes instead of render nodes.
    #[arg(long)]
    primary: bool,

    /// Ring mask used for the readiness report.
    #[arg(long, default_value_t = 0b1)]
    ring_mask: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = IgtConfig::from_env();
    if args.primary {
        config.render_nodes = false;
    }

    println!("============================================================");
    println!("                 amdgpu Device Information                  ");
    println!("============================================================");

    for drm in open_devices(&config, "amdgpu")? {
        let path = drm.path().display().to_string();
        let device = AmdgpuDevice::initialize(drm)?;
        let version = device.version();
        let info = device.info();

        println!("\n[+] {path}");
        println!(
            "    Driver:      {} {}.{}.{}",
            version.name, version.major, version.minor, version.patchlevel
        );
        println!("    Device ID:   0x{:04x} (rev 0x{:x})", info.device_id, info.chip_rev);
        println!("    Family:      {}", info.family);
        println!("    CUs:         {}", info.cu_active_number);
        println!(
            "    VA window:   0x{:x} - 0x{:x}",
            info.virtual_address_offset, info.virtual_address_max
        );

        match device.ip_blocks() {
            Ok(blocks) => {
                println!("    IP blocks:");
                for block in blocks.iter() {
                    println!("      {:<8} v{}", block.ip_type.name(), block.major);
                }
            }
            Err(e) => println!("    IP blocks:   {e}"),
        }

        println!("    Engines:");
        let ready = asic_rings_readiness(&device, args.ring_mask);
        for (ip_type, ready) in IpBlockType::ALL.iter().zip(ready) {
            let count = device.query_hw_ip_count(ip_type.hw_ip()).unwrap_or(0);
            if count == 0 {
                continue;
            }
            let rings = device
                .query_hw_ip_info(ip_type.hw_ip(), 0)
                .map(|hw| hw.available_rings)
                .unwrap_or(0);
            println!(
                "      {:<8} instances {count}, rings 0b{rings:b}, ready {}",
                ip_type.name(),
                if ready { "yes" } else { "no" }
            );
        }
    }

    Ok(())
}

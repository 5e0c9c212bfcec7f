use clap::{Parser, ValueEnum};
use igt_gpu_tools::amdgpu::{PciUnplug, PciUnplugSetup};
use igt_gpu_tools::{IgtConfig, IgtError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Flow {
    Simple,
    WithCs,
    WithExportedBo,
    WithExportedFence,
}

/// Remove and rescan the first amdgpu device through sysfs.
///
/// This really unbinds the GPU; run it as root on a test machine.
#[derive(Debug, Parser)]
struct Args {
    /// Flows to run, in order. Defaults to all of them.
    #[arg(long, value_enum)]
    flow: Vec<Flow>,

    /// Lowest amdgpu DRM minor version to run on.
    #[arg(long, default_value_t = 0)]
    minor_version_req: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let flows = if args.flow.is_empty() {
        vec![
            Flow::Simple,
            Flow::WithCs,
            Flow::WithExportedBo,
            Flow::WithExportedFence,
        ]
    } else {
        args.flow
    };
    let setup = PciUnplugSetup {
        minor_version_req: args.minor_version_req,
        ..PciUnplugSetup::default()
    };

    println!("============================================================");
    println!("                   amdgpu PCI Hot-Unplug                    ");
    println!("============================================================");

    let mut unplug = PciUnplug::new(IgtConfig::from_env());
    for flow in flows {
        println!("[+] {flow:?}");
        let result = match flow {
            Flow::Simple => unplug.hotunplug_simple(&setup),
            Flow::WithCs => unplug.hotunplug_with_cs(&setup),
            Flow::WithExportedBo => unplug.hotunplug_with_exported_bo(&setup),
            Flow::WithExportedFence => unplug.hotunplug_with_exported_fence(&setup),
        };
        match result {
            Ok(()) => println!("    PASS"),
            Err(IgtError::Unsupported(reason)) => println!("    SKIP ({reason})"),
            Err(e) => {
                println!("    FAIL ({e})");
                // leave the bus in a usable state for whoever runs next
                if let Err(rescan) = unplug.rescan() {
                    log::error!("rescan after failure: {rescan}");
                }
                return Err(e.into());
            }
        }
    }
    Ok(())
}

use clap::Parser;
use igt_gpu_tools::amdgpu::dispatch::{memcpy_dispatch_test, memset_dispatch_test};
use igt_gpu_tools::amdgpu::submission::{
    const_fill_helper, copy_linear_helper, write_linear_helper,
};
use igt_gpu_tools::amdgpu::{AmdgpuDevice, IpBlockType};
use igt_gpu_tools::drm::sysfs::open_devices;
use igt_gpu_tools::{IgtConfig, IgtError, IgtResult};

/// Run the basic memory flows on every ring of the first amdgpu device.
#[derive(Debug, Parser)]
struct Args {
    /// Only run on this engine (gfx, compute or sdma).
    #[arg(long)]
    engine: Option<String>,

    /// Also run the compute-shader memset and memcpy.
    #[arg(long)]
    dispatch: bool,

    /// Run write-linear on encrypted buffers as well.
    #[arg(long)]
    secure: bool,
}

fn report(name: &str, result: IgtResult<()>, failures: &mut u32) {
    match result {
        Ok(()) => println!("    {name:<24} PASS"),
        Err(IgtError::Unsupported(reason)) => println!("    {name:<24} SKIP ({reason})"),
        Err(e) => {
            println!("    {name:<24} FAIL ({e})");
            *failures += 1;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = IgtConfig::from_env();

    let drm = open_devices(&config, "amdgpu")?
        .into_iter()
        .next()
        .ok_or("no amdgpu device")?;
    let device = AmdgpuDevice::initialize(drm)?.with_fence_timeout(config.fence_timeout_ns);
    let blocks = device.ip_blocks()?;

    println!("============================================================");
    println!("                  amdgpu Basic Memory Tests                 ");
    println!("============================================================");

    let mut failures = 0;
    for block in blocks.iter() {
        if args.engine.as_deref().is_some_and(|e| e != block.ip_type.name()) {
            continue;
        }
        println!("[+] {} v{}", block.ip_type, block.major);

        let mut run = |name: &str, result| report(name, result, &mut failures);
        run("write-linear", write_linear_helper(&device, block, false));
        if args.secure {
            run("write-linear (secure)", write_linear_helper(&device, block, true));
        }
        run("const-fill", const_fill_helper(&device, block));
        run("copy-linear", copy_linear_helper(&device, block));

        if args.dispatch && matches!(block.ip_type, IpBlockType::Gfx | IpBlockType::Compute) {
            run("memset-dispatch", memset_dispatch_test(&device, block, block.major));
            run("memcpy-dispatch", memcpy_dispatch_test(&device, block, block.major));
        }
    }

    if failures > 0 {
        return Err(format!("{failures} test(s) failed").into());
    }
    Ok(())
}

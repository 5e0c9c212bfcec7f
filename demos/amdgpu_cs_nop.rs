use clap::{Parser, ValueEnum};
use igt_gpu_tools::IgtConfig;
use igt_gpu_tools::amdgpu::submission::{NopCsOptions, available_ring_ids, nop_cs};
use igt_gpu_tools::amdgpu::{AmdgpuDevice, IpBlockType};
use igt_gpu_tools::drm::sysfs::open_devices;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
    Gfx,
    Compute,
}

/// Measure NOP command-submission throughput on the first amdgpu device.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = Engine::Gfx)]
    engine: Engine,

    /// Seconds to submit for, per ring.
    #[arg(long, default_value_t = 20)]
    seconds: u64,

    /// Wait for each submission before the next one.
    #[arg(long)]
    sync: bool,

    /// Submitting threads sharing one context.
    #[arg(long, default_value_t = 1)]
    workers: usize,
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

    let ip_type = match args.engine {
        Engine::Gfx => IpBlockType::Gfx,
        Engine::Compute => IpBlockType::Compute,
    };
    let hw = device.query_hw_ip_info(ip_type.hw_ip(), 0)?;

    println!("============================================================");
    println!("              amdgpu NOP Submission Throughput              ");
    println!("============================================================");
    println!(
        "[+] {} on {}: {}s per ring, {} worker(s), {}",
        ip_type,
        device.drm().path().display(),
        args.seconds,
        args.workers,
        if args.sync { "sync" } else { "async" }
    );

    let ctx = device.ctx_alloc()?;
    let mut outcome = Ok(());
    for ring in available_ring_ids(hw.available_rings) {
        let options = NopCsOptions {
            ip_type: ip_type.hw_ip(),
            ring,
            duration: Duration::from_secs(args.seconds),
            sync: args.sync,
            workers: args.workers,
        };
        match nop_cs(&device, ctx, &options) {
            Ok(stats) => {
                for (worker, stat) in stats.iter().enumerate() {
                    let (submit_us, sync_us) = stat.per_cycle_us();
                    println!(
                        "    ring {ring} worker {worker}: {} cycles, \
                         submit {submit_us:.2}us, sync {sync_us:.2}us",
                        stat.cycles
                    );
                }
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    device.ctx_release(ctx)?;
    outcome?;

    Ok(())
}

use clap::Parser;
use igt_gpu_tools::drm::sysfs::open_devices;
use igt_gpu_tools::intel::{
    BatchExecutor, FillRegion, GpgpuFillFn, I915Device, IntelBuf, gpgpu_fillfunc,
};
use igt_gpu_tools::{IgtConfig, IgtError, IgtResult};

const COLOR_C4: u8 = 0x4c;
const COLOR_88: u8 = 0x88;

/// Fill a rectangle of a linear surface with a GPGPU kernel and verify it.
#[derive(Debug, Parser)]
struct Args {
    /// Surface width in pixels.
    #[arg(long, default_value_t = 64)]
    width: u32,

    /// Surface height in pixels.
    #[arg(long, default_value_t = 64)]
    height: u32,

    /// Read back through a CPU mapping instead of pread.
    #[arg(long)]
    mmap: bool,
}

fn read_back(device: &I915Device, buf: &IntelBuf, mmap: bool) -> IgtResult<Vec<u8>> {
    if mmap {
        let cpu = device.gem_mmap(buf.handle, buf.size)?;
        Ok((0..cpu.len()).map(|offset| cpu.read_u8(offset)).collect())
    } else {
        let mut data = vec![0; usize::try_from(buf.size).unwrap_or(0)];
        device.gem_read(buf.handle, 0, &mut data)?;
        Ok(data)
    }
}

fn check(buf: &IntelBuf, data: &[u8], region: FillRegion) -> IgtResult<()> {
    for y in 0..buf.height() {
        for x in 0..buf.stride {
            let offset = (y * buf.stride + x) as usize;
            let expected = if region.contains(x, y) { COLOR_C4 } else { COLOR_88 };
            let found = data[offset];
            if found != expected {
                return Err(IgtError::CompareMismatch {
                    index: offset,
                    expected: u32::from(expected),
                    found: u32::from(found),
                });
            }
        }
    }
    Ok(())
}

fn fill_and_verify(
    device: &I915Device,
    fill: GpgpuFillFn,
    buf: &mut IntelBuf,
    mmap: bool,
) -> IgtResult<()> {
    let size = usize::try_from(buf.size)
        .map_err(|_| IgtError::InvalidArgument(format!("{} byte surface", buf.size)))?;
    device.gem_write(buf.handle, 0, &vec![COLOR_88; size])?;

    let region = FillRegion::new(0, 0, buf.stride / 2, buf.height() / 2);
    println!(
        "[+] filling {}x{} bytes at ({}, {}) with 0x{COLOR_C4:02x}",
        region.width, region.height, region.x, region.y
    );
    fill(device, device.info(), buf, region, COLOR_C4)?;

    let data = read_back(device, buf, mmap)?;
    check(buf, &data, region)?;
    println!("[+] surface verified");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = IgtConfig::from_env();

    let drm = open_devices(&config, "i915")?
        .into_iter()
        .next()
        .ok_or("no i915 device")?;
    let device = I915Device::open(drm)?;
    let info = *device.info();
    let fill = gpgpu_fillfunc(&info)
        .ok_or_else(|| format!("no GPGPU fill for {} ({})", info.codename, info.graphics_ver))?;

    println!("============================================================");
    println!("                       i915 GPGPU Fill                      ");
    println!("============================================================");
    println!(
        "[+] {} 0x{:04x}, graphics {}",
        info.codename, info.devid, info.graphics_ver
    );

    // the kernel writes bytes, so a 32bpp surface is filled as width * 4 bytes
    let mut buf = IntelBuf::linear(0, args.width / 4, args.height, 32)?;
    buf.handle = device.gem_create(buf.size)?;
    let outcome = fill_and_verify(&device, fill, &mut buf, args.mmap);

    device.gem_close(buf.handle)?;
    outcome?;
    Ok(())
}

use crate::config::IgtConfig;
use crate::drm::device::DrmDevice;
use crate::error::{IgtError, IgtResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const RENDER_PREFIX: &str = "renderD";
const PRIMARY_PREFIX: &str = "card";

/// DRM nodes in `dir` of the requested kind, ordered by minor number.
///
/// # Errors
/// Returns an error if the directory cannot be read.
pub fn candidate_nodes(dir: &Path, render: bool) -> io::Result<Vec<PathBuf>> {
    let prefix = if render { RENDER_PREFIX } else { PRIMARY_PREFIX };
    let mut nodes: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix(prefix)?.parse::<u32>().ok()?;
            Some((index, entry.path()))
        })
        .collect();

    nodes.sort_by_key(|(index, _)| *index);
    Ok(nodes.into_iter().map(|(_, path)| path).collect())
}

/// Opens up to `config.max_cards` nodes bound to `driver`.
///
/// Nodes that fail to open, or belong to another driver, are skipped.
///
/// # Errors
/// Returns `DeviceNotFound` when nothing matched, or an I/O error if the DRI
/// directory is unreadable.
pub fn open_devices(config: &IgtConfig, driver: &str) -> IgtResult<Vec<DrmDevice>> {
    let mut devices = Vec::new();

    for path in candidate_nodes(config.dri_dir(), config.render_nodes)? {
        if devices.len() >= config.max_cards {
            break;
        }
        let device = match DrmDevice::open(&path) {
            Ok(device) => device,
            Err(e) => {
                log::debug!("Skipping {}: {e}", path.display());
                continue;
            }
        };
        match device.version() {
            Ok(version) if version.name == driver => {
                log::debug!(
                    "Opened {} ({} {}.{}.{})",
                    path.display(),
                    version.name,
                    version.major,
                    version.minor,
                    version.patchlevel
                );
                devices.push(device);
            }
            Ok(_) => {}
            Err(e) => log::debug!("DRM_IOCTL_VERSION on {} failed: {e}", path.display()),
        }
    }

    if devices.is_empty() {
        return Err(IgtError::DeviceNotFound);
    }
    Ok(devices)
}

/// `/sys/dev/char/M:m/device` for a DRM char device, if the node is backed by a DRM device.
#[must_use]
pub fn device_sysfs_path(config: &IgtConfig, major: u32, minor: u32) -> Option<PathBuf> {
    let base = config.sysfs_char_dev(major, minor).join("device");
    base.join("drm").exists().then_some(base)
}

/// Sysfs device directory for an open DRM fd.
///
/// # Errors
/// Returns an error if the fd is not a DRM character device.
pub fn device_sysfs_path_from_fd(config: &IgtConfig, device: &DrmDevice) -> IgtResult<PathBuf> {
    let (major, minor) = device.rdev()?;
    device_sysfs_path(config, major, minor).ok_or_else(|| {
        IgtError::General(format!("{major}:{minor} is not a DRM device node"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn orders_render_nodes_by_minor() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["renderD129", "card0", "renderD128", "renderD130x", "by-path"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let render = candidate_nodes(dir.path(), true).unwrap();
        let names: Vec<_> = render
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["renderD128", "renderD129"]);

        let primary = candidate_nodes(dir.path(), false).unwrap();
        assert_eq!(primary.len(), 1);
    }

    #[test]
    fn sysfs_path_requires_drm_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = IgtConfig::default().with_sysfs_root(root.path());
        assert_eq!(device_sysfs_path(&config, 226, 128), None);

        let device_dir = root.path().join("dev/char/226:128/device");
        fs::create_dir_all(device_dir.join("drm")).unwrap();
        assert_eq!(device_sysfs_path(&config, 226, 128), Some(device_dir));
    }

    #[test]
    fn empty_dri_dir_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = IgtConfig::default().with_dri_dir(dir.path());
        assert_matches!(open_devices(&config, "amdgpu"), Err(IgtError::DeviceNotFound));
    }
}

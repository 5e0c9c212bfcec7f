use std::env;
use std::path::{Path, PathBuf};

/// Fence waits block forever unless overridden.
pub const TIMEOUT_INFINITE: u64 = u64::MAX;

/// Highest number of cards opened by the device enumeration helpers.
pub const MAX_CARDS_SUPPORTED: usize = 4;

const ENV_DRI_DIR: &str = "IGT_DRI_DIR";
const ENV_SYSFS_ROOT: &str = "IGT_SYSFS_ROOT";
const ENV_FENCE_TIMEOUT: &str = "IGT_FENCE_TIMEOUT_NS";
const ENV_PRIMARY_NODES: &str = "IGT_AMDGPU_PRIMARY_NODES";

/// Where devices live and how long to wait for them.
///
/// Every entry point that touches `/dev` or `/sys` takes one of these, so a
/// test can point the whole library at a scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgtConfig {
    pub dri_dir: PathBuf,
    pub sysfs_root: PathBuf,
    pub fence_timeout_ns: u64,
    pub max_cards: usize,
    pub render_nodes: bool,
}

impl Default for IgtConfig {
    fn default() -> Self {
        Self {
            dri_dir: PathBuf::from("/dev/dri"),
            sysfs_root: PathBuf::from("/sys"),
            fence_timeout_ns: TIMEOUT_INFINITE,
            max_cards: MAX_CARDS_SUPPORTED,
            render_nodes: true,
        }
    }
}

impl IgtConfig {
    /// Defaults, with `IGT_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var(ENV_DRI_DIR) {
            config.dri_dir = PathBuf::from(dir);
        }
        if let Ok(root) = env::var(ENV_SYSFS_ROOT) {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Ok(val) = env::var(ENV_FENCE_TIMEOUT) {
            match val.trim().parse::<u64>() {
                Ok(ns) => config.fence_timeout_ns = ns,
                Err(_) => log::warn!("Ignoring malformed {ENV_FENCE_TIMEOUT}={val}"),
            }
        }
        if let Ok(val) = env::var(ENV_PRIMARY_NODES) {
            config.render_nodes = !matches!(val.trim(), "1" | "true" | "yes");
        }

        config
    }

    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    #[must_use]
    pub fn with_dri_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dri_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_fence_timeout(mut self, ns: u64) -> Self {
        self.fence_timeout_ns = ns;
        self
    }

    /// `/sys/dev/char/<major>:<minor>`
    #[must_use]
    pub fn sysfs_char_dev(&self, major: u32, minor: u32) -> PathBuf {
        self.sysfs_root
            .join("dev")
            .join("char")
            .join(format!("{major}:{minor}"))
    }

    #[must_use]
    pub fn pci_rescan_path(&self) -> PathBuf {
        self.sysfs_root.join("bus").join("pci").join("rescan")
    }

    #[must_use]
    pub fn dri_dir(&self) -> &Path {
        &self.dri_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths() {
        let config = IgtConfig::default();
        assert_eq!(config.pci_rescan_path(), PathBuf::from("/sys/bus/pci/rescan"));
        assert_eq!(
            config.sysfs_char_dev(226, 128),
            PathBuf::from("/sys/dev/char/226:128")
        );
        assert_eq!(config.fence_timeout_ns, TIMEOUT_INFINITE);
        assert!(config.render_nodes);
    }

    #[test]
    fn builder_overrides() {
        let config = IgtConfig::default()
            .with_sysfs_root("/tmp/fake-sys")
            .with_dri_dir("/tmp/fake-dri")
            .with_fence_timeout(1_000);
        assert_eq!(
            config.pci_rescan_path(),
            PathBuf::from("/tmp/fake-sys/bus/pci/rescan")
        );
        assert_eq!(config.dri_dir(), Path::new("/tmp/fake-dri"));
        assert_eq!(config.fence_timeout_ns, 1_000);
    }
}

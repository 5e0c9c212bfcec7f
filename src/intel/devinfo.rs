use std::fmt;

/// Graphics IP version, e.g. `12.55` for DG2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpVer {
    pub major: u32,
    pub minor: u32,
}

impl IpVer {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for IpVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Static facts about one Intel GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub devid: u16,
    pub codename: &'static str,
    pub graphics_ver: IpVer,
    pub is_cherryview: bool,
}

impl DeviceInfo {
    #[must_use]
    pub const fn graphics_major(&self) -> u32 {
        self.graphics_ver.major
    }

    /// True for parts that need relocations below 4 GiB.
    #[must_use]
    pub const fn needs_32bit_relocs(&self) -> bool {
        self.graphics_ver.major < 8
    }

    /// True for Gen12 parts up to 12.70, whose EUs still run in fused pairs.
    #[must_use]
    pub fn can_disable_fused_eu_dispatch(&self) -> bool {
        self.graphics_ver.major == 12 && self.graphics_ver <= IpVer::new(12, 70)
    }
}

const fn dev(devid: u16, codename: &'static str, major: u32, minor: u32) -> DeviceInfo {
    DeviceInfo {
        devid,
        codename,
        graphics_ver: IpVer::new(major, minor),
        is_cherryview: false,
    }
}

const fn chv(devid: u16) -> DeviceInfo {
    DeviceInfo {
        devid,
        codename: "cherryview",
        graphics_ver: IpVer::new(8, 0),
        is_cherryview: true,
    }
}

static DEVICES: &[DeviceInfo] = &[
    dev(0x0152, "ivybridge", 7, 0),
    dev(0x0156, "ivybridge", 7, 0),
    dev(0x0162, "ivybridge", 7, 0),
    dev(0x0166, "ivybridge", 7, 0),
    dev(0x0402, "haswell", 7, 50),
    dev(0x0412, "haswell", 7, 50),
    dev(0x0416, "haswell", 7, 50),
    dev(0x0a16, "haswell", 7, 50),
    dev(0x0d22, "haswell", 7, 50),
    dev(0x1616, "broadwell", 8, 0),
    dev(0x1626, "broadwell", 8, 0),
    dev(0x162b, "broadwell", 8, 0),
    chv(0x22b0),
    chv(0x22b1),
    dev(0x1912, "skylake", 9, 0),
    dev(0x1916, "skylake", 9, 0),
    dev(0x191b, "skylake", 9, 0),
    dev(0x1926, "skylake", 9, 0),
    dev(0x5916, "kabylake", 9, 0),
    dev(0x5917, "kabylake", 9, 0),
    dev(0x591b, "kabylake", 9, 0),
    dev(0x8a52, "icelake", 11, 0),
    dev(0x8a56, "icelake", 11, 0),
    dev(0x8a5a, "icelake", 11, 0),
    dev(0x9a40, "tigerlake", 12, 0),
    dev(0x9a49, "tigerlake", 12, 0),
    dev(0x9a78, "tigerlake", 12, 0),
    dev(0x4680, "alderlake_s", 12, 0),
    dev(0x4692, "alderlake_s", 12, 0),
    dev(0x5690, "dg2", 12, 55),
    dev(0x5691, "dg2", 12, 55),
    dev(0x56a0, "dg2", 12, 55),
    dev(0x7d55, "meteorlake", 12, 70),
    dev(0x7dd5, "meteorlake", 12, 70),
    dev(0x6420, "lunarlake", 20, 4),
    dev(0x64a0, "lunarlake", 20, 4),
];

/// Look up a PCI device id.
#[must_use]
pub fn device_info(devid: u16) -> Option<&'static DeviceInfo> {
    DEVICES.iter().find(|d| d.devid == devid)
}

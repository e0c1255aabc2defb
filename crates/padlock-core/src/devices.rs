//! Per-core register access: CPUID and MSR handles.
//!
//! On Linux the `cpuid` and `msr` drivers expose one character device per
//! core under `/dev/cpu/<N>/`. A CPUID leaf is read as 16 bytes
//! (eax, ebx, ecx, edx) at file offset = leaf; an MSR is read or written as
//! 8 bytes at file offset = register number.
//!
//! Everything above this module talks to the traits, so the engine can run
//! against [`crate::sim`] in tests.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PadlockError, Result};

/// Register values returned by one CPUID leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl CpuidRegs {
    /// Decode the 16-byte record produced by the cpuid driver.
    pub fn from_bytes(raw: &[u8; 16]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            eax: word(0),
            ebx: word(4),
            ecx: word(8),
            edx: word(12),
        }
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut raw = [0u8; 16];
        for (i, w) in [self.eax, self.ebx, self.ecx, self.edx].into_iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        raw
    }
}

/// Read access to one core's identification interface.
pub trait CpuidDevice: Send {
    fn read_leaf(&mut self, leaf: u32) -> io::Result<CpuidRegs>;
}

/// Read/write access to one core's model-specific registers.
pub trait MsrDevice: Send {
    fn read_msr(&mut self, reg: u32) -> io::Result<u64>;
    fn write_msr(&mut self, reg: u32, value: u64) -> io::Result<()>;
}

/// Opens per-core device handles.
///
/// Open errors carry the driver's errno: `ENXIO`/`ENOENT` for a core that does
/// not exist and `EIO` for a core whose driver refuses the request (wrong CPU
/// type).
pub trait CpuDevices {
    fn open_msr(&self, core: usize) -> io::Result<Box<dyn MsrDevice>>;
    fn open_cpuid(&self, core: usize) -> io::Result<Box<dyn CpuidDevice>>;
}

/// Per-core device directory template with a single `%u` escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    prefix: String,
    suffix: String,
}

impl PathTemplate {
    pub const DEFAULT: &'static str = "/dev/cpu/%u";
    const ESCAPE: &'static str = "%u";

    pub fn parse(template: &str) -> Result<Self> {
        let mut parts = template.split(Self::ESCAPE);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(suffix), None) => Ok(Self {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            _ => Err(PadlockError::InvalidTemplate(template.to_string())),
        }
    }

    /// Path of `device` (`"msr"` or `"cpuid"`) for `core`.
    pub fn device_path(&self, core: usize, device: &str) -> io::Result<PathBuf> {
        let path = format!("{}{}{}/{}", self.prefix, core, self.suffix, device);
        if path.len() >= libc::PATH_MAX as usize {
            return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }
        Ok(PathBuf::from(path))
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            prefix: "/dev/cpu/".to_string(),
            suffix: String::new(),
        }
    }
}

impl FromStr for PathTemplate {
    type Err = PadlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.prefix, Self::ESCAPE, self.suffix)
    }
}

/// The Linux `/dev/cpu/<N>/{msr,cpuid}` device tree.
#[derive(Debug, Clone, Default)]
pub struct DevCpuTree {
    template: PathTemplate,
}

impl DevCpuTree {
    pub fn new(template: PathTemplate) -> Self {
        Self { template }
    }

    /// Build from an optional template string, `None` meaning `/dev/cpu/%u`.
    pub fn from_template(template: Option<&str>) -> Result<Self> {
        let template = match template {
            Some(t) => PathTemplate::parse(t)?,
            None => PathTemplate::default(),
        };
        Ok(Self::new(template))
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }
}

impl CpuDevices for DevCpuTree {
    fn open_msr(&self, core: usize) -> io::Result<Box<dyn MsrDevice>> {
        let path = self.template.device_path(core, "msr")?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(DevMsr { file }))
    }

    fn open_cpuid(&self, core: usize) -> io::Result<Box<dyn CpuidDevice>> {
        let path = self.template.device_path(core, "cpuid")?;
        let file = File::open(path)?;
        Ok(Box::new(DevCpuid { file }))
    }
}

struct DevMsr {
    file: File,
}

impl MsrDevice for DevMsr {
    fn read_msr(&mut self, reg: u32) -> io::Result<u64> {
        let mut raw = [0u8; 8];
        self.file.read_exact_at(&mut raw, u64::from(reg))?;
        Ok(u64::from_le_bytes(raw))
    }

    fn write_msr(&mut self, reg: u32, value: u64) -> io::Result<()> {
        self.file.write_all_at(&value.to_le_bytes(), u64::from(reg))
    }
}

struct DevCpuid {
    file: File,
}

impl CpuidDevice for DevCpuid {
    fn read_leaf(&mut self, leaf: u32) -> io::Result<CpuidRegs> {
        let mut raw = [0u8; 16];
        self.file.read_exact_at(&mut raw, u64::from(leaf))?;
        Ok(CpuidRegs::from_bytes(&raw))
    }
}

//! Simulated PadLock hardware.
//!
//! [`SimulatedCpus`] stands in for the `/dev/cpu` tree and
//! [`SimulatedXstore`] for the instruction. The xstore simulation reads core
//! 0's control register back into its status word the same way the silicon
//! does, so a register changed through [`SimulatedCpus::tamper`] shows up as a
//! status mismatch in the engine.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::control::{ControlFlags, MSR_VIA_RNG};
use crate::devices::{CpuDevices, CpuidDevice, CpuidRegs, MsrDevice};
use crate::xstore::{Xstore, XstoreBuffer, step_bytes};

const CENTAUR: &[u8; 12] = b"CentaurHauls";
const INTEL: &[u8; 12] = b"GenuineIntel";

/// CPUID contents of one simulated core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuModel {
    pub vendor: [u8; 12],
    pub max_leaf: u32,
    /// Leaf 1 eax.
    pub signature: u32,
    pub max_ext_leaf: u32,
    pub rng_present: bool,
    /// Every leaf read fails with this errno.
    pub read_error: Option<i32>,
}

impl CpuModel {
    /// Centaur core with the given family/model/stepping signature.
    pub fn with_signature(signature: u32) -> Self {
        Self {
            vendor: *CENTAUR,
            max_leaf: 1,
            signature,
            max_ext_leaf: 0xc000_0001,
            rng_present: true,
            read_error: None,
        }
    }

    /// Nehemiah stepping 8: two noise sources.
    pub fn nehemiah_dual() -> Self {
        Self::with_signature(0x0698)
    }

    /// Nehemiah stepping 5: one noise source.
    pub fn nehemiah_single() -> Self {
        Self::with_signature(0x0695)
    }

    pub fn genuine_intel() -> Self {
        Self {
            vendor: *INTEL,
            max_leaf: 0x16,
            signature: 0x0009_06ea,
            max_ext_leaf: 0,
            rng_present: false,
            read_error: None,
        }
    }

    /// A standalone CPUID handle for this model.
    pub fn cpuid(&self) -> SimulatedCpuid {
        SimulatedCpuid {
            model: *self,
            _handle: None,
        }
    }

    fn vendor_word(&self, i: usize) -> u32 {
        let b = &self.vendor[i * 4..i * 4 + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn leaf(&self, leaf: u32) -> io::Result<CpuidRegs> {
        if let Some(errno) = self.read_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let regs = match leaf {
            0 => CpuidRegs {
                eax: self.max_leaf,
                ebx: self.vendor_word(0),
                edx: self.vendor_word(1),
                ecx: self.vendor_word(2),
            },
            1 if self.max_leaf >= 1 => CpuidRegs {
                eax: self.signature,
                ..CpuidRegs::default()
            },
            0xc000_0000 => CpuidRegs {
                eax: self.max_ext_leaf,
                ..CpuidRegs::default()
            },
            0xc000_0001 if self.max_ext_leaf >= 0xc000_0001 => CpuidRegs {
                // Bit 2: RNG present, bit 3: RNG enabled by firmware.
                edx: if self.rng_present { 0b1100 } else { 0 },
                ..CpuidRegs::default()
            },
            _ => CpuidRegs::default(),
        };
        Ok(regs)
    }
}

#[derive(Debug)]
struct CoreState {
    model: CpuModel,
    rng_msr: u64,
    msr_writes: usize,
    open_msr_error: Option<i32>,
    open_cpuid_error: Option<i32>,
    write_error: Option<i32>,
}

#[derive(Debug, Default)]
struct SimState {
    cores: Vec<CoreState>,
    open_handles: usize,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, SimState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts a live device handle until dropped.
struct HandleGuard(Shared);

impl HandleGuard {
    fn open(shared: &Shared) -> Self {
        lock(shared).open_handles += 1;
        Self(Arc::clone(shared))
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        lock(&self.0).open_handles -= 1;
    }
}

/// A simulated machine: N cores with per-core CPUID models and RNG MSRs.
///
/// Cloning shares the same machine.
#[derive(Clone)]
pub struct SimulatedCpus {
    shared: Shared,
}

impl SimulatedCpus {
    /// `count` identical cores.
    pub fn uniform(count: usize, model: CpuModel) -> Self {
        Self::from_models(std::iter::repeat_n(model, count))
    }

    pub fn from_models(models: impl IntoIterator<Item = CpuModel>) -> Self {
        let cores = models
            .into_iter()
            .map(|model| CoreState {
                model,
                rng_msr: 0,
                msr_writes: 0,
                open_msr_error: None,
                open_cpuid_error: None,
                write_error: None,
            })
            .collect();
        Self {
            shared: Arc::new(Mutex::new(SimState {
                cores,
                open_handles: 0,
            })),
        }
    }

    pub fn core_count(&self) -> usize {
        lock(&self.shared).cores.len()
    }

    pub fn set_model(&self, core: usize, model: CpuModel) {
        lock(&self.shared).cores[core].model = model;
    }

    /// Make opening `core`'s msr device fail with `errno`.
    pub fn fail_msr_open(&self, core: usize, errno: i32) {
        lock(&self.shared).cores[core].open_msr_error = Some(errno);
    }

    /// Make opening `core`'s cpuid device fail with `errno`.
    pub fn fail_cpuid_open(&self, core: usize, errno: i32) {
        lock(&self.shared).cores[core].open_cpuid_error = Some(errno);
    }

    /// Make MSR writes on `core` fail with `errno`; `None` clears the fault.
    pub fn fail_msr_write(&self, core: usize, errno: Option<i32>) {
        lock(&self.shared).cores[core].write_error = errno;
    }

    /// Current RNG control register of `core`.
    pub fn rng_msr(&self, core: usize) -> u64 {
        lock(&self.shared).cores[core].rng_msr
    }

    /// Successful RNG MSR writes on `core`.
    pub fn msr_writes(&self, core: usize) -> usize {
        lock(&self.shared).cores[core].msr_writes
    }

    /// Change `core`'s control register behind the engine's back.
    pub fn tamper(&self, core: usize, value: u64) {
        lock(&self.shared).cores[core].rng_msr = value;
    }

    /// Device handles currently held open by anyone.
    pub fn open_handles(&self) -> usize {
        lock(&self.shared).open_handles
    }

    /// An xstore simulation reading this machine's core 0 register.
    pub fn xstore(&self, seed: u64) -> SimulatedXstore {
        SimulatedXstore {
            shared: Arc::clone(&self.shared),
            rng: StdRng::seed_from_u64(seed),
            dry_reads: 0,
            overrun: 0,
            calls: 0,
        }
    }
}

impl CpuDevices for SimulatedCpus {
    fn open_msr(&self, core: usize) -> io::Result<Box<dyn MsrDevice>> {
        let state = lock(&self.shared);
        let Some(c) = state.cores.get(core) else {
            return Err(io::Error::from_raw_os_error(libc::ENXIO));
        };
        if let Some(errno) = c.open_msr_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        drop(state);
        Ok(Box::new(SimulatedMsr {
            core,
            handle: HandleGuard::open(&self.shared),
        }))
    }

    fn open_cpuid(&self, core: usize) -> io::Result<Box<dyn CpuidDevice>> {
        let state = lock(&self.shared);
        let Some(c) = state.cores.get(core) else {
            return Err(io::Error::from_raw_os_error(libc::ENXIO));
        };
        if let Some(errno) = c.open_cpuid_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let model = c.model;
        drop(state);
        Ok(Box::new(SimulatedCpuid {
            model,
            _handle: Some(HandleGuard::open(&self.shared)),
        }))
    }
}

/// CPUID handle of a simulated core.
pub struct SimulatedCpuid {
    model: CpuModel,
    _handle: Option<HandleGuard>,
}

impl CpuidDevice for SimulatedCpuid {
    fn read_leaf(&mut self, leaf: u32) -> io::Result<CpuidRegs> {
        self.model.leaf(leaf)
    }
}

struct SimulatedMsr {
    core: usize,
    handle: HandleGuard,
}

impl MsrDevice for SimulatedMsr {
    fn read_msr(&mut self, reg: u32) -> io::Result<u64> {
        let state = lock(&self.handle.0);
        Ok(if reg == MSR_VIA_RNG {
            state.cores[self.core].rng_msr
        } else {
            0
        })
    }

    fn write_msr(&mut self, reg: u32, value: u64) -> io::Result<()> {
        let mut state = lock(&self.handle.0);
        let core = &mut state.cores[self.core];
        if let Some(errno) = core.write_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if reg == MSR_VIA_RNG {
            core.rng_msr = value;
            core.msr_writes += 1;
        }
        Ok(())
    }
}

/// Deterministic xstore: seeded random bytes, status mirrored from core 0.
pub struct SimulatedXstore {
    shared: Shared,
    rng: StdRng,
    dry_reads: usize,
    overrun: usize,
    calls: usize,
}

impl SimulatedXstore {
    /// The next `count` invocations store nothing (empty FIFO).
    pub fn script_dry_reads(&mut self, count: usize) {
        self.dry_reads = count;
    }

    /// Store `extra` bytes past the reported count, like the buggy revisions.
    pub fn set_overrun(&mut self, extra: usize) {
        self.overrun = extra;
    }

    /// Total invocations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Xstore for SimulatedXstore {
    fn xstore(&mut self, buf: &mut XstoreBuffer, divisor: u32) -> u32 {
        self.calls += 1;
        let msr = lock(&self.shared)
            .cores
            .first()
            .map_or(0, |c| c.rng_msr as u32);
        let flags = ControlFlags::from_bits_retain(msr) - ControlFlags::BYTE_COUNT;

        if !flags.rng_enabled() {
            return flags.bits();
        }
        if self.dry_reads > 0 {
            self.dry_reads -= 1;
            return flags.bits();
        }

        let count = step_bytes(divisor);
        let stored = (count + self.overrun).min(buf.as_bytes().len());
        self.rng.fill_bytes(&mut buf.as_bytes_mut()[..stored]);
        flags.bits() | count as u32
    }
}

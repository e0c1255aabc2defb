//! The PadLock engine: multi-core init, register control and extraction.
//!
//! xstore runs on whatever core the thread happens to be scheduled on, so
//! every core must carry an identical RNG configured identically. Init
//! therefore probes all cores and keeps an MSR handle for each; enable
//! writes the same register value to all of them; extraction checks every
//! status word against that value.
//!
//! The engine does no locking. Callers serialise access.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::RngConfig;
use crate::control::{ControlFlags, MSR_VIA_RNG};
use crate::detect::{Detection, Reference, RngVariant, UnsupportedReason, detect_rng};
use crate::devices::{CpuDevices, DevCpuTree, MsrDevice};
use crate::error::{PadlockError, Result};
use crate::xstore::{HardwareXstore, Xstore, XstoreBuffer, step_bytes};

/// Highest number of cores probed.
pub const MAX_CPUS: usize = 32;

/// xstore attempts per iteration before yielding. The second attempt only
/// helps the slow C5XL cores.
const XSTORE_ATTEMPTS: usize = 2;

/// Why init found nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentReason {
    /// Not a PadLock machine, or some core lacks the RNG.
    NotPresent,
    /// Blacklisted silicon or cores that disagree on the RNG type.
    Unsupported,
    /// The msr/cpuid drivers refused this CPU type.
    WrongDeviceType,
}

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Usable RNG on this many cores.
    Ready(usize),
    Absent(AbsentReason),
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn detected(&self) -> usize {
        match self {
            Self::Ready(n) => *n,
            Self::Absent(_) => 0,
        }
    }

    /// `Ready(n)` as `Ok(n)`, absence as a benign error.
    pub fn into_result(self) -> Result<usize> {
        match self {
            Self::Ready(n) => Ok(n),
            Self::Absent(AbsentReason::Unsupported) => Err(PadlockError::Unsupported),
            Self::Absent(_) => Err(PadlockError::NotPresent),
        }
    }
}

/// Detected RNG state shared by all cores.
struct Capability {
    variant: RngVariant,
    mask: ControlFlags,
    /// Authoritative register value, `None` until the first configuration.
    value: Option<ControlFlags>,
    divisor: u32,
    handles: Vec<Box<dyn MsrDevice>>,
}

impl Capability {
    /// Write `value` to every core in order, stopping at the first failure.
    fn apply(&mut self, value: ControlFlags) -> Result<()> {
        let total = self.handles.len();
        for (core, msr) in self.handles.iter_mut().enumerate() {
            if let Err(source) = msr.write_msr(MSR_VIA_RNG, u64::from(value.bits())) {
                if core == 0 {
                    return Err(PadlockError::Io(source));
                }
                warn!("RNG register write failed on cpu{core}, {core} of {total} cores updated");
                return Err(PadlockError::PartialApply {
                    applied: core,
                    total,
                    source,
                });
            }
        }
        Ok(())
    }
}

/// Snapshot of the engine state for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySummary {
    pub cores: usize,
    pub variant: RngVariant,
    pub register_mask: u32,
    pub register_value: Option<u32>,
    pub divisor: u32,
}

/// Owned engine context: detected capability, MSR handles and xstore scratch.
pub struct PadlockEngine<X: Xstore = HardwareXstore> {
    capability: Option<Capability>,
    xstore: X,
    scratch: XstoreBuffer,
}

impl PadlockEngine<HardwareXstore> {
    /// Engine driving the real `xstore` instruction.
    pub fn new() -> Self {
        Self::with_xstore(HardwareXstore)
    }
}

impl Default for PadlockEngine<HardwareXstore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X: Xstore> PadlockEngine<X> {
    pub fn with_xstore(xstore: X) -> Self {
        Self {
            capability: None,
            xstore,
            scratch: XstoreBuffer::new(),
        }
    }

    pub fn xstore(&self) -> &X {
        &self.xstore
    }

    pub fn xstore_mut(&mut self) -> &mut X {
        &mut self.xstore
    }

    pub fn is_initialized(&self) -> bool {
        self.capability.is_some()
    }

    pub fn detected_count(&self) -> usize {
        self.capability.as_ref().map_or(0, |c| c.handles.len())
    }

    pub fn variant(&self) -> RngVariant {
        self.capability.as_ref().map_or(RngVariant::None, |c| c.variant)
    }

    pub fn register_mask(&self) -> ControlFlags {
        self.capability
            .as_ref()
            .map_or(ControlFlags::empty(), |c| c.mask)
    }

    /// Authoritative register value, if a configuration has been applied.
    pub fn register_value(&self) -> Option<ControlFlags> {
        self.capability.as_ref().and_then(|c| c.value)
    }

    pub fn divisor(&self) -> u32 {
        self.capability.as_ref().map_or(0, |c| c.divisor)
    }

    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            cores: self.detected_count(),
            variant: self.variant(),
            register_mask: self.register_mask().bits(),
            register_value: self.register_value().map(|v| v.bits()),
            divisor: self.divisor(),
        }
    }

    /// Probe the `/dev/cpu` tree, `None` meaning the default `/dev/cpu/%u`.
    pub fn init_with_template(&mut self, template: Option<&str>) -> Result<InitOutcome> {
        let tree = DevCpuTree::from_template(template)?;
        self.init(&tree)
    }

    /// Probe cores 0, 1, ... until one is missing or [`MAX_CPUS`] is reached.
    ///
    /// All-or-nothing: unless every probed core has the same working RNG, every
    /// handle opened during the scan is released and nothing is kept. Any
    /// previous state is released first.
    pub fn init(&mut self, devices: &dyn CpuDevices) -> Result<InitOutcome> {
        self.free();

        let mut handles: Vec<Box<dyn MsrDevice>> = Vec::with_capacity(MAX_CPUS);
        let mut reference: Option<Reference> = None;

        for core in 0..MAX_CPUS {
            let msr = match devices.open_msr(core) {
                Ok(msr) => msr,
                Err(e) if is_missing_core(&e) => {
                    debug!("cpu{core}: no msr device, scan ends");
                    break;
                }
                Err(e) if is_wrong_device_type(&e) => {
                    info!("cpu{core}: msr driver rejects this CPU type");
                    return Ok(InitOutcome::Absent(AbsentReason::WrongDeviceType));
                }
                Err(e) => return Err(e.into()),
            };

            let mut cpuid = match devices.open_cpuid(core) {
                Ok(cpuid) => cpuid,
                Err(e) if is_wrong_device_type(&e) => {
                    info!("cpu{core}: cpuid driver rejects this CPU type");
                    return Ok(InitOutcome::Absent(AbsentReason::WrongDeviceType));
                }
                Err(e) => return Err(e.into()),
            };

            let detection = detect_rng(cpuid.as_mut(), core, reference)?;
            drop(cpuid);

            match detection {
                Detection::Present { variant, mask, .. } => {
                    reference.get_or_insert(Reference { variant, mask });
                    handles.push(msr);
                }
                Detection::NotPresent => {
                    info!("no usable PadLock RNG (cpu{core} has none)");
                    return Ok(InitOutcome::Absent(AbsentReason::NotPresent));
                }
                Detection::Unsupported(UnsupportedReason::Blacklisted { revision }) => {
                    warn!("cpu{core}: PadLock RNG revision {revision:#08x} is blacklisted");
                    return Ok(InitOutcome::Absent(AbsentReason::Unsupported));
                }
                Detection::Unsupported(UnsupportedReason::Mismatch { core }) => {
                    warn!("cpu{core}: PadLock RNG differs from cpu0, refusing mixed RNGs");
                    return Ok(InitOutcome::Absent(AbsentReason::Unsupported));
                }
            }
        }

        let Some(Reference { variant, mask }) = reference else {
            info!("no PadLock RNG found");
            return Ok(InitOutcome::Absent(AbsentReason::NotPresent));
        };

        let count = handles.len();
        info!("PadLock RNG ({variant}) detected on {count} core(s)");
        self.capability = Some(Capability {
            variant,
            mask,
            value: None,
            divisor: 0,
            handles,
        });
        Ok(InitOutcome::Ready(count))
    }

    /// Release every handle. Safe to call at any time; init may follow.
    pub fn free(&mut self) {
        if let Some(cap) = self.capability.take() {
            debug!("releasing {} PadLock RNG handle(s)", cap.handles.len());
        }
    }

    /// Enable or disable the RNG on every core.
    ///
    /// With `config`, the configuration is clamped, packed and masked to what
    /// this RNG generation supports. Without it, the last stored value is
    /// reused. The enable bit is then set or cleared and the result stored as
    /// the authoritative register value before anything is written, so it
    /// sticks even if a write fails.
    pub fn set_enabled(&mut self, enable: bool, config: Option<RngConfig>) -> Result<()> {
        let cap = self.capability.as_mut().ok_or(PadlockError::NoDevice)?;

        if let Some(cfg) = config {
            let cfg = cfg.sanitized();
            cap.value = Some(ControlFlags::pack(&cfg) & cap.mask);
            cap.divisor = cfg.divisor;
        }

        let mut value = cap.value.ok_or(PadlockError::InvalidState)?;
        value.set(ControlFlags::RNG_ENABLE, enable);
        cap.value = Some(value);
        cap.apply(value)
    }

    /// Fill `out` with RNG output.
    ///
    /// Blocks until `out` is full; an empty FIFO is waited out by yielding the
    /// CPU. If an xstore status disagrees with the configured register value,
    /// the configuration is written again once and [`PadlockError::Transient`]
    /// is returned; the whole call should be retried.
    ///
    /// Fails with [`PadlockError::InvalidState`] unless the RNG is configured
    /// and enabled, since a disabled RNG never produces a byte.
    pub fn extract(&mut self, out: &mut [u8]) -> Result<usize> {
        let cap = self.capability.as_ref().ok_or(PadlockError::NoDevice)?;
        let expected = cap.value.ok_or(PadlockError::InvalidState)?;
        if !expected.rng_enabled() {
            return Err(PadlockError::InvalidState);
        }
        let mask = cap.mask;
        let divisor = cap.divisor & 3;
        let step = step_bytes(divisor);

        let mut written = 0;
        while written < out.len() {
            let mut status = ControlFlags::empty();
            for _ in 0..XSTORE_ATTEMPTS {
                status =
                    ControlFlags::from_bits_retain(self.xstore.xstore(&mut self.scratch, divisor));
                if status & mask != expected {
                    self.recover_from_tamper(status, expected);
                    return Err(PadlockError::Transient);
                }
                if status.byte_count() as usize == step {
                    break;
                }
            }

            if status.byte_count() as usize != step {
                std::thread::yield_now();
                continue;
            }

            let n = step.min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.scratch.as_bytes()[..n]);
            written += n;
        }
        Ok(written)
    }

    fn recover_from_tamper(&mut self, status: ControlFlags, expected: ControlFlags) {
        warn!(
            "PadLock RNG reconfigured externally (status {:#06x}, expected {:#06x}), resetting",
            status.bits(),
            expected.bits()
        );
        if let Err(e) = self.set_enabled(true, None) {
            debug!("RNG reset failed: {e}");
        }
    }
}

fn is_missing_core(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENXIO) | Some(libc::ENOENT))
}

fn is_wrong_device_type(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NoiseSource, generate_config};
    use crate::sim::{CpuModel, SimulatedCpus, SimulatedXstore};

    fn engine(cpus: &SimulatedCpus) -> PadlockEngine<SimulatedXstore> {
        PadlockEngine::with_xstore(cpus.xstore(42))
    }

    fn ready_engine(n: usize, quality: u32) -> (SimulatedCpus, PadlockEngine<SimulatedXstore>) {
        let cpus = SimulatedCpus::uniform(n, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert_eq!(eng.init(&cpus).unwrap(), InitOutcome::Ready(n));
        eng.set_enabled(true, Some(generate_config(quality).0)).unwrap();
        (cpus, eng)
    }

    #[test]
    fn test_init_detects_all_identical_cores() {
        let cpus = SimulatedCpus::uniform(4, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert_eq!(eng.init(&cpus).unwrap(), InitOutcome::Ready(4));
        assert_eq!(eng.detected_count(), 4);
        assert_eq!(eng.variant(), RngVariant::DualSource);
        assert_eq!(eng.register_value(), None);
        // cpuid handles are closed after probing, msr handles kept.
        assert_eq!(cpus.open_handles(), 4);
    }

    #[test]
    fn test_init_caps_at_max_cpus() {
        let cpus = SimulatedCpus::uniform(MAX_CPUS + 4, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert_eq!(eng.init(&cpus).unwrap(), InitOutcome::Ready(MAX_CPUS));
    }

    #[test]
    fn test_reinit_is_idempotent() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        let first = eng.init(&cpus).unwrap();
        let second = eng.init(&cpus).unwrap();
        assert_eq!(first, second);
        assert_eq!(eng.detected_count(), 3);
        assert_eq!(cpus.open_handles(), 3);
    }

    #[test]
    fn test_mismatched_core_tears_down() {
        let cpus = SimulatedCpus::uniform(4, CpuModel::nehemiah_dual());
        cpus.set_model(2, CpuModel::nehemiah_single());
        let mut eng = engine(&cpus);
        assert_eq!(
            eng.init(&cpus).unwrap(),
            InitOutcome::Absent(AbsentReason::Unsupported)
        );
        assert_eq!(eng.detected_count(), 0);
        assert!(!eng.is_initialized());
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_mismatch_after_success_drops_previous_state() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert!(eng.init(&cpus).unwrap().is_ready());
        cpus.set_model(1, CpuModel::nehemiah_single());
        assert!(!eng.init(&cpus).unwrap().is_ready());
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_non_centaur_is_absent() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::genuine_intel());
        let mut eng = engine(&cpus);
        let outcome = eng.init(&cpus).unwrap();
        assert_eq!(outcome, InitOutcome::Absent(AbsentReason::NotPresent));
        assert!(matches!(outcome.into_result(), Err(PadlockError::NotPresent)));
    }

    #[test]
    fn test_later_core_without_rng_is_absent() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        let mut model = CpuModel::nehemiah_dual();
        model.rng_present = false;
        cpus.set_model(1, model);
        let mut eng = engine(&cpus);
        assert_eq!(
            eng.init(&cpus).unwrap(),
            InitOutcome::Absent(AbsentReason::NotPresent)
        );
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_blacklisted_is_unsupported() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::with_signature(0x0690));
        let mut eng = engine(&cpus);
        let outcome = eng.init(&cpus).unwrap();
        assert_eq!(outcome, InitOutcome::Absent(AbsentReason::Unsupported));
        assert!(matches!(outcome.into_result(), Err(PadlockError::Unsupported)));
    }

    #[test]
    fn test_no_cores_is_absent() {
        let cpus = SimulatedCpus::uniform(0, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert_eq!(
            eng.init(&cpus).unwrap(),
            InitOutcome::Absent(AbsentReason::NotPresent)
        );
    }

    #[test]
    fn test_missing_core_ends_scan_with_enoent() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        cpus.fail_msr_open(2, libc::ENOENT);
        let mut eng = engine(&cpus);
        assert_eq!(eng.init(&cpus).unwrap(), InitOutcome::Ready(2));
    }

    #[test]
    fn test_wrong_device_type_is_soft() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        cpus.fail_msr_open(1, libc::EIO);
        let mut eng = engine(&cpus);
        assert_eq!(
            eng.init(&cpus).unwrap(),
            InitOutcome::Absent(AbsentReason::WrongDeviceType)
        );
        assert_eq!(cpus.open_handles(), 0);

        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        cpus.fail_cpuid_open(0, libc::EIO);
        assert_eq!(
            eng.init(&cpus).unwrap(),
            InitOutcome::Absent(AbsentReason::WrongDeviceType)
        );
    }

    #[test]
    fn test_open_failure_is_hard_error() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        cpus.fail_msr_open(1, libc::EACCES);
        let mut eng = engine(&cpus);
        let err = eng.init(&cpus).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert!(!eng.is_initialized());
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_missing_cpuid_device_is_hard_error() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        cpus.fail_cpuid_open(1, libc::ENOENT);
        let mut eng = engine(&cpus);
        let err = eng.init(&cpus).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_cpuid_read_failure_is_hard_error() {
        let mut model = CpuModel::nehemiah_dual();
        model.read_error = Some(libc::EIO);
        let cpus = SimulatedCpus::from_models([CpuModel::nehemiah_dual(), model]);
        let mut eng = engine(&cpus);
        let err = eng.init(&cpus).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
        assert_eq!(cpus.open_handles(), 0);
    }

    #[test]
    fn test_free_is_idempotent() {
        let (cpus, mut eng) = ready_engine(2, 1);
        eng.free();
        eng.free();
        assert_eq!(eng.detected_count(), 0);
        assert_eq!(cpus.open_handles(), 0);
        assert!(eng.init(&cpus).unwrap().is_ready());
    }

    #[test]
    fn test_set_enabled_without_device() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        assert!(matches!(
            eng.set_enabled(true, Some(generate_config(1).0)),
            Err(PadlockError::NoDevice)
        ));
    }

    #[test]
    fn test_enable_requires_prior_config() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        assert!(matches!(
            eng.set_enabled(true, None),
            Err(PadlockError::InvalidState)
        ));
        assert_eq!(cpus.msr_writes(0), 0);
    }

    #[test]
    fn test_enable_writes_every_core() {
        let (cpus, eng) = ready_engine(3, 3);
        for core in 0..3 {
            assert_eq!(cpus.rng_msr(core), 0x0240);
        }
        assert_eq!(eng.divisor(), 3);
        assert_eq!(eng.register_value().unwrap().bits(), 0x0240);
    }

    #[test]
    fn test_disable_clears_only_enable_bit() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        let cfg = RngConfig {
            dc_bias: 4,
            string_filter_length: 16,
            noise_source: NoiseSource::B,
            whitener: true,
            divisor: 2,
        };
        eng.set_enabled(true, Some(cfg)).unwrap();
        let enabled = eng.register_value().unwrap();
        assert_eq!(cpus.rng_msr(1), u64::from(enabled.bits()));

        eng.set_enabled(false, None).unwrap();
        let disabled = eng.register_value().unwrap();
        assert_eq!(disabled, enabled - ControlFlags::RNG_ENABLE);
        assert_eq!(cpus.rng_msr(1), u64::from(disabled.bits()));
        assert_eq!(eng.divisor(), 2);

        eng.set_enabled(true, None).unwrap();
        assert_eq!(eng.register_value(), Some(enabled));
        assert_eq!(cpus.rng_msr(0), u64::from(enabled.bits()));
    }

    #[test]
    fn test_disable_with_config_never_enables() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        eng.set_enabled(false, Some(generate_config(3).0)).unwrap();
        assert_eq!(cpus.rng_msr(0), 0x0200);
        assert_eq!(cpus.rng_msr(1), 0x0200);
        assert!(!eng.register_value().unwrap().rng_enabled());
    }

    #[test]
    fn test_extract_while_disabled() {
        let (_cpus, mut eng) = ready_engine(1, 1);
        eng.set_enabled(false, None).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::InvalidState)));
        assert_eq!(eng.xstore().calls(), 0);
    }

    #[test]
    fn test_unsupported_bits_are_masked() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::nehemiah_single());
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        let mut cfg = generate_config(1).0;
        cfg.noise_source = NoiseSource::B;
        cfg.dc_bias = 99;
        eng.set_enabled(true, Some(cfg)).unwrap();
        let value = eng.register_value().unwrap();
        // Single-source parts have no noise-source select.
        assert_eq!(value.noise_source(), Some(NoiseSource::A));
        assert_eq!(value.dc_bias(), 7);
        assert_eq!(value & !eng.register_mask(), ControlFlags::empty());
    }

    #[test]
    fn test_first_core_write_failure_is_io() {
        let cpus = SimulatedCpus::uniform(2, CpuModel::nehemiah_dual());
        cpus.fail_msr_write(0, Some(libc::EIO));
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        let err = eng.set_enabled(true, Some(generate_config(2).0)).unwrap_err();
        assert!(matches!(err, PadlockError::Io(_)));
        // The configuration is stored even though the write failed.
        assert_eq!(eng.divisor(), 2);
        assert!(eng.register_value().is_some());
        assert_eq!(cpus.msr_writes(1), 0);
    }

    #[test]
    fn test_partial_apply_reported() {
        let cpus = SimulatedCpus::uniform(3, CpuModel::nehemiah_dual());
        cpus.fail_msr_write(2, Some(libc::EIO));
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        match eng.set_enabled(true, Some(generate_config(1).0)) {
            Err(PadlockError::PartialApply {
                applied, total, ..
            }) => assert_eq!((applied, total), (2, 3)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cpus.msr_writes(0), 1);
        assert_eq!(cpus.msr_writes(1), 1);
        assert_eq!(cpus.msr_writes(2), 0);
    }

    #[test]
    fn test_extract_zero_skips_primitive() {
        let (_cpus, mut eng) = ready_engine(1, 1);
        assert_eq!(eng.extract(&mut []).unwrap(), 0);
        assert_eq!(eng.xstore().calls(), 0);
    }

    #[test]
    fn test_extract_without_device() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        let mut buf = [0u8; 8];
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::NoDevice)));
    }

    #[test]
    fn test_extract_before_config() {
        let cpus = SimulatedCpus::uniform(1, CpuModel::nehemiah_dual());
        let mut eng = engine(&cpus);
        eng.init(&cpus).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::InvalidState)));
        assert_eq!(eng.xstore().calls(), 0);
    }

    #[test]
    fn test_extract_fills_exact_length() {
        // Divisor 1: 4 bytes per xstore, 10 is not a multiple.
        let (_cpus, mut eng) = ready_engine(2, 1);
        let mut buf = [0u8; 10];
        assert_eq!(eng.extract(&mut buf).unwrap(), 10);
        assert_eq!(eng.xstore().calls(), 3);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_extract_steps_per_divisor() {
        for (quality, calls) in [(1, 8), (2, 16), (3, 32)] {
            let (_cpus, mut eng) = ready_engine(1, quality);
            let mut buf = [0u8; 32];
            assert_eq!(eng.extract(&mut buf).unwrap(), 32);
            assert_eq!(eng.xstore().calls(), calls, "quality {quality}");
        }
    }

    #[test]
    fn test_extract_waits_out_dry_reads() {
        let (_cpus, mut eng) = ready_engine(1, 3);
        eng.xstore_mut().script_dry_reads(5);
        let mut buf = [0u8; 4];
        assert_eq!(eng.extract(&mut buf).unwrap(), 4);
        assert_eq!(eng.xstore().calls(), 9);
    }

    #[test]
    fn test_extract_survives_overrun() {
        let (_cpus, mut eng) = ready_engine(1, 3);
        eng.xstore_mut().set_overrun(64);
        let mut buf = [0u8; 3];
        assert_eq!(eng.extract(&mut buf).unwrap(), 3);
    }

    #[test]
    fn test_tamper_is_transient_then_recovers() {
        let (cpus, mut eng) = ready_engine(2, 1);
        let good = cpus.rng_msr(0);
        cpus.tamper(0, good | u64::from(ControlFlags::RAW_BITS_ENABLE.bits()));

        let mut buf = [0u8; 16];
        let err = eng.extract(&mut buf).unwrap_err();
        assert!(err.is_retryable());
        // The known-good value was written back.
        assert_eq!(cpus.rng_msr(0), good);

        assert_eq!(eng.extract(&mut buf).unwrap(), 16);
    }

    #[test]
    fn test_tamper_with_failed_reset_still_transient() {
        let (cpus, mut eng) = ready_engine(1, 1);
        cpus.tamper(0, 0);
        cpus.fail_msr_write(0, Some(libc::EIO));
        let mut buf = [0u8; 4];
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::Transient)));
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::Transient)));

        cpus.fail_msr_write(0, None);
        assert!(matches!(eng.extract(&mut buf), Err(PadlockError::Transient)));
        assert_eq!(eng.extract(&mut buf).unwrap(), 4);
    }

    #[test]
    fn test_summary() {
        let (_cpus, eng) = ready_engine(2, 2);
        let summary = eng.summary();
        assert_eq!(summary.cores, 2);
        assert_eq!(summary.variant, RngVariant::DualSource);
        assert_eq!(summary.register_mask, 0x7f40);
        assert_eq!(summary.register_value, Some(0x0240));
        assert_eq!(summary.divisor, 2);
    }
}

//! # padlock-core
//!
//! **Driver-side engine for the VIA PadLock hardware RNG.**
//!
//! `padlock-core` finds the PadLock random number generator on VIA C3/C7/Nano
//! class processors, programs its control register on every core through the
//! Linux `msr` and `cpuid` drivers, and pulls random bytes out with the
//! `xstore` instruction.
//!
//! ## Quick Start
//!
//! ```no_run
//! use padlock_core::{PadlockEngine, generate_config};
//!
//! let mut engine = PadlockEngine::new();
//! let cores = engine.init_with_template(None)?.into_result()?;
//! println!("PadLock RNG on {cores} core(s)");
//!
//! // Quality 1..=3 trades bandwidth for less bit correlation.
//! let (config, entropy_per_bit) = generate_config(2);
//! engine.set_enabled(true, Some(config))?;
//!
//! let mut buf = [0u8; 64];
//! loop {
//!     match engine.extract(&mut buf) {
//!         Ok(_) => break,
//!         Err(e) if e.is_retryable() => continue,
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! println!("{} bits of entropy", buf.len() as f64 * 8.0 * entropy_per_bit);
//!
//! engine.set_enabled(false, None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! Device layer (`/dev/cpu/N/{msr,cpuid}`) → Detection → Engine → `xstore`
//!
//! - [`devices`] abstracts the per-core register files behind traits, so the
//!   engine runs identically against [`sim::SimulatedCpus`].
//! - [`detect`] decides per core whether a usable RNG exists and which
//!   register bits it honours.
//! - [`engine::PadlockEngine`] is all-or-nothing across cores: every core has
//!   the same RNG with the same configuration, or the engine holds nothing.
//!
//! The engine is single-threaded. Wrap it in a mutex to share it.

pub mod config;
pub mod control;
pub mod detect;
pub mod devices;
pub mod engine;
pub mod error;
pub mod sim;
pub mod stats;
pub mod xstore;

pub use config::{DIVISOR_MAX, ENTROPY_PER_BIT, NoiseSource, RngConfig, generate_config};
pub use control::{ControlFlags, MSR_VIA_RNG};
pub use detect::{Detection, RngVariant, UnsupportedReason, decode_cpu_revision, detect_rng};
pub use devices::{CpuDevices, CpuidDevice, CpuidRegs, DevCpuTree, MsrDevice, PathTemplate};
pub use engine::{AbsentReason, CapabilitySummary, InitOutcome, MAX_CPUS, PadlockEngine};
pub use error::{PadlockError, Result};
pub use sim::{CpuModel, SimulatedCpus, SimulatedXstore};
pub use stats::RngStat;
pub use xstore::{HardwareXstore, Xstore, XstoreBuffer};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

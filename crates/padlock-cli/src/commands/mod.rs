pub mod config;
pub mod enable;
pub mod probe;
pub mod stream;

use std::path::Path;

use padlock_core::{AbsentReason, InitOutcome, PadlockError, RngConfig};

/// Operator-facing explanation for an empty probe.
pub fn absent_message(reason: AbsentReason) -> &'static str {
    match reason {
        AbsentReason::NotPresent => "no VIA PadLock RNG on this machine",
        AbsentReason::Unsupported => {
            "VIA PadLock RNG present but unusable (blacklisted revision or mixed cores)"
        }
        AbsentReason::WrongDeviceType => "msr/cpuid drivers do not support this CPU",
    }
}

/// Hint for the common device-layer failures.
pub fn error_hint(err: &PadlockError) -> Option<&'static str> {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => Some("run as root to access /dev/cpu/*/msr"),
        Some(libc::ENOENT) => Some("load the msr and cpuid kernel modules"),
        _ => None,
    }
}

pub fn report_error(context: &str, err: &PadlockError) {
    eprintln!("Error: {context}: {err}");
    if let Some(hint) = error_hint(err) {
        eprintln!("  hint: {hint}");
    }
}

/// Number of usable cores, or exit with a message.
pub fn require_ready(outcome: padlock_core::Result<InitOutcome>) -> usize {
    match outcome {
        Ok(InitOutcome::Ready(n)) => n,
        Ok(InitOutcome::Absent(reason)) => {
            eprintln!("Error: {}", absent_message(reason));
            std::process::exit(1);
        }
        Err(e) => {
            report_error("probing PadLock RNG", &e);
            std::process::exit(1);
        }
    }
}

/// Load an RNG configuration file, or exit with a message.
pub fn load_config(path: &Path) -> RngConfig {
    match RngConfig::load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: reading {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

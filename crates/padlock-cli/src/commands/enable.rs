use padlock_core::{PadlockEngine, RngConfig, Xstore};

/// Apply `config` to every core, with the enable bit set or cleared.
///
/// A fresh process has no stored register value, so disabling also takes the
/// configuration whose enable bit it clears.
pub fn run<X: Xstore>(engine: &mut PadlockEngine<X>, enable: bool, config: RngConfig) {
    if let Err(e) = engine.set_enabled(enable, Some(config)) {
        super::report_error("writing RNG control register", &e);
        std::process::exit(1);
    }

    let state = if enable { "enabled" } else { "disabled" };
    println!(
        "PadLock RNG {state} on {} core(s), register {:#010x}, divisor {}",
        engine.detected_count(),
        engine.register_value().unwrap_or_default().bits(),
        engine.divisor()
    );
}

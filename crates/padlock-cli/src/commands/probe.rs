use padlock_core::{InitOutcome, PadlockEngine, Xstore};

pub fn run<X: Xstore>(
    engine: &PadlockEngine<X>,
    outcome: padlock_core::Result<InitOutcome>,
    json: bool,
) {
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            super::report_error("probing PadLock RNG", &e);
            std::process::exit(1);
        }
    };

    if json {
        let status = match outcome {
            InitOutcome::Ready(_) => "ready".to_string(),
            InitOutcome::Absent(reason) => format!("{reason:?}"),
        };
        let report = serde_json::json!({
            "status": status,
            "summary": engine.summary(),
        });
        println!("{report}");
    } else {
        match outcome {
            InitOutcome::Ready(cores) => {
                println!("VIA PadLock RNG");
                println!("  Cores:         {cores}");
                println!("  Type:          {}", engine.variant());
                println!("  Register mask: {:#06x}", engine.register_mask().bits());
            }
            InitOutcome::Absent(reason) => println!("{}", super::absent_message(reason)),
        }
    }

    if !outcome.is_ready() {
        std::process::exit(1);
    }
}

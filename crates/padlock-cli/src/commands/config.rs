use padlock_core::generate_config;

/// Print the recommended configuration for `quality` and its entropy estimate.
pub fn run(quality: u32) {
    let (config, entropy_per_bit) = generate_config(quality);
    let report = serde_json::json!({
        "quality": quality,
        "config": config,
        "entropy_per_bit": entropy_per_bit,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

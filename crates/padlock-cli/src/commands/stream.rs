use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{info, warn};
use padlock_core::stats::{format_bandwidth, format_counter, format_stat};
use padlock_core::{PadlockEngine, PadlockError, RngConfig, RngStat, Xstore};

const STATS_PREFIX: &str = "padlock: ";

pub struct StreamOptions {
    /// 0 = unlimited.
    pub n_bytes: usize,
    pub block_size: usize,
    pub format: String,
    pub retries: u32,
    pub stats: bool,
    pub keep_enabled: bool,
}

#[derive(Debug, Default)]
struct StreamStats {
    bytes: u64,
    blocks: u64,
    retries: u64,
    block_time: RngStat,
}

impl StreamStats {
    fn report(&self, block_size: usize) -> Vec<String> {
        vec![
            format_counter(STATS_PREFIX, "bytes output", self.bytes),
            format_counter(STATS_PREFIX, "blocks extracted", self.blocks),
            format_counter(STATS_PREFIX, "tamper retries", self.retries),
            format_stat(STATS_PREFIX, "block extraction time", "us", &self.block_time),
            format_bandwidth(
                STATS_PREFIX,
                "extraction bandwidth",
                "B",
                &self.block_time,
                block_size as u64,
            ),
        ]
    }
}

pub fn run<X: Xstore>(engine: &mut PadlockEngine<X>, config: RngConfig, opts: &StreamOptions) {
    if opts.block_size == 0 {
        eprintln!("Error: --block-size must be at least 1");
        std::process::exit(1);
    }
    if let Err(e) = engine.set_enabled(true, Some(config)) {
        super::report_error("enabling RNG", &e);
        std::process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("cannot install Ctrl+C handler: {e}");
    }

    let mut stats = StreamStats::default();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = pump(engine, opts, &running, &mut out, &mut stats);

    if !opts.keep_enabled {
        if let Err(e) = engine.set_enabled(false, None) {
            super::report_error("disabling RNG", &e);
        }
    }
    if opts.stats {
        for line in stats.report(opts.block_size) {
            eprintln!("{line}");
        }
    }
    if let Err(e) = result {
        super::report_error("extracting random bytes", &e);
        std::process::exit(1);
    }
}

/// Fill `buf`, retrying after tamper recovery at most `retries` times.
///
/// Returns the number of retries used.
fn extract_block<X: Xstore>(
    engine: &mut PadlockEngine<X>,
    buf: &mut [u8],
    retries: u32,
) -> Result<u32, PadlockError> {
    let mut used = 0;
    loop {
        match engine.extract(buf) {
            Ok(_) => return Ok(used),
            Err(e) if e.is_retryable() && used < retries => {
                used += 1;
                warn!("RNG configuration reset, retrying block ({used}/{retries})");
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_block<W: Write>(out: &mut W, format: &str, data: &[u8]) -> std::io::Result<()> {
    match format {
        "hex" => {
            let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
            out.write_all(hex.as_bytes())
        }
        _ => out.write_all(data),
    }
}

fn pump<X: Xstore, W: Write>(
    engine: &mut PadlockEngine<X>,
    opts: &StreamOptions,
    running: &AtomicBool,
    out: &mut W,
    stats: &mut StreamStats,
) -> Result<(), PadlockError> {
    let mut buf = vec![0u8; opts.block_size];

    while running.load(Ordering::SeqCst) {
        let want = if opts.n_bytes == 0 {
            opts.block_size
        } else {
            let left = opts.n_bytes.saturating_sub(stats.bytes as usize);
            if left == 0 {
                break;
            }
            left.min(opts.block_size)
        };
        let block = &mut buf[..want];

        let start = Instant::now();
        stats.retries += u64::from(extract_block(engine, block, opts.retries)?);
        stats.block_time.update_elapsed(start.elapsed());
        stats.blocks += 1;
        stats.bytes += want as u64;

        if write_block(out, &opts.format, block)
            .and_then(|()| out.flush())
            .is_err()
        {
            // Broken pipe
            info!("output closed after {} bytes", stats.bytes);
            break;
        }
    }
    Ok(())
}

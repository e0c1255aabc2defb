//! Running min/avg/max counters and operator-facing report lines.
//!
//! The engine never touches these; the read loop feeds block timings in and
//! prints the formatted lines.

use std::time::Duration;

/// Binary multiplier prefixes used when scaling bandwidth units.
const MULTIPLIERS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// Min/max/sum accumulator for a stream of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RngStat {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub num_samples: u64,
}

impl RngStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample.
    ///
    /// A zero `min` means "unset". If the running sum would overflow, the
    /// average restarts from this sample.
    pub fn update(&mut self, value: u64) {
        if self.min == 0 || value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        match (self.sum.checked_add(value), self.num_samples.checked_add(1)) {
            (Some(sum), Some(n)) => {
                self.sum = sum;
                self.num_samples = n;
            }
            _ => {
                self.sum = value;
                self.num_samples = 1;
            }
        }
    }

    /// Record an elapsed time in microseconds.
    pub fn update_elapsed(&mut self, elapsed: Duration) {
        self.update(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn average(&self) -> f64 {
        if self.num_samples == 0 {
            0.0
        } else {
            self.sum as f64 / self.num_samples as f64
        }
    }
}

/// Divide all three values by 1024 while every one of them is at least 1024
/// and return the binary-prefixed unit.
fn scale_unit(base_unit: &str, min: &mut f64, avg: &mut f64, max: &mut f64) -> String {
    let mut mult = 0;
    while *min >= 1024.0 && *avg >= 1024.0 && *max >= 1024.0 && mult < MULTIPLIERS.len() {
        mult += 1;
        *min /= 1024.0;
        *avg /= 1024.0;
        *max /= 1024.0;
    }
    if mult == 0 {
        base_unit.to_string()
    } else {
        format!("{}i{}", MULTIPLIERS[mult - 1], base_unit)
    }
}

pub fn format_counter(prefix: &str, msg: &str, value: u64) -> String {
    format!("{prefix}{msg}: {value}")
}

pub fn format_stat(prefix: &str, msg: &str, unit: &str, stat: &RngStat) -> String {
    format!(
        "{prefix}{msg}: (min={}; avg={:.3}; max={}){unit}",
        stat.min,
        stat.average(),
        stat.max
    )
}

/// Bandwidth line for `blocksize`-unit blocks whose timings (in µs) are in `stat`.
///
/// The slowest block gives the minimum bandwidth and the fastest the maximum.
pub fn format_bandwidth(
    prefix: &str,
    msg: &str,
    unit: &str,
    stat: &RngStat,
    blocksize: u64,
) -> String {
    let per_block = 1_000_000.0 * blocksize as f64;
    let mut bw_min = if stat.max > 0 { per_block / stat.max as f64 } else { 0.0 };
    let mut bw_max = if stat.min > 0 { per_block / stat.min as f64 } else { 0.0 };
    let mut bw_avg = if stat.num_samples > 0 && stat.sum > 0 {
        per_block * stat.num_samples as f64 / stat.sum as f64
    } else {
        0.0
    };

    let scaled = scale_unit(unit, &mut bw_min, &mut bw_avg, &mut bw_max);
    format!("{prefix}{msg}: (min={bw_min:.3}; avg={bw_avg:.3}; max={bw_max:.3}){scaled}/s")
}

//! RNG configuration and the quality → configuration policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::control::{DC_BIAS_MAX, STRING_FILTER_MAX, STRING_FILTER_MIN};
use crate::error::Result;

/// Highest xstore divisor the hardware accepts.
pub const DIVISOR_MAX: u32 = 3;

/// Conservative entropy-per-bit floor for whitened PadLock output.
///
/// This is the published lower bound for the whitened stream, not a measured
/// value, and it does not improve with the divisor.
pub const ENTROPY_PER_BIT: f64 = 0.75;

/// Noise source selection. Single-source parts ignore this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSource {
    A,
    B,
    AB,
}

impl NoiseSource {
    /// Register encoding.
    pub fn bits(self) -> u32 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::AB => 2,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::A),
            1 => Some(Self::B),
            2 => Some(Self::AB),
            _ => None,
        }
    }
}

impl std::fmt::Display for NoiseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
            Self::AB => write!(f, "ab"),
        }
    }
}

/// Requested RNG configuration.
///
/// Out-of-range fields are clamped by [`RngConfig::sanitized`], never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngConfig {
    /// DC bias, 0 = hardware default, max 7.
    #[serde(default)]
    pub dc_bias: u32,
    /// String filter run length, 0 = disabled, otherwise 8..=63.
    #[serde(default)]
    pub string_filter_length: u32,
    pub noise_source: NoiseSource,
    pub whitener: bool,
    /// xstore divisor, 0..=3. Each step halves the bandwidth.
    pub divisor: u32,
}

impl RngConfig {
    /// Copy of this configuration with every field clamped into range.
    pub fn sanitized(&self) -> Self {
        let string_filter_length = match self.string_filter_length {
            0 => 0,
            n => n.clamp(STRING_FILTER_MIN, STRING_FILTER_MAX),
        };
        Self {
            dc_bias: self.dc_bias.min(DC_BIAS_MAX),
            string_filter_length,
            noise_source: self.noise_source,
            whitener: self.whitener,
            divisor: self.divisor.min(DIVISOR_MAX),
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Recommended configuration for a quality level, with its entropy estimate.
///
/// Quality 0 means "default" and is the same as 1 (low); 2 is medium and 3 or
/// above is high. The whitener and every available noise source are always
/// enabled. The string filter stays off so that long runs reach the
/// downstream statistical tests instead of being dropped in hardware. Each
/// quality step raises the divisor by one, which halves bandwidth in exchange
/// for less correlation between adjacent bits.
pub fn generate_config(quality: u32) -> (RngConfig, f64) {
    let cfg = RngConfig {
        dc_bias: 0,
        string_filter_length: 0,
        noise_source: NoiseSource::AB,
        whitener: true,
        divisor: quality.clamp(1, DIVISOR_MAX),
    };
    (cfg, ENTROPY_PER_BIT)
}

//! Typed view of the PadLock RNG control register (MSR `0x110b`).
//!
//! Bit layout, low 32 bits:
//!
//! ```text
//! 31:22 reserved
//! 21:16 string filter count
//! 15    string filter failed
//! 14    string filter enable
//! 13    raw bits enable (whitener bypass)
//! 12:10 DC bias
//!  9:8  noise source select
//!  7    reserved
//!  6    RNG enable
//!  5    reserved
//!  4:0  byte count (xstore status read-back only)
//! ```
//!
//! The xstore status word mirrors the same flag bits, which is what lets the
//! extraction loop notice configuration changes made behind its back.

use bitflags::bitflags;

use crate::config::{NoiseSource, RngConfig};

/// Model-specific register holding the RNG configuration.
pub const MSR_VIA_RNG: u32 = 0x110b;

pub const STRING_FILTER_SHIFT: u32 = 16;
pub const STRING_FILTER_MIN: u32 = 8;
pub const STRING_FILTER_MAX: u32 = 63;
pub const DC_BIAS_SHIFT: u32 = 10;
pub const DC_BIAS_MAX: u32 = 7;
pub const NOISE_SOURCE_SHIFT: u32 = 8;

bitflags! {
    /// Control register / xstore status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u32 {
        const STRING_FILTER_COUNT = STRING_FILTER_MAX << STRING_FILTER_SHIFT;
        const STRING_FILTER_FAILED = 1 << 15;
        const STRING_FILTER_ENABLE = 1 << 14;
        const RAW_BITS_ENABLE = 1 << 13;
        const DC_BIAS = DC_BIAS_MAX << DC_BIAS_SHIFT;
        const NOISE_SOURCE = 0x3 << NOISE_SOURCE_SHIFT;
        const RNG_ENABLE = 1 << 6;
        const BYTE_COUNT = 0x1f;
    }
}

impl ControlFlags {
    /// Pack a configuration into register bits, enable bit set.
    ///
    /// Field values wider than their bit range are truncated; callers are
    /// expected to pass a [`RngConfig::sanitized`] configuration.
    pub fn pack(cfg: &RngConfig) -> Self {
        let mut flags = Self::RNG_ENABLE;
        if !cfg.whitener {
            flags |= Self::RAW_BITS_ENABLE;
        }
        flags |= Self::field(Self::DC_BIAS, DC_BIAS_SHIFT, cfg.dc_bias);
        flags |= Self::field(Self::NOISE_SOURCE, NOISE_SOURCE_SHIFT, cfg.noise_source.bits());
        if cfg.string_filter_length > 0 {
            flags |= Self::STRING_FILTER_ENABLE;
            flags |= Self::field(
                Self::STRING_FILTER_COUNT,
                STRING_FILTER_SHIFT,
                cfg.string_filter_length,
            );
        }
        flags
    }

    fn field(mask: Self, shift: u32, value: u32) -> Self {
        Self::from_bits_retain((value << shift) & mask.bits())
    }

    fn extract(self, mask: Self, shift: u32) -> u32 {
        (self.bits() & mask.bits()) >> shift
    }

    pub fn string_filter_count(self) -> u32 {
        self.extract(Self::STRING_FILTER_COUNT, STRING_FILTER_SHIFT)
    }

    pub fn dc_bias(self) -> u32 {
        self.extract(Self::DC_BIAS, DC_BIAS_SHIFT)
    }

    /// Selected noise source, `None` for the reserved encoding `0b11`.
    pub fn noise_source(self) -> Option<NoiseSource> {
        NoiseSource::from_bits(self.extract(Self::NOISE_SOURCE, NOISE_SOURCE_SHIFT))
    }

    /// Bytes stored by the last xstore (status words only).
    pub fn byte_count(self) -> u32 {
        self.extract(Self::BYTE_COUNT, 0)
    }

    pub fn whitener(self) -> bool {
        !self.contains(Self::RAW_BITS_ENABLE)
    }

    pub fn rng_enabled(self) -> bool {
        self.contains(Self::RNG_ENABLE)
    }
}

//! PadLock RNG feature detection from one core's CPUID leaves.
//!
//! Type 1 RNGs (VIA Nehemiah RNG Programming Guide 1.0) appear on
//! CentaurHauls family 6 model 9 stepping 3 and later. Steppings 0-2 and
//! anything older are known broken. Steppings 3-7 have one noise source;
//! everything newer has two and accepts a noise-source select.

use std::io;

use log::debug;

use crate::control::ControlFlags;
use crate::devices::CpuidDevice;

/// "Cent" "aurH" "auls" in ebx, edx, ecx of leaf 0.
const CENTAUR_EBX: u32 = 0x746e_6543;
const CENTAUR_EDX: u32 = 0x4872_7561;
const CENTAUR_ECX: u32 = 0x736c_7561;

const CENTAUR_EXT_LEVEL: u32 = 0xc000_0000;
const CENTAUR_EXT_FEATURES: u32 = 0xc000_0001;
const CENTAUR_EXT_RNG_PRESENT: u32 = 1 << 2;

/// Family 6 model 9 stepping 2: this and anything earlier is blacklisted.
pub const REVISION_BLACKLIST_MAX: u32 = 0x06_09_02;
/// Family 6 model 9 stepping 7: last single-source revision.
pub const REVISION_SINGLE_SOURCE_MAX: u32 = 0x06_09_07;

/// PadLock RNG generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum RngVariant {
    #[default]
    None,
    SingleSource,
    DualSource,
}

impl std::fmt::Display for RngVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SingleSource => write!(f, "type 1, one noise source"),
            Self::DualSource => write!(f, "type 1, two noise sources"),
        }
    }
}

/// Why a present RNG cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    /// Known non-functional silicon.
    Blacklisted { revision: u32 },
    /// Differs from the RNG found on the first core.
    Mismatch { core: usize },
}

/// Detection outcome for one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Present {
        variant: RngVariant,
        mask: ControlFlags,
        revision: u32,
    },
    NotPresent,
    Unsupported(UnsupportedReason),
}

/// The variant and mask recorded from the first core of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub variant: RngVariant,
    pub mask: ControlFlags,
}

/// Fold CPUID leaf 1 eax into `family << 16 | model << 8 | stepping`.
pub fn decode_cpu_revision(signature: u32) -> u32 {
    let mut family = (signature >> 8) & 0xf;
    let mut model = (signature >> 4) & 0xf;
    if signature & 0xf00 == 0xf00 {
        family += (signature >> 20) & 0xff;
        model |= (signature >> 12) & 0xf0;
    }
    let stepping = signature & 0xf;
    (family << 16) | (model << 8) | stepping
}

/// Capability mask and variant for a revision that passed the blacklist.
pub fn classify_revision(revision: u32) -> (RngVariant, ControlFlags) {
    let base = ControlFlags::STRING_FILTER_ENABLE
        | ControlFlags::RAW_BITS_ENABLE
        | ControlFlags::DC_BIAS
        | ControlFlags::RNG_ENABLE;
    if revision <= REVISION_SINGLE_SOURCE_MAX {
        (RngVariant::SingleSource, base)
    } else {
        (RngVariant::DualSource, base | ControlFlags::NOISE_SOURCE)
    }
}

/// Probe one core.
///
/// `reference` is `None` for the first core of a scan; later cores must match
/// it exactly or they are reported as [`UnsupportedReason::Mismatch`].
pub fn detect_rng(
    cpuid: &mut dyn CpuidDevice,
    core: usize,
    reference: Option<Reference>,
) -> io::Result<Detection> {
    let vendor = cpuid.read_leaf(0)?;
    if vendor.eax == 0
        || vendor.ebx != CENTAUR_EBX
        || vendor.edx != CENTAUR_EDX
        || vendor.ecx != CENTAUR_ECX
    {
        debug!("cpu{core}: not a CentaurHauls processor");
        return Ok(Detection::NotPresent);
    }

    let revision = decode_cpu_revision(cpuid.read_leaf(1)?.eax);

    let ext_level = cpuid.read_leaf(CENTAUR_EXT_LEVEL)?;
    if ext_level.eax < CENTAUR_EXT_FEATURES {
        debug!("cpu{core}: no Centaur extended feature flags");
        return Ok(Detection::NotPresent);
    }
    let ext_features = cpuid.read_leaf(CENTAUR_EXT_FEATURES)?;
    if ext_features.edx & CENTAUR_EXT_RNG_PRESENT == 0 {
        debug!("cpu{core}: PadLock RNG not present");
        return Ok(Detection::NotPresent);
    }

    if revision <= REVISION_BLACKLIST_MAX {
        debug!("cpu{core}: revision {revision:#08x} has a blacklisted RNG");
        return Ok(Detection::Unsupported(UnsupportedReason::Blacklisted {
            revision,
        }));
    }

    let (variant, mask) = classify_revision(revision);
    if let Some(first) = reference {
        if first.variant != variant || first.mask != mask {
            debug!("cpu{core}: {variant} differs from first core's {}", first.variant);
            return Ok(Detection::Unsupported(UnsupportedReason::Mismatch { core }));
        }
    }

    debug!("cpu{core}: revision {revision:#08x}, {variant}, mask {:#06x}", mask.bits());
    Ok(Detection::Present {
        variant,
        mask,
        revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::CpuModel;

    #[test]
    fn test_decode_plain_revision() {
        // Family 6, model 9, stepping 8.
        assert_eq!(decode_cpu_revision(0x0698), 0x06_09_08);
        assert_eq!(decode_cpu_revision(0x06a9), 0x06_0a_09);
    }

    #[test]
    fn test_decode_extended_family_and_model() {
        // Base family 0xf folds in the extended family and model.
        assert_eq!(decode_cpu_revision(0x0012_0f31), 0x10_23_01);
        // Extended fields are ignored unless the base family is 0xf.
        assert_eq!(decode_cpu_revision(0x0012_0631), 0x06_03_01);
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify_revision(0x06_09_03).0, RngVariant::SingleSource);
        assert_eq!(classify_revision(0x06_09_07).0, RngVariant::SingleSource);
        let (variant, mask) = classify_revision(0x06_09_08);
        assert_eq!(variant, RngVariant::DualSource);
        assert!(mask.contains(ControlFlags::NOISE_SOURCE));
        assert!(!classify_revision(0x06_09_05).1.contains(ControlFlags::NOISE_SOURCE));
    }

    #[test]
    fn test_detect_dual_source() {
        let mut cpuid = CpuModel::nehemiah_dual().cpuid();
        match detect_rng(&mut cpuid, 0, None).unwrap() {
            Detection::Present { variant, mask, .. } => {
                assert_eq!(variant, RngVariant::DualSource);
                assert_eq!(mask.bits(), 0x7f40);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_detect_single_source_mask() {
        let mut cpuid = CpuModel::nehemiah_single().cpuid();
        match detect_rng(&mut cpuid, 0, None).unwrap() {
            Detection::Present { variant, mask, .. } => {
                assert_eq!(variant, RngVariant::SingleSource);
                assert_eq!(mask.bits(), 0x7c40);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_vendor_is_not_present() {
        let mut cpuid = CpuModel::genuine_intel().cpuid();
        assert_eq!(detect_rng(&mut cpuid, 0, None).unwrap(), Detection::NotPresent);
    }

    #[test]
    fn test_zero_max_leaf_is_not_present() {
        let mut model = CpuModel::nehemiah_dual();
        model.max_leaf = 0;
        assert_eq!(
            detect_rng(&mut model.cpuid(), 0, None).unwrap(),
            Detection::NotPresent
        );
    }

    #[test]
    fn test_missing_extended_leaf_is_not_present() {
        let mut model = CpuModel::nehemiah_dual();
        model.max_ext_leaf = CENTAUR_EXT_LEVEL;
        assert_eq!(
            detect_rng(&mut model.cpuid(), 0, None).unwrap(),
            Detection::NotPresent
        );
    }

    #[test]
    fn test_missing_rng_bit_is_not_present() {
        let mut model = CpuModel::nehemiah_dual();
        model.rng_present = false;
        assert_eq!(
            detect_rng(&mut model.cpuid(), 0, None).unwrap(),
            Detection::NotPresent
        );
    }

    #[test]
    fn test_blacklisted_stepping() {
        let mut cpuid = CpuModel::with_signature(0x0692).cpuid();
        assert_eq!(
            detect_rng(&mut cpuid, 0, None).unwrap(),
            Detection::Unsupported(UnsupportedReason::Blacklisted {
                revision: 0x06_09_02
            })
        );
    }

    #[test]
    fn test_later_core_must_match_reference() {
        let reference = Reference {
            variant: RngVariant::DualSource,
            mask: classify_revision(0x06_09_08).1,
        };
        let mut single = CpuModel::nehemiah_single().cpuid();
        assert_eq!(
            detect_rng(&mut single, 2, Some(reference)).unwrap(),
            Detection::Unsupported(UnsupportedReason::Mismatch { core: 2 })
        );
        let mut dual = CpuModel::nehemiah_dual().cpuid();
        assert!(matches!(
            detect_rng(&mut dual, 1, Some(reference)).unwrap(),
            Detection::Present { .. }
        ));
    }

    #[test]
    fn test_read_error_propagates() {
        let mut model = CpuModel::nehemiah_dual();
        model.read_error = Some(libc::EIO);
        let err = detect_rng(&mut model.cpuid(), 0, None).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }
}

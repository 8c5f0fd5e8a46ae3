//! Per-model speed unit translation.
//!
//! Each supported treadmill model reports and accepts speed in its own raw
//! unit. The registry maps the advertised model name to a translator; an
//! unknown model gets no translator at all rather than a guessed scale.

use crate::{
    error::{KspadError, Result},
    types::SpeedUnit,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Advertised name of the reference model
pub const REFERENCE_MODEL: &str = "KS-ST-A1P";

/// Speed translation strategy for one treadmill model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTranslator {
    /// Raw unit is 1/16 mph
    SixteenthMph,
}

const REGISTRY: &[(&str, ModelTranslator)] = &[(REFERENCE_MODEL, ModelTranslator::SixteenthMph)];

/// Look up the translator for an advertised model name (exact match)
#[must_use]
pub fn translator_for(model_name: &str) -> Option<ModelTranslator> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == model_name)
        .map(|(_, translator)| *translator)
}

/// Model names with a registered translator
pub fn known_models() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

impl ModelTranslator {
    /// Unit of the physical speeds this translator produces
    #[must_use]
    pub const fn unit(self) -> SpeedUnit {
        match self {
            Self::SixteenthMph => SpeedUnit::Miles,
        }
    }

    /// Convert a raw device speed to physical units
    #[must_use]
    pub fn to_physical(self, raw: u8) -> f64 {
        match self {
            Self::SixteenthMph => f64::from(raw) / 16.0,
        }
    }

    /// Convert a physical speed to raw device units
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::InvalidArgument`] if `physical` is negative, not
    /// finite, or rounds to a raw value above 255.
    pub fn to_raw(self, physical: f64) -> Result<u8> {
        if !physical.is_finite() || physical < 0.0 {
            return Err(KspadError::InvalidArgument(format!(
                "Speed {physical} {} is not a valid belt speed",
                self.unit()
            )));
        }

        let raw = match self {
            Self::SixteenthMph => (physical * 16.0).round(),
        };

        if raw > f64::from(u8::MAX) {
            return Err(KspadError::InvalidArgument(format!(
                "Speed {physical:.2} {} exceeds the maximum of {:.2}",
                self.unit(),
                self.to_physical(u8::MAX)
            )));
        }

        Ok(raw as u8)
    }
}

impl fmt::Display for ModelTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SixteenthMph => write!(f, "1/16 mph"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(
            translator_for("KS-ST-A1P"),
            Some(ModelTranslator::SixteenthMph)
        );
        assert_eq!(translator_for("ks-st-a1p"), None);
        assert_eq!(translator_for("KS-ST-A1"), None);
        assert_eq!(translator_for(""), None);
        assert_eq!(known_models().collect::<Vec<_>>(), vec![REFERENCE_MODEL]);
    }

    #[test]
    fn test_reference_conversion() {
        let t = ModelTranslator::SixteenthMph;
        assert!((t.to_physical(0x20) - 2.0).abs() < f64::EPSILON);
        assert_eq!(t.to_raw(2.0).unwrap(), 0x20);
        assert_eq!(t.to_raw(0.0).unwrap(), 0);
        assert_eq!(t.to_raw(2.03).unwrap(), 0x20);
        assert_eq!(t.to_raw(2.04).unwrap(), 0x21);
        assert_eq!(t.unit(), SpeedUnit::Miles);
    }

    #[test]
    fn test_to_raw_rejects_out_of_range() {
        let t = ModelTranslator::SixteenthMph;
        assert_eq!(t.to_raw(255.0 / 16.0).unwrap(), 255);
        assert!(matches!(t.to_raw(16.0), Err(KspadError::InvalidArgument(_))));
        assert!(matches!(t.to_raw(-0.5), Err(KspadError::InvalidArgument(_))));
        assert!(matches!(
            t.to_raw(f64::NAN),
            Err(KspadError::InvalidArgument(_))
        ));
        assert!(matches!(
            t.to_raw(f64::INFINITY),
            Err(KspadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_round_trip_all_raw_values() {
        let t = ModelTranslator::SixteenthMph;
        for raw in 0..=u8::MAX {
            let back = t.to_raw(t.to_physical(raw)).unwrap();
            assert!(back.abs_diff(raw) <= 1, "raw {raw} came back as {back}");
        }
    }
}

//! Decoded upstream payloads and their structural validation.
//!
//! Only the fields the consuming command layer actually renders are decoded;
//! everything else in the upstream response is ignored. Each snapshot type
//! validates itself before the cache will commit it.

mod alliance;
mod bulk;
mod nation;

pub use alliance::Alliance;
pub use bulk::{AllianceSummary, BulkDataset, NationSummary, WarRecord};
pub use nation::{City, Nation};

use serde::Deserializer;
use thiserror::Error;

pub type NationId = u32;
pub type AllianceId = u32;

/// Structural problems in a decoded snapshot. Absorbed by the cache layer;
/// never surfaced to readers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("nation id must be non-zero")]
    ZeroNationId,
    #[error("alliance id must be non-zero")]
    ZeroAllianceId,
    #[error("name cannot be empty")]
    EmptyName,
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("bulk dataset contains no nations")]
    EmptyDataset,
    #[error("bulk dataset row {index} has a zero id")]
    ZeroRowId { index: usize },
}

pub(crate) fn check_score(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

/// The upstream `ID` scalar arrives as either a JSON number or a numeric
/// string depending on the endpoint; accept both.
pub(crate) fn id_from_api<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct IdVisitor;

    impl serde::de::Visitor<'_> for IdVisitor {
        type Value = u32;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("an integer or a numeric string")
        }

        fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<u32, E> {
            u32::try_from(value).map_err(E::custom)
        }

        fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<u32, E> {
            u32::try_from(value).map_err(E::custom)
        }

        fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<u32, E> {
            value.trim().parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

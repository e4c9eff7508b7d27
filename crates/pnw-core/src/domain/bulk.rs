use serde::{Deserialize, Serialize};

use super::{id_from_api, AllianceId, NationId, ValidationError};

/// Wholesale world snapshot backing the bulk cache tier.
///
/// Assembled from paginated nation pages plus the war and alliance tables;
/// replaced as a unit on every successful refresh, never merged in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkDataset {
    pub nations: Vec<NationSummary>,
    pub wars: Vec<WarRecord>,
    pub alliances: Vec<AllianceSummary>,
}

impl BulkDataset {
    /// A committable snapshot must carry at least the nation table, and no
    /// row may have lost its id in transit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nations.is_empty() {
            return Err(ValidationError::EmptyDataset);
        }
        for (index, nation) in self.nations.iter().enumerate() {
            if nation.id == 0 {
                return Err(ValidationError::ZeroRowId { index });
            }
        }
        Ok(())
    }

    pub fn nation(&self, id: NationId) -> Option<&NationSummary> {
        self.nations.iter().find(|nation| nation.id == id)
    }
}

/// One row of the bulk nation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NationSummary {
    #[serde(deserialize_with = "id_from_api")]
    pub id: NationId,
    pub nation_name: String,
    #[serde(default, deserialize_with = "id_from_api")]
    pub alliance_id: AllianceId,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub num_cities: u32,
    #[serde(default)]
    pub soldiers: u32,
    #[serde(default)]
    pub tanks: u32,
    #[serde(default)]
    pub aircraft: u32,
    #[serde(default)]
    pub ships: u32,
    #[serde(default)]
    pub beige_turns: u32,
    #[serde(default)]
    pub vmode: u32,
}

/// One row of the bulk war table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarRecord {
    #[serde(deserialize_with = "id_from_api")]
    pub id: u32,
    #[serde(default, deserialize_with = "id_from_api")]
    pub att_id: NationId,
    #[serde(default, deserialize_with = "id_from_api")]
    pub def_id: NationId,
    #[serde(default)]
    pub turns_left: i32,
}

/// One row of the bulk alliance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllianceSummary {
    #[serde(deserialize_with = "id_from_api")]
    pub id: AllianceId,
    pub name: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub rank: u32,
}

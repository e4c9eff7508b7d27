use serde::{Deserialize, Serialize};

use super::{check_score, id_from_api, AllianceId, NationId, ValidationError};

/// Per-entity nation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nation {
    #[serde(deserialize_with = "id_from_api")]
    pub id: NationId,
    pub nation_name: String,
    pub leader_name: String,
    pub score: f64,
    /// 0 means no alliance.
    #[serde(default, deserialize_with = "id_from_api")]
    pub alliance_id: AllianceId,
    #[serde(default)]
    pub alliance_position: Option<String>,
    #[serde(default)]
    pub last_active: Option<String>,
    #[serde(default)]
    pub soldiers: u32,
    #[serde(default)]
    pub tanks: u32,
    #[serde(default)]
    pub aircraft: u32,
    #[serde(default)]
    pub ships: u32,
    #[serde(default)]
    pub missiles: u32,
    #[serde(default)]
    pub nukes: u32,
    #[serde(default)]
    pub spies: u32,
    /// Turns of beige protection remaining; 0 when raidable.
    #[serde(default)]
    pub beige_turns: u32,
    /// Vacation-mode turns remaining; 0 when active.
    #[serde(default)]
    pub vmode: u32,
    #[serde(default)]
    pub cities: Vec<City>,
}

impl Nation {
    pub fn is_in_alliance(&self) -> bool {
        self.alliance_id != 0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id == 0 {
            return Err(ValidationError::ZeroNationId);
        }
        if self.nation_name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        check_score("score", self.score)
    }
}

/// City improvements relevant to military capacity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    #[serde(deserialize_with = "id_from_api")]
    pub id: u32,
    #[serde(default)]
    pub infrastructure: f64,
    #[serde(default)]
    pub barracks: u32,
    #[serde(default)]
    pub factory: u32,
    #[serde(default)]
    pub hangar: u32,
    #[serde(default)]
    pub drydock: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Nation {
        Nation {
            id: 590_508,
            nation_name: String::from("Testlandia"),
            leader_name: String::from("Max"),
            score: 2_450.5,
            alliance_id: 13_033,
            alliance_position: Some(String::from("MEMBER")),
            last_active: None,
            soldiers: 15_000,
            tanks: 1_250,
            aircraft: 75,
            ships: 10,
            missiles: 0,
            nukes: 0,
            spies: 12,
            beige_turns: 0,
            vmode: 0,
            cities: vec![City {
                id: 1,
                infrastructure: 2_000.0,
                barracks: 5,
                factory: 0,
                hangar: 5,
                drydock: 0,
            }],
        }
    }

    #[test]
    fn well_formed_nation_validates() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn zero_id_is_rejected() {
        let mut nation = sample();
        nation.id = 0;
        assert_eq!(nation.validate(), Err(ValidationError::ZeroNationId));
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut nation = sample();
        nation.nation_name = String::from("   ");
        assert_eq!(nation.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn non_finite_score_is_rejected() {
        let mut nation = sample();
        nation.score = f64::NAN;
        assert_eq!(
            nation.validate(),
            Err(ValidationError::NonFiniteValue { field: "score" })
        );
    }

    #[test]
    fn decodes_from_upstream_shape_with_string_ids() {
        let body = r#"{
            "id": "590508",
            "nation_name": "Testlandia",
            "leader_name": "Max",
            "score": 2450.5,
            "alliance_id": "13033",
            "soldiers": 15000,
            "cities": [{"id": "1", "infrastructure": 2000.0, "barracks": 5}]
        }"#;

        let nation: Nation = serde_json::from_str(body).expect("valid nation body");
        assert_eq!(nation.id, 590_508);
        assert_eq!(nation.alliance_id, 13_033);
        assert_eq!(nation.cities.len(), 1);
        assert_eq!(nation.cities[0].barracks, 5);
        assert!(nation.is_in_alliance());
    }
}

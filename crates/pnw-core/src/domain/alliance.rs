use serde::{Deserialize, Serialize};

use super::{check_score, id_from_api, AllianceId, ValidationError};

/// Aggregate alliance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
    #[serde(deserialize_with = "id_from_api")]
    pub id: AllianceId,
    pub name: String,
    #[serde(default)]
    pub acronym: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub rank: u32,
    /// Member nation count, applicants excluded.
    #[serde(default)]
    pub members: u32,
}

impl Alliance {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id == 0 {
            return Err(ValidationError::ZeroAllianceId);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        check_score("score", self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_alliance_validates() {
        let alliance = Alliance {
            id: 13_033,
            name: String::from("The Syndicate"),
            acronym: Some(String::from("t$")),
            score: 410_000.0,
            rank: 3,
            members: 180,
        };
        assert!(alliance.validate().is_ok());
    }

    #[test]
    fn zero_id_is_rejected() {
        let alliance = Alliance {
            id: 0,
            name: String::from("Ghost"),
            acronym: None,
            score: 0.0,
            rank: 0,
            members: 0,
        };
        assert_eq!(alliance.validate(), Err(ValidationError::ZeroAllianceId));
    }
}

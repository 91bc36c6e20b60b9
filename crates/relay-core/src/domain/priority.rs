//! Task priority on a fixed four-step scale.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::RelayError;

/// Priority is serialized as its numeric weight (25/50/75/100) and parsed from
/// either the weight or the label (`low`, `medium`, `high`, `critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn weight(self) -> u8 {
        match self {
            Priority::Low => 25,
            Priority::Medium => 50,
            Priority::High => 75,
            Priority::Critical => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = RelayError;

    fn try_from(weight: u8) -> Result<Self, Self::Error> {
        match weight {
            25 => Ok(Priority::Low),
            50 => Ok(Priority::Medium),
            75 => Ok(Priority::High),
            100 => Ok(Priority::Critical),
            other => Err(RelayError::validation(format!(
                "priority {other} is not on the scale 25/50/75/100"
            ))),
        }
    }
}

impl FromStr for Priority {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(weight) = s.parse::<u8>() {
            return Priority::try_from(weight);
        }
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(RelayError::validation(format!("unknown priority '{s}'"))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.weight())
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.weight())
    }
}

/// Accepts `75` as well as `"high"` so hand-written JSON stays forgiving.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Weight(u8),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Weight(w) => Priority::try_from(w).map_err(serde::de::Error::custom),
            Raw::Label(l) => l.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("low", Priority::Low)]
    #[case("Critical", Priority::Critical)]
    #[case("75", Priority::High)]
    #[case("50", Priority::Medium)]
    fn parses_labels_and_weights(#[case] raw: &str, #[case] expected: Priority) {
        assert_eq!(raw.parse::<Priority>().unwrap(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("60")]
    #[case("urgent")]
    fn rejects_values_off_the_scale(#[case] raw: &str) {
        assert!(matches!(
            raw.parse::<Priority>(),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn ordering_follows_weight() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn json_uses_numeric_weight() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "75");
        let p: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, Priority::Critical);
        assert!(serde_json::from_str::<Priority>("42").is_err());
    }
}

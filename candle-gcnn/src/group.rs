//! Discrete symmetry groups acting on feature channels.
//!
//! Only the order of a group matters for normalization: a group-convolution with group `G`
//! produces feature maps whose channels come in orbits of `G.order()` consecutive entries.
use crate::{Error, Result};

/// The symmetry groups supported by the group-convolution layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Group {
    /// Translations only (`Z2`), orbits of size 1.
    Trivial,
    /// Translations and rotations by multiples of 90 degrees (`C4`).
    Rotation4,
    /// Translations, rotations by multiples of 90 degrees and reflections (`D4`).
    RotationReflection8,
}

impl Group {
    /// Number of channels in each orbit.
    pub fn order(&self) -> usize {
        match self {
            Self::Trivial => 1,
            Self::Rotation4 => 4,
            Self::RotationReflection8 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "Z2",
            Self::Rotation4 => "C4",
            Self::RotationReflection8 => "D4",
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Group {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Z2" => Ok(Self::Trivial),
            "C4" => Ok(Self::Rotation4),
            "D4" => Ok(Self::RotationReflection8),
            _ => Err(Error::UnknownGroup(s.to_string())),
        }
    }
}

impl TryFrom<String> for Group {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Group> for String {
    fn from(group: Group) -> Self {
        group.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_order() {
        for (id, order) in [("Z2", 1), ("C4", 4), ("D4", 8)] {
            let group: Group = id.parse().unwrap();
            assert_eq!(group.order(), order);
            assert_eq!(group.to_string(), id);
        }
    }

    #[test]
    fn unknown_group() {
        let err = "C8".parse::<Group>().unwrap_err();
        assert!(matches!(err, Error::UnknownGroup(ref s) if s == "C8"));
        assert!("c4".parse::<Group>().is_err());
    }

    #[test]
    fn serde_uses_identifier() {
        let json = serde_json::to_string(&Group::RotationReflection8).unwrap();
        assert_eq!(json, "\"D4\"");
        let group: Group = serde_json::from_str("\"C4\"").unwrap();
        assert_eq!(group, Group::Rotation4);
        assert!(serde_json::from_str::<Group>("\"P4M\"").is_err());
    }
}

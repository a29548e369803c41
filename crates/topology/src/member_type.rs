//! Member roles within a group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TopologyError;

/// The role a member plays in its group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    /// Full participant: owns keys and performs recovery.
    Core,

    /// Observes the group without owning keys or recovering others.
    Spectator,

    /// Observes and reports failures out-of-band; never recovers.
    Watchdog,
}

impl MemberType {
    /// Whether members of this type own keys and can be picked as recoverers.
    #[must_use]
    pub const fn is_core(self) -> bool {
        matches!(self, Self::Core)
    }

    /// Whether members of this type appear in the alive-and-ready view.
    #[must_use]
    pub const fn in_ready_view(self) -> bool {
        matches!(self, Self::Core | Self::Spectator)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Core => "CORE",
            Self::Spectator => "SPECTATOR",
            Self::Watchdog => "WATCHDOG",
        };
        f.write_str(name)
    }
}

impl FromStr for MemberType {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CORE" => Ok(Self::Core),
            "SPECTATOR" => Ok(Self::Spectator),
            "WATCHDOG" => Ok(Self::Watchdog),
            _ => Err(TopologyError::UnknownMemberType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("core".parse::<MemberType>().unwrap(), MemberType::Core);
        assert_eq!("Watchdog".parse::<MemberType>().unwrap(), MemberType::Watchdog);
        assert!("observer".parse::<MemberType>().is_err());
    }

    #[test]
    fn test_roles() {
        assert!(MemberType::Core.is_core());
        assert!(!MemberType::Spectator.is_core());
        assert!(MemberType::Spectator.in_ready_view());
        assert!(!MemberType::Watchdog.in_ready_view());
    }
}

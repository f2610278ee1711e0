use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LifecycleError;

/// Where a tenant is in its subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantState {
    /// Signed up, not yet paying.
    Trial,
    /// Paying and in good standing.
    Active,
    /// Payment failed or subscription canceled; read-only access until the
    /// grace window runs out.
    GracePeriod,
    /// No access. Data kept until the archive window runs out.
    Suspended,
    /// Terminal.
    Archived,
}

impl TenantState {
    pub const ALL: [TenantState; 5] = [
        Self::Trial,
        Self::Active,
        Self::GracePeriod,
        Self::Suspended,
        Self::Archived,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "TRIAL",
            Self::Active => "ACTIVE",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::Suspended => "SUSPENDED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// States reachable from this one in a single transition.
    #[must_use]
    pub fn allowed_transitions(&self) -> &'static [TenantState] {
        match self {
            Self::Trial => &[Self::Active, Self::Suspended],
            Self::Active => &[Self::GracePeriod, Self::Suspended],
            Self::GracePeriod => &[Self::Active, Self::Suspended],
            Self::Suspended => &[Self::Active, Self::Archived],
            Self::Archived => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(&self, target: TenantState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// TRIAL or ACTIVE.
    #[must_use]
    pub fn is_in_good_standing(&self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }

    /// Whether the tenant can still reach the portal at all.
    #[must_use]
    pub fn can_access_services(&self) -> bool {
        matches!(self, Self::Trial | Self::Active | Self::GracePeriod)
    }
}

/// Whether `from -> to` is a legal single transition.
#[must_use]
pub fn can_transition(from: TenantState, to: TenantState) -> bool {
    from.can_transition_to(to)
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing a tenant state string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError {
    invalid_value: String,
}

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid tenant state: '{}' (expected: TRIAL, ACTIVE, GRACE_PERIOD, SUSPENDED, or ARCHIVED)",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseStateError {}

impl From<ParseStateError> for LifecycleError {
    fn from(err: ParseStateError) -> Self {
        LifecycleError::bad_request(err.to_string())
    }
}

impl FromStr for TenantState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRIAL" => Ok(Self::Trial),
            "ACTIVE" => Ok(Self::Active),
            "GRACE_PERIOD" => Ok(Self::GracePeriod),
            "SUSPENDED" => Ok(Self::Suspended),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(ParseStateError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TenantState::*;

    #[test]
    fn test_transition_table() {
        let legal = [
            (Trial, Active),
            (Trial, Suspended),
            (Active, GracePeriod),
            (Active, Suspended),
            (GracePeriod, Active),
            (GracePeriod, Suspended),
            (Suspended, Active),
            (Suspended, Archived),
        ];

        for from in TenantState::ALL {
            for to in TenantState::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    can_transition(from, to),
                    expected,
                    "{from} -> {to} should be {}",
                    if expected { "legal" } else { "illegal" }
                );
            }
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in TenantState::ALL {
            assert!(!state.can_transition_to(state), "{state} allows a self loop");
        }
    }

    #[test]
    fn test_archived_is_the_only_terminal_state() {
        let terminal: Vec<_> = TenantState::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Archived]);
    }

    #[test]
    fn test_standing_predicates() {
        assert!(Trial.is_in_good_standing());
        assert!(Active.is_in_good_standing());
        assert!(!GracePeriod.is_in_good_standing());

        assert!(GracePeriod.can_access_services());
        assert!(!Suspended.can_access_services());
        assert!(!Archived.can_access_services());
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("grace_period".parse::<TenantState>().unwrap(), GracePeriod);
        assert_eq!(" ACTIVE ".parse::<TenantState>().unwrap(), Active);
        assert!("DELETED".parse::<TenantState>().is_err());

        for state in TenantState::ALL {
            assert_eq!(state.to_string().parse::<TenantState>().unwrap(), state);
        }
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&GracePeriod).unwrap();
        assert_eq!(json, "\"GRACE_PERIOD\"");
        let parsed: TenantState = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(parsed, Suspended);
    }
}

//! Ticker validity states and per-ticker records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Eligibility of a ticker for retrieval and ranking.
///
/// Serialized by name in `ticker_dict.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickerState {
    /// Seen in the universe, not yet checked against thresholds.
    NotValidated,
    /// Passed the market-cap and dollar-volume thresholds.
    Valid,
    /// Data was retrievable but a threshold check failed.
    Invalid,
    /// Confirmed unresolvable at the provider. Never retried; purged on cleaning.
    Remove,
    /// Valid, but statements or market cap were absent after retrieval. Retryable.
    MissingInfo,
}

impl TickerState {
    pub const ALL: [TickerState; 5] = [
        TickerState::NotValidated,
        TickerState::Valid,
        TickerState::Invalid,
        TickerState::Remove,
        TickerState::MissingInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TickerState::NotValidated => "NOT_VALIDATED",
            TickerState::Valid => "VALID",
            TickerState::Invalid => "INVALID",
            TickerState::Remove => "REMOVE",
            TickerState::MissingInfo => "MISSING_INFO",
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Self-transitions are not edges; the registry treats them as no-ops.
    pub fn can_transition_to(&self, next: TickerState) -> bool {
        use TickerState::*;
        matches!(
            (self, next),
            (NotValidated, Valid)
                | (NotValidated, Invalid)
                | (NotValidated, Remove)
                | (Valid, Remove)
                | (Valid, MissingInfo)
                | (MissingInfo, Valid)
                | (MissingInfo, Remove)
        )
    }
}

impl fmt::Display for TickerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sector metadata carried from the universe file to the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorProfile {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
}

/// Everything the registry knows about one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub state: TickerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_dollar_volume_10d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<SectorProfile>,
}

impl TickerRecord {
    pub fn new(profile: Option<SectorProfile>) -> Self {
        Self {
            state: TickerState::NotValidated,
            market_cap: None,
            price: None,
            avg_dollar_volume_10d: None,
            profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_is_terminal() {
        for next in TickerState::ALL {
            assert!(!TickerState::Remove.can_transition_to(next));
        }
    }

    #[test]
    fn invalid_is_terminal_within_a_pass() {
        for next in TickerState::ALL {
            assert!(!TickerState::Invalid.can_transition_to(next));
        }
    }

    #[test]
    fn missing_info_can_be_retried() {
        assert!(TickerState::Valid.can_transition_to(TickerState::MissingInfo));
        assert!(TickerState::MissingInfo.can_transition_to(TickerState::Valid));
    }

    #[test]
    fn serializes_screaming_case() {
        let json = serde_json::to_string(&TickerState::MissingInfo).unwrap();
        assert_eq!(json, "\"MISSING_INFO\"");
    }
}

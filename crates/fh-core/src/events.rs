//! Circuit-breaker transition events and their listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProviderState;

/// One provider state change. Serialized as the webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerTransition {
    pub provider: String,
    pub from_state: ProviderState,
    pub to_state: ProviderState,
    pub timestamp: DateTime<Utc>,
}

/// Receives breaker transitions. Implementations must not block: they are
/// invoked from the scheduling path.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &BreakerTransition);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_body_shape() {
        let transition = BreakerTransition {
            provider: "llm:opus".to_string(),
            from_state: ProviderState::Closed,
            to_state: ProviderState::Open,
            timestamp: "2026-01-02T03:04:05Z".parse().unwrap(),
        };
        let value = serde_json::to_value(&transition).unwrap();
        assert_eq!(value["provider"], "llm:opus");
        assert_eq!(value["fromState"], "CLOSED");
        assert_eq!(value["toState"], "OPEN");
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");
    }
}

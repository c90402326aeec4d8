/// Lifecycle of a realtime subscription for one collection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// No key selected, or the previous subscription was torn down.
    #[default]
    Idle,
    /// Waiting for the push channel to acknowledge the subscription.
    Connecting,
    /// Live events are flowing.
    Subscribed,
    /// The channel failed. `attempt` counts reconnects scheduled so far;
    /// `exhausted` is set once automatic retries have stopped.
    Error { attempt: u32, exhausted: bool },
}

impl SubscriptionState {
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns true once automatic reconnects have given up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Error { exhausted: true, .. })
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Error {
                exhausted: true, ..
            } => write!(f, "Error (reconnect attempts exhausted)"),
            Self::Error { attempt, .. } => write!(f, "Error (reconnect attempt {attempt})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_state_display() {
        assert_eq!(SubscriptionState::Subscribed.to_string(), "Subscribed");
        assert_eq!(
            SubscriptionState::Error {
                attempt: 2,
                exhausted: false
            }
            .to_string(),
            "Error (reconnect attempt 2)"
        );
        assert!(
            SubscriptionState::Error {
                attempt: 6,
                exhausted: true
            }
            .is_exhausted()
        );
    }
}

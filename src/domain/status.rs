use serde::{Deserialize, Serialize};

/// Delivery lifecycle of one outbound message or one broadcast recipient.
///
/// Progress states carry an explicit rank; the two failure states are
/// terminal and unranked. Persisted string forms are never compared
/// directly, everything goes through [`DeliveryStatus::rank`] and
/// [`Transition::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
}

impl DeliveryStatus {
    /// Numeric rank for progress states, `None` for failure states.
    pub fn rank(&self) -> Option<u8> {
        match self {
            DeliveryStatus::Pending => Some(0),
            DeliveryStatus::Queued => Some(1),
            DeliveryStatus::Sending => Some(2),
            DeliveryStatus::Sent => Some(3),
            DeliveryStatus::Delivered => Some(4),
            DeliveryStatus::Read => Some(5),
            DeliveryStatus::Failed | DeliveryStatus::Undelivered => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryStatus::Failed | DeliveryStatus::Undelivered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Undelivered => "undelivered",
        }
    }

    pub fn from_str(value: &str) -> Option<DeliveryStatus> {
        match value {
            "pending" => Some(DeliveryStatus::Pending),
            "queued" => Some(DeliveryStatus::Queued),
            "sending" => Some(DeliveryStatus::Sending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" => Some(DeliveryStatus::Failed),
            "undelivered" => Some(DeliveryStatus::Undelivered),
            _ => None,
        }
    }

    /// Normalizes the gateway's callback vocabulary, case-insensitively.
    /// `accepted` is the gateway's pre-queue state and maps to `Queued`.
    pub fn from_provider(value: &str) -> Option<DeliveryStatus> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "accepted" => Some(DeliveryStatus::Queued),
            other => DeliveryStatus::from_str(other),
        }
    }
}

/// Outcome of checking an incoming status against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Incoming state is strictly more advanced, apply it.
    Advance,
    /// Incoming state is a failure and the row is not failed yet.
    Fail,
    /// Would move backwards or duplicate the current state; log and drop.
    Stale,
}

impl Transition {
    /// Monotonic-rank rule. Retry resets to `Pending` do not go through
    /// here: only the retry scheduler performs them, via its claim update.
    pub fn plan(current: DeliveryStatus, incoming: DeliveryStatus) -> Transition {
        if incoming.is_failure() {
            if current.is_failure() {
                return Transition::Stale;
            }
            return Transition::Fail;
        }
        match (current.rank(), incoming.rank()) {
            (Some(cur), Some(inc)) if inc > cur => Transition::Advance,
            _ => Transition::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_is_strictly_increasing_along_the_happy_path() {
        let path = [
            DeliveryStatus::Pending,
            DeliveryStatus::Queued,
            DeliveryStatus::Sending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].rank().unwrap() < pair[1].rank().unwrap());
            assert_eq!(Transition::plan(pair[0], pair[1]), Transition::Advance);
        }
    }

    #[test]
    fn late_sent_does_not_overwrite_delivered() {
        assert_eq!(
            Transition::plan(DeliveryStatus::Delivered, DeliveryStatus::Sent),
            Transition::Stale
        );
    }

    #[test]
    fn duplicate_delivered_is_stale_not_an_error() {
        assert_eq!(
            Transition::plan(DeliveryStatus::Delivered, DeliveryStatus::Delivered),
            Transition::Stale
        );
    }

    #[test]
    fn failure_is_reachable_from_any_progress_state() {
        for current in [
            DeliveryStatus::Pending,
            DeliveryStatus::Queued,
            DeliveryStatus::Sending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
        ] {
            assert_eq!(
                Transition::plan(current, DeliveryStatus::Failed),
                Transition::Fail
            );
        }
    }

    #[test]
    fn failure_states_never_overwrite_each_other() {
        assert_eq!(
            Transition::plan(DeliveryStatus::Failed, DeliveryStatus::Undelivered),
            Transition::Stale
        );
        assert_eq!(
            Transition::plan(DeliveryStatus::Undelivered, DeliveryStatus::Failed),
            Transition::Stale
        );
    }

    #[test]
    fn provider_vocabulary_is_case_insensitive() {
        assert_eq!(
            DeliveryStatus::from_provider("DELIVERED"),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(
            DeliveryStatus::from_provider(" Accepted "),
            Some(DeliveryStatus::Queued)
        );
        assert_eq!(DeliveryStatus::from_provider("bogus"), None);
    }
}

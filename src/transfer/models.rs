use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an asset transfer.
///
/// `Accepted` transfers become `Completed` when their effective date
/// arrives and the effectuation job runs. All other states are terminal
/// or wait on a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Accepted => "accepted",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "accepted" => Some(TransferStatus::Accepted),
            "rejected" => Some(TransferStatus::Rejected),
            "completed" => Some(TransferStatus::Completed),
            "cancelled" => Some(TransferStatus::Cancelled),
            _ => None,
        }
    }
}

/// A request to move an asset between locations, effective from a given
/// date once approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTransfer {
    pub id: i64,
    pub asset_id: String,
    pub from_location: String,
    pub to_location: String,
    pub status: TransferStatus,
    /// Date from which an accepted transfer may be effectuated.
    pub effective_date: DateTime<Utc>,
    /// Who accepted or rejected the transfer, once decided.
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Accepted,
            TransferStatus::Rejected,
            TransferStatus::Completed,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(TransferStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransferStatus::parse("shipped"), None);
    }
}

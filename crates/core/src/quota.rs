use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Unknown plan strings parse to the lowest tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Free,
    Iniciante,
    Plus,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn parse(value: &str) -> Plan {
        match value.trim().to_lowercase().as_str() {
            "iniciante" => Plan::Iniciante,
            "plus" => Plan::Plus,
            "pro" => Plan::Pro,
            "enterprise" => Plan::Enterprise,
            _ => Plan::Free,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Iniciante => "Iniciante",
            Plan::Plus => "Plus",
            Plan::Pro => "Pro",
            Plan::Enterprise => "Enterprise",
        }
    }

    /// `None` means unlimited.
    pub fn monthly_token_limit(self) -> Option<i64> {
        match self {
            Plan::Free => Some(5_000),
            Plan::Iniciante => Some(20_000),
            Plan::Plus => Some(50_000),
            Plan::Pro => Some(100_000),
            Plan::Enterprise => None,
        }
    }

    /// Enforced by callers before ingestion.
    pub fn max_upload_bytes(self) -> Option<u64> {
        match self {
            Plan::Free | Plan::Iniciante => Some(2 * MB),
            Plan::Plus => Some(5 * MB),
            Plan::Pro | Plan::Enterprise => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub consumed: i64,
    pub last_reset: DateTime<Utc>,
    pub allowed: bool,
    pub rolled_over: bool,
}

/// Applies the lazy monthly rollover (more than one month since last
/// reset zeroes the counter) before the limit check.
pub fn check_and_roll(
    consumed: i64,
    last_reset: DateTime<Utc>,
    now: DateTime<Utc>,
    plan: Plan,
) -> QuotaDecision {
    let threshold = now.checked_sub_months(Months::new(1));
    let rolled_over = threshold.is_some_and(|cutoff| last_reset < cutoff);

    let (consumed, last_reset) = if rolled_over {
        (0, now)
    } else {
        (consumed, last_reset)
    };

    let allowed = plan
        .monthly_token_limit()
        .map_or(true, |limit| consumed < limit);

    QuotaDecision {
        consumed,
        last_reset,
        allowed,
        rolled_over,
    }
}

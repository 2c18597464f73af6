use serde::{Deserialize, Serialize};

use super::Cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestPeriod {
    Daily,
    Monthly,
    Yearly,
}

impl InterestPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterestPeriod::Daily => "daily",
            InterestPeriod::Monthly => "monthly",
            InterestPeriod::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Some(InterestPeriod::Daily),
            "monthly" => Some(InterestPeriod::Monthly),
            "yearly" | "annual" => Some(InterestPeriod::Yearly),
            _ => None,
        }
    }

    /// Number of these periods in a year
    fn per_year(&self) -> i128 {
        match self {
            InterestPeriod::Daily => 365,
            InterestPeriod::Monthly => 12,
            InterestPeriod::Yearly => 1,
        }
    }
}

impl std::fmt::Display for InterestPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Maintenance,
    Overdraft,
    LatePayment,
}

impl FeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeKind::Maintenance => "maintenance",
            FeeKind::Overdraft => "overdraft",
            FeeKind::LatePayment => "late_payment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "maintenance" => Some(FeeKind::Maintenance),
            "overdraft" => Some(FeeKind::Overdraft),
            "late_payment" => Some(FeeKind::LatePayment),
            _ => None,
        }
    }

    /// Description recorded on the fee posting
    pub fn description(&self) -> &'static str {
        match self {
            FeeKind::Maintenance => "Maintenance fee",
            FeeKind::Overdraft => "Overdraft fee",
            FeeKind::LatePayment => "Late payment fee",
        }
    }
}

/// Simple interest for one period.
///
/// `rate_bps` is the annual rate in hundredths of a percent (7.25% = 725).
/// Rounds half away from zero to the cent.
pub fn calculate_interest(principal: Cents, rate_bps: i64, period: InterestPeriod) -> Cents {
    let numerator = principal as i128 * rate_bps as i128;
    let denominator = 10_000 * period.per_year();
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };
    rounded.clamp(Cents::MIN as i128, Cents::MAX as i128) as Cents
}

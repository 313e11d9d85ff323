//! Installment loans.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub name: String,
    /// Original principal in cents.
    pub principal_cents: i64,
    /// Outstanding balance in cents.
    pub balance_cents: i64,
    /// Annual rate in basis points (625 = 6.25%).
    pub apr_bps: u32,
    #[serde(default)]
    pub next_payment_cents: Option<i64>,
    #[serde(default)]
    pub next_payment_due: Option<NaiveDate>,
}

impl Loan {
    /// Share of the principal already repaid, 0.0 to 100.0.
    pub fn progress_percent(&self) -> f64 {
        if self.principal_cents <= 0 {
            return 0.0;
        }
        let paid = (self.principal_cents - self.balance_cents).clamp(0, self.principal_cents);
        paid as f64 * 100.0 / self.principal_cents as f64
    }

    pub fn apr_display(&self) -> String {
        format!("{}.{:02}%", self.apr_bps / 100, self.apr_bps % 100)
    }

    pub fn is_paid_off(&self) -> bool {
        self.balance_cents <= 0
    }
}

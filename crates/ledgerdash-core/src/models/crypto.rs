//! Crypto holdings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoHolding {
    pub symbol: String,
    pub name: String,
    /// Units held, as reported by the exchange.
    pub quantity: f64,
    /// Spot price of one unit in cents.
    pub price_cents: i64,
    /// Total cost of acquisition in cents, when known.
    #[serde(default)]
    pub cost_basis_cents: Option<i64>,
}

impl CryptoHolding {
    pub fn market_value_cents(&self) -> i64 {
        (self.quantity * self.price_cents as f64).round() as i64
    }

    /// Unrealized gain or loss in cents.
    pub fn gain_cents(&self) -> Option<i64> {
        self.cost_basis_cents
            .map(|basis| self.market_value_cents() - basis)
    }
}

pub fn portfolio_value_cents(holdings: &[CryptoHolding]) -> i64 {
    holdings.iter().map(CryptoHolding::market_value_cents).sum()
}

//! Data models for dashboard entities.
//!
//! - `Account`, `Transaction`: deposit and credit accounts
//! - `Card`, `CardStatus`: payment cards and their freeze state
//! - `Loan`: installment loans with repayment progress
//! - `CryptoHolding`: exchange positions valued at spot price
//!
//! Monetary amounts are integer cents throughout.

pub mod account;
pub mod card;
pub mod crypto;
pub mod loan;

pub use account::{net_balance, Account, AccountKind, Transaction};
pub use card::{Card, CardStatus};
pub use crypto::{portfolio_value_cents, CryptoHolding};
pub use loan::Loan;

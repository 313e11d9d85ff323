//! Deposit accounts and their transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Checking,
    Savings,
    Credit,
    #[serde(other)]
    Other,
}

impl AccountKind {
    pub fn label(&self) -> &'static str {
        match self {
            AccountKind::Checking => "Checking",
            AccountKind::Savings => "Savings",
            AccountKind::Credit => "Credit",
            AccountKind::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub kind: AccountKind,
    /// Ledger balance in cents.
    pub balance_cents: i64,
    /// Balance minus holds and pending debits, in cents.
    #[serde(default)]
    pub available_cents: Option<i64>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Account {
    /// Available balance, falling back to the ledger balance.
    pub fn available(&self) -> i64 {
        self.available_cents.unwrap_or(self.balance_cents)
    }

    /// Credit accounts report what is owed as a positive balance.
    pub fn is_liability(&self) -> bool {
        self.kind == AccountKind::Credit
    }
}

/// Net worth across accounts: assets minus credit balances.
pub fn net_balance(accounts: &[Account]) -> i64 {
    accounts
        .iter()
        .map(|a| if a.is_liability() { -a.balance_cents } else { a.balance_cents })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub posted_at: DateTime<Utc>,
    pub description: String,
    /// Signed amount in cents; debits are negative.
    pub amount_cents: i64,
    #[serde(default)]
    pub pending: bool,
}

impl Transaction {
    pub fn is_debit(&self) -> bool {
        self.amount_cents < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(kind: AccountKind, balance_cents: i64) -> Account {
        Account {
            id: "a".into(),
            name: "Test".into(),
            kind,
            balance_cents,
            available_cents: None,
            currency: "USD".into(),
        }
    }

    #[test]
    fn test_parse_account() {
        let json = r#"{"id":"chk-1","name":"Everyday Checking","kind":"checking","balanceCents":125050,"availableCents":120000}"#;
        let acct: Account = serde_json::from_str(json).expect("Failed to parse account JSON");
        assert_eq!(acct.kind, AccountKind::Checking);
        assert_eq!(acct.available(), 120000);
        assert_eq!(acct.currency, "USD");
    }

    #[test]
    fn test_unknown_kind_parses_as_other() {
        let json = r#"{"id":"x","name":"HSA","kind":"hsa","balanceCents":0}"#;
        let acct: Account = serde_json::from_str(json).unwrap();
        assert_eq!(acct.kind, AccountKind::Other);
        assert_eq!(acct.available(), 0);
    }

    #[test]
    fn test_net_balance_subtracts_credit() {
        let accounts = vec![
            account(AccountKind::Checking, 100_000),
            account(AccountKind::Savings, 50_000),
            account(AccountKind::Credit, 30_000),
        ];
        assert_eq!(net_balance(&accounts), 120_000);
    }

    #[test]
    fn test_parse_transaction() {
        let json = r#"{"id":"t1","accountId":"chk-1","postedAt":"2026-03-01T14:30:00Z","description":"Coffee","amountCents":-450}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert!(tx.is_debit());
        assert!(!tx.pending);
    }
}

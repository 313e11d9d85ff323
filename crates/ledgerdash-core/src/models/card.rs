//! Payment cards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Frozen,
    Cancelled,
}

impl CardStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CardStatus::Active => "Active",
            CardStatus::Frozen => "Frozen",
            CardStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub account_id: String,
    pub nickname: Option<String>,
    pub network: String,
    pub last4: String,
    pub status: CardStatus,
}

impl Card {
    /// Card number with everything but the last four digits hidden.
    pub fn masked_number(&self) -> String {
        format!("•••• •••• •••• {}", self.last4)
    }

    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nick) if !nick.is_empty() => nick.clone(),
            _ => format!("{} {}", self.network, self.last4),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == CardStatus::Frozen
    }
}

/// Copy of `cards` with the card `card_id` set to `status`.
pub fn with_status(cards: &[Card], card_id: &str, status: CardStatus) -> Vec<Card> {
    cards
        .iter()
        .map(|card| {
            let mut card = card.clone();
            if card.id == card_id {
                card.status = status;
            }
            card
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, nickname: Option<&str>) -> Card {
        Card {
            id: id.into(),
            account_id: "chk-1".into(),
            nickname: nickname.map(Into::into),
            network: "Visa".into(),
            last4: "4242".into(),
            status: CardStatus::Active,
        }
    }

    #[test]
    fn test_masked_number() {
        assert_eq!(card("c1", None).masked_number(), "•••• •••• •••• 4242");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(card("c1", Some("Groceries")).display_name(), "Groceries");
        assert_eq!(card("c1", Some("")).display_name(), "Visa 4242");
        assert_eq!(card("c1", None).display_name(), "Visa 4242");
    }

    #[test]
    fn test_with_status_only_touches_target() {
        let cards = vec![card("c1", None), card("c2", None)];
        let updated = with_status(&cards, "c2", CardStatus::Frozen);
        assert!(!updated[0].is_frozen());
        assert!(updated[1].is_frozen());
        assert!(!cards[1].is_frozen());
    }

    #[test]
    fn test_parse_status() {
        let json = r#"{"id":"c9","accountId":"a","nickname":null,"network":"Mastercard","last4":"0005","status":"frozen"}"#;
        let parsed: Card = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.status, CardStatus::Frozen);
    }
}

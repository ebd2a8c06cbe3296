use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub spots_adults: i32,
    pub spots_kids: i32,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

impl TicketType {
    pub fn total_spots(&self) -> i32 {
        self.spots_adults + self.spots_kids
    }

    pub fn price_formatted(&self) -> String {
        if self.price > Decimal::ZERO {
            format!("${}", crate::services::amount::format_money(self.price))
        } else {
            "Free".to_string()
        }
    }
}

/// Quantity and unit price of one ticket type, captured when the booking is made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketSelection {
    pub ticket_type_id: i64,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub spots_adults: i32,
    pub spots_kids: i32,
}

impl TicketSelection {
    pub fn from_ticket_type(ticket_type: &TicketType, quantity: i32) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            name: ticket_type.name.clone(),
            quantity,
            unit_price: ticket_type.price,
            spots_adults: ticket_type.spots_adults,
            spots_kids: ticket_type.spots_kids,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Guest counts implied by a set of selections: (total guests, children).
pub fn guest_counts(selections: &[TicketSelection]) -> (i32, i32) {
    selections.iter().fold((0, 0), |(total, kids), s| {
        (
            total + (s.spots_adults + s.spots_kids) * s.quantity,
            kids + s.spots_kids * s.quantity,
        )
    })
}

pub fn summary(selections: &[TicketSelection]) -> String {
    let parts: Vec<String> = selections
        .iter()
        .filter(|s| s.quantity > 0)
        .map(|s| format!("{}x {}", s.quantity, s.name))
        .collect();
    if parts.is_empty() {
        "No ticket types selected".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(name: &str, qty: i32, adults: i32, kids: i32) -> TicketSelection {
        TicketSelection {
            ticket_type_id: 1,
            name: name.to_string(),
            quantity: qty,
            unit_price: Decimal::new(2500, 2),
            spots_adults: adults,
            spots_kids: kids,
        }
    }

    #[test]
    fn test_guest_counts_use_spot_weights() {
        let selections = vec![
            selection("Adult", 2, 1, 0),
            selection("Family", 1, 2, 2),
            selection("Child", 3, 0, 1),
        ];
        assert_eq!(guest_counts(&selections), (9, 5));
    }

    #[test]
    fn test_summary() {
        let selections = vec![selection("Adult", 2, 1, 0), selection("Child", 0, 0, 1)];
        assert_eq!(summary(&selections), "2x Adult");
        assert_eq!(summary(&[]), "No ticket types selected");
    }

    #[test]
    fn test_line_total() {
        assert_eq!(selection("Adult", 3, 1, 0).line_total(), Decimal::new(7500, 2));
    }
}

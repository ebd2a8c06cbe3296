use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{Booking, Payment, PaymentStatus, TicketSelection};

/// Largest difference between the server-computed amount and a submitted one
/// that still counts as a match.
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Staff member acting on a booking, as identified by the calling application.
#[derive(Debug, Clone, Default)]
pub struct ActingUser {
    pub email: String,
    pub groups: Vec<String>,
}

pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

/// Amount in the currency's minor unit, as gateways expect it.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount.round_dp(2) * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Sum of line totals. Bookings without any selections fall back to their flat total.
pub fn total_price(selections: &[TicketSelection], legacy_total: Option<Decimal>) -> Decimal {
    if selections.is_empty() {
        return legacy_total.unwrap_or(Decimal::ZERO);
    }
    selections.iter().map(TicketSelection::line_total).sum()
}

/// Money already reserved or collected.
pub fn captured_total(payments: &[Payment]) -> Decimal {
    payments
        .iter()
        .filter(|p| p.status.is_successful())
        .map(|p| p.amount)
        .sum()
}

pub fn amount_owed(
    booking: &Booking,
    selections: &[TicketSelection],
    payments: &[Payment],
    exempt: bool,
) -> Decimal {
    if exempt {
        return Decimal::ZERO;
    }
    let total = total_price(selections, booking.legacy_total);
    if payments.is_empty() {
        return total;
    }
    (total - captured_total(payments)).max(Decimal::ZERO)
}

pub fn validate_submitted_amount(expected: Decimal, submitted: Decimal) -> bool {
    (expected - submitted).abs() <= AMOUNT_TOLERANCE
}

pub fn amount_mismatch_message(expected: Decimal, submitted: Decimal) -> String {
    format!(
        "Payment amount mismatch. Expected: ${}, Attempted: ${}. Please refresh and try again.",
        format_money(expected),
        format_money(submitted)
    )
}

/// Members of the configured staff group may book without paying. An empty group
/// name disables the exemption.
pub fn is_offline_payment_user(acting_user: Option<&ActingUser>, configured_group: &str) -> bool {
    let group = configured_group.trim();
    if group.is_empty() {
        return false;
    }
    acting_user
        .map(|user| user.groups.iter().any(|g| g.trim().eq_ignore_ascii_case(group)))
        .unwrap_or(false)
}

pub fn is_confirmed(status: PaymentStatus, owed: Decimal) -> bool {
    status == PaymentStatus::Paid || owed <= Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptStatus, Contact};
    use chrono::Utc;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn selection(qty: i32, price: &str) -> TicketSelection {
        TicketSelection {
            ticket_type_id: 1,
            name: "Adult".to_string(),
            quantity: qty,
            unit_price: dec(price),
            spots_adults: 1,
            spots_kids: 0,
        }
    }

    fn payment(amount: &str, status: AttemptStatus) -> Payment {
        let now = Utc::now().naive_utc();
        Payment {
            id: 1,
            identifier: "p".to_string(),
            booking_id: 1,
            amount: dec(amount),
            currency: "NZD".to_string(),
            gateway: "Stripe".to_string(),
            status,
            transaction_reference: None,
            payment_intent_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn booking() -> Booking {
        Booking::new(1, Contact::default(), Utc::now().naive_utc())
    }

    fn staff(groups: &[&str]) -> ActingUser {
        ActingUser {
            email: "staff@example.com".to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(dec("100")), "100.00");
        assert_eq!(format_money(dec("98.5")), "98.50");
        assert_eq!(format_money(dec("0.005")), "0.00");
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec("100.00")), Some(10000));
        assert_eq!(to_minor_units(dec("19.99")), Some(1999));
    }

    #[test]
    fn test_new_booking_owes_full_total() {
        let selections = vec![selection(2, "50.00")];
        assert_eq!(amount_owed(&booking(), &selections, &[], false), dec("100.00"));
    }

    #[test]
    fn test_existing_booking_owes_difference() {
        let selections = vec![selection(3, "50.00")];
        let payments = vec![
            payment("100.00", AttemptStatus::Captured),
            payment("50.00", AttemptStatus::Failed),
        ];
        assert_eq!(amount_owed(&booking(), &selections, &payments, false), dec("50.00"));
    }

    #[test]
    fn test_owed_never_negative() {
        let selections = vec![selection(1, "50.00")];
        let payments = vec![payment("100.00", AttemptStatus::Captured)];
        assert_eq!(amount_owed(&booking(), &selections, &payments, false), Decimal::ZERO);
    }

    #[test]
    fn test_exempt_owes_nothing() {
        let selections = vec![selection(2, "50.00")];
        assert_eq!(amount_owed(&booking(), &selections, &[], true), Decimal::ZERO);
    }

    #[test]
    fn test_legacy_total_without_selections() {
        let mut b = booking();
        assert_eq!(total_price(&[], b.legacy_total), Decimal::ZERO);
        b.legacy_total = Some(dec("75.00"));
        assert_eq!(amount_owed(&b, &[], &[], false), dec("75.00"));
    }

    #[test]
    fn test_submitted_amount_tolerance() {
        assert!(validate_submitted_amount(dec("100.00"), dec("99.995")));
        assert!(validate_submitted_amount(dec("100.00"), dec("100.01")));
        assert!(!validate_submitted_amount(dec("100.00"), dec("98.00")));
        assert!(!validate_submitted_amount(dec("100.00"), dec("100.02")));
    }

    #[test]
    fn test_mismatch_message() {
        assert_eq!(
            amount_mismatch_message(dec("100"), dec("98")),
            "Payment amount mismatch. Expected: $100.00, Attempted: $98.00. Please refresh and try again."
        );
    }

    #[test]
    fn test_offline_payment_user() {
        assert!(is_offline_payment_user(Some(&staff(&["office", "Offline-Payments"])), "offline-payments"));
        assert!(!is_offline_payment_user(Some(&staff(&["office"])), "offline-payments"));
        assert!(!is_offline_payment_user(None, "offline-payments"));
        assert!(!is_offline_payment_user(Some(&staff(&[""])), ""));
    }

    #[test]
    fn test_is_confirmed() {
        assert!(is_confirmed(PaymentStatus::Paid, dec("10")));
        assert!(is_confirmed(PaymentStatus::Pending, Decimal::ZERO));
        assert!(!is_confirmed(PaymentStatus::Pending, dec("10")));
    }
}

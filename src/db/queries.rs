use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::models::{
    AttemptStatus, Booking, Contact, Payment, PaymentEvent, PaymentEventKind, PaymentLedger,
    PaymentStatus, TicketSelection, TicketType,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .with_context(|| format!("invalid timestamp in database: {s}"))
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    s.parse::<Decimal>()
        .with_context(|| format!("invalid decimal value in database: {s}"))
}

fn parse_optional_decimal(s: Option<String>) -> anyhow::Result<Option<Decimal>> {
    s.as_deref().map(parse_decimal).transpose()
}

// ── Ticket Types ──

pub fn create_ticket_type(conn: &Connection, ticket_type: &TicketType) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO ticket_types (name, price, currency, spots_adults, spots_kids, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ticket_type.name,
            ticket_type.price.to_string(),
            ticket_type.currency,
            ticket_type.spots_adults,
            ticket_type.spots_kids,
            ticket_type.active as i32,
            format_ts(&ticket_type.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_ticket_type(conn: &Connection, id: i64) -> anyhow::Result<Option<TicketType>> {
    let result = conn.query_row(
        "SELECT id, name, price, currency, spots_adults, spots_kids, active, created_at
         FROM ticket_types WHERE id = ?1",
        params![id],
        |row| Ok(parse_ticket_type_row(row)),
    );

    match result {
        Ok(ticket_type) => Ok(Some(ticket_type?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_active_ticket_types(conn: &Connection) -> anyhow::Result<Vec<TicketType>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, price, currency, spots_adults, spots_kids, active, created_at
         FROM ticket_types WHERE active = 1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| Ok(parse_ticket_type_row(row)))?;

    let mut ticket_types = vec![];
    for row in rows {
        ticket_types.push(row??);
    }
    Ok(ticket_types)
}

fn parse_ticket_type_row(row: &rusqlite::Row) -> anyhow::Result<TicketType> {
    let price: String = row.get(2)?;
    let created_at: String = row.get(7)?;
    Ok(TicketType {
        id: row.get(0)?,
        name: row.get(1)?,
        price: parse_decimal(&price)?,
        currency: row.get(3)?,
        spots_adults: row.get(4)?,
        spots_kids: row.get(5)?,
        active: row.get::<_, i32>(6)? != 0,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, code, tour_id, first_name, surname, email, phone, total_guests, \
     number_of_children, cancelled, total_guests_admin_override, legacy_total, payment_status, \
     payment_gateway, payment_reference, payment_intent_id, payment_date, payment_error, \
     refund_amount, last_webhook_event_id, last_webhook_timestamp, version, created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<i64> {
    let ledger = &booking.ledger;
    conn.execute(
        "INSERT INTO bookings (code, tour_id, first_name, surname, email, phone, total_guests,
            number_of_children, cancelled, total_guests_admin_override, legacy_total, payment_status,
            payment_gateway, payment_reference, payment_intent_id, payment_date, payment_error,
            refund_amount, last_webhook_event_id, last_webhook_timestamp, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            booking.code,
            booking.tour_id,
            booking.contact.first_name,
            booking.contact.surname,
            booking.contact.email,
            booking.contact.phone,
            booking.total_guests,
            booking.number_of_children,
            booking.cancelled as i32,
            booking.total_guests_admin_override as i32,
            booking.legacy_total.map(|t| t.to_string()),
            ledger.status.as_str(),
            ledger.gateway,
            ledger.reference,
            ledger.intent_id,
            ledger.paid_at.as_ref().map(format_ts),
            ledger.error_message,
            ledger.refund_amount.map(|a| a.to_string()),
            ledger.last_webhook_event_id,
            ledger.last_webhook_timestamp,
            booking.version,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes the mutable fields of a booking, guarded by its version.
/// Returns false when the stored row has moved on since it was read.
pub fn save_booking(conn: &Connection, booking: &mut Booking) -> anyhow::Result<bool> {
    let now = Utc::now().naive_utc();
    let ledger = &booking.ledger;
    let count = conn.execute(
        "UPDATE bookings SET
           first_name = ?1, surname = ?2, email = ?3, phone = ?4, total_guests = ?5,
           number_of_children = ?6, cancelled = ?7, total_guests_admin_override = ?8,
           payment_status = ?9, payment_gateway = ?10, payment_reference = ?11,
           payment_intent_id = ?12, payment_date = ?13, payment_error = ?14, refund_amount = ?15,
           last_webhook_event_id = ?16, last_webhook_timestamp = ?17,
           version = version + 1, updated_at = ?18
         WHERE id = ?19 AND version = ?20",
        params![
            booking.contact.first_name,
            booking.contact.surname,
            booking.contact.email,
            booking.contact.phone,
            booking.total_guests,
            booking.number_of_children,
            booking.cancelled as i32,
            booking.total_guests_admin_override as i32,
            ledger.status.as_str(),
            ledger.gateway,
            ledger.reference,
            ledger.intent_id,
            ledger.paid_at.as_ref().map(format_ts),
            ledger.error_message,
            ledger.refund_amount.map(|a| a.to_string()),
            ledger.last_webhook_event_id,
            ledger.last_webhook_timestamp,
            format_ts(&now),
            booking.id,
            booking.version,
        ],
    )?;

    if count > 0 {
        booking.version += 1;
        booking.updated_at = now;
    }
    Ok(count > 0)
}

pub fn get_booking_by_id(conn: &Connection, id: i64) -> anyhow::Result<Option<Booking>> {
    query_one_booking(conn, "id = ?1", params![id])
}

pub fn get_booking_by_code(conn: &Connection, code: &str) -> anyhow::Result<Option<Booking>> {
    query_one_booking(conn, "code = ?1", params![code])
}

pub fn get_booking_by_intent_id(
    conn: &Connection,
    payment_intent_id: &str,
) -> anyhow::Result<Option<Booking>> {
    query_one_booking(conn, "payment_intent_id = ?1", params![payment_intent_id])
}

fn query_one_booking(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE {filter} LIMIT 1");
    let result = conn.query_row(&sql, params, |row| Ok(parse_booking_row(row)));

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn find_recent_bookings_by_email_and_tour(
    conn: &Connection,
    email: &str,
    tour_id: i64,
    since: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE email = ?1 AND tour_id = ?2 AND created_at > ?3
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![email, tour_id, format_ts(since)], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_status = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at DESC, id DESC LIMIT ?1"
            ),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn delete_booking(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let legacy_total: Option<String> = row.get(11)?;
    let status_str: String = row.get(12)?;
    let payment_date: Option<String> = row.get(16)?;
    let refund_amount: Option<String> = row.get(18)?;
    let created_at_str: String = row.get(22)?;
    let updated_at_str: String = row.get(23)?;

    Ok(Booking {
        id: row.get(0)?,
        code: row.get(1)?,
        tour_id: row.get(2)?,
        contact: Contact {
            first_name: row.get(3)?,
            surname: row.get(4)?,
            email: row.get(5)?,
            phone: row.get(6)?,
        },
        total_guests: row.get(7)?,
        number_of_children: row.get(8)?,
        cancelled: row.get::<_, i32>(9)? != 0,
        total_guests_admin_override: row.get::<_, i32>(10)? != 0,
        legacy_total: parse_optional_decimal(legacy_total)?,
        ledger: PaymentLedger {
            status: PaymentStatus::parse(&status_str),
            gateway: row.get(13)?,
            reference: row.get(14)?,
            intent_id: row.get(15)?,
            paid_at: payment_date.as_deref().map(parse_ts).transpose()?,
            error_message: row.get(17)?,
            refund_amount: parse_optional_decimal(refund_amount)?,
            last_webhook_event_id: row.get(19)?,
            last_webhook_timestamp: row.get(20)?,
        },
        version: row.get(21)?,
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
    })
}

// ── Ticket Selections ──

pub fn replace_selections(
    conn: &Connection,
    booking_id: i64,
    selections: &[TicketSelection],
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM booking_ticket_types WHERE booking_id = ?1",
        params![booking_id],
    )?;
    for s in selections.iter().filter(|s| s.quantity > 0) {
        conn.execute(
            "INSERT INTO booking_ticket_types
               (booking_id, ticket_type_id, name, quantity, unit_price, spots_adults, spots_kids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                booking_id,
                s.ticket_type_id,
                s.name,
                s.quantity,
                s.unit_price.to_string(),
                s.spots_adults,
                s.spots_kids,
            ],
        )?;
    }
    Ok(())
}

pub fn get_selections(conn: &Connection, booking_id: i64) -> anyhow::Result<Vec<TicketSelection>> {
    let mut stmt = conn.prepare(
        "SELECT ticket_type_id, name, quantity, unit_price, spots_adults, spots_kids
         FROM booking_ticket_types WHERE booking_id = ?1 ORDER BY ticket_type_id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        let unit_price: String = row.get(3)?;
        Ok((|| -> anyhow::Result<TicketSelection> {
            Ok(TicketSelection {
                ticket_type_id: row.get(0)?,
                name: row.get(1)?,
                quantity: row.get(2)?,
                unit_price: parse_decimal(&unit_price)?,
                spots_adults: row.get(4)?,
                spots_kids: row.get(5)?,
            })
        })())
    })?;

    let mut selections = vec![];
    for row in rows {
        selections.push(row??);
    }
    Ok(selections)
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, identifier, booking_id, amount, currency, gateway, status, \
     transaction_reference, payment_intent_id, error_message, created_at, updated_at";

pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO payments (identifier, booking_id, amount, currency, gateway, status,
            transaction_reference, payment_intent_id, error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            payment.identifier,
            payment.booking_id,
            payment.amount.to_string(),
            payment.currency,
            payment.gateway,
            payment.status.as_str(),
            payment.transaction_reference,
            payment.payment_intent_id,
            payment.error_message,
            format_ts(&payment.created_at),
            format_ts(&payment.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payments SET status = ?1, transaction_reference = ?2, payment_intent_id = ?3,
           error_message = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            payment.status.as_str(),
            payment.transaction_reference,
            payment.payment_intent_id,
            payment.error_message,
            format_ts(&Utc::now().naive_utc()),
            payment.id,
        ],
    )?;
    Ok(())
}

pub fn get_payment(conn: &Connection, id: i64) -> anyhow::Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| Ok(parse_payment_row(row)))
        .optional()?
        .transpose()
}

pub fn get_payment_by_intent_id(
    conn: &Connection,
    payment_intent_id: &str,
) -> anyhow::Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_intent_id = ?1");
    conn.query_row(&sql, params![payment_intent_id], |row| {
        Ok(parse_payment_row(row))
    })
    .optional()?
    .transpose()
}

pub fn get_payments_for_booking(conn: &Connection, booking_id: i64) -> anyhow::Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1 ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_payment_row(row)))?;

    let mut payments = vec![];
    for row in rows {
        payments.push(row??);
    }
    Ok(payments)
}

/// Most recent not-yet-settled attempts on a gateway, newest first.
pub fn recent_open_payments(
    conn: &Connection,
    gateway: &str,
    since: &NaiveDateTime,
    limit: i64,
) -> anyhow::Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE gateway = ?1 AND status IN ('Created', 'PendingAuthorization') AND created_at > ?2
         ORDER BY created_at DESC, id DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![gateway, format_ts(since), limit], |row| {
        Ok(parse_payment_row(row))
    })?;

    let mut payments = vec![];
    for row in rows {
        payments.push(row??);
    }
    Ok(payments)
}

/// Deletes every attempt for the booking that never reserved or collected money.
pub fn delete_unsettled_payments(conn: &Connection, booking_id: i64) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM payments WHERE booking_id = ?1 AND status NOT IN ('Captured', 'Authorized')",
        params![booking_id],
    )?;
    Ok(count)
}

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let amount: String = row.get(3)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Payment {
        id: row.get(0)?,
        identifier: row.get(1)?,
        booking_id: row.get(2)?,
        amount: parse_decimal(&amount)?,
        currency: row.get(4)?,
        gateway: row.get(5)?,
        status: AttemptStatus::parse(&status),
        transaction_reference: row.get(7)?,
        payment_intent_id: row.get(8)?,
        error_message: row.get(9)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Payment Events ──

pub fn insert_payment_event(
    conn: &Connection,
    booking_code: &str,
    kind: PaymentEventKind,
    reference: Option<&str>,
    amount: Option<Decimal>,
) -> anyhow::Result<PaymentEvent> {
    let created_at = format_ts(&Utc::now().naive_utc());
    conn.execute(
        "INSERT INTO payment_events (booking_code, kind, reference, amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            booking_code,
            kind.as_str(),
            reference,
            amount.map(|a| a.to_string()),
            created_at,
        ],
    )?;
    Ok(PaymentEvent {
        id: conn.last_insert_rowid(),
        booking_code: booking_code.to_string(),
        kind,
        reference: reference.map(|r| r.to_string()),
        amount,
        created_at,
    })
}

pub fn get_payment_events_since(conn: &Connection, since_id: i64) -> anyhow::Result<Vec<PaymentEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_code, kind, reference, amount, created_at
         FROM payment_events WHERE id > ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![since_id], |row| Ok(parse_event_row(row)))?;

    let mut events = vec![];
    for row in rows {
        if let Some(event) = row?? {
            events.push(event);
        }
    }
    Ok(events)
}

pub fn get_payment_events_for_booking(
    conn: &Connection,
    booking_code: &str,
) -> anyhow::Result<Vec<PaymentEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_code, kind, reference, amount, created_at
         FROM payment_events WHERE booking_code = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_code], |row| Ok(parse_event_row(row)))?;

    let mut events = vec![];
    for row in rows {
        if let Some(event) = row?? {
            events.push(event);
        }
    }
    Ok(events)
}

fn parse_event_row(row: &rusqlite::Row) -> anyhow::Result<Option<PaymentEvent>> {
    let kind: String = row.get(2)?;
    let amount: Option<String> = row.get(4)?;
    let Some(kind) = PaymentEventKind::parse(&kind) else {
        tracing::warn!(kind = %kind, "skipping payment event with unknown kind");
        return Ok(None);
    };
    Ok(Some(PaymentEvent {
        id: row.get(0)?,
        booking_code: row.get(1)?,
        kind,
        reference: row.get(3)?,
        amount: parse_optional_decimal(amount)?,
        created_at: row.get(5)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn new_booking(conn: &Connection, email: &str) -> Booking {
        let now = Utc::now().naive_utc();
        let mut booking = Booking::new(
            7,
            Contact {
                first_name: "Ana".to_string(),
                surname: "Smith".to_string(),
                email: email.to_string(),
                phone: "021555".to_string(),
            },
            now,
        );
        booking.id = insert_booking(conn, &booking).unwrap();
        booking
    }

    fn new_payment(booking_id: i64, status: AttemptStatus, intent: Option<&str>) -> Payment {
        let now = Utc::now().naive_utc();
        Payment {
            id: 0,
            identifier: uuid::Uuid::new_v4().to_string(),
            booking_id,
            amount: Decimal::new(5000, 2),
            currency: "NZD".to_string(),
            gateway: "Stripe".to_string(),
            status,
            transaction_reference: None,
            payment_intent_id: intent.map(|s| s.to_string()),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_booking_round_trip_with_ledger() {
        let conn = setup_db();
        let mut booking = new_booking(&conn, "ana@example.com");
        booking.ledger.status = PaymentStatus::Paid;
        booking.ledger.intent_id = Some("pi_1".to_string());
        booking.ledger.last_webhook_timestamp = Some(1_700_000_000);
        assert!(save_booking(&conn, &mut booking).unwrap());
        assert_eq!(booking.version, 1);

        let loaded = get_booking_by_intent_id(&conn, "pi_1").unwrap().unwrap();
        assert_eq!(loaded.code, booking.code);
        assert_eq!(loaded.ledger.status, PaymentStatus::Paid);
        assert_eq!(loaded.ledger.last_webhook_timestamp, Some(1_700_000_000));
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_save_booking_rejects_stale_version() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        let mut first = booking.clone();
        let mut second = booking;

        assert!(save_booking(&conn, &mut first).unwrap());
        second.ledger.status = PaymentStatus::Failed;
        assert!(!save_booking(&conn, &mut second).unwrap());

        let loaded = get_booking_by_id(&conn, first.id).unwrap().unwrap();
        assert_eq!(loaded.ledger.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_payment_intent_id_is_unique() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Created, Some("pi_1"))).unwrap();
        let dup = insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Created, Some("pi_1")));
        assert!(dup.is_err());
        // Rows without an intent id do not collide.
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Created, None)).unwrap();
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Created, None)).unwrap();
    }

    #[test]
    fn test_booking_with_payment_rows_cannot_be_deleted() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Captured, Some("pi_1"))).unwrap();

        assert_eq!(delete_unsettled_payments(&conn, booking.id).unwrap(), 0);
        assert!(delete_booking(&conn, booking.id).is_err());
    }

    #[test]
    fn test_recent_open_payments_filters_status() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Created, Some("pi_1"))).unwrap();
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::Failed, Some("pi_2"))).unwrap();
        insert_payment(&conn, &new_payment(booking.id, AttemptStatus::PendingAuthorization, Some("pi_3")))
            .unwrap();

        let since = Utc::now().naive_utc() - chrono::Duration::hours(1);
        let open = recent_open_payments(&conn, "Stripe", &since, 10).unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|p| p.status.is_open()));
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        conn.execute(
            "UPDATE bookings SET created_at = 'yesterday' WHERE id = ?1",
            params![booking.id],
        )
        .unwrap();

        assert!(get_booking_by_code(&conn, &booking.code).is_err());
    }

    #[test]
    fn test_selections_capture_price() {
        let conn = setup_db();
        let booking = new_booking(&conn, "ana@example.com");
        let ticket = TicketType {
            id: 0,
            name: "Adult".to_string(),
            price: Decimal::new(4000, 2),
            currency: "NZD".to_string(),
            spots_adults: 1,
            spots_kids: 0,
            active: true,
            created_at: Utc::now().naive_utc(),
        };
        let ticket_id = create_ticket_type(&conn, &ticket).unwrap();
        let ticket = get_ticket_type(&conn, ticket_id).unwrap().unwrap();

        replace_selections(&conn, booking.id, &[TicketSelection::from_ticket_type(&ticket, 2)]).unwrap();
        conn.execute("UPDATE ticket_types SET price = '99.00' WHERE id = ?1", params![ticket_id])
            .unwrap();

        let selections = get_selections(&conn, booking.id).unwrap();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].unit_price, Decimal::new(4000, 2));
        assert_eq!(selections[0].quantity, 2);
    }

    #[test]
    fn test_payment_events_since() {
        let conn = setup_db();
        let first = insert_payment_event(&conn, "abc", PaymentEventKind::PaymentCaptured, Some("ch_1"), None)
            .unwrap();
        insert_payment_event(&conn, "abc", PaymentEventKind::PaymentRefunded, Some("ch_1"), None).unwrap();

        let events = get_payment_events_since(&conn, first.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PaymentEventKind::PaymentRefunded);
        assert_eq!(get_payment_events_for_booking(&conn, "abc").unwrap().len(), 2);
    }
}

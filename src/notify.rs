use crate::models::format_amount;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingConfirmation,
    PaymentConfirmation,
    PaymentFailure,
}

impl NotificationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::BookingConfirmation => "booking_confirmation",
            Self::PaymentConfirmation => "payment_confirmation",
            Self::PaymentFailure => "payment_failure",
        }
    }
}

/// Fire-and-forget email dispatcher. `enqueue` hands the message off to a
/// background task and returns immediately; delivery failures are logged,
/// never propagated back to the triggering request.
#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
    db_schema: Option<String>,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
    mail_from: String,
}

pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

struct Recipient {
    email: String,
    greeting_name: String,
}

struct BookingDetails {
    booking_id: String,
    listing_title: String,
    listing_location: String,
    check_in: String,
    check_out: String,
    guests: i32,
    total_cents: i64,
    currency: String,
}

struct PaymentDetails {
    booking: BookingDetails,
    amount_cents: i64,
    currency: String,
    transaction_id: String,
}

fn booking_confirmation_body(name: &str, b: &BookingDetails) -> (String, String) {
    let subject = format!("Booking Confirmation - Booking #{}", b.booking_id);
    let body = format!(
        "Dear {name},\n\n\
         Your booking has been received!\n\n\
         Booking Details:\n\
         - Listing: {}\n\
         - Location: {}\n\
         - Check-in: {}\n\
         - Check-out: {}\n\
         - Guests: {}\n\
         - Total Price: {} {}\n\n\
         Thank you for choosing Travelstay!\n",
        b.listing_title,
        b.listing_location,
        b.check_in,
        b.check_out,
        b.guests,
        format_amount(b.total_cents),
        b.currency,
    );
    (subject, body)
}

fn payment_confirmation_body(name: &str, p: &PaymentDetails) -> (String, String) {
    let subject = format!("Payment Confirmation - Booking #{}", p.booking.booking_id);
    let body = format!(
        "Dear {name},\n\n\
         Your payment has been successfully processed!\n\n\
         Booking Details:\n\
         - Listing: {}\n\
         - Location: {}\n\
         - Check-in: {}\n\
         - Check-out: {}\n\
         - Amount Paid: {} {}\n\
         - Transaction ID: {}\n\n\
         Thank you for choosing Travelstay!\n",
        p.booking.listing_title,
        p.booking.listing_location,
        p.booking.check_in,
        p.booking.check_out,
        format_amount(p.amount_cents),
        p.currency,
        p.transaction_id,
    );
    (subject, body)
}

fn payment_failure_body(name: &str, p: &PaymentDetails) -> (String, String) {
    let subject = format!("Payment Failed - Booking #{}", p.booking.booking_id);
    let body = format!(
        "Dear {name},\n\n\
         Unfortunately, your payment could not be processed.\n\n\
         Booking Details:\n\
         - Listing: {}\n\
         - Amount: {} {}\n\
         - Transaction ID: {}\n\n\
         Please try again or contact our support team for assistance.\n",
        p.booking.listing_title,
        format_amount(p.amount_cents),
        p.currency,
        p.transaction_id,
    );
    (subject, body)
}

impl Notifier {
    pub fn new(
        pool: PgPool,
        db_schema: Option<String>,
        smtp: Option<SmtpSettings>,
        mail_from: String,
    ) -> Self {
        let mailer = smtp.and_then(|s| {
            match AsyncSmtpTransport::<Tokio1Executor>::relay(&s.host) {
                Ok(builder) => Some(
                    builder
                        .port(s.port)
                        .credentials(Credentials::new(s.username, s.password))
                        .build(),
                ),
                Err(e) => {
                    tracing::error!(error = %e, "smtp transport init failed; falling back to log delivery");
                    None
                }
            }
        });
        Self {
            pool,
            db_schema,
            mailer,
            mail_from,
        }
    }

    fn table(&self, name: &str) -> String {
        match &self.db_schema {
            Some(s) => format!("{s}.{name}"),
            None => name.to_string(),
        }
    }

    pub fn enqueue(&self, kind: NotificationKind, subject_id: &str) {
        let this = self.clone();
        let subject_id = subject_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.deliver(kind, &subject_id).await {
                tracing::warn!(
                    kind = kind.as_str(),
                    subject_id = %subject_id,
                    error = %e,
                    "notification delivery failed"
                );
            }
        });
    }

    async fn deliver(&self, kind: NotificationKind, subject_id: &str) -> Result<(), String> {
        let (recipient, subject, body) = match kind {
            NotificationKind::BookingConfirmation => {
                let Some((recipient, details)) = self.load_booking(subject_id).await? else {
                    tracing::info!(booking_id = %subject_id, "booking gone before notification; skipping");
                    return Ok(());
                };
                let (subject, body) = booking_confirmation_body(&recipient.greeting_name, &details);
                (recipient, subject, body)
            }
            NotificationKind::PaymentConfirmation | NotificationKind::PaymentFailure => {
                let Some((recipient, details)) = self.load_payment(subject_id).await? else {
                    tracing::info!(payment_id = %subject_id, "payment gone before notification; skipping");
                    return Ok(());
                };
                let (subject, body) = if kind == NotificationKind::PaymentConfirmation {
                    payment_confirmation_body(&recipient.greeting_name, &details)
                } else {
                    payment_failure_body(&recipient.greeting_name, &details)
                };
                (recipient, subject, body)
            }
        };

        self.send(&recipient.email, &subject, &body).await
    }

    async fn load_booking(
        &self,
        booking_id: &str,
    ) -> Result<Option<(Recipient, BookingDetails)>, String> {
        let bookings = self.table("bookings");
        let listings = self.table("listings");
        let users = self.table("users");

        let sql = format!(
            "SELECT b.id, b.check_in, b.check_out, b.guests, b.total_cents, b.currency, \
             l.title, l.location, u.email, u.first_name \
             FROM {bookings} b \
             JOIN {listings} l ON l.id = b.listing_id \
             JOIN {users} u ON u.id = b.user_id \
             WHERE b.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| format!("booking lookup failed: {e}"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let first_name: Option<String> = row.try_get("first_name").unwrap_or(None);
        let recipient = Recipient {
            email: row.try_get("email").unwrap_or_default(),
            greeting_name: first_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Customer".to_string()),
        };
        let details = BookingDetails {
            booking_id: row.try_get("id").unwrap_or_default(),
            listing_title: row.try_get("title").unwrap_or_default(),
            listing_location: row.try_get("location").unwrap_or_default(),
            check_in: row.try_get("check_in").unwrap_or_default(),
            check_out: row.try_get("check_out").unwrap_or_default(),
            guests: row.try_get("guests").unwrap_or(0),
            total_cents: row.try_get("total_cents").unwrap_or(0),
            currency: row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()),
        };
        Ok(Some((recipient, details)))
    }

    async fn load_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<(Recipient, PaymentDetails)>, String> {
        let payments = self.table("payments");
        let bookings = self.table("bookings");
        let listings = self.table("listings");
        let users = self.table("users");

        let sql = format!(
            "SELECT p.amount_cents, p.currency AS payment_currency, p.transaction_id, \
             b.id AS booking_id, b.check_in, b.check_out, b.guests, b.total_cents, b.currency, \
             l.title, l.location, u.email, u.first_name \
             FROM {payments} p \
             JOIN {bookings} b ON b.id = p.booking_id \
             JOIN {listings} l ON l.id = b.listing_id \
             JOIN {users} u ON u.id = b.user_id \
             WHERE p.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| format!("payment lookup failed: {e}"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let first_name: Option<String> = row.try_get("first_name").unwrap_or(None);
        let recipient = Recipient {
            email: row.try_get("email").unwrap_or_default(),
            greeting_name: first_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Customer".to_string()),
        };
        let booking = BookingDetails {
            booking_id: row.try_get("booking_id").unwrap_or_default(),
            listing_title: row.try_get("title").unwrap_or_default(),
            listing_location: row.try_get("location").unwrap_or_default(),
            check_in: row.try_get("check_in").unwrap_or_default(),
            check_out: row.try_get("check_out").unwrap_or_default(),
            guests: row.try_get("guests").unwrap_or(0),
            total_cents: row.try_get("total_cents").unwrap_or(0),
            currency: row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()),
        };
        let details = PaymentDetails {
            amount_cents: row.try_get("amount_cents").unwrap_or(0),
            currency: row
                .try_get("payment_currency")
                .unwrap_or_else(|_| "ETB".to_string()),
            transaction_id: row.try_get("transaction_id").unwrap_or_default(),
            booking,
        };
        Ok(Some((recipient, details)))
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let Some(mailer) = &self.mailer else {
            // Dev/test fallback: no SMTP configured, log instead of sending.
            tracing::info!(to = %to, subject = %subject, "mail transport not configured; logging only");
            return Ok(());
        };

        let msg = Message::builder()
            .from(
                self.mail_from
                    .parse()
                    .map_err(|e| format!("invalid MAIL_FROM: {e}"))?,
            )
            .to(to.parse().map_err(|e| format!("invalid recipient: {e}"))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| format!("message build failed: {e}"))?;

        mailer
            .send(msg)
            .await
            .map(|_| ())
            .map_err(|e| format!("smtp send failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_booking() -> BookingDetails {
        BookingDetails {
            booking_id: "b-123".to_string(),
            listing_title: "Lakeside Cottage".to_string(),
            listing_location: "Bahir Dar".to_string(),
            check_in: "2026-09-01".to_string(),
            check_out: "2026-09-04".to_string(),
            guests: 2,
            total_cents: 30_000,
            currency: "ETB".to_string(),
        }
    }

    #[test]
    fn booking_confirmation_includes_stay_details() {
        let (subject, body) = booking_confirmation_body("Abel", &sample_booking());
        assert_eq!(subject, "Booking Confirmation - Booking #b-123");
        assert!(body.contains("Dear Abel"));
        assert!(body.contains("Lakeside Cottage"));
        assert!(body.contains("Bahir Dar"));
        assert!(body.contains("Check-in: 2026-09-01"));
        assert!(body.contains("Guests: 2"));
        assert!(body.contains("Total Price: 300.00 ETB"));
    }

    #[test]
    fn payment_confirmation_includes_amount_and_reference() {
        let details = PaymentDetails {
            booking: sample_booking(),
            amount_cents: 30_000,
            currency: "ETB".to_string(),
            transaction_id: "booking_b-123_deadbeef".to_string(),
        };
        let (subject, body) = payment_confirmation_body("Abel", &details);
        assert_eq!(subject, "Payment Confirmation - Booking #b-123");
        assert!(body.contains("Amount Paid: 300.00 ETB"));
        assert!(body.contains("Transaction ID: booking_b-123_deadbeef"));
    }

    #[test]
    fn payment_failure_mentions_support() {
        let details = PaymentDetails {
            booking: sample_booking(),
            amount_cents: 30_000,
            currency: "ETB".to_string(),
            transaction_id: "booking_b-123_deadbeef".to_string(),
        };
        let (subject, body) = payment_failure_body("Abel", &details);
        assert_eq!(subject, "Payment Failed - Booking #b-123");
        assert!(body.contains("could not be processed"));
        assert!(body.contains("contact our support team"));
    }
}

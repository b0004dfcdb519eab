use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UserIn {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct UserOut {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub is_staff: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListingIn {
    pub title: String,
    pub description: String,
    pub location: String,
    pub price_per_night_cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ListingOut {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub price_per_night_cents: i64,
    pub currency: String,
    pub owner_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BookingIn {
    pub listing_id: String,
    pub check_in: String,  // YYYY-MM-DD
    pub check_out: String, // YYYY-MM-DD
    pub guests: i32,
}

#[derive(Debug, Serialize, Clone)]
pub struct BookingOut {
    pub id: String,
    pub listing_id: String,
    pub user_id: String,
    pub check_in: String,
    pub check_out: String,
    pub guests: i32,
    pub status: String,
    pub total_cents: i64,
    pub currency: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewIn {
    pub listing_id: String,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReviewOut {
    pub id: String,
    pub listing_id: String,
    pub user_id: String,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Clone)]
pub struct PaymentOut {
    pub id: String,
    pub booking_id: String,
    pub transaction_id: String,
    pub chapa_reference: Option<String>,
    pub amount_cents: i64,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentOut {
    pub payment_id: String,
    pub checkout_url: String,
    pub transaction_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentIn {
    pub tx_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentOut {
    pub payment_status: String,
    pub booking_status: String,
}

/// Render an integer cents amount as a decimal string: 30000 -> "300.00".
/// Money is held as cents end-to-end so a 3-night stay at 100.00/night is
/// exactly 300.00, never a float approximation.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_amount_keeps_two_decimal_places() {
        assert_eq!(format_amount(30_000), "300.00");
        assert_eq!(format_amount(105), "1.05");
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(-250), "-2.50");
    }
}

use crate::error::{ApiError, ApiResult};
use crate::gateway::{classify_verify, GatewayFailure, InitiateRequest, VerifyOutcome};
use crate::models::*;
use crate::notify::NotificationKind;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Row, Transaction};
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Travelstay API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse_db_dt(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim().replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn row_dt_opt(row: &PgRow, col: &str) -> Option<DateTime<Utc>> {
    row.try_get::<Option<String>, _>(col)
        .ok()
        .flatten()
        .and_then(|s| parse_db_dt(&s))
}

fn require_user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(ApiError::unauthorized("missing X-User-Id header"));
    }
    Ok(raw.to_string())
}

struct Requester {
    id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    is_staff: bool,
}

async fn load_requester(state: &AppState, headers: &HeaderMap) -> Result<Requester, ApiError> {
    let user_id = require_user_id(headers)?;
    let users = state.table("users");
    let sql = format!(
        "SELECT id,email,first_name,last_name,phone,is_staff FROM {users} WHERE id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db requester lookup failed");
            ApiError::internal("database error")
        })?;
    let Some(row) = row else {
        return Err(ApiError::unauthorized("unknown user"));
    };
    let is_staff: i32 = row.try_get("is_staff").unwrap_or(0);
    Ok(Requester {
        id: row.try_get("id").unwrap_or_default(),
        email: row.try_get("email").unwrap_or_default(),
        first_name: row.try_get("first_name").unwrap_or(None),
        last_name: row.try_get("last_name").unwrap_or(None),
        phone: row.try_get("phone").unwrap_or(None),
        is_staff: is_staff != 0,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn for_update_suffix(state: &AppState) -> &'static str {
    let _ = state;
    " FOR UPDATE"
}

fn parse_stay_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("{field} must be a YYYY-MM-DD date")))
}

fn nights_between(check_in: NaiveDate, check_out: NaiveDate) -> Result<i64, ApiError> {
    let nights = (check_out - check_in).num_days();
    if nights <= 0 {
        return Err(ApiError::bad_request("check_out must be after check_in"));
    }
    Ok(nights)
}

fn compute_total_cents(nights: i64, price_per_night_cents: i64) -> Result<i64, ApiError> {
    nights
        .checked_mul(price_per_night_cents)
        .filter(|t| *t >= 0)
        .ok_or_else(|| ApiError::bad_request("stay total overflows supported amount"))
}

fn tx_ref_candidate(booking_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("booking_{booking_id}_{}", &suffix[..8])
}

async fn generate_tx_ref(
    tx: &mut Transaction<'_, sqlx::Postgres>,
    state: &AppState,
    booking_id: &str,
) -> Result<String, ApiError> {
    let payments = state.table("payments");
    let sql = format!("SELECT 1 FROM {payments} WHERE transaction_id=$1 LIMIT 1");
    for _ in 0..100 {
        let candidate = tx_ref_candidate(booking_id);
        let exists = sqlx::query(&sql)
            .bind(&candidate)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "db tx_ref existence check failed");
                ApiError::internal("database error")
            })?
            .is_some();
        if !exists {
            return Ok(candidate);
        }
    }
    Ok(format!("booking_{booking_id}_{}", Uuid::new_v4().simple()))
}

fn check_initiate_preconditions(
    booking_owner_id: &str,
    requester_id: &str,
    booking_status: &str,
) -> Result<(), ApiError> {
    if booking_owner_id != requester_id {
        return Err(ApiError::forbidden("only the booking owner may pay"));
    }
    match booking_status {
        "confirmed" => Err(ApiError::conflict("booking is already confirmed")),
        "cancelled" => Err(ApiError::conflict("booking is cancelled")),
        _ => Ok(()),
    }
}

// A settled payment is reported as-is: no gateway round-trip, no status
// rewrite, no second notification.
fn is_terminal_payment_status(status: &str) -> bool {
    matches!(status, "completed" | "failed")
}

fn verify_transition(
    outcome: VerifyOutcome,
) -> Option<(&'static str, &'static str, NotificationKind)> {
    match outcome {
        VerifyOutcome::Completed => Some((
            "completed",
            "confirmed",
            NotificationKind::PaymentConfirmation,
        )),
        VerifyOutcome::Failed => Some(("failed", "cancelled", NotificationKind::PaymentFailure)),
        VerifyOutcome::Pending => None,
    }
}

fn gateway_error(e: GatewayFailure, action: &str) -> ApiError {
    match e {
        GatewayFailure::Rejected { status, body } => {
            tracing::warn!(status, action, "payment gateway rejected request");
            ApiError::gateway(format!("payment gateway rejected {action}"), body)
        }
        GatewayFailure::Timeout => {
            tracing::warn!(action, "payment gateway timed out");
            ApiError::gateway(format!("payment gateway timed out during {action}"), None)
        }
        GatewayFailure::Transport(msg) => {
            tracing::error!(error = %msg, action, "payment gateway unreachable");
            ApiError::internal("payment gateway unreachable")
        }
    }
}

fn listing_from_row(row: &PgRow) -> ListingOut {
    ListingOut {
        id: row.try_get("id").unwrap_or_default(),
        title: row.try_get("title").unwrap_or_default(),
        description: row.try_get("description").unwrap_or_default(),
        location: row.try_get("location").unwrap_or_default(),
        price_per_night_cents: row.try_get("price_per_night_cents").unwrap_or(0),
        currency: row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()),
        owner_id: row.try_get("owner_id").unwrap_or_default(),
        created_at: row_dt_opt(row, "created_at"),
    }
}

fn booking_from_row(row: &PgRow) -> BookingOut {
    BookingOut {
        id: row.try_get("id").unwrap_or_default(),
        listing_id: row.try_get("listing_id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        check_in: row.try_get("check_in").unwrap_or_default(),
        check_out: row.try_get("check_out").unwrap_or_default(),
        guests: row.try_get("guests").unwrap_or(0),
        status: row
            .try_get("status")
            .unwrap_or_else(|_| "pending".to_string()),
        total_cents: row.try_get("total_cents").unwrap_or(0),
        currency: row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()),
        created_at: row_dt_opt(row, "created_at"),
    }
}

fn review_from_row(row: &PgRow) -> ReviewOut {
    ReviewOut {
        id: row.try_get("id").unwrap_or_default(),
        listing_id: row.try_get("listing_id").unwrap_or_default(),
        user_id: row.try_get("user_id").unwrap_or_default(),
        rating: row.try_get("rating").unwrap_or(0),
        comment: row.try_get("comment").unwrap_or(None),
        created_at: row_dt_opt(row, "created_at"),
    }
}

fn payment_from_row(row: &PgRow) -> PaymentOut {
    let amount_cents: i64 = row.try_get("amount_cents").unwrap_or(0);
    PaymentOut {
        id: row.try_get("id").unwrap_or_default(),
        booking_id: row.try_get("booking_id").unwrap_or_default(),
        transaction_id: row.try_get("transaction_id").unwrap_or_default(),
        chapa_reference: row.try_get("chapa_reference").unwrap_or(None),
        amount_cents,
        amount: format_amount(amount_cents),
        currency: row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()),
        status: row
            .try_get("status")
            .unwrap_or_else(|_| "pending".to_string()),
        payment_method: row.try_get("payment_method").unwrap_or(None),
        created_at: row_dt_opt(row, "created_at"),
        updated_at: row_dt_opt(row, "updated_at"),
    }
}

// ---------- users ----------

pub async fn create_user(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<UserIn>,
) -> ApiResult<(StatusCode, axum::Json<UserOut>)> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }

    let users = state.table("users");
    let id = Uuid::new_v4().to_string();
    let sql = format!(
        "INSERT INTO {users} (id,email,first_name,last_name,phone,is_staff,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7)"
    );
    let res = sqlx::query(&sql)
        .bind(&id)
        .bind(&email)
        .bind(&body.first_name)
        .bind(&body.last_name)
        .bind(&body.phone)
        .bind(if body.is_staff { 1i32 } else { 0i32 })
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await;
    if let Err(e) = res {
        if is_unique_violation(&e) {
            return Err(ApiError::conflict("email already registered"));
        }
        tracing::error!(error = %e, "db create_user failed");
        return Err(ApiError::internal("database error"));
    }

    Ok((
        StatusCode::CREATED,
        axum::Json(UserOut {
            id,
            email,
            first_name: body.first_name,
            last_name: body.last_name,
            phone: body.phone,
            is_staff: body.is_staff,
        }),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<axum::Json<UserOut>> {
    let requester = load_requester(&state, &headers).await?;
    if requester.id != user_id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to view this user"));
    }

    let users = state.table("users");
    let sql = format!(
        "SELECT id,email,first_name,last_name,phone,is_staff FROM {users} WHERE id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db get_user failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let is_staff: i32 = row.try_get("is_staff").unwrap_or(0);
    Ok(axum::Json(UserOut {
        id: row.try_get("id").unwrap_or_default(),
        email: row.try_get("email").unwrap_or_default(),
        first_name: row.try_get("first_name").unwrap_or(None),
        last_name: row.try_get("last_name").unwrap_or(None),
        phone: row.try_get("phone").unwrap_or(None),
        is_staff: is_staff != 0,
    }))
}

// ---------- listings ----------

pub async fn list_listings(State(state): State<AppState>) -> ApiResult<axum::Json<Vec<ListingOut>>> {
    let listings = state.table("listings");
    let sql = format!(
        "SELECT id,title,description,location,price_per_night_cents,currency,owner_id,created_at \
         FROM {listings} ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await.map_err(|e| {
        tracing::error!(error = %e, "db list_listings failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(listing_from_row).collect()))
}

pub async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ListingIn>,
) -> ApiResult<(StatusCode, axum::Json<ListingOut>)> {
    let requester = load_requester(&state, &headers).await?;

    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }
    if body.location.trim().is_empty() {
        return Err(ApiError::bad_request("location is required"));
    }
    if body.price_per_night_cents <= 0 {
        return Err(ApiError::bad_request("price_per_night_cents must be positive"));
    }
    let currency = body
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| state.default_currency.clone());

    let listings = state.table("listings");
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let sql = format!(
        "INSERT INTO {listings} (id,title,description,location,price_per_night_cents,currency,owner_id,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"
    );
    sqlx::query(&sql)
        .bind(&id)
        .bind(&title)
        .bind(&body.description)
        .bind(body.location.trim())
        .bind(body.price_per_night_cents)
        .bind(&currency)
        .bind(&requester.id)
        .bind(created_at.to_rfc3339())
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db create_listing failed");
            ApiError::internal("database error")
        })?;

    Ok((
        StatusCode::CREATED,
        axum::Json(ListingOut {
            id,
            title,
            description: body.description,
            location: body.location.trim().to_string(),
            price_per_night_cents: body.price_per_night_cents,
            currency,
            owner_id: requester.id,
            created_at: Some(created_at),
        }),
    ))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> ApiResult<axum::Json<ListingOut>> {
    let listings = state.table("listings");
    let sql = format!(
        "SELECT id,title,description,location,price_per_night_cents,currency,owner_id,created_at \
         FROM {listings} WHERE id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db get_listing failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;
    Ok(axum::Json(listing_from_row(&row)))
}

pub async fn update_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
    axum::Json(body): axum::Json<ListingIn>,
) -> ApiResult<axum::Json<ListingOut>> {
    let requester = load_requester(&state, &headers).await?;

    let listings = state.table("listings");
    let sql = format!("SELECT owner_id,currency,created_at FROM {listings} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db update_listing lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;
    let owner_id: String = row.try_get("owner_id").unwrap_or_default();
    if owner_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("only the owner may update this listing"));
    }

    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }
    if body.location.trim().is_empty() {
        return Err(ApiError::bad_request("location is required"));
    }
    if body.price_per_night_cents <= 0 {
        return Err(ApiError::bad_request("price_per_night_cents must be positive"));
    }
    let currency = body
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| row.try_get("currency").unwrap_or_else(|_| "ETB".to_string()));

    let sql = format!(
        "UPDATE {listings} SET title=$1, description=$2, location=$3, price_per_night_cents=$4, currency=$5 \
         WHERE id=$6"
    );
    sqlx::query(&sql)
        .bind(&title)
        .bind(&body.description)
        .bind(body.location.trim())
        .bind(body.price_per_night_cents)
        .bind(&currency)
        .bind(&listing_id)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db update_listing failed");
            ApiError::internal("database error")
        })?;

    Ok(axum::Json(ListingOut {
        id: listing_id,
        title,
        description: body.description,
        location: body.location.trim().to_string(),
        price_per_night_cents: body.price_per_night_cents,
        currency,
        owner_id,
        created_at: row_dt_opt(&row, "created_at"),
    }))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
) -> ApiResult<StatusCode> {
    let requester = load_requester(&state, &headers).await?;

    let listings = state.table("listings");
    let bookings = state.table("bookings");
    let reviews = state.table("reviews");
    let payments = state.table("payments");

    let sql = format!("SELECT owner_id FROM {listings} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_listing lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;
    let owner_id: String = row.try_get("owner_id").unwrap_or_default();
    if owner_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("only the owner may delete this listing"));
    }

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin failed");
        ApiError::internal("database error")
    })?;

    // No FK cascades in the schema; child rows go first.
    let steps = [
        format!(
            "DELETE FROM {payments} WHERE booking_id IN (SELECT id FROM {bookings} WHERE listing_id=$1)"
        ),
        format!("DELETE FROM {bookings} WHERE listing_id=$1"),
        format!("DELETE FROM {reviews} WHERE listing_id=$1"),
        format!("DELETE FROM {listings} WHERE id=$1"),
    ];
    for sql in steps {
        sqlx::query(&sql)
            .bind(&listing_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "db delete_listing cascade failed");
                ApiError::internal("database error")
            })?;
    }

    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn listing_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(listing_id): Path<String>,
) -> ApiResult<axum::Json<Vec<BookingOut>>> {
    let requester = load_requester(&state, &headers).await?;

    let listings = state.table("listings");
    let bookings = state.table("bookings");
    let sql = format!("SELECT owner_id FROM {listings} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db listing_bookings lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;
    let owner_id: String = row.try_get("owner_id").unwrap_or_default();
    if owner_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("only the owner may view listing bookings"));
    }

    let sql = format!(
        "SELECT id,listing_id,user_id,check_in,check_out,guests,status,total_cents,currency,created_at \
         FROM {bookings} WHERE listing_id=$1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db listing_bookings failed");
            ApiError::internal("database error")
        })?;
    Ok(axum::Json(rows.iter().map(booking_from_row).collect()))
}

pub async fn listing_reviews(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> ApiResult<axum::Json<Vec<ReviewOut>>> {
    let listings = state.table("listings");
    let reviews = state.table("reviews");

    let sql = format!("SELECT 1 FROM {listings} WHERE id=$1");
    sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db listing_reviews lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;

    let sql = format!(
        "SELECT id,listing_id,user_id,rating,comment,created_at \
         FROM {reviews} WHERE listing_id=$1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(&listing_id)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db listing_reviews failed");
            ApiError::internal("database error")
        })?;
    Ok(axum::Json(rows.iter().map(review_from_row).collect()))
}

// ---------- bookings ----------

pub async fn list_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<axum::Json<Vec<BookingOut>>> {
    let requester = load_requester(&state, &headers).await?;
    let bookings = state.table("bookings");

    let rows = if requester.is_staff {
        let sql = format!(
            "SELECT id,listing_id,user_id,check_in,check_out,guests,status,total_cents,currency,created_at \
             FROM {bookings} ORDER BY created_at DESC"
        );
        sqlx::query(&sql).fetch_all(&state.pool).await
    } else {
        let sql = format!(
            "SELECT id,listing_id,user_id,check_in,check_out,guests,status,total_cents,currency,created_at \
             FROM {bookings} WHERE user_id=$1 ORDER BY created_at DESC"
        );
        sqlx::query(&sql).bind(&requester.id).fetch_all(&state.pool).await
    }
    .map_err(|e| {
        tracing::error!(error = %e, "db list_bookings failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(booking_from_row).collect()))
}

pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BookingIn>,
) -> ApiResult<(StatusCode, axum::Json<BookingOut>)> {
    let requester = load_requester(&state, &headers).await?;

    let check_in = parse_stay_date(&body.check_in, "check_in")?;
    let check_out = parse_stay_date(&body.check_out, "check_out")?;
    let nights = nights_between(check_in, check_out)?;
    if body.guests < 1 {
        return Err(ApiError::bad_request("guests must be at least 1"));
    }

    let listings = state.table("listings");
    let bookings = state.table("bookings");
    let sql = format!("SELECT price_per_night_cents,currency FROM {listings} WHERE id=$1");
    let listing = sqlx::query(&sql)
        .bind(&body.listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db create_booking listing lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;
    let price_per_night_cents: i64 = listing.try_get("price_per_night_cents").unwrap_or(0);
    let currency: String = listing.try_get("currency").unwrap_or_else(|_| "ETB".to_string());

    let total_cents = compute_total_cents(nights, price_per_night_cents)?;

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let sql = format!(
        "INSERT INTO {bookings} (id,listing_id,user_id,check_in,check_out,guests,status,total_cents,currency,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,'pending',$7,$8,$9)"
    );
    sqlx::query(&sql)
        .bind(&id)
        .bind(&body.listing_id)
        .bind(&requester.id)
        .bind(check_in.format("%Y-%m-%d").to_string())
        .bind(check_out.format("%Y-%m-%d").to_string())
        .bind(body.guests)
        .bind(total_cents)
        .bind(&currency)
        .bind(created_at.to_rfc3339())
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db create_booking failed");
            ApiError::internal("database error")
        })?;

    state
        .notifier
        .enqueue(NotificationKind::BookingConfirmation, &id);

    Ok((
        StatusCode::CREATED,
        axum::Json(BookingOut {
            id,
            listing_id: body.listing_id,
            user_id: requester.id,
            check_in: check_in.format("%Y-%m-%d").to_string(),
            check_out: check_out.format("%Y-%m-%d").to_string(),
            guests: body.guests,
            status: "pending".to_string(),
            total_cents,
            currency,
            created_at: Some(created_at),
        }),
    ))
}

pub async fn get_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> ApiResult<axum::Json<BookingOut>> {
    let requester = load_requester(&state, &headers).await?;
    let bookings = state.table("bookings");
    let sql = format!(
        "SELECT id,listing_id,user_id,check_in,check_out,guests,status,total_cents,currency,created_at \
         FROM {bookings} WHERE id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db get_booking failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("booking not found"))?;
    let booking = booking_from_row(&row);
    if booking.user_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to view this booking"));
    }
    Ok(axum::Json(booking))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> ApiResult<StatusCode> {
    let requester = load_requester(&state, &headers).await?;
    let bookings = state.table("bookings");
    let payments = state.table("payments");

    let sql = format!("SELECT user_id FROM {bookings} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_booking lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("booking not found"))?;
    let user_id: String = row.try_get("user_id").unwrap_or_default();
    if user_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to delete this booking"));
    }

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin failed");
        ApiError::internal("database error")
    })?;
    let sql = format!("DELETE FROM {payments} WHERE booking_id=$1");
    sqlx::query(&sql)
        .bind(&booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_booking payment cascade failed");
            ApiError::internal("database error")
        })?;
    let sql = format!("DELETE FROM {bookings} WHERE id=$1");
    sqlx::query(&sql)
        .bind(&booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_booking failed");
            ApiError::internal("database error")
        })?;
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- reviews ----------

pub async fn list_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<axum::Json<Vec<ReviewOut>>> {
    let requester = load_requester(&state, &headers).await?;
    let reviews = state.table("reviews");

    let rows = if requester.is_staff {
        let sql = format!(
            "SELECT id,listing_id,user_id,rating,comment,created_at FROM {reviews} ORDER BY created_at DESC"
        );
        sqlx::query(&sql).fetch_all(&state.pool).await
    } else {
        let sql = format!(
            "SELECT id,listing_id,user_id,rating,comment,created_at \
             FROM {reviews} WHERE user_id=$1 ORDER BY created_at DESC"
        );
        sqlx::query(&sql).bind(&requester.id).fetch_all(&state.pool).await
    }
    .map_err(|e| {
        tracing::error!(error = %e, "db list_reviews failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(review_from_row).collect()))
}

pub async fn create_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ReviewIn>,
) -> ApiResult<(StatusCode, axum::Json<ReviewOut>)> {
    let requester = load_requester(&state, &headers).await?;
    if !(1..=5).contains(&body.rating) {
        return Err(ApiError::bad_request("rating must be between 1 and 5"));
    }

    let listings = state.table("listings");
    let reviews = state.table("reviews");
    let sql = format!("SELECT 1 FROM {listings} WHERE id=$1");
    sqlx::query(&sql)
        .bind(&body.listing_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db create_review listing lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("listing not found"))?;

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let sql = format!(
        "INSERT INTO {reviews} (id,listing_id,user_id,rating,comment,created_at) \
         VALUES ($1,$2,$3,$4,$5,$6)"
    );
    let res = sqlx::query(&sql)
        .bind(&id)
        .bind(&body.listing_id)
        .bind(&requester.id)
        .bind(body.rating)
        .bind(&body.comment)
        .bind(created_at.to_rfc3339())
        .execute(&state.pool)
        .await;
    if let Err(e) = res {
        if is_unique_violation(&e) {
            return Err(ApiError::conflict("you have already reviewed this listing"));
        }
        tracing::error!(error = %e, "db create_review failed");
        return Err(ApiError::internal("database error"));
    }

    Ok((
        StatusCode::CREATED,
        axum::Json(ReviewOut {
            id,
            listing_id: body.listing_id,
            user_id: requester.id,
            rating: body.rating,
            comment: body.comment,
            created_at: Some(created_at),
        }),
    ))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
) -> ApiResult<axum::Json<ReviewOut>> {
    let reviews = state.table("reviews");
    let sql = format!(
        "SELECT id,listing_id,user_id,rating,comment,created_at FROM {reviews} WHERE id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&review_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db get_review failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("review not found"))?;
    Ok(axum::Json(review_from_row(&row)))
}

pub async fn delete_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(review_id): Path<String>,
) -> ApiResult<StatusCode> {
    let requester = load_requester(&state, &headers).await?;
    let reviews = state.table("reviews");

    let sql = format!("SELECT user_id FROM {reviews} WHERE id=$1");
    let row = sqlx::query(&sql)
        .bind(&review_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_review lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("review not found"))?;
    let user_id: String = row.try_get("user_id").unwrap_or_default();
    if user_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to delete this review"));
    }

    let sql = format!("DELETE FROM {reviews} WHERE id=$1");
    sqlx::query(&sql)
        .bind(&review_id)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db delete_review failed");
            ApiError::internal("database error")
        })?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- payments ----------

pub async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<axum::Json<Vec<PaymentOut>>> {
    let requester = load_requester(&state, &headers).await?;
    let payments = state.table("payments");
    let bookings = state.table("bookings");

    let rows = if requester.is_staff {
        let sql = format!(
            "SELECT id,booking_id,transaction_id,chapa_reference,amount_cents,currency,status,payment_method,created_at,updated_at \
             FROM {payments} ORDER BY created_at DESC"
        );
        sqlx::query(&sql).fetch_all(&state.pool).await
    } else {
        let sql = format!(
            "SELECT p.id,p.booking_id,p.transaction_id,p.chapa_reference,p.amount_cents,p.currency,p.status,p.payment_method,p.created_at,p.updated_at \
             FROM {payments} p JOIN {bookings} b ON b.id = p.booking_id \
             WHERE b.user_id=$1 ORDER BY p.created_at DESC"
        );
        sqlx::query(&sql).bind(&requester.id).fetch_all(&state.pool).await
    }
    .map_err(|e| {
        tracing::error!(error = %e, "db list_payments failed");
        ApiError::internal("database error")
    })?;
    Ok(axum::Json(rows.iter().map(payment_from_row).collect()))
}

pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> ApiResult<axum::Json<PaymentOut>> {
    let requester = load_requester(&state, &headers).await?;
    let payments = state.table("payments");
    let bookings = state.table("bookings");

    let sql = format!(
        "SELECT p.id,p.booking_id,p.transaction_id,p.chapa_reference,p.amount_cents,p.currency,p.status,p.payment_method,p.created_at,p.updated_at, \
         b.user_id AS booking_user_id \
         FROM {payments} p JOIN {bookings} b ON b.id = p.booking_id WHERE p.id=$1"
    );
    let row = sqlx::query(&sql)
        .bind(&payment_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db get_payment failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("payment not found"))?;
    let booking_user_id: String = row.try_get("booking_user_id").unwrap_or_default();
    if booking_user_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to view this payment"));
    }
    Ok(axum::Json(payment_from_row(&row)))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> ApiResult<(StatusCode, axum::Json<InitiatePaymentOut>)> {
    let requester = load_requester(&state, &headers).await?;
    let bookings = state.table("bookings");
    let payments = state.table("payments");

    let sql = format!(
        "SELECT user_id,status,total_cents,currency FROM {bookings} WHERE id=$1"
    );
    let booking = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db initiate_payment booking lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("booking not found"))?;
    let booking_user_id: String = booking.try_get("user_id").unwrap_or_default();
    let booking_status: String = booking
        .try_get("status")
        .unwrap_or_else(|_| "pending".to_string());
    check_initiate_preconditions(&booking_user_id, &requester.id, &booking_status)?;
    let total_cents: i64 = booking.try_get("total_cents").unwrap_or(0);
    let currency: String = booking.try_get("currency").unwrap_or_else(|_| "ETB".to_string());

    let sql = format!("SELECT 1 FROM {payments} WHERE booking_id=$1 LIMIT 1");
    let existing = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db initiate_payment existence check failed");
            ApiError::internal("database error")
        })?;
    if existing.is_some() {
        return Err(ApiError::conflict("a payment already exists for this booking"));
    }

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin failed");
        ApiError::internal("database error")
    })?;

    // Lock the booking so a concurrent initiate or verify serializes behind us.
    let sql = format!(
        "SELECT status FROM {bookings} WHERE id=$1{}",
        for_update_suffix(&state)
    );
    let locked = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db initiate_payment lock failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("booking not found"))?;
    let locked_status: String = locked
        .try_get("status")
        .unwrap_or_else(|_| "pending".to_string());
    if locked_status == "confirmed" || locked_status == "cancelled" {
        return Err(ApiError::conflict("booking is no longer payable"));
    }

    let tx_ref = generate_tx_ref(&mut tx, &state, &booking_id).await?;

    let initiate = InitiateRequest {
        amount: format_amount(total_cents),
        currency: currency.clone(),
        email: requester.email.clone(),
        first_name: requester.first_name.clone().unwrap_or_default(),
        last_name: requester.last_name.clone().unwrap_or_default(),
        phone_number: requester.phone.clone(),
        tx_ref: tx_ref.clone(),
        callback_url: format!("{}/payments/verify_payment", state.public_base_url),
        return_url: format!("{}/bookings/{booking_id}", state.public_base_url),
    };
    // Gateway call precedes any write; a rejection must leave no rows behind.
    let success = state
        .gateway
        .initiate(&initiate)
        .await
        .map_err(|e| gateway_error(e, "initiate"))?;

    let payment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO {payments} (id,booking_id,transaction_id,chapa_reference,amount_cents,currency,status,payment_method,created_at,updated_at) \
         VALUES ($1,$2,$3,NULL,$4,$5,'pending','chapa',$6,$6)"
    );
    let res = sqlx::query(&sql)
        .bind(&payment_id)
        .bind(&booking_id)
        .bind(&tx_ref)
        .bind(total_cents)
        .bind(&currency)
        .bind(&now)
        .execute(&mut *tx)
        .await;
    if let Err(e) = res {
        if is_unique_violation(&e) {
            return Err(ApiError::conflict("a payment already exists for this booking"));
        }
        tracing::error!(error = %e, "db initiate_payment insert failed");
        return Err(ApiError::internal("database error"));
    }

    let sql = format!("UPDATE {bookings} SET status='pending_payment' WHERE id=$1");
    sqlx::query(&sql)
        .bind(&booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db initiate_payment booking update failed");
            ApiError::internal("database error")
        })?;

    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;

    tracing::info!(booking_id = %booking_id, payment_id = %payment_id, "payment initiated");
    Ok((
        StatusCode::CREATED,
        axum::Json(InitiatePaymentOut {
            payment_id,
            checkout_url: success.checkout_url,
            transaction_reference: tx_ref,
        }),
    ))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<VerifyPaymentIn>,
) -> ApiResult<axum::Json<VerifyPaymentOut>> {
    let requester = load_requester(&state, &headers).await?;
    let tx_ref = body
        .tx_ref
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("tx_ref is required"))?
        .to_string();

    let payments = state.table("payments");
    let bookings = state.table("bookings");

    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin failed");
        ApiError::internal("database error")
    })?;

    let sql = format!(
        "SELECT id,booking_id,status FROM {payments} WHERE transaction_id=$1{}",
        for_update_suffix(&state)
    );
    let payment = sqlx::query(&sql)
        .bind(&tx_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db verify_payment lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("payment not found"))?;
    let payment_id: String = payment.try_get("id").unwrap_or_default();
    let booking_id: String = payment.try_get("booking_id").unwrap_or_default();
    let payment_status: String = payment
        .try_get("status")
        .unwrap_or_else(|_| "pending".to_string());

    let sql = format!(
        "SELECT user_id,status FROM {bookings} WHERE id=$1{}",
        for_update_suffix(&state)
    );
    let booking = sqlx::query(&sql)
        .bind(&booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db verify_payment booking lookup failed");
            ApiError::internal("database error")
        })?
        .ok_or_else(|| ApiError::not_found("booking not found"))?;
    let booking_user_id: String = booking.try_get("user_id").unwrap_or_default();
    let booking_status: String = booking
        .try_get("status")
        .unwrap_or_else(|_| "pending".to_string());
    if booking_user_id != requester.id && !requester.is_staff {
        return Err(ApiError::forbidden("not allowed to verify this payment"));
    }

    if is_terminal_payment_status(&payment_status) {
        return Ok(axum::Json(VerifyPaymentOut {
            payment_status,
            booking_status,
        }));
    }

    let resp = state
        .gateway
        .verify(&tx_ref)
        .await
        .map_err(|e| gateway_error(e, "verify"))?;
    let chapa_reference = resp.data.as_ref().and_then(|d| d.reference.clone());

    let Some((new_payment_status, new_booking_status, notification)) =
        verify_transition(classify_verify(&resp))
    else {
        // Still in flight at the gateway; leave both rows untouched.
        return Ok(axum::Json(VerifyPaymentOut {
            payment_status: "pending".to_string(),
            booking_status,
        }));
    };

    let sql = format!(
        "UPDATE {payments} SET status=$1, chapa_reference=COALESCE($2, chapa_reference), updated_at=$3 WHERE id=$4"
    );
    sqlx::query(&sql)
        .bind(new_payment_status)
        .bind(&chapa_reference)
        .bind(Utc::now().to_rfc3339())
        .bind(&payment_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db verify_payment update failed");
            ApiError::internal("database error")
        })?;
    let sql = format!("UPDATE {bookings} SET status=$1 WHERE id=$2");
    sqlx::query(&sql)
        .bind(new_booking_status)
        .bind(&booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db verify_payment booking update failed");
            ApiError::internal("database error")
        })?;
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db commit failed");
        ApiError::internal("database error")
    })?;

    state.notifier.enqueue(notification, &payment_id);
    tracing::info!(
        payment_id = %payment_id,
        booking_id = %booking_id,
        status = new_payment_status,
        "payment verified"
    );

    Ok(axum::Json(VerifyPaymentOut {
        payment_status: new_payment_status.to_string(),
        booking_status: new_booking_status.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn nights_are_exclusive_of_checkout_day() {
        assert_eq!(nights_between(d("2026-09-01"), d("2026-09-04")).unwrap(), 3);
        assert_eq!(nights_between(d("2026-09-01"), d("2026-09-02")).unwrap(), 1);
    }

    #[test]
    fn zero_or_negative_stays_are_rejected() {
        assert!(nights_between(d("2026-09-01"), d("2026-09-01")).is_err());
        assert!(nights_between(d("2026-09-04"), d("2026-09-01")).is_err());
    }

    #[test]
    fn total_is_exact_in_cents() {
        // 3 nights at 100.00 per night is exactly 300.00.
        let total = compute_total_cents(3, 10_000).unwrap();
        assert_eq!(total, 30_000);
        assert_eq!(format_amount(total), "300.00");
    }

    #[test]
    fn total_overflow_is_a_client_error() {
        let err = compute_total_cents(i64::MAX, 2).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn tx_ref_embeds_booking_id_and_short_suffix() {
        let tx_ref = tx_ref_candidate("b-42");
        let rest = tx_ref.strip_prefix("booking_b-42_").expect("prefix");
        assert_eq!(rest.len(), 8);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
        // Fresh randomness per candidate.
        assert_ne!(tx_ref, tx_ref_candidate("b-42"));
    }

    #[test]
    fn stay_dates_must_be_iso() {
        assert!(parse_stay_date("2026-09-01", "check_in").is_ok());
        assert!(parse_stay_date("01/09/2026", "check_in").is_err());
        assert!(parse_stay_date("", "check_in").is_err());
    }

    #[test]
    fn gateway_rejection_maps_to_bad_gateway_with_details() {
        let raw = serde_json::json!({"status": "failed", "message": "Invalid currency"});
        let err = gateway_error(
            GatewayFailure::Rejected {
                status: 400,
                body: Some(raw.clone()),
            },
            "initiate",
        );
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.details, Some(raw));
    }

    #[test]
    fn gateway_timeout_maps_to_bad_gateway() {
        let err = gateway_error(GatewayFailure::Timeout, "verify");
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn gateway_transport_fault_maps_to_internal() {
        let err = gateway_error(GatewayFailure::Transport("dns failure".to_string()), "verify");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn initiate_requires_booking_owner() {
        let err = check_initiate_preconditions("owner-1", "someone-else", "pending").unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        // Staff do not get a pass here; only the owner pays.
        assert!(check_initiate_preconditions("owner-1", "owner-1", "pending").is_ok());
    }

    #[test]
    fn initiate_rejects_settled_bookings() {
        for status in ["confirmed", "cancelled"] {
            let err = check_initiate_preconditions("owner-1", "owner-1", status).unwrap_err();
            assert_eq!(err.status, StatusCode::CONFLICT);
        }
        assert!(check_initiate_preconditions("owner-1", "owner-1", "pending_payment").is_ok());
    }

    #[test]
    fn settled_payments_skip_reverification() {
        // A settled payment never reaches the gateway call or
        // verify_transition, so re-verifying cannot send a second mail.
        assert!(is_terminal_payment_status("completed"));
        assert!(is_terminal_payment_status("failed"));
        assert!(!is_terminal_payment_status("pending"));
    }

    #[test]
    fn verify_transition_settles_each_outcome_once() {
        let (p, b, kind) = verify_transition(VerifyOutcome::Completed).unwrap();
        assert_eq!((p, b), ("completed", "confirmed"));
        assert_eq!(kind, NotificationKind::PaymentConfirmation);

        let (p, b, kind) = verify_transition(VerifyOutcome::Failed).unwrap();
        assert_eq!((p, b), ("failed", "cancelled"));
        assert_eq!(kind, NotificationKind::PaymentFailure);

        // Pending writes nothing and notifies nobody.
        assert!(verify_transition(VerifyOutcome::Pending).is_none());
    }

    #[test]
    fn missing_user_header_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = require_user_id(&headers).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "  ".parse().unwrap());
        assert!(require_user_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "u-1".parse().unwrap());
        assert_eq!(require_user_id(&headers).unwrap(), "u-1");
    }
}

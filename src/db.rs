use sqlx::postgres::{PgPool, PgPoolOptions};

fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let users = table_name(db_schema, "users");
    let listings = table_name(db_schema, "listings");
    let bookings = table_name(db_schema, "bookings");
    let reviews = table_name(db_schema, "reviews");
    let payments = table_name(db_schema, "payments");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {users} (\
             id VARCHAR(36) PRIMARY KEY,\
             email VARCHAR(255) NOT NULL UNIQUE,\
             first_name VARCHAR(120),\
             last_name VARCHAR(120),\
             phone VARCHAR(32),\
             is_staff INTEGER NOT NULL DEFAULT 0,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {listings} (\
             id VARCHAR(36) PRIMARY KEY,\
             title VARCHAR(255) NOT NULL,\
             description TEXT NOT NULL,\
             location VARCHAR(255) NOT NULL,\
             price_per_night_cents BIGINT NOT NULL,\
             currency VARCHAR(3) NOT NULL DEFAULT 'ETB',\
             owner_id VARCHAR(36) NOT NULL,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             listing_id VARCHAR(36) NOT NULL,\
             user_id VARCHAR(36) NOT NULL,\
             check_in TEXT NOT NULL,\
             check_out TEXT NOT NULL,\
             guests INTEGER NOT NULL,\
             status VARCHAR(16) NOT NULL DEFAULT 'pending',\
             total_cents BIGINT NOT NULL,\
             currency VARCHAR(3) NOT NULL DEFAULT 'ETB',\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {reviews} (\
             id VARCHAR(36) PRIMARY KEY,\
             listing_id VARCHAR(36) NOT NULL,\
             user_id VARCHAR(36) NOT NULL,\
             rating INTEGER NOT NULL,\
             comment TEXT,\
             created_at TEXT NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {payments} (\
             id VARCHAR(36) PRIMARY KEY,\
             booking_id VARCHAR(36) NOT NULL,\
             transaction_id VARCHAR(255) NOT NULL,\
             chapa_reference VARCHAR(255),\
             amount_cents BIGINT NOT NULL,\
             currency VARCHAR(3) NOT NULL DEFAULT 'ETB',\
             status VARCHAR(20) NOT NULL DEFAULT 'pending',\
             payment_method VARCHAR(50),\
             created_at TEXT NOT NULL,\
             updated_at TEXT NOT NULL\
             )"
        ),
        // One review per (listing, user); duplicate inserts must trip this.
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_listing_user ON {reviews}(listing_id, user_id)"
        ),
        // A booking owns at most one payment.
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_booking ON {payments}(booking_id)"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_transaction ON {payments}(transaction_id)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_listings_owner ON {listings}(owner_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_listing ON {bookings}(listing_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_user ON {bookings}(user_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_reviews_listing ON {reviews}(listing_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_reviews_user ON {reviews}(user_id)"),
    ];

    for ddl in ddls {
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let _ = sqlx::query(&format!(
        "ALTER TABLE {payments} ADD COLUMN IF NOT EXISTS chapa_reference VARCHAR(255)"
    ))
    .execute(pool)
    .await;
    let _ = sqlx::query(&format!(
        "ALTER TABLE {payments} ADD COLUMN IF NOT EXISTS payment_method VARCHAR(50)"
    ))
    .execute(pool)
    .await;
    let _ = sqlx::query(&format!(
        "ALTER TABLE {bookings} ADD COLUMN IF NOT EXISTS total_cents BIGINT DEFAULT 0"
    ))
    .execute(pool)
    .await;

    Ok(())
}

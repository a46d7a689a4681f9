//! Wallet registrations: Apple push tokens and Google object ids.

use crate::models::{RegistrationRow, WalletPlatform};
use sqlx::PgPool;

/// Inserts the handle unless the customer already has it. When the device
/// library id is known and the device was registered before, its handle is
/// replaced instead. Returns whether anything changed.
pub async fn insert(
    pool: &PgPool,
    id: &str,
    customer_id: &str,
    platform: WalletPlatform,
    handle: &str,
    device_library_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let existing: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM wallet_registrations
        WHERE customer_id = $1 AND platform = $2 AND handle = $3
        FOR UPDATE
        "#,
    )
    .bind(customer_id)
    .bind(platform)
    .bind(handle)
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        tx.commit().await?;
        return Ok(false);
    }

    let result = match device_library_id {
        Some(device) => {
            sqlx::query(
                r#"
                INSERT INTO wallet_registrations
                    (id, customer_id, platform, handle, device_library_id)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (customer_id, platform, device_library_id)
                    WHERE device_library_id IS NOT NULL
                DO UPDATE SET handle = EXCLUDED.handle
                "#,
            )
            .bind(id)
            .bind(customer_id)
            .bind(platform)
            .bind(handle)
            .bind(device)
            .execute(&mut *tx)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO wallet_registrations (id, customer_id, platform, handle)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (customer_id, platform, handle) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(customer_id)
            .bind(platform)
            .bind(handle)
            .execute(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete(
    pool: &PgPool,
    customer_id: &str,
    platform: WalletPlatform,
    handle: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM wallet_registrations
        WHERE customer_id = $1 AND platform = $2 AND handle = $3
        "#,
    )
    .bind(customer_id)
    .bind(platform)
    .bind(handle)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_device(
    pool: &PgPool,
    customer_id: &str,
    device_library_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM wallet_registrations
        WHERE customer_id = $1 AND device_library_id = $2
        "#,
    )
    .bind(customer_id)
    .bind(device_library_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_for_customer(
    pool: &PgPool,
    customer_id: &str,
    platform: WalletPlatform,
) -> Result<Vec<RegistrationRow>, sqlx::Error> {
    sqlx::query_as::<_, RegistrationRow>(
        r#"
        SELECT id, customer_id, platform, handle, device_library_id, created_at
        FROM wallet_registrations
        WHERE customer_id = $1 AND platform = $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(customer_id)
    .bind(platform)
    .fetch_all(pool)
    .await
}

/// `(customer_id, handle)` pairs across every customer of the business.
pub async fn list_for_business(
    pool: &PgPool,
    business_id: &str,
    platform: WalletPlatform,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT r.customer_id, r.handle
        FROM wallet_registrations r
        JOIN customers c ON c.id = r.customer_id
        WHERE c.business_id = $1 AND r.platform = $2
        ORDER BY r.customer_id, r.handle
        "#,
    )
    .bind(business_id)
    .bind(platform)
    .fetch_all(pool)
    .await
}

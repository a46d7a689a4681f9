use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// `true` for the single caller whose insert landed.
pub async fn record_if_absent(
    pool: &PgPool,
    nonce: &str,
    received_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO callback_nonces (nonce, received_at)
        VALUES ($1, $2)
        ON CONFLICT (nonce) DO NOTHING
        "#,
    )
    .bind(nonce)
    .bind(received_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn release(pool: &PgPool, nonce: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM callback_nonces
        WHERE nonce = $1
        "#,
    )
    .bind(nonce)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_older_than(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM callback_nonces
        WHERE received_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

//! Card design rows and their strip lifecycle columns.
//!
//! `strip_status` only ever leaves `ready` through `begin_regeneration`,
//! which is a conditional update; callers learn from the affected row
//! count whether they now own the regeneration.

use crate::models::{DesignRow, StripStatusKind};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const DESIGN_COLUMNS: &str = r#"
    id, business_id, name, description, logo_url, total_stamps,
    background_color, stamp_filled_color, stamp_empty_color, stamp_border_color,
    icon_color, stamp_icon, reward_icon,
    strip_background_url, custom_filled_stamp_url, custom_empty_stamp_url,
    is_active, strip_status, strip_generation, created_at, updated_at
"#;

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<DesignRow>, sqlx::Error> {
    sqlx::query_as::<_, DesignRow>(&format!(
        "SELECT {} FROM card_designs WHERE id = $1",
        DESIGN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_active(
    pool: &PgPool,
    business_id: &str,
) -> Result<Option<DesignRow>, sqlx::Error> {
    sqlx::query_as::<_, DesignRow>(&format!(
        "SELECT {} FROM card_designs WHERE business_id = $1 AND is_active",
        DESIGN_COLUMNS
    ))
    .bind(business_id)
    .fetch_optional(pool)
    .await
}

/// Returns whether this caller flipped the design to `regenerating`.
pub async fn begin_regeneration(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE card_designs
        SET strip_status = 'regenerating',
            updated_at = now()
        WHERE id = $1 AND strip_status = 'ready'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_strip_status(
    pool: &PgPool,
    id: &str,
    status: StripStatusKind,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE card_designs
        SET strip_status = $1,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_strip_generation(
    pool: &PgPool,
    id: &str,
    generation: i32,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE card_designs
        SET strip_generation = $1
        WHERE id = $2
        "#,
    )
    .bind(generation)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// One statement: the target becomes active and every other design of the
/// business inactive. The exclusion constraint is deferred, so the row
/// order inside the update does not matter.
pub async fn activate(
    pool: &PgPool,
    business_id: &str,
    design_id: &str,
) -> Result<Option<DesignRow>, sqlx::Error> {
    sqlx::query_as::<_, DesignRow>(&format!(
        r#"
        UPDATE card_designs
        SET is_active = (id = $2),
            updated_at = now()
        WHERE business_id = $1
          AND (is_active OR id = $2)
          AND EXISTS (SELECT 1 FROM card_designs WHERE id = $2 AND business_id = $1)
        RETURNING {}
        "#,
        DESIGN_COLUMNS
    ))
    .bind(business_id)
    .bind(design_id)
    .fetch_all(pool)
    .await
    .map(|rows| rows.into_iter().find(|row| row.id == design_id))
}

pub async fn list_stalled(
    pool: &PgPool,
    updated_before: DateTime<Utc>,
) -> Result<Vec<DesignRow>, sqlx::Error> {
    sqlx::query_as::<_, DesignRow>(&format!(
        r#"
        SELECT {}
        FROM card_designs
        WHERE strip_status = 'regenerating' AND updated_at < $1
        ORDER BY updated_at ASC
        "#,
        DESIGN_COLUMNS
    ))
    .bind(updated_before)
    .fetch_all(pool)
    .await
}

//! Strip image cache rows, one per (design, generation, key).

use crate::models::{StripImageRow, WalletPlatform};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn list_for_generation(
    pool: &PgPool,
    design_id: &str,
    generation: i32,
) -> Result<Vec<StripImageRow>, sqlx::Error> {
    sqlx::query_as::<_, StripImageRow>(
        r#"
        SELECT design_id, generation, stamp_count, platform, resolution,
               fingerprint, path, url, created_at
        FROM strip_images
        WHERE design_id = $1 AND generation = $2
        ORDER BY stamp_count, platform, resolution
        "#,
    )
    .bind(design_id)
    .bind(generation)
    .fetch_all(pool)
    .await
}

pub async fn get(
    pool: &PgPool,
    design_id: &str,
    generation: i32,
    stamp_count: i32,
    platform: WalletPlatform,
    resolution: &str,
) -> Result<Option<StripImageRow>, sqlx::Error> {
    sqlx::query_as::<_, StripImageRow>(
        r#"
        SELECT design_id, generation, stamp_count, platform, resolution,
               fingerprint, path, url, created_at
        FROM strip_images
        WHERE design_id = $1 AND generation = $2 AND stamp_count = $3
          AND platform = $4 AND resolution = $5
        "#,
    )
    .bind(design_id)
    .bind(generation)
    .bind(stamp_count)
    .bind(platform)
    .bind(resolution)
    .fetch_optional(pool)
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &PgPool,
    design_id: &str,
    generation: i32,
    stamp_count: i32,
    platform: WalletPlatform,
    resolution: &str,
    fingerprint: &str,
    path: &str,
    url: &str,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO strip_images
            (design_id, generation, stamp_count, platform, resolution,
             fingerprint, path, url, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (design_id, generation, stamp_count, platform, resolution)
        DO UPDATE SET fingerprint = EXCLUDED.fingerprint,
                      path = EXCLUDED.path,
                      url = EXCLUDED.url,
                      created_at = EXCLUDED.created_at
        "#,
    )
    .bind(design_id)
    .bind(generation)
    .bind(stamp_count)
    .bind(platform)
    .bind(resolution)
    .bind(fingerprint)
    .bind(path)
    .bind(url)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_generation(
    pool: &PgPool,
    design_id: &str,
    generation: i32,
) -> Result<Vec<StripImageRow>, sqlx::Error> {
    sqlx::query_as::<_, StripImageRow>(
        r#"
        DELETE FROM strip_images
        WHERE design_id = $1 AND generation = $2
        RETURNING design_id, generation, stamp_count, platform, resolution,
                  fingerprint, path, url, created_at
        "#,
    )
    .bind(design_id)
    .bind(generation)
    .fetch_all(pool)
    .await
}

pub async fn delete_all(pool: &PgPool, design_id: &str) -> Result<Vec<StripImageRow>, sqlx::Error> {
    sqlx::query_as::<_, StripImageRow>(
        r#"
        DELETE FROM strip_images
        WHERE design_id = $1
        RETURNING design_id, generation, stamp_count, platform, resolution,
                  fingerprint, path, url, created_at
        "#,
    )
    .bind(design_id)
    .fetch_all(pool)
    .await
}

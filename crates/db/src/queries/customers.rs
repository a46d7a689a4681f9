use crate::models::{BusinessRow, CustomerRow};
use sqlx::PgPool;

pub async fn get_customer(pool: &PgPool, id: &str) -> Result<Option<CustomerRow>, sqlx::Error> {
    sqlx::query_as::<_, CustomerRow>(
        r#"
        SELECT id, business_id, name, stamps, created_at
        FROM customers
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn get_business(pool: &PgPool, id: &str) -> Result<Option<BusinessRow>, sqlx::Error> {
    sqlx::query_as::<_, BusinessRow>(
        r#"
        SELECT id, name, created_at
        FROM businesses
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

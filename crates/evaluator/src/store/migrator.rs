use sqlx::PgPool;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "000_migration_tracking.sql",
        include_str!("../../../../migrations/000_migration_tracking.sql"),
    ),
    (
        "001_create_alarms.sql",
        include_str!("../../../../migrations/001_create_alarms.sql"),
    ),
    (
        "002_create_aggregate_buckets.sql",
        include_str!("../../../../migrations/002_create_aggregate_buckets.sql"),
    ),
];

/// Applies every migration not yet recorded in `_migrations`, in order.
/// Returns the filenames applied by this call.
pub async fn run_migrations(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let applied = applied_migrations(pool).await?;
    let mut newly_applied = Vec::new();

    for (filename, sql) in &MIGRATIONS[1..] {
        if applied.iter().any(|a| a == filename) {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (filename) VALUES ($1)")
            .bind(filename)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(filename, "applied migration");
        newly_applied.push(filename.to_string());
    }

    Ok(newly_applied)
}

pub async fn pending_migrations(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let applied = applied_migrations(pool).await?;
    Ok(MIGRATIONS[1..]
        .iter()
        .filter(|(name, _)| !applied.iter().any(|a| a == name))
        .map(|(name, _)| name.to_string())
        .collect())
}

async fn applied_migrations(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::raw_sql(MIGRATIONS[0].1).execute(pool).await?;
    sqlx::query_scalar("SELECT filename FROM _migrations")
        .fetch_all(pool)
        .await
}

use sqlx::SqlitePool;

use crate::auth;

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    let applied: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = '001_init'")
            .fetch_one(pool)
            .await?;

    if !applied {
        let migration_sql = include_str!("../migrations/001_init.sql");
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(pool).await.ok();
            }
        }
        sqlx::query("INSERT INTO _migrations (name) VALUES ('001_init')")
            .execute(pool)
            .await?;
        tracing::info!("Applied migration: 001_init");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

/// Create the admin account from ADMIN_EMAIL / ADMIN_PASSWORD if it does not
/// exist yet. No-op when the env vars are missing or the email is taken.
pub async fn seed_admin(pool: &SqlitePool, session_secret: &str) -> anyhow::Result<()> {
    let (email, password) = match (
        std::env::var("ADMIN_EMAIL"),
        std::env::var("ADMIN_PASSWORD"),
    ) {
        (Ok(e), Ok(p)) if !e.is_empty() && !p.is_empty() => (e, p),
        _ => {
            tracing::warn!("ADMIN_EMAIL/ADMIN_PASSWORD not set — no admin account seeded");
            return Ok(());
        }
    };

    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if exists {
        return Ok(());
    }

    let salt = auth::generate_salt(session_secret);
    let hash = auth::hash_password(&password, &salt);
    sqlx::query(
        "INSERT INTO users (full_name, email, password_salt, password_hash, is_admin)
         VALUES ('Salon Owner', ?, ?, ?, 1)",
    )
    .bind(&email)
    .bind(&salt)
    .bind(&hash)
    .execute(pool)
    .await?;

    tracing::info!("Seeded admin account for {}", email);
    Ok(())
}

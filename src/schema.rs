//! Database schema management for `aquasense`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! The primary schema is (re)applied by `PrimaryStore` whenever it opens a pool;
//! the backup schema is applied once when the backup service starts.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the primary store schema (idempotent).
///
/// Creates the append-only `readings` table plus the `setpoints` and
/// `settings` singletons, seeding both singletons with defaults. Safe to call
/// on every startup; no-op if objects already exist.
pub async fn create_primary_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw samples, append-only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id            BIGSERIAL PRIMARY KEY,
            temperature   DOUBLE PRECISION NOT NULL,
            level         DOUBLE PRECISION NOT NULL,
            pump_status   BOOLEAN     NOT NULL DEFAULT FALSE,
            heater_status BOOLEAN     NOT NULL DEFAULT FALSE,
            recorded_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            source        TEXT        NOT NULL DEFAULT 'remote'
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_recorded_at
            ON readings (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS setpoints (
            id          INTEGER PRIMARY KEY,
            temp_min    DOUBLE PRECISION NOT NULL DEFAULT 20.0,
            temp_max    DOUBLE PRECISION NOT NULL DEFAULT 30.0,
            level_min   DOUBLE PRECISION NOT NULL DEFAULT 60.0,
            level_max   DOUBLE PRECISION NOT NULL DEFAULT 90.0,
            updated_at  TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id                 INTEGER PRIMARY KEY,
            system_name        TEXT             NOT NULL DEFAULT 'Aquaponia',
            update_interval    INTEGER          NOT NULL DEFAULT 1,
            data_retention     INTEGER          NOT NULL DEFAULT 30,
            email_alerts       BOOLEAN          NOT NULL DEFAULT TRUE,
            push_alerts        BOOLEAN          NOT NULL DEFAULT TRUE,
            alert_email        TEXT,
            temp_critical_min  DOUBLE PRECISION NOT NULL DEFAULT 18.0,
            temp_warning_min   DOUBLE PRECISION NOT NULL DEFAULT 20.0,
            temp_warning_max   DOUBLE PRECISION NOT NULL DEFAULT 28.0,
            temp_critical_max  DOUBLE PRECISION NOT NULL DEFAULT 30.0,
            level_critical_min DOUBLE PRECISION NOT NULL DEFAULT 50.0,
            level_warning_min  DOUBLE PRECISION NOT NULL DEFAULT 60.0,
            level_warning_max  DOUBLE PRECISION NOT NULL DEFAULT 85.0,
            level_critical_max DOUBLE PRECISION NOT NULL DEFAULT 90.0,
            chart_type         TEXT             NOT NULL DEFAULT 'classic',
            dark_mode          BOOLEAN          NOT NULL DEFAULT FALSE,
            use_24_hour_time   BOOLEAN          NOT NULL DEFAULT TRUE,
            updated_at         TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Singletons live at id = 1
    sqlx::query("INSERT INTO setpoints (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Create or update the secondary (backup/analytics) store schema (idempotent).
///
/// `backup_readings.id` is the primary reading id, not a sequence of its own.
pub async fn create_backup_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backup_readings (
            id                BIGINT PRIMARY KEY,
            temperature       DOUBLE PRECISION NOT NULL,
            level             DOUBLE PRECISION NOT NULL,
            pump_status       BOOLEAN          NOT NULL,
            heater_status     BOOLEAN          NOT NULL,
            recorded_at       TIMESTAMPTZ      NOT NULL,
            temperature_trend DOUBLE PRECISION NOT NULL DEFAULT 0,
            level_trend       DOUBLE PRECISION NOT NULL DEFAULT 0,
            is_temp_critical  BOOLEAN          NOT NULL DEFAULT FALSE,
            is_level_critical BOOLEAN          NOT NULL DEFAULT FALSE,
            data_source       TEXT             NOT NULL DEFAULT 'remote',
            data_quality      DOUBLE PRECISION NOT NULL DEFAULT 1.0
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_backup_readings_recorded_at
            ON backup_readings (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id              BIGSERIAL PRIMARY KEY,
            alert_type      TEXT        NOT NULL,
            severity        TEXT        NOT NULL,
            message         TEXT        NOT NULL,
            reading_id      BIGINT      NOT NULL REFERENCES backup_readings (id),
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            is_acknowledged BOOLEAN     NOT NULL DEFAULT FALSE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_stats (
            id                 BIGSERIAL PRIMARY KEY,
            stat_date          DATE             NOT NULL UNIQUE,
            min_temp           DOUBLE PRECISION NOT NULL,
            max_temp           DOUBLE PRECISION NOT NULL,
            avg_temp           DOUBLE PRECISION NOT NULL,
            min_level          DOUBLE PRECISION NOT NULL,
            max_level          DOUBLE PRECISION NOT NULL,
            avg_level          DOUBLE PRECISION NOT NULL,
            pump_active_time   BIGINT           NOT NULL DEFAULT 0,
            heater_active_time BIGINT           NOT NULL DEFAULT 0,
            reading_count      BIGINT           NOT NULL,
            created_at         TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

use anyhow::{Context, Result};
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::actuator::{ActuatorCommand, Origin, Transition};
use crate::address::HardwareAddress;
use crate::frame::{SensorReading, TIMESTAMP_FORMAT};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/plants/readings.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn insert_reading(&self, node: HardwareAddress, r: &SensorReading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO readings (node, captured_at, temperature, humidity, soil_moisture, light)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node.to_string())
        .bind(r.timestamp.as_str())
        .bind(r.temperature)
        .bind(r.humidity)
        .bind(r.soil_moisture)
        .bind(r.light)
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(())
    }

    // ----------------------------
    // Actuator command audit
    // ----------------------------

    pub async fn insert_command(&self, t: &Transition, cmd: &ActuatorCommand) -> Result<()> {
        let origin = match t.origin {
            Origin::Automatic => "automatic",
            Origin::Override => "override",
        };
        sqlx::query(
            r#"
            INSERT INTO actuator_commands (sent_at, node, actuator, target, level, origin)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Local::now().format(TIMESTAMP_FORMAT).to_string())
        .bind(t.node.to_string())
        .bind(t.kind.to_string())
        .bind(cmd.target.to_string())
        .bind(i64::from(t.level))
        .bind(origin)
        .execute(&self.pool)
        .await
        .context("insert_command failed")?;
        Ok(())
    }
}

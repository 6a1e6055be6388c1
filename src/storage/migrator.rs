use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// An ordered, versioned, one-time-applied schema change. Scripts are
/// embedded at compile time; the history table records version and checksum
/// so a changed or missing script is caught before any query runs.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

/// All known migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial ledger schema",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: 2,
        description: "entry lookup indexes",
        sql: include_str!("migrations/002_entry_indexes.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration history is ahead of this binary: found version {0}")]
    UnknownVersion(i64),

    #[error("migration version gap: expected {expected}, history records {found}")]
    VersionGap { expected: i64, found: i64 },

    #[error("checksum mismatch for migration {version}: script changed after it was applied")]
    ChecksumMismatch { version: i64 },

    #[error("failed to apply migration {version}: {source}")]
    ApplyFailed {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Apply all pending migrations from `migrations`, validating already-applied
/// history first. Fails fast rather than running against a schema of unknown
/// shape.
pub async fn run(pool: &SqlitePool, migrations: &[Migration]) -> Result<(), MigrationError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied = sqlx::query("SELECT version, checksum FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    if applied.len() > migrations.len() {
        let version: i64 = applied[migrations.len()].get("version");
        return Err(MigrationError::UnknownVersion(version));
    }

    for (migration, row) in migrations.iter().zip(applied.iter()) {
        let version: i64 = row.get("version");
        let checksum: String = row.get("checksum");

        if version != migration.version {
            return Err(MigrationError::VersionGap {
                expected: migration.version,
                found: version,
            });
        }
        if checksum != migration.checksum() {
            return Err(MigrationError::ChecksumMismatch {
                version: migration.version,
            });
        }
    }

    for migration in &migrations[applied.len()..] {
        apply(pool, migration).await?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), MigrationError> {
    let mut tx = pool.begin().await?;

    // Scripts may hold several statements; SQLite only runs one per call.
    for statement in split_statements(migration.sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::ApplyFailed {
                version: migration.version,
                source,
            })?;
    }

    sqlx::query(
        "INSERT INTO schema_migrations (version, description, checksum, applied_at) VALUES (?, ?, ?, ?)",
    )
    .bind(migration.version)
    .bind(migration.description)
    .bind(migration.checksum())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|s| {
            s.lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

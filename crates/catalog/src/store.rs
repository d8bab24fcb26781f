//! Catalog store trait and the SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::repos::{LinkRepo, MediaRepo, ServerRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined catalog store trait.
#[async_trait]
pub trait CatalogStore: MediaRepo + ServerRepo + LinkRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> CatalogResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> CatalogResult<()>;
}

/// SQLite-based catalog store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the catalog database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serialises writers, so upserts never race
            // each other into duplicate-row errors.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "Catalog database opened");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn migrate(&self) -> CatalogResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Turn a UNIQUE violation into `Conflict`, pass everything else through.
fn map_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint") => {
            CatalogError::Conflict(what())
        }
        other => other.into(),
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use pkgmesh_core::{MediaKey, MediaScope, ServerKey};
    use time::OffsetDateTime;

    #[async_trait]
    impl MediaRepo for SqliteStore {
        async fn upsert_media(
            &self,
            key: &MediaKey,
            attrs: &MediaAttrs,
        ) -> CatalogResult<MediaRow> {
            key.validate()?;
            let scope = MediaScope::from_relative_path(attrs.is_official, &attrs.relative_path)?;
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, MediaRow>(
                "SELECT * FROM media WHERE mageia_version = ? AND architecture = ? AND short_name = ?",
            )
            .bind(&key.version)
            .bind(&key.arch)
            .bind(&key.short_name)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(existing) = existing {
                if existing.is_official != attrs.is_official {
                    return Err(CatalogError::Conflict(format!(
                        "media {key} already exists with is_official={}",
                        existing.is_official
                    )));
                }
                if existing.identity()?.scope != scope {
                    return Err(CatalogError::Conflict(format!(
                        "media {key} cannot move from {} to {}",
                        existing.relative_path, attrs.relative_path
                    )));
                }

                let unchanged = existing.name == attrs.name
                    && existing.relative_path == attrs.relative_path.as_str()
                    && existing.enabled == attrs.enabled
                    && existing.update_media == attrs.update_media
                    && existing.priority == attrs.priority
                    && existing.replication_policy == attrs.replication_policy.as_str();
                if unchanged {
                    tx.commit().await?;
                    return Ok(existing);
                }

                sqlx::query(
                    "UPDATE media SET name = ?, relative_path = ?, enabled = ?, update_media = ?, priority = ?, replication_policy = ? WHERE id = ?",
                )
                .bind(&attrs.name)
                .bind(attrs.relative_path.as_str())
                .bind(attrs.enabled)
                .bind(attrs.update_media)
                .bind(attrs.priority)
                .bind(attrs.replication_policy.as_str())
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;

                let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE id = ?")
                    .bind(existing.id)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(row);
            }

            if !attrs.is_official {
                let clash: Option<(String, String)> = sqlx::query_as(
                    "SELECT mageia_version, architecture FROM media WHERE is_official = 0 AND short_name = ?",
                )
                .bind(&key.short_name)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some((version, arch)) = clash {
                    return Err(CatalogError::Conflict(format!(
                        "custom media short name '{}' is already used by {version}/{arch}",
                        key.short_name
                    )));
                }
            }

            let result = sqlx::query(
                "INSERT INTO media (name, short_name, mageia_version, architecture, relative_path, is_official, enabled, update_media, priority, replication_policy, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&attrs.name)
            .bind(&key.short_name)
            .bind(&key.version)
            .bind(&key.arch)
            .bind(attrs.relative_path.as_str())
            .bind(attrs.is_official)
            .bind(attrs.enabled)
            .bind(attrs.update_media)
            .bind(attrs.priority)
            .bind(attrs.replication_policy.as_str())
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique(e, || format!("media {key} already exists")))?;

            let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE id = ?")
                .bind(result.last_insert_rowid())
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(media = %key, official = attrs.is_official, "Media added");
            Ok(row)
        }

        async fn get_media(&self, key: &MediaKey) -> CatalogResult<Option<MediaRow>> {
            let row = sqlx::query_as::<_, MediaRow>(
                "SELECT * FROM media WHERE mageia_version = ? AND architecture = ? AND short_name = ?",
            )
            .bind(&key.version)
            .bind(&key.arch)
            .bind(&key.short_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_media(&self) -> CatalogResult<Vec<MediaRow>> {
            let rows = sqlx::query_as::<_, MediaRow>("SELECT * FROM media ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn record_sync(
            &self,
            media_id: i64,
            metadata_checksum: &str,
            at: OffsetDateTime,
        ) -> CatalogResult<()> {
            let result =
                sqlx::query("UPDATE media SET last_sync = ?, metadata_checksum = ? WHERE id = ?")
                    .bind(at)
                    .bind(metadata_checksum)
                    .bind(media_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound(format!("media id {media_id}")));
            }
            Ok(())
        }

        async fn delete_media(&self, media_id: i64) -> CatalogResult<()> {
            sqlx::query("DELETE FROM media WHERE id = ?")
                .bind(media_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ServerRepo for SqliteStore {
        async fn upsert_server(
            &self,
            key: &ServerKey,
            attrs: &ServerAttrs,
        ) -> CatalogResult<ServerRow> {
            let mut tx = self.pool.begin().await?;

            let existing = sqlx::query_as::<_, ServerRow>(
                "SELECT * FROM servers WHERE protocol = ? AND host = ? AND base_path = ?",
            )
            .bind(key.protocol.as_str())
            .bind(&key.host)
            .bind(&key.base_path)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(existing) = existing {
                let unchanged = existing.name == attrs.name
                    && existing.is_official == attrs.is_official
                    && existing.enabled == attrs.enabled
                    && existing.priority == attrs.priority
                    && existing.ip_mode == attrs.ip_mode.as_str();
                if unchanged {
                    tx.commit().await?;
                    return Ok(existing);
                }

                sqlx::query(
                    "UPDATE servers SET name = ?, is_official = ?, enabled = ?, priority = ?, ip_mode = ? WHERE id = ?",
                )
                .bind(&attrs.name)
                .bind(attrs.is_official)
                .bind(attrs.enabled)
                .bind(attrs.priority)
                .bind(attrs.ip_mode.as_str())
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;

                let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ?")
                    .bind(existing.id)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(row);
            }

            let result = sqlx::query(
                "INSERT INTO servers (name, protocol, host, base_path, is_official, enabled, priority, ip_mode, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&attrs.name)
            .bind(key.protocol.as_str())
            .bind(&key.host)
            .bind(&key.base_path)
            .bind(attrs.is_official)
            .bind(attrs.enabled)
            .bind(attrs.priority)
            .bind(attrs.ip_mode.as_str())
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique(e, || format!("server {key} already exists")))?;

            let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ?")
                .bind(result.last_insert_rowid())
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(server = %key, priority = attrs.priority, "Server added");
            Ok(row)
        }

        async fn get_server(&self, key: &ServerKey) -> CatalogResult<Option<ServerRow>> {
            let row = sqlx::query_as::<_, ServerRow>(
                "SELECT * FROM servers WHERE protocol = ? AND host = ? AND base_path = ?",
            )
            .bind(key.protocol.as_str())
            .bind(&key.host)
            .bind(&key.base_path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_servers(&self) -> CatalogResult<Vec<ServerRow>> {
            let rows = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn delete_server(&self, server_id: i64) -> CatalogResult<()> {
            sqlx::query("DELETE FROM servers WHERE id = ?")
                .bind(server_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn record_outcome(&self, server_id: i64, success: bool) -> CatalogResult<()> {
            let sql = if success {
                "UPDATE servers SET success_count = COALESCE(success_count, 0) + 1 WHERE id = ?"
            } else {
                "UPDATE servers SET failure_count = COALESCE(failure_count, 0) + 1 WHERE id = ?"
            };
            sqlx::query(sql).bind(server_id).execute(&self.pool).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl LinkRepo for SqliteStore {
        async fn link(&self, server_id: i64, media_id: i64) -> CatalogResult<bool> {
            let result =
                sqlx::query("INSERT OR IGNORE INTO server_media (server_id, media_id) VALUES (?, ?)")
                    .bind(server_id)
                    .bind(media_id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn unlink(&self, server_id: i64, media_id: i64) -> CatalogResult<bool> {
            let result =
                sqlx::query("DELETE FROM server_media WHERE server_id = ? AND media_id = ?")
                    .bind(server_id)
                    .bind(media_id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn is_linked(&self, server_id: i64, media_id: i64) -> CatalogResult<bool> {
            let linked: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM server_media WHERE server_id = ? AND media_id = ?)",
            )
            .bind(server_id)
            .bind(media_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(linked != 0)
        }

        async fn servers_for_media(&self, media_id: i64) -> CatalogResult<Vec<ServerRow>> {
            let rows = sqlx::query_as::<_, ServerRow>(
                "SELECT s.* FROM servers s JOIN server_media sm ON sm.server_id = s.id WHERE sm.media_id = ? AND s.enabled = 1 ORDER BY s.id",
            )
            .bind(media_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_links(&self) -> CatalogResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM server_media")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    short_name TEXT NOT NULL,
    mageia_version TEXT NOT NULL,
    architecture TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    is_official INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    update_media INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 50,
    replication_policy TEXT NOT NULL DEFAULT 'on_demand',
    last_sync TEXT,
    metadata_checksum TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (mageia_version, architecture, short_name)
);

-- Custom media share one subtree per short name.
CREATE UNIQUE INDEX IF NOT EXISTS idx_media_custom_short_name
    ON media (short_name) WHERE is_official = 0;

CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    protocol TEXT NOT NULL,
    host TEXT NOT NULL,
    base_path TEXT NOT NULL,
    is_official INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 50,
    ip_mode TEXT NOT NULL DEFAULT 'auto',
    latency_ms INTEGER,
    bandwidth_kbps INTEGER,
    failure_count INTEGER,
    success_count INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE (protocol, host, base_path)
);

CREATE TABLE IF NOT EXISTS server_media (
    server_id INTEGER NOT NULL REFERENCES servers (id) ON DELETE CASCADE,
    media_id INTEGER NOT NULL REFERENCES media (id) ON DELETE CASCADE,
    PRIMARY KEY (server_id, media_id)
);

CREATE INDEX IF NOT EXISTS idx_server_media_media ON server_media (media_id);
"#;

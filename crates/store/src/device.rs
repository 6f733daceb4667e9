use {anyhow::Result, async_trait::async_trait, sqlx::SqlitePool, tracing::info, uuid::Uuid};

/// A device identity bound to one tenant account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub account_id: String,
    pub device_jid: String,
    pub updated_at: i64,
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct MappingRow {
    wa_account_id: String,
    device_jid: String,
    updated_at: i64,
}

impl From<MappingRow> for DeviceRecord {
    fn from(r: MappingRow) -> Self {
        Self {
            account_id: r.wa_account_id,
            device_jid: r.device_jid,
            updated_at: r.updated_at,
        }
    }
}

/// Persistence boundary for device identities.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// The device bound to `account_id`, allocating and persisting a fresh
    /// one when no mapping exists. Stable across restarts until
    /// [`delete_device`] is called.
    ///
    /// [`delete_device`]: DeviceStore::delete_device
    async fn device_for(&self, account_id: &str) -> Result<DeviceRecord>;

    /// The current mapping, without allocating.
    async fn mapping(&self, account_id: &str) -> Result<Option<DeviceRecord>>;

    /// Remove the account's device and its credentials.
    async fn delete_device(&self, account_id: &str) -> Result<()>;

    /// Connectivity probe backing `/healthz`.
    async fn ping(&self) -> Result<()>;
}

/// sqlx-backed device store.
pub struct SqliteDeviceStore {
    pool: SqlitePool,
}

impl SqliteDeviceStore {
    /// Connect and run schema setup. Failure here is a startup-fatal
    /// condition for the gateway.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::init(&pool).await?;
        info!("device store initialized");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema. Called by `connect`; exposed for tests that build
    /// their own in-memory pools.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS wa_device_mapping (
                wa_account_id TEXT    PRIMARY KEY,
                device_jid    TEXT    NOT NULL,
                updated_at    INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS wa_device (
                device_jid TEXT    PRIMARY KEY,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

#[async_trait]
impl DeviceStore for SqliteDeviceStore {
    async fn device_for(&self, account_id: &str) -> Result<DeviceRecord> {
        if let Some(existing) = self.mapping(account_id).await? {
            return Ok(existing);
        }

        // Allocate a fresh credential slot and bind it in one transaction so
        // two racing callers cannot end up with two devices for one account.
        let device_jid = Uuid::new_v4().to_string();
        let now = Self::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO wa_device (device_jid, created_at) VALUES (?, ?)")
            .bind(&device_jid)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO wa_device_mapping (wa_account_id, device_jid, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(wa_account_id) DO NOTHING"#,
        )
        .bind(account_id)
        .bind(&device_jid)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        // The insert may have lost the race; the mapping row wins either way.
        let record = self
            .mapping(account_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("device mapping vanished for {account_id}"))?;
        if record.device_jid != device_jid {
            // Lost the race: drop the orphaned credential slot.
            sqlx::query("DELETE FROM wa_device WHERE device_jid = ?")
                .bind(&device_jid)
                .execute(&self.pool)
                .await?;
        } else {
            info!(account_id, device_jid, "allocated new device");
        }
        Ok(record)
    }

    async fn mapping(&self, account_id: &str) -> Result<Option<DeviceRecord>> {
        let row = sqlx::query_as::<_, MappingRow>(
            "SELECT wa_account_id, device_jid, updated_at FROM wa_device_mapping WHERE wa_account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_device(&self, account_id: &str) -> Result<()> {
        let Some(record) = self.mapping(account_id).await? else {
            return Ok(());
        };
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM wa_device_mapping WHERE wa_account_id = ?")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM wa_device WHERE device_jid = ?")
            .bind(&record.device_jid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(account_id, device_jid = record.device_jid, "deleted device");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteDeviceStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteDeviceStore::init(&pool).await.unwrap();
        SqliteDeviceStore::new(pool)
    }

    #[tokio::test]
    async fn allocates_fresh_device_per_account() {
        let store = test_store().await;

        let a = store.device_for("acct-1").await.unwrap();
        let b = store.device_for("acct-2").await.unwrap();

        // The whole point of the mapping table: no credential sharing.
        assert_ne!(a.device_jid, b.device_jid);
    }

    #[tokio::test]
    async fn mapping_is_stable_across_lookups() {
        let store = test_store().await;

        let first = store.device_for("acct-1").await.unwrap();
        let second = store.device_for("acct-1").await.unwrap();
        assert_eq!(first.device_jid, second.device_jid);

        let mapped = store.mapping("acct-1").await.unwrap().unwrap();
        assert_eq!(mapped.device_jid, first.device_jid);
    }

    #[tokio::test]
    async fn delete_unbinds_and_next_lookup_allocates_new() {
        let store = test_store().await;

        let original = store.device_for("acct-1").await.unwrap();
        store.delete_device("acct-1").await.unwrap();
        assert!(store.mapping("acct-1").await.unwrap().is_none());

        let replacement = store.device_for("acct-1").await.unwrap();
        assert_ne!(original.device_jid, replacement.device_jid);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = test_store().await;
        store.delete_device("never-seen").await.unwrap();
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_pool() {
        let store = test_store().await;
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_allocation_converges_on_one_device() {
        let store = std::sync::Arc::new(test_store().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.device_for("acct-1").await },
            ));
        }

        let mut jids = std::collections::HashSet::new();
        for handle in handles {
            jids.insert(handle.await.unwrap().unwrap().device_jid);
        }
        assert_eq!(jids.len(), 1, "all callers must see the same device");
    }
}

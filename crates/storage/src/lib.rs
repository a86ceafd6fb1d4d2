use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::Mutex;

use shared::{
    domain::{Address, ChainId, Handle, TxHash},
    protocol::{DeploymentSummary, TxReceipt, TxStatus},
};

pub const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

/// String key/value persistence used for client session data such as cached
/// decryption signatures.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDiary {
    pub address: Address,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub deployed_at_block: u64,
    pub entry_count: u64,
    pub sum_handle: Option<Handle>,
    pub trend_handle: Option<Handle>,
}

impl StoredDiary {
    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            address: self.address,
            chain_id: self.chain_id,
            chain_name: self.chain_name.clone(),
            deployed_at_block: self.deployed_at_block,
        }
    }
}

/// State transition of one mined `submitMood`. `previous_sum_handle` is the
/// sum the new values were computed from; the write is refused if the diary
/// has moved on since.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub tx_hash: TxHash,
    pub diary: Address,
    pub sender: Address,
    pub previous_sum_handle: Option<Handle>,
    pub sum_handle: Handle,
    pub sum_value: u64,
    pub trend_handle: Handle,
    pub trend_value: u64,
    pub mined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessGrant {
    pub tx_hash: TxHash,
    pub diary: Address,
    pub sender: Address,
    pub trend_handle: Handle,
    pub mined_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` is its own database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Registers a diary instance. Deploying an address twice returns the
    /// existing deployment unchanged.
    pub async fn deploy_diary(
        &self,
        address: Address,
        chain_id: ChainId,
        chain_name: &str,
    ) -> Result<DeploymentSummary> {
        if let Some(existing) = self.load_diary(address).await? {
            return Ok(existing.summary());
        }

        let mut tx = self.pool.begin().await?;
        let block = next_block(&mut tx).await?;
        sqlx::query(
            "INSERT INTO diaries (address, chain_id, chain_name, deployed_at_block)
             VALUES (?, ?, ?, ?)",
        )
        .bind(address.to_string())
        .bind(to_db_int(chain_id.0)?)
        .bind(chain_name)
        .bind(to_db_int(block)?)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to deploy diary {address}"))?;
        tx.commit().await?;

        Ok(DeploymentSummary {
            address,
            chain_id,
            chain_name: chain_name.to_string(),
            deployed_at_block: block,
        })
    }

    pub async fn load_diary(&self, address: Address) -> Result<Option<StoredDiary>> {
        let row = sqlx::query(
            "SELECT address, chain_id, chain_name, deployed_at_block, entry_count, sum_handle, trend_handle
             FROM diaries WHERE address = ?",
        )
        .bind(address.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| diary_from_row(&r)).transpose()
    }

    pub async fn list_diaries(&self) -> Result<Vec<StoredDiary>> {
        let rows = sqlx::query(
            "SELECT address, chain_id, chain_name, deployed_at_block, entry_count, sum_handle, trend_handle
             FROM diaries ORDER BY deployed_at_block ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(diary_from_row).collect()
    }

    pub async fn ciphertext_value(&self, handle: Handle) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT clear_value FROM ciphertexts WHERE handle = ?")
            .bind(handle.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_db_int(r.get::<i64, _>(0))).transpose()
    }

    pub async fn is_allowed(&self, handle: Handle, account: Address) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM acl WHERE handle = ? AND account = ?")
            .bind(handle.to_string())
            .bind(account.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn grant_access(&self, handle: Handle, account: Address) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_acl(&mut conn, handle, account).await
    }

    pub async fn transaction_exists(&self, tx_hash: TxHash) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM transactions WHERE tx_hash = ?")
            .bind(tx_hash.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn load_receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>> {
        let row = sqlx::query(
            "SELECT status, block_number, revert_reason, mined_at
             FROM transactions WHERE tx_hash = ?",
        )
        .bind(tx_hash.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<TxReceipt> {
            let status = match r.get::<String, _>(0).as_str() {
                "mined" => TxStatus::Mined,
                "reverted" => TxStatus::Reverted,
                other => bail!("unknown transaction status '{other}'"),
            };
            Ok(TxReceipt {
                tx_hash,
                status,
                block_number: from_db_int(r.get::<i64, _>(1))?,
                revert_reason: r.get::<Option<String>, _>(2),
                mined_at: r.get::<DateTime<Utc>, _>(3),
            })
        })
        .transpose()
    }

    pub async fn latest_block(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(next_block(&mut conn).await? - 1)
    }

    /// Applies a mined `submitMood` atomically: new sum and trend
    /// ciphertexts, contract ACL on both, counter increment and receipt.
    pub async fn record_submission(&self, submission: NewSubmission) -> Result<TxReceipt> {
        let mut tx = self.pool.begin().await?;
        let block = next_block(&mut tx).await?;

        for (handle, value) in [
            (submission.sum_handle, submission.sum_value),
            (submission.trend_handle, submission.trend_value),
        ] {
            sqlx::query(
                "INSERT INTO ciphertexts (handle, diary_address, clear_value) VALUES (?, ?, ?)",
            )
            .bind(handle.to_string())
            .bind(submission.diary.to_string())
            .bind(to_db_int(value)?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store ciphertext {handle}"))?;
            insert_acl(&mut tx, handle, submission.diary).await?;
        }

        let updated = sqlx::query(
            "UPDATE diaries
             SET entry_count = entry_count + 1, sum_handle = ?, trend_handle = ?
             WHERE address = ? AND sum_handle IS ?",
        )
        .bind(submission.sum_handle.to_string())
        .bind(submission.trend_handle.to_string())
        .bind(submission.diary.to_string())
        .bind(submission.previous_sum_handle.map(|handle| handle.to_string()))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated != 1 {
            bail!(
                "diary {} changed while submission {} was executing",
                submission.diary,
                submission.tx_hash
            );
        }

        insert_transaction(
            &mut tx,
            submission.tx_hash,
            submission.diary,
            submission.sender,
            "submitMood",
            block,
            submission.mined_at,
        )
        .await?;
        tx.commit().await?;

        Ok(mined_receipt(submission.tx_hash, block, submission.mined_at))
    }

    /// Applies a mined `requestTrendHandle`: the sender is allowed to decrypt
    /// the current trend.
    pub async fn record_access_grant(&self, grant: NewAccessGrant) -> Result<TxReceipt> {
        let mut tx = self.pool.begin().await?;
        let block = next_block(&mut tx).await?;
        insert_acl(&mut tx, grant.trend_handle, grant.sender).await?;
        insert_transaction(
            &mut tx,
            grant.tx_hash,
            grant.diary,
            grant.sender,
            "requestTrendHandle",
            block,
            grant.mined_at,
        )
        .await?;
        tx.commit().await?;

        Ok(mined_receipt(grant.tx_hash, block, grant.mined_at))
    }
}

#[async_trait]
impl KeyValueStore for Storage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT item_value FROM kv_items WHERE item_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_items (item_key, item_value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(item_key) DO UPDATE SET item_value = excluded.item_value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_items WHERE item_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn next_block(conn: &mut SqliteConnection) -> Result<u64> {
    let latest: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(block), 0) FROM (
            SELECT block_number AS block FROM transactions
            UNION ALL
            SELECT deployed_at_block AS block FROM diaries
         )",
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(from_db_int(latest)? + 1)
}

async fn insert_acl(conn: &mut SqliteConnection, handle: Handle, account: Address) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO acl (handle, account) VALUES (?, ?)")
        .bind(handle.to_string())
        .bind(account.to_string())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to allow {account} on {handle}"))?;
    Ok(())
}

async fn insert_transaction(
    conn: &mut SqliteConnection,
    tx_hash: TxHash,
    diary: Address,
    sender: Address,
    call_name: &str,
    block: u64,
    mined_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transactions (tx_hash, diary_address, sender, call_name, status, block_number, mined_at)
         VALUES (?, ?, ?, ?, 'mined', ?, ?)",
    )
    .bind(tx_hash.to_string())
    .bind(diary.to_string())
    .bind(sender.to_string())
    .bind(call_name)
    .bind(to_db_int(block)?)
    .bind(mined_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to record transaction {tx_hash}"))?;
    Ok(())
}

fn mined_receipt(tx_hash: TxHash, block_number: u64, mined_at: DateTime<Utc>) -> TxReceipt {
    TxReceipt {
        tx_hash,
        status: TxStatus::Mined,
        block_number,
        revert_reason: None,
        mined_at,
    }
}

fn diary_from_row(row: &SqliteRow) -> Result<StoredDiary> {
    Ok(StoredDiary {
        address: row.get::<String, _>(0).parse()?,
        chain_id: ChainId(from_db_int(row.get::<i64, _>(1))?),
        chain_name: row.get::<String, _>(2),
        deployed_at_block: from_db_int(row.get::<i64, _>(3))?,
        entry_count: from_db_int(row.get::<i64, _>(4))?,
        sum_handle: parse_optional_handle(row.get::<Option<String>, _>(5))?,
        trend_handle: parse_optional_handle(row.get::<Option<String>, _>(6))?,
    })
}

fn parse_optional_handle(raw: Option<String>) -> Result<Option<Handle>> {
    raw.map(|value| {
        value
            .parse::<Handle>()
            .with_context(|| format!("stored handle '{value}' is malformed"))
    })
    .transpose()
}

fn to_db_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds sqlite integer range"))
}

fn from_db_int(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("negative value {value} in unsigned column"))
}

fn is_memory_url(database_url: &str) -> bool {
    database_url == MEMORY_DATABASE_URL || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

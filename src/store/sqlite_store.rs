//! Embedded SQLite store for header records and transaction links.
use std::{
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bitcoin::{block::Header, consensus, hashes::Hash, BlockHash, TxMerkleNode, Txid};
use rusqlite::{params, Connection};
use tokio::task;

use crate::{
    record::MerkleBlockRecord,
    store::{ChangeSet, Store},
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS merkle_blocks (
        hash               TEXT PRIMARY KEY,
        height             INTEGER,
        header             TEXT NOT NULL,
        total_transactions INTEGER NOT NULL,
        hashes             BLOB NOT NULL,
        flags              BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS merkle_blocks_height ON merkle_blocks(height);

    CREATE TABLE IF NOT EXISTS tx_blocks (
        txid       TEXT NOT NULL,
        block_hash TEXT NOT NULL,
        PRIMARY KEY (txid, block_hash)
    );
"#;

/// Tables:
///   merkle_blocks(hash TEXT PK, height INTEGER NULL, header TEXT hex,
///                 total_transactions INTEGER, hashes BLOB, flags BLOB)
///   tx_blocks(txid TEXT, block_hash TEXT)
///
/// `height` is NULL for detached records. `hashes` is the proof's 32-byte
/// nodes concatenated in traversal order.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Self::init(conn)
    }

    /// In-memory store, lives as long as this value (useful for tests).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| anyhow!("sqlite connection poisoned"))?;
            f(&mut conn)
        })
        .await?
    }
}

fn encode_nodes(nodes: &[TxMerkleNode]) -> Vec<u8> {
    nodes.iter().flat_map(|n| n.to_byte_array()).collect()
}

fn decode_nodes(raw: &[u8]) -> anyhow::Result<Vec<TxMerkleNode>> {
    if raw.len() % 32 != 0 {
        anyhow::bail!("proof hashes blob of {} bytes", raw.len());
    }
    Ok(raw
        .chunks_exact(32)
        .map(|c| {
            let mut b = [0u8; 32];
            b.copy_from_slice(c);
            TxMerkleNode::from_byte_array(b)
        })
        .collect())
}

fn decode_record(
    hash: String,
    height: Option<u32>,
    header: String,
    total: u32,
    hashes: Vec<u8>,
    flags: Vec<u8>,
) -> anyhow::Result<MerkleBlockRecord> {
    let header: Header =
        consensus::deserialize(&hex::decode(&header).context("header hex")?).context("header")?;
    let record = MerkleBlockRecord::from_parts(header, height, total, decode_nodes(&hashes)?, flags)?;
    let stored = BlockHash::from_str(&hash).context("parse block hash")?;
    if record.hash() != stored {
        anyhow::bail!("row {stored} holds header {}", record.hash());
    }
    Ok(record)
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_records(&self) -> anyhow::Result<Vec<MerkleBlockRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hash, height, header, total_transactions, hashes, flags
                 FROM merkle_blocks ORDER BY height",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (hash, height, header, total, hashes, flags) = row?;
                out.push(decode_record(hash, height, header, total, hashes, flags)?);
            }
            Ok(out)
        })
        .await
    }

    async fn load_tx_links(&self) -> anyhow::Result<Vec<(Txid, BlockHash)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT txid, block_hash FROM tx_blocks")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (txid, block) = row?;
                out.push((
                    Txid::from_str(&txid).context("parse txid")?,
                    BlockHash::from_str(&block).context("parse block hash")?,
                ));
            }
            Ok(out)
        })
        .await
    }

    async fn write_changes(&self, changes: &ChangeSet) -> anyhow::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let changes = changes.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut put = tx.prepare(
                    "INSERT INTO merkle_blocks(hash, height, header, total_transactions, hashes, flags)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(hash) DO UPDATE SET
                        height=excluded.height,
                        total_transactions=excluded.total_transactions,
                        hashes=excluded.hashes,
                        flags=excluded.flags",
                )?;
                for r in &changes.records {
                    put.execute(params![
                        r.hash().to_string(),
                        r.height(),
                        hex::encode(consensus::serialize(r.header())),
                        r.total_transactions(),
                        encode_nodes(r.hashes()),
                        r.flags(),
                    ])?;
                }
                let mut link = tx.prepare(
                    "INSERT OR IGNORE INTO tx_blocks(txid, block_hash) VALUES(?1, ?2)",
                )?;
                for (txid, block) in &changes.links {
                    link.execute(params![txid.to_string(), block.to_string()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove_records(&self, hashes: &[BlockHash]) -> anyhow::Result<()> {
        let hashes: Vec<String> = hashes.iter().map(ToString::to_string).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for hash in &hashes {
                tx.execute("DELETE FROM tx_blocks WHERE block_hash = ?1", params![hash])?;
                tx.execute("DELETE FROM merkle_blocks WHERE hash = ?1", params![hash])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::block::{Block, BlockHash, Transaction};
use crate::config::DbConfig;
use crate::storage::{EdgeWatermark, Neighbor, Result, StorageError, TrafficTotals};
use crate::utilities::crypto::{PublicKey, Signature, TrustChainPublicKey};

const BLOCK_COLUMNS: &str = "public_key, sequence_number, link_public_key, link_sequence_number, \
                             previous_hash, signature, up, down, total_up, total_down, insert_time, block_hash";

pub(crate) struct DbQuery {
    pub(crate) connection: Connection,
}

impl DbQuery {
    pub(crate) fn open(db_conf: &DbConfig, flags: OpenFlags) -> Result<Self> {
        let connection = Connection::open_with_flags(&db_conf.sqlite_path, flags)?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        let query = Self { connection };
        Ok(query)
    }

    pub(crate) fn get_block(&self, public_key: &PublicKey, sequence_number: u64) -> Result<Option<Block>> {
        log::trace!("Getting block {}:{sequence_number}", public_key.short());

        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE public_key = ?1 AND sequence_number = ?2"
        ))?;
        let block = stmt
            .query_row(params![&public_key.as_bytes()[..], sequence_number], map_block)
            .optional()?;

        Ok(block)
    }

    pub(crate) fn get_latest(&self, public_key: &PublicKey) -> Result<Option<Block>> {
        log::trace!("Getting latest block of {}", public_key.short());

        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE public_key = ?1 \
             ORDER BY sequence_number DESC LIMIT 1"
        ))?;
        let block = stmt
            .query_row(params![&public_key.as_bytes()[..]], map_block)
            .optional()?;

        if let Some(block) = &block {
            log::trace!("Found latest block: {block}");
        } else {
            log::trace!("No blocks of {}", public_key.short());
        };

        Ok(block)
    }

    pub(crate) fn get_latest_blocks(&self, public_key: &PublicKey, limit: i64) -> Result<Vec<Block>> {
        log::trace!("Getting {limit} latest blocks of {}", public_key.short());

        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE public_key = ?1 \
             ORDER BY sequence_number DESC LIMIT ?2"
        ))?;
        let blocks = stmt
            .query_map(params![&public_key.as_bytes()[..], limit], map_block)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(blocks)
    }

    pub(crate) fn get_block_before(&self, block: &Block) -> Result<Option<Block>> {
        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE public_key = ?1 AND sequence_number < ?2 \
             ORDER BY sequence_number DESC LIMIT 1"
        ))?;
        let before = stmt
            .query_row(
                params![&block.public_key.as_bytes()[..], block.sequence_number],
                map_block,
            )
            .optional()?;
        Ok(before)
    }

    pub(crate) fn get_block_after(&self, block: &Block) -> Result<Option<Block>> {
        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE public_key = ?1 AND sequence_number > ?2 \
             ORDER BY sequence_number ASC LIMIT 1"
        ))?;
        let after = stmt
            .query_row(
                params![&block.public_key.as_bytes()[..], block.sequence_number],
                map_block,
            )
            .optional()?;
        Ok(after)
    }

    pub(crate) fn contains(&self, block: &Block) -> Result<bool> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE public_key = ?1 AND sequence_number = ?2)",
        )?;
        let exists = stmt.query_row(
            params![&block.public_key.as_bytes()[..], block.sequence_number],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub(crate) fn get_linked(&self, block: &Block) -> Result<Option<Block>> {
        log::trace!("Getting linked block of {}", block.key());

        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks \
             WHERE (public_key = ?1 AND sequence_number = ?2) \
             OR (link_public_key = ?3 AND link_sequence_number = ?4) \
             LIMIT 1"
        ))?;
        let linked = stmt
            .query_row(
                params![
                    &block.link_public_key.as_bytes()[..],
                    block.link_sequence_number,
                    &block.public_key.as_bytes()[..],
                    block.sequence_number
                ],
                map_block,
            )
            .optional()?;
        Ok(linked)
    }

    pub(crate) fn crawl(&self, public_key: &PublicKey, sequence_ceiling: u64, limit: i64) -> Result<Vec<Block>> {
        log::trace!("Crawling {} from sequence {sequence_ceiling}, limit {limit}", public_key.short());

        let mut stmt = self.connection.prepare_cached(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks \
             WHERE insert_time >= COALESCE( \
                 (SELECT MAX(insert_time) FROM blocks WHERE public_key = ?1 AND sequence_number <= ?2), 0) \
             AND (public_key = ?1 OR link_public_key = ?1) \
             ORDER BY insert_time ASC, rowid ASC LIMIT ?3"
        ))?;
        let blocks = stmt
            .query_map(params![&public_key.as_bytes()[..], sequence_ceiling, limit], map_block)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        log::trace!("Crawl of {} found {} blocks", public_key.short(), blocks.len());
        Ok(blocks)
    }

    pub(crate) fn count_blocks(&self, public_key: &PublicKey) -> Result<u64> {
        let mut stmt = self
            .connection
            .prepare_cached("SELECT COUNT(*) FROM blocks WHERE public_key = ?1")?;
        let count = stmt.query_row(params![&public_key.as_bytes()[..]], |row| row.get(0))?;
        Ok(count)
    }

    pub(crate) fn total_traffic(&self, public_key: &PublicKey) -> Result<TrafficTotals> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT COALESCE(SUM(up), 0), COALESCE(SUM(down), 0), COUNT(*) FROM ( \
               SELECT MAX(a_sent, b_received) AS up, MAX(a_received, b_sent) AS down \
               FROM aggregates WHERE public_key_a = ?1 \
               UNION ALL \
               SELECT MAX(b_sent, a_received) AS up, MAX(b_received, a_sent) AS down \
               FROM aggregates WHERE public_key_b = ?1 \
             )",
        )?;
        let totals = stmt.query_row(params![&public_key.as_bytes()[..]], |row| {
            Ok(TrafficTotals {
                up: row.get(0)?,
                down: row.get(1)?,
                neighbors: row.get(2)?,
            })
        })?;
        Ok(totals)
    }

    pub(crate) fn num_unique_interactors(&self, public_key: &PublicKey) -> Result<(u64, u64)> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT COALESCE(SUM(CASE WHEN up > 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN down > 0 THEN 1 ELSE 0 END), 0) \
             FROM (SELECT SUM(up) AS up, SUM(down) AS down FROM blocks \
                   WHERE public_key = ?1 GROUP BY link_public_key)",
        )?;
        let interactors = stmt.query_row(params![&public_key.as_bytes()[..]], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(interactors)
    }

    pub(crate) fn graph_neighbors(&self, public_key: &PublicKey) -> Result<Vec<Neighbor>> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT peer, sent, received FROM ( \
               SELECT public_key_b AS peer, MAX(a_sent, b_received) AS sent, MAX(a_received, b_sent) AS received \
               FROM aggregates WHERE public_key_a = ?1 \
               UNION ALL \
               SELECT public_key_a AS peer, MAX(b_sent, a_received) AS sent, MAX(b_received, a_sent) AS received \
               FROM aggregates WHERE public_key_b = ?1 \
             ) ORDER BY sent + received DESC, peer ASC",
        )?;
        let neighbors = stmt
            .query_map(params![&public_key.as_bytes()[..]], |row| {
                Ok(Neighbor {
                    public_key: public_key_column(row, 0)?,
                    sent: row.get(1)?,
                    received: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(neighbors)
    }

    pub(crate) fn edge_watermarks(&self, public_key: &PublicKey) -> Result<Vec<EdgeWatermark>> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT link_public_key, MAX(total_up), MAX(total_down) FROM blocks \
             WHERE public_key = ?1 GROUP BY link_public_key",
        )?;
        let watermarks = stmt
            .query_map(params![&public_key.as_bytes()[..]], |row| {
                Ok(EdgeWatermark {
                    link_public_key: public_key_column(row, 0)?,
                    total_up: row.get(1)?,
                    total_down: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(watermarks)
    }

    pub(crate) fn schema_version(&self) -> Result<u32> {
        stored_version(&self.connection)
    }
}

/// Version recorded in the `option` table, 0 for an empty database.
pub(crate) fn stored_version(connection: &Connection) -> Result<u32> {
    let has_options: bool = connection.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'option')",
        [],
        |row| row.get(0),
    )?;
    if !has_options {
        return Ok(0);
    }

    let version: Option<String> = connection
        .query_row(
            "SELECT value FROM option WHERE key = 'database_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        None => Ok(0),
        Some(version) => version
            .parse()
            .map_err(|_| StorageError::Encoding(format!("Invalid database version '{version}'"))),
    }
}

fn public_key_column(row: &Row, idx: usize) -> rusqlite::Result<PublicKey> {
    let raw: Vec<u8> = row.get(idx)?;
    PublicKey::from_raw_vec(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(err)))
}

fn hash_column(row: &Row, idx: usize) -> rusqlite::Result<BlockHash> {
    let raw: Vec<u8> = row.get(idx)?;
    BlockHash::from_slice(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, err.into()))
}

fn map_block(row: &Row) -> rusqlite::Result<Block> {
    let signature: Vec<u8> = row.get(5)?;
    Ok(Block {
        public_key: public_key_column(row, 0)?,
        sequence_number: row.get(1)?,
        link_public_key: public_key_column(row, 2)?,
        link_sequence_number: row.get(3)?,
        previous_hash: hash_column(row, 4)?,
        signature: Signature::new(signature),
        transaction: Transaction {
            up: row.get(6)?,
            down: row.get(7)?,
            total_up: row.get(8)?,
            total_down: row.get(9)?,
        },
        insert_time: Some(row.get(10)?),
        hash: hash_column(row, 11)?,
    })
}

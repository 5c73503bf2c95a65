use rusqlite::{params, Connection, ErrorCode, OpenFlags};

use crate::block::Block;
use crate::config::DbConfig;
use crate::storage::{Result, StorageError};
use crate::utilities::time::TrustChainTime;

pub(crate) struct DbStore {
    connection: Connection,
    /// Insert times are strictly increasing, crawls order by them.
    last_insert_time: u64,
}

impl DbStore {
    pub(crate) fn open(db_conf: &DbConfig, flags: OpenFlags) -> Result<DbStore> {
        let connection = Connection::open_with_flags(&db_conf.sqlite_path, flags)?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        let last_insert_time =
            connection.query_row("SELECT COALESCE(MAX(insert_time), 0) FROM blocks", [], |row| row.get(0))?;
        Ok(DbStore {
            connection,
            last_insert_time,
        })
    }

    pub(crate) fn store_blocks(&mut self, blocks: &[Block]) -> Result<Vec<Block>> {
        let mut last_insert_time = self.last_insert_time;
        let tx = self.connection.transaction()?;
        let mut stored = Vec::with_capacity(blocks.len());
        for block in blocks {
            last_insert_time = TrustChainTime::now().max(last_insert_time + 1);
            stored.push(Self::insert_block(&tx, block, last_insert_time)?);
        }
        tx.commit()?;
        self.last_insert_time = last_insert_time;

        Ok(stored)
    }

    fn insert_block(connection: &Connection, block: &Block, insert_time: u64) -> Result<Block> {
        log::debug!("Storing block: {block}");

        let mut statement = connection.prepare_cached(
            "INSERT INTO blocks (public_key, sequence_number, link_public_key, link_sequence_number, \
             previous_hash, signature, up, down, total_up, total_down, insert_time, block_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let tx = &block.transaction;
        let result = statement.execute(params![
            &block.public_key.as_bytes()[..],
            block.sequence_number,
            &block.link_public_key.as_bytes()[..],
            block.link_sequence_number,
            &block.previous_hash.as_bytes()[..],
            block.signature.as_bytes(),
            tx.up,
            tx.down,
            tx.total_up,
            tx.total_down,
            insert_time,
            &block.hash.as_bytes()[..],
        ]);

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                log::warn!("Block {} already exists", block.key());
                return Err(StorageError::DuplicateBlock(block.key()));
            }
            Err(err) => return Err(err.into()),
        }

        Self::update_aggregates(connection, block)?;

        let mut stored = block.clone();
        stored.insert_time = Some(insert_time);
        Ok(stored)
    }

    fn update_aggregates(connection: &Connection, block: &Block) -> Result<()> {
        let tx = &block.transaction;
        let (public_key_a, public_key_b, a_sent, a_received, b_sent, b_received) =
            if block.public_key < block.link_public_key {
                (&block.public_key, &block.link_public_key, tx.up, tx.down, 0, 0)
            } else {
                (&block.link_public_key, &block.public_key, 0, 0, tx.up, tx.down)
            };

        let mut statement = connection.prepare_cached(
            "INSERT INTO aggregates (public_key_a, public_key_b, a_sent, a_received, b_sent, b_received) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (public_key_a, public_key_b) DO UPDATE SET \
             a_sent = a_sent + excluded.a_sent, \
             a_received = a_received + excluded.a_received, \
             b_sent = b_sent + excluded.b_sent, \
             b_received = b_received + excluded.b_received",
        )?;
        statement.execute(params![
            &public_key_a.as_bytes()[..],
            &public_key_b.as_bytes()[..],
            a_sent,
            a_received,
            b_sent,
            b_received,
        ])?;
        Ok(())
    }
}

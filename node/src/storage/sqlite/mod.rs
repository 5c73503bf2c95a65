use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::block::Block;
use crate::config::DbConfig;
use crate::storage::sqlite::query::{stored_version, DbQuery};
use crate::storage::sqlite::store::DbStore;
use crate::storage::{
    check_crawl_limit, check_latest_blocks_limit, BlockStore, EdgeWatermark, Neighbor, Result, StorageError,
    TrafficTotals, SCHEMA_VERSION,
};
use crate::utilities::crypto::PublicKey;

pub(crate) mod query;
pub(crate) mod store;

mod migrations {
    use refinery::embed_migrations;

    embed_migrations!("migrations");
}

/// Ledger stored in a single SQLite file.
///
/// Writes and reads use separate connections, in WAL mode readers see the last committed
/// state while a write is in progress.
pub struct SqliteStorage {
    db_store: Mutex<DbStore>,
    db_query: Mutex<DbQuery>,
}

impl SqliteStorage {
    pub fn open(db_conf: DbConfig) -> Result<Self> {
        let mut flags = OpenFlags::default();
        if !db_conf.create_if_not_exists {
            flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        }

        let mut connection = Connection::open_with_flags(&db_conf.sqlite_path, flags)?;
        let journal_mode: String =
            connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::trace!("Database journal mode: {journal_mode}");

        let stored = stored_version(&connection)?;
        Self::schema_check(&mut connection, stored)?;

        log::info!("Starting db backend with path: {}", db_conf.sqlite_path);
        let db_store = DbStore::open(&db_conf, flags)?;
        let db_query = DbQuery::open(&db_conf, flags)?;
        let storage = Self {
            db_store: Mutex::new(db_store),
            db_query: Mutex::new(db_query),
        };
        Ok(storage)
    }

    /// Brings the schema of `connection` to [`SCHEMA_VERSION`] and returns it.
    ///
    /// A newer schema than this binary knows about is refused, it is never downgraded.
    pub(crate) fn schema_check(connection: &mut Connection, stored: u32) -> Result<u32> {
        if stored > SCHEMA_VERSION {
            log::error!("Database schema version {stored} is newer than {SCHEMA_VERSION}");
            return Err(StorageError::SchemaTooNew {
                stored,
                supported: SCHEMA_VERSION,
            });
        }
        if stored < SCHEMA_VERSION {
            log::info!("Upgrading database schema from version {stored} to {SCHEMA_VERSION}");
        }

        Self::run_migrations(connection)?;
        stored_version(connection)
    }

    pub fn run_migrations(connection: &mut Connection) -> Result<()> {
        log::info!("Running database migrations");
        match migrations::migrations::runner().run(connection) {
            Ok(ok) => {
                log::info!("Database migrations completed:{:?} ", ok);
                Ok(())
            }
            Err(err) => {
                log::error!("Database migrations failed: {}", err);
                Err(err.into())
            }
        }
    }
}

impl BlockStore for SqliteStorage {
    fn add_block(&self, block: &Block) -> Result<Block> {
        let mut stored = self.db_store.lock().store_blocks(std::slice::from_ref(block))?;
        stored
            .pop()
            .ok_or_else(|| StorageError::InvalidParameter("no block stored".to_string()))
    }

    fn add_blocks(&self, blocks: &[Block]) -> Result<Vec<Block>> {
        self.db_store.lock().store_blocks(blocks)
    }

    fn get(&self, public_key: &PublicKey, sequence_number: u64) -> Result<Option<Block>> {
        self.db_query.lock().get_block(public_key, sequence_number)
    }

    fn get_latest(&self, public_key: &PublicKey) -> Result<Option<Block>> {
        self.db_query.lock().get_latest(public_key)
    }

    fn get_latest_blocks(&self, public_key: &PublicKey, limit: i64) -> Result<Vec<Block>> {
        check_latest_blocks_limit(limit)?;
        self.db_query.lock().get_latest_blocks(public_key, limit)
    }

    fn get_block_before(&self, block: &Block) -> Result<Option<Block>> {
        self.db_query.lock().get_block_before(block)
    }

    fn get_block_after(&self, block: &Block) -> Result<Option<Block>> {
        self.db_query.lock().get_block_after(block)
    }

    fn contains(&self, block: &Block) -> Result<bool> {
        self.db_query.lock().contains(block)
    }

    fn get_linked(&self, block: &Block) -> Result<Option<Block>> {
        self.db_query.lock().get_linked(block)
    }

    fn crawl(&self, public_key: &PublicKey, sequence_ceiling: u64, limit: i64) -> Result<Vec<Block>> {
        check_crawl_limit(limit)?;
        self.db_query.lock().crawl(public_key, sequence_ceiling, limit)
    }

    fn count_blocks(&self, public_key: &PublicKey) -> Result<u64> {
        self.db_query.lock().count_blocks(public_key)
    }

    fn total_traffic(&self, public_key: &PublicKey) -> Result<TrafficTotals> {
        self.db_query.lock().total_traffic(public_key)
    }

    fn num_unique_interactors(&self, public_key: &PublicKey) -> Result<(u64, u64)> {
        self.db_query.lock().num_unique_interactors(public_key)
    }

    fn graph_neighbors(&self, public_key: &PublicKey) -> Result<Vec<Neighbor>> {
        self.db_query.lock().graph_neighbors(public_key)
    }

    fn edge_watermarks(&self, public_key: &PublicKey) -> Result<Vec<EdgeWatermark>> {
        self.db_query.lock().edge_watermarks(public_key)
    }

    fn schema_version(&self) -> Result<u32> {
        self.db_query.lock().schema_version()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use assert_matches::assert_matches;
    use rusqlite::params;
    use tempfile::TempDir;

    use crate::block::types::block::test::{keypair, signed_request};
    use crate::utilities::crypto::{Keypair, TrustChainKeypair};

    use super::*;

    pub(crate) fn db_config(dir: &TempDir) -> DbConfig {
        DbConfig {
            sqlite_path: dir.path().join("trustchain.sqlite").display().to_string(),
            create_if_not_exists: true,
        }
    }

    pub(crate) fn open_storage(dir: &TempDir) -> SqliteStorage {
        SqliteStorage::open(db_config(dir)).unwrap()
    }

    fn linked(keypair: &Keypair, previous: Option<&Block>, request: &Block) -> Block {
        Block::new_linked(previous, keypair.public_key(), request)
            .sign(keypair)
            .unwrap()
    }

    /// Stores both halves of an exchange where `proposer` uploaded `up` and downloaded `down`.
    pub(crate) fn commit_exchange(
        store: &dyn BlockStore,
        proposer: &Keypair,
        counterparty: &Keypair,
        up: u64,
        down: u64,
    ) -> (Block, Block) {
        let latest = store.get_latest(&proposer.public_key()).unwrap();
        let request = signed_request(proposer, latest.as_ref(), counterparty.public_key(), up, down);
        let latest = store.get_latest(&counterparty.public_key()).unwrap();
        let counter = linked(counterparty, latest.as_ref(), &request);
        store.add_blocks(&[request.clone(), counter.clone()]).unwrap();
        (request, counter)
    }

    #[test]
    fn open_creates_current_schema() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);

        assert_eq!(storage.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn add_block_assigns_insert_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob) = (keypair("alice"), keypair("bob"));

        let block = signed_request(&alice, None, bob.public_key(), 10, 5);
        let stored = storage.add_block(&block).unwrap();

        assert!(stored.insert_time.is_some());
        assert_eq!(stored, block);
        assert!(storage.contains(&block).unwrap());
        assert_eq!(storage.get_latest(&alice.public_key()).unwrap(), Some(stored.clone()));
        assert_eq!(storage.get(&alice.public_key(), 1).unwrap().unwrap().insert_time, stored.insert_time);
    }

    #[test]
    fn duplicate_block_is_rejected_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob) = (keypair("alice"), keypair("bob"));

        let block = signed_request(&alice, None, bob.public_key(), 10, 5);
        let stored = storage.add_block(&block).unwrap();

        let conflicting = signed_request(&alice, None, bob.public_key(), 99, 99);
        assert_matches!(storage.add_block(&block), Err(StorageError::DuplicateBlock(_)));
        assert_matches!(storage.add_block(&conflicting), Err(StorageError::DuplicateBlock(_)));

        let found = storage.get(&alice.public_key(), 1).unwrap().unwrap();
        assert_eq!(found, stored);
        assert_eq!(found.insert_time, stored.insert_time);
        assert_eq!(storage.count_blocks(&alice.public_key()).unwrap(), 1);
        assert_eq!(storage.total_traffic(&alice.public_key()).unwrap().up, 10);
    }

    #[test]
    fn add_blocks_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob) = (keypair("alice"), keypair("bob"));

        let request = signed_request(&alice, None, bob.public_key(), 10, 5);
        storage.add_block(&request).unwrap();

        let counter = linked(&bob, None, &request);
        assert_matches!(
            storage.add_blocks(&[counter.clone(), request.clone()]),
            Err(StorageError::DuplicateBlock(_))
        );
        assert!(!storage.contains(&counter).unwrap());
    }

    #[test]
    fn adjacent_and_linked_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob) = (keypair("alice"), keypair("bob"));

        let first = signed_request(&alice, None, bob.public_key(), 10, 5);
        let second = signed_request(&alice, Some(&first), bob.public_key(), 1, 1);
        let third = signed_request(&alice, Some(&second), bob.public_key(), 1, 1);
        let counter = linked(&bob, None, &second);
        storage
            .add_blocks(&[first.clone(), second.clone(), third.clone(), counter.clone()])
            .unwrap();

        assert_eq!(storage.get_block_before(&second).unwrap(), Some(first.clone()));
        assert_eq!(storage.get_block_after(&second).unwrap(), Some(third.clone()));
        assert_eq!(storage.get_block_before(&first).unwrap(), None);
        assert_eq!(storage.get_block_after(&third).unwrap(), None);

        assert_eq!(storage.get_linked(&second).unwrap(), Some(counter.clone()));
        assert_eq!(storage.get_linked(&counter).unwrap(), Some(second.clone()));
        assert_eq!(storage.get_linked(&first).unwrap(), None);

        let latest = storage.get_latest_blocks(&alice.public_key(), 2).unwrap();
        let sequence_numbers: Vec<_> = latest.iter().map(|b| b.sequence_number).collect();
        assert_eq!(sequence_numbers, vec![3, 2]);
    }

    #[test]
    fn out_of_range_limits_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let alice = keypair("alice");

        for limit in [10_000_000, -1, 0, 101] {
            assert_matches!(
                storage.crawl(&alice.public_key(), 1, limit),
                Err(StorageError::InvalidParameter(_))
            );
        }
        assert_matches!(
            storage.get_latest_blocks(&alice.public_key(), 1001),
            Err(StorageError::InvalidParameter(_))
        );
    }

    #[test]
    fn crawl_returns_blocks_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob, carol) = (keypair("alice"), keypair("bob"), keypair("carol"));

        let mut previous: Option<Block> = None;
        for _ in 0..15 {
            let block = signed_request(&alice, previous.as_ref(), bob.public_key(), 10, 5);
            storage.add_block(&block).unwrap();
            previous = Some(block);
        }
        let request = signed_request(&carol, None, alice.public_key(), 3, 3);
        storage.add_block(&request).unwrap();
        let unrelated = signed_request(&bob, None, carol.public_key(), 3, 3);
        storage.add_block(&unrelated).unwrap();

        let blocks = storage.crawl(&alice.public_key(), 1, 10).unwrap();
        assert_eq!(blocks.len(), 10);
        assert!(blocks
            .windows(2)
            .all(|pair| pair[0].insert_time <= pair[1].insert_time));
        assert_eq!(blocks[0].sequence_number, 1);

        let tail = storage.crawl(&alice.public_key(), 12, 10).unwrap();
        let keys: Vec<_> = tail.iter().map(|b| (b.public_key, b.sequence_number)).collect();
        assert_eq!(
            keys,
            vec![
                (alice.public_key(), 12),
                (alice.public_key(), 13),
                (alice.public_key(), 14),
                (alice.public_key(), 15),
                (carol.public_key(), 1),
            ]
        );
    }

    #[test]
    fn total_traffic_counts_each_exchange_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob, carol) = (keypair("alice"), keypair("bob"), keypair("carol"));

        let request = signed_request(&alice, None, bob.public_key(), 10, 5);
        let counter = linked(&bob, None, &request);
        let other = signed_request(&alice, Some(&request), carol.public_key(), 1, 2);
        storage.add_blocks(&[request, counter, other]).unwrap();

        let alice_totals = storage.total_traffic(&alice.public_key()).unwrap();
        assert_eq!(alice_totals, TrafficTotals { up: 11, down: 7, neighbors: 2 });

        let bob_totals = storage.total_traffic(&bob.public_key()).unwrap();
        assert_eq!(bob_totals, TrafficTotals { up: 5, down: 10, neighbors: 1 });

        let neighbors = storage.graph_neighbors(&alice.public_key()).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].public_key, bob.public_key());
        assert_eq!((neighbors[0].sent, neighbors[0].received), (10, 5));
    }

    #[test]
    fn unique_interactors_per_counterparty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob, carol) = (keypair("alice"), keypair("bob"), keypair("carol"));

        let uploaded = signed_request(&alice, None, bob.public_key(), 10, 0);
        let downloaded = signed_request(&alice, Some(&uploaded), bob.public_key(), 0, 10);
        storage.add_blocks(&[uploaded, downloaded]).unwrap();
        assert_eq!(storage.num_unique_interactors(&alice.public_key()).unwrap(), (1, 1));

        let with_bob = signed_request(&carol, None, bob.public_key(), 10, 5);
        let with_alice = signed_request(&carol, Some(&with_bob), alice.public_key(), 10, 5);
        storage.add_blocks(&[with_bob, with_alice]).unwrap();
        assert_eq!(storage.num_unique_interactors(&carol.public_key()).unwrap(), (2, 2));

        assert_eq!(storage.num_unique_interactors(&bob.public_key()).unwrap(), (0, 0));
    }

    #[test]
    fn edge_watermarks_keep_highest_totals() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(&dir);
        let (alice, bob) = (keypair("alice"), keypair("bob"));

        let first = signed_request(&alice, None, bob.public_key(), 10, 5);
        let second = signed_request(&alice, Some(&first), bob.public_key(), 10, 5);
        storage.add_blocks(&[first, second]).unwrap();

        let watermarks = storage.edge_watermarks(&alice.public_key()).unwrap();
        assert_eq!(
            watermarks,
            vec![EdgeWatermark {
                link_public_key: bob.public_key(),
                total_up: 20,
                total_down: 10,
            }]
        );
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        drop(open_storage(&dir));

        let connection = Connection::open(db_config(&dir).sqlite_path).unwrap();
        connection
            .execute("UPDATE option SET value = '99' WHERE key = 'database_version'", [])
            .unwrap();
        drop(connection);

        assert_matches!(
            SqliteStorage::open(db_config(&dir)).err(),
            Some(StorageError::SchemaTooNew { stored: 99, supported: SCHEMA_VERSION })
        );
    }

    #[test]
    fn upgrade_keeps_blocks_and_rebuilds_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let mut connection = Connection::open(db_config(&dir).sqlite_path).unwrap();
        migrations::migrations::runner()
            .set_target(refinery::Target::Version(1))
            .run(&mut connection)
            .unwrap();
        assert_eq!(stored_version(&connection).unwrap(), 1);

        let (alice, bob) = (keypair("alice"), keypair("bob"));
        let request = signed_request(&alice, None, bob.public_key(), 10, 5);
        let counter = linked(&bob, None, &request);
        for block in [&request, &counter] {
            connection
                .execute(
                    "INSERT INTO blocks (public_key, sequence_number, link_public_key, link_sequence_number, \
                     previous_hash, signature, up, down, total_up, total_down, insert_time, block_hash) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        &block.public_key.as_bytes()[..],
                        block.sequence_number,
                        &block.link_public_key.as_bytes()[..],
                        block.link_sequence_number,
                        &block.previous_hash.as_bytes()[..],
                        block.signature.as_bytes(),
                        block.transaction.up,
                        block.transaction.down,
                        block.transaction.total_up,
                        block.transaction.total_down,
                        1_u64,
                        &block.hash.as_bytes()[..],
                    ],
                )
                .unwrap();
        }
        drop(connection);

        let storage = open_storage(&dir);
        assert_eq!(storage.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(storage.get_latest(&alice.public_key()).unwrap(), Some(request));
        assert_eq!(storage.get_latest(&bob.public_key()).unwrap(), Some(counter));
        assert_eq!(
            storage.total_traffic(&alice.public_key()).unwrap(),
            TrafficTotals { up: 10, down: 5, neighbors: 1 }
        );
    }
}

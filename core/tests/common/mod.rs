//! In-memory stores shared by the core integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bookingbench_core::convert::{ChunkCompression, ChunkInfo, CompressionPolicy, ContinuousAggregate, IndexDefinition, IndexSpec, PartitionPolicy};
use bookingbench_core::model::*;
use bookingbench_core::scenario::{Filter, Scenario, ScenarioParameters, Shape};
use bookingbench_core::storage::{BulkStore, LayoutStore, QuerySession, QueryTarget};
use bookingbench_core::StoreError;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::WARN).with_test_writer().init();
    }
}

/// Fixed end of the generation window so tests do not depend on the wall clock.
pub fn window_end() -> NaiveDateTime { NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap() }

/// How the store answers a bulk insert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertMode {
    /// Every row's identifier, in order.
    Complete,
    /// Splits the insert into pages and returns only the last page's identifiers.
    LastPageOnly { page_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    Connectivity,
    Integrity,
}

#[derive(Default)]
struct Tables {
    next_id: BTreeMap<EntityKind, i64>,
    ids: BTreeMap<EntityKind, HashSet<i64>>,
    tokens: HashSet<String>,
    batches: Vec<(Vec<i64>, RowBatch)>,
    inserts: BTreeMap<EntityKind, usize>,
    validation_suspended: bool,
}

#[derive(Default)]
struct Layout {
    partitioned: bool,
    chunks: Vec<ChunkInfo>,
    indexes: Vec<IndexDefinition>,
    compression_enabled: bool,
    policies: usize,
    aggregates: BTreeSet<String>,
}

/// A foreign-key checking in-memory store with the booking layout operations simulated.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    layout: Mutex<Layout>,
    mode: InsertMode,
    fault: Option<(EntityKind, usize, Fault)>,
    incoming_foreign_keys: Vec<String>,
    /// Compressed size as a fraction of the uncompressed size.
    compression_factor: f64,
    pub suspend_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    now: NaiveDateTime,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            layout: Mutex::new(Layout {
                indexes: vec![
                    IndexDefinition { name: "booking_pkey".into(), columns: vec!["id".into()], unique: true },
                    IndexDefinition { name: "booking_token_key".into(), columns: vec!["token".into()], unique: true },
                    IndexDefinition { name: "ix_booking_stockId".into(), columns: vec!["stockId".into()], unique: false },
                ],
                ..Layout::default()
            }),
            mode: InsertMode::Complete,
            fault: None,
            incoming_foreign_keys: Vec::new(),
            compression_factor: 0.2,
            suspend_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            now: window_end() + chrono::Duration::days(1),
        }
    }

    pub fn with_mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    /// Fails the `batch`-th insert (zero based) of `kind`.
    pub fn with_fault(mut self, kind: EntityKind, batch: usize, fault: Fault) -> Self {
        self.fault = Some((kind, batch, fault));
        self
    }

    pub fn with_incoming_foreign_key(mut self, constraint: &str) -> Self {
        self.incoming_foreign_keys.push(constraint.to_string());
        self
    }

    pub fn with_compression_factor(mut self, factor: f64) -> Self {
        self.compression_factor = factor;
        self
    }

    pub fn validation_suspended(&self) -> bool { self.tables.lock().unwrap().validation_suspended }

    pub fn count(&self, kind: EntityKind) -> usize { self.tables.lock().unwrap().ids.get(&kind).map_or(0, |ids| ids.len()) }

    pub fn insert_calls(&self, kind: EntityKind) -> usize { self.tables.lock().unwrap().inserts.get(&kind).copied().unwrap_or(0) }

    pub fn has_id(&self, kind: EntityKind, id: i64) -> bool { self.tables.lock().unwrap().ids.get(&kind).is_some_and(|ids| ids.contains(&id)) }

    pub fn bookings(&self) -> Vec<(i64, BookingRow)> {
        let tables = self.tables.lock().unwrap();
        let mut rows = Vec::new();
        for (ids, batch) in &tables.batches {
            if let RowBatch::Bookings(bookings) = batch {
                rows.extend(ids.iter().copied().zip(bookings.iter().cloned()));
            }
        }
        rows
    }

    /// Rows of one kind keyed by identifier, for lineage checks.
    pub fn stocks(&self) -> BTreeMap<i64, StockRow> {
        let tables = self.tables.lock().unwrap();
        let mut rows = BTreeMap::new();
        for (ids, batch) in &tables.batches {
            if let RowBatch::Stocks(stocks) = batch {
                rows.extend(ids.iter().copied().zip(stocks.iter().cloned()));
            }
        }
        rows
    }

    pub fn offers(&self) -> BTreeMap<i64, OfferRow> {
        let tables = self.tables.lock().unwrap();
        let mut rows = BTreeMap::new();
        for (ids, batch) in &tables.batches {
            if let RowBatch::Offers(offers) = batch {
                rows.extend(ids.iter().copied().zip(offers.iter().cloned()));
            }
        }
        rows
    }

    pub fn venues(&self) -> BTreeMap<i64, VenueRow> {
        let tables = self.tables.lock().unwrap();
        let mut rows = BTreeMap::new();
        for (ids, batch) in &tables.batches {
            if let RowBatch::Venues(venues) = batch {
                rows.extend(ids.iter().copied().zip(venues.iter().cloned()));
            }
        }
        rows
    }

    pub fn deposits(&self) -> BTreeMap<i64, DepositRow> {
        let tables = self.tables.lock().unwrap();
        let mut rows = BTreeMap::new();
        for (ids, batch) in &tables.batches {
            if let RowBatch::Deposits(deposits) = batch {
                rows.extend(ids.iter().copied().zip(deposits.iter().cloned()));
            }
        }
        rows
    }

    pub fn is_compression_enabled(&self) -> bool { self.layout.lock().unwrap().compression_enabled }

    pub fn policy_count(&self) -> usize { self.layout.lock().unwrap().policies }

    pub fn chunk_count(&self) -> usize { self.layout.lock().unwrap().chunks.len() }

    /// Forgets the chunk at `index` of the start-ordered list, stranding its rows.
    pub fn lose_chunk(&self, index: usize) { self.layout.lock().unwrap().chunks.remove(index); }

    fn booking_times(&self) -> Vec<NaiveDateTime> { self.bookings().into_iter().map(|(_, row)| row.date_created).collect() }
}

fn references(batch: &RowBatch) -> Vec<(EntityKind, i64)> {
    let mut refs = Vec::new();
    match batch {
        RowBatch::Users(_) | RowBatch::Offerers(_) | RowBatch::Addresses(_) => {}
        RowBatch::Deposits(rows) => refs.extend(rows.iter().map(|row| (EntityKind::User, row.user_id))),
        RowBatch::OffererAddresses(rows) => {
            for row in rows {
                refs.push((EntityKind::Address, row.address_id));
                refs.push((EntityKind::Offerer, row.offerer_id));
            }
        }
        RowBatch::Venues(rows) => {
            for row in rows {
                refs.push((EntityKind::Offerer, row.offerer_id));
                refs.push((EntityKind::OffererAddress, row.offerer_address_id));
            }
        }
        RowBatch::Offers(rows) => refs.extend(rows.iter().map(|row| (EntityKind::Venue, row.venue_id))),
        RowBatch::Stocks(rows) => refs.extend(rows.iter().map(|row| (EntityKind::Offer, row.offer_id))),
        RowBatch::Bookings(rows) => {
            for row in rows {
                refs.push((EntityKind::Stock, row.stock_id));
                refs.push((EntityKind::Venue, row.venue_id));
                refs.push((EntityKind::Offerer, row.offerer_id));
                refs.push((EntityKind::User, row.user_id));
                refs.push((EntityKind::Deposit, row.deposit_id));
            }
        }
        RowBatch::UserOfferers(rows) => {
            for row in rows {
                refs.push((EntityKind::User, row.user_id));
                refs.push((EntityKind::Offerer, row.offerer_id));
            }
        }
    }
    refs
}

#[async_trait]
impl BulkStore for MemoryStore {
    async fn insert_returning(&self, batch: &RowBatch) -> Result<Vec<i64>, StoreError> {
        let kind = batch.kind();
        let mut tables = self.tables.lock().unwrap();
        let attempt = {
            let counter = tables.inserts.entry(kind).or_default();
            *counter += 1;
            *counter - 1
        };
        if let Some((fault_kind, fault_batch, fault)) = self.fault {
            if fault_kind == kind && fault_batch == attempt {
                return Err(match fault {
                    Fault::Connectivity => StoreError::connectivity("connection reset by peer"),
                    Fault::Integrity => StoreError::integrity("new row violates check constraint"),
                });
            }
        }

        for (referenced, id) in references(batch) {
            if !tables.ids.get(&referenced).is_some_and(|ids| ids.contains(&id)) {
                return Err(StoreError::integrity(format!("{kind} references missing {referenced} {id}")));
            }
        }
        if let RowBatch::Bookings(rows) = batch {
            let mut seen = HashSet::new();
            for row in rows {
                if tables.tokens.contains(&row.token) || !seen.insert(row.token.clone()) {
                    return Err(StoreError::integrity(format!("duplicate booking token {}", row.token)));
                }
            }
            tables.tokens.extend(seen);
        }

        let base = (kind as i64 + 1) * 1_000_000_000;
        let next = tables.next_id.entry(kind).or_insert(base);
        let ids: Vec<i64> = (0..batch.len() as i64).map(|offset| *next + offset).collect();
        *next += batch.len() as i64;
        tables.ids.entry(kind).or_default().extend(ids.iter().copied());
        tables.batches.push((ids.clone(), batch.clone()));

        Ok(match self.mode {
            InsertMode::Complete => ids,
            InsertMode::LastPageOnly { page_size } => {
                let page_size = page_size.max(1);
                let last_page_start = ids.len().saturating_sub(1) / page_size * page_size;
                ids[last_page_start..].to_vec()
            }
        })
    }

    async fn suspend_validation(&self) -> Result<(), StoreError> {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().unwrap().validation_suspended = true;
        Ok(())
    }

    async fn resume_validation(&self) -> Result<(), StoreError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().unwrap().validation_suspended = false;
        Ok(())
    }

    fn describe(&self) -> String { "memory".to_string() }
}

#[async_trait]
impl LayoutStore for MemoryStore {
    async fn is_partitioned(&self, _table: &str) -> Result<bool, StoreError> { Ok(self.layout.lock().unwrap().partitioned) }

    async fn row_count(&self, _table: &str) -> Result<u64, StoreError> { Ok(self.count(EntityKind::Booking) as u64) }

    async fn time_span(&self, _table: &str, _column: &str) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, StoreError> {
        let times = self.booking_times();
        Ok(times.iter().min().copied().zip(times.iter().max().copied()))
    }

    async fn indexes(&self, _table: &str) -> Result<Vec<IndexDefinition>, StoreError> { Ok(self.layout.lock().unwrap().indexes.clone()) }

    async fn incoming_foreign_keys(&self, _table: &str) -> Result<Vec<String>, StoreError> { Ok(self.incoming_foreign_keys.clone()) }

    async fn partition(&self, policy: &PartitionPolicy, indexes: &[IndexSpec]) -> Result<(), StoreError> {
        let width = chrono::Duration::days(policy.chunk_width_days as i64);
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut starts = BTreeSet::new();
        for time in self.booking_times() {
            let buckets = (time - epoch).num_seconds().div_euclid(width.num_seconds());
            starts.insert(epoch + chrono::Duration::seconds(buckets * width.num_seconds()));
        }

        let mut layout = self.layout.lock().unwrap();
        if layout.partitioned {
            return Err(StoreError::other("table is already a hypertable"));
        }
        layout.partitioned = true;
        layout.chunks = starts
            .into_iter()
            .enumerate()
            .map(|(n, start)| ChunkInfo {
                schema: "_timescaledb_internal".into(),
                name: format!("_hyper_1_{}_chunk", n + 1),
                range_start: start,
                range_end: start + width,
                is_compressed: false,
            })
            .collect();
        for index in layout.indexes.iter_mut() {
            index.unique = false;
        }
        for spec in indexes {
            if !layout.indexes.iter().any(|existing| existing.name == spec.name) {
                layout.indexes.push(IndexDefinition { name: spec.name.clone(), columns: spec.column_names(), unique: false });
            }
        }
        Ok(())
    }

    async fn chunks(&self, _table: &str) -> Result<Vec<ChunkInfo>, StoreError> { Ok(self.layout.lock().unwrap().chunks.clone()) }

    async fn rows_in_chunks(&self, _table: &str, _column: &str) -> Result<u64, StoreError> {
        let times = self.booking_times();
        let layout = self.layout.lock().unwrap();
        let placed: usize = layout.chunks.iter().map(|chunk| times.iter().filter(|time| **time >= chunk.range_start && **time < chunk.range_end).count()).sum();
        Ok(placed as u64)
    }

    async fn enable_compression(&self, _policy: &CompressionPolicy) -> Result<(), StoreError> {
        self.layout.lock().unwrap().compression_enabled = true;
        Ok(())
    }

    async fn add_compression_policy(&self, _policy: &CompressionPolicy) -> Result<(), StoreError> {
        let mut layout = self.layout.lock().unwrap();
        layout.policies = 1;
        Ok(())
    }

    async fn compress_chunk(&self, chunk: &ChunkInfo) -> Result<(), StoreError> {
        let mut layout = self.layout.lock().unwrap();
        match layout.chunks.iter_mut().find(|existing| existing.name == chunk.name) {
            Some(existing) => {
                existing.is_compressed = true;
                Ok(())
            }
            None => Err(StoreError::other(format!("chunk {} does not exist", chunk.name))),
        }
    }

    async fn compression_stats(&self, _table: &str) -> Result<Vec<ChunkCompression>, StoreError> {
        let times = self.booking_times();
        let layout = self.layout.lock().unwrap();
        Ok(layout
            .chunks
            .iter()
            .filter(|chunk| chunk.is_compressed)
            .map(|chunk| {
                let rows = times.iter().filter(|time| **time >= chunk.range_start && **time < chunk.range_end).count() as i64;
                let before_bytes = 8_192 + rows * 160;
                ChunkCompression { chunk_name: chunk.name.clone(), before_bytes, after_bytes: (before_bytes as f64 * self.compression_factor) as i64 }
            })
            .collect())
    }

    async fn create_continuous_aggregate(&self, aggregate: &ContinuousAggregate) -> Result<(), StoreError> {
        self.layout.lock().unwrap().aggregates.insert(aggregate.name.clone());
        Ok(())
    }

    async fn continuous_aggregates(&self) -> Result<Vec<String>, StoreError> { Ok(self.layout.lock().unwrap().aggregates.iter().cloned().collect()) }

    async fn now(&self) -> Result<NaiveDateTime, StoreError> { Ok(self.now) }
}

/// Latency and failures scripted per scenario name.
pub struct Script {
    pub unreachable: bool,
    pub failing: BTreeSet<String>,
    pub hanging: BTreeSet<String>,
    pub latency: Duration,
    pub parameters: ScenarioParameters,
    pub executions: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            unreachable: false,
            failing: BTreeSet::new(),
            hanging: BTreeSet::new(),
            latency: Duration::from_millis(1),
            parameters: ScenarioParameters { venue_id: Some(7), offerer_id: Some(3) },
            executions: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }
}

pub struct ScriptedTarget {
    pub script: Arc<Script>,
}

impl ScriptedTarget {
    pub fn new(script: Script) -> Self { Self { script: Arc::new(script) } }

    pub fn executions(&self) -> usize { self.script.executions.load(Ordering::SeqCst) }

    pub fn cancels(&self) -> usize { self.script.cancels.load(Ordering::SeqCst) }
}

pub struct ScriptedSession {
    script: Arc<Script>,
}

#[async_trait]
impl QueryTarget for ScriptedTarget {
    type Session = ScriptedSession;

    async fn open_session(&self) -> Result<Self::Session, StoreError> {
        if self.script.unreachable {
            return Err(StoreError::connectivity("connection refused"));
        }
        Ok(ScriptedSession { script: self.script.clone() })
    }

    fn describe(&self) -> String { "scripted".to_string() }
}

#[async_trait]
impl QuerySession for ScriptedSession {
    async fn resolve_parameters(&mut self) -> Result<ScenarioParameters, StoreError> { Ok(self.script.parameters) }

    async fn execute(&mut self, scenario: &Scenario, _parameters: &ScenarioParameters) -> Result<u64, StoreError> {
        self.script.executions.fetch_add(1, Ordering::SeqCst);
        if self.script.failing.contains(&scenario.name) {
            return Err(StoreError::integrity("relation \"booking\" does not exist"));
        }
        if self.script.hanging.contains(&scenario.name) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        tokio::time::sleep(self.script.latency).await;
        Ok(match (scenario.shape, scenario.filter) {
            (Shape::Count, _) => 1,
            (Shape::Page { limit, .. }, Filter::None) => limit as u64,
            (Shape::Page { limit, .. }, _) => (limit / 2) as u64,
        })
    }

    async fn cancel(&mut self) -> Result<(), StoreError> {
        self.script.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

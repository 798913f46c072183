use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::core::config::IndexerConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{NodeRef, StoreRef};
use crate::document::builder::DocumentBuilder;
use crate::document::doc::Document;
use crate::index::store::{MainIndex, MergeUnit, WriteIntentGuard};
use crate::index::view::View;
use crate::indexer::command::{Action, CommandLog};
use crate::indexer::engine::MutationEngine;
use crate::query::ast::PrimitiveQuery;
use crate::query::matcher;
use crate::repo::node::DiffCode;

/// Lifecycle of one unit of indexing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerStatus {
    Unknown,
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    MarkedRollback,
    RollingBack,
    RolledBack,
}

impl fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            IndexerStatus::Unknown => "UNKNOWN",
            IndexerStatus::Active => "ACTIVE",
            IndexerStatus::Preparing => "PREPARING",
            IndexerStatus::Prepared => "PREPARED",
            IndexerStatus::Committing => "COMMITTING",
            IndexerStatus::Committed => "COMMITTED",
            IndexerStatus::MarkedRollback => "MARKED_ROLLBACK",
            IndexerStatus::RollingBack => "ROLLING_BACK",
            IndexerStatus::RolledBack => "ROLLEDBACK",
        };
        write!(f, "{}", name)
    }
}

/// Transactional work and background catch-up work may not share one unit
/// of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerMode {
    Unset,
    Transactional,
    Background,
}

/// Invoked exactly once per unit of work, on commit and rollback alike.
pub trait IndexingCallback: Send + Sync {
    fn on_index_completed(&self, store: &StoreRef, remaining: usize, error: Option<&Error>);
}

/// Notified when a commit leaves non-atomic work outstanding.
pub trait FtsScheduler: Send + Sync {
    fn requires_index(&self, store: &StoreRef);
}

/// One unit of indexing work: a command log, a delta generation, and the
/// two-phase lifecycle gating every mutation.
pub struct Indexer {
    status: IndexerStatus,
    mode: IndexerMode,
    log: CommandLog,
    engine: MutationEngine,
    config: IndexerConfig,
    callback: Option<Arc<dyn IndexingCallback>>,
    scheduler: Option<Arc<dyn FtsScheduler>>,
    write_intent: Option<WriteIntentGuard>,
    modified: bool,
    callback_fired: bool,
    remaining_override: Option<usize>,
    tx_tag: String,
}

impl Indexer {
    pub fn new(main: Arc<MainIndex>, builder: DocumentBuilder, config: IndexerConfig) -> Self {
        let tx_tag = Uuid::new_v4().to_string();
        let log = CommandLog::new(config.command_batch_size);
        let engine = MutationEngine::new(main, builder, tx_tag.clone());
        Indexer {
            status: IndexerStatus::Unknown,
            mode: IndexerMode::Unset,
            log,
            engine,
            config,
            callback: None,
            scheduler: None,
            write_intent: None,
            modified: false,
            callback_fired: false,
            remaining_override: None,
            tx_tag,
        }
    }

    pub fn tx_tag(&self) -> &str {
        &self.tx_tag
    }

    pub fn status(&self) -> IndexerStatus {
        self.status
    }

    pub fn store(&self) -> StoreRef {
        self.engine.main.store().clone()
    }

    pub fn set_callback(&mut self, callback: Arc<dyn IndexingCallback>) {
        self.callback = Some(callback);
    }

    pub fn set_scheduler(&mut self, scheduler: Arc<dyn FtsScheduler>) {
        self.scheduler = Some(scheduler);
    }

    /// Identities masked from the committed generation by this unit of work.
    pub fn deletions(&self) -> &std::collections::HashSet<String> {
        &self.engine.deletions
    }

    // Mutating entry points

    pub fn index(&mut self, node: &NodeRef) -> Result<()> {
        self.enqueue(node, Action::Index, IndexerMode::Transactional)
    }

    pub fn reindex(&mut self, node: &NodeRef) -> Result<()> {
        self.enqueue(node, Action::Reindex, IndexerMode::Transactional)
    }

    pub fn cascade_reindex(&mut self, node: &NodeRef) -> Result<()> {
        self.enqueue(node, Action::CascadeReindex, IndexerMode::Transactional)
    }

    pub fn delete(&mut self, node: &NodeRef) -> Result<()> {
        self.enqueue(node, Action::Delete, IndexerMode::Transactional)
    }

    /// Catch-up reprocessing of one entity; indexes every property inline.
    pub fn background_reindex(&mut self, node: &NodeRef) -> Result<()> {
        self.enqueue(node, Action::Reindex, IndexerMode::Background)?;
        self.engine.index_all = true;
        Ok(())
    }

    /// Walk a snapshot diff of a versioned store and queue the matching
    /// commands. A reappearing path goes through the Reindex purge-first
    /// path, the same as any other change.
    pub fn index_snapshot_diff(&mut self, from_version: u64, to_version: u64) -> Result<()> {
        let differences = self
            .engine
            .builder
            .repo
            .compare_versions(from_version, to_version)?;
        for difference in differences {
            match (&difference.code, &difference.destination) {
                (DiffCode::Same | DiffCode::Older, _) => {}
                (DiffCode::Directory, Some(node)) => {
                    let node = node.clone();
                    self.cascade_reindex(&node)?;
                }
                (_, Some(node)) => {
                    let node = node.clone();
                    self.reindex(&node)?;
                }
                (_, None) => {
                    if let Some(node) = difference.source.clone() {
                        self.delete(&node)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, node: &NodeRef, action: Action, mode: IndexerMode) -> Result<()> {
        self.check_mutable(action)?;
        self.enter_mode(mode)?;
        self.status = IndexerStatus::Active;
        self.modified = true;
        if self.log.insert(node.clone(), action) {
            // Batch threshold exceeded: flush before returning
            self.flush_pending()?;
        }
        Ok(())
    }

    fn check_mutable(&self, action: Action) -> Result<()> {
        match self.status {
            IndexerStatus::Unknown | IndexerStatus::Active => Ok(()),
            state => Err(Error::invalid_state(
                &format!("{:?}", action),
                state,
            )),
        }
    }

    fn enter_mode(&mut self, mode: IndexerMode) -> Result<()> {
        if self.mode == IndexerMode::Unset {
            self.mode = mode;
            return Ok(());
        }
        if self.mode != mode {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!(
                    "{:?} operation in a {:?} unit of work",
                    mode, self.mode
                ),
            ));
        }
        Ok(())
    }

    /// Drain the command queue into the delta generation. A storage failure
    /// triggers a best-effort rollback before the error is re-raised.
    pub fn flush_pending(&mut self) -> Result<()> {
        if self.log.is_empty() {
            return Ok(());
        }
        self.acquire_write_intent();
        let commands = self.log.drain();
        if let Err(e) = self.engine.flush(commands) {
            warn!(store = %self.store(), error = %e, "flush failed, rolling back");
            if let Err(rollback_error) = self.rollback() {
                // Best-effort cleanup only
                warn!(error = %rollback_error, "rollback after failed flush also failed");
            }
            return Err(e);
        }
        Ok(())
    }

    fn acquire_write_intent(&mut self) {
        if self.write_intent.is_none() {
            self.write_intent = Some(self.engine.main.lock_write_intent());
        }
    }

    // Lifecycle

    /// First phase: flush pending work and persist the delta. Returns
    /// whether there is anything to commit.
    pub fn prepare(&mut self) -> Result<bool> {
        if self.status != IndexerStatus::Active {
            return Err(Error::invalid_state("prepare", self.status));
        }
        self.status = IndexerStatus::Preparing;
        if self.modified {
            self.acquire_write_intent();
            self.flush_pending()?;
            self.save_prepared_delta()?;
        }
        self.status = IndexerStatus::Prepared;
        Ok(self.modified)
    }

    pub fn commit(&mut self) -> Result<()> {
        match self.status {
            IndexerStatus::Active => {
                if let Err(e) = self.prepare() {
                    let _ = self.rollback();
                    return Err(e);
                }
            }
            IndexerStatus::Prepared => {}
            IndexerStatus::Unknown => {
                // Read-only unit of work: nothing to publish
                self.status = IndexerStatus::Committed;
                self.fire_callback(0, None);
                return Ok(());
            }
            state => return Err(Error::invalid_state("commit", state)),
        }
        self.status = IndexerStatus::Committing;

        if self.modified {
            let unit = self.build_merge_unit();
            self.engine.main.publish(unit)?;
            match self.mode {
                IndexerMode::Background => {
                    // This is the background work; nothing further to signal
                }
                _ => {
                    if let Some(scheduler) = &self.scheduler {
                        scheduler.requires_index(self.engine.main.store());
                    }
                }
            }
        }
        self.remove_prepared_delta();

        self.status = IndexerStatus::Committed;
        self.write_intent = None;
        let remaining = self
            .remaining_override
            .unwrap_or_else(|| self.engine.deferred.len());
        info!(store = %self.store(), tx = %self.tx_tag, remaining, "index commit");
        self.fire_callback(remaining, None);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        match self.status {
            IndexerStatus::Committed
            | IndexerStatus::RolledBack
            | IndexerStatus::RollingBack => {
                return Err(Error::invalid_state("rollback", self.status));
            }
            _ => {}
        }
        self.status = IndexerStatus::RollingBack;
        self.log.clear();
        self.engine.discard();
        self.remove_prepared_delta();
        self.write_intent = None;
        self.status = IndexerStatus::RolledBack;
        debug!(store = %self.store(), tx = %self.tx_tag, "index rollback");
        self.fire_callback(0, None);
        Ok(())
    }

    /// One-way switch: the unit of work can only roll back from here on.
    pub fn set_rollback_only(&mut self) -> Result<()> {
        match self.status {
            IndexerStatus::Committing
            | IndexerStatus::Committed
            | IndexerStatus::RollingBack
            | IndexerStatus::RolledBack => {
                Err(Error::invalid_state("setRollbackOnly", self.status))
            }
            _ => {
                self.status = IndexerStatus::MarkedRollback;
                Ok(())
            }
        }
    }

    /// Used by the catch-up worker to report the tail it left behind.
    pub fn set_remaining_work(&mut self, remaining: usize) {
        self.remaining_override = Some(remaining);
    }

    fn build_merge_unit(&self) -> MergeUnit {
        let documents: Vec<Document> = self
            .engine
            .delta
            .live_docs()
            .map(|(_, d)| d.clone())
            .collect();
        let mut deletions: Vec<String> = self.engine.deletions.iter().cloned().collect();
        deletions.sort();
        MergeUnit {
            tx: self.tx_tag.clone(),
            doc_count: documents.len(),
            documents,
            deletions,
        }
    }

    fn fire_callback(&mut self, remaining: usize, error: Option<&Error>) {
        if self.callback_fired {
            return;
        }
        self.callback_fired = true;
        if let Some(callback) = &self.callback {
            callback.on_index_completed(self.engine.main.store(), remaining, error);
        }
    }

    // Durable prepared state: length-prefixed bincode with a trailing crc

    fn prepared_delta_path(&self) -> PathBuf {
        self.config
            .storage_path
            .join(format!("delta-{}.bin", self.tx_tag))
    }

    fn save_prepared_delta(&self) -> Result<()> {
        fs::create_dir_all(&self.config.storage_path)?;
        let unit = self.build_merge_unit();
        let data = bincode::serialize(&unit)?;
        let checksum = crc32fast::hash(&data);
        let mut file = fs::File::create(self.prepared_delta_path())?;
        file.write_all(&(data.len() as u32).to_le_bytes())?;
        file.write_all(&data)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn remove_prepared_delta(&self) {
        let path = self.prepared_delta_path();
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    // Search over this unit of work's view

    /// Run a compiled query against current state: main with this unit's
    /// deletions applied and the delta overlaid.
    pub fn search_current(&self, query: &PrimitiveQuery) -> Result<Vec<Document>> {
        let snapshot = self.engine.main.snapshot();
        let view = View::current(&snapshot, &self.engine.deletions, &self.engine.delta);
        Ok(matcher::execute(&view, query)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn delta_doc_count(&self) -> usize {
        self.engine.doc_count()
    }
}

/// Run a compiled query against committed-only state.
pub fn search_committed(main: &MainIndex, query: &PrimitiveQuery) -> Result<Vec<Document>> {
    let snapshot = main.snapshot();
    let view = View::committed(&snapshot);
    Ok(matcher::execute(&view, query)?
        .into_iter()
        .cloned()
        .collect())
}

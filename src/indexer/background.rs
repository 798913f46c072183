use std::sync::Arc;
use tracing::{debug, info};
use crate::core::config::IndexerConfig;
use crate::core::error::Result;
use crate::core::types::NodeRef;
use crate::document::builder::DocumentBuilder;
use crate::document::fields::{FIELD_FTSSTATUS, FIELD_ID, FTS_STATUS_DIRTY, FTS_STATUS_NEW};
use crate::index::store::MainIndex;
use crate::index::view::View;
use crate::indexer::transaction::{Indexer, IndexingCallback};
use crate::repo::content::ContentService;
use crate::repo::dictionary::Dictionary;
use crate::repo::node::RepositoryReader;

/// Finds committed documents flagged for deferred indexing and reprocesses
/// them in bounded batches. Runs as its own serialized unit of work; it is
/// the background work a transactional commit signalled for.
pub struct BackgroundWorker {
    pub main: Arc<MainIndex>,
    pub repo: Arc<dyn RepositoryReader>,
    pub dictionary: Arc<dyn Dictionary>,
    pub content: Arc<dyn ContentService>,
    pub config: IndexerConfig,
    pub callback: Option<Arc<dyn IndexingCallback>>,
}

impl BackgroundWorker {
    /// One catch-up pass. Returns the count of documents still outstanding
    /// after this batch.
    pub fn process(&self) -> Result<usize> {
        let outstanding = self.find_outstanding();
        if outstanding.is_empty() {
            return Ok(0);
        }
        let batch_size = self.config.background_batch_size.min(outstanding.len());
        let remaining = outstanding.len() - batch_size;
        debug!(
            store = %self.main.store(),
            outstanding = outstanding.len(),
            batch = batch_size,
            "catch-up pass"
        );

        let builder = DocumentBuilder::new(
            self.repo.clone(),
            self.dictionary.clone(),
            self.content.clone(),
            self.config.clone(),
        );
        let mut indexer = Indexer::new(self.main.clone(), builder, self.config.clone());
        if let Some(callback) = &self.callback {
            indexer.set_callback(callback.clone());
        }
        for node in outstanding.into_iter().take(batch_size) {
            indexer.background_reindex(&node)?;
        }
        indexer.set_remaining_work(remaining);
        indexer.commit()?;

        info!(store = %self.main.store(), remaining, "catch-up batch committed");
        Ok(remaining)
    }

    /// Committed documents whose full-text state is New or Dirty.
    fn find_outstanding(&self) -> Vec<NodeRef> {
        let snapshot = self.main.snapshot();
        let view = View::committed(&snapshot);
        let mut nodes = Vec::new();
        for status in [FTS_STATUS_NEW, FTS_STATUS_DIRTY] {
            for document in view.term_doc_refs(FIELD_FTSSTATUS, status) {
                if let Some(id) = document.get(FIELD_ID) {
                    if let Ok(node) = NodeRef::parse(id) {
                        nodes.push(node);
                    }
                }
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.dedup();
        nodes
    }
}

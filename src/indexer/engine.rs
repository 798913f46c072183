use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use crate::core::error::Result;
use crate::core::types::NodeRef;
use crate::document::builder::DocumentBuilder;
use crate::document::fields::{FIELD_ANCESTOR, FIELD_ID, FIELD_ISROOT, FIELD_PARENT, FIELD_PRIMARYPARENT, MARKER_TRUE};
use crate::index::store::{Generation, MainIndex};
use crate::indexer::command::{Action, Command};

/// Insertion-ordered set of identities.
#[derive(Debug, Default)]
struct OrderedIds {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedIds {
    fn add(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.order.push(id.to_string());
        }
    }

    fn remove(&mut self, id: &str) {
        if self.seen.remove(id) {
            self.order.retain(|existing| existing != id);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}

/// Identities removed by one delete resolution: the subtree physically
/// deleted, and the pointer-holders whose documents were invalidated and
/// need rebuilding.
#[derive(Debug, Default)]
struct DeleteResult {
    deleted: OrderedIds,
    reattach: OrderedIds,
}

/// Resolves queued commands against the current delta+main state, computing
/// cascading side effects and rebuilding affected entities into the delta
/// generation.
pub struct MutationEngine {
    pub delta: Generation,
    pub main: Arc<MainIndex>,
    pub builder: DocumentBuilder,
    /// Identities whose committed documents are masked by this unit of work.
    pub deletions: HashSet<String>,
    /// Identities left with deferred (non-atomic) work.
    pub deferred: HashSet<String>,
    pub tx_tag: String,
    /// Background catch-up pass: index every property inline.
    pub index_all: bool,
}

impl MutationEngine {
    pub fn new(main: Arc<MainIndex>, builder: DocumentBuilder, tx_tag: String) -> Self {
        MutationEngine {
            delta: Generation::new(),
            main,
            builder,
            deletions: HashSet::new(),
            deferred: HashSet::new(),
            tx_tag,
            index_all: false,
        }
    }

    /// Drain the command list against current delta+main readers and rebuild
    /// every affected entity into the delta generation.
    pub fn flush(&mut self, commands: Vec<Command>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let main_snapshot = self.main.snapshot();
        let mut for_index = OrderedIds::default();

        for command in commands {
            let id = command.node.to_string();
            match command.action {
                Action::Index => {
                    for_index.add(&id);
                }
                Action::Reindex | Action::CascadeReindex => {
                    let cascade = command.action == Action::CascadeReindex;
                    let result = self.delete_impl(&main_snapshot, &id, cascade, false);
                    // At most one pending add per identity
                    for affected in result.deleted.iter().chain(result.reattach.iter()) {
                        for_index.remove(affected);
                        for_index.add(affected);
                    }
                }
                Action::Delete => {
                    let result = self.delete_impl(&main_snapshot, &id, true, true);
                    // The deleted subtree is not re-inserted as-is; holders
                    // of primary and reference pointers are demoted to
                    // ancestor fix-up reindexing. Entities the repository no
                    // longer knows drop out at rebuild time.
                    for gone in result.deleted.iter() {
                        for_index.remove(gone);
                    }
                    for holder in result.reattach.iter() {
                        for_index.remove(holder);
                        for_index.add(holder);
                    }
                }
            }
        }

        self.index_nodes(&main_snapshot, for_index)
    }

    /// Remove the documents of an identity and, when cascading, of every
    /// descendant reachable through the ANCESTOR field, across both the
    /// delta and main generations; then invalidate documents holding primary
    /// or reference pointers at anything removed. With `demote_children`,
    /// pointer-holders inside the removed subtree are reported for reindex
    /// too, instead of staying deleted.
    fn delete_impl(
        &mut self,
        main: &Generation,
        id: &str,
        cascade: bool,
        demote_children: bool,
    ) -> DeleteResult {
        let mut result = DeleteResult::default();

        // Subtree on the delta generation
        let mut delta_ids = vec![id.to_string()];
        if cascade {
            for doc in self.delta.term_docs(FIELD_ANCESTOR, id) {
                if let Some(document) = self.delta.doc(doc) {
                    if let Some(descendant) = document.get(FIELD_ID) {
                        delta_ids.push(descendant.to_string());
                    }
                }
            }
        }
        for delta_id in &delta_ids {
            if !self.delta.delete_by_term(FIELD_ID, delta_id).is_empty() {
                result.deleted.add(delta_id);
            }
        }

        // Subtree on the committed generation, masked rather than mutated
        let mut main_ids = vec![id.to_string()];
        if cascade {
            for doc in main.term_docs(FIELD_ANCESTOR, id) {
                if let Some(document) = main.doc(doc) {
                    if let Some(descendant) = document.get(FIELD_ID) {
                        main_ids.push(descendant.to_string());
                    }
                }
            }
        }
        for main_id in main_ids {
            if self.deletions.contains(&main_id) {
                continue;
            }
            if !main.term_docs(FIELD_ID, &main_id).is_empty() {
                self.deletions.insert(main_id.clone());
                result.deleted.add(&main_id);
            }
        }
        result.deleted.add(id);
        self.deletions.insert(id.to_string());

        // Pointer fix-up: anything that pointed at a removed document
        let removed: Vec<String> = result.deleted.iter().cloned().collect();
        for gone in &removed {
            for field in [FIELD_PRIMARYPARENT, FIELD_PARENT] {
                let delta_holders: Vec<String> = self
                    .delta
                    .term_docs(field, gone)
                    .into_iter()
                    .filter_map(|doc| self.delta.doc(doc))
                    .filter_map(|document| document.get(FIELD_ID))
                    .map(|holder| holder.to_string())
                    .collect();
                for holder in delta_holders {
                    if !result.deleted.contains(&holder) {
                        self.delta.delete_by_term(FIELD_ID, &holder);
                        self.deletions.insert(holder.clone());
                        result.reattach.add(&holder);
                    } else if demote_children && holder != id {
                        result.reattach.add(&holder);
                    }
                }
                for doc in main.term_docs(field, gone) {
                    let Some(document) = main.doc(doc) else { continue };
                    let Some(holder) = document.get(FIELD_ID) else { continue };
                    if result.deleted.contains(holder) {
                        if demote_children && holder != id {
                            result.reattach.add(holder);
                        }
                    } else if !self.deletions.contains(holder) {
                        self.deletions.insert(holder.to_string());
                        result.reattach.add(holder);
                    }
                }
            }
        }

        result
    }

    /// Rebuild each identity through the field mapper into the delta
    /// generation. Identities the repository no longer knows are skipped.
    fn index_nodes(&mut self, main: &Generation, for_index: OrderedIds) -> Result<()> {
        for id in for_index.iter() {
            let node = NodeRef::parse(id)?;
            if !self.builder.repo.exists(&node) {
                debug!(node = %node, "entity gone from repository, not rebuilt");
                continue;
            }
            if self.builder.repo.get_primary_parent(&node)?.is_none() {
                // A physical root can only be replaced, never duplicated
                self.purge_root_documents(main);
            }
            let is_new = !self.deletions.contains(id);
            let built =
                self.builder
                    .build_documents(&node, is_new, self.index_all, true, &self.tx_tag)?;
            if built.atomic {
                self.deferred.remove(id);
            } else {
                self.deferred.insert(id.clone());
            }
            for document in built.documents {
                self.delta.add_document(document);
            }
        }
        Ok(())
    }

    fn purge_root_documents(&mut self, main: &Generation) {
        let delta_roots: Vec<String> = self
            .delta
            .term_docs(FIELD_ISROOT, MARKER_TRUE)
            .into_iter()
            .filter_map(|doc| self.delta.doc(doc))
            .filter_map(|document| document.get(FIELD_ID))
            .map(|id| id.to_string())
            .collect();
        for id in delta_roots {
            self.delta.delete_by_term(FIELD_ID, &id);
            self.deletions.insert(id);
        }
        for doc in main.term_docs(FIELD_ISROOT, MARKER_TRUE) {
            if let Some(id) = main.doc(doc).and_then(|d| d.get(FIELD_ID)) {
                self.deletions.insert(id.to_string());
            }
        }
    }

    /// Discard all uncommitted work.
    pub fn discard(&mut self) {
        self.delta = Generation::new();
        self.deletions.clear();
        self.deferred.clear();
    }

    pub fn doc_count(&self) -> usize {
        self.delta.doc_count()
    }
}

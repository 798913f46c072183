use std::sync::Arc;
use parking_lot::Mutex;
use tempfile::TempDir;

use arborsearch::core::config::IndexerConfig;
use arborsearch::core::error::ErrorKind;
use arborsearch::core::types::{ContentData, NodeRef, PropertyValue, QName, StoreRef};
use arborsearch::document::builder::DocumentBuilder;
use arborsearch::document::fields::{
    FIELD_FTSSTATUS, FIELD_ID, FIELD_PRIMARYPARENT, FTS_STATUS_CLEAN, FTS_STATUS_NEW,
    SENTINEL_NO_TRANSFORMER, mimetype_field, property_field,
};
use arborsearch::index::store::MainIndex;
use arborsearch::indexer::background::BackgroundWorker;
use arborsearch::indexer::transaction::{
    FtsScheduler, Indexer, IndexerStatus, IndexingCallback, search_committed,
};
use arborsearch::query::ast::PrimitiveQuery;
use arborsearch::repo::content::MemoryContentService;
use arborsearch::repo::dictionary::{
    DataType, MemoryDictionary, PropertyDefinition, TokenisationMode, TypeDefinition,
};
use arborsearch::repo::node::MemoryRepository;

const NS: &str = "urn:arbor:content";

fn qn(local: &str) -> QName {
    QName::new(NS, local)
}

struct Fixture {
    repo: Arc<MemoryRepository>,
    dictionary: Arc<MemoryDictionary>,
    content: Arc<MemoryContentService>,
    main: Arc<MainIndex>,
    config: IndexerConfig,
    root: NodeRef,
    _tmp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = StoreRef::new("workspace", "main");
        let repo = Arc::new(MemoryRepository::new(store.clone()));
        let dictionary = Arc::new(MemoryDictionary::new());
        dictionary.register_type(TypeDefinition {
            qname: qn("folder"),
            parent: None,
            is_container: true,
            included_in_super_query: true,
        });
        dictionary.register_type(TypeDefinition {
            qname: qn("document"),
            parent: None,
            is_container: false,
            included_in_super_query: true,
        });
        dictionary.register_property(PropertyDefinition {
            qname: qn("title"),
            data_type: DataType::Text,
            stored: true,
            indexed: true,
            tokenisation: TokenisationMode::Both,
            atomic: true,
            container_class: qn("document"),
            is_identifier: false,
        });
        dictionary.register_property(PropertyDefinition {
            qname: qn("body"),
            data_type: DataType::Content,
            stored: true,
            indexed: true,
            tokenisation: TokenisationMode::True,
            atomic: false,
            container_class: qn("document"),
            is_identifier: false,
        });
        let root = repo.add_root("root", qn("folder"));
        let mut config = IndexerConfig::default();
        config.storage_path = tmp.path().to_path_buf();
        Fixture {
            repo,
            dictionary,
            content: Arc::new(MemoryContentService::new()),
            main: Arc::new(MainIndex::new(store)),
            config,
            root,
            _tmp: tmp,
        }
    }

    fn builder(&self) -> DocumentBuilder {
        DocumentBuilder::new(
            self.repo.clone(),
            self.dictionary.clone(),
            self.content.clone(),
            self.config.clone(),
        )
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(self.main.clone(), self.builder(), self.config.clone())
    }

    fn committed_ids(&self, field: &str, value: &str) -> Vec<String> {
        search_committed(&self.main, &PrimitiveQuery::term(field, value))
            .unwrap()
            .into_iter()
            .filter_map(|d| d.get(FIELD_ID).map(|s| s.to_string()))
            .collect()
    }
}

#[test]
fn index_then_delete_round_trip() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));

    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.flush_pending().unwrap();
    indexer.commit().unwrap();
    assert_eq!(indexer.status(), IndexerStatus::Committed);
    assert_eq!(fx.committed_ids(FIELD_ID, &a.to_string()), vec![a.to_string()]);

    fx.repo.delete_node(&a);
    let mut indexer = fx.indexer();
    indexer.delete(&a).unwrap();
    indexer.flush_pending().unwrap();
    assert!(indexer.deletions().contains(&a.to_string()));
    indexer.commit().unwrap();
    assert!(fx.committed_ids(FIELD_ID, &a.to_string()).is_empty());
}

#[test]
fn cascading_delete_removes_exactly_the_subtree() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("folder"), &fx.root, qn("contains"), qn("a"));
    let b = fx.repo.add_node("b", qn("document"), &a, qn("contains"), qn("b"));
    let c = fx.repo.add_node("c", qn("document"), &a, qn("contains"), qn("c"));
    let other = fx
        .repo
        .add_node("other", qn("document"), &fx.root, qn("contains"), qn("other"));

    let mut indexer = fx.indexer();
    for node in [&a, &b, &c, &other] {
        indexer.index(node).unwrap();
    }
    indexer.commit().unwrap();

    // Delete the container subtree in the repository, then in the index
    for node in [&c, &b, &a] {
        fx.repo.delete_node(node);
    }
    let mut indexer = fx.indexer();
    indexer.delete(&a).unwrap();
    indexer.commit().unwrap();

    for gone in [&a, &b, &c] {
        assert!(fx.committed_ids(FIELD_ID, &gone.to_string()).is_empty());
    }
    // The sibling outside the subtree survives
    assert_eq!(
        fx.committed_ids(FIELD_ID, &other.to_string()),
        vec![other.to_string()]
    );
}

#[test]
fn cascade_reindex_rebuilds_the_whole_subtree() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("folder"), &fx.root, qn("contains"), qn("a"));
    let b = fx.repo.add_node("b", qn("document"), &a, qn("contains"), qn("b"));
    let c = fx.repo.add_node("c", qn("document"), &a, qn("contains"), qn("c"));

    let mut indexer = fx.indexer();
    for node in [&a, &b, &c] {
        indexer.index(node).unwrap();
    }
    indexer.commit().unwrap();

    let mut indexer = fx.indexer();
    indexer.cascade_reindex(&a).unwrap();
    indexer.flush_pending().unwrap();
    // The rebuilt delta holds fresh documents for a, b and c; the container
    // contributes a node document and a directory document
    for node in [&a, &b, &c] {
        let hits = indexer
            .search_current(&PrimitiveQuery::term(FIELD_ID, &node.to_string()))
            .unwrap();
        assert!(!hits.is_empty(), "expected live documents for {}", node);
    }
    indexer.commit().unwrap();
}

#[test]
fn orphaned_child_is_reindexed_when_its_parent_goes() {
    let fx = Fixture::new();
    let p = fx
        .repo
        .add_node("p", qn("folder"), &fx.root, qn("contains"), qn("p"));
    let c = fx.repo.add_node("c", qn("document"), &p, qn("contains"), qn("c"));

    let mut indexer = fx.indexer();
    indexer.index(&p).unwrap();
    indexer.index(&c).unwrap();
    indexer.commit().unwrap();

    // The repository moves c under the root, then p disappears
    fx.repo.move_node(&c, &fx.root, qn("c"));
    fx.repo.delete_node(&p);

    let mut indexer = fx.indexer();
    indexer.delete(&p).unwrap();
    indexer.commit().unwrap();

    assert!(fx.committed_ids(FIELD_ID, &p.to_string()).is_empty());
    // c was never explicitly enqueued, yet it was rebuilt with its new parent
    let rebuilt = fx.committed_ids(FIELD_PRIMARYPARENT, &fx.root.to_string());
    assert!(rebuilt.contains(&c.to_string()));
}

#[test]
fn lifecycle_rejects_out_of_order_transitions() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));

    // prepare before any work is not a legal transition
    let mut indexer = fx.indexer();
    let err = indexer.prepare().unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert!(err.context.contains("UNKNOWN"));

    // after commit the unit of work is terminal
    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.commit().unwrap();
    let err = indexer.index(&a).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert!(err.context.contains("COMMITTED"));
    let err = indexer.rollback().unwrap_err();
    assert!(err.context.contains("COMMITTED"));

    // marked-rollback blocks further mutation but allows rollback
    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.set_rollback_only().unwrap();
    let err = indexer.index(&a).unwrap_err();
    assert!(err.context.contains("MARKED_ROLLBACK"));
    indexer.rollback().unwrap();
    assert_eq!(indexer.status(), IndexerStatus::RolledBack);
    let err = indexer.set_rollback_only().unwrap_err();
    assert!(err.context.contains("ROLLEDBACK"));
}

#[test]
fn rollback_discards_all_delta_work() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));

    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.flush_pending().unwrap();
    assert!(indexer.delta_doc_count() > 0);
    indexer.rollback().unwrap();
    assert_eq!(indexer.delta_doc_count(), 0);
    assert!(fx.committed_ids(FIELD_ID, &a.to_string()).is_empty());
}

struct RecordingCallback(Mutex<Vec<usize>>);

impl IndexingCallback for RecordingCallback {
    fn on_index_completed(
        &self,
        _store: &StoreRef,
        remaining: usize,
        _error: Option<&arborsearch::core::error::Error>,
    ) {
        self.0.lock().push(remaining);
    }
}

struct RecordingScheduler(Mutex<Vec<StoreRef>>);

impl FtsScheduler for RecordingScheduler {
    fn requires_index(&self, store: &StoreRef) {
        self.0.lock().push(store.clone());
    }
}

#[test]
fn transactional_and_background_work_do_not_mix() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));

    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    let err = indexer.background_reindex(&a).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
    indexer.rollback().unwrap();
}

#[test]
fn content_without_transformer_degrades_to_sentinel() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));
    let body = qn("body");
    let data = ContentData {
        content_url: "store://a".to_string(),
        mimetype: "application/msword".to_string(),
        size: 10,
        encoding: "utf-8".to_string(),
        locale: "en".to_string(),
    };
    fx.repo
        .set_property(&a, body.clone(), PropertyValue::Content(data.clone()));
    fx.content.put_content(&a, &body, data, b"not text".to_vec());

    // Reprocess everything inline so the body path runs synchronously
    let worker_config = fx.config.clone();
    let builder = DocumentBuilder::new(
        fx.repo.clone(),
        fx.dictionary.clone(),
        fx.content.clone(),
        worker_config,
    );
    let built = builder
        .build_documents(&a, true, true, true, "tx-test")
        .unwrap();
    let doc = &built.documents[0];
    assert_eq!(
        doc.get_all(&property_field(&body)),
        vec![SENTINEL_NO_TRANSFORMER]
    );
    // Metadata stays searchable
    assert_eq!(doc.get(&mimetype_field(&body)), Some("application/msword"));

    // And the commit path accepts it
    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.commit().unwrap();
    assert_eq!(fx.committed_ids(FIELD_ID, &a.to_string()), vec![a.to_string()]);
}

#[test]
fn deferred_content_is_caught_up_by_the_background_worker() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));
    let body = qn("body");
    let data = ContentData {
        content_url: "store://a".to_string(),
        mimetype: "text/plain".to_string(),
        size: 16,
        encoding: "utf-8".to_string(),
        locale: "en".to_string(),
    };
    fx.repo
        .set_property(&a, body.clone(), PropertyValue::Content(data.clone()));
    fx.content
        .put_content(&a, &body, data, b"searchable words".to_vec());

    let callback = Arc::new(RecordingCallback(Mutex::new(Vec::new())));
    let scheduler = Arc::new(RecordingScheduler(Mutex::new(Vec::new())));
    let mut indexer = fx.indexer();
    indexer.set_callback(callback.clone());
    indexer.set_scheduler(scheduler.clone());
    indexer.index(&a).unwrap();
    indexer.commit().unwrap();

    // The content property is non-atomic: one entity left for catch-up,
    // and the background scheduler was signalled for the store
    assert_eq!(callback.0.lock().clone(), vec![1]);
    assert_eq!(scheduler.0.lock().len(), 1);
    assert_eq!(
        fx.committed_ids(FIELD_FTSSTATUS, FTS_STATUS_NEW),
        vec![a.to_string()]
    );

    let worker = BackgroundWorker {
        main: fx.main.clone(),
        repo: fx.repo.clone(),
        dictionary: fx.dictionary.clone(),
        content: fx.content.clone(),
        config: fx.config.clone(),
        callback: None,
    };
    let remaining = worker.process().unwrap();
    assert_eq!(remaining, 0);

    assert_eq!(
        fx.committed_ids(FIELD_FTSSTATUS, FTS_STATUS_CLEAN),
        vec![a.to_string()]
    );
    // The body text is now searchable
    assert_eq!(
        fx.committed_ids(&property_field(&body), "searchable"),
        vec![a.to_string()]
    );
}

#[test]
fn snapshot_diff_queues_the_right_commands() {
    let fx = Fixture::new();
    let a = fx
        .repo
        .add_node("a", qn("document"), &fx.root, qn("contains"), qn("a"));
    let b = fx.repo.add_node("b", qn("document"), &fx.root, qn("contains"), qn("b"));

    let mut indexer = fx.indexer();
    indexer.index(&a).unwrap();
    indexer.index(&b).unwrap();
    indexer.commit().unwrap();

    // Version 2 drops b and keeps a
    fx.repo.record_snapshot(
        1,
        vec![("/a".into(), a.clone()), ("/b".into(), b.clone())],
    );
    fx.repo.record_snapshot(2, vec![("/a".into(), a.clone())]);
    fx.repo.delete_node(&b);

    let mut indexer = fx.indexer();
    indexer.index_snapshot_diff(1, 2).unwrap();
    indexer.commit().unwrap();

    assert_eq!(fx.committed_ids(FIELD_ID, &a.to_string()), vec![a.to_string()]);
    assert!(fx.committed_ids(FIELD_ID, &b.to_string()).is_empty());
}

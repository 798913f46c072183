use std::sync::Arc;
use tempfile::TempDir;

use arborsearch::core::config::IndexerConfig;
use arborsearch::core::error::ErrorKind;
use arborsearch::core::types::{NodeRef, PropertyValue, QName, StoreRef};
use arborsearch::document::builder::DocumentBuilder;
use arborsearch::document::fields::FIELD_ID;
use arborsearch::index::store::MainIndex;
use arborsearch::index::view::View;
use arborsearch::indexer::transaction::Indexer;
use arborsearch::query::ast::{AnalysisMode, PrimitiveQuery, QueryNode};
use arborsearch::query::compiler::{NamespaceResolver, QueryCompiler};
use arborsearch::query::matcher;
use arborsearch::query::parser::QueryParser;
use arborsearch::repo::content::MemoryContentService;
use arborsearch::repo::dictionary::{
    AspectDefinition, DataType, MemoryDictionary, PropertyDefinition, TokenisationMode,
    TypeDefinition,
};
use arborsearch::repo::node::MemoryRepository;

const NS: &str = "urn:arbor:content";

fn qn(local: &str) -> QName {
    QName::new(NS, local)
}

struct Fixture {
    repo: Arc<MemoryRepository>,
    dictionary: Arc<MemoryDictionary>,
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
            qname: qn("content"),
            parent: None,
            is_container: false,
            included_in_super_query: true,
        });
        dictionary.register_type(TypeDefinition {
            qname: qn("note"),
            parent: Some(qn("content")),
            is_container: false,
            included_in_super_query: true,
        });
        dictionary.register_type(TypeDefinition {
            qname: qn("hidden"),
            parent: Some(qn("content")),
            is_container: false,
            included_in_super_query: false,
        });
        dictionary.register_type(TypeDefinition {
            qname: qn("folder"),
            parent: None,
            is_container: true,
            included_in_super_query: true,
        });
        dictionary.register_aspect(AspectDefinition {
            qname: qn("tagged"),
            parent: None,
            included_in_super_query: true,
        });
        dictionary.register_property(PropertyDefinition {
            qname: qn("title"),
            data_type: DataType::Text,
            stored: true,
            indexed: true,
            tokenisation: TokenisationMode::Both,
            atomic: true,
            container_class: qn("content"),
            is_identifier: false,
        });
        dictionary.register_property(PropertyDefinition {
            qname: qn("label"),
            data_type: DataType::MlText,
            stored: true,
            indexed: true,
            tokenisation: TokenisationMode::True,
            atomic: true,
            container_class: qn("content"),
            is_identifier: false,
        });
        dictionary.register_property(PropertyDefinition {
            qname: qn("when"),
            data_type: DataType::DateTime,
            stored: true,
            indexed: true,
            tokenisation: TokenisationMode::False,
            atomic: true,
            container_class: qn("content"),
            is_identifier: false,
        });

        let root = repo.add_root("root", qn("folder"));
        let mut config = IndexerConfig::default();
        config.storage_path = tmp.path().to_path_buf();
        Fixture {
            repo,
            dictionary,
            main: Arc::new(MainIndex::new(store)),
            config,
            root,
            _tmp: tmp,
        }
    }

    fn commit_all(&self, nodes: &[&NodeRef]) {
        let builder = DocumentBuilder::new(
            self.repo.clone(),
            self.dictionary.clone(),
            Arc::new(MemoryContentService::new()),
            self.config.clone(),
        );
        let mut indexer = Indexer::new(self.main.clone(), builder, self.config.clone());
        for node in nodes {
            indexer.index(node).unwrap();
        }
        indexer.commit().unwrap();
    }

    fn compiler(&self) -> QueryCompiler {
        let mut namespaces = NamespaceResolver::new();
        namespaces.register("cm", NS);
        QueryCompiler::new(self.dictionary.clone(), namespaces, self.config.clone())
    }

    /// Parse, compile and run a query against committed state.
    fn search(&self, query: &str) -> Vec<String> {
        let node = QueryParser::new().parse(query).unwrap();
        self.search_node(&node)
    }

    fn search_node(&self, node: &QueryNode) -> Vec<String> {
        let snapshot = self.main.snapshot();
        let view = View::committed(&snapshot);
        let compiled = self.compiler().compile(node, &view).unwrap();
        let mut ids: Vec<String> = matcher::execute(&view, &compiled)
            .unwrap()
            .into_iter()
            .filter_map(|d| d.get(FIELD_ID))
            .map(|id| NodeRef::parse(id).unwrap().id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn compile_err(&self, query: &str) -> ErrorKind {
        let node = QueryParser::new().parse(query).unwrap();
        let snapshot = self.main.snapshot();
        let view = View::committed(&snapshot);
        self.compiler().compile(&node, &view).unwrap_err().kind
    }
}

fn seeded() -> (Fixture, NodeRef, NodeRef) {
    let fx = Fixture::new();
    let docs = fx
        .repo
        .add_node("docs", qn("folder"), &fx.root, qn("contains"), qn("docs"));
    let hello = fx
        .repo
        .add_node("hello", qn("note"), &docs, qn("contains"), qn("hello"));
    fx.repo.set_property(
        &hello,
        qn("title"),
        PropertyValue::Text("Hello".to_string()),
    );
    fx.repo.set_property(
        &hello,
        qn("label"),
        PropertyValue::MlText(vec![
            ("en".to_string(), "Greeting Words".to_string()),
            ("fr".to_string(), "Salutation".to_string()),
        ]),
    );
    fx.repo.set_property(
        &hello,
        qn("when"),
        PropertyValue::Text("2024-03-05T09:00:00.000".to_string()),
    );
    let plain = fx
        .repo
        .add_node("plain", qn("content"), &docs, qn("contains"), qn("plain"));
    fx.repo.set_property(
        &plain,
        qn("title"),
        PropertyValue::Text("Other Document".to_string()),
    );
    fx.repo.set_property(
        &plain,
        qn("when"),
        PropertyValue::Text("2025-07-01T12:00:00.000".to_string()),
    );
    let root = fx.root.clone();
    fx.commit_all(&[&root, &docs, &hello, &plain]);
    (fx, hello, plain)
}

#[test]
fn both_tokenised_text_matches_exact_and_folded() {
    let (fx, _, _) = seeded();
    // Identifier mode against the exact stored literal
    assert_eq!(fx.search("@cm\\:title:=Hello"), vec!["hello"]);
    // Default tokenised mode case-folds
    assert_eq!(fx.search("@cm\\:title:hello"), vec!["hello"]);
    // A different value does not leak through
    assert!(fx.search("@cm\\:title:=hello").is_empty());
}

#[test]
fn multilingual_text_is_locale_scoped() {
    let (fx, _, _) = seeded();
    assert_eq!(fx.search("@cm\\:label:greeting"), vec!["hello"]);

    // The French value only matches when the search scope includes fr
    let node = QueryParser::new().parse("@cm\\:label:salutation").unwrap();
    assert!(fx.search_node(&node).is_empty());

    let snapshot = fx.main.snapshot();
    let view = View::committed(&snapshot);
    let mut compiler = fx.compiler();
    compiler.locales = vec!["fr".to_string()];
    let compiled = compiler.compile(&node, &view).unwrap();
    let hits = matcher::execute(&view, &compiled).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn type_queries_expand_subtypes_that_opt_in() {
    let (fx, _, _) = seeded();
    // note inherits from content and opts in; hidden opts out
    let hits = fx.search("TYPE:cm\\:content");
    assert_eq!(hits, vec!["hello", "plain"]);
    assert_eq!(fx.search("EXACTTYPE:cm\\:content"), vec!["plain"]);
}

#[test]
fn aspect_and_qname_queries_match_structural_fields() {
    let fx = Fixture::new();
    let docs = fx
        .repo
        .add_node("docs", qn("folder"), &fx.root, qn("contains"), qn("docs"));
    let tagged = fx
        .repo
        .add_node("tagged", qn("note"), &docs, qn("contains"), qn("tagged"));
    fx.repo.add_aspect(&tagged, qn("tagged"));
    let bare = fx
        .repo
        .add_node("bare", qn("note"), &docs, qn("contains"), qn("bare"));
    let root = fx.root.clone();
    fx.commit_all(&[&root, &docs, &tagged, &bare]);

    assert_eq!(fx.search("ASPECT:cm\\:tagged"), vec!["tagged"]);
    assert!(fx.search("ASPECT:cm\\:tagged AND @cm\\:title:anything").is_empty());
    assert_eq!(fx.search("QNAME:cm\\:bare"), vec!["bare"]);
}

#[test]
fn path_queries_walk_the_hierarchy() {
    let (fx, _, _) = seeded();
    assert_eq!(
        fx.search("PATH:/cm\\:docs/cm\\:hello"),
        vec!["hello"]
    );
    // //* selects children of descendant-or-self, not the anchor itself
    let mut all_under_docs = fx.search("PATH:/cm\\:docs//*");
    all_under_docs.sort();
    assert_eq!(all_under_docs, vec!["hello", "plain"]);
    assert_eq!(fx.search("PATH:/cm\\:*/cm\\:plain"), vec!["plain"]);
}

#[test]
fn date_ranges_decompose_and_match() {
    let (fx, _, _) = seeded();
    assert_eq!(
        fx.search("@cm\\:when:[2024-01-01 TO 2024-12-31]"),
        vec!["hello"]
    );
    assert_eq!(
        fx.search("@cm\\:when:[2024-01-01 TO 2025-12-31]"),
        vec!["hello", "plain"]
    );
    assert!(fx.search("@cm\\:when:[2026-01-01 TO 2027-01-01]").is_empty());
}

#[test]
fn wildcards_expand_against_the_term_dictionary() {
    let (fx, _, _) = seeded();
    assert_eq!(fx.search("@cm\\:label:greet*"), vec!["hello"]);
    // Tokenised phrase from a quoted literal
    assert_eq!(fx.search("@cm\\:label:\"greeting words\""), vec!["hello"]);
    assert!(fx.search("@cm\\:label:\"words greeting\"").is_empty());
}

#[test]
fn presence_predicates_use_the_declared_owner() {
    let (fx, _, _) = seeded();
    // Every content-typed entity carrying a title
    let mut with_title = fx.search("ISNOTNULL:cm\\:title");
    with_title.sort();
    assert_eq!(with_title, vec!["hello", "plain"]);
    // label is only set on hello
    assert_eq!(fx.search("ISNULL:cm\\:label"), vec!["plain"]);
}

#[test]
fn case_functions_require_matching_case_literals() {
    let (fx, _, _) = seeded();
    assert_eq!(fx.search("@cm\\:title:upper(HELLO)"), vec!["hello"]);
    // Mixed-case literal can never match the single stored form
    assert!(fx.search("@cm\\:title:upper(Hello)").is_empty());
    assert_eq!(fx.search("@cm\\:title:lower(hello)"), vec!["hello"]);
}

#[test]
fn structural_and_boolean_composition() {
    let (fx, hello, _) = seeded();
    let id_query = format!("ID:{}", hello);
    assert_eq!(fx.search(&id_query), vec!["hello"]);

    assert_eq!(
        fx.search("TYPE:cm\\:content AND @cm\\:title:hello"),
        vec!["hello"]
    );
    let mut either = fx.search("@cm\\:title:hello OR @cm\\:title:document");
    either.sort();
    assert_eq!(either, vec!["hello", "plain"]);
    assert_eq!(
        fx.search("TYPE:cm\\:content AND NOT @cm\\:title:hello"),
        vec!["plain"]
    );
}

#[test]
fn invalid_queries_are_rejected_at_compile_time() {
    let (fx, _, _) = seeded();
    // Wildcard analysis on a date property
    assert_eq!(
        fx.compile_err("@cm\\:when:20*"),
        ErrorKind::UnsupportedQuery
    );
    // Unknown namespace prefix
    assert_eq!(fx.compile_err("TYPE:zz\\:thing"), ErrorKind::NotFound);
    // Case function on a tokenised-only field
    assert_eq!(
        fx.compile_err("@cm\\:label:upper(X)"),
        ErrorKind::UnsupportedQuery
    );
}

#[test]
fn ambiguous_case_insensitive_type_names_fail() {
    let (fx, _, _) = seeded();
    fx.dictionary.register_type(TypeDefinition {
        qname: qn("Note"),
        parent: None,
        is_container: false,
        included_in_super_query: true,
    });
    assert_eq!(fx.compile_err("TYPE:cm\\:NOTE"), ErrorKind::Ambiguous);
}

#[test]
fn round_trip_every_stored_scalar_is_findable() {
    let (fx, hello, _) = seeded();
    // Exact identifier query per stored text literal
    assert_eq!(fx.search("@cm\\:title:=Hello"), vec!["hello"]);
    // Date exact value in its canonical form
    assert_eq!(
        fx.search("@cm\\:when:2024-03-05T09:00:00.000"),
        vec!["hello"]
    );
    // Structural identity
    let compiled = PrimitiveQuery::term(FIELD_ID, &hello.to_string());
    let snapshot = fx.main.snapshot();
    let view = View::committed(&snapshot);
    assert_eq!(matcher::execute(&view, &compiled).unwrap().len(), 1);
}

#[test]
fn delta_overlay_is_visible_before_commit() {
    let fx = Fixture::new();
    let docs = fx
        .repo
        .add_node("docs", qn("folder"), &fx.root, qn("contains"), qn("docs"));
    let a = fx
        .repo
        .add_node("a", qn("note"), &docs, qn("contains"), qn("a"));
    let root = fx.root.clone();
    fx.commit_all(&[&root, &docs, &a]);

    let builder = DocumentBuilder::new(
        fx.repo.clone(),
        fx.dictionary.clone(),
        Arc::new(MemoryContentService::new()),
        fx.config.clone(),
    );
    let mut indexer = Indexer::new(fx.main.clone(), builder, fx.config.clone());
    let b = fx.repo.add_node("b", qn("note"), &docs, qn("contains"), qn("b"));
    indexer.index(&b).unwrap();
    indexer.flush_pending().unwrap();

    // Current state sees the uncommitted addition; committed state does not
    let current = indexer
        .search_current(&PrimitiveQuery::term(FIELD_ID, &b.to_string()))
        .unwrap();
    assert_eq!(current.len(), 1);
    let snapshot = fx.main.snapshot();
    let view = View::committed(&snapshot);
    assert!(matcher::execute(&view, &PrimitiveQuery::term(FIELD_ID, &b.to_string()))
        .unwrap()
        .is_empty());
    indexer.rollback().unwrap();
}

#[test]
fn analysis_mode_shapes_are_parsed_for_text_fields() {
    let (fx, _, _) = seeded();
    // Prefix form of an untokenised literal goes to the .sort variant
    let node = QueryNode::FieldQuery {
        field: Some("@cm:title".to_string()),
        text: "Hel".to_string(),
        mode: AnalysisMode::Prefix,
        function: None,
    };
    let snapshot = fx.main.snapshot();
    let view = View::committed(&snapshot);
    let compiled = fx.compiler().compile(&node, &view).unwrap();
    let hits = matcher::execute(&view, &compiled).unwrap();
    assert_eq!(hits.len(), 1);
}

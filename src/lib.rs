pub mod core;
pub mod repo;
pub mod analysis;
pub mod document;
pub mod index;
pub mod indexer;
pub mod query;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                        ARBORSEARCH STRUCT ARCHITECTURE                        │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── REPO LAYER ──────────────────────────────────┐
│  trait RepositoryReader   // properties, type, aspects, parents, paths       │
│  trait Dictionary         // property/type/aspect definitions, subtypes      │
│  trait ContentService     // content readers + mimetype transformers        │
│  MemoryRepository / MemoryDictionary / MemoryContentService                  │
└──────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── DOCUMENT LAYER ────────────────────────────────┐
│  ┌──────────────────────────┐   ┌──────────────────────────────────────┐    │
│  │ struct DocumentBuilder   │   │ struct Document                      │    │
│  │ • repo / dictionary /    │──▶│ • fields: Vec<Field>                 │    │
│  │   content / config       │   │   (ID, TX, TYPE, ASPECT, PARENT,     │    │
│  │ • build_documents()      │   │    QNAME, PATH, ANCESTOR, @prop...)  │    │
│  └──────────────────────────┘   └──────────────────────────────────────┘    │
│  PropertyIndexPolicy  // immutable store/index/tokenise/atomic per property  │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── INDEXER LAYER ────────────────────────────────┐
│  ┌───────────────┐  ┌──────────────────┐  ┌───────────────────────────────┐ │
│  │ CommandLog    │─▶│ MutationEngine   │─▶│ Indexer (unit of work)        │ │
│  │ • collapse /  │  │ • flush()        │  │ • UNKNOWN→ACTIVE→PREPARING→   │ │
│  │   purge rules │  │ • cascade delete │  │   PREPARED→COMMITTING→        │ │
│  │ • auto-flush  │  │ • orphan fix-up  │  │   COMMITTED (+ rollback arm)  │ │
│  └───────────────┘  └──────────────────┘  │ • prepare/commit/rollback     │ │
│  BackgroundWorker  // FTSSTATUS catch-up  └───────────────────────────────┘ │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── INDEX LAYER ─────────────────────────────────┐
│  Generation  // docs + postings + deleted bitmap (delta is owned, mutable)   │
│  MainIndex   // Arc-swapped committed snapshots, write-intent lock           │
│  View        // delta-over-masked-main or committed-only read snapshots     │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── QUERY LAYER ─────────────────────────────────┐
│  QueryParser (nom) ──▶ QueryNode AST ──▶ QueryCompiler ──▶ PrimitiveQuery    │
│  • path grammar (PATH/QNAME)   • type/aspect expansion   • locale variants   │
│  • date range decomposition    • wildcard term expansion • matcher::execute  │
└──────────────────────────────────────────────────────────────────────────────┘
*/

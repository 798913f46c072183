use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::analysis::tokenizer::StandardTokenizer;
use crate::core::error::Result;
use crate::core::types::StoreRef;
use crate::document::doc::Document;
use crate::document::fields::FIELD_ID;

/// One indexed term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub field: String,
    pub text: String,
}

impl Term {
    pub fn new(field: &str, text: &str) -> Self {
        Term {
            field: field.to_string(),
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,
    pub positions: Vec<u32>,
}

/// One index generation: documents with fields, term postings with
/// positions, and a deleted-document bitmap. The delta generation of a unit
/// of work is one of these owned mutably; the main generation is published
/// as an immutable snapshot behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    docs: Vec<Document>,
    deleted: RoaringBitmap,
    postings: HashMap<Term, Vec<Posting>>,
    tokenizer: StandardTokenizer,
}

impl Generation {
    pub fn new() -> Self {
        Generation {
            docs: Vec::new(),
            deleted: RoaringBitmap::new(),
            postings: HashMap::new(),
            tokenizer: StandardTokenizer::default(),
        }
    }

    pub fn add_document(&mut self, document: Document) -> u32 {
        let doc_id = self.docs.len() as u32;
        let mut next_position: HashMap<String, u32> = HashMap::new();
        for field in &document.fields {
            if !field.indexed {
                continue;
            }
            let base = next_position.entry(field.name.clone()).or_insert(0);
            if field.tokenised {
                let tokens = self.tokenizer.tokenize_value(&field.value);
                let mut consumed = 0;
                for token in tokens {
                    let position = *base + token.position;
                    consumed = consumed.max(token.position + 1);
                    Self::push_posting(
                        &mut self.postings,
                        Term::new(&field.name, &token.text),
                        doc_id,
                        position,
                    );
                }
                // Gap between successive values of the same field
                *base += consumed + 1;
            } else {
                Self::push_posting(
                    &mut self.postings,
                    Term::new(&field.name, &field.value),
                    doc_id,
                    *base,
                );
                *base += 1;
            }
        }
        self.docs.push(document);
        doc_id
    }

    fn push_posting(
        postings: &mut HashMap<Term, Vec<Posting>>,
        term: Term,
        doc: u32,
        position: u32,
    ) {
        let list = postings.entry(term).or_default();
        match list.last_mut() {
            Some(last) if last.doc == doc => last.positions.push(position),
            _ => list.push(Posting {
                doc,
                positions: vec![position],
            }),
        }
    }

    pub fn is_deleted(&self, doc: u32) -> bool {
        self.deleted.contains(doc)
    }

    pub fn delete_doc(&mut self, doc: u32) {
        self.deleted.insert(doc);
    }

    /// Live document by index.
    pub fn doc(&self, doc: u32) -> Option<&Document> {
        if self.deleted.contains(doc) {
            return None;
        }
        self.docs.get(doc as usize)
    }

    /// Live documents carrying the exact term.
    pub fn term_docs(&self, field: &str, text: &str) -> Vec<u32> {
        self.postings
            .get(&Term::new(field, text))
            .map(|list| {
                list.iter()
                    .map(|p| p.doc)
                    .filter(|d| !self.deleted.contains(*d))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Token positions of a term within one document.
    pub fn positions(&self, field: &str, text: &str, doc: u32) -> Option<&[u32]> {
        self.postings
            .get(&Term::new(field, text))
            .and_then(|list| list.iter().find(|p| p.doc == doc))
            .map(|p| p.positions.as_slice())
    }

    /// Delete every live document carrying the term; returns their indexes.
    pub fn delete_by_term(&mut self, field: &str, text: &str) -> Vec<u32> {
        let affected = self.term_docs(field, text);
        for doc in &affected {
            self.deleted.insert(*doc);
        }
        affected
    }

    pub fn live_docs(&self) -> impl Iterator<Item = (u32, &Document)> {
        self.docs
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u32, d))
            .filter(|(i, _)| !self.deleted.contains(*i))
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len() - self.deleted.len() as usize
    }

    /// Distinct terms of a field with at least one live posting.
    pub fn terms(&self, field: &str) -> Vec<&str> {
        self.postings
            .iter()
            .filter(|(term, list)| {
                term.field == field
                    && list.iter().any(|p| !self.deleted.contains(p.doc))
            })
            .map(|(term, _)| term.text.as_str())
            .collect()
    }
}

/// Work published from a committed delta into the main generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeUnit {
    pub tx: String,
    pub documents: Vec<Document>,
    pub deletions: Vec<String>,
    pub doc_count: usize,
}

/// The long-lived, shared index generation of one store. Merges are
/// serialized through the write-intent lock a unit of work holds for its
/// whole ACTIVE to COMMITTED span.
pub struct MainIndex {
    store: StoreRef,
    current: RwLock<Arc<Generation>>,
    write_intent: Arc<Mutex<()>>,
}

pub type WriteIntentGuard = ArcMutexGuard<RawMutex, ()>;

impl MainIndex {
    pub fn new(store: StoreRef) -> Self {
        MainIndex {
            store,
            current: RwLock::new(Arc::new(Generation::new())),
            write_intent: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// Immutable snapshot of the committed state.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.current.read().clone()
    }

    /// Serializes units of work over this store's identity space.
    pub fn lock_write_intent(&self) -> WriteIntentGuard {
        Mutex::lock_arc(&self.write_intent)
    }

    /// Apply a committed merge unit: mask deletions, overlay documents.
    pub fn publish(&self, unit: MergeUnit) -> Result<()> {
        let mut next = (**self.current.read()).clone();
        for id in &unit.deletions {
            next.delete_by_term(FIELD_ID, id);
        }
        for document in unit.documents {
            next.add_document(document);
        }
        debug!(
            store = %self.store,
            tx = %unit.tx,
            docs = unit.doc_count,
            deletions = unit.deletions.len(),
            "merge unit published"
        );
        *self.current.write() = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::doc::Field;

    fn doc_with_id(id: &str) -> Document {
        let mut doc = Document::new();
        doc.add(Field::untokenised(FIELD_ID, id.to_string()));
        doc.add(Field::tokenised("@text", format!("body of {}", id)));
        doc
    }

    #[test]
    fn add_and_delete_by_term() {
        let mut generation = Generation::new();
        generation.add_document(doc_with_id("a"));
        generation.add_document(doc_with_id("b"));
        assert_eq!(generation.doc_count(), 2);

        let removed = generation.delete_by_term(FIELD_ID, "a");
        assert_eq!(removed.len(), 1);
        assert_eq!(generation.doc_count(), 1);
        assert!(generation.term_docs(FIELD_ID, "a").is_empty());
        assert_eq!(generation.term_docs(FIELD_ID, "b").len(), 1);
    }

    #[test]
    fn tokenised_fields_have_positions() {
        let mut generation = Generation::new();
        let doc = generation.add_document(doc_with_id("a"));
        assert_eq!(generation.positions("@text", "body", doc), Some(&[0u32][..]));
        assert_eq!(generation.positions("@text", "a", doc), Some(&[2u32][..]));
    }

    #[test]
    fn published_units_mask_then_overlay() {
        let main = MainIndex::new(StoreRef::new("workspace", "main"));
        main.publish(MergeUnit {
            tx: "t1".into(),
            documents: vec![doc_with_id("a")],
            deletions: vec![],
            doc_count: 1,
        })
        .unwrap();
        main.publish(MergeUnit {
            tx: "t2".into(),
            documents: vec![doc_with_id("a")],
            deletions: vec!["a".into()],
            doc_count: 1,
        })
        .unwrap();

        let snapshot = main.snapshot();
        assert_eq!(snapshot.term_docs(FIELD_ID, "a").len(), 1);
        assert_eq!(snapshot.doc_count(), 1);
    }
}

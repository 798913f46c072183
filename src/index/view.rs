use std::collections::HashSet;
use crate::document::doc::Document;
use crate::document::fields::FIELD_ID;
use crate::index::store::Generation;

/// One generation participating in a view, with an optional identity mask
/// (identities deleted by an uncommitted unit of work).
pub struct Layer<'a> {
    pub generation: &'a Generation,
    pub masked_ids: Option<&'a HashSet<String>>,
}

impl<'a> Layer<'a> {
    fn visible(&self, doc: &Document) -> bool {
        match self.masked_ids {
            None => true,
            Some(masked) => match doc.get(FIELD_ID) {
                Some(id) => !masked.contains(id),
                None => true,
            },
        }
    }
}

/// A document located in one layer of a view, with its generation handle so
/// positional data stays reachable.
#[derive(Clone, Copy)]
pub struct DocHit<'a> {
    pub generation: &'a Generation,
    pub doc: u32,
    pub document: &'a Document,
}

/// Read view over one or more generations. "Current" state layers the delta
/// over the deletion-masked main generation; "committed" state is the main
/// generation alone. Views are snapshots: they hold borrowed generations and
/// release them by going out of scope.
pub struct View<'a> {
    pub layers: Vec<Layer<'a>>,
}

impl<'a> View<'a> {
    /// Committed-only state: main generation, nothing masked.
    pub fn committed(main: &'a Generation) -> Self {
        View {
            layers: vec![Layer {
                generation: main,
                masked_ids: None,
            }],
        }
    }

    /// Current state: main with the unit of work's deletions applied, the
    /// delta generation overlaid.
    pub fn current(
        main: &'a Generation,
        deletions: &'a HashSet<String>,
        delta: &'a Generation,
    ) -> Self {
        View {
            layers: vec![
                Layer {
                    generation: main,
                    masked_ids: Some(deletions),
                },
                Layer {
                    generation: delta,
                    masked_ids: None,
                },
            ],
        }
    }

    pub fn term_hits(&self, field: &str, text: &str) -> Vec<DocHit<'a>> {
        let mut hits = Vec::new();
        for layer in &self.layers {
            for doc in layer.generation.term_docs(field, text) {
                if let Some(document) = layer.generation.doc(doc) {
                    if layer.visible(document) {
                        hits.push(DocHit {
                            generation: layer.generation,
                            doc,
                            document,
                        });
                    }
                }
            }
        }
        hits
    }

    pub fn term_doc_refs(&self, field: &str, text: &str) -> Vec<&'a Document> {
        self.term_hits(field, text).into_iter().map(|h| h.document).collect()
    }

    pub fn live_hits(&self) -> Vec<DocHit<'a>> {
        let mut hits = Vec::new();
        for layer in &self.layers {
            for (doc, document) in layer.generation.live_docs() {
                if layer.visible(document) {
                    hits.push(DocHit {
                        generation: layer.generation,
                        doc,
                        document,
                    });
                }
            }
        }
        hits
    }

    /// Union of distinct live terms of a field across layers.
    pub fn terms(&self, field: &str) -> Vec<String> {
        let mut terms: Vec<String> = self
            .layers
            .iter()
            .flat_map(|l| l.generation.terms(field))
            .map(|t| t.to_string())
            .collect();
        terms.sort();
        terms.dedup();
        terms
    }
}

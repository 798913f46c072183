use std::collections::HashSet;
use regex::Regex;
use crate::analysis::locale::is_locale_literal;
use crate::analysis::tokenizer::StandardTokenizer;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::QName;
use crate::document::doc::Document;
use crate::document::fields::{FIELD_ANCESTOR, FIELD_ID, FIELD_ISNODE, FIELD_ISROOT, FIELD_PARENT, FIELD_QNAME, MARKER_TRUE};
use crate::index::view::{DocHit, View};
use crate::query::ast::{Occur, PathElement, PathQuery, PrimitiveQuery};

/// Evaluate a primitive query against a view, returning matching documents.
pub fn execute<'a>(view: &View<'a>, query: &PrimitiveQuery) -> Result<Vec<&'a Document>> {
    Ok(execute_hits(view, query)?
        .into_iter()
        .map(|h| h.document)
        .collect())
}

fn hit_key(hit: &DocHit) -> (usize, u32) {
    (hit.generation as *const _ as usize, hit.doc)
}

fn execute_hits<'a>(view: &View<'a>, query: &PrimitiveQuery) -> Result<Vec<DocHit<'a>>> {
    match query {
        PrimitiveQuery::MatchAll => Ok(view.live_hits()),
        PrimitiveQuery::MatchNone => Ok(Vec::new()),
        PrimitiveQuery::Term { field, text } => Ok(view.term_hits(field, text)),
        PrimitiveQuery::CaseInsensitiveTerm { field, text } => {
            let wanted = text.to_lowercase();
            Ok(filter_by_terms(view, field, |term| {
                term.to_lowercase() == wanted
            }))
        }
        PrimitiveQuery::Phrase { field, terms } => phrase_hits(view, field, terms),
        PrimitiveQuery::Prefix { field, prefix } => Ok(filter_by_terms(view, field, |term| {
            term.starts_with(prefix.as_str())
        })),
        PrimitiveQuery::Wildcard { field, pattern } => {
            let regex = wildcard_regex(pattern)?;
            let cross_locale = pattern.starts_with('{');
            Ok(filter_by_terms(view, field, |term| {
                if is_locale_literal(term) && !cross_locale {
                    return false;
                }
                regex.is_match(term)
            }))
        }
        PrimitiveQuery::Regex { field, pattern } => {
            let regex = anchored_regex(pattern)?;
            Ok(filter_by_terms(view, field, |term| regex.is_match(term)))
        }
        PrimitiveQuery::Exists { field } => Ok(filter_by_terms(view, field, |_| true)),
        PrimitiveQuery::Fuzzy {
            field,
            text,
            max_edits,
        } => Ok(filter_by_terms(view, field, |term| {
            levenshtein(term, text) <= *max_edits as usize
        })),
        PrimitiveQuery::Range {
            field,
            lower,
            upper,
            include_lower,
            include_upper,
        } => Ok(filter_by_terms(view, field, |term| {
            let above = match lower.as_deref() {
                Some(l) if *include_lower => term >= l,
                Some(l) => term > l,
                None => true,
            };
            let below = match upper.as_deref() {
                Some(u) if *include_upper => term <= u,
                Some(u) => term < u,
                None => true,
            };
            above && below
        })),
        PrimitiveQuery::Bool { clauses } => bool_hits(view, clauses),
        PrimitiveQuery::Path(path) => path_hits(view, path),
    }
}

/// Indexed terms of one field of one document.
fn doc_terms(document: &Document, field: &str) -> Vec<String> {
    let tokenizer = StandardTokenizer::default();
    let mut terms = Vec::new();
    for f in &document.fields {
        if f.name != field || !f.indexed {
            continue;
        }
        if f.tokenised {
            terms.extend(
                tokenizer
                    .tokenize_value(&f.value)
                    .into_iter()
                    .map(|t| t.text),
            );
        } else {
            terms.push(f.value.clone());
        }
    }
    terms
}

fn filter_by_terms<'a, F>(view: &View<'a>, field: &str, predicate: F) -> Vec<DocHit<'a>>
where
    F: Fn(&str) -> bool,
{
    view.live_hits()
        .into_iter()
        .filter(|hit| doc_terms(hit.document, field).iter().any(|t| predicate(t)))
        .collect()
}

fn phrase_hits<'a>(view: &View<'a>, field: &str, terms: &[String]) -> Result<Vec<DocHit<'a>>> {
    let Some(first) = terms.first() else {
        return Ok(Vec::new());
    };
    let candidates = view.term_hits(field, first);
    let mut matched = Vec::new();
    'candidates: for hit in candidates {
        let Some(starts) = hit.generation.positions(field, first, hit.doc) else {
            continue;
        };
        for start in starts {
            let mut all = true;
            for (offset, term) in terms.iter().enumerate().skip(1) {
                let next = start + offset as u32;
                let found = hit
                    .generation
                    .positions(field, term, hit.doc)
                    .map(|positions| positions.contains(&next))
                    .unwrap_or(false);
                if !found {
                    all = false;
                    break;
                }
            }
            if all {
                matched.push(hit);
                continue 'candidates;
            }
        }
    }
    Ok(matched)
}

fn bool_hits<'a>(
    view: &View<'a>,
    clauses: &[(Occur, PrimitiveQuery)],
) -> Result<Vec<DocHit<'a>>> {
    let mut required: Option<Vec<DocHit<'a>>> = None;
    let mut optional: Vec<DocHit<'a>> = Vec::new();
    let mut excluded: HashSet<(usize, u32)> = HashSet::new();

    for (occur, clause) in clauses {
        let hits = execute_hits(view, clause)?;
        match occur {
            Occur::Must => {
                required = Some(match required {
                    None => hits,
                    Some(existing) => {
                        let keys: HashSet<(usize, u32)> =
                            hits.iter().map(hit_key).collect();
                        existing
                            .into_iter()
                            .filter(|h| keys.contains(&hit_key(h)))
                            .collect()
                    }
                });
            }
            Occur::Should => optional.extend(hits),
            Occur::MustNot => excluded.extend(hits.iter().map(hit_key)),
        }
    }

    // Shoulds are optional once a must clause is present
    let mut result = match required {
        Some(required) => required,
        None => {
            let mut seen = HashSet::new();
            optional.retain(|h| seen.insert(hit_key(h)));
            optional
        }
    };

    result.retain(|h| !excluded.contains(&hit_key(h)));
    Ok(result)
}

fn path_hits<'a>(view: &View<'a>, path: &PathQuery) -> Result<Vec<DocHit<'a>>> {
    // Start at the store roots
    let mut current: HashSet<String> = view
        .term_doc_refs(FIELD_ISROOT, MARKER_TRUE)
        .into_iter()
        .filter_map(|d| d.get(FIELD_ID))
        .map(|id| id.to_string())
        .collect();

    for element in &path.elements {
        match element {
            PathElement::Descendant => {
                // Descendant-or-self
                let mut expanded = current.clone();
                for id in &current {
                    for document in view.term_doc_refs(FIELD_ANCESTOR, id) {
                        if let Some(descendant) = document.get(FIELD_ID) {
                            expanded.insert(descendant.to_string());
                        }
                    }
                }
                current = expanded;
            }
            PathElement::Name {
                namespace_uri,
                local_name,
            } => {
                let mut next = HashSet::new();
                for parent in &current {
                    for document in view.term_doc_refs(FIELD_PARENT, parent) {
                        if !document
                            .get_all(FIELD_QNAME)
                            .iter()
                            .any(|q| qname_matches(q, namespace_uri, local_name))
                        {
                            continue;
                        }
                        if let Some(child) = document.get(FIELD_ID) {
                            // Duplicate edges collapse to one step; the
                            // with-repeats variant only affects edge counting
                            next.insert(child.to_string());
                        }
                    }
                }
                current = next;
            }
        }
    }

    let mut hits = Vec::new();
    let mut seen = HashSet::new();
    for id in current {
        for hit in view.term_hits(FIELD_ID, &id) {
            if hit.document.get(FIELD_ISNODE) == Some(MARKER_TRUE)
                && seen.insert(hit_key(&hit))
            {
                hits.push(hit);
            }
        }
    }
    Ok(hits)
}

fn qname_matches(rendered: &str, namespace_uri: &Option<String>, local_name: &Option<String>) -> bool {
    let Ok(qname) = QName::parse(rendered) else {
        return false;
    };
    if let Some(uri) = namespace_uri {
        if &qname.namespace_uri != uri {
            return false;
        }
    }
    if let Some(local) = local_name {
        if &qname.local_name != local {
            return false;
        }
    }
    true
}

/// Glob pattern (`*`, `?`) compiled to an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
        .map_err(|e| Error::new(ErrorKind::Parse, format!("bad wildcard pattern: {}", e)))
}

fn anchored_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::new(ErrorKind::Parse, format!("bad pattern: {}", e)))
}

/// Edit distance for fuzzy matching.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            row.push(substitution.min(previous[j + 1] + 1).min(row[j] + 1));
        }
        previous = row;
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn wildcard_regexes_are_anchored() {
        let regex = wildcard_regex("he*o?").unwrap();
        assert!(regex.is_match("hello!"));
        assert!(!regex.is_match("hello"));
        assert!(!regex.is_match("say hello!"));
    }
}

use serde::{Deserialize, Serialize};

/// Clause role inside a boolean query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occur {
    Must,
    Should,
    MustNot,
}

/// One element of a path expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathElement {
    /// `//` — descendant-or-self.
    Descendant,
    /// A name step; `None` parts are wildcards.
    Name {
        namespace_uri: Option<String>,
        local_name: Option<String>,
    },
}

/// Structural path-match query over the hierarchy fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathQuery {
    pub elements: Vec<PathElement>,
    /// Match repeated/duplicate association edges; suppressed by default.
    pub with_repeats: bool,
}

/// Query understood directly by the physical index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveQuery {
    MatchAll,
    /// Sentinel clause that matches nothing.
    MatchNone,
    Term {
        field: String,
        text: String,
    },
    /// Exact match ignoring case; used by the case-transform functions.
    CaseInsensitiveTerm {
        field: String,
        text: String,
    },
    Phrase {
        field: String,
        terms: Vec<String>,
    },
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
        include_lower: bool,
        include_upper: bool,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Wildcard {
        field: String,
        pattern: String,
    },
    /// Wildcard pattern containing escape sequences, matched as a regex.
    Regex {
        field: String,
        pattern: String,
    },
    /// Presence check: the document carries any indexed term for the field.
    Exists {
        field: String,
    },
    Fuzzy {
        field: String,
        text: String,
        max_edits: u32,
    },
    Bool {
        clauses: Vec<(Occur, PrimitiveQuery)>,
    },
    Path(PathQuery),
}

impl PrimitiveQuery {
    pub fn term(field: &str, text: &str) -> Self {
        PrimitiveQuery::Term {
            field: field.to_string(),
            text: text.to_string(),
        }
    }

    /// OR the clauses together, collapsing the degenerate shapes.
    pub fn or_of(clauses: Vec<PrimitiveQuery>) -> Self {
        let mut live: Vec<PrimitiveQuery> = clauses
            .into_iter()
            .filter(|c| !matches!(c, PrimitiveQuery::MatchNone))
            .collect();
        match live.len() {
            0 => PrimitiveQuery::MatchNone,
            1 => live.pop().unwrap(),
            _ => PrimitiveQuery::Bool {
                clauses: live.into_iter().map(|c| (Occur::Should, c)).collect(),
            },
        }
    }

    pub fn and_of(clauses: Vec<PrimitiveQuery>) -> Self {
        if clauses.iter().any(|c| matches!(c, PrimitiveQuery::MatchNone)) {
            return PrimitiveQuery::MatchNone;
        }
        let mut live: Vec<PrimitiveQuery> = clauses
            .into_iter()
            .filter(|c| !matches!(c, PrimitiveQuery::MatchAll))
            .collect();
        match live.len() {
            0 => PrimitiveQuery::MatchAll,
            1 => live.pop().unwrap(),
            _ => PrimitiveQuery::Bool {
                clauses: live.into_iter().map(|c| (Occur::Must, c)).collect(),
            },
        }
    }
}

/// How a field query literal is to be analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// Tokenise through the field's analyser.
    Default,
    /// Exact untokenised literal.
    Identifier,
    Prefix,
    Wildcard,
    Fuzzy,
    Like,
}

/// Case-transform function applied to a field query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseFunction {
    Upper,
    Lower,
}

/// Parsed surface query, before field-specific compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Conjunction(Vec<QueryNode>),
    Disjunction(Vec<QueryNode>),
    Negation(Box<QueryNode>),
    /// `field:value`, with the analysis mode derived from the literal shape.
    FieldQuery {
        field: Option<String>,
        text: String,
        mode: AnalysisMode,
        function: Option<CaseFunction>,
    },
    /// `field:[lower TO upper]` / `field:{lower TO upper}`.
    FieldRange {
        field: Option<String>,
        lower: String,
        upper: String,
        include_lower: bool,
        include_upper: bool,
    },
    /// `field:"quoted phrase"`.
    FieldPhrase {
        field: Option<String>,
        text: String,
    },
    MatchAll,
}

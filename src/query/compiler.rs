use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use lru::LruCache;
use parking_lot::Mutex;
use crate::analysis::locale::{expand_locales, locale_literal};
use crate::analysis::tokenizer::StandardTokenizer;
use crate::core::config::IndexerConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::QName;
use crate::document::fields::*;
use crate::index::view::View;
use crate::query::ast::{AnalysisMode, CaseFunction, Occur, PathElement, PathQuery, PrimitiveQuery, QueryNode};
use crate::query::dates::{canonical_date_string, decompose_date_range, parse_date_literal};
use crate::query::matcher::wildcard_regex;
use crate::query::path::{RawStep, parse_path, parse_single_step};
use crate::repo::dictionary::{DataType, Dictionary, TokenisationMode};

/// Maps namespace prefixes to URIs for the query grammar.
#[derive(Debug, Clone, Default)]
pub struct NamespaceResolver {
    prefixes: HashMap<String, String>,
}

impl NamespaceResolver {
    pub fn new() -> Self {
        NamespaceResolver {
            prefixes: HashMap::new(),
        }
    }

    pub fn register(&mut self, prefix: &str, uri: &str) {
        self.prefixes.insert(prefix.to_string(), uri.to_string());
    }

    pub fn lookup(&self, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            return Some(String::new());
        }
        self.prefixes.get(prefix).cloned()
    }
}

/// Compiles parsed query nodes into primitive queries, dispatching on the
/// field name and the dictionary's declared property types.
pub struct QueryCompiler {
    pub dictionary: Arc<dyn Dictionary>,
    pub namespaces: NamespaceResolver,
    pub config: IndexerConfig,
    /// Locale scope of the search; empty means unrestricted.
    pub locales: Vec<String>,
    /// Properties a bare (unfielded) term expands across.
    pub default_fields: Vec<QName>,
    prefix_cache: Mutex<LruCache<String, String>>,
    tokenizer: StandardTokenizer,
}

impl QueryCompiler {
    pub fn new(
        dictionary: Arc<dyn Dictionary>,
        namespaces: NamespaceResolver,
        config: IndexerConfig,
    ) -> Self {
        QueryCompiler {
            dictionary,
            namespaces,
            config,
            locales: Vec::new(),
            default_fields: Vec::new(),
            prefix_cache: Mutex::new(LruCache::new(NonZeroUsize::new(128).unwrap())),
            tokenizer: StandardTokenizer::default(),
        }
    }

    pub fn compile(&self, node: &QueryNode, view: &View) -> Result<PrimitiveQuery> {
        match node {
            QueryNode::MatchAll => Ok(PrimitiveQuery::MatchAll),
            QueryNode::Conjunction(parts) => {
                let compiled = parts
                    .iter()
                    .map(|p| self.compile(p, view))
                    .collect::<Result<Vec<_>>>()?;
                Ok(PrimitiveQuery::and_of(compiled))
            }
            QueryNode::Disjunction(parts) => {
                let compiled = parts
                    .iter()
                    .map(|p| self.compile(p, view))
                    .collect::<Result<Vec<_>>>()?;
                Ok(PrimitiveQuery::or_of(compiled))
            }
            QueryNode::Negation(inner) => Ok(PrimitiveQuery::Bool {
                clauses: vec![
                    (Occur::Must, PrimitiveQuery::MatchAll),
                    (Occur::MustNot, self.compile(inner, view)?),
                ],
            }),
            QueryNode::FieldPhrase { field, text } => {
                self.compile_field(field.as_deref(), text, AnalysisMode::Default, None, view)
            }
            QueryNode::FieldQuery {
                field,
                text,
                mode,
                function,
            } => self.compile_field(field.as_deref(), text, *mode, *function, view),
            QueryNode::FieldRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => self.compile_range(
                field.as_deref(),
                lower,
                upper,
                *include_lower,
                *include_upper,
            ),
        }
    }

    /// Field dispatch. Unknown fields fall through to the generic tokenised
    /// compiler.
    pub fn compile_field(
        &self,
        field: Option<&str>,
        text: &str,
        mode: AnalysisMode,
        function: Option<CaseFunction>,
        view: &View,
    ) -> Result<PrimitiveQuery> {
        let Some(field) = field else {
            return self.compile_text_expansion(text, mode, function, view);
        };
        match field {
            FIELD_ID | FIELD_PARENT | FIELD_PRIMARYPARENT | FIELD_ANCESTOR => {
                self.compile_identity(field, text, mode)
            }
            FIELD_TX | FIELD_ISROOT | FIELD_ISCONTAINER | FIELD_ISNODE | FIELD_FTSSTATUS => {
                Ok(PrimitiveQuery::term(field, text))
            }
            FIELD_PATH => self.compile_path(text, false),
            "PATH_WITH_REPEATS" => self.compile_path(text, true),
            FIELD_QNAME | FIELD_ASSOCTYPEQNAME | FIELD_PRIMARYASSOCTYPEQNAME => {
                self.compile_qname_step(field, text)
            }
            FIELD_TYPE => self.compile_class(FIELD_TYPE, text, true),
            "EXACTTYPE" => self.compile_class(FIELD_TYPE, text, false),
            FIELD_ASPECT => self.compile_class(FIELD_ASPECT, text, true),
            "EXACTASPECT" => self.compile_class(FIELD_ASPECT, text, false),
            "ISNULL" => self.compile_presence(text, false),
            "ISUNSET" => self.compile_presence(text, false),
            "ISNOTNULL" => self.compile_presence(text, true),
            "TEXT" | "ALL" => self.compile_text_expansion(text, mode, function, view),
            _ if field.starts_with('@') => {
                self.compile_property(field, text, mode, function, view)
            }
            other => {
                // Unknown field: generic tokenised compile
                Ok(self.build_tokenised_query(other, text, None, true, view))
            }
        }
    }

    /// Identity fields are exact, tenant-rewritten, case-sensitive terms.
    fn compile_identity(&self, field: &str, text: &str, mode: AnalysisMode) -> Result<PrimitiveQuery> {
        let rewritten = self.rewrite_identity(text);
        match mode {
            AnalysisMode::Default | AnalysisMode::Identifier => {
                Ok(PrimitiveQuery::term(field, &rewritten))
            }
            AnalysisMode::Prefix => Ok(PrimitiveQuery::Prefix {
                field: field.to_string(),
                prefix: rewritten,
            }),
            // Expanded terms keep their case: identifiers are case-sensitive
            AnalysisMode::Wildcard | AnalysisMode::Like => {
                Ok(self.wildcard_query(field, &rewritten, false))
            }
            AnalysisMode::Fuzzy => Ok(PrimitiveQuery::Fuzzy {
                field: field.to_string(),
                text: rewritten,
                max_edits: 2,
            }),
        }
    }

    fn rewrite_identity(&self, value: &str) -> String {
        match &self.config.tenant {
            Some(tenant) => match value.split_once("://") {
                Some((protocol, rest)) if !rest.starts_with('@') => {
                    format!("{}://@{}@{}", protocol, tenant, rest)
                }
                _ => value.to_string(),
            },
            None => value.to_string(),
        }
    }

    fn compile_path(&self, text: &str, with_repeats: bool) -> Result<PrimitiveQuery> {
        let steps = parse_path(&unescape(text))?;
        let elements = steps
            .into_iter()
            .map(|s| self.resolve_step(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(PrimitiveQuery::Path(PathQuery {
            elements,
            with_repeats,
        }))
    }

    fn resolve_step(&self, step: RawStep) -> Result<PathElement> {
        match step {
            RawStep::Descendant => Ok(PathElement::Descendant),
            RawStep::Name { prefix, local } => {
                let namespace_uri = match prefix {
                    None => None,
                    Some(p) => Some(self.resolve_prefix(&p)?),
                };
                Ok(PathElement::Name {
                    namespace_uri,
                    local_name: local,
                })
            }
        }
    }

    /// Prefix-to-URI resolution through the compiler-owned cache.
    fn resolve_prefix(&self, prefix: &str) -> Result<String> {
        if let Some(uri) = self.prefix_cache.lock().get(prefix) {
            return Ok(uri.clone());
        }
        let uri = self.namespaces.lookup(prefix).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("unknown namespace prefix '{}'", prefix),
            )
        })?;
        self.prefix_cache
            .lock()
            .put(prefix.to_string(), uri.clone());
        Ok(uri)
    }

    /// The qualified-name fields reuse the path grammar anchored at depth
    /// one.
    fn compile_qname_step(&self, field: &str, text: &str) -> Result<PrimitiveQuery> {
        let step = parse_single_step(&unescape(text))?;
        match self.resolve_step(step)? {
            PathElement::Name {
                namespace_uri: Some(uri),
                local_name: Some(local),
            } => Ok(PrimitiveQuery::term(
                field,
                &QName::new(&uri, &local).to_string(),
            )),
            PathElement::Name {
                namespace_uri,
                local_name,
            } => {
                // Wildcard part: match rendered qnames by pattern
                let uri_pattern = match &namespace_uri {
                    Some(uri) if uri.is_empty() => String::new(),
                    Some(uri) => format!("{{{}}}", uri),
                    None => "{*}".to_string(),
                };
                let local_pattern = local_name.as_deref().unwrap_or("*");
                Ok(self.wildcard_query(
                    field,
                    &format!("{}{}", uri_pattern, local_pattern),
                    false,
                ))
            }
            PathElement::Descendant => unreachable!("single step is never //"),
        }
    }

    /// TYPE/ASPECT and their exact variants: resolve through the dictionary
    /// and expand registered subtypes that opt into inherited matching.
    fn compile_class(&self, field: &str, text: &str, expand: bool) -> Result<PrimitiveQuery> {
        let wanted = self.parse_class_qname(text)?;
        let members = if field == FIELD_TYPE {
            let resolved = self.dictionary.resolve_type(&wanted)?;
            if expand {
                self.dictionary
                    .subtypes(&resolved)
                    .into_iter()
                    .filter(|q| {
                        q == &resolved
                            || self
                                .dictionary
                                .get_type_definition(q)
                                .map(|d| d.included_in_super_query)
                                .unwrap_or(false)
                    })
                    .collect()
            } else {
                vec![resolved]
            }
        } else {
            let resolved = self.dictionary.resolve_aspect(&wanted)?;
            if expand {
                self.dictionary
                    .subaspects(&resolved)
                    .into_iter()
                    .filter(|q| {
                        q == &resolved
                            || self
                                .dictionary
                                .get_aspect_definition(q)
                                .map(|d| d.included_in_super_query)
                                .unwrap_or(false)
                    })
                    .collect()
            } else {
                vec![resolved]
            }
        };
        Ok(PrimitiveQuery::or_of(
            members
                .into_iter()
                .map(|q| PrimitiveQuery::term(field, &q.to_string()))
                .collect(),
        ))
    }

    /// `{uri}local` or `prefix:local` (backslash escapes removed).
    fn parse_class_qname(&self, text: &str) -> Result<QName> {
        let text = unescape(text);
        if text.starts_with('{') {
            return QName::parse(&text);
        }
        match text.split_once(':') {
            Some((prefix, local)) => {
                let uri = self.resolve_prefix(prefix)?;
                Ok(QName::new(&uri, local))
            }
            None => Ok(QName::new("", &text)),
        }
    }

    /// Presence predicates: a type match on the property's declared owner
    /// combined with a wildcard presence check on the property field.
    fn compile_presence(&self, property: &str, must_exist: bool) -> Result<PrimitiveQuery> {
        let qname = self.parse_class_qname(property)?;
        let resolved = self.dictionary.resolve_property(&qname)?;
        let definition = self
            .dictionary
            .get_property_definition(&resolved)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("property {} is not defined", resolved),
                )
            })?;
        let owner = &definition.container_class;
        let owner_clause = if self.dictionary.get_type_definition(owner).is_some() {
            self.compile_class(FIELD_TYPE, &owner.to_string(), true)?
        } else {
            self.compile_class(FIELD_ASPECT, &owner.to_string(), true)?
        };
        let presence = PrimitiveQuery::Exists {
            field: property_field(&resolved),
        };
        let occur = if must_exist { Occur::Must } else { Occur::MustNot };
        Ok(PrimitiveQuery::Bool {
            clauses: vec![(Occur::Must, owner_clause), (occur, presence)],
        })
    }

    /// Virtual TEXT/ALL field: OR across every configured default property.
    fn compile_text_expansion(
        &self,
        text: &str,
        mode: AnalysisMode,
        function: Option<CaseFunction>,
        view: &View,
    ) -> Result<PrimitiveQuery> {
        if self.default_fields.is_empty() {
            return Err(Error::new(
                ErrorKind::UnsupportedQuery,
                "no default text fields configured".to_string(),
            ));
        }
        let mut clauses = Vec::new();
        for qname in &self.default_fields {
            let field = property_field(qname);
            clauses.push(self.compile_property(&field, text, mode, function, view)?);
        }
        Ok(PrimitiveQuery::or_of(clauses))
    }

    /// Typed property dispatch over the declared data type.
    fn compile_property(
        &self,
        field: &str,
        text: &str,
        mode: AnalysisMode,
        function: Option<CaseFunction>,
        view: &View,
    ) -> Result<PrimitiveQuery> {
        let qname = self.property_qname(field)?;
        let resolved = match self.dictionary.resolve_property(&qname) {
            Ok(resolved) => resolved,
            // Undeclared properties stay queryable as plain tokenised fields
            Err(e) if e.kind == ErrorKind::NotFound => {
                let field_name = property_field(&qname);
                return Ok(match mode {
                    AnalysisMode::Default => {
                        self.build_tokenised_query(&field_name, text, None, true, view)
                    }
                    other => self.compile_untokenised_variant(&field_name, text, other),
                });
            }
            Err(e) => return Err(e),
        };
        let definition = self.dictionary.get_property_definition(&resolved);
        let field_name = property_field(&resolved);

        let (data_type, tokenisation, is_identifier) = match &definition {
            Some(def) => (def.data_type, def.tokenisation, def.is_identifier),
            None => (DataType::Text, TokenisationMode::True, false),
        };

        if let Some(case) = function {
            return self.compile_case_function(
                &resolved, data_type, tokenisation, text, case,
            );
        }

        match data_type {
            DataType::Content => {
                if !matches!(mode, AnalysisMode::Default) {
                    return Err(Error::new(
                        ErrorKind::UnsupportedQuery,
                        format!("{:?} analysis is not valid for content", mode),
                    ));
                }
                let base = self.build_tokenised_query(&field_name, text, None, true, view);
                if self.locales.is_empty() {
                    return Ok(base);
                }
                // Locale-gated content: restrict by the locale marker field
                let locale_terms: Vec<PrimitiveQuery> = self
                    .locale_expansion()
                    .into_iter()
                    .map(|l| PrimitiveQuery::term(&format!("{}.locale", field_name), &l))
                    .collect();
                Ok(PrimitiveQuery::Bool {
                    clauses: vec![
                        (Occur::Must, base),
                        (Occur::Must, PrimitiveQuery::or_of(locale_terms)),
                    ],
                })
            }
            DataType::MlText | DataType::Text => {
                if is_identifier {
                    return Ok(self.compile_untokenised_variant(&field_name, text, mode));
                }
                let mut clauses = Vec::new();
                for locale in self.locale_expansion() {
                    clauses.push(self.compile_text_variant(
                        &resolved,
                        &field_name,
                        tokenisation,
                        &locale,
                        text,
                        mode,
                        view,
                    ));
                }
                // Falls back to the sentinel no-match clause when every
                // locale sub-query came out empty
                Ok(PrimitiveQuery::or_of(clauses))
            }
            DataType::DateTime => {
                if !matches!(mode, AnalysisMode::Default | AnalysisMode::Identifier) {
                    return Err(Error::new(
                        ErrorKind::UnsupportedQuery,
                        format!("{:?} analysis is not valid for date fields", mode),
                    ));
                }
                let mut clauses = vec![PrimitiveQuery::term(&field_name, text)];
                if let Some(parsed) = parse_date_literal(text) {
                    let canonical = canonical_date_string(&parsed);
                    clauses.push(PrimitiveQuery::term(&field_name, &canonical));
                    if tokenisation == TokenisationMode::Both {
                        clauses.push(PrimitiveQuery::term(
                            &sort_field(&resolved),
                            &canonical,
                        ));
                    }
                }
                Ok(PrimitiveQuery::or_of(clauses))
            }
            DataType::Other => Ok(self.compile_untokenised_variant(&field_name, text, mode)),
        }
    }

    /// One locale's sub-query for a text-like property, per tokenisation
    /// mode and analysis mode. For TRUE-only fields the untokenised modes
    /// have no literal field to target, so they compile against the
    /// locale-prefixed token stream instead of an always-empty clause.
    #[allow(clippy::too_many_arguments)]
    fn compile_text_variant(
        &self,
        qname: &QName,
        field: &str,
        tokenisation: TokenisationMode,
        locale: &str,
        text: &str,
        mode: AnalysisMode,
        view: &View,
    ) -> PrimitiveQuery {
        let untokenised_field = match tokenisation {
            TokenisationMode::False => Some(field.to_string()),
            TokenisationMode::Both => Some(sort_field(qname)),
            TokenisationMode::True => None,
        };
        match mode {
            AnalysisMode::Default => match tokenisation {
                TokenisationMode::True | TokenisationMode::Both => {
                    self.build_tokenised_query(field, text, Some(locale), true, view)
                }
                TokenisationMode::False => PrimitiveQuery::term(
                    field,
                    &locale_literal(locale, text),
                ),
            },
            AnalysisMode::Identifier
            | AnalysisMode::Prefix
            | AnalysisMode::Wildcard
            | AnalysisMode::Like => match untokenised_field {
                Some(target) => self.compile_untokenised_variant(
                    &target,
                    &locale_literal(locale, text),
                    mode,
                ),
                None => {
                    // Tokenised-only field: analyse the literal instead
                    match mode {
                        AnalysisMode::Identifier => {
                            self.build_tokenised_query(field, text, Some(locale), true, view)
                        }
                        AnalysisMode::Prefix => PrimitiveQuery::Prefix {
                            field: field.to_string(),
                            prefix: locale_literal(locale, &self.fold_pattern(text)),
                        },
                        _ => self.wildcard_query(
                            field,
                            &locale_literal(locale, &self.fold_pattern(text)),
                            false,
                        ),
                    }
                }
            },
            AnalysisMode::Fuzzy => match untokenised_field {
                Some(target) => PrimitiveQuery::Fuzzy {
                    field: target,
                    text: locale_literal(locale, text),
                    max_edits: 2,
                },
                None => PrimitiveQuery::Fuzzy {
                    field: field.to_string(),
                    text: locale_literal(locale, &text.to_lowercase()),
                    max_edits: 2,
                },
            },
        }
    }

    /// Exact/prefix/wildcard/fuzzy against one untokenised field.
    fn compile_untokenised_variant(
        &self,
        field: &str,
        text: &str,
        mode: AnalysisMode,
    ) -> PrimitiveQuery {
        match mode {
            AnalysisMode::Default | AnalysisMode::Identifier => {
                PrimitiveQuery::term(field, text)
            }
            AnalysisMode::Prefix => PrimitiveQuery::Prefix {
                field: field.to_string(),
                prefix: text.to_string(),
            },
            AnalysisMode::Wildcard | AnalysisMode::Like => {
                self.wildcard_query(field, text, false)
            }
            AnalysisMode::Fuzzy => PrimitiveQuery::Fuzzy {
                field: field.to_string(),
                text: text.to_string(),
                max_edits: 2,
            },
        }
    }

    /// upper()/lower(): legal only against untokenised text variants. The
    /// index holds one case-normalised form per token, so a literal not
    /// already in the requested case can never match.
    fn compile_case_function(
        &self,
        qname: &QName,
        data_type: DataType,
        tokenisation: TokenisationMode,
        text: &str,
        case: CaseFunction,
    ) -> Result<PrimitiveQuery> {
        if !matches!(data_type, DataType::Text | DataType::MlText) {
            return Err(Error::new(
                ErrorKind::UnsupportedQuery,
                format!("case functions require a text property, got {:?}", data_type),
            ));
        }
        let target = match tokenisation {
            TokenisationMode::False => property_field(qname),
            TokenisationMode::Both => sort_field(qname),
            TokenisationMode::True => {
                return Err(Error::new(
                    ErrorKind::UnsupportedQuery,
                    "case functions require an untokenised field variant".to_string(),
                ));
            }
        };
        let case_holds = match case {
            CaseFunction::Upper => text == text.to_uppercase(),
            CaseFunction::Lower => text == text.to_lowercase(),
        };
        if !case_holds {
            return Ok(PrimitiveQuery::MatchNone);
        }
        let clauses = self
            .locale_expansion()
            .into_iter()
            .map(|locale| PrimitiveQuery::CaseInsensitiveTerm {
                field: target.clone(),
                text: locale_literal(&locale, text),
            })
            .collect();
        Ok(PrimitiveQuery::or_of(clauses))
    }

    /// Ranges dispatch on the property's declared data type; everything
    /// else is a plain lexicographic range.
    pub fn compile_range(
        &self,
        field: Option<&str>,
        lower: &str,
        upper: &str,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<PrimitiveQuery> {
        let Some(field) = field else {
            return Err(Error::new(
                ErrorKind::UnsupportedQuery,
                "range queries need an explicit field".to_string(),
            ));
        };
        if field.starts_with('@') {
            let qname = self.property_qname(field)?;
            let resolved = match self.dictionary.resolve_property(&qname) {
                Ok(resolved) => resolved,
                Err(e) if e.kind == ErrorKind::NotFound => qname,
                Err(e) => return Err(e),
            };
            if let Some(def) = self.dictionary.get_property_definition(&resolved) {
                if def.data_type == DataType::DateTime {
                    return self.compile_date_range(
                        &resolved,
                        def.tokenisation,
                        lower,
                        upper,
                        include_lower,
                        include_upper,
                    );
                }
            }
            return Ok(plain_range(
                &property_field(&resolved),
                lower,
                upper,
                include_lower,
                include_upper,
            ));
        }
        Ok(plain_range(field, lower, upper, include_lower, include_upper))
    }

    fn compile_date_range(
        &self,
        qname: &QName,
        tokenisation: TokenisationMode,
        lower: &str,
        upper: &str,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<PrimitiveQuery> {
        let field = property_field(qname);
        let start = parse_date_literal(lower);
        let end = parse_date_literal(upper);
        match (start, end, tokenisation) {
            // The canonical date form lives on the property field for FALSE
            // and on the .sort variant for BOTH; TRUE has no canonical form
            (Some(start), Some(end), TokenisationMode::False) => Ok(decompose_date_range(
                &field,
                &start,
                &end,
                include_lower,
                include_upper,
            )),
            (Some(start), Some(end), TokenisationMode::Both) => Ok(decompose_date_range(
                &sort_field(qname),
                &start,
                &end,
                include_lower,
                include_upper,
            )),
            _ => Ok(plain_range(
                &field,
                lower,
                upper,
                include_lower,
                include_upper,
            )),
        }
    }

    /// Tokenisation-aware term/phrase/wildcard construction for free text.
    /// Splits on whitespace so alphanumeric runs adjacent to a wildcard
    /// survive as merged single terms, expands any token still carrying a
    /// wildcard against the live term dictionary, then picks a term, an OR
    /// of alternatives, or a phrase.
    fn build_tokenised_query(
        &self,
        field: &str,
        text: &str,
        locale: Option<&str>,
        lowercase: bool,
        view: &View,
    ) -> PrimitiveQuery {
        let has_wildcard = text.contains('*') || text.contains('?');
        let words: Vec<String> = if has_wildcard {
            // Keep wildcard fragments merged with their adjacent runs
            text.split_whitespace()
                .map(|w| if lowercase { self.fold_pattern(w) } else { w.to_string() })
                .collect()
        } else {
            self.tokenizer
                .tokenize(text)
                .into_iter()
                .map(|t| t.text)
                .collect()
        };
        if words.is_empty() {
            return PrimitiveQuery::MatchNone;
        }

        // Per position: the concrete alternatives
        let mut positions: Vec<Vec<String>> = Vec::new();
        for word in &words {
            let term = match locale {
                Some(l) => locale_literal(l, word),
                None => word.clone(),
            };
            if word.contains('*') || word.contains('?') {
                positions.push(self.expand_wildcard_term(field, &term, view));
            } else {
                positions.push(vec![term]);
            }
        }

        if positions.iter().any(|p| p.is_empty()) {
            return PrimitiveQuery::MatchNone;
        }
        if positions.len() == 1 {
            let alternatives = positions.swap_remove(0);
            return PrimitiveQuery::or_of(
                alternatives
                    .into_iter()
                    .map(|t| PrimitiveQuery::term(field, &t))
                    .collect(),
            );
        }

        // Multi-position: a phrase, with bounded cartesian expansion of any
        // per-position alternatives
        let mut phrases: Vec<Vec<String>> = vec![Vec::new()];
        for alternatives in &positions {
            if phrases.len() * alternatives.len() > 64 {
                // Degenerate expansion: require every position, lose order
                return PrimitiveQuery::and_of(
                    positions
                        .iter()
                        .map(|alts| {
                            PrimitiveQuery::or_of(
                                alts.iter()
                                    .map(|t| PrimitiveQuery::term(field, t))
                                    .collect(),
                            )
                        })
                        .collect(),
                );
            }
            phrases = phrases
                .into_iter()
                .flat_map(|prefix| {
                    alternatives.iter().map(move |alt| {
                        let mut next = prefix.clone();
                        next.push(alt.clone());
                        next
                    })
                })
                .collect();
        }
        PrimitiveQuery::or_of(
            phrases
                .into_iter()
                .map(|terms| PrimitiveQuery::Phrase {
                    field: field.to_string(),
                    terms,
                })
                .collect(),
        )
    }

    /// Wildcard expansion against the live term dictionary. Locale-tagged
    /// terms never match a plain pattern.
    fn expand_wildcard_term(&self, field: &str, pattern: &str, view: &View) -> Vec<String> {
        let Ok(regex) = wildcard_regex(pattern) else {
            return Vec::new();
        };
        let cross_locale = pattern.starts_with('{');
        view.terms(field)
            .into_iter()
            .filter(|term| {
                if term.starts_with('{') && !cross_locale {
                    return false;
                }
                regex.is_match(term)
            })
            .collect()
    }

    /// Escaped backslash sequences make a glob inexpressible; those
    /// patterns are reinterpreted as regular expressions.
    fn wildcard_query(&self, field: &str, pattern: &str, lowercase: bool) -> PrimitiveQuery {
        let pattern = if lowercase {
            self.fold_pattern(pattern)
        } else {
            pattern.to_string()
        };
        if pattern.contains('\\') {
            PrimitiveQuery::Regex {
                field: field.to_string(),
                pattern: glob_with_escapes_to_regex(&pattern),
            }
        } else {
            PrimitiveQuery::Wildcard {
                field: field.to_string(),
                pattern,
            }
        }
    }

    /// Lowercase the concrete parts of a pattern when expanded-term
    /// lowercasing is configured.
    fn fold_pattern(&self, pattern: &str) -> String {
        if self.config.lowercase_expanded_terms {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        }
    }

    fn locale_expansion(&self) -> Vec<String> {
        let mut expanded = Vec::new();
        let scope = if self.locales.is_empty() {
            vec![self.config.default_locale.clone()]
        } else {
            self.locales.clone()
        };
        for locale in scope {
            for tag in expand_locales(&locale, self.config.locale_match) {
                if !expanded.contains(&tag) {
                    expanded.push(tag);
                }
            }
        }
        expanded
    }

    /// `@{uri}local` or `@prefix:local` field name to a property QName.
    fn property_qname(&self, field: &str) -> Result<QName> {
        let rest = field.strip_prefix('@').ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("not a property field: {}", field),
            )
        })?;
        self.parse_class_qname(rest)
    }
}

fn unescape(text: &str) -> String {
    text.replace("\\:", ":").replace("\\\\", "\\")
}

fn none_if_open(bound: &str) -> Option<String> {
    match bound {
        "*" | "MIN" | "MAX" => None,
        other => Some(other.to_string()),
    }
}

fn plain_range(
    field: &str,
    lower: &str,
    upper: &str,
    include_lower: bool,
    include_upper: bool,
) -> PrimitiveQuery {
    PrimitiveQuery::Range {
        field: field.to_string(),
        lower: none_if_open(lower),
        upper: none_if_open(upper),
        include_lower,
        include_upper,
    }
}

/// Translate a glob whose escapes carry through to an anchored-regex body.
fn glob_with_escapes_to_regex(pattern: &str) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

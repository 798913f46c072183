use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::analysis::locale::{expand_locales, locale_literal, ml_stored_value};
use crate::core::config::IndexerConfig;
use crate::core::error::Result;
use crate::core::types::{ChildAssoc, NodeRef, PropertyValue, QName};
use crate::document::doc::{Document, Field};
use crate::document::fields::*;
use crate::document::policy::PropertyIndexPolicy;
use crate::query::dates::{canonical_date_string, parse_date_literal};
use crate::repo::content::ContentService;
use crate::repo::dictionary::{DataType, Dictionary, TokenisationMode};
use crate::repo::node::RepositoryReader;

/// Result of mapping one entity: its index documents, and whether every
/// property was indexed synchronously.
#[derive(Debug)]
pub struct BuiltDocuments {
    pub documents: Vec<Document>,
    pub atomic: bool,
}

impl BuiltDocuments {
    pub fn empty() -> Self {
        BuiltDocuments {
            documents: Vec::new(),
            atomic: true,
        }
    }
}

/// Maps one repository entity to its index documents: a node document for
/// metadata and content, and a directory document for containers.
pub struct DocumentBuilder {
    pub repo: Arc<dyn RepositoryReader>,
    pub dictionary: Arc<dyn Dictionary>,
    pub content: Arc<dyn ContentService>,
    pub config: IndexerConfig,
}

impl DocumentBuilder {
    pub fn new(
        repo: Arc<dyn RepositoryReader>,
        dictionary: Arc<dyn Dictionary>,
        content: Arc<dyn ContentService>,
        config: IndexerConfig,
    ) -> Self {
        DocumentBuilder {
            repo,
            dictionary,
            content,
            config,
        }
    }

    pub fn build_documents(
        &self,
        node: &NodeRef,
        is_new: bool,
        index_all_properties: bool,
        include_directory: bool,
        tx_tag: &str,
    ) -> Result<BuiltDocuments> {
        let mut properties = self.repo.get_properties(node)?;
        self.merge_system_properties(node, &mut properties)?;

        if matches!(
            properties.get(&prop_is_indexed()),
            Some(PropertyValue::Boolean(false))
        ) {
            debug!(node = %node, "entity marked not indexed, skipping");
            return Ok(BuiltDocuments::empty());
        }
        let content_indexed = !matches!(
            properties.get(&prop_is_content_indexed()),
            Some(PropertyValue::Boolean(false))
        );

        let node_locale = match properties.get(&prop_locale()) {
            Some(PropertyValue::Text(locale)) => locale.clone(),
            _ => self.config.default_locale.clone(),
        };

        let mut doc = Document::new();
        let mut atomic = true;

        for (qname, value) in &properties {
            let definition = self.dictionary.get_property_definition(qname);
            let policy = PropertyIndexPolicy::from_definition(definition.as_ref());
            if !policy.indexed && !policy.stored {
                continue;
            }
            for scalar in value.scalars() {
                let was_atomic = self.add_property_fields(
                    &mut doc,
                    node,
                    qname,
                    scalar,
                    policy,
                    &node_locale,
                    content_indexed,
                    index_all_properties,
                )?;
                atomic &= was_atomic;
            }
        }

        // Structural fields
        let primary = self.repo.get_primary_parent(node)?;
        let ancestors = self.primary_ancestors(node, primary.as_ref())?;
        doc.add(Field::untokenised(FIELD_ID, node.to_string()));
        doc.add(Field::untokenised(FIELD_TX, tx_tag.to_string()));
        doc.add(Field::untokenised(
            FIELD_TYPE,
            self.repo.get_type(node)?.to_string(),
        ));
        for aspect in self.repo.get_aspects(node)? {
            doc.add(Field::untokenised(FIELD_ASPECT, aspect.to_string()));
        }
        doc.add(Field::untokenised(FIELD_ISNODE, MARKER_TRUE.to_string()));

        match &primary {
            None => {
                // A store root: no parent or qname, explicit root marker
                doc.add(Field::untokenised(FIELD_ISROOT, MARKER_TRUE.to_string()));
                doc.add(Field::untokenised(FIELD_PATH, String::new()));
                doc.add(Field::untokenised(FIELD_QNAME, String::new()));
            }
            Some(assoc) => {
                doc.add(Field::untokenised(FIELD_QNAME, assoc.qname.to_string()));
                doc.add(Field::untokenised(
                    FIELD_PRIMARYPARENT,
                    assoc.parent.to_string(),
                ));
                doc.add(Field::untokenised(
                    FIELD_PRIMARYASSOCTYPEQNAME,
                    assoc.assoc_type.to_string(),
                ));
            }
        }
        for assoc in self.repo.get_parent_assocs(node)? {
            doc.add(Field::untokenised(FIELD_PARENT, assoc.parent.to_string()));
            doc.add(Field::untokenised(
                FIELD_ASSOCTYPEQNAME,
                assoc.assoc_type.to_string(),
            ));
        }
        for ancestor in &ancestors {
            doc.add(Field::untokenised(FIELD_ANCESTOR, ancestor.to_string()));
        }

        let fts_status = if atomic {
            FTS_STATUS_CLEAN
        } else if is_new {
            FTS_STATUS_NEW
        } else {
            FTS_STATUS_DIRTY
        };
        doc.add(Field::untokenised(FIELD_FTSSTATUS, fts_status.to_string()));

        let mut documents = vec![doc];

        if include_directory && self.is_container(node)? {
            documents.push(self.build_directory_document(
                node,
                primary.as_ref(),
                &ancestors,
                tx_tag,
            )?);
        }

        Ok(BuiltDocuments { documents, atomic })
    }

    /// Synthesized system properties layered over the repository map.
    fn merge_system_properties(
        &self,
        node: &NodeRef,
        properties: &mut BTreeMap<QName, PropertyValue>,
    ) -> Result<()> {
        properties.insert(
            prop_store_protocol(),
            PropertyValue::Text(node.store.protocol.clone()),
        );
        properties.insert(
            prop_store_identifier(),
            PropertyValue::Text(node.store.identifier.clone()),
        );
        properties.insert(prop_node_uuid(), PropertyValue::Text(node.id.clone()));
        properties.insert(
            prop_node_db_id(),
            PropertyValue::Long(self.repo.get_numeric_id(node)? as i64),
        );
        let audit = self.repo.get_audit(node)?;
        properties.insert(prop_created(), PropertyValue::DateTime(audit.created));
        properties.insert(prop_creator(), PropertyValue::Text(audit.creator));
        properties.insert(prop_modified(), PropertyValue::DateTime(audit.modified));
        properties.insert(prop_modifier(), PropertyValue::Text(audit.modifier));
        properties.insert(prop_owner(), PropertyValue::Text(audit.owner));
        if !properties.contains_key(&prop_name()) {
            let name = match self.repo.get_primary_parent(node)? {
                Some(assoc) => assoc.qname.local_name,
                None => node.id.clone(),
            };
            properties.insert(prop_name(), PropertyValue::Text(name));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_property_fields(
        &self,
        doc: &mut Document,
        node: &NodeRef,
        qname: &QName,
        value: &PropertyValue,
        policy: PropertyIndexPolicy,
        node_locale: &str,
        content_indexed: bool,
        index_all_properties: bool,
    ) -> Result<bool> {
        if matches!(value, PropertyValue::Null) {
            return Ok(true);
        }
        let data_type = policy
            .declared_type
            .unwrap_or_else(|| infer_data_type(value));
        let field = property_field(qname);

        match (data_type, value) {
            (DataType::Content, PropertyValue::Content(data)) => {
                // Auxiliary metadata fields are written even when the body is
                // skipped, so the document stays retrievable by metadata
                doc.add(Field::untokenised(&mimetype_field(qname), data.mimetype.clone()));
                doc.add(Field::untokenised(&size_field(qname), data.size.to_string()));
                doc.add(Field::untokenised(&locale_field(qname), data.locale.clone()));

                if !content_indexed || !policy.indexed {
                    return Ok(true);
                }
                let deferred = !index_all_properties
                    && (!policy.atomic || data.size > self.config.max_atomic_content_size);
                if deferred {
                    return Ok(false);
                }
                let text = self.read_content_text(node, qname);
                doc.add(Field::new(&field, text, false, true, true));
                Ok(true)
            }
            (DataType::MlText, PropertyValue::MlText(values)) => {
                for (locale, text) in values {
                    self.add_text_variants(doc, qname, &field, locale, text, policy);
                }
                Ok(true)
            }
            (DataType::Text, _) => {
                let text = match value {
                    PropertyValue::Text(s) => s.clone(),
                    other => match other.to_index_string() {
                        Ok(s) => s,
                        Err(_) => {
                            doc.add(Field::term_only(&field, SENTINEL_CONVERSION_FAILED.to_string()));
                            return Ok(true);
                        }
                    },
                };
                if policy.is_identifier {
                    // Username-like values: exact strings, no locale prefix
                    doc.add(Field::untokenised(&field, text));
                } else {
                    self.add_text_variants(doc, qname, &field, node_locale, &text, policy);
                }
                Ok(true)
            }
            (DataType::DateTime, _) => {
                let (raw, parsed) = match value {
                    PropertyValue::DateTime(d) => {
                        (PropertyValue::DateTime(*d).to_index_string()?, Some(*d))
                    }
                    PropertyValue::Text(s) => (s.clone(), parse_date_literal(s)),
                    other => match other.to_index_string() {
                        Ok(s) => {
                            let parsed = parse_date_literal(&s);
                            (s, parsed)
                        }
                        Err(_) => {
                            doc.add(Field::term_only(&field, SENTINEL_CONVERSION_FAILED.to_string()));
                            return Ok(true);
                        }
                    },
                };
                match policy.tokenisation {
                    TokenisationMode::True => {
                        doc.add(Field::untokenised(&field, raw));
                    }
                    TokenisationMode::False => match parsed {
                        Some(d) => doc.add(Field::untokenised(&field, canonical_date_string(&d))),
                        // Unparsable: keep the raw token, drop the ordering form
                        None => doc.add(Field::untokenised(&field, raw)),
                    },
                    TokenisationMode::Both => {
                        doc.add(Field::untokenised(&field, raw));
                        if let Some(d) = parsed {
                            doc.add(Field::term_only(
                                &sort_field(qname),
                                canonical_date_string(&d),
                            ));
                        }
                    }
                }
                Ok(true)
            }
            _ => {
                match value.to_index_string() {
                    Ok(text) => match policy.tokenisation {
                        TokenisationMode::True => {
                            doc.add(Field::new(&field, text, policy.stored, policy.indexed, true));
                        }
                        TokenisationMode::False => {
                            doc.add(Field::new(&field, text, policy.stored, policy.indexed, false));
                        }
                        TokenisationMode::Both => {
                            doc.add(Field::new(
                                &field,
                                text.clone(),
                                policy.stored,
                                policy.indexed,
                                true,
                            ));
                            doc.add(Field::term_only(&sort_field(qname), text));
                        }
                    },
                    Err(_) => {
                        doc.add(Field::term_only(&field, SENTINEL_CONVERSION_FAILED.to_string()));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Locale-tagged text fields per tokenisation mode. TRUE stores the
    /// `\0locale\0` marker for the analyser; FALSE stores untokenised
    /// `{locale}` literals per expanded locale; BOTH stores the marker plus
    /// `.sort` literals.
    fn add_text_variants(
        &self,
        doc: &mut Document,
        qname: &QName,
        field: &str,
        locale: &str,
        text: &str,
        policy: PropertyIndexPolicy,
    ) {
        match policy.tokenisation {
            TokenisationMode::True => {
                doc.add(Field::new(
                    field,
                    ml_stored_value(locale, text),
                    policy.stored,
                    policy.indexed,
                    true,
                ));
            }
            TokenisationMode::False => {
                for tag in expand_locales(locale, self.config.locale_match) {
                    doc.add(Field::term_only(field, locale_literal(&tag, text)));
                }
            }
            TokenisationMode::Both => {
                doc.add(Field::new(
                    field,
                    ml_stored_value(locale, text),
                    policy.stored,
                    policy.indexed,
                    true,
                ));
                let sort = sort_field(qname);
                for tag in expand_locales(locale, self.config.locale_match) {
                    doc.add(Field::term_only(&sort, locale_literal(&tag, text)));
                }
            }
        }
    }

    /// Body text of a content property, or the sentinel describing why the
    /// body could not be indexed. Recoverable by design: the caller still
    /// gets a document either way.
    fn read_content_text(&self, node: &NodeRef, qname: &QName) -> String {
        let accessor = match self.content.get_reader(node, qname) {
            Ok(Some(accessor)) => accessor,
            Ok(None) => return SENTINEL_CONTENT_MISSING.to_string(),
            Err(e) => {
                warn!(node = %node, property = %qname, error = %e, "content reader unavailable");
                return SENTINEL_CONTENT_MISSING.to_string();
            }
        };
        if accessor.bytes.is_none() {
            return SENTINEL_CONTENT_MISSING.to_string();
        }
        let is_plain_utf8 = accessor.data.mimetype == "text/plain"
            && accessor.data.encoding.eq_ignore_ascii_case("utf-8");
        if is_plain_utf8 {
            return match accessor.read_string() {
                Ok(text) => text,
                Err(e) => {
                    warn!(node = %node, property = %qname, error = %e, "content decode failed");
                    SENTINEL_TRANSFORM_FAILED.to_string()
                }
            };
        }
        match self.content.get_transformer(&accessor.data.mimetype) {
            None => SENTINEL_NO_TRANSFORMER.to_string(),
            Some(transformer) => match transformer.transform(&accessor) {
                Ok(text) => text,
                Err(e) => {
                    warn!(node = %node, property = %qname, error = %e, "content transform failed");
                    SENTINEL_TRANSFORM_FAILED.to_string()
                }
            },
        }
    }

    fn is_container(&self, node: &NodeRef) -> Result<bool> {
        let node_type = self.repo.get_type(node)?;
        Ok(self
            .dictionary
            .get_type_definition(&node_type)
            .map(|d| d.is_container)
            .unwrap_or(false))
    }

    /// Primary ancestor chain, root first, excluding the entity itself.
    fn primary_ancestors(
        &self,
        node: &NodeRef,
        primary: Option<&ChildAssoc>,
    ) -> Result<Vec<NodeRef>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(node.clone());
        let mut current = primary.map(|a| a.parent.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break; // Aliased ancestry; stop rather than loop
            }
            chain.push(parent.clone());
            current = self
                .repo
                .get_primary_parent(&parent)?
                .map(|a| a.parent.clone());
        }
        chain.reverse();
        Ok(chain)
    }

    fn build_directory_document(
        &self,
        node: &NodeRef,
        primary: Option<&ChildAssoc>,
        ancestors: &[NodeRef],
        tx_tag: &str,
    ) -> Result<Document> {
        let mut doc = Document::new();
        doc.add(Field::untokenised(FIELD_ID, node.to_string()));
        doc.add(Field::untokenised(FIELD_TX, tx_tag.to_string()));
        doc.add(Field::untokenised(FIELD_ISCONTAINER, MARKER_TRUE.to_string()));
        doc.add(Field::untokenised(FIELD_PATH, self.primary_path_string(node, primary)?));
        if let Some(assoc) = primary {
            doc.add(Field::untokenised(FIELD_QNAME, assoc.qname.to_string()));
        } else {
            doc.add(Field::untokenised(FIELD_QNAME, String::new()));
        }
        for ancestor in ancestors {
            doc.add(Field::untokenised(FIELD_ANCESTOR, ancestor.to_string()));
        }
        Ok(doc)
    }

    /// `/{ns}a/{ns}b` qname path of the entity's primary lineage.
    fn primary_path_string(
        &self,
        node: &NodeRef,
        primary: Option<&ChildAssoc>,
    ) -> Result<String> {
        let mut segments = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert(node.clone());
        let mut current = primary.cloned();
        while let Some(assoc) = current {
            segments.push(assoc.qname.to_string());
            if !seen.insert(assoc.parent.clone()) {
                break;
            }
            current = self.repo.get_primary_parent(&assoc.parent)?;
        }
        segments.reverse();
        if segments.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("/{}", segments.join("/")))
    }

}

fn infer_data_type(value: &PropertyValue) -> DataType {
    match value {
        PropertyValue::Content(_) => DataType::Content,
        PropertyValue::MlText(_) => DataType::MlText,
        PropertyValue::Text(_) => DataType::Text,
        PropertyValue::DateTime(_) => DataType::DateTime,
        _ => DataType::Other,
    }
}

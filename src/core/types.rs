use std::fmt;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Identity of one repository store (an independent index identity space).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    pub protocol: String,
    pub identifier: String,
}

impl StoreRef {
    pub fn new(protocol: &str, identifier: &str) -> Self {
        StoreRef {
            protocol: protocol.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.identifier)
    }
}

/// Stable identity of one repository entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub store: StoreRef,
    pub id: String,
}

impl NodeRef {
    pub fn new(store: StoreRef, id: &str) -> Self {
        NodeRef {
            store,
            id: id.to_string(),
        }
    }

    /// Parse the `protocol://identifier/id` rendering.
    pub fn parse(text: &str) -> Result<Self> {
        let (protocol, rest) = text.split_once("://").ok_or_else(|| {
            Error::new(ErrorKind::Parse, format!("malformed node reference: {}", text))
        })?;
        let (identifier, id) = rest.split_once('/').ok_or_else(|| {
            Error::new(ErrorKind::Parse, format!("malformed node reference: {}", text))
        })?;
        Ok(NodeRef {
            store: StoreRef::new(protocol, identifier),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.id)
    }
}

/// Namespace-qualified name, rendered `{uri}local`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub namespace_uri: String,
    pub local_name: String,
}

impl QName {
    pub fn new(namespace_uri: &str, local_name: &str) -> Self {
        QName {
            namespace_uri: namespace_uri.to_string(),
            local_name: local_name.to_string(),
        }
    }

    /// Parse the `{uri}local` rendering back into a QName.
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(rest) = text.strip_prefix('{') {
            if let Some(close) = rest.find('}') {
                return Ok(QName {
                    namespace_uri: rest[..close].to_string(),
                    local_name: rest[close + 1..].to_string(),
                });
            }
            return Err(Error::new(
                ErrorKind::Parse,
                format!("unterminated namespace in qname: {}", text),
            ));
        }
        Ok(QName {
            namespace_uri: String::new(),
            local_name: text.to_string(),
        })
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace_uri, self.local_name)
        }
    }
}

/// Reference to a content payload held by the content service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentData {
    pub content_url: String,
    pub mimetype: String,
    pub size: u64,
    pub encoding: String,
    pub locale: String,
}

/// A single property value as read from the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Text(String),
    MlText(Vec<(String, String)>), // (locale, text) pairs
    Content(ContentData),
    DateTime(DateTime<Utc>),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Multi(Vec<PropertyValue>),
}

impl PropertyValue {
    /// String form used for index fields. Content and multilingual values go
    /// through their own field-building paths and are rejected here.
    pub fn to_index_string(&self) -> Result<String> {
        match self {
            PropertyValue::Text(s) => Ok(s.clone()),
            PropertyValue::DateTime(d) => {
                Ok(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            PropertyValue::Long(v) => Ok(v.to_string()),
            PropertyValue::Double(v) => {
                if v.is_finite() {
                    Ok(v.to_string())
                } else {
                    Err(Error::new(
                        ErrorKind::Conversion,
                        format!("non-finite number {}", v),
                    ))
                }
            }
            PropertyValue::Boolean(v) => Ok(v.to_string()),
            other => Err(Error::new(
                ErrorKind::Conversion,
                format!("no direct string form for {:?}", other),
            )),
        }
    }

    /// Flatten multi-values into a list of scalar values.
    pub fn scalars(&self) -> Vec<&PropertyValue> {
        match self {
            PropertyValue::Multi(values) => {
                values.iter().flat_map(|v| v.scalars()).collect()
            }
            other => vec![other],
        }
    }
}

/// One parent association edge of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAssoc {
    pub parent: NodeRef,
    pub child: NodeRef,
    pub assoc_type: QName,
    pub qname: QName,
    pub is_primary: bool,
}

/// One segment of a primary or secondary path, leaf-last.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub node: NodeRef,
    pub qname: QName,
    pub assoc_type: QName,
}

/// An ordered list of parent-link snapshots from the root to the entity.
pub type NodePath = Vec<PathSegment>;

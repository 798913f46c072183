use std::collections::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::QName;

/// Declared data type of a property, resolved once per property and matched
/// exhaustively by the field builder and the query compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Content,
    MlText,
    Text,
    DateTime,
    Other,
}

/// Declared tokenisation policy for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenisationMode {
    True,
    False,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub qname: QName,
    pub data_type: DataType,
    pub stored: bool,
    pub indexed: bool,
    pub tokenisation: TokenisationMode,
    pub atomic: bool,
    pub container_class: QName, // Declaring type or aspect
    pub is_identifier: bool,    // Username-like: exact tokens, no locale prefix
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub qname: QName,
    pub parent: Option<QName>,
    pub is_container: bool,
    pub included_in_super_query: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectDefinition {
    pub qname: QName,
    pub parent: Option<QName>,
    pub included_in_super_query: bool,
}

/// Read-only view of the repository type system.
pub trait Dictionary: Send + Sync {
    fn get_property_definition(&self, qname: &QName) -> Option<PropertyDefinition>;
    fn get_type_definition(&self, qname: &QName) -> Option<TypeDefinition>;
    fn get_aspect_definition(&self, qname: &QName) -> Option<AspectDefinition>;

    /// All registered subtypes of a type, the type itself included.
    fn subtypes(&self, qname: &QName) -> Vec<QName>;

    /// All registered sub-aspects of an aspect, the aspect itself included.
    fn subaspects(&self, qname: &QName) -> Vec<QName>;

    /// Resolve a type qname by exact match, falling back to a unique
    /// case-insensitive match. Two case-insensitive candidates are an error,
    /// never a silent pick.
    fn resolve_type(&self, qname: &QName) -> Result<QName>;

    fn resolve_aspect(&self, qname: &QName) -> Result<QName>;

    fn resolve_property(&self, qname: &QName) -> Result<QName>;
}

/// In-memory dictionary used by tests and self-contained embedders.
pub struct MemoryDictionary {
    properties: RwLock<HashMap<QName, PropertyDefinition>>,
    types: RwLock<HashMap<QName, TypeDefinition>>,
    aspects: RwLock<HashMap<QName, AspectDefinition>>,
}

impl MemoryDictionary {
    pub fn new() -> Self {
        MemoryDictionary {
            properties: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
            aspects: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_property(&self, definition: PropertyDefinition) {
        self.properties
            .write()
            .insert(definition.qname.clone(), definition);
    }

    pub fn register_type(&self, definition: TypeDefinition) {
        self.types.write().insert(definition.qname.clone(), definition);
    }

    pub fn register_aspect(&self, definition: AspectDefinition) {
        self.aspects
            .write()
            .insert(definition.qname.clone(), definition);
    }

    fn resolve_in<'a, I>(keys: I, wanted: &QName, kind: &str) -> Result<QName>
    where
        I: Iterator<Item = &'a QName>,
    {
        let wanted_lower = (
            wanted.namespace_uri.to_lowercase(),
            wanted.local_name.to_lowercase(),
        );
        let mut candidates = Vec::new();
        for key in keys {
            if key == wanted {
                return Ok(key.clone());
            }
            if key.namespace_uri.to_lowercase() == wanted_lower.0
                && key.local_name.to_lowercase() == wanted_lower.1
            {
                candidates.push(key.clone());
            }
        }
        match candidates.len() {
            0 => Err(Error::new(
                ErrorKind::NotFound,
                format!("{} {} is not defined", kind, wanted),
            )),
            1 => Ok(candidates.pop().unwrap()),
            _ => Err(Error::new(
                ErrorKind::Ambiguous,
                format!(
                    "{} {} matches {} definitions case-insensitively",
                    kind,
                    wanted,
                    candidates.len()
                ),
            )),
        }
    }
}

impl Default for MemoryDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary for MemoryDictionary {
    fn get_property_definition(&self, qname: &QName) -> Option<PropertyDefinition> {
        self.properties.read().get(qname).cloned()
    }

    fn get_type_definition(&self, qname: &QName) -> Option<TypeDefinition> {
        self.types.read().get(qname).cloned()
    }

    fn get_aspect_definition(&self, qname: &QName) -> Option<AspectDefinition> {
        self.aspects.read().get(qname).cloned()
    }

    fn subtypes(&self, qname: &QName) -> Vec<QName> {
        let types = self.types.read();
        let mut found = vec![qname.clone()];
        // Walk ancestors of every registered type towards the requested root
        for (candidate, definition) in types.iter() {
            if candidate == qname {
                continue;
            }
            let mut parent = definition.parent.clone();
            while let Some(p) = parent {
                if &p == qname {
                    found.push(candidate.clone());
                    break;
                }
                parent = types.get(&p).and_then(|d| d.parent.clone());
            }
        }
        found.sort();
        found
    }

    fn subaspects(&self, qname: &QName) -> Vec<QName> {
        let aspects = self.aspects.read();
        let mut found = vec![qname.clone()];
        for (candidate, definition) in aspects.iter() {
            if candidate == qname {
                continue;
            }
            let mut parent = definition.parent.clone();
            while let Some(p) = parent {
                if &p == qname {
                    found.push(candidate.clone());
                    break;
                }
                parent = aspects.get(&p).and_then(|d| d.parent.clone());
            }
        }
        found.sort();
        found
    }

    fn resolve_type(&self, qname: &QName) -> Result<QName> {
        let types = self.types.read();
        Self::resolve_in(types.keys(), qname, "type")
    }

    fn resolve_aspect(&self, qname: &QName) -> Result<QName> {
        let aspects = self.aspects.read();
        Self::resolve_in(aspects.keys(), qname, "aspect")
    }

    fn resolve_property(&self, qname: &QName) -> Result<QName> {
        let properties = self.properties.read();
        Self::resolve_in(properties.keys(), qname, "property")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(local: &str) -> QName {
        QName::new("urn:test", local)
    }

    fn type_def(local: &str, parent: Option<&str>) -> TypeDefinition {
        TypeDefinition {
            qname: qn(local),
            parent: parent.map(qn),
            is_container: false,
            included_in_super_query: true,
        }
    }

    #[test]
    fn subtypes_include_self_and_descendants() {
        let dict = MemoryDictionary::new();
        dict.register_type(type_def("base", None));
        dict.register_type(type_def("middle", Some("base")));
        dict.register_type(type_def("leaf", Some("middle")));
        dict.register_type(type_def("other", None));

        let subs = dict.subtypes(&qn("base"));
        assert_eq!(subs, vec![qn("base"), qn("leaf"), qn("middle")]);
    }

    #[test]
    fn case_insensitive_resolution_is_unique_or_fails() {
        let dict = MemoryDictionary::new();
        dict.register_type(type_def("Folder", None));
        assert_eq!(dict.resolve_type(&qn("folder")).unwrap(), qn("Folder"));

        dict.register_type(type_def("folder", None));
        // Exact match wins even with a case-insensitive twin present
        assert_eq!(dict.resolve_type(&qn("folder")).unwrap(), qn("folder"));
        // No exact match and two candidates is ambiguous
        let err = dict.resolve_type(&qn("FOLDER")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ambiguous);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let dict = MemoryDictionary::new();
        let err = dict.resolve_type(&qn("missing")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}

use crate::repo::dictionary::{DataType, PropertyDefinition, TokenisationMode};

/// Immutable per-property indexing policy, computed once from the dictionary
/// definition and passed by value into the field builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyIndexPolicy {
    pub stored: bool,
    pub indexed: bool,
    pub tokenisation: TokenisationMode,
    pub atomic: bool,
    pub is_identifier: bool,
    /// Declared data type; `None` means undeclared, inferred from the value.
    pub declared_type: Option<DataType>,
}

impl PropertyIndexPolicy {
    /// Absent a definition the fallback is store + index + tokenise.
    pub fn from_definition(definition: Option<&PropertyDefinition>) -> Self {
        match definition {
            Some(def) => PropertyIndexPolicy {
                stored: def.stored,
                indexed: def.indexed,
                tokenisation: def.tokenisation,
                atomic: def.atomic,
                is_identifier: def.is_identifier,
                declared_type: Some(def.data_type),
            },
            None => PropertyIndexPolicy {
                stored: true,
                indexed: true,
                tokenisation: TokenisationMode::True,
                atomic: true,
                is_identifier: false,
                declared_type: None,
            },
        }
    }
}

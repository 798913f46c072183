use serde::{Deserialize, Serialize};

/// One field of an index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub stored: bool,
    pub indexed: bool,
    pub tokenised: bool,
}

impl Field {
    pub fn new(name: &str, value: String, stored: bool, indexed: bool, tokenised: bool) -> Self {
        Field {
            name: name.to_string(),
            value,
            stored,
            indexed,
            tokenised,
        }
    }

    /// Stored, indexed, analysed into tokens.
    pub fn tokenised(name: &str, value: String) -> Self {
        Field::new(name, value, true, true, true)
    }

    /// Stored and indexed as a single exact term.
    pub fn untokenised(name: &str, value: String) -> Self {
        Field::new(name, value, true, true, false)
    }

    /// Term-only posting: indexed as an exact term, nothing stored.
    pub fn term_only(name: &str, value: String) -> Self {
        Field::new(name, value, false, true, false)
    }

    /// Stored only, invisible to term lookup.
    pub fn stored_only(name: &str, value: String) -> Self {
        Field::new(name, value, true, false, false)
    }
}

/// The unit stored in the physical index: an ordered, flat field list.
/// One field name may appear any number of times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn add(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// First value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Every value of a field, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name == name)
            .map(|f| f.value.as_str())
            .collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ContentData, NodeRef, QName};

/// A content payload opened for reading.
pub struct ContentAccessor {
    pub data: ContentData,
    pub bytes: Option<Vec<u8>>, // None when the underlying content is missing
}

impl ContentAccessor {
    /// Decode the payload as UTF-8 text.
    pub fn read_string(&self) -> Result<String> {
        let bytes = self.bytes.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("content missing at {}", self.data.content_url),
            )
        })?;
        String::from_utf8(bytes.clone()).map_err(|e| {
            Error::new(ErrorKind::Conversion, format!("content is not UTF-8: {}", e))
        })
    }
}

/// Transforms one content payload into plain UTF-8 text.
pub trait ContentTransformer: Send + Sync {
    fn transform(&self, accessor: &ContentAccessor) -> Result<String>;
}

/// Access to content payloads and mimetype transformers.
pub trait ContentService: Send + Sync {
    /// Open the content of a property. `Ok(None)` means the property points
    /// at a payload the store no longer holds.
    fn get_reader(&self, node: &NodeRef, property: &QName) -> Result<Option<ContentAccessor>>;

    /// Find a transformer from the given mimetype to plain text.
    fn get_transformer(&self, from_mimetype: &str) -> Option<Arc<dyn ContentTransformer>>;
}

type TransformFn = dyn Fn(&ContentAccessor) -> Result<String> + Send + Sync;

struct FnTransformer(Box<TransformFn>);

impl ContentTransformer for FnTransformer {
    fn transform(&self, accessor: &ContentAccessor) -> Result<String> {
        (self.0)(accessor)
    }
}

/// In-memory content store with a transformer registry keyed by mimetype.
pub struct MemoryContentService {
    payloads: RwLock<HashMap<String, Vec<u8>>>,
    transformers: RwLock<HashMap<String, Arc<dyn ContentTransformer>>>,
    properties: RwLock<HashMap<(NodeRef, QName), ContentData>>,
}

impl MemoryContentService {
    pub fn new() -> Self {
        MemoryContentService {
            payloads: RwLock::new(HashMap::new()),
            transformers: RwLock::new(HashMap::new()),
            properties: RwLock::new(HashMap::new()),
        }
    }

    /// Store a payload and bind it to a node property.
    pub fn put_content(
        &self,
        node: &NodeRef,
        property: &QName,
        data: ContentData,
        bytes: Vec<u8>,
    ) {
        self.payloads.write().insert(data.content_url.clone(), bytes);
        self.properties
            .write()
            .insert((node.clone(), property.clone()), data);
    }

    /// Bind a property to a content URL without storing bytes, modelling a
    /// payload the store has lost.
    pub fn put_missing_content(&self, node: &NodeRef, property: &QName, data: ContentData) {
        self.properties
            .write()
            .insert((node.clone(), property.clone()), data);
    }

    pub fn register_transformer<F>(&self, from_mimetype: &str, transform: F)
    where
        F: Fn(&ContentAccessor) -> Result<String> + Send + Sync + 'static,
    {
        self.transformers.write().insert(
            from_mimetype.to_string(),
            Arc::new(FnTransformer(Box::new(transform))),
        );
    }
}

impl Default for MemoryContentService {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentService for MemoryContentService {
    fn get_reader(&self, node: &NodeRef, property: &QName) -> Result<Option<ContentAccessor>> {
        let data = match self
            .properties
            .read()
            .get(&(node.clone(), property.clone()))
        {
            Some(data) => data.clone(),
            None => {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("no content bound to {} on {}", property, node),
                ));
            }
        };
        let bytes = self.payloads.read().get(&data.content_url).cloned();
        Ok(Some(ContentAccessor { data, bytes }))
    }

    fn get_transformer(&self, from_mimetype: &str) -> Option<Arc<dyn ContentTransformer>> {
        self.transformers.read().get(from_mimetype).cloned()
    }
}

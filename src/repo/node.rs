use std::collections::{BTreeMap, HashMap, HashSet};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ChildAssoc, NodePath, NodeRef, PathSegment, PropertyValue, QName, StoreRef};

/// Outcome of comparing one path between two snapshot versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffCode {
    Newer,
    Older,
    Conflict,
    Same,
    Directory,
}

/// One entry of a snapshot diff. A missing destination means the path was
/// removed between the two versions.
#[derive(Debug, Clone)]
pub struct Difference {
    pub code: DiffCode,
    pub source: Option<NodeRef>,
    pub destination: Option<NodeRef>,
    pub path: String,
}

/// Audit trail of one entity, synthesized into its index document.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditInfo {
    pub created: DateTime<Utc>,
    pub creator: String,
    pub modified: DateTime<Utc>,
    pub modifier: String,
    pub owner: String,
}

/// Read-only view of the repository object model.
pub trait RepositoryReader: Send + Sync {
    fn get_properties(&self, node: &NodeRef) -> Result<BTreeMap<QName, PropertyValue>>;
    fn get_type(&self, node: &NodeRef) -> Result<QName>;
    fn get_aspects(&self, node: &NodeRef) -> Result<Vec<QName>>;
    fn get_audit(&self, node: &NodeRef) -> Result<AuditInfo>;
    fn get_primary_parent(&self, node: &NodeRef) -> Result<Option<ChildAssoc>>;
    fn get_parent_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssoc>>;
    fn get_children(&self, node: &NodeRef) -> Result<Vec<ChildAssoc>>;
    fn get_paths(&self, node: &NodeRef) -> Result<Vec<NodePath>>;
    fn exists(&self, node: &NodeRef) -> bool;
    fn get_numeric_id(&self, node: &NodeRef) -> Result<u64>;

    /// Resolve a path in a versioned store snapshot.
    fn lookup_at_version(&self, version: u64, path: &str) -> Result<Option<NodeRef>>;

    /// Diff two snapshot versions of a versioned store.
    fn compare_versions(&self, v1: u64, v2: u64) -> Result<Vec<Difference>>;
}

#[derive(Debug, Clone)]
struct NodeRecord {
    node_type: QName,
    aspects: Vec<QName>,
    properties: BTreeMap<QName, PropertyValue>,
    numeric_id: u64,
    audit: AuditInfo,
}

/// In-memory repository: an arena of association edges plus node records.
/// Paths are built from edge snapshots with a seen-identity set, so aliased
/// or cyclic secondary references terminate instead of hanging.
pub struct MemoryRepository {
    store: StoreRef,
    nodes: RwLock<HashMap<NodeRef, NodeRecord>>,
    edges: RwLock<Vec<ChildAssoc>>,
    roots: RwLock<Vec<NodeRef>>,
    snapshots: RwLock<BTreeMap<u64, HashMap<String, NodeRef>>>,
    next_numeric_id: RwLock<u64>,
}

impl MemoryRepository {
    pub fn new(store: StoreRef) -> Self {
        MemoryRepository {
            store,
            nodes: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            roots: RwLock::new(Vec::new()),
            snapshots: RwLock::new(BTreeMap::new()),
            next_numeric_id: RwLock::new(1),
        }
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn add_root(&self, id: &str, node_type: QName) -> NodeRef {
        let node = NodeRef::new(self.store.clone(), id);
        self.insert_record(&node, node_type);
        self.roots.write().push(node.clone());
        node
    }

    pub fn add_node(
        &self,
        id: &str,
        node_type: QName,
        parent: &NodeRef,
        assoc_type: QName,
        qname: QName,
    ) -> NodeRef {
        let node = NodeRef::new(self.store.clone(), id);
        self.insert_record(&node, node_type);
        self.edges.write().push(ChildAssoc {
            parent: parent.clone(),
            child: node.clone(),
            assoc_type,
            qname,
            is_primary: true,
        });
        node
    }

    /// Re-parent a node: its primary link moves to the new parent.
    pub fn move_node(&self, node: &NodeRef, new_parent: &NodeRef, qname: QName) {
        let mut edges = self.edges.write();
        if let Some(edge) = edges
            .iter_mut()
            .find(|e| &e.child == node && e.is_primary)
        {
            edge.parent = new_parent.clone();
            edge.qname = qname;
        }
    }

    /// Add a secondary (cross-reference) parent link.
    pub fn add_secondary_child(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        assoc_type: QName,
        qname: QName,
    ) {
        self.edges.write().push(ChildAssoc {
            parent: parent.clone(),
            child: child.clone(),
            assoc_type,
            qname,
            is_primary: false,
        });
    }

    pub fn set_property(&self, node: &NodeRef, qname: QName, value: PropertyValue) {
        if let Some(record) = self.nodes.write().get_mut(node) {
            record.properties.insert(qname, value);
            record.audit.modified = Utc::now();
        }
    }

    pub fn add_aspect(&self, node: &NodeRef, aspect: QName) {
        if let Some(record) = self.nodes.write().get_mut(node) {
            record.aspects.push(aspect);
        }
    }

    /// Remove a node and every edge that touches it.
    pub fn delete_node(&self, node: &NodeRef) {
        self.nodes.write().remove(node);
        self.edges
            .write()
            .retain(|e| &e.parent != node && &e.child != node);
        self.roots.write().retain(|r| r != node);
    }

    /// Record a versioned-store snapshot: path -> node at that version.
    pub fn record_snapshot(&self, version: u64, entries: Vec<(String, NodeRef)>) {
        self.snapshots
            .write()
            .insert(version, entries.into_iter().collect());
    }

    fn insert_record(&self, node: &NodeRef, node_type: QName) {
        let mut next = self.next_numeric_id.write();
        let numeric_id = *next;
        *next += 1;
        let now = Utc::now();
        self.nodes.write().insert(
            node.clone(),
            NodeRecord {
                node_type,
                aspects: Vec::new(),
                properties: BTreeMap::new(),
                numeric_id,
                audit: AuditInfo {
                    created: now,
                    creator: "system".to_string(),
                    modified: now,
                    modifier: "system".to_string(),
                    owner: "system".to_string(),
                },
            },
        );
    }

    fn record(&self, node: &NodeRef) -> Result<NodeRecord> {
        self.nodes.read().get(node).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("node {} does not exist", node))
        })
    }

    fn build_paths(
        &self,
        node: &NodeRef,
        edges: &[ChildAssoc],
        seen: &mut HashSet<NodeRef>,
    ) -> Vec<NodePath> {
        if self.roots.read().contains(node) {
            return vec![Vec::new()];
        }
        if !seen.insert(node.clone()) {
            // Cycle through a secondary reference: drop this walk
            return Vec::new();
        }
        let mut paths = Vec::new();
        for edge in edges.iter().filter(|e| &e.child == node) {
            for mut parent_path in self.build_paths(&edge.parent, edges, seen) {
                parent_path.push(PathSegment {
                    node: node.clone(),
                    qname: edge.qname.clone(),
                    assoc_type: edge.assoc_type.clone(),
                });
                paths.push(parent_path);
            }
        }
        seen.remove(node);
        paths
    }
}

impl RepositoryReader for MemoryRepository {
    fn get_properties(&self, node: &NodeRef) -> Result<BTreeMap<QName, PropertyValue>> {
        Ok(self.record(node)?.properties)
    }

    fn get_type(&self, node: &NodeRef) -> Result<QName> {
        Ok(self.record(node)?.node_type)
    }

    fn get_aspects(&self, node: &NodeRef) -> Result<Vec<QName>> {
        Ok(self.record(node)?.aspects)
    }

    fn get_audit(&self, node: &NodeRef) -> Result<AuditInfo> {
        Ok(self.record(node)?.audit)
    }

    fn get_primary_parent(&self, node: &NodeRef) -> Result<Option<ChildAssoc>> {
        Ok(self
            .edges
            .read()
            .iter()
            .find(|e| &e.child == node && e.is_primary)
            .cloned())
    }

    fn get_parent_assocs(&self, node: &NodeRef) -> Result<Vec<ChildAssoc>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| &e.child == node)
            .cloned()
            .collect())
    }

    fn get_children(&self, node: &NodeRef) -> Result<Vec<ChildAssoc>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| &e.parent == node)
            .cloned()
            .collect())
    }

    fn get_paths(&self, node: &NodeRef) -> Result<Vec<NodePath>> {
        self.record(node)?;
        let edges = self.edges.read().clone();
        let mut seen = HashSet::new();
        Ok(self.build_paths(node, &edges, &mut seen))
    }

    fn exists(&self, node: &NodeRef) -> bool {
        self.nodes.read().contains_key(node)
    }

    fn get_numeric_id(&self, node: &NodeRef) -> Result<u64> {
        Ok(self.record(node)?.numeric_id)
    }

    fn lookup_at_version(&self, version: u64, path: &str) -> Result<Option<NodeRef>> {
        Ok(self
            .snapshots
            .read()
            .get(&version)
            .and_then(|entries| entries.get(path).cloned()))
    }

    fn compare_versions(&self, v1: u64, v2: u64) -> Result<Vec<Difference>> {
        let snapshots = self.snapshots.read();
        let from = snapshots.get(&v1).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("no snapshot {}", v1))
        })?;
        let to = snapshots.get(&v2).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("no snapshot {}", v2))
        })?;

        let mut paths: Vec<&String> = from.keys().chain(to.keys()).collect();
        paths.sort();
        paths.dedup();

        let mut differences = Vec::new();
        for path in paths {
            let source = from.get(path).cloned();
            let destination = to.get(path).cloned();
            let code = match (&source, &destination) {
                (Some(a), Some(b)) if a == b => DiffCode::Same,
                // Trailing slash marks a directory entry
                (Some(_), Some(_)) if path.ends_with('/') => DiffCode::Directory,
                (Some(_), Some(_)) => DiffCode::Conflict,
                (None, Some(_)) => DiffCode::Newer,
                (Some(_), None) => DiffCode::Newer, // Removal: destination absent
                (None, None) => DiffCode::Same,
            };
            differences.push(Difference {
                code,
                source,
                destination,
                path: path.clone(),
            });
        }
        Ok(differences)
    }
}

use crate::core::types::QName;

// Structural field names. These are a wire format consumed by the query
// compiler and by external tooling; they must stay stable.
pub const FIELD_ID: &str = "ID";
pub const FIELD_TX: &str = "TX";
pub const FIELD_TYPE: &str = "TYPE";
pub const FIELD_ASPECT: &str = "ASPECT";
pub const FIELD_PARENT: &str = "PARENT";
pub const FIELD_PRIMARYPARENT: &str = "PRIMARYPARENT";
pub const FIELD_QNAME: &str = "QNAME";
pub const FIELD_PRIMARYASSOCTYPEQNAME: &str = "PRIMARYASSOCTYPEQNAME";
pub const FIELD_ASSOCTYPEQNAME: &str = "ASSOCTYPEQNAME";
pub const FIELD_PATH: &str = "PATH";
pub const FIELD_ANCESTOR: &str = "ANCESTOR";
pub const FIELD_ISROOT: &str = "ISROOT";
pub const FIELD_ISCONTAINER: &str = "ISCONTAINER";
pub const FIELD_ISNODE: &str = "ISNODE";
pub const FIELD_FTSSTATUS: &str = "FTSSTATUS";

pub const MARKER_TRUE: &str = "T";

// Full-text status values
pub const FTS_STATUS_CLEAN: &str = "Clean";
pub const FTS_STATUS_NEW: &str = "New";
pub const FTS_STATUS_DIRTY: &str = "Dirty";

// Reserved sentinel values, distinct from any legitimate indexed value.
pub const SENTINEL_NO_TRANSFORMER: &str = "\u{0}nint\u{0}no-transformation";
pub const SENTINEL_TRANSFORM_FAILED: &str = "\u{0}nint\u{0}transformation-failed";
pub const SENTINEL_CONTENT_MISSING: &str = "\u{0}nint\u{0}content-missing";
pub const SENTINEL_CONVERSION_FAILED: &str = "\u{0}nint\u{0}conversion-failed";

/// Index field name of a property: `@{uri}local`.
pub fn property_field(qname: &QName) -> String {
    format!("@{}", qname)
}

pub fn mimetype_field(qname: &QName) -> String {
    format!("@{}.mimetype", qname)
}

pub fn size_field(qname: &QName) -> String {
    format!("@{}.size", qname)
}

pub fn locale_field(qname: &QName) -> String {
    format!("@{}.locale", qname)
}

pub fn sort_field(qname: &QName) -> String {
    format!("@{}.sort", qname)
}

// System model: properties synthesized onto every entity at index time.
pub const SYSTEM_NAMESPACE: &str = "urn:arbor:system";
pub const CONTENT_NAMESPACE: &str = "urn:arbor:content";

pub fn sys_qname(local: &str) -> QName {
    QName::new(SYSTEM_NAMESPACE, local)
}

pub fn prop_created() -> QName {
    sys_qname("created")
}

pub fn prop_creator() -> QName {
    sys_qname("creator")
}

pub fn prop_modified() -> QName {
    sys_qname("modified")
}

pub fn prop_modifier() -> QName {
    sys_qname("modifier")
}

pub fn prop_owner() -> QName {
    sys_qname("owner")
}

pub fn prop_name() -> QName {
    sys_qname("name")
}

pub fn prop_node_db_id() -> QName {
    sys_qname("node-dbid")
}

pub fn prop_node_uuid() -> QName {
    sys_qname("node-uuid")
}

pub fn prop_store_protocol() -> QName {
    sys_qname("store-protocol")
}

pub fn prop_store_identifier() -> QName {
    sys_qname("store-identifier")
}

pub fn prop_locale() -> QName {
    sys_qname("locale")
}

/// `false` here excludes the entity from the index entirely.
pub fn prop_is_indexed() -> QName {
    sys_qname("is-indexed")
}

/// `false` here keeps content metadata but skips content bodies.
pub fn prop_is_content_indexed() -> QName {
    sys_qname("is-content-indexed")
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a remote record (or of a binary, which is also
/// addressed by name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordRef(String);

impl RecordRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for RecordRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session token returned by login and attached to every remote request.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl std::fmt::Debug for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContextId(..)")
    }
}

/// A binary attachment as reported by `binary.find`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryDescriptor {
    /// Canonical name of the binary (e.g. `bdo.201202020000`).
    pub name: RecordRef,
    /// Original filename supplied at upload time.
    pub filename: String,
    /// Record the binary is attached to.
    pub record: RecordRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

/// A remote record.
///
/// Only the fields the transport layer reads are typed; everything else
/// the database returns is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: RecordRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rectype: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<RecordRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Fields sent along with an upload.
///
/// Typed fields cover what the handlers set themselves; `extra` is the
/// open extension map for caller-supplied and extracted values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rectype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<RecordRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RecordFields {
    /// Sets an extension field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Merges string parameters into `extra`; parameters win over existing values.
    pub fn merge_params(&mut self, params: &BTreeMap<String, String>) {
        for (k, v) in params {
            self.extra
                .insert(k.clone(), serde_json::Value::String(v.clone()));
        }
    }

    /// Copies `groups` and `permissions` from the record a new child is created under.
    pub fn inherit_from(&mut self, parent: &Record) {
        self.groups = parent.groups.clone();
        self.permissions = parent.permissions.clone();
    }

    /// Flattens the fields into form pairs.
    ///
    /// Strings are sent verbatim; every other JSON value is sent as its
    /// JSON text.
    pub fn to_form_pairs(&self) -> Result<Vec<(String, String)>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let mut pairs = Vec::new();
        if let serde_json::Value::Object(map) = value {
            for (k, v) in map {
                let text = match v {
                    serde_json::Value::String(s) => s,
                    other => serde_json::to_string(&other)?,
                };
                pairs.push((k, text));
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ref_is_transparent() {
        let r = RecordRef::from("specimen.001");
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"specimen.001\"");
        assert_eq!(r.to_string(), "specimen.001");
    }

    #[test]
    fn context_id_debug_is_redacted() {
        let ctx = ContextId::new("secret-token");
        assert!(!format!("{ctx:?}").contains("secret"));
    }

    #[test]
    fn record_keeps_unknown_fields() {
        let json = r#"{
            "name": "131",
            "rectype": "microscope",
            "groups": ["ncmi"],
            "permissions": [["a"], [], [], ["admin"]],
            "room_name": "Cryo Room"
        }"#;
        let rec: Record = serde_json::from_str(json).unwrap();
        assert_eq!(rec.name.as_str(), "131");
        assert_eq!(rec.groups, vec!["ncmi"]);
        assert_eq!(rec.permissions.len(), 4);
        assert_eq!(rec.extra["room_name"], "Cryo Room");
    }

    #[test]
    fn descriptor_optional_fields() {
        let json = r#"{"name":"bdo.1","filename":"a.dm4","record":"grid.001a"}"#;
        let bdo: BinaryDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(bdo.filesize, None);
        let back = serde_json::to_string(&bdo).unwrap();
        assert!(!back.contains("filesize"));
    }

    #[test]
    fn fields_params_override_extracted() {
        let mut fields = RecordFields::default();
        fields.insert("temperature_ambient_avg", 21.5);
        let mut params = BTreeMap::new();
        params.insert("temperature_ambient_avg".to_string(), "20".to_string());
        params.insert("comments".to_string(), "night run".to_string());
        fields.merge_params(&params);
        assert_eq!(fields.extra["temperature_ambient_avg"], "20");
        assert_eq!(fields.extra["comments"], "night run");
    }

    #[test]
    fn form_pairs_encode_non_strings_as_json() {
        let mut fields = RecordFields {
            rectype: Some("gainref".into()),
            parents: vec![RecordRef::from("131")],
            ..Default::default()
        };
        fields.insert("humidity_ambient_low", 18.2);
        let pairs = fields.to_form_pairs().unwrap();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("rectype").unwrap(), "gainref");
        assert_eq!(get("parents").unwrap(), "[\"131\"]");
        assert_eq!(get("humidity_ambient_low").unwrap(), "18.2");
        assert!(get("groups").is_none());
    }

    #[test]
    fn inherit_copies_acl() {
        let parent = Record {
            name: "131".into(),
            rectype: "microscope".into(),
            parents: vec![],
            groups: vec!["ncmi".into()],
            permissions: vec![vec!["u1".into()]],
            extra: BTreeMap::new(),
        };
        let mut fields = RecordFields::default();
        fields.inherit_from(&parent);
        assert_eq!(fields.groups, parent.groups);
        assert_eq!(fields.permissions, parent.permissions);
    }
}

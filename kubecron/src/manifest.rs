//! Decodes streams of Kubernetes manifests
//!
//! A stream is either a sequence of concatenated JSON documents (when its first non-whitespace
//! byte is `{`) or a multi-document YAML stream. Documents are decoded lazily, one per call to
//! [`Iterator::next`], so that a malformed document is only reported once every document before
//! it has been consumed.

use kube_core::{DynamicObject, GroupVersionKind};
use serde::Deserialize;
use serde_json::Value;

/// Iterates over the manifests in a byte stream
pub struct Manifests<'a> {
    docs: Documents<'a>,
    failed: bool,
}

/// Indicates that a document could not be decoded into a manifest
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The document is not valid JSON
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is not valid YAML
    #[error("invalid YAML document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document does not describe a Kubernetes object
    #[error("document is missing apiVersion or kind")]
    MissingTypeMeta,
}

enum Documents<'a> {
    Json(serde_json::StreamDeserializer<'a, serde_json::de::SliceRead<'a>, Value>),
    Yaml(serde_yaml::Deserializer<'a>),
}

/// Returns the group, version, and kind of a manifest.
///
/// The core group is expressed with a bare version (e.g. `v1`); all other groups use
/// `group/version`.
pub fn gvk(obj: &DynamicObject) -> Result<GroupVersionKind, DecodeError> {
    let types = obj.types.as_ref().ok_or(DecodeError::MissingTypeMeta)?;
    if types.api_version.is_empty() || types.kind.is_empty() {
        return Err(DecodeError::MissingTypeMeta);
    }
    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

// === impl Manifests ===

impl<'a> Manifests<'a> {
    /// Reads manifests from `bytes`, detecting whether they are JSON or YAML encoded
    pub fn new(bytes: &'a [u8]) -> Self {
        let docs = match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Documents::Json(serde_json::Deserializer::from_slice(bytes).into_iter()),
            _ => Documents::Yaml(serde_yaml::Deserializer::from_slice(bytes)),
        };
        Self {
            docs,
            failed: false,
        }
    }

    fn next_value(&mut self) -> Option<Result<Value, DecodeError>> {
        match &mut self.docs {
            Documents::Json(docs) => Some(docs.next()?.map_err(Into::into)),
            Documents::Yaml(docs) => Some(Value::deserialize(docs.next()?).map_err(Into::into)),
        }
    }
}

impl Iterator for Manifests<'_> {
    type Item = Result<DynamicObject, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let res = match self.next_value()? {
                // Empty YAML documents (e.g. a trailing `---`) are skipped.
                Ok(Value::Null) => continue,
                Ok(value) => decode(value),
                Err(error) => Err(error),
            };
            self.failed = res.is_err();
            return Some(res);
        }
    }
}

fn decode(value: Value) -> Result<DynamicObject, DecodeError> {
    let obj = serde_json::from_value::<DynamicObject>(value)?;
    gvk(&obj)?;
    Ok(obj)
}

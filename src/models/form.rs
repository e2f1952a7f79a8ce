//! Decoded form submissions: scalar fields plus file attachments.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

/// A file attachment carried by a multipart part that declared a `filename`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePart {
    pub filename: String,
    pub content_type: String,
    pub content: Bytes,
}

/// Form fields and file attachments keyed by part name.
///
/// Names are unique: a repeated name keeps only its last occurrence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormSubmission {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, FilePart>,
}

impl FormSubmission {
    /// Build a submission from a parsed JSON body.
    ///
    /// Only objects carry fields. Strings are taken verbatim, numbers and
    /// booleans through their JSON rendering, and arrays of strings are
    /// joined with `", "` so they read like a comma-separated form value.
    /// `null` values are dropped. JSON bodies never carry files.
    pub fn from_json(value: Value) -> Self {
        let mut fields = HashMap::new();
        if let Value::Object(map) = value {
            for (name, value) in map {
                let text = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                };
                fields.insert(name, text);
            }
        }
        Self {
            fields,
            files: HashMap::new(),
        }
    }

    /// A scalar field, treating an empty or whitespace-only value as absent.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

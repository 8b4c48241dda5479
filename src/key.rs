//! Active key derivation.
//!
//! A slice compares the key a response was computed for against its current
//! key before applying anything, so the key must change whenever a relevant
//! input changes and stay byte-identical otherwise.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker used in place of the signer when no session is connected.
pub const READ_ONLY_MARKER: &str = "read-only";
/// Marker used in place of the subject before one is selected.
pub const NO_SUBJECT_MARKER: &str = "no-subject";

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// Connected session (or lack of one) the pipeline runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub network_id: u64,
    #[serde(default)]
    pub signer: Option<String>,
}

impl Identity {
    pub fn new(network_id: u64, signer: Option<&str>) -> Self {
        Self {
            network_id,
            signer: signer.map(str::to_string),
        }
    }

    pub fn read_only(network_id: u64) -> Self {
        Self {
            network_id,
            signer: None,
        }
    }

    /// Non-empty signer, if any.
    pub fn signer(&self) -> Option<&str> {
        self.signer
            .as_deref()
            .map(str::trim)
            .filter(|signer| !signer.is_empty())
    }

    pub fn is_read_only(&self) -> bool {
        self.signer().is_none()
    }
}

/// Market, vault, or pool the action operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque cache/staleness key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveKey(String);

impl ActiveKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key of a slice that has never seen form values.
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named input that participates in a key.
///
/// Actions list their fields in a fixed order; the name is part of the key so
/// that two fields swapping values still produce different keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub name: &'static str,
    pub value: String,
}

impl KeyField {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Derive the key for `fields` under `identity` and `subject`.
///
/// Field order is exactly the order of `fields`. Separator characters inside
/// values are escaped so distinct inputs never collapse to one key.
pub fn derive_key(
    identity: Option<&Identity>,
    subject: Option<&SubjectId>,
    fields: &[KeyField],
) -> ActiveKey {
    let mut key = String::new();
    match identity {
        Some(identity) => {
            push_segment(&mut key, &identity.network_id.to_string());
            push_segment(&mut key, identity.signer().unwrap_or(READ_ONLY_MARKER));
        }
        None => {
            push_segment(&mut key, "no-network");
            push_segment(&mut key, READ_ONLY_MARKER);
        }
    }
    push_segment(
        &mut key,
        subject.map(SubjectId::as_str).unwrap_or(NO_SUBJECT_MARKER),
    );
    for field in fields {
        push_segment(&mut key, &format!("{}={}", field.name, field.value.trim()));
    }
    ActiveKey(key)
}

fn push_segment(key: &mut String, segment: &str) {
    if !key.is_empty() {
        key.push(SEPARATOR);
    }
    for ch in segment.chars() {
        if ch == SEPARATOR || ch == ESCAPE {
            key.push(ESCAPE);
        }
        key.push(ch);
    }
}

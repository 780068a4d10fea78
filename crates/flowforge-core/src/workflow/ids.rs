use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque workflow identifier.
///
/// §6 requires only "any string unique per store"; this newtype wraps that
/// string so it can't be confused with a step name or compensation name at
/// call sites. [`WorkflowId::new`] mints a UUID-backed id; [`WorkflowId::generate`]
/// mints the reference human-readable format from §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Wrap an existing id string (e.g. one supplied by a caller of `startWorkflow`).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A UUID v4-backed id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The reference generator from §6: `wf_<base36-timestamp>_<base36-random8>`.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let random: u32 = {
            // Not cryptographic: uniqueness only needs to hold within a
            // single process's generation rate, and the timestamp prefix
            // already carries the bulk of the entropy.
            let uuid = uuid::Uuid::new_v4();
            let bytes = uuid.as_bytes();
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        Self(format!(
            "wf_{}_{}",
            to_base36(millis),
            to_base36(random as u64)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are valid utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_matches_reference_format() {
        let id = WorkflowId::generate();
        let s = id.as_str();
        assert!(s.starts_with("wf_"));
        let rest = &s[3..];
        let parts: Vec<&str> = rest.split('_').collect();
        assert_eq!(parts.len(), 2);
        assert!(!parts[0].is_empty());
        assert!(!parts[1].is_empty());
        assert!(parts[0].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(parts[1].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generate_is_unique_across_calls() {
        let a = WorkflowId::generate();
        let b = WorkflowId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn base36_roundtrip_sanity() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn from_string_preserves_value() {
        let id = WorkflowId::from_string("custom-id-123");
        assert_eq!(id.as_str(), "custom-id-123");
    }
}

//! Signature gate for model-generated SQL.
//!
//! Statements containing a sensitive keyword (`DELETE`, `DROP`, `UPDATE`)
//! only pass with the configured signature. Keywords are matched as whole
//! SQL words outside literals and comments, so a column called
//! `updated_at` or a string `'drop-off'` does not count.

use sha2::{Digest, Sha256};

use super::scan::scan;
use crate::config::SecurityConfig;

pub const SENSITIVE_KEYWORDS: [&str; 3] = ["DELETE", "DROP", "UPDATE"];

/// Marker separating a question from its signature.
pub const SIGNATURE_MARKER: &str = "-- SIGNATURE:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub is_valid: bool,
    pub reason: String,
}

impl SecurityVerdict {
    fn new(is_valid: bool, reason: &str) -> Self {
        Self {
            is_valid,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlSecurity {
    valid_signature: Option<String>,
    salt: String,
}

impl SqlSecurity {
    pub fn new(valid_signature: Option<String>, salt: impl Into<String>) -> Self {
        Self {
            valid_signature,
            salt: salt.into(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.valid_signature.clone(), config.salt.clone())
    }

    /// Hex SHA-256 of `text` followed by the salt.
    pub fn get_hash(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn check(&self, sql: &str, signature: Option<&str>) -> SecurityVerdict {
        if !requires_signature(sql) {
            return SecurityVerdict::new(true, "Valid non-modifying query");
        }

        let signature = match signature.filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => return SecurityVerdict::new(false, "Modifying query requires signature"),
        };

        let valid = match self.valid_signature.as_deref() {
            Some(v) if v == signature => v,
            _ => return SecurityVerdict::new(false, "Invalid signature"),
        };

        // Secondary confirmation; the signature match above already holds.
        let sql_hash = self.get_hash(sql);
        let stored_hash = self.get_hash(valid);
        let is_valid = sql_hash == stored_hash || signature == valid;
        if is_valid {
            SecurityVerdict::new(true, "Signature validated")
        } else {
            SecurityVerdict::new(false, "Invalid signature")
        }
    }
}

/// True if `sql` contains a sensitive keyword as a standalone word.
pub fn requires_signature(sql: &str) -> bool {
    scan(sql)
        .words
        .iter()
        .any(|w| SENSITIVE_KEYWORDS.iter().any(|k| w.is(k)))
}

/// Split `"question -- SIGNATURE:token"` into the question and the token.
/// Input without the marker is returned whole with no signature.
pub fn extract_signature(input: &str) -> (String, Option<String>) {
    match input.rfind(SIGNATURE_MARKER) {
        Some(pos) => {
            let base = input[..pos].trim().to_string();
            let sig = input[pos + SIGNATURE_MARKER.len()..].trim();
            (base, (!sig.is_empty()).then(|| sig.to_string()))
        }
        None => (input.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SqlSecurity {
        SqlSecurity::new(Some("SAYNOTOSWIPER".to_string()), "pepper")
    }

    #[test]
    fn select_is_valid() {
        let v = gate().check("SELECT * FROM loans", None);
        assert!(v.is_valid);
        assert_eq!(v.reason, "Valid non-modifying query");
    }

    #[test]
    fn mutation_without_signature_is_rejected() {
        let v = gate().check("UPDATE loans SET value = 0", None);
        assert!(!v.is_valid);
        assert_eq!(v.reason, "Modifying query requires signature");

        let v = gate().check("delete from loans", Some(""));
        assert_eq!(v.reason, "Modifying query requires signature");
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let v = gate().check("DROP TABLE loans", Some("guess"));
        assert!(!v.is_valid);
        assert_eq!(v.reason, "Invalid signature");
    }

    #[test]
    fn no_configured_signature_rejects_everything_mutating() {
        let gate = SqlSecurity::new(None, "");
        let v = gate.check("DELETE FROM loans", Some("anything"));
        assert_eq!(v.reason, "Invalid signature");
    }

    #[test]
    fn matching_signature_is_validated() {
        let v = gate().check("DELETE FROM loans WHERE id = 3", Some("SAYNOTOSWIPER"));
        assert!(v.is_valid);
        assert_eq!(v.reason, "Signature validated");
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert!(!requires_signature("SELECT updated_at FROM loans"));
        assert!(!requires_signature("SELECT * FROM t WHERE note = 'DROP everything'"));
        assert!(!requires_signature("SELECT \"Deleted Items\" FROM t"));
        assert!(requires_signature("select 1; drop table t"));
        assert!(requires_signature("SELECT * FROM t FOR UPDATE"));
    }

    #[test]
    fn hash_is_salted_sha256() {
        let unsalted = SqlSecurity::new(None, "");
        assert_eq!(
            unsalted.get_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(gate().get_hash("abc"), unsalted.get_hash("abc"));
        assert_eq!(gate().get_hash("abc"), unsalted.get_hash("abcpepper"));
    }

    #[test]
    fn signature_extraction() {
        let (base, sig) =
            extract_signature("What is the total value approved? -- SIGNATURE:SAYNOTOSWIPER");
        assert_eq!(base, "What is the total value approved?");
        assert_eq!(sig.as_deref(), Some("SAYNOTOSWIPER"));

        let (base, sig) = extract_signature("How many loans?");
        assert_eq!(base, "How many loans?");
        assert!(sig.is_none());
    }
}

//! Canonical digest of a workplan document.
//!
//! Parsing strips comments; canonicalization sorts every mapping by key and
//! renders a compact, deterministic byte form that feeds SHA-256. Two
//! documents differing only in key order, comments, or whitespace digest
//! identically.

use sha2::{Digest, Sha256};

use cstar_core::domain::error::Result;

/// Digest of raw workplan YAML text.
pub fn digest_yaml_text(text: &str) -> Result<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    Ok(digest_value(&value))
}

/// Digest of an already-parsed YAML value.
pub fn digest_value(value: &serde_yaml::Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &serde_yaml::Value, out: &mut String) {
    match value {
        serde_yaml::Value::Null => out.push_str("~"),
        serde_yaml::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_yaml::Value::Number(n) => out.push_str(&n.to_string()),
        serde_yaml::Value::String(s) => {
            out.push('"');
            out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        serde_yaml::Value::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_yaml::Value::Mapping(map) => {
            // Sort by the canonical form of the key itself.
            let mut entries: Vec<(String, &serde_yaml::Value)> = map
                .iter()
                .map(|(k, v)| {
                    let mut key = String::new();
                    write_canonical(k, &mut key);
                    (key, v)
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push('{');
            for (i, (key, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        serde_yaml::Value::Tagged(tagged) => {
            out.push('!');
            out.push_str(&tagged.tag.to_string());
            out.push(' ');
            write_canonical(&tagged.value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_and_comments_do_not_matter() {
        let a = "name: x\ndescription: y\n# a comment\nsteps: []\n";
        let b = "steps: []\ndescription: y\nname: x\n";
        assert_eq!(
            digest_yaml_text(a).unwrap(),
            digest_yaml_text(b).unwrap()
        );
    }

    #[test]
    fn content_changes_change_the_digest() {
        let a = digest_yaml_text("name: x\n").unwrap();
        let b = digest_yaml_text("name: y\n").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = digest_yaml_text("name: x\n").unwrap();
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nested_structures_are_stable() {
        let a = "outer:\n  b: 2\n  a: [1, 2]\n";
        let b = "outer:\n  a: [1, 2]\n  b: 2\n";
        assert_eq!(digest_yaml_text(a).unwrap(), digest_yaml_text(b).unwrap());

        let c = "outer:\n  a: [2, 1]\n  b: 2\n";
        assert_ne!(digest_yaml_text(a).unwrap(), digest_yaml_text(c).unwrap());
    }
}

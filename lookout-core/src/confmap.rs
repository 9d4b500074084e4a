//! The one deep-merge used everywhere a configuration tree meets another.
//!
//! Merge rules: absent keys are copied, mappings merge recursively, and any
//! other collision is a full replacement by the source value. Generic YAML
//! decoding can produce mappings keyed by non-string scalars; those keys are
//! coerced to their string form on the way in, and a key that has no string
//! form (a mapping or sequence key) is an error rather than dropped data.

use serde_yaml::{Mapping, Value};

use crate::error::{LookoutError, LookoutResult};

/// Deep-merge `src` into `dst`. Later sources win on scalar conflicts, so
/// precedence chains are expressed by merging lowest priority first.
pub fn merge(dst: &mut Mapping, src: &Mapping) -> LookoutResult<()> {
    for (key, value) in src {
        let key = Value::String(coerce_key(key)?);
        let incoming = normalize(value)?;
        match (dst.get_mut(&key), incoming) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge(existing, &incoming)?;
            }
            (Some(existing), incoming) => *existing = incoming,
            (None, incoming) => {
                dst.insert(key, incoming);
            }
        }
    }
    Ok(())
}

/// Deep-copy a value, coercing every mapping key to a string.
fn normalize(value: &Value) -> LookoutResult<Value> {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, value) in map {
                out.insert(Value::String(coerce_key(key)?), normalize(value)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(seq) => Ok(Value::Sequence(
            seq.iter().map(normalize).collect::<LookoutResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn coerce_key(key: &Value) -> LookoutResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok("null".to_string()),
        other => Err(LookoutError::Merge {
            key: format!("{other:?}"),
            message: "mapping key cannot be coerced to a string".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn absent_keys_are_copied() {
        let mut dst = yaml("a: 1");
        merge(&mut dst, &yaml("b: 2")).unwrap();
        assert_eq!(dst, yaml("a: 1\nb: 2"));
    }

    #[test]
    fn nested_mappings_merge_recursively() {
        let mut dst = yaml("tls:\n  ca_file: /etc/ca\n  insecure: false");
        merge(&mut dst, &yaml("tls:\n  insecure: true")).unwrap();
        assert_eq!(dst, yaml("tls:\n  ca_file: /etc/ca\n  insecure: true"));
    }

    #[test]
    fn scalars_and_sequences_are_replaced_wholesale() {
        let mut dst = yaml("endpoints: [a, b]\nlevel: debug");
        merge(&mut dst, &yaml("endpoints: [c]\nlevel: info")).unwrap();
        assert_eq!(dst, yaml("endpoints: [c]\nlevel: info"));
    }

    #[test]
    fn mapping_replaces_scalar_and_vice_versa() {
        let mut dst = yaml("auth: none");
        merge(&mut dst, &yaml("auth:\n  token: abc")).unwrap();
        assert_eq!(dst, yaml("auth:\n  token: abc"));

        let mut dst = yaml("auth:\n  token: abc");
        merge(&mut dst, &yaml("auth: none")).unwrap();
        assert_eq!(dst, yaml("auth: none"));
    }

    #[test]
    fn non_string_keys_are_coerced() {
        let mut dst = Mapping::new();
        merge(&mut dst, &yaml("8080: http\ntrue: yes\nnull: nothing")).unwrap();
        assert_eq!(dst, yaml("\"8080\": http\n\"true\": yes\n\"null\": nothing"));
    }

    #[test]
    fn uncoercible_key_is_an_error() {
        let src = yaml("? [a, b]\n: value");
        let mut dst = Mapping::new();
        assert!(merge(&mut dst, &src).is_err());
    }

    #[test]
    fn merge_is_idempotent() {
        let src = yaml("a:\n  b: 1\n  c: [x]\nd: two");
        let mut once = yaml("a:\n  b: 0\ne: keep");
        merge(&mut once, &src).unwrap();
        let mut twice = once.clone();
        merge(&mut twice, &src).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn precedence_chain_highest_source_wins() {
        let a = yaml("k: a\nonly_a: 1");
        let b = yaml("k: b\nonly_b: 2");
        let c = yaml("k: c");
        let mut merged = Mapping::new();
        for source in [&a, &b, &c] {
            merge(&mut merged, source).unwrap();
        }
        assert_eq!(merged, yaml("k: c\nonly_a: 1\nonly_b: 2"));
    }
}

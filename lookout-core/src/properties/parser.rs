//! Parsers for the two property encodings.
//!
//! The dotted form is unambiguous because `.` can never occur inside a token.
//! The env-var form is not: wordified identifiers may contain `_`, so the
//! token boundary is wherever the literal `CONFIG`/`ENABLED` keyword begins,
//! and finding it requires scanning candidate positions with backtracking.
//! A candidate split is only accepted once the component and path decode
//! cleanly, which is what lets identifiers containing lookalike text parse.

use std::str::FromStr;

use super::wordify::unwordify;
use super::{ComponentId, ComponentKind, Property, PropertyField, DOTTED_PREFIX, ENV_VAR_PREFIX};
use crate::error::{LookoutError, LookoutResult};

fn property_error(input: &str, message: impl Into<String>) -> LookoutError {
    LookoutError::Property {
        input: input.to_string(),
        message: message.into(),
    }
}

pub(crate) fn parse_dotted(key: &str, value: &str) -> LookoutResult<Property> {
    let rest = key
        .strip_prefix(DOTTED_PREFIX)
        .ok_or_else(|| property_error(key, format!("must begin with {DOTTED_PREFIX:?}")))?;

    let mut tokens = rest.split('.');

    let kind = match tokens.next() {
        Some("receivers") => ComponentKind::Receivers,
        Some("extensions") => ComponentKind::Extensions,
        Some(other) => {
            return Err(property_error(
                key,
                format!("unknown component kind {other:?}, expected receivers or extensions"),
            ))
        }
        None => return Err(property_error(key, "missing component kind")),
    };

    let component = match tokens.next() {
        Some(token) if !token.is_empty() => ComponentId::from_str(token)
            .map_err(|e| property_error(key, format!("invalid component ID: {e}")))?,
        _ => return Err(property_error(key, "missing component ID")),
    };

    match tokens.next() {
        Some("enabled") => {
            if tokens.next().is_some() {
                return Err(property_error(key, "unexpected segments after enabled"));
            }
            Ok(Property::new(
                kind,
                component,
                PropertyField::Enabled,
                Vec::new(),
                value.to_string(),
            ))
        }
        Some("config") => {
            let path: Vec<String> = tokens.map(str::to_string).collect();
            if path.is_empty() {
                return Err(property_error(key, "config property requires a path"));
            }
            if path.iter().any(String::is_empty) {
                return Err(property_error(key, "config path contains an empty segment"));
            }
            Ok(Property::new(
                kind,
                component,
                PropertyField::Config,
                path,
                value.to_string(),
            ))
        }
        Some(other) => Err(property_error(
            key,
            format!("unknown field {other:?}, expected config or enabled"),
        )),
        None => Err(property_error(key, "missing field, expected config or enabled")),
    }
}

pub(crate) fn parse_env_var(name: &str, value: &str) -> LookoutResult<Property> {
    let rest = name
        .strip_prefix(ENV_VAR_PREFIX)
        .ok_or_else(|| property_error(name, format!("must begin with {ENV_VAR_PREFIX}")))?;

    let (kind, rest) = if let Some(rest) = rest.strip_prefix("RECEIVERS_") {
        (ComponentKind::Receivers, rest)
    } else if let Some(rest) = rest.strip_prefix("EXTENSIONS_") {
        (ComponentKind::Extensions, rest)
    } else {
        return Err(property_error(
            name,
            "unknown component kind, expected RECEIVERS or EXTENSIONS",
        ));
    };

    // Try every underscore as the keyword boundary, leftmost first. A
    // candidate only wins if the component (and path, for CONFIG) decode
    // cleanly; otherwise the scan backs up and moves on.
    for (idx, byte) in rest.bytes().enumerate() {
        if byte != b'_' || idx == 0 {
            continue;
        }
        let (component_part, suffix) = rest.split_at(idx);

        let field = if suffix == "_ENABLED" {
            Some((PropertyField::Enabled, ""))
        } else {
            suffix
                .strip_prefix("_CONFIG_")
                .filter(|path| !path.is_empty())
                .map(|path| (PropertyField::Config, path))
        };
        let Some((field, path_part)) = field else {
            continue;
        };

        let Some(component) = decode_component(component_part) else {
            continue;
        };

        let path = match field {
            PropertyField::Enabled => Vec::new(),
            PropertyField::Config => {
                let Ok(decoded) = unwordify(path_part) else {
                    continue;
                };
                let path: Vec<String> = decoded.split('.').map(str::to_string).collect();
                if path.iter().any(String::is_empty) {
                    return Err(property_error(name, "config path contains an empty segment"));
                }
                path
            }
        };

        return Ok(Property::new(kind, component, field, path, value.to_string()));
    }

    Err(property_error(
        name,
        "missing field, expected a _CONFIG_<path> or _ENABLED suffix",
    ))
}

fn decode_component(part: &str) -> Option<ComponentId> {
    let decoded = unwordify(part).ok()?;
    ComponentId::from_str(&decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dotted_config_property() {
        let p = parse_dotted("splunk.discovery.receivers.redis.config.auth", "secret").unwrap();
        assert_eq!(p.kind, ComponentKind::Receivers);
        assert_eq!(p.component, ComponentId::of("redis"));
        assert_eq!(p.field, PropertyField::Config);
        assert_eq!(p.path, vec!["auth".to_string()]);
        assert_eq!(p.value, "secret");
    }

    #[test]
    fn dotted_enabled_property() {
        let p = parse_dotted(
            "splunk.discovery.extensions.docker_observer.enabled",
            "false",
        )
        .unwrap();
        assert_eq!(p.kind, ComponentKind::Extensions);
        assert_eq!(p.field, PropertyField::Enabled);
        assert!(p.path.is_empty());
    }

    #[test]
    fn dotted_named_component_with_deep_path() {
        let p = parse_dotted(
            "splunk.discovery.receivers.smartagent/redis.config.extraDimensions.env",
            "prod",
        )
        .unwrap();
        assert_eq!(p.component, ComponentId::new("smartagent", "redis"));
        assert_eq!(p.path, vec!["extraDimensions".to_string(), "env".to_string()]);
    }

    #[test]
    fn dotted_rejections_are_descriptive() {
        let unknown_kind = parse_dotted("splunk.discovery.processors.batch.enabled", "x");
        assert!(unknown_kind.unwrap_err().to_string().contains("unknown component kind"));

        let missing_field = parse_dotted("splunk.discovery.receivers.redis", "x");
        assert!(missing_field.unwrap_err().to_string().contains("missing field"));

        let empty_path = parse_dotted("splunk.discovery.receivers.redis.config", "x");
        assert!(empty_path.unwrap_err().to_string().contains("requires a path"));

        let bad_field = parse_dotted("splunk.discovery.receivers.redis.disable", "x");
        assert!(bad_field.unwrap_err().to_string().contains("unknown field"));

        assert!(parse_dotted("other.prefix.receivers.redis.enabled", "x").is_err());
        assert!(parse_dotted("splunk.discovery.receivers..enabled", "x").is_err());
    }

    #[test]
    fn env_var_config_property() {
        let p = parse_env_var("SPLUNK_DISCOVERY_RECEIVERS_redis_CONFIG_auth", "secret").unwrap();
        assert_eq!(p.kind, ComponentKind::Receivers);
        assert_eq!(p.component, ComponentId::of("redis"));
        assert_eq!(p.path, vec!["auth".to_string()]);
    }

    #[test]
    fn env_var_wordified_component_and_path() {
        let p = parse_env_var(
            "SPLUNK_DISCOVERY_RECEIVERS_smartagent_x2f_redis_CONFIG_extraDimensions_x2e_env",
            "prod",
        )
        .unwrap();
        assert_eq!(p.component, ComponentId::new("smartagent", "redis"));
        assert_eq!(p.path, vec!["extraDimensions".to_string(), "env".to_string()]);
    }

    #[test]
    fn env_var_enabled_property() {
        let p = parse_env_var("SPLUNK_DISCOVERY_EXTENSIONS_k8s_observer_ENABLED", "false").unwrap();
        assert_eq!(p.kind, ComponentKind::Extensions);
        assert_eq!(p.component, ComponentId::of("k8s_observer"));
        assert_eq!(p.field, PropertyField::Enabled);
    }

    #[test]
    fn env_var_component_containing_underscores_needs_lookahead() {
        // The component is `host_observer`; the parser must not stop at the
        // first underscore.
        let p = parse_env_var("SPLUNK_DISCOVERY_EXTENSIONS_host_observer_ENABLED", "true").unwrap();
        assert_eq!(p.component, ComponentId::of("host_observer"));
    }

    #[test]
    fn env_var_rejections_are_descriptive() {
        let unknown_kind = parse_env_var("SPLUNK_DISCOVERY_PROCESSORS_batch_ENABLED", "x");
        assert!(unknown_kind.unwrap_err().to_string().contains("unknown component kind"));

        let missing_field = parse_env_var("SPLUNK_DISCOVERY_RECEIVERS_redis", "x");
        assert!(missing_field.unwrap_err().to_string().contains("missing field"));

        // CONFIG with nothing after it has no path.
        assert!(parse_env_var("SPLUNK_DISCOVERY_RECEIVERS_redis_CONFIG_", "x").is_err());
    }

    #[test]
    fn roundtrip_dotted_to_env_var() {
        let original = parse_dotted(
            "splunk.discovery.receivers.smartagent/redis.config.tls::insecure",
            "true",
        )
        .unwrap();
        let reparsed = parse_env_var(&original.to_env_var(), &original.value).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn roundtrip_path_segment_resembling_an_escape() {
        // `a_x0` followed by `.a` encodes to `a_x5f_x0_x2e_a`; without the
        // underscore re-encoding it would decode as a NUL escape plus
        // literal text.
        let original = parse_dotted("splunk.discovery.receivers.a.config.a_x0.a", "v").unwrap();
        assert_eq!(original.path, vec!["a_x0".to_string(), "a".to_string()]);
        assert_eq!(
            original.to_env_var(),
            "SPLUNK_DISCOVERY_RECEIVERS_a_CONFIG_a_x5f_x0_x2e_a"
        );
        let reparsed = parse_env_var(&original.to_env_var(), &original.value).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn roundtrip_env_var_to_dotted() {
        let original = parse_env_var(
            "SPLUNK_DISCOVERY_EXTENSIONS_docker_observer_CONFIG_endpoint",
            "unix:///var/run/docker.sock",
        )
        .unwrap();
        let reparsed = parse_dotted(&original.to_dotted_string(), &original.value).unwrap();
        assert_eq!(original, reparsed);
    }

    prop_compose! {
        // Identifier tokens exercising the codec: lowercase words plus
        // characters that must be escaped in env-var form. No dots, which
        // the dotted encoding cannot carry inside a token.
        fn identifier()(s in "[a-z][a-z0-9_]{0,6}", decorated in "[-é😀]{0,2}") -> String {
            format!("{s}{decorated}")
        }
    }

    prop_compose! {
        fn component()(ty in identifier(), name in proptest::option::of(identifier())) -> String {
            match name {
                Some(name) => format!("{ty}/{name}"),
                None => ty,
            }
        }
    }

    proptest! {
        #[test]
        fn roundtrip_property(
            kind in prop_oneof!(Just("receivers"), Just("extensions")),
            component in component(),
            path in proptest::collection::vec("[a-z][a-z0-9_]{0,5}(::[a-z][a-z0-9]{0,3})?", 1..4),
            value in "[a-z0-9]{1,8}",
        ) {
            let dotted = format!("splunk.discovery.{kind}.{component}.config.{}", path.join("."));
            let parsed = parse_dotted(&dotted, &value).unwrap();
            let via_env = parse_env_var(&parsed.to_env_var(), &value).unwrap();
            prop_assert_eq!(&parsed, &via_env);
            let via_dotted = parse_dotted(&via_env.to_dotted_string(), &value).unwrap();
            prop_assert_eq!(&parsed, &via_dotted);
        }
    }
}

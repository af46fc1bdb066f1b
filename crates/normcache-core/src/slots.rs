//! Query slot management: slot identity and fetch policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::descriptor::QueryDescriptor;
use crate::policies::TypePolicies;
use crate::types::SlotKey;

/// Operation variables.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// How a query consults the cache and the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Always ask the network, write the answer into the cache
    NetworkOnly,
    /// Never ask the network
    #[default]
    CacheOnly,
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkOnly => write!(f, "network-only"),
            Self::CacheOnly => write!(f, "cache-only"),
        }
    }
}

impl FromStr for FetchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "network-only" | "network_only" => Ok(Self::NetworkOnly),
            "cache-only" | "cache_only" => Ok(Self::CacheOnly),
            _ => Err(format!(
                "Unknown fetch policy: '{}'. Valid values: network-only, cache-only",
                s
            )),
        }
    }
}

/// Maps root fields plus arguments to slot keys.
#[derive(Debug, Clone, Default)]
pub struct QuerySlotManager {
    policies: TypePolicies,
}

impl QuerySlotManager {
    /// Create a manager over the given policies.
    pub fn new(policies: TypePolicies) -> Self {
        Self { policies }
    }

    /// The registered type policies.
    pub fn policies(&self) -> &TypePolicies {
        &self.policies
    }

    /// Canonical slot key for `field` called with `args`.
    ///
    /// Only the key-bearing arguments declared for the field take part,
    /// serialized with sorted keys, so call-site argument order never
    /// affects identity.
    pub fn resolve_slot(&self, field: &str, args: &Variables) -> SlotKey {
        SlotKey::new(field, canonical_args(args, self.policies.key_args(field)))
    }

    /// Slot key for a descriptor; its own key-argument declaration wins.
    pub fn resolve_for(&self, descriptor: &QueryDescriptor, args: &Variables) -> SlotKey {
        match descriptor.key_args.as_deref() {
            Some(keys) => SlotKey::new(&descriptor.root_field, canonical_args(args, Some(keys))),
            None => self.resolve_slot(&descriptor.root_field, args),
        }
    }
}

/// Serialize the key-bearing subset of `args`; `None` means all of them.
fn canonical_args(args: &Variables, key_args: Option<&[String]>) -> String {
    let mut names: Vec<&String> = args
        .keys()
        .filter(|name| key_args.is_none_or(|keys| keys.contains(*name)))
        .collect();
    if names.is_empty() {
        return String::new();
    }
    names.sort();

    let mut out = String::from("{");
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(&serde_json::Value::String(name.clone()), &mut out);
        out.push(':');
        write_canonical(&args[name.as_str()], &mut out);
    }
    out.push('}');
    out
}

/// JSON with object keys sorted at every depth.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&serde_json::Value::String(k.clone()), out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::ROOT_QUERY_TYPE;
    use serde_json::json;

    fn vars(value: serde_json::Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    fn manager() -> QuerySlotManager {
        QuerySlotManager::new(TypePolicies::new().with_key_args(
            ROOT_QUERY_TYPE,
            "entries",
            ["search"],
        ))
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let manager = manager();
        let mut a = Variables::new();
        a.insert("search".into(), json!("1"));
        a.insert("x".into(), json!("a"));
        let mut b = Variables::new();
        b.insert("x".into(), json!("a"));
        b.insert("search".into(), json!("1"));

        let slot_a = manager.resolve_slot("entries", &a);
        let slot_b = manager.resolve_slot("entries", &b);
        assert_eq!(slot_a, slot_b);
        assert_eq!(slot_a.to_string(), r#"entries({"search":"1"})"#);
    }

    #[test]
    fn test_non_key_args_ignored() {
        let manager = manager();
        let a = manager.resolve_slot("entries", &vars(json!({"search": "1", "page": 1})));
        let b = manager.resolve_slot("entries", &vars(json!({"search": "1", "page": 2})));
        let c = manager.resolve_slot("entries", &vars(json!({"search": "2"})));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_undeclared_field_uses_all_args() {
        let manager = manager();
        let a = manager.resolve_slot("items", &vars(json!({"b": 1, "a": {"z": 1, "y": [2]}})));
        assert_eq!(a.args, r#"{"a":{"y":[2],"z":1},"b":1}"#);
    }

    #[test]
    fn test_no_args_gives_bare_field() {
        let manager = manager();
        let slot = manager.resolve_slot("entries", &Variables::new());
        assert_eq!(slot.to_string(), "entries");
    }

    #[test]
    fn test_descriptor_key_args_override_policies() {
        let manager = manager();
        let desc = QueryDescriptor::query("entries", "entries").with_key_args(["x"]);
        let slot = manager.resolve_for(&desc, &vars(json!({"search": "1", "x": "a"})));
        assert_eq!(slot.args, r#"{"x":"a"}"#);
    }

    #[test]
    fn test_fetch_policy_parse() {
        assert_eq!("network-only".parse::<FetchPolicy>(), Ok(FetchPolicy::NetworkOnly));
        assert_eq!("cache-only".parse::<FetchPolicy>(), Ok(FetchPolicy::CacheOnly));
        assert!("cache-first".parse::<FetchPolicy>().is_err());
        assert_eq!(FetchPolicy::NetworkOnly.to_string(), "network-only");
    }
}

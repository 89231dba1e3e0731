use crate::config::TenantConfig;
use opentelemetry_proto::tonic::common::v1::{KeyValue, any_value};

/// Outcome of resolving a tenant identity from resource attributes.
///
/// `Defaulted` signals that the caller must write the primary label back
/// onto the resource so downstream consumers see an explicit tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Identified(String),
    Defaulted(String),
    Unresolved,
}

/// Resolves a tenant identity from a resource's attribute list.
///
/// The primary label is checked first, then the fallback labels in their
/// configured order. Only non-empty string values count; an attribute of
/// any other dynamic type is treated as absent. When duplicates exist, the
/// first usable attribute in list order wins.
pub fn resolve(attributes: &[KeyValue], config: &TenantConfig) -> Resolution {
    if !config.label.is_empty()
        && let Some(value) = lookup(attributes, &config.label)
    {
        return Resolution::Identified(value.to_string());
    }

    for label in &config.fallback_labels {
        if let Some(value) = lookup(attributes, label) {
            return Resolution::Identified(value.to_string());
        }
    }

    if config.default.is_empty() {
        Resolution::Unresolved
    } else {
        Resolution::Defaulted(config.default.clone())
    }
}

fn lookup<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .filter(|attribute| attribute.key == key)
        .find_map(string_value)
}

fn string_value(attribute: &KeyValue) -> Option<&str> {
    match attribute.value.as_ref()?.value.as_ref()? {
        any_value::Value::StringValue(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

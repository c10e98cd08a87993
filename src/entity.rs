//! Entity records and the capability interface.
//!
//! The aggregator never looks at raw columns. It asks an [`EntityRecord`]
//! whether it has a named capability (`is_esol_2024`, `win11_upgraded`, ...)
//! and what its dimension value is. [`FieldMapping`] resolves those names
//! against the attributes of a loaded [`DeviceRecord`].

use crate::models::DimensionType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Capability-set view of one entity.
pub trait EntityRecord {
    /// Whether the entity has the named capability. Unknown names are `false`.
    fn has_capability(&self, capability: &str) -> bool;

    /// Raw value of a grouping dimension, if any.
    fn dimension_value(&self, dimension: DimensionType) -> Option<&str>;
}

/// One attribute cell as delivered by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    fn is_truthy(&self) -> bool {
        match self {
            AttributeValue::Bool(b) => *b,
            AttributeValue::Number(n) => *n != 0.0 && !n.is_nan(),
            AttributeValue::Text(s) => {
                let s = s.trim().to_lowercase();
                !s.is_empty() && !matches!(s.as_str(), "false" | "no" | "0" | "n")
            }
        }
    }

    fn as_text(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Number(n) => n.to_string(),
            AttributeValue::Text(s) => s.clone(),
        }
    }
}

/// A device row: attribute name to value. Null cells read as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRecord {
    attributes: BTreeMap<String, Option<AttributeValue>>,
}

impl DeviceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insert.
    pub fn with(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), Some(value));
        self
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, AttributeValue::Text(value.into()))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).and_then(|v| v.as_ref())
    }
}

/// How the rules of a capability combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

/// A single test against one attribute.
///
/// With no matcher set the rule tests truthiness of the attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default)]
    pub negate: bool,
}

impl FieldRule {
    fn matches(&self, record: &DeviceRecord) -> bool {
        let hit = match record.attribute(&self.field) {
            None => false,
            Some(value) => self.matches_value(value),
        };
        hit != self.negate
    }

    fn matches_value(&self, value: &AttributeValue) -> bool {
        if self.equals.is_none() && self.any_of.is_empty() && self.contains.is_empty() {
            return value.is_truthy();
        }

        let text = self.fold(&value.as_text());
        let text = text.trim();

        if let Some(ref expected) = self.equals {
            if text != self.fold(expected).trim() {
                return false;
            }
        }
        if !self.any_of.is_empty() && !self.any_of.iter().any(|v| self.fold(v).trim() == text) {
            return false;
        }
        if !self.contains.is_empty() && !self.contains.iter().any(|p| text.contains(&self.fold(p)))
        {
            return false;
        }
        true
    }

    fn fold(&self, s: &str) -> String {
        if self.case_insensitive {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }
}

/// Named capability: a set of field rules.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityDef {
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

impl CapabilityDef {
    pub fn matches(&self, record: &DeviceRecord) -> bool {
        match self.mode {
            MatchMode::All => self.rules.iter().all(|r| r.matches(record)),
            MatchMode::Any => self.rules.iter().any(|r| r.matches(record)),
        }
    }
}

/// Resolves capability and dimension names to device attributes.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    dimensions: HashMap<DimensionType, String>,
    capabilities: HashMap<String, CapabilityDef>,
}

impl FieldMapping {
    pub fn new(
        dimensions: HashMap<DimensionType, String>,
        capabilities: HashMap<String, CapabilityDef>,
    ) -> Self {
        Self {
            dimensions,
            capabilities,
        }
    }

    pub fn knows_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// View a device through this mapping.
    pub fn view<'a>(&'a self, record: &'a DeviceRecord) -> MappedRecord<'a> {
        MappedRecord {
            record,
            mapping: self,
        }
    }

    /// View a whole collection through this mapping.
    pub fn view_all<'a>(&'a self, records: &'a [DeviceRecord]) -> Vec<MappedRecord<'a>> {
        records.iter().map(|r| self.view(r)).collect()
    }
}

/// A [`DeviceRecord`] paired with the mapping that interprets it.
#[derive(Debug, Clone, Copy)]
pub struct MappedRecord<'a> {
    record: &'a DeviceRecord,
    mapping: &'a FieldMapping,
}

impl EntityRecord for MappedRecord<'_> {
    fn has_capability(&self, capability: &str) -> bool {
        self.mapping
            .capabilities
            .get(capability)
            .map(|def| def.matches(self.record))
            .unwrap_or(false)
    }

    fn dimension_value(&self, dimension: DimensionType) -> Option<&str> {
        let field = self.mapping.dimensions.get(&dimension)?;
        match self.record.attribute(field)? {
            AttributeValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> FieldMapping {
        let mut dims = HashMap::new();
        dims.insert(DimensionType::Country, "Country".to_string());
        dims.insert(DimensionType::Site, "Site Location".to_string());

        let mut caps = HashMap::new();
        caps.insert(
            "is_esol_2024".to_string(),
            CapabilityDef {
                mode: MatchMode::All,
                rules: vec![FieldRule {
                    field: "Action to take".to_string(),
                    equals: Some("Urgent Replacement".to_string()),
                    ..Default::default()
                }],
            },
        );
        caps.insert(
            "win11_path".to_string(),
            CapabilityDef {
                mode: MatchMode::Any,
                rules: vec![
                    FieldRule {
                        field: "Current OS".to_string(),
                        contains: vec!["windows 11".to_string()],
                        case_insensitive: true,
                        ..Default::default()
                    },
                    FieldRule {
                        field: "Action to take".to_string(),
                        any_of: vec!["Urgent Replacement".to_string()],
                        ..Default::default()
                    },
                ],
            },
        );
        caps.insert(
            "is_kiosk".to_string(),
            CapabilityDef {
                mode: MatchMode::All,
                rules: vec![FieldRule {
                    field: "Kiosk".to_string(),
                    ..Default::default()
                }],
            },
        );
        FieldMapping::new(dims, caps)
    }

    #[test]
    fn test_equals_rule() {
        let m = mapping();
        let device = DeviceRecord::new().with_text("Action to take", "Urgent Replacement");
        assert!(m.view(&device).has_capability("is_esol_2024"));

        let other = DeviceRecord::new().with_text("Action to take", "No action");
        assert!(!m.view(&other).has_capability("is_esol_2024"));
    }

    #[test]
    fn test_any_mode_and_case_folding() {
        let m = mapping();
        let upgraded =
            DeviceRecord::new().with_text("Current OS", "Microsoft WINDOWS 11 Enterprise");
        assert!(m.view(&upgraded).has_capability("win11_path"));

        let legacy = DeviceRecord::new().with_text("Current OS", "Windows 10");
        assert!(!m.view(&legacy).has_capability("win11_path"));
    }

    #[test]
    fn test_truthiness_rule() {
        let m = mapping();
        let yes = DeviceRecord::new().with("Kiosk", AttributeValue::Bool(true));
        let text_no = DeviceRecord::new().with_text("Kiosk", "No");
        let missing = DeviceRecord::new();
        assert!(m.view(&yes).has_capability("is_kiosk"));
        assert!(!m.view(&text_no).has_capability("is_kiosk"));
        assert!(!m.view(&missing).has_capability("is_kiosk"));
    }

    #[test]
    fn test_unknown_capability_is_false() {
        let m = mapping();
        let device = DeviceRecord::new().with_text("Action to take", "Urgent Replacement");
        assert!(!m.view(&device).has_capability("does_not_exist"));
    }

    #[test]
    fn test_dimension_lookup() {
        let m = mapping();
        let device = DeviceRecord::new()
            .with_text("Country", "Germany")
            .with("Site Location", AttributeValue::Number(4.0));
        let view = m.view(&device);
        assert_eq!(view.dimension_value(DimensionType::Country), Some("Germany"));
        assert_eq!(view.dimension_value(DimensionType::Site), None);
        assert_eq!(view.dimension_value(DimensionType::Sdm), None);
    }

    #[test]
    fn test_device_record_from_json_drops_nulls() {
        let json = r#"{"Country": "France", "Kiosk": null, "Count": 3, "Flag": true}"#;
        let device: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            device.attribute("Country"),
            Some(&AttributeValue::Text("France".to_string()))
        );
        assert_eq!(device.attribute("Kiosk"), None);
        assert_eq!(device.attribute("Count"), Some(&AttributeValue::Number(3.0)));
    }
}

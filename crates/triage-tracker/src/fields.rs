//! Custom-field metadata and dropdown option resolution.
//!
//! Predicted labels rarely match a tracker's dropdown options byte for byte
//! ("Tech Support" vs "tech-support"). Resolution tries a case-insensitive
//! exact match first, then a normalized match; anything else is reported as
//! unmatched and left to the caller.

use serde::{Deserialize, Serialize};

pub const DROPDOWN: &str = "drop_down";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub type_config: TypeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub options: Vec<DropdownOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize)]
pub(crate) struct FieldList {
    #[serde(default)]
    pub fields: Vec<CustomField>,
}

/// How a predicted value maps onto a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Send this JSON-ready value for the field.
    Value(String),
    /// Dropdown with no option matching the prediction.
    Unmatched,
}

impl CustomField {
    pub fn is_dropdown(&self) -> bool {
        self.field_type == DROPDOWN
    }

    /// Option whose name matches `value`, exactly (ignoring case) or after
    /// normalization. Exact matches win over normalized ones.
    pub fn find_option(&self, value: &str) -> Option<&DropdownOption> {
        let value = value.trim();
        let options = &self.type_config.options;
        if let Some(opt) = options.iter().find(|o| o.name.eq_ignore_ascii_case(value)) {
            return Some(opt);
        }
        let wanted = normalize_label(value);
        if wanted.is_empty() {
            return None;
        }
        options.iter().find(|o| normalize_label(&o.name) == wanted)
    }

    /// Resolve a predicted value: dropdowns to an option id, everything
    /// else passed through.
    pub fn resolve(&self, value: &str) -> Resolution {
        if !self.is_dropdown() {
            return Resolution::Value(value.trim().to_string());
        }
        match self.find_option(value) {
            Some(opt) => Resolution::Value(opt.id.clone()),
            None => Resolution::Unmatched,
        }
    }
}

/// Lowercase, drop punctuation, collapse `_`, `-` and whitespace runs into a
/// single space.
pub fn normalize_label(s: &str) -> String {
    let mapped: String = s
        .chars()
        .filter_map(|c| match c {
            '_' | '-' => Some(' '),
            c if c.is_whitespace() => Some(' '),
            c if c.is_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Human-readable note for a value that could not be set on the task.
pub fn predicted_note(field: &str, value: &str) -> String {
    format!("Predicted {field}: {value}")
}

pub fn predicted_tags_note(tags: &[String]) -> String {
    format!("Predicted tags: {}", tags.join(", "))
}

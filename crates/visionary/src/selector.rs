//! Selector descriptors and their canonical keys.
//!
//! A descriptor is one locator strategy (role, label, placeholder, text or a
//! raw CSS query) plus a value and an optional options object. The canonical
//! key `"{kind}:{value}{json(options)}"` is what the knowledge base stores and
//! what every set-membership check compares.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Locator strategy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    /// Accessible role (e.g. `button` with a `name` option)
    #[serde(rename = "getByRole", alias = "role")]
    Role,
    /// Associated label text
    #[serde(rename = "getByLabel", alias = "label")]
    Label,
    /// Placeholder attribute
    #[serde(rename = "getByPlaceholder", alias = "placeholder")]
    Placeholder,
    /// Visible text content
    #[serde(rename = "getByText", alias = "text")]
    Text,
    /// Raw CSS query
    #[serde(rename = "locator", alias = "css")]
    Css,
}

impl SelectorKind {
    /// Short name used in canonical keys
    #[must_use]
    pub const fn key_name(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Label => "label",
            Self::Placeholder => "placeholder",
            Self::Text => "text",
            Self::Css => "css",
        }
    }

    /// Parse a key prefix; accepts the short names and the assets-document names
    #[must_use]
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name {
            "role" | "getByRole" => Some(Self::Role),
            "label" | "getByLabel" => Some(Self::Label),
            "placeholder" | "getByPlaceholder" => Some(Self::Placeholder),
            "text" | "getByText" => Some(Self::Text),
            "css" | "locator" => Some(Self::Css),
            _ => None,
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

/// One candidate locator for a logical element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorDescriptor {
    /// Strategy kind
    #[serde(rename = "type")]
    pub kind: SelectorKind,
    /// Strategy value (role name, label text, CSS query, ...)
    pub value: String,
    /// Strategy options such as an accessible-name filter
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_options"
    )]
    pub options: Option<Map<String, Value>>,
}

fn non_empty_options<'de, D>(deserializer: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let options = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(options.filter(|o| !o.is_empty()))
}

impl SelectorDescriptor {
    /// Create a descriptor without options
    #[must_use]
    pub fn new(kind: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            options: None,
        }
    }

    /// Role selector
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::new(SelectorKind::Role, role)
    }

    /// Label selector
    #[must_use]
    pub fn label(text: impl Into<String>) -> Self {
        Self::new(SelectorKind::Label, text)
    }

    /// Placeholder selector
    #[must_use]
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::new(SelectorKind::Placeholder, text)
    }

    /// Text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(SelectorKind::Text, text)
    }

    /// Raw CSS query selector
    #[must_use]
    pub fn css(query: impl Into<String>) -> Self {
        Self::new(SelectorKind::Css, query)
    }

    /// Attach an options object; an empty object clears options
    #[must_use]
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = if options.is_empty() {
            None
        } else {
            Some(options)
        };
        self
    }

    /// Attach an accessible-name filter
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.options
            .get_or_insert_with(Map::new)
            .insert("name".to_string(), Value::String(name.into()));
        self
    }

    /// Accessible-name filter, if present
    #[must_use]
    pub fn name_filter(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|o| o.get("name"))
            .and_then(Value::as_str)
    }

    /// Canonical key: `"{kind}:{value}{json(options)}"`
    #[must_use]
    pub fn key(&self) -> String {
        let options = self
            .options
            .as_ref()
            .map(|o| Value::Object(o.clone()).to_string())
            .unwrap_or_default();
        format!("{}:{}{}", self.kind.key_name(), self.value, options)
    }

    /// Parse a canonical key back into a descriptor.
    ///
    /// Keys written by older knowledge bases (`getByRole:button`) are accepted.
    /// The options suffix starts at the first `{` from which the rest of the
    /// key parses as a JSON object, so braces inside the value or inside an
    /// option string are kept where they belong.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        let (kind, rest) = key.split_once(':')?;
        let kind = SelectorKind::from_key_name(kind)?;

        if rest.ends_with('}') {
            for (idx, _) in rest.match_indices('{') {
                if let Ok(options) = serde_json::from_str::<Map<String, Value>>(&rest[idx..]) {
                    return Some(Self::new(kind, &rest[..idx]).with_options(options));
                }
            }
        }
        Some(Self::new(kind, rest))
    }

    /// JavaScript expression that counts the elements this descriptor matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        let value = js_string(&self.value);
        let name_filter = self.name_filter().map(js_string);
        let exact = self
            .options
            .as_ref()
            .and_then(|o| o.get("exact"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match self.kind {
            SelectorKind::Css => format!("document.querySelectorAll({value}).length"),
            SelectorKind::Placeholder => format!(
                "Array.from(document.querySelectorAll('[placeholder]')).filter(el => {}).length",
                text_match("el.getAttribute('placeholder')", &value, exact)
            ),
            SelectorKind::Text => format!(
                "Array.from(document.querySelectorAll('body *')).filter(el => {} && !Array.from(el.children).some(c => {})).length",
                text_match("el.textContent", &value, exact),
                text_match("c.textContent", &value, exact)
            ),
            SelectorKind::Label => format!(
                "new Set([...Array.from(document.querySelectorAll('label')).filter(l => {}).map(l => l.control).filter(Boolean), ...Array.from(document.querySelectorAll('[aria-label]')).filter(el => {})]).size",
                text_match("l.textContent", &value, exact),
                text_match("el.getAttribute('aria-label')", &value, exact)
            ),
            SelectorKind::Role => {
                let implicit = implicit_role_query(&self.value);
                let role = css_attr_string(&self.value);
                let query = if implicit.is_empty() {
                    format!("[role={role}]")
                } else {
                    format!("[role={role}],{implicit}")
                };
                let filter = name_filter.map_or_else(
                    || "true".to_string(),
                    |name| {
                        text_match(
                            "(el.getAttribute('aria-label') || el.textContent || el.value || '')",
                            &name,
                            exact,
                        )
                    },
                );
                format!(
                    "Array.from(document.querySelectorAll({})).filter(el => {filter}).length",
                    js_string(&query)
                )
            }
        }
    }
}

impl fmt::Display for SelectorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Double-quoted CSS attribute value
fn css_attr_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn text_match(subject: &str, needle: &str, exact: bool) -> String {
    if exact {
        format!("({subject} || '').trim() === {needle}")
    } else {
        format!("({subject} || '').toLowerCase().includes({needle}.toLowerCase())")
    }
}

fn implicit_role_query(role: &str) -> &'static str {
    match role {
        "button" => "button,input[type=button],input[type=submit],input[type=reset]",
        "link" => "a[href]",
        "textbox" => "input:not([type]),input[type=text],input[type=email],input[type=password],input[type=search],input[type=tel],input[type=url],textarea",
        "checkbox" => "input[type=checkbox]",
        "radio" => "input[type=radio]",
        "combobox" | "listbox" => "select",
        "heading" => "h1,h2,h3,h4,h5,h6",
        "img" => "img[alt]",
        _ => "",
    }
}

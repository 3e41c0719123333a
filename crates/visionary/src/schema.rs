//! Typed assets document produced by the asset generator.
//!
//! The document describes one main page object, optional additional page
//! objects and the ordered test steps. It is validated at the boundary so a
//! malformed LLM answer fails fast instead of being partially consumed.

use crate::result::{VisionaryError, VisionaryResult};
use crate::selector::SelectorDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Element kind, which constrains the applicable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Text input or textarea
    Input,
    /// Button
    Button,
    /// Static text
    Text,
    /// Alert or message region
    Alert,
    /// Select / dropdown
    Select,
    /// Checkbox
    Checkbox,
    /// Link
    Link,
}

impl ElementKind {
    /// Actions this kind of element supports
    #[must_use]
    pub const fn allowed_actions(self) -> &'static [ElementAction] {
        use ElementAction::{Check, Clear, Click, Fill, GetValue, Select};
        match self {
            Self::Input => &[Fill, Click, Clear, GetValue],
            Self::Button | Self::Link => &[Click],
            Self::Text | Self::Alert => &[Click],
            Self::Select => &[Select, Click, GetValue],
            Self::Checkbox => &[Check, Click],
        }
    }
}

/// Action a generated page-object method performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementAction {
    /// Type text
    Fill,
    /// Click
    Click,
    /// Check a checkbox
    Check,
    /// Choose an option
    Select,
    /// Clear a field
    Clear,
    /// Read a field value
    GetValue,
}

/// Confidence metadata attached by the enhancement step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningMetadata {
    /// Success rate of the element's learned record (percent)
    pub confidence: f64,
    /// Last time one of the working selectors succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Always true once enhanced
    pub enhanced: bool,
}

/// One logical UI element and its candidate selectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElementSpec {
    /// camelCase element name (e.g. `loginButton`)
    pub name: String,
    /// Element kind; generators may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<ElementKind>,
    /// Actions the page object exposes for this element
    #[serde(default)]
    pub actions: Vec<ElementAction>,
    /// Ordered candidate selectors
    pub selectors: Vec<SelectorDescriptor>,
    /// State to wait for before acting (`visible`, `enabled`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_before: Option<String>,
    /// Verify the action's effect afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_after: Option<bool>,
    /// Learning metadata, set by enhancement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LearningMetadata>,
}

impl PageElementSpec {
    /// Create an element with the given candidates and no actions
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        element_type: ElementKind,
        selectors: Vec<SelectorDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            element_type: Some(element_type),
            actions: Vec::new(),
            selectors,
            wait_before: None,
            validate_after: None,
            metadata: None,
        }
    }

    /// Add an action
    #[must_use]
    pub fn with_action(mut self, action: ElementAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Human-readable description: `loginButton` becomes `login Button`
    #[must_use]
    pub fn description(&self) -> String {
        describe_element(&self.name)
    }
}

/// Split a camelCase element name into words
#[must_use]
pub fn describe_element(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() && !out.is_empty() {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// One page object definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDefinition {
    /// Generated class name (e.g. `LoginPage`)
    pub class_name: String,
    /// Elements of the page
    pub locators: Vec<PageElementSpec>,
}

/// Wait condition attached to a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitFor {
    /// Element to wait on
    pub element: String,
    /// Target state (`visible`, `hidden`, `attached`, ...)
    #[serde(default = "default_wait_state")]
    pub state: String,
}

fn default_wait_state() -> String {
    "visible".to_string()
}

/// Assertion attached to a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAssertion {
    /// Assertion kind (`text`, `oneOf`, `visible`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Expected value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Accepted values for one-of assertions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_options: Option<Vec<Value>>,
}

/// One generated test step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    /// Page-object method name (e.g. `clickLoginButton`)
    pub action: String,
    /// Method arguments; any JSON value, including nested arrays
    #[serde(default)]
    pub params: Vec<Value>,
    /// Page object class the step runs on, when not the main one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    /// Wait condition before the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitFor>,
    /// Assertion after the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert: Option<StepAssertion>,
    /// Logical element the step acts on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl TestStep {
    /// Step with no arguments, wait, assertion or element
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Vec::new(),
            page: None,
            wait_for: None,
            assert: None,
            element: None,
        }
    }

    /// Add an argument
    #[must_use]
    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Name the element the step acts on
    #[must_use]
    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Wait for `element` to reach `state` first
    #[must_use]
    pub fn with_wait_for(mut self, element: impl Into<String>, state: impl Into<String>) -> Self {
        self.wait_for = Some(WaitFor {
            element: element.into(),
            state: state.into(),
        });
        self
    }

    /// Element the step is about: `element`, else the `waitFor` target
    #[must_use]
    pub fn target_element(&self) -> Option<&str> {
        self.element
            .as_deref()
            .or_else(|| self.wait_for.as_ref().map(|w| w.element.as_str()))
    }
}

/// The full assets document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAssets {
    /// Main page object
    pub page_object: PageDefinition,
    /// Further page objects visited by the test
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_page_objects: Vec<PageDefinition>,
    /// Ordered steps
    pub test_steps: Vec<TestStep>,
}

impl TestAssets {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> VisionaryResult<Self> {
        let assets: Self = serde_json::from_str(json)
            .map_err(|e| VisionaryError::schema(format!("unparseable assets document: {e}")))?;
        assets.validate()?;
        Ok(assets)
    }

    /// Load and validate an assets file
    pub fn load(path: &Path) -> VisionaryResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check structural invariants the serde types cannot express
    pub fn validate(&self) -> VisionaryResult<()> {
        let mut seen = HashSet::new();
        for page in self.pages() {
            if page.class_name.trim().is_empty() {
                return Err(VisionaryError::schema("page object without className"));
            }
            for element in &page.locators {
                if element.name.trim().is_empty() {
                    return Err(VisionaryError::schema(format!(
                        "{}: element without name",
                        page.class_name
                    )));
                }
                if !seen.insert(element.name.as_str()) {
                    return Err(VisionaryError::schema(format!(
                        "{}: duplicate element '{}'",
                        page.class_name, element.name
                    )));
                }
                if let Some(kind) = element.element_type {
                    let allowed = kind.allowed_actions();
                    if let Some(action) = element.actions.iter().find(|a| !allowed.contains(a)) {
                        return Err(VisionaryError::schema(format!(
                            "{}.{}: action {action:?} not applicable to {kind:?}",
                            page.class_name, element.name
                        )));
                    }
                }
            }
        }
        if self.test_steps.iter().any(|s| s.action.trim().is_empty()) {
            return Err(VisionaryError::schema("test step without action"));
        }
        Ok(())
    }

    /// Main page followed by the additional pages
    pub fn pages(&self) -> impl Iterator<Item = &PageDefinition> {
        std::iter::once(&self.page_object).chain(self.additional_page_objects.iter())
    }

    /// Mutable variant of [`TestAssets::pages`]
    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut PageDefinition> {
        std::iter::once(&mut self.page_object).chain(self.additional_page_objects.iter_mut())
    }

    /// All elements of all pages
    pub fn elements(&self) -> impl Iterator<Item = &PageElementSpec> {
        self.pages().flat_map(|p| p.locators.iter())
    }

    /// Find an element by name across pages
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&PageElementSpec> {
        self.elements().find(|e| e.name == name)
    }

    /// Mutable element lookup across pages
    pub fn element_mut(&mut self, name: &str) -> Option<&mut PageElementSpec> {
        self.pages_mut()
            .flat_map(|p| p.locators.iter_mut())
            .find(|e| e.name == name)
    }

    /// Element referenced by the step with this method name, through its
    /// `element` or its `waitFor` target
    #[must_use]
    pub fn element_for_step(&self, action: &str) -> Option<&str> {
        self.test_steps
            .iter()
            .find(|s| s.action == action)
            .and_then(TestStep::target_element)
    }

    /// Serialize as pretty JSON
    pub fn to_json_pretty(&self) -> VisionaryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Login page with two candidates on the button
    pub fn login_assets() -> TestAssets {
        TestAssets {
            page_object: PageDefinition {
                class_name: "LoginPage".to_string(),
                locators: vec![
                    PageElementSpec::new(
                        "emailInput",
                        ElementKind::Input,
                        vec![SelectorDescriptor::label("E-Mail Address")],
                    )
                    .with_action(ElementAction::Fill),
                    PageElementSpec::new(
                        "loginButton",
                        ElementKind::Button,
                        vec![
                            SelectorDescriptor::role("button").with_name("Login"),
                            SelectorDescriptor::css("#submit"),
                        ],
                    )
                    .with_action(ElementAction::Click),
                ],
            },
            additional_page_objects: vec![],
            test_steps: vec![
                TestStep::new("fillEmailInput")
                    .with_param("a@b.c")
                    .with_element("emailInput"),
                TestStep::new("clickLoginButton"),
            ],
        }
    }
}

//! Applies a chosen selector fix to the assets document.

use crate::classifier::FailureAnalysis;
use crate::result::VisionaryResult;
use crate::schema::TestAssets;
use crate::store::backend::write_json_atomic;
use crate::suggest::{FixDirective, SuggestedFix};
use std::path::Path;
use tracing::{info, warn};

/// Default minimum confidence for automatic application
pub const DEFAULT_APPLY_THRESHOLD: f64 = 0.8;

/// Highest-confidence selector fix with a directive at or above `threshold`
#[must_use]
pub fn applicable_fix(analysis: &FailureAnalysis, threshold: f64) -> Option<&SuggestedFix> {
    analysis
        .suggested_fixes
        .iter()
        .filter(|f| f.is_selector_fix() && f.confidence >= threshold)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Patch `assets` with the best applicable fix; returns whether it changed
pub fn apply_fix(assets: &mut TestAssets, analysis: &FailureAnalysis, threshold: f64) -> bool {
    let Some(fix) = applicable_fix(analysis, threshold) else {
        info!("no selector fix above threshold {threshold}");
        return false;
    };
    let Some(directive) = &fix.directive else {
        return false;
    };
    apply_directive(assets, directive)
}

/// Apply one directive; wait directives need codegen support and change nothing here
pub fn apply_directive(assets: &mut TestAssets, directive: &FixDirective) -> bool {
    match directive {
        FixDirective::Reorder {
            element,
            failing_selector,
        } => {
            let Some(spec) = assets.element_mut(element) else {
                warn!(element, "fix targets unknown element");
                return false;
            };
            if spec.selectors.len() < 2 {
                return false;
            }
            let position = failing_selector
                .as_deref()
                .and_then(|key| spec.selectors.iter().position(|s| s.key() == key))
                .unwrap_or(0);
            if position == spec.selectors.len() - 1 {
                return false;
            }
            let failing = spec.selectors.remove(position);
            info!(element, selector = %failing, "rotated failing selector to the back");
            spec.selectors.push(failing);
            true
        }
        FixDirective::InjectSelector { element, selector } => {
            let Some(spec) = assets.element_mut(element) else {
                warn!(element, "fix targets unknown element");
                return false;
            };
            if spec.selectors.iter().any(|s| s == selector) {
                info!(element, selector = %selector, "suggested selector already present");
                return false;
            }
            info!(element, selector = %selector, "injected selector");
            spec.selectors.insert(0, selector.clone());
            true
        }
        FixDirective::ScrollIntoView { .. } | FixDirective::ExtendTimeout { .. } => false,
    }
}

/// Write the patched document
pub fn save_assets(assets: &TestAssets, path: &Path) -> VisionaryResult<()> {
    write_json_atomic(path, assets)
}

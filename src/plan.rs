use serde::{Deserialize, Serialize};

/// One attachable page behavior. The variant says what gets wired; the
/// rule's selector says where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Behavior {
    /// Instantiate a tooltip widget for each matched trigger.
    Tooltips,
    /// Instantiate a popover widget for each matched trigger.
    Popovers,
    /// Remove each matched alert 5000 ms after bootstrap.
    AlertAutoDismiss,
    /// Prevent default on matched in-page anchors and scroll to the target.
    AnchorScroll,
    /// Record matched login forms as untouched pass-throughs.
    LoginPassThrough,
    /// Constraint-validate matched forms on submit.
    FormValidation,
    /// Thumbnail preview for image file inputs.
    ImagePreview,
    /// Informational banner for PDF file inputs.
    PdfPreview,
    /// Busy label + disable on submit controls of valid forms.
    SubmitBusy,
    /// Case-insensitive live filtering of searchable items.
    LiveSearch,
    /// Swap deferred image sources on first viewport intersection.
    LazyImages,
    /// Single back-to-top button toggled by scroll offset.
    BackToTop,
    /// Copy a data-declared payload to the clipboard on click.
    ClipboardCopy,
    /// Simulated contact-form submission with timed button states.
    ContactForm,
    /// Exclusive-active category filtering of catalog cards.
    CategoryFilter,
    /// Mirror a range input's value into a display element.
    PriceRange,
    /// Collapse an expanded mobile navigation panel on link click.
    NavCollapse,
}

/// A selector/behavior pair. Rules are applied in declaration order during
/// one bootstrap pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub selector: String,
    pub behavior: Behavior,
}

impl Rule {
    pub fn new(selector: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            selector: selector.into(),
            behavior,
        }
    }
}

/// The declarative configuration the bootstrapper consumes: which behaviors
/// attach, and to which elements. Presets mirror the two site entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementPlan {
    pub rules: Vec<Rule>,
}

impl EnhancementPlan {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The public-site plan: every behavior, with login and admin forms
    /// exempt from any form interference.
    pub fn standard() -> Self {
        Self::new(vec![
            Rule::new("form[action*=login]", Behavior::LoginPassThrough),
            Rule::new("[data-bs-toggle=tooltip]", Behavior::Tooltips),
            Rule::new("[data-bs-toggle=popover]", Behavior::Popovers),
            Rule::new(".alert", Behavior::AlertAutoDismiss),
            Rule::new("a[href^=\"#\"]", Behavior::AnchorScroll),
            Rule::new(
                "form.needs-validation:not([action*=login]):not([action*=admin])",
                Behavior::FormValidation,
            ),
            Rule::new("input[type=file][accept*=image]", Behavior::ImagePreview),
            Rule::new(
                "button[type=submit], input[type=submit]",
                Behavior::SubmitBusy,
            ),
            Rule::new("#searchInput", Behavior::LiveSearch),
            Rule::new("img[data-src]", Behavior::LazyImages),
            Rule::new("body", Behavior::BackToTop),
            Rule::new("[data-copy]", Behavior::ClipboardCopy),
            Rule::new("form#contactForm", Behavior::ContactForm),
            Rule::new(".filter-btn", Behavior::CategoryFilter),
            Rule::new("#priceRange", Behavior::PriceRange),
            Rule::new(".navbar-collapse .nav-link", Behavior::NavCollapse),
        ])
    }

    /// The admin-page plan: widgets, alerts, previews, back-to-top, copy and
    /// navigation only. No form interference of any kind.
    pub fn admin() -> Self {
        Self::new(vec![
            Rule::new("[data-bs-toggle=tooltip]", Behavior::Tooltips),
            Rule::new("[data-bs-toggle=popover]", Behavior::Popovers),
            Rule::new(".alert", Behavior::AlertAutoDismiss),
            Rule::new("input[type=file][accept*=image]", Behavior::ImagePreview),
            Rule::new("input[type=file][accept*=pdf]", Behavior::PdfPreview),
            Rule::new("body", Behavior::BackToTop),
            Rule::new("[data-copy]", Behavior::ClipboardCopy),
            Rule::new(".navbar-collapse .nav-link", Behavior::NavCollapse),
        ])
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_plan_has_no_form_behaviors() {
        let plan = EnhancementPlan::admin();
        assert!(plan.rules.iter().all(|rule| !matches!(
            rule.behavior,
            Behavior::FormValidation
                | Behavior::SubmitBusy
                | Behavior::ContactForm
                | Behavior::LoginPassThrough
        )));
    }

    #[test]
    fn behavior_names_serialize_kebab_case() {
        let json = serde_json::to_string(&Behavior::AlertAutoDismiss).expect("serialize");
        assert_eq!(json, "\"alert-auto-dismiss\"");
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = EnhancementPlan::standard();
        let json = serde_json::to_string(&plan).expect("serialize");
        let back: EnhancementPlan = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(plan, back);
    }
}

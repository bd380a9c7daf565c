use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use unicode_normalization::UnicodeNormalization;

use super::*;

/// Mobile navigation collapses below this viewport width.
const NAV_COLLAPSE_BREAKPOINT: i64 = 992;
/// The back-to-top control becomes visible past this scroll offset.
const BACK_TO_TOP_THRESHOLD: i64 = 300;
/// Alerts and notifications live this long.
const ALERT_TTL_MS: i64 = 5000;
/// Copy confirmation reverts after this long.
const COPY_CONFIRM_MS: i64 = 2000;
/// Simulated contact submission: sending phase, then confirmation phase.
const CONTACT_SEND_MS: i64 = 1500;
const CONTACT_CONFIRM_MS: i64 = 2000;

/// One element/behavior attachment made during a bootstrap pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub rule_index: usize,
    pub selector: String,
    pub behavior: Behavior,
    /// `#id` when the element has one, its tag name otherwise.
    pub target: String,
}

/// Plan-validation findings. These are warnings, not errors: the pass
/// continues, and the unmatched or duplicated declaration simply does
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    UnmatchedSelector {
        rule_index: usize,
        selector: String,
    },
    InvalidSelector {
        rule_index: usize,
        selector: String,
        reason: String,
    },
    DuplicateBinding {
        rule_index: usize,
        selector: String,
        behavior: Behavior,
        target: String,
    },
}

/// The binding ledger of one bootstrap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub bindings: Vec<Binding>,
    pub warnings: Vec<PlanWarning>,
    /// Forms left untouched because their action matches a login pattern.
    pub exempted_forms: Vec<String>,
}

/// Scans the document once and attaches each of the plan's behaviors to its
/// matched elements. Attachment is idempotent per (element, behavior): a
/// second pass over the same page reuses what is already wired and reports
/// the duplicates as warnings.
pub fn bootstrap(page: &mut Page, plan: &EnhancementPlan) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    for (rule_index, rule) in plan.rules.iter().enumerate() {
        if rule.behavior == Behavior::BackToTop {
            page.attach_back_to_top(rule_index, rule, &mut report)?;
            continue;
        }

        let matches = match page.dom.query_selector_all(&rule.selector) {
            Ok(matches) => matches,
            Err(err) => {
                log::warn!("plan rule {rule_index} has invalid selector {:?}: {err}", rule.selector);
                report.warnings.push(PlanWarning::InvalidSelector {
                    rule_index,
                    selector: rule.selector.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if matches.is_empty() {
            log::warn!("plan rule {rule_index} matched nothing: {:?}", rule.selector);
            report.warnings.push(PlanWarning::UnmatchedSelector {
                rule_index,
                selector: rule.selector.clone(),
            });
            continue;
        }

        let group = matches.clone();
        for node in matches {
            page.attach_behavior(rule_index, rule, node, &group, &mut report)?;
        }
    }

    page.trace_plan_line(format!(
        "[plan] bootstrap bindings={} warnings={}",
        report.bindings.len(),
        report.warnings.len()
    ));
    Ok(report)
}

impl Page {
    /// Convenience wrapper around [`bootstrap`].
    pub fn bootstrap(&mut self, plan: &EnhancementPlan) -> Result<BootstrapReport> {
        bootstrap(self, plan)
    }

    fn record_binding(
        &mut self,
        rule_index: usize,
        rule: &Rule,
        node: NodeId,
        report: &mut BootstrapReport,
    ) -> bool {
        if !self.bound.insert((node, rule.behavior)) {
            let target = self.binding_label(node);
            self.trace_plan_line(format!(
                "[plan] duplicate {:?} on {target}, skipped",
                rule.behavior
            ));
            report.warnings.push(PlanWarning::DuplicateBinding {
                rule_index,
                selector: rule.selector.clone(),
                behavior: rule.behavior,
                target,
            });
            return false;
        }
        report.bindings.push(Binding {
            rule_index,
            selector: rule.selector.clone(),
            behavior: rule.behavior,
            target: self.binding_label(node),
        });
        true
    }

    fn binding_label(&self, node: NodeId) -> String {
        self.trace_node_label(node)
    }

    fn attach_behavior(
        &mut self,
        rule_index: usize,
        rule: &Rule,
        node: NodeId,
        group: &[NodeId],
        report: &mut BootstrapReport,
    ) -> Result<()> {
        match rule.behavior {
            Behavior::Tooltips => {
                if self.record_binding(rule_index, rule, node, report) {
                    let descriptor = self.widget_descriptor(node);
                    match self.services.widgets.as_mut() {
                        Some(widgets) => widgets.tooltip(descriptor),
                        None => log::debug!("widget library not installed, tooltip skipped"),
                    }
                }
            }
            Behavior::Popovers => {
                if self.record_binding(rule_index, rule, node, report) {
                    let descriptor = self.widget_descriptor(node);
                    match self.services.widgets.as_mut() {
                        Some(widgets) => widgets.popover(descriptor),
                        None => log::debug!("widget library not installed, popover skipped"),
                    }
                }
            }
            Behavior::AlertAutoDismiss => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.schedule(ALERT_TTL_MS, None, TaskAction::DismissAlert { node });
                }
            }
            Behavior::AnchorScroll => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "click".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::AnchorScroll,
                        },
                    );
                }
            }
            Behavior::LoginPassThrough => {
                if self.record_binding(rule_index, rule, node, report) {
                    let label = self.binding_label(node);
                    self.trace_plan_line(format!("[plan] login form {label} left untouched"));
                    report.exempted_forms.push(label);
                    self.listeners.add(
                        node,
                        "submit".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::LoginPassThrough,
                        },
                    );
                }
            }
            Behavior::FormValidation => {
                if self.form_is_exempt(node) {
                    return Ok(());
                }
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "submit".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::ValidateForm,
                        },
                    );
                }
            }
            Behavior::ImagePreview => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "change".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::ImagePreviewChange,
                        },
                    );
                }
            }
            Behavior::PdfPreview => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "change".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::PdfPreviewChange,
                        },
                    );
                }
            }
            Behavior::SubmitBusy => {
                if !is_submit_control(&self.dom, node) {
                    return Ok(());
                }
                if let Some(form) = self.form_owner(node) {
                    if self.form_is_exempt(form) {
                        return Ok(());
                    }
                }
                if self.record_binding(rule_index, rule, node, report) {
                    let snapshot = self.control_snapshot(node);
                    self.listeners.add(
                        node,
                        "click".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::BusyOnSubmitClick { snapshot },
                        },
                    );
                }
            }
            Behavior::LiveSearch => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "input".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::LiveSearch,
                        },
                    );
                }
            }
            Behavior::LazyImages => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.observed_images.push(node);
                    let root = self.dom.root;
                    // One scan listener per page is enough.
                    if self
                        .bound
                        .insert((root, Behavior::LazyImages))
                    {
                        self.listeners.add(
                            root,
                            "scroll".into(),
                            Listener {
                                capture: false,
                                action: HandlerAction::LazyImageScan,
                            },
                        );
                    }
                    // Initial visibility check, like an observer's first callback.
                    self.scan_lazy_images()?;
                }
            }
            Behavior::BackToTop => unreachable!("handled by attach_back_to_top"),
            Behavior::ClipboardCopy => {
                if self.record_binding(rule_index, rule, node, report) {
                    let snapshot = self.control_snapshot(node);
                    self.listeners.add(
                        node,
                        "click".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::ClipboardCopy { snapshot },
                        },
                    );
                }
            }
            Behavior::ContactForm => {
                let Some(button) = self
                    .dom
                    .query_selector_from(node, "button[type=submit], input[type=submit]")?
                else {
                    log::debug!("contact form has no submit control, skipped");
                    return Ok(());
                };
                if self.record_binding(rule_index, rule, node, report) {
                    let snapshot = self.control_snapshot(button);
                    self.listeners.add(
                        node,
                        "submit".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::ContactSubmit { button, snapshot },
                        },
                    );
                }
            }
            Behavior::CategoryFilter => {
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "click".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::CategoryFilter {
                                group: group.to_vec(),
                            },
                        },
                    );
                }
            }
            Behavior::PriceRange => {
                let Some(display) = self.dom.query_selector("#priceDisplay")? else {
                    log::debug!("price display missing, range mirror skipped");
                    return Ok(());
                };
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "input".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::PriceRange { display },
                        },
                    );
                }
            }
            Behavior::NavCollapse => {
                let Some(panel) = self.dom.closest(node, ".navbar-collapse")? else {
                    return Ok(());
                };
                if self.record_binding(rule_index, rule, node, report) {
                    self.listeners.add(
                        node,
                        "click".into(),
                        Listener {
                            capture: false,
                            action: HandlerAction::NavCollapse { panel },
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn widget_descriptor(&self, node: NodeId) -> WidgetDescriptor {
        WidgetDescriptor {
            tag: self
                .dom
                .tag_name(node)
                .map(ToOwned::to_owned)
                .unwrap_or_default(),
            id: self.dom.attr(node, "id"),
            title: self.dom.attr(node, "title"),
            content: self.dom.attr(node, "data-bs-content"),
        }
    }

    /// Login and admin forms are off limits for every form behavior.
    fn form_is_exempt(&self, form: NodeId) -> bool {
        let action = self.dom.attr(form, "action").unwrap_or_default();
        action.contains("login") || action.contains("admin")
    }

    /// The back-to-top control is a single page-level instance: a second
    /// bootstrap pass finds the existing `#backToTop` button and leaves it
    /// alone instead of creating a sibling.
    fn attach_back_to_top(
        &mut self,
        rule_index: usize,
        rule: &Rule,
        report: &mut BootstrapReport,
    ) -> Result<()> {
        let button = match self.dom.by_id("backToTop") {
            Some(existing) => existing,
            None => {
                let host = self
                    .dom
                    .query_selector(&rule.selector)?
                    .unwrap_or_else(|| self.body_node());
                let button = self.dom.create_detached_element("button".into());
                self.dom.set_attr(button, "id", "backToTop")?;
                self.dom.set_attr(button, "class", "btn btn-primary position-fixed")?;
                self.dom.set_attr(button, "aria-label", "Back to top")?;
                self.dom.set_attr(button, "style", "display: none;")?;
                self.dom.set_text_content(button, "\u{2191}")?;
                self.dom.append_child(host, button)?;
                button
            }
        };

        if !self.record_binding(rule_index, rule, button, report) {
            return Ok(());
        }

        let root = self.dom.root;
        self.listeners.add(
            root,
            "scroll".into(),
            Listener {
                capture: false,
                action: HandlerAction::BackToTopToggle { button },
            },
        );
        self.listeners.add(
            button,
            "click".into(),
            Listener {
                capture: false,
                action: HandlerAction::BackToTopClick,
            },
        );
        Ok(())
    }

    // ---- runtime handlers ----

    pub(crate) fn run_handler(
        &mut self,
        node: NodeId,
        action: HandlerAction,
        event: &mut EventState,
    ) -> Result<()> {
        match action {
            HandlerAction::LoginPassThrough => {
                let label = self.trace_node_label(node);
                self.trace_event_line(format!("[form] login {label} submitting normally"));
            }
            HandlerAction::ValidateForm => {
                if !self.check_validity(node)? {
                    event.prevent_default();
                    event.stop_propagation();
                }
                self.dom.add_class(node, "was-validated")?;
            }
            HandlerAction::BusyOnSubmitClick { snapshot } => {
                let Some(form) = self.form_owner(node) else {
                    return Ok(());
                };
                if self.check_validity(form)? {
                    self.dom.set_text_content(node, "Processing...")?;
                    self.dom.set_disabled(node, true)?;
                    self.busy_pending.insert(node, snapshot);
                }
            }
            HandlerAction::NavCollapse { panel } => {
                if self.viewport_width() < NAV_COLLAPSE_BREAKPOINT
                    && self.dom.has_class_on(panel, "show")
                {
                    self.dom.remove_class(panel, "show")?;
                }
            }
            HandlerAction::LiveSearch => {
                let term = search_key(&self.dom.value(node)?);
                let items = self.dom.query_selector_all(".searchable-item")?;
                for item in items {
                    let haystack = search_key(&self.dom.text_content(item));
                    if term.is_empty() || haystack.contains(&term) {
                        self.dom.style_set(item, "display", "")?;
                    } else {
                        self.dom.style_set(item, "display", "none")?;
                    }
                }
            }
            HandlerAction::CategoryFilter { group } => {
                for button in &group {
                    self.dom.remove_class(*button, "active")?;
                }
                self.dom.add_class(node, "active")?;

                let filter = self.dom.dataset_get(node, "filter")?;
                let cards = self.dom.query_selector_all(".product-card")?;
                for card in cards {
                    let category = self.dom.dataset_get(card, "category")?;
                    if filter == "all" || category == filter {
                        self.dom.style_set(card, "display", "")?;
                    } else {
                        self.dom.style_set(card, "display", "none")?;
                    }
                }
            }
            HandlerAction::ClipboardCopy { snapshot } => {
                // Payload is read at click time, never cached.
                let payload = self.dom.dataset_get(node, "copy")?;
                let Some(clipboard) = self.services.clipboard.as_mut() else {
                    log::debug!("clipboard not installed, copy skipped");
                    return Ok(());
                };
                if !clipboard.write_text(&payload) {
                    log::debug!("clipboard write denied, label unchanged");
                    return Ok(());
                }
                self.dom.set_text_content(node, "Copied!")?;
                self.dom.add_class(node, "btn-success")?;
                self.dom.remove_class(node, "btn-outline-secondary")?;
                self.schedule(
                    COPY_CONFIRM_MS,
                    Some((node, TaskKind::CopyRevert)),
                    TaskAction::RevertCopyLabel {
                        button: node,
                        snapshot,
                    },
                );
            }
            HandlerAction::ImagePreviewChange => {
                let Some(file) = self.staged_files.get(&node).cloned() else {
                    return Ok(());
                };
                let failed = self.file_reads_failing();
                let latency = self.file_read_latency();
                self.schedule(
                    latency,
                    Some((node, TaskKind::PreviewRead)),
                    TaskAction::CompletePreviewRead {
                        input: node,
                        file,
                        failed,
                    },
                );
            }
            HandlerAction::PdfPreviewChange => {
                let Some(file) = self.staged_files.get(&node).cloned() else {
                    return Ok(());
                };
                let Some(slot) = self.preview_slot(node, ".pdf-preview")? else {
                    log::debug!("pdf preview slot missing, skipped");
                    return Ok(());
                };
                self.dom.clear_children(slot);
                let banner = self.dom.create_detached_element("div".into());
                self.dom.set_attr(banner, "class", "alert alert-info")?;
                self.dom
                    .set_text_content(banner, &format!("PDF selected: {}", file.name))?;
                self.dom.append_child(slot, banner)?;
            }
            HandlerAction::BackToTopToggle { button } => {
                if self.scroll_y > BACK_TO_TOP_THRESHOLD {
                    self.dom.style_set(button, "display", "block")?;
                } else {
                    self.dom.style_set(button, "display", "none")?;
                }
            }
            HandlerAction::BackToTopClick => {
                self.scroll_to(0)?;
            }
            HandlerAction::LazyImageScan => {
                self.scan_lazy_images()?;
            }
            HandlerAction::AnchorScroll => {
                event.prevent_default();
                let href = self.dom.attr(node, "href").unwrap_or_default();
                let Some(id) = href.strip_prefix('#') else {
                    return Ok(());
                };
                if id.is_empty() {
                    return Ok(());
                }
                let Some(target) = self.dom.by_id(id) else {
                    log::debug!("anchor target #{id} missing, scroll skipped");
                    return Ok(());
                };
                let top = self.layout_top(target);
                self.scroll_to(top)?;
            }
            HandlerAction::ContactSubmit { button, snapshot } => {
                event.prevent_default();
                // The simulated flow owns the button from here on; the
                // generic busy settle must not restore it early.
                self.busy_pending.remove(&button);
                self.dom.set_text_content(button, "Sending...")?;
                self.dom.set_disabled(button, true)?;
                self.schedule(
                    CONTACT_SEND_MS,
                    Some((node, TaskKind::ContactSend)),
                    TaskAction::ContactSent {
                        form: node,
                        button,
                        snapshot,
                    },
                );
            }
            HandlerAction::PriceRange { display } => {
                let value = self.dom.value(node)?;
                self.dom
                    .set_text_content(display, &format!("\u{20b9}{value}"))?;
            }
        }
        Ok(())
    }

    pub(crate) fn execute_task(&mut self, action: TaskAction) -> Result<()> {
        match action {
            TaskAction::DismissAlert { node } => {
                // The node may already be gone; dismissal is best-effort.
                if self.dom.is_connected(node) {
                    self.dom.remove_node(node)?;
                }
            }
            TaskAction::CompletePreviewRead {
                input,
                file,
                failed,
            } => {
                if failed {
                    log::debug!("file read for {} failed, preview untouched", file.name);
                    return Ok(());
                }
                let Some(slot) = self.preview_slot(input, ".image-preview")? else {
                    log::debug!("image preview slot missing, skipped");
                    return Ok(());
                };
                let data_url = format!(
                    "data:{};base64,{}",
                    file.media_type,
                    BASE64.encode(&file.bytes)
                );
                self.dom.clear_children(slot);
                let img = self.dom.create_detached_element("img".into());
                self.dom.set_attr(img, "src", &data_url)?;
                self.dom.set_attr(img, "class", "img-thumbnail")?;
                self.dom.set_attr(img, "style", "max-width: 200px;")?;
                self.dom.append_child(slot, img)?;
            }
            TaskAction::RevertCopyLabel { button, snapshot } => {
                self.restore_control(button, &snapshot)?;
            }
            TaskAction::ContactSent {
                form,
                button,
                snapshot,
            } => {
                self.dom.set_text_content(button, "Sent!")?;
                self.dom.add_class(button, "btn-success")?;
                self.dom.remove_class(button, "btn-primary")?;
                self.schedule(
                    CONTACT_CONFIRM_MS,
                    Some((form, TaskKind::ContactReset)),
                    TaskAction::ContactReset {
                        form,
                        button,
                        snapshot,
                    },
                );
            }
            TaskAction::ContactReset {
                form,
                button,
                snapshot,
            } => {
                self.reset_form(form)?;
                self.restore_control(button, &snapshot)?;
            }
        }
        Ok(())
    }

    /// The preview slot is the first matching element under the input's
    /// parent, mirroring the markup convention of a sibling container.
    fn preview_slot(&self, input: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let Some(parent) = self.dom.parent(input) else {
            return Ok(None);
        };
        self.dom.query_selector_from(parent, selector)
    }

    pub(crate) fn scan_lazy_images(&mut self) -> Result<()> {
        let observed = self.observed_images.clone();
        let mut still_observed = Vec::with_capacity(observed.len());
        for image in observed {
            if self.in_viewport(image) {
                self.load_lazy_image(image)?;
            } else {
                still_observed.push(image);
            }
        }
        self.observed_images = still_observed;
        Ok(())
    }

    fn load_lazy_image(&mut self, image: NodeId) -> Result<()> {
        let source = self.dom.dataset_get(image, "src")?;
        if !source.is_empty() {
            self.dom.set_attr(image, "src", &source)?;
        }
        self.dom.remove_class(image, "lazy")?;
        let label = self.trace_node_label(image);
        self.trace_event_line(format!("[lazy] loaded {label}"));
        Ok(())
    }

    /// Forces an intersection for one observed image, independent of the
    /// layout model. A no-op for images that are not (or no longer)
    /// observed.
    pub fn intersect(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let Some(pos) = self.observed_images.iter().position(|node| *node == target) else {
            return Ok(());
        };
        self.observed_images.remove(pos);
        self.load_lazy_image(target)
    }
}

fn search_key(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

use std::collections::{HashMap, HashSet};

use super::*;

/// A file staged on a file input by the driver. The runtime never inspects
/// the bytes beyond encoding them into the preview data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// The observable stand-in for a browser-level form submission: produced
/// when a submit event completes without anything preventing the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Danger,
}

impl NotificationKind {
    fn class_suffix(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
    pub owned: bool,
}

/// Bind-time snapshot of a control's idle presentation. Restoring it is the
/// mandatory exit from every busy state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ControlSnapshot {
    pub(crate) label: String,
    pub(crate) classes: Vec<String>,
    pub(crate) disabled: bool,
}

/// Key for owned tasks: scheduling a successor for the same (owner, kind)
/// cancels the pending predecessor. Alert dismissal is deliberately unkeyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    PreviewRead,
    CopyRevert,
    ContactSend,
    ContactReset,
}

#[derive(Debug, Clone)]
pub(crate) enum TaskAction {
    DismissAlert {
        node: NodeId,
    },
    CompletePreviewRead {
        input: NodeId,
        file: FilePayload,
        failed: bool,
    },
    RevertCopyLabel {
        button: NodeId,
        snapshot: ControlSnapshot,
    },
    ContactSent {
        form: NodeId,
        button: NodeId,
        snapshot: ControlSnapshot,
    },
    ContactReset {
        form: NodeId,
        button: NodeId,
        snapshot: ControlSnapshot,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ScheduledTask {
    pub(crate) id: i64,
    pub(crate) due_at: i64,
    pub(crate) order: i64,
    pub(crate) owner: Option<(NodeId, TaskKind)>,
    pub(crate) action: TaskAction,
}

/// What a listener does when its event fires. Handlers are data, not
/// closures, so the store stays cloneable and the dispatch deterministic.
#[derive(Debug, Clone)]
pub(crate) enum HandlerAction {
    LoginPassThrough,
    ValidateForm,
    BusyOnSubmitClick { snapshot: ControlSnapshot },
    NavCollapse { panel: NodeId },
    LiveSearch,
    CategoryFilter { group: Vec<NodeId> },
    ClipboardCopy { snapshot: ControlSnapshot },
    ImagePreviewChange,
    PdfPreviewChange,
    BackToTopToggle { button: NodeId },
    BackToTopClick,
    LazyImageScan,
    AnchorScroll,
    ContactSubmit { button: NodeId, snapshot: ControlSnapshot },
    PriceRange { display: NodeId },
}

#[derive(Debug, Clone)]
pub(crate) struct Listener {
    pub(crate) capture: bool,
    pub(crate) action: HandlerAction,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    pub(crate) fn add(&mut self, node_id: NodeId, event: String, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    pub(crate) fn get(&self, node_id: NodeId, event: &str, capture: bool) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|listener| listener.capture == capture)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventState {
    pub(crate) event_type: String,
    pub(crate) target: NodeId,
    pub(crate) current_target: NodeId,
    pub(crate) default_prevented: bool,
    pub(crate) propagation_stopped: bool,
    pub(crate) immediate_propagation_stopped: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
            immediate_propagation_stopped: false,
        }
    }

    pub(crate) fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub(crate) fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ControlInitialValue {
    value: String,
    checked: bool,
}

/// The page runtime: DOM, listeners, task queue, virtual clock, viewport
/// and injected services. All mutation flows through it, driven by user
/// actions and `advance_time`.
#[derive(Debug)]
pub struct Page {
    pub(crate) dom: Dom,
    pub(crate) listeners: ListenerStore,
    pub(crate) task_queue: Vec<ScheduledTask>,
    pub(crate) services: Services,
    now_ms: i64,
    timer_step_limit: usize,
    next_timer_id: i64,
    next_task_order: i64,
    viewport_width: i64,
    viewport_height: i64,
    pub(crate) scroll_y: i64,
    layout_tops: HashMap<NodeId, i64>,
    pub(crate) observed_images: Vec<NodeId>,
    pub(crate) staged_files: HashMap<NodeId, FilePayload>,
    file_reads_failing: bool,
    file_read_latency_ms: i64,
    pub(crate) bound: HashSet<(NodeId, Behavior)>,
    pub(crate) busy_pending: HashMap<NodeId, ControlSnapshot>,
    submissions: Vec<SubmissionRecord>,
    initial_values: HashMap<NodeId, ControlInitialValue>,
    trace: bool,
    trace_events: bool,
    trace_timers: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        let mut page = Self {
            dom,
            listeners: ListenerStore::default(),
            task_queue: Vec::new(),
            services: Services::default(),
            now_ms: 0,
            timer_step_limit: 10_000,
            next_timer_id: 1,
            next_task_order: 0,
            viewport_width: 1280,
            viewport_height: 720,
            scroll_y: 0,
            layout_tops: HashMap::new(),
            observed_images: Vec::new(),
            staged_files: HashMap::new(),
            file_reads_failing: false,
            file_read_latency_ms: 0,
            bound: HashSet::new(),
            busy_pending: HashMap::new(),
            submissions: Vec::new(),
            initial_values: HashMap::new(),
            trace: false,
            trace_events: true,
            trace_timers: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };
        page.capture_initial_values();
        Ok(page)
    }

    pub fn from_html_with_services(html: &str, services: Services) -> Result<Self> {
        let mut page = Self::from_html(html)?;
        page.services = services;
        Ok(page)
    }

    fn capture_initial_values(&mut self) {
        for node in self.dom.all_element_nodes() {
            if !is_form_control(&self.dom, node) {
                continue;
            }
            let value = self.dom.value(node).unwrap_or_default();
            let checked = self.dom.checked(node).unwrap_or(false);
            self.initial_values
                .insert(node, ControlInitialValue { value, checked });
        }
    }

    pub fn set_widget_library(&mut self, widgets: Box<dyn WidgetLibrary>) {
        self.services.widgets = Some(widgets);
    }

    pub fn set_clipboard(&mut self, clipboard: Box<dyn ClipboardSink>) {
        self.services.clipboard = Some(clipboard);
    }

    pub fn set_qr_encoder(&mut self, qr: Box<dyn QrEncoder>) {
        self.services.qr = Some(qr);
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    /// Latency, in virtual milliseconds, between a file input change and the
    /// completion of its read. Zero means "due on the next timer pump".
    pub fn set_file_read_latency(&mut self, latency_ms: i64) -> Result<()> {
        if latency_ms < 0 {
            return Err(Error::Runtime(
                "set_file_read_latency requires non-negative milliseconds".into(),
            ));
        }
        self.file_read_latency_ms = latency_ms;
        Ok(())
    }

    pub fn file_read_latency(&self) -> i64 {
        self.file_read_latency_ms
    }

    /// While set, file reads started by input changes complete as failures.
    pub fn set_file_reads_failing(&mut self, failing: bool) {
        self.file_reads_failing = failing;
    }

    pub(crate) fn file_reads_failing(&self) -> bool {
        self.file_reads_failing
    }

    pub fn viewport_width(&self) -> i64 {
        self.viewport_width
    }

    pub fn set_viewport(&mut self, width: i64, height: i64) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Err(Error::Runtime(
                "set_viewport requires positive dimensions".into(),
            ));
        }
        self.viewport_width = width;
        self.viewport_height = height;
        Ok(())
    }

    pub fn scroll_y(&self) -> i64 {
        self.scroll_y
    }

    /// Assigns the element a vertical layout position for the viewport
    /// model. Elements without one sit at offset 0.
    pub fn set_layout_top(&mut self, selector: &str, top: i64) -> Result<()> {
        let target = self.select_one(selector)?;
        self.layout_tops.insert(target, top);
        Ok(())
    }

    pub(crate) fn layout_top(&self, node: NodeId) -> i64 {
        self.layout_tops.get(&node).copied().unwrap_or(0)
    }

    pub(crate) fn in_viewport(&self, node: NodeId) -> bool {
        let top = self.layout_top(node);
        top >= self.scroll_y && top < self.scroll_y + self.viewport_height
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    // ---- user actions ----

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }

        let click_outcome = self.dispatch_event(target, "click")?;
        if click_outcome.default_prevented {
            return Ok(());
        }

        if is_checkbox_input(&self.dom, target) {
            let current = self.dom.checked(target)?;
            self.dom.set_checked(target, !current)?;
            self.dispatch_event(target, "input")?;
            self.dispatch_event(target, "change")?;
        }

        if is_radio_input(&self.dom, target) {
            let current = self.dom.checked(target)?;
            if !current {
                self.uncheck_other_radios_in_group(target)?;
                self.dom.set_checked(target, true)?;
                self.dispatch_event(target, "input")?;
                self.dispatch_event(target, "change")?;
            }
        }

        if is_submit_control(&self.dom, target) {
            if let Some(form_id) = self.resolve_form_for_submit(target) {
                self.submit_form(form_id)?;
            }
        }

        Ok(())
    }

    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) || self.dom.readonly(target) {
            return Ok(());
        }

        let tag = self
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();

        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    pub fn set_checked(&mut self, selector: &str, checked: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        if !is_checkbox_input(&self.dom, target) && !is_radio_input(&self.dom, target) {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input[type=checkbox|radio]".into(),
                actual: self
                    .dom
                    .tag_name(target)
                    .unwrap_or("non-element")
                    .to_string(),
            });
        }

        let current = self.dom.checked(target)?;
        if current != checked {
            if is_radio_input(&self.dom, target) && checked {
                self.uncheck_other_radios_in_group(target)?;
            }
            self.dom.set_checked(target, checked)?;
            self.dispatch_event(target, "input")?;
            self.dispatch_event(target, "change")?;
        }

        Ok(())
    }

    /// Stages a file on the input and fires its change event, which starts
    /// the (owned, cancellable) read for preview behaviors.
    pub fn select_file(&mut self, selector: &str, file: FilePayload) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        let is_file_input = self
            .dom
            .attr(target, "type")
            .map(|t| t.eq_ignore_ascii_case("file"))
            .unwrap_or(false);
        if !is_file_input {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input[type=file]".into(),
                actual: self
                    .dom
                    .tag_name(target)
                    .unwrap_or("non-element")
                    .to_string(),
            });
        }

        self.dom.set_value(target, &file.name)?;
        self.staged_files.insert(target, file);
        self.dispatch_event(target, "change")?;
        Ok(())
    }

    pub fn scroll_to(&mut self, offset: i64) -> Result<()> {
        self.scroll_y = offset.max(0);
        let root = self.dom.root;
        self.dispatch_event(root, "scroll")?;
        Ok(())
    }

    pub fn submit(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;

        let form = if self
            .dom
            .tag_name(target)
            .map(|t| t.eq_ignore_ascii_case("form"))
            .unwrap_or(false)
        {
            Some(target)
        } else {
            self.resolve_form_for_submit(target)
        };

        if let Some(form_id) = form {
            self.submit_form(form_id)?;
        }

        Ok(())
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    // ---- timers ----

    pub(crate) fn schedule(
        &mut self,
        delay_ms: i64,
        owner: Option<(NodeId, TaskKind)>,
        action: TaskAction,
    ) -> i64 {
        if let Some(owner_key) = owner {
            let before = self.task_queue.len();
            self.task_queue.retain(|task| task.owner != Some(owner_key));
            if self.task_queue.len() != before {
                self.trace_timer_line(format!(
                    "[timer] cancel_owned owner={} kind={:?}",
                    self.trace_node_label(owner_key.0),
                    owner_key.1
                ));
            }
        }

        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        let due_at = self.now_ms.saturating_add(delay_ms.max(0));
        self.trace_timer_line(format!(
            "[timer] schedule id={id} due_at={due_at} owned={}",
            owner.is_some()
        ));
        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            owner,
            action,
        });
        id
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
                owned: task.owner.is_some(),
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Runtime(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    /// Runs every pending task, advancing the clock to each task's due
    /// time. Afterwards the queue is empty.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn run_due_timers(&mut self) -> Result<usize> {
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] run_due now_ms={} ran={}",
            self.now_ms, ran
        ));
        Ok(ran)
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(Error::Runtime(format!(
                    "flush exceeded max task steps: limit={}, steps={}, now_ms={}, pending_tasks={}",
                    self.timer_step_limit,
                    steps,
                    self.now_ms,
                    self.task_queue.len()
                )));
            }
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.execute_timer_task(task)?;
        }
        Ok(steps)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| {
                if let Some(limit) = due_limit {
                    task.due_at <= limit
                } else {
                    true
                }
            })
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    fn execute_timer_task(&mut self, task: ScheduledTask) -> Result<()> {
        self.trace_timer_line(format!(
            "[timer] run id={} due_at={} now_ms={}",
            task.id, task.due_at, self.now_ms
        ));
        self.execute_task(task.action)
    }

    // ---- events ----

    pub(crate) fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }
        path.reverse();

        if path.is_empty() {
            self.trace_event_done(&event, "empty_path");
            return Ok(event);
        }

        // Capture phase.
        if path.len() >= 2 {
            for node in path[..path.len() - 1].to_vec() {
                event.current_target = node;
                self.invoke_listeners(node, &mut event, true)?;
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return Ok(event);
                }
            }
        }

        // Target phase: capture listeners first.
        event.current_target = target;
        self.invoke_listeners(target, &mut event, true)?;
        if event.propagation_stopped {
            self.trace_event_done(&event, "propagation_stopped");
            return Ok(event);
        }

        // Target phase: bubble listeners.
        self.invoke_listeners(target, &mut event, false)?;
        if event.propagation_stopped {
            self.trace_event_done(&event, "propagation_stopped");
            return Ok(event);
        }

        // Bubble phase.
        if path.len() >= 2 {
            for node in path[..path.len() - 1].iter().rev().copied().collect::<Vec<_>>() {
                event.current_target = node;
                self.invoke_listeners(node, &mut event, false)?;
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return Ok(event);
                }
            }
        }

        self.trace_event_done(&event, "completed");
        Ok(event)
    }

    fn invoke_listeners(
        &mut self,
        node: NodeId,
        event: &mut EventState,
        capture: bool,
    ) -> Result<()> {
        let listeners = self.listeners.get(node, &event.event_type, capture);
        for listener in listeners {
            if event.immediate_propagation_stopped {
                break;
            }
            self.run_handler(node, listener.action, event)?;
        }
        Ok(())
    }

    // ---- forms ----

    pub(crate) fn submit_form(&mut self, form: NodeId) -> Result<EventState> {
        let event = self.dispatch_event(form, "submit")?;
        if !event.default_prevented {
            let record = self.submission_record(form)?;
            self.trace_event_line(format!(
                "[form] submit form={} action={}",
                self.trace_node_label(form),
                record.action
            ));
            self.submissions.push(record);
        }
        self.settle_busy_controls(form)?;
        Ok(event)
    }

    fn submission_record(&self, form: NodeId) -> Result<SubmissionRecord> {
        let action = self.dom.attr(form, "action").unwrap_or_default();
        let method = self
            .dom
            .attr(form, "method")
            .unwrap_or_else(|| "get".into())
            .to_ascii_lowercase();
        let fields = self.form_data_entries(form)?;
        Ok(SubmissionRecord {
            action,
            method,
            fields,
        })
    }

    /// Mandatory busy-state exit: every control left busy by a submit click
    /// is restored once the submission settles. A simulated submission flow
    /// takes a control out of this map when it assumes ownership.
    fn settle_busy_controls(&mut self, form: NodeId) -> Result<()> {
        let controls = self
            .busy_pending
            .keys()
            .copied()
            .filter(|control| self.form_owner(*control) == Some(form))
            .collect::<Vec<_>>();
        for control in controls {
            if let Some(snapshot) = self.busy_pending.remove(&control) {
                self.restore_control(control, &snapshot)?;
                self.trace_event_line(format!(
                    "[form] busy_restore control={}",
                    self.trace_node_label(control)
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn restore_control(
        &mut self,
        control: NodeId,
        snapshot: &ControlSnapshot,
    ) -> Result<()> {
        self.dom.set_text_content(control, &snapshot.label)?;
        let element = self
            .dom
            .element_mut(control)
            .ok_or_else(|| Error::Runtime("restore target is not an element".into()))?;
        set_class_attr(element, &snapshot.classes);
        self.dom.set_disabled(control, snapshot.disabled)?;
        Ok(())
    }

    pub(crate) fn control_snapshot(&self, control: NodeId) -> ControlSnapshot {
        ControlSnapshot {
            label: self.dom.text_content(control),
            classes: class_tokens(
                self.dom
                    .attr(control, "class")
                    .as_deref(),
            ),
            disabled: self.dom.disabled(control),
        }
    }

    /// Native-constraint validity stand-in: required controls must be
    /// filled (checked, for checkables), and non-empty email inputs must
    /// look like an address.
    pub(crate) fn check_validity(&self, form: NodeId) -> Result<bool> {
        for control in self.form_controls(form) {
            if self.dom.disabled(control) {
                continue;
            }
            let is_checkable =
                is_checkbox_input(&self.dom, control) || is_radio_input(&self.dom, control);
            if self.dom.required(control) {
                if is_checkable {
                    if !self.dom.checked(control)? {
                        return Ok(false);
                    }
                } else if self.dom.value(control)?.is_empty() {
                    return Ok(false);
                }
            }
            let kind = self
                .dom
                .attr(control, "type")
                .unwrap_or_default()
                .to_ascii_lowercase();
            if kind == "email" {
                let value = self.dom.value(control)?;
                if !value.is_empty() && !value.contains('@') {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn resolve_form_for_submit(&self, target: NodeId) -> Option<NodeId> {
        if self
            .dom
            .tag_name(target)
            .map(|t| t.eq_ignore_ascii_case("form"))
            .unwrap_or(false)
        {
            return Some(target);
        }
        self.dom.find_ancestor_by_tag(target, "form")
    }

    pub(crate) fn form_owner(&self, node_id: NodeId) -> Option<NodeId> {
        if self
            .dom
            .tag_name(node_id)
            .map(|t| t.eq_ignore_ascii_case("form"))
            .unwrap_or(false)
        {
            Some(node_id)
        } else {
            self.dom.find_ancestor_by_tag(node_id, "form")
        }
    }

    pub(crate) fn form_controls(&self, form: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_form_controls(form, &mut out);
        out
    }

    fn collect_form_controls(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.dom.nodes[node.0].children {
            if is_form_control(&self.dom, *child) {
                out.push(*child);
            }
            self.collect_form_controls(*child, out);
        }
    }

    fn form_data_entries(&self, form: NodeId) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for control in self.form_controls(form) {
            if !self.is_successful_form_data_control(control)? {
                continue;
            }
            let name = self.dom.attr(control, "name").unwrap_or_default();
            let mut value = self.dom.value(control)?;
            if value.is_empty()
                && (is_checkbox_input(&self.dom, control) || is_radio_input(&self.dom, control))
            {
                value = "on".into();
            }
            out.push((name, value));
        }
        Ok(out)
    }

    fn is_successful_form_data_control(&self, control: NodeId) -> Result<bool> {
        if self.dom.disabled(control) {
            return Ok(false);
        }
        let name = self.dom.attr(control, "name").unwrap_or_default();
        if name.is_empty() {
            return Ok(false);
        }

        let tag = self
            .dom
            .tag_name(control)
            .ok_or_else(|| Error::Runtime("form data target is not an element".into()))?;

        if tag.eq_ignore_ascii_case("button") {
            return Ok(false);
        }

        if tag.eq_ignore_ascii_case("input") {
            let kind = self
                .dom
                .attr(control, "type")
                .unwrap_or_default()
                .to_ascii_lowercase();
            if matches!(
                kind.as_str(),
                "button" | "submit" | "reset" | "file" | "image"
            ) {
                return Ok(false);
            }
            if kind == "checkbox" || kind == "radio" {
                return self.dom.checked(control);
            }
        }

        Ok(true)
    }

    /// Restores every control of the form to its parse-time value.
    pub(crate) fn reset_form(&mut self, form: NodeId) -> Result<()> {
        for control in self.form_controls(form) {
            let Some(initial) = self.initial_values.get(&control).cloned() else {
                continue;
            };
            self.dom.set_value(control, &initial.value)?;
            self.dom.set_checked(control, initial.checked)?;
        }
        Ok(())
    }

    fn uncheck_other_radios_in_group(&mut self, target: NodeId) -> Result<()> {
        let target_name = self.dom.attr(target, "name").unwrap_or_default();
        if target_name.is_empty() {
            return Ok(());
        }
        let target_form = self.form_owner(target);

        for node in self.dom.all_element_nodes() {
            if node == target {
                continue;
            }
            if !is_radio_input(&self.dom, node) {
                continue;
            }
            if self.dom.attr(node, "name").unwrap_or_default() != target_name {
                continue;
            }
            if self.form_owner(node) != target_form {
                continue;
            }
            if self.dom.checked(node)? {
                self.dom.set_checked(node, false)?;
            }
        }

        Ok(())
    }

    // ---- programmatic surface ----

    /// Renders a QR code for `text` into the container with the given id.
    /// A missing container or an absent encoder is a silent no-op.
    pub fn render_qr(&mut self, text: &str, container_id: &str) -> Result<()> {
        let Some(container) = self.dom.by_id(container_id) else {
            log::debug!("qr container #{container_id} not found, skipping render");
            return Ok(());
        };
        let Some(qr) = self.services.qr.as_mut() else {
            log::debug!("qr encoder not installed, skipping render");
            return Ok(());
        };

        let token = qr.encode(&QrRequest {
            text: text.to_string(),
            width: 200,
            height: 200,
            correction: 'H',
        });

        self.dom.clear_children(container);
        let img = self.dom.create_detached_element("img".into());
        self.dom.set_attr(img, "src", &token)?;
        self.dom.set_attr(img, "width", "200")?;
        self.dom.set_attr(img, "height", "200")?;
        self.dom.append_child(container, img)?;
        self.trace_event_line(format!("[qr] rendered into #{container_id}"));
        Ok(())
    }

    /// Appends a dismissible alert to the page body and schedules the same
    /// one-shot 5000 ms removal bootstrap alerts get.
    pub fn show_notification(&mut self, message: &str, kind: NotificationKind) -> Result<()> {
        let body = self.body_node();
        let node = self.dom.create_detached_element("div".into());
        self.dom.set_attr(
            node,
            "class",
            &format!(
                "alert alert-{} alert-dismissible fade show position-fixed",
                kind.class_suffix()
            ),
        )?;
        self.dom.set_text_content(node, message)?;
        self.dom.append_child(body, node)?;
        self.schedule(5000, None, TaskAction::DismissAlert { node });
        Ok(())
    }

    pub(crate) fn body_node(&self) -> NodeId {
        self.dom
            .all_element_nodes()
            .into_iter()
            .find(|node| {
                self.dom
                    .tag_name(*node)
                    .map(|tag| tag.eq_ignore_ascii_case("body"))
                    .unwrap_or(false)
            })
            .unwrap_or(self.dom.root)
    }

    // ---- queries and assertions ----

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.value(target)
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn is_disabled(&self, selector: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        Ok(self.dom.disabled(target))
    }

    pub fn is_visible(&self, selector: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        Ok(self.node_visible(target))
    }

    pub(crate) fn node_visible(&self, node: NodeId) -> bool {
        self.dom
            .style_get(node, "display")
            .map(|display| display != "none")
            .unwrap_or(false)
    }

    pub fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.dom.query_selector_all(selector)?.len())
    }

    pub fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.dom.query_selector(selector)?.is_some())
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn assert_not_exists(&self, selector: &str) -> Result<()> {
        if let Some(target) = self.dom.query_selector(selector)? {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: "no match".into(),
                actual: "match".into(),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_visible(&self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if !self.node_visible(target) {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: "visible".into(),
                actual: "hidden".into(),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_hidden(&self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.node_visible(target) {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: "hidden".into(),
                actual: "visible".into(),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_has_class(&self, selector: &str, class_name: &str, expected: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.has_class_on(target, class_name);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("class {class_name}: {expected}"),
                actual: format!("class {class_name}: {actual}"),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_disabled(&self, selector: &str, expected: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.disabled(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    pub(crate) fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    // ---- trace ----

    pub(crate) fn trace_node_label(&self, node: NodeId) -> String {
        if let Some(id) = self.dom.attr(node, "id") {
            if !id.is_empty() {
                return format!("#{id}");
            }
        }
        self.dom
            .tag_name(node)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("node-{}", node.0))
    }

    fn trace_event_done(&mut self, event: &EventState, outcome: &str) {
        if !self.trace || !self.trace_events {
            return;
        }
        let line = format!(
            "[event] {} target={} outcome={} default_prevented={}",
            event.event_type,
            self.trace_node_label(event.target),
            outcome,
            event.default_prevented
        );
        self.push_trace(line);
    }

    pub(crate) fn trace_event_line(&mut self, line: String) {
        if self.trace && self.trace_events {
            self.push_trace(line);
        }
    }

    pub(crate) fn trace_timer_line(&mut self, line: String) {
        if self.trace && self.trace_timers {
            self.push_trace(line);
        }
    }

    pub(crate) fn trace_plan_line(&mut self, line: String) {
        if self.trace {
            self.push_trace(line);
        }
    }

    fn push_trace(&mut self, line: String) {
        if self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_time_runs_due_tasks_in_order() -> Result<()> {
        let mut page = Page::from_html("<div class='alert' id='a'>x</div><div class='alert' id='b'>y</div>")?;
        page.set_trace_stderr(false);
        let a = page.dom.by_id("a").expect("a");
        let b = page.dom.by_id("b").expect("b");
        page.schedule(200, None, TaskAction::DismissAlert { node: b });
        page.schedule(100, None, TaskAction::DismissAlert { node: a });

        page.advance_time(150)?;
        assert!(!page.exists("#a")?);
        assert!(page.exists("#b")?);

        page.advance_time(50)?;
        assert!(!page.exists("#b")?);
        Ok(())
    }

    #[test]
    fn owned_schedule_cancels_pending_predecessor() -> Result<()> {
        let mut page = Page::from_html("<div class='alert' id='a'>x</div>")?;
        page.set_trace_stderr(false);
        let a = page.dom.by_id("a").expect("a");
        page.schedule(
            100,
            Some((a, TaskKind::CopyRevert)),
            TaskAction::DismissAlert { node: a },
        );
        page.schedule(
            500,
            Some((a, TaskKind::CopyRevert)),
            TaskAction::DismissAlert { node: a },
        );

        assert_eq!(page.pending_timers().len(), 1);
        page.advance_time(100)?;
        assert!(page.exists("#a")?);
        page.advance_time(400)?;
        assert!(!page.exists("#a")?);
        Ok(())
    }

    #[test]
    fn advance_time_rejects_negative_delta() -> Result<()> {
        let mut page = Page::from_html("<p>x</p>")?;
        assert!(page.advance_time(-1).is_err());
        Ok(())
    }

    #[test]
    fn submit_without_handlers_records_submission() -> Result<()> {
        let mut page = Page::from_html(
            r#"<form id='f' action='/login' method='post'>
                 <input name='user' value='dd'>
                 <button type='submit'>Go</button>
               </form>"#,
        )?;
        page.set_trace_stderr(false);
        page.click("#f button")?;
        assert_eq!(page.submissions().len(), 1);
        let record = &page.submissions()[0];
        assert_eq!(record.action, "/login");
        assert_eq!(record.method, "post");
        assert_eq!(record.fields, vec![("user".to_string(), "dd".to_string())]);
        Ok(())
    }

    #[test]
    fn form_reset_restores_parse_time_values() -> Result<()> {
        let mut page = Page::from_html(
            r#"<form id='f'><input id='name' name='name' value='original'><textarea id='msg'>hi</textarea></form>"#,
        )?;
        page.type_text("#name", "changed")?;
        page.type_text("#msg", "changed too")?;
        let form = page.dom.by_id("f").expect("form");
        page.reset_form(form)?;
        page.assert_value("#name", "original")?;
        page.assert_value("#msg", "hi")?;
        Ok(())
    }

    #[test]
    fn required_controls_gate_validity() -> Result<()> {
        let page = Page::from_html(
            r#"<form id='f'>
                 <input name='email' type='email' value='nope' required>
               </form>"#,
        )?;
        let form = page.dom.by_id("f").expect("form");
        assert!(!page.check_validity(form)?);
        Ok(())
    }

    #[test]
    fn show_notification_appends_and_auto_dismisses() -> Result<()> {
        let mut page = Page::from_html("<body><p>content</p></body>")?;
        page.set_trace_stderr(false);
        page.show_notification("Saved", NotificationKind::Success)?;
        page.assert_exists(".alert.alert-success")?;
        page.advance_time(4999)?;
        page.assert_exists(".alert.alert-success")?;
        page.advance_time(1)?;
        page.assert_not_exists(".alert.alert-success")?;
        Ok(())
    }

    #[test]
    fn render_qr_without_encoder_is_a_no_op() -> Result<()> {
        let mut page = Page::from_html("<div id='qrBox'><span>old</span></div>")?;
        page.render_qr("https://example.test", "qrBox")?;
        page.assert_text("#qrBox", "old")?;
        Ok(())
    }

    #[test]
    fn render_qr_with_encoder_replaces_container_content() -> Result<()> {
        let mut page = Page::from_html("<div id='qrBox'><span>old</span></div>")?;
        page.set_trace_stderr(false);
        let qr = MemoryQr::new();
        page.set_qr_encoder(Box::new(qr.clone()));
        page.render_qr("https://example.test", "qrBox")?;

        page.assert_not_exists("#qrBox span")?;
        page.assert_exists("#qrBox img[width=200][height=200]")?;
        let requests = qr.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].correction, 'H');
        Ok(())
    }

    #[test]
    fn scroll_to_clamps_at_origin_and_fires_scroll() -> Result<()> {
        let mut page = Page::from_html("<p>x</p>")?;
        page.scroll_to(-50)?;
        assert_eq!(page.scroll_y(), 0);
        Ok(())
    }
}

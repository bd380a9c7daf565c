use std::cell::RefCell;
use std::rc::Rc;

/// A tooltip/popover trigger as seen by the widget library: the element's
/// shape, not the element itself. The runtime hands these to the injected
/// library at bootstrap and never looks at them again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetDescriptor {
    pub tag: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Stand-in for the page's widget library (tooltips and popovers).
pub trait WidgetLibrary {
    fn tooltip(&mut self, descriptor: WidgetDescriptor);
    fn popover(&mut self, descriptor: WidgetDescriptor);
}

/// Stand-in for the platform clipboard. `write_text` reports whether the
/// write was accepted; a denied write is not an error, the caller degrades
/// silently.
pub trait ClipboardSink {
    fn write_text(&mut self, text: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrRequest {
    pub text: String,
    pub width: u32,
    pub height: u32,
    /// Error-correction level; the runtime always asks for "H".
    pub correction: char,
}

/// Stand-in for the QR generator library. Returns an opaque rendering token
/// the runtime places into the target container.
pub trait QrEncoder {
    fn encode(&mut self, request: &QrRequest) -> String;
}

/// The injected platform capabilities. Every slot is optional; an absent
/// service turns the behaviors that need it into silent no-ops.
#[derive(Default)]
pub struct Services {
    pub widgets: Option<Box<dyn WidgetLibrary>>,
    pub clipboard: Option<Box<dyn ClipboardSink>>,
    pub qr: Option<Box<dyn QrEncoder>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("widgets", &self.widgets.is_some())
            .field("clipboard", &self.clipboard.is_some())
            .field("qr", &self.qr.is_some())
            .finish()
    }
}

/// Recording widget library for tests and examples. Clones share the same
/// backing store, so a handle kept by the test observes what the page did.
#[derive(Debug, Clone, Default)]
pub struct MemoryWidgets {
    tooltips: Rc<RefCell<Vec<WidgetDescriptor>>>,
    popovers: Rc<RefCell<Vec<WidgetDescriptor>>>,
}

impl MemoryWidgets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tooltips(&self) -> Vec<WidgetDescriptor> {
        self.tooltips.borrow().clone()
    }

    pub fn popovers(&self) -> Vec<WidgetDescriptor> {
        self.popovers.borrow().clone()
    }
}

impl WidgetLibrary for MemoryWidgets {
    fn tooltip(&mut self, descriptor: WidgetDescriptor) {
        self.tooltips.borrow_mut().push(descriptor);
    }

    fn popover(&mut self, descriptor: WidgetDescriptor) {
        self.popovers.borrow_mut().push(descriptor);
    }
}

/// Recording clipboard. Set `deny` to simulate a rejected permission prompt.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    writes: Rc<RefCell<Vec<String>>>,
    deny: bool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            writes: Rc::default(),
            deny: true,
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }
}

impl ClipboardSink for MemoryClipboard {
    fn write_text(&mut self, text: &str) -> bool {
        if self.deny {
            return false;
        }
        self.writes.borrow_mut().push(text.to_string());
        true
    }
}

/// Deterministic QR encoder: the rendering token echoes the request, which
/// is all the DOM-level tests need.
#[derive(Debug, Clone, Default)]
pub struct MemoryQr {
    requests: Rc<RefCell<Vec<QrRequest>>>,
}

impl MemoryQr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<QrRequest> {
        self.requests.borrow().clone()
    }
}

impl QrEncoder for MemoryQr {
    fn encode(&mut self, request: &QrRequest) -> String {
        self.requests.borrow_mut().push(request.clone());
        format!(
            "qr:{}x{}:{}:{}",
            request.width, request.height, request.correction, request.text
        )
    }
}

//! Browser driver contract.
//!
//! The engine never controls a browser itself. It consumes the primitives of
//! [`PageDriver`], which a WebDriver or CDP client implements, and
//! [`crate::mock::MockPage`] implements for offline tests.
//!
//! ## Navigation epochs
//!
//! Every navigation, reload, or wholesale DOM replacement increments the page's
//! navigation epoch. Handles remember the epoch they were resolved in; acting
//! on a handle from an older epoch fails with `StaleElement`.

use crate::dialog::{AutoDialogBehavior, Dialog};
use crate::locator::{Scope, Selector};
use crate::normalize::truncate;
use crate::result::ResoluteResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Opaque handle to a live DOM node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifying attributes of a node, used in diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Tag name
    pub tag: String,
    /// `type` attribute
    pub input_type: Option<String>,
    /// `name` attribute
    pub name: Option<String>,
    /// `id` attribute
    pub id: Option<String>,
    /// `placeholder` attribute
    pub placeholder: Option<String>,
    /// Visible text, if any
    pub text: Option<String>,
}

impl NodeDescriptor {
    /// Create a descriptor for a tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.tag)?;
        let attrs = [
            ("type", &self.input_type),
            ("name", &self.name),
            ("id", &self.id),
            ("placeholder", &self.placeholder),
        ];
        let mut first = true;
        for (key, value) in attrs {
            if let Some(value) = value {
                if !first {
                    f.write_str(" ")?;
                }
                write!(f, "{key}='{value}'")?;
                first = false;
            }
        }
        f.write_str("]")?;
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            write!(f, " \"{}\"", truncate(text, 40))?;
        }
        Ok(())
    }
}

/// DOM notification the form engine dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomEvent {
    /// Focus gained
    Focus,
    /// Value edited
    Input,
    /// Value committed
    Change,
    /// Focus lost
    Blur,
}

impl DomEvent {
    /// DOM event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Input => "input",
            Self::Change => "change",
            Self::Blur => "blur",
        }
    }
}

/// Scroll position of a container after a scroll step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollState {
    /// Current scroll offset in pixels
    pub top: i64,
    /// Largest reachable offset in pixels
    pub max_top: i64,
}

impl ScrollState {
    /// Whether the container cannot scroll further down
    #[must_use]
    pub const fn at_end(&self) -> bool {
        self.top >= self.max_top
    }
}

/// A file the browser handed over as a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPayload {
    /// Filename suggested by the server
    pub suggested_filename: String,
    /// URL the download came from
    pub url: String,
    /// File contents
    pub bytes: Vec<u8>,
}

/// Page-level event kinds that can be subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageEventKind {
    /// A download started and completed
    Download,
    /// A new tab or popup opened
    Popup,
    /// The page navigated in place
    Navigation,
    /// A native dialog appeared
    Dialog,
}

/// Page-level event
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// A download completed
    Download(DownloadPayload),
    /// A popup opened at `url`
    Popup {
        /// Popup URL
        url: String,
    },
    /// Same-tab navigation to `url`
    Navigated {
        /// New URL
        url: String,
    },
    /// A native dialog was handled
    Dialog(Dialog),
}

impl PageEvent {
    /// Kind of this event
    #[must_use]
    pub const fn kind(&self) -> PageEventKind {
        match self {
            Self::Download(_) => PageEventKind::Download,
            Self::Popup { .. } => PageEventKind::Popup,
            Self::Navigated { .. } => PageEventKind::Navigation,
            Self::Dialog(_) => PageEventKind::Dialog,
        }
    }
}

/// Sending half handed to a driver when a subscription is created
pub type EventSink = mpsc::UnboundedSender<PageEvent>;

/// Buffered stream of page events.
///
/// The subscription is live as soon as the stream exists: events fired after
/// `subscribe` returns are queued even if nobody is awaiting yet.
#[derive(Debug)]
pub struct EventStream {
    kinds: Vec<PageEventKind>,
    receiver: mpsc::UnboundedReceiver<PageEvent>,
}

impl EventStream {
    /// Create a connected sink/stream pair for the given kinds
    #[must_use]
    pub fn channel(kinds: &[PageEventKind]) -> (EventSink, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                kinds: kinds.to_vec(),
                receiver,
            },
        )
    }

    /// Kinds this stream receives
    #[must_use]
    pub fn kinds(&self) -> &[PageEventKind] {
        &self.kinds
    }

    /// Whether the stream wants events of `kind`
    #[must_use]
    pub fn accepts(&self, kind: PageEventKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Await the next event; `None` once the driver drops the sink
    pub async fn next(&mut self) -> Option<PageEvent> {
        self.receiver.recv().await
    }

    /// Take a queued event without waiting
    pub fn try_next(&mut self) -> Option<PageEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<PageEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }
}

/// Browser page primitives consumed by the engine
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// All nodes matching `selector` in `scope`, in document order
    async fn query_all(&self, scope: &Scope, selector: &Selector) -> ResoluteResult<Vec<NodeId>>;

    /// Whether the node is rendered and visible
    async fn is_visible(&self, node: NodeId) -> ResoluteResult<bool>;

    /// Whether the node accepts input
    async fn is_enabled(&self, node: NodeId) -> ResoluteResult<bool>;

    /// Identifying attributes for diagnostics
    async fn describe(&self, node: NodeId) -> ResoluteResult<NodeDescriptor>;

    /// Visible text content
    async fn text(&self, node: NodeId) -> ResoluteResult<String>;

    /// Current form value
    async fn value(&self, node: NodeId) -> ResoluteResult<String>;

    /// Attribute value
    async fn attribute(&self, node: NodeId, name: &str) -> ResoluteResult<Option<String>>;

    /// Whether a checkbox or radio is checked
    async fn is_checked(&self, node: NodeId) -> ResoluteResult<bool>;

    /// Click the node
    async fn click(&self, node: NodeId) -> ResoluteResult<()>;

    /// Focus the node
    async fn focus(&self, node: NodeId) -> ResoluteResult<()>;

    /// Select all existing content and delete it
    async fn clear(&self, node: NodeId) -> ResoluteResult<()>;

    /// Type `text` into the node
    async fn set_value(&self, node: NodeId, text: &str) -> ResoluteResult<()>;

    /// Dispatch a DOM notification on the node
    async fn dispatch_event(&self, node: NodeId, event: DomEvent) -> ResoluteResult<()>;

    /// Make `option` the selected option of `select`
    async fn choose_option(&self, select: NodeId, option: NodeId) -> ResoluteResult<()>;

    /// Set a checkbox or radio state
    async fn set_checked(&self, node: NodeId, checked: bool) -> ResoluteResult<()>;

    /// Attach files to a file input
    async fn set_input_files(&self, node: NodeId, files: &[PathBuf]) -> ResoluteResult<()>;

    /// Scroll a container by `dy` pixels
    async fn scroll_by(&self, container: NodeId, dy: i64) -> ResoluteResult<ScrollState>;

    /// Start buffering events of the given kinds
    async fn subscribe(&self, kinds: &[PageEventKind]) -> ResoluteResult<EventStream>;

    /// Current page URL
    async fn current_url(&self) -> ResoluteResult<String>;

    /// Serialized page content
    async fn page_content(&self) -> ResoluteResult<String>;

    /// Number of in-flight network requests
    async fn pending_requests(&self) -> ResoluteResult<usize>;

    /// Current navigation epoch
    async fn navigation_epoch(&self) -> ResoluteResult<u64>;

    /// How native dialogs are answered from now on
    async fn set_dialog_behavior(&self, behavior: AutoDialogBehavior) -> ResoluteResult<()>;

    /// Close the page
    async fn close(&self) -> ResoluteResult<()>;
}

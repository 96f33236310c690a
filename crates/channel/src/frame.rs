//! Guest frame handles.

use crate::messages::HostMessage;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_WINDOW: AtomicU64 = AtomicU64::new(1);

/// Identity handle for a guest content window.
///
/// Compared by identity only: two refs are equal exactly when they were
/// cloned from the same handle. Never inspect or fabricate the inner value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRef(u64);

impl WindowRef {
    pub fn new() -> Self {
        Self(NEXT_WINDOW.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WindowRef {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to an embedded guest frame.
///
/// Implemented by the embedding environment; the bridge only ever talks to
/// a frame through this trait.
pub trait GuestFrame: Send + Sync + 'static {
    /// The frame's content window, once one is attached.
    ///
    /// A frame element can exist before its content window does; callers
    /// that must deliver a message poll until this returns `Some`.
    fn window(&self) -> Option<WindowRef>;

    /// The origin the guest is expected to load from, if declared.
    fn origin(&self) -> Option<String>;

    /// Post a message into the frame.
    fn post(&self, message: &HostMessage) -> Result<()>;
}

/// In-process frame backed by a tokio channel.
///
/// Stands in for a real embedded frame in tests and demos: host messages
/// posted here arrive on the receiver handed out by [`ChannelFrame::new`].
pub struct ChannelFrame {
    window: OnceLock<WindowRef>,
    origin: Option<String>,
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ChannelFrame {
    pub fn new(origin: Option<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                window: OnceLock::new(),
                origin,
                tx,
            }),
            rx,
        )
    }

    /// Attach the content window, as the embedding environment does once the
    /// guest document has loaded.
    pub fn attach_window(&self) -> WindowRef {
        *self.window.get_or_init(WindowRef::new)
    }
}

impl GuestFrame for ChannelFrame {
    fn window(&self) -> Option<WindowRef> {
        self.window.get().copied()
    }

    fn origin(&self) -> Option<String> {
        self.origin.clone()
    }

    fn post(&self, message: &HostMessage) -> Result<()> {
        self.tx.send(message.clone()).map_err(|_| Error::FrameGone)
    }
}

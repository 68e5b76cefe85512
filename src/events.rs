//! Page events, listener subscriptions, and host effects.
//!
//! Listeners are registered explicitly at page init and removed at teardown.
//! Dispatching an event reaches only live subscriptions whose kind (and, for
//! element-bound listeners, target) matches.

use crate::chrome::{KeyPress, ScrollMetrics};
use crate::dom::NodeId;
use crate::toc::IntersectionEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Load,
    Scroll,
    Input,
    Click,
    KeyDown,
    Intersection,
}

/// Something that happened on the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Load,
    Scroll(ScrollMetrics),
    Input { target: NodeId, value: String },
    Click { target: NodeId },
    KeyDown(KeyPress),
    Intersection(Vec<IntersectionEntry>),
}

impl PageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PageEvent::Load => EventKind::Load,
            PageEvent::Scroll(_) => EventKind::Scroll,
            PageEvent::Input { .. } => EventKind::Input,
            PageEvent::Click { .. } => EventKind::Click,
            PageEvent::KeyDown(_) => EventKind::KeyDown,
            PageEvent::Intersection(_) => EventKind::Intersection,
        }
    }

    /// Element the event was dispatched on, for element-bound events.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            PageEvent::Input { target, .. } | PageEvent::Click { target } => Some(*target),
            _ => None,
        }
    }
}

/// Page behaviour attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    ScrollProgress,
    BackToTop,
    ThemeToggle,
    SearchInput,
    SearchHotkey,
    ActiveSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A live listener registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub listener: Listener,
    /// Element the listener is bound to; `None` for window-level listeners.
    pub target: Option<NodeId>,
    /// Passive listeners never suppress default handling.
    pub passive: bool,
}

/// Registry of live subscriptions, in registration order.
#[derive(Debug, Default)]
pub struct Subscriptions {
    next_id: u64,
    live: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        listener: Listener,
        target: Option<NodeId>,
        passive: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.live.push(Subscription {
            id,
            kind,
            listener,
            target,
            passive,
        });
        id
    }

    /// Remove one subscription. Returns whether it was live.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.live.len();
        self.live.retain(|s| s.id != id);
        self.live.len() != before
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.live.clear();
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.live.iter()
    }

    /// Subscriptions that should receive `event`, in registration order.
    pub fn matching(&self, event: &PageEvent) -> Vec<Subscription> {
        let kind = event.kind();
        let target = event.target();
        self.live
            .iter()
            .filter(|s| s.kind == kind)
            .filter(|s| s.target.is_none() || s.target == target)
            .cloned()
            .collect()
    }
}

/// Work the host environment must carry out after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PreventDefault,
    FocusAndSelect(NodeId),
    ScrollIntoView { node: NodeId, smooth: bool, center: bool },
    ScrollTo { top: f64, smooth: bool },
}

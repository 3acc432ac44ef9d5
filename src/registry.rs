//! Handler registries.
//!
//! Three disjoint collections with different lookup rules:
//!
//! - ordered: FIFO, only the head takes part in matching
//! - oneshot: first match wins and is removed
//! - permanent: first match wins and stays

use crate::handler::RequestHandler;
use crate::request::Request;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Registry a handler is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerType {
    Permanent,
    Oneshot,
    Ordered,
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerType::Permanent => write!(f, "permanent"),
            HandlerType::Oneshot => write!(f, "oneshot"),
            HandlerType::Ordered => write!(f, "ordered"),
        }
    }
}

/// Outcome of a registry lookup.
pub(crate) enum Selection {
    Found(Arc<RequestHandler>, HandlerType),
    /// The head of the ordered list does not match. The head stays in place.
    OrderedMismatch,
    NotFound,
}

/// A list of handlers searched in registration order.
#[derive(Default)]
pub(crate) struct HandlerList {
    handlers: Vec<Arc<RequestHandler>>,
}

impl HandlerList {
    pub fn push(&mut self, handler: Arc<RequestHandler>) {
        self.handlers.push(handler);
    }

    pub fn position(&self, request: &Request) -> Option<usize> {
        self.handlers
            .iter()
            .position(|handler| handler.matcher().matches(request))
    }

    pub fn find(&self, request: &Request) -> Option<Arc<RequestHandler>> {
        self.position(request).map(|idx| Arc::clone(&self.handlers[idx]))
    }

    pub fn remove(&mut self, idx: usize) -> Arc<RequestHandler> {
        self.handlers.remove(idx)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn to_vec(&self) -> Vec<Arc<RequestHandler>> {
        self.handlers.clone()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<RequestHandler>> {
        self.handlers.iter()
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    ordered: VecDeque<Arc<RequestHandler>>,
    oneshot: HandlerList,
    permanent: HandlerList,
}

impl HandlerRegistry {
    pub fn add(&mut self, handler: Arc<RequestHandler>, handler_type: HandlerType) {
        match handler_type {
            HandlerType::Ordered => self.ordered.push_back(handler),
            HandlerType::Oneshot => self.oneshot.push(handler),
            HandlerType::Permanent => self.permanent.push(handler),
        }
    }

    /// Pick the handler for `request`, consuming ordered and oneshot
    /// entries on a match.
    pub fn select(&mut self, request: &Request) -> Selection {
        if let Some(head) = self.ordered.front() {
            if !head.matcher().matches(request) {
                return Selection::OrderedMismatch;
            }
            return match self.ordered.pop_front() {
                Some(handler) => Selection::Found(handler, HandlerType::Ordered),
                None => Selection::NotFound,
            };
        }

        if let Some(idx) = self.oneshot.position(request) {
            return Selection::Found(self.oneshot.remove(idx), HandlerType::Oneshot);
        }

        match self.permanent.find(request) {
            Some(handler) => Selection::Found(handler, HandlerType::Permanent),
            None => Selection::NotFound,
        }
    }

    /// Ordered and oneshot handlers not consumed yet.
    pub fn outstanding(&self) -> Vec<Arc<RequestHandler>> {
        self.ordered
            .iter()
            .chain(self.oneshot.iter())
            .cloned()
            .collect()
    }

    /// True if any of `handlers` is still queued as ordered or oneshot.
    pub fn holds_any(&self, handlers: &[Arc<RequestHandler>]) -> bool {
        self.ordered
            .iter()
            .chain(self.oneshot.iter())
            .any(|queued| handlers.iter().any(|h| Arc::ptr_eq(h, queued)))
    }

    pub fn len(&self) -> usize {
        self.ordered.len() + self.oneshot.len() + self.permanent.len()
    }

    pub fn ordered(&self) -> Vec<Arc<RequestHandler>> {
        self.ordered.iter().cloned().collect()
    }

    pub fn oneshot(&self) -> Vec<Arc<RequestHandler>> {
        self.oneshot.to_vec()
    }

    pub fn permanent(&self) -> Vec<Arc<RequestHandler>> {
        self.permanent.to_vec()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.oneshot.clear();
        self.permanent.clear();
    }

    /// Dump of every registered matcher, grouped by registry.
    pub fn format_matchers(&self) -> String {
        fn section<'a>(
            lines: &mut Vec<String>,
            title: &str,
            handlers: impl Iterator<Item = &'a Arc<RequestHandler>>,
        ) {
            lines.push(title.to_string());
            let before = lines.len();
            lines.extend(handlers.map(|h| format!("    {}", h.matcher())));
            if lines.len() == before {
                lines.push("    none".to_string());
            }
        }

        let mut lines = Vec::new();
        section(&mut lines, "Ordered matchers:", self.ordered.iter());
        lines.push(String::new());
        section(&mut lines, "Oneshot matchers:", self.oneshot.iter());
        lines.push(String::new());
        section(&mut lines, "Persistent matchers:", self.permanent.iter());
        lines.join("\n")
    }
}

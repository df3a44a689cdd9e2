//! Named lifecycle hooks around requests and data-layer calls.
//!
//! Every event exists in a resource-agnostic form (`before_GET`) and, for resources
//! whose declared methods can trigger it, a resource-specific form (`before_GET_people`).
//! Running an event invokes the agnostic callbacks first, then the specific ones, each
//! in subscription order.

use crate::error::{AppError, ConfigError};
use crate::io::Document;
use crate::resource::{Method, Resource};
use axum::http::{HeaderMap, StatusCode};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timing {
    Before,
    After,
}

impl Timing {
    fn as_str(&self) -> &'static str {
        match self {
            Timing::Before => "before",
            Timing::After => "after",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataAction {
    Fetch,
    Create,
    Replace,
    Update,
    Delete,
}

impl DataAction {
    fn as_str(&self) -> &'static str {
        match self {
            DataAction::Fetch => "fetch",
            DataAction::Create => "create",
            DataAction::Replace => "replace",
            DataAction::Update => "update",
            DataAction::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Resource,
    Item,
    Items,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Resource => "resource",
            Level::Item => "item",
            Level::Items => "items",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Startup,
    Shutdown,
}

/// Every (action, level) pair a handler fires.
const DATA_EVENTS: [(DataAction, Level); 7] = [
    (DataAction::Fetch, Level::Resource),
    (DataAction::Fetch, Level::Item),
    (DataAction::Create, Level::Items),
    (DataAction::Replace, Level::Item),
    (DataAction::Update, Level::Item),
    (DataAction::Delete, Level::Resource),
    (DataAction::Delete, Level::Item),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    Request(Timing, Method),
    Data(Timing, DataAction, Level),
    Lifecycle(Lifecycle),
}

impl EventName {
    pub fn data(timing: Timing, action: DataAction, level: Level) -> Self {
        EventName::Data(timing, action, level)
    }

    pub fn all() -> Vec<EventName> {
        let mut out = Vec::new();
        for timing in [Timing::Before, Timing::After] {
            for m in Method::ALL {
                out.push(EventName::Request(timing, m));
            }
            for (action, level) in DATA_EVENTS {
                out.push(EventName::Data(timing, action, level));
            }
        }
        out.push(EventName::Lifecycle(Lifecycle::Startup));
        out.push(EventName::Lifecycle(Lifecycle::Shutdown));
        out
    }

    /// Whether `resource`'s declared methods can ever fire this event for it.
    fn applies_to(&self, resource: &Resource, is_sub_resource: bool) -> bool {
        let collection = |m: Method| resource.resource_methods().contains(&m);
        let item = |m: Method| resource.item_methods().contains(&m);
        match *self {
            EventName::Request(_, m) => resource.serves(m),
            EventName::Data(_, action, level) => match (action, level) {
                (DataAction::Fetch, Level::Resource) => {
                    collection(Method::Get) || collection(Method::Head) || is_sub_resource
                }
                (DataAction::Fetch, Level::Item) => item(Method::Get) || item(Method::Head),
                (DataAction::Create, Level::Items) => collection(Method::Post) || item(Method::Put),
                (DataAction::Replace, Level::Item) => item(Method::Put),
                (DataAction::Update, Level::Item) => item(Method::Patch),
                (DataAction::Delete, Level::Resource) => collection(Method::Delete),
                (DataAction::Delete, Level::Item) => item(Method::Delete),
                _ => false,
            },
            EventName::Lifecycle(_) => false,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventName::Request(t, m) => write!(f, "{}_{}", t.as_str(), m.as_str()),
            EventName::Data(t, a, l) => write!(f, "{}_{}_{}", t.as_str(), a.as_str(), l.as_str()),
            EventName::Lifecycle(Lifecycle::Startup) => f.write_str("startup"),
            EventName::Lifecycle(Lifecycle::Shutdown) => f.write_str("shutdown"),
        }
    }
}

/// An event name, optionally scoped to one resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub name: EventName,
    pub resource: Option<String>,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) => write!(f, "{}_{}", self.name, r),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The incoming request as seen by request-event callbacks.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
}

/// Mutable argument handed to callbacks. Handlers read it back after the event runs,
/// so callbacks can rewrite queries, documents and headers in place.
#[derive(Clone, Debug)]
pub enum Payload {
    Empty,
    Request(RequestInfo),
    Response {
        request: RequestInfo,
        status: StatusCode,
        headers: HeaderMap,
    },
    Query(Document),
    Document(Document),
    Documents(Vec<Document>),
}

impl Payload {
    pub fn into_query(self) -> Result<Document, AppError> {
        match self {
            Payload::Query(q) => Ok(q),
            other => Err(mismatch("query", &other)),
        }
    }

    pub fn into_document(self) -> Result<Document, AppError> {
        match self {
            Payload::Document(d) => Ok(d),
            other => Err(mismatch("document", &other)),
        }
    }

    pub fn into_documents(self) -> Result<Vec<Document>, AppError> {
        match self {
            Payload::Documents(d) => Ok(d),
            other => Err(mismatch("documents", &other)),
        }
    }

    pub fn into_request(self) -> Result<RequestInfo, AppError> {
        match self {
            Payload::Request(r) => Ok(r),
            other => Err(mismatch("request", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Request(_) => "request",
            Payload::Response { .. } => "response",
            Payload::Query(_) => "query",
            Payload::Document(_) => "document",
            Payload::Documents(_) => "documents",
        }
    }
}

fn mismatch(expected: &str, got: &Payload) -> AppError {
    AppError::Hook(format!("callback replaced a {} payload with {}", expected, got.kind()))
}

/// What a callback is told about the event it is handling.
#[derive(Clone, Debug)]
pub struct EventContext {
    /// Full name of the key being run, e.g. `after_fetch_item_people`.
    pub event: String,
    /// Resource the event fired for; empty for lifecycle events.
    pub resource: String,
}

pub type HookResult = Result<(), AppError>;

type SyncHook = dyn Fn(&EventContext, &mut Payload) -> HookResult + Send + Sync;
type AsyncHook = dyn for<'a> Fn(&'a EventContext, &'a mut Payload) -> BoxFuture<'a, HookResult> + Send + Sync;

#[derive(Clone)]
pub enum Callback {
    Sync(Arc<SyncHook>),
    Async(Arc<AsyncHook>),
}

impl Callback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&EventContext, &mut Payload) -> HookResult + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(f))
    }

    /// `f` returns a boxed future, e.g. `|ctx, payload| Box::pin(async move { .. })`.
    pub fn asynchronous<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EventContext, &'a mut Payload) -> BoxFuture<'a, HookResult> + Send + Sync + 'static,
    {
        Callback::Async(Arc::new(f))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Sync(_) => f.write_str("Callback::Sync"),
            Callback::Async(_) => f.write_str("Callback::Async"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventBus {
    handlers: HashMap<EventKey, Vec<Callback>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subscribable name given the declared resources.
    pub fn valid_names(resources: &[Resource]) -> HashMap<String, EventKey> {
        let sub_targets: HashSet<&str> = resources
            .iter()
            .flat_map(|r| r.sub_resources().iter().map(|s| s.resource.as_str()))
            .collect();
        let mut names = HashMap::new();
        for name in EventName::all() {
            let key = EventKey { name, resource: None };
            names.insert(key.to_string(), key);
            for r in resources {
                if name.applies_to(r, sub_targets.contains(r.name())) {
                    let key = EventKey {
                        name,
                        resource: Some(r.name().to_string()),
                    };
                    names.insert(key.to_string(), key);
                }
            }
        }
        names
    }

    /// Appends `callback` under `event`. Unknown names fail immediately.
    pub fn subscribe(
        &mut self,
        resources: &[Resource],
        event: &str,
        callback: Callback,
    ) -> Result<(), ConfigError> {
        let key = Self::valid_names(resources)
            .remove(event)
            .ok_or_else(|| ConfigError::UnknownEvent(event.to_string()))?;
        tracing::debug!(event = %key, "subscribed callback");
        self.handlers.entry(key).or_default().push(callback);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs agnostic then `resource`-specific callbacks for `name`. The first error stops
    /// the run and is returned unchanged.
    pub async fn run(&self, name: EventName, resource: &str, payload: &mut Payload) -> HookResult {
        let agnostic = EventKey { name, resource: None };
        let specific = (!resource.is_empty()).then(|| EventKey {
            name,
            resource: Some(resource.to_string()),
        });
        for key in std::iter::once(agnostic).chain(specific) {
            let Some(callbacks) = self.handlers.get(&key) else {
                continue;
            };
            let ctx = EventContext {
                event: key.to_string(),
                resource: resource.to_string(),
            };
            for callback in callbacks {
                match callback {
                    Callback::Sync(f) => (f.as_ref())(&ctx, payload)?,
                    Callback::Async(f) => (f.as_ref())(&ctx, payload).await?,
                }
            }
        }
        Ok(())
    }
}

//! Event routing by envelope type.
//!
//! Subscribers are keyed by event type and invoked synchronously, in
//! subscription order, on the task that delivers the frame. Types with no
//! subscriber are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::Event;
use crate::protocol::{
    ExecutionUpdate, ScreenshotFrame, EXECUTION_UPDATE, NO_OP_TYPES, SCREENSHOT_FRAME,
};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: Arc<RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to raw `data` payloads of `event_type`.
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_execution_update<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ExecutionUpdate) + Send + Sync + 'static,
    {
        self.on_typed(EXECUTION_UPDATE, handler)
    }

    pub fn on_screenshot_frame<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ScreenshotFrame) + Send + Sync + 'static,
    {
        self.on_typed(SCREENSHOT_FRAME, handler)
    }

    fn on_typed<T, F>(&self, event_type: &'static str, handler: F) -> SubscriptionId
    where
        T: DeserializeOwned,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on(event_type, move |data| {
            match serde_json::from_value::<T>(data.clone()) {
                Ok(payload) => handler(&payload),
                Err(error) => tracing::warn!(
                    target = "playbook_sync::router",
                    event_type,
                    error = %error,
                    "dropping payload that does not match its event type"
                ),
            }
        })
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Invokes every subscriber of `event.event_type` with its data.
    pub fn dispatch(&self, event: &Event) {
        // Handlers are cloned out so one may unsubscribe while running.
        let matched: Vec<Handler> = match self.handlers.read().get(&event.event_type) {
            Some(subs) => subs.iter().map(|(_, handler)| handler.clone()).collect(),
            None => {
                if !NO_OP_TYPES.contains(&event.event_type.as_str()) {
                    tracing::trace!(
                        target = "playbook_sync::router",
                        event_type = %event.event_type,
                        "no subscriber for event type"
                    );
                }
                return;
            }
        };
        for handler in matched {
            handler(&event.data);
        }
    }

    pub fn dispatch_all<'a>(&self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::decode;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder(router: &EventRouter) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let updates = seen.clone();
        router.on_execution_update(move |u| {
            updates
                .lock()
                .push(format!("update:{}:{}", u.execution_id, u.status().unwrap_or("-")))
        });
        let frames = seen.clone();
        router.on_screenshot_frame(move |f| frames.lock().push(format!("frame:{}", f.execution_id)));
        seen
    }

    #[test]
    fn single_event_invokes_matching_subscriber_once() {
        let router = EventRouter::new();
        let seen = recorder(&router);
        router.dispatch_all(&decode(
            r#"{"type":"execution_update","data":{"execution_id":"e1","status":"running"}}"#,
        ));
        assert_eq!(*seen.lock(), vec!["update:e1:running"]);
    }

    #[test]
    fn batch_invokes_in_array_order() {
        let router = EventRouter::new();
        let seen = recorder(&router);
        let raw = json!({"type": "batch", "messages": [
            {"type": "execution_update", "data": {"execution_id": "e1", "status": "running"}},
            {"type": "screenshot_frame", "data": {"execution_id": "e1", "frame": "a"}},
            {"type": "execution_update", "data": {"execution_id": "e1", "status": "completed"}}
        ]})
        .to_string();
        router.dispatch_all(&decode(&raw));
        assert_eq!(
            *seen.lock(),
            vec!["update:e1:running", "frame:e1", "update:e1:completed"]
        );
    }

    #[test]
    fn unknown_and_no_op_types_are_ignored() {
        let router = EventRouter::new();
        let seen = recorder(&router);
        for raw in [r#"{"type":"pong"}"#, r#"{"type":"keepalive"}"#, r#"{"type":"mystery","data":1}"#] {
            router.dispatch_all(&decode(raw));
        }
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn malformed_frame_triggers_nothing() {
        let router = EventRouter::new();
        let seen = recorder(&router);
        router.dispatch_all(&decode("{\"type\":\"execution_update\""));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn typed_subscriber_skips_payload_without_execution_id() {
        let router = EventRouter::new();
        let seen = recorder(&router);
        router.dispatch_all(&decode(r#"{"type":"execution_update","data":{"status":"running"}}"#));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn multiple_subscribers_and_unsubscribe() {
        let router = EventRouter::new();
        let count = Arc::new(Mutex::new((0, 0)));
        let a = count.clone();
        let first = router.on("execution_update", move |_| a.lock().0 += 1);
        let b = count.clone();
        router.on("execution_update", move |_| b.lock().1 += 1);
        assert_eq!(router.subscriber_count("execution_update"), 2);

        let event = Event {
            event_type: "execution_update".into(),
            data: json!({"execution_id": "e1"}),
        };
        router.dispatch(&event);
        assert!(router.unsubscribe(first));
        assert!(!router.unsubscribe(first));
        router.dispatch(&event);

        assert_eq!(*count.lock(), (1, 2));
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let router = EventRouter::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let inner_router = router.clone();
        let inner_slot = slot.clone();
        let id = router.on("keepalive", move |_| {
            if let Some(id) = inner_slot.lock().take() {
                inner_router.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);
        router.dispatch(&Event {
            event_type: "keepalive".into(),
            data: Value::Null,
        });
        assert_eq!(router.subscriber_count("keepalive"), 0);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Change notifications broadcast by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChanged,
    DevicesChanged,
    QueueChanged,
}

#[derive(Default)]
struct Waiters {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, oneshot::Sender<()>)>>,
}

/// Registry of one-shot waiters.
///
/// Each [`Subscription`] is woken by at most one `emit`; callers wanting
/// every change re-subscribe after each wakeup.
#[derive(Clone, Default)]
pub struct EventHub {
    waiters: Arc<Mutex<Waiters>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next `kind` event.
    ///
    /// The registration is taken immediately, so an event emitted between
    /// this call and awaiting [`Subscription::wait`] is not lost.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (sender, receiver) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.by_kind.entry(kind).or_default().push((id, sender));

        Subscription {
            id,
            kind,
            receiver,
            hub: Arc::downgrade(&self.waiters),
        }
    }

    /// Wake every current waiter of `kind`. Returns how many were woken.
    pub fn emit(&self, kind: EventKind) -> usize {
        let drained = self.waiters.lock().by_kind.remove(&kind).unwrap_or_default();
        let mut woken = 0;
        for (_, sender) in drained {
            if sender.send(()).is_ok() {
                woken += 1;
            }
        }
        log::debug!("Emitted {:?} to {} waiter(s)", kind, woken);
        woken
    }

    pub fn waiter_count(&self, kind: EventKind) -> usize {
        self.waiters.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }
}

/// Pending one-shot wait. Dropping it unregisters the waiter.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    receiver: oneshot::Receiver<()>,
    hub: Weak<Mutex<Waiters>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Resolve on the next event. Returns `false` if the hub went away first.
    pub async fn wait(mut self) -> bool {
        (&mut self.receiver).await.is_ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut waiters = hub.lock();
        if let Some(list) = waiters.by_kind.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                waiters.by_kind.remove(&self.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn emit_wakes_only_matching_kind() {
        let hub = EventHub::new();
        let status = hub.subscribe(EventKind::StatusChanged);
        let queue = hub.subscribe(EventKind::QueueChanged);

        assert_eq!(hub.emit(EventKind::StatusChanged), 1);
        assert!(status.wait().await);

        assert_eq!(hub.waiter_count(EventKind::QueueChanged), 1);
        drop(queue);
        assert_eq!(hub.waiter_count(EventKind::QueueChanged), 0);
    }

    #[tokio::test]
    async fn event_before_wait_is_not_lost() {
        let hub = EventHub::new();
        let sub = hub.subscribe(EventKind::DevicesChanged);
        hub.emit(EventKind::DevicesChanged);
        assert!(tokio::time::timeout(Duration::from_secs(1), sub.wait()).await.unwrap());
    }

    #[tokio::test]
    async fn waiters_are_one_shot() {
        let hub = EventHub::new();
        let first = hub.subscribe(EventKind::StatusChanged);
        let second = hub.subscribe(EventKind::StatusChanged);
        assert_eq!(hub.emit(EventKind::StatusChanged), 2);
        assert_eq!(hub.emit(EventKind::StatusChanged), 0);
        assert!(first.wait().await);
        assert!(second.wait().await);
    }

    #[tokio::test]
    async fn cancelled_wait_unregisters() {
        let hub = EventHub::new();
        let sub = hub.subscribe(EventKind::StatusChanged);
        let result = tokio::time::timeout(Duration::from_millis(20), sub.wait()).await;
        assert!(result.is_err());
        assert_eq!(hub.waiter_count(EventKind::StatusChanged), 0);
    }

    #[tokio::test]
    async fn dropped_hub_releases_waiters() {
        let hub = EventHub::new();
        let sub = hub.subscribe(EventKind::QueueChanged);
        drop(hub);
        assert!(!sub.wait().await);
    }
}

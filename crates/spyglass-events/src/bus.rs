use crate::PacketEvent;
use spyglass_protocol_core::PacketKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Event priority levels (executed in order: Lowest first, Monitor last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Highest = 4,
    /// Runs last and sees the final cancellation verdict, but cannot
    /// change it.
    Monitor = 5,
}

/// An observer of intercepted packets.
///
/// Handlers run synchronously on the connection's own task, inside the
/// packet path. An `Err` is logged and dispatch continues; the failing
/// handler's cancellation (if any) does not count.
pub trait PacketListener: Send + Sync {
    fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct ListenerEntry {
    owner: String,
    priority: Priority,
    listener_id: u64,
    listener: Arc<dyn PacketListener>,
}

/// The event bridge: per-kind listener lists, kept priority-sorted, with
/// synchronous cancellable dispatch.
pub struct EventBus {
    listeners: RwLock<HashMap<PacketKind, Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for the given packet kinds. Returns the
    /// listener id; one id covers every kind in the subscription.
    pub fn register(
        &self,
        kinds: &[PacketKind],
        owner: &str,
        priority: Priority,
        listener: Arc<dyn PacketListener>,
    ) -> u64 {
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let entry = ListenerEntry {
            owner: owner.to_string(),
            priority,
            listener_id,
            listener,
        };

        let mut map = self.listeners.write().unwrap();
        for kind in kinds {
            let list = map.entry(*kind).or_default();
            list.push(entry.clone());
            list.sort_by_key(|e| e.priority);
        }
        listener_id
    }

    /// Remove a listener from every kind it subscribed to. Unknown ids are
    /// a no-op.
    pub fn unregister(&self, listener_id: u64) {
        let mut map = self.listeners.write().unwrap();
        for list in map.values_mut() {
            list.retain(|e| e.listener_id != listener_id);
        }
    }

    /// Remove every listener registered under the given owner tag. Used
    /// when a consumer shuts down.
    pub fn unregister_owner(&self, owner: &str) {
        let mut map = self.listeners.write().unwrap();
        for list in map.values_mut() {
            list.retain(|e| e.owner != owner);
        }
    }

    pub fn listener_count(&self) -> usize {
        let map = self.listeners.read().unwrap();
        let mut seen = std::collections::HashSet::new();
        map.values()
            .flatten()
            .filter(|e| seen.insert(e.listener_id))
            .count()
    }

    /// Dispatch an event to every listener registered for its kind, in
    /// priority order, synchronously on the calling thread.
    ///
    /// Listener errors are logged and do not stop dispatch; a failing
    /// listener's cancellation is reverted. Monitor listeners observe the
    /// final verdict but any flag change they make is reverted too.
    pub fn dispatch(&self, event: &mut PacketEvent<'_>) {
        let entries: Vec<ListenerEntry> = {
            let map = self.listeners.read().unwrap();
            match map.get(&event.kind()) {
                Some(list) => list.clone(),
                None => return,
            }
        };
        // Lock dropped: handlers may register/unregister freely.

        for entry in &entries {
            let verdict_before = event.is_cancelled();
            match entry.listener.handle(event) {
                Ok(()) => {
                    if entry.priority == Priority::Monitor {
                        event.set_cancelled(verdict_before);
                    }
                }
                Err(e) => {
                    error!(
                        "Listener '{}' failed on {:?} {:?}: {:#}",
                        entry.owner,
                        event.direction(),
                        event.kind(),
                        e
                    );
                    event.set_cancelled(verdict_before);
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;
    use spyglass_protocol_core::Packet;
    use spyglass_types::SessionInfo;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn session() -> SessionInfo {
        SessionInfo::new(Uuid::from_u128(7), "steve")
    }

    fn chat() -> Packet {
        Packet::ChatMessage {
            message: "hello".into(),
        }
    }

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        cancel: bool,
    }

    impl PacketListener for Recorder {
        fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.tag);
            if self.cancel {
                event.cancel();
            }
            Ok(())
        }
    }

    struct Failing;

    impl PacketListener for Failing {
        fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
            event.cancel();
            anyhow::bail!("listener broke")
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Lowest < Priority::Low);
        assert!(Priority::Highest < Priority::Monitor);

        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (tag, priority) in [
            ("high", Priority::High),
            ("lowest", Priority::Lowest),
            ("normal", Priority::Normal),
        ] {
            bus.register(
                &[PacketKind::ChatMessage],
                tag,
                priority,
                Arc::new(Recorder {
                    tag,
                    log: log.clone(),
                    cancel: false,
                }),
            );
        }

        let s = session();
        let p = chat();
        let mut event = PacketEvent::new(&s, Direction::Inbound, &p);
        bus.dispatch(&mut event);
        assert_eq!(*log.lock().unwrap(), vec!["lowest", "normal", "high"]);
    }

    #[test]
    fn test_cancellation_sticks() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            &[PacketKind::ChatMessage],
            "canceller",
            Priority::Normal,
            Arc::new(Recorder {
                tag: "canceller",
                log: log.clone(),
                cancel: true,
            }),
        );

        let s = session();
        let p = chat();
        let mut event = PacketEvent::new(&s, Direction::Inbound, &p);
        bus.dispatch(&mut event);
        assert!(event.is_cancelled());
    }

    #[test]
    fn test_monitor_cannot_cancel() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            &[PacketKind::ChatMessage],
            "monitor",
            Priority::Monitor,
            Arc::new(Recorder {
                tag: "monitor",
                log: log.clone(),
                cancel: true,
            }),
        );

        let s = session();
        let p = chat();
        let mut event = PacketEvent::new(&s, Direction::Inbound, &p);
        bus.dispatch(&mut event);
        assert!(!event.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["monitor"]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_dispatch_or_cancel() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            &[PacketKind::ChatMessage],
            "broken",
            Priority::Low,
            Arc::new(Failing),
        );
        bus.register(
            &[PacketKind::ChatMessage],
            "after",
            Priority::Normal,
            Arc::new(Recorder {
                tag: "after",
                log: log.clone(),
                cancel: false,
            }),
        );

        let s = session();
        let p = chat();
        let mut event = PacketEvent::new(&s, Direction::Inbound, &p);
        bus.dispatch(&mut event);
        // The failing listener's cancel was reverted and the later
        // listener still ran.
        assert!(!event.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_unregister_owner() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            &[PacketKind::ChatMessage, PacketKind::PlayerPosition],
            "holograms",
            Priority::Normal,
            Arc::new(Recorder {
                tag: "holo",
                log: log.clone(),
                cancel: false,
            }),
        );
        assert_eq!(bus.listener_count(), 1);

        bus.unregister_owner("holograms");
        assert_eq!(bus.listener_count(), 0);

        let s = session();
        let p = chat();
        let mut event = PacketEvent::new(&s, Direction::Inbound, &p);
        bus.dispatch(&mut event);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id1 = bus.register(
            &[PacketKind::ChatMessage],
            "a",
            Priority::Normal,
            Arc::new(Recorder {
                tag: "a",
                log: log.clone(),
                cancel: false,
            }),
        );
        let id2 = bus.register(
            &[PacketKind::ChatMessage],
            "b",
            Priority::Normal,
            Arc::new(Recorder {
                tag: "b",
                log: log.clone(),
                cancel: false,
            }),
        );
        assert_ne!(id1, id2);
    }
}

use crate::{Flow, PacketInterceptor, PacketPipeline};
use spyglass_events::{Direction, EventBus};
use spyglass_protocol_core::Packet;
use spyglass_types::SessionInfo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

struct ConnectionEntry {
    session: SessionInfo,
    interceptor: Arc<PacketInterceptor>,
    pipeline: Arc<Mutex<PacketPipeline>>,
    transport: mpsc::UnboundedSender<Packet>,
}

/// Owner of every live connection's interception state.
///
/// The registry is the only place connections are created or destroyed:
/// `register` on session join, `unregister` on quit, `clear` on shutdown.
/// The map sits behind one `RwLock`; each connection's pipeline has its
/// own `Mutex` so per-packet processing on one connection never contends
/// with another's.
pub struct ConnectionRegistry {
    bus: Arc<EventBus>,
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            connections: RwLock::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Construct and splice an interceptor for the session, exactly once
    /// per session id. Registering an id that is already present returns
    /// the existing interceptor and installs nothing.
    pub fn register(
        &self,
        session: SessionInfo,
        transport: mpsc::UnboundedSender<Packet>,
    ) -> Arc<PacketInterceptor> {
        let mut map = self.connections.write().unwrap();
        if let Some(entry) = map.get(&session.id) {
            debug!("Session {} already registered", session);
            return entry.interceptor.clone();
        }

        let interceptor = PacketInterceptor::new(session.clone(), self.bus.clone(), transport.clone());
        let pipeline = Arc::new(Mutex::new(PacketPipeline::new()));
        PacketInterceptor::splice(&interceptor, &mut pipeline.lock().unwrap());

        info!("Registered interceptor for {}", session);
        map.insert(
            session.id,
            ConnectionEntry {
                session,
                interceptor: interceptor.clone(),
                pipeline,
                transport,
            },
        );
        interceptor
    }

    /// Unsplice and forget the session. Unknown ids and duplicate quit
    /// notifications are tolerated no-ops.
    pub fn unregister(&self, id: &Uuid) {
        let entry = {
            let mut map = self.connections.write().unwrap();
            map.remove(id)
        };
        match entry {
            Some(entry) => {
                entry
                    .interceptor
                    .unsplice(&mut entry.pipeline.lock().unwrap());
                info!("Unregistered interceptor for {}", entry.session);
            }
            None => debug!("Unregister for unknown session {}", id),
        }
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Arc<PacketInterceptor>> {
        let map = self.connections.read().unwrap();
        map.get(id).map(|e| e.interceptor.clone())
    }

    /// Run an inbound unit through the session's pipeline. Units for
    /// unknown sessions pass through untouched.
    ///
    /// No lock is held while stages run, so an observer may freely call
    /// back into the registry (broadcast, lookup, even for the same
    /// connection).
    pub fn process_inbound(&self, id: &Uuid, packet: &Packet) -> Flow {
        let stages = match self.stage_snapshot(id) {
            Some(stages) => stages,
            None => return Flow::Forward,
        };
        PacketPipeline::run(&stages, Direction::Inbound, packet)
    }

    /// The outbound interception path: run the unit through the pipeline
    /// and forward it to the transport iff no observer dropped it.
    /// Returns whether the packet was delivered to the transport.
    pub fn dispatch_outbound(&self, id: &Uuid, packet: Packet) -> bool {
        let (stages, transport) = {
            let map = self.connections.read().unwrap();
            match map.get(id) {
                Some(entry) => (
                    entry.pipeline.lock().unwrap().snapshot(),
                    entry.transport.clone(),
                ),
                None => return false,
            }
        };

        if PacketPipeline::run(&stages, Direction::Outbound, &packet) == Flow::Drop {
            return false;
        }
        transport.send(packet).is_ok()
    }

    fn stage_snapshot(&self, id: &Uuid) -> Option<Vec<Arc<dyn crate::PacketStage>>> {
        let map = self.connections.read().unwrap();
        map.get(id)
            .map(|entry| entry.pipeline.lock().unwrap().snapshot())
    }

    /// Send a packet to every registered session through the outbound
    /// interception path.
    pub fn broadcast(&self, packet: Packet) {
        for id in self.session_ids() {
            self.dispatch_outbound(&id, packet.clone());
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let map = self.connections.read().unwrap();
        map.values().map(|e| e.session.clone()).collect()
    }

    fn session_ids(&self) -> Vec<Uuid> {
        let map = self.connections.read().unwrap();
        map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister everything (process shutdown).
    pub fn clear(&self) {
        for id in self.session_ids() {
            self.unregister(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_events::{PacketEvent, PacketListener, Priority};
    use spyglass_protocol_core::PacketKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(n: u128, name: &str) -> SessionInfo {
        SessionInfo::new(Uuid::from_u128(n), name)
    }

    fn chat(msg: &str) -> Packet {
        Packet::ChatMessage {
            message: msg.into(),
        }
    }

    struct Spy {
        seen: AtomicUsize,
        cancel_for: Option<Uuid>,
    }

    impl PacketListener for Spy {
        fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.cancel_for == Some(event.session().id) {
                event.cancel();
            }
            Ok(())
        }
    }

    fn setup(cancel_for: Option<Uuid>) -> (Arc<ConnectionRegistry>, Arc<Spy>) {
        let bus = Arc::new(EventBus::new());
        let spy = Arc::new(Spy {
            seen: AtomicUsize::new(0),
            cancel_for,
        });
        bus.register(
            &[PacketKind::ChatMessage],
            "spy",
            Priority::Normal,
            spy.clone(),
        );
        (ConnectionRegistry::new(bus), spy)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (registry, _spy) = setup(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(1, "steve");

        let first = registry.register(s.clone(), tx.clone());
        let second = registry.register(s.clone(), tx);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let (registry, _spy) = setup(None);
        registry.unregister(&Uuid::from_u128(42));

        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(1, "steve");
        registry.register(s.clone(), tx);
        registry.unregister(&s.id);
        // Duplicate quit notification.
        registry.unregister(&s.id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_dispatch_after_unregister() {
        let (registry, spy) = setup(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(1, "steve");
        registry.register(s.clone(), tx);

        registry.process_inbound(&s.id, &chat("one"));
        assert_eq!(spy.seen.load(Ordering::Relaxed), 1);

        registry.unregister(&s.id);
        assert_eq!(
            registry.process_inbound(&s.id, &chat("two")),
            Flow::Forward
        );
        assert_eq!(spy.seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancellation_is_per_connection() {
        let a = session(1, "alice");
        let b = session(2, "bob");
        let (registry, _spy) = setup(Some(a.id));

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register(a.clone(), tx_a);
        registry.register(b.clone(), tx_b);

        // The observer cancels only for session A.
        assert_eq!(registry.process_inbound(&a.id, &chat("x")), Flow::Drop);
        assert_eq!(registry.process_inbound(&b.id, &chat("x")), Flow::Forward);

        // Same on the outbound path: A's unit is suppressed, B's delivered.
        assert!(!registry.dispatch_outbound(&a.id, chat("y")));
        assert!(registry.dispatch_outbound(&b.id, chat("y")));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_reaches_all_sessions() {
        let (registry, _spy) = setup(None);
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register(session(1, "alice"), tx_a);
        registry.register(session(2, "bob"), tx_b);

        registry.broadcast(chat("hi all"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_clear_unregisters_everything() {
        let (registry, spy) = setup(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(1, "steve");
        registry.register(s.clone(), tx);

        registry.clear();
        assert!(registry.is_empty());
        registry.process_inbound(&s.id, &chat("after"));
        assert_eq!(spy.seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_lookup() {
        let (registry, _spy) = setup(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(1, "steve");
        assert!(registry.lookup(&s.id).is_none());
        registry.register(s.clone(), tx);
        assert!(registry.lookup(&s.id).is_some());
    }
}

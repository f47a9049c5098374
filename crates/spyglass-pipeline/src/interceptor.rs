use crate::{Flow, PacketPipeline, PacketStage};
use spyglass_events::{Direction, EventBus, PacketEvent};
use spyglass_protocol_core::Packet;
use spyglass_types::SessionInfo;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Name the interception handler is spliced under. One per pipeline.
pub const INTERCEPT_STAGE: &str = "spyglass-intercept";

const DETACHED: u8 = 0;
const SPLICED: u8 = 1;
const RETIRED: u8 = 2;

/// The per-connection interception handler.
///
/// Lifecycle is detached → spliced → retired: after an interceptor has
/// been unspliced it never re-arms; the registry builds a fresh instance
/// for a reconnecting session. While spliced, every unit flowing through
/// the pipeline becomes a [`PacketEvent`], is dispatched synchronously,
/// and is dropped iff an observer cancelled it.
pub struct PacketInterceptor {
    session: SessionInfo,
    bus: Arc<EventBus>,
    transport: mpsc::UnboundedSender<Packet>,
    state: AtomicU8,
}

impl PacketInterceptor {
    pub fn new(
        session: SessionInfo,
        bus: Arc<EventBus>,
        transport: mpsc::UnboundedSender<Packet>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            bus,
            transport,
            state: AtomicU8::new(DETACHED),
        })
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn is_spliced(&self) -> bool {
        self.state.load(Ordering::Acquire) == SPLICED
    }

    /// Install the interceptor into the pipeline under its fixed name.
    /// Idempotent: a spliced or retired interceptor is left untouched and
    /// no second handler ever appears. Returns whether a splice happened.
    ///
    /// Associated-function form (like `Arc::clone`) because the pipeline
    /// stores the interceptor itself as the stage.
    pub fn splice(this: &Arc<Self>, pipeline: &mut PacketPipeline) -> bool {
        match this
            .state
            .compare_exchange(DETACHED, SPLICED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RETIRED) => {
                debug!("Interceptor for {} is retired, not re-splicing", this.session);
                return false;
            }
            Err(_) => return false,
        }

        if let Err(e) = pipeline.splice(INTERCEPT_STAGE, this.clone()) {
            // A stage under our name is already present; this interceptor
            // is not the one installed, so it stays detached.
            debug!("Splice for {} skipped: {}", this.session, e);
            this.state.store(DETACHED, Ordering::Release);
            return false;
        }
        trace!("Spliced interceptor for {}", this.session);
        true
    }

    /// Remove this interceptor from the pipeline. Idempotent, safe if
    /// never spliced; the interceptor is retired either way and no event
    /// is dispatched for this connection afterwards.
    pub fn unsplice(&self, pipeline: &mut PacketPipeline) -> bool {
        self.state.store(RETIRED, Ordering::Release);
        let removed = pipeline.unsplice(INTERCEPT_STAGE);
        if removed {
            trace!("Unspliced interceptor for {}", self.session);
        }
        removed
    }

    /// Write application-originated packets straight to the transport,
    /// bypassing interception in both directions. Never recurses into the
    /// pipeline. A closed transport (client already gone) is tolerated.
    pub fn send<I>(&self, packets: I)
    where
        I: IntoIterator<Item = Packet>,
    {
        for packet in packets {
            if self.transport.send(packet).is_err() {
                debug!("Transport for {} is closed, dropping send", self.session);
                return;
            }
        }
    }

    pub fn send_one(&self, packet: Packet) {
        self.send(std::iter::once(packet));
    }
}

impl PacketStage for PacketInterceptor {
    fn handle(&self, direction: Direction, packet: &Packet) -> Flow {
        // A straggling unit after retirement passes through unobserved.
        if !self.is_spliced() {
            return Flow::Forward;
        }

        let mut event = PacketEvent::new(&self.session, direction, packet);
        self.bus.dispatch(&mut event);
        if event.is_cancelled() {
            trace!(
                "Dropped {:?} {:?} for {}",
                direction,
                packet.kind(),
                self.session
            );
            Flow::Drop
        } else {
            Flow::Forward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_events::{PacketListener, Priority};
    use spyglass_protocol_core::PacketKind;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn session() -> SessionInfo {
        SessionInfo::new(Uuid::from_u128(1), "alex")
    }

    struct CountAndMaybeCancel {
        seen: AtomicUsize,
        cancel: bool,
    }

    impl PacketListener for CountAndMaybeCancel {
        fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.cancel {
                event.cancel();
            }
            Ok(())
        }
    }

    fn setup(
        cancel: bool,
    ) -> (
        Arc<PacketInterceptor>,
        PacketPipeline,
        mpsc::UnboundedReceiver<Packet>,
        Arc<CountAndMaybeCancel>,
    ) {
        let bus = Arc::new(EventBus::new());
        let listener = Arc::new(CountAndMaybeCancel {
            seen: AtomicUsize::new(0),
            cancel,
        });
        bus.register(
            &[PacketKind::ChatMessage],
            "test",
            Priority::Normal,
            listener.clone(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let interceptor = PacketInterceptor::new(session(), bus, tx);
        let mut pipeline = PacketPipeline::new();
        assert!(PacketInterceptor::splice(&interceptor, &mut pipeline));
        (interceptor, pipeline, rx, listener)
    }

    fn chat() -> Packet {
        Packet::ChatMessage {
            message: "hello".into(),
        }
    }

    #[test]
    fn test_uncancelled_unit_is_forwarded() {
        let (_interceptor, pipeline, _rx, listener) = setup(false);
        assert_eq!(pipeline.process(Direction::Inbound, &chat()), Flow::Forward);
        assert_eq!(listener.seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancelled_unit_is_dropped() {
        let (_interceptor, pipeline, _rx, listener) = setup(true);
        assert_eq!(pipeline.process(Direction::Inbound, &chat()), Flow::Drop);
        assert_eq!(listener.seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_second_splice_installs_nothing() {
        let (interceptor, mut pipeline, _rx, _listener) = setup(false);
        assert!(!PacketInterceptor::splice(&interceptor, &mut pipeline));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_unsplice_is_terminal_and_idempotent() {
        let (interceptor, mut pipeline, _rx, listener) = setup(false);
        assert!(interceptor.unsplice(&mut pipeline));
        assert!(!interceptor.unsplice(&mut pipeline));

        // Retired interceptors never re-splice.
        assert!(!PacketInterceptor::splice(&interceptor, &mut pipeline));
        assert!(pipeline.is_empty());

        // And nothing is dispatched for the connection anymore.
        assert_eq!(pipeline.process(Direction::Inbound, &chat()), Flow::Forward);
        assert_eq!(listener.seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_send_bypasses_interception() {
        let (interceptor, _pipeline, mut rx, listener) = setup(true);
        interceptor.send_one(chat());

        // The packet reached the transport untouched even though a
        // cancelling observer is registered for its kind.
        assert!(matches!(
            rx.try_recv(),
            Ok(Packet::ChatMessage { .. })
        ));
        assert_eq!(listener.seen.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_send_tolerates_closed_transport() {
        let (interceptor, _pipeline, rx, _listener) = setup(false);
        drop(rx);
        interceptor.send([chat(), chat()]);
    }
}

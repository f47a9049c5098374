use spyglass_events::{EventBus, PacketEvent, PacketListener, Priority};
use spyglass_pipeline::ConnectionRegistry;
use spyglass_protocol_core::{Packet, PacketKind};
use spyglass_types::{BlockPos, SessionInfo, Vec3d};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Listener owner tag, for bus teardown.
pub const SIGN_OWNER: &str = "spyglass-sign";

/// Block id the phantom sign is rendered as.
const SIGN_BLOCK: i32 = 63;
const AIR_BLOCK: i32 = 0;

/// How far below the player's feet the phantom sign is placed.
const SIGN_DEPTH: i32 = 3;

pub type SignSubmit = Box<dyn FnOnce(&SessionInfo, [String; 4]) + Send>;

struct PendingEdit {
    position: BlockPos,
    callback: SignSubmit,
}

/// Sign-editor dialogs: place a phantom sign near the player, open the
/// client's editor on it, capture the submitted lines, put the world back
/// and cancel the packet so default handling never edits a real sign.
///
/// One pending edit per player; a second `open` replaces (and drops) the
/// first.
pub struct SignEditor {
    registry: Arc<ConnectionRegistry>,
    pending: Mutex<HashMap<Uuid, PendingEdit>>,
    last_position: Mutex<HashMap<Uuid, Vec3d>>,
}

impl SignEditor {
    /// Build the editor and subscribe it on the bus: sign capture plus
    /// the feet-position tracking it needs for phantom placement.
    pub fn new(registry: Arc<ConnectionRegistry>, bus: &EventBus) -> Arc<Self> {
        let editor = Arc::new(Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            last_position: Mutex::new(HashMap::new()),
        });
        bus.register(
            &[PacketKind::UpdateSign, PacketKind::PlayerPosition],
            SIGN_OWNER,
            Priority::Normal,
            editor.clone(),
        );
        editor
    }

    /// Open the editor for a player. Returns false if the player has no
    /// registered connection.
    pub fn open(&self, session: &SessionInfo, callback: SignSubmit) -> bool {
        let interceptor = match self.registry.lookup(&session.id) {
            Some(interceptor) => interceptor,
            None => return false,
        };

        let position = self.sign_position(&session.id);
        interceptor.send([
            Packet::BlockUpdate {
                position,
                block_id: SIGN_BLOCK,
            },
            Packet::OpenSignEditor { position },
        ]);

        let replaced = self
            .pending
            .lock()
            .unwrap()
            .insert(session.id, PendingEdit { position, callback });
        if replaced.is_some() {
            debug!("Replaced pending sign edit for {}", session);
        }
        true
    }

    /// Drop session state for a departed player.
    pub fn purge(&self, session_id: &Uuid) {
        self.pending.lock().unwrap().remove(session_id);
        self.last_position.lock().unwrap().remove(session_id);
    }

    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        self.last_position.lock().unwrap().clear();
    }

    /// Pick a spot the client will accept: a few blocks under the feet,
    /// clamped above bedrock. Falls back to the origin column when the
    /// player has not moved yet.
    fn sign_position(&self, session_id: &Uuid) -> BlockPos {
        let feet = self
            .last_position
            .lock()
            .unwrap()
            .get(session_id)
            .copied()
            .unwrap_or(Vec3d::new(0.0, 64.0, 0.0))
            .block_pos();
        BlockPos::new(feet.x, (feet.y - SIGN_DEPTH).max(1), feet.z)
    }

    /// Complete a pending edit, if the player has one.
    fn complete(&self, session: &SessionInfo, position: BlockPos, lines: &[String; 4]) -> bool {
        let edit = match self.pending.lock().unwrap().remove(&session.id) {
            Some(edit) => edit,
            None => return false,
        };
        if edit.position != position {
            debug!(
                "Sign edit for {} came back at {:?}, expected {:?}",
                session, position, edit.position
            );
        }

        // Put the phantom block back before handing the lines over.
        if let Some(interceptor) = self.registry.lookup(&session.id) {
            interceptor.send_one(Packet::BlockUpdate {
                position: edit.position,
                block_id: AIR_BLOCK,
            });
        }
        (edit.callback)(session, lines.clone());
        true
    }
}

impl PacketListener for SignEditor {
    fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
        match event.packet() {
            Packet::UpdateSign { position, lines } => {
                let session = event.session().clone();
                if self.complete(&session, *position, lines) {
                    event.cancel();
                }
            }
            Packet::PlayerPosition { position, .. } => {
                self.last_position
                    .lock()
                    .unwrap()
                    .insert(event.session().id, *position);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_pipeline::Flow;
    use tokio::sync::mpsc;

    fn setup() -> (
        Arc<ConnectionRegistry>,
        Arc<SignEditor>,
        SessionInfo,
        mpsc::UnboundedReceiver<Packet>,
    ) {
        let bus = Arc::new(EventBus::new());
        let registry = ConnectionRegistry::new(bus.clone());
        let editor = SignEditor::new(registry.clone(), &bus);

        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionInfo::new(Uuid::from_u128(1), "steve");
        registry.register(session.clone(), tx);
        (registry, editor, session, rx)
    }

    #[test]
    fn test_open_places_phantom_sign_below_player() {
        let (registry, editor, session, mut rx) = setup();

        // Walk somewhere first so the tracker has a position.
        let moved = Packet::PlayerPosition {
            position: Vec3d::new(10.3, 70.0, -4.7),
            on_ground: true,
        };
        assert_eq!(registry.process_inbound(&session.id, &moved), Flow::Forward);

        assert!(editor.open(&session, Box::new(|_, _| {})));
        match rx.try_recv().unwrap() {
            Packet::BlockUpdate { position, block_id } => {
                assert_eq!(block_id, SIGN_BLOCK);
                assert_eq!(position, BlockPos::new(10, 67, -5));
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
        match rx.try_recv().unwrap() {
            Packet::OpenSignEditor { position } => {
                assert_eq!(position, BlockPos::new(10, 67, -5));
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }

    #[test]
    fn test_submit_captures_lines_cancels_and_reverts() {
        let (registry, editor, session, mut rx) = setup();
        let captured: Arc<Mutex<Option<[String; 4]>>> = Arc::new(Mutex::new(None));
        let sink = captured.clone();
        assert!(editor.open(
            &session,
            Box::new(move |_, lines| {
                *sink.lock().unwrap() = Some(lines);
            })
        ));
        let position = match rx.try_recv().unwrap() {
            Packet::BlockUpdate { position, .. } => position,
            other => panic!("unexpected packet {:?}", other.kind()),
        };
        let _ = rx.try_recv(); // OpenSignEditor

        let submit = Packet::UpdateSign {
            position,
            lines: ["a".into(), "b".into(), "".into(), "".into()],
        };
        assert_eq!(registry.process_inbound(&session.id, &submit), Flow::Drop);

        // The phantom block is reverted to air.
        assert!(matches!(
            rx.try_recv().unwrap(),
            Packet::BlockUpdate {
                block_id: AIR_BLOCK,
                ..
            }
        ));
        assert_eq!(captured.lock().unwrap().as_ref().unwrap()[0], "a");

        // A second submit has nothing pending and passes through.
        let again = Packet::UpdateSign {
            position,
            lines: Default::default(),
        };
        assert_eq!(registry.process_inbound(&session.id, &again), Flow::Forward);
    }

    #[test]
    fn test_open_for_unregistered_player_fails() {
        let (_registry, editor, _session, _rx) = setup();
        let ghost = SessionInfo::new(Uuid::from_u128(9), "ghost");
        assert!(!editor.open(&ghost, Box::new(|_, _| {})));
    }
}

use crate::DisplayError;
use spyglass_events::{EventBus, PacketEvent, PacketListener, Priority};
use spyglass_pipeline::ConnectionRegistry;
use spyglass_protocol_core::{InteractAction, Packet, PacketKind, PlayerListEntry};
use spyglass_types::{GameProfile, SessionInfo, Vec3d};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Reserved negative entity-id range for NPCs (below the hologram range).
const EID_BASE: i32 = -2_000_000;

/// Listener owner tag, for bus teardown.
pub const NPC_OWNER: &str = "spyglass-npc";

/// Which mouse button hit the NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Left,
    Right,
}

pub type ClickHandler = Arc<dyn Fn(&SessionInfo, ClickKind) + Send + Sync>;

struct Npc {
    entity_id: i32,
    profile: GameProfile,
    location: Vec3d,
    yaw: f32,
    viewers: HashSet<Uuid>,
    on_click: Option<ClickHandler>,
}

/// Fake player entities. Clicks arrive as serverbound entity-interaction
/// packets; the registry maps the clicked entity id back to an NPC, runs
/// its handler and cancels the packet so default handling never sees
/// interactions with entities that do not exist server-side.
pub struct NpcRegistry {
    registry: Arc<ConnectionRegistry>,
    npcs: Mutex<HashMap<String, Npc>>,
    next_entity_id: AtomicI32,
}

impl NpcRegistry {
    /// Build the registry and subscribe its click relay on the bus.
    pub fn new(registry: Arc<ConnectionRegistry>, bus: &EventBus) -> Arc<Self> {
        let npcs = Arc::new(Self {
            registry,
            npcs: Mutex::new(HashMap::new()),
            next_entity_id: AtomicI32::new(EID_BASE),
        });
        bus.register(
            &[PacketKind::InteractEntity],
            NPC_OWNER,
            Priority::High,
            npcs.clone(),
        );
        npcs
    }

    pub fn create(&self, id: &str, name: &str, location: Vec3d, yaw: f32) -> Result<(), DisplayError> {
        let mut npcs = self.npcs.lock().unwrap();
        if npcs.contains_key(id) {
            return Err(DisplayError::DuplicateId(id.to_string()));
        }
        npcs.insert(
            id.to_string(),
            Npc {
                entity_id: self.next_entity_id.fetch_sub(1, Ordering::Relaxed),
                profile: GameProfile::offline(name, Uuid::new_v4()),
                location,
                yaw,
                viewers: HashSet::new(),
                on_click: None,
            },
        );
        Ok(())
    }

    /// Install the click callback for an NPC.
    pub fn on_click(&self, id: &str, handler: ClickHandler) -> Result<(), DisplayError> {
        let mut npcs = self.npcs.lock().unwrap();
        let npc = npcs
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        npc.on_click = Some(handler);
        Ok(())
    }

    /// Spawn the NPC for one player: list entry first, then the body.
    pub fn show_to(&self, id: &str, viewer: &Uuid) -> Result<(), DisplayError> {
        let mut npcs = self.npcs.lock().unwrap();
        let npc = npcs
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        if !npc.viewers.insert(*viewer) {
            return Ok(());
        }
        let interceptor = match self.registry.lookup(viewer) {
            Some(interceptor) => interceptor,
            None => {
                debug!("NPC viewer {} is not registered", viewer);
                npc.viewers.remove(viewer);
                return Ok(());
            }
        };

        let yaw = (npc.yaw / 360.0 * 256.0) as u8;
        interceptor.send([
            Packet::PlayerListAdd {
                entries: vec![PlayerListEntry::from_profile(&npc.profile)],
            },
            Packet::SpawnPlayer {
                entity_id: npc.entity_id,
                uuid: npc.profile.uuid,
                position: npc.location,
                yaw,
                pitch: 0,
            },
        ]);
        Ok(())
    }

    /// Despawn the NPC for one player.
    pub fn hide_from(&self, id: &str, viewer: &Uuid) -> Result<(), DisplayError> {
        let mut npcs = self.npcs.lock().unwrap();
        let npc = npcs
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        if !npc.viewers.remove(viewer) {
            return Ok(());
        }
        if let Some(interceptor) = self.registry.lookup(viewer) {
            interceptor.send([
                Packet::RemoveEntities {
                    entity_ids: vec![npc.entity_id],
                },
                Packet::PlayerListRemove {
                    uuids: vec![npc.profile.uuid],
                },
            ]);
        }
        Ok(())
    }

    /// Despawn everywhere and forget the NPC.
    pub fn remove(&self, id: &str) -> bool {
        let npc = match self.npcs.lock().unwrap().remove(id) {
            Some(npc) => npc,
            None => return false,
        };
        for viewer in &npc.viewers {
            if let Some(interceptor) = self.registry.lookup(viewer) {
                interceptor.send([
                    Packet::RemoveEntities {
                        entity_ids: vec![npc.entity_id],
                    },
                    Packet::PlayerListRemove {
                        uuids: vec![npc.profile.uuid],
                    },
                ]);
            }
        }
        true
    }

    /// Forget a departed viewer everywhere.
    pub fn purge_viewer(&self, viewer: &Uuid) {
        let mut npcs = self.npcs.lock().unwrap();
        for npc in npcs.values_mut() {
            npc.viewers.remove(viewer);
        }
    }

    /// Despawn everything (shutdown). Listener teardown is the caller's:
    /// `bus.unregister_owner(NPC_OWNER)`.
    pub fn clear(&self) {
        let ids: Vec<String> = self.npcs.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }

    /// Resolve a clicked entity id. `None` means no NPC owns the id; the
    /// inner option is the NPC's handler, if one was installed.
    fn handler_for(&self, entity_id: i32) -> Option<Option<ClickHandler>> {
        let npcs = self.npcs.lock().unwrap();
        npcs.values()
            .find(|npc| npc.entity_id == entity_id)
            .map(|npc| npc.on_click.clone())
    }
}

/// The click relay: map the clicked entity id back to an NPC.
impl PacketListener for NpcRegistry {
    fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
        let (entity_id, action) = match event.packet() {
            Packet::InteractEntity { entity_id, action } => (*entity_id, *action),
            _ => return Ok(()),
        };
        // Handler runs outside the NPC map lock; it may call back into
        // the registry.
        let handler = match self.handler_for(entity_id) {
            Some(handler) => handler,
            None => return Ok(()),
        };

        if let Some(handler) = handler {
            let kind = match action {
                InteractAction::Attack => ClickKind::Left,
                InteractAction::Interact { .. } | InteractAction::InteractAt { .. } => {
                    ClickKind::Right
                }
            };
            handler(event.session(), kind);
        }
        // The entity does not exist server-side; nothing downstream may
        // act on the interaction.
        event.cancel();
        Ok(())
    }
}

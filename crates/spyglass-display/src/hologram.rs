use crate::DisplayError;
use spyglass_pipeline::ConnectionRegistry;
use spyglass_protocol_core::{entity_type, MetadataEntry, Packet};
use spyglass_types::Vec3d;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Entity ids for hologram lines come from a reserved negative range so
/// they can never collide with real server entities.
const EID_BASE: i32 = -1_000_000;

/// Vertical distance between two hologram lines, in blocks.
const LINE_SPACING: f64 = 0.25;

struct HologramLine {
    entity_id: i32,
    entity_uuid: Uuid,
    text: String,
}

struct Hologram {
    location: Vec3d,
    lines: Vec<HologramLine>,
    viewers: HashSet<Uuid>,
}

impl Hologram {
    fn line_position(&self, index: usize) -> Vec3d {
        self.location.offset(0.0, -(index as f64) * LINE_SPACING, 0.0)
    }
}

/// Floating text, rendered per viewer as invisible marker armor stands
/// with visible custom names. Owned by the lifecycle root; all packet
/// traffic goes through each viewer's interceptor.
pub struct HologramManager {
    registry: Arc<ConnectionRegistry>,
    holograms: Mutex<HashMap<String, Hologram>>,
    next_entity_id: AtomicI32,
}

impl HologramManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            holograms: Mutex::new(HashMap::new()),
            next_entity_id: AtomicI32::new(EID_BASE),
        }
    }

    /// Create a hologram. `location` is the position of the first line;
    /// further lines stack downwards.
    pub fn create(
        &self,
        id: &str,
        location: Vec3d,
        lines: Vec<String>,
    ) -> Result<(), DisplayError> {
        let mut holograms = self.holograms.lock().unwrap();
        if holograms.contains_key(id) {
            return Err(DisplayError::DuplicateId(id.to_string()));
        }
        let lines = lines
            .into_iter()
            .map(|text| HologramLine {
                entity_id: self.next_entity_id.fetch_sub(1, Ordering::Relaxed),
                entity_uuid: Uuid::new_v4(),
                text,
            })
            .collect();
        holograms.insert(
            id.to_string(),
            Hologram {
                location,
                lines,
                viewers: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Despawn and forget a hologram.
    pub fn remove(&self, id: &str) -> bool {
        let hologram = match self.holograms.lock().unwrap().remove(id) {
            Some(h) => h,
            None => return false,
        };
        let entity_ids: Vec<i32> = hologram.lines.iter().map(|l| l.entity_id).collect();
        for viewer in &hologram.viewers {
            if let Some(interceptor) = self.registry.lookup(viewer) {
                interceptor.send_one(Packet::RemoveEntities {
                    entity_ids: entity_ids.clone(),
                });
            }
        }
        true
    }

    /// Replace one line's text and push the change to every viewer.
    pub fn set_line(&self, id: &str, index: usize, text: &str) -> Result<(), DisplayError> {
        let mut holograms = self.holograms.lock().unwrap();
        let hologram = holograms
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        let line = match hologram.lines.get_mut(index) {
            Some(line) => line,
            None => return Ok(()),
        };
        line.text = text.to_string();

        let update = Packet::SetEntityMetadata {
            entity_id: line.entity_id,
            metadata: vec![
                MetadataEntry::CustomName(line.text.clone()),
                MetadataEntry::CustomNameVisible(true),
            ],
        };
        for viewer in &hologram.viewers {
            if let Some(interceptor) = self.registry.lookup(viewer) {
                interceptor.send_one(update.clone());
            }
        }
        Ok(())
    }

    /// Move a hologram, teleporting every line for every viewer.
    pub fn move_to(&self, id: &str, location: Vec3d) -> Result<(), DisplayError> {
        let mut holograms = self.holograms.lock().unwrap();
        let hologram = holograms
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        hologram.location = location;

        for viewer in hologram.viewers.clone() {
            if let Some(interceptor) = self.registry.lookup(&viewer) {
                for (index, line) in hologram.lines.iter().enumerate() {
                    interceptor.send_one(Packet::TeleportEntity {
                        entity_id: line.entity_id,
                        position: hologram.line_position(index),
                        yaw: 0,
                        pitch: 0,
                        on_ground: false,
                    });
                }
            }
        }
        Ok(())
    }

    /// Spawn the hologram for one player.
    pub fn show_to(&self, id: &str, viewer: &Uuid) -> Result<(), DisplayError> {
        let mut holograms = self.holograms.lock().unwrap();
        let hologram = holograms
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        if !hologram.viewers.insert(*viewer) {
            return Ok(());
        }
        let interceptor = match self.registry.lookup(viewer) {
            Some(interceptor) => interceptor,
            None => {
                debug!("Hologram viewer {} is not registered", viewer);
                hologram.viewers.remove(viewer);
                return Ok(());
            }
        };

        for (index, line) in hologram.lines.iter().enumerate() {
            interceptor.send([
                Packet::SpawnEntity {
                    entity_id: line.entity_id,
                    entity_uuid: line.entity_uuid,
                    entity_type: entity_type::ARMOR_STAND,
                    position: hologram.line_position(index),
                    yaw: 0,
                    pitch: 0,
                },
                Packet::SetEntityMetadata {
                    entity_id: line.entity_id,
                    metadata: vec![
                        MetadataEntry::Invisible(true),
                        MetadataEntry::CustomName(line.text.clone()),
                        MetadataEntry::CustomNameVisible(true),
                        MetadataEntry::ArmorStandMarker(true),
                        MetadataEntry::NoGravity(true),
                    ],
                },
            ]);
        }
        Ok(())
    }

    /// Despawn the hologram for one player.
    pub fn hide_from(&self, id: &str, viewer: &Uuid) -> Result<(), DisplayError> {
        let mut holograms = self.holograms.lock().unwrap();
        let hologram = holograms
            .get_mut(id)
            .ok_or_else(|| DisplayError::UnknownId(id.to_string()))?;
        if !hologram.viewers.remove(viewer) {
            return Ok(());
        }
        if let Some(interceptor) = self.registry.lookup(viewer) {
            interceptor.send_one(Packet::RemoveEntities {
                entity_ids: hologram.lines.iter().map(|l| l.entity_id).collect(),
            });
        }
        Ok(())
    }

    /// Forget a departed viewer everywhere. No packets: the client is gone.
    pub fn purge_viewer(&self, viewer: &Uuid) {
        let mut holograms = self.holograms.lock().unwrap();
        for hologram in holograms.values_mut() {
            hologram.viewers.remove(viewer);
        }
    }

    /// Despawn everything (shutdown).
    pub fn clear(&self) {
        let ids: Vec<String> = self.holograms.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.holograms.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_events::EventBus;
    use spyglass_types::SessionInfo;
    use tokio::sync::mpsc;

    fn setup() -> (
        Arc<ConnectionRegistry>,
        HologramManager,
        SessionInfo,
        mpsc::UnboundedReceiver<Packet>,
    ) {
        let registry = ConnectionRegistry::new(Arc::new(EventBus::new()));
        let manager = HologramManager::new(registry.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionInfo::new(Uuid::from_u128(1), "steve");
        registry.register(session.clone(), tx);
        (registry, manager, session, rx)
    }

    #[test]
    fn test_show_spawns_marker_stands_per_line() {
        let (_registry, manager, session, mut rx) = setup();
        manager
            .create(
                "welcome",
                Vec3d::new(0.5, 80.0, 0.5),
                vec!["first".into(), "second".into()],
            )
            .unwrap();
        manager.show_to("welcome", &session.id).unwrap();

        let mut spawned = Vec::new();
        let mut last_y = f64::MAX;
        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                Packet::SpawnEntity {
                    entity_id,
                    entity_type: kind,
                    position,
                    ..
                } => {
                    assert_eq!(kind, entity_type::ARMOR_STAND);
                    assert!(entity_id <= EID_BASE);
                    assert!(position.y < last_y, "lines must stack downwards");
                    last_y = position.y;
                    spawned.push(entity_id);
                }
                other => panic!("unexpected packet {:?}", other.kind()),
            }
            match rx.try_recv().unwrap() {
                Packet::SetEntityMetadata { metadata, .. } => {
                    assert!(metadata.contains(&MetadataEntry::Invisible(true)));
                    assert!(metadata.contains(&MetadataEntry::ArmorStandMarker(true)));
                }
                other => panic!("unexpected packet {:?}", other.kind()),
            }
        }
        assert_ne!(spawned[0], spawned[1]);
    }

    #[test]
    fn test_duplicate_id_refused() {
        let (_registry, manager, _session, _rx) = setup();
        manager
            .create("motd", Vec3d::new(0.0, 64.0, 0.0), vec![])
            .unwrap();
        assert!(matches!(
            manager.create("motd", Vec3d::new(0.0, 64.0, 0.0), vec![]),
            Err(DisplayError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_remove_despawns_for_viewers() {
        let (_registry, manager, session, mut rx) = setup();
        manager
            .create("motd", Vec3d::new(0.0, 64.0, 0.0), vec!["hi".into()])
            .unwrap();
        manager.show_to("motd", &session.id).unwrap();
        while rx.try_recv().is_ok() {}

        assert!(manager.remove("motd"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Packet::RemoveEntities { ref entity_ids } if entity_ids.len() == 1
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_set_line_updates_viewers() {
        let (_registry, manager, session, mut rx) = setup();
        manager
            .create("motd", Vec3d::new(0.0, 64.0, 0.0), vec!["old".into()])
            .unwrap();
        manager.show_to("motd", &session.id).unwrap();
        while rx.try_recv().is_ok() {}

        manager.set_line("motd", 0, "new").unwrap();
        match rx.try_recv().unwrap() {
            Packet::SetEntityMetadata { metadata, .. } => {
                assert!(metadata.contains(&MetadataEntry::CustomName("new".into())));
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }

    #[test]
    fn test_move_teleports_lines_for_viewers() {
        let (_registry, manager, session, mut rx) = setup();
        manager
            .create("motd", Vec3d::new(0.0, 64.0, 0.0), vec!["a".into(), "b".into()])
            .unwrap();
        manager.show_to("motd", &session.id).unwrap();
        while rx.try_recv().is_ok() {}

        manager.move_to("motd", Vec3d::new(5.0, 70.0, 5.0)).unwrap();
        match rx.try_recv().unwrap() {
            Packet::TeleportEntity { position, .. } => assert_eq!(position.y, 70.0),
            other => panic!("unexpected packet {:?}", other.kind()),
        }
        match rx.try_recv().unwrap() {
            Packet::TeleportEntity { position, .. } => {
                assert_eq!(position.y, 70.0 - LINE_SPACING);
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }

    #[test]
    fn test_hide_from_unknown_viewer_is_noop() {
        let (_registry, manager, _session, _rx) = setup();
        manager
            .create("motd", Vec3d::new(0.0, 64.0, 0.0), vec!["hi".into()])
            .unwrap();
        manager
            .hide_from("motd", &Uuid::from_u128(99))
            .unwrap();
    }
}

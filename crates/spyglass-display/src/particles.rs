use spyglass_pipeline::{ConnectionRegistry, PacketInterceptor};
use spyglass_protocol_core::{Packet, ParticleKind};
use spyglass_types::Vec3d;

/// A fire-and-forget particle burst around a position.
#[derive(Debug, Clone)]
pub struct ParticleBurst {
    pub kind: ParticleKind,
    pub position: Vec3d,
    pub offset: Vec3d,
    pub speed: f32,
    pub count: i32,
}

impl ParticleBurst {
    pub fn new(kind: ParticleKind, position: Vec3d) -> Self {
        Self {
            kind,
            position,
            offset: Vec3d::new(0.25, 0.25, 0.25),
            speed: 0.0,
            count: 8,
        }
    }

    pub fn with_count(mut self, count: i32) -> Self {
        self.count = count;
        self
    }

    pub fn with_offset(mut self, offset: Vec3d) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    fn to_packet(&self) -> Packet {
        Packet::WorldParticles {
            particle: self.kind,
            position: self.position,
            offset: self.offset,
            speed: self.speed,
            count: self.count,
        }
    }

    /// Show the burst to one player.
    pub fn send_to(&self, interceptor: &PacketInterceptor) {
        interceptor.send_one(self.to_packet());
    }

    /// Show the burst to everyone, through the outbound interception path.
    pub fn broadcast(&self, registry: &ConnectionRegistry) {
        registry.broadcast(self.to_packet());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_events::EventBus;
    use spyglass_types::SessionInfo;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_burst_packet_shape() {
        let registry = ConnectionRegistry::new(Arc::new(EventBus::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionInfo::new(Uuid::from_u128(1), "steve");
        let interceptor = registry.register(session, tx);

        ParticleBurst::new(ParticleKind::Heart, Vec3d::new(1.0, 65.0, 1.0))
            .with_count(3)
            .send_to(&interceptor);

        match rx.try_recv().unwrap() {
            Packet::WorldParticles {
                particle, count, ..
            } => {
                assert_eq!(particle, ParticleKind::Heart);
                assert_eq!(count, 3);
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }
}

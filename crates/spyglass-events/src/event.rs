use spyglass_protocol_core::{Packet, PacketKind};
use spyglass_types::SessionInfo;

/// Which way the intercepted unit was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → server.
    Inbound,
    /// Server → client.
    Outbound,
}

/// One intercepted packet, offered to observers before default handling.
///
/// The view is immutable except for the cancelled flag: whoever dispatched
/// the event reads the flag back immediately afterwards and drops the unit
/// if any observer set it. The event only lives for the duration of one
/// dispatch.
pub struct PacketEvent<'a> {
    session: &'a SessionInfo,
    direction: Direction,
    packet: &'a Packet,
    cancelled: bool,
}

impl<'a> PacketEvent<'a> {
    pub fn new(session: &'a SessionInfo, direction: Direction, packet: &'a Packet) -> Self {
        Self {
            session,
            direction,
            packet,
            cancelled: false,
        }
    }

    /// The session the unit belongs to. Borrows from the dispatch site,
    /// not from the event, so reads stay valid across a `cancel`.
    pub fn session(&self) -> &'a SessionInfo {
        self.session
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The raw packet. Borrows from the dispatch site, like [`Self::session`].
    pub fn packet(&self) -> &'a Packet {
        self.packet
    }

    pub fn kind(&self) -> PacketKind {
        self.packet.kind()
    }

    /// Suppress delivery of this unit. Cancellation short-circuits all
    /// default handling for this packet only; sibling events on other
    /// connections are unaffected.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

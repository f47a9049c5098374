use crate::{ConnectionState, Packet};
use anyhow::Result;
use bytes::BytesMut;

/// Trait for version-specific protocol adapters.
/// Each supported server version implements this trait; the resolver picks
/// exactly one implementation at startup from the detected version tag.
pub trait ProtocolAdapter: Send + Sync {
    /// The protocol number this adapter handles.
    fn protocol_version(&self) -> i32;

    /// Human-readable version label, e.g. "1.8.x".
    fn version_label(&self) -> &'static str;

    /// Decode a raw serverbound frame into a [`Packet`].
    ///
    /// Unrecognized ids decode to [`Packet::Unknown`] rather than failing:
    /// wire drift surfaces when a consumer actually looks at the packet,
    /// not at decode time.
    fn decode_packet(
        &self,
        state: ConnectionState,
        id: i32,
        data: &mut BytesMut,
    ) -> Result<Packet>;

    /// Encode a clientbound [`Packet`] into wire format (id + body).
    fn encode_packet(&self, state: ConnectionState, packet: &Packet) -> Result<BytesMut>;
}

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, BytesMut};
use spyglass_protocol_core::*;
use spyglass_types::{BlockPos, TextComponent, Vec3d};
use tracing::debug;

/// Protocol 47 (1.8.x). Entity coordinates are fixed-point (×32),
/// keep-alive ids travel as VarInts and sign lines as JSON components.
pub struct V1_8Adapter;

impl V1_8Adapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for V1_8Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for V1_8Adapter {
    fn protocol_version(&self) -> i32 {
        47
    }

    fn version_label(&self) -> &'static str {
        "1.8.x"
    }

    fn decode_packet(
        &self,
        state: ConnectionState,
        id: i32,
        data: &mut BytesMut,
    ) -> Result<Packet> {
        match state {
            ConnectionState::Handshaking => decode_handshaking(id, data),
            ConnectionState::Status => decode_status(id, data),
            ConnectionState::Login => decode_login(id, data),
            ConnectionState::Play => decode_play(id, data),
        }
    }

    fn encode_packet(&self, state: ConnectionState, packet: &Packet) -> Result<BytesMut> {
        match state {
            ConnectionState::Status => encode_status(packet),
            ConnectionState::Login => encode_login(packet),
            ConnectionState::Play => encode_play(packet),
            ConnectionState::Handshaking => bail!("Cannot encode packets in handshaking state"),
        }
    }
}

// === Packet ID constants ===

// Status clientbound
const STATUS_RESPONSE: i32 = 0x00;
const PONG_RESPONSE: i32 = 0x01;

// Login clientbound
const LOGIN_DISCONNECT: i32 = 0x00;
const LOGIN_SUCCESS: i32 = 0x02;
const SET_COMPRESSION: i32 = 0x03;

// Play serverbound
const SB_KEEP_ALIVE: i32 = 0x00;
const SB_CHAT: i32 = 0x01;
const SB_USE_ENTITY: i32 = 0x02;
const SB_POSITION: i32 = 0x04;
const SB_LOOK: i32 = 0x05;
const SB_POSITION_LOOK: i32 = 0x06;
const SB_UPDATE_SIGN: i32 = 0x12;

// Play clientbound
const CB_KEEP_ALIVE: i32 = 0x00;
const CB_CHAT: i32 = 0x02;
const CB_SPAWN_PLAYER: i32 = 0x0C;
const CB_SPAWN_OBJECT: i32 = 0x0E;
const CB_DESTROY_ENTITIES: i32 = 0x13;
const CB_ENTITY_TELEPORT: i32 = 0x18;
const CB_ENTITY_METADATA: i32 = 0x1C;
const CB_BLOCK_CHANGE: i32 = 0x23;
const CB_PARTICLE: i32 = 0x2A;
const CB_UPDATE_SIGN_OPEN: i32 = 0x36;
const CB_PLAYER_LIST_ITEM: i32 = 0x38;
const CB_DISCONNECT: i32 = 0x40;
const CB_TITLE: i32 = 0x45;

// Title actions (pre-1.11 layout: no action-bar slot).
const TITLE_SET_TITLE: i32 = 0;
const TITLE_SET_SUBTITLE: i32 = 1;
const TITLE_SET_TIMES: i32 = 2;
const TITLE_HIDE: i32 = 3;
const TITLE_RESET: i32 = 4;

// Metadata wire types (key byte is `type << 5 | index`).
const META_TYPE_BYTE: u8 = 0;
const META_TYPE_STRING: u8 = 4;
const META_TERMINATOR: u8 = 0x7F;

const ENTITY_FLAG_INVISIBLE: u8 = 0x20;
const ARMOR_STAND_FLAG_MARKER: u8 = 0x10;

fn particle_id(kind: ParticleKind) -> i32 {
    match kind {
        ParticleKind::Crit => 9,
        ParticleKind::LargeSmoke => 12,
        ParticleKind::HappyVillager => 21,
        ParticleKind::Flame => 26,
        ParticleKind::Cloud => 29,
        ParticleKind::Heart => 34,
    }
}

// === Decode ===

fn decode_handshaking(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => {
            let protocol_version = read_varint(data)?;
            let server_address = read_string(data, 255)?;
            let server_port = data.get_u16();
            let next_state = read_varint(data)?;
            Ok(Packet::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            })
        }
        _ => Ok(unknown(id, data)),
    }
}

fn decode_status(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => Ok(Packet::StatusRequest),
        0x01 => Ok(Packet::PingRequest {
            payload: data.get_i64(),
        }),
        _ => Ok(unknown(id, data)),
    }
}

fn decode_login(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => Ok(Packet::LoginStart {
            name: read_string(data, 16)?,
        }),
        _ => Ok(unknown(id, data)),
    }
}

fn decode_play(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        SB_KEEP_ALIVE => Ok(Packet::KeepAliveServerbound {
            id: read_varint(data)? as i64,
        }),
        SB_CHAT => Ok(Packet::ChatMessage {
            message: read_string(data, 100)?,
        }),
        SB_USE_ENTITY => {
            let entity_id = read_varint(data)?;
            let action = match read_varint(data)? {
                1 => InteractAction::Attack,
                2 => InteractAction::InteractAt {
                    target: Vec3d::new(
                        data.get_f32() as f64,
                        data.get_f32() as f64,
                        data.get_f32() as f64,
                    ),
                    hand: 0,
                },
                // 1.8 has no off hand; plain interacts are main hand.
                _ => InteractAction::Interact { hand: 0 },
            };
            Ok(Packet::InteractEntity { entity_id, action })
        }
        SB_POSITION => {
            let position = Vec3d::new(data.get_f64(), data.get_f64(), data.get_f64());
            let on_ground = data.get_u8() != 0;
            Ok(Packet::PlayerPosition { position, on_ground })
        }
        SB_LOOK => {
            let yaw = data.get_f32();
            let pitch = data.get_f32();
            let on_ground = data.get_u8() != 0;
            Ok(Packet::PlayerRotation {
                yaw,
                pitch,
                on_ground,
            })
        }
        SB_POSITION_LOOK => {
            let position = Vec3d::new(data.get_f64(), data.get_f64(), data.get_f64());
            let _yaw = data.get_f32();
            let _pitch = data.get_f32();
            let on_ground = data.get_u8() != 0;
            Ok(Packet::PlayerPosition { position, on_ground })
        }
        SB_UPDATE_SIGN => {
            let position = BlockPos::unpack(data.get_u64());
            // 1.8 clients submit each line as a JSON text component.
            let mut lines: [String; 4] = Default::default();
            for line in lines.iter_mut() {
                let raw = read_string(data, 384)?;
                *line = TextComponent::from_json(&raw).plain_text();
            }
            Ok(Packet::UpdateSign { position, lines })
        }
        _ => Ok(unknown(id, data)),
    }
}

fn unknown(id: i32, data: &mut BytesMut) -> Packet {
    Packet::Unknown {
        packet_id: id,
        body: data.to_vec(),
    }
}

// === Encode ===

fn encode_status(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::StatusResponse { json } => {
            write_varint(&mut buf, STATUS_RESPONSE);
            write_string(&mut buf, json);
        }
        Packet::PongResponse { payload } => {
            write_varint(&mut buf, PONG_RESPONSE);
            buf.put_i64(*payload);
        }
        _ => bail!("Cannot encode {:?} in status state", packet.kind()),
    }
    Ok(buf)
}

fn encode_login(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::SetCompression { threshold } => {
            write_varint(&mut buf, SET_COMPRESSION);
            write_varint(&mut buf, *threshold);
        }
        Packet::LoginSuccess { profile } => {
            write_varint(&mut buf, LOGIN_SUCCESS);
            write_string(&mut buf, &profile.uuid.hyphenated().to_string());
            write_string(&mut buf, &profile.name);
        }
        Packet::Disconnect { reason } => {
            write_varint(&mut buf, LOGIN_DISCONNECT);
            write_string(&mut buf, &reason.to_json());
        }
        _ => bail!("Cannot encode {:?} in login state", packet.kind()),
    }
    Ok(buf)
}

fn encode_play(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::KeepAliveClientbound { id } => {
            write_varint(&mut buf, CB_KEEP_ALIVE);
            write_varint(&mut buf, *id as i32);
        }
        Packet::SystemChat { content, overlay } => {
            write_varint(&mut buf, CB_CHAT);
            write_string(&mut buf, &content.to_json());
            buf.put_u8(if *overlay { 2 } else { 0 });
        }
        Packet::SetTitle { text } => {
            write_varint(&mut buf, CB_TITLE);
            write_varint(&mut buf, TITLE_SET_TITLE);
            write_string(&mut buf, &text.to_json());
        }
        Packet::SetSubtitle { text } => {
            write_varint(&mut buf, CB_TITLE);
            write_varint(&mut buf, TITLE_SET_SUBTITLE);
            write_string(&mut buf, &text.to_json());
        }
        Packet::SetTitleTimes {
            fade_in,
            stay,
            fade_out,
        } => {
            write_varint(&mut buf, CB_TITLE);
            write_varint(&mut buf, TITLE_SET_TIMES);
            buf.put_i32(*fade_in);
            buf.put_i32(*stay);
            buf.put_i32(*fade_out);
        }
        Packet::ClearTitle { reset } => {
            write_varint(&mut buf, CB_TITLE);
            write_varint(&mut buf, if *reset { TITLE_RESET } else { TITLE_HIDE });
        }
        Packet::PlayerListAdd { entries } => {
            write_varint(&mut buf, CB_PLAYER_LIST_ITEM);
            write_varint(&mut buf, 0); // action: add player
            write_varint(&mut buf, entries.len() as i32);
            for entry in entries {
                write_uuid(&mut buf, &entry.uuid);
                write_string(&mut buf, &entry.name);
                write_varint(&mut buf, entry.properties.len() as i32);
                for prop in &entry.properties {
                    write_string(&mut buf, &prop.name);
                    write_string(&mut buf, &prop.value);
                    match &prop.signature {
                        Some(sig) => {
                            buf.put_u8(1);
                            write_string(&mut buf, sig);
                        }
                        None => buf.put_u8(0),
                    }
                }
                write_varint(&mut buf, entry.game_mode);
                write_varint(&mut buf, entry.ping);
                match &entry.display_name {
                    Some(name) => {
                        buf.put_u8(1);
                        write_string(&mut buf, &name.to_json());
                    }
                    None => buf.put_u8(0),
                }
            }
        }
        Packet::PlayerListRemove { uuids } => {
            write_varint(&mut buf, CB_PLAYER_LIST_ITEM);
            write_varint(&mut buf, 4); // action: remove player
            write_varint(&mut buf, uuids.len() as i32);
            for uuid in uuids {
                write_uuid(&mut buf, uuid);
            }
        }
        Packet::SpawnEntity {
            entity_id,
            entity_uuid: _, // object spawns carry no UUID pre-1.9
            entity_type,
            position,
            yaw,
            pitch,
        } => {
            write_varint(&mut buf, CB_SPAWN_OBJECT);
            write_varint(&mut buf, *entity_id);
            buf.put_u8(*entity_type as u8);
            put_fixed_point(&mut buf, position);
            buf.put_u8(*pitch);
            buf.put_u8(*yaw);
            buf.put_i32(0); // object data
        }
        Packet::SpawnPlayer {
            entity_id,
            uuid,
            position,
            yaw,
            pitch,
        } => {
            write_varint(&mut buf, CB_SPAWN_PLAYER);
            write_varint(&mut buf, *entity_id);
            write_uuid(&mut buf, uuid);
            put_fixed_point(&mut buf, position);
            buf.put_u8(*yaw);
            buf.put_u8(*pitch);
            buf.put_i16(0); // held item
            buf.put_u8(META_TERMINATOR);
        }
        Packet::SetEntityMetadata {
            entity_id,
            metadata,
        } => {
            write_varint(&mut buf, CB_ENTITY_METADATA);
            write_varint(&mut buf, *entity_id);
            put_metadata(&mut buf, metadata);
        }
        Packet::TeleportEntity {
            entity_id,
            position,
            yaw,
            pitch,
            on_ground,
        } => {
            write_varint(&mut buf, CB_ENTITY_TELEPORT);
            write_varint(&mut buf, *entity_id);
            put_fixed_point(&mut buf, position);
            buf.put_u8(*yaw);
            buf.put_u8(*pitch);
            buf.put_u8(u8::from(*on_ground));
        }
        Packet::RemoveEntities { entity_ids } => {
            write_varint(&mut buf, CB_DESTROY_ENTITIES);
            write_varint(&mut buf, entity_ids.len() as i32);
            for id in entity_ids {
                write_varint(&mut buf, *id);
            }
        }
        Packet::BlockUpdate { position, block_id } => {
            write_varint(&mut buf, CB_BLOCK_CHANGE);
            buf.put_u64(position.pack());
            write_varint(&mut buf, *block_id);
        }
        Packet::OpenSignEditor { position } => {
            write_varint(&mut buf, CB_UPDATE_SIGN_OPEN);
            buf.put_u64(position.pack());
        }
        Packet::WorldParticles {
            particle,
            position,
            offset,
            speed,
            count,
        } => {
            write_varint(&mut buf, CB_PARTICLE);
            buf.put_i32(particle_id(*particle));
            buf.put_u8(0); // not long-distance
            buf.put_f32(position.x as f32);
            buf.put_f32(position.y as f32);
            buf.put_f32(position.z as f32);
            buf.put_f32(offset.x as f32);
            buf.put_f32(offset.y as f32);
            buf.put_f32(offset.z as f32);
            buf.put_f32(*speed);
            buf.put_i32(*count);
        }
        Packet::Disconnect { reason } => {
            write_varint(&mut buf, CB_DISCONNECT);
            write_string(&mut buf, &reason.to_json());
        }
        Packet::Unknown { packet_id, body } => {
            write_varint(&mut buf, *packet_id);
            buf.put_slice(body);
        }
        _ => bail!("Cannot encode serverbound {:?}", packet.kind()),
    }
    Ok(buf)
}

/// 1.8 entity coordinates: fixed-point, 1/32 block.
fn put_fixed_point(buf: &mut BytesMut, position: &Vec3d) {
    buf.put_i32((position.x * 32.0) as i32);
    buf.put_i32((position.y * 32.0) as i32);
    buf.put_i32((position.z * 32.0) as i32);
}

fn put_metadata(buf: &mut BytesMut, metadata: &[MetadataEntry]) {
    for entry in metadata {
        match entry {
            MetadataEntry::Invisible(invisible) => {
                put_meta_byte(buf, 0, if *invisible { ENTITY_FLAG_INVISIBLE } else { 0 });
            }
            MetadataEntry::CustomName(name) => {
                buf.put_u8(META_TYPE_STRING << 5 | 2);
                write_string(buf, name);
            }
            MetadataEntry::CustomNameVisible(visible) => {
                put_meta_byte(buf, 3, u8::from(*visible));
            }
            MetadataEntry::ArmorStandMarker(marker) => {
                put_meta_byte(buf, 10, if *marker { ARMOR_STAND_FLAG_MARKER } else { 0 });
            }
            MetadataEntry::NoGravity(_) => {
                // Not representable before 1.9; marker stands are enough
                // to keep holograms in place.
                debug!("Skipping NoGravity metadata on protocol 47");
            }
        }
    }
    buf.put_u8(META_TERMINATOR);
}

fn put_meta_byte(buf: &mut BytesMut, index: u8, value: u8) {
    buf.put_u8(META_TYPE_BYTE << 5 | index);
    buf.put_u8(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_types::GameProfile;
    use uuid::Uuid;

    fn adapter() -> V1_8Adapter {
        V1_8Adapter::new()
    }

    #[test]
    fn test_decode_use_entity_attack() {
        let mut data = BytesMut::new();
        write_varint(&mut data, 1234);
        write_varint(&mut data, 1);
        let packet = adapter()
            .decode_packet(ConnectionState::Play, SB_USE_ENTITY, &mut data)
            .unwrap();
        assert!(matches!(
            packet,
            Packet::InteractEntity {
                entity_id: 1234,
                action: InteractAction::Attack,
            }
        ));
    }

    #[test]
    fn test_decode_sign_lines_are_json_components() {
        let mut data = BytesMut::new();
        data.put_u64(BlockPos::new(1, 64, -3).pack());
        write_string(&mut data, r#"{"text":"first"}"#);
        write_string(&mut data, r#""second""#);
        write_string(&mut data, r#"{"text":""}"#);
        write_string(&mut data, r#"{"text":""}"#);
        let packet = adapter()
            .decode_packet(ConnectionState::Play, SB_UPDATE_SIGN, &mut data)
            .unwrap();
        match packet {
            Packet::UpdateSign { position, lines } => {
                assert_eq!(position, BlockPos::new(1, 64, -3));
                assert_eq!(lines[0], "first");
                assert_eq!(lines[1], "second");
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }

    #[test]
    fn test_keep_alive_id_is_varint() {
        let mut buf = adapter()
            .encode_packet(
                ConnectionState::Play,
                &Packet::KeepAliveClientbound { id: 300 },
            )
            .unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), CB_KEEP_ALIVE);
        assert_eq!(read_varint(&mut buf).unwrap(), 300);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_spawn_entity_uses_fixed_point() {
        let mut buf = adapter()
            .encode_packet(
                ConnectionState::Play,
                &Packet::SpawnEntity {
                    entity_id: 9,
                    entity_uuid: Uuid::from_u128(5),
                    entity_type: entity_type::ARMOR_STAND,
                    position: Vec3d::new(2.0, 64.5, -1.0),
                    yaw: 0,
                    pitch: 0,
                },
            )
            .unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), CB_SPAWN_OBJECT);
        assert_eq!(read_varint(&mut buf).unwrap(), 9);
        assert_eq!(buf.get_u8(), entity_type::ARMOR_STAND as u8);
        assert_eq!(buf.get_i32(), 64); // 2.0 * 32
        assert_eq!(buf.get_i32(), 2064); // 64.5 * 32
        assert_eq!(buf.get_i32(), -32); // -1.0 * 32
    }

    #[test]
    fn test_unknown_id_decodes_to_unknown() {
        let mut data = BytesMut::from(&[0xAAu8, 0xBB][..]);
        let packet = adapter()
            .decode_packet(ConnectionState::Play, 0x7E, &mut data)
            .unwrap();
        assert!(matches!(
            packet,
            Packet::Unknown {
                packet_id: 0x7E,
                ref body,
            } if body == &vec![0xAA, 0xBB]
        ));
    }

    #[test]
    fn test_clear_title_action() {
        let mut buf = adapter()
            .encode_packet(ConnectionState::Play, &Packet::ClearTitle { reset: true })
            .unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), CB_TITLE);
        assert_eq!(read_varint(&mut buf).unwrap(), TITLE_RESET);
    }

    #[test]
    fn test_login_success_uuid_is_dashed_string() {
        let profile = GameProfile::offline("steve", Uuid::from_u128(0xDEADBEEF));
        let mut buf = adapter()
            .encode_packet(ConnectionState::Login, &Packet::LoginSuccess { profile })
            .unwrap();
        assert_eq!(read_varint(&mut buf).unwrap(), LOGIN_SUCCESS);
        let uuid = read_string(&mut buf, 36).unwrap();
        assert_eq!(uuid.len(), 36);
        assert_eq!(read_string(&mut buf, 16).unwrap(), "steve");
    }
}

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, BytesMut};
use spyglass_protocol_core::*;
use spyglass_types::{BlockPos, Vec3d};

/// Protocol 340 (1.12.2). Entity coordinates are doubles, keep-alive ids
/// are longs, sign lines are plain strings and interacts carry a hand.
pub struct V1_12Adapter;

impl V1_12Adapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for V1_12Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for V1_12Adapter {
    fn protocol_version(&self) -> i32 {
        340
    }

    fn version_label(&self) -> &'static str {
        "1.12.x"
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
const SB_CHAT: i32 = 0x02;
const SB_USE_ENTITY: i32 = 0x0A;
const SB_KEEP_ALIVE: i32 = 0x0B;
const SB_POSITION: i32 = 0x0D;
const SB_POSITION_LOOK: i32 = 0x0E;
const SB_LOOK: i32 = 0x0F;
const SB_UPDATE_SIGN: i32 = 0x1C;

// Play clientbound
const CB_SPAWN_OBJECT: i32 = 0x00;
const CB_SPAWN_PLAYER: i32 = 0x05;
const CB_BLOCK_CHANGE: i32 = 0x0B;
const CB_CHAT: i32 = 0x0F;
const CB_DISCONNECT: i32 = 0x1A;
const CB_KEEP_ALIVE: i32 = 0x1F;
const CB_PARTICLE: i32 = 0x22;
const CB_OPEN_SIGN_EDITOR: i32 = 0x2A;
const CB_PLAYER_LIST_ITEM: i32 = 0x2E;
const CB_DESTROY_ENTITIES: i32 = 0x32;
const CB_ENTITY_METADATA: i32 = 0x3C;
const CB_TITLE: i32 = 0x48;
const CB_ENTITY_TELEPORT: i32 = 0x4C;

// Title actions (1.11+ layout with the action-bar slot).
const TITLE_SET_TITLE: i32 = 0;
const TITLE_SET_SUBTITLE: i32 = 1;
const TITLE_SET_TIMES: i32 = 3;
const TITLE_HIDE: i32 = 4;
const TITLE_RESET: i32 = 5;

// Metadata wire types (index byte, then type varint).
const META_TYPE_BYTE: i32 = 0;
const META_TYPE_STRING: i32 = 3;
const META_TYPE_BOOLEAN: i32 = 6;
const META_TERMINATOR: u8 = 0xFF;

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
            id: data.get_i64(),
        }),
        SB_CHAT => Ok(Packet::ChatMessage {
            message: read_string(data, 256)?,
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
                    hand: read_varint(data)?,
                },
                _ => InteractAction::Interact {
                    hand: read_varint(data)?,
                },
            };
            Ok(Packet::InteractEntity { entity_id, action })
        }
        SB_POSITION => {
            let position = Vec3d::new(data.get_f64(), data.get_f64(), data.get_f64());
            let on_ground = data.get_u8() != 0;
            Ok(Packet::PlayerPosition { position, on_ground })
        }
        SB_POSITION_LOOK => {
            let position = Vec3d::new(data.get_f64(), data.get_f64(), data.get_f64());
            let _yaw = data.get_f32();
            let _pitch = data.get_f32();
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
        SB_UPDATE_SIGN => {
            let position = BlockPos::unpack(data.get_u64());
            let mut lines: [String; 4] = Default::default();
            for line in lines.iter_mut() {
                *line = read_string(data, 384)?;
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
            buf.put_i64(*id);
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
            entity_uuid,
            entity_type,
            position,
            yaw,
            pitch,
        } => {
            write_varint(&mut buf, CB_SPAWN_OBJECT);
            write_varint(&mut buf, *entity_id);
            write_uuid(&mut buf, entity_uuid);
            buf.put_u8(*entity_type as u8);
            buf.put_f64(position.x);
            buf.put_f64(position.y);
            buf.put_f64(position.z);
            buf.put_u8(*pitch);
            buf.put_u8(*yaw);
            buf.put_i32(0); // object data
            buf.put_i16(0); // velocity
            buf.put_i16(0);
            buf.put_i16(0);
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
            buf.put_f64(position.x);
            buf.put_f64(position.y);
            buf.put_f64(position.z);
            buf.put_u8(*yaw);
            buf.put_u8(*pitch);
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
            buf.put_f64(position.x);
            buf.put_f64(position.y);
            buf.put_f64(position.z);
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
            write_varint(&mut buf, CB_OPEN_SIGN_EDITOR);
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

fn put_metadata(buf: &mut BytesMut, metadata: &[MetadataEntry]) {
    for entry in metadata {
        match entry {
            MetadataEntry::Invisible(invisible) => {
                buf.put_u8(0);
                write_varint(buf, META_TYPE_BYTE);
                buf.put_u8(if *invisible { ENTITY_FLAG_INVISIBLE } else { 0 });
            }
            MetadataEntry::CustomName(name) => {
                buf.put_u8(2);
                write_varint(buf, META_TYPE_STRING);
                write_string(buf, name);
            }
            MetadataEntry::CustomNameVisible(visible) => {
                buf.put_u8(3);
                write_varint(buf, META_TYPE_BOOLEAN);
                buf.put_u8(u8::from(*visible));
            }
            MetadataEntry::NoGravity(no_gravity) => {
                buf.put_u8(5);
                write_varint(buf, META_TYPE_BOOLEAN);
                buf.put_u8(u8::from(*no_gravity));
            }
            MetadataEntry::ArmorStandMarker(marker) => {
                buf.put_u8(11);
                write_varint(buf, META_TYPE_BYTE);
                buf.put_u8(if *marker { ARMOR_STAND_FLAG_MARKER } else { 0 });
            }
        }
    }
    buf.put_u8(META_TERMINATOR);
}

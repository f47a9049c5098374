use spyglass_types::{BlockPos, GameProfile, ProfileProperty, TextComponent, Vec3d};
use uuid::Uuid;

/// Version-independent internal packet representation.
/// Protocol adapters convert between wire format and these; everything
/// above the adapter layer (interception, observers, consumers) only ever
/// sees this closed set and discriminates with [`Packet::kind`] instead of
/// matching on wire ids.
#[derive(Debug, Clone)]
pub enum Packet {
    // === Handshaking (serverbound) ===
    Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: i32,
    },

    // === Status ===
    StatusRequest,
    StatusResponse {
        json: String,
    },
    PingRequest {
        payload: i64,
    },
    PongResponse {
        payload: i64,
    },

    // === Login ===
    LoginStart {
        name: String,
    },
    SetCompression {
        threshold: i32,
    },
    LoginSuccess {
        profile: GameProfile,
    },

    // === Play (clientbound) ===
    KeepAliveClientbound {
        id: i64,
    },
    /// Chat to the client. With `overlay` set the text is rendered above
    /// the hotbar instead of in the chat window (action bars ride on this).
    SystemChat {
        content: TextComponent,
        overlay: bool,
    },
    SetTitle {
        text: TextComponent,
    },
    SetSubtitle {
        text: TextComponent,
    },
    SetTitleTimes {
        fade_in: i32,
        stay: i32,
        fade_out: i32,
    },
    ClearTitle {
        reset: bool,
    },
    /// Add entries to the player list. Required before a SpawnPlayer for
    /// the same UUID is accepted by the client.
    PlayerListAdd {
        entries: Vec<PlayerListEntry>,
    },
    PlayerListRemove {
        uuids: Vec<Uuid>,
    },
    /// Spawn a non-player entity (holograms use marker armor stands).
    SpawnEntity {
        entity_id: i32,
        entity_uuid: Uuid,
        entity_type: i32,
        position: Vec3d,
        yaw: u8,
        pitch: u8,
    },
    SpawnPlayer {
        entity_id: i32,
        uuid: Uuid,
        position: Vec3d,
        yaw: u8,
        pitch: u8,
    },
    SetEntityMetadata {
        entity_id: i32,
        metadata: Vec<MetadataEntry>,
    },
    TeleportEntity {
        entity_id: i32,
        position: Vec3d,
        yaw: u8,
        pitch: u8,
        on_ground: bool,
    },
    RemoveEntities {
        entity_ids: Vec<i32>,
    },
    BlockUpdate {
        position: BlockPos,
        block_id: i32,
    },
    OpenSignEditor {
        position: BlockPos,
    },
    WorldParticles {
        particle: ParticleKind,
        position: Vec3d,
        offset: Vec3d,
        speed: f32,
        count: i32,
    },
    Disconnect {
        reason: TextComponent,
    },

    // === Play (serverbound) ===
    KeepAliveServerbound {
        id: i64,
    },
    ChatMessage {
        message: String,
    },
    /// Player clicked an entity. NPC click handling lives on this packet.
    InteractEntity {
        entity_id: i32,
        action: InteractAction,
    },
    /// Player finished a sign editor. The sign-editor dialog consumer
    /// captures and cancels these.
    UpdateSign {
        position: BlockPos,
        lines: [String; 4],
    },
    PlayerPosition {
        position: Vec3d,
        on_ground: bool,
    },
    PlayerRotation {
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },

    // === Shared ===
    /// Unrecognized wire id, raw bytes preserved. Decoding never fails on
    /// id drift; whoever cares about the packet type notices at use time.
    Unknown {
        packet_id: i32,
        body: Vec<u8>,
    },
}

/// Discriminant of [`Packet`], used for listener subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    StatusRequest,
    StatusResponse,
    PingRequest,
    PongResponse,
    LoginStart,
    SetCompression,
    LoginSuccess,
    KeepAliveClientbound,
    SystemChat,
    SetTitle,
    SetSubtitle,
    SetTitleTimes,
    ClearTitle,
    PlayerListAdd,
    PlayerListRemove,
    SpawnEntity,
    SpawnPlayer,
    SetEntityMetadata,
    TeleportEntity,
    RemoveEntities,
    BlockUpdate,
    OpenSignEditor,
    WorldParticles,
    Disconnect,
    KeepAliveServerbound,
    ChatMessage,
    InteractEntity,
    UpdateSign,
    PlayerPosition,
    PlayerRotation,
    Unknown,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake { .. } => PacketKind::Handshake,
            Packet::StatusRequest => PacketKind::StatusRequest,
            Packet::StatusResponse { .. } => PacketKind::StatusResponse,
            Packet::PingRequest { .. } => PacketKind::PingRequest,
            Packet::PongResponse { .. } => PacketKind::PongResponse,
            Packet::LoginStart { .. } => PacketKind::LoginStart,
            Packet::SetCompression { .. } => PacketKind::SetCompression,
            Packet::LoginSuccess { .. } => PacketKind::LoginSuccess,
            Packet::KeepAliveClientbound { .. } => PacketKind::KeepAliveClientbound,
            Packet::SystemChat { .. } => PacketKind::SystemChat,
            Packet::SetTitle { .. } => PacketKind::SetTitle,
            Packet::SetSubtitle { .. } => PacketKind::SetSubtitle,
            Packet::SetTitleTimes { .. } => PacketKind::SetTitleTimes,
            Packet::ClearTitle { .. } => PacketKind::ClearTitle,
            Packet::PlayerListAdd { .. } => PacketKind::PlayerListAdd,
            Packet::PlayerListRemove { .. } => PacketKind::PlayerListRemove,
            Packet::SpawnEntity { .. } => PacketKind::SpawnEntity,
            Packet::SpawnPlayer { .. } => PacketKind::SpawnPlayer,
            Packet::SetEntityMetadata { .. } => PacketKind::SetEntityMetadata,
            Packet::TeleportEntity { .. } => PacketKind::TeleportEntity,
            Packet::RemoveEntities { .. } => PacketKind::RemoveEntities,
            Packet::BlockUpdate { .. } => PacketKind::BlockUpdate,
            Packet::OpenSignEditor { .. } => PacketKind::OpenSignEditor,
            Packet::WorldParticles { .. } => PacketKind::WorldParticles,
            Packet::Disconnect { .. } => PacketKind::Disconnect,
            Packet::KeepAliveServerbound { .. } => PacketKind::KeepAliveServerbound,
            Packet::ChatMessage { .. } => PacketKind::ChatMessage,
            Packet::InteractEntity { .. } => PacketKind::InteractEntity,
            Packet::UpdateSign { .. } => PacketKind::UpdateSign,
            Packet::PlayerPosition { .. } => PacketKind::PlayerPosition,
            Packet::PlayerRotation { .. } => PacketKind::PlayerRotation,
            Packet::Unknown { .. } => PacketKind::Unknown,
        }
    }
}

/// One entry in a PlayerListAdd packet.
#[derive(Debug, Clone)]
pub struct PlayerListEntry {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
    pub game_mode: i32,
    pub ping: i32,
    pub display_name: Option<TextComponent>,
}

impl PlayerListEntry {
    pub fn from_profile(profile: &GameProfile) -> Self {
        Self {
            uuid: profile.uuid,
            name: profile.name.clone(),
            properties: profile.properties.clone(),
            game_mode: 0,
            ping: 0,
            display_name: None,
        }
    }
}

/// Entity metadata over the closed set this framework actually sets.
/// Adapters map these onto their version's key/type tables; an entry a
/// version cannot express is skipped with a debug log.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEntry {
    Invisible(bool),
    CustomName(String),
    CustomNameVisible(bool),
    /// Armor stand marker flag (no hitbox, no baseplate interactions).
    ArmorStandMarker(bool),
    NoGravity(bool),
}

/// What the client did to the entity it clicked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractAction {
    Attack,
    Interact { hand: i32 },
    InteractAt { target: Vec3d, hand: i32 },
}

/// Closed particle set; adapters own the per-version numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    Flame,
    Heart,
    Crit,
    LargeSmoke,
    Cloud,
    HappyVillager,
}

/// Internal entity type ids for SpawnEntity.
pub mod entity_type {
    pub const ARMOR_STAND: i32 = 78;
}

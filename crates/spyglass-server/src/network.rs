use crate::chatguard::ChatGuard;
use crate::config::ServerConfig;
use crate::session::{PlaySession, KEEP_ALIVE_INTERVAL};
use anyhow::{anyhow, Result};
use spyglass_display::{send_action_bar, HologramManager, NpcRegistry, SignEditor, Title};
use spyglass_pipeline::{ConnectionRegistry, Flow};
use spyglass_protocol_core::{
    read_varint, Connection, ConnectionState, Packet, ProtocolAdapter,
};
use spyglass_types::{GameProfile, SessionInfo, TextComponent};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Display element ids wired up at startup.
pub const MOTD_HOLOGRAM: &str = "motd";
pub const GREETER_NPC: &str = "greeter";

/// Everything a connection task needs, owned by `main` for the process
/// lifetime.
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub registry: Arc<ConnectionRegistry>,
    pub holograms: Arc<HologramManager>,
    pub npcs: Arc<NpcRegistry>,
    pub signs: Arc<SignEditor>,
    pub chat_guard: Arc<ChatGuard>,
}

/// Handle a single client through handshake → status or login → play.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer.to_string(),
        Err(_) => "unknown".to_string(),
    };
    if let Err(e) = run(Connection::new(stream), ctx).await {
        debug!("Connection {} ended: {}", peer, e);
    }
}

async fn run(mut conn: Connection, ctx: Arc<ServerContext>) -> Result<()> {
    // === Handshake ===
    let (id, mut data) = conn.read_packet().await?;
    let packet = ctx
        .adapter
        .decode_packet(ConnectionState::Handshaking, id, &mut data)?;
    let next_state = match packet {
        Packet::Handshake {
            protocol_version,
            next_state,
            ..
        } => {
            if protocol_version != ctx.adapter.protocol_version() {
                // Tolerated: drifted packets will surface as Unknown when
                // somebody actually cares about them.
                warn!(
                    "Client speaks protocol {}, server adapter is {} ({})",
                    protocol_version,
                    ctx.adapter.protocol_version(),
                    ctx.adapter.version_label()
                );
            }
            next_state
        }
        _ => return Err(anyhow!("Expected handshake packet")),
    };

    match ConnectionState::from_handshake_next(next_state) {
        Some(ConnectionState::Status) => handle_status(&mut conn, &ctx).await,
        Some(ConnectionState::Login) => {
            let profile = handle_login(&mut conn, &ctx).await?;
            run_play(conn, ctx, profile).await
        }
        _ => Err(anyhow!("Invalid next state: {}", next_state)),
    }
}

async fn handle_status(conn: &mut Connection, ctx: &ServerContext) -> Result<()> {
    loop {
        let (id, mut data) = conn.read_packet().await?;
        let packet = ctx
            .adapter
            .decode_packet(ConnectionState::Status, id, &mut data)?;
        match packet {
            Packet::StatusRequest => {
                let json = format!(
                    r#"{{"version":{{"name":"{}","protocol":{}}},"players":{{"max":{},"online":{}}},"description":{{"text":"{}"}}}}"#,
                    ctx.adapter.version_label(),
                    ctx.adapter.protocol_version(),
                    ctx.config.max_players,
                    ctx.registry.len(),
                    ctx.config.motd
                );
                send_packet(
                    conn,
                    ctx.adapter.as_ref(),
                    ConnectionState::Status,
                    &Packet::StatusResponse { json },
                )
                .await?;
            }
            Packet::PingRequest { payload } => {
                send_packet(
                    conn,
                    ctx.adapter.as_ref(),
                    ConnectionState::Status,
                    &Packet::PongResponse { payload },
                )
                .await?;
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn handle_login(conn: &mut Connection, ctx: &ServerContext) -> Result<GameProfile> {
    let (id, mut data) = conn.read_packet().await?;
    let packet = ctx
        .adapter
        .decode_packet(ConnectionState::Login, id, &mut data)?;
    let name = match packet {
        Packet::LoginStart { name } => name,
        _ => return Err(anyhow!("Expected Login Start")),
    };
    info!("Login start from {}", name);

    if ctx.registry.len() as u32 >= ctx.config.max_players {
        send_packet(
            conn,
            ctx.adapter.as_ref(),
            ConnectionState::Login,
            &Packet::Disconnect {
                reason: TextComponent::plain("Server is full"),
            },
        )
        .await?;
        return Err(anyhow!("Server full, rejected {}", name));
    }

    let threshold = ctx.config.compression_threshold;
    send_packet(
        conn,
        ctx.adapter.as_ref(),
        ConnectionState::Login,
        &Packet::SetCompression { threshold },
    )
    .await?;
    conn.enable_compression(threshold);

    let profile = GameProfile::offline(name.clone(), offline_uuid(&name));
    send_packet(
        conn,
        ctx.adapter.as_ref(),
        ConnectionState::Login,
        &Packet::LoginSuccess {
            profile: profile.clone(),
        },
    )
    .await?;
    Ok(profile)
}

/// The play state: split the transport, register with the interception
/// registry (the join hook), pump packets until the reader ends (the quit
/// hook).
async fn run_play(conn: Connection, ctx: Arc<ServerContext>, profile: GameProfile) -> Result<()> {
    let session = SessionInfo::new(profile.uuid, profile.name);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
    ctx.registry.register(session.clone(), out_tx);

    let (mut reader, mut writer) = conn.into_split();

    // Writer task: drains the transport channel, encodes, sends.
    let writer_adapter = ctx.adapter.clone();
    let writer_session = session.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            let mut data =
                match writer_adapter.encode_packet(ConnectionState::Play, &packet) {
                    Ok(data) => data,
                    Err(e) => {
                        debug!("Encode error for {}: {}", writer_session, e);
                        continue;
                    }
                };
            let packet_id = match read_varint(&mut data) {
                Ok(id) => id,
                Err(e) => {
                    debug!("Bad encoded frame for {}: {}", writer_session, e);
                    continue;
                }
            };
            if let Err(e) = writer.write_packet(packet_id, &data).await {
                debug!("Writer error for {}: {}", writer_session, e);
                break;
            }
        }
    });

    on_join(&ctx, &session);
    info!("{} joined", session);

    let mut play = PlaySession::new(session.clone());
    let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    loop {
        tokio::select! {
            frame = reader.read_packet() => match frame {
                Ok((id, mut data)) => {
                    match ctx.adapter.decode_packet(ConnectionState::Play, id, &mut data) {
                        Ok(packet) => {
                            // The interception pipeline sees the unit
                            // first; only survivors reach default handling.
                            if ctx.registry.process_inbound(&session.id, &packet) == Flow::Forward {
                                play.handle_packet(&ctx, packet);
                            }
                        }
                        Err(e) => debug!("Decode error for {}: {}", session, e),
                    }
                }
                Err(e) => {
                    debug!("Reader ended for {}: {}", session, e);
                    break;
                }
            },
            _ = ticker.tick() => {
                if !play.tick_keep_alive(&ctx) {
                    warn!("{} timed out", session);
                    ctx.registry.dispatch_outbound(&session.id, Packet::Disconnect {
                        reason: TextComponent::plain("Timed out"),
                    });
                    break;
                }
            }
        }
    }

    on_quit(&ctx, &session);
    info!("{} left", session);
    writer_handle.abort();
    Ok(())
}

fn on_join(ctx: &ServerContext, session: &SessionInfo) {
    ctx.registry.broadcast(Packet::SystemChat {
        content: TextComponent::colored(format!("{} joined the game", session.name), "yellow"),
        overlay: false,
    });

    if let Some(interceptor) = ctx.registry.lookup(&session.id) {
        Title::new(TextComponent::colored("Welcome!", "gold"))
            .with_subtitle(TextComponent::plain(ctx.config.motd.clone()))
            .show(&interceptor);
        send_action_bar(
            &interceptor,
            TextComponent::plain("Try /sign, or click the guide"),
        );
    }
    let _ = ctx.holograms.show_to(MOTD_HOLOGRAM, &session.id);
    let _ = ctx.npcs.show_to(GREETER_NPC, &session.id);
}

fn on_quit(ctx: &ServerContext, session: &SessionInfo) {
    // Tear interception down first so nothing is dispatched for the
    // departed client; the host may deliver this twice and the registry
    // tolerates it.
    ctx.registry.unregister(&session.id);
    ctx.holograms.purge_viewer(&session.id);
    ctx.npcs.purge_viewer(&session.id);
    ctx.signs.purge(&session.id);
    ctx.chat_guard.purge(&session.id);

    ctx.registry.broadcast(Packet::SystemChat {
        content: TextComponent::colored(format!("{} left the game", session.name), "yellow"),
        overlay: false,
    });
}

/// Send a packet through an unsplit connection (pre-play states).
async fn send_packet(
    conn: &mut Connection,
    adapter: &dyn ProtocolAdapter,
    state: ConnectionState,
    packet: &Packet,
) -> Result<()> {
    let mut data = adapter.encode_packet(state, packet)?;
    let packet_id = read_varint(&mut data)?;
    conn.write_packet(packet_id, &data).await
}

/// Name-stable UUID for offline-mode logins.
fn offline_uuid(name: &str) -> Uuid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    ("spyglass:offline", name).hash(&mut hasher);
    let hi = hasher.finish();
    name.hash(&mut hasher);
    let lo = hasher.finish();

    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&hi.to_be_bytes());
    bytes[8..].copy_from_slice(&lo.to_be_bytes());
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    Uuid::from_bytes(bytes)
}

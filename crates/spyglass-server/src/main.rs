mod chatguard;
mod config;
mod network;
mod session;

use anyhow::Context;
use chatguard::ChatGuard;
use config::ServerConfig;
use network::{ServerContext, GREETER_NPC, MOTD_HOLOGRAM};
use spyglass_display::{
    ClickKind, HologramManager, NpcRegistry, ParticleBurst, SignEditor, NPC_OWNER, SIGN_OWNER,
};
use spyglass_events::EventBus;
use spyglass_pipeline::{ConnectionRegistry, VersionResolver};
use spyglass_protocol_core::{Packet, ParticleKind};
use spyglass_types::{TextComponent, Vec3d};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Spyglass server...");

    let config = Arc::new(ServerConfig::load(Path::new("config/server.toml"))?);
    info!(
        "Config loaded: bind={}:{}, version={}, max_players={}",
        config.bind, config.port, config.version, config.max_players
    );

    // Version resolution happens exactly once, before anything else is
    // built: every component below depends on the adapter, so an
    // unsupported tag must abort the boot rather than limp along.
    let resolver = VersionResolver::builtin();
    let resolved = resolver.resolve(&config.version).with_context(|| {
        format!(
            "supported versions: {}",
            resolver.supported_tags().join(", ")
        )
    })?;
    info!(
        "Resolved version {} -> {} (protocol {})",
        config.version,
        resolved.adapter.version_label(),
        resolved.protocol
    );

    let bus = Arc::new(EventBus::new());
    let registry = ConnectionRegistry::new(bus.clone());

    let holograms = Arc::new(HologramManager::new(registry.clone()));
    let npcs = NpcRegistry::new(registry.clone(), &bus);
    let signs = SignEditor::new(registry.clone(), &bus);
    let chat_guard = ChatGuard::new(config.chat_guard.clone(), registry.clone(), &bus);

    setup_spawn_displays(&registry, &holograms, &npcs, &config)?;
    info!("Consumers wired: {} listeners on the bus", bus.listener_count());

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let ctx = Arc::new(ServerContext {
        config,
        adapter: resolved.adapter,
        registry: registry.clone(),
        holograms: holograms.clone(),
        npcs: npcs.clone(),
        signs: signs.clone(),
        chat_guard,
    });

    tokio::select! {
        _ = accept_loop(listener, ctx) => {
            error!("Accept loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // Consumer teardown, then the registry: after this nothing is
    // dispatched for anybody.
    holograms.clear();
    npcs.clear();
    signs.clear();
    bus.unregister_owner(NPC_OWNER);
    bus.unregister_owner(SIGN_OWNER);
    bus.unregister_owner(chatguard::CHAT_GUARD_OWNER);
    registry.broadcast(Packet::Disconnect {
        reason: TextComponent::plain("Server closed"),
    });
    registry.clear();
    info!("Server shut down cleanly");
    Ok(())
}

/// The welcome hologram and the clickable guide NPC at spawn.
fn setup_spawn_displays(
    registry: &Arc<ConnectionRegistry>,
    holograms: &Arc<HologramManager>,
    npcs: &Arc<NpcRegistry>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    holograms.create(
        MOTD_HOLOGRAM,
        Vec3d::new(0.5, 66.5, 0.5),
        vec![config.motd.clone(), "/sign writes a message".into()],
    )?;

    let npc_location = Vec3d::new(2.5, 64.0, 0.5);
    npcs.create(GREETER_NPC, "Guide", npc_location, 180.0)?;
    let greeter_registry = registry.clone();
    npcs.on_click(
        GREETER_NPC,
        Arc::new(move |who, kind| {
            let greeting = match kind {
                ClickKind::Right => format!("Hello, {}!", who.name),
                ClickKind::Left => "Ouch!".to_string(),
            };
            if let Some(interceptor) = greeter_registry.lookup(&who.id) {
                interceptor.send_one(Packet::SystemChat {
                    content: TextComponent::colored(format!("[Guide] {}", greeting), "green"),
                    overlay: false,
                });
                ParticleBurst::new(ParticleKind::Heart, npc_location.offset(0.0, 2.0, 0.0))
                    .with_count(4)
                    .send_to(&interceptor);
            }
        }),
    )?;
    Ok(())
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    network::handle_connection(socket, ctx).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

use crate::network::ServerContext;
use spyglass_protocol_core::Packet;
use spyglass_types::{SessionInfo, TextComponent};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default handling for one play-state session: whatever survives the
/// interception pipeline ends up here.
pub struct PlaySession {
    session: SessionInfo,
    next_keep_alive_id: i64,
    awaiting_keep_alive: Option<(i64, Instant)>,
}

impl PlaySession {
    pub fn new(session: SessionInfo) -> Self {
        Self {
            session,
            next_keep_alive_id: 1,
            awaiting_keep_alive: None,
        }
    }

    /// Periodic keep-alive bookkeeping. Returns false when the client has
    /// not answered within the timeout and should be dropped.
    pub fn tick_keep_alive(&mut self, ctx: &ServerContext) -> bool {
        if let Some((_, sent_at)) = self.awaiting_keep_alive {
            return sent_at.elapsed() <= KEEP_ALIVE_TIMEOUT;
        }

        let id = self.next_keep_alive_id;
        self.next_keep_alive_id += 1;
        ctx.registry
            .dispatch_outbound(&self.session.id, Packet::KeepAliveClientbound { id });
        self.awaiting_keep_alive = Some((id, Instant::now()));
        true
    }

    pub fn handle_packet(&mut self, ctx: &ServerContext, packet: Packet) {
        match packet {
            Packet::KeepAliveServerbound { id } => {
                match self.awaiting_keep_alive {
                    Some((expected, _)) if expected == id => {
                        self.awaiting_keep_alive = None;
                    }
                    _ => debug!("Unexpected keep-alive {} from {}", id, self.session),
                }
            }
            Packet::ChatMessage { message } => {
                if let Some(command) = message.strip_prefix('/') {
                    self.handle_command(ctx, command);
                } else {
                    ctx.registry.broadcast(Packet::SystemChat {
                        content: TextComponent::plain(format!(
                            "<{}> {}",
                            self.session.name, message
                        )),
                        overlay: false,
                    });
                }
            }
            // Movement only matters to observers (sign placement, range
            // checks); nothing to do here.
            Packet::PlayerPosition { .. } | Packet::PlayerRotation { .. } => {}
            Packet::Unknown { packet_id, .. } => {
                trace!(
                    "Ignoring unknown packet 0x{:02X} from {}",
                    packet_id,
                    self.session
                );
            }
            other => {
                trace!("Ignoring {:?} from {}", other.kind(), self.session);
            }
        }
    }

    fn handle_command(&self, ctx: &ServerContext, command: &str) {
        match command.trim() {
            "sign" => {
                let registry = ctx.registry.clone();
                let opened = ctx.signs.open(
                    &self.session,
                    Box::new(move |who, lines| {
                        let text = lines
                            .iter()
                            .filter(|line| !line.is_empty())
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(" ");
                        if !text.is_empty() {
                            registry.broadcast(Packet::SystemChat {
                                content: TextComponent::colored(
                                    format!("[Sign] {}: {}", who.name, text),
                                    "aqua",
                                ),
                                overlay: false,
                            });
                        }
                    }),
                );
                if !opened {
                    debug!("Could not open sign editor for {}", self.session);
                }
            }
            "who" => {
                let mut names: Vec<String> = ctx
                    .registry
                    .sessions()
                    .into_iter()
                    .map(|s| s.name)
                    .collect();
                names.sort();
                self.reply(
                    ctx,
                    TextComponent::plain(format!(
                        "Online ({}): {}",
                        names.len(),
                        names.join(", ")
                    )),
                );
            }
            other => {
                self.reply(
                    ctx,
                    TextComponent::colored(format!("Unknown command: /{}", other), "red"),
                );
            }
        }
    }

    fn reply(&self, ctx: &ServerContext, content: TextComponent) {
        if let Some(interceptor) = ctx.registry.lookup(&self.session.id) {
            interceptor.send_one(Packet::SystemChat {
                content,
                overlay: false,
            });
        }
    }
}

use crate::config::ChatGuardConfig;
use spyglass_display::send_action_bar;
use spyglass_events::{Direction, EventBus, PacketEvent, PacketListener, Priority};
use spyglass_pipeline::ConnectionRegistry;
use spyglass_protocol_core::{Packet, PacketKind};
use spyglass_types::TextComponent;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

pub const CHAT_GUARD_OWNER: &str = "spyglass-chatguard";

#[derive(Debug, PartialEq)]
enum Verdict {
    Clean,
    /// This message tripped the limit; the mute starts now.
    JustMuted(Duration),
    /// Already muted, with time remaining.
    Muted(Duration),
}

#[derive(Default)]
struct History {
    recent: VecDeque<Instant>,
    muted_until: Option<Instant>,
}

/// Sliding-window chat spam check: more than `max_messages` within
/// `window_secs` mutes the player for `mute_secs`. Cancels offending chat
/// packets and warns over the action bar.
pub struct ChatGuard {
    config: ChatGuardConfig,
    registry: Arc<ConnectionRegistry>,
    state: Mutex<HashMap<Uuid, History>>,
}

impl ChatGuard {
    /// Build the guard and subscribe it at Low priority, so the verdict
    /// lands before ordinary observers see the message.
    pub fn new(
        config: ChatGuardConfig,
        registry: Arc<ConnectionRegistry>,
        bus: &EventBus,
    ) -> Arc<Self> {
        let guard = Arc::new(Self {
            config,
            registry,
            state: Mutex::new(HashMap::new()),
        });
        bus.register(
            &[PacketKind::ChatMessage],
            CHAT_GUARD_OWNER,
            Priority::Low,
            guard.clone(),
        );
        guard
    }

    pub fn purge(&self, session_id: &Uuid) {
        self.state.lock().unwrap().remove(session_id);
    }

    fn check(&self, session_id: Uuid, now: Instant) -> Verdict {
        let window = Duration::from_secs(self.config.window_secs);
        let mute = Duration::from_secs(self.config.mute_secs);

        let mut state = self.state.lock().unwrap();
        let history = state.entry(session_id).or_default();

        if let Some(until) = history.muted_until {
            if now < until {
                return Verdict::Muted(until - now);
            }
            history.muted_until = None;
        }

        while let Some(&oldest) = history.recent.front() {
            if now.duration_since(oldest) > window {
                history.recent.pop_front();
            } else {
                break;
            }
        }

        history.recent.push_back(now);
        if history.recent.len() > self.config.max_messages {
            history.recent.clear();
            history.muted_until = Some(now + mute);
            return Verdict::JustMuted(mute);
        }
        Verdict::Clean
    }

    fn warn(&self, session_id: &Uuid, remaining: Duration) {
        if let Some(interceptor) = self.registry.lookup(session_id) {
            send_action_bar(
                &interceptor,
                TextComponent::colored(
                    format!("Slow down! Muted for {}s", remaining.as_secs().max(1)),
                    "red",
                ),
            );
        }
    }
}

impl PacketListener for ChatGuard {
    fn handle(&self, event: &mut PacketEvent<'_>) -> anyhow::Result<()> {
        if event.direction() != Direction::Inbound {
            return Ok(());
        }
        let message = match event.packet() {
            Packet::ChatMessage { message } => message,
            _ => return Ok(()),
        };
        // Commands are not chat; rate limiting them would break dialogs.
        if message.starts_with('/') {
            return Ok(());
        }

        let session = event.session();
        match self.check(session.id, Instant::now()) {
            Verdict::Clean => {}
            Verdict::JustMuted(mute) => {
                debug!("Muted {} for spamming", session);
                self.warn(&session.id, mute);
                event.cancel();
            }
            Verdict::Muted(remaining) => {
                self.warn(&session.id, remaining);
                event.cancel();
            }
        }
        Ok(())
    }
}

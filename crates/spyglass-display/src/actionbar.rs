use spyglass_pipeline::PacketInterceptor;
use spyglass_protocol_core::Packet;
use spyglass_types::TextComponent;

/// Show text above the player's hotbar.
pub fn send_action_bar(interceptor: &PacketInterceptor, text: TextComponent) {
    interceptor.send_one(Packet::SystemChat {
        content: text,
        overlay: true,
    });
}

/// A full-screen title with optional subtitle and fade timing (in ticks).
#[derive(Debug, Clone)]
pub struct Title {
    pub title: TextComponent,
    pub subtitle: Option<TextComponent>,
    pub fade_in: i32,
    pub stay: i32,
    pub fade_out: i32,
}

impl Title {
    pub fn new(title: TextComponent) -> Self {
        Self {
            title,
            subtitle: None,
            fade_in: 10,
            stay: 60,
            fade_out: 10,
        }
    }

    pub fn with_subtitle(mut self, subtitle: TextComponent) -> Self {
        self.subtitle = Some(subtitle);
        self
    }

    pub fn with_times(mut self, fade_in: i32, stay: i32, fade_out: i32) -> Self {
        self.fade_in = fade_in;
        self.stay = stay;
        self.fade_out = fade_out;
        self
    }

    /// Send the title to one player. Times go out first so the client
    /// applies them to this title, not the previous one.
    pub fn show(&self, interceptor: &PacketInterceptor) {
        let mut packets = vec![Packet::SetTitleTimes {
            fade_in: self.fade_in,
            stay: self.stay,
            fade_out: self.fade_out,
        }];
        if let Some(subtitle) = &self.subtitle {
            packets.push(Packet::SetSubtitle {
                text: subtitle.clone(),
            });
        }
        packets.push(Packet::SetTitle {
            text: self.title.clone(),
        });
        interceptor.send(packets);
    }
}

/// Take the current title off the screen.
pub fn clear_title(interceptor: &PacketInterceptor, reset: bool) {
    interceptor.send_one(Packet::ClearTitle { reset });
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_events::EventBus;
    use spyglass_pipeline::ConnectionRegistry;
    use spyglass_types::SessionInfo;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_action_bar_rides_on_overlay_chat() {
        let registry = ConnectionRegistry::new(Arc::new(EventBus::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionInfo::new(Uuid::from_u128(1), "steve");
        let interceptor = registry.register(session, tx);

        send_action_bar(&interceptor, TextComponent::plain("watch out"));
        match rx.try_recv().unwrap() {
            Packet::SystemChat { content, overlay } => {
                assert!(overlay);
                assert_eq!(content.text, "watch out");
            }
            other => panic!("unexpected packet {:?}", other.kind()),
        }
    }

    #[test]
    fn test_title_sends_times_before_text() {
        let registry = ConnectionRegistry::new(Arc::new(EventBus::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionInfo::new(Uuid::from_u128(2), "alex");
        let interceptor = registry.register(session, tx);

        Title::new(TextComponent::plain("Welcome"))
            .with_subtitle(TextComponent::plain("enjoy"))
            .with_times(5, 40, 5)
            .show(&interceptor);

        assert!(matches!(
            rx.try_recv().unwrap(),
            Packet::SetTitleTimes {
                fade_in: 5,
                stay: 40,
                fade_out: 5,
            }
        ));
        assert!(matches!(rx.try_recv().unwrap(), Packet::SetSubtitle { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Packet::SetTitle { .. }));
    }
}

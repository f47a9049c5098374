pub mod actionbar;
pub mod hologram;
pub mod npc;
pub mod particles;
pub mod sign;

pub use actionbar::{clear_title, send_action_bar, Title};
pub use hologram::HologramManager;
pub use npc::{ClickKind, NpcRegistry, NPC_OWNER};
pub use particles::ParticleBurst;
pub use sign::{SignEditor, SIGN_OWNER};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("a display element named `{0}` already exists")]
    DuplicateId(String),
    #[error("no display element named `{0}`")]
    UnknownId(String),
}

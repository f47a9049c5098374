use spyglass_events::Direction;
use spyglass_protocol_core::Packet;
use std::sync::Arc;
use thiserror::Error;

/// What happens to a unit after a stage has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass the unit on to the next stage / default handling.
    Forward,
    /// Swallow the unit. No later stage sees it.
    Drop,
}

/// One named handler in a connection's packet path. Stages run on the
/// connection's own task and must not block.
pub trait PacketStage: Send + Sync {
    fn handle(&self, direction: Direction, packet: &Packet) -> Flow;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline already contains a stage named `{0}`")]
    DuplicateStage(String),
}

struct NamedStage {
    name: String,
    stage: Arc<dyn PacketStage>,
}

/// The per-connection stage chain. Decoded inbound units and outgoing
/// outbound units both flow through it, front to back; the interception
/// handler always sits at the front so it sees every unit before default
/// handling does.
#[derive(Default)]
pub struct PacketPipeline {
    stages: Vec<NamedStage>,
}

impl PacketPipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Insert a stage at the interception position (front). Names are
    /// unique per pipeline; a duplicate name is refused so the same
    /// handler can never be installed twice.
    pub fn splice(&mut self, name: &str, stage: Arc<dyn PacketStage>) -> Result<(), PipelineError> {
        if self.contains(name) {
            return Err(PipelineError::DuplicateStage(name.to_string()));
        }
        self.stages.insert(
            0,
            NamedStage {
                name: name.to_string(),
                stage,
            },
        );
        Ok(())
    }

    /// Add a stage at the tail (the default-handling side).
    pub fn append(&mut self, name: &str, stage: Arc<dyn PacketStage>) -> Result<(), PipelineError> {
        if self.contains(name) {
            return Err(PipelineError::DuplicateStage(name.to_string()));
        }
        self.stages.push(NamedStage {
            name: name.to_string(),
            stage,
        });
        Ok(())
    }

    /// Remove a stage by name. Removing an absent name is a no-op;
    /// returns whether anything was removed.
    pub fn unsplice(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| s.name != name);
        self.stages.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Clone out the stage list, so callers can run it without holding
    /// whatever lock guards the pipeline. Stages registered mid-flight
    /// only see the next unit.
    pub fn snapshot(&self) -> Vec<Arc<dyn PacketStage>> {
        self.stages.iter().map(|s| s.stage.clone()).collect()
    }

    /// Run a unit through a stage list. The first stage to drop it
    /// short-circuits everything still pending behind it.
    pub fn run(stages: &[Arc<dyn PacketStage>], direction: Direction, packet: &Packet) -> Flow {
        for stage in stages {
            if stage.handle(direction, packet) == Flow::Drop {
                return Flow::Drop;
            }
        }
        Flow::Forward
    }

    /// Convenience for callers that own the pipeline directly.
    pub fn process(&self, direction: Direction, packet: &Packet) -> Flow {
        Self::run(&self.snapshot(), direction, packet)
    }
}

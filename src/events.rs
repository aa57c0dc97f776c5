use std::fmt;

/// Events the engine emits for external collaborators: the audio backend
/// drains `PlayAudio`, the editor shell drains `SceneChanged` to refresh its
/// preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    PlayAudio { id: String },
    SceneChanged { map: String, scene: String },
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::PlayAudio { id } => write!(f, "PlayAudio id={id}"),
            EngineEvent::SceneChanged { map, scene } => write!(f, "SceneChanged map={map} scene={scene}"),
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    events: Vec<EngineEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }
}

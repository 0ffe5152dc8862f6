use greeter_core::Scene;

/// Receives one draw request per tick.
pub trait Renderer: Send {
    fn draw(&mut self, scene: &Scene);
}

/// Renderer for headless kiosks and debugging: logs each scene change.
#[derive(Debug, Default)]
pub struct TraceRenderer {
    current: Option<Scene>,
}

impl TraceRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for TraceRenderer {
    fn draw(&mut self, scene: &Scene) {
        if self.current.as_ref() == Some(scene) {
            return;
        }
        match scene {
            Scene::Speak(text) => tracing::info!(text = %text, "scene: speak"),
            Scene::Blink => tracing::trace!("scene: blink"),
            other => tracing::debug!(scene = %other, "scene changed"),
        }
        self.current = Some(scene.clone());
    }
}

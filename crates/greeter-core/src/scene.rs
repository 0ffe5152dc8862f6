use serde::Serialize;
use std::fmt;

/// Draw request for the renderer. The core decides what to show; the
/// renderer owns the pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scene", content = "value", rename_all = "kebab-case")]
pub enum Scene {
    Idle,
    Blink,
    Speak(String),
    Wave(u32),
    Fun(u32),
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scene::Idle => write!(f, "idle"),
            Scene::Blink => write!(f, "blink"),
            Scene::Speak(text) => write!(f, "speak({text})"),
            Scene::Wave(frame) => write!(f, "wave({frame})"),
            Scene::Fun(frame) => write!(f, "fun({frame})"),
        }
    }
}

use crate::engine::{EngineError, EngineHandle};
use greeter_core::Gesture;
use zbus::interface;

pub const BUS_NAME: &str = "org.greeter.Kiosk1";
pub const OBJECT_PATH: &str = "/org/greeter/Kiosk1";

/// D-Bus admin interface for the greeter daemon.
///
/// Bus name: org.greeter.Kiosk1
/// Object path: /org/greeter/Kiosk1
pub struct GreeterService {
    engine: EngineHandle,
}

impl GreeterService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn engine_failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.greeter.Kiosk1")]
impl GreeterService {
    /// Current state, scene, valid detection count and detector readiness.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(engine_failed)?;
        let mut json = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        json["version"] = serde_json::json!(env!("CARGO_PKG_VERSION"));
        Ok(json.to_string())
    }

    /// Greeting counts per day.
    async fn greeting_stats(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.greeting_stats().await.map_err(engine_failed)?;
        Ok(serde_json::json!(stats).to_string())
    }

    /// Start a touch animation (`wave` or `fun`). Returns false if the
    /// greeter is busy or touch input is cooling down.
    async fn touch(&self, kind: &str) -> zbus::fdo::Result<bool> {
        let gesture: Gesture = kind
            .parse()
            .map_err(|e: greeter_core::machine::ParseSettingError| {
                zbus::fdo::Error::InvalidArgs(e.to_string())
            })?;
        match self.engine.touch(gesture).await.map_err(engine_failed)? {
            Ok(()) => Ok(true),
            Err(reason) => {
                tracing::debug!(kind, %reason, "touch rejected over D-Bus");
                Ok(false)
            }
        }
    }

    /// Clear presence and content history and return to idle.
    async fn reset(&self) -> zbus::fdo::Result<()> {
        tracing::info!("reset requested");
        self.engine.reset().await.map_err(engine_failed)
    }

    /// Re-read the content file. Returns the number of categories loaded
    /// (0 means the fallback line is in use).
    async fn reload_content(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("content reload requested");
        let categories = self.engine.reload_content().await.map_err(engine_failed)?;
        Ok(u32::try_from(categories).unwrap_or(u32::MAX))
    }
}

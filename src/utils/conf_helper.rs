use std::path::Path;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::error::Result;
use crate::models::settings::Settings;

pub const SETTINGS_FILE: &str = "depthcalc.json";

static SETTINGS_CACHE: OnceLock<Settings> = OnceLock::new();

/// Reads settings from `path`. A missing file gives the defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("settings file {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(e) => return Err(e.into()),
    };

    let settings: Settings = serde_json::from_str(&data)?;
    info!("settings loaded from {}", path.display());
    Ok(settings)
}

/// Loads and caches the settings once. Later calls return the cached value.
pub fn init_settings(path: &Path) -> Result<&'static Settings> {
    if let Some(cached) = SETTINGS_CACHE.get() {
        return Ok(cached);
    }
    let settings = load_settings(path)?;
    Ok(SETTINGS_CACHE.get_or_init(|| settings))
}

/// Binds the plot feed listener and patches the actual port back into `settings`.
pub async fn bind_listener(settings: &mut Settings) -> Result<TcpListener> {
    let bind_addr = format!("{}:{}", settings.server.ip, settings.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    let actual_port = listener.local_addr()?.port();
    settings.server.port = actual_port;

    info!("listener bound with dynamic port: {}", actual_port);
    Ok(listener)
}

//! Support for library configuration options

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::event::DateWindow;

/// Part of the ProdID string that describes the organization (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static ORG_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("My organization".to_string())));

/// Part of the ProdID string that describes the product name (example of a ProdID string: `-//ABC Corporation//My Product//EN`).
/// Feel free to override it when initing this library.
pub static PRODUCT_NAME: Lazy<Arc<Mutex<String>>> = Lazy::new(|| Arc::new(Mutex::new("CalSync".to_string())));

/// Default delay between two syncs initiated by the same user
pub const DEFAULT_SYNC_COOLDOWN_SECS: u64 = 60;

/// Settings of the synchronization engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root URL of the CalDAV server. The `/.well-known/caldav` path is appended to it at discovery time
    pub server_url: String,
    /// A user cannot start a new sync before this many seconds have elapsed since their previous one
    pub sync_cooldown_secs: u64,
    /// How many days in the past the default fetch window covers
    pub window_days_before: i64,
    /// How many days in the future the default fetch window covers
    pub window_days_after: i64,
    /// How many HTTP redirects are followed during the discovery handshake
    pub max_redirects: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: String::from("http://localhost"),
            sync_cooldown_secs: DEFAULT_SYNC_COOLDOWN_SECS,
            window_days_before: 30,
            window_days_after: 365,
            max_redirects: 5,
        }
    }
}

impl SyncConfig {
    /// Create a config for a given server, using default values for everything else
    pub fn new<S: ToString>(server_url: S) -> Self {
        Self {
            server_url: server_url.to_string(),
            ..Self::default()
        }
    }

    /// Read a config from a JSON file. Missing keys take their default values
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let file = match std::fs::File::open(path) {
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            },
            Ok(file) => file,
        };
        let config = serde_json::from_reader(file)?;
        Ok(config)
    }

    pub fn cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_cooldown_secs)
    }

    /// The fetch window used when the caller does not provide one
    pub fn default_window(&self, now: DateTime<Utc>) -> DateWindow {
        DateWindow::new(
            now - Duration::days(self.window_days_before),
            now + Duration::days(self.window_days_after),
        )
    }
}

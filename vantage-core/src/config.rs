//! Persistent configuration: `auth.json` and `turn_config.json`.
//!
//! Credentials are loaded at startup; when the file is absent or
//! invalid the host prompts interactively and writes the file
//! atomically. The TURN file is optional and only shapes what
//! `GET /api/turn` hands to the browser client.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VantageError};

// ── Credentials ──────────────────────────────────────────────────

/// Contents of `auth.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    /// Six ASCII digits.
    pub pin: String,
    #[serde(rename = "signalingUrl", skip_serializing_if = "Option::is_none")]
    pub signaling_url: Option<String>,
    #[serde(rename = "hostId", skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

/// Username rule: 3–32 chars of `[A-Za-z0-9_-]`.
pub fn is_valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// PIN rule: exactly six ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 6 && pin.chars().all(|c| c.is_ascii_digit())
}

impl AuthConfig {
    pub fn new(username: String, pin: String) -> Result<Self> {
        if !is_valid_username(&username) {
            return Err(VantageError::Config(
                "username must be 3-32 characters, alphanumeric with _ or -".into(),
            ));
        }
        if !is_valid_pin(&pin) {
            return Err(VantageError::Config("pin must be exactly 6 digits".into()));
        }
        Ok(Self {
            username,
            pin,
            signaling_url: None,
            host_id: None,
        })
    }

    /// Load and validate. `Ok(None)` when the file does not exist;
    /// invalid contents are treated the same (the caller prompts).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: AuthConfig = match serde_json::from_str(&contents) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("invalid {}: {e}", path.display());
                return Ok(None);
            }
        };
        if !is_valid_username(&config.username) || !is_valid_pin(&config.pin) {
            tracing::warn!("{} holds invalid credentials", path.display());
            return Ok(None);
        }
        Ok(Some(config))
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!("credentials saved to {}", path.display());
        Ok(())
    }
}

// ── TURN configuration ───────────────────────────────────────────

/// One ICE server entry as handed to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerEntry {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnFallback {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub servers: Vec<IceServerEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetered {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "fetchUrl", default)]
    pub fetch_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnManual {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub credentials: TurnCredentials,
    #[serde(default)]
    pub servers: Vec<IceServerEntry>,
}

/// Contents of `turn_config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default)]
    pub fallback: TurnFallback,
    #[serde(default)]
    pub metered: TurnMetered,
    #[serde(default)]
    pub manual: TurnManual,
}

impl TurnConfig {
    /// `Ok(None)` when the optional file is absent.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// The JSON shape `GET /api/turn` returns:
    /// `{ fetchUrl, meteredEnabled, servers }`. Manual servers win
    /// over the fallback set; manual credentials fill entries that
    /// carry none.
    pub fn to_client_json(&self) -> serde_json::Value {
        let servers: Vec<IceServerEntry> = if self.manual.enabled {
            self.manual
                .servers
                .iter()
                .map(|s| {
                    let mut entry = s.clone();
                    if entry.username.is_none() && !self.manual.credentials.username.is_empty() {
                        entry.username = Some(self.manual.credentials.username.clone());
                        entry.credential = Some(self.manual.credentials.password.clone());
                    }
                    entry
                })
                .collect()
        } else if self.fallback.enabled {
            self.fallback.servers.clone()
        } else {
            Vec::new()
        };

        serde_json::json!({
            "fetchUrl": self.metered.fetch_url,
            "meteredEnabled": self.metered.enabled,
            "servers": servers,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

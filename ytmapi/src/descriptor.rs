//! Descripteur de connexion persistant
//!
//! Un seul descripteur est actif par processus. Il est sérialisé en JSON dans
//! le répertoire de configuration local et relu au démarrage ; un token expiré
//! trouvé au chargement est immédiatement purgé.

use std::path::PathBuf;
use std::{env, fs};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, YtmApiError};

const ENV_CONFIG_DIR: &str = "YTMREMOTE_CONFIG";
const DESCRIPTOR_FILE: &str = "connection.json";

/// Descripteur de la connexion authentifiée vers l'appareil distant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub connected: bool,
    pub token_expiry: DateTime<Utc>,
}

impl ConnectionDescriptor {
    /// Vrai si le token n'a pas encore atteint son instant d'expiration
    pub fn is_token_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.token_expiry
    }

    /// Vrai si le token expire dans la fenêtre donnée
    pub fn expires_within(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now + window >= self.token_expiry
    }

    /// Vrai si le descripteur cible cet hôte et ce port
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// Stockage durable du descripteur (un seul fichier, une seule clé)
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    path: PathBuf,
}

impl DescriptorStore {
    /// Crée un stockage dans le répertoire donné, ou dans le répertoire par
    /// défaut si la chaîne est vide
    ///
    /// Ordre de résolution : répertoire fourni, puis variable d'environnement
    /// `YTMREMOTE_CONFIG`, puis `~/.ytmremote`.
    pub fn new(directory: &str) -> Result<Self> {
        let dir = Self::find_config_dir(directory);
        fs::create_dir_all(&dir)
            .map_err(|e| YtmApiError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            path: dir.join(DESCRIPTOR_FILE),
        })
    }

    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Using config dir from env");
            return PathBuf::from(env_path);
        }

        dirs::home_dir()
            .map(|home| home.join(".ytmremote"))
            .unwrap_or_else(|| PathBuf::from(".ytmremote"))
    }

    /// Chemin du fichier de descripteur
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Relit le descripteur persisté
    ///
    /// Un fichier corrompu est supprimé ; un token expiré est purgé et
    /// `None` est retourné.
    pub fn load(&self) -> Option<ConnectionDescriptor> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let descriptor: ConnectionDescriptor = match serde_json::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to parse stored connection, discarding: {e}");
                let _ = fs::remove_file(&self.path);
                return None;
            }
        };

        if !descriptor.is_token_valid(Utc::now()) {
            warn!("Stored token is expired, clearing connection");
            let _ = fs::remove_file(&self.path);
            return None;
        }

        debug!(host = %descriptor.host, port = descriptor.port, "Restored connection descriptor");
        Some(descriptor)
    }

    /// Persiste le descripteur
    pub fn save(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        let json = serde_json::to_string_pretty(descriptor)?;
        fs::write(&self.path, json)
            .map_err(|e| YtmApiError::Storage(format!("cannot write {}: {e}", self.path.display())))
    }

    /// Supprime le descripteur persisté (idempotent)
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(YtmApiError::Storage(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(expiry: DateTime<Utc>) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "127.0.0.1".to_string(),
            port: 9863,
            token: "secret".to_string(),
            connected: false,
            token_expiry: expiry,
        }
    }

    #[test]
    fn save_and_load_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DescriptorStore::new(dir.path().to_str().unwrap())?;

        let d = descriptor(Utc::now() + TimeDelta::hours(24));
        store.save(&d)?;

        let restored = store.load().expect("descriptor restored");
        assert_eq!(restored, d);
        Ok(())
    }

    #[test]
    fn expired_descriptor_is_purged_at_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DescriptorStore::new(dir.path().to_str().unwrap())?;

        store.save(&descriptor(Utc::now() - TimeDelta::minutes(1)))?;
        assert!(store.load().is_none());
        assert!(!store.path().exists());
        Ok(())
    }

    #[test]
    fn clear_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
        store.clear()?;
        store.clear()?;
        Ok(())
    }

    #[test]
    fn expiry_window_check() {
        let now = Utc::now();
        let d = descriptor(now + TimeDelta::minutes(30));
        assert!(d.is_token_valid(now));
        assert!(d.expires_within(now, TimeDelta::hours(1)));
        assert!(!d.expires_within(now, TimeDelta::minutes(5)));
    }

    #[test]
    fn matches_host_and_port() {
        let d = descriptor(Utc::now());
        assert!(d.matches("127.0.0.1", 9863));
        assert!(!d.matches("127.0.0.1", 9999));
        assert!(!d.matches("192.168.1.10", 9863));
    }
}

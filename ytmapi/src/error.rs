//! Gestion des erreurs pour le client YTM Desktop

use thiserror::Error;

/// Type Result personnalisé pour ytmapi
pub type Result<T> = std::result::Result<T, YtmApiError>;

/// Erreurs possibles lors de l'utilisation du client YTM Desktop
#[derive(Error, Debug)]
pub enum YtmApiError {
    /// L'appareil distant n'est pas joignable (pré-vérification échouée)
    #[error(
        "YouTube Music Desktop is not running or not accessible at {host}:{port}. \
         Ensure it is running with the Companion Server enabled"
    )]
    DeviceUnreachable { host: String, port: u16 },

    /// Aucun token détenu pour une requête authentifiée
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Credential invalide ou expiré (401/403)
    #[error("Authentication failed. Please reconnect to YouTube Music Desktop")]
    AuthenticationExpired,

    /// L'utilisateur n'a pas approuvé la connexion dans le délai imparti
    #[error("Connection request was not approved within 30 seconds")]
    ApprovalTimeout,

    /// Échec après épuisement des retries sur erreur transitoire
    #[error("Request failed after {attempts} attempts: {message}")]
    RequestFailed { attempts: u32, message: String },

    /// App ID invalide (doit être alphanumérique minuscule, 2 à 32 caractères)
    #[error("Invalid app id '{0}': must be lowercase alphanumeric, 2-32 characters")]
    InvalidAppId(String),

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur WebSocket
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Erreur de persistance du descripteur de connexion
    #[error("Connection storage error: {0}")]
    Storage(String),
}

impl YtmApiError {
    /// Vérifie si l'erreur est une erreur de credentials
    ///
    /// Ces erreurs nécessitent une action de l'utilisateur (ré-authentification)
    /// et ne doivent jamais être retentées au niveau transport.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            YtmApiError::NotAuthenticated | YtmApiError::AuthenticationExpired
        )
    }

    /// Vérifie si l'erreur correspond à du rate limiting côté serveur
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, YtmApiError::RequestFailed { message, .. } if message.contains("429"))
    }
}

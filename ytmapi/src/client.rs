//! Client HTTP pour l'API Companion de YTM Desktop
//!
//! Ce module fournit les échanges requête/réponse authentifiés : demande de
//! code d'approbation, échange de token, état du lecteur, playlists et envoi
//! de commandes de transport. Les échecs transitoires (5xx, erreur réseau)
//! sont retentés avec un délai linéaire borné ; un 401/403 purge le
//! descripteur immédiatement car le credential lui-même est invalide.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Method, StatusCode, header::AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::descriptor::{ConnectionDescriptor, DescriptorStore};
use crate::error::{Result, YtmApiError};
use crate::models::{
    AuthCodeResponse, CommandRequest, PlayerState, PlaylistSummary, TokenRequest, TokenResponse,
};
use crate::realtime::{ChannelHandle, DisconnectReason};

/// Hôte par défaut de YTM Desktop
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Port par défaut du Companion Server
pub const DEFAULT_PORT: u16 = 9863;

/// Durée de vie fixe des tokens YTM Desktop (non négociée)
const TOKEN_LIFETIME_HOURS: i64 = 24;
/// Nombre maximum de retries sur erreur transitoire
const MAX_RETRIES: u32 = 3;
/// Délai de base entre deux retries (multiplié par l'index de tentative)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
/// Timeout de chaque requête HTTP
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout de la pré-vérification de joignabilité
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Identité applicative présentée lors de la demande de code d'approbation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    /// Alphanumérique minuscule, 2 à 32 caractères
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
}

impl AppIdentity {
    pub fn new(app_id: &str, app_name: &str, app_version: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) store: DescriptorStore,
    pub(crate) descriptor: Mutex<Option<ConnectionDescriptor>>,
    pub(crate) channel: Mutex<Option<ChannelHandle>>,
    pub(crate) health: Mutex<Option<JoinHandle<()>>>,
}

/// Client de session vers l'appareil YTM Desktop
///
/// Clonable à faible coût ; toutes les copies partagent le même descripteur
/// de connexion, le même canal temps réel et le même audit de santé.
#[derive(Clone)]
pub struct YtmClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl YtmClient {
    /// Crée un client et restaure le descripteur persisté s'il existe
    pub fn new(store: DescriptorStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let descriptor = store.load();
        if descriptor.is_some() {
            info!("Restored connection descriptor from storage");
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                store,
                descriptor: Mutex::new(descriptor),
                channel: Mutex::new(None),
                health: Mutex::new(None),
            }),
        })
    }

    /// L'API Companion est toujours servie en HTTP, quel que soit le schéma
    /// de la page hôte
    pub(crate) fn base_url(host: &str, port: u16) -> String {
        format!("http://{host}:{port}/api/v1")
    }

    // ============ Accès au descripteur ============

    /// Copie du descripteur de connexion courant
    pub fn current_connection(&self) -> Option<ConnectionDescriptor> {
        self.inner.descriptor.lock().unwrap().clone()
    }

    /// Remplace le descripteur courant et le persiste
    pub fn set_connection(&self, descriptor: ConnectionDescriptor) -> Result<()> {
        self.inner.store.save(&descriptor)?;
        *self.inner.descriptor.lock().unwrap() = Some(descriptor);
        Ok(())
    }

    /// Vrai si un token est détenu et n'est pas expiré
    pub fn is_token_valid(&self) -> bool {
        self.inner
            .descriptor
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|d| d.is_token_valid(Utc::now()))
    }

    /// Instant d'expiration du token courant
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.inner
            .descriptor
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.token_expiry)
    }

    /// Met à jour le drapeau `connected` du descripteur et le persiste
    pub(crate) fn set_connected(&self, connected: bool) {
        let mut guard = self.inner.descriptor.lock().unwrap();
        if let Some(d) = guard.as_mut() {
            d.connected = connected;
            if let Err(e) = self.inner.store.save(d) {
                warn!("Failed to persist connection flag: {e}");
            }
        }
    }

    /// Purge complète : descripteur, stockage, canal temps réel et audit
    ///
    /// Idempotent. Les timers qui se déclencheraient après cet appel ne
    /// trouvent plus de descripteur et deviennent des no-ops.
    pub fn clear_connection(&self) {
        debug!("Clearing connection descriptor");
        *self.inner.descriptor.lock().unwrap() = None;
        if let Err(e) = self.inner.store.clear() {
            warn!("Failed to clear stored connection: {e}");
        }
        self.shutdown_channel(DisconnectReason::ClientInitiated);
        if let Some(handle) = self.inner.health.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Ferme le canal temps réel et marque le descripteur déconnecté
    ///
    /// Le token est conservé : une reconnexion explicite reste possible.
    pub fn disconnect(&self) {
        self.shutdown_channel(DisconnectReason::ClientInitiated);
        self.set_connected(false);
    }

    /// Extrait (hôte, port, token) pour une requête authentifiée
    ///
    /// Un token expiré est purgé avant que la requête ne parte : il n'est
    /// jamais attaché à un échange sortant.
    pub(crate) fn connection_for_request(&self) -> Result<(String, u16, String)> {
        let expired = {
            let guard = self.inner.descriptor.lock().unwrap();
            match guard.as_ref() {
                None => return Err(YtmApiError::NotAuthenticated),
                Some(d) if !d.is_token_valid(Utc::now()) => true,
                Some(d) => {
                    return Ok((d.host.clone(), d.port, d.token.clone()));
                }
            }
        };
        if expired {
            warn!("Token is past its expiry, clearing connection");
            self.clear_connection();
        }
        Err(YtmApiError::NotAuthenticated)
    }

    fn held_token(&self) -> Option<String> {
        self.inner
            .descriptor
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.token.clone())
    }

    // ============ Requêtes ============

    /// Pré-vérification de joignabilité (HEAD sur `/state`)
    ///
    /// Toute réponse HTTP vaut succès ; seule une erreur de transport signale
    /// un appareil injoignable.
    pub async fn probe(&self, host: &str, port: u16) -> Result<()> {
        let url = format!("{}/state", Self::base_url(host, port));
        match self.inner.http.head(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("Reachability probe failed for {host}:{port}: {e}");
                Err(YtmApiError::DeviceUnreachable {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }

    /// Effectue une requête à l'API avec retry borné
    ///
    /// Retourne `Ok(None)` pour un corps vide (réponse no-content valide
    /// pour les commandes).
    pub(crate) async fn request_json(
        &self,
        method: Method,
        host: &str,
        port: u16,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", Self::base_url(host, port), endpoint);
        let token = self.held_token();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!("{method} {url} (attempt {attempt})");

            let mut request = self.inner.http.request(method.clone(), &url);
            if let Some(ref t) = token {
                request = request.header(AUTHORIZATION, t);
            }
            if let Some(ref b) = body {
                request = request.json(b);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        warn!("Token may have expired (HTTP {status}), clearing connection");
                        self.clear_connection();
                        return Err(YtmApiError::AuthenticationExpired);
                    }

                    if status.is_server_error() && attempt <= MAX_RETRIES {
                        warn!("Server error {status}, retrying ({attempt}/{MAX_RETRIES})");
                        sleep(RETRY_BASE_DELAY * attempt).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(YtmApiError::RequestFailed {
                            attempts: attempt,
                            message: format!("HTTP {status}"),
                        });
                    }

                    let text = response.text().await?;
                    if text.trim().is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(serde_json::from_str(&text)?));
                }
                Err(e) if attempt <= MAX_RETRIES => {
                    warn!("Network error, retrying ({attempt}/{MAX_RETRIES}): {e}");
                    sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => {
                    return Err(YtmApiError::RequestFailed {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    // ============ Authentification ============

    /// Demande un code d'approbation à l'appareil distant
    pub async fn request_auth_code(
        &self,
        identity: &AppIdentity,
        host: &str,
        port: u16,
    ) -> Result<String> {
        validate_app_id(&identity.app_id)?;
        info!("Requesting auth code from {host}:{port}");

        let body = serde_json::to_value(identity)?;
        let value = self
            .request_json(Method::POST, host, port, "/auth/requestcode", Some(body))
            .await?
            .ok_or_else(|| YtmApiError::RequestFailed {
                attempts: 1,
                message: "empty auth code response".to_string(),
            })?;

        let response: AuthCodeResponse = serde_json::from_value(value)?;
        Ok(response.code)
    }

    /// Échange le code approuvé contre un token
    ///
    /// En cas de succès, fixe l'expiration à maintenant + 24 h (durée de vie
    /// fixe des tokens YTM Desktop) et persiste le descripteur.
    pub async fn exchange_token(
        &self,
        app_id: &str,
        code: &str,
        host: &str,
        port: u16,
    ) -> Result<String> {
        let body = serde_json::to_value(TokenRequest {
            app_id: app_id.to_string(),
            code: code.to_string(),
        })?;

        let value = self
            .request_json(Method::POST, host, port, "/auth/request", Some(body))
            .await?
            .ok_or_else(|| YtmApiError::RequestFailed {
                attempts: 1,
                message: "empty token response".to_string(),
            })?;

        let response: TokenResponse = serde_json::from_value(value)?;
        let token_expiry = Utc::now() + TimeDelta::hours(TOKEN_LIFETIME_HOURS);

        self.set_connection(ConnectionDescriptor {
            host: host.to_string(),
            port,
            token: response.token.clone(),
            connected: false,
            token_expiry,
        })?;

        info!("Token received, expires at {token_expiry}");
        Ok(response.token)
    }

    // ============ Appels authentifiés ============

    /// Récupère l'instantané d'état du lecteur
    pub async fn get_player_state(&self) -> Result<PlayerState> {
        let (host, port, _) = self.connection_for_request()?;
        let value = self
            .request_json(Method::GET, &host, port, "/state", None)
            .await?
            .ok_or_else(|| YtmApiError::RequestFailed {
                attempts: 1,
                message: "empty state response".to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Récupère la liste des playlists de l'utilisateur
    pub async fn get_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let (host, port, _) = self.connection_for_request()?;
        let value = self
            .request_json(Method::GET, &host, port, "/playlists", None)
            .await?
            .ok_or_else(|| YtmApiError::RequestFailed {
                attempts: 1,
                message: "empty playlists response".to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Envoie une commande de transport
    ///
    /// Un corps de réponse vide est un résultat no-content valide.
    pub async fn send_command(&self, command: &str, data: Option<Value>) -> Result<()> {
        let (host, port, _) = self.connection_for_request()?;
        let body = serde_json::to_value(CommandRequest {
            command: command.to_string(),
            data,
        })?;
        self.request_json(Method::POST, &host, port, "/command", Some(body))
            .await?;
        Ok(())
    }
}

/// Valide la contrainte de forme de l'app id
pub(crate) fn validate_app_id(app_id: &str) -> Result<()> {
    let len = app_id.chars().count();
    let well_formed = (2..=32).contains(&len)
        && app_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if well_formed {
        Ok(())
    } else {
        Err(YtmApiError::InvalidAppId(app_id.to_string()))
    }
}

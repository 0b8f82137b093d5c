//! Canal temps réel vers YTM Desktop
//!
//! Connexion WebSocket persistante sur laquelle l'appareil pousse des
//! instantanés d'état non sollicités. Le cycle de vie est une machine à états
//! explicite :
//!
//! `Disconnected → Connecting → Connected → (Disconnected | Reconnecting)
//!  → Connected | Exhausted`
//!
//! La reconnexion applique un backoff exponentiel plafonné (1 s · 2^(n−1),
//! max 10 s, 5 tentatives). Avant chaque rattachement, le token est revalidé
//! par une requête d'état : un token invalide purge la connexion au lieu
//! d'être retenté indéfiniment au niveau transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::client::YtmClient;
use crate::error::Result;
use crate::models::{PlayerState, RealtimeMessage};

/// Délai initial de reconnexion
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Plafond du délai entre deux tentatives
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(10);
/// Plafond de tentatives avant abandon
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Raison d'une déconnexion du canal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Fermeture initiée par le serveur (close frame)
    ServerClosed,
    /// Chute du transport (erreur réseau, flux interrompu)
    TransportError,
    /// Fermeture demandée par le client (disconnect, clear)
    ClientInitiated,
}

impl DisconnectReason {
    /// Les déconnexions côté serveur ou transport déclenchent la
    /// reconnexion automatique ; une fermeture client laisse le canal
    /// inactif en attente d'une reconnexion explicite.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DisconnectReason::ClientInitiated)
    }
}

/// Événement remonté au propriétaire du canal
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Canal établi (le compteur de reconnexion est remis à zéro)
    Connected,
    /// Canal perdu ou fermé après avoir été établi
    Disconnected { reason: DisconnectReason },
    /// La tentative d'attache a échoué avant l'établissement du canal
    ConnectError,
    /// Instantané d'état complet poussé par l'appareil
    StateUpdate(Box<PlayerState>),
    /// Toutes les tentatives de reconnexion ont échoué
    ReconnectExhausted,
}

/// État observable du canal temps réel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Exhausted,
}

/// Délai de backoff pour la n-ième tentative (1-indexée) : 1, 2, 4, 8, 10 s
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BASE_RECONNECT_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    exponential.min(MAX_RECONNECT_DELAY)
}

pub(crate) struct ChannelShared {
    closed: AtomicBool,
    state: Mutex<ChannelState>,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            state: Mutex::new(ChannelState::Disconnected),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }
}

/// Poignée sur le canal actif, détenue par le client
pub(crate) struct ChannelHandle {
    shared: Arc<ChannelShared>,
    task: JoinHandle<()>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
}

impl ChannelHandle {
    /// Arrêt synchrone : marque le canal fermé, annule la tâche de
    /// supervision et notifie le propriétaire
    fn shutdown(self, reason: DisconnectReason) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.set_state(ChannelState::Disconnected);
        self.task.abort();
        let _ = self.events.send(RealtimeEvent::Disconnected { reason });
    }
}

impl YtmClient {
    /// Ouvre le canal temps réel authentifié
    ///
    /// Les événements (connexion, déconnexion, instantanés, abandon) sont
    /// envoyés sur `events`. Établir un nouveau canal invalide le précédent.
    /// Échoue avec `NotAuthenticated` si aucun token valide n'est détenu.
    pub fn connect_realtime(&self, events: mpsc::UnboundedSender<RealtimeEvent>) -> Result<()> {
        self.connection_for_request()?;
        self.shutdown_channel(DisconnectReason::ClientInitiated);

        let shared = Arc::new(ChannelShared::new());
        shared.set_state(ChannelState::Connecting);
        let task = tokio::spawn(run_channel(self.clone(), shared.clone(), events.clone()));

        *self.inner.channel.lock().unwrap() = Some(ChannelHandle {
            shared,
            task,
            events,
        });
        Ok(())
    }

    /// État courant du canal (`Disconnected` si aucun canal n'est ouvert)
    pub fn channel_state(&self) -> ChannelState {
        self.inner
            .channel
            .lock()
            .unwrap()
            .as_ref()
            .map_or(ChannelState::Disconnected, |h| h.shared.state())
    }

    /// Vrai si le canal temps réel est actuellement établi
    pub fn is_channel_connected(&self) -> bool {
        self.channel_state() == ChannelState::Connected
    }

    /// Ferme le canal courant s'il existe (idempotent)
    pub(crate) fn shutdown_channel(&self, reason: DisconnectReason) {
        if let Some(handle) = self.inner.channel.lock().unwrap().take() {
            handle.shutdown(reason);
        }
    }
}

/// Boucle de supervision : connexion, lecture, reconnexion à backoff
async fn run_channel(
    client: YtmClient,
    shared: Arc<ChannelShared>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
) {
    let mut attempts: u32 = 0;

    loop {
        let (host, port, token) = match client.connection_for_request() {
            Ok(c) => c,
            Err(e) => {
                debug!("Realtime channel has no usable credential: {e}");
                shared.set_state(ChannelState::Disconnected);
                return;
            }
        };
        let url = format!("ws://{host}:{port}/api/v1/realtime?token={token}");

        let (established, reason) = run_connected(&client, &shared, &events, &url, &mut attempts).await;

        if shared.is_closed() {
            shared.set_state(ChannelState::Disconnected);
            return;
        }

        if established {
            client.set_connected(false);
            let _ = events.send(RealtimeEvent::Disconnected { reason });
        } else {
            let _ = events.send(RealtimeEvent::ConnectError);
        }

        if !reason.is_recoverable() {
            shared.set_state(ChannelState::Disconnected);
            return;
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            error!("All reconnection attempts failed");
            shared.set_state(ChannelState::Exhausted);
            let _ = events.send(RealtimeEvent::ReconnectExhausted);
            return;
        }

        shared.set_state(ChannelState::Reconnecting);
        let delay = backoff_delay(attempts);
        info!(
            "Reconnecting realtime channel in {:?} ({attempts}/{MAX_RECONNECT_ATTEMPTS})",
            delay
        );
        sleep(delay).await;

        if shared.is_closed() {
            return;
        }

        // Revalider le token avant de rattacher le canal : un credential
        // invalide ne doit pas être retenté au niveau transport.
        if let Err(e) = client.get_player_state().await {
            warn!("Token invalid during reconnect, clearing connection: {e}");
            client.clear_connection();
            return;
        }
    }
}

/// Une session de connexion : handshake, demande d'instantané, boucle de
/// lecture. Retourne (canal établi, raison de la fin).
async fn run_connected(
    client: &YtmClient,
    shared: &ChannelShared,
    events: &mpsc::UnboundedSender<RealtimeEvent>,
    url: &str,
    attempts: &mut u32,
) -> (bool, DisconnectReason) {
    let (ws, _) = match connect_async(url).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Realtime connection error: {e}");
            return (false, DisconnectReason::TransportError);
        }
    };

    shared.set_state(ChannelState::Connected);
    *attempts = 0;
    client.set_connected(true);
    let _ = events.send(RealtimeEvent::Connected);
    debug!("Realtime channel connected");

    let (mut tx, mut rx) = ws.split();

    // Demander un push d'état immédiat
    match serde_json::to_string(&RealtimeMessage::GetState) {
        Ok(msg) => {
            if let Err(e) = tx.send(Message::Text(msg)).await {
                warn!("Failed to request initial state: {e}");
                return (true, DisconnectReason::TransportError);
            }
        }
        Err(e) => warn!("Failed to encode get-state request: {e}"),
    }

    while let Some(frame) = rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeMessage>(&text) {
                Ok(RealtimeMessage::StateUpdate(state)) => {
                    let _ = events.send(RealtimeEvent::StateUpdate(state));
                }
                Ok(RealtimeMessage::GetState) => {}
                Err(e) => warn!("Unparseable realtime message: {e}"),
            },
            Ok(Message::Ping(payload)) => {
                let _ = tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => {
                info!("Realtime channel closed by server");
                return (true, DisconnectReason::ServerClosed);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Error receiving realtime frame: {e}");
                return (true, DisconnectReason::TransportError);
            }
        }
    }

    (true, DisconnectReason::TransportError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_capped_exponential() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(10));
    }

    #[test]
    fn only_client_initiated_is_unrecoverable() {
        assert!(DisconnectReason::ServerClosed.is_recoverable());
        assert!(DisconnectReason::TransportError.is_recoverable());
        assert!(!DisconnectReason::ClientInitiated.is_recoverable());
    }
}

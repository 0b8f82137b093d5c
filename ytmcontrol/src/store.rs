//! Magasin d'état de lecture
//!
//! Le magasin orchestre le cycle de vie connexion/déconnexion au-dessus du
//! client de session, détient l'instantané d'état faisant autorité et la
//! liste des playlists dans des conteneurs observables, et relaie les
//! commandes utilisateur. L'instantané est remplacé en bloc à chaque push
//! temps réel, jamais fusionné.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use ytmapi::realtime::RealtimeEvent;
use ytmapi::{
    AppIdentity, PlayerState, PlaylistSummary, YtmApiError, YtmClient, DEFAULT_HOST, DEFAULT_PORT,
};

use crate::adapter::{self, Track};
use crate::errors::StoreError;
use crate::search::{SearchClient, SearchResponse, DEFAULT_SEARCH_LIMIT};

/// Identifiant applicatif présenté à YTM Desktop (alphanumérique minuscule)
const APP_ID: &str = "ytmremote";
const APP_NAME: &str = "YTM Remote";

/// Réglages de la procédure de connexion
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Intervalle entre deux tentatives d'échange de token pendant
    /// l'approbation
    pub approval_poll_interval: Duration,
    /// Nombre de tentatives d'échange avant abandon
    pub approval_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            approval_poll_interval: Duration::from_secs(5),
            approval_attempts: 6,
        }
    }
}

/// Chemin par lequel la connexion a été obtenue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Descripteur persisté réutilisé sans nouvelle approbation
    ReusedDescriptor,
    /// Flux complet code → approbation → token
    FreshApproval,
}

struct StoreInner {
    client: YtmClient,
    search: Option<SearchClient>,
    options: StoreOptions,
    state: watch::Sender<Option<PlayerState>>,
    playlists: watch::Sender<Vec<PlaylistSummary>>,
    connected: watch::Sender<bool>,
    error: Mutex<Option<String>>,
    connecting: AtomicBool,
    loading_initial_data: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Magasin observable de l'état de lecture distant
///
/// Clonable à faible coût ; toutes les copies partagent le même état.
#[derive(Clone)]
pub struct PlaybackStore {
    inner: Arc<StoreInner>,
}

impl PlaybackStore {
    pub fn new(client: YtmClient) -> Self {
        Self::with_options(client, StoreOptions::default())
    }

    pub fn with_options(client: YtmClient, options: StoreOptions) -> Self {
        let connected = client
            .current_connection()
            .map(|d| d.connected)
            .unwrap_or(false);

        Self {
            inner: Arc::new(StoreInner {
                client,
                search: None,
                options,
                state: watch::Sender::new(None),
                playlists: watch::Sender::new(Vec::new()),
                connected: watch::Sender::new(connected),
                error: Mutex::new(None),
                connecting: AtomicBool::new(false),
                loading_initial_data: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Attache le collaborateur de recherche
    pub fn with_search(mut self, search: SearchClient) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_search must be called before the store is shared")
            .search = Some(search);
        self
    }

    // ============ Lectures ============

    /// Instantané d'état courant (copie)
    pub fn state(&self) -> Option<PlayerState> {
        self.inner.state.borrow().clone()
    }

    /// Abonnement aux remplacements d'instantané
    pub fn subscribe_state(&self) -> watch::Receiver<Option<PlayerState>> {
        self.inner.state.subscribe()
    }

    pub fn playlists(&self) -> Vec<PlaylistSummary> {
        self.inner.playlists.borrow().clone()
    }

    pub fn subscribe_playlists(&self) -> watch::Receiver<Vec<PlaylistSummary>> {
        self.inner.playlists.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    /// Dernière erreur visible pour l'utilisateur
    pub fn last_error(&self) -> Option<String> {
        self.inner.error.lock().unwrap().clone()
    }

    /// Piste en cours de lecture, adaptée au domaine
    pub fn current_track(&self) -> Option<Track> {
        self.inner
            .state
            .borrow()
            .as_ref()
            .and_then(|s| s.video.as_ref())
            .map(adapter::track_from_video)
    }

    pub fn is_playing(&self) -> bool {
        self.inner
            .state
            .borrow()
            .as_ref()
            .is_some_and(PlayerState::is_playing)
    }

    /// Volume faisant autorité (0–100)
    pub fn volume(&self) -> f64 {
        self.inner
            .state
            .borrow()
            .as_ref()
            .map_or(0.0, |s| s.player.volume)
    }

    /// Progression de lecture en secondes
    pub fn progress(&self) -> f64 {
        self.inner
            .state
            .borrow()
            .as_ref()
            .map_or(0.0, |s| s.player.video_progress)
    }

    /// Mode de répétition faisant autorité
    pub fn repeat_mode(&self) -> i32 {
        self.inner
            .state
            .borrow()
            .as_ref()
            .map_or(ytmapi::REPEAT_NONE, PlayerState::repeat_mode)
    }

    /// File d'attente adaptée au domaine
    pub fn queue(&self) -> Vec<Track> {
        self.inner
            .state
            .borrow()
            .as_ref()
            .and_then(|s| s.player.queue.as_ref())
            .map(|q| q.items.iter().map(adapter::track_from_queue_item).collect())
            .unwrap_or_default()
    }

    /// Index sélectionné dans la file
    pub fn queue_index(&self) -> Option<usize> {
        self.inner
            .state
            .borrow()
            .as_ref()
            .and_then(|s| s.player.queue.as_ref())
            .and_then(|q| usize::try_from(q.selected_item_index).ok())
    }

    /// Client de session sous-jacent
    pub fn client(&self) -> &YtmClient {
        &self.inner.client
    }

    // ============ Cycle de vie ============

    /// Procédure de connexion complète vers `host:port`
    ///
    /// 1. Sonde de joignabilité (échec rapide si l'appareil est absent)
    /// 2. Réutilisation du descripteur persisté s'il cible le même appareil
    ///    et que son token est encore valide
    /// 3. Sinon, flux code d'approbation → échange de token par scrutation
    /// 4. Ouverture du canal temps réel et chargement des playlists
    ///
    /// Une seule procédure peut être en vol : les appels concurrents
    /// échouent avec [`StoreError::ConnectInProgress`].
    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectOutcome, StoreError> {
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StoreError::ConnectInProgress);
        }
        self.set_error(None);

        let outcome = self.run_connect(host, port).await;
        self.inner.connecting.store(false, Ordering::SeqCst);

        match &outcome {
            Ok(o) => info!("Connected to {host}:{port} ({o:?})"),
            Err(e) => {
                error!("Connection to {host}:{port} failed: {e}");
                self.set_error(Some(e.to_string()));
            }
        }
        outcome
    }

    async fn run_connect(&self, host: &str, port: u16) -> Result<ConnectOutcome, StoreError> {
        let client = &self.inner.client;

        debug!("Probing {host}:{port} for reachability");
        client.probe(host, port).await?;

        // Réutilisation du descripteur persisté : une requête d'état sert de
        // sonde de vitalité du token
        match client.current_connection() {
            Some(d) if d.matches(host, port) && client.is_token_valid() => {
                debug!("Reusing stored descriptor, verifying token");
                match client.get_player_state().await {
                    Ok(state) => {
                        self.inner.state.send_replace(Some(state));
                        self.establish()?;
                        return Ok(ConnectOutcome::ReusedDescriptor);
                    }
                    Err(e) => {
                        warn!("Stored token rejected, starting fresh auth flow: {e}");
                        client.clear_connection();
                    }
                }
            }
            Some(_) => {
                warn!("Stored descriptor targets another device or is expired, clearing");
                client.clear_connection();
            }
            None => {}
        }

        let identity = AppIdentity::new(APP_ID, APP_NAME, env!("CARGO_PKG_VERSION"));
        let code = client.request_auth_code(&identity, host, port).await?;
        info!("Auth code {code} issued, waiting for approval on the device");

        let attempts = self.inner.options.approval_attempts;
        let mut approved = false;
        for attempt in 1..=attempts {
            sleep(self.inner.options.approval_poll_interval).await;
            match client.exchange_token(APP_ID, &code, host, port).await {
                Ok(_) => {
                    approved = true;
                    break;
                }
                Err(e) if attempt < attempts => {
                    debug!("Token exchange not approved yet ({attempt}/{attempts}): {e}");
                }
                Err(e) => {
                    warn!("Approval window elapsed: {e}");
                }
            }
        }
        if !approved {
            return Err(StoreError::Api(YtmApiError::ApprovalTimeout));
        }

        self.establish()?;
        Ok(ConnectOutcome::FreshApproval)
    }

    /// Ouvre le canal temps réel, démarre l'audit de santé et charge les
    /// playlists
    fn establish(&self) -> Result<(), StoreError> {
        self.inner.connected.send_replace(true);
        self.set_error(None);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.client.connect_realtime(tx)?;
        self.inner.client.spawn_health_audit();

        let store = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                store.apply_event(event);
            }
        });
        if let Some(previous) = self.inner.pump.lock().unwrap().replace(pump) {
            previous.abort();
        }

        let store = self.clone();
        tokio::spawn(async move { store.load_initial_data().await });
        Ok(())
    }

    /// Applique un événement du canal temps réel
    pub fn apply_event(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Connected => {
                self.inner.connected.send_replace(true);
                self.set_error(None);
                // Un `connect` répété ne doit pas relancer un chargement déjà
                // fait ou en cours
                if !self.inner.loading_initial_data.load(Ordering::SeqCst)
                    && self.inner.playlists.borrow().is_empty()
                {
                    let store = self.clone();
                    tokio::spawn(async move { store.load_initial_data().await });
                }
            }
            RealtimeEvent::StateUpdate(state) => {
                // Remplacement intégral de l'instantané
                self.inner.state.send_replace(Some(*state));
            }
            RealtimeEvent::Disconnected { reason } => {
                self.inner.connected.send_replace(false);
                if reason.is_recoverable() {
                    self.set_error(Some("Lost connection to YouTube Music Desktop".to_string()));
                }
            }
            RealtimeEvent::ConnectError => {
                // Le canal n'a jamais été établi : la session REST reste
                // dans son état courant, seul un message est exposé
                self.set_error(Some(
                    "Unable to open the realtime channel to YouTube Music Desktop".to_string(),
                ));
            }
            RealtimeEvent::ReconnectExhausted => {
                self.inner.connected.send_replace(false);
                self.set_error(Some(
                    "Gave up reconnecting to YouTube Music Desktop".to_string(),
                ));
            }
        }
    }

    /// Charge les playlists (dédupliqué contre les chargements concurrents)
    async fn load_initial_data(&self) {
        if self
            .inner
            .loading_initial_data
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        match self.inner.client.get_playlists().await {
            Ok(playlists) => {
                debug!("Loaded {} playlists", playlists.len());
                self.inner.playlists.send_replace(playlists);
            }
            Err(e) if e.is_rate_limit() => {
                warn!("Rate limited while loading playlists, will retry later");
            }
            Err(e) => {
                error!("Failed to load playlists: {e}");
                self.set_error(Some(e.to_string()));
            }
        }

        self.inner.loading_initial_data.store(false, Ordering::SeqCst);
    }

    /// Ferme le canal temps réel mais conserve le token
    pub fn disconnect(&self) {
        self.inner.client.disconnect();
        self.reset_observable_state();
    }

    /// Purge complète : descripteur, canal, état observable
    pub fn reset_connection(&self) {
        self.inner.client.clear_connection();
        self.reset_observable_state();
        self.inner.connecting.store(false, Ordering::SeqCst);
        self.set_error(None);
    }

    /// Purge puis reconnexion vers l'appareil par défaut
    pub async fn force_reconnect(&self) -> Result<ConnectOutcome, StoreError> {
        self.reset_connection();
        self.connect(DEFAULT_HOST, DEFAULT_PORT).await
    }

    fn reset_observable_state(&self) {
        self.inner.connected.send_replace(false);
        self.inner.state.send_replace(None);
        self.inner.playlists.send_replace(Vec::new());
        self.inner.loading_initial_data.store(false, Ordering::SeqCst);
        if let Some(pump) = self.inner.pump.lock().unwrap().take() {
            pump.abort();
        }
    }

    fn set_error(&self, error: Option<String>) {
        *self.inner.error.lock().unwrap() = error;
    }

    // ============ Commandes ============

    /// Relaye une commande de transport
    ///
    /// No-op silencieux hors connexion : les commandes ne sont pas mises en
    /// file pour une livraison ultérieure. Un échec d'envoi est journalisé
    /// mais jamais remonté, l'état faisant autorité arrivant par le canal
    /// temps réel.
    pub async fn dispatch(&self, command: &str, data: Option<Value>) {
        if !self.is_connected() {
            debug!("Ignoring command {command:?} while disconnected");
            return;
        }
        if let Err(e) = self.inner.client.send_command(command, data).await {
            warn!("Command {command:?} failed: {e}");
        }
    }

    pub async fn play(&self) {
        self.dispatch("playPause", None).await;
    }

    pub async fn pause(&self) {
        self.dispatch("playPause", None).await;
    }

    pub async fn toggle_play_pause(&self) {
        self.dispatch("playPause", None).await;
    }

    pub async fn next(&self) {
        self.dispatch("next", None).await;
    }

    pub async fn previous(&self) {
        self.dispatch("previous", None).await;
    }

    pub async fn set_volume(&self, volume: f64) {
        self.dispatch("setVolume", Some(json!(volume))).await;
    }

    pub async fn volume_up(&self) {
        self.dispatch("volumeUp", None).await;
    }

    pub async fn volume_down(&self) {
        self.dispatch("volumeDown", None).await;
    }

    pub async fn mute(&self) {
        self.dispatch("mute", None).await;
    }

    pub async fn unmute(&self) {
        self.dispatch("unmute", None).await;
    }

    /// Positionne la lecture en secondes
    pub async fn seek(&self, position: f64) {
        self.dispatch("seekTo", Some(json!(position))).await;
    }

    pub async fn play_track_at_index(&self, index: usize) {
        self.dispatch("playQueueIndex", Some(json!(index))).await;
    }

    pub async fn like_track(&self) {
        self.dispatch("toggleLike", None).await;
    }

    pub async fn load_playlist(&self, playlist_id: &str) {
        self.dispatch("changeVideo", Some(json!({ "playlistId": playlist_id })))
            .await;
    }

    pub async fn play_video_by_id(&self, video_id: &str) {
        self.dispatch("changeVideo", Some(json!({ "videoId": video_id })))
            .await;
    }

    pub async fn add_video_to_queue(&self, video_id: &str, position: Option<usize>) {
        let data = match position {
            Some(p) => json!({ "videoId": video_id, "position": p }),
            None => json!({ "videoId": video_id }),
        };
        self.dispatch("addSongToQueue", Some(data)).await;
    }

    pub async fn toggle_shuffle(&self) {
        self.dispatch("shuffle", None).await;
    }

    /// Passe au mode de répétition suivant
    ///
    /// L'API distante prend le mode cible, pas un pas relatif : le cycle
    /// 0 → 1 → 2 → 0 est calculé localement sur l'instantané courant.
    pub async fn toggle_repeat(&self) {
        let next = next_repeat_mode(self.repeat_mode());
        self.dispatch("repeatMode", Some(json!(next))).await;
    }

    // ============ Recherche ============

    /// Recherche passthrough vers le collaborateur externe
    ///
    /// `None` si aucun client de recherche n'est attaché ou si la recherche
    /// échoue : la recherche est supplémentaire, jamais bloquante.
    pub async fn search(&self, query: &str) -> Option<SearchResponse> {
        match &self.inner.search {
            Some(client) => client.search(query, DEFAULT_SEARCH_LIMIT).await,
            None => {
                debug!("No search collaborator attached");
                None
            }
        }
    }
}

/// Mode de répétition suivant dans le cycle 0 → 1 → 2 → 0
pub fn next_repeat_mode(mode: i32) -> i32 {
    (mode + 1) % 3
}

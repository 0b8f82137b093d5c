//! Modèle de vue du lecteur
//!
//! La règle de réconciliation est "la surcouche gagne jusqu'à un signal
//! faisant autorité" : l'état distant remplace l'affichage dès qu'il change,
//! sauf pour les champs que l'API distante ne réexpose pas (mute, shuffle)
//! qui restent prédits côté client, et pour la lecture pendant un seek dont
//! le retour d'état transitoire est masqué.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};
use ytmapi::{best_thumbnail, PlayerState, REPEAT_ALL, REPEAT_ONE};
use ytmcontrol::adapter;
use ytmcontrol::{ConnectOutcome, Playlist, PlaybackStore, SearchResponse, StoreError, Track};

use crate::color;

/// Délai de stabilisation après un seek : l'état poussé par l'appareil est en
/// retard sur la commande
const SEEK_SETTLE: Duration = Duration::from_millis(300);
/// Pas des commandes volume+ / volume−
const VOLUME_STEP: f64 = 10.0;

/// Mode de répétition présenté à l'interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

impl RepeatMode {
    /// Décode l'entier du protocole (0 = aucun, 1 = tout, 2 = piste)
    pub fn from_wire(mode: i32) -> Self {
        match mode {
            REPEAT_ALL => RepeatMode::All,
            REPEAT_ONE => RepeatMode::One,
            _ => RepeatMode::None,
        }
    }
}

/// Surcouche optimiste locale, jamais persistée
struct Overlay {
    volume: f64,
    volume_before_mute: f64,
    muted: bool,
    shuffle: bool,
    seeking: bool,
    last_stable_playing: bool,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            volume: 100.0,
            volume_before_mute: 100.0,
            muted: false,
            shuffle: false,
            seeking: false,
            last_stable_playing: false,
        }
    }
}

/// Cache de la couleur dominante, invalidé quand la piste ou sa miniature
/// change
#[derive(Default)]
struct ColorCache {
    track_uuid: String,
    thumbnail: Option<String>,
    primary_color: Option<String>,
    in_flight: bool,
}

struct PlayerInner {
    store: PlaybackStore,
    overlay: Mutex<Overlay>,
    color: Mutex<ColorCache>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Modèle de vue partagé du lecteur distant
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(store: PlaybackStore) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                store,
                overlay: Mutex::new(Overlay::default()),
                color: Mutex::new(ColorCache::default()),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Démarre la tâche de réconciliation avec l'état faisant autorité
    ///
    /// À chaque remplacement d'instantané : l'état de lecture stable est
    /// capturé hors seek, et le volume de la surcouche est écrasé par la
    /// valeur distante quand elle change.
    pub fn start(&self) {
        let player = self.clone();
        let handle = tokio::spawn(async move {
            let mut rx = player.inner.store.subscribe_state();
            loop {
                let snapshot = rx.borrow_and_update().clone();
                player.reconcile(snapshot.as_ref());
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
        if let Some(previous) = self.inner.watcher.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    fn reconcile(&self, snapshot: Option<&PlayerState>) {
        let mut overlay = self.overlay();
        if !overlay.seeking {
            overlay.last_stable_playing = snapshot.is_some_and(PlayerState::is_playing);
        }
        if let Some(state) = snapshot {
            if state.player.volume != overlay.volume {
                overlay.volume = state.player.volume;
            }
        }
    }

    fn overlay(&self) -> MutexGuard<'_, Overlay> {
        self.inner.overlay.lock().unwrap()
    }

    /// Magasin sous-jacent
    pub fn store(&self) -> &PlaybackStore {
        &self.inner.store
    }

    // ============ Propriétés dérivées ============

    /// Vrai si la lecture est en cours
    ///
    /// Pendant un seek, retourne la valeur stable capturée avant le seek :
    /// l'appareil distant rapporte un état de pause transitoire pendant le
    /// déplacement et l'interface ne doit pas clignoter.
    pub fn playing(&self) -> bool {
        let overlay = self.overlay();
        if overlay.seeking {
            return overlay.last_stable_playing;
        }
        drop(overlay);
        self.inner.store.is_playing()
    }

    /// Position de lecture en secondes
    pub fn current_time(&self) -> f64 {
        self.inner.store.progress()
    }

    /// Durée de la piste courante en secondes
    pub fn duration(&self) -> f64 {
        self.inner
            .store
            .state()
            .and_then(|s| s.video.map(|v| v.duration_seconds))
            .unwrap_or(0.0)
    }

    /// Volume affiché (0 quand le lecteur est coupé)
    pub fn volume(&self) -> f64 {
        let overlay = self.overlay();
        if overlay.muted { 0.0 } else { overlay.volume }
    }

    pub fn muted(&self) -> bool {
        self.overlay().muted
    }

    /// État shuffle prédit côté client : l'API distante n'expose aucune
    /// relecture de cet état
    pub fn shuffle(&self) -> bool {
        self.overlay().shuffle
    }

    pub fn repeat(&self) -> RepeatMode {
        RepeatMode::from_wire(self.inner.store.repeat_mode())
    }

    /// Piste courante, enrichie de sa couleur dominante si déjà extraite
    ///
    /// Un défaut de cache retourne immédiatement la piste sans couleur et
    /// déclenche l'extraction en arrière-plan ; les lectures répétées ne
    /// relancent pas l'extraction.
    pub fn active_track(&self) -> Option<Track> {
        let mut track = self.inner.store.current_track()?;

        let mut cache = self.inner.color.lock().unwrap();
        if cache.track_uuid == track.uuid && cache.thumbnail == track.thumbnail {
            track.primary_color = cache.primary_color.clone();
            return Some(track);
        }

        // Piste ou miniature nouvelle : invalider et relancer l'extraction
        if !cache.in_flight {
            if let Some(url) = track.thumbnail.clone() {
                cache.in_flight = true;
                drop(cache);
                let player = self.clone();
                let uuid = track.uuid.clone();
                tokio::spawn(async move {
                    player.extract_color(uuid, url).await;
                });
            } else {
                *cache = ColorCache {
                    track_uuid: track.uuid.clone(),
                    thumbnail: None,
                    primary_color: None,
                    in_flight: false,
                };
            }
        }
        Some(track)
    }

    async fn extract_color(&self, uuid: String, url: String) {
        let extracted = color::extract_primary_color(&url).await;
        let mut cache = self.inner.color.lock().unwrap();
        cache.in_flight = false;

        // Ne retenir le résultat que si la piste est toujours la piste
        // courante
        let still_current = self
            .inner
            .store
            .current_track()
            .is_some_and(|t| t.uuid == uuid);
        if !still_current {
            return;
        }

        match extracted {
            Ok(color) => {
                debug!("Dominant color for {uuid}: {color}");
                *cache = ColorCache {
                    track_uuid: uuid,
                    thumbnail: Some(url),
                    primary_color: Some(color),
                    in_flight: false,
                };
            }
            Err(e) => {
                warn!("Color extraction failed for {uuid}: {e}");
                *cache = ColorCache {
                    track_uuid: uuid,
                    thumbnail: Some(url),
                    primary_color: None,
                    in_flight: false,
                };
            }
        }
    }

    /// File d'attente adaptée au domaine
    pub fn queue(&self) -> Vec<Track> {
        self.inner.store.queue()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn active_track_index(&self) -> usize {
        self.inner.store.queue_index().unwrap_or(0)
    }

    /// Vrai si la piste courante est aimée (likeStatus = 2)
    pub fn is_liked(&self) -> bool {
        self.inner
            .store
            .state()
            .and_then(|s| s.video)
            .is_some_and(|v| v.like_status == 2)
    }

    /// URL de la plus grande vignette de la piste courante
    pub fn artwork_src(&self) -> Option<String> {
        self.inner
            .store
            .state()
            .and_then(|s| s.video)
            .and_then(|v| best_thumbnail(&v.thumbnails).map(|t| t.url.clone()))
    }

    pub fn is_connected(&self) -> bool {
        self.inner.store.is_connected()
    }

    pub fn connection_error(&self) -> Option<String> {
        self.inner.store.last_error()
    }

    /// Playlists de l'utilisateur, adaptées au domaine
    pub fn user_playlists(&self) -> Vec<Playlist> {
        self.inner
            .store
            .playlists()
            .iter()
            .map(adapter::playlist_from_summary)
            .collect()
    }

    // ============ Commandes de transport ============

    /// Bascule lecture/pause ; `force` impose l'état cible (la commande
    /// distante est une bascule, elle n'est envoyée que si l'état diffère)
    pub async fn toggle_play(&self, force: Option<bool>) {
        if !self.is_connected() {
            debug!("Ignoring play toggle while disconnected");
            return;
        }
        match force {
            Some(target) if target == self.playing() => {}
            _ => self.inner.store.play().await,
        }
    }

    pub async fn play_next(&self) {
        self.inner.store.next().await;
    }

    pub async fn play_prev(&self) {
        self.inner.store.previous().await;
    }

    /// Positionne la lecture en secondes
    ///
    /// L'état de lecture stable est capturé avant le seek et le drapeau
    /// `seeking` est levé ; un timer borné le retombe après le délai de
    /// stabilisation quelle que soit l'issue de la commande.
    pub async fn seek(&self, time: f64) {
        if !self.is_connected() {
            return;
        }

        {
            let mut overlay = self.overlay();
            overlay.last_stable_playing = self.inner.store.is_playing();
            overlay.seeking = true;
        }

        // Le timer part avant la commande : même un envoi qui échoue ne doit
        // pas laisser l'interface figée
        let player = self.clone();
        tokio::spawn(async move {
            sleep(SEEK_SETTLE).await;
            player.overlay().seeking = false;
        });

        self.inner.store.seek(time).await;
    }

    // ============ Volume et sourdine ============

    /// Fixe le volume affiché et le synchronise avec l'appareil
    ///
    /// Un volume > 0 demandé pendant la sourdine lève d'abord la sourdine :
    /// la commande unmute part avant la commande de volume.
    pub async fn set_volume(&self, volume: f64) {
        let was_muted = {
            let mut overlay = self.overlay();
            let was_muted = overlay.muted && volume > 0.0;
            if was_muted {
                overlay.muted = false;
            }
            overlay.volume = volume;
            was_muted
        };

        if was_muted {
            self.inner.store.unmute().await;
        }
        self.inner.store.set_volume(volume).await;
    }

    pub async fn volume_up(&self) {
        let muted = self.overlay().muted;
        if muted {
            // Volume+ en sourdine : lever la sourdine et repartir de zéro
            self.overlay().muted = false;
            self.inner.store.unmute().await;
            self.set_volume(VOLUME_STEP.min(100.0)).await;
        } else {
            let volume = self.overlay().volume;
            self.set_volume((volume + VOLUME_STEP).min(100.0)).await;
        }
    }

    pub async fn volume_down(&self) {
        let muted = self.overlay().muted;
        if muted {
            // Volume− en sourdine : restaurer le volume d'avant sourdine
            self.toggle_mute().await;
        } else {
            let volume = self.overlay().volume;
            self.set_volume((volume - VOLUME_STEP).max(0.0)).await;
        }
    }

    /// Bascule la sourdine
    ///
    /// La sourdine mémorise le volume courant ; la levée le restaure et le
    /// resynchronise avec l'appareil.
    pub async fn toggle_mute(&self) {
        if !self.is_connected() {
            debug!("Ignoring mute toggle while disconnected");
            return;
        }

        let restore = {
            let mut overlay = self.overlay();
            if overlay.muted {
                overlay.muted = false;
                overlay.volume = overlay.volume_before_mute;
                Some(overlay.volume)
            } else {
                overlay.volume_before_mute = overlay.volume;
                None
            }
        };

        match restore {
            Some(volume) => {
                self.inner.store.unmute().await;
                self.inner.store.set_volume(volume).await;
            }
            None => {
                self.inner.store.mute().await;
                self.overlay().muted = true;
            }
        }
    }

    // ============ Modes et file ============

    /// Bascule le shuffle, optimiste : la surcouche est mise à jour avant
    /// l'envoi et n'est pas annulée en cas d'échec
    pub async fn toggle_shuffle(&self) {
        if !self.is_connected() {
            return;
        }
        {
            let mut overlay = self.overlay();
            overlay.shuffle = !overlay.shuffle;
        }
        self.inner.store.toggle_shuffle().await;
    }

    pub async fn toggle_repeat(&self) {
        self.inner.store.toggle_repeat().await;
    }

    pub async fn like_track(&self) {
        self.inner.store.like_track().await;
    }

    pub async fn load_playlist(&self, playlist_id: &str) {
        self.inner.store.load_playlist(playlist_id).await;
    }

    pub async fn play_track_at_index(&self, index: usize) {
        self.inner.store.play_track_at_index(index).await;
    }

    pub async fn play_video_by_id(&self, video_id: &str) {
        self.inner.store.play_video_by_id(video_id).await;
    }

    pub async fn add_video_to_queue(&self, video_id: &str, position: Option<usize>) {
        self.inner.store.add_video_to_queue(video_id, position).await;
    }

    /// Recherche passthrough, jamais bloquante
    pub async fn search(&self, query: &str) -> Option<SearchResponse> {
        self.inner.store.search(query).await
    }

    // ============ Gestion de connexion ============

    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectOutcome, StoreError> {
        self.inner.store.connect(host, port).await
    }

    /// Reconnexion automatique au démarrage : seul un descripteur persisté
    /// encore valide est restauré, jamais un nouveau flux d'approbation
    pub async fn auto_connect(&self) -> Option<ConnectOutcome> {
        let descriptor = self.inner.store.client().current_connection()?;
        if !self.inner.store.client().is_token_valid() {
            return None;
        }
        match self
            .inner
            .store
            .connect(&descriptor.host, descriptor.port)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Auto-reconnect failed: {e}");
                None
            }
        }
    }

    pub fn disconnect(&self) {
        self.inner.store.disconnect();
    }

    pub fn reset_connection(&self) {
        self.inner.store.reset_connection();
    }

    pub async fn force_reconnect(&self) -> Result<ConnectOutcome, StoreError> {
        self.inner.store.force_reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_decodes_the_wire_integer() {
        assert_eq!(RepeatMode::from_wire(0), RepeatMode::None);
        assert_eq!(RepeatMode::from_wire(1), RepeatMode::All);
        assert_eq!(RepeatMode::from_wire(2), RepeatMode::One);
        assert_eq!(RepeatMode::from_wire(7), RepeatMode::None);
    }
}

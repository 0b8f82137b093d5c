//! Intégration des touches multimédia du système hôte
//!
//! Les contrôles souvlaki vivent sur un thread dédié : les poignées de
//! plateforme ne traversent pas les tâches async. Les événements des touches
//! remontent vers les mêmes méthodes de commande que l'interface, qui
//! restent l'unique source de vérité ; les métadonnées repartent vers le
//! système via un canal d'instantanés.

use std::time::Duration;

use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig,
    SeekDirection,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::player::Player;

const DBUS_NAME: &str = "ytmremote";
const DISPLAY_NAME: &str = "YTM Remote";
/// Pas des touches d'avance/retour rapide
const SEEK_STEP_SECS: f64 = 10.0;

/// Instantané poussé vers la surface système
struct NowPlaying {
    title: String,
    artist: String,
    album: String,
    cover_url: Option<String>,
    duration: f64,
    playing: bool,
    progress: f64,
}

impl Player {
    /// Attache le lecteur aux touches multimédia du système
    ///
    /// Démarre le thread propriétaire des contrôles, la pompe d'événements
    /// et le rafraîchisseur de métadonnées. Les tâches vivent tant que le
    /// lecteur existe.
    pub fn attach_media_keys(&self) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<MediaControlEvent>();
        let (meta_tx, meta_rx) = std::sync::mpsc::channel::<NowPlaying>();

        // Thread propriétaire des contrôles système
        std::thread::spawn(move || {
            let config = PlatformConfig {
                dbus_name: DBUS_NAME,
                display_name: DISPLAY_NAME,
                hwnd: None,
            };
            let mut controls = match MediaControls::new(config) {
                Ok(c) => c,
                Err(e) => {
                    warn!("System media controls unavailable: {e:?}");
                    return;
                }
            };
            if let Err(e) = controls.attach(move |event| {
                let _ = event_tx.send(event);
            }) {
                warn!("Failed to attach media key handler: {e:?}");
                return;
            }

            while let Ok(snapshot) = meta_rx.recv() {
                let metadata = MediaMetadata {
                    title: Some(&snapshot.title),
                    artist: Some(&snapshot.artist),
                    album: Some(&snapshot.album),
                    cover_url: snapshot.cover_url.as_deref(),
                    duration: Some(Duration::from_secs_f64(snapshot.duration.max(0.0))),
                };
                if let Err(e) = controls.set_metadata(metadata) {
                    warn!("Failed to publish media metadata: {e:?}");
                }

                let progress = Some(MediaPosition(Duration::from_secs_f64(
                    snapshot.progress.max(0.0),
                )));
                let playback = if snapshot.playing {
                    MediaPlayback::Playing { progress }
                } else {
                    MediaPlayback::Paused { progress }
                };
                if let Err(e) = controls.set_playback(playback) {
                    warn!("Failed to publish playback status: {e:?}");
                }
            }
        });

        // Pompe d'événements : touches système → commandes du lecteur
        let player = self.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                player.handle_media_event(event).await;
            }
        });

        // Rafraîchisseur : chaque remplacement d'instantané repousse les
        // métadonnées vers le système
        let player = self.clone();
        tokio::spawn(async move {
            let mut rx = player.store().subscribe_state();
            loop {
                if let Some(track) = player.active_track() {
                    let snapshot = NowPlaying {
                        title: track.name.clone(),
                        artist: track.artists.join(", "),
                        album: track.album.clone().unwrap_or_default(),
                        cover_url: track.thumbnail.clone(),
                        duration: player.duration(),
                        playing: player.playing(),
                        progress: player.current_time(),
                    };
                    if meta_tx.send(snapshot).is_err() {
                        return;
                    }
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });

        Ok(())
    }

    async fn handle_media_event(&self, event: MediaControlEvent) {
        debug!("Media key event: {event:?}");
        match event {
            MediaControlEvent::Play => self.toggle_play(Some(true)).await,
            MediaControlEvent::Pause | MediaControlEvent::Stop => {
                self.toggle_play(Some(false)).await
            }
            MediaControlEvent::Toggle => self.toggle_play(None).await,
            MediaControlEvent::Next => self.play_next().await,
            MediaControlEvent::Previous => self.play_prev().await,
            MediaControlEvent::SetPosition(MediaPosition(position)) => {
                self.seek(position.as_secs_f64()).await;
            }
            MediaControlEvent::Seek(direction) => {
                let current = self.current_time();
                let target = match direction {
                    SeekDirection::Forward => (current + SEEK_STEP_SECS).min(self.duration()),
                    SeekDirection::Backward => (current - SEEK_STEP_SECS).max(0.0),
                };
                self.seek(target).await;
            }
            MediaControlEvent::SeekBy(direction, amount) => {
                let current = self.current_time();
                let delta = amount.as_secs_f64();
                let target = match direction {
                    SeekDirection::Forward => (current + delta).min(self.duration()),
                    SeekDirection::Backward => (current - delta).max(0.0),
                };
                self.seek(target).await;
            }
            MediaControlEvent::SetVolume(volume) => {
                // souvlaki exprime le volume en 0–1
                self.set_volume((volume * 100.0).clamp(0.0, 100.0)).await;
            }
            MediaControlEvent::OpenUri(_) | MediaControlEvent::Raise | MediaControlEvent::Quit => {}
        }
    }
}

//! Types de données échangés avec l'API Companion de YTM Desktop
//!
//! L'instantané [`PlayerState`] est la donnée faisant autorité : il est
//! remplacé en bloc à chaque push temps réel, jamais fusionné champ par champ.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Valeur de `trackState` signifiant "en lecture"
pub const TRACK_STATE_PLAYING: i32 = 1;

/// Mode de répétition : aucun
pub const REPEAT_NONE: i32 = 0;
/// Mode de répétition : toute la file
pub const REPEAT_ALL: i32 = 1;
/// Mode de répétition : piste courante
pub const REPEAT_ONE: i32 = 2;

/// Miniature d'illustration avec dimensions optionnelles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Retourne la miniature de plus grande surface (largeur × hauteur)
pub fn best_thumbnail(thumbnails: &[Thumbnail]) -> Option<&Thumbnail> {
    thumbnails.iter().max_by_key(|t| {
        u64::from(t.width.unwrap_or(0)) * u64::from(t.height.unwrap_or(0))
    })
}

/// Vidéo / piste en cours de lecture sur l'appareil distant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    /// 2 = aimée, 1 = non aimée, 0 = neutre
    #[serde(default)]
    pub like_status: i32,
}

/// Élément de la file d'attente distante
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

/// File d'attente ordonnée avec index sélectionné et mode de répétition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    #[serde(default)]
    pub items: Vec<QueueItem>,
    #[serde(default)]
    pub selected_item_index: i32,
    /// 0 = aucun, 1 = tout, 2 = piste
    #[serde(default)]
    pub repeat_mode: i32,
}

/// État du lecteur (transport, volume, progression, file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    #[serde(default)]
    pub track_state: i32,
    /// Volume 0–100
    #[serde(default)]
    pub volume: f64,
    /// Progression en secondes
    #[serde(default)]
    pub video_progress: f64,
    #[serde(default)]
    pub queue: Option<QueueInfo>,
}

/// Instantané complet de l'état distant, poussé par le canal temps réel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    #[serde(default)]
    pub player: PlayerInfo,
    #[serde(default)]
    pub video: Option<VideoInfo>,
}

impl PlayerState {
    /// Vrai si le transport est en lecture
    pub fn is_playing(&self) -> bool {
        self.player.track_state == TRACK_STATE_PLAYING
    }

    /// Mode de répétition courant (0 si aucune file)
    pub fn repeat_mode(&self) -> i32 {
        self.player.queue.as_ref().map_or(REPEAT_NONE, |q| q.repeat_mode)
    }
}

/// Résumé de playlist retourné par `GET /playlists`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub track_count: u32,
    #[serde(default)]
    pub author: Option<String>,
}

/// Réponse de `POST /auth/requestcode`
#[derive(Debug, Deserialize)]
pub struct AuthCodeResponse {
    pub code: String,
}

/// Corps de `POST /auth/request`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub app_id: String,
    pub code: String,
}

/// Réponse de `POST /auth/request`
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Corps de `POST /command`
#[derive(Debug, Serialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Message échangé sur le canal temps réel
///
/// Le serveur pousse `state-update` avec un instantané complet ; le client
/// envoie `get-state` pour demander un push immédiat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RealtimeMessage {
    StateUpdate(Box<PlayerState>),
    GetState,
}

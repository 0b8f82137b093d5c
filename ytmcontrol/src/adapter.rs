//! Adaptateur du format filaire vers les entités de domaine
//!
//! Les types de `ytmapi::models` suivent fidèlement le JSON du Companion
//! Server ; l'interface utilisateur consomme des entités plus riches (piste
//! avec URL canonique, albums et artistes dérivés de la file). Toutes les
//! conversions sont des fonctions pures sur des instantanés.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use ytmapi::models::{best_thumbnail, PlaylistSummary, QueueItem, VideoInfo};

/// Piste telle que présentée à l'interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Identifiant numérique stable, dérivé de l'identifiant vidéo
    pub id: u32,
    /// Identifiant vidéo YouTube d'origine
    pub uuid: String,
    pub name: String,
    pub album: Option<String>,
    pub artists: Vec<String>,
    /// Durée en secondes (0 si inconnue)
    pub duration: f64,
    pub thumbnail: Option<String>,
    /// Page d'écoute canonique de la piste
    pub url: String,
    /// Couleur dominante de la pochette, renseignée paresseusement
    pub primary_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    pub artist: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: String,
    pub thumbnail: Option<String>,
}

/// Dérive un identifiant numérique stable d'un identifiant vidéo
///
/// Un identifiant déjà numérique est repris tel quel ; sinon un haché stable
/// garantit que la même vidéo garde le même identifiant d'un instantané à
/// l'autre.
pub fn synthesize_id(video_id: &str) -> u32 {
    if let Ok(n) = video_id.parse::<u32>() {
        return n;
    }
    let mut hasher = DefaultHasher::new();
    video_id.hash(&mut hasher);
    (hasher.finish() & 0xFFFF_FFFF) as u32
}

/// URL de la page d'écoute d'une vidéo
fn watch_url(video_id: &str) -> String {
    format!("https://music.youtube.com/watch?v={video_id}")
}

/// Convertit la vidéo en cours de lecture en piste de domaine
pub fn track_from_video(video: &VideoInfo) -> Track {
    Track {
        id: synthesize_id(&video.id),
        uuid: video.id.clone(),
        name: video.title.clone(),
        album: video.album.clone(),
        artists: if video.author.is_empty() {
            Vec::new()
        } else {
            vec![video.author.clone()]
        },
        duration: video.duration_seconds,
        thumbnail: best_thumbnail(&video.thumbnails).map(|t| t.url.clone()),
        url: watch_url(&video.id),
        primary_color: None,
    }
}

/// Convertit un élément de file en piste de domaine
///
/// La file ne porte ni album ni durée : ces champs restent vides.
pub fn track_from_queue_item(item: &QueueItem) -> Track {
    Track {
        id: synthesize_id(&item.video_id),
        uuid: item.video_id.clone(),
        name: item.title.clone(),
        album: None,
        artists: if item.author.is_empty() {
            Vec::new()
        } else {
            vec![item.author.clone()]
        },
        duration: 0.0,
        thumbnail: best_thumbnail(&item.thumbnails).map(|t| t.url.clone()),
        url: watch_url(&item.video_id),
        primary_color: None,
    }
}

/// Convertit un résumé de playlist en entité de domaine
pub fn playlist_from_summary(summary: &PlaylistSummary) -> Playlist {
    let description = match &summary.author {
        Some(author) => format!("{} tracks • {author}", summary.track_count),
        None => format!("{} tracks", summary.track_count),
    };
    Playlist {
        id: summary.id.clone(),
        name: summary.title.clone(),
        description,
        thumbnail: None,
    }
}

/// Dérive la liste d'albums distincts d'un ensemble de pistes
///
/// Déduplication par couple (album, premier artiste) ; les pistes sans album
/// sont ignorées.
pub fn albums_from_tracks(tracks: &[Track]) -> Vec<Album> {
    let mut albums: Vec<Album> = Vec::new();
    for track in tracks {
        let Some(name) = &track.album else { continue };
        let artist = track.artists.first().cloned().unwrap_or_default();
        if !albums.iter().any(|a| &a.name == name && a.artist == artist) {
            albums.push(Album {
                name: name.clone(),
                artist,
                thumbnail: track.thumbnail.clone(),
            });
        }
    }
    albums
}

/// Dérive la liste d'artistes distincts d'un ensemble de pistes
pub fn artists_from_tracks(tracks: &[Track]) -> Vec<Artist> {
    let mut artists: Vec<Artist> = Vec::new();
    for name in tracks.iter().flat_map(|t| t.artists.iter()) {
        if !artists.iter().any(|a| &a.name == name) {
            artists.push(Artist { name: name.clone() });
        }
    }
    artists
}

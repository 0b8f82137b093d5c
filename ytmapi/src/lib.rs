//! Client pour l'API Companion de YouTube Music Desktop
//!
//! Ce crate fournit la couche session du contrôle à distance :
//! - Authentification par code d'approbation et cycle de vie du token (24h)
//! - Requêtes HTTP authentifiées avec timeout et retry borné
//! - Canal temps réel WebSocket avec reconnexion à backoff exponentiel
//! - Audit de santé périodique de la connexion
//! - Persistance du descripteur de connexion entre deux lancements

pub mod client;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod models;
pub mod realtime;

pub use client::{AppIdentity, YtmClient, DEFAULT_HOST, DEFAULT_PORT};
pub use descriptor::{ConnectionDescriptor, DescriptorStore};
pub use error::{Result, YtmApiError};
pub use models::{
    best_thumbnail, PlayerInfo, PlayerState, PlaylistSummary, QueueInfo, QueueItem, Thumbnail,
    VideoInfo, REPEAT_ALL, REPEAT_NONE, REPEAT_ONE, TRACK_STATE_PLAYING,
};
pub use realtime::{ChannelState, DisconnectReason, RealtimeEvent};

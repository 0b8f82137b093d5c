//! Magasin d'état de lecture pour YTM Desktop
//!
//! Ce crate consomme la couche session de `ytmapi` et publie un état de
//! lecture observable :
//! - [`PlaybackStore`] : procédure de connexion (sonde, réutilisation du
//!   descripteur, flux d'approbation), pompe d'événements temps réel,
//!   instantanés faisant autorité et répartition des commandes
//! - [`adapter`] : conversion du format filaire vers les entités de domaine
//!   (pistes, albums, artistes, playlists)
//! - [`search`] : client de recherche à base injectable

pub mod adapter;
pub mod errors;
pub mod search;
pub mod store;

pub use adapter::{Album, Artist, Playlist, Track};
pub use errors::StoreError;
pub use search::{SearchClient, SearchResponse, SearchResult};
pub use store::{ConnectOutcome, PlaybackStore, StoreOptions};

//! Modèle de vue du lecteur distant
//!
//! Dérive les propriétés présentées à l'utilisateur depuis l'état faisant
//! autorité du magasin de lecture, en appliquant une surcouche optimiste
//! locale pour les opérations dont la confirmation distante est lente ou
//! absente : seek en vol, mute/volume prédits côté client, shuffle purement
//! local. Les couleurs dominantes des pochettes sont extraites en arrière-plan
//! et mises en cache par piste.

pub mod color;
pub mod player;

#[cfg(feature = "media-keys")]
pub mod media_keys;

pub use player::{Player, RepeatMode};

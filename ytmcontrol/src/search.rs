//! Client de recherche YouTube Music
//!
//! La recherche passe par un collaborateur externe distinct du Companion
//! Server (endpoint `GET /api/youtube-search`) et n'exige pas
//! d'authentification. Un échec de recherche n'est jamais fatal : il est
//! journalisé et l'appelant reçoit `None`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use ytmapi::models::Thumbnail;

/// Nombre de résultats demandé par défaut
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Résultat individuel de recherche
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Catégorie du résultat (video, playlist, channel)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    /// Durée affichable, telle que fournie par le service ("3:35")
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    pub is_live: bool,
    /// Compteur de vues affichable ("1.2M views")
    #[serde(default)]
    pub view_count: Option<String>,
}

/// Page de résultats avec jeton de continuation éventuel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub continuation: Option<String>,
}

/// Client de recherche à base injectable
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    /// Client pointant vers le service de recherche donné
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(SEARCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Recherche des pistes ; `None` en cas d'échec réseau ou de réponse
    /// invalide
    pub async fn search(&self, query: &str, limit: usize) -> Option<SearchResponse> {
        let url = format!("{}/api/youtube-search", self.base_url);
        debug!("Searching for {query:?} (limit {limit})");

        let response = match self
            .http
            .get(&url)
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Search request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Search returned HTTP {}", response.status());
            return None;
        }

        match response.json::<SearchResponse>().await {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Unparseable search response: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_deserializes_from_wire_format() {
        let json = r#"{
            "results": [{
                "type": "video",
                "videoId": "abc",
                "title": "Song",
                "artist": "Artist",
                "duration": "3:35",
                "thumbnails": [{"url": "https://img/t.jpg", "width": 120, "height": 120}],
                "isLive": false,
                "viewCount": "1.2M views"
            }],
            "continuation": "tok"
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let result = &parsed.results[0];
        assert_eq!(result.kind.as_deref(), Some("video"));
        assert_eq!(result.video_id, "abc");
        assert_eq!(result.view_count.as_deref(), Some("1.2M views"));
        assert!(!result.is_live);
        assert_eq!(parsed.continuation.as_deref(), Some("tok"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"results": [{"videoId": "abc", "title": "Song"}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let result = &parsed.results[0];
        assert!(result.kind.is_none());
        assert!(result.artist.is_none());
        assert!(result.thumbnails.is_empty());
        assert!(parsed.continuation.is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = SearchClient::new("http://127.0.0.1:9000/");
        assert_eq!(client.base_url, "http://127.0.0.1:9000");
    }
}

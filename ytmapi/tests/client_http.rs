//! Tests d'intégration du client HTTP contre un serveur scripté
//!
//! Le serveur répond aux requêtes dans l'ordre du script, une connexion par
//! requête (`Connection: close`), ce qui permet de vérifier les séquences de
//! retry que les mocks à route unique ne savent pas exprimer.

use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use ytmapi::{AppIdentity, ConnectionDescriptor, DescriptorStore, YtmApiError, YtmClient};

/// Construit une réponse HTTP/1.1 complète avec le corps donné
fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Lit une requête complète (en-têtes puis corps annoncé par Content-Length)
async fn read_request(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let Ok(n) = stream.read(&mut buf).await else {
            return raw;
        };
        if n == 0 {
            return raw;
        }
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw);
        if let Some(headers_end) = text.find("\r\n\r\n") {
            let content_length = text
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= headers_end + 4 + content_length {
                return raw;
            }
        }
    }
}

/// Démarre un serveur qui sert les réponses du script, une par connexion
async fn spawn_scripted_server(responses: Vec<String>) -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut stream).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    Ok(port)
}

fn connected_client(dir: &tempfile::TempDir, port: u16) -> anyhow::Result<YtmClient> {
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(store)?;
    client.set_connection(ConnectionDescriptor {
        host: "127.0.0.1".to_string(),
        port,
        token: "secret".to_string(),
        connected: true,
        token_expiry: Utc::now() + TimeDelta::hours(24),
    })?;
    Ok(client)
}

#[tokio::test]
async fn transient_server_errors_are_retried_with_linear_delay() -> anyhow::Result<()> {
    let state = r#"{"player":{"trackState":1,"volume":50,"videoProgress":10}}"#;
    let port = spawn_scripted_server(vec![
        http_response("500 Internal Server Error", "{}"),
        http_response("500 Internal Server Error", "{}"),
        http_response("200 OK", state),
    ])
    .await?;

    let dir = tempfile::tempdir()?;
    let client = connected_client(&dir, port)?;

    let started = Instant::now();
    let state = client.get_player_state().await?;

    assert!(state.is_playing());
    // 1 s après la première tentative + 2 s après la deuxième
    assert!(started.elapsed() >= Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn unauthorized_response_clears_the_connection() -> anyhow::Result<()> {
    let port = spawn_scripted_server(vec![http_response("401 Unauthorized", "{}")]).await?;

    let dir = tempfile::tempdir()?;
    let client = connected_client(&dir, port)?;

    let err = client.get_player_state().await.unwrap_err();
    assert!(matches!(err, YtmApiError::AuthenticationExpired));
    assert!(err.is_auth_error());

    // Descripteur purgé en mémoire et sur disque
    assert!(client.current_connection().is_none());
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    assert!(store.load().is_none());
    Ok(())
}

#[tokio::test]
async fn expired_token_is_never_attached_to_a_request() -> anyhow::Result<()> {
    // Aucun serveur : un token expiré doit échouer avant tout échange réseau
    let dir = tempfile::tempdir()?;
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(store)?;
    client.set_connection(ConnectionDescriptor {
        host: "127.0.0.1".to_string(),
        port: 1,
        token: "stale".to_string(),
        connected: false,
        token_expiry: Utc::now() - TimeDelta::minutes(1),
    })?;

    let err = client.get_player_state().await.unwrap_err();
    assert!(matches!(err, YtmApiError::NotAuthenticated));
    assert!(client.current_connection().is_none());
    Ok(())
}

#[tokio::test]
async fn auth_flow_persists_a_descriptor_with_24h_expiry() -> anyhow::Result<()> {
    let port = spawn_scripted_server(vec![
        http_response("200 OK", r#"{"code":"1234"}"#),
        http_response("200 OK", r#"{"token":"fresh-token"}"#),
    ])
    .await?;

    let dir = tempfile::tempdir()?;
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(store)?;

    let identity = AppIdentity::new("localmusic", "Local Music", "1.0.0");
    let code = client.request_auth_code(&identity, "127.0.0.1", port).await?;
    assert_eq!(code, "1234");

    let before = Utc::now();
    let token = client.exchange_token("localmusic", &code, "127.0.0.1", port).await?;
    assert_eq!(token, "fresh-token");

    let descriptor = client.current_connection().expect("descriptor set");
    assert_eq!(descriptor.token, "fresh-token");
    assert!(descriptor.matches("127.0.0.1", port));
    let lifetime = descriptor.token_expiry - before;
    assert!(lifetime >= TimeDelta::hours(23) && lifetime <= TimeDelta::hours(25));

    // Persisté : un second client restaure le même descripteur
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let restored = store.load().expect("descriptor persisted");
    assert_eq!(restored.token, "fresh-token");
    Ok(())
}

#[tokio::test]
async fn command_accepts_an_empty_response_body() -> anyhow::Result<()> {
    let port = spawn_scripted_server(vec![http_response("204 No Content", "")]).await?;

    let dir = tempfile::tempdir()?;
    let client = connected_client(&dir, port)?;

    client.send_command("playPause", None).await?;
    Ok(())
}

#[tokio::test]
async fn malformed_app_id_is_rejected_before_any_request() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(store)?;

    let identity = AppIdentity::new("Not-Valid", "Bad App", "1.0.0");
    let err = client
        .request_auth_code(&identity, "127.0.0.1", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, YtmApiError::InvalidAppId(_)));
    Ok(())
}

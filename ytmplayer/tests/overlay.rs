//! Tests de la surcouche optimiste du modèle de vue
//!
//! Un serveur enregistreur capture les commandes POST dans l'ordre d'arrivée
//! pour vérifier les séquencements (unmute avant setVolume) que l'état final
//! seul ne prouve pas.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use ytmapi::realtime::RealtimeEvent;
use ytmapi::{ConnectionDescriptor, DescriptorStore, PlayerState, YtmClient};
use ytmcontrol::PlaybackStore;
use ytmplayer::Player;

/// Démarre un serveur qui acquitte toute requête et note les commandes
/// reçues sur `/api/v1/command`
async fn spawn_recorder(commands: Arc<Mutex<Vec<String>>>) -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let commands = commands.clone();
            tokio::spawn(async move {
                let mut raw = Vec::new();
                let mut buf = [0u8; 2048];
                // Lire jusqu'à la fin du corps annoncé par Content-Length
                loop {
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        break;
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
                            break;
                        }
                    }
                }

                let text = String::from_utf8_lossy(&raw).to_string();
                if text.starts_with("POST /api/v1/command") {
                    if let Some(body_start) = text.find("\r\n\r\n") {
                        if let Ok(body) =
                            serde_json::from_str::<serde_json::Value>(&text[body_start + 4..])
                        {
                            if let Some(command) = body["command"].as_str() {
                                commands.lock().unwrap().push(command.to_string());
                            }
                        }
                    }
                }

                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok(port)
}

/// Lecteur relié à un appareil enregistré, marqué connecté
fn connected_player(dir: &tempfile::TempDir, port: u16) -> anyhow::Result<Player> {
    let descriptor_store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(descriptor_store)?;
    client.set_connection(ConnectionDescriptor {
        host: "127.0.0.1".to_string(),
        port,
        token: "secret".to_string(),
        connected: true,
        token_expiry: Utc::now() + TimeDelta::hours(24),
    })?;

    let store = PlaybackStore::new(client);
    store.apply_event(RealtimeEvent::Connected);
    Ok(Player::new(store))
}

fn playing_snapshot(volume: f64) -> PlayerState {
    let mut state = PlayerState::default();
    state.player.track_state = 1;
    state.player.volume = volume;
    state
}

#[tokio::test]
async fn muting_then_raising_volume_unmutes_first() -> anyhow::Result<()> {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let port = spawn_recorder(commands.clone()).await?;
    let dir = tempfile::tempdir()?;
    let player = connected_player(&dir, port)?;

    player.set_volume(70.0).await;
    player.toggle_mute().await;
    assert!(player.muted());
    assert_eq!(player.volume(), 0.0);

    player.set_volume(50.0).await;
    assert!(!player.muted());
    assert_eq!(player.volume(), 50.0);

    let recorded = commands.lock().unwrap().clone();
    let mute_pos = recorded.iter().position(|c| c == "mute").expect("mute sent");
    let unmute_pos = recorded
        .iter()
        .rposition(|c| c == "unmute")
        .expect("unmute sent");
    let volume_pos = recorded
        .iter()
        .rposition(|c| c == "setVolume")
        .expect("setVolume sent");
    assert!(mute_pos < unmute_pos);
    // La levée de sourdine part avant la commande de volume
    assert!(unmute_pos < volume_pos);
    Ok(())
}

#[tokio::test]
async fn unmuting_restores_the_pre_mute_volume() -> anyhow::Result<()> {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let port = spawn_recorder(commands.clone()).await?;
    let dir = tempfile::tempdir()?;
    let player = connected_player(&dir, port)?;

    player.set_volume(65.0).await;
    player.toggle_mute().await;
    player.toggle_mute().await;

    assert!(!player.muted());
    assert_eq!(player.volume(), 65.0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn seeking_flag_is_cleared_by_the_settle_timer() -> anyhow::Result<()> {
    // Pas de serveur : l'échec d'envoi ne doit pas empêcher la retombée du
    // drapeau
    let dir = tempfile::tempdir()?;
    let descriptor_store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(descriptor_store)?;
    let store = PlaybackStore::new(client);
    store.apply_event(RealtimeEvent::Connected);
    store.apply_event(RealtimeEvent::StateUpdate(Box::new(playing_snapshot(80.0))));
    let player = Player::new(store.clone());

    player.seek(42.0).await;

    // L'appareil rapporte une pause transitoire pendant le seek
    let mut paused = playing_snapshot(80.0);
    paused.player.track_state = 0;
    store.apply_event(RealtimeEvent::StateUpdate(Box::new(paused)));

    // Le drapeau masque l'état transitoire
    assert!(player.playing());

    tokio::time::sleep(Duration::from_millis(350)).await;

    // Timer retombé : l'état faisant autorité redevient visible
    assert!(!player.playing());
    Ok(())
}

#[tokio::test]
async fn shuffle_is_toggled_optimistically() -> anyhow::Result<()> {
    // Aucun serveur : la commande échoue, la surcouche reste basculée
    let dir = tempfile::tempdir()?;
    let descriptor_store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(descriptor_store)?;
    let store = PlaybackStore::new(client);
    store.apply_event(RealtimeEvent::Connected);
    let player = Player::new(store);

    assert!(!player.shuffle());
    player.toggle_shuffle().await;
    assert!(player.shuffle());
    player.toggle_shuffle().await;
    assert!(!player.shuffle());
    Ok(())
}

#[tokio::test]
async fn authoritative_volume_overwrites_the_overlay() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let descriptor_store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(descriptor_store)?;
    let store = PlaybackStore::new(client);
    let player = Player::new(store.clone());
    player.start();

    store.apply_event(RealtimeEvent::StateUpdate(Box::new(playing_snapshot(37.0))));

    // Laisser la tâche de réconciliation consommer le remplacement
    tokio::time::timeout(Duration::from_secs(2), async {
        while player.volume() != 37.0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("overlay volume reconciled");
    Ok(())
}

#[tokio::test]
async fn commands_are_ignored_while_disconnected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let descriptor_store = DescriptorStore::new(dir.path().to_str().unwrap())?;
    let client = YtmClient::new(descriptor_store)?;
    let player = Player::new(PlaybackStore::new(client));

    assert!(!player.is_connected());
    player.toggle_mute().await;
    assert!(!player.muted());

    tokio::time::timeout(Duration::from_millis(100), player.toggle_play(None))
        .await
        .expect("disconnected command must return immediately");
    Ok(())
}

//! Example: connect to YTM Desktop and follow the playback state
//!
//! Run with: cargo run -p ytmplayer --example remote_session
//! Or with a specific device: cargo run -p ytmplayer --example remote_session -- 192.168.1.20 9863

use std::env;

use ytmapi::{DescriptorStore, YtmClient, DEFAULT_HOST, DEFAULT_PORT};
use ytmcontrol::PlaybackStore;
use ytmplayer::Player;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let host = env::args().nth(1).unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = env::args()
        .nth(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let store = DescriptorStore::new("")?;
    let client = YtmClient::new(store)?;
    let playback = PlaybackStore::new(client);
    let player = Player::new(playback.clone());
    player.start();

    println!("Connecting to YouTube Music Desktop at {host}:{port}...");
    println!("Approve the connection request on the device if prompted.\n");

    let outcome = player.connect(&host, port).await?;
    println!("Connected ({outcome:?})");

    let mut state_rx = playback.subscribe_state();
    loop {
        state_rx.changed().await?;

        if let Some(track) = player.active_track() {
            let status = if player.playing() { "playing" } else { "paused" };
            println!(
                "[{status}] {} — {} ({:.0}/{:.0}s, volume {:.0})",
                track.artists.join(", "),
                track.name,
                player.current_time(),
                player.duration(),
                player.volume(),
            );
        }
    }
}

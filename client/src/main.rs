use clap::Parser;
use client::{ClientState, NetworkClient};
use env_logger::Env;
use log::{info, warn};
use shared::{MapDocument, DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Character to select after joining
    #[arg(short, long)]
    character: Option<String>,

    /// Display name sent with the character selection
    #[arg(short, long, default_value = "Probe")]
    name: String,

    /// Map JSON file to upload (host only)
    #[arg(short, long)]
    map: Option<PathBuf>,

    /// Send game_start after uploading the map
    #[arg(long)]
    start: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut network = NetworkClient::connect(&format!("{}:{}", args.host, args.port)).await?;
    let mut state = ClientState::new();
    state.player_id = Some(network.player_id().to_string());
    state.is_host = network.is_host();

    if let Some(character) = &args.character {
        network.send_character_selection(character, &args.name).await?;
    }

    if let Some(path) = &args.map {
        if network.is_host() {
            let text = tokio::fs::read_to_string(path).await?;
            let map: MapDocument = serde_json::from_str(&text)?;
            info!("Uploading map {}", map.title());
            network.send_map_data(map).await?;
        } else {
            warn!("Only the host can upload maps; skipping {}", path.display());
        }
    }

    if args.start && network.is_host() {
        network.send_game_start().await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            received = network.recv() => match received? {
                Some(packet) => {
                    info!("<- {}", packet.type_name());
                    state.apply(&packet);
                }
                None => {
                    info!("Server closed the connection");
                    break;
                }
            },
        }
    }

    info!(
        "Saw {} players, {} enemies, {} bosses",
        state.players.len(),
        state.enemies.len(),
        state.bosses.len()
    );
    network.disconnect().await?;
    Ok(())
}

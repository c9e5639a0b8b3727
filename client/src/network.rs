use log::{debug, info, warn};
use shared::{
    encode_packet, BossDamage, BossDeath, CharacterSelection, CodecConfig, CodecError,
    EnemyDamage, EnemyDeath, EnemyDescriptor, FrameDecoder, MapDocument, MapSelection,
    MapTarget, MapTransition, Packet, PlayerUpdate, ProjectileEvent, Relay, Signal,
};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const READ_BUFFER_SIZE: usize = 8192;
/// How long `connect` waits for the server's `player_id` greeting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server closed the connection before greeting")]
    NoGreeting,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A TCP connection to the room server.
///
/// Writes go straight to the socket; reads are decoded frame by frame and
/// surfaced as typed [`Packet`]s. Frames of unknown type are logged and
/// skipped.
pub struct NetworkClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    buffer: Vec<u8>,
    pending: VecDeque<Packet>,
    codec: CodecConfig,
    player_id: String,
    is_host: bool,
}

impl NetworkClient {
    /// Connects and waits for the `player_id` greeting.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        Self::connect_with(addr, CodecConfig::default()).await
    }

    pub async fn connect_with(addr: &str, codec: CodecConfig) -> Result<Self, ClientError> {
        info!("Connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let mut client = NetworkClient {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            buffer: vec![0u8; READ_BUFFER_SIZE],
            pending: VecDeque::new(),
            codec,
            player_id: String::new(),
            is_host: false,
        };

        let greeting = tokio::time::timeout(HANDSHAKE_TIMEOUT, client.await_greeting())
            .await
            .map_err(|_| ClientError::Timeout(HANDSHAKE_TIMEOUT))?;
        let (id, is_host) = greeting?;
        info!("Connected as {} (host: {})", id, is_host);
        client.player_id = id;
        client.is_host = is_host;
        Ok(client)
    }

    async fn await_greeting(&mut self) -> Result<(String, bool), ClientError> {
        let mut early = VecDeque::new();
        loop {
            match self.read_packet().await? {
                Some(Packet::PlayerId { id, is_host }) => {
                    self.pending.extend(early);
                    return Ok((id, is_host));
                }
                Some(other) => early.push_back(other),
                None => return Err(ClientError::NoGreeting),
            }
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Next packet from the server, or `None` once the server closed the socket.
    pub async fn recv(&mut self) -> Result<Option<Packet>, ClientError> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        self.read_packet().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>, ClientError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Receives until a packet matches `accept`, discarding the rest.
    pub async fn recv_until<F>(&mut self, timeout: Duration, mut accept: F) -> Result<Packet, ClientError>
    where
        F: FnMut(&Packet) -> bool,
    {
        let wait = async {
            loop {
                match self.recv().await? {
                    Some(packet) if accept(&packet) => return Ok(packet),
                    Some(_) => continue,
                    None => {
                        return Err(ClientError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "server closed the connection",
                        )))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>, ClientError> {
        loop {
            for frame in self.decoder.by_ref() {
                let value = match frame {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Dropping malformed frame: {}", e);
                        continue;
                    }
                };
                match Packet::from_value(value) {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(e) => debug!("Skipping unrecognised message: {}", e),
                }
            }

            let n = self.reader.read(&mut self.buffer).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.buffer[..n]);
        }
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let frames = encode_packet(packet, &self.codec)?;
        for frame in &frames {
            self.writer.write_all(frame).await?;
        }
        Ok(())
    }

    pub async fn send_player_update(&mut self, update: PlayerUpdate) -> Result<(), ClientError> {
        self.send_packet(&Packet::PlayerUpdate(update)).await
    }

    pub async fn send_character_selection(
        &mut self,
        character_name: &str,
        player_name: &str,
    ) -> Result<(), ClientError> {
        let selection = CharacterSelection {
            character_name: Some(character_name.to_string()),
            player_name: Some(player_name.to_string()),
            ..Default::default()
        };
        self.send_packet(&Packet::CharacterSelection(selection)).await
    }

    pub async fn send_game_start(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::GameStart(Signal::default())).await
    }

    pub async fn send_return_to_waiting_room(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::ReturnToWaitingRoom(Signal::default())).await
    }

    pub async fn send_map_selection(&mut self, target: MapTarget) -> Result<(), ClientError> {
        let mut selection = MapSelection::default();
        match target {
            MapTarget::Index(index) => selection.map_index = Some(index),
            MapTarget::Name(name) => selection.map_name = Some(name),
        }
        self.send_packet(&Packet::MapSelection(selection)).await
    }

    pub async fn send_map_data(&mut self, map_data: MapDocument) -> Result<(), ClientError> {
        self.send_packet(&Packet::MapData { map_data }).await
    }

    pub async fn send_portal_trigger(&mut self, target: MapTarget) -> Result<(), ClientError> {
        let transition = MapTransition {
            target_map: Some(target),
            ..Default::default()
        };
        self.send_packet(&Packet::PortalTrigger(transition)).await
    }

    pub async fn send_map_change(&mut self, target: MapTarget) -> Result<(), ClientError> {
        let transition = MapTransition {
            target_map: Some(target),
            ..Default::default()
        };
        self.send_packet(&Packet::MapChange(transition)).await
    }

    pub async fn send_enemy_damage(
        &mut self,
        enemy_id: &str,
        damage: f32,
        current_health: Option<f32>,
    ) -> Result<(), ClientError> {
        let packet = Packet::EnemyDamage(EnemyDamage {
            enemy_id: enemy_id.to_string(),
            damage,
            current_health,
            player_id: None,
        });
        self.send_packet(&packet).await
    }

    pub async fn send_enemy_death(&mut self, enemy_id: &str) -> Result<(), ClientError> {
        let packet = Packet::EnemyDeath(EnemyDeath {
            enemy_id: enemy_id.to_string(),
            enemy_type: None,
            player_id: None,
        });
        self.send_packet(&packet).await
    }

    pub async fn send_boss_damage(
        &mut self,
        boss_id: &str,
        damage: f32,
        current_health: Option<f32>,
    ) -> Result<(), ClientError> {
        let packet = Packet::BossDamage(BossDamage {
            boss_id: boss_id.to_string(),
            damage,
            current_health,
            player_id: None,
        });
        self.send_packet(&packet).await
    }

    pub async fn send_boss_death(&mut self, boss_id: &str) -> Result<(), ClientError> {
        let packet = Packet::BossDeath(BossDeath {
            boss_id: boss_id.to_string(),
            player_id: None,
        });
        self.send_packet(&packet).await
    }

    pub async fn send_player_damage(&mut self, target_player_id: &str, damage: f32) -> Result<(), ClientError> {
        let packet = Packet::PlayerDamage {
            target_player_id: target_player_id.to_string(),
            damage,
        };
        self.send_packet(&packet).await
    }

    pub async fn send_player_death(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::PlayerDeath(Relay::default())).await
    }

    pub async fn send_enemy_creation(&mut self, enemy_data: EnemyDescriptor) -> Result<(), ClientError> {
        self.send_packet(&Packet::EnemyCreation { enemy_data }).await
    }

    pub async fn send_projectile_create(&mut self, event: ProjectileEvent) -> Result<(), ClientError> {
        self.send_packet(&Packet::ProjectileCreate(event)).await
    }

    pub async fn send_projectile_update(&mut self, event: ProjectileEvent) -> Result<(), ClientError> {
        self.send_packet(&Packet::ProjectileUpdate(event)).await
    }

    pub async fn send_projectile_destroy(&mut self, event: ProjectileEvent) -> Result<(), ClientError> {
        self.send_packet(&Packet::ProjectileDestroy(event)).await
    }

    pub async fn send_nadir_attack(&mut self, event: ProjectileEvent) -> Result<(), ClientError> {
        self.send_packet(&Packet::NadirAttack(event)).await
    }

    /// Half-closes the socket so the server sees EOF.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        info!("Disconnecting {}", self.player_id);
        self.writer.shutdown().await?;
        Ok(())
    }
}

//! Server network layer: TCP accept loop and per-connection reader/writer tasks

use crate::client_manager::{outbound_channel, Outbound, OutboundReceiver, OUTBOUND_CAPACITY};
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::game::WorldPool;
use crate::room::{schedule_shutdown, RoomPhase, Shutdown};
use crate::router::route_value;
use crate::scheduler::run_scheduler;
use log::{debug, error, info, warn};
use shared::{FrameDecoder, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

const READ_BUFFER_SIZE: usize = 8192;
/// How long shutdown waits for writers to flush their last frames.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub const DISBAND_REASON: &str = "host_left";
pub const DISBAND_MESSAGE: &str = "The host has left the game. The room has been closed.";

/// Main server coordinating connections and the simulation
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl Server {
    /// Binds the listening socket. Failing to bind is the one fatal error.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_pool(config, WorldPool::new()).await
    }

    pub async fn bind_with_pool(config: ServerConfig, pool: WorldPool) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            context: ServerContext::new(config, pool),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Handle that stops the server when triggered
    pub fn shutdown_handle(&self) -> Shutdown {
        self.context.shutdown.clone()
    }

    /// Accepts connections until shutdown, then closes every socket.
    pub async fn run(self) -> Result<(), ServerError> {
        let context = Arc::clone(&self.context);
        let scheduler = tokio::spawn(run_scheduler(Arc::clone(&context)));
        let mut connections = JoinSet::new();

        let stop = context.shutdown.wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => accept_connection(&context, &mut connections, stream, addr).await,
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("Shutting down");
        context.room.lock().await.close();
        context.clients.read().await.close_all();

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Some connections did not close within {:?}", DRAIN_TIMEOUT);
            connections.abort_all();
        }

        if let Err(e) = scheduler.await {
            error!("Scheduler task failed: {}", e);
        }
        info!("Server stopped");
        Ok(())
    }
}

async fn accept_connection(
    ctx: &Arc<ServerContext>,
    connections: &mut JoinSet<()>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    if !ctx.room.lock().await.accepts_connections() {
        info!("Refusing connection from {} while the room is closing", addr);
        return;
    }
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set nodelay for {}: {}", addr, e);
    }

    let (tx, rx) = outbound_channel(OUTBOUND_CAPACITY);
    let eviction = rx.eviction();
    let registration = ctx.clients.write().await.add_client(addr, tx);
    let registration = match registration {
        Ok(registration) => registration,
        Err(e) => {
            // dropping the stream closes it
            warn!("Rejected connection from {}: {}", addr, e);
            return;
        }
    };
    ctx.pool.write().await.add_player(&registration.id);

    let (reader, writer) = stream.into_split();
    connections.spawn(write_loop(registration.id.clone(), writer, rx));
    connections.spawn(read_loop(Arc::clone(ctx), registration.id, reader, eviction));
}

/// Drains a client's outbound queue into its socket
///
/// Eviction also interrupts a write that is stuck on a peer that stopped reading.
async fn write_loop(id: String, mut writer: OwnedWriteHalf, mut rx: OutboundReceiver) {
    let eviction = rx.eviction();
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frames(frames) => {
                for frame in frames.iter() {
                    let written = tokio::select! {
                        _ = eviction.wait() => return,
                        written = writer.write_all(frame) => written,
                    };
                    if let Err(e) = written {
                        warn!("Write to {} failed: {}", id, e);
                        return;
                    }
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of {} failed: {}", id, e);
    }
}

/// Reads frames from one client until EOF, error, eviction or shutdown
async fn read_loop(ctx: Arc<ServerContext>, id: String, mut reader: OwnedReadHalf, eviction: Shutdown) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    let stop = ctx.shutdown.wait();
    tokio::pin!(stop);
    let evicted = eviction.wait();
    tokio::pin!(evicted);

    loop {
        let read = tokio::select! {
            _ = &mut stop => break,
            _ = &mut evicted => {
                info!("Dropping client {}: outbound queue full", id);
                break;
            }
            read = reader.read(&mut buffer) => read,
        };
        let n = match read {
            Ok(0) => {
                debug!("Client {} closed the connection", id);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Read from {} failed: {}", id, e);
                break;
            }
        };

        decoder.extend(&buffer[..n]);
        let mut active = false;
        for frame in decoder.by_ref() {
            match frame {
                Ok(value) => {
                    active = true;
                    route_value(&ctx, &id, value).await;
                }
                Err(e) => warn!("Dropping malformed frame from {}: {}", id, e),
            }
        }
        if active {
            ctx.clients.write().await.touch(&id);
        }
    }

    handle_disconnect(&ctx, &id).await;
}

/// Cleanup for a departed client. Runs its effects at most once per id.
pub async fn handle_disconnect(ctx: &ServerContext, id: &str) {
    let Some(client) = ctx.clients.write().await.remove_client(id) else {
        return;
    };
    ctx.pool.write().await.remove_player(id);
    client.close();

    if client.is_host {
        if !ctx.room.lock().await.begin_disband() {
            return;
        }
        let packet = Packet::RoomDisbanded {
            reason: DISBAND_REASON.to_string(),
            message: DISBAND_MESSAGE.to_string(),
        };
        let notified = {
            let mut clients = ctx.clients.write().await;
            clients.clear_host();
            clients.broadcast(&packet, None)
        };
        info!(
            "Host {} left, notified {} players, closing in {:?}",
            id, notified, ctx.config.shutdown_grace
        );
        schedule_shutdown(ctx.shutdown.clone(), ctx.config.shutdown_grace);
        return;
    }

    let phase = ctx.room.lock().await.phase();
    if ctx.shutdown.is_triggered() || !matches!(phase, RoomPhase::Open | RoomPhase::Running) {
        return;
    }
    let packet = Packet::PlayerDisconnect {
        player_id: id.to_string(),
    };
    ctx.clients.read().await.broadcast(&packet, None);
}

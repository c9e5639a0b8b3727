use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::game::WorldPool;
use crate::room::{RoomController, Shutdown};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// State shared by the accept loop, the connection tasks and the scheduler.
///
/// Handlers never hold two of these locks at once: they finish with the pool
/// before touching the roster or the room.
#[derive(Debug)]
pub struct ServerContext {
    pub config: ServerConfig,
    pub pool: RwLock<WorldPool>,
    pub clients: RwLock<ClientManager>,
    pub room: Mutex<RoomController>,
    pub shutdown: Shutdown,
}

impl ServerContext {
    pub fn new(config: ServerConfig, pool: WorldPool) -> Arc<Self> {
        let clients = ClientManager::new(config.codec);
        Arc::new(Self {
            config,
            pool: RwLock::new(pool),
            clients: RwLock::new(clients),
            room: Mutex::new(RoomController::new()),
            shutdown: Shutdown::new(),
        })
    }
}

//! Room lifecycle and process shutdown.
//!
//! A room starts `Open`, moves to `Running` on `game_start` and back on
//! `return_to_waiting_room`. When the host leaves it goes to `Disbanding`,
//! and once the grace period is over (or the process is asked to stop) it is
//! `Closed` and every socket is torn down.

use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Open,
    Running,
    Disbanding,
    Closed,
}

#[derive(Debug)]
pub struct RoomController {
    phase: RoomPhase,
}

impl Default for RoomController {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomController {
    pub fn new() -> Self {
        Self {
            phase: RoomPhase::Open,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn accepts_connections(&self) -> bool {
        matches!(self.phase, RoomPhase::Open | RoomPhase::Running)
    }

    /// Returns true when the room is running afterwards.
    pub fn start_game(&mut self) -> bool {
        match self.phase {
            RoomPhase::Open => {
                info!("Room: game started");
                self.phase = RoomPhase::Running;
                true
            }
            RoomPhase::Running => true,
            RoomPhase::Disbanding | RoomPhase::Closed => false,
        }
    }

    /// Returns true when the room is back in the waiting room afterwards.
    pub fn return_to_waiting_room(&mut self) -> bool {
        match self.phase {
            RoomPhase::Running => {
                info!("Room: back to the waiting room");
                self.phase = RoomPhase::Open;
                true
            }
            RoomPhase::Open => true,
            RoomPhase::Disbanding | RoomPhase::Closed => false,
        }
    }

    /// Starts disbanding. Only the first call wins.
    pub fn begin_disband(&mut self) -> bool {
        if self.accepts_connections() {
            info!("Room: disbanding");
            self.phase = RoomPhase::Disbanding;
            true
        } else {
            false
        }
    }

    pub fn close(&mut self) -> bool {
        if self.phase == RoomPhase::Closed {
            return false;
        }
        info!("Room: closed");
        self.phase = RoomPhase::Closed;
        true
    }
}

/// One-shot stop signal. The process-wide instance is shared by the accept
/// loop, the scheduler and every connection task; each connection also gets
/// its own for eviction.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Triggers `shutdown` after `grace`, unless something else stops the server first.
pub fn schedule_shutdown(shutdown: Shutdown, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(grace) => {
                info!("Grace period of {:?} over, shutting down", grace);
                shutdown.trigger();
            }
            _ = shutdown.wait() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_room_transitions() {
        let mut room = RoomController::new();
        assert_eq!(room.phase(), RoomPhase::Open);
        assert!(room.accepts_connections());

        assert!(room.start_game());
        assert_eq!(room.phase(), RoomPhase::Running);
        assert!(room.start_game());

        assert!(room.return_to_waiting_room());
        assert_eq!(room.phase(), RoomPhase::Open);

        assert!(room.begin_disband());
        assert!(!room.begin_disband());
        assert!(!room.accepts_connections());
        assert!(!room.start_game());
        assert!(!room.return_to_waiting_room());

        assert!(room.close());
        assert!(!room.close());
        assert_eq!(room.phase(), RoomPhase::Closed);
        assert!(!room.begin_disband());
    }

    #[tokio::test]
    async fn test_shutdown_wait() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        assert!(shutdown.is_triggered());
        // already triggered resolves immediately
        tokio::time::timeout(Duration::from_millis(50), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_schedule_shutdown_waits_for_grace() {
        let shutdown = Shutdown::new();
        let started = Instant::now();
        let handle = schedule_shutdown(shutdown.clone(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!shutdown.is_triggered());

        handle.await.unwrap();
        assert!(shutdown.is_triggered());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_scheduled_shutdown_cancelled_by_early_stop() {
        let shutdown = Shutdown::new();
        let handle = schedule_shutdown(shutdown.clone(), Duration::from_secs(60));
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

use crate::context::ServerContext;
use crate::game::WorldPool;
use crate::utils::capped_delta;
use log::{debug, info};
use shared::Packet;
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Longest simulated step; slower ticks are clamped to this.
pub const MAX_DELTA: f32 = 1.0 / 20.0;

/// Full-state snapshots to broadcast this sync interval.
///
/// Enemies are sent whenever a map is loaded, even when none are left, so
/// clients drop the ones that died. Bosses are only sent while one is alive.
pub fn sync_packets(pool: &WorldPool) -> Vec<Packet> {
    let mut packets = Vec::with_capacity(2);
    if pool.current_map().is_some() || pool.enemy_count() > 0 {
        packets.push(Packet::EnemiesSync {
            enemies: pool.snapshot_enemies(),
        });
    }
    if pool.boss_count() > 0 {
        packets.push(Packet::BossesSync {
            bosses: pool.snapshot_bosses(),
        });
    }
    packets
}

/// Runs the simulation tick and the snapshot broadcast until shutdown.
///
/// Both cadences have their own timer so sync can be throttled without
/// slowing the simulation. The step uses the measured wall-clock delta.
pub async fn run_scheduler(ctx: Arc<ServerContext>) {
    let mut tick_timer = interval(ctx.config.tick_interval());
    tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sync_timer = interval(ctx.config.sync_interval());
    sync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let stop = ctx.shutdown.wait();
    tokio::pin!(stop);

    let mut last_update = Instant::now();
    info!(
        "Scheduler running at {} Hz simulation, {} Hz sync",
        ctx.config.tick_rate, ctx.config.sync_rate
    );

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tick_timer.tick() => {
                let now = Instant::now();
                let delta = capped_delta((now - last_update).as_secs_f32(), MAX_DELTA);
                last_update = now;

                let report = ctx.pool.write().await.update(delta);
                if !report.failed.is_empty() {
                    debug!("{} entities skipped this tick", report.failed.len());
                }
            }
            _ = sync_timer.tick() => {
                let packets = {
                    let pool = ctx.pool.read().await;
                    sync_packets(&pool)
                };
                if !packets.is_empty() {
                    let clients = ctx.clients.read().await;
                    for packet in &packets {
                        clients.broadcast(packet, None);
                    }
                }
            }
        }
    }

    info!("Scheduler stopped");
}

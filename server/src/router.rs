//! Dispatch of decoded client messages.
//!
//! Each handler takes the pool lock for a single mutation, releases it, and
//! only then takes the roster lock to fan the result out.

use crate::context::ServerContext;
use crate::game::{DamageOutcome, MapLoad};
use log::{debug, info, warn};
use serde_json::Value;
use shared::{
    BossDamage, BossDeath, EnemyDamage, EnemyDeath, MapTransition, Packet, ProjectileEvent, Signal,
};

/// Decodes a raw frame into a [`Packet`] and dispatches it.
///
/// Unknown or malformed messages are logged and dropped.
pub async fn route_value(ctx: &ServerContext, sender: &str, value: Value) {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();

    match Packet::from_value(value) {
        Ok(packet) => dispatch(ctx, sender, packet).await,
        Err(e) => warn!("Dropping {} message from {}: {}", kind, sender, e),
    }
}

async fn sender_is_host(ctx: &ServerContext, sender: &str, kind: &str) -> bool {
    let is_host = ctx.clients.read().await.is_host(sender);
    if !is_host {
        warn!("Ignoring {} from non-host {}", kind, sender);
    }
    is_host
}

async fn broadcast(ctx: &ServerContext, packet: &Packet, exclude: Option<&str>) -> usize {
    ctx.clients.read().await.broadcast(packet, exclude)
}

async fn announce_map(ctx: &ServerContext, load: MapLoad) {
    let enemies_count = load.entity_count();
    let packet = Packet::MapReady {
        map_name: load.map_name,
        enemies_count,
    };
    broadcast(ctx, &packet, None).await;
}

/// Applies one client message to the world and forwards it as needed.
///
/// `game_start` and `return_to_waiting_room` pass through the room state
/// machine before they are relayed to everyone, the sender included. They
/// move the room between `Open` and `Running` (a repeat is relayed again), and
/// once the room is disbanding or closed both are dropped.
pub async fn dispatch(ctx: &ServerContext, sender: &str, packet: Packet) {
    let kind = packet.type_name();
    debug!("{} from {}", kind, sender);

    match packet {
        Packet::PlayerUpdate(mut update) => {
            update.player_id = Some(sender.to_string());
            ctx.pool.write().await.update_player(sender, &update);
            broadcast(ctx, &Packet::PlayerUpdate(update), Some(sender)).await;
        }
        Packet::CharacterSelection(mut selection) => {
            selection.player_id = Some(sender.to_string());
            let character = selection.character_name.as_deref();
            let name = selection.player_name.as_deref();
            ctx.pool.write().await.select_character(sender, character, name);
            ctx.clients.write().await.record_selection(sender, character, name);
            broadcast(ctx, &Packet::CharacterSelection(selection), Some(sender)).await;
        }
        Packet::GameStart(signal) => {
            if !sender_is_host(ctx, sender, kind).await {
                return;
            }
            if ctx.room.lock().await.start_game() {
                broadcast(ctx, &Packet::GameStart(with_sender(signal, sender)), None).await;
            }
        }
        Packet::ReturnToWaitingRoom(signal) => {
            if ctx.room.lock().await.return_to_waiting_room() {
                broadcast(ctx, &Packet::ReturnToWaitingRoom(with_sender(signal, sender)), None).await;
            }
        }
        Packet::MapSelection(mut selection) => {
            if !sender_is_host(ctx, sender, kind).await {
                return;
            }
            selection.player_id = Some(sender.to_string());
            broadcast(ctx, &Packet::MapSelection(selection), Some(sender)).await;
        }
        Packet::MapData { map_data } => {
            if !sender_is_host(ctx, sender, kind).await {
                return;
            }
            let load = ctx.pool.write().await.set_map_data(map_data);
            announce_map(ctx, load).await;
        }
        Packet::PortalTrigger(transition) => {
            let transition = reload_for(ctx, sender, transition).await;
            broadcast(ctx, &Packet::PortalTrigger(transition), None).await;
        }
        Packet::MapChange(transition) => {
            if !sender_is_host(ctx, sender, kind).await {
                return;
            }
            let transition = reload_for(ctx, sender, transition).await;
            broadcast(ctx, &Packet::MapChange(transition), None).await;
        }
        Packet::EnemyDamage(damage) => handle_enemy_damage(ctx, sender, damage).await,
        Packet::EnemyDeath(death) => handle_enemy_death(ctx, sender, death).await,
        Packet::BossDamage(damage) => handle_boss_damage(ctx, sender, damage).await,
        Packet::BossDeath(death) => handle_boss_death(ctx, sender, death).await,
        Packet::PlayerDamage {
            target_player_id,
            damage,
        } => {
            let packet = Packet::PlayerDamageReceived {
                damage,
                from_player_id: sender.to_string(),
            };
            if let Err(e) = ctx.clients.read().await.send_to(&target_player_id, &packet) {
                warn!("Could not deliver damage from {}: {}", sender, e);
            }
        }
        Packet::PlayerDeath(mut relay) => {
            relay.player_id = Some(sender.to_string());
            broadcast(ctx, &Packet::PlayerDeath(relay), None).await;
        }
        Packet::EnemyCreation { enemy_data } => {
            let mut pool = ctx.pool.write().await;
            if enemy_data.is_boss() {
                let id = format!("boss_{}", shared::random_token(8));
                if pool.add_boss(id.clone(), &enemy_data) {
                    info!("{} spawned boss {}", sender, id);
                }
            } else if let Some(id) = pool.spawn_enemy(&enemy_data) {
                info!("{} spawned {} {} as {}", sender, enemy_data.kind, enemy_data.variant, id);
            }
        }
        Packet::ProjectileCreate(event) => relay_projectile(ctx, sender, event, Packet::ProjectileCreate).await,
        Packet::ProjectileUpdate(event) => relay_projectile(ctx, sender, event, Packet::ProjectileUpdate).await,
        Packet::ProjectileDestroy(event) => relay_projectile(ctx, sender, event, Packet::ProjectileDestroy).await,
        Packet::NadirAttack(event) => relay_projectile(ctx, sender, event, Packet::NadirAttack).await,
        Packet::PlayerId { .. }
        | Packet::PlayerDisconnect { .. }
        | Packet::RoomDisbanded { .. }
        | Packet::PlayerDamageReceived { .. }
        | Packet::MapReady { .. }
        | Packet::EnemiesSync { .. }
        | Packet::BossesSync { .. } => {
            warn!("Ignoring server-only message {} from {}", kind, sender);
        }
    }
}

fn with_sender(mut signal: Signal, sender: &str) -> Signal {
    signal.player_id = Some(sender.to_string());
    signal
}

async fn relay_projectile(
    ctx: &ServerContext,
    sender: &str,
    mut event: ProjectileEvent,
    wrap: fn(ProjectileEvent) -> Packet,
) {
    event.player_id = Some(sender.to_string());
    broadcast(ctx, &wrap(event), Some(sender)).await;
}

// Respawns the target map server-side when it has been uploaded before
async fn reload_for(ctx: &ServerContext, sender: &str, mut transition: MapTransition) -> MapTransition {
    transition.player_id = Some(sender.to_string());
    let Some(target) = transition.target_map.clone() else {
        return transition;
    };

    let load = ctx.pool.write().await.load_catalog_map(&target);
    if let Some(load) = load {
        announce_map(ctx, load).await;
    }
    transition
}

async fn handle_enemy_damage(ctx: &ServerContext, sender: &str, damage: EnemyDamage) {
    let outcome = ctx
        .pool
        .write()
        .await
        .apply_enemy_damage(&damage.enemy_id, damage.damage, damage.current_health);

    let health = match outcome {
        DamageOutcome::Missing => {
            debug!("Damage for unknown enemy {} from {}", damage.enemy_id, sender);
            return;
        }
        DamageOutcome::Damaged { health } => health,
        DamageOutcome::Killed { .. } => 0.0,
    };

    let update = Packet::EnemyDamage(EnemyDamage {
        enemy_id: damage.enemy_id.clone(),
        damage: damage.damage,
        current_health: Some(health),
        player_id: Some(sender.to_string()),
    });
    broadcast(ctx, &update, None).await;

    if let DamageOutcome::Killed { kind } = outcome {
        let death = Packet::EnemyDeath(EnemyDeath {
            enemy_id: damage.enemy_id,
            enemy_type: Some(kind.to_string()),
            player_id: Some(sender.to_string()),
        });
        broadcast(ctx, &death, None).await;
    }
}

async fn handle_enemy_death(ctx: &ServerContext, sender: &str, mut death: EnemyDeath) {
    let removed = ctx.pool.write().await.remove_enemy(&death.enemy_id);
    if let Some(enemy) = removed {
        death.enemy_type.get_or_insert_with(|| enemy.kind.as_str().to_string());
    }
    death.player_id = Some(sender.to_string());
    broadcast(ctx, &Packet::EnemyDeath(death), None).await;
}

async fn handle_boss_damage(ctx: &ServerContext, sender: &str, damage: BossDamage) {
    let (outcome, remaining) = {
        let mut pool = ctx.pool.write().await;
        let outcome = pool.apply_boss_damage(&damage.boss_id, damage.damage, damage.current_health);
        (outcome, pool.boss_count())
    };

    let health = match outcome {
        DamageOutcome::Missing => {
            debug!("Damage for unknown boss {} from {}", damage.boss_id, sender);
            return;
        }
        DamageOutcome::Damaged { health } => health,
        DamageOutcome::Killed { .. } => 0.0,
    };

    let update = Packet::BossDamage(BossDamage {
        boss_id: damage.boss_id.clone(),
        damage: damage.damage,
        current_health: Some(health),
        player_id: Some(sender.to_string()),
    });
    broadcast(ctx, &update, None).await;

    if matches!(outcome, DamageOutcome::Killed { .. }) {
        let death = Packet::BossDeath(BossDeath {
            boss_id: damage.boss_id,
            player_id: Some(sender.to_string()),
        });
        broadcast(ctx, &death, None).await;
        if remaining == 0 {
            declare_victory(ctx).await;
        }
    }
}

async fn handle_boss_death(ctx: &ServerContext, sender: &str, mut death: BossDeath) {
    let (removed, remaining) = {
        let mut pool = ctx.pool.write().await;
        let removed = pool.remove_boss(&death.boss_id, true).is_some();
        (removed, pool.boss_count())
    };
    if !removed {
        debug!("Boss {} was already gone", death.boss_id);
        return;
    }

    death.player_id = Some(sender.to_string());
    broadcast(ctx, &Packet::BossDeath(death), None).await;
    if remaining == 0 {
        declare_victory(ctx).await;
    }
}

// Last boss down: everyone goes back to the waiting room
async fn declare_victory(ctx: &ServerContext) {
    info!("All bosses defeated");
    ctx.room.lock().await.return_to_waiting_room();
    broadcast(ctx, &Packet::ReturnToWaitingRoom(Signal::default()), None).await;
}

//! Per-tick enemy and boss behavior.
//!
//! Regular enemies move in pixels per 60 Hz frame, so their velocities are
//! scaled by `dt * 60` on integration. Bosses move in pixels per second.

use crate::entity::{Behavior, BossEntity, BossProjectile, EnemyEntity};
use crate::physics::{Platform, Vector2};
use log::error;
use rand::Rng;
use shared::{animation_frame_count, AiState, BossMode, JumpPhase, FRAME_RATE, GRAVITY};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

pub const ATTACK_ENTER_DISTANCE: f32 = 80.0;
pub const ATTACK_EXIT_DISTANCE: f32 = 120.0;
pub const ANIMATION_FRAME_SECONDS: f32 = 0.1;

pub const BOSS_CHARGE_SPEED: f32 = 200.0;
pub const BOSS_JUMP_VELOCITY: f32 = 1280.0;
pub const BOSS_JUMP_GRAVITY: f32 = 2400.0;
pub const BOSS_JUMP_STEER_SPEED: f32 = 300.0;
pub const VOLLEY_INTERVAL: f32 = 0.2;
pub const VOLLEY_SIZE: usize = 12;
pub const PROJECTILE_SPEED: f32 = 200.0;
pub const PROJECTILE_LIFETIME: f32 = 3.0;
pub const PROJECTILE_RADIUS: f32 = 16.0;
const PROJECTILE_SPAWN_OFFSET: f32 = 100.0;
const PROJECTILE_MIN: Vector2 = Vector2 { x: -50.0, y: -50.0 };
const PROJECTILE_MAX: Vector2 = Vector2 { x: 1970.0, y: 1130.0 };

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("entity {0} reached a non-finite position")]
    NonFinite(String),
    #[error("entity {0} panicked during update")]
    Panicked(String),
}

/// A player position as seen by the AI for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerTarget {
    pub id: String,
    pub position: Vector2,
}

/// Result of one simulation step over the whole pool.
#[derive(Debug, Default)]
pub struct TickReport {
    pub updated: usize,
    pub failed: Vec<String>,
}

pub fn nearest_player(from: Vector2, players: &[PlayerTarget]) -> Option<(&PlayerTarget, f32)> {
    players
        .iter()
        .map(|p| (p, from.distance(&p.position)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn advance_animation(frame_index: &mut u32, timer: &mut f32, dt: f32, frame_count: u32) {
    *timer += dt;
    while *timer >= ANIMATION_FRAME_SECONDS {
        *timer -= ANIMATION_FRAME_SECONDS;
        *frame_index = (*frame_index + 1) % frame_count.max(1);
    }
}

/// Updates target and AI state from the nearest player.
///
/// Returns the position to pursue when the enemy is chasing or attacking.
pub fn update_targeting(enemy: &mut EnemyEntity, players: &[PlayerTarget]) -> Option<Vector2> {
    let (player, distance) = match nearest_player(enemy.body.center(), players) {
        Some(found) => found,
        None => {
            enemy.state = AiState::Patrol;
            enemy.target_player_id = None;
            return None;
        }
    };

    if distance <= enemy.aggro_range {
        if enemy.state == AiState::Patrol {
            enemy.state = AiState::Chase;
        }
        enemy.target_player_id = Some(player.id.clone());
    } else if distance > enemy.aggro_range * enemy.behavior.release_multiplier() {
        enemy.state = AiState::Patrol;
        enemy.target_player_id = None;
    }

    match enemy.state {
        AiState::Patrol => return None,
        AiState::Chase if distance <= ATTACK_ENTER_DISTANCE => enemy.state = AiState::Attack,
        AiState::Attack if distance > ATTACK_EXIT_DISTANCE => enemy.state = AiState::Chase,
        _ => {}
    }

    if enemy.state == AiState::Attack && enemy.elapsed - enemy.last_attack_time >= enemy.attack_cooldown {
        enemy.last_attack_time = enemy.elapsed;
    }

    Some(player.position)
}

// Direction that keeps a patrolling enemy inside its range.
fn patrol_direction(enemy: &mut EnemyEntity) -> f32 {
    let offset = enemy.body.bounds.x - enemy.patrol_origin_x;
    if offset >= enemy.patrol_range {
        enemy.patrol_direction = -1.0;
    } else if offset <= -enemy.patrol_range {
        enemy.patrol_direction = 1.0;
    }
    enemy.patrol_direction
}

fn hop(enemy: &mut EnemyEntity, direction: f32, horizontal_speed: f32) {
    enemy.body.velocity.y = -enemy.jump_strength;
    enemy.body.velocity.x = horizontal_speed * direction;
    enemy.body.grounded = false;
    enemy.jump_timer = 0.0;
    if direction != 0.0 {
        enemy.facing_right = direction > 0.0;
    }
    enemy.set_animation("jump");
}

fn update_hopper(enemy: &mut EnemyEntity, target: Option<Vector2>, dt: f32) {
    enemy.jump_timer += dt;
    let (patrol_speed, chase_speed) = match enemy.behavior {
        Behavior::Slime => (enemy.speed * 0.8, enemy.speed * 0.8),
        _ => (enemy.speed, enemy.speed * 1.2),
    };

    let (direction, speed, interval) = match target {
        Some(position) => (
            sign(position.x - enemy.body.center().x),
            chase_speed,
            enemy.jump_interval * 0.6,
        ),
        None => (patrol_direction(enemy), patrol_speed, enemy.jump_interval),
    };

    if !enemy.body.grounded {
        return;
    }

    if enemy.jump_timer >= interval {
        hop(enemy, direction, speed);
    } else {
        enemy.body.velocity.x = 0.0;
        enemy.set_animation("idle");
    }
}

fn update_wall_crawler(enemy: &mut EnemyEntity, target: Option<Vector2>) {
    match target {
        None => {
            let angle = enemy.elapsed * enemy.speed * 0.5;
            enemy.body.velocity = Vector2::new(angle.cos() * enemy.speed, angle.sin() * enemy.speed * 0.5);
            enemy.set_animation("move");
        }
        Some(position) => {
            let offset = position.sub(&enemy.body.center());
            if offset.magnitude() > 10.0 {
                enemy.body.velocity = offset.normalize().scale(enemy.speed * 1.2);
                enemy.set_animation("move");
            } else {
                enemy.body.velocity = Vector2::default();
                enemy.set_animation("idle");
            }
        }
    }

    let velocity = enemy.body.velocity;
    if velocity.x != 0.0 {
        enemy.facing_right = velocity.x > 0.0;
    }
    if velocity.magnitude() > 0.0 {
        enemy.rotation = velocity.y.atan2(velocity.x).to_degrees();
    }
}

fn update_vulture(enemy: &mut EnemyEntity, target: Option<Vector2>) {
    match target {
        None => {
            let direction = patrol_direction(enemy);
            enemy.body.velocity.x = enemy.speed * direction;
            enemy.facing_right = direction > 0.0;

            let center = (enemy.flight_min + enemy.flight_max) / 2.0;
            let amplitude = (enemy.flight_max - enemy.flight_min) / 4.0;
            let target_y = center + (enemy.elapsed * 2.0).sin() * amplitude;
            let diff = target_y - enemy.body.bounds.y;
            enemy.body.velocity.y = if diff.abs() > 5.0 {
                sign(diff) * enemy.speed * 0.5
            } else {
                0.0
            };
            enemy.rotation = 0.0;
            enemy.set_animation("move");
        }
        Some(position) => {
            let offset = position.sub(&enemy.body.center());
            let distance = offset.magnitude();
            if distance > 20.0 {
                enemy.body.velocity = offset.normalize().scale(enemy.speed * 1.5);
                enemy.facing_right = offset.x > 0.0;
                enemy.rotation = offset.y.atan2(offset.x).to_degrees();
                enemy.set_animation("move");
            } else {
                enemy.body.velocity = enemy.body.velocity.scale(0.5);
                enemy.rotation = 0.0;
                enemy.set_animation("idle");
            }
        }
    }
}

fn integrate_enemy(enemy: &mut EnemyEntity, platforms: &[Platform], frames: f32) {
    let behavior = enemy.behavior;
    if behavior.has_gravity() {
        enemy.body.velocity.y += GRAVITY * frames;
    }

    enemy.body.grounded = false;
    enemy.body.advance(frames);

    if behavior.collides_with_platforms() {
        let contacts = enemy.body.resolve_collisions(platforms);
        if contacts.wall && behavior.hops() {
            enemy.patrol_direction = -enemy.patrol_direction;
        }
    }

    let edges = enemy.body.clamp_to_world(behavior.bounces());
    if edges.horizontal() {
        enemy.patrol_direction = -enemy.patrol_direction;
    }
}

/// Advances one enemy by `dt` seconds.
pub fn update_enemy(
    enemy: &mut EnemyEntity,
    players: &[PlayerTarget],
    platforms: &[Platform],
    dt: f32,
) -> Result<(), SimulationError> {
    enemy.elapsed += dt;
    let target = update_targeting(enemy, players);

    match enemy.behavior {
        Behavior::Slime | Behavior::SpiderCrawling => update_hopper(enemy, target, dt),
        Behavior::SpiderStatic => {
            enemy.body.velocity.x = 0.0;
            if let Some(position) = target {
                enemy.facing_right = position.x > enemy.body.center().x;
            }
            enemy.set_animation("idle");
        }
        Behavior::SpiderWall => update_wall_crawler(enemy, target),
        Behavior::Vulture => update_vulture(enemy, target),
    }

    integrate_enemy(enemy, platforms, dt * FRAME_RATE);

    let frames = animation_frame_count(enemy.kind.as_str(), &enemy.current_animation);
    advance_animation(&mut enemy.frame_index, &mut enemy.animation_timer, dt, frames);

    if !enemy.body.position().is_finite() || !enemy.body.velocity.is_finite() {
        return Err(SimulationError::NonFinite(enemy.id.clone()));
    }
    Ok(())
}

fn switch_boss_mode<R: Rng + ?Sized>(boss: &mut BossEntity, rng: &mut R) {
    let choices = match boss.mode {
        BossMode::Running => [BossMode::Jumping, BossMode::Skilling],
        BossMode::Jumping => [BossMode::Running, BossMode::Skilling],
        BossMode::Skilling => [BossMode::Running, BossMode::Jumping],
    };
    let next = choices[rng.gen_range(0..choices.len())];

    if boss.mode == BossMode::Skilling {
        boss.projectiles.clear();
    }

    boss.mode = next;
    boss.mode_timer = 0.0;
    boss.body.velocity = Vector2::default();

    match next {
        BossMode::Running => boss.set_animation("running"),
        BossMode::Jumping => {
            boss.jump_phase = JumpPhase::Grounded;
            boss.jump_target = None;
            boss.set_animation("jumping");
        }
        BossMode::Skilling => {
            boss.skill_timer = 0.0;
            boss.volley_timer = 0.0;
            boss.set_animation("skilling");
        }
    }
}

fn update_boss_running(boss: &mut BossEntity, players: &[PlayerTarget], dt: f32) {
    let center = boss.body.center();
    boss.body.velocity = match nearest_player(center, players) {
        Some((player, distance)) if distance > 1.0 => {
            let direction = player.position.sub(&center).normalize();
            boss.facing_right = direction.x > 0.0;
            direction.scale(BOSS_CHARGE_SPEED)
        }
        _ => Vector2::default(),
    };
    boss.body.advance(dt);
}

fn steer_jump(boss: &mut BossEntity) {
    if let Some(target) = boss.jump_target {
        let dx = target.x - boss.body.center().x;
        if dx.abs() > 5.0 {
            boss.body.velocity.x = sign(dx) * BOSS_JUMP_STEER_SPEED;
            boss.facing_right = dx > 0.0;
        } else {
            boss.body.velocity.x = 0.0;
        }
    }
}

fn update_boss_jumping<R: Rng + ?Sized>(
    boss: &mut BossEntity,
    players: &[PlayerTarget],
    platforms: &[Platform],
    dt: f32,
    rng: &mut R,
) {
    match boss.jump_phase {
        JumpPhase::Grounded => {
            boss.body.velocity = Vector2::default();
            if players.is_empty() {
                return;
            }
            let target = &players[rng.gen_range(0..players.len())];
            boss.jump_target = Some(target.position);
            boss.body.velocity.y = -BOSS_JUMP_VELOCITY;
            boss.body.grounded = false;
            boss.jump_phase = JumpPhase::Rising;
            boss.set_animation("jumping");
        }
        JumpPhase::Rising => {
            steer_jump(boss);
            boss.body.velocity.y += BOSS_JUMP_GRAVITY * dt;
            boss.body.advance(dt);
            if boss.body.velocity.y >= 0.0 {
                boss.jump_phase = JumpPhase::Falling;
                boss.set_animation("falling");
            }
        }
        JumpPhase::Falling => {
            steer_jump(boss);
            boss.body.velocity.y += BOSS_JUMP_GRAVITY * 2.0 * dt;
            boss.body.advance(dt);
            let landed_on_platform = boss.body.resolve_collisions(platforms).landed;
            let landed_on_floor = boss.body.clamp_to_world(false).bottom;
            if landed_on_platform || landed_on_floor {
                boss.body.velocity = Vector2::default();
                boss.jump_phase = JumpPhase::Grounded;
                boss.jump_target = None;
                boss.set_animation("running");
            }
        }
    }
}

fn spawn_volley(boss: &mut BossEntity) {
    let center = boss.body.center();
    let damage = boss.projectile_damage();
    for i in 0..VOLLEY_SIZE {
        let angle = std::f32::consts::TAU * i as f32 / VOLLEY_SIZE as f32;
        let direction = Vector2::new(angle.cos(), angle.sin());
        boss.projectiles.push(BossProjectile {
            position: center.add(&direction.scale(PROJECTILE_SPAWN_OFFSET)),
            velocity: direction.scale(PROJECTILE_SPEED),
            damage,
            lifetime: PROJECTILE_LIFETIME,
            radius: PROJECTILE_RADIUS,
        });
    }
}

fn update_boss_skilling(boss: &mut BossEntity, dt: f32) {
    boss.body.velocity = Vector2::default();
    if boss.skill_timer >= boss.skill_duration {
        return;
    }

    boss.skill_timer += dt;
    boss.volley_timer += dt;
    if boss.volley_timer >= VOLLEY_INTERVAL {
        boss.volley_timer -= VOLLEY_INTERVAL;
        spawn_volley(boss);
    }

    if boss.skill_timer >= boss.skill_duration {
        boss.projectiles.clear();
    }
}

fn update_projectiles(projectiles: &mut Vec<BossProjectile>, dt: f32) {
    for projectile in projectiles.iter_mut() {
        projectile.position = projectile.position.add(&projectile.velocity.scale(dt));
        projectile.lifetime -= dt;
    }
    projectiles.retain(|p| {
        p.lifetime > 0.0
            && p.position.x >= PROJECTILE_MIN.x
            && p.position.x <= PROJECTILE_MAX.x
            && p.position.y >= PROJECTILE_MIN.y
            && p.position.y <= PROJECTILE_MAX.y
    });
}

/// Advances one boss by `dt` seconds.
pub fn update_boss<R: Rng + ?Sized>(
    boss: &mut BossEntity,
    players: &[PlayerTarget],
    platforms: &[Platform],
    dt: f32,
    rng: &mut R,
) -> Result<(), SimulationError> {
    boss.mode_timer += dt;
    // a jump always finishes before the mode changes
    if boss.mode_timer >= boss.mode_duration && boss.jump_phase == JumpPhase::Grounded {
        switch_boss_mode(boss, rng);
    }

    match boss.mode {
        BossMode::Running => update_boss_running(boss, players, dt),
        BossMode::Jumping => update_boss_jumping(boss, players, platforms, dt, rng),
        BossMode::Skilling => update_boss_skilling(boss, dt),
    }

    update_projectiles(&mut boss.projectiles, dt);
    boss.body.clamp_to_world(false);

    let frames = animation_frame_count("boss", &boss.current_animation);
    advance_animation(&mut boss.frame_index, &mut boss.animation_timer, dt, frames);

    if !boss.body.position().is_finite() || !boss.body.velocity.is_finite() {
        return Err(SimulationError::NonFinite(boss.id.clone()));
    }
    Ok(())
}

// Runs an update on a copy and commits it only on success.
fn isolated<T, F>(id: &str, entity: &mut T, update: F) -> Result<(), SimulationError>
where
    T: Clone,
    F: FnOnce(&mut T) -> Result<(), SimulationError>,
{
    let mut next = entity.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| update(&mut next).map(|_| next))) {
        Ok(Ok(next)) => {
            *entity = next;
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(SimulationError::Panicked(id.to_string())),
    }
}

/// Advances every enemy and boss. A failing entity is logged and left as it was.
pub fn step_world<R: Rng + ?Sized>(
    enemies: &mut BTreeMap<String, EnemyEntity>,
    bosses: &mut BTreeMap<String, BossEntity>,
    players: &[PlayerTarget],
    platforms: &[Platform],
    dt: f32,
    rng: &mut R,
) -> TickReport {
    let mut report = TickReport::default();

    for (id, enemy) in enemies.iter_mut() {
        match isolated(id, enemy, |e| update_enemy(e, players, platforms, dt)) {
            Ok(()) => report.updated += 1,
            Err(e) => {
                error!("Skipping enemy {} this tick: {}", id, e);
                report.failed.push(id.clone());
            }
        }
    }

    for (id, boss) in bosses.iter_mut() {
        match isolated(id, boss, |b| update_boss(b, players, platforms, dt, &mut *rng)) {
            Ok(()) => report.updated += 1,
            Err(e) => {
                error!("Skipping boss {} this tick: {}", id, e);
                report.failed.push(id.clone());
            }
        }
    }

    report
}

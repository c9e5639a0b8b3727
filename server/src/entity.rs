//! Simulated entities held by the world pool.
//!
//! Entities reference each other only by id. Targets are looked up again on
//! every tick so a player leaving mid-tick never leaves a dangling reference.

use crate::physics::{Body, Vector2};
use shared::{
    AiState, BossMode, BossProjectileSnapshot, BossSnapshot, Coord, EnemyDescriptor, EnemyKind,
    EnemySnapshot, JumpPhase, PlayerUpdate, REFERENCE_HEIGHT,
};
use std::time::Instant;

pub const DEFAULT_ENEMY_HEALTH: f32 = 50.0;
pub const DEFAULT_ATTACK_POWER: f32 = 10.0;
pub const DEFAULT_SPEED: f32 = 2.0;
pub const DEFAULT_PATROL_RANGE: f32 = 200.0;
pub const DEFAULT_AGGRO_RANGE: f32 = 150.0;

pub const SLIME_JUMP_STRENGTH: f32 = 35.0;
pub const SLIME_JUMP_INTERVAL: f32 = 2.0;
pub const SPIDER_JUMP_STRENGTH: f32 = 25.0;
pub const SPIDER_JUMP_INTERVAL: f32 = 3.0;

pub const BOSS_BASE_HEALTH: f32 = 2000.0;
pub const BOSS_BASE_ATTACK: f32 = 30.0;
pub const BOSS_WIDTH: f32 = 400.0;
pub const BOSS_HEIGHT: f32 = 300.0;
pub const BOSS_MODE_DURATION: f32 = 6.0;
pub const BOSS_SKILL_DURATION: f32 = 5.0;
pub const BOSS_PROJECTILE_DAMAGE: f32 = 25.0;

const PLAYER_HEALTH: f32 = 100.0;

/// Health multiplier applied to a boss spawned while `player_count` players are connected.
pub fn boss_multiplier(player_count: usize) -> f32 {
    1.0 + 0.5 * (player_count.max(1) - 1) as f32
}

#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: String,
    pub position: Vector2,
    pub velocity: Vector2,
    pub facing_right: bool,
    pub on_ground: bool,
    pub character_name: Option<String>,
    pub player_name: String,
    pub current_animation: String,
    pub frame_index: u32,
    pub health: f32,
    pub max_health: f32,
    pub last_update: Instant,
}

impl PlayerEntity {
    pub fn new(id: &str, player_name: String) -> Self {
        Self {
            id: id.to_string(),
            position: Vector2::new(100.0, 100.0),
            velocity: Vector2::default(),
            facing_right: true,
            on_ground: false,
            character_name: None,
            player_name,
            current_animation: "idle".to_string(),
            frame_index: 0,
            health: PLAYER_HEALTH,
            max_health: PLAYER_HEALTH,
            last_update: Instant::now(),
        }
    }

    /// Merges a partial update. Fields absent from the update keep their value.
    pub fn apply(&mut self, update: &PlayerUpdate) {
        if let Some((x, y)) = update.position() {
            self.position = Vector2::new(x, y);
        }
        if let Some(vel_x) = update.vel_x {
            self.velocity.x = vel_x;
        }
        if let Some(vel_y) = update.vel_y {
            self.velocity.y = vel_y;
        }
        if let Some(facing_right) = update.facing_right {
            self.facing_right = facing_right;
        }
        if let Some(on_ground) = update.on_ground {
            self.on_ground = on_ground;
        }
        if let Some(name) = &update.character_name {
            self.character_name = Some(name.clone());
        }
        if let Some(name) = &update.player_name {
            self.player_name = name.clone();
        }
        if let Some(animation) = &update.current_animation {
            self.current_animation = animation.clone();
        }
        if let Some(frame) = update.frame_index {
            self.frame_index = frame;
        }
        if let Some(max_health) = update.max_health {
            self.max_health = max_health;
        }
        if let Some(health) = update.health {
            self.health = health;
        }
        self.last_update = Instant::now();
    }

    pub fn snapshot(&self) -> PlayerUpdate {
        PlayerUpdate {
            player_id: Some(self.id.clone()),
            x: Some(self.position.x),
            y: Some(self.position.y),
            vel_x: Some(self.velocity.x),
            vel_y: Some(self.velocity.y),
            facing_right: Some(self.facing_right),
            on_ground: Some(self.on_ground),
            character_name: self.character_name.clone(),
            player_name: Some(self.player_name.clone()),
            current_animation: Some(self.current_animation.clone()),
            frame_index: Some(self.frame_index),
            health: Some(self.health),
            max_health: Some(self.max_health),
            ..Default::default()
        }
    }
}

/// Movement model, picked from the enemy type and variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Slime,
    SpiderStatic,
    SpiderCrawling,
    SpiderWall,
    Vulture,
}

impl Behavior {
    pub fn from_kind(kind: EnemyKind, variant: &str) -> Self {
        match kind {
            EnemyKind::Slime => Behavior::Slime,
            EnemyKind::Spider => match variant {
                "ground_static" => Behavior::SpiderStatic,
                "wall_crawling" => Behavior::SpiderWall,
                _ => Behavior::SpiderCrawling,
            },
            EnemyKind::Vulture => Behavior::Vulture,
        }
    }

    /// Collision footprint in pixels.
    pub fn footprint(&self) -> (f32, f32) {
        match self {
            Behavior::Slime => (64.0, 48.0),
            Behavior::SpiderStatic | Behavior::SpiderCrawling => (156.0, 48.0),
            Behavior::SpiderWall => (120.0, 120.0),
            Behavior::Vulture => (140.0, 116.0),
        }
    }

    pub fn has_gravity(&self) -> bool {
        !matches!(self, Behavior::SpiderWall | Behavior::Vulture)
    }

    pub fn bounces(&self) -> bool {
        matches!(self, Behavior::SpiderWall | Behavior::Vulture)
    }

    pub fn collides_with_platforms(&self) -> bool {
        !matches!(self, Behavior::Vulture)
    }

    /// Multiple of the aggro range beyond which a chase is abandoned.
    pub fn release_multiplier(&self) -> f32 {
        match self {
            Behavior::Slime => 2.5,
            Behavior::SpiderStatic | Behavior::SpiderCrawling | Behavior::SpiderWall => 2.0,
            Behavior::Vulture => 1.5,
        }
    }

    pub fn hops(&self) -> bool {
        matches!(self, Behavior::Slime | Behavior::SpiderCrawling)
    }
}

#[derive(Debug, Clone)]
pub struct EnemyEntity {
    pub id: String,
    pub kind: EnemyKind,
    pub variant: String,
    pub behavior: Behavior,
    pub body: Body,
    pub facing_right: bool,
    pub health: f32,
    pub max_health: f32,
    pub attack_power: f32,
    pub speed: f32,
    pub patrol_range: f32,
    pub aggro_range: f32,
    pub state: AiState,
    pub target_player_id: Option<String>,
    pub patrol_origin_x: f32,
    pub patrol_direction: f32,
    pub last_attack_time: f32,
    pub attack_cooldown: f32,
    pub current_animation: String,
    pub frame_index: u32,
    pub animation_timer: f32,
    /// Simulated seconds since spawn.
    pub elapsed: f32,
    pub jump_timer: f32,
    pub jump_interval: f32,
    pub jump_strength: f32,
    pub rotation: f32,
    pub flight_min: f32,
    pub flight_max: f32,
}

impl EnemyEntity {
    /// Builds an enemy from a spawn descriptor. Returns `None` for unknown types.
    pub fn spawn(id: String, descriptor: &EnemyDescriptor) -> Option<Self> {
        let kind = EnemyKind::parse(&descriptor.kind)?;
        let behavior = Behavior::from_kind(kind, &descriptor.variant);
        let (width, height) = behavior.footprint();
        let x = descriptor.x.resolve();
        let y = descriptor.y.resolve();
        let health = descriptor.health.unwrap_or(DEFAULT_ENEMY_HEALTH);

        let (jump_strength, jump_interval) = match behavior {
            Behavior::Slime => (SLIME_JUMP_STRENGTH, SLIME_JUMP_INTERVAL),
            Behavior::SpiderCrawling => (SPIDER_JUMP_STRENGTH, SPIDER_JUMP_INTERVAL),
            _ => (0.0, 0.0),
        };

        let resolve_or = |coord: &Option<Coord>, fallback: f32| {
            coord.as_ref().map(Coord::resolve).unwrap_or(fallback)
        };
        let flight_min = resolve_or(&descriptor.flight_height_min, REFERENCE_HEIGHT - 600.0);
        let flight_max = resolve_or(&descriptor.flight_height_max, REFERENCE_HEIGHT - 300.0);

        Some(Self {
            id,
            kind,
            variant: descriptor.variant.clone(),
            behavior,
            body: Body::new(x, y, width, height),
            facing_right: true,
            health,
            max_health: health,
            attack_power: descriptor.attack_power.unwrap_or(DEFAULT_ATTACK_POWER),
            speed: descriptor.speed.unwrap_or(DEFAULT_SPEED),
            patrol_range: descriptor.patrol_range.unwrap_or(DEFAULT_PATROL_RANGE),
            aggro_range: descriptor.aggro_range.unwrap_or(DEFAULT_AGGRO_RANGE),
            state: AiState::Patrol,
            target_player_id: None,
            patrol_origin_x: x,
            patrol_direction: 1.0,
            last_attack_time: f32::NEG_INFINITY,
            attack_cooldown: 1.0,
            current_animation: "idle".to_string(),
            frame_index: 0,
            animation_timer: 0.0,
            elapsed: 0.0,
            jump_timer: 0.0,
            jump_interval,
            jump_strength: descriptor.jump_strength.unwrap_or(jump_strength),
            rotation: 0.0,
            flight_min: flight_min.min(flight_max),
            flight_max: flight_max.max(flight_min),
        })
    }

    pub fn set_animation(&mut self, name: &str) {
        if self.current_animation != name {
            self.current_animation = name.to_string();
            self.frame_index = 0;
            self.animation_timer = 0.0;
        }
    }

    pub fn snapshot(&self) -> EnemySnapshot {
        EnemySnapshot {
            enemy_id: self.id.clone(),
            kind: self.kind,
            variant: self.variant.clone(),
            x: self.body.bounds.x,
            y: self.body.bounds.y,
            vel_x: self.body.velocity.x,
            vel_y: self.body.velocity.y,
            facing_right: self.facing_right,
            state: self.state,
            current_animation: self.current_animation.clone(),
            frame_index: self.frame_index,
            health: self.health,
            max_health: self.max_health,
            attack_power: self.attack_power,
            speed: self.speed,
            patrol_range: self.patrol_range,
            aggro_range: self.aggro_range,
            on_ground: self.body.grounded,
            rotation: matches!(self.behavior, Behavior::Vulture | Behavior::SpiderWall)
                .then_some(self.rotation),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BossProjectile {
    pub position: Vector2,
    pub velocity: Vector2,
    pub damage: f32,
    pub lifetime: f32,
    pub radius: f32,
}

impl BossProjectile {
    fn snapshot(&self) -> BossProjectileSnapshot {
        BossProjectileSnapshot {
            x: self.position.x,
            y: self.position.y,
            vel_x: self.velocity.x,
            vel_y: self.velocity.y,
            damage: self.damage,
            lifetime: self.lifetime,
            radius: self.radius,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BossEntity {
    pub id: String,
    pub variant: String,
    pub body: Body,
    pub facing_right: bool,
    pub health: f32,
    pub max_health: f32,
    pub attack_power: f32,
    pub multiplier: f32,
    pub mode: BossMode,
    pub mode_timer: f32,
    pub mode_duration: f32,
    pub skill_timer: f32,
    pub skill_duration: f32,
    pub volley_timer: f32,
    pub jump_phase: JumpPhase,
    pub jump_target: Option<Vector2>,
    pub projectiles: Vec<BossProjectile>,
    pub current_animation: String,
    pub frame_index: u32,
    pub animation_timer: f32,
}

impl BossEntity {
    /// Builds a boss whose health and damage are scaled for `player_count` players.
    pub fn spawn(id: String, descriptor: &EnemyDescriptor, player_count: usize) -> Self {
        let multiplier = boss_multiplier(player_count);
        let health = descriptor.health.unwrap_or(BOSS_BASE_HEALTH) * multiplier;

        Self {
            id,
            variant: descriptor.variant.clone(),
            body: Body::new(
                descriptor.x.resolve(),
                descriptor.y.resolve(),
                BOSS_WIDTH,
                BOSS_HEIGHT,
            ),
            facing_right: true,
            health,
            max_health: health,
            attack_power: descriptor.attack_power.unwrap_or(BOSS_BASE_ATTACK) * multiplier,
            multiplier,
            mode: BossMode::Running,
            mode_timer: 0.0,
            mode_duration: BOSS_MODE_DURATION,
            skill_timer: 0.0,
            skill_duration: BOSS_SKILL_DURATION,
            volley_timer: 0.0,
            jump_phase: JumpPhase::Grounded,
            jump_target: None,
            projectiles: Vec::new(),
            current_animation: "running".to_string(),
            frame_index: 0,
            animation_timer: 0.0,
        }
    }

    pub fn projectile_damage(&self) -> f32 {
        BOSS_PROJECTILE_DAMAGE * self.multiplier
    }

    pub fn set_animation(&mut self, name: &str) {
        if self.current_animation != name {
            self.current_animation = name.to_string();
            self.frame_index = 0;
            self.animation_timer = 0.0;
        }
    }

    pub fn snapshot(&self) -> BossSnapshot {
        BossSnapshot {
            boss_id: self.id.clone(),
            variant: self.variant.clone(),
            x: self.body.bounds.x,
            y: self.body.bounds.y,
            vel_x: self.body.velocity.x,
            vel_y: self.body.velocity.y,
            width: self.body.bounds.width,
            height: self.body.bounds.height,
            facing_right: self.facing_right,
            state: self.mode,
            jump_phase: self.jump_phase,
            current_animation: self.current_animation.clone(),
            frame_index: self.frame_index,
            health: self.health,
            max_health: self.max_health,
            attack_power: self.attack_power,
            projectiles: self.projectiles.iter().map(BossProjectile::snapshot).collect(),
        }
    }
}

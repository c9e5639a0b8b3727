use crate::ai::{step_world, PlayerTarget, TickReport};
use crate::entity::{BossEntity, EnemyEntity, PlayerEntity};
use crate::physics::Platform;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    random_token, BossSnapshot, EnemyDescriptor, EnemySnapshot, MapDocument, MapTarget, PlayerUpdate,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Summary of a freshly loaded map, reported to clients as `map_ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLoad {
    pub map_name: String,
    pub enemies: usize,
    pub bosses: usize,
}

impl MapLoad {
    pub fn entity_count(&self) -> usize {
        self.enemies + self.bosses
    }
}

/// Result of applying damage to an enemy or boss.
#[derive(Debug, Clone, PartialEq)]
pub enum DamageOutcome {
    Missing,
    Damaged { health: f32 },
    Killed { kind: &'static str },
}

/// The authoritative registry of every simulated entity.
///
/// All mutation goes through methods on this type; the server wraps it in a
/// single lock shared by connection tasks and the tick loop.
#[derive(Debug)]
pub struct WorldPool {
    players: HashMap<String, PlayerEntity>,
    enemies: BTreeMap<String, EnemyEntity>,
    bosses: BTreeMap<String, BossEntity>,
    platforms: Vec<Platform>,
    current_map: Option<String>,
    catalog: Vec<MapDocument>,
    dead_bosses: HashSet<String>,
    rng: StdRng,
    player_counter: u32,
    pub tick: u64,
}

impl Default for WorldPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldPool {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// A pool whose boss decisions are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            players: HashMap::new(),
            enemies: BTreeMap::new(),
            bosses: BTreeMap::new(),
            platforms: Vec::new(),
            current_map: None,
            catalog: Vec::new(),
            dead_bosses: HashSet::new(),
            rng,
            player_counter: 0,
            tick: 0,
        }
    }

    pub fn add_player(&mut self, id: &str) -> &PlayerEntity {
        if !self.players.contains_key(id) {
            self.player_counter += 1;
            let player = PlayerEntity::new(id, format!("Player{}", self.player_counter));
            info!("Added player {} as {}", id, player.player_name);
            self.players.insert(id.to_string(), player);
        }
        &self.players[id]
    }

    pub fn remove_player(&mut self, id: &str) -> Option<PlayerEntity> {
        let removed = self.players.remove(id);
        if removed.is_some() {
            info!("Removed player {}", id);
        }
        removed
    }

    /// Merges a partial update into a player. Returns false for unknown ids.
    pub fn update_player(&mut self, id: &str, update: &PlayerUpdate) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.apply(update);
                true
            }
            None => false,
        }
    }

    pub fn select_character(
        &mut self,
        id: &str,
        character_name: Option<&str>,
        player_name: Option<&str>,
    ) -> bool {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        if let Some(character) = character_name {
            player.character_name = Some(character.to_string());
        }
        if let Some(name) = player_name {
            player.player_name = name.to_string();
        }
        true
    }

    pub fn player(&self, id: &str) -> Option<&PlayerEntity> {
        self.players.get(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn enemy(&self, id: &str) -> Option<&EnemyEntity> {
        self.enemies.get(id)
    }

    pub fn enemy_count(&self) -> usize {
        self.enemies.len()
    }

    pub fn boss(&self, id: &str) -> Option<&BossEntity> {
        self.bosses.get(id)
    }

    pub fn boss_count(&self) -> usize {
        self.bosses.len()
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// Name of the map currently simulated, if any.
    pub fn current_map(&self) -> Option<&str> {
        self.current_map.as_deref()
    }

    /// Spawns an enemy under `id`, replacing any enemy with the same id.
    pub fn add_enemy(&mut self, id: String, descriptor: &EnemyDescriptor) -> bool {
        match EnemyEntity::spawn(id.clone(), descriptor) {
            Some(enemy) => {
                self.enemies.insert(id, enemy);
                true
            }
            None => {
                warn!("Skipping enemy {} with unknown type '{}'", id, descriptor.kind);
                false
            }
        }
    }

    /// Spawns an enemy under a fresh random id.
    pub fn spawn_enemy(&mut self, descriptor: &EnemyDescriptor) -> Option<String> {
        let id = format!("enemy_{}", random_token(8));
        self.add_enemy(id.clone(), descriptor).then_some(id)
    }

    pub fn remove_enemy(&mut self, id: &str) -> Option<EnemyEntity> {
        self.enemies.remove(id)
    }

    /// Spawns a boss scaled for the players currently in the pool.
    ///
    /// Bosses killed earlier in the session are not brought back.
    pub fn add_boss(&mut self, id: String, descriptor: &EnemyDescriptor) -> bool {
        if self.dead_bosses.contains(&id) {
            info!("Boss {} was already defeated, not respawning", id);
            return false;
        }
        let boss = BossEntity::spawn(id.clone(), descriptor, self.players.len());
        info!(
            "Spawned boss {} with {} health (x{} for {} players)",
            id,
            boss.health,
            boss.multiplier,
            self.players.len()
        );
        self.bosses.insert(id, boss);
        true
    }

    pub fn remove_boss(&mut self, id: &str, killed: bool) -> Option<BossEntity> {
        let removed = self.bosses.remove(id);
        if killed && removed.is_some() {
            self.dead_bosses.insert(id.to_string());
        }
        removed
    }

    /// Replaces the live level with `map`.
    ///
    /// Enemy ids are derived from the map name, the descriptor index, type and
    /// variant, so loading the same document twice yields the same ids.
    pub fn set_map_data(&mut self, map: MapDocument) -> MapLoad {
        self.enemies.clear();
        self.bosses.clear();
        self.platforms = map.platforms.iter().map(Platform::from_descriptor).collect();

        let prefix = map.id_prefix().to_string();
        let mut load = MapLoad {
            map_name: map.title().to_string(),
            enemies: 0,
            bosses: 0,
        };

        for (index, descriptor) in map.enemies.iter().enumerate() {
            let id = format!("{}_{}_{}_{}", prefix, index, descriptor.kind, descriptor.variant);
            if descriptor.is_boss() {
                if self.add_boss(id, descriptor) {
                    load.bosses += 1;
                }
            } else if self.add_enemy(id, descriptor) {
                load.enemies += 1;
            }
        }

        info!(
            "Loaded map '{}': {} platforms, {} enemies, {} bosses",
            load.map_name,
            self.platforms.len(),
            load.enemies,
            load.bosses
        );

        self.current_map = Some(load.map_name.clone());
        match self.catalog.iter_mut().find(|known| known.title() == map.title()) {
            Some(known) => *known = map,
            None => self.catalog.push(map),
        }
        load
    }

    /// Reloads a previously uploaded map. Unknown targets clear the level.
    pub fn load_catalog_map(&mut self, target: &MapTarget) -> Option<MapLoad> {
        let found = match target {
            MapTarget::Index(index) => usize::try_from(*index)
                .ok()
                .and_then(|i| self.catalog.get(i)),
            MapTarget::Name(name) => self.catalog.iter().find(|map| map.answers_to(name)),
        };

        match found.cloned() {
            Some(map) => Some(self.set_map_data(map)),
            None => {
                info!("Map {} is not known yet, waiting for map data", target);
                self.clear_level();
                None
            }
        }
    }

    pub fn clear_level(&mut self) {
        self.enemies.clear();
        self.bosses.clear();
        self.platforms.clear();
        self.current_map = None;
    }

    pub fn known_maps(&self) -> usize {
        self.catalog.len()
    }

    /// Applies damage to an enemy, removing it when its health runs out.
    ///
    /// A reported `current_health` wins over `damage` but can never heal.
    pub fn apply_enemy_damage(&mut self, id: &str, damage: f32, current_health: Option<f32>) -> DamageOutcome {
        let Some(enemy) = self.enemies.get_mut(id) else {
            return DamageOutcome::Missing;
        };
        enemy.health = next_health(enemy.health, damage, current_health);
        if enemy.health > 0.0 {
            return DamageOutcome::Damaged { health: enemy.health };
        }

        let kind = enemy.kind.as_str();
        self.enemies.remove(id);
        info!("Enemy {} ({}) died", id, kind);
        DamageOutcome::Killed { kind }
    }

    pub fn apply_boss_damage(&mut self, id: &str, damage: f32, current_health: Option<f32>) -> DamageOutcome {
        let Some(boss) = self.bosses.get_mut(id) else {
            return DamageOutcome::Missing;
        };
        boss.health = next_health(boss.health, damage, current_health);
        if boss.health > 0.0 {
            return DamageOutcome::Damaged { health: boss.health };
        }

        self.remove_boss(id, true);
        info!("Boss {} defeated, {} remaining", id, self.bosses.len());
        DamageOutcome::Killed { kind: "boss" }
    }

    pub fn snapshot_enemies(&self) -> Vec<EnemySnapshot> {
        self.enemies.values().map(EnemyEntity::snapshot).collect()
    }

    pub fn snapshot_bosses(&self) -> Vec<BossSnapshot> {
        self.bosses.values().map(BossEntity::snapshot).collect()
    }

    pub fn snapshot_players(&self) -> Vec<PlayerUpdate> {
        let mut players: Vec<PlayerUpdate> = self.players.values().map(PlayerEntity::snapshot).collect();
        players.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        players
    }

    /// Advances every enemy and boss by `dt` seconds.
    pub fn update(&mut self, dt: f32) -> TickReport {
        self.tick += 1;
        let targets: Vec<PlayerTarget> = self
            .players
            .values()
            .map(|p| PlayerTarget {
                id: p.id.clone(),
                position: p.position,
            })
            .collect();

        step_world(
            &mut self.enemies,
            &mut self.bosses,
            &targets,
            &self.platforms,
            dt,
            &mut self.rng,
        )
    }
}

fn next_health(health: f32, damage: f32, current_health: Option<f32>) -> f32 {
    let next = match current_health {
        Some(reported) => reported.min(health),
        None => health - damage.max(0.0),
    };
    next.max(0.0)
}

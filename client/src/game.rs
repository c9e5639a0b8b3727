use log::{debug, info};
use shared::{BossSnapshot, EnemySnapshot, MapTarget, Packet};
use std::collections::{HashMap, HashSet};

/// What this client knows about another player in the room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePlayer {
    pub id: String,
    pub character_name: Option<String>,
    pub player_name: Option<String>,
    pub x: f32,
    pub y: f32,
    pub health: Option<f32>,
    pub dead: bool,
}

/// Local mirror of the room, built only from server packets.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub player_id: Option<String>,
    pub is_host: bool,
    pub players: HashMap<String, RemotePlayer>,
    pub game_started: bool,
    pub returned_to_room: bool,
    /// Message from `room_disbanded`, once received
    pub disbanded: Option<String>,
    pub selected_map: Option<MapTarget>,
    pub portal_target: Option<MapTarget>,
    pub current_map: Option<String>,
    pub map_ready_count: u32,
    pub enemies: Vec<EnemySnapshot>,
    pub bosses: Vec<BossSnapshot>,
    pub dead_enemies: HashSet<String>,
    pub dead_bosses: HashSet<String>,
    pending_damage: f32,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, packet: &Packet) {
        match packet {
            Packet::PlayerId { id, is_host } => {
                self.player_id = Some(id.clone());
                self.is_host = *is_host;
            }
            Packet::PlayerDisconnect { player_id } => {
                self.players.remove(player_id);
            }
            Packet::RoomDisbanded { message, .. } => {
                info!("Room disbanded: {}", message);
                self.disbanded = Some(message.clone());
                self.game_started = false;
            }
            Packet::PlayerUpdate(update) => {
                let Some(player) = update.player_id.as_deref().and_then(|id| self.remote(id)) else {
                    return;
                };
                if let Some((x, y)) = update.position() {
                    player.x = x;
                    player.y = y;
                }
                if update.health.is_some() {
                    player.health = update.health;
                }
                if update.character_name.is_some() {
                    player.character_name = update.character_name.clone();
                }
                if update.player_name.is_some() {
                    player.player_name = update.player_name.clone();
                }
            }
            Packet::CharacterSelection(selection) => {
                let Some(player) = selection.player_id.as_deref().and_then(|id| self.remote(id)) else {
                    return;
                };
                player.character_name = selection.character_name.clone();
                player.player_name = selection.player_name.clone();
            }
            Packet::PlayerDeath(relay) => {
                if let Some(player) = relay.player_id.as_deref().and_then(|id| self.remote(id)) {
                    player.dead = true;
                }
            }
            Packet::PlayerDamageReceived { damage, from_player_id } => {
                debug!("Took {} damage from {}", damage, from_player_id);
                self.pending_damage += damage;
            }
            Packet::GameStart(_) => {
                self.game_started = true;
                self.returned_to_room = false;
            }
            Packet::ReturnToWaitingRoom(_) => {
                self.game_started = false;
                self.returned_to_room = true;
            }
            Packet::MapSelection(selection) => {
                self.selected_map = selection
                    .map_index
                    .map(MapTarget::Index)
                    .or_else(|| selection.map_name.clone().map(MapTarget::Name));
            }
            Packet::PortalTrigger(transition) | Packet::MapChange(transition) => {
                self.portal_target = transition.target_map.clone();
            }
            Packet::MapReady { map_name, enemies_count } => {
                info!("Map {} ready with {} enemies", map_name, enemies_count);
                self.current_map = Some(map_name.clone());
                self.map_ready_count += 1;
                self.dead_enemies.clear();
            }
            Packet::EnemyDamage(damage) => {
                if let (Some(enemy), Some(health)) = (
                    self.enemies.iter_mut().find(|e| e.enemy_id == damage.enemy_id),
                    damage.current_health,
                ) {
                    enemy.health = health;
                }
            }
            Packet::EnemyDeath(death) => {
                self.enemies.retain(|e| e.enemy_id != death.enemy_id);
                self.dead_enemies.insert(death.enemy_id.clone());
            }
            Packet::BossDamage(damage) => {
                if let (Some(boss), Some(health)) = (
                    self.bosses.iter_mut().find(|b| b.boss_id == damage.boss_id),
                    damage.current_health,
                ) {
                    boss.health = health;
                }
            }
            Packet::BossDeath(death) => {
                self.bosses.retain(|b| b.boss_id != death.boss_id);
                self.dead_bosses.insert(death.boss_id.clone());
            }
            Packet::EnemiesSync { enemies } => {
                self.enemies = enemies.clone();
            }
            Packet::BossesSync { bosses } => {
                self.bosses = bosses
                    .iter()
                    .filter(|b| !self.dead_bosses.contains(&b.boss_id))
                    .cloned()
                    .collect();
            }
            _ => {}
        }
    }

    /// Damage received since the last call
    pub fn take_pending_damage(&mut self) -> f32 {
        std::mem::take(&mut self.pending_damage)
    }

    pub fn enemy(&self, id: &str) -> Option<&EnemySnapshot> {
        self.enemies.iter().find(|e| e.enemy_id == id)
    }

    fn remote(&mut self, id: &str) -> Option<&mut RemotePlayer> {
        if self.player_id.as_deref() == Some(id) {
            return None;
        }
        Some(self.players.entry(id.to_string()).or_insert_with(|| RemotePlayer {
            id: id.to_string(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{CharacterSelection, EnemyDeath, PlayerUpdate};

    fn packet(value: serde_json::Value) -> Packet {
        Packet::from_value(value).unwrap()
    }

    fn snapshot(id: &str) -> EnemySnapshot {
        serde_json::from_value(json!({
            "enemy_id": id, "type": "slime", "variant": "blue",
            "x": 10.0, "y": 20.0, "vel_x": 0.0, "vel_y": 0.0,
            "facing_right": true, "state": "patrol",
            "current_animation": "idle", "frame_index": 0,
            "health": 50.0, "max_health": 50.0, "attack_power": 10.0,
            "speed": 2.0, "patrol_range": 200.0, "aggro_range": 150.0,
            "on_ground": true
        }))
        .unwrap()
    }

    fn joined() -> ClientState {
        let mut state = ClientState::new();
        state.apply(&Packet::PlayerId {
            id: "me".to_string(),
            is_host: false,
        });
        state
    }

    #[test]
    fn test_player_id_sets_identity() {
        let state = joined();
        assert_eq!(state.player_id.as_deref(), Some("me"));
        assert!(!state.is_host);
    }

    #[test]
    fn test_roster_tracks_others_only() {
        let mut state = joined();
        state.apply(&Packet::CharacterSelection(CharacterSelection {
            player_id: Some("other".to_string()),
            character_name: Some("knight".to_string()),
            player_name: Some("Ann".to_string()),
            ..Default::default()
        }));
        state.apply(&Packet::PlayerUpdate(PlayerUpdate {
            player_id: Some("me".to_string()),
            x: Some(1.0),
            ..Default::default()
        }));
        state.apply(&Packet::PlayerUpdate(PlayerUpdate {
            player_id: Some("other".to_string()),
            x: Some(300.0),
            y: Some(400.0),
            ..Default::default()
        }));

        assert_eq!(state.players.len(), 1);
        let other = &state.players["other"];
        assert_eq!(other.character_name.as_deref(), Some("knight"));
        assert_eq!((other.x, other.y), (300.0, 400.0));

        state.apply(&Packet::PlayerDisconnect {
            player_id: "other".to_string(),
        });
        assert!(state.players.is_empty());
    }

    #[test]
    fn test_room_flags() {
        let mut state = joined();
        state.apply(&packet(json!({"type": "game_start", "player_id": "host"})));
        assert!(state.game_started);

        state.apply(&packet(json!({"type": "return_to_waiting_room"})));
        assert!(!state.game_started);
        assert!(state.returned_to_room);

        state.apply(&packet(json!({
            "type": "room_disbanded", "reason": "host_left", "message": "bye"
        })));
        assert_eq!(state.disbanded.as_deref(), Some("bye"));
    }

    #[test]
    fn test_map_selection_and_portal() {
        let mut state = joined();
        state.apply(&packet(json!({"type": "map_selection", "map_index": 2})));
        assert_eq!(state.selected_map, Some(MapTarget::Index(2)));

        state.apply(&packet(json!({"type": "portal_trigger", "target_map": "Cave"})));
        assert_eq!(state.portal_target, Some(MapTarget::Name("Cave".to_string())));

        state.apply(&packet(json!({"type": "map_ready", "map_name": "Cave", "enemies_count": 3})));
        assert_eq!(state.current_map.as_deref(), Some("Cave"));
        assert_eq!(state.map_ready_count, 1);
    }

    #[test]
    fn test_enemy_sync_damage_and_death() {
        let mut state = joined();
        state.apply(&Packet::EnemiesSync {
            enemies: vec![snapshot("a"), snapshot("b")],
        });
        state.apply(&packet(json!({
            "type": "enemy_damage", "enemy_id": "a", "damage": 20.0, "current_health": 30.0
        })));
        assert_eq!(state.enemy("a").map(|e| e.health), Some(30.0));

        state.apply(&Packet::EnemyDeath(EnemyDeath {
            enemy_id: "a".to_string(),
            enemy_type: Some("slime".to_string()),
            player_id: None,
        }));
        assert!(state.enemy("a").is_none());
        assert!(state.dead_enemies.contains("a"));
        assert_eq!(state.enemies.len(), 1);
    }

    #[test]
    fn test_pending_damage_accumulates() {
        let mut state = joined();
        for _ in 0..3 {
            state.apply(&Packet::PlayerDamageReceived {
                damage: 5.0,
                from_player_id: "other".to_string(),
            });
        }
        assert_eq!(state.take_pending_damage(), 15.0);
        assert_eq!(state.take_pending_damage(), 0.0);
    }

    #[test]
    fn test_player_death_marks_remote() {
        let mut state = joined();
        state.apply(&packet(json!({"type": "player_death", "player_id": "other"})));
        assert!(state.players["other"].dead);
    }
}

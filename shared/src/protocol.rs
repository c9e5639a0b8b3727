use crate::map::{EnemyDescriptor, MapDocument};
use crate::{REFERENCE_HEIGHT, REFERENCE_WIDTH};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// Every message on the wire is a JSON object whose "type" field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    // Connection management
    PlayerId { id: String, is_host: bool },
    PlayerDisconnect { player_id: String },
    RoomDisbanded { reason: String, message: String },

    // Player state
    PlayerUpdate(PlayerUpdate),
    CharacterSelection(CharacterSelection),
    PlayerDamage { target_player_id: String, damage: f32 },
    PlayerDamageReceived { damage: f32, from_player_id: String },
    PlayerDeath(Relay),

    // Room flow
    GameStart(Signal),
    ReturnToWaitingRoom(Signal),
    MapSelection(MapSelection),
    MapData { map_data: MapDocument },
    MapReady { map_name: String, enemies_count: usize },
    PortalTrigger(MapTransition),
    MapChange(MapTransition),

    // Enemies and bosses
    EnemyDamage(EnemyDamage),
    EnemyDeath(EnemyDeath),
    BossDamage(BossDamage),
    BossDeath(BossDeath),
    EnemyCreation { enemy_data: EnemyDescriptor },
    EnemiesSync { enemies: Vec<EnemySnapshot> },
    BossesSync { bosses: Vec<BossSnapshot> },

    // Projectiles are relayed without server-side simulation
    ProjectileCreate(ProjectileEvent),
    ProjectileUpdate(ProjectileEvent),
    ProjectileDestroy(ProjectileEvent),
    NadirAttack(ProjectileEvent),
}

impl Packet {
    /// The wire `type` tag of this packet.
    pub fn type_name(&self) -> &'static str {
        match self {
            Packet::PlayerId { .. } => "player_id",
            Packet::PlayerDisconnect { .. } => "player_disconnect",
            Packet::RoomDisbanded { .. } => "room_disbanded",
            Packet::PlayerUpdate(_) => "player_update",
            Packet::CharacterSelection(_) => "character_selection",
            Packet::PlayerDamage { .. } => "player_damage",
            Packet::PlayerDamageReceived { .. } => "player_damage_received",
            Packet::PlayerDeath(_) => "player_death",
            Packet::GameStart(_) => "game_start",
            Packet::ReturnToWaitingRoom(_) => "return_to_waiting_room",
            Packet::MapSelection(_) => "map_selection",
            Packet::MapData { .. } => "map_data",
            Packet::MapReady { .. } => "map_ready",
            Packet::PortalTrigger(_) => "portal_trigger",
            Packet::MapChange(_) => "map_change",
            Packet::EnemyDamage(_) => "enemy_damage",
            Packet::EnemyDeath(_) => "enemy_death",
            Packet::BossDamage(_) => "boss_damage",
            Packet::BossDeath(_) => "boss_death",
            Packet::EnemyCreation { .. } => "enemy_creation",
            Packet::EnemiesSync { .. } => "enemies_sync",
            Packet::BossesSync { .. } => "bosses_sync",
            Packet::ProjectileCreate(_) => "projectile_create",
            Packet::ProjectileUpdate(_) => "projectile_update",
            Packet::ProjectileDestroy(_) => "projectile_destroy",
            Packet::NadirAttack(_) => "nadir_attack",
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Partial player state. Every field is optional; absent fields leave the
/// stored value untouched and unknown fields ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facing_right: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_ground: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_animation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_health: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerUpdate {
    /// Absolute position. Relative coordinates are fractions of the reference
    /// resolution and take priority over absolute pixels when both are present.
    pub fn position(&self) -> Option<(f32, f32)> {
        match (self.rel_x, self.rel_y, self.x, self.y) {
            (Some(rx), Some(ry), _, _) => Some((rx * REFERENCE_WIDTH, ry * REFERENCE_HEIGHT)),
            (_, _, Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of host-originated room signals such as `game_start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Portal destinations are named by map name or by catalog index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapTarget {
    Index(i64),
    Name(String),
}

impl fmt::Display for MapTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapTarget::Index(i) => write!(f, "{}", i),
            MapTarget::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapTransition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_map: Option<MapTarget>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyDamage {
    pub enemy_id: String,
    #[serde(default)]
    pub damage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_health: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyDeath {
    pub enemy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enemy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossDamage {
    pub boss_id: String,
    #[serde(default)]
    pub damage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_health: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossDeath {
    pub boss_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

/// Client-simulated projectile event, relayed opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projectile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounces: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bounces: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Generic relayed event carrying only the sender id plus arbitrary fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnemyKind {
    Slime,
    Spider,
    Vulture,
}

impl EnemyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "slime" => Some(EnemyKind::Slime),
            "spider" => Some(EnemyKind::Spider),
            "vulture" => Some(EnemyKind::Vulture),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnemyKind::Slime => "slime",
            EnemyKind::Spider => "spider",
            EnemyKind::Vulture => "vulture",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiState {
    Patrol,
    Chase,
    Attack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BossMode {
    Running,
    Jumping,
    Skilling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpPhase {
    #[serde(rename = "none")]
    Grounded,
    Rising,
    Falling,
}

/// Authoritative enemy state as sent in `enemies_sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemySnapshot {
    pub enemy_id: String,
    #[serde(rename = "type")]
    pub kind: EnemyKind,
    pub variant: String,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub facing_right: bool,
    pub state: AiState,
    pub current_animation: String,
    pub frame_index: u32,
    pub health: f32,
    pub max_health: f32,
    pub attack_power: f32,
    pub speed: f32,
    pub patrol_range: f32,
    pub aggro_range: f32,
    pub on_ground: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossProjectileSnapshot {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub damage: f32,
    pub lifetime: f32,
    pub radius: f32,
}

/// Authoritative boss state as sent in `bosses_sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossSnapshot {
    pub boss_id: String,
    pub variant: String,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub width: f32,
    pub height: f32,
    pub facing_right: bool,
    pub state: BossMode,
    pub jump_phase: JumpPhase,
    pub current_animation: String,
    pub frame_index: u32,
    pub health: f32,
    pub max_health: f32,
    pub attack_power: f32,
    pub projectiles: Vec<BossProjectileSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_id_serialization() {
        let packet = Packet::PlayerId {
            id: "ab12cd34".to_string(),
            is_host: true,
        };
        let value = packet.to_value().unwrap();
        assert_eq!(value, json!({"type": "player_id", "id": "ab12cd34", "is_host": true}));
        assert_eq!(Packet::from_value(value).unwrap(), packet);
    }

    #[test]
    fn test_player_update_keeps_unknown_fields() {
        let value = json!({
            "type": "player_update",
            "x": 10.5,
            "y": 20,
            "character_name": "Cat",
            "weapon": "bow",
            "timestamp": 1.5
        });

        let packet = Packet::from_value(value).unwrap();
        match &packet {
            Packet::PlayerUpdate(update) => {
                assert_eq!(update.x, Some(10.5));
                assert_eq!(update.y, Some(20.0));
                assert_eq!(update.player_id, None);
                assert_eq!(update.extra.get("weapon"), Some(&json!("bow")));
            }
            other => panic!("Wrong packet type after deserialization: {:?}", other),
        }

        let echoed = packet.to_value().unwrap();
        assert_eq!(echoed["weapon"], json!("bow"));
        assert_eq!(echoed["type"], json!("player_update"));
        assert!(echoed.get("vel_x").is_none());
    }

    #[test]
    fn test_player_update_position_fallback() {
        let update = PlayerUpdate {
            rel_x: Some(0.5),
            rel_y: Some(0.25),
            ..Default::default()
        };
        assert_eq!(update.position(), Some((960.0, 270.0)));

        let update = PlayerUpdate {
            x: Some(1.0),
            y: Some(2.0),
            ..Default::default()
        };
        assert_eq!(update.position(), Some((1.0, 2.0)));

        let update = PlayerUpdate {
            x: Some(1.0),
            y: Some(2.0),
            rel_x: Some(0.5),
            rel_y: Some(0.5),
            ..Default::default()
        };
        assert_eq!(update.position(), Some((960.0, 540.0)));

        assert_eq!(PlayerUpdate::default().position(), None);
    }

    #[test]
    fn test_signal_without_body() {
        let packet = Packet::from_value(json!({"type": "game_start"})).unwrap();
        assert_eq!(packet, Packet::GameStart(Signal::default()));
        assert_eq!(packet.type_name(), "game_start");
    }

    #[test]
    fn test_enemy_damage_parsing() {
        let packet = Packet::from_value(json!({
            "type": "enemy_damage",
            "enemy_id": "Test_0_slime_blue",
            "damage": 50
        }))
        .unwrap();

        match packet {
            Packet::EnemyDamage(damage) => {
                assert_eq!(damage.enemy_id, "Test_0_slime_blue");
                assert_eq!(damage.damage, 50.0);
                assert!(damage.current_health.is_none());
            }
            other => panic!("Wrong packet type after deserialization: {:?}", other),
        }
    }

    #[test]
    fn test_map_target_accepts_name_or_index() {
        let by_name = Packet::from_value(json!({"type": "portal_trigger", "target_map": "Cave"})).unwrap();
        let by_index = Packet::from_value(json!({"type": "map_change", "target_map": 2})).unwrap();

        match by_name {
            Packet::PortalTrigger(t) => assert_eq!(t.target_map, Some(MapTarget::Name("Cave".to_string()))),
            other => panic!("unexpected {:?}", other),
        }
        match by_index {
            Packet::MapChange(t) => assert_eq!(t.target_map, Some(MapTarget::Index(2))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Packet::from_value(json!({"type": "teleport_everyone"})).is_err());
        assert!(Packet::from_value(json!({"x": 1})).is_err());
    }

    #[test]
    fn test_enemy_snapshot_uses_type_field() {
        let snapshot = EnemySnapshot {
            enemy_id: "Test_0_slime_blue".to_string(),
            kind: EnemyKind::Slime,
            variant: "blue".to_string(),
            x: 300.0,
            y: 500.0,
            vel_x: 0.0,
            vel_y: 0.0,
            facing_right: true,
            state: AiState::Patrol,
            current_animation: "idle".to_string(),
            frame_index: 0,
            health: 100.0,
            max_health: 100.0,
            attack_power: 10.0,
            speed: 2.0,
            patrol_range: 100.0,
            aggro_range: 200.0,
            on_ground: true,
            rotation: None,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["type"], json!("slime"));
        assert_eq!(value["state"], json!("patrol"));
        assert!(value.get("rotation").is_none());
    }

    #[test]
    fn test_jump_phase_wire_names() {
        assert_eq!(serde_json::to_string(&JumpPhase::Grounded).unwrap(), "\"none\"");
        assert_eq!(serde_json::to_string(&JumpPhase::Rising).unwrap(), "\"rising\"");
        assert_eq!(
            serde_json::from_str::<JumpPhase>("\"none\"").unwrap(),
            JumpPhase::Grounded
        );
        assert_eq!(
            serde_json::from_str::<JumpPhase>("\"falling\"").unwrap(),
            JumpPhase::Falling
        );
        assert!(serde_json::from_str::<JumpPhase>("\"grounded\"").is_err());
    }

    #[test]
    fn test_enemy_kind_parse() {
        assert_eq!(EnemyKind::parse("spider"), Some(EnemyKind::Spider));
        assert_eq!(EnemyKind::parse("dragon"), None);
        assert_eq!(EnemyKind::Vulture.as_str(), "vulture");
    }
}

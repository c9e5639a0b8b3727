//! Integration tests for the room server
//!
//! These tests run a real server on a loopback port and drive it with the
//! headless client, covering the cross-component flows: connection roles,
//! map loading, authoritative damage, relays and room teardown.

use client::NetworkClient;
use serde_json::json;
use server::room::Shutdown;
use server::{Server, ServerConfig};
use shared::{EnemyDescriptor, MapDocument, MapTarget, Packet, PlayerUpdate};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(3);
const GRACE: Duration = Duration::from_millis(300);

struct TestServer {
    addr: String,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), server::ServerError>>,
}

async fn start_server() -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_grace: GRACE,
        ..Default::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.run());
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

fn test_map(name: &str) -> MapDocument {
    serde_json::from_value(json!({
        "name": name,
        "platforms": [
            {"x": 0, "y": "HEIGHT - 40", "width": "WIDTH", "height": 40, "type": "ground"}
        ],
        "enemies": [
            {"type": "slime", "variant": "blue", "x": 100, "y": 100},
            {"type": "spider", "variant": "ground_crawling", "x": 900, "y": 100}
        ]
    }))
    .unwrap()
}

/// CONNECTION AND ROLE TESTS
mod connection_tests {
    use super::*;

    /// The first connection hosts; later ones join as guests
    #[tokio::test]
    async fn first_client_is_host() {
        let server = start_server().await;
        let host = NetworkClient::connect(&server.addr).await.unwrap();
        let guest = NetworkClient::connect(&server.addr).await.unwrap();

        assert!(host.is_host());
        assert!(!guest.is_host());
        assert_eq!(host.player_id().len(), 8);
        assert_ne!(host.player_id(), guest.player_id());

        server.shutdown.trigger();
    }

    /// A late joiner learns existing character selections
    #[tokio::test]
    async fn character_selections_replayed_to_new_players() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        host.send_character_selection("knight", "Ann").await.unwrap();
        // player_death echoes back to the sender, so the selection has been handled once it arrives
        host.send_player_death().await.unwrap();
        host.recv_until(WAIT, |p| matches!(p, Packet::PlayerDeath(_)))
            .await
            .unwrap();

        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();
        let packet = guest
            .recv_until(WAIT, |p| matches!(p, Packet::CharacterSelection(_)))
            .await
            .unwrap();
        match packet {
            Packet::CharacterSelection(selection) => {
                assert_eq!(selection.player_id.as_deref(), Some(host.player_id()));
                assert_eq!(selection.character_name.as_deref(), Some("knight"));
                assert_eq!(selection.player_name.as_deref(), Some("Ann"));
            }
            other => panic!("unexpected {:?}", other),
        }

        server.shutdown.trigger();
    }

    /// Only the host may start the game
    #[tokio::test]
    async fn guest_cannot_start_game() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        guest.send_game_start().await.unwrap();
        host.send_game_start().await.unwrap();

        let packet = guest
            .recv_until(WAIT, |p| matches!(p, Packet::GameStart(_)))
            .await
            .unwrap();
        match packet {
            Packet::GameStart(signal) => assert_eq!(signal.player_id.as_deref(), Some(host.player_id())),
            other => panic!("unexpected {:?}", other),
        }

        server.shutdown.trigger();
    }
}

/// WORLD STATE TESTS
mod world_tests {
    use super::*;

    /// Uploading a map spawns deterministic enemies that appear in sync broadcasts
    #[tokio::test]
    async fn map_upload_spawns_synced_enemies() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        host.send_map_data(test_map("Test")).await.unwrap();

        let ready = guest
            .recv_until(WAIT, |p| matches!(p, Packet::MapReady { .. }))
            .await
            .unwrap();
        assert_eq!(
            ready,
            Packet::MapReady {
                map_name: "Test".to_string(),
                enemies_count: 2
            }
        );

        let sync = guest
            .recv_until(WAIT, |p| matches!(p, Packet::EnemiesSync { enemies } if !enemies.is_empty()))
            .await
            .unwrap();
        if let Packet::EnemiesSync { enemies } = sync {
            let ids: Vec<&str> = enemies.iter().map(|e| e.enemy_id.as_str()).collect();
            assert!(ids.contains(&"Test_0_slime_blue"));
            assert!(ids.contains(&"Test_1_spider_ground_crawling"));
        }

        server.shutdown.trigger();
    }

    /// Damage is resolved by the server and broadcast with the authoritative health
    #[tokio::test]
    async fn enemy_damage_kills_and_removes() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        host.send_map_data(test_map("Arena")).await.unwrap();
        host.recv_until(WAIT, |p| matches!(p, Packet::MapReady { .. }))
            .await
            .unwrap();

        guest.send_enemy_damage("Arena_0_slime_blue", 20.0, None).await.unwrap();
        let damaged = host
            .recv_until(WAIT, |p| matches!(p, Packet::EnemyDamage(_)))
            .await
            .unwrap();
        match damaged {
            Packet::EnemyDamage(damage) => {
                assert_eq!(damage.current_health, Some(30.0));
                assert_eq!(damage.player_id.as_deref(), Some(guest.player_id()));
            }
            other => panic!("unexpected {:?}", other),
        }

        guest.send_enemy_damage("Arena_0_slime_blue", 100.0, None).await.unwrap();
        let death = host
            .recv_until(WAIT, |p| matches!(p, Packet::EnemyDeath(_)))
            .await
            .unwrap();
        match death {
            Packet::EnemyDeath(death) => {
                assert_eq!(death.enemy_id, "Arena_0_slime_blue");
                assert_eq!(death.enemy_type.as_deref(), Some("slime"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let sync = host
            .recv_until(WAIT, |p| {
                matches!(p, Packet::EnemiesSync { enemies }
                    if enemies.iter().all(|e| e.enemy_id != "Arena_0_slime_blue"))
            })
            .await
            .unwrap();
        if let Packet::EnemiesSync { enemies } = sync {
            assert_eq!(enemies.len(), 1);
        }

        server.shutdown.trigger();
    }

    /// A portal to an uploaded map reloads it without a new upload
    #[tokio::test]
    async fn portal_reloads_catalog_map() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        host.send_map_data(test_map("Cave")).await.unwrap();
        host.send_map_data(test_map("Field")).await.unwrap();
        let field_ready = |p: &Packet| matches!(p, Packet::MapReady { map_name, .. } if map_name == "Field");
        host.recv_until(WAIT, field_ready).await.unwrap();
        guest.recv_until(WAIT, field_ready).await.unwrap();

        guest.send_portal_trigger(MapTarget::Name("Cave".to_string())).await.unwrap();
        let ready = host
            .recv_until(WAIT, |p| matches!(p, Packet::MapReady { .. }))
            .await
            .unwrap();
        assert!(matches!(ready, Packet::MapReady { ref map_name, .. } if map_name == "Cave"));
        let portal = host
            .recv_until(WAIT, |p| matches!(p, Packet::PortalTrigger(_)))
            .await
            .unwrap();
        if let Packet::PortalTrigger(transition) = portal {
            assert_eq!(transition.player_id.as_deref(), Some(guest.player_id()));
        }

        server.shutdown.trigger();
    }

    /// Large maps travel compressed and chunked and still load
    #[tokio::test]
    async fn large_map_upload_survives_chunking() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();

        let mut map = test_map("Big");
        map.enemies = (0..150)
            .map(|i| {
                let mut enemy = EnemyDescriptor::new("slime", "green", (i * 12) as f32, 100.0);
                enemy.health = Some(40.0 + i as f32);
                enemy
            })
            .collect();
        host.send_map_data(map).await.unwrap();

        let ready = host
            .recv_until(WAIT, |p| matches!(p, Packet::MapReady { .. }))
            .await
            .unwrap();
        assert!(matches!(ready, Packet::MapReady { enemies_count: 150, .. }));

        server.shutdown.trigger();
    }
}

/// RELAY TESTS
mod relay_tests {
    use super::*;

    /// Player updates reach other players tagged with the sender id
    #[tokio::test]
    async fn player_update_relayed_with_sender() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        guest
            .send_player_update(PlayerUpdate {
                x: Some(250.0),
                y: Some(600.0),
                facing_right: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        let packet = host
            .recv_until(WAIT, |p| matches!(p, Packet::PlayerUpdate(_)))
            .await
            .unwrap();
        match packet {
            Packet::PlayerUpdate(update) => {
                assert_eq!(update.player_id.as_deref(), Some(guest.player_id()));
                assert_eq!(update.position(), Some((250.0, 600.0)));
                assert_eq!(update.facing_right, Some(false));
            }
            other => panic!("unexpected {:?}", other),
        }

        server.shutdown.trigger();
    }

    /// Player damage goes only to its target
    #[tokio::test]
    async fn player_damage_is_directed() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut guest = NetworkClient::connect(&server.addr).await.unwrap();

        guest.send_player_damage(host.player_id(), 15.0).await.unwrap();
        let packet = host
            .recv_until(WAIT, |p| matches!(p, Packet::PlayerDamageReceived { .. }))
            .await
            .unwrap();
        assert_eq!(
            packet,
            Packet::PlayerDamageReceived {
                damage: 15.0,
                from_player_id: guest.player_id().to_string()
            }
        );

        server.shutdown.trigger();
    }
}

/// ROOM LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Reads until the socket closes, returning the disband packet it saw on the way
    async fn disband_then_close(guest: &mut NetworkClient) -> Packet {
        let packet = guest
            .recv_until(WAIT, |p| matches!(p, Packet::RoomDisbanded { .. }))
            .await
            .unwrap();
        loop {
            match guest.recv_timeout(WAIT).await.unwrap() {
                Some(Packet::PlayerDisconnect { .. }) => panic!("guests get room_disbanded only"),
                Some(_) => continue,
                None => break,
            }
        }
        packet
    }

    /// Host departure disbands the room for every guest, then the server
    /// closes after the grace period
    #[tokio::test]
    async fn host_departure_disbands_room() {
        let server = start_server().await;
        let host = NetworkClient::connect(&server.addr).await.unwrap();
        let mut first = NetworkClient::connect(&server.addr).await.unwrap();
        let mut second = NetworkClient::connect(&server.addr).await.unwrap();
        assert!(!first.is_host() && !second.is_host());

        let left_at = Instant::now();
        host.disconnect().await.unwrap();

        let (first_packet, second_packet) =
            tokio::join!(disband_then_close(&mut first), disband_then_close(&mut second));
        for packet in [first_packet, second_packet] {
            match packet {
                Packet::RoomDisbanded { reason, message } => {
                    assert_eq!(reason, "host_left");
                    assert!(!message.is_empty());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(left_at.elapsed() >= GRACE - Duration::from_millis(50));

        let result = tokio::time::timeout(WAIT, server.handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    /// A guest leaving is announced to the rest of the room
    #[tokio::test]
    async fn guest_departure_announced() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();
        let guest = NetworkClient::connect(&server.addr).await.unwrap();
        let guest_id = guest.player_id().to_string();

        guest.disconnect().await.unwrap();
        let packet = host
            .recv_until(WAIT, |p| matches!(p, Packet::PlayerDisconnect { .. }))
            .await
            .unwrap();
        assert_eq!(packet, Packet::PlayerDisconnect { player_id: guest_id });

        server.shutdown.trigger();
    }

    /// Triggering shutdown closes every client socket
    #[tokio::test]
    async fn shutdown_closes_connections() {
        let server = start_server().await;
        let mut host = NetworkClient::connect(&server.addr).await.unwrap();

        server.shutdown.trigger();
        loop {
            if host.recv_timeout(WAIT).await.unwrap().is_none() {
                break;
            }
        }
        let result = tokio::time::timeout(WAIT, server.handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}

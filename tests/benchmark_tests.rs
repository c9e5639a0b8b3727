//! Performance benchmarks for critical server systems

use assert_approx_eq::assert_approx_eq;
use serde_json::json;
use server::game::WorldPool;
use server::scheduler::sync_packets;
use shared::{encode_frames, CodecConfig, EnemyDescriptor, FrameDecoder, MapDocument, Packet, PlayerUpdate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

fn crowded_map(enemies: usize) -> MapDocument {
    let kinds = [
        ("slime", "blue"),
        ("spider", "ground_crawling"),
        ("spider", "wall_crawling"),
        ("vulture", "brown"),
    ];
    MapDocument {
        name: Some("Bench".to_string()),
        platforms: vec![serde_json::from_value(json!({
            "x": 0, "y": "HEIGHT - 40", "width": "WIDTH", "height": 40
        }))
        .unwrap()],
        enemies: (0..enemies)
            .map(|i| {
                let (kind, variant) = kinds[i % kinds.len()];
                EnemyDescriptor::new(kind, variant, (i * 37 % 1700) as f32, 200.0)
            })
            .collect(),
        ..Default::default()
    }
}

/// Benchmarks a full simulation tick with a crowded map
#[test]
fn benchmark_world_update() {
    let mut pool = WorldPool::with_seed(7);
    pool.set_map_data(crowded_map(60));
    for i in 0..4 {
        let id = format!("player_{}", i);
        pool.add_player(&id);
        pool.update_player(
            &id,
            &PlayerUpdate {
                x: Some(300.0 + i as f32 * 400.0),
                y: Some(900.0),
                ..Default::default()
            },
        );
    }

    let iterations = 600;
    let start = Instant::now();
    for _ in 0..iterations {
        let report = pool.update(1.0 / 60.0);
        assert!(report.failed.is_empty());
    }
    let duration = start.elapsed();

    println!(
        "World update: {} enemies × {} ticks in {:?} ({:.2} μs/tick)",
        pool.enemy_count(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(pool.enemy_count(), 60);
    // Ten simulated seconds should take well under five real ones
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks encoding and decoding a full enemies_sync broadcast
#[test]
fn benchmark_sync_codec() {
    let mut pool = WorldPool::with_seed(7);
    pool.set_map_data(crowded_map(40));
    let packet = Packet::EnemiesSync {
        enemies: pool.snapshot_enemies(),
    };
    let value = packet.to_value().unwrap();
    let config = CodecConfig::default();

    let iterations = 1_000;
    let start = Instant::now();
    let mut decoded = 0;
    for _ in 0..iterations {
        let frames = encode_frames(&value, &config).unwrap();
        let mut decoder = FrameDecoder::new();
        for frame in &frames {
            decoder.extend(frame);
        }
        for message in decoder.by_ref() {
            let message = message.unwrap();
            assert_eq!(message["type"], "enemies_sync");
            decoded += 1;
        }
    }
    let duration = start.elapsed();

    println!(
        "Sync codec: {} round trips in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(decoded, iterations);
    assert!(duration.as_millis() < 10_000);
}

/// Stress tests reassembly of a message split over many chunks
#[test]
fn stress_test_chunked_payload() {
    let config = CodecConfig::default();
    let noise: String = (0..40).map(|_| shared::random_token(512)).collect();
    let value = json!({"type": "map_data", "noise": noise});

    let start = Instant::now();
    let frames = encode_frames(&value, &config).unwrap();
    assert!(frames.len() > 10);
    for frame in &frames {
        assert!(frame.len() <= config.max_packet_size);
    }

    // deliver in reverse order, a few bytes at a time
    let mut decoder = FrameDecoder::new();
    let mut results = Vec::new();
    for frame in frames.iter().rev() {
        for piece in frame.chunks(97) {
            decoder.extend(piece);
            results.extend(decoder.by_ref());
        }
    }
    let duration = start.elapsed();

    println!(
        "Chunked payload: {} frames in {:?}",
        frames.len(),
        duration
    );

    assert_eq!(results.len(), 1);
    let message = results.remove(0).unwrap();
    assert_eq!(message["noise"].as_str().map(str::len), Some(40 * 512));
    assert_eq!(decoder.pending_chunk_sets(), 0);
    assert!(duration.as_millis() < 2000);
}

/// Stress tests concurrent player updates against snapshot reads
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_test_concurrent_player_updates() {
    let pool = Arc::new(RwLock::new(WorldPool::with_seed(3)));
    let players = 8;
    let updates_per_player = 500;
    for i in 0..players {
        pool.write().await.add_player(&format!("p{}", i));
    }

    let start = Instant::now();
    let mut writers = Vec::new();
    for i in 0..players {
        let pool = Arc::clone(&pool);
        writers.push(tokio::spawn(async move {
            let id = format!("p{}", i);
            for step in 0..updates_per_player {
                let update = PlayerUpdate {
                    x: Some(step as f32),
                    y: Some(i as f32 * 10.0),
                    ..Default::default()
                };
                assert!(pool.write().await.update_player(&id, &update));
            }
        }));
    }

    let reader = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut reads = 0;
            for _ in 0..200 {
                let snapshot = pool.read().await.snapshot_players();
                assert_eq!(snapshot.len(), players);
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(reader.await.unwrap(), 200);
    let duration = start.elapsed();

    println!(
        "Concurrent updates: {} writes in {:?}",
        players * updates_per_player,
        duration
    );

    let pool = pool.read().await;
    for i in 0..players {
        let player = pool.player(&format!("p{}", i)).unwrap();
        assert_approx_eq!(player.position.x, (updates_per_player - 1) as f32);
        assert_approx_eq!(player.position.y, i as f32 * 10.0);
    }
    assert!(duration.as_millis() < 5000);
}

/// Stress tests the simulation tick racing damage and snapshot readers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_test_tick_against_snapshots() {
    let pool = Arc::new(RwLock::new(WorldPool::with_seed(11)));
    {
        let mut pool = pool.write().await;
        pool.set_map_data(crowded_map(40));
        pool.add_player("p0");
        pool.update_player(
            "p0",
            &PlayerUpdate {
                x: Some(800.0),
                y: Some(900.0),
                ..Default::default()
            },
        );
    }
    let ids: Vec<String> = pool
        .read()
        .await
        .snapshot_enemies()
        .into_iter()
        .map(|e| e.enemy_id)
        .collect();
    assert_eq!(ids.len(), 40);

    let ticks = 600;
    let start = Instant::now();

    let ticker = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            for _ in 0..ticks {
                let report = pool.write().await.update(1.0 / 60.0);
                assert!(report.failed.is_empty());
                tokio::task::yield_now().await;
            }
        })
    };

    let attacker = {
        let pool = Arc::clone(&pool);
        let ids = ids.clone();
        tokio::spawn(async move {
            for round in 0..200 {
                let id = &ids[round % ids.len()];
                // the last pass finishes every enemy off
                let current = (round >= 160).then_some(0.0);
                pool.write().await.apply_enemy_damage(id, 1.0, current);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for reader in 0..3 {
        let pool = Arc::clone(&pool);
        let known: HashSet<String> = ids.iter().cloned().collect();
        readers.push(tokio::spawn(async move {
            let mut health: HashMap<String, f32> = HashMap::new();
            let mut gone: HashSet<String> = HashSet::new();
            for _ in 0..300 {
                let snapshot = if reader == 0 {
                    match sync_packets(&*pool.read().await).into_iter().next() {
                        Some(Packet::EnemiesSync { enemies }) => enemies,
                        other => panic!("expected enemies_sync, got {:?}", other),
                    }
                } else {
                    pool.read().await.snapshot_enemies()
                };

                let present: HashSet<String> = snapshot.iter().map(|e| e.enemy_id.clone()).collect();
                assert_eq!(present.len(), snapshot.len(), "duplicate enemy ids");
                for enemy in &snapshot {
                    assert!(known.contains(&enemy.enemy_id));
                    assert!(!gone.contains(&enemy.enemy_id), "{} came back", enemy.enemy_id);
                    assert!(enemy.x.is_finite() && enemy.y.is_finite());
                    assert!(enemy.vel_x.is_finite() && enemy.vel_y.is_finite());
                    assert!(enemy.health > 0.0 && enemy.health <= enemy.max_health);
                    if let Some(previous) = health.insert(enemy.enemy_id.clone(), enemy.health) {
                        assert!(enemy.health <= previous, "{} healed", enemy.enemy_id);
                    }
                }
                gone.extend(health.keys().filter(|id| !present.contains(*id)).cloned());
                tokio::task::yield_now().await;
            }
        }));
    }

    ticker.await.unwrap();
    attacker.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let duration = start.elapsed();

    let pool = pool.read().await;
    println!(
        "Tick vs snapshots: {} ticks, {} enemies left in {:?}",
        pool.tick,
        pool.enemy_count(),
        duration
    );

    assert_eq!(pool.enemy_count(), 0);
    assert!(pool.tick >= ticks);
    assert!(duration.as_millis() < 10_000);
}

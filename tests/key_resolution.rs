//! Key resolution during verification runs: keyserver fetches, dedup,
//! timeouts and the on-disk key cache

mod fixtures;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use depgate::keys::{encode_verifying_key, KeyServer, KEY_CACHE_FILENAME};
use depgate::{Artifact, Engine, EngineConfig, Mode, OutcomeKind};
use ed25519_dalek::SigningKey;
use fixtures::{
    component, key_id, policy, sha256_checksum, signing_key, trusted_key, MapKeyServer, Workspace,
};
use tempfile::TempDir;

const CONTENT: &[u8] = b"signed plugin payload";

/// Policy requiring signatures, trusting `keys` without inline material
fn signed_policy(coordinates: &[String], keys: &[&SigningKey]) -> String {
    let mut doc = String::from("[settings]\nverify_signatures = true\n\n");
    for key in keys {
        doc.push_str(&trusted_key(key, false));
    }
    for coordinate in coordinates {
        doc.push_str(&component(coordinate, &sha256_checksum(CONTENT)));
    }
    doc
}

fn signed_artifacts(ws: &Workspace, count: usize, key: &SigningKey) -> (Vec<Artifact>, Vec<String>) {
    let coordinates: Vec<String> = (0..count)
        .map(|i| format!("com.acme:plugin{:02}:2.0", i))
        .collect();
    let artifacts = coordinates
        .iter()
        .map(|c| {
            let artifact = ws.artifact(c, CONTENT);
            ws.sign(&artifact, key);
            artifact
        })
        .collect();
    (artifacts, coordinates)
}

fn engine_with(config: EngineConfig, server: &Arc<MapKeyServer>) -> Engine {
    Engine::new(config)
        .unwrap()
        .with_key_server(Arc::clone(server) as Arc<dyn KeyServer>)
}

#[test]
fn test_concurrent_resolvers_share_one_fetch() {
    let ws = Workspace::new();
    let publisher = signing_key(0x51);
    let (artifacts, coordinates) = signed_artifacts(&ws, 8, &publisher);
    let server = Arc::new(
        MapKeyServer::new(&[&publisher]).with_delay(Duration::from_millis(200)),
    );
    let engine = engine_with(
        EngineConfig {
            workers: Some(8),
            ..EngineConfig::default()
        },
        &server,
    );

    let ctx = engine.context(policy(&signed_policy(&coordinates, &[&publisher])));
    let report = engine.verify_all(&artifacts, &ctx).unwrap();

    assert!(report.passed(), "{}", depgate::render_text(&report));
    assert_eq!(report.entries.len(), 8);
    assert_eq!(ctx.keys.fetch_count(), 1);
    assert_eq!(server.calls(), 1);
}

#[test]
fn test_untrusted_key_independent_of_unrelated_fetch() {
    let publisher = signing_key(0x51);
    let stranger = signing_key(0x77);

    // Unrelated fetch succeeds, then times out.
    for (delay, expected_publisher) in [
        (Duration::ZERO, "VERIFIED"),
        (Duration::from_millis(2500), "KEY_UNRESOLVABLE"),
    ] {
        let ws = Workspace::new();
        let good = ws.artifact("com.acme:good:1.0", CONTENT);
        ws.sign(&good, &publisher);
        let bad = ws.artifact("com.acme:bad:1.0", CONTENT);
        ws.sign(&bad, &stranger);

        let coordinates = vec!["com.acme:good:1.0".to_string(), "com.acme:bad:1.0".to_string()];
        let server = Arc::new(MapKeyServer::new(&[&publisher, &stranger]).with_delay(delay));
        let engine = engine_with(
            EngineConfig {
                workers: Some(2),
                key_fetch_timeout_seconds: 1,
                ..EngineConfig::default()
            },
            &server,
        );

        let report = engine
            .run(&[good, bad], policy(&signed_policy(&coordinates, &[&publisher])))
            .unwrap();

        // Sorted: bad before good.
        assert_eq!(
            report.entries[0].outcome.kind,
            OutcomeKind::UntrustedKey {
                key_id: key_id(&stranger)
            }
        );
        assert!(report.entries[0].outcome.fatal);
        assert_eq!(report.entries[1].outcome.kind.name(), expected_publisher);
        // The stranger's key is never fetched.
        assert_eq!(server.calls(), 1);
    }
}

#[test]
fn test_failed_fetch_is_remembered_for_the_run() {
    let ws = Workspace::new();
    let publisher = signing_key(0x51);
    let (artifacts, coordinates) = signed_artifacts(&ws, 4, &publisher);
    let server = Arc::new(MapKeyServer::new(&[]));
    let engine = engine_with(
        EngineConfig {
            mode: Mode::Lenient,
            workers: Some(1),
            ..EngineConfig::default()
        },
        &server,
    );

    let report = engine
        .run(&artifacts, policy(&signed_policy(&coordinates, &[&publisher])))
        .unwrap();

    assert!(report
        .entries
        .iter()
        .all(|e| matches!(e.outcome.kind, OutcomeKind::KeyUnresolvable { .. })));
    assert_eq!(report.warning_count, 4);
    assert!(report.passed());
    assert_eq!(server.calls(), 1);
}

#[test]
fn test_key_cache_survives_across_engines() {
    let ws = Workspace::new();
    let cache_dir = TempDir::new().unwrap();
    let publisher = signing_key(0x51);
    let (artifacts, coordinates) = signed_artifacts(&ws, 2, &publisher);
    let doc = signed_policy(&coordinates, &[&publisher]);
    let config = EngineConfig {
        key_cache_dir: Some(cache_dir.path().to_path_buf()),
        ..EngineConfig::default()
    };

    let online = Arc::new(MapKeyServer::new(&[&publisher]));
    let first = engine_with(config.clone(), &online)
        .run(&artifacts, policy(&doc))
        .unwrap();
    assert!(first.passed());
    assert_eq!(online.calls(), 1);

    let cached = fs::read_to_string(cache_dir.path().join(KEY_CACHE_FILENAME)).unwrap();
    assert_eq!(cached.lines().count(), 1);
    assert!(cached.contains(key_id(&publisher).as_str()));

    let offline = Arc::new(MapKeyServer::new(&[]));
    let second = engine_with(config, &offline)
        .run(&artifacts, policy(&doc))
        .unwrap();
    assert!(second.passed());
    assert_eq!(offline.calls(), 0);
}

#[test]
fn test_directory_keyserver_from_config() {
    let ws = Workspace::new();
    let keyserver = TempDir::new().unwrap();
    let publisher = signing_key(0x51);
    fs::write(
        keyserver.path().join(format!("{}.pub", key_id(&publisher))),
        encode_verifying_key(&publisher.verifying_key()),
    )
    .unwrap();
    let (artifacts, coordinates) = signed_artifacts(&ws, 3, &publisher);

    let engine = Engine::new(EngineConfig {
        keyserver_dir: Some(keyserver.path().to_path_buf()),
        ..EngineConfig::default()
    })
    .unwrap();
    let report = engine
        .run(&artifacts, policy(&signed_policy(&coordinates, &[&publisher])))
        .unwrap();

    assert!(report.passed(), "{}", depgate::render_text(&report));
}

#[test]
fn test_no_keyserver_means_unresolvable() {
    let ws = Workspace::new();
    let publisher = signing_key(0x51);
    let (artifacts, coordinates) = signed_artifacts(&ws, 1, &publisher);

    let report = Engine::new(EngineConfig::default())
        .unwrap()
        .run(&artifacts, policy(&signed_policy(&coordinates, &[&publisher])))
        .unwrap();

    assert!(matches!(
        report.entries[0].outcome.kind,
        OutcomeKind::KeyUnresolvable { .. }
    ));
    assert!(report.has_fatal_failure);
}

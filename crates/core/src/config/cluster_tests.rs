// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;
use yare::parameterized;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn peers(ids: &[&str]) -> Vec<PeerId> {
    ids.iter().map(|id| PeerId::new(*id)).collect()
}

#[test]
fn load_reads_peers_and_durations() {
    let file = write_config(
        r#"
peers = ["127.0.0.1:5001", "127.0.0.1:5002"]
connect_retry = "250ms"
max_frame_len = 4096
"#,
    );

    let config = ClusterConfig::load(file.path()).unwrap();
    assert_eq!(config.peers, peers(&["127.0.0.1:5001", "127.0.0.1:5002"]));
    assert_eq!(config.max_frame_len, 4096);
    // The environment may override the file; only check when it is unset
    if std::env::var(CONNECT_RETRY_ENV).is_err() {
        assert_eq!(config.connect_retry, Duration::from_millis(250));
    }
}

#[test]
fn load_applies_defaults() {
    let file = write_config(r#"peers = ["a:1"]"#);
    let config = ClusterConfig::load(file.path()).unwrap();
    assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    assert_eq!(config.tcp_options().max_frame_len, DEFAULT_MAX_FRAME_LEN);
}

#[test]
fn load_rejects_unknown_fields() {
    let file = write_config("peers = []\nretries = 3\n");
    let err = ClusterConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
}

#[test]
fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClusterConfig::load(&dir.path().join("cluster.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn for_peer_splits_local_from_remotes() {
    let config = ClusterConfig::new(peers(&["a:1", "b:2", "c:3"]));
    let (local, remotes) = config.for_peer(&PeerId::new("b:2")).unwrap();
    assert_eq!(local, PeerId::new("b:2"));
    assert_eq!(remotes, peers(&["a:1", "c:3"]));
}

#[parameterized(
    empty = { &[], "a:1" },
    unknown_local = { &["a:1", "b:2"], "c:3" },
    duplicate = { &["a:1", "b:2", "a:1"], "a:1" },
)]
fn for_peer_rejects_bad_membership(ids: &[&str], local: &str) {
    let config = ClusterConfig::new(peers(ids));
    assert!(config.for_peer(&PeerId::new(local)).is_err());
}

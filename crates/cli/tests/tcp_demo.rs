// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end runs of `dmon` peers talking over TCP

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::net::TcpListener;
use std::process::{Command, Stdio};
use std::time::Duration;

/// An address nothing is listening on right now
fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn dmon() -> Command {
    let mut cmd = Command::cargo_bin("dmon").unwrap();
    cmd.env("RUST_LOG", "warn").env("DM_CONNECT_RETRY_MS", "20");
    cmd
}

fn consumed(items: i64) -> String {
    (1..=items).map(|i| format!("Consumed {i}\n")).collect()
}

#[test]
fn producer_and_consumer_processes_agree_on_order() {
    let producer_addr = free_addr();
    let consumer_addr = free_addr();
    let peers = format!("{producer_addr},{consumer_addr}");

    let producer = dmon()
        .args(["--peers", &peers, "--peer", &producer_addr])
        .args(["--linger-ms", "3000", "produce", "--items", "20"])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    assert_cmd::Command::from_std(dmon())
        .args(["--peers", &peers, "--peer", &consumer_addr])
        .args(["--linger-ms", "500", "consume", "--items", "20"])
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains(consumed(20)))
        .stdout(predicate::str::contains("STOP consumer"));

    let output = producer.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Produced 20"), "producer stdout:\n{stdout}");
}

#[test]
fn config_file_defines_the_cluster() {
    let addr = free_addr();
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "peers = [\"{addr}\"]\nconnect_retry = \"50ms\"").unwrap();

    assert_cmd::Command::from_std(dmon())
        .arg("--config")
        .arg(config.path())
        .args(["--peer", &addr, "--capacity", "3", "--linger-ms", "0"])
        .args(["produce", "--items", "3"])
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Produced 3"));
}

#[test]
fn local_peer_must_be_a_member() {
    dmon()
        .args(["--peers", "127.0.0.1:1,127.0.0.1:2", "--peer", "127.0.0.1:3"])
        .args(["produce", "--items", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the peer list"));
}

#[test]
fn cluster_membership_is_required() {
    dmon()
        .args(["--peer", "127.0.0.1:1", "consume"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "either --config or --peers is required",
        ));
}

#[test]
fn zero_capacity_is_rejected() {
    let addr = free_addr();
    dmon()
        .args(["--peers", &addr, "--peer", &addr, "--capacity", "0", "produce"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--capacity must be at least 1"));
}

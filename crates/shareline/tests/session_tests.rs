//! Session binding across connections
//!
//! ## NIST 800-53 Compliance
//!
//! - **AC-10 (Concurrent Session Control)**: slot capacity and sharing

mod common;

use common::{ALICE_KEY, BOB_KEY, TestServer, WAIT, until_prompt};
use shareline::protocol::{GetResponse, get_frame_end};
use shareline::{CipherContext, Download, Error};
use std::time::Duration;

/// Wait for the server task to drop a closed connection's session
async fn wait_for_release(server: &TestServer, username: &str) {
    for _ in 0..100 {
        if server.shared.sessions.ref_count(username) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.shared.sessions.ref_count(username), 0);
}

#[tokio::test]
async fn test_switch_uses_new_key_and_fresh_iv() {
    let server = TestServer::start().await;
    let mut raw = server.raw().await;

    until_prompt(&mut raw).await;
    raw.send(b"alice\n").await.unwrap();
    until_prompt(&mut raw).await;

    raw.send(b"GET a.txt\n").await.unwrap();
    let frame = raw.recv_frame(WAIT, 1 << 20, get_frame_end).await.unwrap();
    let alice_iv = GetResponse::parse(&frame).unwrap().iv.unwrap();
    until_prompt(&mut raw).await;

    raw.send(b"SWITCH\n").await.unwrap();
    assert!(until_prompt(&mut raw).await.contains("Choose your user:"));
    raw.send(b"bob\n").await.unwrap();
    assert!(until_prompt(&mut raw).await.starts_with("\r\n[+] Switched to: bob\r\n"));

    assert_eq!(server.shared.sessions.ref_count("alice"), 0);
    assert_eq!(server.shared.sessions.ref_count("bob"), 1);

    raw.send(b"GET a.txt\n").await.unwrap();
    let frame = raw.recv_frame(WAIT, 1 << 20, get_frame_end).await.unwrap();
    let response = GetResponse::parse(&frame).unwrap();
    let bob_iv = response.iv.unwrap();
    assert_ne!(bob_iv, alice_iv);

    let bob = CipherContext::new(&BOB_KEY, Some(bob_iv)).unwrap();
    assert_eq!(bob.decrypt(&response.payload), b"hello");
    let alice = CipherContext::new(&ALICE_KEY, Some(bob_iv)).unwrap();
    assert_ne!(alice.decrypt(&response.payload), b"hello");

    // alice's slot was released, so a new binding starts with fresh state
    let rebound = server.shared.sessions.acquire("alice").unwrap();
    assert!(rebound.current_path().is_empty());
    assert!(!rebound.is_path_validated());
}

#[tokio::test]
async fn test_client_switch_round_trip() {
    let server = TestServer::start().await;
    let mut client = server.login("alice", Some(&ALICE_KEY)).await;
    let downloads = server.downloads();

    let menu = client.begin_switch().await.unwrap();
    assert!(menu.contains("2 bob"));
    assert_eq!(client.username(), None);

    let banner = client.finish_switch("2").await.unwrap();
    assert_eq!(banner, "\r\n[+] Switched to: bob\r\n");
    assert_eq!(client.username(), Some("bob"));

    client.set_key(&BOB_KEY).unwrap();
    let output = downloads.join("a.txt");
    let download = client.get("a.txt", Some(&output)).await.unwrap();
    assert!(matches!(download, Download::Decrypted { .. }));
    assert_eq!(std::fs::read(&output).unwrap(), b"hello");
}

#[tokio::test]
async fn test_failed_switch_leaves_connection_usable() {
    let server = TestServer::start().await;
    let mut client = server.login("alice", Some(&ALICE_KEY)).await;

    client.begin_switch().await.unwrap();
    assert!(matches!(
        client.finish_switch("nobody").await,
        Err(Error::Remote(msg)) if msg == "ERROR: Invalid user"
    ));
    assert_eq!(server.shared.sessions.active_sessions(), 0);

    let no_session = |result: shareline::Result<String>| {
        matches!(result, Err(Error::Remote(msg)) if msg == "ERROR: No active session")
    };
    assert!(no_session(client.list(None).await));
    assert!(no_session(client.info("a.txt").await));
    assert!(matches!(
        client.get("a.txt", Some(&server.downloads().join("a.txt"))).await,
        Err(Error::Remote(msg)) if msg == "ERROR: No active session"
    ));

    client.begin_switch().await.unwrap();
    client.finish_switch("alice").await.unwrap();
    assert!(client.list(None).await.unwrap().contains("a.txt"));
}

#[tokio::test]
async fn test_same_user_shares_one_session() {
    let server = TestServer::start().await;
    let first = server.login("alice", None).await;
    let mut second = server.login("1", None).await;

    assert_eq!(server.shared.sessions.ref_count("alice"), 2);
    assert_eq!(server.shared.sessions.active_sessions(), 1);

    drop(first);
    // Wait for the server to notice the closed socket
    for _ in 0..100 {
        if server.shared.sessions.ref_count("alice") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.shared.sessions.ref_count("alice"), 1);

    second.exit().await.unwrap();
    wait_for_release(&server, "alice").await;
}

#[tokio::test]
async fn test_capacity_exhausted_at_login() {
    let server = TestServer::start_with(1).await;
    let alice = server.login("alice", None).await;

    let mut raw = server.raw().await;
    until_prompt(&mut raw).await;
    raw.send(b"bob\n").await.unwrap();
    let reply = raw.recv_all(WAIT, 4096).await.unwrap();
    assert_eq!(&reply[..], b"ERROR: Too many active sessions\r\n");

    // Joining the live binding does not need a free slot
    let mut again = server.client().await;
    assert_eq!(again.authenticate("alice").await.unwrap(), "alice");

    drop(alice);
    drop(again);
    wait_for_release(&server, "alice").await;

    let mut bob = server.client().await;
    assert_eq!(bob.authenticate("bob").await.unwrap(), "bob");
}

#[tokio::test]
async fn test_switch_reports_capacity() {
    let server = TestServer::start_with(1).await;
    let mut client = server.login("alice", None).await;

    client.begin_switch().await.unwrap();
    // The released slot is taken by another connection first
    let _other = server.login("guest", None).await;

    assert!(matches!(
        client.finish_switch("bob").await,
        Err(Error::Remote(msg)) if msg == "ERROR: Cannot create session"
    ));
    assert!(matches!(
        client.list(None).await,
        Err(Error::Remote(msg)) if msg == "ERROR: No active session"
    ));
}

//! Partial failures of the remote collaborators

use crate::core_sync::messages::Envelope;
use crate::core_sync::traits::{InvitePayload, Relay};
use crate::core_sync::{AccountId, AccountSession, SyncError};
use crate::test_utils::*;

#[tokio::test]
async fn test_failed_create_persist_sends_nothing() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("fragile");
    let members = roster(&["alice", "bob"]);

    net.state.fail_next_store();
    let err = assert_err(sessions[0].reconcile(&g, &members).await);
    assert!(err.is_transport());

    assert_eq!(sessions[0].pending_outbound(), 0);
    assert_eq!(net.pending_for("bob").await, 0);
    assert!(sessions[0].group_state(&g).await.unwrap().is_none());

    // the next pass starts from scratch
    assert!(sessions[0].reconcile(&g, &members).await.unwrap());
    assert_eq!(net.pending_for("bob").await, 1);
}

#[tokio::test]
async fn test_failed_commit_persist_keeps_previous_epoch() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob", "carol"]).await;
    let g = group("fragile-commit");

    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();
    sessions[1].drain().await;

    net.state.fail_next_store();
    assert!(sessions[0].reconcile(&g, &roster(&["alice", "bob", "carol"])).await.is_err());

    assert_eq!(sessions[0].pending_outbound(), 0);
    assert_eq!(net.pending_for("bob").await, 0);
    assert_eq!(net.pending_for("carol").await, 0);
    assert_eq!(state_of(&mut sessions[0], &g).await.latest_epoch, 1);

    assert!(sessions[0].reconcile(&g, &roster(&["alice", "bob", "carol"])).await.unwrap());
    sessions[1].drain().await;
    sessions[2].drain().await;
    assert_eq!(assert_converged(&mut sessions, &g).await.latest_epoch, 2);
}

#[tokio::test]
async fn test_failed_send_keeps_persisted_state() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("lost-invite");

    net.relay.fail_next_send();
    let err = assert_err(sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await);
    assert!(matches!(err, SyncError::Transport(_)));

    // committed but not notified
    assert_eq!(state_of(&mut sessions[0], &g).await.latest_epoch, 1);
    assert_eq!(sessions[0].pending_outbound(), 0);
    assert_eq!(net.pending_for("bob").await, 0);
}

#[tokio::test]
async fn test_rotation_failure_names_group() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("rotate-me");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();
    let before = sessions[0].credential().cloned();

    net.state.fail_next_store();
    let err = assert_err(sessions[0].rotate_credential(true).await);
    match err {
        SyncError::RotationFailed { group_id, source } => {
            assert_eq!(group_id, g);
            assert!(source.is_transport());
        }
        other => panic!("Expected RotationFailed, got {:?}", other),
    }

    // nothing registered, nothing cached
    assert_eq!(sessions[0].credential().cloned(), before);
    assert!(net.directory.revoked(PLATFORM, &"alice".into()).await.is_empty());
    assert_eq!(state_of(&mut sessions[0], &g).await.latest_epoch, 1);

    assert!(sessions[0].rotate_credential(true).await.unwrap());
    assert_eq!(state_of(&mut sessions[0], &g).await.latest_epoch, 2);
}

#[tokio::test]
async fn test_failed_registration_keeps_cached_credential() {
    let net = TestNetwork::new();
    let mut alice = net.open("alice").await;
    let before = alice.credential().cloned();

    net.directory.fail_next_register();
    assert!(alice.rotate_credential(true).await.is_err());
    assert_eq!(alice.credential().cloned(), before);
}

#[tokio::test]
async fn test_malformed_inbound_is_skipped() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("noisy");
    let bob = AccountId::from("bob");

    net.relay.inject(PLATFORM, &bob, "not json at all").await;
    net.relay.inject(PLATFORM, &bob, r#"{"sender":"mallory","kind":"COMMIT"}"#).await;
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();

    // a forged JOIN whose invite is not addressed to bob
    let state = state_of(&mut sessions[0], &g).await;
    let forged = Envelope::join(&"mallory".into(), &state, &InvitePayload(b"{}".to_vec()));
    net.relay.inject(PLATFORM, &bob, forged.to_wire().unwrap()).await;

    let report = sessions[1].drain().await;
    assert_eq!(report.fetched, 4);
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 3);
    assert!(!report.fetch_failed);
    assert_eq!(state_of(&mut sessions[1], &g).await.latest_epoch, 1);
}

#[tokio::test]
async fn test_commit_for_unknown_group_is_ignored() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob", "carol"]).await;
    let g = group("private");

    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();
    sessions[1].drain().await;
    sessions[0].add_members(&g, &roster(&["carol"])).await.unwrap();

    // carol receives the COMMIT meant for bob before her own JOIN
    let bob = AccountId::from("bob");
    let carol = AccountId::from("carol");
    let commit = net.relay.fetch_pending(PLATFORM, &bob).await.unwrap().remove(0);
    let join = net.relay.fetch_pending(PLATFORM, &carol).await.unwrap().remove(0);
    net.relay.inject(PLATFORM, &carol, commit).await;
    net.relay.inject(PLATFORM, &carol, join).await;

    let report = sessions[2].drain().await;
    assert_eq!((report.applied, report.skipped), (1, 1));
    assert_eq!(state_of(&mut sessions[2], &g).await.latest_epoch, 2);
}

#[tokio::test]
async fn test_inbox_fetch_failure_leaves_messages_queued() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("flaky-inbox");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();

    net.relay.fail_next_fetch();
    let report = sessions[1].drain().await;
    assert!(report.fetch_failed);
    assert_eq!(report.applied, 0);
    assert_eq!(net.pending_for("bob").await, 1);

    assert_eq!(sessions[1].drain().await.applied, 1);
}

#[tokio::test]
async fn test_state_fetch_failure_surfaces_from_encrypt() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("unreachable");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();

    net.state.fail_next_fetch();
    let err = assert_err(sessions[0].encrypt(&g, b"x").await);
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_drain_without_credential_leaves_inbox_on_relay() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("not-yet");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();

    let mut bare = AccountSession::new(net.context("bob"));
    assert!(bare.credential().is_none());
    let report = bare.drain().await;
    assert_eq!((report.fetched, report.skipped), (0, 0));
    assert_eq!(net.pending_for("bob").await, 1);

    assert_eq!(sessions[1].drain().await.applied, 1);
    assert_eq!(state_of(&mut sessions[1], &g).await.latest_epoch, 1);
}

//! Credential rotation across groups
//!
//! Default policy: key-packages live 30 days and are replaced once they expire within 7.

use crate::core_sync::traits::{CredentialDirectory, Relay};
use crate::core_sync::AccountId;
use crate::test_utils::*;

#[tokio::test]
async fn test_first_open_registers_credential() {
    let net = TestNetwork::new();
    let mut alice = net.open("alice").await;

    let published = net.directory.fetch_public(PLATFORM, &"alice".into()).await.unwrap();
    assert_eq!(published.as_ref(), alice.credential().map(|c| &c.public));
    assert!(!alice.rotate_credential(false).await.unwrap());
    assert!(net.directory.revoked(PLATFORM, &"alice".into()).await.is_empty());
}

#[tokio::test]
async fn test_reopen_reuses_registered_credential() {
    let net = TestNetwork::new();
    let first = net.open("alice").await.credential().cloned();

    let again = net.open("alice").await;
    assert_eq!(again.credential().cloned(), first);
    assert!(net.directory.revoked(PLATFORM, &"alice".into()).await.is_empty());
}

#[tokio::test]
async fn test_rotation_is_noop_outside_lookahead() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("steady");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();
    let before = sessions[0].credential().cloned();

    // 8 days of validity left
    net.advance(22 * DAY);
    assert!(!sessions[0].rotate_credential(false).await.unwrap());

    assert_eq!(sessions[0].credential().cloned(), before);
    assert_eq!(state_of(&mut sessions[0], &g).await.latest_epoch, 1);
    assert_eq!(net.pending_for("bob").await, 1);
}

#[tokio::test]
async fn test_rotation_updates_every_group() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob", "carol"]).await;
    let g1 = group("with-bob");
    let g2 = group("with-carol");
    sessions[0].reconcile(&g1, &roster(&["alice", "bob"])).await.unwrap();
    sessions[0].reconcile(&g2, &roster(&["alice", "carol"])).await.unwrap();
    sessions[1].drain().await;
    sessions[2].drain().await;
    let old_public = sessions[0].credential().map(|c| c.public.clone()).unwrap();

    // 3 days of validity left
    net.advance(27 * DAY);
    assert!(sessions[0].rotate_credential(false).await.unwrap());

    let fresh = sessions[0].credential().cloned().unwrap();
    assert_ne!(fresh.public, old_public);
    assert_eq!(
        net.directory.fetch_public(PLATFORM, &"alice".into()).await.unwrap(),
        Some(fresh.public.clone())
    );
    assert_eq!(net.directory.revoked(PLATFORM, &"alice".into()).await, vec![old_public]);

    assert_eq!(state_of(&mut sessions[0], &g1).await.latest_epoch, 2);
    assert_eq!(state_of(&mut sessions[0], &g2).await.latest_epoch, 2);
    assert_eq!(net.pending_for("bob").await, 1);
    assert_eq!(net.pending_for("carol").await, 1);

    sessions[1].drain().await;
    sessions[2].drain().await;
    assert_eq!(state_of(&mut sessions[1], &g1).await.latest_epoch, 2);
    assert_eq!(state_of(&mut sessions[2], &g2).await.latest_epoch, 2);

    // the rotated leaf still talks to both groups
    net.tick();
    let ciphertext = expect_ciphertext(sessions[0].encrypt(&g1, b"new keys").await.unwrap());
    assert_eq!(
        expect_plaintext(sessions[1].decrypt(&g1, &ciphertext, net.now_ms()).await.unwrap()),
        b"new keys"
    );
    let ciphertext = expect_ciphertext(sessions[2].encrypt(&g2, b"ack").await.unwrap());
    assert_eq!(
        expect_plaintext(sessions[0].decrypt(&g2, &ciphertext, net.now_ms()).await.unwrap()),
        b"ack"
    );

    assert!(!sessions[0].rotate_credential(false).await.unwrap());
}

#[tokio::test]
async fn test_expired_key_package_defers_member() {
    let net = TestNetwork::new();
    let mut bob = net.open("bob").await;
    net.advance(31 * DAY);

    let mut alice = net.open("alice").await;
    let g = group("deferred");
    let members = roster(&["alice", "bob"]);

    assert!(!alice.reconcile(&g, &members).await.unwrap());
    assert!(alice.group_state(&g).await.unwrap().is_none());

    // bob comes back online and replaces the expired key-package
    assert!(bob.rotate_credential(false).await.unwrap());
    assert!(alice.reconcile(&g, &members).await.unwrap());
    bob.drain().await;
    assert_eq!(state_of(&mut bob, &g).await.members, state_of(&mut alice, &g).await.members);
}

#[tokio::test]
async fn test_key_package_of_another_account_is_not_eligible() {
    let net = TestNetwork::new();
    let mut alice = net.open("alice").await;
    let mallory = net.open("mallory").await;
    let g = group("spoof");

    // mallory's key-package published under bob's name
    let mut record = net.directory.fetch_record(PLATFORM, mallory.account()).await.unwrap().unwrap();
    record.sealed_private.clear();
    net.directory.register(PLATFORM, &AccountId::from("bob"), record, None).await.unwrap();

    assert!(!alice.reconcile(&g, &roster(&["alice", "bob"])).await.unwrap());
    assert!(alice.group_state(&g).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reopen_inside_lookahead_applies_pending_invite_first() {
    let net = TestNetwork::new();
    let mut alice = net.open("alice").await;
    net.open("bob").await;
    let g = group("waiting-invite");

    // 6 days of validity left for bob, inside the 7-day lookahead
    net.advance(24 * DAY);
    assert!(alice.reconcile(&g, &roster(&["alice", "bob"])).await.unwrap());

    let mut bob = net.open("bob").await;
    let joined = state_of(&mut bob, &g).await;
    assert_eq!(joined.origin(), state_of(&mut alice, &g).await.origin());
    // the rotation cascade already covered the joined group
    assert_eq!(joined.latest_epoch, 2);
    assert_eq!(net.directory.revoked(PLATFORM, &"bob".into()).await.len(), 1);

    alice.drain().await;
    let mut sessions = vec![alice, bob];
    assert_eq!(assert_converged(&mut sessions, &g).await.latest_epoch, 2);

    net.tick();
    let ciphertext = expect_ciphertext(sessions[0].encrypt(&g, b"welcome").await.unwrap());
    assert_eq!(
        expect_plaintext(sessions[1].decrypt(&g, &ciphertext, net.now_ms()).await.unwrap()),
        b"welcome"
    );
}

#[tokio::test]
async fn test_invite_sealed_to_replaced_key_package_still_opens() {
    let net = TestNetwork::new();
    let mut sessions = net.open_all(&["alice", "bob"]).await;
    let g = group("late-invite");
    sessions[0].reconcile(&g, &roster(&["alice", "bob"])).await.unwrap();

    // bob rotates before the JOIN reaches him
    let bob_id = AccountId::from("bob");
    let join = net.relay.fetch_pending(PLATFORM, &bob_id).await.unwrap().remove(0);
    assert!(sessions[1].rotate_credential(true).await.unwrap());
    net.relay.inject(PLATFORM, &bob_id, join).await;

    let report = sessions[1].drain().await;
    assert_eq!((report.applied, report.skipped), (1, 0));
    // joined with the old leaf, then updated to the current one
    assert_eq!(report.recommitted, vec![g.clone()]);

    sessions[0].drain().await;
    assert_eq!(assert_converged(&mut sessions, &g).await.latest_epoch, 2);

    net.tick();
    let ciphertext = expect_ciphertext(sessions[1].encrypt(&g, b"rotated").await.unwrap());
    assert_eq!(
        expect_plaintext(sessions[0].decrypt(&g, &ciphertext, net.now_ms()).await.unwrap()),
        b"rotated"
    );
}

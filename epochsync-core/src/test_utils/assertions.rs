//! Custom assertions for multi-session scenarios
//!
//! Provide assertions with readable failure messages for comparing the group state
//! held by several accounts.

use crate::core_sync::{
    AccountSession, DecryptOutcome, EncryptOutcome, GroupId, GroupState,
};
use crate::core_sync::traits::Ciphertext;
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Stored state of `group_id`, panicking if the account has none
pub async fn state_of(session: &mut AccountSession, group_id: &GroupId) -> GroupState {
    match session.group_state(group_id).await {
        Ok(Some(state)) => state,
        Ok(None) => panic!("{} has no state for {}", session.account(), group_id),
        Err(e) => panic!("{} failed to load {}: {}", session.account(), group_id, e),
    }
}

/// Assert that every session holds the same epoch and membership for `group_id`
pub async fn assert_converged(sessions: &mut [AccountSession], group_id: &GroupId) -> GroupState {
    let mut reference: Option<GroupState> = None;
    for session in sessions.iter_mut() {
        let state = state_of(session, group_id).await;
        if let Some(expected) = &reference {
            assert_eq!(
                (state.latest_epoch, &state.members, state.origin()),
                (expected.latest_epoch, &expected.members, expected.origin()),
                "{} diverged on {}",
                session.account(),
                group_id
            );
        } else {
            reference = Some(state);
        }
    }
    reference.unwrap_or_else(|| panic!("No sessions to compare"))
}

pub fn expect_ciphertext(outcome: EncryptOutcome) -> Ciphertext {
    match outcome {
        EncryptOutcome::Encrypted(ciphertext) => ciphertext,
        EncryptOutcome::Unprotected(_) => panic!("Expected ciphertext, group is unprotected"),
    }
}

pub fn expect_plaintext(outcome: DecryptOutcome) -> Vec<u8> {
    match outcome {
        DecryptOutcome::Decrypted(plaintext) => plaintext,
        DecryptOutcome::NotDecrypted(reason) => panic!("Expected plaintext, got {:?}", reason),
    }
}

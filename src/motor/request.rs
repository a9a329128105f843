//! Move requests and the shared group lock.
//!
//! A move request is the ephemeral, group-shared description of "emit N
//! pulses across this motor group". It lives inside [`GroupLock`], a
//! reference-counted mutex whose lifetime is deliberately independent of the
//! request it protects: the leader destroys the request by [`Option::take`]
//! under the lock, and the mutex itself is freed only when the last group
//! member drops its `Arc` clone. This is what makes the whole group's
//! Busy→Idle transition a single observable instant, and what lets the lock
//! be used safely after the request is gone.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;
use crate::gpio::Gpio;
use crate::sync;

use super::driver::MotorInner;
use super::MAX_GROUP_SIZE;

/// Shared lock owning the (optional) in-flight request of a motor group.
pub(super) type GroupLock<G> = Arc<Mutex<Option<MoveRequest<G>>>>;

/// One group member, with its direction sign snapshotted at request
/// creation. Directions cannot change while the request is attached, so the
/// pulse loop never has to take a member's state lock.
pub(super) struct Member<G: Gpio> {
    pub(super) motor: Arc<MotorInner<G>>,
    pub(super) positive: bool,
}

/// Group-shared description of one in-flight move.
pub(super) struct MoveRequest<G: Gpio> {
    /// Fixed member list; the first entry is the leader.
    pub(super) members: heapless::Vec<Member<G>, MAX_GROUP_SIZE>,
    /// Atomic write target spanning every member's step line.
    pub(super) output: G::Group,
    /// Pulses left to emit.
    pub(super) remaining: u32,
    /// Motor to be notified when the request completes.
    pub(super) waiter: Option<Arc<MotorInner<G>>>,
}

/// Build a move request for `motors`, attach it to every member, and wake
/// the leader's worker thread.
///
/// Callers have already validated group size, pulse count, leader idleness
/// and speed consistency. A group containing an already-busy non-leader is a
/// caller error and is not guarded here, matching the request-creation
/// contract.
///
/// On group-output acquisition failure nothing is attached to any motor and
/// `ResourceUnavailable` is propagated.
pub(super) fn attach<G: Gpio>(motors: &[&Arc<MotorInner<G>>], pulses: u32) -> Result<()> {
    let leader = motors[0];

    let mut pins: heapless::Vec<G::Pin, MAX_GROUP_SIZE> = heapless::Vec::new();
    for motor in motors {
        // Length is bounded by the caller's group-size validation.
        let _ = pins.push(motor.step_pin);
    }
    let output = leader.gpio.acquire_group(&pins)?;

    let mut members: heapless::Vec<Member<G>, MAX_GROUP_SIZE> = heapless::Vec::new();
    for motor in motors {
        let state = sync::lock(&motor.state);
        let positive = state.current_direction == motor.positive_direction;
        drop(state);
        let _ = members.push(Member {
            motor: Arc::clone(motor),
            positive,
        });
    }

    let lock: GroupLock<G> = Arc::new(Mutex::new(Some(MoveRequest {
        members,
        output,
        remaining: pulses,
        waiter: None,
    })));

    // A member may still reference the previous request's lock until that
    // request's leader finishes tearing down; overwriting such a stale
    // reference is fine (the request inside was already taken), a live one
    // is not. Leader idleness was checked by the caller.
    for motor in motors {
        let mut state = sync::lock(&motor.state);
        debug_assert!(
            !MotorInner::is_busy_locked(&state),
            "move request attached to a busy motor"
        );
        motor.stop.store(false, std::sync::atomic::Ordering::Relaxed);
        state.group = Some(Arc::clone(&lock));
    }

    debug!(
        leader = leader.name.as_str(),
        members = motors.len(),
        pulses,
        "move request attached"
    );

    // Wake only the leader; the other members' threads stay parked.
    let mut state = sync::lock(&leader.state);
    state.request_ready = true;
    drop(state);
    leader.req_cv.notify_one();

    Ok(())
}

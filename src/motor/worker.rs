//! Per-motor worker thread: the leader pulse loop.
//!
//! Every motor's worker parks on its request condvar while idle. When a move
//! request is posted, the woken worker becomes the timing authority for the
//! whole group: it alone toggles the shared group output, advances every
//! member's step accumulator and polls every member's stop flag, once per
//! pulse. The two half-period sleeps in the loop are the only
//! latency-sensitive blocking points in the crate; `std::thread::sleep` is
//! backed by the monotonic clock.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::gpio::{Gpio, OutputGroup, PinState};
use crate::registry::CancelToken;
use crate::sync;

use super::driver::MotorInner;
use super::request::{GroupLock, MoveRequest};
use super::MAX_GROUP_SIZE;

const HIGH: [PinState; MAX_GROUP_SIZE] = [PinState::High; MAX_GROUP_SIZE];
const LOW: [PinState; MAX_GROUP_SIZE] = [PinState::Low; MAX_GROUP_SIZE];

/// Worker entry routine. Runs until shutdown or cancellation is observed.
pub(super) fn run<G: Gpio>(inner: Arc<MotorInner<G>>, token: CancelToken) {
    loop {
        // Park until a step request is posted.
        let (group, half_period) = {
            let mut state = sync::lock(&inner.state);
            loop {
                if state.shutdown || token.is_cancelled() {
                    debug!(motor = inner.name.as_str(), "worker exiting");
                    return;
                }
                if state.request_ready {
                    break;
                }
                state = sync::wait(&inner.req_cv, state);
            }
            state.request_ready = false;
            match state.group.clone() {
                Some(group) => (group, state.half_period),
                // Stale wake with nothing attached.
                None => continue,
            }
        };

        lead(&inner, &group, half_period);
    }
}

/// Execute the pulse loop and teardown for one move request.
fn lead<G: Gpio>(leader: &MotorInner<G>, group: &GroupLock<G>, half_period: Duration) {
    let mut stop = false;

    loop {
        let count = {
            let mut guard = sync::lock(group);
            let Some(req) = guard.as_mut() else { return };
            let count = req.members.len();
            if req.output.write(&HIGH[..count]).is_err() {
                warn!(leader = leader.name.as_str(), "group write failed; stopping move");
                stop = true;
            }
            count
        };

        thread::sleep(half_period);

        let done = {
            let mut guard = sync::lock(group);
            let Some(req) = guard.as_mut() else { return };
            if req.output.write(&LOW[..count]).is_err() {
                warn!(leader = leader.name.as_str(), "group write failed; stopping move");
                stop = true;
            }

            // Member accumulator updates for this pulse happen strictly
            // before the remaining-pulse decrement and before the next
            // toggle; readers may trail the physical position by at most
            // one pulse.
            for member in &req.members {
                let delta = if member.positive { 1 } else { -1 };
                member.motor.steps.fetch_add(delta, Ordering::Relaxed);
                stop |= member.motor.stop.load(Ordering::Relaxed);
            }

            req.remaining -= 1;
            req.remaining == 0 || stop
        };

        thread::sleep(half_period);

        if done {
            break;
        }
    }

    // Teardown. Taking the request out under the group lock is the single
    // instant at which every member transitions Busy -> Idle; the group
    // output is released here, while member group references are cleared
    // afterwards without the group lock held (state locks are never taken
    // inside it). Members are free the moment the request is taken, so a
    // member may already carry a newer request by the time this loop reaches
    // it; only a reference to this group may be cleared.
    let (members, waiter) = {
        let mut guard = sync::lock(group);
        match guard.take() {
            Some(MoveRequest {
                members,
                waiter,
                output,
                ..
            }) => {
                drop(output);
                (members, waiter)
            }
            None => return,
        }
    };

    for member in &members {
        let mut state = sync::lock(&member.motor.state);
        if state
            .group
            .as_ref()
            .is_some_and(|attached| Arc::ptr_eq(attached, group))
        {
            state.group = None;
        }
        drop(state);
        member.motor.wait_cv.notify_all();
    }

    debug!(
        leader = leader.name.as_str(),
        stopped = stop,
        "move request completed"
    );

    if let Some(waiter) = waiter {
        waiter.stop.store(false, Ordering::Relaxed);
        waiter.wait_cv.notify_all();
    }
}

//! The motor handle and its public API.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gpio::Gpio;
use crate::registry::{TaskId, TaskRegistry};
use crate::sync;

use super::request;
use super::timing::{self, MAX_PULSE_RATE};
use super::types::{Direction, Microsteps, RelativeDirection};
use super::worker;
use super::{MAX_GROUP_SIZE, MOTOR_NAME_LEN};

/// Stack budget for a motor's worker thread.
const WORKER_STACK: usize = 64 * 1024;

/// Lock-protected mutable state of a motor.
pub(super) struct MotorState<G: Gpio> {
    /// Exclusively owned, driven DIR output.
    pub(super) dir_output: G::Output,
    /// Direction currently driven onto the DIR line.
    pub(super) current_direction: Direction,
    /// Half-period derived from the last requested pulse rate; zero until
    /// a speed has been set.
    pub(super) half_period: Duration,
    /// Shared lock of the attached move request, if any. A motor is busy
    /// exactly while this is `Some` and the request inside has not been
    /// taken yet.
    pub(super) group: Option<request::GroupLock<G>>,
    /// A request has been posted and this motor's worker is its leader.
    pub(super) request_ready: bool,
    /// The owning handle is being destroyed.
    pub(super) shutdown: bool,
}

/// State shared between a [`Motor`] handle and its worker thread.
pub(super) struct MotorInner<G: Gpio> {
    pub(super) name: heapless::String<MOTOR_NAME_LEN>,
    pub(super) gpio: G,
    /// Step line, reserved for this motor but only claimed (in bulk) while
    /// a move request is in flight.
    pub(super) step_pin: G::Pin,
    /// Direction whose steps are counted positively.
    pub(super) positive_direction: Direction,
    microsteps_per_rotation: u32,
    pub(super) state: Mutex<MotorState<G>>,
    /// Signals the worker that a request is ready.
    pub(super) req_cv: Condvar,
    /// Signals wait/stop callers that the motor went idle.
    pub(super) wait_cv: Condvar,
    /// Signed step accumulator. Relaxed on purpose: a read may trail the
    /// physical position by one pulse, which callers accept.
    pub(super) steps: AtomicI64,
    /// Cooperative stop flag, polled by the leader once per pulse.
    pub(super) stop: AtomicBool,
}

impl<G: Gpio> MotorInner<G> {
    /// Busy test against an already-held state guard.
    ///
    /// Busy must be observed precisely: the group reference alone is not
    /// enough, the request inside the shared lock must still be present.
    pub(super) fn is_busy_locked(state: &MotorState<G>) -> bool {
        match &state.group {
            Some(group) => sync::lock(group).is_some(),
            None => false,
        }
    }

    pub(super) fn is_busy(&self) -> bool {
        Self::is_busy_locked(&sync::lock(&self.state))
    }

    /// Block until this motor is idle, registering as the request's waiter.
    fn wait(self: &Arc<Self>) {
        let group = sync::lock(&self.state).group.clone();
        let Some(group) = group else { return };

        {
            let mut guard = sync::lock(&group);
            match guard.as_mut() {
                Some(req) => req.waiter = Some(Arc::clone(self)),
                // Torn down between the two locks; already idle.
                None => return,
            }
        }

        let mut state = sync::lock(&self.state);
        while Self::is_busy_locked(&state) {
            state = sync::wait(&self.wait_cv, state);
        }
    }

    /// Request a cooperative stop and block until the request has unwound.
    fn stop_and_wait(self: &Arc<Self>) {
        if !self.is_busy() {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        self.wait();
        // The leader clears the flag for its registered waiter; this covers
        // the race where teardown finished before we registered.
        self.stop.store(false, Ordering::Relaxed);
    }
}

/// A stepper motor with its own worker thread.
///
/// Created through [`Motor::create`]; dropping (or [`destroy`](Motor::destroy)ing)
/// the handle stops any in-flight move, retires the worker via the task
/// registry and releases both output lines.
pub struct Motor<G: Gpio> {
    inner: Arc<MotorInner<G>>,
    registry: TaskRegistry,
    task: TaskId,
}

impl<G: Gpio> Motor<G> {
    /// Initialize a motor and start its worker thread.
    ///
    /// The DIR line is claimed eagerly and driven at `initial_direction`,
    /// which is also recorded as the motor's *positive* direction for
    /// position accounting. The STEP line is only reserved here; it is
    /// claimed in bulk per move request so it stays available for group
    /// acquisition.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed name or zero steps-per-rotation;
    /// `ResourceUnavailable` if the DIR line cannot be claimed or the worker
    /// cannot be started. Partial acquisitions are rolled back.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        registry: &TaskRegistry,
        gpio: G,
        name: &str,
        step_pin: G::Pin,
        dir_pin: G::Pin,
        microsteps: Microsteps,
        steps_per_rotation: u32,
        initial_direction: Direction,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("motor name is empty"));
        }
        let name: heapless::String<MOTOR_NAME_LEN> = name
            .try_into()
            .map_err(|_| Error::InvalidArgument("motor name too long"))?;
        if steps_per_rotation == 0 {
            return Err(Error::InvalidArgument("steps per rotation is zero"));
        }

        let dir_output = gpio.acquire_output(dir_pin, initial_direction.pin_state())?;

        let inner = Arc::new(MotorInner {
            name: name.clone(),
            gpio,
            step_pin,
            positive_direction: initial_direction,
            microsteps_per_rotation: u32::from(microsteps.get()) * steps_per_rotation,
            state: Mutex::new(MotorState {
                dir_output,
                current_direction: initial_direction,
                half_period: Duration::ZERO,
                group: None,
                request_ready: false,
                shutdown: false,
            }),
            req_cv: Condvar::new(),
            wait_cv: Condvar::new(),
            steps: AtomicI64::new(0),
            stop: AtomicBool::new(false),
        });

        // If the spawn fails, dropping `inner` releases the DIR line.
        let worker_inner = Arc::clone(&inner);
        let task = registry.spawn(name.as_str(), WORKER_STACK, move |token| {
            worker::run(worker_inner, token)
        })?;

        info!(motor = name.as_str(), "motor created");
        Ok(Self {
            inner,
            registry: registry.clone(),
            task,
        })
    }

    /// Tear the motor down, cancelling any in-flight move first.
    ///
    /// Equivalent to dropping the handle; provided for call sites that want
    /// the teardown to be explicit.
    pub fn destroy(self) {}

    /// The motor's name.
    #[inline]
    pub fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    /// Microsteps per full rotation (microstep resolution × full steps).
    #[inline]
    pub fn microsteps_per_rotation(&self) -> u32 {
        self.inner.microsteps_per_rotation
    }

    /// Set the absolute turning direction.
    ///
    /// # Errors
    ///
    /// `Busy` while a move request is in flight; the direction of a group
    /// member is fixed for the lifetime of its request.
    pub fn set_direction(&self, direction: Direction) -> Result<()> {
        Self::set_direction_group(&[self], direction)
    }

    /// Set the turning direction relative to the configured positive one.
    pub fn set_direction_relative(&self, direction: RelativeDirection) -> Result<()> {
        self.set_direction(direction.resolve(self.inner.positive_direction))
    }

    /// Set one absolute direction across a whole set of motors.
    ///
    /// Validation is all-or-nothing: if any member is busy, or the set is
    /// malformed, no DIR line is touched.
    pub fn set_direction_group(motors: &[&Self], direction: Direction) -> Result<()> {
        Self::drive_directions(motors, |_| direction)
    }

    /// Set one relative direction across a whole set of motors, resolved
    /// against each member's own positive direction.
    pub fn set_direction_relative_group(
        motors: &[&Self],
        direction: RelativeDirection,
    ) -> Result<()> {
        Self::drive_directions(motors, |m| direction.resolve(m.inner.positive_direction))
    }

    fn drive_directions(
        motors: &[&Self],
        direction_for: impl Fn(&Self) -> Direction,
    ) -> Result<()> {
        validate_group_size(motors)?;
        let mut locked = lock_states(motors)?;
        if locked
            .iter()
            .any(|(_, state)| MotorInner::is_busy_locked(state))
        {
            return Err(Error::Busy);
        }
        for (motor, state) in &mut locked {
            let direction = direction_for(*motor);
            state
                .dir_output
                .set_state(direction.pin_state())
                .map_err(|_| Error::ResourceUnavailable("direction line write failed"))?;
            state.current_direction = direction;
        }
        Ok(())
    }

    /// Current absolute turning direction.
    pub fn direction(&self) -> Direction {
        sync::lock(&self.inner.state).current_direction
    }

    /// Current direction relative to the configured positive one.
    pub fn direction_relative(&self) -> RelativeDirection {
        if self.direction() == self.inner.positive_direction {
            RelativeDirection::Positive
        } else {
            RelativeDirection::Negative
        }
    }

    /// Set the pulse rate, in microsteps per second.
    ///
    /// Rates above [`MAX_PULSE_RATE`] are clamped, not rejected.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero rate, `Busy` while a request is in
    /// flight.
    pub fn set_speed(&self, pps: u32) -> Result<()> {
        Self::set_speed_group(&[self], pps)
    }

    /// Set one pulse rate across a whole set of motors.
    ///
    /// Atomic across the set: every member is validated under lock before
    /// any half-period is written, so a busy member leaves all speeds
    /// untouched.
    pub fn set_speed_group(motors: &[&Self], pps: u32) -> Result<()> {
        validate_group_size(motors)?;
        if pps == 0 {
            return Err(Error::InvalidArgument("pulse rate is zero"));
        }
        let clamped = pps.min(MAX_PULSE_RATE);
        if clamped != pps {
            warn!(requested = pps, clamped, "pulse rate clamped to maximum");
        }
        let half_period = timing::half_period(clamped);

        let mut locked = lock_states(motors)?;
        if locked
            .iter()
            .any(|(_, state)| MotorInner::is_busy_locked(state))
        {
            return Err(Error::Busy);
        }
        for (_, state) in &mut locked {
            state.half_period = half_period;
        }
        Ok(())
    }

    /// Emit `pulses` microsteps in the currently configured direction.
    pub fn step(&self, pulses: u32) -> Result<()> {
        Self::step_group(&[self], pulses)
    }

    /// Emit `pulses` microsteps across a group of motors in lockstep.
    ///
    /// The first motor of the slice is the group's leader: its worker thread
    /// runs the pulse loop for everyone, and its idleness is the
    /// precondition checked here. All members must share one GPIO provider
    /// and must have been configured at the same, non-zero speed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero pulse count, an out-of-bounds or
    /// duplicate-bearing group, or inconsistent member speeds; `Busy` if the
    /// leader still has a request attached; `ResourceUnavailable` if the
    /// group's step lines cannot be claimed (nothing is attached to any
    /// member in that case).
    pub fn step_group(motors: &[&Self], pulses: u32) -> Result<()> {
        validate_group_size(motors)?;
        if pulses == 0 {
            return Err(Error::InvalidArgument("pulse count is zero"));
        }
        check_distinct(motors)?;

        if motors[0].inner.is_busy() {
            return Err(Error::Busy);
        }

        // Only the leader's half-period paces the pulse loop, so a group
        // configured at mixed speeds is rejected rather than silently run
        // at the leader's rate.
        let mut group_half_period: Option<Duration> = None;
        for motor in motors {
            let half_period = sync::lock(&motor.inner.state).half_period;
            if half_period.is_zero() {
                return Err(Error::InvalidArgument("motor speed not set"));
            }
            match group_half_period {
                None => group_half_period = Some(half_period),
                Some(expected) if expected != half_period => {
                    return Err(Error::InvalidArgument(
                        "group members configured at different speeds",
                    ));
                }
                Some(_) => {}
            }
        }

        let mut inners: heapless::Vec<&Arc<MotorInner<G>>, MAX_GROUP_SIZE> = heapless::Vec::new();
        for motor in motors {
            let _ = inners.push(&motor.inner);
        }
        request::attach(&inners, pulses)
    }

    /// Signed step accumulator.
    ///
    /// Read without synchronization; the value may be one pulse behind the
    /// true physical position. This is a deliberate relaxed-consistency
    /// choice, not a bug.
    #[inline]
    pub fn steps(&self) -> i64 {
        self.inner.steps.load(Ordering::Relaxed)
    }

    /// Whether the motor is ready for new commands.
    pub fn is_ready(&self) -> bool {
        !self.inner.is_busy()
    }

    /// Stop the motor and block until it has unwound.
    ///
    /// Cooperative and bounded: at most one outstanding pulse completes
    /// before the leader observes the flag. No-op when idle.
    pub fn stop(&self) {
        self.inner.stop_and_wait();
    }

    /// Block until the motor is idle, without requesting a stop.
    ///
    /// Returns immediately if the motor is already idle.
    pub fn wait(&self) {
        self.inner.wait();
    }
}

impl<G: Gpio> Drop for Motor<G> {
    fn drop(&mut self) {
        // Cancel any in-flight move first, then retire the worker. The
        // output lines are released once the worker drops its reference.
        self.inner.stop_and_wait();
        {
            let mut state = sync::lock(&self.inner.state);
            state.shutdown = true;
        }
        self.inner.req_cv.notify_all();
        self.registry.kill(self.task);
        info!(motor = self.inner.name.as_str(), "motor destroyed");
    }
}

fn validate_group_size<G: Gpio>(motors: &[&Motor<G>]) -> Result<()> {
    if motors.is_empty() {
        return Err(Error::InvalidArgument("motor group is empty"));
    }
    if motors.len() > MAX_GROUP_SIZE {
        return Err(Error::InvalidArgument("motor group too large"));
    }
    Ok(())
}

/// Reject groups naming the same motor twice; a motor can be referenced by
/// at most one request, and double-locking one state mutex would deadlock.
fn check_distinct<G: Gpio>(motors: &[&Motor<G>]) -> Result<()> {
    let mut pointers: heapless::Vec<usize, MAX_GROUP_SIZE> = heapless::Vec::new();
    for motor in motors {
        let _ = pointers.push(Arc::as_ptr(&motor.inner) as usize);
    }
    pointers.sort_unstable();
    if pointers.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::InvalidArgument("duplicate motor in group"));
    }
    Ok(())
}

/// Lock every member's state, in a globally consistent (address) order so
/// concurrent group operations cannot deadlock. Guards are returned paired
/// with their motors.
fn lock_states<'a, G: Gpio>(
    motors: &[&'a Motor<G>],
) -> Result<Vec<(&'a Motor<G>, MutexGuard<'a, MotorState<G>>)>> {
    check_distinct(motors)?;
    let mut ordered: Vec<&'a Motor<G>> = motors.to_vec();
    ordered.sort_unstable_by_key(|m| Arc::as_ptr(&m.inner) as usize);
    Ok(ordered
        .into_iter()
        .map(|m| (m, sync::lock(&m.inner.state)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::mock::MockGpio;

    fn motor(registry: &TaskRegistry, gpio: &MockGpio, name: &str, base: u32) -> Motor<MockGpio> {
        Motor::create(
            registry,
            gpio.clone(),
            name,
            base,
            base + 1,
            Microsteps::HALF,
            200,
            Direction::Clockwise,
        )
        .unwrap()
    }

    #[test]
    fn test_create_validates_arguments() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        assert_eq!(
            Motor::create(
                &registry,
                gpio.clone(),
                "",
                0,
                1,
                Microsteps::FULL,
                200,
                Direction::Clockwise,
            )
            .err(),
            Some(Error::InvalidArgument("motor name is empty"))
        );
        assert_eq!(
            Motor::create(
                &registry,
                gpio.clone(),
                "m",
                0,
                1,
                Microsteps::FULL,
                0,
                Direction::Clockwise,
            )
            .err(),
            Some(Error::InvalidArgument("steps per rotation is zero"))
        );
        // No worker was started and no line is left claimed.
        assert!(registry.is_empty());
        assert!(!gpio.is_claimed(1));
    }

    #[test]
    fn test_create_claims_dir_line_only() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let m = motor(&registry, &gpio, "m0", 10);
        // DIR is claimed and driven at the initial (clockwise = high)
        // direction; STEP stays reserved for later bulk acquisition.
        assert!(gpio.is_claimed(11));
        assert!(gpio.level(11));
        assert!(!gpio.is_claimed(10));
        assert_eq!(m.microsteps_per_rotation(), 400);
        // Worker registered under the motor's name.
        assert!(registry.find_by_name("m0").is_some());
        drop(m);
    }

    #[test]
    fn test_create_rejects_claimed_dir_line() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let _holder = gpio
            .acquire_output(21, embedded_hal::digital::PinState::Low)
            .unwrap();
        let result = Motor::create(
            &registry,
            gpio.clone(),
            "blocked",
            20,
            21,
            Microsteps::FULL,
            200,
            Direction::Clockwise,
        );
        assert!(matches!(result, Err(Error::ResourceUnavailable(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_direction_accessors() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let m = motor(&registry, &gpio, "m0", 30);
        assert_eq!(m.direction(), Direction::Clockwise);
        assert_eq!(m.direction_relative(), RelativeDirection::Positive);

        m.set_direction_relative(RelativeDirection::Negative).unwrap();
        assert_eq!(m.direction(), Direction::CounterClockwise);
        assert_eq!(m.direction_relative(), RelativeDirection::Negative);
        assert!(!gpio.level(31));

        m.set_direction(Direction::Clockwise).unwrap();
        assert!(gpio.level(31));
    }

    #[test]
    fn test_set_speed_validation_and_clamp() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let m = motor(&registry, &gpio, "m0", 40);
        assert_eq!(
            m.set_speed(0),
            Err(Error::InvalidArgument("pulse rate is zero"))
        );
        // Above-limit rates are clamped, not rejected.
        assert!(m.set_speed(MAX_PULSE_RATE * 10).is_ok());
    }

    #[test]
    fn test_group_validation() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let m0 = motor(&registry, &gpio, "m0", 50);
        let m1 = motor(&registry, &gpio, "m1", 52);

        assert_eq!(
            Motor::<MockGpio>::step_group(&[], 10),
            Err(Error::InvalidArgument("motor group is empty"))
        );
        assert_eq!(
            Motor::step_group(&[&m0], 0),
            Err(Error::InvalidArgument("pulse count is zero"))
        );
        assert_eq!(
            Motor::step_group(&[&m0, &m0], 10),
            Err(Error::InvalidArgument("duplicate motor in group"))
        );
        // Speeds unset: rejected before anything is attached.
        assert_eq!(
            Motor::step_group(&[&m0, &m1], 10),
            Err(Error::InvalidArgument("motor speed not set"))
        );
        m0.set_speed(1000).unwrap();
        m1.set_speed(2000).unwrap();
        assert_eq!(
            Motor::step_group(&[&m0, &m1], 10),
            Err(Error::InvalidArgument(
                "group members configured at different speeds"
            ))
        );
        assert!(m0.is_ready() && m1.is_ready());
    }

    #[test]
    fn test_step_group_rolls_back_on_acquisition_failure() {
        let registry = TaskRegistry::new();
        let gpio = MockGpio::new();
        let m0 = motor(&registry, &gpio, "m0", 60);
        let m1 = motor(&registry, &gpio, "m1", 62);
        Motor::set_speed_group(&[&m0, &m1], 1000).unwrap();

        // Claim m1's step line out from under the group.
        let _thief = gpio
            .acquire_output(62, embedded_hal::digital::PinState::Low)
            .unwrap();
        assert!(matches!(
            Motor::step_group(&[&m0, &m1], 100),
            Err(Error::ResourceUnavailable(_))
        ));
        // No partial group state was left attached to any motor.
        assert!(m0.is_ready());
        assert!(m1.is_ready());
        assert!(!gpio.is_claimed(60));
    }
}

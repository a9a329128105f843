//! In-memory GPIO provider for tests and host-side simulation.
//!
//! [`MockGpio`] enforces the same exclusivity rules a character-device
//! driver would: a line claimed by an output or a group cannot be claimed
//! again until its handle is dropped. Every line records its current level
//! and the number of rising edges seen, so tests can compare the pulses that
//! physically reached a step line against a motor's step accumulator.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{ErrorType, OutputPin, PinState};

use crate::error::{Error, Result};
use crate::sync;

use super::{Gpio, OutputGroup};

#[derive(Default)]
struct Line {
    claimed: bool,
    level: bool,
    rising_edges: u64,
}

#[derive(Default)]
struct State {
    lines: HashMap<u32, Line>,
}

impl State {
    fn claim(&mut self, pin: u32) -> Result<()> {
        let line = self.lines.entry(pin).or_default();
        if line.claimed {
            return Err(Error::ResourceUnavailable("line already claimed"));
        }
        line.claimed = true;
        Ok(())
    }

    fn release(&mut self, pin: u32) {
        if let Some(line) = self.lines.get_mut(&pin) {
            line.claimed = false;
        }
    }

    fn write(&mut self, pin: u32, level: PinState) {
        let line = self.lines.entry(pin).or_default();
        let high = matches!(level, PinState::High);
        if high && !line.level {
            line.rising_edges += 1;
        }
        line.level = high;
    }
}

/// In-memory [`Gpio`] provider.
///
/// Cheap to clone; clones share the same line table.
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<State>>,
}

impl MockGpio {
    /// Create a provider with an empty line table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of a line (false = low).
    pub fn level(&self, pin: u32) -> bool {
        sync::lock(&self.state)
            .lines
            .get(&pin)
            .map(|l| l.level)
            .unwrap_or(false)
    }

    /// Number of low-to-high transitions seen on a line.
    pub fn rising_edges(&self, pin: u32) -> u64 {
        sync::lock(&self.state)
            .lines
            .get(&pin)
            .map(|l| l.rising_edges)
            .unwrap_or(0)
    }

    /// Whether a line is currently claimed by an output or a group.
    pub fn is_claimed(&self, pin: u32) -> bool {
        sync::lock(&self.state)
            .lines
            .get(&pin)
            .map(|l| l.claimed)
            .unwrap_or(false)
    }
}

/// Single output handle from a [`MockGpio`].
pub struct MockOutput {
    state: Arc<Mutex<State>>,
    pin: u32,
}

impl ErrorType for MockOutput {
    type Error = Infallible;
}

impl OutputPin for MockOutput {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        sync::lock(&self.state).write(self.pin, PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        sync::lock(&self.state).write(self.pin, PinState::High);
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        sync::lock(&self.state).release(self.pin);
    }
}

/// Group output handle from a [`MockGpio`].
pub struct MockGroup {
    state: Arc<Mutex<State>>,
    pins: Vec<u32>,
}

impl OutputGroup for MockGroup {
    type Error = Infallible;

    fn write(&mut self, levels: &[PinState]) -> core::result::Result<(), Infallible> {
        debug_assert_eq!(levels.len(), self.pins.len());
        let mut state = sync::lock(&self.state);
        for (&pin, &level) in self.pins.iter().zip(levels) {
            state.write(pin, level);
        }
        Ok(())
    }
}

impl Drop for MockGroup {
    fn drop(&mut self) {
        let mut state = sync::lock(&self.state);
        for &pin in &self.pins {
            state.release(pin);
        }
    }
}

impl Gpio for MockGpio {
    type Pin = u32;
    type Output = MockOutput;
    type Group = MockGroup;

    fn acquire_output(&self, pin: u32, initial: PinState) -> Result<MockOutput> {
        let mut state = sync::lock(&self.state);
        state.claim(pin)?;
        state.write(pin, initial);
        Ok(MockOutput {
            state: Arc::clone(&self.state),
            pin,
        })
    }

    fn acquire_group(&self, pins: &[u32]) -> Result<MockGroup> {
        let mut state = sync::lock(&self.state);
        for (i, &pin) in pins.iter().enumerate() {
            if let Err(e) = state.claim(pin) {
                // Roll back the lines claimed so far.
                for &claimed in &pins[..i] {
                    state.release(claimed);
                }
                return Err(e);
            }
        }
        for &pin in pins {
            state.write(pin, PinState::Low);
        }
        Ok(MockGroup {
            state: Arc::clone(&self.state),
            pins: pins.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_ownership() {
        let gpio = MockGpio::new();
        let out = gpio.acquire_output(7, PinState::Low).unwrap();
        assert!(gpio.is_claimed(7));
        assert_eq!(
            gpio.acquire_output(7, PinState::Low).err(),
            Some(Error::ResourceUnavailable("line already claimed"))
        );
        drop(out);
        assert!(!gpio.is_claimed(7));
        assert!(gpio.acquire_output(7, PinState::Low).is_ok());
    }

    #[test]
    fn test_group_claim_rolls_back() {
        let gpio = MockGpio::new();
        let _held = gpio.acquire_output(11, PinState::Low).unwrap();
        assert!(gpio.acquire_group(&[10, 11, 12]).is_err());
        // Line 10 must not be left claimed by the failed bulk request.
        assert!(!gpio.is_claimed(10));
        assert!(!gpio.is_claimed(12));
    }

    #[test]
    fn test_rising_edges_counted() {
        let gpio = MockGpio::new();
        let mut group = gpio.acquire_group(&[1, 2]).unwrap();
        for _ in 0..3 {
            group.write(&[PinState::High, PinState::High]).unwrap();
            group.write(&[PinState::Low, PinState::Low]).unwrap();
        }
        // Holding high twice in a row is a single edge.
        group.write(&[PinState::High, PinState::Low]).unwrap();
        group.write(&[PinState::High, PinState::Low]).unwrap();
        assert_eq!(gpio.rising_edges(1), 4);
        assert_eq!(gpio.rising_edges(2), 3);
        assert!(gpio.level(1));
        assert!(!gpio.level(2));
    }

    #[test]
    fn test_initial_level_applied() {
        let gpio = MockGpio::new();
        let _out = gpio.acquire_output(5, PinState::High).unwrap();
        assert!(gpio.level(5));
        assert_eq!(gpio.rising_edges(5), 1);
    }
}

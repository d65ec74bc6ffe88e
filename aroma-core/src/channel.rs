//! A single timed fan channel
//!
//! Each channel owns its run state behind a mutex. Every transition (turn on,
//! turn off, auto-off) happens inside that critical section, and every turn-on
//! bumps a generation counter. A timer that wakes up after a newer transition
//! finds a different generation and does nothing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::gpio::{Gpio, GpioError, Level};

#[derive(Debug, Error)]
pub enum FanError {
    #[error("Invalid fan_id: {0}")]
    UnknownFan(u32),

    #[error("Duration must be positive, got: {0}")]
    InvalidDuration(f64),

    #[error("Hardware fault on fan {fan_id} (GPIO {pin}): {source}")]
    HardwareFault {
        fan_id: u32,
        pin: u8,
        #[source]
        source: GpioError,
    },
}

/// Point-in-time status of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub id: u32,
    pub is_on: bool,
    /// Seconds until auto-off, never negative
    pub remaining_seconds: f64,
    /// Length of the current run, 0 when off
    pub total_seconds: f64,
}

struct ActiveRun {
    turned_on_at: Instant,
    duration: Duration,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct ChannelState {
    run: Option<ActiveRun>,
    generation: u64,
}

impl ChannelState {
    fn status(&self, id: u32) -> ChannelStatus {
        match &self.run {
            Some(run) => {
                let remaining = run.duration.saturating_sub(run.turned_on_at.elapsed());
                ChannelStatus {
                    id,
                    is_on: true,
                    remaining_seconds: remaining.as_secs_f64(),
                    total_seconds: run.duration.as_secs_f64(),
                }
            }
            None => ChannelStatus {
                id,
                is_on: false,
                remaining_seconds: 0.0,
                total_seconds: 0.0,
            },
        }
    }

    /// Drop the current run and invalidate any timer still in flight
    fn cancel(&mut self) -> bool {
        self.generation += 1;
        match self.run.take() {
            Some(run) => {
                run.timer.abort();
                true
            }
            None => false,
        }
    }
}

/// One fan and the GPIO pin that powers it
pub struct FanChannel {
    id: u32,
    pin: u8,
    gpio: Arc<dyn Gpio>,
    state: Arc<Mutex<ChannelState>>,
}

impl FanChannel {
    pub fn new(id: u32, pin: u8, gpio: Arc<dyn Gpio>) -> Self {
        Self {
            id,
            pin,
            gpio,
            state: Arc::new(Mutex::new(ChannelState::default())),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Run the fan for `duration_seconds`, replacing any run in progress
    pub async fn turn_on(&self, duration_seconds: f64) -> Result<ChannelStatus, FanError> {
        let duration = validate_duration(duration_seconds)?;

        let mut state = self.state.lock().await;

        // Must be checked before any state change or pin write
        let turned_on_at = Instant::now();
        let deadline = turned_on_at
            .checked_add(duration)
            .ok_or(FanError::InvalidDuration(duration_seconds))?;

        let replaced = state.cancel();

        if let Err(source) = self.gpio.set_pin(self.pin, Level::High) {
            tracing::error!("Failed to turn on fan {} (GPIO {}): {}", self.id, self.pin, source);
            // Never leave the pin floating high while reporting "off"
            if let Err(e) = self.gpio.set_pin(self.pin, Level::Low) {
                tracing::warn!("Failed to force fan {} low after fault: {}", self.id, e);
            }
            return Err(self.fault(source));
        }

        let timer = tokio::spawn(auto_off(
            Arc::clone(&self.state),
            Arc::clone(&self.gpio),
            self.id,
            self.pin,
            state.generation,
            deadline,
        ));
        state.run = Some(ActiveRun {
            turned_on_at,
            duration,
            timer,
        });

        if replaced {
            tracing::info!("Restarted fan {} (GPIO {}) for {:?}", self.id, self.pin, duration);
        } else {
            tracing::info!("Turned on fan {} (GPIO {}) for {:?}", self.id, self.pin, duration);
        }

        Ok(state.status(self.id))
    }

    /// Stop the fan now. No-op when already off.
    pub async fn turn_off(&self) -> Result<ChannelStatus, FanError> {
        let mut state = self.state.lock().await;
        if !state.cancel() {
            return Ok(state.status(self.id));
        }

        self.gpio
            .set_pin(self.pin, Level::Low)
            .map_err(|source| self.fault(source))?;
        tracing::info!("Turned off fan {} (GPIO {})", self.id, self.pin);

        Ok(state.status(self.id))
    }

    pub async fn status(&self) -> ChannelStatus {
        self.state.lock().await.status(self.id)
    }

    /// Cancel any timer and drive the pin low, whatever the current state
    pub async fn shutdown(&self) -> Result<(), FanError> {
        let mut state = self.state.lock().await;
        state.cancel();
        self.gpio
            .set_pin(self.pin, Level::Low)
            .map_err(|source| self.fault(source))
    }

    fn fault(&self, source: GpioError) -> FanError {
        FanError::HardwareFault {
            fan_id: self.id,
            pin: self.pin,
            source,
        }
    }
}

fn validate_duration(seconds: f64) -> Result<Duration, FanError> {
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(FanError::InvalidDuration(seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| FanError::InvalidDuration(seconds))
}

async fn auto_off(
    state: Arc<Mutex<ChannelState>>,
    gpio: Arc<dyn Gpio>,
    id: u32,
    pin: u8,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let mut state = state.lock().await;
    if state.generation != generation || state.run.is_none() {
        return;
    }
    // Dropping our own JoinHandle detaches, it does not abort this task
    state.run = None;

    match gpio.set_pin(pin, Level::Low) {
        Ok(()) => tracing::info!("Turned off fan {} (GPIO {}) after timer", id, pin),
        Err(e) => tracing::error!("Auto-off write failed for fan {} (GPIO {}): {}", id, pin, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockGpio;
    use tokio::time::sleep;

    fn channel(pin: u8) -> (FanChannel, Arc<MockGpio>) {
        let gpio = Arc::new(MockGpio::new());
        gpio.configure_output(pin).unwrap();
        (FanChannel::new(0, pin, gpio.clone()), gpio)
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_reports_remaining() {
        let (fan, gpio) = channel(19);

        let status = fan.turn_on(5.0).await.unwrap();
        assert!(status.is_on);
        assert!(status.remaining_seconds <= 5.0 && status.remaining_seconds > 4.9);
        assert_eq!(status.total_seconds, 5.0);
        assert_eq!(gpio.level(19), Some(Level::High));

        sleep(Duration::from_secs(2)).await;
        let status = fan.status().await;
        assert!((status.remaining_seconds - 3.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_off_fires() {
        let (fan, gpio) = channel(19);
        fan.turn_on(2.0).await.unwrap();

        sleep(Duration::from_millis(2100)).await;

        let status = fan.status().await;
        assert!(!status.is_on);
        assert_eq!(status.remaining_seconds, 0.0);
        assert_eq!(gpio.level(19), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_off_when_off_is_noop() {
        let (fan, gpio) = channel(13);

        let before = fan.status().await;
        let after = tokio_test::assert_ok!(fan.turn_off().await);
        assert_eq!(before, after);

        // No pin write happened, so even a failing backend is fine
        gpio.set_fail_writes(true);
        tokio_test::assert_ok!(fan.turn_off().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_off_cancels_run() {
        let (fan, gpio) = channel(13);
        fan.turn_on(10.0).await.unwrap();

        let status = fan.turn_off().await.unwrap();
        assert!(!status.is_on);
        assert_eq!(gpio.level(13), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_turn_on_replaces_timer() {
        let (fan, _gpio) = channel(12);
        fan.turn_on(5.0).await.unwrap();

        sleep(Duration::from_secs(3)).await;
        fan.turn_on(5.0).await.unwrap();

        // 6s after the first call: the first timer would have fired by now
        sleep(Duration::from_secs(3)).await;
        assert!(fan.status().await.is_on);

        // 5.5s after the second call
        sleep(Duration::from_millis(2500)).await;
        assert!(!fan.status().await.is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_after_turn_off_is_ignored() {
        let (fan, gpio) = channel(18);
        fan.turn_on(2.0).await.unwrap();

        sleep(Duration::from_secs(1)).await;
        fan.turn_off().await.unwrap();
        fan.turn_on(5.0).await.unwrap();

        // Past the first deadline
        sleep(Duration::from_millis(1500)).await;
        assert!(fan.status().await.is_on);
        assert_eq!(gpio.level(18), Some(Level::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_duration_leaves_state() {
        let (fan, _gpio) = channel(19);
        fan.turn_on(4.0).await.unwrap();

        for bad in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let err = fan.turn_on(bad).await.unwrap_err();
            assert!(matches!(err, FanError::InvalidDuration(_)));
        }

        let status = fan.status().await;
        assert!(status.is_on);
        assert_eq!(status.total_seconds, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_past_clock_range_rejected() {
        let (fan, gpio) = channel(19);

        let err = fan.turn_on(1e19).await.unwrap_err();
        assert!(matches!(err, FanError::InvalidDuration(_)));
        assert!(!fan.status().await.is_on);
        assert_eq!(gpio.level(19), Some(Level::Low));

        // A run in progress is left alone
        fan.turn_on(10.0).await.unwrap();
        assert!(fan.turn_on(1e19).await.is_err());
        let status = fan.status().await;
        assert!(status.is_on);
        assert_eq!(status.total_seconds, 10.0);
        assert_eq!(gpio.level(19), Some(Level::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_turn_on_keeps_one_timer() {
        let (fan, gpio) = channel(13);
        let fan = Arc::new(fan);

        let short = tokio::spawn({
            let fan = Arc::clone(&fan);
            async move { fan.turn_on(2.0).await }
        });
        let long = tokio::spawn({
            let fan = Arc::clone(&fan);
            async move { fan.turn_on(5.0).await }
        });
        short.await.unwrap().unwrap();
        long.await.unwrap().unwrap();

        // Whichever call took the lock last owns the run
        let winner = fan.status().await.total_seconds;
        assert!(winner == 2.0 || winner == 5.0);

        sleep(Duration::from_millis(2100)).await;
        assert_eq!(fan.status().await.is_on, winner == 5.0);

        sleep(Duration::from_secs(3)).await;
        assert!(!fan.status().await.is_on);
        assert_eq!(gpio.level(13), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_fault_rolls_back_to_off() {
        let (fan, gpio) = channel(19);
        gpio.set_fail_writes(true);

        let err = fan.turn_on(3.0).await.unwrap_err();
        assert!(matches!(err, FanError::HardwareFault { pin: 19, .. }));
        assert!(!fan.status().await.is_on);
        assert_eq!(gpio.level(19), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_forces_pin_low() {
        let (fan, gpio) = channel(12);
        fan.turn_on(30.0).await.unwrap();

        fan.shutdown().await.unwrap();
        assert!(!fan.status().await.is_on);
        assert_eq!(gpio.level(12), Some(Level::Low));
    }
}

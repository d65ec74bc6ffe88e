//! Fan controller: owns every channel and dispatches by fan id

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelStatus, FanChannel, FanError};
use crate::config::FanPinConfig;
use crate::gpio::{Gpio, GpioError};

/// Read-only status of all channels, in configured order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub channels: Vec<ChannelStatus>,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn get(&self, fan_id: u32) -> Option<&ChannelStatus> {
        self.channels.iter().find(|c| c.id == fan_id)
    }
}

pub struct FanController {
    channels: Vec<FanChannel>,
}

impl FanController {
    /// Build channels from the pin mapping and drive every pin low
    pub fn new(fans: &[FanPinConfig], gpio: Arc<dyn Gpio>) -> Result<Self, GpioError> {
        let mut channels = Vec::with_capacity(fans.len());
        for fan in fans {
            gpio.configure_output(fan.pin)?;
            channels.push(FanChannel::new(fan.id, fan.pin, Arc::clone(&gpio)));
        }
        tracing::info!("GPIO pins initialized for {} fans", channels.len());

        Ok(Self { channels })
    }

    pub fn fan_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.channels.iter().map(|c| c.id())
    }

    fn channel(&self, fan_id: u32) -> Result<&FanChannel, FanError> {
        self.channels
            .iter()
            .find(|c| c.id() == fan_id)
            .ok_or(FanError::UnknownFan(fan_id))
    }

    pub async fn turn_on(&self, fan_id: u32, duration_seconds: f64) -> Result<ChannelStatus, FanError> {
        self.channel(fan_id)?.turn_on(duration_seconds).await
    }

    pub async fn turn_off(&self, fan_id: u32) -> Result<ChannelStatus, FanError> {
        self.channel(fan_id)?.turn_off().await
    }

    pub async fn channel_status(&self, fan_id: u32) -> Result<ChannelStatus, FanError> {
        Ok(self.channel(fan_id)?.status().await)
    }

    pub async fn status_all(&self) -> StatusSnapshot {
        let mut channels = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            channels.push(channel.status().await);
        }

        StatusSnapshot {
            channels,
            taken_at: Utc::now(),
        }
    }

    /// Cancel all timers and write every pin low.
    ///
    /// Keeps going past individual failures; returns how many channels faulted.
    pub async fn shutdown(&self) -> usize {
        let mut failures = 0;
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::error!("Error during shutdown: {}", e);
                failures += 1;
            }
        }
        tracing::info!("Fan controller shut down");
        failures
    }
}

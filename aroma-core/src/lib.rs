//! aroma-core: timed fan control for the aroma diffuser
//!
//! This crate provides:
//! - A GPIO capability trait with mock and sysfs backends
//! - Per-fan channels with cancellable auto-off timers
//! - A controller dispatching by fan id
//! - A status broadcaster for WebSocket subscribers

pub mod broadcast;
pub mod channel;
pub mod config;
pub mod controller;
pub mod gpio;
pub mod protocol;

pub use broadcast::{Broadcaster, SubscriberId, Subscription, TickReport};
pub use channel::{ChannelStatus, FanError};
pub use config::Config;
pub use controller::{FanController, StatusSnapshot};
pub use gpio::{Gpio, GpioError, Level, MockGpio};
pub use protocol::{ClientMessage, ServerMessage};

/// Default HTTP port for aroma-server
pub const DEFAULT_PORT: u16 = 8000;

use async_trait::async_trait;
use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use std::time::Duration;

use super::{Producer, Schedule, SliceError};
use crate::core::config::{ConfigError, SliceConfig};
use crate::core::{CutUpdate, NewCut, Slice};

pub const DEFAULT_FORMAT: &str = "%H:%M";
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

const CUT_ID: &str = "clock";

/// Local time, refreshed on the event loop.
pub struct Clock {
    format: String,
    interval: Duration,
}

impl Clock {
    pub fn new(format: impl Into<String>, interval: Duration) -> Result<Self, ConfigError> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid(format!(
                "invalid clock format '{format}'"
            )));
        }
        if interval.is_zero() {
            return Err(ConfigError::Invalid(
                "clock interval must be at least 1 second".into(),
            ));
        }
        Ok(Self { format, interval })
    }

    pub fn from_config(config: &SliceConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.format.as_deref().unwrap_or(DEFAULT_FORMAT),
            Duration::from_secs(config.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
        )
    }

    fn now(&self) -> String {
        Local::now().format(&self.format).to_string()
    }
}

#[async_trait]
impl Producer for Clock {
    fn name(&self) -> &str {
        CUT_ID
    }

    fn schedule(&self) -> Schedule {
        Schedule::Every(self.interval)
    }

    fn init(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.add_cut(NewCut::new(CUT_ID, self.now()))?;
        Ok(())
    }

    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.update_cut(CUT_ID, CutUpdate::default().text(self.now()))?;
        Ok(())
    }
}

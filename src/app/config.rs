//! `AppConfig`: the configuration record accepted by [`crate::app::App`].
//!
//! A single flat config surface built with chained `with_x(...)` builder
//! methods, the way apps in this ecosystem tend to expose setup knobs.

use crate::inline::StartupPolicy;
use crate::input::KeyEvent;
use crate::Error;
use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How the input decoder waits for the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLatency {
    /// Poll with the given timeout, returning control to the main loop
    /// between polls so the dirty flag and queues are still serviced.
    Poll(Duration),
    /// Block the reader thread until input arrives or the app signals
    /// shutdown.
    Block,
}

/// Configuration accepted by [`crate::app::App::new`]. The `root` component
/// itself is supplied separately to `App::run`, keeping setup and root
/// construction independent of each other.
///
/// Not `Clone`: `global_key_handler` is a boxed `FnMut`, which cloning would
/// require duplicating state it may close over.
pub struct AppConfig {
    pub input_latency: InputLatency,
    pub frame_rate: u16,
    pub event_queue_size: usize,
    pub mouse_enabled: bool,
    pub cursor_visible: bool,
    pub inline_height: Option<u16>,
    pub inline_startup_mode: StartupPolicy,
    pub global_key_handler: Option<Box<dyn FnMut(&KeyEvent) -> bool + Send>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AppConfig {
    /// Full-screen defaults: mouse capture on, cursor hidden, 60fps,
    /// 16ms polling, a 256-slot queue.
    pub fn new() -> Self {
        Self {
            input_latency: InputLatency::Poll(Duration::from_millis(16)),
            frame_rate: 60,
            event_queue_size: 256,
            mouse_enabled: true,
            cursor_visible: false,
            inline_height: None,
            inline_startup_mode: StartupPolicy::default(),
            global_key_handler: None,
        }
    }

    /// Inline-mode defaults: same as [`AppConfig::new`] except mouse capture
    /// starts disabled (inline widgets usually sit alongside scrollback the
    /// user still wants to select text from) and `inline_height` is set.
    pub fn inline(height: u16) -> Self {
        Self { inline_height: Some(height), mouse_enabled: false, ..Self::new() }
    }

    pub fn with_input_latency(mut self, latency: InputLatency) -> Self {
        self.input_latency = latency;
        self
    }

    pub fn with_frame_rate(mut self, fps: u16) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    pub fn with_mouse_enabled(mut self, enabled: bool) -> Self {
        self.mouse_enabled = enabled;
        self
    }

    pub fn with_cursor_visible(mut self, visible: bool) -> Self {
        self.cursor_visible = visible;
        self
    }

    pub fn with_inline_height(mut self, height: u16) -> Self {
        self.inline_height = Some(height);
        self
    }

    pub fn with_inline_startup_mode(mut self, mode: StartupPolicy) -> Self {
        self.inline_startup_mode = mode;
        self
    }

    pub fn with_global_key_handler(
        mut self,
        handler: impl FnMut(&KeyEvent) -> bool + Send + 'static,
    ) -> Self {
        self.global_key_handler = Some(Box::new(handler));
        self
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    /// Validates documented ranges, surfacing the first violation found.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=240).contains(&self.frame_rate) {
            return Err(Error::OptionInvalid {
                field: "frame_rate",
                message: format!("{} is outside 1..=240", self.frame_rate),
            });
        }
        if self.event_queue_size < 1 {
            return Err(Error::OptionInvalid {
                field: "event_queue_size",
                message: "must be at least 1".into(),
            });
        }
        if let InputLatency::Poll(d) = self.input_latency {
            if d.is_zero() {
                return Err(Error::OptionInvalid {
                    field: "input_latency",
                    message: "a zero poll timeout is rejected; use InputLatency::Block to block instead".into(),
                });
            }
        }
        if let Some(h) = self.inline_height {
            if h < 1 {
                return Err(Error::OptionInvalid {
                    field: "inline_height",
                    message: "must be at least 1".into(),
                });
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(AppConfig::new().validate().is_ok());
        assert!(AppConfig::inline(3).validate().is_ok());
    }

    #[test]
    fn frame_rate_out_of_range_rejected() {
        let cfg = AppConfig::new().with_frame_rate(0);
        assert!(matches!(cfg.validate(), Err(Error::OptionInvalid { field: "frame_rate", .. })));
        let cfg = AppConfig::new().with_frame_rate(241);
        assert!(matches!(cfg.validate(), Err(Error::OptionInvalid { field: "frame_rate", .. })));
    }

    #[test]
    fn zero_poll_timeout_rejected() {
        let cfg = AppConfig::new().with_input_latency(InputLatency::Poll(Duration::ZERO));
        assert!(cfg.validate().is_err());
        let cfg = AppConfig::new().with_input_latency(InputLatency::Block);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inline_mode_defaults_disable_mouse() {
        let cfg = AppConfig::inline(5);
        assert!(!cfg.mouse_enabled);
        assert_eq!(cfg.inline_height, Some(5));
    }
}

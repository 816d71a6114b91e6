//! Viewer tuning knobs.

use std::time::Duration;

use crate::raymarch::{MarchSettings, RenderMode};

/// How long to keep waiting for a container that has no layout size yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            interval: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Derive the attempt count from an overall timeout.
    pub fn from_timeout(timeout: Duration, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let attempts = (timeout.as_millis() / interval.as_millis()).max(1);
        Self {
            max_attempts: attempts.min(u32::MAX as u128) as u32,
            interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// How the atlas downsample factor is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downsample {
    Fixed(usize),
    /// Smallest factor whose atlas fits the given texture dimension.
    FitTexture(u32),
}

impl Default for Downsample {
    fn default() -> Self {
        Self::FitTexture(4096)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub container_retry: RetryPolicy,
    pub window_debounce: Duration,
    pub resize_debounce: Duration,
    pub fast_scroll_step: usize,
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub downsample: Downsample,
    pub march: MarchSettings,
    pub render_mode: RenderMode,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            container_retry: RetryPolicy::default(),
            window_debounce: Duration::from_millis(150),
            resize_debounce: Duration::from_millis(100),
            fast_scroll_step: 10,
            zoom_min: 0.1,
            zoom_max: 5.0,
            downsample: Downsample::default(),
            march: MarchSettings::default(),
            render_mode: RenderMode::default(),
        }
    }
}

impl ViewerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container_retry(mut self, policy: RetryPolicy) -> Self {
        self.container_retry = policy;
        self
    }

    pub fn with_window_debounce(mut self, quiet: Duration) -> Self {
        self.window_debounce = quiet;
        self
    }

    pub fn with_resize_debounce(mut self, quiet: Duration) -> Self {
        self.resize_debounce = quiet;
        self
    }

    pub fn with_fast_scroll_step(mut self, step: usize) -> Self {
        self.fast_scroll_step = step.max(1);
        self
    }

    /// Limits are reordered if given backwards.
    pub fn with_zoom_limits(mut self, min: f32, max: f32) -> Self {
        self.zoom_min = min.min(max);
        self.zoom_max = min.max(max);
        self
    }

    pub fn with_downsample(mut self, downsample: Downsample) -> Self {
        self.downsample = downsample;
        self
    }

    pub fn with_march(mut self, march: MarchSettings) -> Self {
        self.march = march;
        self
    }

    pub fn with_render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_from_timeout() {
        let policy = RetryPolicy::from_timeout(Duration::from_secs(3), Duration::from_millis(100));
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_builder_orders_zoom_limits() {
        let config = ViewerConfig::new().with_zoom_limits(4.0, 0.5).with_fast_scroll_step(0);
        assert_eq!((config.zoom_min, config.zoom_max), (0.5, 4.0));
        assert_eq!(config.fast_scroll_step, 1);
    }
}

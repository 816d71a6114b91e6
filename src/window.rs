//! Percentile contrast windows.
//!
//! The volumetric path maps calibrated values through a window placed inside
//! the volume histogram. The panoramic path applies the same percent sliders
//! to an already rendered raster, with bounds in byte space. The two are kept
//! separate on purpose; they only share the clamp/normalize/scale step.

use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;
use log::debug;
use rayon::prelude::*;

use crate::volume::Histogram;

/// Lower bound for a window's width.
pub const WINDOW_EPSILON: f32 = 1e-6;

/// Percent sliders. Either one may cross the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowState {
    percent_min: f32,
    percent_max: f32,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            percent_min: 0.0,
            percent_max: 100.0,
        }
    }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl WindowState {
    pub fn new(percent_min: f32, percent_max: f32) -> Self {
        Self {
            percent_min: clamp_percent(percent_min),
            percent_max: clamp_percent(percent_max),
        }
    }

    pub fn percent_min(&self) -> f32 {
        self.percent_min
    }

    pub fn percent_max(&self) -> f32 {
        self.percent_max
    }

    pub fn set_percent_min(&mut self, value: f32) {
        self.percent_min = clamp_percent(value);
    }

    pub fn set_percent_max(&mut self, value: f32) {
        self.percent_max = clamp_percent(value);
    }

    /// `(low, high)` with `low <= high`.
    pub fn resolved(&self) -> (f32, f32) {
        (
            self.percent_min.min(self.percent_max),
            self.percent_min.max(self.percent_max),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub min: f32,
    pub max: f32,
    pub range: f32,
}

impl WindowParams {
    pub fn from_bounds(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            range: (max - min).max(WINDOW_EPSILON),
        }
    }
}

/// Place the window inside the histogram. Call once per slider change.
pub fn compute_window(histogram: &Histogram, state: &WindowState) -> WindowParams {
    let (low, high) = state.resolved();
    if histogram.is_empty() {
        return WindowParams::from_bounds(0.0, 0.0);
    }
    let span = histogram.max - histogram.min;
    let min = histogram.min + span * low / 100.0;
    let max = histogram.min + span * high / 100.0;
    WindowParams::from_bounds(min, max.max(min))
}

/// Calibrated value to display byte.
#[inline]
pub fn map_intensity(value: f32, window: &WindowParams) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let clamped = value.clamp(window.min, window.max);
    let normalized = (clamped - window.min) / window.range;
    (normalized.clamp(0.0, 1.0) * 255.0).floor() as u8
}

/// Owns the window sliders and the single cached [`WindowParams`].
#[derive(Debug, Clone)]
pub struct WindowController {
    state: WindowState,
    histogram: Histogram,
    cached: Option<WindowParams>,
    generation: u64,
}

impl WindowController {
    pub fn new(histogram: Histogram, state: WindowState) -> Self {
        Self {
            state,
            histogram,
            cached: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn histogram(&self) -> Histogram {
        self.histogram
    }

    /// Bumped on every invalidation; consumers compare it to decide when to rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_histogram(&mut self, histogram: Histogram) {
        self.histogram = histogram;
        self.invalidate();
    }

    pub fn set_percent_min(&mut self, value: f32) {
        self.state.set_percent_min(value);
        self.invalidate();
    }

    pub fn set_percent_max(&mut self, value: f32) {
        self.state.set_percent_max(value);
        self.invalidate();
    }

    pub fn set_state(&mut self, state: WindowState) {
        if state != self.state {
            self.state = state;
            self.invalidate();
        }
    }

    fn invalidate(&mut self) {
        self.cached = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub fn params(&mut self) -> WindowParams {
        if let Some(params) = self.cached {
            return params;
        }
        let params = compute_window(&self.histogram, &self.state);
        debug!(
            "window recomputed: [{}, {}] from {:?}",
            params.min, params.max, self.state
        );
        self.cached = Some(params);
        params
    }
}

/// A [`WindowController`] for hosts that touch window state from several threads.
#[derive(Debug, Clone)]
pub struct SharedWindow(Arc<Mutex<WindowController>>);

impl SharedWindow {
    pub fn new(controller: WindowController) -> Self {
        Self(Arc::new(Mutex::new(controller)))
    }

    /// The state stays consistent under a poisoned lock since every writer is a plain assignment.
    pub fn lock(&self) -> MutexGuard<'_, WindowController> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn params(&self) -> WindowParams {
        self.lock().params()
    }
}

/// Window over byte-valued luminance, for the panoramic image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ByteWindow {
    pub min: f32,
    pub max: f32,
    pub range: f32,
}

pub fn panoramic_window(state: &WindowState) -> ByteWindow {
    let (low, high) = state.resolved();
    let min = 255.0 * low / 100.0;
    let max = 255.0 * high / 100.0;
    ByteWindow {
        min,
        max,
        range: (max - min).max(WINDOW_EPSILON),
    }
}

#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32
}

#[inline]
pub fn map_luminance(value: f32, window: &ByteWindow) -> u8 {
    let clamped = value.clamp(window.min, window.max);
    let normalized = (clamped - window.min) / window.range;
    (normalized.clamp(0.0, 1.0) * 255.0).floor() as u8
}

/// Grayscale-window an RGBA raster, keeping its alpha channel.
pub fn window_panoramic(image: &RgbaImage, state: &WindowState) -> RgbaImage {
    let window = panoramic_window(state);
    let mut out = image.clone();
    out.par_chunks_mut(4).for_each(|pixel| {
        let value = map_luminance(luminance(pixel[0], pixel[1], pixel[2]), &window);
        pixel[0] = value;
        pixel[1] = value;
        pixel[2] = value;
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn histogram(min: f32, max: f32) -> Histogram {
        Histogram { min, max }
    }

    #[test]
    fn test_window_bounds_follow_percentiles() {
        let params = compute_window(&histogram(-1000.0, 1000.0), &WindowState::new(25.0, 75.0));
        assert_relative_eq!(params.min, -500.0);
        assert_relative_eq!(params.max, 500.0);
        assert_relative_eq!(params.range, 1000.0);
    }

    #[test]
    fn test_crossed_sliders_do_not_invert() {
        let crossed = compute_window(&histogram(0.0, 200.0), &WindowState::new(80.0, 20.0));
        let ordered = compute_window(&histogram(0.0, 200.0), &WindowState::new(20.0, 80.0));
        assert_eq!(crossed, ordered);
        assert!(crossed.min <= crossed.max);
    }

    #[test]
    fn test_percent_clamped() {
        let state = WindowState::new(-10.0, 250.0);
        assert_eq!(state.percent_min(), 0.0);
        assert_eq!(state.percent_max(), 100.0);
    }

    #[test]
    fn test_window_max_monotonic_in_percent_max() {
        let hist = histogram(-300.0, 1700.0);
        let mut previous = f32::NEG_INFINITY;
        for step in 0..=100 {
            let params = compute_window(&hist, &WindowState::new(10.0, step as f32));
            assert!(params.max >= previous);
            previous = params.max;
        }
    }

    #[test]
    fn test_map_intensity_endpoints_and_monotonic() {
        let params = WindowParams::from_bounds(-200.0, 600.0);
        assert_eq!(map_intensity(-200.0, &params), 0);
        assert_eq!(map_intensity(600.0, &params), 255);
        assert_eq!(map_intensity(-5000.0, &params), 0);
        assert_eq!(map_intensity(5000.0, &params), 255);
        let mut previous = 0u8;
        for i in -300..700 {
            let value = map_intensity(i as f32, &params);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_degenerate_window_maps_to_zero() {
        let params = compute_window(&histogram(-900.0, -900.0), &WindowState::default());
        assert_eq!(params.range, WINDOW_EPSILON);
        assert_eq!(map_intensity(-900.0, &params), 0);
    }

    #[test]
    fn test_controller_caches_until_slider_moves() {
        let mut controller = WindowController::new(histogram(0.0, 100.0), WindowState::default());
        assert!(!controller.is_cached());
        let first = controller.params();
        assert!(controller.is_cached());
        let generation = controller.generation();

        controller.set_percent_max(50.0);
        assert!(!controller.is_cached());
        assert!(controller.generation() > generation);
        let second = controller.params();
        assert_relative_eq!(second.max, 50.0);
        assert_ne!(first, second);
    }

    #[test]
    fn test_shared_window_reads_through_lock() {
        let shared = SharedWindow::new(WindowController::new(
            histogram(0.0, 10.0),
            WindowState::new(0.0, 50.0),
        ));
        assert_relative_eq!(shared.params().max, 5.0);
        shared.lock().set_percent_max(100.0);
        assert_relative_eq!(shared.params().max, 10.0);
    }

    #[test]
    fn test_panoramic_window_is_byte_scaled() {
        let window = panoramic_window(&WindowState::new(0.0, 50.0));
        assert_relative_eq!(window.min, 0.0);
        assert_relative_eq!(window.max, 127.5);
        assert_eq!(map_luminance(127.5, &window), 255);
        assert_eq!(map_luminance(255.0, &window), 255);
    }

    #[test]
    fn test_window_panoramic_keeps_alpha() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 255, 255, 10]));
        image.put_pixel(1, 0, image::Rgba([0, 0, 0, 200]));
        let windowed = window_panoramic(&image, &WindowState::default());
        let white = windowed.get_pixel(0, 0).0;
        assert!(white[0] >= 254);
        assert_eq!(white[0], white[1]);
        assert_eq!(white[3], 10);
        assert_eq!(windowed.get_pixel(1, 0).0, [0, 0, 0, 200]);
    }

    #[test]
    fn test_luminance_weights() {
        assert_relative_eq!(luminance(255, 0, 0), 0.2126 * 255.0);
        assert_relative_eq!(luminance(0, 255, 0), 0.7152 * 255.0, epsilon = 1e-3);
    }
}

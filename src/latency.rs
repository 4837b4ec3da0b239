//! Adaptive latency control
//!
//! The tuner is a control loop invoked on every poll tick (10 ms). It
//! compares measured end-to-end latency against the configured target and
//! outputs a playback pacing ratio applied at the host pull boundary.
//! Correction is first-order (EWMA-filtered error, proportional nudge)
//! so convergence toward the target is monotonic within the tolerance
//! band, and the nudge is clamped so the effective latency can never be
//! pushed outside the configured min/max bounds.
//!
//! The watchdog turns sustained silence or sustained gap activity into
//! observable [`TimingFault`]s. The engine only reports them; tearing the
//! session down stays the host's decision.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TimingFault};

/// Tick interval the tuner is designed around
pub const TUNER_TICK: Duration = Duration::from_millis(10);

/// Largest pacing deviation the tuner will ever request (1%)
const MAX_RATIO_NUDGE: f64 = 0.01;

/// Latency tuner backend selector (`latency_backend=default|niq`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTunerBackend {
    /// Network-incoming-queue length tracking
    #[default]
    Niq,
}

/// Tuner responsiveness profile (`latency_profile=intact|gradual|responsive`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyProfile {
    /// No adjustment; latency drifts with the clocks
    Intact,
    /// Slow correction, absorbs more jitter
    #[default]
    Gradual,
    /// Fast correction for links with low jitter
    Responsive,
}

impl LatencyProfile {
    /// (proportional gain, EWMA smoothing factor)
    fn parameters(&self) -> (f64, f64) {
        match self {
            LatencyProfile::Intact => (0.0, 0.1),
            LatencyProfile::Gradual => (0.1, 0.1),
            LatencyProfile::Responsive => (0.5, 0.4),
        }
    }
}

/// Resampler implementation the host pairs with the pacing ratio
/// (`resampler_backend=builtin|speex|speexdec`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerBackend {
    #[default]
    Builtin,
    Speex,
    /// Speex for base rate conversion, decimation for the fractional part
    Speexdec,
}

/// Resampler quality/cost trade-off (`resampler_profile=high|medium|low`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerProfile {
    High,
    #[default]
    Medium,
    Low,
}

/// Latency configuration with documented defaults.
///
/// `Duration::ZERO` means "derive automatically", matching the original
/// module arguments where 0 selects the built-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub backend: LatencyTunerBackend,
    pub profile: LatencyProfile,
    /// Resampler the host should drive with [`Adjustment::ratio`]
    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,
    /// Target end-to-end latency (default 200 ms)
    pub target: Duration,
    /// Lower latency bound; 0 = target / 2
    pub min: Duration,
    /// Upper latency bound; 0 = target * 2
    pub max: Duration,
    /// Acceptable deviation band around the target; 0 = target / 4
    pub tolerance: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            backend: LatencyTunerBackend::Niq,
            profile: LatencyProfile::Gradual,
            resampler_backend: ResamplerBackend::Builtin,
            resampler_profile: ResamplerProfile::Medium,
            target: Duration::from_millis(200),
            min: Duration::ZERO,
            max: Duration::ZERO,
            tolerance: Duration::ZERO,
        }
    }
}

impl LatencyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let target_ms = self.target.as_millis() as i64;
        if !(1..=60_000).contains(&target_ms) {
            return Err(ConfigError::OutOfRange {
                parameter: "target_latency_msec",
                value: target_ms,
                min: 1,
                max: 60_000,
            });
        }
        let (min, max, _) = self.bounds();
        if min > self.target {
            return Err(ConfigError::Incompatible {
                parameter: "min_latency_msec",
                reason: format!(
                    "minimum latency {} ms exceeds target {} ms",
                    min.as_millis(),
                    target_ms
                ),
            });
        }
        if max < self.target {
            return Err(ConfigError::Incompatible {
                parameter: "max_latency_msec",
                reason: format!(
                    "maximum latency {} ms is below target {} ms",
                    max.as_millis(),
                    target_ms
                ),
            });
        }
        Ok(())
    }

    /// Resolved (min, max, tolerance) with automatic values filled in.
    pub fn bounds(&self) -> (Duration, Duration, Duration) {
        let min = if self.min.is_zero() {
            self.target / 2
        } else {
            self.min
        };
        let max = if self.max.is_zero() {
            self.target * 2
        } else {
            self.max
        };
        let tolerance = if self.tolerance.is_zero() {
            self.target / 4
        } else {
            self.tolerance
        };
        (min, max, tolerance)
    }
}

/// Pacing adjustment produced by one tuner tick.
///
/// `ratio` multiplies the host pull pace: above 1.0 drains the queue
/// (latency too high), below 1.0 lets it grow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub ratio: f64,
}

pub struct LatencyTuner {
    target_us: f64,
    min_us: f64,
    max_us: f64,
    tolerance_us: f64,
    gain: f64,
    smoothing: f64,
    filtered_error_us: f64,
    ratio: f64,
    ticks: u64,
}

impl LatencyTuner {
    pub fn new(config: &LatencyConfig) -> Self {
        let (min, max, tolerance) = config.bounds();
        let (gain, smoothing) = config.profile.parameters();
        Self {
            target_us: config.target.as_micros() as f64,
            min_us: min.as_micros() as f64,
            max_us: max.as_micros() as f64,
            tolerance_us: tolerance.as_micros() as f64,
            gain,
            smoothing,
            filtered_error_us: 0.0,
            ratio: 1.0,
            ticks: 0,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Feed one latency measurement and produce the pacing adjustment.
    pub fn tick(&mut self, measured: Duration) -> Adjustment {
        self.ticks += 1;
        let measured_us = (measured.as_micros() as f64).clamp(0.0, self.max_us * 2.0);
        let error = measured_us - self.target_us;
        self.filtered_error_us += self.smoothing * (error - self.filtered_error_us);

        if self.filtered_error_us.abs() <= self.tolerance_us {
            // Inside the band: relax toward neutral pacing.
            self.ratio += 0.1 * (1.0 - self.ratio);
        } else {
            let nudge =
                (self.gain * self.filtered_error_us / self.target_us).clamp(-MAX_RATIO_NUDGE, MAX_RATIO_NUDGE);
            self.ratio = 1.0 + nudge;

            // Never push the queue outside the configured bounds: stop
            // draining at min, stop growing at max.
            if measured_us <= self.min_us && self.ratio > 1.0 {
                self.ratio = 1.0;
            }
            if measured_us >= self.max_us && self.ratio < 1.0 {
                self.ratio = 1.0;
            }
        }

        Adjustment { ratio: self.ratio }
    }
}

/// Observes playback continuity and reports timing faults.
pub struct PlaybackWatchdog {
    no_playback_timeout: Duration,
    choppy_playback_timeout: Duration,
    started: Instant,
    last_frame: Option<Instant>,
    /// Start of the current run of gap activity
    choppy_since: Option<Instant>,
    last_gap: Option<Instant>,
}

/// A run of gaps is considered broken after this much gap-free playback.
const CHOPPY_RESET: Duration = Duration::from_secs(1);

impl PlaybackWatchdog {
    pub fn new(
        no_playback_timeout: Duration,
        choppy_playback_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            no_playback_timeout,
            choppy_playback_timeout,
            started: now,
            last_frame: None,
            choppy_since: None,
            last_gap: None,
        }
    }

    /// A real (non-gap) frame reached the host.
    pub fn record_frame(&mut self, now: Instant) {
        self.last_frame = Some(now);
        if let Some(last_gap) = self.last_gap {
            if now.duration_since(last_gap) >= CHOPPY_RESET {
                self.choppy_since = None;
                self.last_gap = None;
            }
        }
    }

    /// A sequence slot was released as silence.
    pub fn record_gap(&mut self, now: Instant) {
        match self.last_gap {
            Some(last) if now.duration_since(last) < CHOPPY_RESET => {}
            _ => self.choppy_since = Some(now),
        }
        self.last_gap = Some(now);
    }

    /// Check both timeouts. The engine reports; the host decides.
    pub fn check(&self, now: Instant) -> Option<TimingFault> {
        let silent_for = now.duration_since(self.last_frame.unwrap_or(self.started));
        if !self.no_playback_timeout.is_zero() && silent_for >= self.no_playback_timeout {
            return Some(TimingFault::NoPlayback {
                elapsed_ms: silent_for.as_millis() as u64,
                timeout_ms: self.no_playback_timeout.as_millis() as u64,
            });
        }

        if let (Some(since), Some(last_gap)) = (self.choppy_since, self.last_gap) {
            let choppy_for = now.duration_since(since);
            if !self.choppy_playback_timeout.is_zero()
                && now.duration_since(last_gap) < CHOPPY_RESET
                && choppy_for >= self.choppy_playback_timeout
            {
                return Some(TimingFault::ChoppyPlayback {
                    elapsed_ms: choppy_for.as_millis() as u64,
                    timeout_ms: self.choppy_playback_timeout.as_millis() as u64,
                });
            }
        }
        None
    }
}

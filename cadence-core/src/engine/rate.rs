//! Playback-rate determination and smoothing.
//!
//! ## Algorithm
//!
//! 1. `delta = consumable − target`, `threshold = affordance × target`.
//! 2. `|delta| ≤ threshold` → 1.0 (dead zone, no pitch change).
//! 3. Buffer low → `1 + max(−MAX_RATE_ADJUSTMENT, delta / target)` (slow down).
//! 4. Buffer high → `1 / (1 − min(MAX_RATE_ADJUSTMENT, delta / target))` (speed up).
//! 5. Clamp to `[rate_min, rate_max]`; inverted bounds force 1.0.

use super::PlaybackConfig;

/// Cap on `|delta| / target`. Keeps the speed-up divisor away from zero.
pub const MAX_RATE_ADJUSTMENT: f64 = 0.975;

/// Instantaneous playback-rate multiplier for the current occupancy.
pub fn determine_playback_rate(
    consumable_samples: usize,
    target_samples: usize,
    config: &PlaybackConfig,
) -> f64 {
    if config.rate_min >= config.rate_max || target_samples == 0 {
        return 1.0;
    }

    let target = target_samples as f64;
    let delta = consumable_samples as f64 - target;
    let threshold = config.rate_affordance * target;

    let rate = if delta.abs() <= threshold {
        1.0
    } else if delta <= 0.0 {
        1.0 + (delta / target).max(-MAX_RATE_ADJUSTMENT)
    } else {
        1.0 / (1.0 - (delta / target).min(MAX_RATE_ADJUSTMENT))
    };

    rate.clamp(config.rate_min, config.rate_max)
}

/// One step of the single-pole low-pass used to glide between rates.
pub fn smooth_rate(current: f64, instantaneous: f64, smoothing: f64) -> f64 {
    current * smoothing + instantaneous * (1.0 - smoothing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            rate_min: 0.8,
            rate_max: 1.5,
            rate_affordance: 0.2,
            ..PlaybackConfig::default()
        }
    }

    #[test]
    fn dead_zone_holds_unity() {
        let cfg = config();
        for consumable in [800, 900, 1000, 1100, 1200] {
            assert_eq!(determine_playback_rate(consumable, 1000, &cfg), 1.0);
        }
    }

    #[test]
    fn low_buffer_slows_down() {
        let rate = determine_playback_rate(750, 1000, &config());
        assert_relative_eq!(rate, 0.8);
        let cfg = PlaybackConfig {
            rate_min: 0.5,
            ..config()
        };
        assert_relative_eq!(determine_playback_rate(700, 1000, &cfg), 0.7);
    }

    #[test]
    fn high_buffer_speeds_up() {
        // delta/target = 0.25 → 1 / 0.75
        let rate = determine_playback_rate(1250, 1000, &config());
        assert_relative_eq!(rate, 1.0 / 0.75);
    }

    #[test]
    fn extremes_respect_bounds() {
        let cfg = config();
        assert_relative_eq!(determine_playback_rate(0, 1000, &cfg), cfg.rate_min);
        assert_relative_eq!(determine_playback_rate(1_000_000, 1000, &cfg), cfg.rate_max);
    }

    #[test]
    fn clamp_ratio_bounds_unclamped_extremes() {
        let cfg = PlaybackConfig {
            rate_min: 0.001,
            rate_max: 1000.0,
            ..config()
        };
        assert_relative_eq!(
            determine_playback_rate(0, 1000, &cfg),
            1.0 - MAX_RATE_ADJUSTMENT
        );
        assert_relative_eq!(
            determine_playback_rate(1_000_000, 1000, &cfg),
            1.0 / (1.0 - MAX_RATE_ADJUSTMENT),
            max_relative = 1e-9
        );
    }

    #[test]
    fn inverted_bounds_disable_adaptation() {
        let cfg = PlaybackConfig {
            rate_min: 1.2,
            rate_max: 1.2,
            ..config()
        };
        assert_eq!(determine_playback_rate(0, 1000, &cfg), 1.0);
    }

    #[test]
    fn zero_target_is_unity() {
        assert_eq!(determine_playback_rate(500, 0, &config()), 1.0);
    }

    #[test]
    fn smoothing_blends_toward_target() {
        assert_relative_eq!(smooth_rate(1.0, 1.5, 0.9), 1.05);
        let mut rate = 1.0;
        for _ in 0..200 {
            rate = smooth_rate(rate, 0.8, 0.9);
        }
        assert_relative_eq!(rate, 0.8, epsilon = 1e-6);
    }
}

// Host-side tests for the browser tuning constants.
// The main crate is wasm-only, so we include the pure-Rust modules directly.

#![allow(dead_code)]
mod constants {
    include!("../src/constants.rs");
}

use constants::*;
use geosonic_core::constants as tuning;

#[test]
#[allow(clippy::assertions_on_constants)]
fn delay_ceiling_covers_the_echo_line() {
    assert!(MAX_DELAY_SECS > 0.0);
    assert!(MAX_DELAY_SECS as f32 >= tuning::MELODY_ECHO_SECS);
}

#[test]
#[allow(clippy::assertions_on_constants)]
fn noise_buffer_bounds_admit_the_bed() {
    assert!(NOISE_SEED != 0, "xorshift state must be non-zero");
    assert!(NOISE_MIN_SECS > 0.0);
    assert!(NOISE_MIN_SECS < NOISE_MAX_SECS);
    assert!(tuning::NOISE_SECS >= NOISE_MIN_SECS && tuning::NOISE_SECS <= NOISE_MAX_SECS);
}

#[test]
#[allow(clippy::assertions_on_constants)]
fn core_timings_fit_browser_timers() {
    assert!(MAX_TIMER_MS > 0);
    assert!((tuning::NARRATION_BASE_INTERVAL_MS as i64) < MAX_TIMER_MS as i64);
    assert!(tuning::NARRATION_MIN_INTERVAL_MS <= tuning::NARRATION_BASE_INTERVAL_MS);
    assert!(tuning::MELODY_MIN_STEP_MS as f32 <= tuning::MELODY_STEP_MAX_MS);
    assert!(tuning::RELEASE_SECS > 0.0 && tuning::PAN_SMOOTHING_SECS > 0.0);
}

#[test]
fn speech_language_is_a_bcp47_tag() {
    let parts: Vec<&str> = SPEECH_LANG.split('-').collect();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].len(), 2);
}

/// WebAudio and browser-side tuning for the front-end.
///
/// Synthesis levels and timings live in the core crate; these only cover
/// what the browser backends need to build nodes and buffers.
// Delay lines are allocated with this ceiling; requested times are clamped to it.
pub const MAX_DELAY_SECS: f64 = 2.0;

// Looping noise buffer
pub const NOISE_SEED: u32 = 0x1234_ABCD; // xorshift32 state, any non-zero value
pub const NOISE_MIN_SECS: f32 = 0.25;
pub const NOISE_MAX_SECS: f32 = 10.0;

// Speech synthesis
pub const SPEECH_LANG: &str = "en-US";

// Browsers clamp timer delays to a signed 32-bit millisecond count.
pub const MAX_TIMER_MS: i32 = i32::MAX;

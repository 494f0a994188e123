// Shared synthesis tuning constants for every mode strategy.

// Proximity / activity mapping
pub const ACTIVITY_LOG_DIVISOR: f32 = 4.0; // log10(activity + 1) / 4 saturates near 10k

// Voice teardown and panning
pub const RELEASE_SECS: f32 = 0.2; // gain ramp to silence before a generator halts
pub const PAN_SMOOTHING_SECS: f32 = 0.08; // time constant for repan transitions
pub const MASTER_GAIN: f32 = 0.8;

// Ambient clusters
pub const AMBIENT_VOICE_CAP: usize = 12;
pub const AMBIENT_MAX_PARTIALS: usize = 4;
pub const AMBIENT_ROOT_MIDI: i32 = 48; // C3
pub const AMBIENT_LEVEL: f32 = 0.12; // k1 in k1 * proximity * (a + b * activity)
pub const AMBIENT_LEVEL_BASE: f32 = 0.4; // a
pub const AMBIENT_LEVEL_ACTIVITY: f32 = 0.6; // b
pub const AMBIENT_FADE_IN_SECS: f32 = 2.5;
pub const AMBIENT_BREATH_MIN_HZ: f32 = 0.05;
pub const AMBIENT_BREATH_MAX_HZ: f32 = 0.3;
pub const AMBIENT_BREATH_DEPTH: f32 = 0.35; // fraction of a partial's level swept by its LFO

// Cacophony: drone
pub const DRONE_HZ: f32 = 55.0; // A1
pub const DRONE_LEVEL: f32 = 0.08;
pub const DRONE_CUTOFF_HZ: f32 = 220.0;
pub const DRONE_FADE_IN_SECS: f32 = 4.0;

// Cacophony: murmurs
pub const MURMUR_CAP: usize = 10;
pub const MURMUR_MIN_HZ: f32 = 90.0;
pub const MURMUR_MAX_HZ: f32 = 260.0;
pub const MURMUR_FORMANT_MIN_HZ: f32 = 500.0;
pub const MURMUR_FORMANT_MAX_HZ: f32 = 1400.0;
pub const MURMUR_FORMANT_Q: f32 = 8.0;
pub const MURMUR_WOBBLE_MIN_HZ: f32 = 0.2;
pub const MURMUR_WOBBLE_MAX_HZ: f32 = 1.5;
pub const MURMUR_WOBBLE_DEPTH_HZ: f32 = 300.0;
pub const MURMUR_LEVEL: f32 = 0.05;
pub const MURMUR_MAX_ONSET_SECS: f32 = 2.0;
pub const MURMUR_FADE_IN_SECS: f32 = 1.5;

// Cacophony: noise bed
pub const NOISE_SECS: f32 = 2.0; // looping buffer length
pub const NOISE_LEVEL_BASE: f32 = 0.015;
pub const NOISE_LEVEL_PER_ENTITY: f32 = 0.003;
pub const NOISE_LEVEL_MAX: f32 = 0.07;
pub const NOISE_CUTOFF_HZ: f32 = 1800.0;
pub const NOISE_FADE_IN_SECS: f32 = 3.0;

// Cacophony: narration
pub const NARRATION_BASE_INTERVAL_MS: u32 = 4000;
pub const NARRATION_INTERVAL_STEP_MS: u32 = 150; // subtracted per entity
pub const NARRATION_MIN_INTERVAL_MS: u32 = 1100;
pub const NARRATION_MIN_FRAGMENT_CHARS: usize = 5;
pub const NARRATION_MIN_VOLUME: f32 = 0.15;
pub const NARRATION_PITCH_RANGE: (f32, f32) = (0.6, 1.4);
pub const NARRATION_RATE_RANGE: (f32, f32) = (0.8, 1.3);

// Melody
pub const MELODY_ROOT_MIDI: i32 = 57; // A3
pub const MELODY_ATTACK_SECS: f32 = 0.01;
pub const MELODY_DECAY_MIN_SECS: f32 = 0.5;
pub const MELODY_DECAY_SPAN_SECS: f32 = 2.0; // decay = min + span * activity
pub const MELODY_PEAK_BASE: f32 = 0.06;
pub const MELODY_PEAK_PROXIMITY: f32 = 0.24;
pub const MELODY_CUTOFF_MIN_HZ: f32 = 600.0;
pub const MELODY_CUTOFF_SPAN_HZ: f32 = 3400.0;
pub const MELODY_Q_MIN: f32 = 1.0;
pub const MELODY_Q_SPAN: f32 = 9.0;
pub const MELODY_ECHO_SECS: f32 = 0.4;
pub const MELODY_ECHO_FEEDBACK: f32 = 0.35;
pub const MELODY_ECHO_WET: f32 = 0.3;
pub const MELODY_ECHO_TAIL_SECS: f32 = 1.6; // kept alive after the note so the echo rings out
pub const MELODY_STEP_MAX_MS: f32 = 1800.0; // at activity 0
pub const MELODY_STEP_ACTIVITY_MS: f32 = 1200.0; // removed at activity 1
pub const MELODY_STEP_JITTER: f32 = 0.3; // +/- fraction
pub const MELODY_MIN_STEP_MS: u32 = 300;

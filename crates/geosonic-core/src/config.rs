use crate::constants::*;
use crate::voice::VoiceTiming;
use serde::Deserialize;

/// Runtime knobs for the engine.
///
/// Every field has a default, so the host may pass a partial object (or
/// nothing). Out-of-range values are pulled back by [`SonifyConfig::sanitized`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SonifyConfig {
    /// Upper bound on ambient cluster voices.
    pub ambient_voice_cap: usize,
    /// Upper bound on cacophony murmurs.
    pub murmur_cap: usize,
    pub master_gain: f32,
    pub release_secs: f32,
    pub pan_smoothing_secs: f32,
    /// Speak fragments in cacophony mode.
    pub narration: bool,
    pub narration_base_interval_ms: u32,
    pub narration_min_interval_ms: u32,
    /// Route melody notes through the echo line.
    pub melody_echo: bool,
    pub melody_min_step_ms: u32,
}

impl Default for SonifyConfig {
    fn default() -> Self {
        Self {
            ambient_voice_cap: AMBIENT_VOICE_CAP,
            murmur_cap: MURMUR_CAP,
            master_gain: MASTER_GAIN,
            release_secs: RELEASE_SECS,
            pan_smoothing_secs: PAN_SMOOTHING_SECS,
            narration: true,
            narration_base_interval_ms: NARRATION_BASE_INTERVAL_MS,
            narration_min_interval_ms: NARRATION_MIN_INTERVAL_MS,
            melody_echo: true,
            melody_min_step_ms: MELODY_MIN_STEP_MS,
        }
    }
}

impl SonifyConfig {
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !self.master_gain.is_finite() {
            self.master_gain = d.master_gain;
        }
        self.master_gain = self.master_gain.clamp(0.0, 1.0);
        if !(self.release_secs.is_finite() && self.release_secs > 0.0) {
            self.release_secs = d.release_secs;
        }
        self.release_secs = self.release_secs.clamp(0.05, 1.0);
        if !(self.pan_smoothing_secs.is_finite() && self.pan_smoothing_secs > 0.0) {
            self.pan_smoothing_secs = d.pan_smoothing_secs;
        }
        self.narration_min_interval_ms = self.narration_min_interval_ms.max(250);
        self.narration_base_interval_ms = self
            .narration_base_interval_ms
            .max(self.narration_min_interval_ms);
        self.melody_min_step_ms = self.melody_min_step_ms.max(50);
        self
    }

    pub fn timing(&self) -> VoiceTiming {
        VoiceTiming {
            release_secs: self.release_secs,
            pan_smoothing_secs: self.pan_smoothing_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_repairs_nonsense() {
        let c = SonifyConfig {
            master_gain: f32::NAN,
            release_secs: -1.0,
            pan_smoothing_secs: 0.0,
            narration_min_interval_ms: 0,
            narration_base_interval_ms: 10,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(c.master_gain, MASTER_GAIN);
        assert_eq!(c.release_secs, RELEASE_SECS);
        assert_eq!(c.pan_smoothing_secs, PAN_SMOOTHING_SECS);
        assert_eq!(c.narration_min_interval_ms, 250);
        assert_eq!(c.narration_base_interval_ms, 250);
    }

    #[test]
    fn default_survives_sanitizing() {
        assert_eq!(SonifyConfig::default().sanitized(), SonifyConfig::default());
    }
}

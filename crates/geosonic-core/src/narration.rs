//! Spoken fragments for cacophony mode.

use crate::constants::*;
use crate::entity::Entity;
use rand::Rng;

/// One request to the speech backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
}

/// Fire-and-forget speech output.
pub trait Narrator {
    fn speak(&mut self, utterance: Utterance);
    /// Drop anything queued or currently speaking.
    fn cancel(&mut self);
}

/// Narrator that says nothing, for hosts without speech synthesis.
#[derive(Debug, Default)]
pub struct Silent;

impl Narrator for Silent {
    fn speak(&mut self, _utterance: Utterance) {}
    fn cancel(&mut self) {}
}

/// Sentence-like fragments of `text` with at least the minimum length.
pub fn fragments(text: &str) -> Vec<&str> {
    text.split(&['.', '!', '?', ';', '\n'][..])
        .map(str::trim)
        .filter(|f| f.chars().count() >= NARRATION_MIN_FRAGMENT_CHARS)
        .collect()
}

/// A random fragment of the entity's extract, or its title when the extract
/// has nothing usable. `None` only when both are empty.
pub fn pick_fragment(entity: &Entity, rng: &mut impl Rng) -> Option<String> {
    let candidates = entity.extract.as_deref().map(fragments).unwrap_or_default();
    if !candidates.is_empty() {
        return Some(candidates[rng.gen_range(0..candidates.len())].to_string());
    }
    let title = entity.title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Closer entities speak louder, never fully silent.
#[inline]
pub fn narration_volume(proximity: f32) -> f32 {
    proximity.clamp(NARRATION_MIN_VOLUME, 1.0)
}

/// Interval between spoken fragments: shorter as the crowd grows, floored.
#[inline]
pub fn narration_interval_ms(entity_count: usize, base_ms: u32, min_ms: u32) -> u32 {
    let shrink = (entity_count as u32).saturating_mul(NARRATION_INTERVAL_STEP_MS);
    base_ms.saturating_sub(shrink).max(min_ms)
}

/// Build an utterance for `entity` with randomized delivery.
pub fn utterance_for(entity: &Entity, radius: f32, rng: &mut impl Rng) -> Option<Utterance> {
    let text = pick_fragment(entity, rng)?;
    let (pitch_lo, pitch_hi) = NARRATION_PITCH_RANGE;
    let (rate_lo, rate_hi) = NARRATION_RATE_RANGE;
    Some(Utterance {
        text,
        pitch: rng.gen_range(pitch_lo..pitch_hi),
        rate: rng.gen_range(rate_lo..rate_hi),
        volume: narration_volume(entity.proximity(radius)),
    })
}

use fnv::FnvHasher;
use std::hash::{Hash, Hasher};

/// Natural minor scale used by melody mode (relative semitone degrees).
pub const AEOLIAN: &[i32] = &[0, 2, 3, 5, 7, 8, 10];

/// Major pentatonic used for ambient cluster roots.
pub const MAJOR_PENTATONIC: &[i32] = &[0, 2, 4, 7, 9, 12];

pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * (2.0_f32).powf((midi - 69.0) / 12.0)
}

/// Stable hash of an entity id. FNV has no per-process keys, so the same id
/// lands on the same degree for the whole session (and across sessions).
pub fn entity_hash(id: i64) -> u64 {
    let mut h = FnvHasher::default();
    id.hash(&mut h);
    h.finish()
}

/// Map an entity id onto one degree of `scale`.
pub fn scale_degree(id: i64, scale: &[i32]) -> i32 {
    if scale.is_empty() {
        return 0;
    }
    scale[(entity_hash(id) % scale.len() as u64) as usize]
}

/// Frequency of the scale degree an entity maps to, above `root_midi`.
pub fn entity_pitch_hz(id: i64, scale: &[i32], root_midi: i32) -> f32 {
    midi_to_hz((root_midi + scale_degree(id, scale)) as f32)
}

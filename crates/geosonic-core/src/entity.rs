//! Entities handed to the engine and the shared scalar mappings every mode
//! derives from them.
//!
//! The engine never fetches or geolocates anything itself: distance and
//! bearing arrive precomputed from the host. Malformed numeric fields are
//! tolerated here so that voice construction never has to fail on them.

use crate::constants::ACTIVITY_LOG_DIVISOR;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// A geotagged point of interest relative to the listener.
///
/// Fields:
/// - `id`: stable identifier (drives melody pitch selection)
/// - `title`: display title, also the narration fallback
/// - `distance`: great-circle distance from the listener in meters; NaN when
///   the host sent none, which maps to zero proximity
/// - `bearing`: initial great-circle bearing in degrees, `None` when unknown
/// - `activity`: raw edit/interaction count
/// - `extract`: optional summary text used for narration
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawEntity")]
pub struct Entity {
    pub id: i64,
    pub title: String,
    pub distance: f32,
    pub bearing: Option<f32>,
    pub activity: u64,
    pub extract: Option<String>,
}

/// Largest magnitude a JavaScript number holds as an exact integer.
const MAX_SAFE_ID: f64 = 9_007_199_254_740_991.0;

/// Whatever a host put in a field: a number, a string, or anything else.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

impl Loose {
    fn number(&self) -> Option<f64> {
        let n = match self {
            Loose::Number(n) => Some(*n),
            Loose::Text(s) => s.trim().parse::<f64>().ok(),
            Loose::Other(_) => None,
        };
        n.filter(|n| n.is_finite())
    }

    fn text(self) -> Option<String> {
        match self {
            Loose::Text(s) => Some(s),
            Loose::Number(n) if n.is_finite() => Some(n.to_string()),
            _ => None,
        }
    }
}

/// An entity record before validation; every field may be absent or junk.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEntity {
    id: Option<Loose>,
    title: Option<Loose>,
    distance: Option<Loose>,
    bearing: Option<Loose>,
    activity: Option<Loose>,
    extract: Option<Loose>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entity has no usable id")]
pub struct MissingIdError;

impl TryFrom<RawEntity> for Entity {
    type Error = MissingIdError;

    fn try_from(raw: RawEntity) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .as_ref()
            .and_then(Loose::number)
            .map(f64::round)
            .filter(|n| n.abs() <= MAX_SAFE_ID)
            .ok_or(MissingIdError)?;
        Ok(Entity {
            id: id as i64,
            title: raw.title.and_then(Loose::text).unwrap_or_default(),
            distance: raw
                .distance
                .as_ref()
                .and_then(Loose::number)
                .map_or(f32::NAN, |d| d as f32),
            bearing: raw.bearing.as_ref().and_then(Loose::number).map(|b| b as f32),
            // counts arrive as floats from some hosts
            activity: raw
                .activity
                .as_ref()
                .and_then(Loose::number)
                .map_or(0, |a| a.max(0.0).round() as u64),
            extract: raw
                .extract
                .and_then(Loose::text)
                .filter(|t| !t.trim().is_empty()),
        })
    }
}

/// One element of a host batch: an object, or something that is not.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Slot {
    Record(RawEntity),
    Junk(IgnoredAny),
}

/// A host-supplied entity array. Elements that are not objects or carry no
/// usable id are dropped with a warning; the rest survive.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct EntityBatch(Vec<Slot>);

impl EntityBatch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_entities(self) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(self.0.len());
        for (i, slot) in self.0.into_iter().enumerate() {
            match slot {
                Slot::Record(raw) => match Entity::try_from(raw) {
                    Ok(e) => entities.push(e),
                    Err(e) => log::warn!("[entity] skipping entry {}: {}", i, e),
                },
                Slot::Junk(_) => log::warn!("[entity] skipping entry {}: not an object", i),
            }
        }
        entities
    }
}

impl Entity {
    pub fn proximity(&self, radius: f32) -> f32 {
        proximity(self.distance, radius)
    }

    pub fn activity_score(&self) -> f32 {
        activity_score(self.activity)
    }

    /// Bearing if present and finite; anything else pans to centre.
    pub fn usable_bearing(&self) -> Option<f32> {
        self.bearing.filter(|b| b.is_finite())
    }
}

/// Generation strategy selected by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ambient,
    Cacophony,
    Melody,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Ambient => "ambient",
            Mode::Cacophony => "cacophony",
            Mode::Melody => "melody",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode {0:?} (expected ambient, cacophony or melody)")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ambient" => Ok(Mode::Ambient),
            "cacophony" => Ok(Mode::Cacophony),
            "melody" => Ok(Mode::Melody),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// `clamp(1 - distance / radius, 0, 1)`: 1 at the listener, 0 at the edge.
#[inline]
pub fn proximity(distance: f32, radius: f32) -> f32 {
    if !distance.is_finite() || !(radius > 0.0) || !radius.is_finite() {
        return 0.0;
    }
    (1.0 - distance.max(0.0) / radius).clamp(0.0, 1.0)
}

/// `clamp(log10(activity + 1) / 4, 0, 1)`.
#[inline]
pub fn activity_score(activity: u64) -> f32 {
    (((activity as f64) + 1.0).log10() as f32 / ACTIVITY_LOG_DIVISOR).clamp(0.0, 1.0)
}

/// Wrap any angle into [0, 360).
#[inline]
pub fn normalize_degrees(deg: f32) -> f32 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

/// Stereo position for a source at `bearing` while facing `heading`:
/// `sin(radians(normalize(bearing - heading)))`. Missing bearing or a
/// non-finite heading pans to centre.
#[inline]
pub fn pan_for(bearing: Option<f32>, heading: f32) -> f32 {
    match bearing {
        Some(b) if b.is_finite() && heading.is_finite() => {
            let rel = normalize_degrees(b - heading);
            rel.to_radians().sin().clamp(-1.0, 1.0)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proximity_bounds() {
        assert_eq!(proximity(0.0, 1000.0), 1.0);
        assert_eq!(proximity(1000.0, 1000.0), 0.0);
        assert_eq!(proximity(5000.0, 1000.0), 0.0);
        assert!((proximity(250.0, 1000.0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn proximity_degrades_on_bad_input() {
        assert_eq!(proximity(f32::NAN, 1000.0), 0.0);
        assert_eq!(proximity(10.0, 0.0), 0.0);
        assert_eq!(proximity(10.0, -5.0), 0.0);
    }

    #[test]
    fn pan_is_right_for_east_and_left_for_west() {
        assert!((pan_for(Some(90.0), 0.0) - 1.0).abs() < 1e-6);
        assert!((pan_for(Some(270.0), 0.0) + 1.0).abs() < 1e-6);
        assert!(pan_for(Some(0.0), 0.0).abs() < 1e-6);
        // facing east, an eastern source is dead ahead
        assert!(pan_for(Some(90.0), 90.0).abs() < 1e-6);
    }

    #[test]
    fn missing_bearing_pans_centre() {
        assert_eq!(pan_for(None, 123.0), 0.0);
        assert_eq!(pan_for(Some(f32::NAN), 0.0), 0.0);
    }

    #[test]
    fn proximity_falls_with_distance() {
        let radius = 750.0;
        let mut last = proximity(0.0, radius);
        let mut d = 0.0;
        while d <= 1000.0 {
            let p = proximity(d, radius);
            assert!(p <= last, "{d}m: {p} > {last}");
            last = p;
            d += 12.5;
        }
        assert!(proximity(100.0, radius) > proximity(200.0, radius));
        assert_eq!(proximity(-5.0, radius), 1.0);
    }

    #[test]
    fn activity_score_spans_zero_to_one() {
        assert_eq!(activity_score(0), 0.0);
        assert!((activity_score(10_000) - 1.0).abs() < 1e-4);
        assert_eq!(activity_score(u64::MAX), 1.0);
    }

    #[test]
    fn activity_score_never_decreases() {
        let mut last = activity_score(0);
        for a in (1..20_000u64).step_by(7).chain([50_000, 1_000_000]) {
            let s = activity_score(a);
            assert!(s >= last, "{a}: {s} < {last}");
            last = s;
        }
        assert!(activity_score(10) < activity_score(100));
        assert!(activity_score(100) < activity_score(1000));
    }

    fn batch(json: &str) -> Vec<Entity> {
        serde_json::from_str::<EntityBatch>(json).unwrap().into_entities()
    }

    #[test]
    fn fractional_activity_is_rounded() {
        let e = batch(r#"[{"id": 1, "distance": 10, "activity": 3.5}]"#);
        assert_eq!(e[0].activity, 4);
        let e = batch(r#"[{"id": 2, "distance": 10, "activity": -7}]"#);
        assert_eq!(e[0].activity, 0);
    }

    #[test]
    fn entries_without_an_id_are_dropped_alone() {
        let e = batch(
            r#"[
                {"title": "nameless", "distance": 5},
                {"id": 7, "title": "kept", "distance": 5},
                42,
                null,
                {"id": "x", "distance": 5}
            ]"#,
        );
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].id, 7);
        assert_eq!(e[0].title, "kept");
    }

    #[test]
    fn missing_distance_is_out_of_range() {
        let e = batch(r#"[{"id": 3, "title": "somewhere"}]"#);
        assert!(e[0].distance.is_nan());
        assert_eq!(e[0].proximity(1000.0), 0.0);
    }

    #[test]
    fn loose_fields_are_coerced() {
        let e = batch(
            r#"[{"id": 12.0, "title": 99, "distance": "250", "bearing": "east",
                 "activity": "15", "extract": "  "}]"#,
        );
        assert_eq!(
            e[0],
            Entity {
                id: 12,
                title: "99".into(),
                distance: 250.0,
                bearing: None,
                activity: 15,
                extract: None,
            }
        );
    }

    #[test]
    fn lone_entity_still_needs_an_id() {
        assert!(serde_json::from_str::<Entity>(r#"{"title": "x"}"#).is_err());
        let e: Entity = serde_json::from_str(r#"{"id": -4, "bearing": 90}"#).unwrap();
        assert_eq!((e.id, e.bearing), (-4, Some(90.0)));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Melody".parse::<Mode>(), Ok(Mode::Melody));
        assert_eq!(" AMBIENT ".parse::<Mode>(), Ok(Mode::Ambient));
        assert!("radar".parse::<Mode>().is_err());
    }
}

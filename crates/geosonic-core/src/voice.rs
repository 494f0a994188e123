//! Voices: bounded-lifetime sound objects built from primitives.
//!
//! Each strategy wires its own topology, so voices are trait objects with a
//! shared capability set rather than one struct. All of them end in a single
//! output [`Envelope`]; stopping releases that envelope and halts the
//! generators once the release window has passed.

use crate::constants::*;
use crate::entity::Entity;
use crate::graph::{AudioGraph, FilterKind, GraphResult, NodeId, Param, Waveform};
use crate::pitch::{entity_pitch_hz, AEOLIAN, MAJOR_PENTATONIC};
use crate::primitives::{Envelope, NodeSet, NoiseSource, Panner, Tone, Wiring};
use rand::Rng;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceKind {
    AmbientCluster,
    Drone,
    Murmur,
    NoiseBed,
    MelodicNote,
}

/// Snapshot of a live voice, for hosts and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceInfo {
    pub kind: VoiceKind,
    pub entity_id: Option<i64>,
    /// Current pan target; `None` for non-directional layers.
    pub pan: Option<f32>,
}

pub trait Voice {
    fn info(&self) -> VoiceInfo;
    /// Begin a click-free release; generators halt after the release window.
    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()>;
    /// Sever every connection this voice owns. Safe after `stop` or alone.
    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()>;
    /// Recompute stereo position for a new heading.
    fn repan(&mut self, graph: &mut dyn AudioGraph, heading: f32);
    /// Self-terminating voices report true once their sound has ended.
    fn finished(&self, _now: f64) -> bool {
        false
    }
}

/// Timing knobs every voice shares.
#[derive(Clone, Copy, Debug)]
pub struct VoiceTiming {
    pub release_secs: f32,
    pub pan_smoothing_secs: f32,
}

impl Default for VoiceTiming {
    fn default() -> Self {
        Self {
            release_secs: RELEASE_SECS,
            pan_smoothing_secs: PAN_SMOOTHING_SECS,
        }
    }
}

/// Parts every voice carries: owned nodes, output stage and generators.
struct Body {
    nodes: NodeSet,
    out: Envelope,
    tones: SmallVec<[Tone; 8]>,
    noise: Option<NoiseSource>,
    release: f32,
    stopped: bool,
}

impl Body {
    fn stop(&mut self, graph: &mut dyn AudioGraph) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let end = self.out.release(graph, self.release);
        for t in &self.tones {
            t.stop(graph, end);
        }
        if let Some(n) = &self.noise {
            n.stop(graph, end);
        }
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.nodes.disconnect_all(graph)
    }
}

/// Build with a [`Wiring`], severing partial work on failure.
fn wire<T>(
    graph: &mut dyn AudioGraph,
    f: impl FnOnce(&mut Wiring<'_>) -> GraphResult<T>,
) -> GraphResult<(T, NodeSet)> {
    let mut w = Wiring::new(graph);
    match f(&mut w) {
        Ok(parts) => Ok((parts, w.finish())),
        Err(e) => {
            w.abandon();
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Ambient cluster

/// `k1 * proximity * (a + b * activity)`.
#[inline]
pub fn ambient_level(proximity: f32, activity: f32) -> f32 {
    AMBIENT_LEVEL * proximity * (AMBIENT_LEVEL_BASE + AMBIENT_LEVEL_ACTIVITY * activity)
}

/// One to four partials, growing with activity.
#[inline]
pub fn ambient_partials(activity: f32) -> usize {
    (1 + (activity.clamp(0.0, 1.0) * (AMBIENT_MAX_PARTIALS - 1) as f32).round() as usize)
        .min(AMBIENT_MAX_PARTIALS)
}

/// Sustained harmonic cluster with independently breathing partials.
pub struct AmbientCluster {
    entity_id: i64,
    body: Body,
    panner: Panner,
}

impl AmbientCluster {
    pub fn build(
        graph: &mut dyn AudioGraph,
        output: NodeId,
        entity: &Entity,
        radius: f32,
        heading: f32,
        timing: VoiceTiming,
        rng: &mut impl Rng,
    ) -> GraphResult<Self> {
        let proximity = entity.proximity(radius);
        let activity = entity.activity_score();
        let level = ambient_level(proximity, activity);
        let partials = ambient_partials(activity);
        let root = entity_pitch_hz(entity.id, MAJOR_PENTATONIC, AMBIENT_ROOT_MIDI);

        let ((out, panner, tones), nodes) = wire(graph, |w| {
            let out = w.envelope(0.0)?;
            let panner = w.panner(entity.usable_bearing(), heading, timing.pan_smoothing_secs)?;
            w.connect(out.node(), panner.node())?;
            w.connect(panner.node(), output)?;

            let now = w.now();
            let mut tones: SmallVec<[Tone; 8]> = SmallVec::new();
            for k in 0..partials {
                let harmonic = (k + 1) as f32;
                let partial_level = 1.0 / harmonic / partials as f32;
                let tone = w.tone(Waveform::Sine, root * harmonic)?;
                let partial = w.envelope(partial_level * (1.0 - AMBIENT_BREATH_DEPTH * 0.5))?;
                let rate = rng.gen_range(AMBIENT_BREATH_MIN_HZ..AMBIENT_BREATH_MAX_HZ);
                let breath = w.lfo(
                    rate,
                    partial_level * AMBIENT_BREATH_DEPTH * 0.5,
                    partial.node(),
                    Param::Gain,
                )?;
                w.connect(tone.node(), partial.node())?;
                w.connect(partial.node(), out.node())?;
                tone.start(w.graph(), now)?;
                breath.start(w.graph(), now)?;
                tones.push(tone);
                tones.push(breath.tone());
            }
            out.fade_in(w.graph(), level, now, AMBIENT_FADE_IN_SECS)?;
            Ok((out, panner, tones))
        })?;

        Ok(Self {
            entity_id: entity.id,
            body: Body {
                nodes,
                out,
                tones,
                noise: None,
                release: timing.release_secs,
                stopped: false,
            },
            panner,
        })
    }
}

impl Voice for AmbientCluster {
    fn info(&self) -> VoiceInfo {
        VoiceInfo {
            kind: VoiceKind::AmbientCluster,
            entity_id: Some(self.entity_id),
            pan: Some(self.panner.pan()),
        }
    }

    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.stop(graph);
        Ok(())
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.dispose(graph)
    }

    fn repan(&mut self, graph: &mut dyn AudioGraph, heading: f32) {
        self.panner.repan(graph, heading);
    }
}

// ---------------------------------------------------------------------------
// Cacophony layers

/// Fixed low drone behind a lowpass that opens during the fade-in.
pub struct Drone {
    body: Body,
}

impl Drone {
    pub fn build(graph: &mut dyn AudioGraph, output: NodeId, timing: VoiceTiming) -> GraphResult<Self> {
        let ((out, tone), nodes) = wire(graph, |w| {
            let tone = w.tone(Waveform::Saw, DRONE_HZ)?;
            let filter = w.filter(FilterKind::Lowpass, DRONE_CUTOFF_HZ * 0.3, 0.7)?;
            let out = w.envelope(0.0)?;
            w.connect(tone.node(), filter.node())?;
            w.connect(filter.node(), out.node())?;
            w.connect(out.node(), output)?;

            let now = w.now();
            let opened = now + DRONE_FADE_IN_SECS as f64;
            let g = w.graph();
            g.set_value_at(filter.node(), Param::Frequency, DRONE_CUTOFF_HZ * 0.3, now)?;
            g.linear_ramp(filter.node(), Param::Frequency, DRONE_CUTOFF_HZ, opened)?;
            tone.start(g, now)?;
            out.fade_in(g, DRONE_LEVEL, now, DRONE_FADE_IN_SECS)?;
            Ok((out, tone))
        })?;
        Ok(Self {
            body: Body {
                nodes,
                out,
                tones: SmallVec::from_slice(&[tone]),
                noise: None,
                release: timing.release_secs,
                stopped: false,
            },
        })
    }
}

impl Voice for Drone {
    fn info(&self) -> VoiceInfo {
        VoiceInfo {
            kind: VoiceKind::Drone,
            entity_id: None,
            pan: None,
        }
    }

    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.stop(graph);
        Ok(())
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.dispose(graph)
    }

    fn repan(&mut self, _graph: &mut dyn AudioGraph, _heading: f32) {}
}

/// Murmur level: quiet at the edge of the radius, fuller up close.
#[inline]
pub fn murmur_level(proximity: f32) -> f32 {
    MURMUR_LEVEL * (0.3 + 0.7 * proximity.clamp(0.0, 1.0))
}

/// Buzzing tone through a wobbling band-pass, panned to one entity.
pub struct Murmur {
    entity_id: i64,
    body: Body,
    panner: Panner,
}

impl Murmur {
    pub fn build(
        graph: &mut dyn AudioGraph,
        output: NodeId,
        entity: &Entity,
        radius: f32,
        heading: f32,
        timing: VoiceTiming,
        rng: &mut impl Rng,
    ) -> GraphResult<Self> {
        let level = murmur_level(entity.proximity(radius));
        let pitch = rng.gen_range(MURMUR_MIN_HZ..MURMUR_MAX_HZ);
        let formant = rng.gen_range(MURMUR_FORMANT_MIN_HZ..MURMUR_FORMANT_MAX_HZ);
        let wobble = rng.gen_range(MURMUR_WOBBLE_MIN_HZ..MURMUR_WOBBLE_MAX_HZ);
        let onset = rng.gen_range(0.0..MURMUR_MAX_ONSET_SECS) as f64;

        let ((out, panner, tones), nodes) = wire(graph, |w| {
            let tone = w.tone(Waveform::Saw, pitch)?;
            let band = w.filter(FilterKind::Bandpass, formant, MURMUR_FORMANT_Q)?;
            let wobbler = w.lfo(wobble, MURMUR_WOBBLE_DEPTH_HZ, band.node(), Param::Frequency)?;
            let out = w.envelope(0.0)?;
            let panner = w.panner(entity.usable_bearing(), heading, timing.pan_smoothing_secs)?;
            w.connect(tone.node(), band.node())?;
            w.connect(band.node(), out.node())?;
            w.connect(out.node(), panner.node())?;
            w.connect(panner.node(), output)?;

            let now = w.now();
            tone.start(w.graph(), now)?;
            wobbler.start(w.graph(), now)?;
            out.fade_in(w.graph(), level, now + onset, MURMUR_FADE_IN_SECS)?;
            let tones: SmallVec<[Tone; 8]> = SmallVec::from_slice(&[tone, wobbler.tone()]);
            Ok((out, panner, tones))
        })?;

        Ok(Self {
            entity_id: entity.id,
            body: Body {
                nodes,
                out,
                tones,
                noise: None,
                release: timing.release_secs,
                stopped: false,
            },
            panner,
        })
    }
}

impl Voice for Murmur {
    fn info(&self) -> VoiceInfo {
        VoiceInfo {
            kind: VoiceKind::Murmur,
            entity_id: Some(self.entity_id),
            pan: Some(self.panner.pan()),
        }
    }

    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.stop(graph);
        Ok(())
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.dispose(graph)
    }

    fn repan(&mut self, graph: &mut dyn AudioGraph, heading: f32) {
        self.panner.repan(graph, heading);
    }
}

/// Noise bed level, growing with the number of entities up to a cap.
#[inline]
pub fn noise_level(entity_count: usize) -> f32 {
    (NOISE_LEVEL_BASE + NOISE_LEVEL_PER_ENTITY * entity_count as f32).min(NOISE_LEVEL_MAX)
}

/// Looping filtered noise floor.
pub struct NoiseBed {
    body: Body,
}

impl NoiseBed {
    pub fn build(
        graph: &mut dyn AudioGraph,
        output: NodeId,
        entity_count: usize,
        timing: VoiceTiming,
    ) -> GraphResult<Self> {
        let level = noise_level(entity_count);
        let ((out, noise), nodes) = wire(graph, |w| {
            let noise = w.noise(NOISE_SECS)?;
            let filter = w.filter(FilterKind::Lowpass, NOISE_CUTOFF_HZ, 0.5)?;
            let out = w.envelope(0.0)?;
            w.connect(noise.node(), filter.node())?;
            w.connect(filter.node(), out.node())?;
            w.connect(out.node(), output)?;
            let now = w.now();
            noise.start(w.graph(), now)?;
            out.fade_in(w.graph(), level, now, NOISE_FADE_IN_SECS)?;
            Ok((out, noise))
        })?;
        Ok(Self {
            body: Body {
                nodes,
                out,
                tones: SmallVec::new(),
                noise: Some(noise),
                release: timing.release_secs,
                stopped: false,
            },
        })
    }
}

impl Voice for NoiseBed {
    fn info(&self) -> VoiceInfo {
        VoiceInfo {
            kind: VoiceKind::NoiseBed,
            entity_id: None,
            pan: None,
        }
    }

    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.stop(graph);
        Ok(())
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.dispose(graph)
    }

    fn repan(&mut self, _graph: &mut dyn AudioGraph, _heading: f32) {}
}

// ---------------------------------------------------------------------------
// Melodic note

/// Timbre tier: mellow sine for quiet entities, brighter as activity rises.
#[inline]
pub fn melody_waveform(activity: f32) -> Waveform {
    if activity < 0.35 {
        Waveform::Sine
    } else if activity < 0.7 {
        Waveform::Triangle
    } else {
        Waveform::Saw
    }
}

/// Decay length of a melodic note: 0.5s at activity 0 up to 2.5s.
#[inline]
pub fn melody_decay_secs(activity: f32) -> f32 {
    MELODY_DECAY_MIN_SECS + MELODY_DECAY_SPAN_SECS * activity.clamp(0.0, 1.0)
}

/// One percussive note that stops itself when its envelope ends.
pub struct MelodicNote {
    entity_id: i64,
    body: Body,
    panner: Panner,
    ends_at: f64,
}

impl MelodicNote {
    pub fn build(
        graph: &mut dyn AudioGraph,
        output: NodeId,
        entity: &Entity,
        radius: f32,
        heading: f32,
        echo: bool,
        timing: VoiceTiming,
    ) -> GraphResult<Self> {
        let proximity = entity.proximity(radius);
        let activity = entity.activity_score();
        let pitch = entity_pitch_hz(entity.id, AEOLIAN, MELODY_ROOT_MIDI);
        let cutoff = MELODY_CUTOFF_MIN_HZ + MELODY_CUTOFF_SPAN_HZ * activity;
        let q = MELODY_Q_MIN + MELODY_Q_SPAN * activity;
        let peak = MELODY_PEAK_BASE + MELODY_PEAK_PROXIMITY * proximity;
        let decay = melody_decay_secs(activity);

        let ((out, panner, tone, ends_at), nodes) = wire(graph, |w| {
            let tone = w.tone(melody_waveform(activity), pitch)?;
            let filter = w.filter(FilterKind::Lowpass, cutoff, q)?;
            let out = w.envelope(0.0)?;
            let panner = w.panner(entity.usable_bearing(), heading, timing.pan_smoothing_secs)?;
            w.connect(tone.node(), filter.node())?;
            w.connect(filter.node(), out.node())?;
            w.connect(out.node(), panner.node())?;
            w.connect(panner.node(), output)?;
            let mut tail = 0.05;
            if echo {
                let line = w.echo(MELODY_ECHO_SECS, MELODY_ECHO_FEEDBACK, MELODY_ECHO_WET, output)?;
                w.connect(panner.node(), line.input())?;
                tail = MELODY_ECHO_TAIL_SECS as f64;
            }

            let now = w.now();
            tone.start(w.graph(), now)?;
            let end = out.percussive(w.graph(), peak, now, MELODY_ATTACK_SECS, decay)?;
            tone.stop(w.graph(), end + 0.05);
            Ok((out, panner, tone, end + tail))
        })?;

        Ok(Self {
            entity_id: entity.id,
            body: Body {
                nodes,
                out,
                tones: SmallVec::from_slice(&[tone]),
                noise: None,
                release: timing.release_secs,
                stopped: false,
            },
            panner,
            ends_at,
        })
    }

    pub fn ends_at(&self) -> f64 {
        self.ends_at
    }
}

impl Voice for MelodicNote {
    fn info(&self) -> VoiceInfo {
        VoiceInfo {
            kind: VoiceKind::MelodicNote,
            entity_id: Some(self.entity_id),
            pan: Some(self.panner.pan()),
        }
    }

    fn stop(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.stop(graph);
        Ok(())
    }

    fn dispose(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        self.body.dispose(graph)
    }

    fn repan(&mut self, graph: &mut dyn AudioGraph, heading: f32) {
        self.panner.repan(graph, heading);
    }

    fn finished(&self, now: f64) -> bool {
        now >= self.ends_at
    }
}

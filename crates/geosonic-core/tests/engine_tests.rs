// Host-side integration tests for the session controller.
// Everything runs against the recording graph and a virtual event loop.

use geosonic_core::testing::{ManualTimers, RecordingGraph, RecordingNarrator, Rig, VirtualClock};
use geosonic_core::{
    pan_for, AudioGraph, ContextState, Engine, EngineParts, EngineState, Entity, GraphError,
    GraphFactory, Mode, SonifyConfig, TimerId, Timers, VoiceKind,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

fn poi(id: i64, distance: f32, bearing: f32, activity: u64) -> Entity {
    Entity {
        id,
        title: format!("Place {id}"),
        distance,
        bearing: Some(bearing),
        activity,
        extract: None,
    }
}

fn spread(n: usize) -> Vec<Entity> {
    (0..n)
        .map(|i| poi(i as i64 + 1, 50.0 + 40.0 * i as f32, (i as f32 * 37.0) % 360.0, 10 * i as u64))
        .collect()
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

/// Forwards to [`ManualTimers`] but never clears anything, so every stale
/// callback still fires and only the epoch check can stop it.
struct LeakyTimers(Rc<ManualTimers>);

impl Timers for LeakyTimers {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        self.0.set_timeout(delay, callback)
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> Option<TimerId> {
        self.0.set_interval(period, callback)
    }

    fn clear(&self, _id: TimerId) {}
}

/// Drains whatever is already due each time a timeout is armed, as a host
/// might when it runs its queue from inside a call into the engine.
struct EagerTimers(Rc<ManualTimers>);

impl Timers for EagerTimers {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        self.0.advance(Duration::ZERO);
        self.0.set_timeout(delay, callback)
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> Option<TimerId> {
        self.0.set_interval(period, callback)
    }

    fn clear(&self, id: TimerId) {
        self.0.clear(id)
    }
}

fn leaky_engine(seed: u64) -> (Engine, RecordingGraph, Rc<ManualTimers>, RecordingNarrator) {
    let clock = VirtualClock::default();
    let graph = RecordingGraph::new(clock.clone());
    let timers = Rc::new(ManualTimers::new(clock));
    let narrator = RecordingNarrator::default();
    let factory_graph = graph.clone();
    let engine = Engine::new(EngineParts {
        config: SonifyConfig::default(),
        graph_factory: Box::new(move || Ok(Box::new(factory_graph.clone()) as Box<dyn AudioGraph>)),
        timers: Rc::new(LeakyTimers(timers.clone())),
        narrator: Box::new(narrator.clone()),
        rng: StdRng::seed_from_u64(seed),
    });
    (engine, graph, timers, narrator)
}

#[test]
fn empty_update_leaves_silence() {
    let rig = Rig::new(1);
    rig.engine.update(Mode::Ambient, &[], 1000.0, 0.0);
    assert_eq!(rig.engine.voice_count(), 0);
    assert_eq!(rig.engine.pending_tasks(), 0);
    assert_eq!(rig.engine.state(), EngineState::Ready);
    // only the master gain remains
    assert_eq!(rig.graph.live_nodes(), 1);
    assert_eq!(rig.graph.destination_inputs(), 1);
}

#[test]
fn every_update_is_exactly_one_generation() {
    let rig = Rig::new(2);
    let e0 = rig.engine.epoch();
    rig.engine.update(Mode::Ambient, &spread(3), 1000.0, 0.0);
    assert_eq!(rig.engine.epoch().0, e0.0 + 1);
    rig.engine.update(Mode::Melody, &[], 1000.0, 0.0);
    assert_eq!(rig.engine.epoch().0, e0.0 + 2);
    rig.engine.set_heading(120.0);
    assert_eq!(rig.engine.epoch().0, e0.0 + 2);
    rig.engine.stop_all();
    assert_eq!(rig.engine.epoch().0, e0.0 + 3);
}

#[test]
fn stop_all_empties_registry_and_releases_before_disposing() {
    let rig = Rig::new(3);
    rig.engine.update(Mode::Cacophony, &spread(6), 1000.0, 0.0);
    assert!(rig.engine.voice_count() > 0);
    let before = rig.graph.live_nodes();

    rig.engine.stop_all();
    assert_eq!(rig.engine.voice_count(), 0);
    assert_eq!(rig.engine.pending_tasks(), 0);
    assert_eq!(rig.engine.state(), EngineState::Ready);
    assert!(rig.narrator.cancels() >= 1);
    // still ringing out
    assert!(rig.engine.retiring_count() > 0);
    assert_eq!(rig.graph.live_nodes(), before);
    assert_eq!(rig.graph.running_sources(), 0);

    rig.advance_ms(250);
    assert_eq!(rig.engine.retiring_count(), 0);
    assert_eq!(rig.graph.live_nodes(), 1);
}

#[test]
fn stop_all_before_init_is_harmless() {
    let rig = Rig::new(4);
    rig.engine.stop_all();
    assert_eq!(rig.engine.state(), EngineState::Uninitialized);
    assert_eq!(rig.engine.voice_count(), 0);
}

#[test]
fn mode_switch_never_lets_old_notes_through() {
    let rig = Rig::new(5);
    let ents = vec![poi(1, 100.0, 0.0, 0), poi(2, 200.0, 90.0, 0), poi(3, 300.0, 180.0, 0)];
    rig.engine.update(Mode::Melody, &ents, 1000.0, 0.0);
    assert_eq!(rig.engine.voice_count(), 1);
    assert_eq!(rig.engine.pending_tasks(), 1);

    rig.engine.update(Mode::Ambient, &ents[..1], 500.0, 90.0);
    rig.advance_ms(10_000);
    let voices = rig.engine.voices();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].kind, VoiceKind::AmbientCluster);
    assert_eq!(rig.engine.state(), EngineState::Playing(Mode::Ambient));
}

#[test]
fn stale_callbacks_are_noops_even_when_not_cleared() {
    let (engine, _graph, timers, narrator) = leaky_engine(6);
    let ents = vec![poi(1, 100.0, 0.0, 0), poi(2, 200.0, 90.0, 0), poi(3, 300.0, 180.0, 0)];

    engine.update(Mode::Melody, &ents, 1000.0, 0.0);
    engine.update(Mode::Ambient, &ents[..1], 500.0, 90.0);
    timers.advance(Duration::from_secs(10));
    let kinds: Vec<_> = engine.voices().iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![VoiceKind::AmbientCluster]);

    engine.update(Mode::Cacophony, &ents, 1000.0, 0.0);
    engine.stop_all();
    timers.advance(Duration::from_secs(30));
    assert!(narrator.spoken().is_empty());
    assert_eq!(engine.voice_count(), 0);
}

#[test]
fn heading_change_repans_without_rebuilding() {
    let rig = Rig::new(7);
    let ents = vec![poi(1, 100.0, 90.0, 5), poi(2, 150.0, 270.0, 5), poi(3, 200.0, 0.0, 5)];
    rig.engine.update(Mode::Ambient, &ents, 1000.0, 0.0);
    let epoch = rig.engine.epoch();
    let pans: Vec<_> = rig.engine.voices().iter().map(|v| v.pan.unwrap()).collect();
    assert!(approx(pans[0], 1.0));
    assert!(approx(pans[1], -1.0));
    assert!(approx(pans[2], 0.0));

    rig.engine.set_heading(90.0);
    assert_eq!(rig.engine.voice_count(), 3);
    assert_eq!(rig.engine.epoch(), epoch);
    let voices = rig.engine.voices();
    for v in &voices {
        let e = ents.iter().find(|e| Some(e.id) == v.entity_id).unwrap();
        assert!(approx(v.pan.unwrap(), pan_for(e.bearing, 90.0)));
    }
    // the graph follows the registry
    let graph_pans = rig.graph.pans();
    assert_eq!(graph_pans.len(), 3);
    for (g, v) in graph_pans.iter().zip(&voices) {
        assert!(approx(*g, v.pan.unwrap()));
    }
}

#[test]
fn heading_is_normalized_and_garbage_ignored() {
    let rig = Rig::new(8);
    rig.engine.set_heading(450.0);
    assert!(approx(rig.engine.heading(), 90.0));
    rig.engine.set_heading(-90.0);
    assert!(approx(rig.engine.heading(), 270.0));
    rig.engine.set_heading(f32::NAN);
    assert!(approx(rig.engine.heading(), 270.0));
}

#[test]
fn cacophony_pans_murmurs_only() {
    let rig = Rig::new(9);
    let ents = spread(6);
    rig.engine.update(Mode::Cacophony, &ents, 1000.0, 10.0);
    rig.engine.set_heading(55.0);
    for v in rig.engine.voices() {
        match v.kind {
            VoiceKind::Drone | VoiceKind::NoiseBed => assert_eq!(v.pan, None),
            VoiceKind::Murmur => {
                let e = ents.iter().find(|e| Some(e.id) == v.entity_id).unwrap();
                assert!(approx(v.pan.unwrap(), pan_for(e.bearing, 55.0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn narration_follows_the_generation() {
    let rig = Rig::new(10);
    let ents: Vec<_> = (1..=4)
        .map(|i| Entity {
            extract: Some("The old mill burned down in 1901. It was rebuilt twice.".into()),
            ..poi(i, 100.0 * i as f32, 0.0, 3)
        })
        .collect();
    rig.engine.update(Mode::Cacophony, &ents, 1000.0, 0.0);
    assert_eq!(rig.engine.pending_tasks(), 1);

    // 4000 - 4 * 150
    rig.advance_ms(3399);
    assert!(rig.narrator.spoken().is_empty());
    rig.advance_ms(2);
    let spoken = rig.narrator.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(["The old mill burned down in 1901", "It was rebuilt twice"]
        .contains(&spoken[0].text.as_str()));
    assert!(spoken[0].volume >= 0.15 && spoken[0].volume <= 1.0);

    rig.engine.stop_all();
    rig.advance_ms(20_000);
    assert_eq!(rig.narrator.spoken().len(), 1);
}

#[test]
fn narration_can_be_switched_off() {
    let config = SonifyConfig {
        narration: false,
        ..Default::default()
    };
    let rig = Rig::with_config(config, 11);
    rig.engine.update(Mode::Cacophony, &spread(4), 1000.0, 0.0);
    assert_eq!(rig.engine.pending_tasks(), 0);
    rig.advance_ms(20_000);
    assert!(rig.narrator.spoken().is_empty());
}

#[test]
fn melody_walks_entities_in_order_and_wraps() {
    let rig = Rig::new(12);
    let ents = vec![poi(1, 100.0, 0.0, 0), poi(2, 200.0, 90.0, 0), poi(3, 300.0, 180.0, 0)];
    rig.engine.update(Mode::Melody, &ents, 1000.0, 0.0);

    let mut order = Vec::new();
    for _ in 0..1500 {
        let last = rig.engine.voices().last().and_then(|v| v.entity_id);
        if let Some(id) = last {
            if order.last() != Some(&id) {
                order.push(id);
            }
        }
        if order.len() >= 5 {
            break;
        }
        rig.advance_ms(10);
    }
    assert_eq!(order, vec![1, 2, 3, 1, 2]);
}

#[test]
fn finished_notes_are_reaped() {
    let rig = Rig::new(13);
    let ents = spread(5);
    rig.engine.update(Mode::Melody, &ents, 1000.0, 0.0);
    rig.advance_ms(60_000);
    assert!(rig.graph.disconnects() > 0);
    assert!(rig.engine.voice_count() <= 5, "{} live notes", rig.engine.voice_count());
    assert_eq!(rig.engine.pending_tasks(), 1);
}

#[test]
fn unavailable_output_leaves_engine_inert_until_retry() {
    let clock = VirtualClock::default();
    let graph = RecordingGraph::new(clock.clone());
    let attempts = Rc::new(Cell::new(0));
    let factory: GraphFactory = {
        let attempts = attempts.clone();
        let graph = graph.clone();
        Box::new(move || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(GraphError::Unavailable("no audio device".into()))
            } else {
                Ok(Box::new(graph.clone()) as Box<dyn AudioGraph>)
            }
        })
    };
    let engine = Engine::new(EngineParts {
        config: SonifyConfig::default(),
        graph_factory: factory,
        timers: Rc::new(ManualTimers::new(clock)),
        narrator: Box::new(RecordingNarrator::default()),
        rng: StdRng::seed_from_u64(14),
    });

    engine.update(Mode::Ambient, &spread(3), 1000.0, 0.0);
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.voice_count(), 0);
    engine.set_heading(30.0);
    engine.stop_all();

    assert!(engine.init());
    assert!(engine.init());
    assert_eq!(attempts.get(), 2);
    assert_eq!(engine.state(), EngineState::Ready);
    engine.update(Mode::Ambient, &spread(3), 1000.0, 0.0);
    assert_eq!(engine.voice_count(), 3);
}

#[test]
fn resume_wakes_a_suspended_output() {
    let clock = VirtualClock::default();
    let graph = RecordingGraph::suspended(clock.clone());
    let rig = Rig::with_graph(graph, clock, SonifyConfig::default(), 15);
    assert_eq!(rig.graph.state(), ContextState::Suspended);
    assert!(pollster::block_on(rig.engine.resume()));
    assert_eq!(rig.graph.state(), ContextState::Running);
    assert_eq!(rig.engine.state(), EngineState::Ready);
}

#[test]
fn update_requests_resume_on_its_own() {
    let clock = VirtualClock::default();
    let graph = RecordingGraph::suspended(clock.clone());
    let rig = Rig::with_graph(graph, clock, SonifyConfig::default(), 16);
    rig.engine.update(Mode::Ambient, &spread(2), 1000.0, 0.0);
    assert_eq!(rig.graph.state(), ContextState::Running);
    assert_eq!(rig.engine.voice_count(), 2);
}

#[test]
fn refused_nodes_degrade_to_fewer_voices() {
    let rig = Rig::new(17);
    assert!(rig.engine.init());
    rig.graph.refuse_after(3);
    rig.engine.update(Mode::Ambient, &spread(5), 1000.0, 0.0);
    assert_eq!(rig.engine.voice_count(), 0);
    assert_eq!(rig.engine.state(), EngineState::Playing(Mode::Ambient));
    // half-built clusters leave nothing behind
    assert_eq!(rig.graph.live_nodes(), 1);

    rig.graph.refuse_nodes(false);
    rig.engine.update(Mode::Ambient, &spread(5), 1000.0, 0.0);
    assert_eq!(rig.engine.voice_count(), 5);
}

#[test]
fn same_seed_same_sound() {
    let a = Rig::new(18);
    let b = Rig::new(18);
    for rig in [&a, &b] {
        rig.engine.update(Mode::Ambient, &spread(7), 800.0, 45.0);
    }
    assert_eq!(a.graph.live_nodes(), b.graph.live_nodes());
    assert_eq!(a.graph.pans(), b.graph.pans());
    assert_eq!(a.engine.voices(), b.engine.voices());
}

#[test]
fn cleanup_firing_while_busy_is_retried() {
    let clock = VirtualClock::default();
    let graph = RecordingGraph::new(clock.clone());
    let timers = Rc::new(ManualTimers::new(clock.clone()));
    let factory_graph = graph.clone();
    let engine = Engine::new(EngineParts {
        config: SonifyConfig::default(),
        graph_factory: Box::new(move || Ok(Box::new(factory_graph.clone()) as Box<dyn AudioGraph>)),
        timers: Rc::new(EagerTimers(timers.clone())),
        narrator: Box::new(RecordingNarrator::default()),
        rng: StdRng::seed_from_u64(19),
    });

    engine.update(Mode::Cacophony, &spread(4), 1000.0, 0.0);
    engine.stop_all();
    let first = engine.retiring_count();
    assert!(first > 0);

    // the first cleanup comes due without the loop getting a turn
    clock.advance(Duration::from_millis(300));
    engine.update(Mode::Cacophony, &spread(4), 1000.0, 0.0);
    engine.stop_all();
    // it ran mid stop_all, found the session busy and went back in the queue
    assert!(engine.retiring_count() > first);

    timers.advance(Duration::from_millis(500));
    assert_eq!(engine.retiring_count(), 0);
    assert_eq!(graph.live_nodes(), 1);
}

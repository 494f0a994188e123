// Gain automation as the output graph would see it: event order on each
// param's timeline, and the level a release starts from.

use geosonic_core::primitives::Wiring;
use geosonic_core::testing::{Automation, NodeKind, RecordingGraph, Rig, VirtualClock};
use geosonic_core::{AudioGraph, Entity, Mode, NodeId, Param};

fn busy_poi(id: i64) -> Entity {
    Entity {
        id,
        title: format!("Place {id}"),
        distance: 40.0,
        bearing: Some(30.0),
        activity: 10_000,
        extract: None,
    }
}

fn gain_levels(graph: &RecordingGraph, t: f64) -> Vec<(NodeId, f32)> {
    graph
        .nodes_of(NodeKind::Gain)
        .into_iter()
        .filter_map(|id| graph.value_at(id, Param::Gain, t).map(|v| (id, v)))
        .collect()
}

fn released(graph: &RecordingGraph, id: NodeId) -> bool {
    matches!(
        graph.automation(id, Param::Gain).last(),
        Some(Automation::Target { value, .. }) if *value == 0.0
    )
}

/// Stop everything at the current time and check that no gain moves at the
/// instant of the stop, and that released gains only fall from there.
fn assert_release_is_continuous(rig: &Rig) {
    let now = rig.clock.now();
    let release = rig.engine.config().release_secs as f64;
    let before = gain_levels(&rig.graph, now);
    assert!(before.iter().any(|&(_, v)| v > 0.01), "nothing audible: {before:?}");

    rig.engine.stop_all();

    let mut saw_release = false;
    for (id, held) in before {
        let at_stop = rig.graph.value_at(id, Param::Gain, now).unwrap();
        assert!(
            (at_stop - held).abs() < 1e-4,
            "gain {id:?} jumped from {held} to {at_stop}"
        );
        if !released(&rig.graph, id) {
            continue;
        }
        saw_release = true;
        let mut last = held;
        for step in 1..=20 {
            let v = rig.graph.value_at(id, Param::Gain, now + release * step as f64 / 20.0).unwrap();
            assert!(v <= last + 1e-6, "gain {id:?} rose to {v} during release");
            last = v;
        }
        assert!(last <= held * 0.01 + 1e-6, "gain {id:?} still at {last} of {held}");
    }
    assert!(saw_release);
}

#[test]
fn fade_in_then_percussive_timelines_keep_call_order() {
    let clock = VirtualClock::default();
    let mut graph = RecordingGraph::new(clock);
    let view = graph.clone();
    let mut w = Wiring::new(&mut graph);
    let pad = w.envelope(0.0).unwrap();
    let hit = w.envelope(0.0).unwrap();
    pad.fade_in(w.graph(), 0.6, 0.0, 2.0).unwrap();
    let end = hit.percussive(w.graph(), 0.8, 0.0, 0.01, 1.0).unwrap();
    w.finish();

    assert_eq!(
        view.automation(pad.node(), Param::Gain),
        vec![
            Automation::Set { value: 0.0, at: 0.0 },
            Automation::Set { value: 0.0, at: 0.0 },
            Automation::Linear { value: 0.6, at: 2.0 },
        ]
    );
    let events = view.automation(hit.node(), Param::Gain);
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Automation::Set { .. } => "set",
            Automation::Linear { .. } => "linear",
            Automation::Exponential { .. } => "exponential",
            Automation::Target { .. } => "target",
        })
        .collect();
    assert_eq!(kinds, vec!["set", "set", "linear", "exponential", "set"]);
    assert!(events.windows(2).all(|p| p[0].at() <= p[1].at()));
    assert_eq!(events.last().map(|e| e.at()), Some(end));

    // halfway up the fade, the top of the hit, silence after it
    assert!((view.value_at(pad.node(), Param::Gain, 1.0).unwrap() - 0.3).abs() < 1e-4);
    assert!((view.value_at(hit.node(), Param::Gain, 0.01).unwrap() - 0.8).abs() < 1e-4);
    assert_eq!(view.value_at(hit.node(), Param::Gain, end + 0.1), Some(0.0));
}

#[test]
fn release_holds_the_level_reached_mid_fade() {
    let clock = VirtualClock::default();
    let mut graph = RecordingGraph::new(clock.clone());
    let view = graph.clone();
    let mut w = Wiring::new(&mut graph);
    let env = w.envelope(0.0).unwrap();
    env.fade_in(w.graph(), 0.8, 0.0, 2.0).unwrap();
    w.finish();

    clock.set(0.5);
    let level = view.value_at(env.node(), Param::Gain, 0.5).unwrap();
    assert!((level - 0.2).abs() < 1e-4);

    let halt = env.release(&mut graph, 0.2);
    assert!((halt - 0.7).abs() < 1e-6);
    let events = view.automation(env.node(), Param::Gain);
    // the unfinished ramp is gone; hold first, then the decay
    assert!(!events.iter().any(|e| matches!(e, Automation::Linear { .. })));
    let tail = &events[events.len() - 2..];
    assert_eq!(tail[0], Automation::Set { value: level, at: 0.5 });
    assert_eq!(
        tail[1],
        Automation::Target {
            value: 0.0,
            at: 0.5,
            time_constant: 0.2_f32 / 5.0,
        }
    );
    assert!((view.value_at(env.node(), Param::Gain, 0.5).unwrap() - level).abs() < 1e-4);
    assert!(view.value_at(env.node(), Param::Gain, 0.7).unwrap() < level * 0.01);
}

#[test]
fn release_mid_decay_never_re_attacks() {
    let clock = VirtualClock::default();
    let mut graph = RecordingGraph::new(clock.clone());
    let view = graph.clone();
    let mut w = Wiring::new(&mut graph);
    let env = w.envelope(0.0).unwrap();
    env.percussive(w.graph(), 0.8, 0.0, 0.01, 2.0).unwrap();
    w.finish();

    clock.set(0.6);
    let level = view.value_at(env.node(), Param::Gain, 0.6).unwrap();
    assert!(level > 0.0 && level < 0.8);
    env.release(&mut graph, 0.2);
    let after = view.value_at(env.node(), Param::Gain, 0.6 + 1e-3).unwrap();
    assert!(after <= level, "{after} > {level}");
}

#[test]
fn cancel_scheduled_drops_events_from_the_cut() {
    let clock = VirtualClock::default();
    let mut graph = RecordingGraph::new(clock);
    let id = graph.gain(0.0).unwrap();
    graph.linear_ramp(id, Param::Gain, 1.0, 1.0).unwrap();
    graph.set_value_at(id, Param::Gain, 0.5, 2.0).unwrap();
    graph.cancel_scheduled(id, Param::Gain, 1.0).unwrap();
    assert_eq!(
        graph.automation(id, Param::Gain),
        vec![Automation::Set { value: 0.0, at: 0.0 }]
    );
    assert!(graph.cancel_and_hold(NodeId(999), Param::Gain, 0.0).is_err());
    assert!(graph.cancel_and_hold(id, Param::Pan, 0.0).is_err());
}

#[test]
fn stopping_a_ringing_melody_note_holds_its_level() {
    let rig = Rig::new(11);
    rig.engine.update(Mode::Melody, &[busy_poi(1)], 1000.0, 0.0);
    rig.advance_ms(100);
    assert_release_is_continuous(&rig);
}

#[test]
fn stopping_ambient_during_fade_in_holds_its_level() {
    let rig = Rig::new(12);
    rig.engine.update(Mode::Ambient, &[busy_poi(1), busy_poi(2)], 1000.0, 0.0);
    rig.advance_ms(500);
    assert_release_is_continuous(&rig);
}

#[test]
fn stopping_cacophony_mid_fade_holds_every_layer() {
    let rig = Rig::new(13);
    let ents: Vec<Entity> = (1..=4).map(busy_poi).collect();
    rig.engine.update(Mode::Cacophony, &ents, 1000.0, 0.0);
    rig.advance_ms(1200);
    assert_release_is_continuous(&rig);
}

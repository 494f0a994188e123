//! In-memory collaborators for driving the engine without a browser.
//!
//! [`RecordingGraph`] keeps a table of every node and what was done to it,
//! [`ManualTimers`] is a virtual-clock event loop, and [`RecordingNarrator`]
//! remembers what would have been spoken. All three are cheap handles, so a
//! test keeps a clone while the engine owns another.

use crate::config::SonifyConfig;
use crate::engine::{Engine, EngineParts};
use crate::graph::{
    AudioGraph, ContextState, FilterKind, GraphError, GraphResult, NodeId, Param, ResumeFuture,
    Waveform,
};
use crate::narration::{Narrator, Utterance};
use crate::timers::{TimerId, Timers};
use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Duration;

/// Shared seconds counter standing in for both the audio clock and the host
/// event loop.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock(Rc<Cell<f64>>);

impl VirtualClock {
    pub fn now(&self) -> f64 {
        self.0.get()
    }

    pub fn set(&self, secs: f64) {
        self.0.set(secs);
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by.as_secs_f64());
    }
}

// ---------------------------------------------------------------------------
// Graph

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Destination,
    Oscillator(Waveform),
    Noise,
    Gain,
    StereoPanner,
    Filter(FilterKind),
    Delay,
}

impl NodeKind {
    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::Oscillator(_) | NodeKind::Noise)
    }

    fn has_param(self, param: Param) -> bool {
        matches!(
            (self, param),
            (NodeKind::Oscillator(_), Param::Frequency | Param::Detune)
                | (NodeKind::Gain, Param::Gain)
                | (NodeKind::StereoPanner, Param::Pan)
                | (NodeKind::Filter(_), Param::Frequency | Param::Q | Param::Detune)
                | (NodeKind::Delay, Param::DelayTime)
        )
    }
}

/// One entry on a parameter's automation timeline. Ramps carry their end
/// time, as in WebAudio.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Automation {
    Set { value: f32, at: f64 },
    Linear { value: f32, at: f64 },
    Exponential { value: f32, at: f64 },
    Target { value: f32, at: f64, time_constant: f32 },
}

impl Automation {
    pub fn at(self) -> f64 {
        match self {
            Automation::Set { at, .. }
            | Automation::Linear { at, .. }
            | Automation::Exponential { at, .. }
            | Automation::Target { at, .. } => at,
        }
    }

    pub fn value(self) -> f32 {
        match self {
            Automation::Set { value, .. }
            | Automation::Linear { value, .. }
            | Automation::Exponential { value, .. }
            | Automation::Target { value, .. } => value,
        }
    }
}

/// Level of a timeline at `t`, following the WebAudio rules: ramps run from
/// the previous event to their own time, targets decay until the next event.
fn evaluate(timeline: &[Automation], t: f64) -> f32 {
    // (time, value) the curve last passed through, plus any running target
    let mut anchor = (f64::NEG_INFINITY, 0.0_f32);
    let mut target: Option<(f32, f32)> = None;
    let settle = |anchor: (f64, f32), target: Option<(f32, f32)>, at: f64| match target {
        Some((goal, tc)) if at.is_finite() && anchor.0.is_finite() => {
            let decay = (-(at - anchor.0) / tc as f64).exp() as f32;
            goal + (anchor.1 - goal) * decay
        }
        _ => anchor.1,
    };
    for event in timeline {
        match *event {
            Automation::Linear { value, at } | Automation::Exponential { value, at } if at > t => {
                // a ramp after a target starts from the target's onset
                let start = anchor;
                if !start.0.is_finite() || at <= start.0 {
                    return start.1;
                }
                let frac = ((t - start.0) / (at - start.0)).clamp(0.0, 1.0) as f32;
                return match event {
                    Automation::Exponential { .. } if start.1 * value > 0.0 => {
                        start.1 * (value / start.1).powf(frac)
                    }
                    // WebAudio holds the start level when an exponential
                    // ramp crosses or touches zero
                    Automation::Exponential { .. } => start.1,
                    _ => start.1 + (value - start.1) * frac,
                };
            }
            e if e.at() > t => break,
            Automation::Set { value, at }
            | Automation::Linear { value, at }
            | Automation::Exponential { value, at } => {
                anchor = (at, value);
                target = None;
            }
            Automation::Target {
                value,
                at,
                time_constant,
            } => {
                anchor = (at, settle(anchor, target, at));
                target = Some((value, time_constant));
            }
        }
    }
    settle(anchor, target, t)
}

#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub kind: NodeKind,
    /// Last value or automation target written per parameter.
    pub params: FnvHashMap<Param, f32>,
    /// Every scheduled event per parameter, ordered by time.
    pub automation: FnvHashMap<Param, Vec<Automation>>,
    pub outputs: Vec<NodeId>,
    pub param_outputs: Vec<(NodeId, Param)>,
    pub started_at: Option<f64>,
    pub stopped_at: Option<f64>,
}

#[derive(Debug)]
struct GraphLog {
    nodes: FnvHashMap<NodeId, NodeRecord>,
    next: u32,
    destination: NodeId,
    state: ContextState,
    /// Remaining node creations before the backend starts refusing.
    budget: Option<usize>,
    disconnects: usize,
}

/// Node-table backend that records everything the engine asks of it.
#[derive(Clone, Debug)]
pub struct RecordingGraph {
    log: Rc<RefCell<GraphLog>>,
    clock: VirtualClock,
}

impl RecordingGraph {
    pub fn new(clock: VirtualClock) -> Self {
        let destination = NodeId(0);
        let mut nodes = FnvHashMap::default();
        nodes.insert(destination, Self::record(NodeKind::Destination, &[], 0.0));
        Self {
            log: Rc::new(RefCell::new(GraphLog {
                nodes,
                next: 1,
                destination,
                state: ContextState::Running,
                budget: None,
                disconnects: 0,
            })),
            clock,
        }
    }

    /// Start suspended, as browsers do before a user gesture.
    pub fn suspended(clock: VirtualClock) -> Self {
        let g = Self::new(clock);
        g.log.borrow_mut().state = ContextState::Suspended;
        g
    }

    /// Make every subsequent node creation fail (or succeed again).
    pub fn refuse_nodes(&self, refuse: bool) {
        self.log.borrow_mut().budget = refuse.then_some(0);
    }

    /// Allow `n` more node creations, then refuse.
    pub fn refuse_after(&self, n: usize) {
        self.log.borrow_mut().budget = Some(n);
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.log.borrow().nodes.get(&id).cloned()
    }

    /// Nodes still present (not disconnected), destination excluded.
    pub fn live_nodes(&self) -> usize {
        self.log.borrow().nodes.len() - 1
    }

    pub fn count_live(&self, pred: impl Fn(NodeKind) -> bool) -> usize {
        self.log
            .borrow()
            .nodes
            .values()
            .filter(|n| pred(n.kind))
            .count()
    }

    /// Live sources with no stop scheduled.
    pub fn running_sources(&self) -> usize {
        self.log
            .borrow()
            .nodes
            .values()
            .filter(|n| n.kind.is_source() && n.started_at.is_some() && n.stopped_at.is_none())
            .count()
    }

    /// Pan values of every live stereo panner, ordered by node id.
    pub fn pans(&self) -> Vec<f32> {
        let log = self.log.borrow();
        let mut ids: Vec<_> = log
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::StereoPanner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.iter()
            .map(|id| log.nodes[id].params.get(&Param::Pan).copied().unwrap_or(0.0))
            .collect()
    }

    /// Scheduled events for one parameter, in timeline order.
    pub fn automation(&self, node: NodeId, param: Param) -> Vec<Automation> {
        self.log
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.automation.get(&param).cloned())
            .unwrap_or_default()
    }

    /// Computed level of a parameter at `t`, or `None` for a missing node.
    pub fn value_at(&self, node: NodeId, param: Param, t: f64) -> Option<f32> {
        let log = self.log.borrow();
        let rec = log.nodes.get(&node)?;
        rec.kind.has_param(param).then_some(())?;
        Some(evaluate(rec.automation.get(&param).map_or(&[][..], |v| v.as_slice()), t))
    }

    /// Ids of live nodes of a kind, ordered.
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<NodeId> {
        let log = self.log.borrow();
        let mut ids: Vec<_> = log
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn disconnects(&self) -> usize {
        self.log.borrow().disconnects
    }

    pub fn destination_inputs(&self) -> usize {
        let log = self.log.borrow();
        let dst = log.destination;
        log.nodes.values().filter(|n| n.outputs.contains(&dst)).count()
    }

    fn record(kind: NodeKind, params: &[(Param, f32)], at: f64) -> NodeRecord {
        NodeRecord {
            kind,
            params: params.iter().copied().collect(),
            automation: params
                .iter()
                .map(|&(p, value)| (p, vec![Automation::Set { value, at }]))
                .collect(),
            outputs: Vec::new(),
            param_outputs: Vec::new(),
            started_at: None,
            stopped_at: None,
        }
    }

    fn create(&mut self, kind: NodeKind, params: &[(Param, f32)]) -> GraphResult<NodeId> {
        let mut log = self.log.borrow_mut();
        let exhausted = matches!(log.budget, Some(0));
        if exhausted || log.state == ContextState::Closed {
            return Err(GraphError::Create {
                kind: "recorded",
                reason: "refused".into(),
            });
        }
        if let Some(left) = log.budget.as_mut() {
            *left -= 1;
        }
        let id = NodeId(log.next);
        log.next += 1;
        log.nodes.insert(id, Self::record(kind, params, self.clock.now()));
        Ok(id)
    }

    fn timeline<R>(
        &self,
        node: NodeId,
        param: Param,
        f: impl FnOnce(&mut Vec<Automation>) -> R,
    ) -> GraphResult<R> {
        let mut log = self.log.borrow_mut();
        let rec = log.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        if !rec.kind.has_param(param) {
            return Err(GraphError::NoSuchParam { node, param });
        }
        Ok(f(rec.automation.entry(param).or_default()))
    }

    fn schedule(&mut self, node: NodeId, param: Param, event: Automation) -> GraphResult<()> {
        self.timeline(node, param, |events| {
            // after any event at the same time
            let slot = events.partition_point(|e| e.at() <= event.at());
            events.insert(slot, event);
        })?;
        let mut log = self.log.borrow_mut();
        if let Some(rec) = log.nodes.get_mut(&node) {
            rec.params.insert(param, event.value());
        }
        Ok(())
    }
}

impl AudioGraph for RecordingGraph {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn state(&self) -> ContextState {
        self.log.borrow().state
    }

    fn resume(&mut self) -> ResumeFuture {
        let result = {
            let mut log = self.log.borrow_mut();
            match log.state {
                ContextState::Closed => Err(GraphError::Unavailable("context closed".into())),
                _ => {
                    log.state = ContextState::Running;
                    Ok(())
                }
            }
        };
        Box::pin(async move { result })
    }

    fn destination(&self) -> NodeId {
        self.log.borrow().destination
    }

    fn oscillator(&mut self, waveform: Waveform, frequency: f32) -> GraphResult<NodeId> {
        self.create(NodeKind::Oscillator(waveform), &[(Param::Frequency, frequency)])
    }

    fn noise(&mut self, _seconds: f32) -> GraphResult<NodeId> {
        self.create(NodeKind::Noise, &[])
    }

    fn gain(&mut self, value: f32) -> GraphResult<NodeId> {
        self.create(NodeKind::Gain, &[(Param::Gain, value)])
    }

    fn stereo_panner(&mut self, pan: f32) -> GraphResult<NodeId> {
        self.create(NodeKind::StereoPanner, &[(Param::Pan, pan)])
    }

    fn filter(&mut self, kind: FilterKind, frequency: f32, q: f32) -> GraphResult<NodeId> {
        self.create(
            NodeKind::Filter(kind),
            &[(Param::Frequency, frequency), (Param::Q, q)],
        )
    }

    fn delay(&mut self, seconds: f32) -> GraphResult<NodeId> {
        self.create(NodeKind::Delay, &[(Param::DelayTime, seconds)])
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        let mut log = self.log.borrow_mut();
        if !log.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode(to));
        }
        let rec = log.nodes.get_mut(&from).ok_or(GraphError::UnknownNode(from))?;
        rec.outputs.push(to);
        Ok(())
    }

    fn connect_param(&mut self, from: NodeId, to: NodeId, param: Param) -> GraphResult<()> {
        let mut log = self.log.borrow_mut();
        match log.nodes.get(&to) {
            Some(target) if target.kind.has_param(param) => {}
            Some(_) => return Err(GraphError::NoSuchParam { node: to, param }),
            None => return Err(GraphError::UnknownNode(to)),
        }
        let rec = log.nodes.get_mut(&from).ok_or(GraphError::UnknownNode(from))?;
        rec.param_outputs.push((to, param));
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) -> GraphResult<()> {
        let mut log = self.log.borrow_mut();
        if node == log.destination {
            return Err(GraphError::InvalidState(node, "destination".into()));
        }
        log.nodes.remove(&node).ok_or(GraphError::UnknownNode(node))?;
        log.disconnects += 1;
        Ok(())
    }

    fn set_value(&mut self, node: NodeId, param: Param, value: f32) -> GraphResult<()> {
        let at = self.clock.now();
        self.schedule(node, param, Automation::Set { value, at })
    }

    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()> {
        self.schedule(node, param, Automation::Set { value, at })
    }

    fn linear_ramp(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()> {
        self.schedule(node, param, Automation::Linear { value, at })
    }

    fn exponential_ramp(
        &mut self,
        node: NodeId,
        param: Param,
        value: f32,
        at: f64,
    ) -> GraphResult<()> {
        if value <= 0.0 {
            return Err(GraphError::InvalidState(node, "exponential ramp to <= 0".into()));
        }
        self.schedule(node, param, Automation::Exponential { value, at })
    }

    fn set_target(
        &mut self,
        node: NodeId,
        param: Param,
        target: f32,
        at: f64,
        time_constant: f32,
    ) -> GraphResult<()> {
        if !(time_constant > 0.0) {
            return Err(GraphError::InvalidState(node, "time constant".into()));
        }
        self.schedule(
            node,
            param,
            Automation::Target {
                value: target,
                at,
                time_constant,
            },
        )
    }

    fn cancel_scheduled(&mut self, node: NodeId, param: Param, from: f64) -> GraphResult<()> {
        self.timeline(node, param, |events| events.retain(|e| e.at() < from))
    }

    fn cancel_and_hold(&mut self, node: NodeId, param: Param, at: f64) -> GraphResult<()> {
        let held = self.timeline(node, param, |events| {
            let held = evaluate(events, at);
            events.retain(|e| e.at() < at);
            held
        })?;
        self.schedule(node, param, Automation::Set { value: held, at })
    }

    fn start(&mut self, node: NodeId, at: f64) -> GraphResult<()> {
        let mut log = self.log.borrow_mut();
        let rec = log.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        if !rec.kind.is_source() || rec.started_at.is_some() {
            return Err(GraphError::InvalidState(node, "start".into()));
        }
        rec.started_at = Some(at);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, at: f64) -> GraphResult<()> {
        let mut log = self.log.borrow_mut();
        let rec = log.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        if rec.started_at.is_none() {
            return Err(GraphError::InvalidState(node, "stop before start".into()));
        }
        // like WebAudio, the last stop call wins
        rec.stopped_at = Some(at);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timers

enum Callback {
    Once(Box<dyn FnOnce()>),
    Every(Box<dyn FnMut()>, Duration),
}

struct Entry {
    id: i64,
    due: f64,
    callback: Callback,
}

/// Virtual event loop: nothing fires until [`ManualTimers::advance`].
pub struct ManualTimers {
    clock: VirtualClock,
    entries: RefCell<Vec<Entry>>,
    next: Cell<i64>,
    firing: Cell<Option<i64>>,
    cleared_while_firing: Cell<bool>,
}

impl ManualTimers {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            entries: RefCell::new(Vec::new()),
            next: Cell::new(1),
            firing: Cell::new(None),
            cleared_while_firing: Cell::new(false),
        }
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Move time forward, firing due callbacks in order. Callbacks may arm
    /// new timers; those fire too if they fall inside the window.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by.as_secs_f64();
        loop {
            let next = {
                let entries = self.entries.borrow();
                entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target + 1e-9)
                    .min_by(|(_, a), (_, b)| {
                        a.due
                            .partial_cmp(&b.due)
                            .unwrap_or(Ordering::Equal)
                            .then(a.id.cmp(&b.id))
                    })
                    .map(|(i, _)| i)
            };
            let Some(i) = next else {
                break;
            };
            let entry = self.entries.borrow_mut().remove(i);
            if entry.due > self.clock.now() {
                self.clock.set(entry.due);
            }
            match entry.callback {
                Callback::Once(f) => f(),
                Callback::Every(mut f, period) => {
                    self.firing.set(Some(entry.id));
                    self.cleared_while_firing.set(false);
                    f();
                    self.firing.set(None);
                    if !self.cleared_while_firing.get() {
                        self.entries.borrow_mut().push(Entry {
                            id: entry.id,
                            due: entry.due + period.as_secs_f64(),
                            callback: Callback::Every(f, period),
                        });
                    }
                }
            }
        }
        if target > self.clock.now() {
            self.clock.set(target);
        }
    }

    fn push(&self, delay: Duration, callback: Callback) -> TimerId {
        let id = self.next.get();
        self.next.set(id + 1);
        self.entries.borrow_mut().push(Entry {
            id,
            due: self.clock.now() + delay.as_secs_f64(),
            callback,
        });
        TimerId(id)
    }
}

impl Timers for ManualTimers {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        Some(self.push(delay, Callback::Once(callback)))
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> Option<TimerId> {
        let period = period.max(Duration::from_millis(1));
        Some(self.push(period, Callback::Every(callback, period)))
    }

    fn clear(&self, id: TimerId) {
        if self.firing.get() == Some(id.0) {
            self.cleared_while_firing.set(true);
        }
        self.entries.borrow_mut().retain(|e| e.id != id.0);
    }
}

// ---------------------------------------------------------------------------
// Narration

#[derive(Debug, Default)]
struct NarrationLog {
    spoken: Vec<Utterance>,
    cancels: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RecordingNarrator {
    log: Rc<RefCell<NarrationLog>>,
}

impl RecordingNarrator {
    pub fn spoken(&self) -> Vec<Utterance> {
        self.log.borrow().spoken.clone()
    }

    pub fn cancels(&self) -> usize {
        self.log.borrow().cancels
    }
}

impl Narrator for RecordingNarrator {
    fn speak(&mut self, utterance: Utterance) {
        self.log.borrow_mut().spoken.push(utterance);
    }

    fn cancel(&mut self) {
        self.log.borrow_mut().cancels += 1;
    }
}

// ---------------------------------------------------------------------------
// Assembly

/// An engine wired to recording collaborators that share one clock.
pub struct Rig {
    pub engine: Engine,
    pub graph: RecordingGraph,
    pub timers: Rc<ManualTimers>,
    pub narrator: RecordingNarrator,
    pub clock: VirtualClock,
}

impl Rig {
    pub fn new(seed: u64) -> Self {
        Self::with_config(SonifyConfig::default(), seed)
    }

    pub fn with_config(config: SonifyConfig, seed: u64) -> Self {
        let clock = VirtualClock::default();
        Self::with_graph(RecordingGraph::new(clock.clone()), clock, config, seed)
    }

    pub fn with_graph(
        graph: RecordingGraph,
        clock: VirtualClock,
        config: SonifyConfig,
        seed: u64,
    ) -> Self {
        let timers = Rc::new(ManualTimers::new(clock.clone()));
        let narrator = RecordingNarrator::default();
        let factory_graph = graph.clone();
        let engine = Engine::new(EngineParts {
            config,
            graph_factory: Box::new(move || {
                Ok(Box::new(factory_graph.clone()) as Box<dyn AudioGraph>)
            }),
            timers: timers.clone(),
            narrator: Box::new(narrator.clone()),
            rng: StdRng::seed_from_u64(seed),
        });
        Self {
            engine,
            graph,
            timers,
            narrator,
            clock,
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.timers.advance(Duration::from_millis(ms));
    }
}

//! Session controller: owns the output graph, the live voice registry, the
//! heading and the generation epoch.
//!
//! Every deferred continuation captures the epoch it was armed under and
//! re-checks it when it fires; bumping the epoch in [`Engine::stop_all`] is
//! what cancels a generation. Timer handles are also cleared, but a callback
//! that slips through still finds a stale epoch and does nothing.

use crate::config::SonifyConfig;
use crate::entity::{normalize_degrees, Entity, Mode};
use crate::graph::{AudioGraph, ContextState, GraphResult, NodeId};
use crate::narration::Narrator;
use crate::strategy::{self, Deferred, Strategy, StrategyContext, Task};
use crate::timers::{TimerId, Timers};
use crate::voice::{Voice, VoiceInfo};
use fnv::FnvHashMap;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Generation counter used as the cancellation token for deferred work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No output graph yet (never initialised, or the platform refused one).
    Uninitialized,
    Ready,
    Playing(Mode),
}

/// The live voices of the current generation.
///
/// Strategies may only add; teardown and reaping stay with the engine.
#[derive(Default)]
pub struct VoiceSet {
    voices: Vec<Box<dyn Voice>>,
}

impl VoiceSet {
    pub fn add(&mut self, voice: Box<dyn Voice>) {
        self.voices.push(voice);
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn infos(&self) -> Vec<VoiceInfo> {
        self.voices.iter().map(|v| v.info()).collect()
    }

    fn repan_all(&mut self, graph: &mut dyn AudioGraph, heading: f32) {
        for v in &mut self.voices {
            v.repan(graph, heading);
        }
    }

    fn drain(&mut self) -> Vec<Box<dyn Voice>> {
        std::mem::take(&mut self.voices)
    }

    fn take_finished(&mut self, now: f64) -> Vec<Box<dyn Voice>> {
        let (done, live): (Vec<_>, Vec<_>) =
            self.drain().into_iter().partition(|v| v.finished(now));
        self.voices = live;
        done
    }
}

/// Creates the output graph on first use. May be retried after a failure.
pub type GraphFactory = Box<dyn FnMut() -> GraphResult<Box<dyn AudioGraph>>>;

/// Collaborators an [`Engine`] is assembled from.
pub struct EngineParts {
    pub config: SonifyConfig,
    pub graph_factory: GraphFactory,
    pub timers: Rc<dyn Timers>,
    pub narrator: Box<dyn Narrator>,
    pub rng: StdRng,
}

/// Schedule disposal of a retired batch. A host that fires timers while the
/// session is busy gets the cleanup pushed back rather than dropped.
fn arm_cleanup(
    this: Weak<RefCell<Session>>,
    timers: Rc<dyn Timers>,
    batch: u64,
    window: Duration,
) -> Option<TimerId> {
    let retry = timers.clone();
    timers.set_timeout(
        window,
        Box::new(move || {
            let Some(inner) = this.upgrade() else {
                return;
            };
            let borrowed = inner.try_borrow_mut();
            match borrowed {
                Ok(mut s) => s.dispose_batch(batch),
                Err(_) => {
                    log::warn!("[engine] session busy; retrying cleanup of batch {}", batch);
                    if arm_cleanup(this, retry, batch, window).is_none() {
                        log::warn!("[engine] no timer to retry cleanup of batch {}", batch);
                    }
                }
            }
        }),
    )
}

struct Session {
    this: Weak<RefCell<Session>>,
    config: SonifyConfig,
    factory: GraphFactory,
    graph: Option<Box<dyn AudioGraph>>,
    master: Option<NodeId>,
    voices: VoiceSet,
    /// Stopped voices still ringing out their release, keyed by cleanup batch.
    retiring: Vec<(u64, Box<dyn Voice>)>,
    active: Option<Box<dyn Strategy>>,
    epoch: Epoch,
    heading: f32,
    timers: Rc<dyn Timers>,
    pending: FnvHashMap<u64, TimerId>,
    next_ticket: u64,
    narrator: Box<dyn Narrator>,
    rng: StdRng,
}

/// Cloneable handle to the single audio session.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<RefCell<Session>>,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let EngineParts {
            config,
            graph_factory,
            timers,
            narrator,
            rng,
        } = parts;
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(Session {
                this: this.clone(),
                config: config.sanitized(),
                factory: graph_factory,
                graph: None,
                master: None,
                voices: VoiceSet::default(),
                retiring: Vec::new(),
                active: None,
                epoch: Epoch::default(),
                heading: 0.0,
                timers,
                pending: FnvHashMap::default(),
                next_ticket: 0,
                narrator,
                rng,
            })
        });
        Self { inner }
    }

    /// Acquire the output graph and master gain. Idempotent; returns whether
    /// the engine is usable. Failure is logged and leaves the engine inert.
    pub fn init(&self) -> bool {
        self.inner.borrow_mut().init()
    }

    /// Make sure the output is running (hosts may start it suspended until a
    /// user gesture). Initialises first if needed.
    pub async fn resume(&self) -> bool {
        let pending = {
            let mut s = self.inner.borrow_mut();
            if !s.init() {
                return false;
            }
            let transition = match s.graph.as_mut() {
                Some(g) if g.state() != ContextState::Running => Some(g.resume()),
                _ => None,
            };
            transition
        };
        if let Some(transition) = pending {
            if let Err(e) = transition.await {
                log::warn!("[engine] resume failed: {}", e);
                return false;
            }
        }
        true
    }

    /// Store the heading and glide every live voice to its new pan.
    pub fn set_heading(&self, heading: f32) {
        self.inner.borrow_mut().set_heading(heading);
    }

    /// Replace the current generation with `mode` over `entities`.
    pub fn update(&self, mode: Mode, entities: &[Entity], radius: f32, heading: f32) {
        self.inner
            .borrow_mut()
            .update(mode, entities, radius, heading);
    }

    /// End the current generation: bump the epoch, release and retire every
    /// voice, clear pending timers and cancel narration.
    pub fn stop_all(&self) {
        self.inner.borrow_mut().stop_all();
    }

    pub fn state(&self) -> EngineState {
        let s = self.inner.borrow();
        let state = match (&s.graph, &s.active) {
            (None, _) => EngineState::Uninitialized,
            (Some(_), Some(strategy)) => EngineState::Playing(strategy.mode()),
            (Some(_), None) => EngineState::Ready,
        };
        state
    }

    pub fn epoch(&self) -> Epoch {
        self.inner.borrow().epoch
    }

    pub fn heading(&self) -> f32 {
        self.inner.borrow().heading
    }

    pub fn voice_count(&self) -> usize {
        self.inner.borrow().voices.len()
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.inner.borrow().voices.infos()
    }

    /// Voices stopped but still inside their release window.
    pub fn retiring_count(&self) -> usize {
        self.inner.borrow().retiring.len()
    }

    /// Deferred strategy callbacks currently armed.
    pub fn pending_tasks(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    pub fn config(&self) -> SonifyConfig {
        self.inner.borrow().config.clone()
    }
}

impl Session {
    fn init(&mut self) -> bool {
        if self.graph.is_some() {
            return true;
        }
        let mut graph = match (self.factory)() {
            Ok(g) => g,
            Err(e) => {
                log::error!("[engine] audio output unavailable: {}", e);
                return false;
            }
        };
        let master = match graph.gain(self.config.master_gain) {
            Ok(m) => m,
            Err(e) => {
                log::error!("[engine] master gain: {}", e);
                return false;
            }
        };
        let destination = graph.destination();
        if let Err(e) = graph.connect(master, destination) {
            log::error!("[engine] master -> destination: {}", e);
            return false;
        }
        log::info!("[engine] audio ready ({:?})", graph.state());
        self.graph = Some(graph);
        self.master = Some(master);
        true
    }

    fn set_heading(&mut self, heading: f32) {
        if !heading.is_finite() {
            return;
        }
        self.heading = normalize_degrees(heading);
        if let Some(graph) = self.graph.as_deref_mut() {
            self.voices.repan_all(graph, self.heading);
        }
    }

    fn update(&mut self, mode: Mode, entities: &[Entity], radius: f32, heading: f32) {
        if heading.is_finite() {
            self.heading = normalize_degrees(heading);
        }
        if !self.init() {
            log::debug!("[engine] inert; ignoring {} update", mode);
            return;
        }
        if let Some(graph) = self.graph.as_deref_mut() {
            if graph.state() == ContextState::Suspended {
                // the transition starts on request; `resume()` is the awaitable path
                drop(graph.resume());
            }
        }

        self.stop_all();
        let epoch = self.epoch;
        if entities.is_empty() {
            log::debug!("[engine] epoch {} silent (no entities)", epoch.0);
            return;
        }
        log::debug!(
            "[engine] epoch {} {} with {} entities, radius {}m",
            epoch.0,
            mode,
            entities.len(),
            radius
        );
        self.active = Some(strategy::for_mode(mode, entities.to_vec(), radius));
        self.dispatch(None);
    }

    fn stop_all(&mut self) {
        self.epoch = self.epoch.next();
        for (_, id) in self.pending.drain() {
            self.timers.clear(id);
        }
        self.narrator.cancel();
        self.active = None;

        let voices = self.voices.drain();
        if voices.is_empty() {
            return;
        }
        let Some(graph) = self.graph.as_deref_mut() else {
            return;
        };
        let mut stopped = Vec::with_capacity(voices.len());
        for mut voice in voices {
            // one voice failing must not keep the rest alive
            if let Err(e) = voice.stop(graph) {
                log::warn!("[engine] stop {:?}: {}", voice.info().kind, e);
            }
            stopped.push(voice);
        }
        self.retire(stopped);
    }

    /// Dispose stopped voices once their release window has passed.
    fn retire(&mut self, voices: Vec<Box<dyn Voice>>) {
        let batch = self.next_ticket;
        self.next_ticket += 1;
        let window = Duration::from_secs_f32(self.config.release_secs);
        let armed = arm_cleanup(self.this.clone(), self.timers.clone(), batch, window);
        self.retiring.extend(voices.into_iter().map(|v| (batch, v)));
        if armed.is_none() {
            log::debug!("[engine] no timer for retirement; disposing now");
            self.dispose_batch(batch);
        }
    }

    fn dispose_batch(&mut self, batch: u64) {
        let (done, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition(|(b, _)| *b == batch);
        self.retiring = keep;
        if let Some(graph) = self.graph.as_deref_mut() {
            for (_, mut voice) in done {
                if let Err(e) = voice.dispose(graph) {
                    log::warn!("[engine] dispose {:?}: {}", voice.info().kind, e);
                }
            }
        }
    }

    /// Dispose self-terminating voices whose sound has ended.
    fn reap_finished(&mut self) {
        let Some(graph) = self.graph.as_deref_mut() else {
            return;
        };
        let now = graph.current_time();
        for mut voice in self.voices.take_finished(now) {
            if let Err(e) = voice.dispose(graph) {
                log::trace!("[engine] reap {:?}: {}", voice.info().kind, e);
            }
        }
    }

    /// Run the active strategy's `start` (no task) or a deferred task, then
    /// arm whatever it asked for under the current epoch.
    fn dispatch(&mut self, task: Option<Task>) {
        let mut requests = Vec::new();
        {
            let (Some(graph), Some(output), Some(strategy)) =
                (self.graph.as_deref_mut(), self.master, self.active.as_mut())
            else {
                return;
            };
            let mut cx = StrategyContext {
                graph,
                output,
                voices: &mut self.voices,
                narrator: self.narrator.as_mut(),
                rng: &mut self.rng,
                config: &self.config,
                heading: self.heading,
                epoch: self.epoch,
                requests: &mut requests,
            };
            let result = match task {
                None => strategy.start(&mut cx),
                Some(t) => strategy.on_task(t, &mut cx),
            };
            if let Err(e) = result {
                log::warn!("[engine] {} strategy: {}", strategy.mode(), e);
            }
        }
        self.arm(requests);
    }

    fn arm(&mut self, requests: Vec<Deferred>) {
        for req in requests {
            let ticket = self.next_ticket;
            self.next_ticket += 1;
            let epoch = self.epoch;
            let task = req.task;
            let this = self.this.clone();
            let id = if req.repeat {
                self.timers.set_interval(
                    req.delay,
                    Box::new(move || Session::fire(&this, epoch, ticket, task, false)),
                )
            } else {
                self.timers.set_timeout(
                    req.delay,
                    Box::new(move || Session::fire(&this, epoch, ticket, task, true)),
                )
            };
            match id {
                Some(id) => {
                    self.pending.insert(ticket, id);
                }
                None => log::warn!("[engine] host refused timer for {:?}", task),
            }
        }
    }

    fn fire(this: &Weak<RefCell<Session>>, epoch: Epoch, ticket: u64, task: Task, one_shot: bool) {
        let Some(inner) = this.upgrade() else {
            return;
        };
        let Ok(mut s) = inner.try_borrow_mut() else {
            log::warn!("[engine] session busy; dropped {:?}", task);
            return;
        };
        if one_shot {
            s.pending.remove(&ticket);
        }
        if s.epoch != epoch {
            log::trace!("[engine] stale {:?} from epoch {}", task, epoch.0);
            return;
        }
        s.reap_finished();
        s.dispatch(Some(task));
    }
}

//! Thin typed wrappers over graph nodes: the atoms voices are wired from.
//!
//! Construction goes through [`Wiring`], which remembers every node it
//! created so a voice can sever all of them on dispose, or abandon a half
//! built topology when the backend refuses a node.

use crate::entity::pan_for;
use crate::graph::{AudioGraph, FilterKind, GraphResult, NodeId, Param, Waveform};
use smallvec::SmallVec;

/// Teardown faults are expected races (already stopped, already gone).
#[inline]
pub(crate) fn swallow(what: &str, result: GraphResult<()>) {
    if let Err(e) = result {
        log::trace!("[graph] ignored {what}: {e}");
    }
}

/// Every node owned by one voice.
#[derive(Clone, Debug, Default)]
pub struct NodeSet {
    nodes: SmallVec<[NodeId; 16]>,
}

impl NodeSet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Disconnect everything; returns the first real failure, if any, after
    /// attempting every node.
    pub fn disconnect_all(&mut self, graph: &mut dyn AudioGraph) -> GraphResult<()> {
        let mut first_err = None;
        for node in self.nodes.drain(..) {
            if let Err(e) = graph.disconnect(node) {
                log::trace!("[graph] disconnect {:?}: {}", node, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            // A node the backend no longer knows about is already severed.
            Some(crate::graph::GraphError::UnknownNode(_)) | None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Builder handing out primitives while tracking the nodes behind them.
pub struct Wiring<'g> {
    graph: &'g mut dyn AudioGraph,
    nodes: NodeSet,
}

impl<'g> Wiring<'g> {
    pub fn new(graph: &'g mut dyn AudioGraph) -> Self {
        Self {
            graph,
            nodes: NodeSet::default(),
        }
    }

    pub fn graph(&mut self) -> &mut dyn AudioGraph {
        &mut *self.graph
    }

    pub fn now(&self) -> f64 {
        self.graph.current_time()
    }

    fn track(&mut self, node: NodeId) -> NodeId {
        self.nodes.nodes.push(node);
        node
    }

    pub fn tone(&mut self, waveform: Waveform, frequency: f32) -> GraphResult<Tone> {
        let node = self.graph.oscillator(waveform, frequency)?;
        Ok(Tone {
            node: self.track(node),
        })
    }

    pub fn noise(&mut self, seconds: f32) -> GraphResult<NoiseSource> {
        let node = self.graph.noise(seconds)?;
        Ok(NoiseSource {
            node: self.track(node),
        })
    }

    pub fn envelope(&mut self, initial: f32) -> GraphResult<Envelope> {
        let node = self.graph.gain(initial)?;
        Ok(Envelope {
            node: self.track(node),
        })
    }

    pub fn panner(
        &mut self,
        bearing: Option<f32>,
        heading: f32,
        smoothing: f32,
    ) -> GraphResult<Panner> {
        let pan = pan_for(bearing, heading);
        let node = self.graph.stereo_panner(pan)?;
        Ok(Panner {
            node: self.track(node),
            bearing,
            pan,
            smoothing,
        })
    }

    pub fn filter(&mut self, kind: FilterKind, frequency: f32, q: f32) -> GraphResult<Filter> {
        let node = self.graph.filter(kind, frequency, q)?;
        Ok(Filter {
            node: self.track(node),
        })
    }

    /// Sine LFO at `rate_hz`, scaled by `depth`, summed into `target.param`.
    pub fn lfo(&mut self, rate_hz: f32, depth: f32, target: NodeId, param: Param) -> GraphResult<Lfo> {
        let osc = self.tone(Waveform::Sine, rate_hz)?;
        let depth_node = self.graph.gain(depth)?;
        let depth_node = self.track(depth_node);
        self.graph.connect(osc.node, depth_node)?;
        self.graph.connect_param(depth_node, target, param)?;
        Ok(Lfo {
            osc,
            depth: depth_node,
        })
    }

    /// Delay line with a feedback loop and a wet send into `output`.
    pub fn echo(
        &mut self,
        seconds: f32,
        feedback: f32,
        wet: f32,
        output: NodeId,
    ) -> GraphResult<Echo> {
        let delay = self.graph.delay(seconds)?;
        let delay = self.track(delay);
        let fb = self.graph.gain(feedback.clamp(0.0, 0.9))?;
        let fb = self.track(fb);
        let wet_node = self.graph.gain(wet)?;
        let wet_node = self.track(wet_node);
        self.graph.connect(delay, fb)?;
        self.graph.connect(fb, delay)?;
        self.graph.connect(delay, wet_node)?;
        self.graph.connect(wet_node, output)?;
        Ok(Echo { input: delay })
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        self.graph.connect(from, to)
    }

    pub fn finish(self) -> NodeSet {
        self.nodes
    }

    /// Sever whatever was built so far.
    pub fn abandon(mut self) {
        swallow("abandon", self.nodes.disconnect_all(self.graph));
    }
}

/// Oscillator.
#[derive(Clone, Copy, Debug)]
pub struct Tone {
    node: NodeId,
}

impl Tone {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn start(&self, graph: &mut dyn AudioGraph, at: f64) -> GraphResult<()> {
        graph.start(self.node, at)
    }

    pub fn stop(&self, graph: &mut dyn AudioGraph, at: f64) {
        swallow("tone stop", graph.stop(self.node, at));
    }
}

/// Looping noise buffer.
#[derive(Clone, Copy, Debug)]
pub struct NoiseSource {
    node: NodeId,
}

impl NoiseSource {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn start(&self, graph: &mut dyn AudioGraph, at: f64) -> GraphResult<()> {
        graph.start(self.node, at)
    }

    pub fn stop(&self, graph: &mut dyn AudioGraph, at: f64) {
        swallow("noise stop", graph.stop(self.node, at));
    }
}

/// Gain stage with envelope shapes.
#[derive(Clone, Copy, Debug)]
pub struct Envelope {
    node: NodeId,
}

impl Envelope {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Silence at `at`, then a linear ramp to `target` over `secs`.
    pub fn fade_in(
        &self,
        graph: &mut dyn AudioGraph,
        target: f32,
        at: f64,
        secs: f32,
    ) -> GraphResult<()> {
        graph.set_value_at(self.node, Param::Gain, 0.0, at)?;
        graph.linear_ramp(self.node, Param::Gain, target, at + secs.max(0.01) as f64)
    }

    /// Fast linear attack to `peak`, exponential decay to silence. Returns the
    /// time the envelope reaches zero.
    pub fn percussive(
        &self,
        graph: &mut dyn AudioGraph,
        peak: f32,
        at: f64,
        attack: f32,
        decay: f32,
    ) -> GraphResult<f64> {
        let peak_at = at + attack.max(0.001) as f64;
        let end = peak_at + decay.max(0.01) as f64;
        graph.set_value_at(self.node, Param::Gain, 0.0, at)?;
        graph.linear_ramp(self.node, Param::Gain, peak.max(0.0001), peak_at)?;
        // exponential ramps cannot reach zero; land just above it, then cut
        graph.exponential_ramp(self.node, Param::Gain, 0.0001, end)?;
        graph.set_value_at(self.node, Param::Gain, 0.0, end)?;
        Ok(end)
    }

    /// Freeze the gain where it is, then glide to zero within `secs`.
    /// Returns the time after which generators behind this gain may halt.
    pub fn release(&self, graph: &mut dyn AudioGraph, secs: f32) -> f64 {
        let now = graph.current_time();
        // a bare cancel would drop an unfinished ramp back to its start level
        swallow("release hold", graph.cancel_and_hold(self.node, Param::Gain, now));
        // five time constants leave well under 1% of the level
        swallow(
            "release ramp",
            graph.set_target(self.node, Param::Gain, 0.0, now, (secs / 5.0).max(0.001)),
        );
        now + secs as f64
    }
}

/// Stereo panner bound to a bearing.
#[derive(Clone, Copy, Debug)]
pub struct Panner {
    node: NodeId,
    bearing: Option<f32>,
    pan: f32,
    smoothing: f32,
}

impl Panner {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Glide towards the pan for `heading`; never jumps.
    pub fn repan(&mut self, graph: &mut dyn AudioGraph, heading: f32) {
        self.pan = pan_for(self.bearing, heading);
        let now = graph.current_time();
        swallow(
            "repan",
            graph.set_target(self.node, Param::Pan, self.pan, now, self.smoothing.max(0.001)),
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Filter {
    node: NodeId,
}

impl Filter {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Low-frequency oscillator feeding a parameter through a depth gain.
#[derive(Clone, Copy, Debug)]
pub struct Lfo {
    osc: Tone,
    depth: NodeId,
}

impl Lfo {
    pub fn tone(&self) -> Tone {
        self.osc
    }

    pub fn depth_node(&self) -> NodeId {
        self.depth
    }

    pub fn start(&self, graph: &mut dyn AudioGraph, at: f64) -> GraphResult<()> {
        self.osc.start(graph, at)
    }

    pub fn stop(&self, graph: &mut dyn AudioGraph, at: f64) {
        self.osc.stop(graph, at);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Echo {
    input: NodeId,
}

impl Echo {
    pub fn input(&self) -> NodeId {
        self.input
    }
}

//! Backend-neutral signal graph.
//!
//! Nodes are addressed by [`NodeId`] handles handed out by the backend. The
//! browser front-end implements this over WebAudio; tests use the in-memory
//! `testing::RecordingGraph` (behind the `testing` feature).

use std::future::Future;
use std::pin::Pin;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Basic oscillator shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Triangle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Lowpass,
    Bandpass,
    Highpass,
}

/// Automatable parameter of a node. Which ones exist depends on the node kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    Gain,
    Frequency,
    Detune,
    Q,
    Pan,
    DelayTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("audio context unavailable: {0}")]
    Unavailable(String),
    #[error("failed to create {kind} node: {reason}")]
    Create { kind: &'static str, reason: String },
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node {node:?} has no {param:?} parameter")]
    NoSuchParam { node: NodeId, param: Param },
    #[error("invalid state for {0:?}: {1}")]
    InvalidState(NodeId, String),
    #[error("platform error: {0}")]
    Platform(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Future returned by [`AudioGraph::resume`]; resolves once the context runs.
pub type ResumeFuture = Pin<Box<dyn Future<Output = GraphResult<()>>>>;

/// A soft-realtime synthesis graph with an audio clock in seconds.
///
/// Scheduling times (`at`) are absolute context times as returned by
/// [`AudioGraph::current_time`].
pub trait AudioGraph {
    fn current_time(&self) -> f64;
    fn state(&self) -> ContextState;
    /// Request the running state. The transition starts immediately; the
    /// returned future only reports when it completed.
    fn resume(&mut self) -> ResumeFuture;
    fn destination(&self) -> NodeId;

    fn oscillator(&mut self, waveform: Waveform, frequency: f32) -> GraphResult<NodeId>;
    /// Looping white noise source of `seconds` length.
    fn noise(&mut self, seconds: f32) -> GraphResult<NodeId>;
    fn gain(&mut self, value: f32) -> GraphResult<NodeId>;
    fn stereo_panner(&mut self, pan: f32) -> GraphResult<NodeId>;
    fn filter(&mut self, kind: FilterKind, frequency: f32, q: f32) -> GraphResult<NodeId>;
    fn delay(&mut self, seconds: f32) -> GraphResult<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> GraphResult<()>;
    /// Route a node's output into another node's parameter (modulation).
    fn connect_param(&mut self, from: NodeId, to: NodeId, param: Param) -> GraphResult<()>;
    /// Sever every outgoing connection and forget the node.
    fn disconnect(&mut self, node: NodeId) -> GraphResult<()>;

    fn set_value(&mut self, node: NodeId, param: Param, value: f32) -> GraphResult<()>;
    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()>;
    fn linear_ramp(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()>;
    fn exponential_ramp(&mut self, node: NodeId, param: Param, value: f32, at: f64)
        -> GraphResult<()>;
    /// Exponential approach to `target` starting at `at` with `time_constant`.
    fn set_target(
        &mut self,
        node: NodeId,
        param: Param,
        target: f32,
        at: f64,
        time_constant: f32,
    ) -> GraphResult<()>;
    fn cancel_scheduled(&mut self, node: NodeId, param: Param, from: f64) -> GraphResult<()>;
    /// Cancel automation from `at` onward and pin the param to the level it
    /// has at `at`, so a following ramp starts there instead of jumping.
    fn cancel_and_hold(&mut self, node: NodeId, param: Param, at: f64) -> GraphResult<()>;

    fn start(&mut self, node: NodeId, at: f64) -> GraphResult<()>;
    fn stop(&mut self, node: NodeId, at: f64) -> GraphResult<()>;
}

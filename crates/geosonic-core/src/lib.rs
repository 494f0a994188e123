//! Sonification engine for nearby points of interest.
//!
//! The host hands over entities (distance and bearing precomputed), a radius,
//! a heading and a [`Mode`]; the [`Engine`] turns them into a live voice
//! graph with bearing-relative stereo placement and keeps it in sync with
//! heading changes. Platform concerns (output graph, timers, speech) sit
//! behind the [`AudioGraph`], [`Timers`] and [`Narrator`] traits.

pub mod config;
pub mod constants;
pub mod engine;
pub mod entity;
pub mod graph;
pub mod narration;
pub mod pitch;
pub mod primitives;
pub mod strategy;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timers;
pub mod voice;

pub use config::SonifyConfig;
pub use engine::{Engine, EngineParts, EngineState, Epoch, GraphFactory, VoiceSet};
pub use entity::{
    activity_score, pan_for, proximity, Entity, EntityBatch, MissingIdError, Mode, ParseModeError,
    RawEntity,
};
pub use graph::{
    AudioGraph, ContextState, FilterKind, GraphError, GraphResult, NodeId, Param, ResumeFuture,
    Waveform,
};
pub use narration::{Narrator, Utterance};
pub use timers::{TimerId, Timers};
pub use voice::{Voice, VoiceInfo, VoiceKind};

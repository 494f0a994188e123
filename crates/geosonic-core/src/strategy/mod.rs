//! Mode strategies: each turns the entity list into a population of voices
//! and, where the mode evolves over time, asks the engine for deferred work.

mod ambient;
mod cacophony;
mod melody;

pub use ambient::{ambient_selection, Ambient};
pub use cacophony::{murmur_count, Cacophony};
pub use melody::{melody_step_ms, Melody};

use crate::config::SonifyConfig;
use crate::engine::{Epoch, VoiceSet};
use crate::entity::{Entity, Mode};
use crate::graph::{AudioGraph, GraphResult, NodeId};
use crate::narration::Narrator;
use rand::rngs::StdRng;
use std::time::Duration;

/// Deferred work a strategy can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    MelodyStep,
    Narrate,
}

/// A timer request collected during a strategy call; the engine arms it
/// once the call returns, bound to the current epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub delay: Duration,
    pub repeat: bool,
    pub task: Task,
}

/// Everything a strategy may touch while building or stepping.
///
/// Voices can only be added here; removal belongs to the engine.
pub struct StrategyContext<'a> {
    pub graph: &'a mut dyn AudioGraph,
    pub output: NodeId,
    pub voices: &'a mut VoiceSet,
    pub narrator: &'a mut dyn Narrator,
    pub rng: &'a mut StdRng,
    pub config: &'a SonifyConfig,
    pub heading: f32,
    pub epoch: Epoch,
    pub(crate) requests: &'a mut Vec<Deferred>,
}

impl StrategyContext<'_> {
    /// Run `task` once after `delay`.
    pub fn after(&mut self, delay: Duration, task: Task) {
        self.requests.push(Deferred {
            delay,
            repeat: false,
            task,
        });
    }

    /// Run `task` every `period` until the generation ends.
    pub fn every(&mut self, period: Duration, task: Task) {
        self.requests.push(Deferred {
            delay: period,
            repeat: true,
            task,
        });
    }
}

pub trait Strategy {
    fn mode(&self) -> Mode;
    /// Build the initial voice set for this generation.
    fn start(&mut self, cx: &mut StrategyContext<'_>) -> GraphResult<()>;
    /// Handle a deferred task. Only called while the generation is current.
    fn on_task(&mut self, _task: Task, _cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        Ok(())
    }
}

pub fn for_mode(mode: Mode, entities: Vec<Entity>, radius: f32) -> Box<dyn Strategy> {
    match mode {
        Mode::Ambient => Box::new(Ambient::new(entities, radius)),
        Mode::Cacophony => Box::new(Cacophony::new(entities, radius)),
        Mode::Melody => Box::new(Melody::new(entities, radius)),
    }
}

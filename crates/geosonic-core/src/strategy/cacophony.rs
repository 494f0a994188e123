use super::{Strategy, StrategyContext, Task};
use crate::entity::{Entity, Mode};
use crate::graph::GraphResult;
use crate::narration::{narration_interval_ms, utterance_for};
use crate::voice::{Drone, Murmur, NoiseBed};
use rand::Rng;
use std::time::Duration;

/// `min(floor(entity_count / 2), cap)`.
#[inline]
pub fn murmur_count(entity_count: usize, cap: usize) -> usize {
    (entity_count / 2).min(cap)
}

/// Drone, murmurs and a noise bed, with periodic spoken fragments on top.
pub struct Cacophony {
    entities: Vec<Entity>,
    radius: f32,
}

impl Cacophony {
    pub fn new(entities: Vec<Entity>, radius: f32) -> Self {
        Self { entities, radius }
    }

    fn narrate(&mut self, cx: &mut StrategyContext<'_>) {
        if self.entities.is_empty() {
            return;
        }
        let entity = &self.entities[cx.rng.gen_range(0..self.entities.len())];
        match utterance_for(entity, self.radius, &mut *cx.rng) {
            Some(u) => {
                log::trace!("[cacophony] speak {:?}", u.text);
                cx.narrator.speak(u);
            }
            None => log::trace!("[cacophony] entity {} has nothing to say", entity.id),
        }
    }
}

impl Strategy for Cacophony {
    fn mode(&self) -> Mode {
        Mode::Cacophony
    }

    fn start(&mut self, cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        let timing = cx.config.timing();
        let n = self.entities.len();

        match Drone::build(cx.graph, cx.output, timing) {
            Ok(v) => cx.voices.add(Box::new(v)),
            Err(e) => log::warn!("[cacophony] drone: {}", e),
        }

        let murmurs = murmur_count(n, cx.config.murmur_cap);
        for i in 0..murmurs {
            let entity = &self.entities[i % n];
            match Murmur::build(
                cx.graph,
                cx.output,
                entity,
                self.radius,
                cx.heading,
                timing,
                &mut *cx.rng,
            ) {
                Ok(v) => cx.voices.add(Box::new(v)),
                Err(e) => log::warn!("[cacophony] murmur for {}: {}", entity.id, e),
            }
        }

        match NoiseBed::build(cx.graph, cx.output, n, timing) {
            Ok(v) => cx.voices.add(Box::new(v)),
            Err(e) => log::warn!("[cacophony] noise bed: {}", e),
        }

        if cx.config.narration {
            let ms = narration_interval_ms(
                n,
                cx.config.narration_base_interval_ms,
                cx.config.narration_min_interval_ms,
            );
            cx.every(Duration::from_millis(ms as u64), Task::Narrate);
        }
        log::debug!("[cacophony] {} entities, {} murmurs", n, murmurs);
        Ok(())
    }

    fn on_task(&mut self, task: Task, cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        if task == Task::Narrate {
            self.narrate(cx);
        }
        Ok(())
    }
}

use super::{Strategy, StrategyContext, Task};
use crate::constants::{MELODY_STEP_ACTIVITY_MS, MELODY_STEP_JITTER, MELODY_STEP_MAX_MS};
use crate::entity::{Entity, Mode};
use crate::graph::GraphResult;
use crate::voice::MelodicNote;
use rand::Rng;
use std::time::Duration;

/// Gap before the next note. `jitter` in [-1, 1] spreads it by the jitter
/// fraction; busier entities hurry the melody along.
#[inline]
pub fn melody_step_ms(activity: f32, jitter: f32, min_ms: u32) -> u32 {
    let base = MELODY_STEP_MAX_MS - MELODY_STEP_ACTIVITY_MS * activity.clamp(0.0, 1.0);
    let ms = base * (1.0 + MELODY_STEP_JITTER * jitter.clamp(-1.0, 1.0));
    (ms.max(0.0) as u32).max(min_ms)
}

/// Walks the entity list one note at a time, wrapping.
pub struct Melody {
    entities: Vec<Entity>,
    radius: f32,
    cursor: usize,
}

impl Melody {
    pub fn new(entities: Vec<Entity>, radius: f32) -> Self {
        Self {
            entities,
            radius,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn step(&mut self, cx: &mut StrategyContext<'_>) {
        if self.entities.is_empty() {
            return;
        }
        let entity = &self.entities[self.cursor % self.entities.len()];
        self.cursor = (self.cursor + 1) % self.entities.len();

        match MelodicNote::build(
            cx.graph,
            cx.output,
            entity,
            self.radius,
            cx.heading,
            cx.config.melody_echo,
            cx.config.timing(),
        ) {
            Ok(note) => {
                log::trace!("[melody] entity {} until {:.2}", entity.id, note.ends_at());
                cx.voices.add(Box::new(note));
            }
            Err(e) => log::warn!("[melody] note for {}: {}", entity.id, e),
        }

        let jitter = cx.rng.gen_range(-1.0..=1.0);
        let ms = melody_step_ms(entity.activity_score(), jitter, cx.config.melody_min_step_ms);
        cx.after(Duration::from_millis(ms as u64), Task::MelodyStep);
    }
}

impl Strategy for Melody {
    fn mode(&self) -> Mode {
        Mode::Melody
    }

    fn start(&mut self, cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        self.cursor = 0;
        self.step(cx);
        Ok(())
    }

    fn on_task(&mut self, task: Task, cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        if task == Task::MelodyStep {
            self.step(cx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_shortens_with_activity_and_respects_floor() {
        assert!(melody_step_ms(1.0, 0.0, 300) < melody_step_ms(0.0, 0.0, 300));
        assert_eq!(melody_step_ms(1.0, -1.0, 900), 900);
        for j in [-1.0, -0.3, 0.0, 0.4, 1.0] {
            assert!(melody_step_ms(1.0, j, 300) >= 300);
        }
    }
}

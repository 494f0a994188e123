use super::{Strategy, StrategyContext};
use crate::entity::{Entity, Mode};
use crate::graph::GraphResult;
use crate::voice::AmbientCluster;
use std::cmp::Ordering;

/// The closest `cap` entities; unknown distances sort last.
pub fn ambient_selection(entities: &[Entity], cap: usize) -> Vec<&Entity> {
    let mut picked: Vec<&Entity> = entities.iter().collect();
    picked.sort_by(|a, b| match (a.distance.is_finite(), b.distance.is_finite()) {
        (true, true) => a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    });
    picked.truncate(cap);
    picked
}

/// One sustained, breathing cluster per nearby entity.
pub struct Ambient {
    entities: Vec<Entity>,
    radius: f32,
}

impl Ambient {
    pub fn new(entities: Vec<Entity>, radius: f32) -> Self {
        Self { entities, radius }
    }
}

impl Strategy for Ambient {
    fn mode(&self) -> Mode {
        Mode::Ambient
    }

    fn start(&mut self, cx: &mut StrategyContext<'_>) -> GraphResult<()> {
        let timing = cx.config.timing();
        for entity in ambient_selection(&self.entities, cx.config.ambient_voice_cap) {
            match AmbientCluster::build(
                cx.graph,
                cx.output,
                entity,
                self.radius,
                cx.heading,
                timing,
                &mut *cx.rng,
            ) {
                Ok(v) => cx.voices.add(Box::new(v)),
                Err(e) => log::warn!("[ambient] skipped entity {}: {}", entity.id, e),
            }
        }
        log::debug!("[ambient] {} clusters", cx.voices.len());
        Ok(())
    }
}

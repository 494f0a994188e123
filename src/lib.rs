#![cfg(target_arch = "wasm32")]
//! Browser bindings for the sonification engine.
//!
//! JavaScript owns geolocation and data fetching; it hands entities, radius,
//! heading and mode to [`SonificationEngine`] and forwards compass updates.

use anyhow::Context;
use geosonic_core::{
    AudioGraph, Engine, EngineParts, EngineState, Entity, EntityBatch, Mode, SonifyConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

mod audio;
mod constants;
mod speech;
mod timers;

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn is_missing(value: &JsValue) -> bool {
    value.is_undefined() || value.is_null()
}

#[allow(deprecated)]
fn parse_config(value: &JsValue) -> anyhow::Result<SonifyConfig> {
    if is_missing(value) {
        return Ok(SonifyConfig::default());
    }
    value.into_serde().context("invalid engine config")
}

/// Unusable elements are skipped with a warning; only a non-array fails.
#[allow(deprecated)]
fn parse_entities(value: &JsValue) -> anyhow::Result<Vec<Entity>> {
    if is_missing(value) {
        return Ok(Vec::new());
    }
    let batch: EntityBatch = value
        .into_serde()
        .context("entities must be an array of {id, title, distance, bearing, activity, extract}")?;
    let offered = batch.len();
    let entities = batch.into_entities();
    if entities.len() < offered {
        log::warn!("[web] kept {} of {} entities", entities.len(), offered);
    }
    Ok(entities)
}

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("geosonic-web starting");
    Ok(())
}

/// The single audio session exposed to JavaScript.
#[wasm_bindgen]
pub struct SonificationEngine {
    engine: Engine,
}

#[wasm_bindgen]
impl SonificationEngine {
    /// `config` may be omitted or partial; missing fields take defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<SonificationEngine, JsValue> {
        let config = parse_config(&config).map_err(|e| js_err(format!("{:#}", e)))?;
        log::info!("[web] engine config: {:?}", config);
        let engine = Engine::new(EngineParts {
            config,
            graph_factory: Box::new(|| {
                audio::WebAudioGraph::new().map(|g| Box::new(g) as Box<dyn AudioGraph>)
            }),
            timers: Rc::new(timers::WindowTimers::new()),
            narrator: Box::new(speech::WebNarrator::new()),
            rng: StdRng::from_entropy(),
        });
        Ok(SonificationEngine { engine })
    }

    /// Create the audio context and master bus. Safe to call repeatedly.
    pub fn init(&self) -> bool {
        self.engine.init()
    }

    /// Resolve to `true` once audio is running. Call from a user gesture.
    pub fn resume(&self) -> js_sys::Promise {
        let engine = self.engine.clone();
        future_to_promise(async move { Ok(JsValue::from_bool(engine.resume().await)) })
    }

    /// Replace whatever is playing with `mode` ("ambient", "cacophony" or
    /// "melody") over `entities`.
    pub fn update(
        &self,
        mode: &str,
        entities: JsValue,
        radius: f32,
        heading: f32,
    ) -> Result<(), JsValue> {
        let mode: Mode = mode.parse().map_err(js_err)?;
        let entities = parse_entities(&entities).map_err(|e| js_err(format!("{:#}", e)))?;
        self.engine.update(mode, &entities, radius, heading);
        Ok(())
    }

    #[wasm_bindgen(js_name = setHeading)]
    pub fn set_heading(&self, heading: f32) {
        self.engine.set_heading(heading);
    }

    #[wasm_bindgen(js_name = stopAll)]
    pub fn stop_all(&self) {
        self.engine.stop_all();
    }

    /// "uninitialized", "ready", or the playing mode's name.
    pub fn state(&self) -> String {
        match self.engine.state() {
            EngineState::Uninitialized => "uninitialized".to_string(),
            EngineState::Ready => "ready".to_string(),
            EngineState::Playing(mode) => mode.to_string(),
        }
    }

    #[wasm_bindgen(js_name = voiceCount)]
    pub fn voice_count(&self) -> u32 {
        self.engine.voice_count() as u32
    }
}

use crate::constants::*;
use fnv::FnvHashMap;
use geosonic_core::{
    AudioGraph, ContextState, FilterKind, GraphError, GraphResult, NodeId, Param, ResumeFuture,
    Waveform,
};
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys as web;

fn create_err(kind: &'static str, e: JsValue) -> GraphError {
    log::error!("{} node error: {:?}", kind, e);
    GraphError::Create {
        kind,
        reason: format!("{:?}", e),
    }
}

fn platform(what: &str, e: JsValue) -> GraphError {
    GraphError::Platform(format!("{}: {:?}", what, e))
}

enum WebNode {
    Destination(web::AudioDestinationNode),
    Oscillator(web::OscillatorNode),
    Noise(web::AudioBufferSourceNode),
    Gain(web::GainNode),
    Panner(web::StereoPannerNode),
    Filter(web::BiquadFilterNode),
    Delay(web::DelayNode),
}

impl WebNode {
    fn audio_node(&self) -> &web::AudioNode {
        match self {
            WebNode::Destination(n) => n.as_ref(),
            WebNode::Oscillator(n) => n.as_ref(),
            WebNode::Noise(n) => n.as_ref(),
            WebNode::Gain(n) => n.as_ref(),
            WebNode::Panner(n) => n.as_ref(),
            WebNode::Filter(n) => n.as_ref(),
            WebNode::Delay(n) => n.as_ref(),
        }
    }

    fn source(&self) -> Option<&web::AudioScheduledSourceNode> {
        match self {
            WebNode::Oscillator(n) => Some(n.as_ref()),
            WebNode::Noise(n) => Some(n.as_ref()),
            _ => None,
        }
    }

    fn param(&self, param: Param) -> Option<web::AudioParam> {
        match (self, param) {
            (WebNode::Oscillator(n), Param::Frequency) => Some(n.frequency()),
            (WebNode::Oscillator(n), Param::Detune) => Some(n.detune()),
            (WebNode::Gain(n), Param::Gain) => Some(n.gain()),
            (WebNode::Panner(n), Param::Pan) => Some(n.pan()),
            (WebNode::Filter(n), Param::Frequency) => Some(n.frequency()),
            (WebNode::Filter(n), Param::Q) => Some(n.q()),
            (WebNode::Filter(n), Param::Detune) => Some(n.detune()),
            (WebNode::Delay(n), Param::DelayTime) => Some(n.delay_time()),
            _ => None,
        }
    }
}

/// [`AudioGraph`] over a browser `AudioContext`.
///
/// Nodes live in a table keyed by the handles given to the engine; removing
/// an entry disconnects the node and lets the browser collect it.
pub struct WebAudioGraph {
    ctx: web::AudioContext,
    nodes: FnvHashMap<NodeId, WebNode>,
    next: u32,
    destination: NodeId,
    noise: Option<web::AudioBuffer>,
}

impl WebAudioGraph {
    pub fn new() -> GraphResult<Self> {
        let ctx =
            web::AudioContext::new().map_err(|e| GraphError::Unavailable(format!("{:?}", e)))?;
        let destination = NodeId(0);
        let mut nodes = FnvHashMap::default();
        nodes.insert(destination, WebNode::Destination(ctx.destination()));
        log::info!(
            "[audio] context ready: {} Hz, {:?}",
            ctx.sample_rate(),
            ctx.state()
        );
        Ok(Self {
            ctx,
            nodes,
            next: 1,
            destination,
            noise: None,
        })
    }

    fn insert(&mut self, node: WebNode) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        self.nodes.insert(id, node);
        id
    }

    fn get(&self, id: NodeId) -> GraphResult<&WebNode> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn param(&self, node: NodeId, param: Param) -> GraphResult<web::AudioParam> {
        self.get(node)?
            .param(param)
            .ok_or(GraphError::NoSuchParam { node, param })
    }

    fn scheduled(&self, node: NodeId) -> GraphResult<&web::AudioScheduledSourceNode> {
        self.get(node)?
            .source()
            .ok_or_else(|| GraphError::InvalidState(node, "not a source".into()))
    }

    /// White noise shared by every noise source; the first request sets its length.
    fn noise_buffer(&mut self, seconds: f32) -> GraphResult<web::AudioBuffer> {
        if let Some(buffer) = &self.noise {
            return Ok(buffer.clone());
        }
        let sr = self.ctx.sample_rate();
        let len = ((sr * seconds.clamp(NOISE_MIN_SECS, NOISE_MAX_SECS)) as u32).max(1);
        let buffer = self
            .ctx
            .create_buffer(1, len, sr)
            .map_err(|e| create_err("noise buffer", e))?;
        let mut samples: Vec<f32> = vec![0.0; len as usize];
        // xorshift32 keeps the bed identical across sessions
        let mut seed = NOISE_SEED;
        for s in samples.iter_mut() {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            *s = (seed as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        buffer
            .copy_to_channel(&mut samples, 0)
            .map_err(|e| platform("noise fill", e))?;
        self.noise = Some(buffer.clone());
        Ok(buffer)
    }
}

impl AudioGraph for WebAudioGraph {
    fn current_time(&self) -> f64 {
        self.ctx.current_time()
    }

    fn state(&self) -> ContextState {
        match self.ctx.state() {
            web::AudioContextState::Running => ContextState::Running,
            web::AudioContextState::Closed => ContextState::Closed,
            _ => ContextState::Suspended,
        }
    }

    fn resume(&mut self) -> ResumeFuture {
        let promise = self.ctx.resume();
        Box::pin(async move {
            let promise = promise.map_err(|e| platform("resume", e))?;
            JsFuture::from(promise)
                .await
                .map(|_| ())
                .map_err(|e| platform("resume", e))
        })
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn oscillator(&mut self, waveform: Waveform, frequency: f32) -> GraphResult<NodeId> {
        let osc = web::OscillatorNode::new(&self.ctx).map_err(|e| create_err("oscillator", e))?;
        osc.set_type(match waveform {
            Waveform::Sine => web::OscillatorType::Sine,
            Waveform::Square => web::OscillatorType::Square,
            Waveform::Saw => web::OscillatorType::Sawtooth,
            Waveform::Triangle => web::OscillatorType::Triangle,
        });
        osc.frequency().set_value(frequency);
        Ok(self.insert(WebNode::Oscillator(osc)))
    }

    fn noise(&mut self, seconds: f32) -> GraphResult<NodeId> {
        let buffer = self.noise_buffer(seconds)?;
        let src =
            web::AudioBufferSourceNode::new(&self.ctx).map_err(|e| create_err("noise", e))?;
        src.set_buffer(Some(&buffer));
        src.set_loop(true);
        Ok(self.insert(WebNode::Noise(src)))
    }

    fn gain(&mut self, value: f32) -> GraphResult<NodeId> {
        let g = web::GainNode::new(&self.ctx).map_err(|e| create_err("gain", e))?;
        g.gain().set_value(value);
        Ok(self.insert(WebNode::Gain(g)))
    }

    fn stereo_panner(&mut self, pan: f32) -> GraphResult<NodeId> {
        let p = web::StereoPannerNode::new(&self.ctx).map_err(|e| create_err("panner", e))?;
        p.pan().set_value(pan.clamp(-1.0, 1.0));
        Ok(self.insert(WebNode::Panner(p)))
    }

    fn filter(&mut self, kind: FilterKind, frequency: f32, q: f32) -> GraphResult<NodeId> {
        let f = web::BiquadFilterNode::new(&self.ctx).map_err(|e| create_err("filter", e))?;
        f.set_type(match kind {
            FilterKind::Lowpass => web::BiquadFilterType::Lowpass,
            FilterKind::Bandpass => web::BiquadFilterType::Bandpass,
            FilterKind::Highpass => web::BiquadFilterType::Highpass,
        });
        f.frequency().set_value(frequency);
        f.q().set_value(q);
        Ok(self.insert(WebNode::Filter(f)))
    }

    fn delay(&mut self, seconds: f32) -> GraphResult<NodeId> {
        let d = self
            .ctx
            .create_delay_with_max_delay_time(MAX_DELAY_SECS)
            .map_err(|e| create_err("delay", e))?;
        d.delay_time()
            .set_value(seconds.clamp(0.0, MAX_DELAY_SECS as f32));
        Ok(self.insert(WebNode::Delay(d)))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        let src = self.get(from)?.audio_node();
        let dst = self.get(to)?.audio_node();
        src.connect_with_audio_node(dst)
            .map(|_| ())
            .map_err(|e| platform("connect", e))
    }

    fn connect_param(&mut self, from: NodeId, to: NodeId, param: Param) -> GraphResult<()> {
        let target = self.param(to, param)?;
        self.get(from)?
            .audio_node()
            .connect_with_audio_param(&target)
            .map_err(|e| platform("connect param", e))
    }

    fn disconnect(&mut self, node: NodeId) -> GraphResult<()> {
        if node == self.destination {
            return Err(GraphError::InvalidState(node, "destination".into()));
        }
        let web_node = self.nodes.remove(&node).ok_or(GraphError::UnknownNode(node))?;
        if let Some(src) = web_node.source() {
            // throws if never started or already stopped
            _ = src.stop();
        }
        web_node
            .audio_node()
            .disconnect()
            .map_err(|e| platform("disconnect", e))
    }

    fn set_value(&mut self, node: NodeId, param: Param, value: f32) -> GraphResult<()> {
        self.param(node, param)?.set_value(value);
        Ok(())
    }

    fn set_value_at(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()> {
        self.param(node, param)?
            .set_value_at_time(value, at)
            .map(|_| ())
            .map_err(|e| platform("setValueAtTime", e))
    }

    fn linear_ramp(&mut self, node: NodeId, param: Param, value: f32, at: f64) -> GraphResult<()> {
        self.param(node, param)?
            .linear_ramp_to_value_at_time(value, at)
            .map(|_| ())
            .map_err(|e| platform("linearRamp", e))
    }

    fn exponential_ramp(
        &mut self,
        node: NodeId,
        param: Param,
        value: f32,
        at: f64,
    ) -> GraphResult<()> {
        if value <= 0.0 {
            return Err(GraphError::InvalidState(
                node,
                "exponential ramp to <= 0".into(),
            ));
        }
        self.param(node, param)?
            .exponential_ramp_to_value_at_time(value, at)
            .map(|_| ())
            .map_err(|e| platform("exponentialRamp", e))
    }

    fn set_target(
        &mut self,
        node: NodeId,
        param: Param,
        target: f32,
        at: f64,
        time_constant: f32,
    ) -> GraphResult<()> {
        self.param(node, param)?
            .set_target_at_time(target, at, time_constant as f64)
            .map(|_| ())
            .map_err(|e| platform("setTargetAtTime", e))
    }

    fn cancel_scheduled(&mut self, node: NodeId, param: Param, from: f64) -> GraphResult<()> {
        self.param(node, param)?
            .cancel_scheduled_values(from)
            .map(|_| ())
            .map_err(|e| platform("cancelScheduledValues", e))
    }

    fn cancel_and_hold(&mut self, node: NodeId, param: Param, at: f64) -> GraphResult<()> {
        let p = self.param(node, param)?;
        // read before cancelling; the computed value still includes the ramp
        let held = p.value();
        p.cancel_scheduled_values(at)
            .map_err(|e| platform("cancelScheduledValues", e))?;
        p.set_value_at_time(held, at)
            .map(|_| ())
            .map_err(|e| platform("setValueAtTime", e))
    }

    fn start(&mut self, node: NodeId, at: f64) -> GraphResult<()> {
        self.scheduled(node)?
            .start_with_when(at)
            .map_err(|e| GraphError::InvalidState(node, format!("start: {:?}", e)))
    }

    fn stop(&mut self, node: NodeId, at: f64) -> GraphResult<()> {
        self.scheduled(node)?
            .stop_with_when(at)
            .map_err(|e| GraphError::InvalidState(node, format!("stop: {:?}", e)))
    }
}

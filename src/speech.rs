use crate::constants::SPEECH_LANG;
use geosonic_core::{Narrator, Utterance};
use web_sys as web;

/// Narration through the browser's `speechSynthesis`; silent where absent.
pub struct WebNarrator {
    synth: Option<web::SpeechSynthesis>,
}

impl WebNarrator {
    pub fn new() -> Self {
        let synth = web::window().and_then(|w| w.speech_synthesis().ok());
        if synth.is_none() {
            log::warn!("[speech] speechSynthesis unavailable; narration muted");
        }
        Self { synth }
    }
}

impl Narrator for WebNarrator {
    fn speak(&mut self, utterance: Utterance) {
        let Some(synth) = &self.synth else {
            return;
        };
        match web::SpeechSynthesisUtterance::new_with_text(&utterance.text) {
            Ok(u) => {
                u.set_lang(SPEECH_LANG);
                u.set_pitch(utterance.pitch);
                u.set_rate(utterance.rate);
                u.set_volume(utterance.volume);
                synth.speak(&u);
            }
            Err(e) => log::warn!("[speech] utterance error: {:?}", e),
        }
    }

    fn cancel(&mut self) {
        if let Some(synth) = &self.synth {
            synth.cancel();
        }
    }
}

use crate::constants::MAX_TIMER_MS;
use fnv::FnvHashMap;
use geosonic_core::{TimerId, Timers};
use std::cell::RefCell;
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys as web;

fn millis(d: Duration) -> i32 {
    d.as_millis().min(MAX_TIMER_MS as u128) as i32
}

/// `setTimeout` / `setInterval` on the global window.
///
/// One-shot closures free themselves when they run. Interval closures are
/// kept here until cleared, since the browser calls them repeatedly.
pub struct WindowTimers {
    window: Option<web::Window>,
    intervals: RefCell<FnvHashMap<i32, Closure<dyn FnMut()>>>,
}

impl WindowTimers {
    pub fn new() -> Self {
        Self {
            window: web::window(),
            intervals: RefCell::new(FnvHashMap::default()),
        }
    }
}

impl Timers for WindowTimers {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        let window = self.window.as_ref()?;
        let f = Closure::once_into_js(move || callback());
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(
            f.unchecked_ref(),
            millis(delay),
        ) {
            Ok(id) => Some(TimerId(id as i64)),
            Err(e) => {
                log::warn!("[timers] setTimeout error: {:?}", e);
                None
            }
        }
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> Option<TimerId> {
        let window = self.window.as_ref()?;
        let closure = Closure::wrap(callback);
        match window.set_interval_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            millis(period).max(1),
        ) {
            Ok(id) => {
                self.intervals.borrow_mut().insert(id, closure);
                Some(TimerId(id as i64))
            }
            Err(e) => {
                log::warn!("[timers] setInterval error: {:?}", e);
                None
            }
        }
    }

    fn clear(&self, id: TimerId) {
        let Some(window) = &self.window else {
            return;
        };
        let handle = id.0 as i32;
        // timeouts and intervals share one id pool
        window.clear_timeout_with_handle(handle);
        window.clear_interval_with_handle(handle);
        self.intervals.borrow_mut().remove(&handle);
    }
}

//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! One-shot timer.
//!
//! The teacher's original ran the handler on the GTK main loop via a
//! `glib::MainContext` channel, since GUI widgets may only be touched
//! from that thread. This process has no GUI thread, so the background
//! timer thread calls the handler directly.
//!

use std::sync::{Arc, Mutex};

const INFINITY: std::time::Duration = std::time::Duration::from_secs(9_999_999_999);

pub struct OneShotTimer {
    sender: crossbeam::channel::Sender<std::time::Instant>,
    handler: Arc<Mutex<Option<Box<dyn Fn() + Send + 'static>>>>,
}

impl OneShotTimer {
    pub fn new() -> OneShotTimer {
        let handler: Arc<Mutex<Option<Box<dyn Fn() + Send + 'static>>>> = Arc::new(Mutex::new(None));
        let (sender, receiver) = crossbeam::channel::unbounded::<std::time::Instant>();

        let handler_for_thread = Arc::clone(&handler);
        std::thread::spawn(move || {
            let mut target_time: Option<std::time::Instant> = None;

            loop {
                let recv_result = match &target_time {
                    Some(t) => {
                        let now = std::time::Instant::now();
                        if *t > now {
                            receiver.recv_timeout(*t - now)
                        } else {
                            receiver.recv_timeout(INFINITY)
                        }
                    }
                    None => receiver.recv_timeout(INFINITY),
                };

                match recv_result {
                    Ok(new_target_time) => target_time = Some(new_target_time),

                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                        if let Some(handler) = handler_for_thread.lock().unwrap().as_ref() {
                            (*handler)();
                        }
                        target_time = None;
                    }

                    Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        OneShotTimer { sender, handler }
    }

    /// Runs `handler` once after `delay`; any previously scheduled run
    /// is cancelled.
    pub fn run_once<F: Fn() + Send + 'static>(&self, delay: std::time::Duration, handler: F) {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
        let _ = self.sender.send(std::time::Instant::now() + delay);
    }

    pub fn stop(&self) {
        *self.handler.lock().unwrap() = None;
        let _ = self.sender.send(std::time::Instant::now() + INFINITY);
    }
}

impl Default for OneShotTimer {
    fn default() -> Self {
        OneShotTimer::new()
    }
}

//! Debounced outbound typing signal.
//!
//! The first keystroke with content emits `typingStart`; every keystroke
//! restarts an inactivity timer, and when it fires `typingStop` is emitted.
//! Clearing the input or finishing a send stops immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use skillchat_proto::message::UserId;
use tokio::task::JoinHandle;

use crate::transport::connection::SignalSender;

/// A one-shot delayed action that can be restarted or cancelled.
#[derive(Debug, Default)]
pub struct CancellableTimer {
    handle: Option<JoinHandle<()>>,
}

impl CancellableTimer {
    /// An idle timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Run `on_expire` after `delay`, cancelling any pending run.
    pub fn start<F>(&mut self, delay: Duration, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expire.await;
        }));
    }

    /// Cancel the pending run. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether a run is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Outbound typing state for the current user.
pub struct TypingSignal {
    signals: SignalSender,
    idle_timeout: Duration,
    /// Partner we last announced `typingStart` to.
    announced: Arc<Mutex<Option<UserId>>>,
    timer: CancellableTimer,
}

impl TypingSignal {
    /// Emit through `signals`, stopping after `idle_timeout` of silence.
    #[must_use]
    pub fn new(signals: SignalSender, idle_timeout: Duration) -> Self {
        Self {
            signals,
            idle_timeout,
            announced: Arc::new(Mutex::new(None)),
            timer: CancellableTimer::new(),
        }
    }

    /// Feed the current input text for `partner`.
    pub fn on_input(&mut self, partner: &UserId, text: &str) {
        if text.trim().is_empty() {
            self.stop();
            return;
        }

        {
            let mut announced = self.announced.lock();
            if announced.as_ref() != Some(partner) {
                if let Some(previous) = announced.take() {
                    self.signals.typing_stop(&previous);
                }
                self.signals.typing_start(partner);
                *announced = Some(partner.clone());
            }
        }

        let announced = Arc::clone(&self.announced);
        let signals = self.signals.clone();
        self.timer.start(self.idle_timeout, async move {
            let expired = announced.lock().take();
            if let Some(partner) = expired {
                tracing::trace!(partner = %partner, "typing idle, stopping");
                signals.typing_stop(&partner);
            }
        });
    }

    /// Emit `typingStop` if a start was announced, and cancel the timer.
    pub fn stop(&mut self) {
        self.timer.cancel();
        let announced = self.announced.lock().take();
        if let Some(partner) = announced {
            self.signals.typing_stop(&partner);
        }
    }

    /// A send to `partner` finished; always emits `typingStop` for it.
    pub fn send_completed(&mut self, partner: &UserId) {
        self.timer.cancel();
        let announced = self.announced.lock().take();
        if let Some(previous) = announced.filter(|p| p != partner) {
            self.signals.typing_stop(&previous);
        }
        self.signals.typing_stop(partner);
    }

    /// Whether a `typingStart` is outstanding.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.announced.lock().is_some()
    }
}

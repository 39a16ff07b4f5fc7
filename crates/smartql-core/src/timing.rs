// ── Throttle / debounce ──
//
// Rate-limiting wrappers around a callback, used on the variables-driven
// execution path of smart operations. Timers run on the ambient tokio
// runtime; every wrapper owns a `CancellationToken` so a stopped operation
// can drop its pending invocation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::util::lock;

pub type Callback<A> = Arc<dyn Fn(A) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Throttle { no_trailing: bool },
    Debounce { at_begin: bool },
}

struct TimerState {
    last_exec: Option<Instant>,
    /// Token of the scheduled timer, if any.
    pending: Option<CancellationToken>,
    /// Bumped on every schedule so a stale timer can tell it lost the race.
    generation: u64,
}

struct Limiter<A> {
    delay: Duration,
    mode: Mode,
    callback: Callback<A>,
    state: Mutex<TimerState>,
    cancel: CancellationToken,
}

/// A rate-limited callback produced by [`throttle`] or [`debounce`].
///
/// Cheap to clone; all clones share timer state.
pub struct RateLimited<A> {
    inner: Arc<Limiter<A>>,
}

impl<A> Clone for RateLimited<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// At most one invocation per `delay`; the last call inside a window is
/// replayed when the window closes.
pub fn throttle<A, F>(callback: F, delay: Duration) -> RateLimited<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    throttle_with(callback, delay, false)
}

/// [`throttle`] with the trailing invocation optionally disabled.
pub fn throttle_with<A, F>(callback: F, delay: Duration, no_trailing: bool) -> RateLimited<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    RateLimited::new(Arc::new(callback), delay, Mode::Throttle { no_trailing })
}

/// Defer invocation until `delay` has passed without another call. With
/// `at_begin`, the first call of a burst runs immediately and the rest of
/// the burst is swallowed.
pub fn debounce<A, F>(callback: F, delay: Duration, at_begin: bool) -> RateLimited<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    RateLimited::new(Arc::new(callback), delay, Mode::Debounce { at_begin })
}

impl<A: Send + 'static> RateLimited<A> {
    fn new(callback: Callback<A>, delay: Duration, mode: Mode) -> Self {
        Self {
            inner: Arc::new(Limiter {
                delay,
                mode,
                callback,
                state: Mutex::new(TimerState {
                    last_exec: None,
                    pending: None,
                    generation: 0,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Invoke the wrapper.
    pub fn call(&self, args: A) {
        let limiter = &self.inner;
        let now = Instant::now();

        // (wait, timer carries the call's arguments)
        let (run_now, timer): (bool, Option<(Duration, bool)>) = {
            let mut state = lock(&limiter.state);
            let elapsed = state.last_exec.map(|t| now.saturating_duration_since(t));
            let burst_in_progress = state.pending.is_some();

            if let Some(timer) = state.pending.take() {
                timer.cancel();
            }

            let plan = match limiter.mode {
                Mode::Throttle { no_trailing } => match elapsed {
                    Some(elapsed) if elapsed <= limiter.delay => {
                        let trailing = (!no_trailing).then(|| (limiter.delay - elapsed, true));
                        (false, trailing)
                    }
                    _ => (true, None),
                },
                // at-begin only re-arms the "burst in progress" marker
                Mode::Debounce { at_begin: true } => {
                    (!burst_in_progress, Some((limiter.delay, false)))
                }
                Mode::Debounce { at_begin: false } => (false, Some((limiter.delay, true))),
            };

            if plan.0 {
                state.last_exec = Some(now);
            }
            plan
        };

        match timer {
            Some((wait, true)) => self.schedule(wait, Some(args)),
            Some((wait, false)) => {
                self.schedule(wait, None);
                if run_now {
                    (limiter.callback)(args);
                }
            }
            None if run_now => (limiter.callback)(args),
            None => {}
        }
    }

    /// Drop any pending invocation. Later calls still run their immediate
    /// paths but never schedule a timer that fires.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        let pending = lock(&self.inner.state).pending.take();
        if let Some(timer) = pending {
            timer.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.inner.state).pending.is_some()
    }

    /// Box the wrapper as a plain callback.
    pub fn into_callback(self) -> Callback<A> {
        Arc::new(move |args| self.call(args))
    }

    /// Arm a timer. `args == None` only clears the burst marker.
    fn schedule(&self, wait: Duration, args: Option<A>) {
        let limiter = Arc::clone(&self.inner);
        let token = limiter.cancel.child_token();

        let generation = {
            let mut state = lock(&limiter.state);
            state.generation = state.generation.wrapping_add(1);
            state.pending = Some(token.clone());
            state.generation
        };

        let Ok(handle) = Handle::try_current() else {
            warn!("rate-limited callback used outside a tokio runtime; running immediately");
            lock(&limiter.state).pending = None;
            if let Some(args) = args {
                lock(&limiter.state).last_exec = Some(Instant::now());
                (limiter.callback)(args);
            }
            return;
        };

        handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(wait) => {
                    let fire = {
                        let mut state = lock(&limiter.state);
                        if state.generation == generation {
                            state.pending = None;
                            if args.is_some() {
                                state.last_exec = Some(Instant::now());
                            }
                            true
                        } else {
                            false
                        }
                    };
                    if fire {
                        if let Some(args) = args {
                            (limiter.callback)(args);
                        }
                    }
                }
            }
        });
    }
}

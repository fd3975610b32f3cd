//! Content state machine with watchdog recovery.
//!
//! Exactly one [`ContentState`] is current per session. Every mutation that
//! spans an `.await` claims a non-idle state with [`StateMachine::begin`] and
//! releases it with [`StateMachine::finish`]; a second `begin` while one is in
//! flight fails with [`Busy`] and changes nothing.
//!
//! ```text
//!            begin(s)                      finish(t)
//!   Idle ──────────────▶ s (gen n) ───────────────────▶ Idle
//!                          │
//!                          │ watchdog fires, gen still n
//!                          ▼
//!                    run reset hooks ─────────────────▶ Idle
//!                                       (late finish(t) is a no-op)
//! ```
//!
//! The generation counter ties a [`Transition`] to the state it claimed, so a
//! finish arriving after a watchdog reset cannot release some later
//! transition.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the session is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
    #[default]
    Idle,
    ZoomTransition,
    HierarchyEnforcement,
    BibliographyUpdate,
    EditorTransition,
    DragReorder,
}

/// `begin` was called while another transition was in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("busy: {0} in progress")]
pub struct Busy(pub ContentState);

/// Called when the watchdog forces a stuck state back to idle.
///
/// Hooks run while the stuck state is still current, so no new transition can
/// start underneath them. They must not call back into the state machine.
pub trait WatchdogHook: Send + Sync {
    fn on_watchdog_reset(&self, stuck: ContentState);
}

struct Current {
    state: ContentState,
    generation: u64,
    watchdog: Option<JoinHandle<()>>,
}

struct Machine {
    current: Mutex<Current>,
    tx: watch::Sender<ContentState>,
    hooks: Mutex<Vec<Arc<dyn WatchdogHook>>>,
    timeout: Duration,
    resets: AtomicU64,
}

/// Shared handle to the session's state machine.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Machine>,
}

/// Proof of a claimed state. Dropping it without [`StateMachine::finish`]
/// releases the state too.
#[must_use = "a transition holds the state machine until finished"]
pub struct Transition {
    machine: Arc<Machine>,
    state: ContentState,
    generation: u64,
}

impl Transition {
    pub fn state(&self) -> ContentState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Transition {
    fn drop(&mut self) {
        self.machine.release(self.generation);
    }
}

impl StateMachine {
    /// A new machine, idle, with the given watchdog timeout.
    pub fn new(watchdog: Duration) -> Self {
        let (tx, _) = watch::channel(ContentState::Idle);
        Self {
            inner: Arc::new(Machine {
                current: Mutex::new(Current {
                    state: ContentState::Idle,
                    generation: 0,
                    watchdog: None,
                }),
                tx,
                hooks: Mutex::new(Vec::new()),
                timeout: watchdog,
                resets: AtomicU64::new(0),
            }),
        }
    }

    /// Register a watchdog reset hook.
    pub fn add_hook(&self, hook: Arc<dyn WatchdogHook>) {
        self.inner.hooks.lock().push(hook);
    }

    pub fn state(&self) -> ContentState {
        self.inner.current.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == ContentState::Idle
    }

    /// Generation of the most recent transition.
    pub fn generation(&self) -> u64 {
        self.inner.current.lock().generation
    }

    /// Number of watchdog resets so far.
    pub fn reset_count(&self) -> u64 {
        self.inner.resets.load(Ordering::Relaxed)
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ContentState> {
        self.inner.tx.subscribe()
    }

    /// Claim `state`. Fails without side effects unless idle.
    pub fn begin(&self, state: ContentState) -> Result<Transition, Busy> {
        debug_assert_ne!(state, ContentState::Idle, "begin(Idle) is meaningless");
        let mut current = self.inner.current.lock();
        if current.state != ContentState::Idle {
            tracing::debug!(requested = %state, current = %current.state, "transition rejected");
            return Err(Busy(current.state));
        }
        current.generation += 1;
        current.state = state;
        let generation = current.generation;
        current.watchdog = self.spawn_watchdog(generation);
        drop(current);

        self.inner.tx.send_replace(state);
        tracing::info!(%state, generation, "transition started");
        Ok(Transition {
            machine: self.inner.clone(),
            state,
            generation,
        })
    }

    /// Release a transition. Returns `false` if the watchdog already did.
    pub fn finish(&self, transition: Transition) -> bool {
        let released = self.inner.release(transition.generation);
        if released {
            tracing::info!(state = %transition.state, generation = transition.generation, "transition finished");
        } else {
            tracing::debug!(
                state = %transition.state,
                generation = transition.generation,
                "late finish ignored"
            );
        }
        released
    }

    /// Run a synchronous mutation while idle. No transition can begin until
    /// `f` returns.
    pub fn with_idle<R>(&self, f: impl FnOnce() -> R) -> Result<R, Busy> {
        let current = self.inner.current.lock();
        if current.state != ContentState::Idle {
            return Err(Busy(current.state));
        }
        let out = f();
        drop(current);
        Ok(out)
    }

    /// Like [`with_idle`](Self::with_idle), but only if no transition has
    /// begun since `generation` was read. `Ok(None)` means one has, and `f`
    /// did not run.
    pub fn with_idle_since<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Result<Option<R>, Busy> {
        let current = self.inner.current.lock();
        if current.state != ContentState::Idle {
            return Err(Busy(current.state));
        }
        if current.generation != generation {
            return Ok(None);
        }
        let out = f();
        drop(current);
        Ok(Some(out))
    }

    fn spawn_watchdog(&self, generation: u64) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, watchdog disabled for this transition");
            return None;
        };
        let machine = self.inner.clone();
        Some(handle.spawn(async move {
            tokio::time::sleep(machine.timeout).await;
            machine.expire(generation);
        }))
    }
}

impl Machine {
    fn release(&self, generation: u64) -> bool {
        let mut current = self.current.lock();
        if current.generation != generation || current.state == ContentState::Idle {
            return false;
        }
        current.state = ContentState::Idle;
        if let Some(watchdog) = current.watchdog.take() {
            watchdog.abort();
        }
        drop(current);
        self.tx.send_replace(ContentState::Idle);
        true
    }

    fn expire(&self, generation: u64) {
        let stuck = {
            let mut current = self.current.lock();
            if current.generation != generation || current.state == ContentState::Idle {
                return;
            }
            // This task is the watchdog; don't abort ourselves.
            current.watchdog = None;
            current.state
        };

        tracing::warn!(state = %stuck, generation, timeout = ?self.timeout, "watchdog reset");
        let hooks: Vec<_> = self.hooks.lock().clone();
        for hook in hooks {
            hook.on_watchdog_reset(stuck);
        }

        {
            let mut current = self.current.lock();
            if current.generation == generation {
                current.state = ContentState::Idle;
            }
        }
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.tx.send_replace(ContentState::Idle);
    }
}

//! Single-writer message-reduction core.
//!
//! An [`Actor`] owns one state value and a pure reducer. Every `send` is
//! enqueued onto the actor's dedicated task and applied one at a time in
//! FIFO arrival order, so there is never more than one reduction in flight
//! and observers see state transitions in exactly the order messages were
//! sent. `send` itself never blocks the caller.
//!
//! Reducers are plain function pointers of `(state, message) -> state`; they
//! have no access to the actor handle, which rules out reentrant sends by
//! construction.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Pure state transition function applied to every incoming message.
pub type Reducer<S, M> = fn(&S, &M) -> S;

type Observer<S> = Box<dyn Fn(&S) + Send>;
type Completion<S> = Box<dyn FnOnce(S) + Send>;

enum Command<S, M> {
    Send(M, Option<Completion<S>>),
    Observe(u64, Observer<S>),
    Unobserve(u64),
}

/// Handle to a spawned actor. Cloning shares the same state cell and queue.
pub struct Actor<S, M> {
    commands: mpsc::UnboundedSender<Command<S, M>>,
    state_rx: watch::Receiver<S>,
    next_observer_id: Arc<AtomicU64>,
}

impl<S, M> Clone for Actor<S, M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state_rx: self.state_rx.clone(),
            next_observer_id: self.next_observer_id.clone(),
        }
    }
}

impl<S, M> fmt::Debug for Actor<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor").finish_non_exhaustive()
    }
}

impl<S, M> Actor<S, M>
where
    S: Clone + Send + Sync + 'static,
    M: Send + 'static,
{
    /// Spawns the actor task with an initial state and reducer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(initial_state: S, reducer: Reducer<S, M>) -> Self {
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial_state.clone());

        tokio::spawn(async move {
            let mut state = initial_state;
            let mut observers: HashMap<u64, Observer<S>> = HashMap::new();

            while let Some(command) = commands_rx.recv().await {
                match command {
                    Command::Send(message, completion) => {
                        state = reducer(&state, &message);
                        for observer in observers.values() {
                            observer(&state);
                        }
                        state_tx.send_replace(state.clone());
                        if let Some(completion) = completion {
                            completion(state.clone());
                        }
                    }
                    Command::Observe(id, observer) => {
                        observers.insert(id, observer);
                    }
                    Command::Unobserve(id) => {
                        observers.remove(&id);
                    }
                }
            }
            debug!("actor task stopped, all handles dropped");
        });

        Self {
            commands: commands_tx,
            state_rx,
            next_observer_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues a message for reduction. Fire-and-forget; never blocks.
    pub fn send(&self, message: M) {
        let _ = self.commands.send(Command::Send(message, None));
    }

    /// Enqueues a message and invokes `completion` with the post-reduction
    /// state once this specific message has been applied and all observers
    /// have run.
    pub fn send_with(&self, message: M, completion: impl FnOnce(S) + Send + 'static) {
        let _ = self
            .commands
            .send(Command::Send(message, Some(Box::new(completion))));
    }

    /// Registers an observer invoked after every reduction.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    pub fn observe(&self, observer: impl Fn(&S) + Send + 'static) -> Subscription {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.commands.send(Command::Observe(id, Box::new(observer)));

        let commands = self.commands.clone();
        Subscription::new(move || {
            let _ = commands.send(Command::Unobserve(id));
        })
    }

    /// Snapshot of the current state.
    ///
    /// Safe from any task: the snapshot was copied out on the actor's own
    /// task, never read from shared mutable state.
    pub fn state(&self) -> S {
        self.state_rx.borrow().clone()
    }

    /// Watch channel mirroring the state after every reduction.
    pub fn watch(&self) -> watch::Receiver<S> {
        self.state_rx.clone()
    }
}

/// Opaque handle removing one observer registration.
///
/// `unsubscribe` is idempotent and safe to invoke from any thread; dropping
/// the subscription without calling it leaves the observer registered for
/// the actor's lifetime.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        if let Ok(mut slot) = self.cancel.lock() {
            if let Some(cancel) = slot.take() {
                cancel();
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

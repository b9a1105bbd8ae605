use tokio::sync::{mpsc, oneshot};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Run state actor has stopped")]
    Closed,
}

/// Progress counters for all runs of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// no more runs will be submitted
    pub poisoned: bool,
}

impl RunState {
    /// Only meaningful on a snapshot returned by [`RunStateHandle::drain`].
    pub fn finished(&self) -> bool {
        self.poisoned && self.submitted == self.completed
    }
}

type Update = Box<dyn FnOnce(&mut RunState) + Send>;
type Listener = Box<dyn FnMut(&RunState) -> anyhow::Result<()> + Send>;

enum Command {
    Update(Update),
    Subscribe(Listener),
    Drain(oneshot::Sender<RunState>),
}

enum Notice {
    Applied(RunState),
    Subscribe(Listener),
    Drained(oneshot::Sender<RunState>, RunState),
}

/// Handle to a task that exclusively owns a [`RunState`].
///
/// Updates are applied one at a time in the order they were sent. Listeners
/// run on a second task, once per applied update and in the same order, so a
/// slow listener never holds up the writer. The actor stops once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct RunStateHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RunStateHandle {
    /// Start the actor. Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(rx, notices_tx));
        tokio::spawn(fan_out(notices_rx));
        Self { tx }
    }

    /// Queue a change to the state.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RunState) + Send + 'static,
    {
        self.send(Command::Update(Box::new(f)));
    }

    pub fn incr_submitted(&self) {
        self.update(|s| s.submitted += 1);
    }

    pub fn incr_completed(&self) {
        self.update(|s| s.completed += 1);
    }

    pub fn incr_failed(&self) {
        self.update(|s| s.failed += 1);
    }

    /// Mark that no more runs will be submitted.
    pub fn poison(&self) {
        self.update(|s| s.poisoned = true);
    }

    /// Register a listener for every update applied after this one is queued.
    /// A listener returning an error is logged and keeps receiving updates.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: FnMut(&RunState) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(Command::Subscribe(Box::new(listener)));
    }

    /// Wait until every update queued so far has been applied and every
    /// listener has seen it, then return the resulting state.
    pub async fn drain(&self) -> Result<RunState, Error> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Command::Drain(reply))
            .map_err(|_| Error::Closed)?;
        done.await.map_err(|_| Error::Closed)
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("run state actor has stopped; dropping update");
        }
    }
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Command>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    let mut state = RunState::default();
    while let Some(command) = rx.recv().await {
        let notice = match command {
            Command::Update(f) => {
                f(&mut state);
                log::trace!("run state: {:?}", state);
                Notice::Applied(state)
            }
            Command::Subscribe(listener) => Notice::Subscribe(listener),
            Command::Drain(reply) => Notice::Drained(reply, state),
        };
        if notices.send(notice).is_err() {
            log::warn!("run state listeners have stopped");
        }
    }
}

async fn fan_out(mut rx: mpsc::UnboundedReceiver<Notice>) {
    let mut listeners: Vec<Listener> = Vec::with_capacity(4);
    while let Some(notice) = rx.recv().await {
        match notice {
            Notice::Applied(state) => {
                for listener in &mut listeners {
                    if let Err(e) = listener(&state) {
                        log::warn!("run state listener failed: {e:#}");
                    }
                }
            }
            Notice::Subscribe(listener) => listeners.push(listener),
            Notice::Drained(reply, state) => {
                // the caller may have given up waiting:
                let _ = reply.send(state);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_drain_orders_updates_and_listeners() -> anyhow::Result<()> {
        let state = RunStateHandle::spawn();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        state.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        state.incr_submitted();
        state.incr_submitted();
        state.incr_completed();
        state.poison();

        let snapshot = state.drain().await?;
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.completed, 1);
        assert!(snapshot.poisoned);
        assert!(!snapshot.finished());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        state.incr_completed();
        assert!(state.drain().await?.finished());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_listeners_see_updates_in_order() -> anyhow::Result<()> {
        let state = RunStateHandle::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        state.subscribe(move |s| {
            if let Ok(mut record) = record.lock() {
                record.push((s.submitted, s.completed, s.poisoned));
            }
            Ok(())
        });

        let mut producers = Vec::new();
        for _ in 0..8 {
            let handle = state.clone();
            producers.push(tokio::spawn(async move { handle.incr_submitted() }));
        }
        for producer in producers {
            producer.await?;
        }
        state.incr_completed();
        state.poison();
        state.drain().await?;

        let seen = seen.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(seen.len(), 10);
        let submitted: Vec<u64> = seen.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(submitted, (1..=8).chain([8, 8]).collect::<Vec<_>>());
        assert_eq!(seen[8], (8, 1, false));
        assert_eq!(seen[9], (8, 1, true));
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() -> anyhow::Result<()> {
        let state = RunStateHandle::spawn();
        let calls = Arc::new(AtomicUsize::new(0));
        state.subscribe(|_| Err(anyhow::anyhow!("listener broke")));
        let counter = calls.clone();
        state.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        state.incr_submitted();
        state.incr_failed();
        let snapshot = state.drain().await?;
        assert_eq!(snapshot.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}

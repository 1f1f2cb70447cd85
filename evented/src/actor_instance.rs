use std::{
    collections::VecDeque,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use futures::channel::oneshot;
use rand::{SeedableRng, rngs::StdRng};
use tokio::{select, sync::mpsc::error::TryRecvError, time::Instant};

use crate::{
    base::{ActorId, SequenceNr, panic_msg},
    behavior::{Command, Event, EventSourcedBehavior, PersistentState},
    config::PersistenceConfig,
    context::Registry,
    debug,
    effect::{Action, Effect, SideEffect},
    error,
    errors::{PersistenceError, Rejection, StoreError},
    handler::Dispatch,
    info,
    journal::{EventJournal, EventWrite},
    message::{CmdPack, CmdRx, Continuation, Outcome, RawSignal, SigRx, SigTx},
    recovery::RecoveryEngine,
    scheduler::Scheduler,
    signal::Signal,
    snapshot::{SnapshotMetadata, SnapshotStore},
    stash::{Stash, StashOverflow},
    status::{Monitor, Status},
    supervision::{Decision, SupervisorStrategy},
    trace, warn,
};

/// Everything that outlives a single incarnation of the actor.
pub(crate) struct ActorConfig<C, E, S> {
    pub(crate) id: ActorId,
    pub(crate) behavior: EventSourcedBehavior<C, E, S>,

    pub(crate) journal: Arc<dyn EventJournal>,
    pub(crate) snapshot_store: Arc<dyn SnapshotStore>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) config: PersistenceConfig,

    pub(crate) cmd_rx: CmdRx<C>,
    pub(crate) sig_tx: SigTx, // Handed to background snapshot and deletion tasks
    pub(crate) sig_rx: SigRx,

    pub(crate) monitor: Monitor,
    pub(crate) registry: Registry,
}

/// One incarnation: recovered state plus the buffers that die with it.
struct ActorInstance<'a, C, E, S> {
    config: &'a mut ActorConfig<C, E, S>,

    state: S,
    sequence_nr: SequenceNr,

    // Commands that arrived while a persist was in flight
    buffer: Stash<CmdPack<C>>,
    // Commands deferred by a stash rule
    user_stash: Stash<CmdPack<C>>,
    unstashed: VecDeque<CmdPack<C>>,

    pending_bg: usize,
    pending_failure: Option<Arc<PersistenceError>>,
    stop_requested: bool,
    mailbox_closed: bool,
}

enum Lifecycle {
    Running,
    Restarting { attempt: u32, delay: Duration },
    Exit,
}

// Continuation of an incarnation
enum Cont {
    Process,
    Stop,
    Fail(Arc<PersistenceError>),
}

enum Exit {
    Stopped,
    Failed(Arc<PersistenceError>),
}

// Implementations

impl<C, E, S> ActorConfig<C, E, S>
where
    C: Command,
    E: Event,
    S: PersistentState,
{
    pub(crate) async fn exec(mut self) {
        let mut rng = StdRng::from_entropy();
        let mut failures = 0u32;
        let mut lifecycle = Lifecycle::Running;

        loop {
            lifecycle = match lifecycle {
                Lifecycle::Running => {
                    let started = Instant::now();

                    match ActorInstance::new(&mut self).run().await {
                        Exit::Stopped => Lifecycle::Exit,
                        Exit::Failed(e) => {
                            if self.ran_stably_since(started) {
                                failures = 0;
                            }

                            match self.behavior.supervisor.decide(&e, failures, &mut rng) {
                                Decision::Stop => {
                                    error!("{} stopped after failure: {e}", self.persistence_id());
                                    Lifecycle::Exit
                                }
                                Decision::Restart { attempt, delay } => {
                                    warn!(
                                        "{} failed: {e}, restart {attempt} in {delay:?}",
                                        self.persistence_id()
                                    );
                                    failures = attempt.saturating_add(1);
                                    Lifecycle::Restarting { attempt, delay }
                                }
                            }
                        }
                    }
                }
                Lifecycle::Restarting { attempt, delay } => {
                    if self.back_off(attempt, delay).await {
                        Lifecycle::Running
                    } else {
                        Lifecycle::Exit
                    }
                }
                Lifecycle::Exit => break,
            };
        }

        self.exit();
    }

    fn persistence_id(&self) -> &crate::persistence_id::PersistenceId {
        &self.behavior.persistence_id
    }

    fn ran_stably_since(&self, started: Instant) -> bool {
        match &self.behavior.supervisor {
            SupervisorStrategy::RestartWithBackoff(backoff) => backoff
                .reset_after()
                .is_some_and(|reset_after| started.elapsed() >= reset_after),
            SupervisorStrategy::Stop => false,
        }
    }

    /// Wait out the restart delay. Commands arriving meanwhile are dropped.
    /// `false` if the actor should stop instead of restarting.
    async fn back_off(&mut self, attempt: u32, delay: Duration) -> bool {
        self.monitor.report(Status::BackingOff { attempt, delay });
        self.drop_queued_commands();

        let (tx, mut rx) = oneshot::channel();
        let cancellable = match self.scheduler.schedule_once(
            delay,
            Box::new(move || {
                let _ = tx.send(());
            }),
        ) {
            Ok(cancellable) => cancellable,
            Err(e) => {
                error!("{} could not schedule restart: {e}", self.persistence_id());
                return false;
            }
        };

        loop {
            select! {
                biased;
                Some(sig) = self.sig_rx.recv() => {
                    if matches!(sig, RawSignal::Stop) {
                        cancellable.cancel();
                        return false;
                    }
                }
                mb_cmd = self.cmd_rx.recv() => match mb_cmd {
                    Some(_) => trace!("{} dropped a command in backoff", self.persistence_id()),
                    None => {
                        cancellable.cancel();
                        return false;
                    }
                },
                res = &mut rx => return res.is_ok(),
            }
        }
    }

    fn drop_queued_commands(&mut self) {
        let mut dropped = 0usize;

        loop {
            match self.cmd_rx.try_recv() {
                Ok(_) => dropped += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if dropped > 0 {
            debug!(
                "{} dropped {dropped} queued commands after failure",
                self.persistence_id()
            );
        }
    }

    fn exit(&mut self) {
        // Refuse new commands before anyone can observe `Stopped`
        self.cmd_rx.close();
        self.drop_queued_commands();

        {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            if registry.get(&self.behavior.persistence_id) == Some(&self.id) {
                registry.remove(&self.behavior.persistence_id);
            }
        }

        info!("{} stopped", self.persistence_id());
        self.monitor.report(Status::Stopped);
    }
}

impl<'a, C, E, S> ActorInstance<'a, C, E, S>
where
    C: Command,
    E: Event,
    S: PersistentState,
{
    fn new(config: &'a mut ActorConfig<C, E, S>) -> Self {
        let capacity = config.config.stash_capacity;
        let overflow = config.config.stash_overflow;
        let state = config.behavior.empty_state.clone();

        Self {
            config,
            state,
            sequence_nr: 0,
            buffer: Stash::new(capacity, overflow),
            user_stash: Stash::new(capacity, overflow),
            unstashed: VecDeque::new(),
            pending_bg: 0,
            pending_failure: None,
            stop_requested: false,
            mailbox_closed: false,
        }
    }

    async fn run(mut self) -> Exit {
        let mut k = match self.recover().await {
            Ok(()) => Cont::Process,
            Err(e) => Cont::Fail(e),
        };

        loop {
            k = match k {
                Cont::Process => self.process().await,

                Cont::Stop => {
                    self.teardown().await;
                    return Exit::Stopped;
                }
                Cont::Fail(e) => {
                    self.teardown().await;
                    return match self.stop_requested {
                        true => Exit::Stopped,
                        false => Exit::Failed(e),
                    };
                }
            };
        }
    }

    async fn recover(&mut self) -> Result<(), Arc<PersistenceError>> {
        self.config.monitor.report(Status::Recovering);

        let (res, phase) = {
            let behavior = &self.config.behavior;
            let mut engine = RecoveryEngine::new(
                &behavior.persistence_id,
                &*self.config.journal,
                &*self.config.snapshot_store,
                &behavior.event_handler,
            );

            let res = engine
                .run(behavior.recovery, &behavior.empty_state)
                .await;
            (res, engine.phase())
        };

        match res {
            Ok(recovered) => {
                self.state = recovered.state;
                self.sequence_nr = recovered.sequence_nr;

                info!(
                    "{} recovered at sequence nr {} ({} events replayed)",
                    self.config.behavior.persistence_id, recovered.sequence_nr, recovered.replayed
                );
                self.signal(Signal::RecoveryCompleted {
                    sequence_nr: recovered.sequence_nr,
                });

                Ok(())
            }
            Err(e) => {
                let cause = Arc::new(e);
                error!(
                    "{} recovery failed in phase {phase:?}: {cause}",
                    self.config.behavior.persistence_id
                );
                self.signal(Signal::RecoveryFailed {
                    cause: cause.clone(),
                });

                Err(cause)
            }
        }
    }

    async fn process(&mut self) -> Cont {
        self.config.monitor.report(Status::Running);

        loop {
            loop {
                match self.config.sig_rx.try_recv() {
                    Ok(sig) => {
                        if let Some(k) = self.process_sig(sig) {
                            return k;
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if let Some(cmd_k) = self.unstashed.pop_front().or_else(|| self.buffer.pop()) {
                if let Some(k) = self.process_cmd(cmd_k).await {
                    return k;
                }
                continue;
            }

            if self.mailbox_closed {
                return Cont::Stop;
            }

            select! {
                biased;
                Some(sig) = self.config.sig_rx.recv() => if let Some(k) = self.process_sig(sig) {
                    return k;
                },
                mb_cmd = self.config.cmd_rx.recv() => match mb_cmd {
                    Some(cmd_k) => if let Some(k) = self.process_cmd(cmd_k).await {
                        return k;
                    },
                    None => {
                        debug!("{} has no references left", self.config.behavior.persistence_id);
                        return Cont::Stop;
                    }
                },
            }
        }
    }

    /// Background completions are handled in place; only a stop request
    /// changes the continuation.
    fn process_sig(&mut self, sig: RawSignal) -> Option<Cont> {
        if sig.is_completion() {
            self.pending_bg = self.pending_bg.saturating_sub(1);
        }

        match sig {
            RawSignal::Stop => return Some(Cont::Stop),

            RawSignal::SnapshotSaved { metadata, result } => match result {
                Ok(()) => self.on_snapshot_saved(metadata.sequence_nr),
                Err(e) => self.signal(Signal::SnapshotFailed {
                    metadata,
                    cause: Arc::new(e),
                }),
            },
            RawSignal::SnapshotsDeleted { up_to, result } => match result {
                Ok(()) => trace!(
                    "{} deleted snapshots up to {up_to}",
                    self.config.behavior.persistence_id
                ),
                Err(e) => self.signal(Signal::DeleteSnapshotsFailed {
                    up_to,
                    cause: Arc::new(e),
                }),
            },
            RawSignal::EventsDeleted { up_to, result } => match result {
                Ok(()) => trace!(
                    "{} deleted events up to {up_to}",
                    self.config.behavior.persistence_id
                ),
                Err(e) => self.signal(Signal::DeleteEventsFailed {
                    up_to,
                    cause: Arc::new(e),
                }),
            },
        }

        None
    }

    async fn process_cmd(&mut self, (cmd, k): CmdPack<C>) -> Option<Cont> {
        let dispatch = catch_unwind(AssertUnwindSafe(|| {
            self.config.behavior.command_handler.handle(&self.state, cmd)
        }));

        let Effect {
            action,
            side_effects,
        } = match dispatch {
            Ok(Dispatch::Effect(effect)) => effect,
            Ok(Dispatch::Stash(cmd)) => return self.stash((cmd, k)),
            Err(e) => {
                return Some(Cont::Fail(Arc::new(PersistenceError::CommandHandler(
                    panic_msg(e),
                ))));
            }
        };

        match action {
            Action::Persist(events) => self.persist(events, side_effects, k).await,
            Action::None => {
                k.send(Ok(Outcome::Applied));
                self.run_side_effects(side_effects)
            }
            Action::Unhandled => {
                warn!(
                    "{} left a command unhandled",
                    self.config.behavior.persistence_id
                );
                k.send(Ok(Outcome::Unhandled));
                self.run_side_effects(side_effects)
            }
        }
    }

    fn stash(&mut self, cmd_k: CmdPack<C>) -> Option<Cont> {
        let Err((_, k)) = self.user_stash.push(cmd_k) else {
            trace!(
                "{} stashed a command ({} in stash)",
                self.config.behavior.persistence_id,
                self.user_stash.len()
            );
            return None;
        };

        let capacity = self.user_stash.capacity();
        match self.user_stash.overflow() {
            StashOverflow::Reject => {
                warn!(
                    "{} stash is full, rejecting command",
                    self.config.behavior.persistence_id
                );
                k.send(Err(Rejection::StashFull { capacity }));
                None
            }
            // Nothing to wait for here, blocking would never end
            StashOverflow::Block | StashOverflow::Fail => Some(Cont::Fail(Arc::new(
                PersistenceError::StashOverflow { capacity },
            ))),
        }
    }

    async fn persist(
        &mut self,
        events: Vec<E>,
        side_effects: Vec<SideEffect<S>>,
        k: Continuation,
    ) -> Option<Cont> {
        let mut writes = Vec::with_capacity(events.len());
        for event in &events {
            let payload = match postcard::to_stdvec(event) {
                Ok(payload) => payload,
                Err(e) => return Some(Cont::Fail(Arc::new(e.into()))),
            };

            writes.push(EventWrite {
                payload: payload.into(),
                tags: self.config.behavior.tags(event),
            });
        }

        let from = self.sequence_nr;
        let persistence_id = self.config.behavior.persistence_id.clone();

        self.config.monitor.report(Status::Persisting);
        trace!("{persistence_id} appending {} events after {from}", events.len());

        let journal = self.config.journal.clone();
        let mut append = journal.append(persistence_id.clone(), from, writes);

        let res = loop {
            let blocked = self.buffer.is_full() && self.buffer.overflow() == StashOverflow::Block;
            let reading = !blocked && !self.mailbox_closed && self.pending_failure.is_none();

            select! {
                biased;
                res = &mut append => break res,
                Some(sig) = self.config.sig_rx.recv() => {
                    if let Some(Cont::Stop) = self.process_sig(sig) {
                        debug!("{persistence_id} stopping once the persist completes");
                        self.stop_requested = true;
                    }
                }
                mb_cmd = self.config.cmd_rx.recv(), if reading => match mb_cmd {
                    Some(cmd_k) => self.buffer_cmd(cmd_k),
                    None => self.mailbox_closed = true,
                },
            }
        };

        let to = match res {
            Ok(to) => to,
            Err(e) => {
                error!("{persistence_id} failed to persist events after {from}: {e}");
                return Some(Cont::Fail(Arc::new(PersistenceError::Persist(e))));
            }
        };

        let expected = from + events.len() as SequenceNr;
        if to != expected {
            return Some(Cont::Fail(Arc::new(PersistenceError::Persist(
                StoreError::Corrupt(format!(
                    "journal reported sequence nr {to} after appending up to {expected}"
                )),
            ))));
        }

        let mut snapshot_requested = false;
        for (sequence_nr, event) in (from + 1..).zip(&events) {
            let behavior = &self.config.behavior;

            self.state = match behavior.event_handler.fold(&self.state, event, sequence_nr) {
                Ok(state) => state,
                Err(e) => return Some(Cont::Fail(Arc::new(e))),
            };

            if let Some(should_snapshot) = &behavior.should_snapshot {
                snapshot_requested |= should_snapshot(&self.state, event, sequence_nr);
            }
        }

        self.sequence_nr = to;
        self.config.monitor.report(Status::Running);
        trace!("{persistence_id} persisted up to {to}");

        k.send(Ok(Outcome::Persisted { sequence_nr: to }));

        if let Some(Cont::Fail(e)) = self.run_side_effects(side_effects) {
            return Some(Cont::Fail(e));
        }

        if snapshot_requested || self.config.behavior.retention.crosses_boundary(from, to) {
            self.save_snapshot(to);
        }

        if let Some(e) = self.pending_failure.take() {
            return Some(Cont::Fail(e));
        }

        self.stop_requested.then_some(Cont::Stop)
    }

    fn buffer_cmd(&mut self, cmd_k: CmdPack<C>) {
        let Err((_, k)) = self.buffer.push(cmd_k) else {
            return;
        };

        let capacity = self.buffer.capacity();
        match self.buffer.overflow() {
            StashOverflow::Reject | StashOverflow::Block => {
                warn!(
                    "{} stash is full while persisting, rejecting command",
                    self.config.behavior.persistence_id
                );
                k.send(Err(Rejection::StashFull { capacity }));
            }
            StashOverflow::Fail => {
                error!(
                    "{} stash overflow while persisting",
                    self.config.behavior.persistence_id
                );
                self.pending_failure = Some(Arc::new(PersistenceError::StashOverflow { capacity }));
            }
        }
    }

    fn run_side_effects(&mut self, side_effects: Vec<SideEffect<S>>) -> Option<Cont> {
        for side_effect in side_effects {
            match side_effect {
                SideEffect::Callback(f) => {
                    if let Err(e) = catch_unwind(AssertUnwindSafe(|| f(&self.state))) {
                        return Some(Cont::Fail(Arc::new(PersistenceError::SideEffect(
                            panic_msg(e),
                        ))));
                    }
                }
                SideEffect::Stop => self.stop_requested = true,
                SideEffect::UnstashAll => {
                    let unstashed = self.user_stash.drain();
                    self.unstashed.extend(unstashed);
                }
            }
        }

        self.stop_requested.then_some(Cont::Stop)
    }

    fn save_snapshot(&mut self, sequence_nr: SequenceNr) {
        let metadata = SnapshotMetadata {
            persistence_id: self.config.behavior.persistence_id.clone(),
            sequence_nr,
        };

        let state: Bytes = match postcard::to_stdvec(&self.state) {
            Ok(state) => state.into(),
            Err(e) => {
                return self.signal(Signal::SnapshotFailed {
                    metadata,
                    cause: Arc::new(StoreError::Encode(e)),
                });
            }
        };

        debug!("{} saving snapshot at {sequence_nr}", metadata.persistence_id);

        let store = self.config.snapshot_store.clone();
        self.spawn_bg(async move {
            let result = store.save(metadata.clone(), state).await;
            RawSignal::SnapshotSaved { metadata, result }
        });
    }

    fn on_snapshot_saved(&mut self, sequence_nr: SequenceNr) {
        let retention = self.config.behavior.retention;
        let persistence_id = &self.config.behavior.persistence_id;

        debug!("{persistence_id} saved snapshot at {sequence_nr}");

        if let Some(up_to) = retention.delete_events_up_to(sequence_nr) {
            let journal = self.config.journal.clone();
            let persistence_id = persistence_id.clone();

            self.spawn_bg(async move {
                let result = journal.delete_up_to(persistence_id, up_to).await;
                RawSignal::EventsDeleted { up_to, result }
            });
        }

        if let Some(up_to) = retention.delete_snapshots_up_to(sequence_nr) {
            let store = self.config.snapshot_store.clone();
            let persistence_id = self.config.behavior.persistence_id.clone();

            self.spawn_bg(async move {
                let result = store.delete_up_to(persistence_id, up_to).await;
                RawSignal::SnapshotsDeleted { up_to, result }
            });
        }
    }

    fn spawn_bg<F>(&mut self, task: F)
    where
        F: Future<Output = RawSignal> + Send + 'static,
    {
        self.pending_bg += 1;
        let sig_tx = self.config.sig_tx.clone();

        tokio::spawn(async move {
            let _ = sig_tx.send(task.await);
        });
    }

    fn signal(&self, signal: Signal) {
        if signal.is_failure() {
            warn!("{} signal {signal:?}", self.config.behavior.persistence_id);
        } else {
            debug!("{} signal {}", self.config.behavior.persistence_id, signal.name());
        }

        let Some(handler) = &self.config.behavior.signal_handler else {
            return;
        };

        if let Err(e) = catch_unwind(AssertUnwindSafe(|| handler(&self.state, &signal))) {
            error!(
                "{} signal handler panicked on {}: {}",
                self.config.behavior.persistence_id,
                signal.name(),
                panic_msg(e)
            );
        }
    }

    /// Let outstanding snapshot and deletion work finish before the
    /// incarnation goes away.
    async fn teardown(&mut self) {
        while self.pending_bg > 0 {
            match self.config.sig_rx.recv().await {
                Some(sig) => {
                    if let Some(Cont::Stop) = self.process_sig(sig) {
                        self.stop_requested = true;
                    }
                }
                None => break,
            }
        }
    }
}

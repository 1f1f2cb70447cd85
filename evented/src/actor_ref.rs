use std::{fmt::Debug, marker::PhantomData, time::Duration};

use futures::{channel::oneshot, future::BoxFuture};

use crate::{
    base::ActorId,
    behavior::Command,
    errors::{RequestError, SendError},
    message::{CmdTx, Continuation, Outcome, RawSignal, SigTx},
    persistence_id::PersistenceId,
    status::{Status, StatusRx},
};

/// Address of a running persistent actor.
///
/// Once every reference is dropped the mailbox closes and the actor stops
/// after the commands already queued.
pub struct PersistentRef<C: Command> {
    pub(crate) id: ActorId,
    pub(crate) persistence_id: PersistenceId,
    pub(crate) cmd_tx: CmdTx<C>,
    pub(crate) sig_tx: SigTx,
    pub(crate) status_rx: StatusRx,
}

pub struct CmdRequest<'a, C: Command> {
    target: &'a PersistentRef<C>,
    cmd: C,
}

pub struct StopRequest<'a> {
    sig_tx: &'a SigTx,
    status_rx: StatusRx,
}

pub struct Deadline<'a, R>
where
    R: IntoFuture + Send,
{
    request: R,
    duration: Duration,
    _phantom: PhantomData<&'a ()>,
}

// Implementations

impl<C: Command> PersistentRef<C> {
    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn persistence_id(&self) -> &PersistenceId {
        &self.persistence_id
    }

    /// Fire and forget.
    pub fn tell(&self, cmd: C) -> Result<(), SendError<C>> {
        self.send_raw(cmd, Continuation::Nil)
    }

    /// Send and wait for the outcome. Resolves once events are persisted and
    /// folded, before side effects run.
    pub fn ask(&self, cmd: C) -> CmdRequest<'_, C> {
        CmdRequest { target: self, cmd }
    }

    /// Ask the actor to stop, ahead of queued commands. An in-flight persist
    /// completes first. Resolves once the actor has stopped.
    pub fn stop(&self) -> StopRequest<'_> {
        StopRequest {
            sig_tx: &self.sig_tx,
            status_rx: self.status_rx.clone(),
        }
    }

    /// Resolves once the actor has stopped, without asking it to.
    pub async fn stopped(&self) {
        let mut status_rx = self.status_rx.clone();
        // Sender gone means the task is over
        let _ = status_rx.wait_for(Status::is_stopped).await;
    }

    pub fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> StatusRx {
        self.status_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    pub(crate) fn send_raw(&self, cmd: C, k: Continuation) -> Result<(), SendError<C>> {
        self.cmd_tx
            .send((cmd, k))
            .map_err(|e| SendError::ClosedTx(e.0.0))
    }
}

impl<C: Command> Clone for PersistentRef<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            persistence_id: self.persistence_id.clone(),
            cmd_tx: self.cmd_tx.clone(),
            sig_tx: self.sig_tx.clone(),
            status_rx: self.status_rx.clone(),
        }
    }
}

impl<C: Command> Debug for PersistentRef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentRef")
            .field("id", &self.id)
            .field("persistence_id", &self.persistence_id)
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}

impl<C: Command> PartialEq for PersistentRef<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C: Command> Eq for PersistentRef<C> {}

impl<'a, C: Command> CmdRequest<'a, C> {
    pub fn timeout(self, duration: Duration) -> Deadline<'a, Self> {
        Deadline {
            request: self,
            duration,
            _phantom: PhantomData,
        }
    }
}

impl<'a, C: Command> IntoFuture for CmdRequest<'a, C> {
    type Output = Result<Outcome, RequestError<C>>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();

            self.target.send_raw(self.cmd, Continuation::reply(tx))?;

            match rx.await {
                Err(_) => Err(RequestError::ClosedRx),
                Ok(Err(rejection)) => Err(RequestError::Rejected(rejection)),
                Ok(Ok(outcome)) => Ok(outcome),
            }
        })
    }
}

impl<'a> IntoFuture for StopRequest<'a> {
    type Output = ();
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move {
            // Already gone if this fails, the status says so
            let _ = self.sig_tx.send(RawSignal::Stop);
            let _ = self.status_rx.wait_for(Status::is_stopped).await;
        })
    }
}

impl<'a, R, T, M> IntoFuture for Deadline<'a, R>
where
    R: 'a + IntoFuture<Output = Result<T, RequestError<M>>> + Send,
    R::IntoFuture: Send,
    T: 'a,
    M: 'a,
{
    type Output = R::Output;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            match tokio::time::timeout(self.duration, self.request).await {
                Ok(res) => res,
                Err(_) => Err(RequestError::Timeout),
            }
        })
    }
}

//! Message-passing boundary in front of the manager
//!
//! Callers hold a cloneable [`ServiceHandle`]; each request travels as a
//! [`Command`] over a bounded channel and is answered on a oneshot. Commits
//! answer with a receiver that resolves once reversion has finished.

use crate::manager::{ReloadSummary, RollbackManager};
use rbk_errors::Error;
use rbk_types::{CommitStatus, RollbackId, RollbackInfo};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const COMMAND_BUFFER: usize = 64;

/// Requests understood by the service loop
#[derive(Debug)]
pub enum Command {
    GetAvailable {
        reply: oneshot::Sender<Vec<RollbackInfo>>,
    },
    GetRecentlyCommitted {
        reply: oneshot::Sender<Vec<RollbackInfo>>,
    },
    Commit {
        id: RollbackId,
        status: oneshot::Sender<CommitStatus>,
    },
    Reload {
        reply: oneshot::Sender<Result<ReloadSummary, Error>>,
    },
    ExpireForPackage {
        package: String,
        reply: oneshot::Sender<Result<Vec<RollbackId>, Error>>,
    },
}

pub struct RollbackService;

impl RollbackService {
    /// Start serving `manager`; the loop ends when every handle is dropped
    #[must_use]
    pub fn spawn(manager: Arc<RollbackManager>) -> ServiceHandle {
        let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                dispatch(&manager, command).await;
            }
            tracing::debug!("rollback service stopped");
        });
        ServiceHandle { tx }
    }
}

async fn dispatch(manager: &Arc<RollbackManager>, command: Command) {
    match command {
        Command::GetAvailable { reply } => {
            let _ = reply.send(manager.get_available_rollbacks().await);
        }
        Command::GetRecentlyCommitted { reply } => {
            let _ = reply.send(manager.get_recently_committed_rollbacks().await);
        }
        Command::Commit { id, status } => {
            manager.commit_async(id, status);
        }
        // these wait on entry locks; keep the loop responsive meanwhile
        Command::Reload { reply } => {
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                let _ = reply.send(manager.reload().await);
            });
        }
        Command::ExpireForPackage { package, reply } => {
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                let _ = reply.send(manager.expire_for_package(&package).await);
            });
        }
    }
}

/// Client side of a running [`RollbackService`]
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| service_stopped())?;
        response.await.map_err(|_| service_stopped())
    }

    /// # Errors
    ///
    /// Returns an error if the service has stopped.
    pub async fn get_available_rollbacks(&self) -> Result<Vec<RollbackInfo>, Error> {
        self.request(|reply| Command::GetAvailable { reply }).await
    }

    /// # Errors
    ///
    /// Returns an error if the service has stopped.
    pub async fn get_recently_committed_rollbacks(&self) -> Result<Vec<RollbackInfo>, Error> {
        self.request(|reply| Command::GetRecentlyCommitted { reply })
            .await
    }

    /// Request a commit; the returned receiver resolves when it finishes
    ///
    /// # Errors
    ///
    /// Returns an error if the service has stopped.
    pub async fn commit(&self, id: RollbackId) -> Result<oneshot::Receiver<CommitStatus>, Error> {
        let (status, receiver) = oneshot::channel();
        self.tx
            .send(Command::Commit { id, status })
            .await
            .map_err(|_| service_stopped())?;
        Ok(receiver)
    }

    /// # Errors
    ///
    /// Returns an error if the service has stopped or the reload fails.
    pub async fn reload(&self) -> Result<ReloadSummary, Error> {
        self.request(|reply| Command::Reload { reply }).await?
    }

    /// # Errors
    ///
    /// Returns an error if the service has stopped or an expiry fails.
    pub async fn expire_for_package(
        &self,
        package: impl Into<String>,
    ) -> Result<Vec<RollbackId>, Error> {
        let package = package.into();
        self.request(|reply| Command::ExpireForPackage { package, reply })
            .await?
    }
}

fn service_stopped() -> Error {
    Error::internal("rollback service is not running")
}

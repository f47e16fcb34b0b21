//! Handle to a bound server.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::lifecycle::{checked_deadline, Shutdown};
use crate::net::address::Endpoint;
use crate::net::group::ConnectionGroup;
use crate::net::listener::Listener;

type DisposeCallback = Box<dyn FnOnce() + Send>;

/// A running server.
///
/// Owns the accept loop and the live-connection group. Dropping the handle
/// stops accepting without waiting for connections.
pub struct DisposableServer {
    local: Endpoint,
    shutdown: Shutdown,
    accept_task: Option<JoinHandle<Listener>>,
    group: Option<ConnectionGroup>,
    disposed: watch::Sender<bool>,
    callbacks: Vec<DisposeCallback>,
}

impl DisposableServer {
    pub(crate) fn new(
        local: Endpoint,
        shutdown: Shutdown,
        accept_task: JoinHandle<Listener>,
        group: Option<ConnectionGroup>,
    ) -> Self {
        let (disposed, _) = watch::channel(false);
        Self {
            local,
            shutdown,
            accept_task: Some(accept_task),
            group,
            disposed,
            callbacks: Vec::new(),
        }
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Bound socket address; `None` for filesystem sockets.
    pub fn address(&self) -> Option<SocketAddr> {
        self.local.as_inet()
    }

    pub fn port(&self) -> u16 {
        self.local.port()
    }

    /// Live connections, when connection tracking is enabled.
    pub fn group(&self) -> Option<&ConnectionGroup> {
        self.group.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.borrow()
    }

    /// Resolves once the listener has been released.
    pub fn on_dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.disposed.subscribe();
        async move {
            let _ = rx.wait_for(|disposed| *disposed).await;
        }
    }

    /// Run `callback` once the listener has been released.
    pub fn do_on_dispose<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Stop accepting, drain, then release the listener.
    ///
    /// With connection tracking the call waits for every live connection to
    /// finish; connections still open when `timeout` expires are force-closed
    /// and `Error::Timeout` is returned once the listener is released.
    /// Without tracking the listener is released right away and open
    /// connections keep running.
    pub async fn dispose_now(mut self, timeout: Duration) -> Result<()> {
        let deadline = checked_deadline(timeout)?;
        tracing::info!(
            address = %self.local,
            tracked = self.group.as_ref().map(ConnectionGroup::len),
            "Disposing server"
        );

        self.shutdown.trigger();
        let listener = match self.accept_task.take() {
            Some(task) => match task.await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    tracing::error!(address = %self.local, error = %e, "Accept loop terminated abnormally");
                    None
                }
            },
            None => None,
        };

        let drained = match &self.group {
            Some(group) => match tokio::time::timeout_at(deadline, group.wait_empty()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let forced = group.close_all();
                    tracing::warn!(
                        address = %self.local,
                        remaining = forced,
                        timeout = ?timeout,
                        "Drain timed out, closing remaining connections"
                    );
                    Err(Error::Timeout {
                        operation: "server dispose",
                        timeout,
                    })
                }
            },
            None => Ok(()),
        };

        drop(listener);
        self.release();
        tracing::info!(address = %self.local, "Server disposed");
        drained
    }

    fn release(&mut self) {
        release(&self.disposed, std::mem::take(&mut self.callbacks));
    }
}

fn release(disposed: &watch::Sender<bool>, callbacks: Vec<DisposeCallback>) {
    if disposed.send_replace(true) {
        return;
    }
    for callback in callbacks {
        callback();
    }
}

impl Drop for DisposableServer {
    /// Stops accepting without draining. Disposal waiters are released once
    /// the accept loop has handed back (and dropped) the listener. Outside a
    /// runtime the loop is aborted and waiters are released right away.
    fn drop(&mut self) {
        self.shutdown.trigger();
        let Some(task) = self.accept_task.take() else {
            self.release();
            return;
        };

        let (placeholder, _) = watch::channel(true);
        let disposed = std::mem::replace(&mut self.disposed, placeholder);
        let callbacks = std::mem::take(&mut self.callbacks);
        let local = self.local.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = task.await {
                        tracing::error!(address = %local, error = %e, "Accept loop terminated abnormally");
                    }
                    release(&disposed, callbacks);
                    tracing::debug!(address = %local, "Dropped server released");
                });
            }
            Err(_) => {
                task.abort();
                release(&disposed, callbacks);
            }
        }
    }
}

impl fmt::Debug for DisposableServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableServer")
            .field("local", &self.local)
            .field("group", &self.group)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

//! Accept loop and per-connection driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::error::Error;
use crate::lifecycle::ShutdownListener;
use crate::net::connection::{BoxedStream, Connection, ConnectionIdentity, ConnectionLifecycle};
use crate::net::group::ConnectionGroup;
use crate::net::listener::Listener;
use crate::net::pipeline::{handler, Handler, Pipeline};
use crate::tls::sni::SniResolver;

/// Pause after a failed accept so a persistent error (EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a connection task needs, shared by all of them.
pub(crate) struct AcceptContext {
    pub(crate) resolver: Option<SniResolver>,
    pub(crate) pipeline: Pipeline,
    pub(crate) group: Option<ConnectionGroup>,
    pub(crate) handler: Handler,
}

/// Handler used when none is configured: read and discard until the peer closes.
pub(crate) fn discard_handler() -> Handler {
    handler(|mut connection: Connection| async move {
        let mut buf = [0u8; 4096];
        while connection.read(&mut buf).await? > 0 {}
        Ok::<(), std::io::Error>(())
    })
}

/// Accept until shutdown is triggered, then hand the listener back so the
/// caller decides when it is released.
pub(crate) async fn accept_loop(
    listener: Listener,
    context: Arc<AcceptContext>,
    mut shutdown: ShutdownListener,
) -> Listener {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let identity = ConnectionIdentity::new(listener.local_endpoint().clone(), peer);
                    let lifecycle = admit(&context, identity);
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        serve_connection(context, stream, lifecycle).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    tracing::warn!(address = %listener.local_endpoint(), error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    tracing::debug!(address = %listener.local_endpoint(), "Accept loop stopped");
    listener
}

/// Fire `Connected` and join the group on the accept loop itself, so a
/// disposal that stops the loop always sees every accepted connection.
pub(crate) fn admit(context: &AcceptContext, identity: ConnectionIdentity) -> Arc<ConnectionLifecycle> {
    let lifecycle = ConnectionLifecycle::new(
        identity,
        context.pipeline.observers().clone(),
        context.group.clone(),
    );
    lifecycle.connected();
    lifecycle
}

async fn serve_connection(context: Arc<AcceptContext>, stream: BoxedStream, lifecycle: Arc<ConnectionLifecycle>) {
    let stream = context.pipeline.wrap_transport(stream);
    let mut connection = match &context.resolver {
        Some(resolver) => {
            let secured = tokio::select! {
                result = resolver.accept(stream, &lifecycle) => result,
                _ = lifecycle.close_requested() => {
                    lifecycle.dispose();
                    return;
                }
            };
            match secured {
                Ok(secured) => {
                    let mut connection = Connection::new(secured.stream, Arc::clone(&lifecycle));
                    connection.set_tls(secured.info);
                    connection.set_sni(secured.completion);
                    connection
                }
                Err(e) => {
                    lifecycle.report_error(&e);
                    lifecycle.dispose();
                    return;
                }
            }
        }
        None => Connection::new(stream, Arc::clone(&lifecycle)),
    };

    context.pipeline.apply(&mut connection);
    lifecycle.configured();

    tokio::select! {
        result = (context.handler)(connection) => {
            if let Err(e) = result {
                lifecycle.report_error(&Error::Io(e));
            }
        }
        _ = lifecycle.close_requested() => {
            tracing::debug!(connection = %lifecycle.identity(), "Connection force-closed");
        }
    }

    lifecycle.dispose();
}

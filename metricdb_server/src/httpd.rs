//! The HTTP accept loop.
//!
//! ## Metrics
//!
//! `connection.limit`: Maximum number of concurrent connections
//! `connection.current`: Connections currently being served
//!

use std::{future::Future, sync::Arc};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::service::Service;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use metrics::gauge;
use tokio::{net::TcpListener, pin, sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

/// Errors produced by [`run_httpd`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accept connections on `listener` until `shutdown` resolves, serving each
/// with a fresh service from `make_service`.
///
/// At most `concurrency_limit` connections are served at once. A connection
/// arriving while every slot is taken is closed without a response. Once
/// `shutdown` resolves the listener is closed and in-flight connections run
/// to completion.
///
/// # Errors
///
/// Function will return an error if the listener's local address cannot be
/// read.
pub async fn run_httpd<SF, S, F>(
    listener: TcpListener,
    concurrency_limit: usize,
    shutdown: F,
    make_service: SF,
) -> Result<(), Error>
where
    SF: Fn() -> S,
    S: Service<
            hyper::Request<hyper::body::Incoming>,
            Response = hyper::Response<BoxBody<Bytes, hyper::Error>>,
            Error = hyper::Error,
        > + Send
        + 'static,
    S::Future: Send + 'static,
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    let slots = Arc::new(Semaphore::new(concurrency_limit));
    let builder = auto::Builder::new(TokioExecutor::new());
    let mut connections = JoinSet::new();

    gauge!("connection.limit").set(concurrency_limit as f64);
    info!(%local_addr, concurrency_limit, "metricdb HTTP API listening");

    pin!(shutdown);
    loop {
        gauge!("connection.current").set(connections.len() as f64);

        tokio::select! {
            () = &mut shutdown => break,

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("accept failed: {err}");
                        continue;
                    }
                };
                let Ok(slot) = Arc::clone(&slots).try_acquire_owned() else {
                    warn!(%peer, "all {concurrency_limit} connection slots busy, closing");
                    continue;
                };

                let builder = builder.clone();
                let service = make_service();
                connections.spawn(async move {
                    if let Err(err) = builder.serve_connection(TokioIo::new(stream), service).await {
                        debug!(%peer, "connection ended with error: {err}");
                    }
                    drop(slot);
                });
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    info!(
        in_flight = connections.len(),
        "shutdown requested, draining connections"
    );
    while connections.join_next().await.is_some() {}
    gauge!("connection.current").set(0.0);
    info!("metricdb HTTP API stopped");
    Ok(())
}

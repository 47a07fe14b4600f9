//! The metricdb HTTP server.
//!
//! This library holds everything `metricdbd` needs: configuration parsing, the
//! connection accept loop and request routing onto a shared
//! [`metricdb::Repository`].

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::{future::Future, sync::Arc};

use hyper::service::service_fn;
use metricdb::Repository;
use tokio::net::TcpListener;

pub mod config;
mod handlers;
pub mod httpd;

/// Serve the HTTP API for `repository` on `listener` until `shutdown`
/// resolves.
///
/// # Errors
///
/// Function will return an error if the accept loop cannot start.
pub async fn serve<F>(
    listener: TcpListener,
    concurrent_requests_max: usize,
    repository: Arc<Repository>,
    shutdown: F,
) -> Result<(), httpd::Error>
where
    F: Future<Output = ()>,
{
    httpd::run_httpd(listener, concurrent_requests_max, shutdown, move || {
        let repository = Arc::clone(&repository);
        service_fn(move |req| {
            let repository = Arc::clone(&repository);
            async move { handlers::srv(req, &repository).await }
        })
    })
    .await
}

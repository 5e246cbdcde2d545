//! Server run loop

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

use crate::{Error, create_router, state::AppState};

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an IO error if the listener fails.
pub async fn run_server<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let app = create_router(state);

    info!(%addr, "redfishd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("redfishd stopped accepting connections");
    Ok(())
}

use std::net::{SocketAddr, TcpListener};
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `primary`, falling back to `fallback` for paths it does not have.
///
/// The port is bound before this returns, so an address already in use is
/// reported to the caller instead of the server thread.
pub fn start(
    port: u16,
    primary: Utf8PathBuf,
    fallback: Utf8PathBuf,
) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
    listener.set_nonblocking(true)?;

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    Ok(thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(listener, primary, fallback))
    }))
}

async fn serve(listener: TcpListener, primary: Utf8PathBuf, fallback: Utf8PathBuf) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let router = Router::new()
        .fallback_service(ServeDir::new(primary).fallback(ServeDir::new(fallback)));

    axum::serve(listener, router).await?;

    Ok(())
}

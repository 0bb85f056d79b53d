//! Runnable demo: a `MessageConnection` over stdio that echoes its `echo`
//! request back and logs `log` notifications, until the peer closes stdin.

use std::sync::{Arc, Mutex};

use jsonrpc_conn::{CodecRegistry, ConnectionConfig, MessageConnection};
use tokio::sync::oneshot;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting stdio echo server demo");

    let codecs = Arc::new(CodecRegistry::with_defaults());
    let connection = MessageConnection::from_duplex(
        jsonrpc_conn::StdioDuplex::new(),
        codecs,
        ConnectionConfig::default(),
    );

    connection.on_request("echo", |params, _token| async move {
        Ok(params.unwrap_or(serde_json::Value::Null))
    })?;

    connection.on_notification("log", |params| async move {
        info!("peer logged: {:?}", params);
    })?;

    let (closed_tx, closed_rx) = oneshot::channel();
    let closed_tx = Mutex::new(Some(closed_tx));
    connection.on_close(move || {
        if let Some(tx) = closed_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(());
        }
    });

    connection.listen()?;
    info!("listening on stdio");

    let _ = closed_rx.await;
    info!("peer closed the connection, shutting down");
    Ok(())
}

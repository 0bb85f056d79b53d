//! Runnable demo: spawns `stdio-echo-server` as a child process, wires a
//! `MessageConnection` to its stdin/stdout, and round-trips a few `echo`
//! requests plus a `log` notification.

use std::sync::Arc;

use jsonrpc_conn::{CodecRegistry, ConnectionConfig, MessageConnection};
use tokio::process::Command;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting stdio echo client demo");

    let server_path =
        std::env::var("ECHO_SERVER_PATH").unwrap_or_else(|_| "stdio-echo-server".to_string());

    let mut child = Command::new(server_path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()?;

    let stdin = child.stdin.take().ok_or("server child has no stdin")?;
    let stdout = child.stdout.take().ok_or("server child has no stdout")?;

    let codecs = Arc::new(CodecRegistry::with_defaults());
    let connection = MessageConnection::new(stdout, stdin, codecs, ConnectionConfig::default());
    connection.listen()?;

    connection
        .send_notification("log", Some(serde_json::json!({"event": "client-started"})))
        .await?;

    for i in 0..3 {
        let result = connection
            .send_request("echo", Some(serde_json::json!({"n": i})), None)
            .await?;
        info!("echo({i}) -> {result}");
    }

    connection.dispose();
    let _ = child.kill().await;
    Ok(())
}

//! Line echo over either transport, driven entirely by `tick`.
//!
//! ```text
//! cargo run --example echo -- server stream 4000
//! cargo run --example echo -- client stream 127.0.0.1 4000
//! ```

use std::time::Duration;
use tickwire::metrics::{format_metrics, global_metrics};
use tickwire::{ClientManager, FailurePolicy, ManagerConfig, ServerManager, TransportKind};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} server <stream|datagram> <port>", args[0]);
        eprintln!("       {} client <stream|datagram> <host> <port>", args[0]);
        return Ok(());
    }

    let transport = match args[2].as_str() {
        "stream" => TransportKind::Stream,
        "datagram" => TransportKind::Datagram,
        other => {
            eprintln!("Unknown transport '{other}'");
            return Ok(());
        }
    };
    let config = ManagerConfig::new()
        .transport(transport)
        .line_mode(true)
        .poll_timeout(Duration::from_millis(10));

    match args[1].as_str() {
        "server" => run_server(config, args[3].parse()?).await,
        "client" if args.len() > 4 => run_client(config, &args[3], args[4].parse()?).await,
        _ => {
            eprintln!("Mode must be 'server' or 'client <host> <port>'");
            Ok(())
        }
    }
}

async fn run_server(config: ManagerConfig, port: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut server: ServerManager = ServerManager::new(config);
    server.listen(port, false).await?;
    info!(addr = ?server.local_addr(), "Echo server listening");

    loop {
        server.tick().await?;

        for conn in server.drain_new().iter().filter_map(|weak| weak.upgrade()) {
            info!(conn = %conn.id(), peer = %conn.peer_addr(), "Client joined");
        }
        for closed in server.drain_closed() {
            info!(conn = %closed.id, peer = %closed.peer_addr, "Client left");
        }

        for conn in server.connections() {
            while let Some(line) = conn.get_line() {
                info!(conn = %conn.id(), line = %String::from_utf8_lossy(&line), "Echo");
                let mut reply = line.to_vec();
                reply.push(b'\n');
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = %conn.id(), error = %e, "Echo failed");
                    break;
                }
            }
        }
    }
}

async fn run_client(
    config: ManagerConfig,
    host: &str,
    port: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let reliable = config.transport == TransportKind::Datagram;
    let mut client: ClientManager = ClientManager::new(config);
    client.connect(host, port).await?;
    info!(host, port, "Connected");

    let messages = ["Hello, tickwire!", "second line", "final line"];
    for message in messages {
        let line = format!("{message}\n");
        if reliable {
            client.send_with(line.as_bytes(), FailurePolicy::Resend).await?;
        } else {
            client.send(line.as_bytes()).await?;
        }
    }

    let mut echoed = 0;
    while echoed < messages.len() {
        if let Err(e) = client.tick().await {
            error!(error = %e, "Connection lost");
            return Err(e.into());
        }
        while let Some(line) = client.get_line()? {
            info!(line = %String::from_utf8_lossy(&line), "Echoed");
            echoed += 1;
        }
    }

    client.close();
    info!("{}", format_metrics(&global_metrics().snapshot()));
    Ok(())
}

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::CodecError;
use crate::commands;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, config).await
}

/// Accepts connections forever. Every connection gets its own task and a handle to the one store
/// created here.
pub async fn serve(listener: TcpListener, config: Config) -> Result<(), Error> {
    let store = Store::new();

    info!("Redis server listening on {}", listener.local_addr()?);

    loop {
        let (socket, client_address) = listener.accept().await?;
        let store = store.clone();
        let max_frame_size = config.max_frame_size;
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, store, max_frame_size).await
            {
                error!("Connection error: {}", e);
            }
        });
    }
}

#[instrument(
    name = "connection",
    skip(stream, store, max_frame_size),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    max_frame_size: usize,
) -> Result<(), Error> {
    let mut conn = Connection::with_max_frame_size(stream, max_frame_size);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            // A malformed request is answered, the connection stays open.
            Err(CodecError::Frame(e)) => {
                warn!("Received malformed frame: {}", e);
                conn.write_frame(Frame::Error(e.to_string())).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        info!("Received frame from client: {:?}", frame);
        let res = commands::handle(frame, &store);
        info!("Sending response to client: {:?}", res);

        match conn.write_frame(res).await {
            Ok(()) => {}
            Err(CodecError::Frame(e)) => {
                warn!("Failed to encode response: {}", e);
                conn.write_frame(Frame::Error(e.to_string())).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Connection closed");
    Ok(())
}

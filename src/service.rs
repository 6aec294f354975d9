//! TCP front end for the codec.
//!
//! Every frame is a big-endian `u64` length followed by that many bytes. A
//! client sends a bincode [`WatermarkRequest`] frame and then an image frame,
//! and gets back one bincode [`WatermarkResponse`] frame.

use crate::config::ServiceConfig;
use crate::fingerprint::{analyze_async, watermark_async};
use crate::{WatermarkRequest, WatermarkResponse};
use anyhow::{anyhow, bail, Result};
use log::{debug, error, info, warn};
use socket2::SockRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;

/// Upper bound on a response frame read by [`request`].
const MAX_RESPONSE_BYTES: u64 = 256 * 1024 * 1024;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, limit: u64) -> Result<Vec<u8>> {
    let len = reader.read_u64().await?;
    if len > limit {
        bail!("frame of {} bytes exceeds limit of {} bytes", len, limit);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    writer.write_u64(body.len() as u64).await?;
    writer.write_all(body).await?;
    Ok(())
}

/// Configure TCP socket for large image transfers
fn configure_socket(stream: &TcpStream, buffer_bytes: usize) {
    if buffer_bytes == 0 {
        return;
    }
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_send_buffer_size(buffer_bytes) {
        warn!("Could not set send buffer size: {}", e);
    }
    if let Err(e) = sock.set_recv_buffer_size(buffer_bytes) {
        warn!("Could not set receive buffer size: {}", e);
    }
}

/// Binds `config.bind_addr` and serves forever.
pub async fn serve(config: ServiceConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    run(listener, config).await
}

/// Accept loop over an already bound listener.
pub async fn run(listener: TcpListener, config: ServiceConfig) -> Result<()> {
    let config = Arc::new(config);
    let limiter = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
    info!("Watermark service listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Client connected from {}", addr);
                let config = Arc::clone(&config);
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, config, limiter).await {
                        error!("Error handling client {}: {}", addr, e);
                    }
                });
            }
            Err(e) => error!("Failed to accept connection: {}", e),
        }
    }
}

async fn read_request(
    stream: &mut TcpStream,
    limit: u64,
) -> Result<(WatermarkRequest, Vec<u8>)> {
    let header = read_frame(stream, limit).await?;
    let request: WatermarkRequest = bincode::deserialize(&header)?;
    let image = read_frame(stream, limit).await?;
    Ok((request, image))
}

/// Handle one watermark or analysis request
async fn handle_client(
    mut stream: TcpStream,
    config: Arc<ServiceConfig>,
    limiter: Arc<Semaphore>,
) -> Result<()> {
    configure_socket(&stream, config.socket_buffer_bytes);

    let deadline = Duration::from_millis(config.read_timeout_ms);
    let read = tokio::time::timeout(deadline, read_request(&mut stream, config.max_frame_bytes));
    let outcome = match read.await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("request not received within {} ms", config.read_timeout_ms)),
    };

    let (request, image) = match outcome {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Rejecting request: {}", e);
            let rejected = bincode::serialize(&WatermarkResponse::Rejected(e.to_string()))?;
            write_frame(&mut stream, &rejected).await?;
            stream.shutdown().await?;
            // Read whatever the client still sends so closing does not reset
            // the connection before it sees the rejection.
            let mut sink = tokio::io::sink();
            let drain = tokio::io::copy(&mut stream, &mut sink);
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
            return Ok(());
        }
    };
    info!("Received {:?} ({} image bytes)", request, image.len());

    let response = {
        let _permit = limiter.acquire().await?;
        match request {
            WatermarkRequest::Embed {
                mime_type,
                fingerprint,
            } => WatermarkResponse::Image(watermark_async(image, mime_type, fingerprint).await),
            WatermarkRequest::Analyze { mime_type } => {
                WatermarkResponse::Analysis(analyze_async(image, mime_type).await)
            }
        }
    };

    let out = bincode::serialize(&response)?;
    write_frame(&mut stream, &out).await?;
    stream.flush().await?;
    debug!("Sent response ({} bytes)", out.len());
    Ok(())
}

/// Sends one request to a running service and waits for the answer.
pub async fn request<A: ToSocketAddrs>(
    addr: A,
    request: &WatermarkRequest,
    image: &[u8],
) -> Result<WatermarkResponse> {
    let mut stream = TcpStream::connect(addr).await?;

    let header = bincode::serialize(request)?;
    write_frame(&mut stream, &header).await?;
    write_frame(&mut stream, image).await?;
    stream.flush().await?;

    let body = read_frame(&mut stream, MAX_RESPONSE_BYTES).await?;
    Ok(bincode::deserialize(&body)?)
}

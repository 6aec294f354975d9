use anyhow::Result;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;
use studio_fingerprint::config::ServiceConfig;
use studio_fingerprint::service::{self, read_frame, write_frame};
use studio_fingerprint::{Analysis, Fingerprint, WatermarkRequest, WatermarkResponse};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

// Helper to start a service on an ephemeral port
async fn start_service(config: ServiceConfig) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = service::run(listener, config).await;
    });
    Ok(addr)
}

fn test_png() -> Vec<u8> {
    let img = RgbaImage::from_fn(48, 48, |x, y| Rgba([x as u8, y as u8, 128, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .expect("encode test png");
    out
}

#[tokio::test]
async fn embed_then_analyze_over_tcp() -> Result<()> {
    let addr = start_service(ServiceConfig::default()).await?;
    let original = test_png();

    let embed = WatermarkRequest::Embed {
        mime_type: "image/png".into(),
        fingerprint: Fingerprint::User("alice".into()),
    };
    let marked = match service::request(addr, &embed, &original).await? {
        WatermarkResponse::Image(bytes) => bytes,
        other => panic!("expected an image, got {:?}", other),
    };
    assert_ne!(marked, original);

    let check = WatermarkRequest::Analyze {
        mime_type: "image/png".into(),
    };
    let response = service::request(addr, &check, &marked).await?;
    assert_eq!(response, WatermarkResponse::Analysis(Analysis::Found("alice".into())));

    let response = service::request(addr, &check, &original).await?;
    assert_eq!(response, WatermarkResponse::Analysis(Analysis::NotFound));
    Ok(())
}

#[tokio::test]
async fn undecodable_image_is_returned_as_is() -> Result<()> {
    let addr = start_service(ServiceConfig::default()).await?;
    let junk = b"no pixels in here".to_vec();

    let embed = WatermarkRequest::Embed {
        mime_type: "image/png".into(),
        fingerprint: Fingerprint::Creator,
    };
    let response = service::request(addr, &embed, &junk).await?;
    assert_eq!(response, WatermarkResponse::Image(junk.clone()));

    let check = WatermarkRequest::Analyze {
        mime_type: "image/png".into(),
    };
    match service::request(addr, &check, &junk).await? {
        WatermarkResponse::Analysis(Analysis::CouldNotAnalyze { .. }) => {}
        other => panic!("expected CouldNotAnalyze, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn oversized_image_is_rejected() -> Result<()> {
    let config = ServiceConfig {
        max_frame_bytes: 1024,
        ..ServiceConfig::default()
    };
    let addr = start_service(config).await?;

    let check = WatermarkRequest::Analyze {
        mime_type: "image/png".into(),
    };
    let response = service::request(addr, &check, &vec![0u8; 4096]).await?;
    assert!(matches!(response, WatermarkResponse::Rejected(_)));
    Ok(())
}

#[tokio::test]
async fn malformed_header_is_rejected() -> Result<()> {
    let addr = start_service(ServiceConfig::default()).await?;

    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &[0xFF, 0xFF, 0xFF, 0xFF]).await?;
    stream.flush().await?;

    let body = read_frame(&mut stream, 1 << 20).await?;
    let response: WatermarkResponse = bincode::deserialize(&body)?;
    assert!(matches!(response, WatermarkResponse::Rejected(_)));
    Ok(())
}

#[tokio::test]
async fn stalled_client_is_timed_out() -> Result<()> {
    let config = ServiceConfig {
        read_timeout_ms: 200,
        ..ServiceConfig::default()
    };
    let addr = start_service(config).await?;

    // Announce a header frame but never send its body
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_u64(64).await?;
    stream.flush().await?;

    let reply = read_frame(&mut stream, 1 << 20);
    let body = tokio::time::timeout(Duration::from_secs(5), reply).await??;
    let response: WatermarkResponse = bincode::deserialize(&body)?;
    assert!(matches!(response, WatermarkResponse::Rejected(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_their_own_payloads() -> Result<()> {
    let config = ServiceConfig {
        max_concurrent_jobs: 2,
        ..ServiceConfig::default()
    };
    let addr = start_service(config).await?;

    let mut handles = Vec::new();
    for i in 0..6 {
        handles.push(tokio::spawn(async move {
            let name = format!("user{}", i);
            let embed = WatermarkRequest::Embed {
                mime_type: "image/png".into(),
                fingerprint: Fingerprint::User(name.clone()),
            };
            let marked = match service::request(addr, &embed, &test_png()).await? {
                WatermarkResponse::Image(bytes) => bytes,
                other => anyhow::bail!("unexpected {:?}", other),
            };
            let check = WatermarkRequest::Analyze {
                mime_type: "image/png".into(),
            };
            let response = service::request(addr, &check, &marked).await?;
            anyhow::ensure!(
                response == WatermarkResponse::Analysis(Analysis::Found(name)),
                "wrong payload for client {}",
                i
            );
            Ok::<_, anyhow::Error>(())
        }));
    }

    for handle in handles {
        handle.await??;
    }
    Ok(())
}

//! Caller-side policy around the codec: which string gets embedded, what
//! happens when embedding fails, and how a decode result is reported.

use crate::lsb::{decode_invisible_watermark, embed_invisible_watermark};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Marker embedded in images produced by the studio's creator account.
pub const CREATOR_MARKER: &str = "BeJeon";

/// Who an image is attributed to. Always passed in explicitly by the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    User(String),
    Creator,
}

impl Fingerprint {
    pub fn payload(&self) -> &str {
        match self {
            Fingerprint::User(name) => name,
            Fingerprint::Creator => CREATOR_MARKER,
        }
    }
}

/// The three outcomes a watermark check can have.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    Found(String),
    NotFound,
    CouldNotAnalyze { reason: String },
}

impl Analysis {
    pub fn is_creator(&self) -> bool {
        matches!(self, Analysis::Found(payload) if payload == CREATOR_MARKER)
    }
}

/// Watermarks `image`, falling back to the original bytes on any error.
///
/// A generated image is always delivered, fingerprinted or not.
pub fn watermark_or_original(
    image: &[u8],
    mime_type: &str,
    fingerprint: &Fingerprint,
) -> Vec<u8> {
    match embed_invisible_watermark(image, mime_type, fingerprint.payload()) {
        Ok(marked) => marked,
        Err(e) => {
            warn!("Watermarking failed, delivering original image: {}", e);
            image.to_vec()
        }
    }
}

pub fn analyze(image: &[u8], mime_type: &str) -> Analysis {
    match decode_invisible_watermark(image, mime_type) {
        Ok(Some(payload)) => Analysis::Found(payload),
        Ok(None) => Analysis::NotFound,
        Err(e) => Analysis::CouldNotAnalyze {
            reason: e.to_string(),
        },
    }
}

/// [`watermark_or_original`] on tokio's blocking pool.
pub async fn watermark_async(
    image: Vec<u8>,
    mime_type: String,
    fingerprint: Fingerprint,
) -> Vec<u8> {
    watermark_shared(Arc::new(image), mime_type, fingerprint).await
}

async fn watermark_shared(
    image: Arc<Vec<u8>>,
    mime_type: String,
    fingerprint: Fingerprint,
) -> Vec<u8> {
    let job_image = Arc::clone(&image);
    let job = tokio::task::spawn_blocking(move || {
        watermark_or_original(&job_image, &mime_type, &fingerprint)
    });
    match job.await {
        Ok(marked) => marked,
        Err(e) => {
            warn!("Watermark task failed, delivering original image: {}", e);
            image.to_vec()
        }
    }
}

/// [`analyze`] on tokio's blocking pool.
pub async fn analyze_async(image: Vec<u8>, mime_type: String) -> Analysis {
    match tokio::task::spawn_blocking(move || analyze(&image, &mime_type)).await {
        Ok(analysis) => analysis,
        Err(e) => Analysis::CouldNotAnalyze {
            reason: e.to_string(),
        },
    }
}

/// One image queued for [`watermark_batch`].
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub image: Vec<u8>,
    pub mime_type: String,
    pub fingerprint: Fingerprint,
}

/// Watermarks every item with at most `concurrency` jobs in flight.
/// Results come back in input order.
pub async fn watermark_batch(items: Vec<BatchItem>, concurrency: usize) -> Vec<Vec<u8>> {
    let limiter = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut originals = Vec::with_capacity(items.len());
    let mut jobs = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let image = Arc::new(item.image);
        originals.push(Arc::clone(&image));
        let limiter = Arc::clone(&limiter);
        jobs.spawn(async move {
            let _permit = limiter.acquire_owned().await;
            let marked = watermark_shared(image, item.mime_type, item.fingerprint).await;
            (index, marked)
        });
    }

    let mut results: Vec<Option<Vec<u8>>> = vec![None; originals.len()];
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok((index, marked)) => results[index] = Some(marked),
            Err(e) => warn!("Batch job failed: {}", e),
        }
    }
    debug!("Watermarked batch of {} images", originals.len());

    results
        .into_iter()
        .zip(originals)
        .map(|(marked, original)| marked.unwrap_or_else(|| original.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_is_an_opaque_payload() {
        assert_eq!(Fingerprint::Creator.payload(), "BeJeon");
        assert_eq!(Fingerprint::User("BeJeon".into()).payload(), "BeJeon");
        assert!(Analysis::Found("BeJeon".into()).is_creator());
        assert!(!Analysis::Found("alice".into()).is_creator());
        assert!(!Analysis::NotFound.is_creator());
    }

    #[test]
    fn undecodable_input_fails_open() {
        let junk = b"not an image at all".to_vec();
        let out = watermark_or_original(&junk, "image/png", &Fingerprint::User("alice".into()));
        assert_eq!(out, junk);
    }

    #[test]
    fn undecodable_input_cannot_be_analyzed() {
        assert!(matches!(
            analyze(b"garbage", "image/jpeg"),
            Analysis::CouldNotAnalyze { .. }
        ));
    }
}

//! Content fingerprinting and duplicate upload suppression
//!
//! Calculates the SHA-256 of the raw upload text. The digest is checked
//! before parsing and claimed after a successful parse; the claim is an
//! insert-if-absent on the fingerprint table, so of two concurrent uploads of
//! the same bytes exactly one proceeds.

use std::sync::Arc;

use chrono::Utc;
use ctm_common::db::UploadFingerprint;
use ctm_common::Result;
use sha2::{Digest, Sha256};

use crate::db::ClinicalStore;

/// Lower-case hex SHA-256 of the content
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint index over the clinical store
#[derive(Clone)]
pub struct DuplicateGuard {
    store: Arc<dyn ClinicalStore>,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn ClinicalStore>) -> Self {
        Self { store }
    }

    /// True when an upload with this digest was already processed
    pub async fn is_duplicate(&self, digest: &str) -> Result<bool> {
        let existing = self.store.find_fingerprint(digest).await?;

        if let Some(fp) = &existing {
            tracing::info!(
                digest = %digest,
                kind = %fp.kind,
                first_seen = %fp.created_at,
                "Duplicate upload detected"
            );
        }

        Ok(existing.is_some())
    }

    /// Record the digest; `false` means another upload claimed it first
    pub async fn claim(&self, digest: &str, kind: &str, record_count: usize) -> Result<bool> {
        let claimed = self
            .store
            .record_fingerprint(&UploadFingerprint {
                digest: digest.to_string(),
                kind: kind.to_string(),
                record_count: record_count as i64,
                created_at: Utc::now(),
            })
            .await?;

        tracing::debug!(digest = %digest, claimed, "Fingerprint claim");

        Ok(claimed)
    }
}

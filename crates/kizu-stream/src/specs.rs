//! Per-product quality spec resolution with a TTL cache.
//!
//! Specs live in a store keyed by product code. [`SpecRepository::load`]
//! is infallible by design: any store failure degrades to the
//! permissive default spec, which is cached like a real one so a
//! missing document does not hammer the store on every message.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use kizu_pipeline::QualitySpec;
use tracing::warn;

/// Cache lifetime applied when none is configured.
pub const DEFAULT_SPEC_TTL: Duration = Duration::from_secs(600);

/// Where spec documents come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    /// A directory of `<product_code>.json` files.
    Local {
        /// Directory holding the spec documents.
        dir: PathBuf,
    },
    /// An object store; reserved for a later transport.
    Remote {
        /// Bucket holding the spec documents.
        bucket: String,
        /// Key prefix under the bucket.
        prefix: String,
    },
}

/// Failure to produce a spec from the store.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// No document exists for the product code.
    #[error("no spec document for product {product_code}")]
    NotFound {
        /// The product code that was looked up.
        product_code: String,
    },
    /// The document exists but could not be read.
    #[error("failed to read spec {path}: {source}")]
    Io {
        /// Path of the unreadable document.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The document exists but is not a valid spec.
    #[error("failed to parse spec for product {product_code}: {source}")]
    Parse {
        /// The product code whose document failed to parse.
        product_code: String,
        /// Underlying decode failure.
        source: serde_json::Error,
    },
    /// The configured source has no transport yet.
    #[error("remote spec store is not implemented")]
    RemoteUnimplemented,
}

type CacheEntry = (Instant, Arc<QualitySpec>);

/// Timestamped spec cache in front of the store.
///
/// Safe to share across threads; the fetch itself runs outside the
/// cache lock, so two threads may race to refresh the same product.
/// Last write wins, which is acceptable for a read-mostly cache.
#[derive(Debug)]
pub struct SpecRepository {
    source: SpecSource,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SpecRepository {
    #[must_use]
    pub fn new(source: SpecSource, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A repository over a local spec directory with the default TTL.
    #[must_use]
    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self::new(SpecSource::Local { dir: dir.into() }, DEFAULT_SPEC_TTL)
    }

    /// Resolve the spec for a product code.
    ///
    /// Returns the cached value while it is younger than the TTL.
    /// Otherwise fetches from the store; on any failure, logs a
    /// warning and falls back to [`QualitySpec::default`]. The result,
    /// default included, is cached with a fresh timestamp.
    pub fn load(&self, product_code: &str) -> Arc<QualitySpec> {
        if let Some(cached) = self.fresh_entry(product_code) {
            return cached;
        }

        let spec = match self.fetch(product_code) {
            Ok(spec) => spec,
            Err(error) => {
                warn!(product_code, %error, "spec load failed, using permissive default");
                QualitySpec::default()
            }
        };
        let spec = Arc::new(spec);

        let mut cache = self.lock_cache();
        cache.insert(product_code.to_string(), (Instant::now(), Arc::clone(&spec)));
        spec
    }

    fn fresh_entry(&self, product_code: &str) -> Option<Arc<QualitySpec>> {
        let cache = self.lock_cache();
        let (stamped, spec) = cache.get(product_code)?;
        (stamped.elapsed() < self.ttl).then(|| Arc::clone(spec))
    }

    fn fetch(&self, product_code: &str) -> Result<QualitySpec, SpecError> {
        match &self.source {
            SpecSource::Local { dir } => {
                let path = dir.join(format!("{product_code}.json"));
                let text = fs::read_to_string(&path).map_err(|source| {
                    if source.kind() == io::ErrorKind::NotFound {
                        SpecError::NotFound {
                            product_code: product_code.to_string(),
                        }
                    } else {
                        SpecError::Io { path, source }
                    }
                })?;
                serde_json::from_str(&text).map_err(|source| SpecError::Parse {
                    product_code: product_code.to_string(),
                    source,
                })
            }
            SpecSource::Remote { .. } => Err(SpecError::RemoteUnimplemented),
        }
    }

    /// The cache stays usable even if a holder of the lock panicked;
    /// entries are always internally consistent.
    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

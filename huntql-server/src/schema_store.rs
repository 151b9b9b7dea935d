use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use color_eyre::eyre::{Context, Result};
use huntql_schema::{Schema, load_schema};
use huntql_translate::Dialect;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::metrics::METRICS;

/// Identifies one version of a snapshot file without reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    len: u64,
    modified: Option<SystemTime>,
}

impl Signature {
    fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to stat schema: {}", path.display()))?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

struct Loaded {
    schema: Arc<Schema>,
    signature: Signature,
    checked_at: Instant,
}

/// Holds the current snapshot of one dialect's schema file.
///
/// The file is stat'ed at most once per check interval and re-read only when
/// its length or modification time changed. A failed reload keeps serving the
/// previous snapshot; callers only see an error while no snapshot was ever
/// loaded.
pub struct SchemaStore {
    dialect: Dialect,
    path: PathBuf,
    check_interval: Duration,
    loaded: RwLock<Option<Loaded>>,
}

impl SchemaStore {
    pub fn new(dialect: Dialect, path: PathBuf, check_interval: Duration) -> Self {
        Self {
            dialect,
            path,
            check_interval,
            loaded: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<Arc<Schema>> {
        if let Some(loaded) = self.loaded.read().as_ref() {
            if loaded.checked_at.elapsed() < self.check_interval {
                return Ok(loaded.schema.clone());
            }
        }

        let mut guard = self.loaded.write();
        if let Some(loaded) = guard.as_ref() {
            if loaded.checked_at.elapsed() < self.check_interval {
                return Ok(loaded.schema.clone());
            }
        }

        let reloaded = self.reload(guard.as_ref());
        match reloaded {
            Ok(fresh) => {
                let schema = fresh.schema.clone();
                *guard = Some(fresh);
                Ok(schema)
            }
            Err(e) => {
                let Some(previous) = guard.as_mut() else {
                    return Err(e);
                };
                warn!(
                    dialect = %self.dialect,
                    error = ?e,
                    "Schema reload failed, keeping previous snapshot"
                );
                previous.checked_at = Instant::now();
                Ok(previous.schema.clone())
            }
        }
    }

    fn reload(&self, previous: Option<&Loaded>) -> Result<Loaded> {
        let signature = Signature::of(&self.path)?;
        if let Some(previous) = previous.filter(|p| p.signature == signature) {
            return Ok(Loaded {
                schema: previous.schema.clone(),
                signature,
                checked_at: Instant::now(),
            });
        }

        let dialect = self.dialect.as_str();
        let schema = load_schema(&self.path).inspect_err(|_| {
            METRICS
                .schema_reloads_total
                .with_label_values(&[dialect, "error"])
                .inc();
        })?;
        METRICS
            .schema_reloads_total
            .with_label_values(&[dialect, "success"])
            .inc();
        info!(%dialect, path = %self.path.display(), "Schema snapshot loaded");

        Ok(Loaded {
            schema: Arc::new(schema),
            signature,
            checked_at: Instant::now(),
        })
    }
}

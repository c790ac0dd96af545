//! Parameter-set cache.
//!
//! SPS/PPS recovered from a probe recording are only valid for the capture
//! resolution they were recorded at, so the resolution is stored next to
//! them and compared on every load.

mod store;

pub use store::{KeyValueStore, MemoryStore, TomlFileStore};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vidbridge_media::ParameterSets;

/// Key holding `"<sps-b64>,<pps-b64>"`.
pub const PARAMETER_SETS_KEY: &str = "sps_pps";

/// Key holding the resolution the parameter sets were recorded at.
pub const RESOLUTION_KEY: &str = "resolution";

/// Persists parameter sets keyed by capture resolution.
#[derive(Clone)]
pub struct ParameterCache {
    store: Arc<dyn KeyValueStore>,
    store_name: String,
}

impl ParameterCache {
    pub fn new(store: Arc<dyn KeyValueStore>, store_name: impl Into<String>) -> Self {
        Self {
            store,
            store_name: store_name.into(),
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Cached parameter sets for `resolution_key`, if any.
    ///
    /// A read failure, a resolution mismatch and a malformed value all come
    /// back as a miss.
    pub fn load(&self, resolution_key: &str) -> Option<ParameterSets> {
        let (stored_resolution, value) = self.raw();
        let stored_resolution = stored_resolution?;
        if stored_resolution != resolution_key {
            debug!(
                cached = %stored_resolution,
                requested = %resolution_key,
                "Cached parameter sets are for another resolution"
            );
            return None;
        }

        let params = decode(&value?);
        if params.is_none() {
            warn!(store = %self.store_name, "Ignoring malformed cached parameter sets");
        }
        params
    }

    /// Persist `params` for `resolution_key` in a single commit.
    ///
    /// Failures are logged and reported as `false`; the caller carries on
    /// with the parameter sets it already has.
    pub fn store(&self, params: &ParameterSets, resolution_key: &str) -> bool {
        let value = encode(params);
        let entries = [
            (PARAMETER_SETS_KEY, value.as_str()),
            (RESOLUTION_KEY, resolution_key),
        ];
        match self.store.commit(&self.store_name, &entries) {
            Ok(()) => {
                info!(resolution = %resolution_key, "Cached parameter sets");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to cache parameter sets");
                false
            }
        }
    }

    /// Forget the cached parameter sets.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.remove_store(&self.store_name)
    }

    /// Raw stored values: `(resolution, sps_pps)`, read together.
    pub fn raw(&self) -> (Option<String>, Option<String>) {
        match self
            .store
            .get_many(&self.store_name, &[RESOLUTION_KEY, PARAMETER_SETS_KEY])
        {
            Ok(values) => {
                let mut values = values.into_iter().map(|v| v.filter(|v| !v.is_empty()));
                let resolution = values.next().flatten();
                let params = values.next().flatten();
                (resolution, params)
            }
            Err(e) => {
                warn!(error = %e, store = %self.store_name, "Failed to read parameter cache");
                (None, None)
            }
        }
    }
}

/// `"<sps-b64>,<pps-b64>"`.
pub fn encode(params: &ParameterSets) -> String {
    format!(
        "{},{}",
        STANDARD.encode(params.sps()),
        STANDARD.encode(params.pps())
    )
}

/// Inverse of [`encode`].
pub fn decode(value: &str) -> Option<ParameterSets> {
    let (sps, pps) = value.split_once(',')?;
    let sps = STANDARD.decode(sps.trim()).ok()?;
    let pps = STANDARD.decode(pps.trim()).ok()?;
    ParameterSets::new(sps, pps)
}

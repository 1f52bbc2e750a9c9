//! State persistence.
//!
//! Trade history, bargain holdings, merge history, and the runtime engine
//! configuration survive restarts in a single JSON state file. Writes go to
//! a temp file first and land via rename, so a reader (or a crash) never
//! observes a half-written state. Credentials live only in the environment
//! and are never part of this file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::bargain::BargainAccumulator;
use crate::engine::merger::MergeTracker;
use crate::engine::trade::Trade;
use crate::error::StorageError;

/// Everything that survives a restart.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    /// Runtime engine configuration (no secrets).
    pub engine_config: EngineConfig,
    /// Append-only trade history.
    pub trade_history: Vec<Trade>,
    /// Bargain strategy state: holdings and cooldown.
    pub bargain: BargainAccumulator,
    /// Merge tracker: balances, history, auto-merge flag.
    pub merger: MergeTracker,
}

/// Save state atomically: write a temp file, then rename over the target.
pub fn save_state(state: &PersistedState, path: &str) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(state).map_err(|source| StorageError::ParseFailed {
        path: path.to_string(),
        source,
    })?;

    let tmp_path = format!("{path}.tmp");
    std::fs::write(&tmp_path, &json).map_err(|source| StorageError::WriteFailed {
        path: tmp_path.clone(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| StorageError::WriteFailed {
        path: path.to_string(),
        source,
    })?;

    debug!(path, trades = state.trade_history.len(), "State saved");
    Ok(())
}

/// Load state from disk. Returns None when no file exists (fresh start).
pub fn load_state(path: &str) -> Result<Option<PersistedState>, StorageError> {
    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).map_err(|source| StorageError::ReadFailed {
        path: path.to_string(),
        source,
    })?;

    let state: PersistedState =
        serde_json::from_str(&json).map_err(|source| StorageError::ParseFailed {
            path: path.to_string(),
            source,
        })?;

    info!(
        path,
        trades = state.trade_history.len(),
        holdings = state.bargain.holdings.len(),
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: &str) -> Result<(), StorageError> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).map_err(|source| StorageError::WriteFailed {
            path: path.to_string(),
            source,
        })?;
    }
    Ok(())
}

//! Trade configuration file: users, their broker configs, and their pairs.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::Pair;

/// One user's slice of the trade config.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: String,

    /// Broker configuration blobs keyed by api name; each adapter parses its
    /// own blob.
    #[serde(default)]
    pub apis: HashMap<String, serde_json::Value>,

    pub pairs: Vec<Pair>,
}

/// Load and parse `trade-config.json`.
pub fn load_trade_config(path: &Path) -> Result<Vec<UserConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trade config at {}", path.display()))?;
    serde_json::from_str(&raw).context("failed to parse trade config")
}

//! Merge tracking: convert paired holdings back into collateral.
//!
//! Balances are tracked per condition id and only ever change through
//! `track` (trade deltas) and a confirmed merge (equal decrement of both
//! sides). A failed merge appends a failed record and leaves the balances
//! untouched, so the position stays mergeable and is retried next cycle.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::exchange::ExchangeClient;
use crate::market::Market;

/// Per-market balances of both outcome tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeablePosition {
    /// Market the balances belong to.
    pub market_slug: String,
    /// Merge key.
    pub condition_id: String,
    /// UP shares held.
    pub up_balance: Decimal,
    /// DOWN shares held.
    pub down_balance: Decimal,
    /// Pairs recoverable right now: min of the two balances.
    pub mergeable_amount: Decimal,
}

/// Terminal status of a merge attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    /// On-chain merge confirmed.
    #[strum(serialize = "success")]
    Success,
    /// Dry-run merge.
    #[strum(serialize = "simulated")]
    Simulated,
    /// Transaction rejected or transport failed; balances preserved.
    #[strum(serialize = "failed")]
    Failed,
}

/// Append-only merge history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    /// When the attempt finished.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Market merged.
    pub market_slug: String,
    /// Merge key.
    pub condition_id: String,
    /// Pairs merged (or attempted).
    pub amount: Decimal,
    /// USDC received; zero on failure.
    pub usdc_received: Decimal,
    /// Terminal status.
    pub status: MergeStatus,
    /// On-chain transaction reference, when available.
    pub tx_ref: Option<String>,
    /// Human-readable context.
    pub details: String,
}

/// Read-side snapshot of the tracker.
#[derive(Debug, Clone, Serialize)]
pub struct MergeSnapshot {
    /// Whether merge_all runs on the scan cadence.
    pub auto_merge_enabled: bool,
    /// All tracked positions.
    pub positions: Vec<MergeablePosition>,
    /// Sum of mergeable amounts across positions.
    pub total_mergeable: Decimal,
    /// USDC recovered across all successful merges.
    pub total_merged_usdc: Decimal,
    /// Count of successful (or simulated) merges.
    pub merge_count: usize,
    /// Recent history, oldest first.
    pub recent_history: Vec<MergeRecord>,
}

/// Tracks paired balances and converts them back into USDC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeTracker {
    /// Balances by condition id.
    positions: HashMap<String, MergeablePosition>,
    /// Append-only merge history.
    pub history: Vec<MergeRecord>,
    /// Whether merge_all runs automatically each cycle.
    pub auto_merge_enabled: bool,
}

impl MergeTracker {
    /// Create an empty tracker.
    pub fn new(auto_merge_enabled: bool) -> Self {
        Self {
            positions: HashMap::new(),
            history: Vec::new(),
            auto_merge_enabled,
        }
    }

    /// Apply balance deltas after a fill.
    pub fn track(&mut self, market: &Market, up_delta: Decimal, down_delta: Decimal) {
        let pos = self
            .positions
            .entry(market.condition_id.clone())
            .or_insert_with(|| MergeablePosition {
                market_slug: market.slug.clone(),
                condition_id: market.condition_id.clone(),
                up_balance: Decimal::ZERO,
                down_balance: Decimal::ZERO,
                mergeable_amount: Decimal::ZERO,
            });

        pos.up_balance += up_delta;
        pos.down_balance += down_delta;
        pos.mergeable_amount = pos.up_balance.min(pos.down_balance);

        info!(
            market = %market.slug,
            up = %pos.up_balance,
            down = %pos.down_balance,
            mergeable = %pos.mergeable_amount,
            "Position tracked"
        );
    }

    /// Positions with a non-zero mergeable amount.
    pub fn mergeable(&self) -> Vec<MergeablePosition> {
        self.positions
            .values()
            .filter(|p| p.mergeable_amount > Decimal::ZERO)
            .cloned()
            .collect()
    }

    /// Look up one tracked position.
    pub fn position(&self, condition_id: &str) -> Option<&MergeablePosition> {
        self.positions.get(condition_id)
    }

    /// Merge the full mergeable amount of one position.
    ///
    /// The balance decrement and the history append happen together, only
    /// after the merge is confirmed.
    #[instrument(skip(self, client), fields(condition_id = %condition_id))]
    pub async fn merge(
        &mut self,
        client: &dyn ExchangeClient,
        condition_id: &str,
        min_amount: Decimal,
        dry_run: bool,
    ) -> Option<MergeRecord> {
        let pos = match self.positions.get(condition_id) {
            Some(pos) => pos,
            None => {
                warn!("No tracked position for condition");
                return None;
            }
        };

        let amount = pos.mergeable_amount;
        if amount < min_amount {
            return None;
        }

        let market_slug = pos.market_slug.clone();
        let result = client.submit_merge(condition_id, amount).await;

        let record = match result {
            Ok(receipt) if receipt.success => {
                if let Some(pos) = self.positions.get_mut(condition_id) {
                    pos.up_balance -= amount;
                    pos.down_balance -= amount;
                    pos.mergeable_amount = pos.up_balance.min(pos.down_balance);
                }

                crate::metrics::inc_merges();
                info!(amount = %amount, tx_ref = ?receipt.tx_ref, "Merge confirmed");

                MergeRecord {
                    timestamp: OffsetDateTime::now_utc(),
                    market_slug,
                    condition_id: condition_id.to_string(),
                    amount,
                    usdc_received: amount,
                    status: if dry_run {
                        MergeStatus::Simulated
                    } else {
                        MergeStatus::Success
                    },
                    tx_ref: receipt.tx_ref,
                    details: format!("{amount} pairs merged to USDC"),
                }
            }
            Ok(receipt) => {
                warn!(amount = %amount, "Merge rejected, balances preserved");
                MergeRecord {
                    timestamp: OffsetDateTime::now_utc(),
                    market_slug,
                    condition_id: condition_id.to_string(),
                    amount,
                    usdc_received: Decimal::ZERO,
                    status: MergeStatus::Failed,
                    tx_ref: receipt.tx_ref,
                    details: "merge transaction rejected".to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Merge failed, balances preserved");
                MergeRecord {
                    timestamp: OffsetDateTime::now_utc(),
                    market_slug,
                    condition_id: condition_id.to_string(),
                    amount,
                    usdc_received: Decimal::ZERO,
                    status: MergeStatus::Failed,
                    tx_ref: None,
                    details: format!("merge failed: {e}"),
                }
            }
        };

        self.history.push(record.clone());
        Some(record)
    }

    /// Merge every position whose mergeable amount clears the minimum.
    pub async fn merge_all(
        &mut self,
        client: &dyn ExchangeClient,
        min_amount: Decimal,
        dry_run: bool,
    ) -> Vec<MergeRecord> {
        let candidates: Vec<String> = self
            .positions
            .values()
            .filter(|p| p.mergeable_amount >= min_amount)
            .map(|p| p.condition_id.clone())
            .collect();

        let mut records = Vec::new();
        for condition_id in candidates {
            if let Some(record) = self.merge(client, &condition_id, min_amount, dry_run).await {
                records.push(record);
            }
        }
        records
    }

    /// Build the read-side snapshot.
    pub fn snapshot(&self) -> MergeSnapshot {
        let completed = |status: MergeStatus| {
            matches!(status, MergeStatus::Success | MergeStatus::Simulated)
        };

        MergeSnapshot {
            auto_merge_enabled: self.auto_merge_enabled,
            positions: self.positions.values().cloned().collect(),
            total_mergeable: self
                .positions
                .values()
                .map(|p| p.mergeable_amount)
                .sum(),
            total_merged_usdc: self
                .history
                .iter()
                .filter(|r| completed(r.status))
                .map(|r| r.usdc_received)
                .sum(),
            merge_count: self.history.iter().filter(|r| completed(r.status)).count(),
            recent_history: self.history.iter().rev().take(20).rev().cloned().collect(),
        }
    }
}

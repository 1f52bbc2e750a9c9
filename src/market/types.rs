//! Market types for binary UP/DOWN prediction markets.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Market outcome for binary UP/DOWN markets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// UP (YES) token.
    #[strum(serialize = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// DOWN (NO) token.
    #[strum(serialize = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Outcome {
    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }
}

/// An eligible binary market with both outcome tokens resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// On-chain condition id, the merge key.
    pub condition_id: String,
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// Underlying symbol the slug was discovered for.
    pub symbol: String,
    /// UP (YES) token ID.
    pub up_token_id: String,
    /// DOWN (NO) token ID.
    pub down_token_id: String,
    /// Unix timestamp when the market closes.
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl Market {
    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Seconds until the market closes, negative once expired.
    pub fn time_remaining_seconds(&self) -> i64 {
        self.end_timestamp - OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Check if the market is past its close.
    pub fn is_expired(&self) -> bool {
        self.time_remaining_seconds() <= 0
    }

    /// Format remaining time as "Xm Ys".
    pub fn time_remaining_str(&self) -> String {
        let secs = self.time_remaining_seconds();
        if secs <= 0 {
            return "CLOSED".to_string();
        }
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Raw market record from the Gamma catalog API.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Market ID.
    pub id: Option<String>,
    /// Market slug.
    pub slug: Option<String>,
    /// Market question.
    pub question: Option<String>,
    /// Whether the market is active.
    #[serde(default)]
    pub active: bool,
    /// Whether the market is closed.
    #[serde(default)]
    pub closed: bool,
    /// Whether the book accepts orders.
    #[serde(rename = "acceptingOrders", default)]
    pub accepting_orders: bool,
    /// On-chain condition id.
    #[serde(rename = "conditionId")]
    pub condition_id: Option<String>,
    /// CLOB token IDs, JSON-encoded string array.
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    /// End date (RFC 3339).
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}

impl GammaMarket {
    /// The two CLOB token ids, UP first, if both are present.
    pub fn token_pair(&self) -> Option<(String, String)> {
        let raw = self.clob_token_ids.as_deref()?;
        let ids: Vec<String> = serde_json::from_str(raw).ok()?;
        if ids.len() == 2 {
            Some((ids[0].clone(), ids[1].clone()))
        } else {
            None
        }
    }

    /// End timestamp parsed from the RFC 3339 end date.
    pub fn end_timestamp(&self) -> Option<i64> {
        let raw = self.end_date.as_deref()?;
        OffsetDateTime::parse(raw, &Rfc3339)
            .ok()
            .map(|dt| dt.unix_timestamp())
    }

    /// Convert into an eligible [`Market`], if complete and tradeable.
    pub fn into_market(self, symbol: &str) -> Option<Market> {
        if !self.active || self.closed || !self.accepting_orders {
            return None;
        }

        let (up_token_id, down_token_id) = self.token_pair()?;
        let end_timestamp = self.end_timestamp()?;

        Some(Market {
            condition_id: self.condition_id?,
            slug: self.slug?,
            symbol: symbol.to_string(),
            up_token_id,
            down_token_id,
            end_timestamp,
            question: self.question,
        })
    }
}

//! Purchase-confirmation notices.
//!
//! Clients relay the game's "You purchased X for Y coins" line. Matching it
//! against the session's delivery history tells us which event was bought.

use std::sync::{Arc, LazyLock};

use preapi_core::FlipEvent;
use regex::Regex;
use thiserror::Error;

static PURCHASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^You purchased (.*) for (.*) coins").expect("purchase pattern is valid")
});

/// Why a chat line is not a usable purchase notice.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PurchaseParseError {
    /// The line does not match the purchase pattern.
    #[error("not a purchase notice")]
    NotAPurchase,
    /// The price is not a whole number of coins.
    #[error("invalid purchase price {0:?}")]
    InvalidPrice(String),
}

/// A parsed purchase notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseNotice {
    /// Item display name as shown in game.
    pub item_name: String,
    /// Price paid, in coins.
    pub price: i64,
}

/// Parse a purchase notice. Prices may carry thousands separators.
pub fn parse_purchase(message: &str) -> Result<PurchaseNotice, PurchaseParseError> {
    let caps = PURCHASE_PATTERN
        .captures(message)
        .ok_or(PurchaseParseError::NotAPurchase)?;
    let item_name = caps.get(1).map_or("", |m| m.as_str()).to_owned();
    let raw_price = caps.get(2).map_or("", |m| m.as_str());
    let price = parse_price(raw_price)
        .ok_or_else(|| PurchaseParseError::InvalidPrice(raw_price.to_owned()))?;
    Ok(PurchaseNotice { item_name, price })
}

/// The most recent delivered event matching `notice` by exact item name and
/// starting bid.
pub fn match_recent(notice: &PurchaseNotice, history: &[Arc<FlipEvent>]) -> Option<Arc<FlipEvent>> {
    history
        .iter()
        .rev()
        .find(|f| f.item_name == notice.item_name && f.starting_bid == notice.price)
        .cloned()
}

#[allow(clippy::cast_possible_truncation)]
fn parse_price(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(whole) = cleaned.parse::<i64>() {
        return Some(whole);
    }
    // "1.5M"-style abbreviations are not produced by the game; only "123.0"
    let value: f64 = cleaned.parse().ok()?;
    (value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15).then(|| value as i64)
}

//! Flip events, detector tags, and provenance markers.
//!
//! A [`FlipEvent`] is immutable once it enters distribution except for its
//! metadata map, which only ever grows: each stage appends a single
//! provenance [`Marker`] to the display name. Per-recipient annotations are
//! layered onto a clone via [`FlipEvent::with_marker`], so the shared
//! original is never touched by a delivery task.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FlipError, Result};

/// Metadata key holding the coloured display name shown to the client.
pub const DISPLAY_NAME_KEY: &str = "cname";

/// Auxiliary property recording which ingress path delivered the event.
pub const INGRESS_PATH_KEY: &str = "bfcs";

// ─────────────────────────────────────────────────────────────────────────────
// Detector tag
// ─────────────────────────────────────────────────────────────────────────────

/// Which detection algorithm produced the opportunity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinderKind {
    /// No detector tag was set. Rejected by distribution.
    #[default]
    Unknown,
    /// Reference-price flipper.
    Flipper,
    /// Lowest-bin sniper.
    Sniper,
    /// Median-based sniper.
    SniperMedian,
    /// User-defined finder.
    User,
    /// Third-party finder whose item metadata arrives in the legacy nested shape.
    Tfm,
    /// Stonks finder.
    Stonks,
    /// Any other external source.
    External,
}

impl FinderKind {
    /// Whether events from this detector carry the legacy metadata encoding.
    pub fn has_legacy_metadata(self) -> bool {
        matches!(self, Self::Tfm)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provenance markers
// ─────────────────────────────────────────────────────────────────────────────

/// Single-character provenance suffix appended to the display name.
///
/// The leading `§` code is the in-game colour, so clients can tell at a
/// glance which path an event took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Arrived over the fast-track ingress channel.
    FastTrack,
    /// Entered pre-api distribution.
    Distributed,
    /// Delivered to the exclusive holder.
    Holder,
    /// Fallback delivery after the holder did not act in time.
    MissedWindow,
}

impl Marker {
    /// Colour-coded suffix appended to the display name.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::FastTrack => "§8!",
            Self::Distributed => "§8.",
            Self::Holder => "§c.",
            Self::MissedWindow => "§0.",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FlipEvent
// ─────────────────────────────────────────────────────────────────────────────

/// One detected, time-limited opportunity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlipEvent {
    /// Globally unique id, derived from the listing id.
    pub id: String,
    /// Numeric listing identity used for round-robin assignment.
    pub fairness_key: i64,
    /// Display name of the item, matched against purchase confirmations.
    pub item_name: String,
    /// Item tag (canonical item identifier).
    #[serde(default)]
    pub tag: String,
    /// Listing price.
    pub starting_bid: i64,
    /// Estimated market price.
    pub target_price: i64,
    /// When the listing becomes purchasable in game.
    pub earliest_actionable: DateTime<Utc>,
    /// Detector that produced the event.
    #[serde(default)]
    pub finder: FinderKind,
    /// Display metadata. Append-only during distribution.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Canonical flat item attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Auxiliary tracing properties.
    #[serde(default)]
    pub additional_props: BTreeMap<String, String>,
    /// Raw item NBT, only present for detectors using the legacy shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbt: Option<Value>,
}

impl FlipEvent {
    /// Decode an event from its MessagePack wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode the event to MessagePack (field names preserved).
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Check the invariants distribution relies on.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(FlipError::invalid("", "event id is empty"));
        }
        if self.finder == FinderKind::Unknown {
            return Err(FlipError::invalid(&self.id, "detector tag is unknown"));
        }
        Ok(())
    }

    /// Expected profit (`target - starting bid`).
    pub fn profit(&self) -> i64 {
        self.target_price.saturating_sub(self.starting_bid)
    }

    /// Time left until the listing is actionable, floored at zero.
    pub fn until_actionable(&self, now: DateTime<Utc>) -> Duration {
        (self.earliest_actionable - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// The display name, if the event carries one.
    pub fn display_name(&self) -> Option<&str> {
        self.metadata.get(DISPLAY_NAME_KEY).map(String::as_str)
    }

    /// Append a provenance marker to the display name.
    ///
    /// Returns `false` (and changes nothing) when there is no display name.
    pub fn append_marker(&mut self, marker: Marker) -> bool {
        match self.metadata.get_mut(DISPLAY_NAME_KEY) {
            Some(name) => {
                name.push_str(marker.suffix());
                true
            }
            None => false,
        }
    }

    /// Derive a per-recipient view carrying `marker`.
    #[must_use]
    pub fn with_marker(&self, marker: Marker) -> Self {
        let mut view = self.clone();
        let _ = view.append_marker(marker);
        view
    }

    /// Whether the display name ends with `marker`.
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.display_name()
            .is_some_and(|name| name.ends_with(marker.suffix()))
    }

    /// Record an auxiliary property unless it is already set.
    pub fn tag_property(&mut self, key: &str, value: &str) {
        let _ = self
            .additional_props
            .entry(key.to_owned())
            .or_insert_with(|| value.to_owned());
    }

    /// Rewrite the legacy nested NBT shape into the canonical attribute map.
    ///
    /// The legacy encoding nests attributes at `nbt.i[0].tag.ExtraAttributes`.
    /// Every scalar found there is copied into [`FlipEvent::attributes`]; the
    /// `id` entry becomes [`FlipEvent::tag`] and the stack `Count` becomes the
    /// `count` attribute.
    pub fn repair_legacy_metadata(&mut self) -> Result<()> {
        let compound = self
            .nbt
            .as_ref()
            .ok_or_else(|| FlipError::repair(&self.id, "no nbt payload"))?
            .get("i")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(Value::as_object)
            .ok_or_else(|| FlipError::repair(&self.id, "nbt has no item compound at i[0]"))?;

        let extra = compound
            .get("tag")
            .and_then(|tag| tag.get("ExtraAttributes"))
            .and_then(Value::as_object)
            .ok_or_else(|| FlipError::repair(&self.id, "item compound has no ExtraAttributes"))?;

        let mut attributes = BTreeMap::new();
        let mut tag = None;
        for (key, value) in extra {
            if key == "id" {
                tag = value.as_str().map(str::to_owned);
            } else {
                let _ = attributes.insert(key.clone(), scalar_to_string(value));
            }
        }
        if let Some(count) = compound.get("Count") {
            let _ = attributes.insert("count".to_owned(), scalar_to_string(count));
        }

        self.attributes.extend(attributes);
        if let Some(tag) = tag {
            self.tag = tag;
        }
        Ok(())
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

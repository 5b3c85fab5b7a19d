//! Parameter fingerprints.
//!
//! The cache key is a blake3 digest over a canonical rendering of the
//! parameter set: fixed field order, `key=value` pairs, frequency normalized
//! to `HH:MM:SS`. Two parameter sets hit the same cache row exactly when
//! their canonical forms match.

use crate::params::SqueezeParams;

/// Field order is part of the format; append new fields at the end.
const FIELDS: &[&str] = &[
    "squeeze_len",
    "atr_len",
    "trend_len",
    "tp_trail_percent",
    "sl_trail_percent",
    "percent_is_atr",
    "tp_atr_multiplier",
    "max_trade_duration",
    "use_good_momentum",
    "frequency",
];

/// Identifying fields in canonical order, rendered as strings.
pub fn pairs(params: &SqueezeParams) -> Vec<(String, String)> {
    let value = serde_json::to_value(params).expect("params serialize to a map");
    let map = value.as_object().expect("params serialize to a map");

    FIELDS
        .iter()
        .map(|field| {
            let rendered = if *field == "frequency" {
                frequency_label(params.frequency_minutes)
            } else {
                map.get(*field).map(|v| v.to_string()).unwrap_or_default()
            };
            (field.to_string(), rendered)
        })
        .collect()
}

/// Canonical `key=value` rendering, comma-joined.
pub fn canonical(params: &SqueezeParams) -> String {
    pairs(params)
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Hex blake3 digest of the canonical form.
pub fn digest(params: &SqueezeParams) -> String {
    blake3::hash(canonical(params).as_bytes())
        .to_hex()
        .to_string()
}

/// `HH:MM:SS` rendering of the bar frequency.
pub fn frequency_label(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

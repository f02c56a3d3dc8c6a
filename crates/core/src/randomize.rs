//! `$RANDOM` placeholder expansion for workflow templates.
//!
//! Workflows are stored with `$RANDOM` tokens inside string fields
//! (typically seeds and filename prefixes). Before every submission the
//! template is expanded into a fresh copy where each token is replaced by
//! an independently drawn integer, so that ComfyUI never serves a cached
//! result for a resubmitted workflow.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde_json::Value;

/// Token replaced with a random integer on every expansion.
pub const RANDOM_PLACEHOLDER: &str = "$RANDOM";

/// Exclusive upper bound for substituted values.
pub const RANDOM_UPPER_BOUND: u32 = 10_000_000;

/// Compiled regex matching [`RANDOM_PLACEHOLDER`]. Compiled once, reused forever.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&regex::escape(RANDOM_PLACEHOLDER)).expect("valid regex"));

/// Expand a template using the thread-local RNG.
///
/// Returns a new tree; `template` is left untouched.
pub fn expand(template: &Value) -> Value {
    expand_with(template, &mut rand::rng())
}

/// Expand a template drawing replacement values from `rng`.
///
/// Strings have every placeholder occurrence replaced, arrays are
/// expanded element-wise, objects value-wise (keys are never rewritten)
/// and every other scalar is cloned as-is.
pub fn expand_with<R: Rng + ?Sized>(template: &Value, rng: &mut R) -> Value {
    match template {
        Value::String(s) => Value::String(expand_str(s, rng)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_with(v, rng)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_with(v, rng)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace each placeholder in `s` with its own random value.
fn expand_str<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
    PLACEHOLDER_RE
        .replace_all(s, |_: &regex::Captures<'_>| {
            rng.random_range(0..RANDOM_UPPER_BOUND).to_string()
        })
        .into_owned()
}

/// Whether `template` contains at least one placeholder anywhere.
pub fn has_placeholders(template: &Value) -> bool {
    match template {
        Value::String(s) => s.contains(RANDOM_PLACEHOLDER),
        Value::Array(items) => items.iter().any(has_placeholders),
        Value::Object(map) => map.values().any(has_placeholders),
        _ => false,
    }
}

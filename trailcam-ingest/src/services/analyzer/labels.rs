//! Classifier label normalization
//!
//! Classifier backends emit either plain labels ("person", "Deer") or
//! semicolon-delimited taxonomy strings
//! (`<uuid>;mammalia;cetartiodactyla;cervidae;odocoileus;virginianus;white-tailed deer`).
//! Everything is reduced to one display label: aliases collapse to a
//! canonical name and known false-positive tokens become [`UNKNOWN`].

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Label used for unclassifiable or rejected predictions
pub const UNKNOWN: &str = "Unknown";

/// Tokens that mean "nothing was detected"
static FALSE_POSITIVES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "empty",
        "blank",
        "background",
        "background-only",
        "no cv result",
        "unknown",
        "none",
    ]
    .into_iter()
    .collect()
});

/// Lower-case alias → canonical label
///
/// Doubles as the common-name set consulted when a taxonomy string ends in
/// a name we know.
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("person", "Human"),
        ("people", "Human"),
        ("human", "Human"),
        ("homo sapiens", "Human"),
        ("vehicle", "Vehicle"),
        ("car", "Vehicle"),
        ("truck", "Vehicle"),
        ("bird", "Bird"),
        ("aves", "Bird"),
        ("dog", "Dog"),
        ("domestic dog", "Dog"),
        ("cat", "Cat"),
        ("domestic cat", "Cat"),
        ("deer", "Deer"),
        ("white-tailed deer", "Deer"),
        ("mule deer", "Deer"),
        ("fox", "Fox"),
        ("red fox", "Fox"),
        ("gray fox", "Fox"),
        ("raccoon", "Raccoon"),
        ("northern raccoon", "Raccoon"),
        ("coyote", "Coyote"),
        ("squirrel", "Squirrel"),
        ("rabbit", "Rabbit"),
        ("bear", "Bear"),
        ("american black bear", "Bear"),
        ("opossum", "Opossum"),
        ("virginia opossum", "Opossum"),
        ("skunk", "Skunk"),
        ("striped skunk", "Skunk"),
    ]
    .into_iter()
    .collect()
});

/// Normalize one raw classifier label
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return UNKNOWN.to_string();
    }

    let resolved = if trimmed.contains(';') {
        parse_taxonomy(trimmed)
    } else {
        trimmed.to_string()
    };

    canonicalize(&resolved)
}

/// Map aliases and false positives; other labels pass through unchanged
fn canonicalize(label: &str) -> String {
    let lower = label.trim().to_lowercase();
    if lower.is_empty() || FALSE_POSITIVES.contains(lower.as_str()) {
        return UNKNOWN.to_string();
    }
    match ALIASES.get(lower.as_str()) {
        Some(canonical) => canonical.to_string(),
        None => label.trim().to_string(),
    }
}

/// Slots after the identifier in a full taxonomy string
const CLASS: usize = 0;
const GENUS: usize = 3;
const SPECIES: usize = 4;
const COMMON_NAME: usize = 5;

/// Reduce a semicolon taxonomy string to a display label
///
/// The full form is `<id>;class;order;family;genus;species;common name`,
/// with unknown ranks left empty. Slots are read by position: the common
/// name wins, then `Genus species` when both ranks are present, then the
/// deepest non-empty rank. Short forms (`<id>;class;name`) use their last
/// non-trivial slot.
fn parse_taxonomy(raw: &str) -> String {
    let slots: Vec<&str> = raw.split(';').map(str::trim).collect();
    let ranks = match slots.as_slice() {
        [_id, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };

    if ranks.len() > SPECIES {
        if let Some(common) = ranks.get(COMMON_NAME).filter(|t| !is_trivial(t)) {
            return capitalize(common);
        }
        let (genus, species) = (ranks[GENUS], ranks[SPECIES]);
        if !is_trivial(genus) && !is_trivial(species) {
            return format!("{} {}", capitalize(genus), species.to_lowercase());
        }
    }

    ranks[CLASS..]
        .iter()
        .rev()
        .find(|t| !is_trivial(t))
        .map(|t| capitalize(t))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn is_trivial(token: &str) -> bool {
    token.is_empty() || FALSE_POSITIVES.contains(token.to_lowercase().as_str())
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! Description-to-taxonomy mapping
//!
//! Word-boundary keyword match from free-text descriptions onto the fixed
//! object taxonomy, plus the hedging-word confidence heuristic used when a
//! provider carries no native confidence signal.

use crate::models::DetectedObject;

/// Default confidence when the description reads definite
const DEFAULT_CONFIDENCE: u8 = 80;

/// Confidence when the description hedges
const HEDGED_CONFIDENCE: u8 = 55;

const PERSON_WORDS: &[&str] = &[
    "person", "persons", "people", "man", "men", "woman", "women", "child", "children", "kid",
    "kids", "someone", "somebody", "pedestrian", "pedestrians", "figure", "visitor", "visitors",
    "individual", "individuals", "worker", "workers", "boy", "girl",
];

const VEHICLE_WORDS: &[&str] = &[
    "car", "cars", "truck", "trucks", "vehicle", "vehicles", "van", "vans", "suv", "suvs",
    "motorcycle", "motorcycles", "bus", "buses", "bicycle", "bicycles", "bike", "bikes", "sedan",
    "pickup", "trailer", "scooter",
];

const ANIMAL_WORDS: &[&str] = &[
    "animal", "animals", "dog", "dogs", "cat", "cats", "bird", "birds", "deer", "squirrel",
    "squirrels", "raccoon", "raccoons", "fox", "foxes", "coyote", "coyotes", "rabbit", "rabbits",
    "possum", "opossum",
];

const PACKAGE_WORDS: &[&str] = &[
    "package", "packages", "parcel", "parcels", "box", "boxes", "delivery", "envelope",
    "envelopes",
];

const HEDGE_WORDS: &[&str] = &[
    "possibly", "perhaps", "unclear", "appears", "might", "maybe", "blurry", "indistinct",
    "uncertain", "hard", "difficult", "cannot",
];

/// Extract taxonomy objects from a description
///
/// Matching is on whole lowercased words so "cart" does not count as a
/// vehicle. An empty match yields `[unknown]` so the stored event always
/// carries taxonomy data.
pub fn extract_objects(description: &str) -> Vec<DetectedObject> {
    let mut found = Vec::new();

    for word in words(description) {
        let object = if PERSON_WORDS.contains(&word.as_str()) {
            DetectedObject::Person
        } else if VEHICLE_WORDS.contains(&word.as_str()) {
            DetectedObject::Vehicle
        } else if ANIMAL_WORDS.contains(&word.as_str()) {
            DetectedObject::Animal
        } else if PACKAGE_WORDS.contains(&word.as_str()) {
            DetectedObject::Package
        } else {
            continue;
        };

        if !found.contains(&object) {
            found.push(object);
        }
    }

    if found.is_empty() {
        found.push(DetectedObject::Unknown);
    }
    found.sort();
    found
}

/// Map ingestion hint strings ("person", "car", ...) onto the taxonomy
///
/// Used to keep taxonomy data on terminal-failure results.
pub fn objects_from_hints(hints: &[String]) -> Vec<DetectedObject> {
    if hints.is_empty() {
        return Vec::new();
    }
    let joined = hints.join(" ");
    let objects = extract_objects(&joined);
    // hints that matched nothing stay empty rather than [unknown]
    if objects == [DetectedObject::Unknown] {
        Vec::new()
    } else {
        objects
    }
}

/// Heuristic confidence for providers without a native signal
pub fn estimate_confidence(description: &str) -> u8 {
    if description.trim().is_empty() {
        return 0;
    }
    let hedged = words(description).any(|w| HEDGE_WORDS.contains(&w.as_str()));
    if hedged {
        HEDGED_CONFIDENCE
    } else {
        DEFAULT_CONFIDENCE
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

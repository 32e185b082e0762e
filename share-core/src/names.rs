//! Display names and share codes.

use peershare_types::ShortCode;
use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "Amber", "Bashful", "Bold", "Breezy", "Brave", "Cheeky", "Cosmic", "Crispy", "Dapper",
    "Dizzy", "Fizzy", "Fluffy", "Frosty", "Funky", "Giddy", "Golden", "Groovy", "Jolly",
    "Lucky", "Misty", "Mystic", "Nimble", "Noble", "Peppy", "Plucky", "Quirky", "Rapid",
    "Rusty", "Sandy", "Silver", "Sleek", "Snazzy", "Sunny", "Swift", "Turbo", "Velvet",
    "Vivid", "Witty", "Zesty", "Zippy",
];

const ANIMALS: &[&str] = &[
    "Alpaca", "Axolotl", "Badger", "Beaver", "Bison", "Crane", "Dolphin", "Falcon", "Ferret",
    "Firefly", "Flamingo", "Fox", "Gecko", "Hedgehog", "Heron", "Ibis", "Koala", "Lemur",
    "Lynx", "Meerkat", "Moose", "Narwhal", "Newt", "Ocelot", "Octopus", "Osprey", "Otter",
    "Owl", "Panda", "Pangolin", "Pelican", "Penguin", "Puffin", "Quokka", "Raccoon",
    "Seahorse", "Sloth", "Tapir", "Toucan", "Wren",
];

/// Random "Adjective Animal" display name.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Peer");
    format!("{adjective} {animal}")
}

/// Random 6-digit code. Uniqueness is the registry's job.
pub fn generate_code() -> ShortCode {
    let n = rand::thread_rng().gen_range(ShortCode::MIN..=ShortCode::MAX);
    ShortCode::from_number(n).unwrap_or_else(|| unreachable!("{n} is within the code range"))
}

/// Trim a requested display name and cap it at `max_chars` characters.
///
/// Returns `None` when nothing is left after trimming.
pub fn sanitize_display_name(name: &str, max_chars: usize) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_chars(trimmed, max_chars))
}

fn truncate_chars(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        name.to_string()
    } else {
        name.chars().take(max_chars).collect()
    }
}

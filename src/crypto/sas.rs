//! Short authentication string dictionary
//!
//! Six bytes of the handshake digest index into this table to produce six
//! words an operator can read over the phone. 256 entries, one per byte
//! value; words were chosen to be short, common, and phonetically distinct.

pub const SAS_DICTIONARY: [&str; 256] = [
    "acid", "acorn", "actor", "adobe", "agent", "alarm", "album", "alley",
    "amber", "anchor", "angle", "ankle", "anvil", "apple", "apron", "arena",
    "arrow", "aspen", "atlas", "attic", "autumn", "awning", "bacon", "badge",
    "bagel", "bamboo", "banana", "banjo", "barley", "barrel", "basil", "beacon",
    "beaver", "bedrock", "beetle", "bell", "berry", "bishop", "bison", "blade",
    "blanket", "blossom", "bolt", "bonnet", "booth", "bottle", "boulder", "bracket",
    "branch", "brass", "bread", "brick", "bridge", "bronze", "broom", "bucket",
    "buffalo", "bugle", "butter", "button", "cabin", "cactus", "camel", "candle",
    "canoe", "canvas", "canyon", "carbon", "cargo", "carpet", "carrot", "castle",
    "cattle", "cedar", "cello", "chalk", "chapel", "cherry", "chess", "chimney",
    "circus", "citrus", "clay", "cliff", "clover", "cobalt", "coconut", "coffee",
    "collar", "comet", "compass", "copper", "coral", "cotton", "cradle", "crater",
    "crayon", "cricket", "crystal", "curtain", "cypress", "dagger", "daisy", "denim",
    "desert", "diamond", "diesel", "dolphin", "donkey", "dragon", "drum", "eagle",
    "easel", "echo", "eclipse", "elbow", "elder", "ember", "emerald", "engine",
    "fabric", "falcon", "feather", "fern", "ferry", "fiddle", "fig", "finch",
    "flint", "flute", "forest", "fossil", "fountain", "fox", "frost", "galaxy",
    "garden", "garlic", "gazelle", "geyser", "ginger", "glacier", "goblet", "granite",
    "grape", "gravel", "griffin", "guitar", "hammer", "hammock", "harbor", "harvest",
    "hazel", "helmet", "heron", "hickory", "hinge", "honey", "hornet", "husky",
    "iceberg", "igloo", "indigo", "iris", "iron", "island", "ivory", "jacket",
    "jaguar", "jasmine", "jasper", "jigsaw", "jungle", "juniper", "kayak", "kernel",
    "kettle", "kiwi", "knight", "lagoon", "lantern", "laurel", "lava", "lemon",
    "lentil", "lilac", "lily", "lizard", "lobster", "locket", "lotus", "lumber",
    "magnet", "mango", "mantis", "maple", "marble", "meadow", "melon", "mesa",
    "mint", "mirror", "mitten", "moccasin", "molar", "mosaic", "mulberry", "mustang",
    "napkin", "nectar", "nickel", "nutmeg", "oasis", "ocean", "olive", "onion",
    "opal", "orbit", "orchid", "osprey", "otter", "owl", "oyster", "paddle",
    "pagoda", "panther", "parrot", "peacock", "pebble", "pelican", "pepper", "petal",
    "pigeon", "pillow", "pine", "pistol", "planet", "plum", "pocket", "prairie",
    "quartz", "quill", "rabbit", "raccoon", "radish", "raven", "ribbon", "river",
    "saddle", "saffron", "salmon", "sapphire", "satin", "spruce", "tiger", "walnut",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exactly_256_distinct_words() {
        let unique: HashSet<&str> = SAS_DICTIONARY.iter().copied().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn words_are_dns_safe_ascii() {
        for word in SAS_DICTIONARY {
            assert!(!word.is_empty());
            assert!(word.chars().all(|c| c.is_ascii_lowercase()));
        }
    }
}

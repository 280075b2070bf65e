//! Pattern identity: the key used for intra-run dedup and for diffing the
//! local corpus against a remote one. Must stay a pure function of the
//! file name, since local paths and remote listing names go through it alike.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DELIMITER: char = '_';
const TEMPO_MIN: u32 = 60;
const TEMPO_MAX: u32 = 250;
const HASH_LEN: usize = 8;

/// Style tokens recognized in file names. `hip-hop` is folded to `hiphop`.
const STYLE_VOCABULARY: &[&str] = &[
    "rock", "funk", "jazz", "latin", "blues", "reggae", "hiphop", "hip-hop", "soul", "metal",
    "swing", "salsa", "bossa", "shuffle", "ska", "pop", "disco", "punk", "country", "gospel",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternIdentity(String);

impl PatternIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an identity read back from storage.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for PatternIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cased file name with a trailing `.mid`/`.midi` removed.
/// Accepts a bare name or anything path-like; only the last component counts.
fn normalized_stem(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = base.to_lowercase();
    for ext in [".midi", ".mid"] {
        if let Some(stem) = lower.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    lower
}

fn tempo_token(token: &str) -> Option<u32> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token
        .parse::<u32>()
        .ok()
        .filter(|t| (TEMPO_MIN..=TEMPO_MAX).contains(t))
}

fn style_token(token: &str) -> Option<&'static str> {
    STYLE_VOCABULARY
        .iter()
        .find(|s| **s == token)
        .map(|&s| if s == "hip-hop" { "hiphop" } else { s })
}

/// Derive the identity for a file name.
///
/// `{style}_{tempo}` when the name carries both a style token and a tempo
/// token, otherwise the first 8 hex chars of SHA-256 over the lower-cased
/// stem with delimiters removed.
///
/// When several tokens qualify, the leftmost style and the leftmost tempo
/// win: `funk_rock_100_120.mid` is `funk_100`. Identities computed with a
/// last-token rule will disagree on such names.
pub fn derive_identity(name: &str) -> PatternIdentity {
    let stem = normalized_stem(name);
    let tokens: Vec<&str> = stem.split(DELIMITER).collect();

    let tempo = tokens.iter().find_map(|t| tempo_token(t));
    let style = tokens.iter().find_map(|t| style_token(t));

    if let (Some(style), Some(tempo)) = (style, tempo) {
        return PatternIdentity(format!("{style}_{tempo}"));
    }

    let normalized: String = stem.chars().filter(|c| *c != DELIMITER).collect();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    PatternIdentity(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_and_tempo() {
        assert_eq!(derive_identity("groove_funk_95.mid").as_str(), "funk_95");
        assert_eq!(derive_identity("Rock_140_Fill.MID").as_str(), "rock_140");
        assert_eq!(derive_identity("jazz_ride_110.midi").as_str(), "jazz_110");
    }

    #[test]
    fn hip_hop_is_canonical() {
        assert_eq!(derive_identity("hip-hop_90_boom.mid").as_str(), "hiphop_90");
        assert_eq!(derive_identity("hiphop_90_boom.mid").as_str(), "hiphop_90");
    }

    #[test]
    fn first_tokens_win() {
        assert_eq!(derive_identity("funk_rock_100_120.mid").as_str(), "funk_100");
    }

    #[test]
    fn tempo_outside_range_falls_back() {
        let id = derive_identity("funk_300.mid");
        assert_eq!(id.as_str().len(), HASH_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        // 59 is below range, 60 is in
        assert_ne!(derive_identity("funk_59.mid").as_str(), "funk_59");
        assert_eq!(derive_identity("funk_60.mid").as_str(), "funk_60");
        assert_eq!(derive_identity("funk_250.mid").as_str(), "funk_250");
    }

    #[test]
    fn mixed_tokens_are_not_tempos() {
        // "95bpm" is not a pure integer token
        assert_ne!(derive_identity("funk_95bpm.mid").as_str(), "funk_95");
    }

    #[test]
    fn fallback_ignores_case_and_delimiters() {
        let a = derive_identity("My_Lead_Line.mid");
        let b = derive_identity("mylead_line.MID");
        assert_eq!(a, b);
        assert_ne!(a, derive_identity("my_lead_line_2.mid"));
    }

    #[test]
    fn fallback_hash_is_known_value() {
        // sha256("abc") = ba7816bf...
        assert_eq!(derive_identity("a_b_c.mid").as_str(), "ba7816bf");
    }

    #[test]
    fn local_path_and_remote_name_agree() {
        assert_eq!(
            derive_identity("/corpus/grooves/funk/groove_funk_95.mid"),
            derive_identity("groove_funk_95.mid")
        );
        assert_eq!(
            derive_identity("/corpus/misc/Weird Name.mid"),
            derive_identity("weird name.mid")
        );
    }

    #[test]
    fn pure() {
        for name in ["groove_funk_95.mid", "lead_melody.mid", "x.mid", ""] {
            assert_eq!(derive_identity(name), derive_identity(name));
        }
    }
}

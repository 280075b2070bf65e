use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::FileAnalysis;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    GroovePattern,
    ChordProgression,
    Melody,
    Sample,
    Template,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::GroovePattern,
        Self::ChordProgression,
        Self::Melody,
        Self::Sample,
        Self::Template,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GroovePattern => "groove_pattern",
            Self::ChordProgression => "chord_progression",
            Self::Melody => "melody",
            Self::Sample => "sample",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownVariant {
                kind: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Funk,
    Rock,
    Jazz,
    Latin,
    Blues,
    Reggae,
    Hiphop,
    Electronic,
    Pop,
    // tempo-band fallbacks
    Ballad,
    Medium,
    Upbeat,
    Fast,
}

impl Style {
    pub const ALL: [Style; 13] = [
        Self::Funk,
        Self::Rock,
        Self::Jazz,
        Self::Latin,
        Self::Blues,
        Self::Reggae,
        Self::Hiphop,
        Self::Electronic,
        Self::Pop,
        Self::Ballad,
        Self::Medium,
        Self::Upbeat,
        Self::Fast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Funk => "funk",
            Self::Rock => "rock",
            Self::Jazz => "jazz",
            Self::Latin => "latin",
            Self::Blues => "blues",
            Self::Reggae => "reggae",
            Self::Hiphop => "hiphop",
            Self::Electronic => "electronic",
            Self::Pop => "pop",
            Self::Ballad => "ballad",
            Self::Medium => "medium",
            Self::Upbeat => "upbeat",
            Self::Fast => "fast",
        }
    }

    /// Style for a file with no genre keyword, from its tempo.
    pub fn from_tempo(bpm: f64) -> Self {
        if bpm < 80.0 {
            Self::Ballad
        } else if bpm < 100.0 {
            Self::Medium
        } else if bpm < 140.0 {
            Self::Upbeat
        } else {
            Self::Fast
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| UnknownVariant {
                kind: "style",
                value: s.to_string(),
            })
    }
}

const GROOVE_KEYWORDS: &[&str] = &["groove", "drum", "beat", "rhythm"];
const CHORD_KEYWORDS: &[&str] = &["chord", "progression", "harmony"];
const MELODY_KEYWORDS: &[&str] = &["melody", "lead", "tune"];
const SAMPLE_KEYWORDS: &[&str] = &["sample", "loop"];

const STYLE_KEYWORDS: &[(&[&str], Style)] = &[
    (&["funk", "soul"], Style::Funk),
    (&["rock", "metal"], Style::Rock),
    (&["jazz", "swing"], Style::Jazz),
    (&["latin", "salsa", "bossa"], Style::Latin),
    (&["blues", "shuffle"], Style::Blues),
    (&["reggae", "ska"], Style::Reggae),
    (&["hiphop", "hip-hop", "hip_hop", "rap"], Style::Hiphop),
    (&["house", "techno", "edm", "electro"], Style::Electronic),
    (&["pop"], Style::Pop),
];

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// Assign a category. Ordered rules, first match wins:
/// file name keywords (groove, chord, melody), then path keywords
/// (sample, loop), then drum flag, then track count.
///
/// Only the sample rule looks at directories, so an ancestor such as
/// `beats_library/` does not decide the category of everything below it.
pub fn classify_category(path: &Path, has_drums: bool, track_count: usize) -> Category {
    let name_lower = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let path_lower = path.to_string_lossy().to_lowercase();

    if contains_any(&name_lower, GROOVE_KEYWORDS) {
        return Category::GroovePattern;
    }
    if contains_any(&name_lower, CHORD_KEYWORDS) {
        return Category::ChordProgression;
    }
    if contains_any(&name_lower, MELODY_KEYWORDS) {
        return Category::Melody;
    }
    if contains_any(&path_lower, SAMPLE_KEYWORDS) {
        return Category::Sample;
    }
    if has_drums {
        return Category::GroovePattern;
    }
    if track_count == 1 {
        return Category::Melody;
    }
    // more than 5 tracks and the default both land in templates
    Category::Template
}

/// Assign a style from filename + parent directory keywords, falling back
/// to a tempo band.
pub fn classify_style(path: &Path, tempo: f64) -> Style {
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|p| p.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let haystack = format!("{file_name} {parent}");

    STYLE_KEYWORDS
        .iter()
        .find(|(keywords, _)| contains_any(&haystack, keywords))
        .map_or_else(|| Style::from_tempo(tempo), |(_, style)| *style)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: Category,
    pub style: Style,
}

pub fn classify(analysis: &FileAnalysis) -> Classification {
    Classification {
        category: classify_category(&analysis.path, analysis.has_drums, analysis.track_count),
        style: classify_style(&analysis.path, analysis.estimated_tempo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{self, DEFAULT_MIN_DURATION_SECS};
    use crate::testutil;

    fn cat(path: &str, has_drums: bool, tracks: usize) -> Category {
        classify_category(Path::new(path), has_drums, tracks)
    }

    #[test]
    fn rule1_groove_keywords() {
        assert_eq!(cat("/in/groove_funk_95.mid", true, 1), Category::GroovePattern);
        assert_eq!(cat("/in/drum_fill.mid", false, 3), Category::GroovePattern);
        assert_eq!(cat("/in/BEAT_01.mid", false, 1), Category::GroovePattern);
    }

    #[test]
    fn rule1_beats_rule2() {
        assert_eq!(cat("/in/rhythm_chords.mid", false, 2), Category::GroovePattern);
    }

    #[test]
    fn rule2_chord_keywords() {
        assert_eq!(cat("/in/chords_Dm_jazz.mid", false, 2), Category::ChordProgression);
        assert_eq!(cat("/in/Harmony_ii-v-i.mid", false, 8), Category::ChordProgression);
    }

    #[test]
    fn rule3_melody_keywords() {
        assert_eq!(cat("/in/lead_melody.mid", false, 1), Category::Melody);
        assert_eq!(cat("/in/tune_a.mid", false, 4), Category::Melody);
    }

    #[test]
    fn directory_names_do_not_pick_keyword_categories() {
        assert_eq!(cat("/home/me/beats_library/song.mid", false, 3), Category::Template);
        assert_eq!(cat("/home/leader/chords/song.mid", false, 3), Category::Template);
        assert_eq!(cat("/in/drums/fill.mid", false, 1), Category::Melody);
        // the sample rule still sees directories
        assert_eq!(cat("/in/groove_loops/song.mid", false, 3), Category::Sample);
    }

    #[test]
    fn rule4_sample_path() {
        assert_eq!(cat("/in/loops/a.mid", false, 4), Category::Sample);
        assert_eq!(cat("/in/samples/x.mid", false, 1), Category::Sample);
    }

    #[test]
    fn rule5_drum_flag() {
        assert_eq!(cat("/in/song.mid", true, 8), Category::GroovePattern);
    }

    #[test]
    fn rule6_single_track() {
        assert_eq!(cat("/in/song.mid", false, 1), Category::Melody);
    }

    #[test]
    fn rules7_8_templates() {
        assert_eq!(cat("/in/song.mid", false, 12), Category::Template);
        assert_eq!(cat("/in/song.mid", false, 3), Category::Template);
        assert_eq!(cat("/in/song.mid", false, 0), Category::Template);
    }

    #[test]
    fn funk_groove_drums_ignores_track_count() {
        for tracks in [0, 1, 2, 6, 16] {
            assert_eq!(
                cat("/in/funk_groove_drums.mid", true, tracks),
                Category::GroovePattern
            );
        }
    }

    #[test]
    fn scenario_from_parsed_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("groove_funk_95.mid", testutil::drum_groove(95.0), Category::GroovePattern),
            ("chords_Dm_jazz.mid", testutil::chords(120.0), Category::ChordProgression),
            ("lead_melody.mid", testutil::melody(120.0, 4), Category::Melody),
        ];
        for (name, bytes, expected) in files {
            let path = testutil::write_file(dir.path(), name, &bytes);
            let a = analyzer::analyze_file(&path, DEFAULT_MIN_DURATION_SECS).unwrap();
            assert_eq!(classify(&a).category, expected, "{name}");
        }
    }

    #[test]
    fn style_keywords_in_order() {
        let style = |p: &str| classify_style(Path::new(p), 120.0);
        assert_eq!(style("/in/groove_funk_95.mid"), Style::Funk);
        assert_eq!(style("/in/soul_rock.mid"), Style::Funk);
        assert_eq!(style("/in/metal/a.mid"), Style::Rock);
        assert_eq!(style("/in/chords_Dm_jazz.mid"), Style::Jazz);
        assert_eq!(style("/in/bossa_nova.mid"), Style::Latin);
        assert_eq!(style("/in/shuffle.mid"), Style::Blues);
        assert_eq!(style("/in/ska/x.mid"), Style::Reggae);
        assert_eq!(style("/in/hip_hop_1.mid"), Style::Hiphop);
        assert_eq!(style("/in/techno.mid"), Style::Electronic);
        assert_eq!(style("/in/pop/x.mid"), Style::Pop);
    }

    #[test]
    fn style_only_looks_at_name_and_parent() {
        assert_eq!(
            classify_style(Path::new("/funk/library/a.mid"), 120.0),
            Style::Upbeat
        );
    }

    #[test]
    fn style_tempo_bands() {
        let style = |t| classify_style(Path::new("/in/untitled.mid"), t);
        assert_eq!(style(79.9), Style::Ballad);
        assert_eq!(style(80.0), Style::Medium);
        assert_eq!(style(99.0), Style::Medium);
        assert_eq!(style(100.0), Style::Upbeat);
        assert_eq!(style(139.0), Style::Upbeat);
        assert_eq!(style(140.0), Style::Fast);
    }

    #[test]
    fn parse_names() {
        assert_eq!("groove_pattern".parse::<Category>(), Ok(Category::GroovePattern));
        assert_eq!("chord-progression".parse::<Category>(), Ok(Category::ChordProgression));
        assert_eq!("Jazz".parse::<Style>(), Ok(Style::Jazz));
        assert!("polka".parse::<Style>().is_err());
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>(), Ok(c));
        }
    }
}

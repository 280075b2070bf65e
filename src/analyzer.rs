//! Per-file structural metadata aggregated from parsed tracks.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::midi::{
    self, ContainerFormat, KeySignatureEvent, Meter, ParseError, ParsedFile, PitchRange,
    ProgramChange, TempoEvent, TimeSignatureEvent,
};

/// Tempo assumed when a file carries no set-tempo event.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Shortest duration (seconds) that still counts as musical content.
pub const DEFAULT_MIN_DURATION_SECS: f64 = 0.1;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error in {path}: {source}")]
    Parse { path: PathBuf, source: ParseError },
}

/// Non-fatal findings about a file. Everything except `Unparseable` describes
/// a structurally valid file that carries no usable music.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    NoNoteEvents,
    VeryShortDuration,
    NoTracks,
    Unparseable(String),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNoteEvents => write!(f, "No note events found"),
            Self::VeryShortDuration => write!(f, "Very short duration"),
            Self::NoTracks => write!(f, "No tracks found"),
            Self::Unparseable(e) => write!(f, "File corruption or invalid format: {e}"),
        }
    }
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSummary {
    pub index: usize,
    pub name: Option<String>,
    pub program: Option<u8>,
    pub channels: BTreeSet<u8>,
    pub notes: usize,
    pub is_drum_track: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileAnalysis {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub format: Option<ContainerFormat>,
    pub ticks_per_beat: Option<u16>,
    pub duration_secs: f64,
    pub track_count: usize,
    pub tracks: Vec<TrackSummary>,
    pub channels: BTreeSet<u8>,
    pub program_changes: Vec<ProgramChange>,
    pub tempo_changes: Vec<TempoEvent>,
    pub time_signatures: Vec<TimeSignatureEvent>,
    pub key_signatures: Vec<KeySignatureEvent>,
    pub estimated_tempo: f64,
    pub time_signature: Meter,
    pub estimated_key: String,
    pub note_count: usize,
    pub pitch_range: Option<PitchRange>,
    pub has_drums: bool,
    pub has_notes: bool,
    /// False when the container could not be parsed at all
    pub valid: bool,
    pub issues: Vec<Issue>,
}

impl FileAnalysis {
    /// Record for a file whose bytes did not parse.
    pub fn unparseable(path: &Path, size: u64, error: &ParseError) -> Self {
        Self {
            filename: file_name(path),
            path: path.to_path_buf(),
            size,
            format: None,
            ticks_per_beat: None,
            duration_secs: 0.0,
            track_count: 0,
            tracks: Vec::new(),
            channels: BTreeSet::new(),
            program_changes: Vec::new(),
            tempo_changes: Vec::new(),
            time_signatures: Vec::new(),
            key_signatures: Vec::new(),
            estimated_tempo: DEFAULT_TEMPO_BPM,
            time_signature: Meter::COMMON,
            estimated_key: "C".to_string(),
            note_count: 0,
            pitch_range: None,
            has_drums: false,
            has_notes: false,
            valid: false,
            issues: vec![Issue::Unparseable(error.to_string())],
        }
    }

    /// Parsed, with nothing flagged.
    pub fn is_clean(&self) -> bool {
        self.valid && self.issues.is_empty()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.filename.clone())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Aggregate a parsed file into a FileAnalysis.
pub fn summarize(
    path: &Path,
    size: u64,
    parsed: &ParsedFile,
    min_duration_secs: f64,
) -> FileAnalysis {
    let mut channels = BTreeSet::new();
    let mut program_changes = Vec::new();
    let mut tempo_changes: Vec<TempoEvent> = Vec::new();
    let mut time_signatures: Vec<TimeSignatureEvent> = Vec::new();
    let mut key_signatures: Vec<KeySignatureEvent> = Vec::new();
    let mut pitch_range: Option<PitchRange> = None;
    let mut note_count = 0;
    let mut tracks = Vec::with_capacity(parsed.tracks.len());

    for track in &parsed.tracks {
        channels.extend(track.channels.iter().copied());
        program_changes.extend(track.program_changes.iter().cloned());
        tempo_changes.extend(track.tempo_changes.iter().cloned());
        time_signatures.extend(track.time_signatures.iter().cloned());
        key_signatures.extend(track.key_signatures.iter().cloned());
        note_count += track.note_on_count;
        if let Some(r) = track.pitch_range {
            pitch_range = Some(pitch_range.map_or(r, |p| p.merge(r)));
        }

        tracks.push(TrackSummary {
            index: track.index,
            name: track.name.clone(),
            program: track.program_changes.first().map(|p| p.program),
            channels: track.channels.clone(),
            notes: track.note_on_count,
            is_drum_track: track.is_drum,
        });
    }

    // "First" means earliest absolute tick; the stable sort keeps track order on ties.
    tempo_changes.sort_by_key(|t| t.tick);
    time_signatures.sort_by_key(|t| t.tick);
    key_signatures.sort_by_key(|k| k.tick);

    let estimated_tempo = tempo_changes.first().map_or(DEFAULT_TEMPO_BPM, |t| t.bpm);
    let time_signature = time_signatures.first().map_or(Meter::COMMON, |t| t.meter);
    let estimated_key = key_signatures
        .first()
        .map_or_else(|| "C".to_string(), |k| k.key_name());
    let has_drums = parsed.tracks.iter().any(|t| t.is_drum);

    let mut issues = Vec::new();
    if note_count == 0 {
        issues.push(Issue::NoNoteEvents);
    }
    if parsed.duration_secs < min_duration_secs {
        issues.push(Issue::VeryShortDuration);
    }
    if parsed.tracks.is_empty() {
        issues.push(Issue::NoTracks);
    }

    FileAnalysis {
        filename: file_name(path),
        path: path.to_path_buf(),
        size,
        format: Some(parsed.format),
        ticks_per_beat: parsed.division.ticks_per_beat(),
        duration_secs: parsed.duration_secs,
        track_count: parsed.tracks.len(),
        tracks,
        channels,
        program_changes,
        tempo_changes,
        time_signatures,
        key_signatures,
        estimated_tempo,
        time_signature,
        estimated_key,
        note_count,
        pitch_range,
        has_drums,
        has_notes: note_count > 0,
        valid: true,
        issues,
    }
}

/// Parse and summarize in-memory bytes.
pub fn analyze_bytes(
    path: &Path,
    bytes: &[u8],
    min_duration_secs: f64,
) -> Result<FileAnalysis, ParseError> {
    let parsed = midi::parse(bytes)?;
    Ok(summarize(path, bytes.len() as u64, &parsed, min_duration_secs))
}

/// Read, parse and summarize a file on disk.
pub fn analyze_file(path: &Path, min_duration_secs: f64) -> Result<FileAnalysis, AnalyzeError> {
    let bytes = std::fs::read(path).map_err(|source| AnalyzeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    analyze_bytes(path, &bytes, min_duration_secs).map_err(|source| AnalyzeError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Analyze a file, folding parse failures into an invalid record.
/// Only IO failures remain errors.
pub fn analyze_or_flag(path: &Path, min_duration_secs: f64) -> Result<FileAnalysis, AnalyzeError> {
    match analyze_file(path, min_duration_secs) {
        Err(AnalyzeError::Parse { path, source }) => {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            log::debug!("Unparseable {}: {}", path.display(), source);
            Ok(FileAnalysis::unparseable(&path, size, &source))
        }
        other => other,
    }
}

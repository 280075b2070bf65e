//! Standard MIDI File decoding into per-track structural summaries.
//!
//! Chunk and event decoding (running status, sysex, variable-length
//! quantities) is delegated to `midly`; this module checks the header
//! itself, accumulates absolute ticks per track, and keeps only the events
//! the analyzer cares about.

pub mod timing;

use std::collections::BTreeSet;
use std::fmt;

use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde::Serialize;
use thiserror::Error;

/// Channel index reserved for percussion (channel 10 in 1-based numbering).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Tempo in effect before the first set-tempo event (120 BPM).
pub const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

const HEADER_MAGIC: &[u8; 4] = b"MThd";
const HEADER_LEN: usize = 14;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("file too short for a MIDI header ({0} bytes)")]
    TooShort(usize),
    #[error("bad header magic {0:02x?}, expected \"MThd\"")]
    BadMagic([u8; 4]),
    #[error("malformed MIDI data: {0}")]
    Malformed(String),
}

/// Container format variant from the header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    /// Format 0: one multi-channel track
    SingleTrack,
    /// Format 1: simultaneous tracks sharing one tempo map
    Parallel,
    /// Format 2: independent sequential patterns
    Sequential,
}

impl ContainerFormat {
    pub fn number(self) -> u8 {
        match self {
            Self::SingleTrack => 0,
            Self::Parallel => 1,
            Self::Sequential => 2,
        }
    }
}

/// Timing resolution from the header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Division {
    Metrical { ticks_per_beat: u16 },
    Timecode { fps: f64, subframes: u8 },
}

impl Division {
    pub fn ticks_per_beat(self) -> Option<u16> {
        match self {
            Self::Metrical { ticks_per_beat } => Some(ticks_per_beat),
            Self::Timecode { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoEvent {
    pub tick: u64,
    pub micros_per_beat: u32,
    pub bpm: f64,
}

/// Numerator over an actual (not exponent) denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Meter {
    pub numerator: u8,
    pub denominator: u32,
}

impl Meter {
    pub const COMMON: Meter = Meter {
        numerator: 4,
        denominator: 4,
    };

    /// Path-safe rendering: "4-4".
    pub fn slug(&self) -> String {
        format!("{}-{}", self.numerator, self.denominator)
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSignatureEvent {
    pub tick: u64,
    pub meter: Meter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySignatureEvent {
    pub tick: u64,
    /// Negative = flats, positive = sharps
    pub sharps: i8,
    pub minor: bool,
}

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_KEYS: [&str; 15] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m",
    "A#m",
];

impl KeySignatureEvent {
    pub fn key_name(&self) -> String {
        let idx = i16::from(self.sharps) + 7;
        let table = if self.minor { &MINOR_KEYS } else { &MAJOR_KEYS };
        usize::try_from(idx)
            .ok()
            .and_then(|i| table.get(i))
            .map(|k| k.to_string())
            .unwrap_or_else(|| format!("{}{}", self.sharps, if self.minor { "m" } else { "" }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramChange {
    pub tick: u64,
    pub channel: u8,
    pub program: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PitchRange {
    pub min: u8,
    pub max: u8,
}

impl PitchRange {
    fn widen(range: Option<Self>, key: u8) -> Self {
        match range {
            Some(r) => Self {
                min: r.min.min(key),
                max: r.max.max(key),
            },
            None => Self { min: key, max: key },
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Everything the analyzer needs from one track chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedTrack {
    pub index: usize,
    pub name: Option<String>,
    pub channels: BTreeSet<u8>,
    pub program_changes: Vec<ProgramChange>,
    /// Note-on events with velocity > 0
    pub note_on_count: usize,
    pub pitch_range: Option<PitchRange>,
    pub tempo_changes: Vec<TempoEvent>,
    pub time_signatures: Vec<TimeSignatureEvent>,
    pub key_signatures: Vec<KeySignatureEvent>,
    /// Any channel event on the percussion channel
    pub is_drum: bool,
    /// Absolute tick of the last event
    pub end_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFile {
    pub format: ContainerFormat,
    pub division: Division,
    pub tracks: Vec<ParsedTrack>,
    pub duration_secs: f64,
}

/// Convert microseconds-per-quarter-note to BPM, rounded to 2 decimals.
pub fn micros_to_bpm(micros_per_beat: u32) -> f64 {
    let bpm = 60_000_000.0 / f64::from(micros_per_beat);
    (bpm * 100.0).round() / 100.0
}

/// Parse raw file bytes.
pub fn parse(bytes: &[u8]) -> Result<ParsedFile, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::TooShort(bytes.len()));
    }
    if &bytes[..4] != HEADER_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(ParseError::BadMagic(magic));
    }

    let smf = Smf::parse(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let format = match smf.header.format {
        midly::Format::SingleTrack => ContainerFormat::SingleTrack,
        midly::Format::Parallel => ContainerFormat::Parallel,
        midly::Format::Sequential => ContainerFormat::Sequential,
    };

    let division = match smf.header.timing {
        Timing::Metrical(tpb) => Division::Metrical {
            ticks_per_beat: tpb.as_int(),
        },
        Timing::Timecode(fps, subframes) => Division::Timecode {
            fps: match fps {
                Fps::Fps24 => 24.0,
                Fps::Fps25 => 25.0,
                Fps::Fps29 => 29.97,
                Fps::Fps30 => 30.0,
            },
            subframes,
        },
    };

    let tracks: Vec<ParsedTrack> = smf
        .tracks
        .iter()
        .enumerate()
        .map(|(index, events)| parse_track(index, events))
        .collect();

    let duration_secs = timing::duration_secs(format, division, &tracks);

    Ok(ParsedFile {
        format,
        division,
        tracks,
        duration_secs,
    })
}

fn parse_track(index: usize, events: &[TrackEvent<'_>]) -> ParsedTrack {
    let mut track = ParsedTrack {
        index,
        ..Default::default()
    };
    let mut tick: u64 = 0;

    for event in events {
        tick += u64::from(event.delta.as_int());

        match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                let micros = t.as_int();
                // A zero tempo would divide by zero downstream
                if micros > 0 {
                    track.tempo_changes.push(TempoEvent {
                        tick,
                        micros_per_beat: micros,
                        bpm: micros_to_bpm(micros),
                    });
                }
            }
            TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, exponent, _, _)) => {
                track.time_signatures.push(TimeSignatureEvent {
                    tick,
                    meter: Meter {
                        numerator,
                        denominator: 2u32.saturating_pow(u32::from(exponent)),
                    },
                });
            }
            TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)) => {
                track.key_signatures.push(KeySignatureEvent {
                    tick,
                    sharps,
                    minor,
                });
            }
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                if track.name.is_none() {
                    let name = String::from_utf8_lossy(raw).trim().to_string();
                    if !name.is_empty() {
                        track.name = Some(name);
                    }
                }
            }
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                track.channels.insert(channel);
                if channel == PERCUSSION_CHANNEL {
                    track.is_drum = true;
                }

                match message {
                    MidiMessage::ProgramChange { program } => {
                        track.program_changes.push(ProgramChange {
                            tick,
                            channel,
                            program: program.as_int(),
                        });
                    }
                    // velocity 0 is a note-off by convention
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        track.note_on_count += 1;
                        track.pitch_range =
                            Some(PitchRange::widen(track.pitch_range, key.as_int()));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    track.end_tick = tick;
    track
}

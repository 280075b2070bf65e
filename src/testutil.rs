//! Byte-level Standard MIDI File builder for tests.

use std::path::{Path, PathBuf};

/// Append a variable-length quantity.
pub fn write_vlq(buf: &mut Vec<u8>, value: u32) {
    let mut stack = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        stack.push(((rest & 0x7F) as u8) | 0x80);
        rest >>= 7;
    }
    buf.extend(stack.iter().rev());
}

#[derive(Default)]
pub struct TrackBuilder {
    bytes: Vec<u8>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn meta(mut self, delta: u32, kind: u8, data: &[u8]) -> Self {
        write_vlq(&mut self.bytes, delta);
        self.bytes.extend([0xFF, kind]);
        write_vlq(&mut self.bytes, data.len() as u32);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn name(self, delta: u32, name: &str) -> Self {
        self.meta(delta, 0x03, name.as_bytes())
    }

    pub fn tempo_bpm(self, delta: u32, bpm: f64) -> Self {
        let us = (60_000_000.0 / bpm).round() as u32;
        self.meta(delta, 0x51, &us.to_be_bytes()[1..])
    }

    pub fn time_signature(self, delta: u32, numerator: u8, denominator: u8) -> Self {
        let exp = denominator.trailing_zeros() as u8;
        self.meta(delta, 0x58, &[numerator, exp, 24, 8])
    }

    pub fn key_signature(self, delta: u32, sharps: i8, minor: bool) -> Self {
        self.meta(delta, 0x59, &[sharps as u8, minor as u8])
    }

    pub fn program(mut self, delta: u32, channel: u8, program: u8) -> Self {
        write_vlq(&mut self.bytes, delta);
        self.bytes.extend([0xC0 | channel, program]);
        self
    }

    pub fn note_on(mut self, delta: u32, channel: u8, key: u8, velocity: u8) -> Self {
        write_vlq(&mut self.bytes, delta);
        self.bytes.extend([0x90 | channel, key, velocity]);
        self
    }

    pub fn note_off(mut self, delta: u32, channel: u8, key: u8) -> Self {
        write_vlq(&mut self.bytes, delta);
        self.bytes.extend([0x80 | channel, key, 0]);
        self
    }

    /// Note-on at `delta`, matching note-off `length` ticks later.
    pub fn note(self, delta: u32, channel: u8, key: u8, length: u32) -> Self {
        self.note_on(delta, channel, key, 100).note_off(length, channel, key)
    }

    /// Close the track with an end-of-track meta event.
    pub fn finish(self) -> Vec<u8> {
        self.meta(0, 0x2F, &[]).bytes
    }
}

pub struct SmfBuilder {
    format: u16,
    division: u16,
    tracks: Vec<Vec<u8>>,
}

impl SmfBuilder {
    pub fn new(format: u16, ticks_per_beat: u16) -> Self {
        Self {
            format,
            division: ticks_per_beat,
            tracks: Vec::new(),
        }
    }

    pub fn track(mut self, track: TrackBuilder) -> Self {
        self.tracks.push(track.finish());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"MThd");
        out.extend(6u32.to_be_bytes());
        out.extend(self.format.to_be_bytes());
        out.extend((self.tracks.len() as u16).to_be_bytes());
        out.extend(self.division.to_be_bytes());
        for track in &self.tracks {
            out.extend_from_slice(b"MTrk");
            out.extend((track.len() as u32).to_be_bytes());
            out.extend_from_slice(track);
        }
        out
    }
}

/// A drum groove: one track, percussion channel, four 1-beat hits at `bpm`.
pub fn drum_groove(bpm: f64) -> Vec<u8> {
    SmfBuilder::new(0, 480)
        .track(
            TrackBuilder::new()
                .tempo_bpm(0, bpm)
                .time_signature(0, 4, 4)
                .note(0, 9, 36, 480)
                .note(0, 9, 38, 480)
                .note(0, 9, 36, 480)
                .note(0, 9, 38, 480),
        )
        .build()
}

/// A single-track melody on channel 0 with `notes` quarter notes.
pub fn melody(bpm: f64, notes: u8) -> Vec<u8> {
    let mut track = TrackBuilder::new().tempo_bpm(0, bpm).program(0, 0, 73);
    for i in 0..notes {
        track = track.note(0, 0, 60 + i, 480);
    }
    SmfBuilder::new(0, 480).track(track).build()
}

/// Two-track chord file: conductor track + piano chords, no drums.
pub fn chords(bpm: f64) -> Vec<u8> {
    SmfBuilder::new(1, 480)
        .track(
            TrackBuilder::new()
                .tempo_bpm(0, bpm)
                .time_signature(0, 3, 4)
                .key_signature(0, -1, true),
        )
        .track(
            TrackBuilder::new()
                .name(0, "Piano")
                .program(0, 0, 0)
                .note_on(0, 0, 62, 90)
                .note_on(0, 0, 65, 90)
                .note_on(0, 0, 69, 90)
                .note_off(960, 0, 62)
                .note_off(0, 0, 65)
                .note_off(0, 0, 69),
        )
        .build()
}

/// Structurally valid file with a tempo event and no notes.
pub fn silent() -> Vec<u8> {
    SmfBuilder::new(0, 480)
        .track(TrackBuilder::new().tempo_bpm(0, 120.0))
        .build()
}

pub fn write_file(dir: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

/// In-memory remote corpus. Directories are implied by file paths.
#[derive(Default)]
pub struct MemoryCorpus {
    files: std::collections::BTreeMap<String, Vec<u8>>,
    failing: std::collections::HashSet<String>,
    broken_downloads: std::collections::HashSet<String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.insert(path.to_string(), bytes.to_vec());
        self
    }

    /// Listing `dir` fails.
    pub fn failing(mut self, dir: &str) -> Self {
        self.failing.insert(dir.to_string());
        self
    }

    /// Downloading `path` fails.
    pub fn broken_download(mut self, path: &str) -> Self {
        self.broken_downloads.insert(path.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl crate::remote::RemoteCorpus for MemoryCorpus {
    fn list_dir(
        &self,
        path: &str,
    ) -> Result<Vec<crate::remote::RemoteEntry>, crate::remote::NetworkError> {
        use crate::remote::{EntryKind, NetworkError, RemoteEntry};

        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.failing.contains(path) {
            return Err(NetworkError::Http {
                url: format!("mem://{path}"),
                message: "503 Service Unavailable".into(),
            });
        }

        let prefix = if path.is_empty() { String::new() } else { format!("{path}/") };
        let mut entries: Vec<RemoteEntry> = Vec::new();
        let mut dirs = std::collections::BTreeSet::new();
        for (file, bytes) in &self.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(RemoteEntry {
                    name: rest.to_string(),
                    path: file.clone(),
                    kind: EntryKind::File,
                    download_url: Some(format!("mem://{file}")),
                    size: bytes.len() as u64,
                }),
            }
        }
        for dir in dirs {
            entries.push(RemoteEntry {
                path: format!("{prefix}{dir}"),
                name: dir,
                kind: EntryKind::Directory,
                download_url: None,
                size: 0,
            });
        }
        Ok(entries)
    }

    fn download(
        &self,
        entry: &crate::remote::RemoteEntry,
    ) -> Result<Vec<u8>, crate::remote::NetworkError> {
        use crate::remote::NetworkError;

        if self.broken_downloads.contains(&entry.path) {
            return Err(NetworkError::Http {
                url: format!("mem://{}", entry.path),
                message: "connection reset".into(),
            });
        }
        self.files
            .get(&entry.path)
            .cloned()
            .ok_or_else(|| NetworkError::Http {
                url: format!("mem://{}", entry.path),
                message: "404 Not Found".into(),
            })
    }
}

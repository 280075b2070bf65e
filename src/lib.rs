pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod db;
pub mod filenames;
pub mod integrate;
pub mod midi;
pub mod pipeline;
pub mod reconcile;
pub mod remote;
pub mod reports;
pub mod scanner;
pub mod validate;

#[cfg(test)]
mod testutil;

/// Standard MIDI File extensions (matched case-insensitively)
pub const MIDI_EXTENSIONS: &[&str] = &["mid", "midi"];

/// Application name for XDG paths
pub const APP_NAME: &str = "midicorpus";

//! Tick → seconds conversion over a tempo map.

use super::{ContainerFormat, DEFAULT_MICROS_PER_BEAT, Division, ParsedTrack, TempoEvent};

/// Tempo changes ordered by tick. Ties keep their input order.
#[derive(Debug, Clone, Default)]
pub struct TempoMap {
    changes: Vec<(u64, u32)>,
}

impl TempoMap {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TempoEvent>) -> Self {
        let mut changes: Vec<(u64, u32)> = events
            .into_iter()
            .map(|e| (e.tick, e.micros_per_beat))
            .collect();
        changes.sort_by_key(|&(tick, _)| tick);
        Self { changes }
    }

    /// Elapsed seconds from tick 0 to `tick`.
    pub fn seconds_at(&self, tick: u64, ticks_per_beat: u16) -> f64 {
        if ticks_per_beat == 0 {
            return 0.0;
        }
        let tpb = f64::from(ticks_per_beat);
        let mut seconds = 0.0;
        let mut last_tick = 0u64;
        let mut micros = DEFAULT_MICROS_PER_BEAT;

        for &(change_tick, change_micros) in &self.changes {
            if change_tick >= tick {
                break;
            }
            seconds += (change_tick - last_tick) as f64 * f64::from(micros) / (tpb * 1_000_000.0);
            last_tick = change_tick;
            micros = change_micros;
        }

        seconds + (tick - last_tick) as f64 * f64::from(micros) / (tpb * 1_000_000.0)
    }
}

/// Total playing time of a parsed file.
///
/// Formats 0 and 1 share one tempo map merged from every track and end at
/// the latest track end. Format 2 tracks are independent patterns played
/// back to back, each with its own tempo map.
pub fn duration_secs(format: ContainerFormat, division: Division, tracks: &[ParsedTrack]) -> f64 {
    match division {
        Division::Timecode { fps, subframes } => {
            let ticks_per_sec = fps * f64::from(subframes);
            if ticks_per_sec <= 0.0 {
                return 0.0;
            }
            let ticks = match format {
                ContainerFormat::Sequential => tracks.iter().map(|t| t.end_tick).sum(),
                _ => tracks.iter().map(|t| t.end_tick).max().unwrap_or(0),
            };
            ticks as f64 / ticks_per_sec
        }
        Division::Metrical { ticks_per_beat } => match format {
            ContainerFormat::Sequential => tracks
                .iter()
                .map(|t| {
                    TempoMap::from_events(&t.tempo_changes).seconds_at(t.end_tick, ticks_per_beat)
                })
                .sum(),
            _ => {
                let map = TempoMap::from_events(tracks.iter().flat_map(|t| &t.tempo_changes));
                let end = tracks.iter().map(|t| t.end_tick).max().unwrap_or(0);
                map.seconds_at(end, ticks_per_beat)
            }
        },
    }
}

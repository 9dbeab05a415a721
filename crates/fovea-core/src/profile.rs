//! Per-worker interval profiling.
//!
//! Every stage worker owns a [`Profiler`] and records named intervals
//! (`setup`, `idle`, `io`, `task`, ...) against a base instant shared by the
//! whole job. Workers hand their profiler back through the join handle and
//! the runner serialises one dump per rank.
//!
//! Dump layout, all little-endian: `i64` job start and end (Unix
//! nanoseconds), then for each stage a `u8` worker count followed by each
//! worker's record: `u64` interval count, then per interval a `u8` tag
//! length, the tag bytes, and `i64` start/end offsets from job start.

use std::time::Instant;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Interval {
    pub tag: &'static str,
    pub start_ns: i64,
    pub end_ns: i64,
}

/// Interval recorder for one stage worker.
#[derive(Debug)]
pub struct Profiler {
    base: Instant,
    intervals: Vec<Interval>,
}

impl Profiler {
    pub fn new(base: Instant) -> Self {
        Self {
            base,
            intervals: Vec::new(),
        }
    }

    pub fn add_interval(&mut self, tag: &'static str, start: Instant, end: Instant) {
        let offset = |t: Instant| t.duration_since(self.base).as_nanos().min(i64::MAX as u128);
        self.intervals.push(Interval {
            tag,
            start_ns: offset(start) as i64,
            end_ns: offset(end) as i64,
        });
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }
}

/// Serialise the per-stage worker profilers into the on-disk dump format.
///
/// `stages` is ordered (load, decode, evaluate, save).
pub fn encode_dump(start_ns: i64, end_ns: i64, stages: &[&[Profiler]]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&start_ns.to_le_bytes());
    out.extend_from_slice(&end_ns.to_le_bytes());
    for workers in stages {
        let count = u8::try_from(workers.len()).map_err(|_| {
            EngineError::Config(format!("too many workers in one stage: {}", workers.len()))
        })?;
        out.push(count);
        for profiler in *workers {
            out.extend_from_slice(&(profiler.intervals.len() as u64).to_le_bytes());
            for interval in &profiler.intervals {
                let tag = interval.tag.as_bytes();
                let tag_len = u8::try_from(tag.len())
                    .map_err(|_| EngineError::Config(format!("profiler tag too long: {}", interval.tag)))?;
                out.push(tag_len);
                out.extend_from_slice(tag);
                out.extend_from_slice(&interval.start_ns.to_le_bytes());
                out.extend_from_slice(&interval.end_ns.to_le_bytes());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_offsets_from_base() {
        let base = Instant::now();
        let mut profiler = Profiler::new(base);
        let start = base + Duration::from_micros(5);
        let end = base + Duration::from_micros(9);
        profiler.add_interval("io", start, end);

        let intervals = profiler.intervals();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].tag, "io");
        assert_eq!(intervals[0].start_ns, 5_000);
        assert_eq!(intervals[0].end_ns, 9_000);
    }

    #[test]
    fn dump_layout_matches_contract() {
        let base = Instant::now();
        let mut worker = Profiler::new(base);
        worker.add_interval("task", base, base + Duration::from_nanos(7));
        let stage = [worker];
        let dump = encode_dump(100, 200, &[&stage, &[]]).unwrap();

        // Header.
        assert_eq!(&dump[0..8], &100i64.to_le_bytes());
        assert_eq!(&dump[8..16], &200i64.to_le_bytes());
        // First stage: one worker, one interval tagged "task".
        assert_eq!(dump[16], 1);
        assert_eq!(&dump[17..25], &1u64.to_le_bytes());
        assert_eq!(dump[25], 4);
        assert_eq!(&dump[26..30], b"task");
        // Second stage is empty.
        assert_eq!(dump[dump.len() - 1], 0);
    }
}

//! Work-plan construction and the job output descriptor.
//!
//! A job is broken into [`WorkItem`]s of at most `work_item_size` frames,
//! enumerated video by video. The position of an item in the plan is its
//! work-item index, which is what the distribution coordinator hands out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{ItemMetadata, WorkItem};

/// Immutable list of work items, built once before any stage starts.
#[derive(Debug, Clone)]
pub struct WorkPlan {
    items: Vec<WorkItem>,
    total_frames: i64,
}

impl WorkPlan {
    /// Shard every video into items of at most `work_item_size` frames.
    pub fn build(metadata: &[ItemMetadata], work_item_size: usize) -> Result<Self> {
        if work_item_size == 0 {
            return Err(EngineError::Config("work_item_size must be positive".into()));
        }
        let step = work_item_size as i64;
        let mut items = Vec::new();
        let mut total_frames = 0i64;
        for (video_index, meta) in metadata.iter().enumerate() {
            let mut allocated = 0i64;
            while allocated < meta.frames {
                let take = step.min(meta.frames - allocated);
                items.push(WorkItem {
                    video_index,
                    start_frame: allocated,
                    end_frame: allocated + take,
                });
                allocated += take;
            }
            total_frames += meta.frames;
        }
        Ok(Self {
            items,
            total_frames,
        })
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_frames(&self) -> i64 {
        self.total_frames
    }

    /// Item for a dispatched work-item index.
    pub fn get(&self, index: usize) -> Result<&WorkItem> {
        self.items.get(index).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "work item index {index} out of range ({} items)",
                self.items.len()
            ))
        })
    }

    /// Per-video interval lists, keyed by item name, in processing order.
    pub fn intervals(&self, item_names: &[String]) -> BTreeMap<String, Vec<(i64, i64)>> {
        let mut map: BTreeMap<String, Vec<(i64, i64)>> = BTreeMap::new();
        for item in &self.items {
            map.entry(item_names[item.video_index].clone())
                .or_default()
                .push((item.start_frame, item.end_frame));
        }
        map
    }
}

/// Written by the master once every stage has drained: records which
/// intervals of which videos the job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub dataset: String,
    pub intervals: BTreeMap<String, Vec<(i64, i64)>>,
}

/// Smallest keyframe span `[start, end]` such that
/// `positions[start] <= start_frame < positions[start + 1]` and
/// `positions[end] >= end_frame`.
///
/// `positions` must already carry the virtual terminal keyframe at the frame
/// count, so the span always exists for a valid work item.
pub fn keyframe_span(positions: &[i64], start_frame: i64, end_frame: i64) -> Result<(usize, usize)> {
    let start = positions
        .windows(2)
        .position(|pair| pair[0] <= start_frame && start_frame < pair[1])
        .ok_or_else(|| {
            EngineError::Metadata(format!(
                "no keyframe interval covers start frame {start_frame}"
            ))
        })?;
    let end = (start..positions.len())
        .find(|&i| positions[i] >= end_frame)
        .ok_or_else(|| {
            EngineError::Metadata(format!("no keyframe at or after end frame {end_frame}"))
        })?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Codec;

    fn metadata(frames: i64) -> ItemMetadata {
        let positions: Vec<i64> = (0..frames).step_by(8).collect();
        let offsets: Vec<i64> = positions.iter().map(|p| p * 100).collect();
        ItemMetadata {
            frames,
            width: 16,
            height: 16,
            codec: Codec::Raw,
            keyframe_positions: positions,
            keyframe_byte_offsets: offsets,
            priming_packets: Vec::new(),
        }
    }

    #[test]
    fn single_frame_video_yields_one_item() {
        let plan = WorkPlan::build(&[metadata(1)], 96).unwrap();
        assert_eq!(plan.items(), &[WorkItem {
            video_index: 0,
            start_frame: 0,
            end_frame: 1,
        }]);
        assert_eq!(plan.total_frames(), 1);
    }

    #[test]
    fn two_hundred_frames_split_into_three_items() {
        let plan = WorkPlan::build(&[metadata(200)], 96).unwrap();
        let bounds: Vec<(i64, i64)> = plan
            .items()
            .iter()
            .map(|item| (item.start_frame, item.end_frame))
            .collect();
        assert_eq!(bounds, vec![(0, 96), (96, 192), (192, 200)]);
    }

    #[test]
    fn items_enumerate_in_video_order() {
        let plan = WorkPlan::build(&[metadata(96), metadata(1)], 96).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.items()[0].video_index, 0);
        assert_eq!(plan.items()[1].video_index, 1);
        assert_eq!(plan.items()[1].frames(), 1);
    }

    #[test]
    fn intervals_partition_every_video() {
        let plan = WorkPlan::build(&[metadata(200)], 96).unwrap();
        let names = vec!["clip".to_string()];
        let intervals = plan.intervals(&names);
        let spans = &intervals["clip"];
        assert_eq!(spans.first().map(|s| s.0), Some(0));
        for pair in spans.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(spans.last().map(|s| s.1), Some(200));
        assert!(spans.iter().all(|s| s.1 - s.0 <= 96));
    }

    #[test]
    fn keyframe_span_covers_interior_item() {
        // Keyframes every 8 frames, 20 frames total, virtual terminal added.
        let positions = [0, 8, 16, 20];
        assert_eq!(keyframe_span(&positions, 10, 14).unwrap(), (1, 2));
        assert_eq!(keyframe_span(&positions, 0, 8).unwrap(), (0, 1));
        // Tail item runs into the virtual terminal keyframe.
        assert_eq!(keyframe_span(&positions, 17, 20).unwrap(), (2, 3));
        // An item spanning a keyframe boundary widens to both sides.
        assert_eq!(keyframe_span(&positions, 6, 18).unwrap(), (0, 3));
    }

    #[test]
    fn keyframe_span_rejects_out_of_range_frames() {
        let positions = [0, 8, 16, 20];
        assert!(keyframe_span(&positions, 20, 24).is_err());
    }
}

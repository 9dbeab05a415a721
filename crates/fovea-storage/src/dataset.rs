//! Dataset descriptors and the raw-codec dataset writer.
//!
//! A dataset is a descriptor listing item names plus, per item, a metadata
//! file and a packetised data file. The raw codec written here stores whole
//! NV12 frames: one packet per keyframe group, so every keyframe byte offset
//! points at the length prefix of its group's packet.

use serde::{Deserialize, Serialize};

use fovea_core::error::{EngineError, Result};
use fovea_core::packet::write_packet;
use fovea_core::types::{Codec, ItemMetadata, nv12_frame_size};

use crate::backend::{StorageBackend, read_all, write_all};
use crate::paths::{dataset_descriptor_path, dataset_item_data_path, dataset_item_metadata_path};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub items: Vec<String>,
}

pub fn load_descriptor(storage: &dyn StorageBackend, dataset: &str) -> Result<DatasetDescriptor> {
    let bytes = read_all(storage, &dataset_descriptor_path(dataset))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Metadata(format!("dataset {dataset} descriptor: {e}")))
}

pub fn load_item_metadata(
    storage: &dyn StorageBackend,
    dataset: &str,
    item: &str,
) -> Result<ItemMetadata> {
    let bytes = read_all(storage, &dataset_item_metadata_path(dataset, item))?;
    let meta: ItemMetadata = serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Metadata(format!("item {item} metadata: {e}")))?;
    meta.validate()?;
    Ok(meta)
}

/// Add `item` to the dataset descriptor, creating the descriptor if needed.
pub fn register_item(storage: &dyn StorageBackend, dataset: &str, item: &str) -> Result<()> {
    let mut descriptor = match load_descriptor(storage, dataset) {
        Ok(d) => d,
        Err(EngineError::Storage(_)) => DatasetDescriptor::default(),
        Err(other) => return Err(other),
    };
    if !descriptor.items.iter().any(|name| name == item) {
        descriptor.items.push(item.to_string());
    }
    let bytes = serde_json::to_vec_pretty(&descriptor)
        .map_err(|e| EngineError::Metadata(format!("dataset {dataset} descriptor: {e}")))?;
    write_all(storage, &dataset_descriptor_path(dataset), &bytes)?;
    Ok(())
}

/// Write one raw-codec item: data file, metadata file, descriptor entry.
///
/// Frames are grouped into keyframe groups of `keyframe_interval`; each
/// group becomes one packet.
pub fn write_raw_item(
    storage: &dyn StorageBackend,
    dataset: &str,
    item: &str,
    width: u32,
    height: u32,
    keyframe_interval: usize,
    frames: &[Vec<u8>],
) -> Result<ItemMetadata> {
    if frames.is_empty() {
        return Err(EngineError::Metadata(format!("item {item} has no frames")));
    }
    if keyframe_interval == 0 {
        return Err(EngineError::Config("keyframe_interval must be positive".into()));
    }
    let frame_size = nv12_frame_size(width, height);
    for (index, frame) in frames.iter().enumerate() {
        if frame.len() != frame_size {
            return Err(EngineError::Metadata(format!(
                "item {item} frame {index}: {} bytes, expected {frame_size}",
                frame.len()
            )));
        }
    }

    let mut stream = Vec::new();
    let mut keyframe_positions = Vec::new();
    let mut keyframe_byte_offsets = Vec::new();
    for (group_index, group) in frames.chunks(keyframe_interval).enumerate() {
        keyframe_positions.push((group_index * keyframe_interval) as i64);
        keyframe_byte_offsets.push(stream.len() as i64);
        let mut payload = Vec::with_capacity(group.len() * frame_size);
        for frame in group {
            payload.extend_from_slice(frame);
        }
        write_packet(&mut stream, &payload);
    }
    write_all(storage, &dataset_item_data_path(dataset, item), &stream)?;

    let meta = ItemMetadata {
        frames: frames.len() as i64,
        width,
        height,
        codec: Codec::Raw,
        keyframe_positions,
        keyframe_byte_offsets,
        priming_packets: Vec::new(),
    };
    meta.validate()?;
    let bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| EngineError::Metadata(format!("item {item} metadata: {e}")))?;
    write_all(storage, &dataset_item_metadata_path(dataset, item), &bytes)?;
    register_item(storage, dataset, item)?;
    Ok(meta)
}

/// Deterministic NV12 test pattern for a given frame index.
pub fn synthetic_frame(width: u32, height: u32, index: i64) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut frame = vec![0u8; nv12_frame_size(width, height)];
    for y in 0..h {
        for x in 0..w {
            frame[y * w + x] = ((x + 3 * y) as i64 + 7 * index) as u8;
        }
    }
    let uv_base = w * h;
    let uv_w = w.div_ceil(2);
    let uv_h = h.div_ceil(2);
    for y in 0..uv_h {
        for x in 0..uv_w {
            let at = uv_base + y * uv_w * 2 + x * 2;
            frame[at] = (128 + ((x as i64 + index) % 32)) as u8;
            frame[at + 1] = (128 - ((y as i64 + index) % 32)) as u8;
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posix::PosixStorage;
    use fovea_core::packet::PacketStream;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_storage(label: &str) -> PosixStorage {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "fovea_dataset_{label}_{}_{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        PosixStorage::new(dir)
    }

    #[test]
    fn raw_item_round_trips() {
        let storage = temp_storage("roundtrip");
        let frames: Vec<Vec<u8>> = (0..10).map(|i| synthetic_frame(6, 4, i)).collect();
        let written = write_raw_item(&storage, "ds", "clip", 6, 4, 4, &frames).unwrap();

        let descriptor = load_descriptor(&storage, "ds").unwrap();
        assert_eq!(descriptor.items, vec!["clip".to_string()]);

        let meta = load_item_metadata(&storage, "ds", "clip").unwrap();
        assert_eq!(meta, written);
        assert_eq!(meta.frames, 10);
        assert_eq!(meta.keyframe_positions, vec![0, 4, 8]);

        // Packets hold whole frames, last group is short.
        let data = read_all(&storage, &dataset_item_data_path("ds", "clip")).unwrap();
        let frame_size = nv12_frame_size(6, 4);
        let sizes: Vec<usize> = PacketStream::new(&data)
            .map(|p| p.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![4 * frame_size, 4 * frame_size, 2 * frame_size]);
    }

    #[test]
    fn byte_offsets_index_packet_prefixes() {
        let storage = temp_storage("offsets");
        let frames: Vec<Vec<u8>> = (0..6).map(|i| synthetic_frame(4, 4, i)).collect();
        let meta = write_raw_item(&storage, "ds", "clip", 4, 4, 2, &frames).unwrap();

        let data = read_all(&storage, &dataset_item_data_path("ds", "clip")).unwrap();
        for &offset in &meta.keyframe_byte_offsets {
            let at = offset as usize;
            let len = u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as usize;
            assert_eq!(len, 2 * nv12_frame_size(4, 4));
        }
    }

    #[test]
    fn register_item_is_idempotent() {
        let storage = temp_storage("register");
        register_item(&storage, "ds", "a").unwrap();
        register_item(&storage, "ds", "b").unwrap();
        register_item(&storage, "ds", "a").unwrap();
        let descriptor = load_descriptor(&storage, "ds").unwrap();
        assert_eq!(descriptor.items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn wrong_frame_size_rejected() {
        let storage = temp_storage("badframe");
        let err = write_raw_item(&storage, "ds", "clip", 4, 4, 2, &[vec![0u8; 3]]).unwrap_err();
        assert!(matches!(err, EngineError::Metadata(_)));
    }
}

//! Inter-stage work entries.
//!
//! Every queue carries a sum type whose `Stop` variant is the shutdown
//! sentinel: one per worker, pushed only after the upstream stage has
//! joined. Payload variants own their buffers exclusively; host buffers
//! free on drop and pool buffers ride a [`PooledFrames`] guard home.

use crate::pool::PooledFrames;

pub enum LoadWork {
    /// Index into the work plan.
    Item(usize),
    Stop,
}

pub struct DecodeItem {
    pub work_item_index: usize,
    /// Frame number of the keyframe the encoded range starts at.
    pub start_keyframe: i64,
    /// Frame number of the keyframe the encoded range ends before.
    pub end_keyframe: i64,
    pub encoded: Vec<u8>,
}

pub enum DecodeWork {
    Item(DecodeItem),
    Stop,
}

pub struct EvalItem {
    pub work_item_index: usize,
    pub frames: PooledFrames,
}

pub enum EvalWork {
    Item(EvalItem),
    Stop,
}

pub struct SaveItem {
    pub work_item_index: usize,
    pub output: Vec<u8>,
}

pub enum SaveWork {
    Item(SaveItem),
    Stop,
}

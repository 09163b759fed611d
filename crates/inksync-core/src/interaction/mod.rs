//! Pointer interaction: gesture baselines and multi-pointer tracking.

mod baseline;
mod pointer;

pub use baseline::{
    PointerDownState, apply_delta_to_baseline, baseline_patches, capture_drag_baseline, merge_drag_preview,
};
pub use pointer::{DOUBLE_CLICK_DISTANCE, DOUBLE_CLICK_TIME_MS, DRAG_THRESHOLD, PointerInfo, PointerTracker};

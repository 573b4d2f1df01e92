//! Inputs shared by every tile visited during one frame.

use crate::camera::FrameCamera;
use crate::culling::CullingVolume;
use crate::dynamic_sse::DynamicSseTerm;

/// Snapshot of the frame being traversed.
#[derive(Clone, Debug)]
pub struct FrameContext {
    /// Monotonic frame counter, starting at 1 for the first update.
    pub frame_number: u64,
    pub camera: FrameCamera,
    pub culling_volume: CullingVolume,
    /// Present when dynamic screen-space error is enabled.
    pub dynamic_sse: Option<DynamicSseTerm>,
    /// Host clock in seconds, used for content expiry.
    pub time_seconds: f64,
}

impl FrameContext {
    pub fn new(frame_number: u64, camera: FrameCamera, time_seconds: f64) -> Self {
        let culling_volume = camera.culling_volume();
        Self {
            frame_number,
            camera,
            culling_volume,
            dynamic_sse: None,
            time_seconds,
        }
    }
}

//! The narrow slice of the host renderer's camera the guiding core
//! consumes: the snapshot writer stores the camera-to-world matrix at
//! the middle of the shutter interval so the external visualizer can
//! place the recorded distributions.

// pbrt
use crate::core::gpt::Float;
use crate::core::transform::Matrix4x4;

// see camera.h

pub trait Camera {
    fn shutter_middle_time(&self) -> Float;
    /// The camera-to-world transform evaluated at `time`.
    fn local_to_parent(&self, time: Float) -> Matrix4x4;
}

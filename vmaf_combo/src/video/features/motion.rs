//! Temporal activity of the reference video.
//!
//! Motion is the mean absolute difference between two consecutive reference
//! frames, both already low-pass filtered.

use crate::video::plane::PlaneRef;

pub(super) fn calculate_plane_motion(previous: PlaneRef<'_>, current: PlaneRef<'_>) -> f64 {
    let sad: f64 = previous
        .rows()
        .zip(current.rows())
        .flat_map(|(row1, row2)| row1.iter().zip(row2.iter()))
        .map(|(&a, &b)| (a - b).abs() as f64)
        .sum();
    sad / (previous.width() * previous.height()) as f64
}

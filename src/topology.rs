//! Skeleton topology for the COCO-17 landmark set.
//!
//! Fixed by the model family, not derived from detections.

/// Keypoint-index pairs connected by a drawn bone.
pub const CONNECTIONS: &[(usize, usize)] = &[
    // head
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    // arms
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    // torso
    (5, 11),
    (6, 12),
    (11, 12),
    // legs
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_KEYPOINTS;

    #[test]
    fn connections_stay_inside_the_keypoint_set() {
        for &(a, b) in CONNECTIONS {
            assert!(a < NUM_KEYPOINTS);
            assert!(b < NUM_KEYPOINTS);
            assert_ne!(a, b);
        }
    }
}

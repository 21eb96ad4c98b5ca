//! Redaction invariants checked over a sweep of detector outputs.

use std::sync::Arc;
use veilcast::detect::{Detection, MockFaceDetector};
use veilcast::pipeline::redaction::{RedactionStatus, Redactor, to_pixels};
use veilcast::pipeline::types::{Frame, FrameGeometry};

const GEOMETRY: FrameGeometry = FrameGeometry {
    width: 16,
    height: 12,
};

fn patterned() -> Frame {
    let data = (0..GEOMETRY.frame_size_bytes())
        .map(|i| ((i * 37) % 200 + 20) as u8)
        .collect();
    Frame::from_bytes(data, GEOMETRY).unwrap()
}

fn redactor(detections: Vec<Detection>) -> Redactor {
    let detector = MockFaceDetector::new()
        .with_detections(detections)
        .with_input_size(8);
    Redactor::new(Arc::new(detector)).with_blur_sigma(3.0)
}

/// Normalised corners from well outside the frame to well past its far edge.
fn coordinates() -> Vec<f32> {
    vec![-0.5, -0.01, 0.0, 0.2, 0.49, 0.5, 0.75, 1.0, 1.3]
}

#[test]
fn only_pixels_inside_the_clamped_box_change() {
    let original = patterned();
    let mut checked = 0;

    for &x1 in &coordinates() {
        for &x2 in &coordinates() {
            for &(y1, y2) in &[(-0.2, 0.6), (0.25, 1.4), (0.0, 1.0), (0.9, 0.1)] {
                let detection = Detection::new(x1, y1, x2, y2, 0.9);
                let region = to_pixels(&detection, GEOMETRY).clamp(GEOMETRY);
                let outcome = redactor(vec![detection]).redact(original.clone());

                assert_eq!(outcome.frame.geometry(), GEOMETRY);
                assert!(outcome.ok());

                for y in 0..GEOMETRY.height {
                    for x in 0..GEOMETRY.width {
                        let inside = region.is_some_and(|r| r.contains(x, y));
                        let before = original.pixel(x, y);
                        let after = outcome.frame.pixel(x, y);
                        if inside {
                            assert_ne!(before, after, "pixel ({x},{y}) survived in {region:?}");
                        } else {
                            assert_eq!(before, after, "pixel ({x},{y}) outside {region:?} changed");
                        }
                    }
                }

                match region {
                    Some(_) => assert_eq!(outcome.status, RedactionStatus::Redacted { regions: 1 }),
                    None => assert_eq!(outcome.status, RedactionStatus::NoFaces),
                }
                checked += 1;
            }
        }
    }

    assert_eq!(checked, 9 * 9 * 4);
}

#[test]
fn confidence_at_or_below_threshold_leaves_frame_untouched() {
    for confidence in [0.0, 0.25, 0.5] {
        let original = patterned();
        let outcome =
            redactor(vec![Detection::new(0.0, 0.0, 1.0, 1.0, confidence)]).redact(original.clone());
        assert_eq!(outcome.frame, original, "confidence {confidence}");
        assert_eq!(outcome.status, RedactionStatus::NoFaces);
    }
}

#[test]
fn overlapping_boxes_are_each_blurred() {
    let original = patterned();
    let outcome = redactor(vec![
        Detection::new(0.0, 0.0, 0.5, 0.5, 0.8),
        Detection::new(0.25, 0.25, 0.75, 0.75, 0.7),
        Detection::new(0.9, 0.9, 1.0, 1.0, 0.4),
    ])
    .redact(original.clone());

    assert_eq!(outcome.status, RedactionStatus::Redacted { regions: 2 });
    // Bottom-right corner belongs only to the low-confidence box
    assert_eq!(outcome.frame.pixel(15, 11), original.pixel(15, 11));
    assert_ne!(outcome.frame.pixel(0, 0), original.pixel(0, 0));
    assert_ne!(outcome.frame.pixel(10, 8), original.pixel(10, 8));

    // Overlap of the two confident boxes: x in 4..8, y in 3..6
    for y in 3..6 {
        for x in 4..8 {
            assert_ne!(
                outcome.frame.pixel(x, y),
                original.pixel(x, y),
                "pixel ({x},{y}) in the overlap survived"
            );
        }
    }
}

#[test]
fn nested_and_duplicate_boxes_leave_no_source_pixel_on_flat_frame() {
    let original = Frame::black(GEOMETRY);
    let outcome = redactor(vec![
        Detection::new(0.0, 0.0, 1.0, 1.0, 0.9),
        Detection::new(0.25, 0.25, 0.75, 0.75, 0.9),
        Detection::new(0.25, 0.25, 0.75, 0.75, 0.8),
    ])
    .redact(original.clone());

    for y in 0..GEOMETRY.height {
        for x in 0..GEOMETRY.width {
            assert_ne!(outcome.frame.pixel(x, y), original.pixel(x, y), "pixel ({x},{y})");
        }
    }
}

#[test]
fn redaction_is_independent_of_previous_frames() {
    let redactor = redactor(vec![Detection::new(0.1, 0.1, 0.6, 0.6, 0.9)]);
    let first = redactor.redact(patterned());
    let second = redactor.redact(patterned());
    assert_eq!(first, second);
}

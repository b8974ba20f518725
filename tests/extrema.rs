use cv_sift::{find_extrema, CancelToken, Extremum, GrayFloatImage, ProgressEvent, Sift};
use std::cell::RefCell;

fn flat(width: usize, height: usize, value: f32) -> GrayFloatImage {
    GrayFloatImage::from_fn(width, height, |_, _| value)
}

fn impulse(x: usize, y: usize, value: f32) -> GrayFloatImage {
    let mut image = flat(9, 7, 0.0);
    image.put(x, y, value);
    image
}

#[test]
fn flat_triplet_has_no_extrema() {
    let image = flat(9, 7, 0.5);
    let detection = Sift::default().detect_extrema([&image, &image, &image]).unwrap();
    assert!(detection.candidates.is_empty());
    assert!(detection.rejected.is_empty());
}

#[test]
fn single_impulse_is_one_candidate() {
    let below = flat(9, 7, 0.0);
    let center = impulse(4, 3, 1.0);
    let detection = Sift::default()
        .detect_extrema([&below, &center, &below])
        .unwrap();
    assert_eq!(
        detection.candidates,
        vec![Extremum {
            x: 4,
            y: 3,
            value: 1.0
        }]
    );
    assert!(detection.rejected.is_empty());
}

#[test]
fn negative_impulse_is_a_minimum() {
    let below = flat(9, 7, 0.0);
    let center = impulse(2, 5, -0.5);
    let detection = Sift::default()
        .detect_extrema([&below, &center, &below])
        .unwrap();
    assert_eq!(detection.candidates.len(), 1);
    assert_eq!((detection.candidates[0].x, detection.candidates[0].y), (2, 5));
    assert_eq!(detection.candidates[0].value, -0.5);
}

#[test]
fn border_pixels_are_never_extrema() {
    let below = flat(9, 7, 0.0);
    for (x, y) in [(0, 3), (8, 3), (4, 0), (4, 6), (0, 0), (8, 6)] {
        let center = impulse(x, y, 1.0);
        let detection = find_extrema([&below, &center, &below], 0.0).unwrap();
        assert!(detection.candidates.is_empty(), "({x}, {y})");
        assert!(detection.rejected.is_empty(), "({x}, {y})");
    }
}

#[test]
fn weak_impulse_is_rejected() {
    let below = flat(9, 7, 0.0);
    let center = impulse(4, 3, 0.001);
    let detection = Sift::default()
        .detect_extrema([&below, &center, &below])
        .unwrap();
    assert!(detection.candidates.is_empty());
    assert_eq!(
        detection.rejected,
        vec![Extremum {
            x: 4,
            y: 3,
            value: 0.001
        }]
    );
}

#[test]
fn candidates_are_row_major() {
    let below = flat(9, 7, 0.0);
    let mut center = flat(9, 7, 0.0);
    center.put(6, 1, 1.0);
    center.put(2, 4, 1.0);
    center.put(5, 4, -1.0);
    let detection = find_extrema([&below, &center, &below], 0.1).unwrap();
    let positions: Vec<_> = detection.candidates.iter().map(|e| (e.x, e.y)).collect();
    assert_eq!(positions, vec![(6, 1), (2, 4), (5, 4)]);
}

#[test]
fn candidates_cover_every_interior_dog_level() {
    let _ = pretty_env_logger::try_init_timed();
    let sift = Sift::new(2, 3);
    let image = GrayFloatImage::from_fn(24, 24, |x, y| {
        if (9..15).contains(&x) && (9..15).contains(&y) {
            1.0
        } else {
            0.0
        }
    });
    let scale_space = sift.scale_space(&image).unwrap();
    let dog = sift.dog(&scale_space).unwrap();
    let markers = RefCell::new(0usize);
    let sink = |event: ProgressEvent| {
        if let ProgressEvent::CandidateMarker { .. } = event {
            *markers.borrow_mut() += 1;
        }
    };
    let candidates = sift
        .find_candidates(&dog, &sink, &CancelToken::new())
        .unwrap();
    assert_eq!(candidates.octaves.len(), 2);
    for scales in &candidates.octaves {
        let levels: Vec<_> = scales.iter().map(|s| s.scale_level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
    }
    assert_eq!(
        markers.into_inner(),
        candidates.len() + candidates.rejected_len()
    );
    assert_eq!(candidates.validate(&dog), Ok(()));
}

use image::Luma;

use shelfwatch::detect::{Action, DetectorConfig, OccupancyDetector};
use shelfwatch::ingest::{grab_pair, SourceConfig, SyntheticSource};
use shelfwatch::{
    ColorImage, DepthFrame, DepthImage, FrameEvent, FrameSource, IVec2, ZoneId, ZoneRegistry,
    ZoneState,
};

const WIDTH: u32 = 40;
const HEIGHT: u32 = 30;
const ZONE_POS: IVec2 = IVec2::new(5, 5);
const ZONE_SIZE: IVec2 = IVec2::new(10, 10);

fn scenario_detector() -> OccupancyDetector {
    OccupancyDetector::new(DetectorConfig {
        pickup_ratio: 0.2,
        return_ratio: 0.2,
        pickup_threshold_mm: 50.0,
        return_threshold_mm: 30.0,
        max_diff_mm: None,
    })
    .unwrap()
}

fn calibrated(background: u16) -> (ZoneRegistry, ZoneId) {
    let depth = DepthImage::from_pixel(WIDTH, HEIGHT, Luma([background]));
    let color = ColorImage::new(WIDTH * 2, HEIGHT * 2);
    let mut registry = ZoneRegistry::new();
    let id = registry.add("cup", ZONE_POS, ZONE_SIZE, &depth, &color);
    (registry, id)
}

/// Frame at `base` everywhere except the first `changed` zone pixels (row-major), set to `value`.
fn frame(base: u16, changed: u32, value: u16, sequence: u64) -> DepthFrame {
    let mut image = DepthImage::from_pixel(WIDTH, HEIGHT, Luma([base]));
    for n in 0..changed {
        let x = ZONE_POS.x as u32 + n % ZONE_SIZE.x as u32;
        let y = ZONE_POS.y as u32 + n / ZONE_SIZE.x as u32;
        image.put_pixel(x, y, Luma([value]));
    }
    DepthFrame::new(image, 1.0, sequence)
}

#[test]
fn pickup_then_return() {
    let detector = scenario_detector();
    let (mut registry, id) = calibrated(1000);

    let events = detector.evaluate(&mut registry, &frame(1000, 25, 1100, 1));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, Action::Pickup);
    assert_eq!(events[0].zone_name, "cup");
    assert_eq!(events[0].usage_count, 1);
    let zone = registry.get(id).unwrap();
    assert_eq!(zone.state(), ZoneState::InUse);
    assert_eq!(zone.usage_count(), 1);

    // 90 pixels back at baseline, 10 still far.
    let mut image = DepthImage::from_pixel(WIDTH, HEIGHT, Luma([1000]));
    for n in 90..100u32 {
        image.put_pixel(5 + n % 10, 5 + n / 10, Luma([1100]));
    }
    let events = detector.evaluate(&mut registry, &DepthFrame::new(image, 1.0, 2));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, Action::Return);
    assert_eq!(events[0].usage_count, 1);
    let zone = registry.get(id).unwrap();
    assert_eq!(zone.state(), ZoneState::Vacant);
    assert_eq!(zone.usage_count(), 1);
}

#[test]
fn below_threshold_does_not_flip() {
    let detector = scenario_detector();
    let (mut registry, id) = calibrated(1000);

    let events = detector.evaluate(&mut registry, &frame(1000, 10, 1100, 1));
    assert!(events.is_empty());
    assert_eq!(registry.get(id).unwrap().state(), ZoneState::Vacant);
    assert_eq!(registry.get(id).unwrap().usage_count(), 0);
}

#[test]
fn exactly_threshold_does_not_flip() {
    let detector = scenario_detector();
    let (mut registry, id) = calibrated(1000);

    assert!(detector
        .evaluate(&mut registry, &frame(1000, 20, 1100, 1))
        .is_empty());
    assert_eq!(registry.get(id).unwrap().state(), ZoneState::Vacant);
}

#[test]
fn reposition_clamps_into_frame() {
    let (mut registry, id) = calibrated(1000);
    let depth = DepthImage::from_pixel(WIDTH, HEIGHT, Luma([1000]));
    let color = ColorImage::new(WIDTH * 2, HEIGHT * 2);

    let zone = registry.get_mut(id).unwrap();
    zone.reposition(
        IVec2::new(WIDTH as i32 - 5, 0),
        ZONE_SIZE,
        &depth,
        &color,
    );
    assert_eq!(zone.position(), IVec2::new(WIDTH as i32 - 10, 0));
    assert_eq!(zone.size(), ZONE_SIZE);
    assert_eq!(zone.background().dimensions(), (10, 10));
}

#[test]
fn ratio_comes_from_state_at_start_of_evaluation() {
    let detector = OccupancyDetector::new(DetectorConfig {
        pickup_ratio: 0.2,
        return_ratio: 0.9,
        pickup_threshold_mm: 50.0,
        return_threshold_mm: 30.0,
        max_diff_mm: None,
    })
    .unwrap();
    let (mut registry, id) = calibrated(1000);
    let thresholds = detector.config().thresholds(1.0);
    let live = frame(1000, 25, 1100, 1);

    let zone = registry.get_mut(id).unwrap();
    let outcome = detector.evaluate_zone(zone, &live.image, &thresholds).unwrap();
    assert_eq!(outcome.state, ZoneState::Vacant);
    assert_eq!(outcome.threshold, 20);
    assert_eq!(outcome.evidence, 25);
    assert!(outcome.transition.is_some());
    assert_eq!(zone.state(), ZoneState::InUse);
}

#[test]
fn dropout_pixels_never_count() {
    let detector = scenario_detector();

    // Vacant zone: an all-dropout frame is not removal evidence.
    let (mut registry, id) = calibrated(1000);
    assert!(detector
        .evaluate(&mut registry, &frame(0, 0, 0, 1))
        .is_empty());
    assert_eq!(registry.get(id).unwrap().state(), ZoneState::Vacant);

    // In-use zone calibrated on an all-dropout background: dropouts are not
    // "back at baseline" either.
    let (mut registry, id) = calibrated(0);
    let events = detector.evaluate(&mut registry, &frame(0, 100, 100, 1));
    assert_eq!(events.len(), 1);
    assert!(detector
        .evaluate(&mut registry, &frame(0, 0, 0, 2))
        .is_empty());
    assert_eq!(registry.get(id).unwrap().state(), ZoneState::InUse);
}

#[test]
fn usage_counts_never_decrease_on_synthetic_shelf() {
    let config = SourceConfig {
        target_fps: 1000,
        width: 80,
        height: 60,
        color_width: 160,
        color_height: 120,
        ..SourceConfig::default()
    };
    let mut source = SyntheticSource::seeded(config, 7, 5);
    let slots = source.slot_rects();
    source.connect().unwrap();

    let (depth, color) = grab_pair(&mut source, 4, false).unwrap();
    let mut registry = ZoneRegistry::new();
    for (n, (pos, size)) in slots.into_iter().enumerate() {
        registry.add(format!("slot{}", n), pos, size, &depth.image, &color.image);
    }

    let detector = OccupancyDetector::new(DetectorConfig::default()).unwrap();
    let mut last: Vec<u32> = registry.iter().map(|z| z.usage_count()).collect();
    let mut pickups = 0;
    let mut returns = 0;
    for _ in 0..120 {
        let Some(event) = source.next_event().unwrap() else {
            break;
        };
        let FrameEvent::Depth(frame) = event else {
            continue;
        };
        for transition in detector.evaluate(&mut registry, &frame) {
            match transition.action {
                Action::Pickup => pickups += 1,
                Action::Return => returns += 1,
            }
        }
        let counts: Vec<u32> = registry.iter().map(|z| z.usage_count()).collect();
        for (before, after) in last.iter().zip(&counts) {
            assert!(after >= before);
        }
        last = counts;
    }
    assert!(pickups >= 1);
    assert!(returns >= 1);
    assert!(pickups >= returns);
}

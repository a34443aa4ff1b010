use seeclaw_calibration::calibration::{CalibrationEngine, FeedbackRecord, Offset, Point};
use seeclaw_calibration::config::{CalibrationConfig, ScreenBounds};
use seeclaw_calibration::CalibrationError;

fn record_at(engine: &CalibrationEngine, point: Point) -> Option<seeclaw_calibration::calibration::AdjustmentRecord> {
    let key = seeclaw_calibration::calibration::BucketKey::for_point(point, engine.config().matcher.cell_size);
    engine
        .snapshot()
        .adjustments
        .into_iter()
        .find(|a| a.bucket == key)
        .map(|a| a.record)
}

#[test]
fn three_misses_pull_nearby_tap_toward_target() {
    let engine = CalibrationEngine::with_defaults();
    let target = Point::new(500, 600);
    for (click, offset) in [
        (Point::new(450, 580), Offset::new(-50.0, -20.0)),
        (Point::new(480, 590), Offset::new(-20.0, -10.0)),
        (Point::new(495, 598), Offset::new(-5.0, -2.0)),
    ] {
        engine
            .ingest(&FeedbackRecord::failure("click_action", click, offset, 0.8))
            .unwrap();
    }

    let query = Point::new(497, 599);
    let adjusted = engine.lookup_and_apply(query);
    assert!(adjusted.distance_to(&target) < query.distance_to(&target));
    assert_eq!(engine.summary().total_feedback_processed, 3);
}

#[test]
fn correction_does_not_leak_past_search_radius() {
    let engine = CalibrationEngine::with_defaults();
    let radius = engine.config().matcher.search_radius_px();
    engine
        .ingest(&FeedbackRecord::failure("click_action", Point::new(100, 100), Offset::new(-15.0, 12.0), 1.0))
        .unwrap();

    let beyond = Point::new(100, 100 + radius as i32 + 1);
    assert_eq!(engine.lookup_and_apply(beyond), beyond);
    let far = Point::new(400, 400);
    assert_eq!(engine.lookup_and_apply(far), far);
    // inside the radius it does apply
    assert_ne!(engine.lookup_and_apply(Point::new(100, 110)), Point::new(100, 110));
}

#[test]
fn opposite_evidence_damps_without_erasing() {
    let engine = CalibrationEngine::with_defaults();
    let floor = engine.config().learning.confidence_floor;
    let anchor = Point::new(300, 300);

    engine
        .ingest(&FeedbackRecord::failure("click_action", anchor, Offset::new(-10.0, 0.0), 0.5))
        .unwrap();
    let before = record_at(&engine, anchor).unwrap();
    engine
        .ingest(&FeedbackRecord::failure("click_action", Point::new(302, 301), Offset::new(10.0, 0.0), 0.4))
        .unwrap();
    let after = record_at(&engine, anchor).unwrap();

    assert!(after.confidence < before.confidence);
    assert!(after.confidence >= floor);
    assert!(after.delta.dx > -10.0 && after.delta.dx < 10.0);
    assert_eq!(after.sample_count, 2);

    for _ in 0..10 {
        engine
            .ingest(&FeedbackRecord::failure("click_action", anchor, Offset::new(10.0, 0.0), 0.9))
            .unwrap();
        engine
            .ingest(&FeedbackRecord::failure("click_action", anchor, Offset::new(-10.0, 0.0), 0.9))
            .unwrap();
    }
    let churned = record_at(&engine, anchor).unwrap();
    assert!(churned.confidence >= floor);
    assert_eq!(engine.summary().adjustment_count, 1);
}

#[test]
fn escalation_survives_later_small_success() {
    let engine = CalibrationEngine::with_defaults();
    engine
        .ingest(&FeedbackRecord::failure("click_action", Point::new(200, 800), Offset::new(-42.0, 3.0), 0.9))
        .unwrap();
    let escalated = engine.strategy("click_action").unwrap();
    assert!(escalated.verification_required);

    engine
        .ingest(&FeedbackRecord::success("click_action", Point::new(200, 800), Some(Offset::new(1.0, -1.0)), 0.9))
        .unwrap();
    assert!(engine.strategy("click_action").unwrap().verification_required);
    assert_eq!(engine.summary().strategy_override_count, 1);
}

#[test]
fn repeated_feedback_at_request_converges() {
    let engine = CalibrationEngine::with_defaults();
    let target = Point::new(500, 600);
    let requested = Point::new(470, 585);

    let mut last = f64::MAX;
    for _ in 0..8 {
        let dispatched = engine.lookup_and_apply(requested);
        let distance = dispatched.distance_to(&target);
        assert!(distance <= last + 1e-9, "{distance} > {last}");
        last = distance;
        engine
            .ingest(&FeedbackRecord::from_target("click_action", requested, target, 3.0, 0.6))
            .unwrap();
    }
    assert_eq!(engine.lookup_and_apply(requested), target);
}

#[test]
fn success_feedback_sharpens_neighbourhood() {
    let engine = CalibrationEngine::with_defaults();
    let anchor = Point::new(640, 320);
    engine
        .ingest(&FeedbackRecord::failure("click_action", anchor, Offset::new(-8.0, 0.0), 0.4))
        .unwrap();
    let weak = record_at(&engine, anchor).unwrap();
    engine
        .ingest(&FeedbackRecord::success("click_action", anchor, Some(Offset::new(-8.0, 0.0)), 0.4))
        .unwrap();
    let strong = record_at(&engine, anchor).unwrap();
    assert!(strong.confidence > weak.confidence);
    assert!((strong.delta.dx - 8.0).abs() < 1e-9);
}

#[test]
fn bounded_screen_rejects_off_screen_feedback() {
    let config: CalibrationConfig = toml::from_str(
        r#"
        [screen]
        width = 1080
        height = 1920
        "#,
    )
    .unwrap();
    let engine = CalibrationEngine::new(config).unwrap();
    let err = engine
        .ingest(&FeedbackRecord::failure("click_action", Point::new(1080, 10), Offset::new(1.0, 1.0), 0.5))
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(engine.summary().adjustment_count, 0);
    assert_eq!(engine.lookup_and_apply(Point::new(-5, 10)), Point::new(-5, 10));
}

#[test]
fn extreme_coordinates_never_crash() {
    let engine = CalibrationEngine::with_defaults();
    let corners = [
        Point::new(i32::MIN, i32::MIN),
        Point::new(i32::MIN, 0),
        Point::new(0, i32::MAX),
        Point::new(i32::MAX, i32::MAX),
    ];
    for target in corners {
        let record = FeedbackRecord {
            target_estimate: Some(target),
            offset: None,
            ..FeedbackRecord::failure("click_action", Point::new(10, 10), Offset::ZERO, 0.8)
        };
        match engine.ingest(&record) {
            Ok(_) => assert!(target.x >= 0 && target.y >= 0),
            Err(e) => assert!(matches!(e, CalibrationError::OutOfRangeCoordinate { .. })),
        }
        let _ = engine.lookup_and_apply(target);
    }

    // a correction learned at the far edge saturates instead of wrapping
    engine
        .ingest(&FeedbackRecord::failure(
            "click_action",
            Point::new(i32::MAX, i32::MAX),
            Offset::new(-1e6, -1e6),
            1.0,
        ))
        .unwrap();
    assert_eq!(
        engine.lookup_and_apply(Point::new(i32::MAX, i32::MAX)),
        Point::new(i32::MAX, i32::MAX)
    );
}

#[test]
fn off_screen_target_estimate_is_rejected() {
    let mut config = CalibrationConfig::default();
    config.screen = Some(ScreenBounds { width: 1080, height: 1920 });
    let engine = CalibrationEngine::new(config).unwrap();
    let record = FeedbackRecord {
        target_estimate: Some(Point::new(500, 5000)),
        offset: None,
        ..FeedbackRecord::failure("click_action", Point::new(500, 600), Offset::ZERO, 0.8)
    };
    let err = engine.ingest(&record).unwrap_err();
    assert!(matches!(err, CalibrationError::OutOfRangeCoordinate { x: 500, y: 5000 }));
    assert_eq!(engine.summary().adjustment_count, 0);
}

#[test]
fn largest_screen_clamps_corrections() {
    let mut config = CalibrationConfig::default();
    config.screen = Some(ScreenBounds { width: i32::MAX as u32, height: 1920 });
    let engine = CalibrationEngine::new(config).unwrap();
    engine
        .ingest(&FeedbackRecord::failure("click_action", Point::new(100, 100), Offset::new(-40.0, 0.0), 1.0))
        .unwrap();
    assert_eq!(engine.lookup_and_apply(Point::new(100, 100)), Point::new(140, 100));

    let mut oversized = CalibrationConfig::default();
    oversized.screen = Some(ScreenBounds { width: 3_000_000_000, height: 1920 });
    assert!(CalibrationEngine::new(oversized).is_err());
}

use chrono::{DateTime, Duration, TimeZone, Utc};
use track::playback::{summarize, SummaryThresholds};
use track::{interpolate, Coordinates, Playback, PlaybackData, Segment, TimeRange, Track, TrackFile, TrackPoint};

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 20, 17, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn ride() -> TrackFile {
    let first = vec![
        TrackPoint::new(Coordinates::new(46.0, 7.0))
            .with_elevation(500.0)
            .with_time(t(0)),
        TrackPoint::new(Coordinates::new(46.001, 7.001))
            .with_elevation(510.0)
            .with_time(t(30)),
        // Untimed points never take part in playback.
        TrackPoint::new(Coordinates::new(46.0015, 7.0015)),
    ];
    let mut headed = TrackPoint::new(Coordinates::new(46.002, 7.003)).with_time(t(90));
    headed.geo.heading = Some(45.0);
    let second = vec![headed, TrackPoint::new(Coordinates::new(46.004, 7.004)).with_time(t(150))];
    TrackFile::new("ride").with_tracks(vec![Track::new(vec![Segment::new(first), Segment::new(second)])])
}

#[test]
fn test_exact_times_return_points_verbatim() {
    let data = PlaybackData::from_file(&ride());
    assert_eq!(data.points().len(), 4);

    for point in data.points() {
        let position = interpolate(data.points(), point.time, None).unwrap();
        assert_eq!(position.coordinates, point.coordinates);
        assert_eq!(position.elevation, point.elevation);
        assert_eq!(position.heading, point.heading);
    }
}

#[test]
fn test_queries_outside_clamp_to_endpoints() {
    let data = PlaybackData::from_file(&ride());
    let points = data.points();

    let before = interpolate(points, t(-600), None).unwrap();
    assert_eq!(before.coordinates, Coordinates::new(46.0, 7.0));
    assert_eq!(before.elevation, Some(500.0));

    let after = interpolate(points, t(10_000), None).unwrap();
    assert_eq!(after.coordinates, Coordinates::new(46.004, 7.004));
}

#[test]
fn test_elevation_needs_both_sides() {
    let data = PlaybackData::from_file(&ride());
    let points = data.points();

    let first_leg = interpolate(points, t(15), None).unwrap();
    assert_eq!(first_leg.elevation, Some(505.0));

    let second_leg = interpolate(points, t(60), None).unwrap();
    assert_eq!(second_leg.elevation, None);
    // Only one side knows its heading: bearing of the leg.
    let expected = (0.002f64).atan2(0.001).to_degrees();
    assert!((second_leg.heading.unwrap() - expected).abs() < 1e-9);
}

#[test]
fn test_playback_over_filtered_range() {
    let mut playback = Playback::new(PlaybackData::from_file(&ride()));
    assert_eq!(playback.current_time(), t(0));

    playback.set_time_filter(Some(TimeRange::new(t(30), t(90))));
    assert_eq!(playback.current_time(), t(30));
    playback.set_speed(30.0);
    playback.play();

    let start = std::time::Instant::now();
    assert!(playback.advance_frame(start).is_none());
    playback.advance_frame(start + std::time::Duration::from_secs(1));
    assert_eq!(playback.current_time(), t(60));

    let end = playback
        .advance_frame(start + std::time::Duration::from_secs(3))
        .unwrap();
    assert_eq!(playback.current_time(), t(90));
    assert!(!playback.is_playing());
    assert_eq!(end.coordinates, Coordinates::new(46.002, 7.003));
}

#[test]
fn test_summary_over_filter() {
    let data = PlaybackData::from_file(&ride());
    let all = summarize(data.points(), None, &SummaryThresholds::default()).unwrap();
    assert_eq!(all.duration_secs, 150.0);
    assert!(all.distance_km > 0.4);

    let window = TimeRange::new(t(80), t(200));
    let tail = summarize(data.points(), Some(&window), &SummaryThresholds::default()).unwrap();
    assert_eq!(tail.duration_secs, 60.0);

    let empty = TimeRange::new(t(100), t(120));
    assert!(summarize(data.points(), Some(&empty), &SummaryThresholds::default()).is_none());
}

//! Unit tests for the reference cache.

use super::*;
use fleetsync_core::test_support::{StubCall, StubFeedSource, block_on_for_tests};
use fleetsync_core::{DiagnosticType, FeedPage};
use rstest::{fixture, rstest};

fn engine_speed() -> Diagnostic {
    Diagnostic::new(
        "DiagnosticEngineSpeedId",
        "Engine speed",
        DiagnosticType::GoDiagnostic,
    )
    .with_controller(EntityRef::from_id("c-engine"))
    .with_unit_of_measure(EntityRef::from_id("UnitOfMeasureRpmId"))
}

#[fixture]
fn stub() -> StubFeedSource {
    StubFeedSource::new()
        .with_controllers(vec![Controller::new("c-engine", "Engine")])
        .with_units(vec![UnitOfMeasure::new("UnitOfMeasureRpmId", "RPM")])
        .with_failure_modes(vec![FailureMode::new("fm-7", "Low pressure", Some(7))])
}

fn get_all_calls(stub: &StubFeedSource) -> usize {
    stub.calls()
        .iter()
        .filter(|call| matches!(call, StubCall::GetAll { .. }))
        .count()
}

#[rstest]
fn none_references_short_circuit_without_remote_calls(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();

    assert!(cache.resolve_device(&EntityRef::None).is_none());
    assert!(cache.resolve_diagnostic(&EntityRef::None).is_none());
    let controller = block_on_for_tests(cache.resolve_controller(&stub, &EntityRef::None))
        .expect("none controller should resolve");
    let mode = block_on_for_tests(cache.resolve_failure_mode(&stub, &EntityRef::None))
        .expect("none failure mode should resolve");

    assert!(controller.is_none());
    assert!(mode.is_none());
    assert_eq!(stub.call_count(), 0, "no remote call expected");
}

#[rstest]
fn device_miss_yields_not_found_without_fetching(stub: StubFeedSource) {
    let cache = ReferenceCache::new();
    let resolved = cache.resolve_device(&EntityRef::from_id("b404"));

    assert_eq!(resolved, Resolved::NotFound(EntityId::from("b404")));
    assert_eq!(stub.call_count(), 0);
}

#[rstest]
fn controller_miss_fetches_once_then_hits_cache(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();
    let reference = EntityRef::from_id("c-engine");

    let first = block_on_for_tests(cache.resolve_controller(&stub, &reference))
        .expect("lookup should succeed");
    let second = block_on_for_tests(cache.resolve_controller(&stub, &reference))
        .expect("cached lookup should succeed");

    assert_eq!(first.found().map(|c| c.name.as_str()), Some("Engine"));
    assert_eq!(first, second);
    assert_eq!(stub.call_count(), 1, "second resolve must hit the cache");
}

#[rstest]
fn unknown_failure_mode_is_not_found(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();
    let resolved =
        block_on_for_tests(cache.resolve_failure_mode(&stub, &EntityRef::from_id("fm-missing")))
            .expect("lookup should succeed");

    assert_eq!(resolved, Resolved::NotFound(EntityId::from("fm-missing")));
}

#[rstest]
fn diagnostics_require_feedless_tables_first(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();
    stub.push_diagnostics(FeedPage::new(vec![engine_speed()], FeedToken::new(3)));

    let err = block_on_for_tests(cache.refresh_diagnostics(&stub))
        .expect_err("diagnostics before feedless tables should fail");

    assert!(matches!(err, CacheError::FeedlessNotPopulated));
    assert_eq!(stub.feed_call_count(), 0);
}

#[rstest]
fn refresh_hydrates_diagnostic_references(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();
    let plain = Diagnostic::new("DiagnosticIgnitionId", "Ignition", DiagnosticType::GoDiagnostic)
        .with_controller(EntityRef::from_id("ControllerNoneId"));
    stub.push_diagnostics(FeedPage::new(vec![engine_speed(), plain], FeedToken::new(3)));

    let summary = block_on_for_tests(cache.refresh(&stub, Instant::now()))
        .expect("refresh should succeed");

    assert!(summary.feedless_reloaded);
    assert_eq!(summary.diagnostics, 2);
    assert_eq!(cache.diagnostic_token(), FeedToken::new(3));

    let speed = cache.resolve_diagnostic(&EntityRef::from_id("DiagnosticEngineSpeedId"));
    let speed = speed.found().expect("engine speed should be cached");
    assert_eq!(speed.controller.found().map(|c| c.name.as_str()), Some("Engine"));
    assert_eq!(speed.unit_of_measure.found().map(|u| u.name.as_str()), Some("RPM"));

    let ignition = cache.resolve_diagnostic(&EntityRef::from_id("DiagnosticIgnitionId"));
    let ignition = ignition.found().expect("ignition should be cached");
    assert!(ignition.controller.is_none(), "none sentinel must be preserved");
}

#[rstest]
fn dangling_controller_reference_fails_loudly() {
    let stub = StubFeedSource::new().with_units(vec![UnitOfMeasure::new("UnitOfMeasureRpmId", "RPM")]);
    let mut cache = ReferenceCache::new();
    stub.push_diagnostics(FeedPage::new(vec![engine_speed()], FeedToken::new(3)));

    let err = block_on_for_tests(cache.refresh(&stub, Instant::now()))
        .expect_err("uncached controller should fail");

    match err {
        CacheError::UncachedController {
            diagnostic,
            controller,
        } => {
            assert_eq!(diagnostic.as_str(), "DiagnosticEngineSpeedId");
            assert_eq!(controller.as_str(), "c-engine");
        }
        other => panic!("expected UncachedController, found {other:?}"),
    }
    assert_eq!(cache.diagnostic_token(), FeedToken::ZERO);
    assert!(cache.diagnostics().is_empty());
}

#[rstest]
fn feedless_tables_reload_only_after_deadline(stub: StubFeedSource) {
    let mut cache = ReferenceCache::with_refresh_interval(Duration::from_secs(300));
    let start = Instant::now();

    block_on_for_tests(cache.refresh(&stub, start)).expect("first refresh");
    assert_eq!(get_all_calls(&stub), 3);

    let early = block_on_for_tests(cache.refresh(&stub, start + Duration::from_secs(299)))
        .expect("early refresh");
    assert!(!early.feedless_reloaded);
    assert_eq!(get_all_calls(&stub), 3);

    let due = block_on_for_tests(cache.refresh(&stub, start + Duration::from_secs(300)))
        .expect("due refresh");
    assert!(due.feedless_reloaded);
    assert_eq!(get_all_calls(&stub), 6);
}

#[rstest]
fn device_feed_merges_incrementally(stub: StubFeedSource) {
    let mut cache = ReferenceCache::new();
    stub.push_devices(FeedPage::new(
        vec![Device::new("b1", "Truck 1", "G1")],
        FeedToken::new(5),
    ));
    stub.push_devices(FeedPage::new(
        vec![Device::new("b1", "Truck One", "G1")],
        FeedToken::new(6),
    ));

    block_on_for_tests(cache.refresh_devices(&stub)).expect("first device refresh");
    block_on_for_tests(cache.refresh_devices(&stub)).expect("second device refresh");

    let device = cache.resolve_device(&EntityRef::from_id("b1"));
    assert_eq!(device.found().map(|d| d.name.as_str()), Some("Truck One"));
    assert_eq!(cache.device_token(), FeedToken::new(6));
    assert_eq!(cache.devices().len(), 1);
}

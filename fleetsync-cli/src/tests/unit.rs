//! Focused unit tests covering sync CLI configuration validation.

use super::*;
use chrono::TimeZone;
use rstest::rstest;

fn complete_args() -> SyncArgs {
    SyncArgs {
        database: Some("acme".to_owned()),
        user: Some("ops@acme.test".to_owned()),
        password: Some("secret".to_owned()),
        output_dir: Some(Utf8PathBuf::from("/var/lib/fleetsync")),
        ..SyncArgs::default()
    }
}

#[rstest]
#[case(ARG_DATABASE, ENV_DATABASE)]
#[case(ARG_USER, ENV_USER)]
#[case(ARG_PASSWORD, ENV_PASSWORD)]
#[case(ARG_OUTPUT_DIR, ENV_OUTPUT_DIR)]
fn converting_without_required_fields_errors(
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let mut args = complete_args();
    match field {
        ARG_DATABASE => args.database = None,
        ARG_USER => args.user = None,
        ARG_PASSWORD => args.password = None,
        _ => args.output_dir = None,
    }
    let err = SyncPlan::try_from(args).expect_err("missing field should error");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn defaults_fill_optional_settings() {
    let plan = SyncPlan::try_from(complete_args()).expect("complete args convert");
    assert_eq!(plan.server, DEFAULT_SERVER);
    assert_eq!(plan.tracking, TrackingPolicy::Reporting);
    assert!(plan.diagnostics.is_empty());
    assert_eq!(plan.feed_start, FeedStartMode::Now);
    assert_eq!(plan.pacing, DEFAULT_PACING);
    assert_eq!(plan.max_file_bytes, megabytes_to_bytes(1));
    assert!(plan.continuous);
}

#[rstest]
#[case(None, FeedStartMode::Now)]
#[case(Some("now"), FeedStartMode::Now)]
#[case(Some(" Resume "), FeedStartMode::Resume)]
#[case(
    Some("2024-03-01T08:00:00-02:00"),
    FeedStartMode::SpecificTime(
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("valid time")
    )
)]
fn feed_start_accepts_keywords_and_times(
    #[case] raw: Option<&str>,
    #[case] expected: FeedStartMode,
) {
    assert_eq!(parse_feed_start(raw).expect("valid feed start"), expected);
}

#[rstest]
fn feed_start_rejects_other_text() {
    let err = parse_feed_start(Some("yesterday")).expect_err("invalid feed start");
    match err {
        CliError::InvalidFeedStart { value, .. } => assert_eq!(value, "yesterday"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
#[case(None, &[])]
#[case(Some(""), &[])]
#[case(Some("b1"), &["b1"])]
#[case(Some(" b1 ,, b2 "), &["b1", "b2"])]
fn id_lists_skip_blank_entries(#[case] raw: Option<&str>, #[case] expected: &[&str]) {
    let ids: Vec<EntityId> = expected.iter().copied().map(EntityId::from).collect();
    assert_eq!(parse_ids(raw), ids);
}

#[rstest]
fn session_config_separates_output_from_checkpoints() {
    let mut args = complete_args();
    args.interval_secs = Some(5);
    args.max_file_size_mb = Some(3);
    args.once = Some(true);
    let plan = SyncPlan::try_from(args).expect("complete args convert");
    let now = Utc
        .with_ymd_and_hms(2024, 3, 1, 9, 5, 7)
        .single()
        .expect("valid time");

    let config = plan.session_config(now);

    assert_eq!(
        config.output_dir,
        Utf8PathBuf::from("/var/lib/fleetsync/Output_20240301_090507")
    );
    assert_eq!(config.checkpoint_dir, Utf8PathBuf::from("/var/lib/fleetsync"));
    assert_eq!(config.pacing, Duration::from_secs(5));
    assert_eq!(config.max_file_bytes, megabytes_to_bytes(3));
    assert!(!config.continuous);
}

#[rstest]
fn login_debug_hides_the_password() {
    let plan = SyncPlan::try_from(complete_args()).expect("complete args convert");
    let rendered = format!("{plan:?}");
    assert!(!rendered.contains("secret"));
}

//! Integration test: CSV extract → cleaned frame → feature and target matrices

use engagement_forecast::preprocessing::{
    plan_selection, ColumnKind, ColumnProfile, FeatureSelector, SelectorConfig,
};
use engagement_forecast::utils::DataLoader;
use engagement_forecast::ForecastError;

const EXTRACT: &str = "\
date,sessionSource,deviceCategory,sessions,activeUsers,engagementRate,newSessions
2024-01-01,google,mobile,120,80,0.51,40
2024-01-01,(not set),desktop,60,0,0.43,20
2024-01-02,direct,mobile,90,45,unknown,30
2024-01-02,google,tablet,30,15,0.62,(not set)
2024-01-03,google,mobile,120,80,0.51,40
2024-01-03,direct,desktop,75,50,0.48,25
";

fn profile(name: &str, kind: ColumnKind, cardinality: usize, variance: f64) -> ColumnProfile {
    ColumnProfile {
        name: name.to_string(),
        kind,
        cardinality,
        variance,
    }
}

#[test]
fn test_extract_to_matrices() {
    let df = DataLoader::new().load_csv_bytes(EXTRACT.as_bytes()).unwrap();
    let selection = FeatureSelector::default()
        .select(&df, &["engagementRate".to_string()])
        .unwrap();

    assert_eq!(selection.target_names, vec!["engagementRate".to_string()]);
    assert_eq!(selection.y.ncols(), 1);
    // "unknown" became 0, so no row is dropped
    assert_eq!(selection.dropped_rows, 0);
    assert_eq!(selection.x.nrows(), 6);
    assert_eq!(selection.y[[2, 0]], 0.0);

    let names = &selection.feature_names;
    assert!(names.contains(&"sessions".to_string()));
    assert!(names.contains(&"activeUsers".to_string()));
    assert!(!names.contains(&"newSessions".to_string()));
    assert!(!names.contains(&"engagementRate".to_string()));
    assert!(names.contains(&"sessionSource_google".to_string()));
    assert!(names.contains(&"sessionSource_0".to_string()));
    assert!(names.contains(&"deviceCategory_tablet".to_string()));
    assert!(names.contains(&"sessions_per_user".to_string()));
    // three distinct dates, so the date column is a low-cardinality categorical
    assert!(names.iter().any(|n| n.starts_with("date_")));
}

#[test]
fn test_ratio_guards_zero_denominator() {
    let df = DataLoader::new().load_csv_bytes(EXTRACT.as_bytes()).unwrap();
    let selection = FeatureSelector::default()
        .select(&df, &["engagementRate".to_string()])
        .unwrap();

    let j = selection
        .feature_names
        .iter()
        .position(|n| n == "sessions_per_user")
        .unwrap();
    assert_eq!(selection.x[[0, j]], 120.0 / 80.0);
    // activeUsers is 0 on the second row
    assert_eq!(selection.x[[1, j]], 60.0);
}

#[test]
fn test_missing_target_lists_available_columns() {
    let df = DataLoader::new().load_csv_bytes(EXTRACT.as_bytes()).unwrap();
    let err = FeatureSelector::default()
        .select(&df, &["conversions".to_string()])
        .unwrap_err();

    match err {
        ForecastError::MissingTarget { requested, available } => {
            assert_eq!(requested, vec!["conversions".to_string()]);
            assert!(available.contains(&"sessions".to_string()));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_default_targets_exclude_their_columns() {
    let df = DataLoader::new().load_csv_bytes(EXTRACT.as_bytes()).unwrap();
    let selection = FeatureSelector::default().select(&df, &[]).unwrap();

    assert_eq!(selection.y.ncols(), 3);
    for target in &selection.target_names {
        assert!(!selection.feature_names.contains(target));
    }
}

#[test]
fn test_plan_from_profiles_only() {
    let profiles = vec![
        profile("sessions", ColumnKind::Numeric, 50, 900.0),
        profile("users", ColumnKind::Numeric, 40, 400.0),
        profile("engagementRate", ColumnKind::Numeric, 30, 0.01),
        profile("country", ColumnKind::Categorical, 40, f64::NAN),
        profile("deviceCategory", ColumnKind::Categorical, 3, f64::NAN),
    ];
    let config = SelectorConfig::default();

    let plan = plan_selection(&profiles, &["activeUsers".to_string()], &config).unwrap();
    assert_eq!(plan.targets.len(), 1);
    assert_eq!(plan.targets[0].source, "users");
    assert!(!plan.numeric.contains(&"users".to_string()));
    assert_eq!(plan.categorical, vec!["deviceCategory".to_string()]);
    // ratio needs a column literally named activeUsers
    assert!(plan.ratios.is_empty());
}

#[test]
fn test_ratio_over_target_is_not_a_feature() {
    let df = DataLoader::new().load_csv_bytes(EXTRACT.as_bytes()).unwrap();
    let selection = FeatureSelector::default()
        .select(&df, &["sessions".to_string()])
        .unwrap();

    assert!(!selection.feature_names.contains(&"sessions_per_user".to_string()));
    assert!(!selection.feature_names.contains(&"sessions".to_string()));
    assert!(selection.feature_names.contains(&"activeUsers".to_string()));

    // no feature column times activeUsers reproduces the target
    let users = selection
        .feature_names
        .iter()
        .position(|n| n == "activeUsers")
        .unwrap();
    for j in 0..selection.x.ncols() {
        let reconstructs = (0..selection.x.nrows())
            .all(|i| selection.x[[i, j]] * selection.x[[i, users]] == selection.y[[i, 0]]);
        assert!(!reconstructs, "feature {} rebuilds the target", selection.feature_names[j]);
    }
}

#[test]
fn test_plan_drops_ratio_reading_aliased_target() {
    let profiles = vec![
        profile("sessions", ColumnKind::Numeric, 50, 900.0),
        profile("activeUsers", ColumnKind::Numeric, 40, 400.0),
        profile("bounceRate", ColumnKind::Numeric, 30, 0.02),
    ];
    let config = SelectorConfig::default();

    let plan = plan_selection(&profiles, &["activeUsers".to_string()], &config).unwrap();
    assert!(plan.ratios.is_empty());
    assert_eq!(plan.numeric, vec!["sessions".to_string()]);

    let plan = plan_selection(&profiles, &["bounceRate".to_string()], &config).unwrap();
    assert_eq!(plan.ratios.len(), 1);
}

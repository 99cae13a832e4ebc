//! End-to-end tests for training, grid search and evaluation.
//!
//! Each test writes a small synthetic rental CSV spanning the 2011/2012 year
//! boundary plus a pipeline config into a temporary directory and drives the
//! same `Runner` the binary uses.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bike_demand::ml::evaluation::SplitValue;
use bike_demand::ml::hyperparams::HyperparameterMapping;
use bike_demand::ml::persistence::{MODEL_FILE, PARAMS_FILE};
use bike_demand::{ArtifactStore, MockClock, Pipeline, Runner, SplitName};
use chrono::{Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use tempfile::TempDir;

const HEADER: &str = "instant,dteday,season,yr,mnth,hr,holiday,weekday,workingday,weathersit,temp,atemp,hum,windspeed,casual,registered,cnt";

/// Hours 2011-12-20 00:00 .. 2012-01-10 23:00 with two missing hours.
fn write_dataset(path: &Path) {
    let start = NaiveDate::from_ymd_opt(2011, 12, 20)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let missing = [200, 400];

    let mut csv = String::from(HEADER);
    csv.push('\n');
    for i in 0..22 * 24 {
        if missing.contains(&i) {
            continue;
        }
        let ts = start + Duration::hours(i);
        let hr = ts.hour();
        let weekday = ts.weekday().num_days_from_sunday();
        let workingday = u8::from((1..=5).contains(&weekday));
        let busy = (7..=19).contains(&hr);
        let cnt = 15 + (if busy { 120 } else { 0 }) + 40 * u32::from(workingday) + (i % 7) as u32;
        let temp = 0.2 + 0.01 * (hr % 12) as f64;
        writeln!(
            csv,
            "{},{},{},{},{},{},{},{},{},{},{:.2},{:.2},{:.2},{:.2},{},{},{}",
            i + 1,
            ts.date().format("%Y-%m-%d"),
            if ts.month() == 12 && ts.day() >= 21 { 1 } else { 4 },
            ts.year() - 2011,
            ts.month(),
            hr,
            u8::from(ts.month() == 12 && ts.day() == 26),
            weekday,
            workingday,
            1 + (i % 3),
            temp,
            temp + 0.03,
            0.6,
            0.15,
            cnt / 5,
            cnt - cnt / 5,
            cnt,
        )
        .unwrap();
    }
    fs::write(path, csv).unwrap();
}

struct Fixture {
    dir: TempDir,
    config: PathBuf,
    clock: MockClock,
    runner: Runner,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("hour.csv");
        write_dataset(&data);

        let config = dir.path().join("pipeline.yml");
        fs::write(
            &config,
            format!(
                r#"
hyperparams:
  regressor:
    n_estimators: 20
    max_depth: 3
    learning_rate: 0.3
data:
  filepath: '{data}'
  years_train: [2011]
export:
  output_dir: '{models}'
search:
  jobs: 2
  folds: 3
  grid:
    regressor:
      n_estimators: [2, 20]
      max_depth: [3]
metrics:
  - name: bike demand error
    params:
      understock_price: 0.6
      overstock_price: 0.4
reports:
  dir: '{reports}'
"#,
                data = data.display(),
                models = dir.path().join("models").display(),
                reports = dir.path().join("reports").display(),
            ),
        )
        .unwrap();

        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 6, 17, 10, 30, 12).unwrap());
        let runner = Runner::new(Arc::new(clock.clone()));

        Self {
            dir,
            config,
            clock,
            runner,
        }
    }

    fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path().join("models"))
    }
}

#[test]
fn test_train_saves_versioned_artifact() {
    let fx = Fixture::new();

    let version = fx.runner.train(&fx.config).unwrap();

    assert_eq!(version, "2024-06-17 10 30 00+00 00");
    let version_dir = fx.store().version_dir(&version);
    assert!(version_dir.join(MODEL_FILE).exists());
    assert!(version_dir.join(PARAMS_FILE).exists());

    let params: HyperparameterMapping = fx.store().load_params(&version).unwrap();
    assert_eq!(params["regressor"]["n_estimators"], serde_json::json!(20));
    assert!(params["selector"]["feature_columns"].as_array().unwrap().len() > 11);
    assert!(params.contains_key("column_transformer"));

    let pipeline: Pipeline = fx.store().load(&version).unwrap();
    assert!(pipeline.is_fitted());
}

#[test]
fn test_eval_writes_report_per_split() {
    let fx = Fixture::new();
    let version = fx.runner.train(&fx.config).unwrap();

    let path = fx
        .runner
        .eval(&fx.config, &version, &[SplitName::Train, SplitName::Test])
        .unwrap();

    assert_eq!(
        path,
        fx.dir.path().join("reports").join(format!("{version}.yml"))
    );
    let report: BTreeMap<String, Vec<SplitValue>> =
        serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let values = &report["bike demand error"];
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].split, SplitName::Train);
    assert_eq!(values[1].split, SplitName::Test);
    assert!(values.iter().all(|v| v.value.is_finite() && v.value >= 0.0));
}

#[test]
fn test_eval_single_split() {
    let fx = Fixture::new();
    let version = fx.runner.train(&fx.config).unwrap();

    let path = fx.runner.eval(&fx.config, &version, &[SplitName::Test]).unwrap();

    let report: BTreeMap<String, Vec<SplitValue>> =
        serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(report["bike demand error"].len(), 1);
    assert_eq!(report["bike demand error"][0].split, SplitName::Test);
}

#[test]
fn test_eval_reports_nan_for_empty_split() {
    let fx = Fixture::new();
    let version = fx.runner.train(&fx.config).unwrap();
    let every_year = fx.dir.path().join("every_year.yml");
    let text = fs::read_to_string(&fx.config).unwrap();
    fs::write(&every_year, text.replace("years_train: [2011]", "years_train: [2011, 2012]")).unwrap();

    let path = fx
        .runner
        .eval(&every_year, &version, &[SplitName::Train, SplitName::Test])
        .unwrap();

    let report: BTreeMap<String, Vec<SplitValue>> =
        serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    let values = &report["bike demand error"];
    assert_eq!(values.len(), 2);
    assert!(values[0].value.is_finite());
    assert!(values[1].value.is_nan());
}

#[test]
fn test_second_train_in_same_minute_keeps_first_artifact() {
    let fx = Fixture::new();
    let version = fx.runner.train(&fx.config).unwrap();
    let model = fs::read(fx.store().model_path(&version)).unwrap();
    let params = fs::read(fx.store().params_path(&version)).unwrap();

    let result = fx.runner.train(&fx.config);

    assert!(result.is_err());
    assert_eq!(fs::read(fx.store().model_path(&version)).unwrap(), model);
    assert_eq!(fs::read(fx.store().params_path(&version)).unwrap(), params);
    assert_eq!(fs::read_dir(fx.dir.path().join("models")).unwrap().count(), 1);
}

#[test]
fn test_eval_unknown_version_fails() {
    let fx = Fixture::new();

    let result = fx
        .runner
        .eval(&fx.config, "1999-01-01 00 00 00+00 00", &[SplitName::Test]);

    assert!(result.is_err());
    assert!(!fx.dir.path().join("reports").exists());
}

#[test]
fn test_find_hyperparams_saves_best_grid_params() {
    let fx = Fixture::new();
    fx.clock.advance(Duration::minutes(5));

    let version = fx.runner.find_hyperparams(&fx.config).unwrap();

    assert_eq!(version, "2024-06-17 10 35 00+00 00");
    let params = fx.store().load_params(&version).unwrap();
    assert_eq!(params.keys().collect::<Vec<_>>(), vec!["regressor"]);
    assert_eq!(params["regressor"]["n_estimators"], serde_json::json!(20));
    assert_eq!(params["regressor"]["max_depth"], serde_json::json!(3));

    let pipeline: Pipeline = fx.store().load(&version).unwrap();
    assert_eq!(pipeline.regressor().params().n_estimators, 20);
}

#[test]
fn test_train_and_search_share_cached_reads() {
    let fx = Fixture::new();
    let first = fx.runner.train(&fx.config).unwrap();

    // The dataset is served from the cache once read.
    fs::remove_file(fx.dir.path().join("hour.csv")).unwrap();
    fx.clock.advance(Duration::minutes(1));
    let second = fx.runner.find_hyperparams(&fx.config).unwrap();

    assert_ne!(first, second);
}

#[test]
fn test_missing_dataset_is_reported() {
    let fx = Fixture::new();
    fs::remove_file(fx.dir.path().join("hour.csv")).unwrap();

    let error = fx.runner.train(&fx.config).unwrap_err();

    assert!(format!("{error:#}").contains("hour.csv"));
    assert!(!fx.dir.path().join("models").exists());
}

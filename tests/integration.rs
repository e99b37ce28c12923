use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const PROGRAM: &str = "def add(a, b):\n    return a + b\n\nprint(add(1, 2))\n";

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_autograder-analysis"))
}

/// A config file, cache and manifest confined to a temp dir.
struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let config = format!(
            "cache_dir = \"{}\"\nmetrics_path = \"{}\"\n\n[[engines]]\nkind = \"reference\"\n",
            dir.path().join("cache").display(),
            dir.path().join("metrics.jsonl").display(),
        );
        fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_path(&self) -> PathBuf {
        self.path().join("config.toml")
    }

    fn write(&self, relpath: &str, content: &str) {
        let path = self.path().join(relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Three submissions of one assignment; s1 and s3 share an author.
    fn with_submissions(self) -> Self {
        self.write("subs/s1/submission.py", PROGRAM);
        self.write("subs/s2/submission.py", PROGRAM);
        self.write(
            "subs/s3/submission.py",
            &format!("{PROGRAM}print(add(3, 4))\nprint(add(5, 6))\n"),
        );
        self.write(
            "manifest.yaml",
            r#"
assignments:
  - course: c101
    id: hw1
submissions:
  - {id: s1, course: c101, assignment: hw1, user: alice@test.edu, timestamp: 60000, score: 4, path: subs/s1}
  - {id: s2, course: c101, assignment: hw1, user: bob@test.edu, timestamp: 90000, score: 7, path: subs/s2}
  - {id: s3, course: c101, assignment: hw1, user: alice@test.edu, timestamp: 180000, score: 10, path: subs/s3}
"#,
        );
        self
    }

    fn run(&self, args: &[&str]) -> Output {
        cargo_bin()
            .arg("--config")
            .arg(self.config_path())
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("failed to run")
    }

    fn run_json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "command {args:?} failed: {}",
            String::from_utf8_lossy(&output.stdout)
        );
        serde_json::from_slice(&output.stdout).expect("invalid JSON")
    }

    fn cache_files(&self, kind: &str) -> usize {
        let dir = self.path().join("cache").join(kind);
        if !dir.exists() {
            return 0;
        }
        fs::read_dir(dir)
            .unwrap()
            .flat_map(|shard| fs::read_dir(shard.unwrap().path()).unwrap())
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "json")
            })
            .count()
    }
}

fn assert_error(output: &Output, code: &str) -> String {
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    assert_eq!(json["error"]["code"], code, "unexpected error: {json}");
    json["error"]["message"].as_str().unwrap().to_string()
}

#[test]
fn doctor_returns_json() {
    let fixture = Fixture::new();
    let json = fixture.run_json(&["doctor"]);

    assert_eq!(json["version"], PKG_VERSION);
    let engines = json["engines"].as_array().unwrap();
    assert_eq!(engines.len(), 1);
    assert_eq!(engines[0]["name"], "reference");
    assert_eq!(engines[0]["available"], true);

    let languages = json["languages"].as_array().unwrap();
    assert!(languages.len() >= 8);
    for lang in languages {
        assert!(
            lang["available"].as_bool().unwrap(),
            "Language {:?} not available",
            lang["language"]
        );
    }
}

#[test]
fn init_writes_loadable_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("generated").join("config.toml");

    let output = cargo_bin()
        .args(["init", "--path"])
        .arg(&path)
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    assert!(path.exists());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Configuration file created"));

    let output = cargo_bin()
        .arg("--config")
        .arg(&path)
        .arg("doctor")
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["engines"][0]["name"], "token");
}

#[test]
fn invalid_config_is_config_error() {
    let fixture = Fixture::new();
    fs::write(fixture.config_path(), "engines = 5\n").unwrap();
    let output = fixture.run(&["doctor"]);
    assert_error(&output, "CONFIG_ERROR");
}

#[test]
fn validate_options_normalizes_template_paths() {
    let fixture = Fixture::new();
    fixture.write(
        "options.yaml",
        "exclude-patterns: ['\\.txt$']\ntemplate-files:\n  - {type: path, path: ' ./skel/../skeleton.py '}\n",
    );

    let json = fixture.run_json(&["validate-options", "--file", "options.yaml"]);
    assert_eq!(json["include-patterns"], serde_json::json!([".*"]));
    assert_eq!(json["exclude-patterns"], serde_json::json!(["\\.txt$"]));
    assert_eq!(json["template-files"][0]["path"], "skeleton.py");
}

#[test]
fn validate_options_rejects_bad_pattern() {
    let fixture = Fixture::new();
    fixture.write("options.yaml", "include-patterns: ['([a-z']\n");
    let output = fixture.run(&["validate-options", "--file", "options.yaml"]);
    assert_error(&output, "CONFIG_ERROR");
}

#[test]
fn validate_options_rejects_escaping_template() {
    let fixture = Fixture::new();
    fixture.write("options.yaml", "template-files:\n  - {type: path, path: ../secret}\n");
    let output = fixture.run(&["validate-options", "--file", "options.yaml"]);
    let message = assert_error(&output, "CONFIG_ERROR");
    assert!(message.contains("outside of its base directory"), "{message}");
}

#[test]
fn pairwise_computes_then_hits_cache() {
    let fixture = Fixture::new().with_submissions();

    let json = fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,s2,s3"]);
    assert_eq!(json["pending-count"], 0);
    assert_eq!(json["complete"], true);
    assert!(json.get("failures").is_none());

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["submission-ids"], serde_json::json!(["s1", "s2"]));
    assert_eq!(results[0]["total-mean-similarity"], 1.0);
    assert_eq!(
        results[0]["similarities"]["submission.py"][0]["tool"],
        "reference"
    );
    let partial = results[1]["total-mean-similarity"].as_f64().unwrap();
    assert!(partial > 0.0 && partial < 1.0, "{partial}");
    assert_eq!(fixture.cache_files("pairwise"), 3);

    let metrics = fs::read_to_string(fixture.path().join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 3);

    let again = fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s3,s2,s1"]);
    assert_eq!(again["results"], json["results"]);
    let metrics = fs::read_to_string(fixture.path().join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 3, "cached pairs record no metrics");
}

#[test]
fn pairwise_no_wait_finishes_before_exit() {
    let fixture = Fixture::new().with_submissions();

    let json = fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,s2", "--no-wait"]);
    assert_eq!(json["pending-count"], 1);
    assert_eq!(json["complete"], false);
    assert_eq!(json["results"].as_array().unwrap().len(), 0);
    assert_eq!(fixture.cache_files("pairwise"), 1);

    let json = fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,s2", "--no-wait"]);
    assert_eq!(json["pending-count"], 0);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
}

#[cfg(unix)]
#[test]
fn pairwise_engine_failure_is_reported_not_cached() {
    let fixture = Fixture::new().with_submissions();
    let mut config = fs::read_to_string(fixture.config_path()).unwrap();
    config.push_str("\n[[engines]]\nkind = \"external\"\nname = \"broken\"\ncommand = [\"sh\", \"-c\", \"exit 3\"]\n");
    fs::write(fixture.config_path(), config).unwrap();

    let json = fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,s3"]);
    assert_eq!(json["pending-count"], 0);
    assert_eq!(json["complete"], false);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(
        json["results"][0]["similarities"]["submission.py"]
            .as_array()
            .unwrap()
            .len(),
        1
    );

    let failures = json["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["key"], "pairwise:s1||s3");
    let error = failures[0]["errors"][0].as_str().unwrap();
    assert!(error.starts_with("broken on submission.py"), "{error}");
    assert_eq!(fixture.cache_files("pairwise"), 0);
}

#[test]
fn pairwise_unknown_submission() {
    let fixture = Fixture::new().with_submissions();
    let output = fixture.run(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,nope"]);
    let message = assert_error(&output, "SUBMISSION_NOT_FOUND");
    assert!(message.contains("nope"));
}

#[test]
fn missing_manifest_is_io_error() {
    let fixture = Fixture::new();
    let output = fixture.run(&["pairwise", "-m", "absent.yaml", "--ids", "a,b"]);
    assert_error(&output, "IO_ERROR");
}

#[test]
fn individual_reports_trends() {
    let fixture = Fixture::new().with_submissions();

    let json = fixture.run_json(&["individual", "-m", "manifest.yaml", "--ids", "s3,s1"]);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let first = &results[0];
    assert_eq!(first["submission-id"], "s1");
    assert_eq!(first["lines-of-code"], 3);
    assert_eq!(first["submission-time-delta"], 0);

    let third = &results[1];
    assert_eq!(third["submission-id"], "s3");
    assert_eq!(third["lines-of-code"], 5);
    assert_eq!(third["files"][0]["filename"], "submission.py");
    assert_eq!(third["submission-time-delta"], 120000);
    assert_eq!(third["lines-of-code-delta"], 2);
    assert_eq!(third["score-delta"], 6.0);
    assert_eq!(third["lines-of-code-velocity"], 1.0);
    assert_eq!(third["score-velocity"], 3.0);
    assert_eq!(fixture.cache_files("individual"), 2);
}

#[test]
fn summary_rounds_aggregates() {
    let fixture = Fixture::new().with_submissions();

    let json = fixture.run_json(&[
        "summary",
        "-m",
        "manifest.yaml",
        "--kind",
        "individual",
        "--ids",
        "s1,s2,s3",
        "--precision",
        "2",
    ]);
    assert_eq!(json["complete"], true);
    assert_eq!(json["complete-count"], 3);
    assert_eq!(json["aggregate-score"]["max"], 10.0);
    assert_eq!(json["aggregate-score"]["min"], 4.0);
    assert_eq!(json["aggregate-score"]["mean"], 7.0);

    let json = fixture.run_json(&[
        "summary", "-m", "manifest.yaml", "--kind", "pairwise", "--ids", "s1,s2",
    ]);
    assert_eq!(json["complete-count"], 1);
    assert_eq!(json["aggregate-total-mean-similarities"]["max"], 1.0);
}

#[test]
fn run_task_dispatches_individual() {
    let fixture = Fixture::new().with_submissions();
    fixture.write(
        "task.yaml",
        "type: analysis\nname: nightly\nwhen: '0 3 * * *'\noptions:\n  submission-ids: [s1, s2]\n  individual: true\n",
    );

    let json = fixture.run_json(&["run-task", "-m", "manifest.yaml", "--task", "task.yaml"]);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);

    let metrics = fs::read_to_string(fixture.path().join("metrics.jsonl")).unwrap();
    let first: serde_json::Value = serde_json::from_str(metrics.lines().next().unwrap()).unwrap();
    assert_eq!(first["user-email"], "nightly");
    assert_eq!(first["attributes"]["analysis"], "individual");
}

#[test]
fn run_task_rejects_bad_option_type() {
    let fixture = Fixture::new().with_submissions();
    fixture.write(
        "task.yaml",
        "type: analysis\nwhen: daily\noptions:\n  submission-ids: s1\n",
    );
    let output = fixture.run(&["run-task", "-m", "manifest.yaml", "--task", "task.yaml"]);
    assert_error(&output, "CONFIG_ERROR");
}

#[test]
fn cache_clear_drops_records() {
    let fixture = Fixture::new().with_submissions();
    fixture.run_json(&["pairwise", "-m", "manifest.yaml", "--ids", "s1,s2"]);
    assert_eq!(fixture.cache_files("pairwise"), 1);

    fixture.run_json(&["cache", "clear"]);
    assert_eq!(fixture.cache_files("pairwise"), 0);
}

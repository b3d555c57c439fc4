use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn identity_dir(&self) -> PathBuf {
        self.xdg_data.join("leadtrail/identity")
    }

    fn write_settings(&self, content: &str) {
        let dir = self.xdg_config.join("leadtrail");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), content).expect("failed to write config.toml");
    }
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn boot_config() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../leadtrail-core/tests/fixtures/boot-config.json")
        .to_string_lossy()
        .into_owned()
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("leadtrail"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute leadtrail: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "leadtrail {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

/// Every event in every batch printed by a dry run
fn printed_events(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| {
            let batch: Value = serde_json::from_str(line)
                .unwrap_or_else(|e| panic!("batch line is not JSON ({e}): {line}"));
            batch["events"].as_array().cloned().unwrap_or_default()
        })
        .collect()
}

fn events_of_type<'a>(events: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == event_type).collect()
}

#[test]
fn status_reports_xdg_locations() {
    let env = CliTestEnv::new();
    env.write_settings("[transport]\ntimeout_secs = 3\n");

    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&env.identity_dir().display().to_string()));
    assert!(
        stdout.contains("timeout_secs = 3"),
        "expected settings dump in stdout, got:\n{stdout}"
    );
    assert!(!stdout.contains("not found, using defaults"));
}

#[test]
fn status_rejects_invalid_settings() {
    let env = CliTestEnv::new();
    env.write_settings("[transport]\ntimeout_secs = 0\n");

    let output = run_bin(&env, &["status"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timeout_secs"), "stderr:\n{stderr}");
}

#[test]
fn identity_is_stable_across_runs() {
    let env = CliTestEnv::new();
    let args = ["identity", "--origin", "https://example.com"];

    let first = run_bin(&env, &args);
    assert_success(&args, &first);
    let second = run_bin(&env, &args);
    assert_success(&args, &second);

    let visitor_line = |output: &Output| {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find(|line| line.starts_with("Visitor ID:"))
            .map(str::to_string)
            .expect("visitor id line")
    };
    let first_id = visitor_line(&first);
    assert!(first_id.contains("visitor_"));
    assert_eq!(first_id, visitor_line(&second));
    assert!(env.identity_dir().join("https_example.com.json").exists());

    let reset = ["identity", "--origin", "https://example.com", "--reset"];
    let output = run_bin(&env, &reset);
    assert_success(&reset, &output);

    let third = run_bin(&env, &args);
    assert_success(&args, &third);
    assert_ne!(first_id, visitor_line(&third));
}

#[test]
fn config_check_applies_defaults() {
    let env = CliTestEnv::new();
    let path = boot_config();
    let args = ["config", "check", path.as_str()];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let config: Value = serde_json::from_slice(&output.stdout).expect("config JSON on stdout");
    assert_eq!(config["apiKey"], "sk_live_fixture");
    assert_eq!(config["widgets"]["forms"]["captureSelector"], "form.lead, form#contact");
    // not in the fixture, filled from defaults
    assert_eq!(config["widgets"]["forms"]["debounceMs"], 2000);
}

#[test]
fn config_check_rejects_missing_api_key() {
    let env = CliTestEnv::new();
    let temp = TempDir::new().expect("temp dir");
    let path = temp.path().join("boot.json");
    fs::write(&path, r#"{"widgets": {"forms": {"enabled": true}}}"#).expect("write boot.json");
    let path = path.to_string_lossy().into_owned();

    let output = run_bin(&env, &["config", "check", path.as_str()]);
    assert!(!output.status.success());
}

#[test]
fn replay_dry_run_prints_debounced_batch() {
    let env = CliTestEnv::new();
    let script = fixture("contact-form.ndjson");
    let config = boot_config();
    let args = [
        "replay",
        script.as_str(),
        "--config",
        config.as_str(),
        "--url",
        "https://example.com/contact?utm_source=ads",
        "--dry-run",
    ];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let events = printed_events(&output);
    assert_eq!(events_of_type(&events, "tracker_initialized").len(), 1);
    assert_eq!(events_of_type(&events, "pageview").len(), 1);
    assert_eq!(events_of_type(&events, "widget_shown").len(), 1);

    let interactions = events_of_type(&events, "form_interaction");
    assert_eq!(interactions.len(), 1, "events: {events:#?}");
    let interaction = interactions[0];
    assert_eq!(interaction["apiKey"], "sk_live_fixture");
    assert_eq!(interaction["url"], "https://example.com/contact?utm_source=ads");
    assert_eq!(interaction["form"]["formId"], "contact");
    assert_eq!(interaction["form"]["trigger"], "batch_capture");
    assert_eq!(interaction["form"]["fieldCount"], 2);
    assert_eq!(interaction["form"]["fields"]["email"], "ada@example.com");
    assert!(interaction["form"]["fields"].get("password").is_none());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("(dry run)"), "stderr:\n{stderr}");
}

#[test]
fn replay_dry_run_redacts_submission() {
    let env = CliTestEnv::new();
    let script = fixture("submission.ndjson");
    let config = boot_config();
    let args = [
        "replay",
        script.as_str(),
        "--config",
        config.as_str(),
        "--url",
        "https://example.com/contact",
        "--dry-run",
    ];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let events = printed_events(&output);
    let submissions = events_of_type(&events, "form_submission");
    assert_eq!(submissions.len(), 1, "events: {events:#?}");

    let form = &submissions[0]["form"];
    assert_eq!(form["formId"], "contact");
    assert_eq!(form["formAction"], "https://example.com/thanks");
    assert_eq!(form["fields"]["password"], "[REDACTED]");
    assert_eq!(form["fields"]["email"], "ada@example.com");
    assert_eq!(form["fields"]["company"], "Acme");

    let identify = events_of_type(&events, "identify");
    assert_eq!(identify.len(), 1);

    // every event carries the same visitor
    let visitor = &events[0]["visitorId"];
    assert!(events.iter().all(|e| &e["visitorId"] == visitor));
}

#[test]
fn replay_rejects_malformed_script() {
    let env = CliTestEnv::new();
    let temp = TempDir::new().expect("temp dir");
    let script = temp.path().join("broken.ndjson");
    fs::write(&script, "{\"atMs\": 10}\n{\"atMs\": 5}\n").expect("write script");
    let script = script.to_string_lossy().into_owned();
    let config = boot_config();

    let output = run_bin(
        &env,
        &["replay", script.as_str(), "--config", config.as_str(), "--dry-run"],
    );
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2"), "stderr:\n{stderr}");
}

#[test]
fn replay_rejects_offset_out_of_range() {
    let env = CliTestEnv::new();
    let temp = TempDir::new().expect("temp dir");
    let script = temp.path().join("far.ndjson");
    fs::write(&script, "{\"atMs\": 0}\n{\"atMs\": 9223372036854775807}\n").expect("write script");
    let script = script.to_string_lossy().into_owned();
    let config = boot_config();

    let output = run_bin(
        &env,
        &["replay", script.as_str(), "--config", config.as_str(), "--dry-run"],
    );
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out of range"), "stderr:\n{stderr}");
}

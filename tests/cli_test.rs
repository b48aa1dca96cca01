use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use tempfile::TempDir;

fn walktrack() -> Command {
    Command::cargo_bin("walktrack").expect("Failed to find walktrack binary")
}

/// Writes a config with short intervals so `track` finishes quickly
fn write_fast_config(dir: &TempDir) -> Result<(), Box<dyn Error>> {
    walktrack().arg("init").current_dir(dir.path()).assert().success();

    let config_path = dir.path().join("walktrack.yaml");
    let content = fs::read_to_string(&config_path)?
        .replace("interval_ms: 10000", "interval_ms: 50")
        .replace("fastest_interval_ms: 5000", "fastest_interval_ms: 10");
    fs::write(&config_path, content)?;

    Ok(())
}

#[test]
fn test_init_creates_config() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("walktrack.yaml");

    walktrack()
        .arg("init")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));

    let content = fs::read_to_string(&config_path)?;
    assert!(content.contains("policy"), "Config should contain policy");
    assert!(content.contains("state_file"), "Config should contain state_file");
    assert!(content.contains("geocoder"), "Config should contain geocoder");

    Ok(())
}

#[test]
fn test_init_respects_force() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("walktrack.yaml");

    let initial_content = "policy: {}";
    fs::write(&config_path, initial_content)?;

    walktrack()
        .arg("init")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Config file already exists"));
    assert_eq!(fs::read_to_string(&config_path)?, initial_content);

    walktrack()
        .arg("init")
        .arg("--force")
        .current_dir(temp_dir.path())
        .assert()
        .success();
    assert!(fs::read_to_string(&config_path)?.contains("interval_ms"));

    Ok(())
}

#[test]
fn test_missing_config_fails() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;

    walktrack()
        .arg("status")
        .current_dir(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));

    Ok(())
}

#[test]
fn test_geocode_single_coordinate() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    walktrack().arg("init").current_dir(temp_dir.path()).assert().success();

    walktrack()
        .args(["geocode", "--lat", "37.4", "--lon", "-122.1"])
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1600 Amphitheatre Pkwy"))
        .stdout(predicate::str::contains("Mountain View, CA"));

    walktrack()
        .args(["geocode", "--lat", "200", "--lon", "0"])
        .current_dir(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid latitude or longitude"));

    Ok(())
}

#[test]
fn test_track_saves_state() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    write_fast_config(&temp_dir)?;

    walktrack()
        .args(["track", "--fixes", "2"])
        .current_dir(temp_dir.path())
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolved 2 address(es)"));

    let state_path = temp_dir.path().join("data/walktrack_state.yaml");
    assert!(state_path.exists(), "State file should be written");
    let state = fs::read_to_string(&state_path)?;
    assert!(state.contains("tracking: true"));
    assert!(state.contains("last_address"));

    walktrack()
        .arg("status")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("walktrack Status"))
        .stdout(predicate::str::contains("Tracking: on"))
        .stdout(predicate::str::contains("Address:"));

    Ok(())
}

#[test]
fn test_track_resolves_settings_dialog() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    write_fast_config(&temp_dir)?;

    walktrack()
        .args(["track", "--fixes", "1", "--settings", "resolvable"])
        .current_dir(temp_dir.path())
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Settings change needed"))
        .stdout(predicate::str::contains("Resolved 1 address(es)"));

    Ok(())
}

#[test]
fn test_track_with_denied_permission() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    write_fast_config(&temp_dir)?;

    walktrack()
        .args(["track", "--deny-permission"])
        .current_dir(temp_dir.path())
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Error:"))
        .stdout(predicate::str::contains("Resolved 0 address(es)"));

    walktrack()
        .arg("status")
        .current_dir(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracking: off"))
        .stdout(predicate::str::contains(
            "Press the button to start tracking your location",
        ));

    Ok(())
}

//! Integration tests exercising the supervisor and persistence layers
//! together, end to end, against an `Introspect` uinput registry — no
//! real device grab is involved, matching how `handler::tests` already
//! covers the dispatch-level scenarios.

use std::io::Write;

use injectord::mapping::Preset;
use injectord::persistence;
use injectord::supervisor::Supervisor;
use injectord::uinput::Mode;

fn write_temp(dir: &std::path::Path, name: &str, contents: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
}

#[test]
fn start_injecting_with_no_matching_devices_fails_closed_but_reaches_no_grab() {
    let supervisor = Supervisor::new(Mode::Introspect);
    let config_dir = tempfile::tempdir().unwrap();
    let presets_dir = config_dir.path().join("presets").join("nonexistent-group");
    std::fs::create_dir_all(&presets_dir).unwrap();
    write_temp(&presets_dir, "default.json", r#"{"name": "default", "mappings": []}"#);

    supervisor.set_config_dir(config_dir.path());

    // The device group itself doesn't exist on this (hardware-less)
    // test host, so the lookup fails before any device or preset I/O.
    assert!(!supervisor.start_injecting("nonexistent-group", "default"));
}

#[test]
fn autoload_reads_group_key_to_preset_name_entries_and_skips_the_options_key() {
    let config_dir = tempfile::tempdir().unwrap();
    write_temp(
        config_dir.path(),
        "autoload.json",
        r#"{"options": {"some_flag": true}, "some-group": "gaming"}"#,
    );

    let entries = persistence::load_autoload_config(&config_dir.path().join("autoload.json")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.get("some-group"), Some(&"gaming".to_string()));
}

#[test]
fn autoload_with_no_matching_device_group_does_not_panic() {
    let supervisor = Supervisor::new(Mode::Introspect);
    let config_dir = tempfile::tempdir().unwrap();
    write_temp(
        config_dir.path(),
        "autoload.json",
        r#"{"never-plugged-in": "default"}"#,
    );
    supervisor.set_config_dir(config_dir.path());

    supervisor.autoload();
}

#[test]
fn hello_round_trips_through_the_supervisor() {
    let supervisor = Supervisor::new(Mode::Introspect);
    assert_eq!(supervisor.hello("ping"), "ping");
}

#[test]
fn loading_an_empty_preset_yields_no_valid_mappings() {
    let config_dir = tempfile::tempdir().unwrap();
    write_temp(config_dir.path(), "preset.json", r#"{"mappings": []}"#);

    let preset = persistence::load_preset(&config_dir.path().join("preset.json")).unwrap();
    assert!(preset.valid_mappings().next().is_none());
}

#[test]
fn stop_all_is_a_no_op_with_nothing_running() {
    let supervisor = Supervisor::new(Mode::Introspect);
    supervisor.stop_all();
    assert_eq!(
        supervisor.get_state("anything"),
        injectord::injector::InjectorState::Unknown
    );
}

#[test]
fn default_preset_has_no_mappings() {
    let preset = Preset::default();
    assert!(preset.mappings.is_empty());
}

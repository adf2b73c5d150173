use super::{apply_env_overrides, load_settings_file, MediaSettings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[test]
fn defaults_match_reference_behavior() {
    let settings = MediaSettings::default();
    assert_eq!(settings.sync_timeout(), Duration::from_secs(60));
    assert_eq!(settings.multi_fraction, 0.65);
    assert_eq!(settings.preview_max_width, 512);
    assert_eq!(settings.content_scheme, "content");
}

#[test]
fn partial_settings_file_keeps_remaining_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("media_client_settings_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("media.toml");
    fs::write(&path, "sync_timeout_secs = 5\nimage_corner_radius = 4.5\n").expect("write");

    let settings = load_settings_file(&path).expect("load");
    assert_eq!(settings.sync_timeout_secs, 5);
    assert_eq!(settings.image_corner_radius, 4.5);
    assert_eq!(settings.display_density, 1.0);

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn unparseable_settings_file_is_an_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("media_client_bad_settings_{suffix}.toml"));
    fs::write(&path, "sync_timeout_secs = \"soon\"").expect("write");

    let err = load_settings_file(&path).expect_err("bad type");
    assert!(err.to_string().contains("failed to parse media settings"));

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn env_overrides_win_and_bad_values_are_ignored() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("MEDIA__SYNC_TIMEOUT_SECS", "2"),
        ("MEDIA__DISPLAY_DENSITY", "not-a-number"),
        ("MEDIA__CONTENT_SCHEME", " parts "),
    ]);
    let mut settings = MediaSettings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.sync_timeout_secs, 2);
    assert_eq!(settings.display_density, 1.0);
    assert_eq!(settings.content_scheme, "parts");
}

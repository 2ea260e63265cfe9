use halstream_settings::{
    Config, ConnectionType, EventHook, HookTrigger, MacroDefinition, SettingsError,
    ToolChangeOption,
};

fn sample_config() -> Config {
    let mut config = Config::default();
    config.connection.connection_type = ConnectionType::Tcp;
    config.connection.port = "192.168.5.1".to_string();
    config.streaming.ignore_errors = true;
    config.tool_change.option = ToolChangeOption::Macro;
    config.rotary.enabled = true;
    config.macros.push(MacroDefinition {
        id: "park".to_string(),
        name: "Park".to_string(),
        content: "G53 G0 Z-1\nG53 G0 X-5 Y-5".to_string(),
    });
    config.event_hooks.push(EventHook {
        event: "gcode:stop".to_string(),
        enabled: true,
        trigger: HookTrigger::Gcode,
        commands: "M5\nM9".to_string(),
    });
    config
}

#[test]
fn test_toml_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("config.toml");

    let config = sample_config();
    config.save_to_file(&path).expect("save toml");
    let loaded = Config::load_from_file(&path).expect("load toml");

    assert_eq!(loaded, config);
}

#[test]
fn test_json_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");

    let config = sample_config();
    config.save_to_file(&path).expect("save json");
    let loaded = Config::load_from_file(&path).expect("load json");

    assert_eq!(loaded.event_hooks, config.event_hooks);
    assert_eq!(loaded.tool_change.option, ToolChangeOption::Macro);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");

    let err = Config::default()
        .save_to_file(&path)
        .expect_err("yaml is not supported");
    assert!(matches!(err, SettingsError::Config(_)));
}

#[test]
fn test_load_or_default_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");

    let config = Config::load_or_default(&path).expect("defaults");
    assert_eq!(config, Config::default());
}

#[test]
fn test_malformed_toml_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[connection\nport = 1").expect("write");

    let err = Config::load_from_file(&path).expect_err("malformed");
    assert!(matches!(err, SettingsError::TomlError(_)));
}

use super::*;
use crate::orchestration::DispatchMode;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
    assert_eq!(config.messaging.redis.url, "redis://localhost:6379");
    assert_eq!(config.orchestration.command_channel, "herald.commands");
    assert_eq!(config.orchestration.dispatch_mode, DispatchMode::Concurrent);
    assert!(config.orchestration.instance_id.is_none());
}

#[test]
#[serial]
fn test_load_from_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
messaging:
  type: redis
  redis:
    url: redis://cache:6380
orchestration:
  command_channel: test.commands
  instance_id: webhook-1
  dispatch_mode: serial
"#
    )
    .unwrap();

    let config = Config::load(file.path().to_str()).unwrap();

    assert_eq!(config.messaging.messaging_type, MessagingType::Redis);
    assert_eq!(config.messaging.redis.url, "redis://cache:6380");
    assert_eq!(config.orchestration.command_channel, "test.commands");
    assert_eq!(config.orchestration.instance_id.as_deref(), Some("webhook-1"));
    assert_eq!(config.orchestration.dispatch_mode, DispatchMode::Serial);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "orchestration:\n  command_channel: from.file").unwrap();

    std::env::set_var("HERALD__ORCHESTRATION__COMMAND_CHANNEL", "from.env");
    let config = Config::load(file.path().to_str());
    std::env::remove_var("HERALD__ORCHESTRATION__COMMAND_CHANNEL");

    assert_eq!(config.unwrap().orchestration.command_channel, "from.env");
}

#[test]
#[serial]
fn test_empty_command_channel_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "orchestration:\n  command_channel: \"\"").unwrap();

    let result = Config::load(file.path().to_str());

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_resolve_instance_id() {
    let mut config = OrchestrationConfig::default();
    let generated = config.resolve_instance_id();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());
    assert_ne!(generated, config.resolve_instance_id());

    config.instance_id = Some("main-1".to_string());
    assert_eq!(config.resolve_instance_id(), "main-1");
}

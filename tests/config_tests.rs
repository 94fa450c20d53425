// Tests for configuration loading
//
// Defaults apply when no file exists; a file overrides only what it names.

use anyhow::Result;
use liana::config::DEFAULT_SYSTEM_INSTRUCTION;
use liana::{Config, SessionConfig, SessionError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.assistant.name, "Liana");
    assert_eq!(cfg.assistant.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
    assert_eq!(cfg.live.model, "gemini-2.5-flash-native-audio-preview-09-2025");
    assert_eq!(cfg.live.voice, "Zephyr");
    assert_eq!(cfg.live.api_key_env, "API_KEY");
    assert_eq!(cfg.live.connect_timeout_secs, 15);
    assert!(cfg.live.endpoint.starts_with("wss://"));
    assert_eq!(cfg.audio.input_sample_rate, 16000);
    assert_eq!(cfg.audio.output_sample_rate, 24000);
    assert_eq!(cfg.audio.frame_size, 4096);
    assert_eq!(cfg.http.bind, "127.0.0.1");
    assert_eq!(cfg.http.port, 8787);
}

#[test]
fn test_persona_is_bilingual() {
    assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("Liana"));
    assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("English"));
    assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("Persian"));
}

#[test]
fn test_load_without_file_uses_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("missing");

    let cfg = Config::load(path.to_str().unwrap_or_default())?;

    assert_eq!(cfg.http.port, 8787);
    assert_eq!(cfg.live.voice, "Zephyr");

    Ok(())
}

#[test]
fn test_load_partial_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("liana.toml");
    fs::write(
        &path,
        r#"
[assistant]
name = "Nika"

[live]
voice = "Puck"
api_key_env = "LIANA_TEST_KEY_UNSET"

[http]
port = 9090
"#,
    )?;

    let cfg = Config::load(path.to_str().unwrap_or_default())?;

    assert_eq!(cfg.assistant.name, "Nika");
    assert_eq!(cfg.assistant.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
    assert_eq!(cfg.live.voice, "Puck");
    assert_eq!(cfg.live.model, "gemini-2.5-flash-native-audio-preview-09-2025");
    assert_eq!(cfg.http.port, 9090);
    assert_eq!(cfg.http.bind, "127.0.0.1");
    assert_eq!(cfg.audio.frame_size, 4096);

    // The named variable is not set, so there is no credential
    assert_eq!(cfg.live.credential(), None);
    let session = SessionConfig::from_config(&cfg);
    assert_eq!(session.credential, None);
    assert_eq!(session.credential_var, "LIANA_TEST_KEY_UNSET");
    assert_eq!(session.voice, "Puck");

    Ok(())
}

#[test]
fn test_session_config_from_settings() {
    let session = SessionConfig::default().with_credential("key");

    assert_eq!(session.credential.as_deref(), Some("key"));

    let backend = session.backend_config();
    assert_eq!(backend.target_sample_rate, 16000);
    assert_eq!(backend.frame_size, 4096);

    let setup = session.setup();
    assert_eq!(setup.model, "models/gemini-2.5-flash-native-audio-preview-09-2025");

    assert_eq!(session.connect_timeout, Duration::from_secs(15));
    let session = session.with_connect_timeout(Duration::from_millis(250));
    assert_eq!(session.connect_timeout, Duration::from_millis(250));
}

#[test]
fn test_error_messages() {
    assert_eq!(
        SessionError::MissingCredential("API_KEY".to_string()).to_string(),
        "API_KEY environment variable not set."
    );
    assert_eq!(
        SessionError::Connection("dns failure".to_string()).to_string(),
        "Failed to start session. Please check your connection and try again."
    );

    let err = SessionError::Speaker("no default output device".to_string());
    assert_eq!(
        err.to_string(),
        "Failed to start session. Please check your audio output device and try again."
    );
    assert_eq!(err.detail(), "no default output device");
}

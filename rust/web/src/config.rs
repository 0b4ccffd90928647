//! Process configuration: defaults, then a TOML file, then `GAMBIT_*`
//! environment variables, then command-line flags. Every resolved value
//! remembers which layer it came from.

use crate::logging::LogFormat;
use crate::settings::AppSettings;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const CONFIG_ENV: &str = "GAMBIT_CONFIG";

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gambit-server", version, about = "Multiplayer game lobby server")]
pub struct CliArgs {
    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// TOML configuration file (overrides GAMBIT_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Seed for session codes, seat draws and automatic play
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub seed: Option<u64>,
    pub log_format: LogFormat,
    /// Initial runtime settings; editable later through the settings API.
    pub settings: AppSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            seed: None,
            log_format: LogFormat::Pretty,
            settings: AppSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port and a fixed seed.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            seed: Some(7),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Default,
    File,
    Env,
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigSources {
    pub host: ValueSource,
    pub port: ValueSource,
    pub seed: ValueSource,
    pub log_format: ValueSource,
    pub abandon_grace_seconds: ValueSource,
    pub session_timeout_minutes: ValueSource,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            host: ValueSource::Default,
            port: ValueSource::Default,
            seed: ValueSource::Default,
            log_format: ValueSource::Default,
            abandon_grace_seconds: ValueSource::Default,
            session_timeout_minutes: ValueSource::Default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigResolved {
    pub config: ServerConfig,
    pub sources: ConfigSources,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    log_format: Option<LogFormat>,
    #[serde(default)]
    abandon_grace_seconds: Option<u64>,
    #[serde(default)]
    session_timeout_minutes: Option<u64>,
    #[serde(default)]
    bot_move_delay_ms: Option<u64>,
}

pub fn load(cli: &CliArgs) -> Result<ServerConfig, ConfigError> {
    load_with_sources(cli).map(|resolved| resolved.config)
}

pub fn load_with_sources(cli: &CliArgs) -> Result<ConfigResolved, ConfigError> {
    let mut cfg = ServerConfig::default();
    let mut sources = ConfigSources::default();

    let path = cli
        .config
        .clone()
        .or_else(|| env_value(CONFIG_ENV).map(PathBuf::from));
    if let Some(path) = path {
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text)?;
        if let Some(v) = file.host {
            cfg.host = v;
            sources.host = ValueSource::File;
        }
        if let Some(v) = file.port {
            cfg.port = v;
            sources.port = ValueSource::File;
        }
        if let Some(v) = file.seed {
            cfg.seed = Some(v);
            sources.seed = ValueSource::File;
        }
        if let Some(v) = file.log_format {
            cfg.log_format = v;
            sources.log_format = ValueSource::File;
        }
        if let Some(v) = file.abandon_grace_seconds {
            cfg.settings.abandon_grace_seconds = v;
            sources.abandon_grace_seconds = ValueSource::File;
        }
        if let Some(v) = file.session_timeout_minutes {
            cfg.settings.session_timeout_minutes = v;
            sources.session_timeout_minutes = ValueSource::File;
        }
        if let Some(v) = file.bot_move_delay_ms {
            cfg.settings.bot_move_delay_ms = v;
        }
        tracing::debug!(path = %path.display(), "loaded config file");
    }

    if let Some(host) = env_value("GAMBIT_HOST") {
        cfg.host = host;
        sources.host = ValueSource::Env;
    }
    if let Some(port) = env_value("GAMBIT_PORT") {
        cfg.port = parse_env("GAMBIT_PORT", &port)?;
        sources.port = ValueSource::Env;
    }
    if let Some(seed) = env_value("GAMBIT_SEED") {
        cfg.seed = Some(parse_env("GAMBIT_SEED", &seed)?);
        sources.seed = ValueSource::Env;
    }
    if let Some(format) = env_value("GAMBIT_LOG_FORMAT") {
        cfg.log_format = format.parse().map_err(ConfigError::Invalid)?;
        sources.log_format = ValueSource::Env;
    }
    if let Some(grace) = env_value("GAMBIT_ABANDON_GRACE_SECONDS") {
        cfg.settings.abandon_grace_seconds = parse_env("GAMBIT_ABANDON_GRACE_SECONDS", &grace)?;
        sources.abandon_grace_seconds = ValueSource::Env;
    }
    if let Some(timeout) = env_value("GAMBIT_SESSION_TIMEOUT_MINUTES") {
        cfg.settings.session_timeout_minutes =
            parse_env("GAMBIT_SESSION_TIMEOUT_MINUTES", &timeout)?;
        sources.session_timeout_minutes = ValueSource::Env;
    }

    if let Some(host) = &cli.host {
        cfg.host = host.clone();
        sources.host = ValueSource::Cli;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
        sources.port = ValueSource::Cli;
    }
    if let Some(seed) = cli.seed {
        cfg.seed = Some(seed);
        sources.seed = ValueSource::Cli;
    }
    if let Some(format) = cli.log_format {
        cfg.log_format = format;
        sources.log_format = ValueSource::Cli;
    }

    validate(&cfg)?;
    Ok(ConfigResolved {
        config: cfg,
        sources,
    })
}

fn validate(cfg: &ServerConfig) -> Result<(), ConfigError> {
    if cfg.host.trim().is_empty() {
        return Err(ConfigError::Invalid("host cannot be empty".into()));
    }
    cfg.settings
        .validate()
        .map_err(|err| ConfigError::Invalid(err.to_string()))
}

/// Unset and empty variables are both ignored.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: [&str; 7] = [
        CONFIG_ENV,
        "GAMBIT_HOST",
        "GAMBIT_PORT",
        "GAMBIT_SEED",
        "GAMBIT_LOG_FORMAT",
        "GAMBIT_ABANDON_GRACE_SECONDS",
        "GAMBIT_SESSION_TIMEOUT_MINUTES",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    #[serial]
    fn defaults_when_nothing_is_set() {
        clear_env();
        let resolved = load_with_sources(&CliArgs::default()).expect("load");
        assert_eq!(resolved.config, ServerConfig::default());
        assert_eq!(resolved.sources, ConfigSources::default());
    }

    #[test]
    #[serial]
    fn layers_apply_in_order() {
        clear_env();
        let file = config_file(
            "host = \"0.0.0.0\"\nport = 9000\nseed = 5\nabandon_grace_seconds = 30\nlog_format = \"json\"\n",
        );
        std::env::set_var(CONFIG_ENV, file.path());
        std::env::set_var("GAMBIT_PORT", "9100");
        std::env::set_var("GAMBIT_SESSION_TIMEOUT_MINUTES", "5");

        let cli = CliArgs {
            seed: Some(99),
            ..CliArgs::default()
        };
        let resolved = load_with_sources(&cli).expect("load");
        clear_env();

        assert_eq!(resolved.config.host, "0.0.0.0");
        assert_eq!(resolved.sources.host, ValueSource::File);
        assert_eq!(resolved.config.port, 9100);
        assert_eq!(resolved.sources.port, ValueSource::Env);
        assert_eq!(resolved.config.seed, Some(99));
        assert_eq!(resolved.sources.seed, ValueSource::Cli);
        assert_eq!(resolved.config.log_format, LogFormat::Json);
        assert_eq!(resolved.config.settings.abandon_grace_seconds, 30);
        assert_eq!(resolved.config.settings.session_timeout_minutes, 5);
        assert_eq!(resolved.sources.session_timeout_minutes, ValueSource::Env);
    }

    #[test]
    #[serial]
    fn cli_config_path_wins_over_env() {
        clear_env();
        let from_env = config_file("port = 1111\n");
        let from_cli = config_file("port = 2222\n");
        std::env::set_var(CONFIG_ENV, from_env.path());

        let cli = CliArgs {
            config: Some(from_cli.path().to_path_buf()),
            ..CliArgs::default()
        };
        let config = load(&cli).expect("load");
        clear_env();
        assert_eq!(config.port, 2222);
    }

    #[test]
    #[serial]
    fn invalid_values_are_rejected() {
        clear_env();
        std::env::set_var("GAMBIT_PORT", "eighty");
        let err = load(&CliArgs::default()).expect_err("bad port");
        assert!(matches!(err, ConfigError::Invalid(_)));
        clear_env();

        std::env::set_var("GAMBIT_SESSION_TIMEOUT_MINUTES", "0");
        assert!(matches!(load(&CliArgs::default()), Err(ConfigError::Invalid(_))));
        clear_env();

        let file = config_file("port = \"not a number\"\n");
        std::env::set_var(CONFIG_ENV, file.path());
        assert!(matches!(load(&CliArgs::default()), Err(ConfigError::Parse(_))));
        clear_env();

        std::env::set_var(CONFIG_ENV, "/definitely/not/here.toml");
        assert!(matches!(load(&CliArgs::default()), Err(ConfigError::Io { .. })));
        clear_env();
    }

    #[test]
    fn cli_flags_parse() {
        let cli = CliArgs::try_parse_from([
            "gambit-server",
            "--port",
            "3000",
            "--log-format",
            "json",
            "--seed",
            "4",
        ])
        .expect("parse");
        assert_eq!(cli.port, Some(3000));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.seed, Some(4));
        assert!(CliArgs::try_parse_from(["gambit-server", "--port", "x"]).is_err());
    }
}

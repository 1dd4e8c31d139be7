//! Load config from file and environment.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use parcel_core::ProtocolConfig;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/parcel/config.toml or /etc/parcel/config.toml.
/// Env overrides: PARCEL_PORT, PARCEL_BIND, PARCEL_OUTPUT_DIR, PARCEL_CHUNK_SIZE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the receiver listens on (default 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Receiver TCP port, also the default port for `send` and `ping` (default 45680).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where received files are stored (default: current directory).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    45680
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            output_dir: default_output_dir(),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Load config: defaults, then the config file, then env vars. An explicit `path` must exist
/// and parse; the default locations are skipped when absent. The result is validated.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let c = match path {
        Some(p) => parse_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => parse_file(&p)?,
            None => Config::default(),
        },
    };
    finish(c, |key| std::env::var(key).ok())
}

fn finish(mut c: Config, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    apply_env(&mut c, var);
    c.protocol.validate().context("invalid protocol settings")?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/parcel/config.toml"));
    }
    out.push(PathBuf::from("/etc/parcel/config.toml"));
    out
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let c = toml::from_str::<Config>(&s)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(c)
}

/// Apply env overrides. Values that do not parse are ignored with a warning.
fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = parsed(&var, "PARCEL_PORT") {
        c.port = p;
    }
    if let Some(b) = parsed(&var, "PARCEL_BIND") {
        c.bind = b;
    }
    if let Some(d) = var("PARCEL_OUTPUT_DIR") {
        c.output_dir = PathBuf::from(d);
    }
    if let Some(n) = parsed(&var, "PARCEL_CHUNK_SIZE") {
        c.protocol.chunk_size = n;
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let s = var(key)?;
    match s.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={s:?}: not a valid value");
            None
        }
    }
}

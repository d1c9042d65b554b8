// =============================================================================
// Engine Configuration — INI file with environment credential overrides
// =============================================================================
//
// The config file is plain INI: `[section]` headers, `key = value` pairs,
// `#` comments, whitespace trimmed. Only the `[fix]` and `[dashboard]`
// sections are meaningful to the engine.
//
// Credentials may be supplied via CHIMERA_FIX_USERNAME / CHIMERA_FIX_PASSWORD
// so they never have to live in the file.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

/// FIX connectivity settings (`[fix]` section).
#[derive(Debug, Clone, Serialize)]
pub struct FixConfig {
    pub host: String,
    /// Quote-session port.
    pub port: u16,
    /// Order-execution session port.
    pub trade_port: u16,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub target_sub_id: String,
    #[serde(skip_serializing)]
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Heartbeat interval in seconds (tag 108).
    pub heartbeat_interval: u32,
    /// Request a sequence reset (141=Y) at logon.
    pub reset_seq_num: bool,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            trade_port: 0,
            sender_comp_id: String::new(),
            target_comp_id: String::new(),
            target_sub_id: String::new(),
            username: String::new(),
            password: String::new(),
            heartbeat_interval: 30,
            reset_seq_num: true,
        }
    }
}

/// Dashboard settings (`[dashboard]` section). The dashboard server itself is
/// a separate process; the engine only echoes the port so operators can find
/// it from the engine logs.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardConfig {
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { port: 7777 }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineConfig {
    pub fix: FixConfig,
    pub dashboard: DashboardConfig,
}

impl EngineConfig {
    /// Load and validate a config file.
    ///
    /// Fails when the file is unreadable, or when `host`, `port` or
    /// `trade_port` are missing — there is no useful degraded mode without a
    /// broker endpoint.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut config = Self::parse(&raw)?;
        config.apply_env_overrides();
        config.validate()?;

        info!(
            path = %path.display(),
            host = %config.fix.host,
            quote_port = config.fix.port,
            trade_port = config.fix.trade_port,
            heartbeat = config.fix.heartbeat_interval,
            "config loaded"
        );
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self> {
        let mut config = EngineConfig::default();
        let mut section = String::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_ascii_lowercase();
                continue;
            }

            let Some(eq) = line.find('=') else {
                continue;
            };
            let key = line[..eq].trim();
            let val = line[eq + 1..].trim();

            match section.as_str() {
                "fix" => config.apply_fix_key(key, val)?,
                "dashboard" => {
                    if key == "port" {
                        config.dashboard.port = parse_num(key, val)?;
                    }
                }
                _ => {}
            }
        }

        Ok(config)
    }

    fn apply_fix_key(&mut self, key: &str, val: &str) -> Result<()> {
        match key {
            "host" => self.fix.host = val.to_string(),
            "port" => self.fix.port = parse_num(key, val)?,
            "trade_port" => self.fix.trade_port = parse_num(key, val)?,
            "sender_comp_id" => self.fix.sender_comp_id = val.to_string(),
            "target_comp_id" => self.fix.target_comp_id = val.to_string(),
            "target_sub_id" => self.fix.target_sub_id = val.to_string(),
            "username" => self.fix.username = val.to_string(),
            "password" => self.fix.password = val.to_string(),
            "heartbeat_interval" => self.fix.heartbeat_interval = parse_num(key, val)?,
            "reset_seq_num" => {
                self.fix.reset_seq_num = matches!(val, "true" | "yes" | "1" | "Y" | "y")
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("CHIMERA_FIX_USERNAME") {
            self.fix.username = user;
        }
        if let Ok(pass) = std::env::var("CHIMERA_FIX_PASSWORD") {
            self.fix.password = pass;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fix.host.is_empty() {
            bail!("config: [fix] host is required");
        }
        if self.fix.port == 0 {
            bail!("config: [fix] port is required");
        }
        if self.fix.trade_port == 0 {
            bail!("config: [fix] trade_port is required");
        }
        if self.fix.heartbeat_interval == 0 {
            bail!("config: [fix] heartbeat_interval must be > 0");
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.parse::<T>()
        .map_err(|_| anyhow::anyhow!("config: invalid value {val:?} for key {key:?}"))
}

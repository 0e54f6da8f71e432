use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, ensure};

pub const ADDR_ENV: &str = "BANK_LEDGER_ADDR";
pub const MAX_FRAME_ENV: &str = "BANK_LEDGER_MAX_FRAME";
pub const READ_TIMEOUT_ENV: &str = "BANK_LEDGER_READ_TIMEOUT_SECS";

const DEFAULT_ADDR: &str = "127.0.0.1:1337";
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound for a single request payload, for every transport.
    pub max_frame_bytes: usize,
    /// A connection that sends nothing for this long is closed.
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1337)),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// An explicit address argument wins over the environment.
    pub fn from_env(addr_arg: Option<&str>) -> Result<Self> {
        Self::resolve(addr_arg, |name| std::env::var(name).ok())
    }

    fn resolve(addr_arg: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let addr_env = env(ADDR_ENV);
        let addr = addr_arg.or(addr_env.as_deref()).unwrap_or(DEFAULT_ADDR);
        let bind_addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address `{addr}`"))?;

        let max_frame_bytes = match env(MAX_FRAME_ENV) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("Invalid {MAX_FRAME_ENV} value `{raw}`"))?,
            None => DEFAULT_MAX_FRAME_BYTES,
        };

        let read_timeout = match env(READ_TIMEOUT_ENV) {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .with_context(|| format!("Invalid {READ_TIMEOUT_ENV} value `{raw}`"))?;
                // a zero timeout is rejected by `set_read_timeout`
                ensure!(secs > 0, "{READ_TIMEOUT_ENV} must be at least 1 second");
                Duration::from_secs(secs)
            }
            None => DEFAULT_READ_TIMEOUT,
        };

        Ok(Self {
            bind_addr,
            max_frame_bytes,
            read_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(addr_arg: Option<&str>, vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        ServerConfig::resolve(addr_arg, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        assert_eq!(resolve(None, &[]).unwrap(), ServerConfig::default());
    }

    #[test]
    fn argument_wins_over_environment() {
        let config = resolve(
            Some("0.0.0.0:9000"),
            &[
                (ADDR_ENV, "127.0.0.1:1"),
                (MAX_FRAME_ENV, "64"),
                (READ_TIMEOUT_ENV, "5"),
            ],
        )
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_frame_bytes, 64);
        assert_eq!(config.read_timeout, Duration::from_secs(5));

        let config = resolve(None, &[(ADDR_ENV, "127.0.0.1:1")]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:1".parse::<SocketAddr>().unwrap());
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = resolve(Some("nowhere"), &[]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid bind address `nowhere`");
        let err = resolve(None, &[(MAX_FRAME_ENV, "lots")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid BANK_LEDGER_MAX_FRAME value `lots`");
        let err = resolve(None, &[(READ_TIMEOUT_ENV, "soon")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid BANK_LEDGER_READ_TIMEOUT_SECS value `soon`"
        );
        let err = resolve(None, &[(READ_TIMEOUT_ENV, "0")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "BANK_LEDGER_READ_TIMEOUT_SECS must be at least 1 second"
        );
    }
}

use std::{fmt, net::{IpAddr, SocketAddr}, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_CLIENT_URL: &str = "http://localhost:5173";
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTBOX_CAPACITY: usize = 256;
const DEFAULT_HUB_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Browser origin allowed to open relay sockets; `*` allows any.
    pub client_url: String,
    pub handshake_timeout: Duration,
    pub outbox_capacity: usize,
    /// Depth of the shared inbound command queue feeding the hub.
    pub hub_capacity: usize,
    pub report_errors: bool,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or(anyhow!("JWT_SECRET is not set"))?;

        let host: IpAddr = parse_or(&lookup, "HOST", DEFAULT_HOST.parse()?)?;
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let handshake_timeout = Duration::from_secs(
            parse_or(&lookup, "HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT_SECS)?
        );

        let outbox_capacity = parse_or(&lookup, "OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY)?;
        if outbox_capacity == 0 {
            bail!("OUTBOX_CAPACITY must be greater than zero");
        }

        let hub_capacity = parse_or(&lookup, "HUB_QUEUE_CAPACITY", DEFAULT_HUB_CAPACITY)?;
        if hub_capacity == 0 {
            bail!("HUB_QUEUE_CAPACITY must be greater than zero");
        }

        let report_errors = match lookup("REPORT_EVENT_ERRORS") {
            None => false,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => bail!("REPORT_EVENT_ERRORS: expected a boolean, got {raw:?}"),
            },
        };

        Ok(
            Config {
                bind_addr: SocketAddr::new(host, port),
                jwt_secret,
                client_url: lookup("CLIENT_URL").unwrap_or(DEFAULT_CLIENT_URL.to_owned()),
                handshake_timeout,
                outbox_capacity,
                hub_capacity,
                report_errors,
            }
        )
    }

    /// Defaults for everything except the signing secret.
    pub fn with_secret(secret: impl Into<String>) -> Config {
        Config {
            bind_addr: SocketAddr::new([0, 0, 0, 0].into(), DEFAULT_PORT),
            jwt_secret: secret.into(),
            client_url: DEFAULT_CLIENT_URL.to_owned(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            hub_capacity: DEFAULT_HUB_CAPACITY,
            report_errors: false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"<redacted>")
            .field("client_url", &self.client_url)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("outbox_capacity", &self.outbox_capacity)
            .field("hub_capacity", &self.hub_capacity)
            .field("report_errors", &self.report_errors)
            .finish()
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key}: invalid value {raw:?}")),
        None => Ok(default),
    }
}

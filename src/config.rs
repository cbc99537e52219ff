//! Server configuration
//!
//! Loads configuration from environment variables, optionally pre-populated
//! from a `.env` file.

use anyhow::Result;
use std::env;
use std::time::Duration;

/// ICE/TURN/NAT settings, grouped since they're only consumed when building
/// the `webrtc::SettingEngine` / `RTCConfiguration`.
#[derive(Debug, Clone, Default)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<String>,
    pub turn_servers_internal: Vec<String>,
    pub stun_servers_internal: Vec<String>,
    pub turn_server_auth_secret: Option<String>,
    pub nat_1to1_ips: Vec<String>,
    pub include_public_ip_in_nat_1to1_ip: bool,
    pub nat_ice_candidate_type_srflx: bool,
    pub udp_mux_port: Option<u16>,
    pub udp_mux_port_whip: Option<u16>,
    pub udp_mux_port_whep: Option<u16>,
    pub tcp_mux_address: Option<String>,
    pub tcp_mux_force: bool,
    pub network_types: Option<String>,
    pub interface_filter: Option<String>,
    pub include_loopback_candidate: bool,
}

/// Chat engine tuning, mirroring `CHAT_MAX_HISTORY` / `CHAT_DEFAULT_TTL` / `CHAT_CLEANUP_INTERVAL`.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub max_history: usize,
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            default_ttl: Duration::from_secs(72 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address, e.g. `0.0.0.0:8080`.
    pub http_address: String,

    /// Serve HTTPS using `ssl_cert`/`ssl_key` instead of plain HTTP.
    pub use_ssl: bool,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,

    /// Redirect plain HTTP to HTTPS on this port when `use_ssl` is set.
    pub enable_http_redirect: bool,
    pub https_redirect_port: Option<u16>,

    /// Directory of `<streamKey>_<token>` stream authorization profiles.
    pub stream_profile_path: String,
    /// `strict` rejects unknown stream keys; default is permissive.
    pub stream_profile_policy_strict: bool,

    pub ice: IceConfig,
    pub chat: ChatConfig,

    /// Disables the public `/api/status` listing endpoint (503 when set).
    pub disable_status: bool,
    pub enable_profiling: bool,
    pub frontend_admin_token: Option<String>,
    pub webhook_url: Option<String>,
}

fn env_bool(key: &str) -> bool {
    env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|v| v.split('|').map(str::to_string).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn env_duration(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| humantime_parse(&v))
        .unwrap_or(default)
}

/// Minimal `1h`/`90m`/`30s` duration parser so the chat TTL knobs don't need
/// a dependency beyond what the rest of the stack already pulls in.
fn humantime_parse(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let n: u64 = num.parse().ok()?;
    let secs = match unit {
        "s" | "" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let ice = IceConfig {
            stun_servers: env_list("STUN_SERVERS"),
            turn_servers: env_list("TURN_SERVERS"),
            turn_servers_internal: env_list("TURN_SERVERS_INTERNAL"),
            stun_servers_internal: env_list("STUN_SERVERS_INTERNAL"),
            turn_server_auth_secret: env::var("TURN_SERVER_AUTH_SECRET").ok(),
            nat_1to1_ips: env_list("NAT_1_TO_1_IP"),
            include_public_ip_in_nat_1to1_ip: env_bool("INCLUDE_PUBLIC_IP_IN_NAT_1_TO_1_IP"),
            nat_ice_candidate_type_srflx: env::var("NAT_ICE_CANDIDATE_TYPE")
                .map(|v| v.eq_ignore_ascii_case("srflx"))
                .unwrap_or(false),
            udp_mux_port: env::var("UDP_MUX_PORT").ok().and_then(|v| v.parse().ok()),
            udp_mux_port_whip: env::var("UDP_MUX_PORT_WHIP").ok().and_then(|v| v.parse().ok()),
            udp_mux_port_whep: env::var("UDP_MUX_PORT_WHEP").ok().and_then(|v| v.parse().ok()),
            tcp_mux_address: env::var("TCP_MUX_ADDRESS").ok(),
            tcp_mux_force: env_bool("TCP_MUX_FORCE"),
            network_types: env::var("NETWORK_TYPES").ok(),
            interface_filter: env::var("INTERFACE_FILTER").ok(),
            include_loopback_candidate: env_bool("INCLUDE_LOOPBACK_CANDIDATE"),
        };

        let chat = ChatConfig {
            max_history: env::var("CHAT_MAX_HISTORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            default_ttl: env_duration("CHAT_DEFAULT_TTL", Duration::from_secs(72 * 3600)),
            cleanup_interval: env_duration("CHAT_CLEANUP_INTERVAL", Duration::from_secs(3600)),
        };

        Ok(Self {
            http_address: env::var("HTTP_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            use_ssl: env_bool("USE_SSL"),
            ssl_cert: env::var("SSL_CERT").ok(),
            ssl_key: env::var("SSL_KEY").ok(),
            enable_http_redirect: env_bool("ENABLE_HTTP_REDIRECT"),
            https_redirect_port: env::var("HTTPS_REDIRECT_PORT").ok().and_then(|v| v.parse().ok()),
            stream_profile_path: env::var("STREAM_PROFILE_PATH").unwrap_or_else(|_| "profiles".into()),
            stream_profile_policy_strict: env::var("STREAM_PROFILE_POLICY")
                .map(|v| v.eq_ignore_ascii_case("strict"))
                .unwrap_or(false),
            ice,
            chat,
            disable_status: env_bool("DISABLE_STATUS"),
            enable_profiling: env_bool("ENABLE_PROFILING"),
            frontend_admin_token: env::var("FRONTEND_ADMIN_TOKEN").ok(),
            webhook_url: env::var("WEBHOOK_URL").ok(),
        })
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            http_address: "127.0.0.1:8080".into(),
            use_ssl: false,
            ssl_cert: None,
            ssl_key: None,
            enable_http_redirect: false,
            https_redirect_port: None,
            stream_profile_path: "profiles".into(),
            stream_profile_policy_strict: false,
            ice: IceConfig::default(),
            chat: ChatConfig::default(),
            disable_status: false,
            enable_profiling: false,
            frontend_admin_token: None,
            webhook_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing_units() {
        assert_eq!(humantime_parse("30s"), Some(Duration::from_secs(30)));
        assert_eq!(humantime_parse("5m"), Some(Duration::from_secs(300)));
        assert_eq!(humantime_parse("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(humantime_parse("3d"), Some(Duration::from_secs(3 * 86400)));
        assert_eq!(humantime_parse("bogus"), None);
    }

    #[test]
    fn default_for_test_is_permissive() {
        let cfg = Config::default_for_test();
        assert!(!cfg.stream_profile_policy_strict);
        assert_eq!(cfg.chat.max_history, 10_000);
    }
}

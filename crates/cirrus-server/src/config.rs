//! Server configuration loaded from environment variables.
//!
//! Every setting has a default, so a bare `cirrus-server` starts a standalone
//! node with no network authentication configured.
//!
//! | Variable                | Default                          | Description                               |
//! |-------------------------|----------------------------------|-------------------------------------------|
//! | `CIRRUS_NODE_NAME`      | `cirrus-0`                       | Name this node joins the cluster under    |
//! | `CIRRUS_LISTEN_ADDR`    | `[::]:9443`                      | Network API listen address                |
//! | `CIRRUS_ADVERTISE_ADDR` | listen address                   | Address sent to backends when joining     |
//! | `CIRRUS_CONTROL_SOCKET` | `/var/lib/cirrus/control.socket` | Local unauthenticated control socket      |
//! | `CIRRUS_AUTH_SECRET`    | unset                            | Secret shared with peers at discovery     |
//! | `CIRRUS_LOG_LEVEL`      | `info`                           | tracing filter (trace/debug/info/warn/error) |

use std::path::PathBuf;

use cirrus_cluster::AuthSecret;

/// Runtime configuration for the cirrus server process.
#[derive(Debug)]
pub struct Config {
    pub node_name: String,

    /// Network listener for peer and operator traffic.
    pub listen_addr: String,

    /// Address advertised to backends. Falls back to `listen_addr`.
    pub advertise_addr: String,

    /// Unix socket for local callers. Requests on it bypass authentication.
    pub control_socket: PathBuf,

    /// `None` until discovery hands this node a secret; network requests are
    /// then rejected as unconfigured.
    pub auth_secret: Option<AuthSecret>,

    /// Tracing filter string, e.g. `"cirrus_server=debug,info"`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables, applying defaults where
    /// a variable is absent or empty.
    pub fn from_env() -> Self {
        let listen_addr = env_str("CIRRUS_LISTEN_ADDR", "[::]:9443");
        let advertise_addr = match env_str("CIRRUS_ADVERTISE_ADDR", "") {
            addr if addr.is_empty() => listen_addr.clone(),
            addr => addr,
        };

        Self {
            node_name:      env_str("CIRRUS_NODE_NAME", "cirrus-0"),
            listen_addr,
            advertise_addr,
            control_socket: PathBuf::from(env_str("CIRRUS_CONTROL_SOCKET", "/var/lib/cirrus/control.socket")),
            auth_secret:    env_opt("CIRRUS_AUTH_SECRET").map(AuthSecret::new),
            log_level:      env_str("CIRRUS_LOG_LEVEL", "info"),
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

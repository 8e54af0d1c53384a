use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use irc::{Codec, connection};
use serde::Deserialize;

use crate::{ctcp, environment};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    /// The client's nickname.
    pub nickname: String,
    /// Alternative nicknames for the client, if the default is taken.
    #[serde(default)]
    pub alt_nicks: Vec<String>,
    /// Prepended to the nickname once every alternative is taken.
    #[serde(default = "default_nick_prepend")]
    pub nick_prepend: char,
    /// The client's username.
    pub username: Option<String>,
    /// The client's real name.
    pub realname: Option<String>,
    /// The server to connect to.
    pub server: String,
    /// The port to connect on.
    #[serde(default = "default_tls_port")]
    pub port: u16,
    /// The password to connect to the server.
    pub password: Option<String>,
    /// A list of channels to join on connection.
    #[serde(default)]
    pub channels: Vec<String>,
    /// A mapping of channel names to keys for join-on-connect.
    #[serde(default)]
    pub channel_keys: HashMap<String, String>,
    /// Commands sent after registration, e.g. `/msg NickServ IDENTIFY pass`.
    #[serde(default)]
    pub on_connect: Vec<String>,
    /// The amount of inactivity in seconds before the client will ping the server.
    #[serde(default = "default_ping_time")]
    pub ping_time: u64,
    /// The amount of time in seconds to wait for a ping response before giving up.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    /// The amount of time in seconds to wait for the socket and TLS handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// The amount of time in seconds before attempting to reconnect to the server when disconnected.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    /// Whether or not to use TLS.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// On `true`, all certificate validations are skipped. Defaults to `false`.
    #[serde(default)]
    pub dangerously_accept_invalid_certs: bool,
    /// The path to the root TLS certificate for this server in PEM format.
    pub root_cert_path: Option<PathBuf>,
    /// Client certificate and key for CertFP.
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Encoding used for lines that are not valid UTF-8.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub flood: Flood,
    #[serde(default)]
    pub ctcp: Ctcp,
}

impl Server {
    pub fn new(server: &str, port: u16, nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            server: server.to_string(),
            port,
            use_tls: false,
            ..Self::default()
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }

    pub fn ping_time(&self) -> Duration {
        Duration::from_secs(self.ping_time)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }

    pub fn codec(&self) -> Codec {
        Codec::with_label(&self.encoding).unwrap_or_default()
    }

    pub fn connection(&self) -> connection::Config<'_> {
        let security = if self.use_tls {
            connection::Security::Secured {
                accept_invalid_certs: self.dangerously_accept_invalid_certs,
                root_cert_path: self.root_cert_path.as_ref(),
                client_cert_path: self.client_cert_path.as_ref(),
                client_key_path: self.client_key_path.as_ref(),
            }
        } else {
            connection::Security::Unsecured
        };

        connection::Config {
            server: &self.server,
            port: self.port,
            security,
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.nickname.is_empty() {
            return Err("nickname must not be empty".to_string());
        }
        if self.server.is_empty() {
            return Err("server must not be empty".to_string());
        }
        if Codec::with_label(&self.encoding).is_none() {
            return Err(format!("unknown encoding {:?}", self.encoding));
        }
        if self.flood.burst == 0 {
            return Err("flood burst must be at least 1".to_string());
        }

        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            nickname: String::default(),
            alt_nicks: Vec::default(),
            nick_prepend: default_nick_prepend(),
            username: Option::default(),
            realname: Option::default(),
            server: String::default(),
            port: default_tls_port(),
            password: Option::default(),
            channels: Vec::default(),
            channel_keys: HashMap::default(),
            on_connect: Vec::default(),
            ping_time: default_ping_time(),
            ping_timeout: default_ping_timeout(),
            connect_timeout: default_connect_timeout(),
            reconnect_delay: default_reconnect_delay(),
            use_tls: default_use_tls(),
            dangerously_accept_invalid_certs: false,
            root_cert_path: Option::default(),
            client_cert_path: Option::default(),
            client_key_path: Option::default(),
            encoding: default_encoding(),
            flood: Flood::default(),
            ctcp: Ctcp::default(),
        }
    }
}

/// Outbound pacing: `burst` lines at once, then one more every `interval_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Flood {
    pub burst: usize,
    pub interval_ms: u64,
}

impl Flood {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for Flood {
    fn default() -> Self {
        Self {
            burst: 5,
            interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Ctcp {
    pub ping: bool,
    pub time: bool,
    pub version: bool,
    pub clientinfo: bool,
    /// Replaces the default VERSION reply.
    pub version_reply: Option<String>,
}

impl Default for Ctcp {
    fn default() -> Self {
        Self {
            ping: true,
            time: true,
            version: true,
            clientinfo: true,
            version_reply: None,
        }
    }
}

impl Ctcp {
    pub fn replies(&self) -> ctcp::Replies {
        ctcp::Replies {
            version: self.version.then(|| {
                self.version_reply
                    .clone()
                    .unwrap_or_else(environment::formatted_version)
            }),
            ping: self.ping,
            time: self.time,
            clientinfo: self.clientinfo,
        }
    }
}

fn default_nick_prepend() -> char {
    '_'
}

fn default_use_tls() -> bool {
    true
}

fn default_tls_port() -> u16 {
    6697
}

fn default_ping_time() -> u64 {
    180
}

fn default_ping_timeout() -> u64 {
    20
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_encoding() -> String {
    "windows-1252".to_string()
}

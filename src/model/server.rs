//! [`NewsServer`] — the runtime entity C3 (server pool) allocates
//! connections against, built from the operator-supplied `ServerConfig`.

use super::ids::ServerId;

/// A configured remote NNTP server.
#[derive(Clone, Debug)]
pub struct NewsServer {
    pub id: ServerId,
    /// Fallback tier: 0 = primary, higher = tried only after lower levels
    /// are exhausted for a given article.
    pub level: i32,
    /// Servers sharing a `group` within a `level` are alternatives for the
    /// same source and are tried in declared order before moving levels.
    pub group: i32,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    pub active: bool,
    /// If true, this server being fully unreachable does not block level
    /// escalation from waiting on it.
    pub optional: bool,
}

impl NewsServer {
    /// `host:port` used in log lines and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

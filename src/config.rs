/// Server configuration. Mirrors the recognized knobs from the original
/// `ews_config_t`: idle timeout plus per-protocol listen port/backlog.
/// `<= 0` fields normalize to a built-in default, matching `ews_init`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Idle timeout in milliseconds; 0 disables idle reaping.
    pub idle_timeout: u32,

    pub http_listen_port: u16,
    pub http_listen_backlog: i32,

    pub https_listen_port: u16,
    pub https_listen_backlog: i32,
    pub https_crt: Option<Vec<u8>>,
    pub https_pk: Option<Vec<u8>>,

    /// Size of the fixed HTTP client slot array. Stands in for the
    /// original's compile-time `CONFIG_EWS_HTTP_CLIENTS`.
    pub max_http_clients: usize,
    /// Size of the fixed HTTPS client slot array.
    pub max_https_clients: usize,
}

pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTP_BACKLOG: i32 = 16;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_HTTPS_BACKLOG: i32 = 16;
pub const DEFAULT_MAX_HTTP_CLIENTS: usize = 32;
pub const DEFAULT_MAX_HTTPS_CLIENTS: usize = 32;

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            http_listen_port: DEFAULT_HTTP_PORT,
            http_listen_backlog: DEFAULT_HTTP_BACKLOG,
            https_listen_port: DEFAULT_HTTPS_PORT,
            https_listen_backlog: DEFAULT_HTTPS_BACKLOG,
            https_crt: None,
            https_pk: None,
            max_http_clients: DEFAULT_MAX_HTTP_CLIENTS,
            max_https_clients: DEFAULT_MAX_HTTPS_CLIENTS,
        }
    }
}

impl Config {
    /// Apply the original's "non-positive means default" normalization.
    pub fn normalized(mut self) -> Self {
        if self.http_listen_port == 0 {
            self.http_listen_port = DEFAULT_HTTP_PORT;
        }
        if self.http_listen_backlog <= 0 {
            self.http_listen_backlog = DEFAULT_HTTP_BACKLOG;
        }
        if self.https_listen_port == 0 {
            self.https_listen_port = DEFAULT_HTTPS_PORT;
        }
        if self.https_listen_backlog <= 0 {
            self.https_listen_backlog = DEFAULT_HTTPS_BACKLOG;
        }
        if self.max_http_clients == 0 {
            self.max_http_clients = DEFAULT_MAX_HTTP_CLIENTS;
        }
        if self.max_https_clients == 0 {
            self.max_https_clients = DEFAULT_MAX_HTTPS_CLIENTS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_port_normalizes_to_default() {
        let cfg = Config {
            http_listen_port: 0,
            http_listen_backlog: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.http_listen_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.http_listen_backlog, DEFAULT_HTTP_BACKLOG);
    }

    #[test]
    fn positive_values_survive() {
        let cfg = Config {
            http_listen_port: 8080,
            http_listen_backlog: 64,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.http_listen_port, 8080);
        assert_eq!(cfg.http_listen_backlog, 64);
    }
}

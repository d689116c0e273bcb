//! Application configuration loaded from environment variables.

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `8000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `BACKEND_URL` — public base URL of this service, used to build the
///   gateway redirect (default: `"http://localhost:8000"`)
/// - `FRONTEND_URL` — base URL the callback redirects buyers to
///   (default: `"http://localhost:3000"`)
/// - `RESERVATION_HOLD_HOURS` — payment deadline window (default: `24`)
/// - `SWEEP_INTERVAL_SECS` — expiry sweeper tick (default: `60`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub backend_url: String,
    pub frontend_url: String,
    pub hold_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            hold_hours: std::env::var("RESERVATION_HOLD_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(24),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the callback URL registered with the gateway.
    pub fn callback_base(&self) -> String {
        format!("{}/payments/callback", self.backend_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            backend_url: "http://localhost:8000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            hold_hours: 24,
            sweep_interval_secs: 60,
        }
    }
}

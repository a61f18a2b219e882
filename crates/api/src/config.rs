use relay_core::broker::DEFAULT_MAX_IMAGE_BYTES;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted input image (default: 20 MiB).
    pub max_image_bytes: usize,
    /// Queued or running jobs older than this are expired (default: `900`).
    pub job_max_age_secs: u64,
    /// Reaper tick (default: `30`).
    pub sweep_interval_secs: u64,
    /// Finished jobs are dropped this long after finishing (default: `3600`).
    pub job_retention_secs: u64,
    /// Run a worker loop inside the broker process (default: `false`).
    pub embedded_worker: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default    |
    /// |------------------------|------------|
    /// | `HOST`                 | `0.0.0.0`  |
    /// | `PORT`                 | `8080`     |
    /// | `CORS_ORIGINS`         | `*`        |
    /// | `REQUEST_TIMEOUT_SECS` | `30`       |
    /// | `MAX_IMAGE_BYTES`      | `20971520` |
    /// | `JOB_MAX_AGE_SECS`     | `900`      |
    /// | `SWEEP_INTERVAL_SECS`  | `30`       |
    /// | `JOB_RETENTION_SECS`   | `3600`     |
    /// | `EMBEDDED_WORKER`      | `false`    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_image_bytes: usize = std::env::var("MAX_IMAGE_BYTES")
            .map(|v| v.parse().expect("MAX_IMAGE_BYTES must be a valid usize"))
            .unwrap_or(DEFAULT_MAX_IMAGE_BYTES);

        let job_max_age_secs: u64 = std::env::var("JOB_MAX_AGE_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("JOB_MAX_AGE_SECS must be a valid u64");

        let sweep_interval_secs = parse_positive_secs(
            "SWEEP_INTERVAL_SECS",
            &std::env::var("SWEEP_INTERVAL_SECS").unwrap_or_else(|_| "30".into()),
        );

        let job_retention_secs: u64 = std::env::var("JOB_RETENTION_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("JOB_RETENTION_SECS must be a valid u64");

        let embedded_worker = std::env::var("EMBEDDED_WORKER")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_image_bytes,
            job_max_age_secs,
            sweep_interval_secs,
            job_retention_secs,
            embedded_worker,
        }
    }
}

/// Parse a seconds value that must be at least 1. Panics with the variable
/// name otherwise, like the other startup checks.
fn parse_positive_secs(name: &str, raw: &str) -> u64 {
    let secs: u64 = raw
        .trim()
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid u64"));
    if secs == 0 {
        panic!("{name} must be at least 1");
    }
    secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_accepts_positive_seconds() {
        assert_eq!(parse_positive_secs("SWEEP_INTERVAL_SECS", "30"), 30);
        assert_eq!(parse_positive_secs("SWEEP_INTERVAL_SECS", " 1 "), 1);
    }

    #[test]
    #[should_panic(expected = "SWEEP_INTERVAL_SECS must be at least 1")]
    fn zero_sweep_interval_is_rejected() {
        parse_positive_secs("SWEEP_INTERVAL_SECS", "0");
    }

    #[test]
    #[should_panic(expected = "SWEEP_INTERVAL_SECS must be a valid u64")]
    fn malformed_sweep_interval_is_rejected() {
        parse_positive_secs("SWEEP_INTERVAL_SECS", "soon");
    }
}

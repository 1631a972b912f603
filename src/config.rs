use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Key the admin API requires in X-Admin-Key. Unset = every admin
    /// request is refused.
    pub admin_key: Option<String>,
    /// Comma-separated webhook URLs notified by the capacity watcher.
    pub webhook_urls: Vec<String>,
    /// Shared secret for signing webhook payloads.
    pub webhook_secret: Option<String>,
    /// Percent of capacity at which the watcher starts warning.
    /// Set via PAYRELAY_CAPACITY_WARN_PCT. Default: 90.
    pub capacity_warn_pct: u32,
    /// Seconds between capacity watcher sweeps. 0 disables the job.
    /// Set via PAYRELAY_WATCH_INTERVAL_SECS. Default: 300.
    pub watch_interval_secs: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("PAYRELAY_ADMIN_KEY").ok();
    if admin_key.is_none() {
        let env_mode = std::env::var("PAYRELAY_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "PAYRELAY_ADMIN_KEY is not set. \
                 Set it before running in production."
            );
        }
        eprintln!("⚠️  PAYRELAY_ADMIN_KEY is not set — the admin API will refuse every request.");
    }

    Ok(Config {
        port: std::env::var("PAYRELAY_PORT")
            .unwrap_or_else(|_| "8088".into())
            .parse()
            .unwrap_or(8088),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/payrelay".into()),
        admin_key,
        webhook_urls: std::env::var("PAYRELAY_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: std::env::var("PAYRELAY_WEBHOOK_SECRET").ok(),
        capacity_warn_pct: std::env::var("PAYRELAY_CAPACITY_WARN_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90),
        watch_interval_secs: std::env::var("PAYRELAY_WATCH_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    })
}

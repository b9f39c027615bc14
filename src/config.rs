use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Allowed CORS origins (comma-separated). Use "*" for any origin (development only).
    pub cors_origins: Vec<String>,
    pub spotify: SpotifyConfig,
    pub lastfm: LastFmConfig,
    /// Upper bound for every outbound provider request, independent of shutdown
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub accounts_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct LastFmConfig {
    pub api_key: String,
    pub secret: String,
    pub api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:8000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let http_timeout_secs: u64 = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a number of seconds: {}", e))?;

        let spotify = SpotifyConfig {
            client_id: env::var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            api_url: env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com".to_string()),
            accounts_url: env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".to_string()),
        };

        if spotify.client_id.is_empty() || spotify.client_secret.is_empty() {
            tracing::warn!("SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET not set, token refresh will fail");
        }

        let lastfm = LastFmConfig {
            api_key: env::var("LASTFM_API_KEY").unwrap_or_default(),
            secret: env::var("LASTFM_SECRET").unwrap_or_default(),
            api_url: env::var("LASTFM_API_URL")
                .unwrap_or_else(|_| "https://ws.audioscrobbler.com/2.0/".to_string()),
        };

        if lastfm.api_key.is_empty() {
            tracing::warn!("LASTFM_API_KEY not set, LastFM sessions will not poll successfully");
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://nowplaying.db?mode=rwc".to_string()),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
            cors_origins,
            spotify,
            lastfm,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

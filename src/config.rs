use regex::Regex;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,
    pub env_lower: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub http_timeout_secs: u64,

    pub db_url: String,
    pub db_schema: Option<String>,

    pub chapa_secret_key: String,
    pub chapa_base_url: String,
    pub public_base_url: String,
    pub default_currency: String,

    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub mail_from: String,

    pub allowed_origins: Vec<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_db_url(raw: &str) -> String {
    // Accept SQLAlchemy-style URLs like "postgresql+psycopg://..." by dropping
    // the "+driver" portion.
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("TRAVELSTAY_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let env_lower = env_name.trim().to_lowercase();

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8080")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("TRAVELSTAY_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| "postgresql://travelstay:travelstay@db:5432/travelstay".to_string());
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let prod_like = matches!(env_lower.as_str(), "prod" | "production" | "staging");

        let chapa_secret_key = env_opt("CHAPA_SECRET_KEY").unwrap_or_default();
        if prod_like && chapa_secret_key.is_empty() {
            return Err("CHAPA_SECRET_KEY must be set in prod/staging".to_string());
        }
        if prod_like && chapa_secret_key.starts_with("CHASECK_TEST-") {
            return Err("CHAPA_SECRET_KEY must not be a test key in prod/staging".to_string());
        }

        let chapa_base_url = env_or("CHAPA_BASE_URL", "https://api.chapa.co")
            .trim_end_matches('/')
            .to_string();
        if prod_like && !chapa_base_url.starts_with("https://") {
            return Err("CHAPA_BASE_URL must use https:// in prod/staging".to_string());
        }

        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:8080")
            .trim_end_matches('/')
            .to_string();
        if prod_like && !public_base_url.starts_with("https://") {
            return Err("PUBLIC_BASE_URL must use https:// in prod/staging".to_string());
        }

        let mut default_currency = env_or("DEFAULT_CURRENCY", "ETB").trim().to_uppercase();
        if default_currency.is_empty() {
            default_currency = "ETB".to_string();
        }
        if default_currency.len() > 3 {
            default_currency.truncate(3);
        }

        let smtp_host = env_opt("SMTP_HOST");
        let smtp_port: u16 = env_or("SMTP_PORT", "587")
            .parse()
            .map_err(|_| "SMTP_PORT must be a valid u16".to_string())?;
        let smtp_username = env_opt("SMTP_USERNAME").unwrap_or_default();
        let smtp_password = env_opt("SMTP_PASSWORD").unwrap_or_default();
        let mail_from = env_or("MAIL_FROM", "Travelstay <no-reply@travelstay.local>");
        if prod_like && smtp_host.is_none() {
            return Err("SMTP_HOST must be set in prod/staging".to_string());
        }

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like
            && allowed_origins
                .iter()
                .any(|o| !o.trim().starts_with("https://"))
        {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let max_body_bytes: usize = env_or("TRAVELSTAY_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "TRAVELSTAY_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let http_timeout_secs: u64 = env_or("HTTP_TIMEOUT_SECS", "20")
            .parse()
            .map_err(|_| "HTTP_TIMEOUT_SECS must be an integer".to_string())?;
        let http_timeout_secs = http_timeout_secs.clamp(1, 120);

        Ok(Self {
            env_name,
            env_lower,
            host,
            port,
            max_body_bytes,
            http_timeout_secs,
            db_url,
            db_schema,
            chapa_secret_key,
            chapa_base_url,
            public_base_url,
            default_currency,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            mail_from,
            allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let mut saved = Vec::with_capacity(keys.len());
            for k in keys {
                let existing = env::var(k).ok();
                saved.push((k.to_string(), existing));
                env::remove_var(k);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain(..) {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    const ALL_KEYS: &[&str] = &[
        "ENV",
        "TRAVELSTAY_DB_URL",
        "DB_URL",
        "DB_SCHEMA",
        "CHAPA_SECRET_KEY",
        "CHAPA_BASE_URL",
        "PUBLIC_BASE_URL",
        "DEFAULT_CURRENCY",
        "SMTP_HOST",
        "ALLOWED_ORIGINS",
        "TRAVELSTAY_MAX_BODY_BYTES",
        "HTTP_TIMEOUT_SECS",
    ];

    #[test]
    fn rejects_non_postgres_url() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var("TRAVELSTAY_DB_URL", "sqlite:////tmp/travelstay.db");

        let res = Config::from_env();
        assert!(res.is_err());
    }

    #[test]
    fn normalizes_sqlalchemy_style_scheme() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql+psycopg://u:p@localhost:5432/travelstay",
        );

        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.db_url, "postgresql://u:p@localhost:5432/travelstay");
    }

    #[test]
    fn prod_requires_gateway_secret() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var("ENV", "prod");
        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql://u:p@localhost:5432/travelstay",
        );
        env::set_var("PUBLIC_BASE_URL", "https://api.travelstay.example");
        env::set_var("ALLOWED_ORIGINS", "https://travelstay.example");
        env::set_var("SMTP_HOST", "smtp.travelstay.example");

        let err = Config::from_env().expect_err("missing gateway secret must be rejected");
        assert!(err.contains("CHAPA_SECRET_KEY"));
    }

    #[test]
    fn prod_rejects_test_gateway_key() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var("ENV", "prod");
        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql://u:p@localhost:5432/travelstay",
        );
        env::set_var("CHAPA_SECRET_KEY", "CHASECK_TEST-abc123");
        env::set_var("PUBLIC_BASE_URL", "https://api.travelstay.example");
        env::set_var("ALLOWED_ORIGINS", "https://travelstay.example");
        env::set_var("SMTP_HOST", "smtp.travelstay.example");

        let err = Config::from_env().expect_err("test key must be rejected in prod");
        assert!(err.contains("test key"));
    }

    #[test]
    fn prod_rejects_wildcard_origins() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var("ENV", "prod");
        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql://u:p@localhost:5432/travelstay",
        );
        env::set_var("CHAPA_SECRET_KEY", "CHASECK-live-0123456789");
        env::set_var("PUBLIC_BASE_URL", "https://api.travelstay.example");
        env::set_var("ALLOWED_ORIGINS", "*");
        env::set_var("SMTP_HOST", "smtp.travelstay.example");

        let err = Config::from_env().expect_err("wildcard origins must be rejected in prod");
        assert!(err.contains("ALLOWED_ORIGINS"));
    }

    #[test]
    fn body_limit_is_clamped_to_safe_bounds() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql://u:p@localhost:5432/travelstay",
        );

        env::set_var("TRAVELSTAY_MAX_BODY_BYTES", "1");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 16 * 1024);

        env::set_var("TRAVELSTAY_MAX_BODY_BYTES", "999999999");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn default_currency_is_uppercased_and_capped() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new(ALL_KEYS);

        env::set_var(
            "TRAVELSTAY_DB_URL",
            "postgresql://u:p@localhost:5432/travelstay",
        );
        env::set_var("DEFAULT_CURRENCY", "etbx");

        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.default_currency, "ETB");
    }
}

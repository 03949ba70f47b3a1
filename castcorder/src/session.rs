//! Credentials and cookie material carried into resolution and capture.
//!
//! Values are opaque: the recorder never inspects them beyond splitting the
//! cookie string into the form streamlink expects.

use std::fmt;

pub const ENV_USERNAME: &str = "TWITCASTING_USERNAME";
pub const ENV_PASSWORD: &str = "TWITCASTING_PASSWORD";
pub const ENV_PRIVATE_PASSWORD: &str = "PRIVATE_STREAM_PASSWORD";
pub const ENV_COOKIES: &str = "TWITCASTING_COOKIES";

/// Immutable credential bundle for one run.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Password for private (password-protected) broadcasts.
    pub private_password: Option<String>,
    /// Raw `name=value; name2=value2` cookie string.
    pub cookies: Option<String>,
    /// Stream URL supplied by the operator; bypasses liveness polling.
    pub manual_endpoint: Option<String>,
}

impl Session {
    /// Read credentials from the process environment.
    ///
    /// Blank values are treated as unset.
    pub fn from_env() -> Self {
        Self {
            username: env_non_empty(ENV_USERNAME),
            password: env_non_empty(ENV_PASSWORD),
            private_password: env_non_empty(ENV_PRIVATE_PASSWORD),
            cookies: env_non_empty(ENV_COOKIES),
            manual_endpoint: None,
        }
    }

    pub fn with_manual_endpoint(mut self, url: Option<String>) -> Self {
        self.manual_endpoint = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        self
    }

    pub fn with_private_password(mut self, password: impl Into<String>) -> Self {
        self.private_password = Some(password.into());
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    pub fn has_login(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Cookie string suitable for a `Cookie:` request header.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs = cookie_pairs(self.cookies.as_deref()?);
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Repeated `--http-cookie name=value` arguments for streamlink.
    pub fn cookie_args(&self) -> Vec<String> {
        let Some(raw) = self.cookies.as_deref() else {
            return Vec::new();
        };
        cookie_pairs(raw)
            .into_iter()
            .flat_map(|(k, v)| ["--http-cookie".to_string(), format!("{k}={v}")])
            .collect()
    }

    /// `--twitcasting-password` arguments when a private password is set.
    pub fn password_args(&self) -> Vec<String> {
        match &self.private_password {
            Some(pw) => vec!["--twitcasting-password".to_string(), pw.clone()],
            None => Vec::new(),
        }
    }
}

fn cookie_pairs(raw: &str) -> Vec<(&str, &str)> {
    raw.split(&[';', '\n'][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|kv| kv.split_once('=').map(|(k, v)| (k.trim(), v.trim())))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() { "<set>" } else { "<unset>" }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("private_password", &redact(&self.private_password))
            .field("cookies", &redact(&self.cookies))
            .field("manual_endpoint", &self.manual_endpoint)
            .finish()
    }
}

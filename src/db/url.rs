//! Connection URL construction.
//!
//! URLs have the form `dialect://[user[:password]@]host[:port]/database`. Absent
//! fields are left out entirely; a file-based target without a host renders with
//! an empty authority (`sqlite:///file.db`). The password is masked whenever the
//! URL is displayed or debug-printed.

use crate::error::{DbError, DbResult, FieldViolation};
use crate::models::ConnectionConfig;
use std::fmt;
use tracing::debug;
use url::Url;

const PASSWORD_MASK: &str = "***";

/// Canonical connection URL of one configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    url: Url,
}

impl ConnectionUrl {
    /// Build the URL from a validated configuration.
    ///
    /// Credentials and port need a host to attach to; without one they are left out
    /// of the URL (the engine still receives them).
    pub fn from_config(config: &ConnectionConfig) -> DbResult<Self> {
        let base = match config.host() {
            // IPv6 literals need brackets in the authority
            Some(host) if host.contains(':') && !host.starts_with('[') => {
                format!("{}://[{}]", config.dialect(), host)
            }
            Some(host) => format!("{}://{}", config.dialect(), host),
            None => format!("{}://", config.dialect()),
        };

        let mut url = Url::parse(&base).map_err(|e| {
            let field = if config.host().is_some() {
                "host"
            } else {
                "dialect"
            };
            DbError::invalid_configuration(
                config.name(),
                vec![FieldViolation::new(
                    field,
                    format!("cannot form a connection URL: {e}"),
                )],
            )
        })?;

        if config.host().is_none() {
            let omitted: Vec<&str> = [
                ("username", config.username().is_some()),
                ("password", config.password().is_some()),
                ("port", config.port().is_some()),
            ]
            .into_iter()
            .filter_map(|(field, present)| present.then_some(field))
            .collect();
            if !omitted.is_empty() {
                debug!(
                    connection = %config.name(),
                    omitted = ?omitted,
                    "No host in configuration, fields left out of the URL but passed to the engine"
                );
            }
        } else {
            // Setters only fail when the URL has no host, which was ruled out above
            if let Some(port) = config.port() {
                let _ = url.set_port(Some(port));
            }
            if let Some(username) = config.username() {
                let _ = url.set_username(username);
                if let Some(password) = config.password() {
                    let _ = url.set_password(Some(password));
                }
            }
        }

        url.set_path(&format!("/{}", config.database()));

        Ok(Self { url })
    }

    /// Full URL including the password. Contains sensitive data - never log.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// URL with the password replaced by `***`.
    pub fn masked(&self) -> String {
        if self.url.password().is_none() {
            return self.url.to_string();
        }
        let mut masked = self.url.clone();
        let _ = masked.set_password(Some(PASSWORD_MASK));
        masked.to_string()
    }

    /// The driver identifier (URL scheme).
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionUrl").field(&self.masked()).finish()
    }
}

//! # Connection String Parsing
//!
//! Purpose: Turn a connection string such as
//! `"cache-a:6379,cache-b:6380,password=secret,defaultDatabase=2"` into a
//! typed `ConnectionConfig`.
//!
//! ## Format
//! - Items are comma-separated; surrounding whitespace is ignored.
//! - Bare items are endpoints `host[:port]` (port defaults to 6379).
//! - `key=value` items set options; keys are case-insensitive:
//!   `password`, `user`, `defaultDatabase`, `name`, `ssl`, `syncTimeout`
//!   (milliseconds), `abortConnect` (accepted for compatibility, ignored).
//!
//! Anything else is rejected with `FkvError::IdentityInvalid`; a malformed
//! string is never worth retrying.

use std::time::Duration;

use fkv_common::{FkvError, FkvResult};

/// Port used when an endpoint omits one.
pub const DEFAULT_PORT: u16 = 6379;

/// One `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Address string accepted by `ToSocketAddrs`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    /// Endpoints tried in order until one accepts the connection.
    pub endpoints: Vec<Endpoint>,
    /// Optional ACL user sent with `AUTH`.
    pub user: Option<String>,
    /// Optional password sent with `AUTH`.
    pub password: Option<String>,
    /// Database selected after connecting.
    pub database: Option<u32>,
    /// Client name registered with `CLIENT SETNAME`.
    pub client_name: Option<String>,
    /// Read/write timeout for commands on the socket.
    pub sync_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Parses a connection string.
    ///
    /// # Errors
    /// Returns `FkvError::IdentityInvalid` when the string is empty, has no
    /// endpoint, requests TLS, or carries an unknown or malformed option.
    pub fn parse(raw: &str) -> FkvResult<Self> {
        let mut config = ConnectionConfig::default();

        for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item.split_once('=') {
                Some((key, value)) => config.apply_option(key.trim(), value.trim())?,
                None => config.endpoints.push(parse_endpoint(item)?),
            }
        }

        if config.endpoints.is_empty() {
            return Err(invalid(format!("no endpoint in {:?}", redact(raw))));
        }
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> FkvResult<()> {
        match key.to_ascii_lowercase().as_str() {
            "password" => self.password = non_empty(value),
            "user" => self.user = non_empty(value),
            "name" => self.client_name = non_empty(value),
            "defaultdatabase" => {
                let database = value
                    .parse()
                    .map_err(|_| invalid(format!("defaultDatabase {:?} is not a number", value)))?;
                self.database = Some(database);
            }
            "synctimeout" => {
                let millis: u64 = value
                    .parse()
                    .map_err(|_| invalid(format!("syncTimeout {:?} is not a number", value)))?;
                self.sync_timeout = (millis > 0).then(|| Duration::from_millis(millis));
            }
            "ssl" => {
                if parse_bool(value)? {
                    return Err(invalid("ssl=true is not supported".to_string()));
                }
            }
            "abortconnect" => {
                parse_bool(value)?;
            }
            other => return Err(invalid(format!("unknown option {:?}", other))),
        }
        Ok(())
    }
}

fn parse_endpoint(item: &str) -> FkvResult<Endpoint> {
    // Bracketed IPv6: [::1]:6379
    if let Some(rest) = item.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid(format!("unterminated IPv6 endpoint {:?}", item)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid(format!("bad endpoint {:?}", item))),
        };
        return endpoint(host, port);
    }

    match item.rsplit_once(':') {
        Some((host, port)) => endpoint(host, parse_port(port)?),
        None => endpoint(item, DEFAULT_PORT),
    }
}

fn endpoint(host: &str, port: u16) -> FkvResult<Endpoint> {
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid(format!("bad host {:?}", host)));
    }
    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}

fn parse_port(raw: &str) -> FkvResult<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(format!("bad port {:?}", raw))),
    }
}

fn parse_bool(raw: &str) -> FkvResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(format!("{:?} is not a boolean", raw))),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn invalid(message: String) -> FkvError {
    FkvError::IdentityInvalid(message)
}

/// Strips option values so passwords never reach error messages or logs.
pub fn redact(raw: &str) -> String {
    raw.split(',')
        .map(|item| match item.split_once('=') {
            Some((key, _)) if key.trim().eq_ignore_ascii_case("password") => {
                format!("{}=***", key.trim())
            }
            _ => item.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints_and_options() {
        let config = ConnectionConfig::parse(
            "cache-a:6380, cache-b ,password=secret,user=app,defaultDatabase=2,name=flow,syncTimeout=1500,ssl=false,abortConnect=false",
        )
        .unwrap();
        assert_eq!(
            config.endpoints,
            vec![
                Endpoint { host: "cache-a".into(), port: 6380 },
                Endpoint { host: "cache-b".into(), port: DEFAULT_PORT },
            ]
        );
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.user.as_deref(), Some("app"));
        assert_eq!(config.database, Some(2));
        assert_eq!(config.client_name.as_deref(), Some("flow"));
        assert_eq!(config.sync_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn parses_ipv6_endpoint() {
        let config = ConnectionConfig::parse("[::1]:7000").unwrap();
        assert_eq!(config.endpoints[0].host, "::1");
        assert_eq!(config.endpoints[0].address(), "[::1]:7000");
    }

    #[test]
    fn rejects_malformed_strings() {
        for raw in [
            "",
            "password=only",
            "host:notaport",
            "host:0",
            "host:6379,ssl=true",
            "host:6379,defaultDatabase=x",
            "host:6379,bogus=1",
            "[::1",
        ] {
            let err = ConnectionConfig::parse(raw).unwrap_err();
            assert!(matches!(err, FkvError::IdentityInvalid(_)), "{raw}");
        }
    }

    #[test]
    fn redacts_password() {
        assert_eq!(redact("h:1,password=secret,name=x"), "h:1,password=***,name=x");
    }
}

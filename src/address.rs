//! Parsing of the canonical D-Bus address string into candidate transports.
//!
//! This module only parses the structure; opening a socket for a given
//! transport is left to the host's I/O layer.

use std::collections::HashMap;
use std::env;

use crate::error::{Error, ErrorKind, Result};

/// The default system-bus socket path used when
/// `DBUS_SYSTEM_BUS_ADDRESS` is unset.
pub const DEFAULT_SYSTEM_BUS_PATH: &str = "/var/run/dbus/system_bus_socket";

/// A single parsed transport endpoint, e.g. `unix:path=/run/dbus/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// A Unix domain socket, bound at a filesystem path or in the abstract
    /// namespace.
    Unix { path: Option<String>, abstract_name: Option<String> },
    /// A TCP/IP socket.
    Tcp {
        host: String,
        port: u16,
        family: Option<String>,
    },
    /// A transport this crate doesn't know how to open, kept around only so
    /// the caller can see it was present (and skip it) rather than fail the
    /// whole address.
    Unknown { name: String },
}

/// A parsed bus address: an ordered list of candidate transports, tried in
/// listed order by the I/O layer until one opens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BusAddress {
    pub transports: Vec<Transport>,
}

impl BusAddress {
    /// Parse a semicolon-separated bus address string.
    pub fn parse(address: &str) -> Result<BusAddress> {
        let mut transports = Vec::new();

        for spec in address.split(';') {
            let spec = spec.trim();

            if spec.is_empty() {
                continue;
            }

            transports.push(parse_transport(spec)?);
        }

        Ok(BusAddress { transports })
    }

    /// Read `DBUS_SESSION_BUS_ADDRESS` from the environment and parse it.
    pub fn session() -> Result<BusAddress> {
        let address = env::var("DBUS_SESSION_BUS_ADDRESS")
            .map_err(|_| Error::new(ErrorKind::MissingBus))?;
        BusAddress::parse(&address)
    }

    /// Read `DBUS_SYSTEM_BUS_ADDRESS` from the environment, falling back to
    /// the well-known default Unix socket path when unset.
    pub fn system() -> Result<BusAddress> {
        match env::var("DBUS_SYSTEM_BUS_ADDRESS") {
            Ok(address) => BusAddress::parse(&address),
            Err(_) => BusAddress::parse(&format!("unix:path={DEFAULT_SYSTEM_BUS_PATH}")),
        }
    }
}

fn parse_transport(spec: &str) -> Result<Transport> {
    let (name, rest) = spec.split_once(':').ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
    let params = parse_params(rest)?;

    Ok(match name {
        "unix" => Transport::Unix {
            path: params.get("path").cloned(),
            abstract_name: params.get("abstract").cloned(),
        },
        "tcp" => {
            let host = params
                .get("host")
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
            let port = params
                .get("port")
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?
                .parse::<u16>()
                .map_err(|_| Error::new(ErrorKind::InvalidAddress))?;

            Transport::Tcp {
                host,
                port,
                family: params.get("family").cloned(),
            }
        }
        other => Transport::Unknown {
            name: other.to_string(),
        },
    })
}

fn parse_params(rest: &str) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();

    for pair in rest.split(',') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) =
            pair.split_once('=').ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
        params.insert(key.to_string(), percent_decode(value)?);
    }

    Ok(params)
}

fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes
                .get(i + 1)
                .and_then(|&b| (b as char).to_digit(16))
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
            let lo = bytes
                .get(i + 2)
                .and_then(|&b| (b as char).to_digit(16))
                .ok_or_else(|| Error::new(ErrorKind::InvalidAddress))?;
            out.push((hi as u8) << 4 | lo as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|e| Error::from(e.utf8_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path_transport() {
        let address = BusAddress::parse("unix:path=/run/user/1000/bus").unwrap();
        assert_eq!(
            address.transports,
            vec![Transport::Unix {
                path: Some("/run/user/1000/bus".to_string()),
                abstract_name: None,
            }]
        );
    }

    #[test]
    fn parses_multiple_semicolon_separated_transports() {
        let address = BusAddress::parse("unix:path=/a;tcp:host=localhost,port=1234").unwrap();
        assert_eq!(address.transports.len(), 2);
    }

    #[test]
    fn percent_decodes_values() {
        let address = BusAddress::parse("unix:abstract=/tmp/dbus-%2Ftest").unwrap();
        assert_eq!(
            address.transports,
            vec![Transport::Unix {
                path: None,
                abstract_name: Some("/tmp/dbus-/test".to_string()),
            }]
        );
    }

    #[test]
    fn unknown_transports_are_skipped_not_rejected() {
        let address = BusAddress::parse("launchd:env=DBUS_LAUNCHD_SESSION_BUS_SOCKET").unwrap();
        assert_eq!(
            address.transports,
            vec![Transport::Unknown {
                name: "launchd".to_string()
            }]
        );
    }

    #[test]
    fn tcp_requires_host_and_port() {
        assert!(BusAddress::parse("tcp:host=localhost").is_err());
    }
}

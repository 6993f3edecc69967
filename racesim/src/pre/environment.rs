use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Path under which races are requested, the root path is whatever precedes it.
pub const RACE_PATH: &str = "/race";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("missing request header '{0}'")]
    MissingHeader(&'static str),
}

/// Environment of the client a race is run for. It is only carried along into the race
/// outcome, the race itself never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub protocol: String,
    pub server_name: String,
    pub server_port: String,
    pub root_path: String,
}

impl Environment {
    pub fn new(
        protocol: impl Into<String>,
        server_name: impl Into<String>,
        server_port: impl Into<String>,
        root_path: impl Into<String>,
    ) -> Environment {
        Environment {
            protocol: protocol.into(),
            server_name: server_name.into(),
            server_port: server_port.into(),
            root_path: root_path.into(),
        }
    }

    /// from_headers derives the environment from the headers of a race request. Without
    /// `x-forwarded-proto` plain http and the `host` header are assumed, otherwise the
    /// forwarded protocol, host and port are used. Header names are matched case-insensitively.
    pub fn from_headers(
        headers: &HashMap<String, String>,
        request_uri: &str,
    ) -> Result<Environment, EnvironmentError> {
        let (protocol, server_name, server_port) = match header(headers, "x-forwarded-proto") {
            None => {
                let host = header(headers, "host").ok_or(EnvironmentError::MissingHeader("host"))?;
                let mut host_split = host.split(':');
                let name = host_split.next().unwrap_or_default();
                let port = host_split
                    .next()
                    .filter(|port| !port.is_empty())
                    .unwrap_or("80");
                ("http", name, port)
            }
            Some(proto) => (
                proto,
                header(headers, "x-forwarded-host")
                    .ok_or(EnvironmentError::MissingHeader("x-forwarded-host"))?,
                header(headers, "x-forwarded-port")
                    .ok_or(EnvironmentError::MissingHeader("x-forwarded-port"))?,
            ),
        };

        let root_path = request_uri.strip_suffix(RACE_PATH).unwrap_or(request_uri);

        Ok(Environment::new(protocol, server_name, server_port, root_path))
    }

    /// base_url returns the URL the client used to reach the application.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol, self.server_name, self.server_port, self.root_path
        )
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

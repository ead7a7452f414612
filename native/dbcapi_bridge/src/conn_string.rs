/// Connection string assembly and parsing
///
/// Connection strings are semicolon-separated `key=value` pairs. Parameters given
/// as key/value pairs are flattened with `host`/`port` folded into a trailing
/// `ServerNode`, and `user`/`username`/`password` renamed to `uid`/`pwd`.
use crate::constants::CONNECT_SUFFIX;

/// Connect parameters as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectParams {
    #[default]
    None,
    Text(String),
    Pairs(Vec<(String, String)>),
}

impl ConnectParams {
    /// Flatten into connection string form.
    pub fn to_conn_string(&self) -> String {
        match self {
            ConnectParams::None => String::new(),
            ConnectParams::Text(s) => s.clone(),
            ConnectParams::Pairs(pairs) => pairs_to_string(pairs),
        }
    }
}

/// Flatten key/value pairs, keeping encounter order for everything but host and port.
pub fn pairs_to_string(pairs: &[(String, String)]) -> String {
    let mut host = "";
    let mut port = "";
    let mut parts: Vec<String> = Vec::with_capacity(pairs.len() + 1);

    for (key, value) in pairs {
        if key.eq_ignore_ascii_case("host") {
            host = value;
            continue;
        } else if key.eq_ignore_ascii_case("port") {
            port = value;
            continue;
        }

        let key = if key.eq_ignore_ascii_case("user") || key.eq_ignore_ascii_case("username") {
            "uid"
        } else if key.eq_ignore_ascii_case("password") {
            "pwd"
        } else {
            key.as_str()
        };
        parts.push(format!("{key}={value}"));
    }

    if !host.is_empty() {
        if port.is_empty() {
            parts.push(format!("ServerNode={host}"));
        } else {
            parts.push(format!("ServerNode={host}:{port}"));
        }
    }

    parts.join(";")
}

/// Build the native connection string: constructor defaults, then call-site
/// parameters, then the fixed UTF-8 / non-scrollable suffix.
pub fn build_connect_string(defaults: &ConnectParams, call: &ConnectParams) -> String {
    let mut conn_str = defaults.to_conn_string();
    let call_part = call.to_conn_string();

    if !call_part.is_empty() {
        if !conn_str.is_empty() {
            conn_str.push(';');
        }
        conn_str.push_str(&call_part);
    }

    conn_str.push_str(CONNECT_SUFFIX);
    conn_str
}

/// Parsed connection properties. Lookups are case-insensitive and the last
/// occurrence of a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectProperties(Vec<(String, String)>);

impl ConnectProperties {
    pub fn parse(conn_str: &str) -> Self {
        let pairs = conn_str
            .split(';')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                match part.split_once('=') {
                    Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
                    None => Some((part.to_string(), String::new())),
                }
            })
            .collect();
        ConnectProperties(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

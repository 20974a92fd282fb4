//! Discovery tag codec.
//!
//! An instance publishes its RPC address as one of its registry tags, in the
//! form `miniservice-<host>:<port>`. The format is shared with every other
//! instance and resolver, so it must stay byte-stable.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Marks the one tag of an instance that carries its RPC address.
pub const TAG_PREFIX: &str = "miniservice-";

/// Plain label attached to every instance registered by this crate.
pub const CATEGORY_TAG: &str = "miniservice";

/// A host and port. The host must be non-empty: an endpoint with an empty
/// host encodes to a tag that [`decode`] rejects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Dialable `http://` URI, bracketing IPv6 literals.
    pub fn uri(&self) -> String {
        format!("http://{}:{}", url_host(&self.host), self.port)
    }
}

/// `host` as it appears in a URL authority. Bare IPv6 literals get brackets;
/// already bracketed ones are left alone.
pub(crate) fn url_host(host: &str) -> Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        Cow::Owned(format!("[{host}]"))
    } else {
        Cow::Borrowed(host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub fn encode(endpoint: &Endpoint) -> String {
    format!("{}{}:{}", TAG_PREFIX, endpoint.host, endpoint.port)
}

pub fn decode(tag: &str) -> Result<Endpoint, Error> {
    let format_error = |reason| Error::Format {
        tag: tag.to_string(),
        reason,
    };

    let rest = tag
        .strip_prefix(TAG_PREFIX)
        .ok_or_else(|| format_error("missing prefix"))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| format_error("expected host:port"))?;
    if host.is_empty() {
        return Err(format_error("empty host"));
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error("port is not a decimal number"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format_error("port out of range"))?;

    Ok(Endpoint::new(host, port))
}

pub fn is_discovery_tag(tag: &str) -> bool {
    tag.starts_with(TAG_PREFIX)
}

/// First tag carrying [`TAG_PREFIX`], in tag order.
pub fn find_discovery_tag<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    tags.into_iter()
        .map(String::as_str)
        .find(|tag| is_discovery_tag(tag))
}

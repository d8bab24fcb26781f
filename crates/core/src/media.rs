//! Media and server identities.

use crate::path::{SafeRelativePath, validate_segment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a media: `(mageia_version, architecture, short_name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaKey {
    pub version: String,
    pub arch: String,
    pub short_name: String,
}

impl MediaKey {
    /// Create a media key, validating each component as a single path segment.
    pub fn new(
        version: impl Into<String>,
        arch: impl Into<String>,
        short_name: impl Into<String>,
    ) -> crate::Result<Self> {
        let key = Self {
            version: version.into(),
            arch: arch.into(),
            short_name: short_name.into(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Re-check the components (for keys built by deserialisation).
    pub fn validate(&self) -> crate::Result<()> {
        for (field, value) in [
            ("version", &self.version),
            ("arch", &self.arch),
            ("short_name", &self.short_name),
        ] {
            validate_segment(value).map_err(|_| {
                crate::Error::InvalidIdentity(format!("media {field} {value:?} is not a plain name"))
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.version, self.arch, self.short_name)
    }
}

/// Which isolated subtree a media lives under. Fixed when the media is created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaScope {
    /// Distribution media, grouped by class (`core`, `nonfree`, ...).
    Official { class: String },
    /// Third-party media, keyed by short name alone.
    Custom,
}

impl MediaScope {
    /// Derive the scope from the official flag and the upstream relative path.
    ///
    /// The class of an official media is the first segment of its relative
    /// path once an optional leading `media/` is stripped, so
    /// `media/core/release` lands in class `core`.
    pub fn from_relative_path(
        is_official: bool,
        relative_path: &SafeRelativePath,
    ) -> crate::Result<Self> {
        if !is_official {
            return Ok(Self::Custom);
        }
        let mut segments = relative_path.segments().peekable();
        if segments.peek() == Some(&"media") {
            segments.next();
        }
        let class = segments.next().ok_or_else(|| {
            crate::Error::InvalidIdentity(format!(
                "official media path {relative_path} has no class segment"
            ))
        })?;
        Ok(Self::Official {
            class: class.to_string(),
        })
    }

    /// Whether this is the official scope.
    pub fn is_official(&self) -> bool {
        matches!(self, Self::Official { .. })
    }
}

/// A media key together with its scope: enough to place its files on disk.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaIdentity {
    pub key: MediaKey,
    pub scope: MediaScope,
}

impl MediaIdentity {
    /// Create an identity.
    pub fn new(key: MediaKey, scope: MediaScope) -> crate::Result<Self> {
        key.validate()?;
        if let MediaScope::Official { class } = &scope {
            validate_segment(class).map_err(|_| {
                crate::Error::InvalidIdentity(format!("media class {class:?} is not a plain name"))
            })?;
        }
        Ok(Self { key, scope })
    }

    /// Root of this media's files, relative to `<root>/medias`.
    ///
    /// Official: `official/<version>/<arch>/media/<class>/<short_name>`.
    /// Custom: `custom/<short_name>`.
    pub fn subtree(&self) -> SafeRelativePath {
        let path = match &self.scope {
            MediaScope::Official { class } => format!(
                "official/{}/{}/media/{}/{}",
                self.key.version, self.key.arch, class, self.key.short_name
            ),
            MediaScope::Custom => format!("custom/{}", self.key.short_name),
        };
        SafeRelativePath::from_validated(path)
    }
}

impl fmt::Display for MediaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// How much of a media is mirrored locally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPolicy {
    /// Only metadata is synchronised.
    None,
    /// Only artifacts actually requested are fetched.
    #[default]
    OnDemand,
    /// Everything the media's metadata advertises.
    Full,
    /// A dependency-closed subset from a membership source.
    Seed,
}

impl ReplicationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OnDemand => "on_demand",
            Self::Full => "full",
            Self::Seed => "seed",
        }
    }
}

impl FromStr for ReplicationPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "on_demand" => Ok(Self::OnDemand),
            "full" => Ok(Self::Full),
            "seed" => Ok(Self::Seed),
            _ => Err(crate::Error::UnknownVariant {
                kind: "replication policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Transport used to reach a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    /// Local mirror read straight from the filesystem.
    File,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::File => "file",
        }
    }

    /// Whether fetching goes over the network.
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::File)
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "file" => Ok(Self::File),
            _ => Err(crate::Error::UnknownVariant {
                kind: "protocol",
                value: s.to_string(),
            }),
        }
    }
}

/// Address family preference for a server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    #[default]
    Auto,
    Ipv4,
    Ipv6,
    Dual,
}

impl IpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Dual => "dual",
        }
    }
}

impl FromStr for IpMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            "dual" => Ok(Self::Dual),
            _ => Err(crate::Error::UnknownVariant {
                kind: "ip mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Stable identity of a server: `(protocol, host, base_path)`.
///
/// `base_path` has no leading or trailing slash for network protocols; for
/// `file` it is the absolute directory of the local mirror and `host` is empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerKey {
    pub protocol: Protocol,
    pub host: String,
    pub base_path: String,
}

impl ServerKey {
    /// Create a server key, normalising `base_path`.
    pub fn new(
        protocol: Protocol,
        host: impl Into<String>,
        base_path: impl AsRef<str>,
    ) -> crate::Result<Self> {
        let host = host.into();
        let base_path = base_path.as_ref();
        let base_path = match protocol {
            Protocol::File => {
                if !base_path.starts_with('/') {
                    return Err(crate::Error::InvalidIdentity(format!(
                        "file server path must be absolute: {base_path}"
                    )));
                }
                let trimmed = base_path.trim_end_matches('/');
                if trimmed.is_empty() { "/" } else { trimmed }.to_string()
            }
            Protocol::Http | Protocol::Https => {
                if host.is_empty() || host.contains(['/', ' ']) {
                    return Err(crate::Error::InvalidIdentity(format!(
                        "invalid server host: {host:?}"
                    )));
                }
                base_path.trim_matches('/').to_string()
            }
        };
        if base_path.split('/').any(|s| s == "..") {
            return Err(crate::Error::PathSafety(format!(
                "server base path contains '..': {base_path}"
            )));
        }
        Ok(Self {
            protocol,
            host,
            base_path,
        })
    }

    /// Parse a mirror URL such as `https://mirror.example.org/mageia/distrib`
    /// or `file:///srv/mirror`.
    pub fn parse_url(url: &str) -> crate::Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| crate::Error::InvalidIdentity(format!("not a URL: {url}")))?;
        let protocol: Protocol = scheme.to_ascii_lowercase().parse()?;
        match protocol {
            Protocol::File => Self::new(protocol, "", rest),
            Protocol::Http | Protocol::Https => {
                let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
                Self::new(protocol, host.to_ascii_lowercase(), path)
            }
        }
    }

    /// URL (or absolute directory for `file`) of the server root.
    pub fn base_url(&self) -> String {
        match self.protocol {
            Protocol::File => self.base_path.clone(),
            _ if self.base_path.is_empty() => {
                format!("{}://{}", self.protocol.as_str(), self.host)
            }
            _ => format!(
                "{}://{}/{}",
                self.protocol.as_str(),
                self.host,
                self.base_path
            ),
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn official(rel: &str) -> MediaIdentity {
        let rel = SafeRelativePath::parse(rel).unwrap();
        let scope = MediaScope::from_relative_path(true, &rel).unwrap();
        MediaIdentity::new(MediaKey::new("9", "x86_64", "core_release").unwrap(), scope).unwrap()
    }

    #[test]
    fn test_official_subtree() {
        let media = official("media/core/release");
        assert_eq!(
            media.subtree().as_str(),
            "official/9/x86_64/media/core/core_release"
        );
    }

    #[test]
    fn test_official_class_without_media_prefix() {
        let media = official("nonfree/updates");
        assert_eq!(
            media.scope,
            MediaScope::Official {
                class: "nonfree".to_string()
            }
        );
    }

    #[test]
    fn test_custom_subtree_ignores_relative_path() {
        let rel = SafeRelativePath::parse("deep/nested/repo").unwrap();
        let scope = MediaScope::from_relative_path(false, &rel).unwrap();
        let media =
            MediaIdentity::new(MediaKey::new("9", "x86_64", "extras").unwrap(), scope).unwrap();
        assert_eq!(media.subtree().as_str(), "custom/extras");
    }

    #[test]
    fn test_media_key_rejects_separators() {
        assert!(MediaKey::new("9", "x86_64", "../evil").is_err());
        assert!(MediaKey::new("9", "x86/64", "core").is_err());
        assert!(MediaKey::new("", "x86_64", "core").is_err());
    }

    #[test]
    fn test_parse_url() {
        let key = ServerKey::parse_url("https://Mirror.Example.org/mageia/distrib/").unwrap();
        assert_eq!(key.protocol, Protocol::Https);
        assert_eq!(key.host, "mirror.example.org");
        assert_eq!(key.base_path, "mageia/distrib");
        assert_eq!(key.base_url(), "https://mirror.example.org/mageia/distrib");

        let local = ServerKey::parse_url("file:///srv/mirror/").unwrap();
        assert_eq!(local.protocol, Protocol::File);
        assert_eq!(local.base_path, "/srv/mirror");
        assert!(!local.protocol.is_network());
    }

    #[test]
    fn test_parse_url_rejects_unknown_scheme() {
        assert!(ServerKey::parse_url("gopher://host/path").is_err());
        assert!(ServerKey::parse_url("no-scheme").is_err());
        assert!(ServerKey::parse_url("http://host/a/../b").is_err());
    }

    #[test]
    fn test_policy_roundtrip() {
        for policy in [
            ReplicationPolicy::None,
            ReplicationPolicy::OnDemand,
            ReplicationPolicy::Full,
            ReplicationPolicy::Seed,
        ] {
            assert_eq!(policy.as_str().parse::<ReplicationPolicy>().unwrap(), policy);
        }
        assert_eq!(ReplicationPolicy::default(), ReplicationPolicy::OnDemand);
    }
}

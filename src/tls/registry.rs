//! Domain name → TLS configuration mapping.
//!
//! # Matching
//! - Patterns and hostnames compare case-insensitively, trailing dot ignored
//! - Exact patterns win over `*.parent` wildcards, wildcards over the default
//! - A wildcard covers exactly one label: `*.test.com` matches `a.test.com`
//!   but neither `test.com` nor `a.b.test.com`
//!
//! [`TlsRegistryBuilder`] is the mutable accumulator; [`TlsRegistry`] is the
//! frozen snapshot handed to connections and never changes after `build()`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::tls::configuration::{DefaultFlavor, TlsConfiguration};

/// A normalized domain pattern, optionally a single-level wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainPattern(String);

impl DomainPattern {
    /// Parse and normalize a pattern such as `example.com` or `*.example.com`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(Error::config("domain pattern must not be empty"));
        }

        let body = normalized.strip_prefix("*.").unwrap_or(&normalized);
        if body.is_empty() || body.contains('*') {
            return Err(Error::config(format!(
                "invalid domain pattern '{raw}': only a leading '*.' wildcard is supported"
            )));
        }
        if body.split('.').any(str::is_empty) {
            return Err(Error::config(format!(
                "invalid domain pattern '{raw}': empty label"
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with("*.")
    }
}

impl FromStr for DomainPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// How a hostname was matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Exact(DomainPattern),
    Wildcard(DomainPattern),
    Default,
}

/// Result of a registry lookup.
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub configuration: &'a TlsConfiguration,
    pub matched: Match,
}

/// Mutable accumulator for a [`TlsRegistry`].
#[derive(Debug, Default, Clone)]
pub struct TlsRegistryBuilder {
    default: Option<TlsConfiguration>,
    per_domain: HashMap<DomainPattern, TlsConfiguration>,
}

impl TlsRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration used when nothing else matches.
    pub fn set_default(&mut self, configuration: TlsConfiguration) -> &mut Self {
        self.default = Some(configuration);
        self
    }

    /// Map `pattern` to `configuration`, replacing any previous mapping.
    pub fn add(&mut self, pattern: &str, configuration: TlsConfiguration) -> Result<&mut Self> {
        let pattern = DomainPattern::parse(pattern)?;
        tracing::trace!(pattern = %pattern, "Registered TLS configuration");
        self.per_domain.insert(pattern, configuration);
        Ok(self)
    }

    /// Add every mapping. Patterns are validated before any is inserted.
    pub fn add_all<I, S>(&mut self, mappings: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (S, TlsConfiguration)>,
        S: AsRef<str>,
    {
        let parsed = mappings
            .into_iter()
            .map(|(p, c)| DomainPattern::parse(p.as_ref()).map(|p| (p, c)))
            .collect::<Result<Vec<_>>>()?;
        self.per_domain.extend(parsed);
        Ok(self)
    }

    /// Replace all per-domain mappings. The default is kept.
    pub fn set_all<I, S>(&mut self, mappings: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (S, TlsConfiguration)>,
        S: AsRef<str>,
    {
        let parsed = mappings
            .into_iter()
            .map(|(p, c)| DomainPattern::parse(p.as_ref()).map(|p| (p, c)))
            .collect::<Result<Vec<_>>>()?;
        self.per_domain.clear();
        self.per_domain.extend(parsed);
        Ok(self)
    }

    /// Freeze the current state into a snapshot.
    pub fn build(&self) -> Result<TlsRegistry> {
        let default = self
            .default
            .clone()
            .ok_or_else(|| Error::config("a default TLS configuration is required"))?;

        Ok(TlsRegistry {
            default,
            per_domain: self.per_domain.clone(),
            default_flavor: None,
        })
    }
}

/// Immutable snapshot of domain → configuration mappings.
#[derive(Debug, Clone)]
pub struct TlsRegistry {
    default: TlsConfiguration,
    per_domain: HashMap<DomainPattern, TlsConfiguration>,
    default_flavor: Option<DefaultFlavor>,
}

impl TlsRegistry {
    pub fn builder() -> TlsRegistryBuilder {
        TlsRegistryBuilder::new()
    }

    /// Registry with only a default configuration.
    pub fn single(configuration: TlsConfiguration) -> Self {
        Self {
            default: configuration,
            per_domain: HashMap::new(),
            default_flavor: None,
        }
    }

    pub fn default_configuration(&self) -> &TlsConfiguration {
        &self.default
    }

    /// Flavor applied by [`TlsRegistry::with_default_flavor`], if any.
    pub fn default_flavor(&self) -> Option<DefaultFlavor> {
        self.default_flavor
    }

    pub fn len(&self) -> usize {
        self.per_domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_domain.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &DomainPattern> {
        self.per_domain.keys()
    }

    /// Configuration for `hostname`, falling back to the default.
    pub fn resolve(&self, hostname: &str) -> &TlsConfiguration {
        self.lookup(Some(hostname)).configuration
    }

    /// Full lookup. `None` (no SNI sent) always yields the default.
    pub fn lookup(&self, hostname: Option<&str>) -> Resolution<'_> {
        let Some(hostname) = hostname.map(normalize).filter(|h| !h.is_empty()) else {
            return self.fallback();
        };

        let exact = DomainPattern(hostname.clone());
        if let Some(configuration) = self.per_domain.get(&exact) {
            return Resolution {
                configuration,
                matched: Match::Exact(exact),
            };
        }

        if let Some(idx) = hostname.find('.') {
            let wildcard = DomainPattern(format!("*{}", &hostname[idx..]));
            if let Some(configuration) = self.per_domain.get(&wildcard) {
                return Resolution {
                    configuration,
                    matched: Match::Wildcard(wildcard),
                };
            }
        }

        self.fallback()
    }

    fn fallback(&self) -> Resolution<'_> {
        Resolution {
            configuration: &self.default,
            matched: Match::Default,
        }
    }

    /// New snapshot with every configuration re-tagged with `flavor`.
    pub fn with_default_flavor(&self, flavor: DefaultFlavor) -> Self {
        Self {
            default: self.default.with_flavor(flavor),
            per_domain: self
                .per_domain
                .iter()
                .map(|(pattern, config)| (pattern.clone(), config.with_flavor(flavor)))
                .collect(),
            default_flavor: Some(flavor),
        }
    }
}

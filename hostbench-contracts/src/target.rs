/// Anything that can be addressed by a public URL.
///
/// Content models implement this so tests can request "the page for this
/// post" without spelling out the URL.
pub trait Permalink {
    /// Absolute or site-relative URL, or `None` when the object has no
    /// public address (drafts, private records).
    fn permalink(&self) -> Option<String>;
}

impl<T: Permalink + ?Sized> Permalink for &T {
    fn permalink(&self) -> Option<String> {
        (**self).permalink()
    }
}

impl<T: Permalink + ?Sized> Permalink for Box<T> {
    fn permalink(&self) -> Option<String> {
        (**self).permalink()
    }
}

/// What a simulated request is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// A literal URI, absolute or relative to the site root.
    Uri(String),
    /// A URI already resolved from an addressable object.
    Resolved {
        uri: String,
        /// Type name of the object it came from, kept for diagnostics.
        source: &'static str,
    },
}

impl RequestTarget {
    /// Resolve an addressable object to a target.
    ///
    /// Objects without a permalink resolve to the empty URI, which the
    /// dispatcher treats as the site root.
    pub fn permalink<P: Permalink + ?Sized>(object: &P) -> Self {
        Self::Resolved {
            uri: object.permalink().unwrap_or_default(),
            source: std::any::type_name::<P>(),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::Uri(uri) => uri,
            Self::Resolved { uri, .. } => uri,
        }
    }

    pub fn into_uri(self) -> String {
        match self {
            Self::Uri(uri) => uri,
            Self::Resolved { uri, .. } => uri,
        }
    }
}

impl From<&str> for RequestTarget {
    fn from(value: &str) -> Self {
        Self::Uri(value.to_string())
    }
}

impl From<String> for RequestTarget {
    fn from(value: String) -> Self {
        Self::Uri(value)
    }
}

impl From<&String> for RequestTarget {
    fn from(value: &String) -> Self {
        Self::Uri(value.clone())
    }
}

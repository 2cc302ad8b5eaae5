use regex::Regex;

/// Glob over the full URL: `*` matches any run of characters, everything
/// else is literal.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Any,
    Glob { raw: String, compiled: Regex },
    Exact(String),
}

impl UrlPattern {
    pub fn new(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Any;
        }
        if !pattern.contains('*') {
            return Self::Exact(pattern.to_string());
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("^{body}$")) {
            Ok(compiled) => Self::Glob {
                raw: pattern.to_string(),
                compiled,
            },
            Err(err) => {
                tracing::warn!(%pattern, error = %err, "glob too large; matching literally");
                Self::Exact(pattern.to_string())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Glob { raw, .. } => raw,
            Self::Exact(raw) => raw,
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Glob { compiled, .. } => compiled.is_match(url),
            Self::Exact(raw) => raw == url,
        }
    }
}

impl From<&str> for UrlPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

/// Which calls a stub answers.
#[derive(Debug, Clone)]
pub struct StubMatcher {
    /// Upper-cased; `None` accepts every method.
    method: Option<String>,
    url: UrlPattern,
}

impl StubMatcher {
    pub fn new(method: Option<&str>, url: UrlPattern) -> Self {
        Self {
            method: method.map(str::to_ascii_uppercase),
            url,
        }
    }

    pub fn any() -> Self {
        Self::new(None, UrlPattern::Any)
    }

    pub fn matches(&self, method: &str, url: &str) -> bool {
        self.method
            .as_deref()
            .is_none_or(|expected| expected.eq_ignore_ascii_case(method))
            && self.url.matches(url)
    }

    pub fn describe(&self) -> String {
        match &self.method {
            Some(method) => format!("{method} {}", self.url.as_str()),
            None => self.url.as_str().to_string(),
        }
    }
}

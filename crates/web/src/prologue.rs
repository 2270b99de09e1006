use http::{Method, Uri, Version};

/// The method, path and query that identify a request to the router.
///
/// Re-routing swaps the whole prologue for a new one; method and version are carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prologue {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
}

impl Prologue {
    pub fn new(method: Method, path: impl Into<String>, query: Option<String>, version: Version) -> Self {
        let path = path.into();
        let path = if path.is_empty() { "/".to_owned() } else { path };
        Self { method, path, query, version }
    }

    pub fn from_uri(method: Method, uri: &Uri, version: Version) -> Self {
        Self::new(method, uri.path(), uri.query().map(ToOwned::to_owned), version)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// A prologue for the same method and version pointing somewhere else.
    pub fn reroute(&self, path: impl Into<String>, query: Option<String>) -> Self {
        Self::new(self.method.clone(), path, query, self.version)
    }
}

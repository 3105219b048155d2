use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/**
    Identifier of a media input: a file path or a URL.

    The decode loop never interprets it beyond handing it to the decode
    service. Cloning is cheap so every player can keep its own copy.
*/
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Source {
    location: Arc<str>,
}

impl Source {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Arc::from(location.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.location
    }

    /**
        The URL scheme, if the location looks like `scheme://...`.

        Single letters are not treated as schemes so that Windows drive
        paths (`C:\...`) stay paths.
    */
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.location.split_once("://")?;
        let valid = scheme.len() > 1
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then_some(scheme)
    }

    pub fn is_url(&self) -> bool {
        self.scheme().is_some()
    }

    /**
        The location as a filesystem path, if it isn't a URL.
    */
    pub fn as_path(&self) -> Option<&Path> {
        if self.is_url() {
            None
        } else {
            Some(Path::new(self.as_str()))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for Source {
    fn from(value: PathBuf) -> Self {
        Self::new(value.to_string_lossy().into_owned())
    }
}

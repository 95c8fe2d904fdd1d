//! Static token-file authenticator for the demo host.
//!
//! # Token file format
//! One `token principal-name` pair per line; blank lines and `#`
//! comments are skipped.

use std::collections::HashMap;
use std::path::Path;

use tw_server::{Authenticator, Principal};

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_str_contents(&contents))
    }

    fn from_str_contents(contents: &str) -> Self {
        let tokens = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let token = parts.next()?;
                let name = parts.next()?;
                Some((token.to_owned(), name.to_owned()))
            })
            .collect();
        StaticTokenAuthenticator { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, headers: &HashMap<String, String>) -> Option<Principal> {
        let token = headers.get("authorization").and_then(|v| extract_bearer(v))?;
        self.tokens.get(token).map(|name| Principal {
            name: name.clone(),
            authenticated: true,
        })
    }
}

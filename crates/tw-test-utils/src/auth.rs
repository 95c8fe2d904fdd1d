//! Bearer-token authenticator for secured-gateway suites.

use std::collections::HashMap;

use tw_server::{Authenticator, Principal};

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

/// Maps a fixed set of bearer tokens to principal names.  Anything else
/// yields no principal, which the WS gateway turns into a 401 when
/// `require_authenticated_user` is set.
pub struct BearerAuthenticator {
    tokens: HashMap<String, String>,
}

impl BearerAuthenticator {
    pub fn new(tokens: &[(&str, &str)]) -> Self {
        BearerAuthenticator {
            tokens: tokens
                .iter()
                .map(|(token, name)| ((*token).to_owned(), (*name).to_owned()))
                .collect(),
        }
    }
}

impl Authenticator for BearerAuthenticator {
    fn authenticate(&self, headers: &HashMap<String, String>) -> Option<Principal> {
        let token = headers.get("authorization").and_then(|v| extract_bearer(v))?;
        self.tokens.get(token).map(|name| Principal {
            name: name.clone(),
            authenticated: true,
        })
    }
}

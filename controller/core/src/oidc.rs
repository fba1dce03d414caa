/// The subset of an OpenID provider's discovery document used to configure
/// OAuth2 policies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OidcProviderConfig {
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub end_session_endpoint: Option<String>,
}

/// A source of discovered OpenID provider configurations, keyed by issuer
/// URI.
///
/// Lookups never block: translation reads whatever discovery has already
/// cached.
pub trait OidcProviders {
    fn get(&self, issuer_uri: &str) -> Option<OidcProviderConfig>;
}

impl OidcProviders for ahash::AHashMap<String, OidcProviderConfig> {
    fn get(&self, issuer_uri: &str) -> Option<OidcProviderConfig> {
        ahash::AHashMap::get(self, issuer_uri).cloned()
    }
}

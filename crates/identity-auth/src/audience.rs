//! Downstream audiences and their token-exchange configuration
//!
//! Every audience shares the same exchange request shape, so the registry is
//! a plain table of entries rather than per-audience code paths.

use crate::settings::IdentityEnvironment;

/// One downstream service that receives its own exchanged access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audience {
    /// Logical name, also the prefix of the store key
    pub name: String,
    /// Scopes requested for this audience (without `openid`)
    pub scopes: Vec<String>,
    /// Audience client id in production
    pub client_id: String,
    /// Audience client id against local/spin identity instances
    pub dev_client_id: String,
    /// Exchange is scoped to the stored shop via a `destination` hint
    pub requires_shop: bool,
}

impl Audience {
    pub fn new(
        name: &str,
        scopes: &[&str],
        client_id: &str,
        dev_client_id: &str,
        requires_shop: bool,
    ) -> Self {
        Self {
            name: name.to_owned(),
            scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
            client_id: client_id.to_owned(),
            dev_client_id: dev_client_id.to_owned(),
            requires_shop,
        }
    }

    /// Store key of the exchanged token, `{name}_exchange_token`.
    pub fn exchange_token_key(&self) -> String {
        format!("{}_exchange_token", self.name)
    }

    /// Client id sent as the exchange `audience` for the given environment.
    pub fn client_id_for(&self, environment: &IdentityEnvironment) -> &str {
        if environment.is_development() {
            &self.dev_client_id
        } else {
            &self.client_id
        }
    }
}

/// Ordered, read-only table of configured audiences.
#[derive(Debug, Clone)]
pub struct AudienceRegistry {
    audiences: Vec<Audience>,
}

impl AudienceRegistry {
    pub fn new(audiences: Vec<Audience>) -> Self {
        Self { audiences }
    }

    /// The three audiences the CLI derives tokens for.
    pub fn reference() -> Self {
        Self::new(vec![
            Audience::new(
                "shopify",
                &[
                    "https://api.shopify.com/auth/shop.admin.graphql",
                    "https://api.shopify.com/auth/shop.admin.themes",
                    "https://api.shopify.com/auth/partners.collaborator-relationships.readonly",
                ],
                "7ee65a63608843c577db8b23c4d7316ea0a01bd2f7594f8a9c06ea668c1b775c",
                "e92482cebb9bfb9fb5a0199cc770fde3de6c8d16b798ee73e36c9d815e070e52",
                true,
            ),
            Audience::new(
                "storefront_renderer_production",
                &["https://api.shopify.com/auth/shop.storefront-renderer.devtools"],
                "ee139b3d-5861-4d45-b387-1bc3ada7811c",
                "46f603de-894f-488d-9471-5b721280ff49",
                false,
            ),
            Audience::new(
                "partners",
                &["https://api.shopify.com/auth/partners.app.cli.access"],
                "271e16d403dfa18082ffb3d197bd2b5f4479c3fc32736d69296829cbb28d41a6",
                "df89d73339ac3c6c5f0a98d9ca93260763e384d51d6038da129889c308973978",
                false,
            ),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Audience> {
        self.audiences.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Audience> {
        self.audiences.iter().find(|a| a.name == name)
    }

    /// Store keys of every audience's exchanged token.
    pub fn exchange_token_keys(&self) -> Vec<String> {
        self.audiences.iter().map(Audience::exchange_token_key).collect()
    }

    /// Union of all audience scopes in table order, duplicates removed.
    pub fn all_scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = Vec::new();
        for scope in self.audiences.iter().flat_map(|a| a.scopes.iter()) {
            if !scopes.contains(&scope.as_str()) {
                scopes.push(scope);
            }
        }
        scopes
    }
}

impl Default for AudienceRegistry {
    fn default() -> Self {
        Self::reference()
    }
}

pub mod oauth_core;

pub use oauth_core::client_store::{ClientStore, InMemoryClientStore};
pub use oauth_core::clock::{Clock, ManualClock, SystemClock};
pub use oauth_core::code_store::{AuthorizationCodeStore, InMemoryCodeStore, PendingGrant, PkceChallenge};
pub use oauth_core::config::{AuthConfig, ConfigError, JWTAlgorithm};
pub use oauth_core::context::AuthContext;
pub use oauth_core::endpoints::OAuthEndpoints;
pub use oauth_core::flow::{AuthorizationRequest, OAuthFlowController};
pub use oauth_core::gate::AuthGate;
pub use oauth_core::http::HttpResponse;
pub use oauth_core::jwt::{Claims, IssuedToken, TokenCodec};
pub use oauth_core::keys::{KeyRing, SigningKey};
pub use oauth_core::service::AuthService;
pub use oauth_core::token_store::{InMemoryTokenStore, TokenRecord, TokenStore};
pub use oauth_core::types::{AuthError, Client, GrantState, Identity, ScopeSet, TokenGrant, TokenKind, TokenTypeHint};

//! Demo server: an in-memory room directory and an authenticator that
//! takes everyone at their word. Point a WebSocket client at it and
//! send a ready frame:
//!
//! ```text
//! ready,mediator,{"userId":"u1","username":"ada","token":"anything"}
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use wayfinder::{
    AuthClaims, Authenticator, RoomError, SessionError, SiteDirectory,
    SiteInfo, WayfinderError, WayfinderServerBuilder,
};

/// A fixed set of rooms. None have live backends, so everything beyond
/// the first room resolves to the empty sink; enough to walk the
/// session and command surface end to end.
struct DemoDirectory {
    sites: HashMap<String, SiteInfo>,
}

impl DemoDirectory {
    fn new() -> Arc<Self> {
        let sites = [
            SiteInfo {
                id: "attic".to_string(),
                name: "attic".to_string(),
                full_name: "A Dusty Attic".to_string(),
                description: "Boxes, cobwebs, one suspicious trunk."
                    .to_string(),
                owner: Some("u1".to_string()),
                exits: HashMap::new(),
                endpoints: Vec::new(),
            },
            SiteInfo {
                id: "cellar".to_string(),
                name: "cellar".to_string(),
                full_name: "The Cellar".to_string(),
                description: "Cool, dark, and smelling faintly of apples."
                    .to_string(),
                owner: Some("u1".to_string()),
                exits: HashMap::new(),
                endpoints: Vec::new(),
            },
        ];
        Arc::new(Self {
            sites: sites.into_iter().map(|s| (s.id.clone(), s)).collect(),
        })
    }
}

impl SiteDirectory for DemoDirectory {
    fn site(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<Option<SiteInfo>, RoomError>> + Send {
        let site = self.sites.get(room_id).cloned();
        async move { Ok(site) }
    }

    fn sites_for_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<SiteInfo>, RoomError>> + Send {
        let sites: Vec<SiteInfo> = self
            .sites
            .values()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .cloned()
            .collect();
        async move { Ok(sites) }
    }
}

/// Accepts any non-empty token. Do not ship this.
struct TrustingAuthenticator;

impl Authenticator for TrustingAuthenticator {
    fn authenticate(
        &self,
        user_id: &str,
        token: &str,
    ) -> impl Future<Output = Result<AuthClaims, SessionError>> + Send {
        let claims = if token.is_empty() {
            Err(SessionError::AuthFailed(user_id.to_string()))
        } else {
            Ok(AuthClaims {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
            })
        };
        async move { claims }
    }
}

#[tokio::main]
async fn main() -> Result<(), WayfinderError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wayfinder=info".into()),
        )
        .init();

    let addr = std::env::var("WAYFINDER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9001".to_string());

    let server = WayfinderServerBuilder::new()
        .bind(&addr)
        .build(DemoDirectory::new(), TrustingAuthenticator)
        .await?;

    tracing::info!(%addr, "demo server ready");
    server.run().await
}

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod permissions;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod singleton;

#[cfg(test)]
pub mod tests;

pub use config::*;
pub use error::*;

use std::panic;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use auth::{AllowAllAuthorizer, Authorizer, TokenAuthorizer};
use schema::vss::VssSchema;
use server::Server;

/// Builds the [`Authorizer`] the configuration calls for: the allow-all
/// development bypass, or a real JWT verifier reading its public key from
/// `graphql.jwt_public_key_path` (or the default `keys/` location next to
/// the executable).
///
/// `allow_all_authorizer` is a runtime config flag gated behind a
/// compile-time switch (the `demo` feature) — a production binary built
/// without it ignores the flag entirely rather than trusting a config file
/// to keep it `false`.
fn build_authorizer(config: &config::GraphqlConfig) -> Result<Arc<dyn Authorizer>> {
    #[cfg(feature = "demo")]
    if config.allow_all_authorizer {
        return Ok(Arc::new(AllowAllAuthorizer::new()));
    }
    #[cfg(not(feature = "demo"))]
    if config.allow_all_authorizer {
        ::tracing::warn!(
            "graphql.allow_all_authorizer is set but this binary wasn't built with the demo feature; ignoring it"
        );
    }

    let path = config.jwt_public_key_path.as_deref().map(Path::new);
    let authorizer = TokenAuthorizer::from_path_or_default(path)?;
    Ok(Arc::new(authorizer))
}

/// Main entry point for library usage: loads configuration, wires up the
/// authorizer and schema, and runs the server until a shutdown signal
/// arrives.
pub async fn run_server() -> Result<()> {
    observability::init_observability()?;
    ::tracing::info!("observability initialized");

    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(?panic_info, "FATAL: panic occurred");
        std::process::exit(1);
    }));

    ::tracing::info!("vss-graphql-server starting up");

    let app_config = config::load_config()?;
    let authorizer = build_authorizer(&app_config.graphql)?;
    let schema: Arc<dyn schema::ExecutableSchema> = Arc::new(VssSchema::new());

    let server = Server::new(&app_config, authorizer, schema);
    server.run().await?;

    Ok(())
}

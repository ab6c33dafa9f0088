use tracing::error;

#[cfg(all(not(debug_assertions), feature = "demo"))]
compile_error!("allow_all_authorizer/disable_permissions MUST NOT ship in release builds");

#[tokio::main]
async fn main() {
    if let Err(err) = vss_graphql_server::run_server().await {
        error!(%err, "server exited with an error");
        std::process::exit(1);
    }
}

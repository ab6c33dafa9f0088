//! Metrics endpoint with security controls
//!
//! This module provides a secure HTTP endpoint for Prometheus metrics with:
//! - IP allowlist access control
//! - Proper error handling and logging
//! - Integration with metrics manager
//! - Security headers and response formatting

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing;

use super::recorder::{get_metrics_manager, extract_client_ip};

/// Metrics endpoint handler with IP allowlist security
pub async fn metrics_endpoint(
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    // Get metrics manager
    let manager = match get_metrics_manager() {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Metrics manager not initialized: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Metrics not available"
            ).into_response();
        }
    };

    // Extract client IP from headers or connection
    let client_ip = if headers.is_empty() {
        addr.ip().to_string()
    } else {
        let header_ip = extract_client_ip(&headers);
        if header_ip == "unknown" {
            addr.ip().to_string()
        } else {
            header_ip
        }
    };

    // Check IP allowlist
    if !manager.is_ip_allowed(&client_ip) {
        tracing::warn!(
            client_ip = %client_ip,
            "Metrics access denied: IP not in allowlist"
        );
        return (
            StatusCode::FORBIDDEN,
            "Access denied: IP not authorized"
        ).into_response();
    }

    // Generate metrics output
    let metrics_content = manager.render();
    
    tracing::debug!(
        client_ip = %client_ip,
        metrics_size = %metrics_content.len(),
        "Metrics served successfully"
    );

    // Return metrics with appropriate content type
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics_content
    ).into_response()
}

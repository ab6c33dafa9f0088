//! Prometheus metrics recorder with cardinality controls
//!
//! This module provides the core metrics recording infrastructure with:
//! - Prometheus HTTP exporter with configurable port
//! - Global cardinality limiting to prevent metric explosion
//! - Service-level labels (service name, environment, version)
//! - IP allowlist support for metrics endpoint security

use std::sync::{Arc, OnceLock};
use std::net::SocketAddr;
use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::CardinalityLimiter;

/// Configuration for metrics collection
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Port for Prometheus HTTP endpoint
    pub port: u16,
    /// Service environment (dev, staging, prod)
    pub environment: String,
    /// Maximum unique operation labels to prevent cardinality explosion
    pub max_operation_labels: usize,
    /// Optional IP allowlist for metrics endpoint access
    pub ip_allowlist: Option<Vec<String>>,
    /// Whether to enable detailed metrics (may impact performance)
    pub detailed_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            environment: "development".to_string(),
            max_operation_labels: 50,
            ip_allowlist: None,
            detailed_metrics: false,
        }
    }
}

/// Global metrics manager with Prometheus integration
pub struct MetricsManager {
    handle: PrometheusHandle,
    config: MetricsConfig,
    cardinality_limiter: Arc<CardinalityLimiter>,
}

impl MetricsManager {
    /// Initialize Prometheus recorder with cardinality controls
    pub fn new(config: MetricsConfig) -> Result<Self> {
        // Create cardinality limiter
        let limiter = Arc::new(CardinalityLimiter::new(config.max_operation_labels));
        
        // Build Prometheus exporter
        let builder = PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.port)))
            .add_global_label("service", "pcf-api")
            .add_global_label("environment", &config.environment)
            .add_global_label("version", env!("CARGO_PKG_VERSION"));
        
        // Install recorder and get handle
        let handle = builder
            .install_recorder()
            .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;
        
        tracing::info!(
            port = %config.port,
            environment = %config.environment,
            max_operations = %config.max_operation_labels,
            "Prometheus metrics recorder initialized"
        );
        
        Ok(Self {
            handle,
            config,
            cardinality_limiter: limiter,
        })
    }
    
    /// Get Prometheus metrics output
    pub fn render(&self) -> String {
        self.handle.render()
    }
    
    /// Get cardinality limiter for operation labels
    pub fn cardinality_limiter(&self) -> Arc<CardinalityLimiter> {
        self.cardinality_limiter.clone()
    }
    
    /// Check if IP is allowed to access metrics endpoint
    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        match &self.config.ip_allowlist {
            Some(allowlist) => allowlist.contains(&ip.to_string()),
            None => true, // No allowlist means all IPs are allowed
        }
    }
    
    /// Get current metrics configuration
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }
    
    /// Get metrics endpoint URL
    pub fn endpoint_url(&self) -> String {
        format!("http://0.0.0.0:{}/metrics", self.config.port)
    }
}

/// Global metrics instance (initialized once at startup)
static METRICS_MANAGER: OnceLock<Arc<MetricsManager>> = OnceLock::new();

/// Initialize global metrics manager
pub fn init_metrics(config: MetricsConfig) -> Result<()> {
    let manager = Arc::new(MetricsManager::new(config)?);
    
    // Initialize global instance
    match METRICS_MANAGER.set(manager) {
        Ok(()) => Ok(()),
        Err(_) => Err(anyhow!("Metrics manager was already initialized")),
    }
}

/// Get global metrics manager instance
pub fn get_metrics_manager() -> Result<Arc<MetricsManager>> {
    METRICS_MANAGER
        .get()
        .cloned()
        .ok_or_else(|| anyhow!("Metrics manager not initialized. Call init_metrics() first."))
}

/// Extract client IP from various headers
pub fn extract_client_ip(headers: &axum::http::HeaderMap) -> String {
    // Try X-Forwarded-For first (most common proxy header)
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            // Take first IP in case of multiple
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }
    
    // Try X-Real-IP (Nginx proxy)
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }
    
    // Fallback to connection IP (not available in headers, return placeholder)
    "unknown".to_string()
}

//! HTTP request handlers for the probing API.

use super::AppState;
use crate::probe::{
    arp_ping_with, ping_icmp_with, rdns_lookup, tcp_ping_with, timeout_from_secs, udp_ping_with,
    ProbeError, SweepOptions, DEFAULT_ARP_TIMEOUT, DEFAULT_TCP_TIMEOUT, DEFAULT_UDP_PORT,
    DEFAULT_UDP_TIMEOUT,
};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

fn missing_param(name: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("{name} parameter is required") })),
    )
        .into_response()
}

/// Port parameters arrive as arbitrary integers so range errors are ours to
/// report, not the deserializer's.
fn validate_port(port: Option<i64>, default: u16) -> Result<u16, Response> {
    match port {
        None => Ok(default),
        Some(p) if (1..=65535).contains(&p) => Ok(p as u16),
        Some(_) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "port must be between 1 and 65535" })),
        )
            .into_response()),
    }
}

fn probe_error_response(err: ProbeError) -> Response {
    let message = match err {
        ProbeError::PermissionDenied(_) => {
            "ICMP requires admin/root privileges on this OS".to_string()
        }
        other => other.to_string(),
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

async fn run_blocking<T, F>(f: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProbeError::Task(e.to_string()))?
}

// ============================================================================
// ICMP
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IcmpQuery {
    pub host: Option<String>,
    pub count: Option<u32>,
    pub timeout: Option<f64>,
}

pub async fn handle_icmp_ping(
    State(state): State<AppState>,
    Query(query): Query<IcmpQuery>,
) -> Response {
    let Some(host) = query.host else {
        return missing_param("host");
    };

    let mut opts = SweepOptions::default();
    if let Some(count) = query.count {
        opts.count = count;
    }
    if let Some(timeout) = query.timeout {
        opts.echo.timeout = timeout_from_secs(timeout);
    }

    let transport = state.transport.clone();
    let resolver = state.resolver.clone();
    let result = run_blocking(move || {
        ping_icmp_with(transport.as_ref(), resolver.as_ref(), &host, &opts)
    })
    .await;

    match result {
        Ok(result) => Json(result).into_response(),
        Err(err) => probe_error_response(err),
    }
}

// ============================================================================
// TCP
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TcpQuery {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub timeout: Option<f64>,
}

pub async fn handle_tcp_ping(
    State(state): State<AppState>,
    Query(query): Query<TcpQuery>,
) -> Response {
    let Some(host) = query.host else {
        return missing_param("host");
    };
    let Some(port) = query.port else {
        return missing_param("port");
    };
    let port = match validate_port(Some(port), 0) {
        Ok(port) => port,
        Err(resp) => return resp,
    };
    let timeout = query
        .timeout
        .map(timeout_from_secs)
        .unwrap_or(DEFAULT_TCP_TIMEOUT);

    let transport = state.transport.clone();
    let resolver = state.resolver.clone();
    let result = run_blocking(move || {
        tcp_ping_with(transport.as_ref(), resolver.as_ref(), &host, port, timeout)
    })
    .await;

    match result {
        Ok(result) => Json(result).into_response(),
        Err(err) => probe_error_response(err),
    }
}

// ============================================================================
// UDP
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UdpQuery {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub timeout: Option<f64>,
}

pub async fn handle_udp_ping(
    State(state): State<AppState>,
    Query(query): Query<UdpQuery>,
) -> Response {
    let Some(host) = query.host else {
        return missing_param("host");
    };
    let port = match validate_port(query.port, DEFAULT_UDP_PORT) {
        Ok(port) => port,
        Err(resp) => return resp,
    };
    let timeout = query
        .timeout
        .map(timeout_from_secs)
        .unwrap_or(DEFAULT_UDP_TIMEOUT);

    let transport = state.transport.clone();
    let resolver = state.resolver.clone();
    let result = run_blocking(move || {
        udp_ping_with(transport.as_ref(), resolver.as_ref(), &host, port, timeout)
    })
    .await;

    match result {
        Ok(result) => Json(result).into_response(),
        Err(err) => probe_error_response(err),
    }
}

// ============================================================================
// ARP
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ArpQuery {
    pub host: Option<String>,
}

pub async fn handle_arp_ping(
    State(state): State<AppState>,
    Query(query): Query<ArpQuery>,
) -> Response {
    let Some(host) = query.host else {
        return missing_param("host");
    };

    let transport = state.transport.clone();
    let resolver = state.resolver.clone();
    let result = run_blocking(move || {
        arp_ping_with(
            transport.as_ref(),
            resolver.as_ref(),
            &host,
            DEFAULT_ARP_TIMEOUT,
        )
    })
    .await;

    match result {
        Ok(result) => Json(result).into_response(),
        Err(err) => probe_error_response(err),
    }
}

// ============================================================================
// Reverse DNS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RdnsQuery {
    pub ip: Option<String>,
}

pub async fn handle_rdns(Query(query): Query<RdnsQuery>) -> Response {
    let Some(ip) = query.ip else {
        return missing_param("ip");
    };
    Json(rdns_lookup(&ip).await).into_response()
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

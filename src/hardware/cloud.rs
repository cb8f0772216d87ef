use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::domain::{
    BatteryMode, EnergyTotals, GatewayError, GridStatus, ModeActuator, TelemetrySnapshot,
    TelemetrySource,
};

/// Vendor cloud API client for the battery gateway.
///
/// Logs in lazily and caches the session token for the life of the process.
/// A 401 drops the cached token so the next call logs in again.
pub struct CloudGateway {
    base_url: String,
    username: String,
    password: String,
    gateway_id: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl CloudGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("peak-dispatch/0.1"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            gateway_id: cfg.gateway_id.clone(),
            client,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        debug!(gateway_id = %self.gateway_id, "logging in to gateway cloud");
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(request_error)?;
        let login: LoginResponse = read_json(resp).await?;

        *self.token.write().await = Some(login.token.clone());
        info!(gateway_id = %self.gateway_id, "gateway cloud session established");
        Ok(login.token)
    }

    async fn invalidate_on_auth_error(&self, err: &GatewayError) {
        if matches!(err, GatewayError::Authentication(_)) {
            warn!("gateway rejected session token, dropping it");
            *self.token.write().await = None;
        }
    }
}

#[async_trait]
impl TelemetrySource for CloudGateway {
    async fn snapshot(&self) -> Result<TelemetrySnapshot, GatewayError> {
        let token = self.token().await?;
        let url = self.url(&format!("/gateways/{}/stats", self.gateway_id));
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;

        match read_json::<RawStats>(resp).await {
            Ok(raw) => Ok(raw.into_snapshot()),
            Err(e) => {
                self.invalidate_on_auth_error(&e).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ModeActuator for CloudGateway {
    async fn set_mode(&self, mode: BatteryMode) -> Result<(), GatewayError> {
        let token = self.token().await?;
        let url = self.url(&format!("/gateways/{}/mode", self.gateway_id));
        let resp = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&ModeRequest {
                mode: mode.api_name(),
            })
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = status_error(status, body);
            self.invalidate_on_auth_error(&err).await;
            return Err(err);
        }
        info!(%mode, api_mode = mode.api_name(), "gateway accepted mode command");
        Ok(())
    }
}

fn request_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else if e.is_decode() {
        GatewayError::InvalidPayload(e.to_string())
    } else {
        GatewayError::Connection(e.to_string())
    }
}

fn status_error(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Authentication(format!("HTTP {status}: {body}"))
        }
        _ => GatewayError::Upstream {
            status: status.as_u16(),
            body,
        },
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
    let status = resp.status();
    let body = resp.text().await.map_err(request_error)?;
    if !status.is_success() {
        return Err(status_error(status, body));
    }
    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct ModeRequest {
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct RawStats {
    current: RawCurrent,
    totals: RawTotals,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    battery_soc: f64,
    solar_production: f64,
    grid_use: f64,
    battery_use: f64,
    home_load: f64,
    grid_status: GridStatus,
}

#[derive(Debug, Deserialize)]
struct RawTotals {
    battery_charge: f64,
    battery_discharge: f64,
    grid_import: f64,
    solar: f64,
}

impl RawStats {
    fn into_snapshot(self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            observed_at: Utc::now(),
            soc_percent: self.current.battery_soc,
            solar_kw: self.current.solar_production,
            grid_kw: self.current.grid_use,
            battery_kw: self.current.battery_use,
            home_load_kw: self.current.home_load,
            grid_status: self.current.grid_status,
            totals: EnergyTotals {
                battery_charge_kwh: self.totals.battery_charge,
                battery_discharge_kwh: self.totals.battery_discharge,
                grid_import_kwh: self.totals.grid_import,
                solar_kwh: self.totals.solar,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> GatewayConfig {
        GatewayConfig {
            base_url,
            username: "owner@example.com".to_string(),
            password: "hunter2".to_string(),
            gateway_id: "GW-1".to_string(),
            timeout_seconds: 5,
            ..GatewayConfig::default()
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"username": "owner@example.com", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn stats_body() -> serde_json::Value {
        json!({
            "current": {
                "battery_soc": 72.5,
                "solar_production": 3.25,
                "grid_use": -0.4,
                "battery_use": -2.1,
                "home_load": 0.75,
                "grid_status": "normal"
            },
            "totals": {
                "battery_charge": 1520.2,
                "battery_discharge": 1480.9,
                "grid_import": 3301.0,
                "solar": 5120.7
            }
        })
    }

    #[tokio::test]
    async fn test_snapshot_parsed_and_token_reused() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/gateways/GW-1/stats"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_body()))
            .expect(2)
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        let snapshot = gateway.snapshot().await.unwrap();
        assert_eq!(snapshot.soc_percent, 72.5);
        assert_eq!(snapshot.solar_kw, 3.25);
        assert_eq!(snapshot.grid_status, GridStatus::Normal);
        assert_eq!(snapshot.totals.solar_kwh, 5120.7);

        gateway.snapshot().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        let err = gateway.snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/gateways/GW-1/stats"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        let err = gateway.snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_stats_is_invalid_payload() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/gateways/GW-1/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"current": {}})))
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        let err = gateway.snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_set_mode_sends_api_mode_name() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("PUT"))
            .and(path("/gateways/GW-1/mode"))
            .and(body_json(json!({"mode": "emergency_backup"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        gateway.set_mode(BatteryMode::GridCharge).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_token_dropped_after_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/gateways/GW-1/mode"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gateway = CloudGateway::new(&config(server.uri())).unwrap();
        assert!(gateway.set_mode(BatteryMode::SolarFirst).await.is_err());
        assert!(gateway.set_mode(BatteryMode::SolarFirst).await.is_err());
    }
}

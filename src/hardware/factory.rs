use std::sync::Arc;
use tracing::{info, warn};

use super::{CloudGateway, SimulatedGateway};
use crate::config::{GatewayConfig, GatewayProvider};
use crate::domain::{ModeActuator, TelemetrySource};
use crate::error::DispatchError;

const UNSET_MARKER: &str = "__SET_VIA_ENV";

/// Telemetry and actuator handles backed by the same gateway session
#[derive(Clone)]
pub struct GatewayHandles {
    pub telemetry: Arc<dyn TelemetrySource>,
    pub actuator: Arc<dyn ModeActuator>,
}

/// Build the configured gateway.
///
/// The cloud provider refuses to start with placeholder credentials so a
/// misconfigured deployment fails loudly instead of retrying a doomed login.
pub fn build_gateway(cfg: &GatewayConfig) -> Result<GatewayHandles, DispatchError> {
    match cfg.provider {
        GatewayProvider::Cloud => {
            for (name, value) in [
                ("gateway.username", &cfg.username),
                ("gateway.password", &cfg.password),
                ("gateway.gateway_id", &cfg.gateway_id),
            ] {
                if value.is_empty() || value.starts_with(UNSET_MARKER) {
                    return Err(DispatchError::Config(format!(
                        "{name} must be set (e.g. via PEAKD__{}) for the cloud provider",
                        name.to_uppercase().replace('.', "__")
                    )));
                }
            }
            let gateway = Arc::new(
                CloudGateway::new(cfg).map_err(|e| DispatchError::Config(e.to_string()))?,
            );
            info!(base_url = %cfg.base_url, gateway_id = %cfg.gateway_id, "using cloud gateway");
            Ok(GatewayHandles {
                telemetry: gateway.clone(),
                actuator: gateway,
            })
        }
        GatewayProvider::Sim => {
            if !cfg!(feature = "sim") {
                return Err(DispatchError::Config(
                    "gateway.provider = \"sim\" requires the 'sim' feature".to_string(),
                ));
            }
            warn!("using simulated gateway - no real mode commands will be sent");
            let gateway = Arc::new(SimulatedGateway::from_readings(&cfg.sim));
            Ok(GatewayHandles {
                telemetry: gateway.clone(),
                actuator: gateway,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_requires_credentials() {
        let cfg = GatewayConfig::default();
        let err = build_gateway(&cfg).err().unwrap();
        assert!(err.to_string().contains("PEAKD__GATEWAY__USERNAME"));
    }

    #[test]
    fn test_cloud_with_credentials_builds() {
        let cfg = GatewayConfig {
            username: "owner@example.com".to_string(),
            password: "secret".to_string(),
            gateway_id: "GW-1".to_string(),
            ..GatewayConfig::default()
        };
        assert!(build_gateway(&cfg).is_ok());
    }

    #[cfg(feature = "sim")]
    #[tokio::test]
    async fn test_sim_provider_serves_configured_readings() {
        let mut cfg = GatewayConfig {
            provider: GatewayProvider::Sim,
            ..GatewayConfig::default()
        };
        cfg.sim.soc_percent = 42.0;
        let handles = build_gateway(&cfg).unwrap();
        let snapshot = handles.telemetry.snapshot().await.unwrap();
        assert_eq!(snapshot.soc_percent, 42.0);
    }
}

//! Syntactic validation of service descriptions
//!
//! The registry only checks that service parameters have the right shape.
//! Deeper semantic validation of a description belongs to the scheduler
//! side of the platform; this service is the seam it plugs into.

use serde_json::Value;

use crate::{
    service::tokens::{JsonObject, SERVICE_PARAMETER_KEYS},
    Config, Error, Result,
};

#[derive(Clone)]
pub(crate) struct Service;

impl Service {
    pub(crate) fn load(_config: &Config) -> Self {
        Self
    }

    /// Rejects service parameters whose values do not have the expected
    /// shape. Keys outside the service-parameter set are ignored.
    pub(crate) fn validate_service_description(
        &self,
        params: &JsonObject,
    ) -> Result<()> {
        for (key, value) in params {
            if !SERVICE_PARAMETER_KEYS.contains(key.as_str()) {
                continue;
            }

            let ok = match key.as_str() {
                "cpus" | "mem" => value.as_f64().is_some_and(|n| n > 0.0),
                "ports"
                | "concurrency-level"
                | "idle-timeout-mins"
                | "interstitial-secs" => value.as_u64().is_some(),
                "authentication" => {
                    matches!(value.as_str(), Some("standard" | "disabled"))
                }
                "env" | "metadata" => value
                    .as_object()
                    .is_some_and(|map| map.values().all(Value::is_string)),
                "cmd" | "version" | "run-as-user" | "permitted-user"
                | "name" | "health-check-url" | "backend-proto"
                | "cmd-type" | "metric-group" => {
                    value.as_str().is_some_and(|text| !text.is_empty())
                }
                _ => true,
            };

            if !ok {
                return Err(Error::BadRequest(format!(
                    "Invalid value for parameter {key}"
                )));
            }
        }

        Ok(())
    }
}

//! OpenAPI specification generation for the scanwatch status API.

use axum::Json;
use scanwatch_core::{AdapterState, DeviceCount, KindCount, MetricsSnapshot, WarningCategory};
use utoipa::OpenApi;

use super::health::HealthResponse;
use super::metrics::MetricsResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for scanwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "scanwatch API",
        version = "0.1.0",
        description = r#"
# scanwatch API

Read-only status of a running scanwatch monitor.

scanwatch keeps a Bluetooth LE scan running across adapter power transitions
and counts the illegal-packet warnings the HCI layer reports. These endpoints
expose the same counters the periodic `[summary]` lines print.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local scanwatch monitor")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "metrics", description = "Scan and warning counters")
    ),
    paths(
        super::health::health_check,
        super::metrics::get_metrics,
    ),
    components(
        schemas(
            HealthResponse,
            AdapterState,
            MetricsResponse,
            MetricsSnapshot,
            KindCount,
            DeviceCount,
            WarningCategory,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "scanwatch API");
        assert_eq!(spec.paths.paths.len(), 2);
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"scanwatch API\""));
        assert!(json.contains("ext_adv_too_short"));
    }
}

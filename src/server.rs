use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::error;
use serde_json::json;
use std::sync::Arc;

use crate::meter::Meter;
use crate::snapshot::Snapshot;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Wraps any pipeline failure into a 500 response with a JSON error body.
pub struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Measurement failed: {:#}", self.0);
        let body = Json(json!({
            "error": format!("{:#}", self.0),
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub fn create_router(meter: Arc<Meter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/data", get(data))
        .with_state(meter)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Runs one measurement cycle per call, so `kWh` advances with every request.
async fn data(State(meter): State<Arc<Meter>>) -> Result<Json<Snapshot>, AppError> {
    // Sampling blocks for the whole observation window
    let snapshot = tokio::task::spawn_blocking(move || meter.measure())
        .await
        .context("Measurement task panicked")??;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::tests::ManualClock;
    use crate::accumulator::EnergyAccumulator;
    use crate::adc::{AdcSource, RawSample};
    use crate::config::{Calibration, SamplingWindow};
    use crate::corrector::Offsets;
    use crate::reader::ChannelReader;
    use crate::simulate::{MainsProfile, SimulatedMains};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn meter_with(source: Box<dyn AdcSource>) -> (Arc<Meter>, ManualClock) {
        let cal = Calibration::default();
        let reader = ChannelReader::new(source, cal, SamplingWindow::default());
        let clock = ManualClock::default();
        let energy = EnergyAccumulator::new(Box::new(clock.clone()));
        (Arc::new(Meter::new(reader, Offsets::from(&cal), energy)), clock)
    }

    fn simulated() -> (Arc<Meter>, ManualClock) {
        let profile = MainsProfile {
            vrms: 230.0,
            irms: 5.0,
            phase_deg: 0.0,
            frequency: 50.0,
            sample_rate: 5000.0,
            noise: 1.0,
        };
        meter_with(Box::new(SimulatedMains::seeded(
            profile,
            &Calibration::default(),
            5,
        )))
    }

    async fn send(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn index_serves_polling_page() {
        let (meter, _) = simulated();
        let response = send(create_router(meter), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(page.contains("fetch('/data')"));
    }

    #[tokio::test]
    async fn data_returns_snapshot() {
        let (meter, _) = simulated();
        let response = send(create_router(meter), "/data").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

        let body = json_body(response).await;
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 4);
        let vrms = body["Vrms"].as_f64().unwrap();
        let irms = body["Irms"].as_f64().unwrap();
        let power = body["Power"].as_f64().unwrap();
        assert!((vrms - 227.0).abs() < 3.0, "Vrms {}", vrms);
        assert!((irms - 4.6).abs() < 0.1, "Irms {}", irms);
        assert!((power - vrms * irms).abs() < 0.5);
        assert_eq!(body["kWh"].as_f64().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn each_data_request_integrates_energy() {
        let (meter, clock) = simulated();
        let app = create_router(Arc::clone(&meter));

        send(app.clone(), "/data").await;
        clock.advance(3_600_000);
        let body = json_body(send(app, "/data").await).await;

        let kwh = body["kWh"].as_f64().unwrap();
        let power = body["Power"].as_f64().unwrap();
        assert!((kwh - power / 1000.0).abs() < 0.002, "kWh {} for {} W", kwh, power);
    }

    #[tokio::test]
    async fn source_failure_is_500() {
        struct Unplugged;
        impl AdcSource for Unplugged {
            fn read(&mut self) -> anyhow::Result<RawSample> {
                anyhow::bail!("Serial port returned EOF while waiting for a sample")
            }
        }
        let (meter, _) = meter_with(Box::new(Unplugged));
        let response = send(create_router(meter), "/data").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("EOF"));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (meter, _) = simulated();
        let response = send(create_router(meter), "/metrics").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

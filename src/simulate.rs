//! Telemetry producer for local testing: posts one climbing-rocket sample
//! per tick to the ingestion endpoint.

use std::time::Duration;

use anyhow::Result;
use ground_core::SessionId;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{info, warn};

const GROUND_PRESSURE_HPA: f64 = 1013.25;
const SCALE_HEIGHT_M: f64 = 8500.0;
const ACCELERATION: f64 = 3.0;
const MAX_VELOCITY: f64 = 300.0;

/// One tick of simulated flight data.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub t: u64,
    pub velocity: f64,
    pub air_pressure: f64,
}

/// Flight state advanced one second per step.
#[derive(Debug, Default)]
pub struct Flight {
    t: u64,
    velocity: f64,
}

impl Flight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Reading {
        self.velocity += rng.gen_range(1.5..4.0);
        self.velocity = self
            .velocity
            .min(MAX_VELOCITY + rng.gen_range(-5.0..5.0));

        let t = self.t as f64;
        let altitude = 0.5 * ACCELERATION * t * t;
        let pressure = GROUND_PRESSURE_HPA * (-altitude / SCALE_HEIGHT_M).exp()
            + rng.gen_range(-0.5..0.5);

        let reading = Reading {
            t: self.t,
            velocity: round2(self.velocity),
            air_pressure: round2(pressure.max(1.0)),
        };
        self.t += 1;
        reading
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Ingestion request body for one reading.
pub fn payload(session: &SessionId, reading: &Reading) -> Value {
    json!({
        "timestamp": format!("T+{}", reading.t),
        "identifier": session,
        "velocity": reading.velocity,
        "air_pressure": reading.air_pressure,
    })
}

pub fn default_session() -> SessionId {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    SessionId::from_raw(format!("sim-{secs}"))
}

/// Post readings until Ctrl+C or `count` samples have been sent.
pub async fn run(url: &str, interval: Duration, session: SessionId, count: Option<u64>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut rng = rand::thread_rng();
    let mut flight = Flight::new();
    let mut ticker = tokio::time::interval(interval);
    let mut sent = 0u64;

    info!(%url, session_id = %session, interval_ms = interval.as_millis() as u64, "simulating launch telemetry");

    loop {
        if count.is_some_and(|n| sent >= n) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let reading = flight.step(&mut rng);
        let body = payload(&session, &reading);
        match client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(
                    t = reading.t,
                    velocity = reading.velocity,
                    air_pressure = reading.air_pressure,
                    "sample sent"
                );
            }
            Ok(resp) => warn!(t = reading.t, status = resp.status().as_u16(), "sample rejected"),
            Err(e) => warn!(t = reading.t, error = %e, "failed to send sample"),
        }
        sent += 1;
    }

    info!(sent, "simulation stopped");
    Ok(())
}

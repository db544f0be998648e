//! Synthetic urban wind processors for the in-process job gateway.
//!
//! Without a remote compute service the API registers these handlers so that
//! runs can be exercised end to end. The preparation job turns the uploaded
//! area of interest into a simulation domain; the simulation job fills the
//! domain with a sheltered wind field and its comfort classes.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{BoundingBox, Geometry};
use citysim_engine::analyses::urban_wind::{
    PREPARATION_PROCESSOR, SIMULATION_PROCESSOR, WIND_COMFORT, WIND_SPEED,
};
use citysim_engine::analyses::Grid;
use citysim_engine::gateway::{JobHandler, JobInputs};
use citysim_engine::LocalJobGateway;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

const DOMAIN: &str = "domain";
const MAX_CELLS_PER_AXIS: usize = 256;

/// Comfort class upper bounds in m/s
const COMFORT_BOUNDS: [f64; 4] = [2.0, 4.0, 6.0, 8.0];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Domain {
    bbox: [f64; 4],
    width: usize,
    height: usize,
}

impl Domain {
    fn new(bbox: BoundingBox, resolution: f64) -> Self {
        let cells = |extent: f64| ((extent / resolution).ceil() as usize).clamp(1, MAX_CELLS_PER_AXIS);
        Self {
            bbox: [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y],
            width: cells(bbox.width()),
            height: cells(bbox.height()),
        }
    }
}

/// Register both urban wind processors on `gateway`
pub fn register_urban_wind(gateway: &Arc<LocalJobGateway>) {
    gateway.register_processor_with_handler(PREPARATION_PROCESSOR, preparation(Arc::downgrade(gateway)));
    gateway.register_processor_with_handler(SIMULATION_PROCESSOR, simulation(Arc::downgrade(gateway)));
    tracing::info!("Registered synthetic urban wind processors");
}

fn preparation(gateway: Weak<LocalJobGateway>) -> JobHandler {
    Arc::new(move |inputs: &JobInputs| -> Result<BTreeMap<String, Vec<u8>>> {
        let aoi = content(&gateway, inputs, "aoi")?;
        let geometry: Geometry = serde_json::from_slice(&aoi)?;
        let bbox = geometry.bounding_box().ok_or_else(|| invalid("aoi", "area of interest is empty"))?;
        let resolution = number(inputs, "resolution")?;
        if resolution <= 0.0 {
            return Err(invalid("resolution", "must be positive"));
        }

        let domain = Domain::new(bbox, resolution);
        Ok(BTreeMap::from([(DOMAIN.to_string(), serde_json::to_vec(&domain)?)]))
    })
}

fn simulation(gateway: Weak<LocalJobGateway>) -> JobHandler {
    Arc::new(move |inputs: &JobInputs| -> Result<BTreeMap<String, Vec<u8>>> {
        let domain: Domain = serde_json::from_slice(&content(&gateway, inputs, DOMAIN)?)?;
        let direction = number(inputs, "wind_direction")?.to_radians();
        let speed = number(inputs, "wind_speed")?;

        let (speed_grid, comfort_grid) = wind_field(&domain, direction, speed);
        Ok(BTreeMap::from([
            (WIND_SPEED.to_string(), serde_json::to_vec(&speed_grid)?),
            (WIND_COMFORT.to_string(), serde_json::to_vec(&comfort_grid)?),
        ]))
    })
}

/// Wind speed decays downwind of the upwind edge; comfort is the class index
fn wind_field(domain: &Domain, direction: f64, speed: f64) -> (Grid, Grid) {
    let (dx, dy) = (direction.sin(), direction.cos());
    let cells = domain.width * domain.height;
    let mut speeds = Vec::with_capacity(cells);
    let mut classes = Vec::with_capacity(cells);

    for row in 0..domain.height {
        for col in 0..domain.width {
            let u = (col as f64 + 0.5) / domain.width as f64 - 0.5;
            let v = 0.5 - (row as f64 + 0.5) / domain.height as f64;
            // 0 at the upwind edge, 1 at the downwind edge
            let downwind = (0.5 - (u * dx + v * dy)).clamp(0.0, 1.0);
            let value = speed * (1.0 - 0.5 * downwind);

            speeds.push(Some(value));
            classes.push(Some(
                COMFORT_BOUNDS.iter().take_while(|bound| value > **bound).count() as f64,
            ));
        }
    }

    let grid = |values| Grid {
        bbox: domain.bbox,
        width: domain.width,
        height: domain.height,
        values,
    };
    (grid(speeds), grid(classes))
}

fn content(gateway: &Weak<LocalJobGateway>, inputs: &JobInputs, name: &str) -> Result<Vec<u8>> {
    let obj_id = inputs
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid(name, "missing data object reference"))?;
    gateway
        .upgrade()
        .and_then(|gateway| gateway.content(obj_id))
        .ok_or_else(|| CitysimError::DataObjectNotFound {
            obj_id: obj_id.to_string(),
        })
}

fn number(inputs: &JobInputs, name: &str) -> Result<f64> {
    inputs
        .get(name)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| invalid(name, "expected a number"))
}

fn invalid(name: &str, reason: &str) -> CitysimError {
    CitysimError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

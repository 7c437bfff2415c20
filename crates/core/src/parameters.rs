//! Mode parameter catalog.
//!
//! Each processing mode is described by a feedback template `A`, a control
//! template `B`, a time span `t`, a bias `Ib` and an initial state `init`.
//! The relay treats these as opaque configuration: it looks them up by mode
//! name and hands them to the executor and back to the client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name of the user-writable slot filled by [`ParameterUpdate`].
pub const SAVED_MODE: &str = "saved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParameters {
    #[serde(rename = "A")]
    pub a: Vec<Vec<f64>>,
    #[serde(rename = "B")]
    pub b: Vec<Vec<f64>>,
    pub t: Vec<f64>,
    #[serde(rename = "Ib")]
    pub ib: f64,
    pub init: f64,
}

/// Mode name to parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterCatalog {
    modes: BTreeMap<String, ModeParameters>,
}

impl ParameterCatalog {
    pub fn get(&self, mode: &str) -> Option<&ModeParameters> {
        self.modes.get(mode)
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.modes.contains_key(mode)
    }

    pub fn insert(&mut self, mode: impl Into<String>, params: ModeParameters) {
        self.modes.insert(mode.into(), params);
    }

    pub fn mode_names(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("invalid parameter catalog: {e}")))
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// The standard 3x3 cellular templates.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();

        catalog.insert(
            "edge_detect",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![-1.0, -1.0, -1.0],
                    vec![-1.0, 8.0, -1.0],
                    vec![-1.0, -1.0, -1.0],
                ],
                t: arange(1.0, 5.0, 0.01),
                ib: -1.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "grayscale_edge_detect",
            ModeParameters {
                a: centre(2.0),
                b: vec![
                    vec![-1.0, -1.0, -1.0],
                    vec![-1.0, 8.0, -1.0],
                    vec![-1.0, -1.0, -1.0],
                ],
                t: linspace(0.0, 1.0, 101),
                ib: 0.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "corner_detect",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![-1.0, 0.0, 1.0],
                    vec![0.0, 0.0, 0.0],
                    vec![1.0, 0.0, -1.0],
                ],
                t: arange(1.0, 3.0, 0.01),
                ib: 0.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "diagonal_line_detect",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![-1.0, 0.0, 1.0],
                    vec![0.0, 1.0, 0.0],
                    vec![1.0, 0.0, -1.0],
                ],
                t: linspace(0.0, 0.2, 101),
                ib: -4.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "inversion",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![0.0, 0.0, 0.0],
                    vec![1.0, 1.0, 1.0],
                    vec![0.0, 0.0, 0.0],
                ],
                t: linspace(0.0, 10.0, 101),
                ib: -2.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "noise_removal",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![0.05, 0.1, 0.05],
                    vec![0.1, 0.4, 0.1],
                    vec![0.05, 0.1, 0.05],
                ],
                t: arange(10.0, 20.0, 0.1),
                ib: 0.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "sharpen",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![0.0, -1.0, 0.0],
                    vec![-1.0, 5.0, -1.0],
                    vec![0.0, -1.0, 0.0],
                ],
                t: arange(1.0, 2.0, 0.01),
                ib: 0.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "blob_detect",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![1.0, 1.0, 1.0],
                    vec![1.0, -8.0, 1.0],
                    vec![1.0, 1.0, 1.0],
                ],
                t: linspace(0.0, 5.0, 101),
                ib: 3.0,
                init: 0.0,
            },
        );
        catalog.insert(
            "laplacian_edge",
            ModeParameters {
                a: centre(1.0),
                b: vec![
                    vec![0.0, 1.0, 0.0],
                    vec![1.0, -4.0, 1.0],
                    vec![0.0, 1.0, 0.0],
                ],
                t: arange(1.0, 5.0, 0.01),
                ib: 0.0,
                init: 0.0,
            },
        );
        catalog.insert(
            SAVED_MODE,
            ModeParameters {
                a: vec![vec![0.0; 3]; 3],
                b: vec![vec![0.0; 3]; 3],
                t: Vec::new(),
                ib: 0.0,
                init: 0.0,
            },
        );

        catalog
    }
}

/// Body of the parameter save endpoint.
///
/// Scalar fields arrive from a form and may be blank or non-numeric strings.
/// Omitted scalars take their field default; blank or garbage ones read as 0,
/// so a blank `stepsize` is rejected as zero.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParameterUpdate {
    pub radius: Option<u8>,
    #[serde(default)]
    pub fdb: Vec<serde_json::Value>,
    #[serde(default)]
    pub ctrl: Vec<serde_json::Value>,
    #[serde(default)]
    pub bias: Option<serde_json::Value>,
    #[serde(default)]
    pub tspan: Option<serde_json::Value>,
    #[serde(default)]
    pub initial: Option<serde_json::Value>,
    #[serde(default)]
    pub stepsize: Option<serde_json::Value>,
}

impl ParameterUpdate {
    /// Build the `saved` mode parameters, enforcing the template shape and
    /// time-range rules.
    pub fn into_parameters(self) -> Result<ModeParameters, CoreError> {
        let radius = self
            .radius
            .ok_or_else(|| CoreError::Validation("radius must be an integer".into()))?;
        if radius == 0 {
            return Err(CoreError::Validation(
                "radius is 0, expected a minimum of 1".into(),
            ));
        }
        if radius > 4 {
            return Err(CoreError::Validation("radius must be at most 4".into()));
        }

        let bias = lenient_f64(self.bias.as_ref(), 0.0);
        let tspan = lenient_f64(self.tspan.as_ref(), 0.0);
        let initial = lenient_f64(self.initial.as_ref(), 1.0);
        let stepsize = lenient_f64(self.stepsize.as_ref(), 0.1);

        if stepsize == 0.0 {
            return Err(CoreError::Validation("stepsize cannot be zero".into()));
        }
        if (initial < tspan && stepsize < 0.0) || (initial > tspan && stepsize > 0.0) {
            return Err(CoreError::Validation(
                "invalid range for initial, tspan and stepsize".into(),
            ));
        }

        let side = (1usize << radius) + 1;
        let fdb: Vec<f64> = self.fdb.iter().map(|v| lenient_f64(Some(v), 0.0)).collect();
        let ctrl: Vec<f64> = self.ctrl.iter().map(|v| lenient_f64(Some(v), 0.0)).collect();

        Ok(ModeParameters {
            a: reshape_rows(&ctrl, side, "ctrl")?,
            b: reshape_rows(&fdb, side, "fdb")?,
            t: arange(initial, tspan, stepsize),
            ib: bias,
            init: initial,
        })
    }
}

/// A missing field takes `default`. A present one that is blank, non-numeric
/// or not finite reads as 0.
fn lenient_f64(value: Option<&serde_json::Value>, default: f64) -> f64 {
    let Some(value) = value else {
        return default;
    };
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite()).unwrap_or(0.0)
}

/// Split a flat array into `rows` rows of equal length.
fn reshape_rows(values: &[f64], rows: usize, field: &str) -> Result<Vec<Vec<f64>>, CoreError> {
    if values.is_empty() || values.len() % rows != 0 {
        return Err(CoreError::Validation(format!(
            "{field} length {} is not divisible by {rows} rows",
            values.len()
        )));
    }
    Ok(values
        .chunks(values.len() / rows)
        .map(<[f64]>::to_vec)
        .collect())
}

fn centre(value: f64) -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0, 0.0],
        vec![0.0, value, 0.0],
        vec![0.0, 0.0, 0.0],
    ]
}

/// Values `start, start + step, ...` up to and including `stop`.
fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step == 0.0 {
        return Vec::new();
    }
    let count = ((stop - start) / step + 1e-9).floor();
    if count < 0.0 {
        return Vec::new();
    }
    (0..=count as usize)
        .map(|i| start + step * i as f64)
        .collect()
}

/// `count` evenly spaced values from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

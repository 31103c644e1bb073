//! Built-in client models.
//!
//! These cover the simple in-process units a configuration usually needs
//! next to server-backed drivers: a constant source, a static gain and a
//! discrete integrator. Each reads its settings from the driver's parameter
//! document in `associate`.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::driver::{ClientModel, DriverError, DriverResult, PortValues};
use crate::signal::Signal;
use crate::types::Tick;

fn parse<T: for<'de> Deserialize<'de> + Default>(params: &serde_json::Value) -> DriverResult<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| DriverError::model(e.to_string()))
}

fn default_gain() -> f64 {
    1.0
}

/// Publishes fixed values.
///
/// ```yaml
/// values:
///   setpoint: [1.0, 0.5]
///   offset: 3.0
/// ```
#[derive(Debug, Default)]
pub struct ConstantModel {
    values: PortValues,
}

#[derive(Deserialize, Default)]
struct ConstantParams {
    #[serde(default)]
    values: BTreeMap<String, Numeric>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl From<Numeric> for Signal {
    fn from(n: Numeric) -> Self {
        match n {
            Numeric::Scalar(x) => Signal::scalar(x),
            Numeric::Vector(v) => Signal::vector(v),
        }
    }
}

impl ConstantModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientModel for ConstantModel {
    fn associate(&mut self, params: &serde_json::Value) -> DriverResult<()> {
        let params: ConstantParams = parse(params)?;
        self.values = params
            .values
            .into_iter()
            .map(|(port, v)| (port, v.into()))
            .collect();
        Ok(())
    }

    fn update(&mut self, _tick: Tick, _inputs: &PortValues) -> DriverResult<()> {
        Ok(())
    }

    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        Ok(self.values.clone())
    }
}

#[derive(Deserialize)]
struct GainParams {
    #[serde(default = "default_gain")]
    gain: f64,
    /// output port -> input port
    #[serde(default)]
    routes: BTreeMap<String, String>,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            routes: BTreeMap::new(),
        }
    }
}

/// Multiplies inputs by a scalar gain.
///
/// Without `routes`, each input is published on the output of the same name.
#[derive(Debug)]
pub struct GainModel {
    gain: f64,
    routes: BTreeMap<String, String>,
    last: PortValues,
}

impl GainModel {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            routes: BTreeMap::new(),
            last: PortValues::new(),
        }
    }

    /// Publishes `gain × input` on `output`.
    pub fn route(mut self, output: impl Into<String>, input: impl Into<String>) -> Self {
        self.routes.insert(output.into(), input.into());
        self
    }
}

impl Default for GainModel {
    fn default() -> Self {
        Self::new(default_gain())
    }
}

impl ClientModel for GainModel {
    fn associate(&mut self, params: &serde_json::Value) -> DriverResult<()> {
        let params: GainParams = parse(params)?;
        self.gain = params.gain;
        self.routes.extend(params.routes);
        Ok(())
    }

    fn update(&mut self, _tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        let gain = self.gain;
        self.last = if self.routes.is_empty() {
            inputs
                .iter()
                .map(|(port, u)| (port.clone(), u.map(|x| gain * x)))
                .collect()
        } else {
            let mut out = PortValues::new();
            for (output, input) in &self.routes {
                let u = inputs
                    .get(input)
                    .ok_or_else(|| DriverError::model(format!("missing input {}", input)))?;
                out.insert(output.clone(), u.map(|x| gain * x));
            }
            out
        };
        Ok(())
    }

    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        Ok(self.last.clone())
    }
}

#[derive(Deserialize)]
struct IntegratorParams {
    #[serde(default = "default_gain")]
    gain: f64,
    input: Option<String>,
    output: Option<String>,
}

impl Default for IntegratorParams {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            input: None,
            output: None,
        }
    }
}

/// Discrete integrator: `y += gain × u` on every due update.
///
/// Reads input `u` and publishes output `y` unless renamed in the parameters.
#[derive(Debug)]
pub struct IntegratorModel {
    gain: f64,
    input: String,
    output: String,
    state: Option<Signal>,
}

impl IntegratorModel {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            input: "u".to_string(),
            output: "y".to_string(),
            state: None,
        }
    }

    /// Current integrator state.
    pub fn state(&self) -> Option<&Signal> {
        self.state.as_ref()
    }
}

impl Default for IntegratorModel {
    fn default() -> Self {
        Self::new(default_gain())
    }
}

impl ClientModel for IntegratorModel {
    fn associate(&mut self, params: &serde_json::Value) -> DriverResult<()> {
        let params: IntegratorParams = parse(params)?;
        self.gain = params.gain;
        if let Some(input) = params.input {
            self.input = input;
        }
        if let Some(output) = params.output {
            self.output = output;
        }
        Ok(())
    }

    fn init(&mut self) -> DriverResult<()> {
        self.state = None;
        Ok(())
    }

    fn update(&mut self, _tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        let u = inputs
            .get(&self.input)
            .ok_or_else(|| DriverError::model(format!("missing input {}", self.input)))?;
        let gain = self.gain;
        let next = match self.state.take() {
            None => u.map(|x| gain * x),
            Some(y) if y.shape() == u.shape() => {
                let data = y
                    .as_slice()
                    .iter()
                    .zip(u.as_slice())
                    .map(|(a, b)| a + gain * b)
                    .collect();
                Signal::new(y.shape().to_vec(), data)
                    .ok_or_else(|| DriverError::model("integrator state shape"))?
            }
            Some(y) => {
                return Err(DriverError::model(format!(
                    "input {} changed shape from {:?} to {:?}",
                    self.input,
                    y.shape(),
                    u.shape()
                )))
            }
        };
        self.state = Some(next);
        Ok(())
    }

    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        let mut values = PortValues::new();
        if let Some(y) = &self.state {
            values.insert(self.output.clone(), y.clone());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Signal)]) -> PortValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_constant() {
        let mut m = ConstantModel::new();
        m.associate(&json!({ "values": { "sp": [1.0, 2.0], "k": 3.0 } }))
            .unwrap();
        let out = m.output(0).unwrap();
        assert_eq!(out["sp"], Signal::vector(vec![1.0, 2.0]));
        assert_eq!(out["k"], Signal::scalar(3.0));

        let mut empty = ConstantModel::new();
        empty.associate(&serde_json::Value::Null).unwrap();
        assert!(empty.output(0).unwrap().is_empty());
    }

    #[test]
    fn test_gain_same_names() {
        let mut m = GainModel::default();
        m.associate(&json!({ "gain": -2.0 })).unwrap();
        m.update(0, &inputs(&[("e", Signal::vector(vec![1.0, 0.5]))]))
            .unwrap();
        assert_eq!(m.output(0).unwrap()["e"], Signal::vector(vec![-2.0, -1.0]));
    }

    #[test]
    fn test_gain_routes() {
        let mut m = GainModel::new(0.5).route("torque", "error");
        m.update(0, &inputs(&[("error", Signal::scalar(4.0))])).unwrap();
        let out = m.output(0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["torque"], Signal::scalar(2.0));

        let err = m.update(1, &PortValues::new()).unwrap_err();
        assert!(err.to_string().contains("missing input error"));
    }

    #[test]
    fn test_bad_params() {
        let mut m = GainModel::default();
        assert!(m.associate(&json!({ "gain": "high" })).is_err());
    }

    #[test]
    fn test_integrator() {
        let mut m = IntegratorModel::default();
        m.associate(&json!({ "gain": 0.1, "input": "torque", "output": "angle" }))
            .unwrap();
        assert!(m.output(0).unwrap().is_empty());

        for k in 0..3 {
            m.update(k, &inputs(&[("torque", Signal::vector(vec![1.0, -1.0]))]))
                .unwrap();
        }
        let angle = &m.output(3).unwrap()["angle"];
        assert!((angle.as_slice()[0] - 0.3).abs() < 1e-12);
        assert!((angle.as_slice()[1] + 0.3).abs() < 1e-12);

        let err = m
            .update(3, &inputs(&[("torque", Signal::scalar(1.0))]))
            .unwrap_err();
        assert!(err.to_string().contains("changed shape"));
    }
}

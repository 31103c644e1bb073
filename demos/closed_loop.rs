//! Closed-loop example.
//!
//! A server-backed `mount` integrates the torque it receives; an in-process
//! `controller` running the built-in gain model closes the loop on the mount
//! encoder at half the base rate. The execution server is emulated in-process
//! by a [`RequestHandler`], so the example runs without a network peer while
//! every request still goes through the wire codec.
//!
//! Run with: `cargo run --example closed_loop`

use std::collections::BTreeMap;

use dos::broker::loopback::{LoopbackTransport, RequestHandler};
use dos::broker::{Reply, Request};
use dos::config::SimConfig;
use dos::{Direction, PortValues, SimContext, Signal, Simulation};

const DOS_YAML: &str = r#"
simulation:
  server: { IP: 127.0.0.1 }
  sampling frequency: 100
  duration: 1
drivers:
  atmosphere:
  mount:
    inputs:
      torque: { size: 1, lien: [controller, torque] }
    outputs:
      encoder: { size: 1, logs: { decimation: 10 } }
  controller:
    server: false
    client: gain
    sampling rate: 2
    inputs:
      error: { size: 1, lien: [mount, encoder] }
    outputs:
      torque: { size: 1, logs: { decimation: 10 } }
"#;

/// Emulated execution server: one integrator per pushed driver.
#[derive(Default)]
struct PlantServer {
    gains: BTreeMap<String, f64>,
    states: BTreeMap<String, f64>,
}

impl RequestHandler for PlantServer {
    fn handle(&mut self, request: Request) -> Reply {
        match request {
            Request::Handshake { .. } => Reply::ack("plant server ready"),
            Request::PushConfig { driver, params, .. } => {
                let gain = params["gain"].as_f64().unwrap_or(1.0);
                let x0 = params["x0"].as_f64().unwrap_or(0.0);
                self.gains.insert(driver.clone(), gain);
                self.states.insert(driver, x0);
                Reply::ack("pushed")
            }
            Request::Update { driver, inputs, .. } => {
                let u = inputs
                    .get("torque")
                    .map_or(0.0, |s| s.as_slice().first().copied().unwrap_or(0.0));
                let gain = self.gains.get(&driver).copied().unwrap_or(1.0);
                if let Some(x) = self.states.get_mut(&driver) {
                    *x += gain * u;
                }
                Reply::ack("updated")
            }
            Request::Output { driver, ports, .. } => {
                let x = self.states.get(&driver).copied().unwrap_or(0.0);
                let values: PortValues = ports
                    .into_iter()
                    .map(|p| (p, Signal::vector(vec![x])))
                    .collect();
                Reply::Outputs { values }
            }
            Request::Command { method, .. } => Reply::Error {
                message: format!("unknown method {}", method),
            },
            other => Reply::ack(other.kind()),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dos::init_logging("info");

    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("dos.yaml"), DOS_YAML)?;
    std::fs::write(dir.path().join("atmosphere.yaml"), "r0: 0.15\nL0: 30\n")?;
    std::fs::write(dir.path().join("mount.yaml"), "gain: 0.2\nx0: 1.0\n")?;
    std::fs::write(
        dir.path().join("controller.yaml"),
        "gain: -0.5\nroutes: { torque: error }\n",
    )?;

    let config = SimConfig::from_dir(dir.path())?;
    let mut sim = Simulation::builder(config, dir.path())
        .context(SimContext::new("closed-loop"))
        .transport(Box::new(LoopbackTransport::new(PlantServer::default())))
        .build()?;

    println!(
        "mount.torque <- {}",
        sim.lien("mount", Direction::Input, "torque")
            .map(|l| l.to_string())
            .unwrap_or_default()
    );

    sim.run()?;
    println!("Complete: {}%", sim.pct_complete());
    println!("{}", sim.logs());

    let encoder = sim.logs().time_series("mount", "encoder")?;
    for (t, x) in encoder.time.iter().zip(encoder.values.as_slice()) {
        println!("t = {:.2}s  encoder = {:+.4}", t, x);
    }

    println!("{}", sim.diagram());
    println!("{}", sim.stats().summary());
    Ok(())
}

//! Timing diagram of a wired driver set.
//!
//! Driver methods are grouped by the number of base ticks between two of
//! their invocations; the groups and the resolved liens are emitted as
//! graphviz DOT text. Rendering is left to graphviz.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::driver::Driver;
use crate::types::Direction;
use crate::wiring::PortGraph;

/// A scheduled driver method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Method {
    Delay,
    Update,
    Output,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Delay => "delay",
            Method::Update => "update",
            Method::Output => "output",
        })
    }
}

/// Driver methods grouped by rate, drivers in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateGroups {
    groups: BTreeMap<u64, Vec<(String, Vec<Method>)>>,
}

impl RateGroups {
    /// Groups the methods of `drivers`.
    pub fn from_drivers<D: Driver>(drivers: &[D]) -> Self {
        let mut groups = Self::default();
        for d in drivers {
            if d.delay() > 0 {
                groups.add(d.delay(), d.name(), Method::Delay);
            }
            groups.add(d.sampling_rate(), d.name(), Method::Update);
            for port in d.outputs() {
                groups.add(port.sampling_rate(), d.name(), Method::Output);
            }
        }
        groups
    }

    fn add(&mut self, rate: u64, driver: &str, method: Method) {
        let group = self.groups.entry(rate).or_default();
        match group.iter_mut().find(|(d, _)| d == driver) {
            Some((_, methods)) => {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
            None => group.push((driver.to_string(), vec![method])),
        }
    }

    /// Rates in increasing order.
    pub fn rates(&self) -> impl Iterator<Item = u64> + '_ {
        self.groups.keys().copied()
    }

    /// Drivers and methods scheduled at `rate`.
    pub fn get(&self, rate: u64) -> Option<&[(String, Vec<Method>)]> {
        self.groups.get(&rate).map(Vec::as_slice)
    }

    /// First rate at which `driver` runs `method`.
    pub fn rate_of(&self, driver: &str, method: Method) -> Option<u64> {
        self.groups.iter().find_map(|(&rate, group)| {
            group
                .iter()
                .any(|(d, m)| d == driver && m.contains(&method))
                .then_some(rate)
        })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Duration of `ticks` base ticks, in ms below one second.
pub fn time_label(ticks: u64, sampling_frequency: f64) -> String {
    let t = ticks as f64 / sampling_frequency;
    if t < 1.0 {
        format!("{:.1}ms", t * 1e3)
    } else {
        format!("{:.1}s", t)
    }
}

/// Rate groups and their DOT rendering.
#[derive(Clone, Debug)]
pub struct Diagram {
    pub groups: RateGroups,
    pub dot: String,
}

impl Diagram {
    /// Builds the diagram of a wired driver set.
    pub fn build<D: Driver>(drivers: &[D], graph: &PortGraph, sampling_frequency: f64) -> Self {
        let groups = RateGroups::from_drivers(drivers);
        let mut dot = String::new();
        // writing into a String cannot fail
        let _ = write_dot(&mut dot, drivers, graph, &groups, sampling_frequency);
        Self { groups, dot }
    }
}

impl fmt::Display for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dot)
    }
}

fn cell(rate: u64, driver: &str, method: Method) -> String {
    format!("\"{0}_{1}\":{1}_{2}", rate, driver, method)
}

fn write_dot<D: Driver>(
    w: &mut String,
    drivers: &[D],
    graph: &PortGraph,
    groups: &RateGroups,
    sampling_frequency: f64,
) -> fmt::Result {
    writeln!(w, "digraph {{")?;
    writeln!(w, "  node [shape=plaintext];")?;

    for rate in groups.rates() {
        writeln!(w, "  subgraph \"rate_{}\" {{", rate)?;
        writeln!(w, "    rank=same;")?;
        writeln!(
            w,
            "    \"{}\" [label=\"{}\"];",
            rate,
            time_label(rate, sampling_frequency)
        )?;
        for (driver, methods) in groups.get(rate).unwrap_or_default() {
            let mut rows = format!("<TR><TD><B>{}</B></TD></TR>", driver);
            for m in methods {
                rows.push_str(&format!("<TR><TD PORT=\"{0}_{1}\">{1}</TD></TR>", driver, m));
            }
            writeln!(
                w,
                "    \"{}_{}\" [label=<<TABLE BORDER=\"0\" CELLBORDER=\"1\">{}</TABLE>>];",
                rate, driver, rows
            )?;
        }
        writeln!(w, "  }}")?;
    }

    let rates: Vec<u64> = groups.rates().collect();
    for pair in rates.windows(2) {
        writeln!(w, "  \"{}\" -> \"{}\";", pair[0], pair[1])?;
    }

    for edge in graph.edges() {
        let (Some(from), Some(to)) = (graph.node(edge.from), graph.node(edge.to)) else {
            continue;
        };
        let (Some(src), Some(dst)) = (drivers.get(from.driver), drivers.get(to.driver)) else {
            continue;
        };
        let out_rate = src
            .ports()
            .find(Direction::Output, &from.name)
            .map(|p| p.sampling_rate())
            .unwrap_or_else(|| src.sampling_rate());
        writeln!(
            w,
            "  {} -> {};",
            cell(out_rate, src.name(), Method::Output),
            cell(dst.sampling_rate(), dst.name(), Method::Update)
        )?;
    }

    writeln!(w, "}}")
}

//! Port wiring.
//!
//! Ties declared in the configuration are resolved once, after every driver
//! exists, into a [`PortGraph`]: an arena of port nodes and index edges from
//! outputs to inputs. Drivers are referred to by their position in
//! declaration order; nothing in the graph points back into a driver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::config::TieTarget;
use crate::driver::Driver;
use crate::types::{Direction, DriverIndex, PortIndex};

/// What to do with a tie whose target does not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WiringPolicy {
    /// Fail construction
    #[default]
    Strict,
    /// Leave the port unwired and record a warning
    Lenient,
}

/// A declared tie that points to a missing driver or port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedTie {
    pub driver: String,
    pub port: String,
    pub direction: Direction,
    pub target: TieTarget,
}

impl fmt::Display for UnresolvedTie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} is tied to {}.{}, which does not exist",
            self.direction,
            self.driver,
            self.port,
            self.target.driver(),
            self.target.port()
        )
    }
}

/// Errors detected while wiring ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    #[error("{0}")]
    UnresolvedTie(UnresolvedTie),

    #[error("{driver}.{port} is tied to {driver}.{target}: a driver cannot consume its own output of the same tick")]
    SameTickCycle {
        driver: String,
        port: String,
        target: String,
    },

    #[error("input {driver}.{port} has two sources: {first} and {second}")]
    ConflictingSources {
        driver: String,
        port: String,
        first: String,
        second: String,
    },
}

/// Resolved peer of a port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Lien {
    pub driver: String,
    pub port: String,
}

impl fmt::Display for Lien {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.driver, self.port)
    }
}

/// One port in the arena.
#[derive(Clone, Debug, PartialEq)]
pub struct PortNode {
    pub driver: DriverIndex,
    pub name: String,
    pub direction: Direction,
    pub size: usize,
    lien: Option<PortIndex>,
}

/// A data dependency from an output to an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: PortIndex,
    pub to: PortIndex,
}

/// Resolved wiring of a driver set.
#[derive(Clone, Debug, Default)]
pub struct PortGraph {
    drivers: Vec<String>,
    driver_index: HashMap<String, DriverIndex>,
    nodes: Vec<PortNode>,
    directory: HashMap<(DriverIndex, Direction, String), PortIndex>,
    edges: Vec<Edge>,
    sources: HashMap<PortIndex, PortIndex>,
    unresolved: Vec<UnresolvedTie>,
}

impl PortGraph {
    /// Resolves the ties declared on `drivers`.
    ///
    /// The result only depends on the driver set: resolving twice gives the
    /// same graph.
    pub fn resolve<D: Driver>(drivers: &[D], policy: WiringPolicy) -> Result<Self, WiringError> {
        let mut graph = PortGraph::default();

        for (index, driver) in drivers.iter().enumerate() {
            graph.drivers.push(driver.name().to_string());
            graph.driver_index.insert(driver.name().to_string(), index);
            for port in driver.inputs().iter().chain(driver.outputs()) {
                let id = graph.nodes.len();
                graph.nodes.push(PortNode {
                    driver: index,
                    name: port.name().to_string(),
                    direction: port.direction(),
                    size: port.size(),
                    lien: None,
                });
                graph
                    .directory
                    .insert((index, port.direction(), port.name().to_string()), id);
            }
        }

        for (index, driver) in drivers.iter().enumerate() {
            for port in driver.inputs().iter().chain(driver.outputs()) {
                let Some(target) = port.declared_tie() else {
                    continue;
                };
                if target.driver() == driver.name() {
                    return Err(WiringError::SameTickCycle {
                        driver: driver.name().to_string(),
                        port: port.name().to_string(),
                        target: target.port().to_string(),
                    });
                }
                let id = graph.directory[&(index, port.direction(), port.name().to_string())];
                let peer = graph.driver_index.get(target.driver()).and_then(|&d| {
                    graph
                        .directory
                        .get(&(d, port.direction().opposite(), target.port().to_string()))
                        .copied()
                });
                let Some(peer) = peer else {
                    let tie = UnresolvedTie {
                        driver: driver.name().to_string(),
                        port: port.name().to_string(),
                        direction: port.direction(),
                        target: target.clone(),
                    };
                    match policy {
                        WiringPolicy::Strict => return Err(WiringError::UnresolvedTie(tie)),
                        WiringPolicy::Lenient => {
                            tracing::warn!("{}; leaving it unwired", tie);
                            graph.unresolved.push(tie);
                            continue;
                        }
                    }
                };
                graph.nodes[id].lien = Some(peer);
                let edge = match port.direction() {
                    Direction::Input => Edge { from: peer, to: id },
                    Direction::Output => Edge { from: id, to: peer },
                };
                graph.connect(edge)?;
            }
        }

        // inputs fed from the output side see their source as their lien
        for edge in &graph.edges {
            if graph.nodes[edge.to].lien.is_none() {
                graph.nodes[edge.to].lien = Some(edge.from);
            }
        }

        Ok(graph)
    }

    fn connect(&mut self, edge: Edge) -> Result<(), WiringError> {
        match self.sources.get(&edge.to) {
            Some(&from) if from == edge.from => Ok(()),
            Some(&from) => {
                let input = &self.nodes[edge.to];
                Err(WiringError::ConflictingSources {
                    driver: self.drivers[input.driver].clone(),
                    port: input.name.clone(),
                    first: self.qualified(from),
                    second: self.qualified(edge.from),
                })
            }
            None => {
                self.sources.insert(edge.to, edge.from);
                self.edges.push(edge);
                Ok(())
            }
        }
    }

    fn qualified(&self, id: PortIndex) -> String {
        let node = &self.nodes[id];
        format!("{}.{}", self.drivers[node.driver], node.name)
    }

    /// Position of a driver in declaration order.
    pub fn driver_index(&self, name: &str) -> Option<DriverIndex> {
        self.driver_index.get(name).copied()
    }

    /// Name of the driver at `index`.
    pub fn driver_name(&self, index: DriverIndex) -> Option<&str> {
        self.drivers.get(index).map(String::as_str)
    }

    /// Arena index of a port.
    pub fn port_index(&self, driver: &str, direction: Direction, port: &str) -> Option<PortIndex> {
        let d = self.driver_index(driver)?;
        self.directory.get(&(d, direction, port.to_string())).copied()
    }

    /// Arena index of a port of the driver at `driver`.
    pub fn port_at(&self, driver: DriverIndex, direction: Direction, port: &str) -> Option<PortIndex> {
        self.directory.get(&(driver, direction, port.to_string())).copied()
    }

    pub fn node(&self, id: PortIndex) -> Option<&PortNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[PortNode] {
        &self.nodes
    }

    /// Output → input edges, in resolution order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The output feeding an input, if any.
    pub fn source_of(&self, input: PortIndex) -> Option<PortIndex> {
        self.sources.get(&input).copied()
    }

    /// Resolved peer of a port.
    pub fn lien(&self, driver: &str, direction: Direction, port: &str) -> Option<Lien> {
        let id = self.port_index(driver, direction, port)?;
        let peer = &self.nodes[self.nodes[id].lien?];
        Some(Lien {
            driver: self.drivers[peer.driver].clone(),
            port: peer.name.clone(),
        })
    }

    /// Ties left unwired under [`WiringPolicy::Lenient`].
    pub fn unresolved(&self) -> &[UnresolvedTie] {
        &self.unresolved
    }

    /// Lien table of every wired port, for comparison and display.
    pub fn liens(&self) -> Vec<(String, Direction, String, Lien)> {
        self.nodes
            .iter()
            .filter_map(|n| {
                let peer = &self.nodes[n.lien?];
                Some((
                    self.drivers[n.driver].clone(),
                    n.direction,
                    n.name.clone(),
                    Lien {
                        driver: self.drivers[peer.driver].clone(),
                        port: peer.name.clone(),
                    },
                ))
            })
            .collect()
    }
}

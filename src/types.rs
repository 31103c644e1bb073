//! Core type definitions for the orchestrator.
//!
//! This module defines the fundamental types shared by the registry, the
//! wiring resolver, the scheduler and the logs.

use serde::{Deserialize, Serialize};

/// Simulation tick index.
///
/// Ticks are counted from 0 to `N_SAMPLE - 1`; one tick advances the
/// simulated time by `τ = 1 / sampling_frequency`.
pub type Tick = u64;

/// Position of a driver in declaration order.
///
/// Drivers are stored in a `Vec` and every pass over the driver set walks
/// them in this order.
pub type DriverIndex = usize;

/// Index of a port node in the wiring arena.
pub type PortIndex = usize;

/// Reserved driver name for the environment role.
pub const ENVIRONMENT_ROLE: &str = "atmosphere";

/// Direction of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Consumed during the update pass
    Input,
    /// Published during the output pass
    Output,
}

impl Direction {
    /// Returns the direction a tie from this port must point to.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

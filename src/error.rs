//! Error types for allocation operations

use crate::auction::types::{ItemId, Material, RobotId, RoundId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a committed item can no longer be built by its holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Infeasibility {
    /// A time-windowed material was not collected before its window closed
    MaterialExpired(Material),
    /// The environment ran out of a scarce material
    MaterialExhausted(Material),
    /// The target site cannot be worked on
    SiteUnavailable(String),
}

impl std::fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaterialExpired(m) => write!(f, "material {} expired", m),
            Self::MaterialExhausted(m) => write!(f, "material {} exhausted", m),
            Self::SiteUnavailable(site) => write!(f, "site {} unavailable", site),
        }
    }
}

/// Errors that can occur during allocation operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Round {0} is closed or expired")]
    StaleRound(RoundId),
    #[error("Item {item} is not open in round {round}")]
    UnknownItem { round: RoundId, item: ItemId },
    #[error("Robot {robot} already bid on item {item} in round {round}")]
    DuplicateBid {
        round: RoundId,
        item: ItemId,
        robot: RobotId,
    },
    #[error(
        "Cost mismatch for item {item} on robot {robot}: expected delta ({expected_distance:.3}, {expected_time:.3}), bid marginal ({marginal_distance:.3}, {marginal_time:.3})"
    )]
    CostMismatch {
        robot: RobotId,
        item: ItemId,
        expected_distance: f64,
        expected_time: f64,
        marginal_distance: f64,
        marginal_time: f64,
    },
    #[error("Item {item} received no usable bids after {attempts} rounds")]
    Unassignable { item: ItemId, attempts: u32 },
    #[error("Robot {0} dropped out")]
    RobotDropout(RobotId),
    #[error("Item {item} is infeasible: {reason}")]
    InfeasiblePrecondition { item: ItemId, reason: Infeasibility },
    #[error("Robot {0} is not registered")]
    UnknownRobot(RobotId),
    #[error("Invalid bid: {0}")]
    InvalidBid(String),
    #[error("Item already exists")]
    ItemAlreadyExists,
    #[error("Capacity full")]
    CapacityFull,
    #[error("Index out of bounds")]
    IndexOutOfBounds,
    #[error("State error: {0}")]
    StateError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// A specialized Result type for allocation operations
pub type Result<T> = std::result::Result<T, Error>;

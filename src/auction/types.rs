//! Core types shared by the allocation components

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::mechanism::MechanismKind;
use crate::error::{Error, Infeasibility};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(v: &str) -> Self {
        ItemId(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(pub String);

impl std::fmt::Display for RobotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RobotId {
    fn from(v: &str) -> Self {
        RobotId(v.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(self) -> Self {
        RoundId(self.0 + 1)
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulation time in microseconds since scenario start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs.max(0.0) * 1e6).round() as u64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e6
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(d.as_micros() as u64))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

pub const MATERIAL_COUNT: usize = 6;

/// Closed set of construction materials
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Material {
    Grey = 0,
    Red = 1,
    Blue = 2,
    Green = 3,
    White = 4,
    Black = 5,
}

/// Per-material handling constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTraits {
    /// Material must be collected within this long after commit
    pub time_window: Option<Duration>,
    /// Robots needed to collect one unit
    pub collectors: u8,
    /// Supply is limited and may run out
    pub scarce: bool,
}

impl Material {
    pub const ALL: [Material; MATERIAL_COUNT] = [
        Material::Grey,
        Material::Red,
        Material::Blue,
        Material::Green,
        Material::White,
        Material::Black,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn traits(self) -> MaterialTraits {
        match self {
            Material::Grey | Material::White => MaterialTraits {
                time_window: None,
                collectors: 1,
                scarce: false,
            },
            Material::Red => MaterialTraits {
                time_window: Some(Duration::from_secs(120)),
                collectors: 1,
                scarce: false,
            },
            Material::Blue => MaterialTraits {
                time_window: None,
                collectors: 2,
                scarce: false,
            },
            Material::Green => MaterialTraits {
                time_window: None,
                collectors: 1,
                scarce: true,
            },
            Material::Black => MaterialTraits {
                time_window: Some(Duration::from_secs(300)),
                collectors: 1,
                scarce: true,
            },
        }
    }
}

impl std::fmt::Display for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Material::Grey => "GREY",
            Material::Red => "RED",
            Material::Blue => "BLUE",
            Material::Green => "GREEN",
            Material::White => "WHITE",
            Material::Black => "BLACK",
        };
        write!(f, "{}", name)
    }
}

/// A construction job: materials to collect and the site to build at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub material_count: [u32; MATERIAL_COUNT],
    pub site: String,
}

impl Item {
    pub fn new(item_id: impl Into<ItemId>, material_count: [u32; MATERIAL_COUNT], site: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            material_count,
            site: site.into(),
        }
    }

    pub fn count(&self, material: Material) -> u32 {
        self.material_count[material.index()]
    }

    /// Materials with a non-zero requirement, in enumeration order
    pub fn materials(&self) -> impl Iterator<Item = (Material, u32)> + '_ {
        Material::ALL
            .iter()
            .map(|m| (*m, self.count(*m)))
            .filter(|(_, n)| *n > 0)
    }

    /// Tightest time window among the required materials
    pub fn time_window(&self) -> Option<(Material, Duration)> {
        self.materials()
            .filter_map(|(m, _)| m.traits().time_window.map(|w| (m, w)))
            .min_by_key(|(_, w)| *w)
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.item_id, self.site)
    }
}

impl From<String> for ItemId {
    fn from(v: String) -> Self {
        ItemId(v)
    }
}

impl From<String> for RobotId {
    fn from(v: String) -> Self {
        RobotId(v)
    }
}

/// A distance/time cost pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Cost {
    pub distance: f64,
    pub time: f64,
}

impl Cost {
    pub const ZERO: Cost = Cost {
        distance: 0.0,
        time: 0.0,
    };

    pub fn new(distance: f64, time: f64) -> Self {
        Self { distance, time }
    }

    /// Component-wise difference floored at zero
    pub fn saturating_sub(&self, other: Cost) -> Cost {
        Cost {
            distance: (self.distance - other.distance).max(0.0),
            time: (self.time - other.time).max(0.0),
        }
    }
}

impl std::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.distance + rhs.distance, self.time + rhs.time)
    }
}

impl std::ops::Sub for Cost {
    type Output = Cost;
    fn sub(self, rhs: Cost) -> Cost {
        Cost::new(self.distance - rhs.distance, self.time - rhs.time)
    }
}

impl std::fmt::Display for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(d={:.2}, t={:.2})", self.distance, self.time)
    }
}

/// A robot's price for adding one item to its agenda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBid {
    pub item_id: ItemId,
    pub robot_id: RobotId,
    pub total_distance_cost: f64,
    pub marginal_distance_cost: f64,
    pub total_time_cost: f64,
    pub marginal_time_cost: f64,
}

impl ItemBid {
    pub fn new(item_id: impl Into<ItemId>, robot_id: impl Into<RobotId>, total: Cost, marginal: Cost) -> Self {
        Self {
            item_id: item_id.into(),
            robot_id: robot_id.into(),
            total_distance_cost: total.distance,
            marginal_distance_cost: marginal.distance,
            total_time_cost: total.time,
            marginal_time_cost: marginal.time,
        }
    }

    pub fn total(&self) -> Cost {
        Cost::new(self.total_distance_cost, self.total_time_cost)
    }

    pub fn marginal(&self) -> Cost {
        Cost::new(self.marginal_distance_cost, self.marginal_time_cost)
    }

    /// Costs must be finite, non-negative, and marginal may not exceed total
    pub fn validate(&self) -> Result<(), Error> {
        let costs = [
            ("total_distance_cost", self.total_distance_cost),
            ("marginal_distance_cost", self.marginal_distance_cost),
            ("total_time_cost", self.total_time_cost),
            ("marginal_time_cost", self.marginal_time_cost),
        ];
        for (name, v) in costs {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidBid(format!("{} must be finite and non-negative, got {}", name, v)));
            }
        }
        if self.marginal_distance_cost > self.total_distance_cost {
            return Err(Error::InvalidBid("marginal_distance_cost exceeds total_distance_cost".to_string()));
        }
        if self.marginal_time_cost > self.total_time_cost {
            return Err(Error::InvalidBid("marginal_time_cost exceeds total_time_cost".to_string()));
        }
        Ok(())
    }
}

/// Bid envelope tagged with the round it answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidMessage {
    pub round_id: RoundId,
    pub bid: ItemBid,
}

/// A committed item as sent to the robot that won it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub robot_id: RobotId,
    pub item: Item,
    pub round_id: RoundId,
    /// Zero-based position in the robot's agenda
    pub position: usize,
    /// Cumulative agenda cost after this commit
    pub expected_cumulative: Cost,
}

/// What a round is collecting bids for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundPurpose {
    /// Backlog items looking for a robot
    #[default]
    Allocation,
    /// Quotes on already committed items, compared against their holders
    Audit,
}

/// Call for bids broadcast to every robot when a round opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub round_id: RoundId,
    pub mechanism: MechanismKind,
    pub purpose: RoundPurpose,
    pub items: Vec<Item>,
    pub deadline: Timestamp,
}

/// Execution status a robot reports about its agenda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Item built; `revised` is the robot's recomputed remaining agenda cost
    Success { item_id: ItemId, revised: Option<Cost> },
    Failed { item_id: ItemId, revised: Option<Cost> },
    Infeasible { item_id: ItemId, reason: Infeasibility },
    /// Recomputed agenda cost after the auctioneer took an item away
    Revised { cost: Cost },
    Dropout,
    AllTasksComplete,
    AgendaCleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub robot_id: RobotId,
    pub status: TaskStatus,
}

impl StatusReport {
    pub fn new(robot_id: impl Into<RobotId>, status: TaskStatus) -> Self {
        Self {
            robot_id: robot_id.into(),
            status,
        }
    }
}

/// A vector with a maximum size capacity and unique entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedSortedSet<T> {
    data: Vec<T>,
    capacity: usize,
}

impl<T> BoundedSortedSet<T> {
    pub fn new(capacity: usize) -> Self {
        let actual_capacity = if capacity == 0 { usize::MAX } else { capacity };
        Self {
            data: Vec::new(),
            capacity: actual_capacity,
        }
    }

    pub fn insert(&mut self, index: usize, item: T) -> Result<(), Error>
    where
        T: PartialEq,
    {
        if self.data.contains(&item) {
            return Err(Error::ItemAlreadyExists);
        }
        if self.is_full() {
            return Err(Error::CapacityFull);
        }
        if index > self.data.len() {
            return Err(Error::IndexOutOfBounds);
        }

        self.data.insert(index, item);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.data.len() {
            Some(self.data.remove(index))
        } else {
            None
        }
    }

    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.data.iter().position(predicate)
    }

    pub fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity != usize::MAX && self.data.len() >= self.capacity
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<'a, T> IntoIterator for &'a BoundedSortedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

//! Agenda Manager: the committed item order of every robot
//!
//! This is the single source of truth for who builds what. Each agenda sits
//! behind its own mutex; the item-to-holder index is only locked while an
//! agenda lock is held, always in that order.

use super::clock::Clock;
use super::types::{Assignment, BoundedSortedSet, Cost, Item, ItemBid, ItemId, RobotId, RoundId, Timestamp};
use crate::auction_debug;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Allowed drift between a bid's claimed marginal and the agenda's view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl Default for CostTolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-3,
            relative: 1e-6,
        }
    }
}

impl CostTolerance {
    pub fn allows(&self, expected: f64, actual: f64) -> bool {
        let scale = expected.abs().max(actual.abs());
        (expected - actual).abs() <= self.absolute + self.relative * scale
    }

    pub fn allows_cost(&self, expected: Cost, actual: Cost) -> bool {
        self.allows(expected.distance, actual.distance) && self.allows(expected.time, actual.time)
    }
}

/// A committed item with the marginal cost accepted for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaEntry {
    pub item: Item,
    pub round_id: RoundId,
    pub marginal: Cost,
    pub committed_at: Timestamp,
}

impl AgendaEntry {
    pub fn item_id(&self) -> &ItemId {
        &self.item.item_id
    }
}

// An item appears at most once in an agenda whatever it cost
impl PartialEq for AgendaEntry {
    fn eq(&self, other: &Self) -> bool {
        self.item.item_id == other.item.item_id
    }
}

#[derive(Debug)]
struct Agenda {
    entries: BoundedSortedSet<AgendaEntry>,
    cumulative: Cost,
}

/// Point-in-time copy of one robot's agenda
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaSnapshot {
    pub robot_id: RobotId,
    pub entries: Vec<AgendaEntry>,
    pub cumulative: Cost,
}

impl AgendaSnapshot {
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.entries.iter().map(|e| e.item_id().clone()).collect()
    }

    pub fn marginal_sum(&self) -> Cost {
        self.entries.iter().fold(Cost::ZERO, |acc, e| acc + e.marginal)
    }
}

#[derive(Debug)]
pub struct AgendaManager {
    clock: Arc<dyn Clock>,
    tolerance: CostTolerance,
    capacity: usize,
    agendas: RwLock<BTreeMap<RobotId, Arc<Mutex<Agenda>>>>,
    holders: Mutex<HashMap<ItemId, RobotId>>,
}

impl AgendaManager {
    /// `capacity` bounds every agenda; 0 means unbounded
    pub fn new(clock: Arc<dyn Clock>, tolerance: CostTolerance, capacity: usize) -> Self {
        Self {
            clock,
            tolerance,
            capacity,
            agendas: RwLock::new(BTreeMap::new()),
            holders: Mutex::new(HashMap::new()),
        }
    }

    pub fn tolerance(&self) -> CostTolerance {
        self.tolerance
    }

    /// Create an empty agenda. Registering twice keeps the existing one.
    pub fn register(&self, robot_id: &RobotId) -> bool {
        let mut agendas = self.agendas.write();
        if agendas.contains_key(robot_id) {
            return false;
        }
        agendas.insert(
            robot_id.clone(),
            Arc::new(Mutex::new(Agenda {
                entries: BoundedSortedSet::new(self.capacity),
                cumulative: Cost::ZERO,
            })),
        );
        true
    }

    /// Empty the agenda and forget the robot
    pub fn deregister(&self, robot_id: &RobotId) -> Result<Vec<AgendaEntry>> {
        let drained = self.drain(robot_id)?;
        self.agendas.write().remove(robot_id);
        Ok(drained)
    }

    pub fn is_registered(&self, robot_id: &RobotId) -> bool {
        self.agendas.read().contains_key(robot_id)
    }

    pub fn robots(&self) -> Vec<RobotId> {
        self.agendas.read().keys().cloned().collect()
    }

    /// Insert `item` at `position` (end of agenda when `None`)
    ///
    /// The bid's marginal must match the growth it claims over the current
    /// cumulative cost, otherwise the robot priced against a stale agenda.
    pub fn commit(
        &self,
        robot_id: &RobotId,
        item: &Item,
        position: Option<usize>,
        bid: &ItemBid,
        round_id: RoundId,
    ) -> Result<Assignment> {
        if &bid.robot_id != robot_id || bid.item_id != item.item_id {
            return Err(Error::ValidationError(format!(
                "bid from {} on {} cannot commit {} to {}",
                bid.robot_id, bid.item_id, item.item_id, robot_id
            )));
        }
        let agenda = self.agenda_lock(robot_id)?;
        let mut agenda = agenda.lock();
        let mut holders = self.holders.lock();

        if holders.contains_key(&item.item_id) {
            return Err(Error::ItemAlreadyExists);
        }
        let expected = bid.total() - agenda.cumulative;
        if !self.tolerance.allows_cost(expected, bid.marginal()) {
            return Err(Error::CostMismatch {
                robot: robot_id.clone(),
                item: item.item_id.clone(),
                expected_distance: expected.distance,
                expected_time: expected.time,
                marginal_distance: bid.marginal_distance_cost,
                marginal_time: bid.marginal_time_cost,
            });
        }

        let position = position.unwrap_or(agenda.entries.len());
        agenda.entries.insert(
            position,
            AgendaEntry {
                item: item.clone(),
                round_id,
                marginal: bid.marginal(),
                committed_at: self.clock.now(),
            },
        )?;
        agenda.cumulative = bid.total();
        holders.insert(item.item_id.clone(), robot_id.clone());

        auction_debug!(
            "{} committed {} at position {} (cumulative {})",
            robot_id,
            item.item_id,
            position,
            agenda.cumulative
        );
        Ok(Assignment {
            robot_id: robot_id.clone(),
            item: item.clone(),
            round_id,
            position,
            expected_cumulative: agenda.cumulative,
        })
    }

    /// Excise an item; the robot may supply its recomputed cumulative cost
    pub fn remove(&self, robot_id: &RobotId, item_id: &ItemId, revised: Option<Cost>) -> Result<AgendaEntry> {
        let agenda = self.agenda_lock(robot_id)?;
        let mut agenda = agenda.lock();
        let index = agenda
            .entries
            .position(|e| e.item_id() == item_id)
            .ok_or_else(|| Error::StateError(format!("item {} is not on the agenda of {}", item_id, robot_id)))?;
        let entry = agenda.entries.remove(index).ok_or(Error::IndexOutOfBounds)?;

        agenda.cumulative = match revised {
            Some(cost) => cost,
            None => agenda.cumulative.saturating_sub(entry.marginal),
        };
        if agenda.entries.is_empty() {
            agenda.cumulative = Cost::ZERO;
        }
        self.holders.lock().remove(item_id);
        Ok(entry)
    }

    /// Same bookkeeping as [`remove`](Self::remove), for a finished item
    pub fn complete(&self, robot_id: &RobotId, item_id: &ItemId, revised: Option<Cost>) -> Result<AgendaEntry> {
        let entry = self.remove(robot_id, item_id, revised)?;
        auction_debug!("{} completed {}", robot_id, item_id);
        Ok(entry)
    }

    /// Replace the cumulative cost with the robot's own recomputation
    pub fn revise(&self, robot_id: &RobotId, cost: Cost) -> Result<()> {
        let agenda = self.agenda_lock(robot_id)?;
        let mut agenda = agenda.lock();
        if agenda.entries.is_empty() {
            agenda.cumulative = Cost::ZERO;
        } else {
            agenda.cumulative = cost;
        }
        Ok(())
    }

    /// Remove and return every item of a robot's agenda
    pub fn drain(&self, robot_id: &RobotId) -> Result<Vec<AgendaEntry>> {
        let agenda = self.agenda_lock(robot_id)?;
        let mut agenda = agenda.lock();
        let entries = agenda.entries.take_all();
        agenda.cumulative = Cost::ZERO;
        let mut holders = self.holders.lock();
        for entry in &entries {
            holders.remove(entry.item_id());
        }
        Ok(entries)
    }

    pub fn agenda(&self, robot_id: &RobotId) -> Option<AgendaSnapshot> {
        let agenda = self.agendas.read().get(robot_id).cloned()?;
        let agenda = agenda.lock();
        Some(AgendaSnapshot {
            robot_id: robot_id.clone(),
            entries: agenda.entries.as_slice().to_vec(),
            cumulative: agenda.cumulative,
        })
    }

    /// Snapshots of every registered robot in robot id order
    pub fn snapshot(&self) -> Vec<AgendaSnapshot> {
        self.robots().iter().filter_map(|r| self.agenda(r)).collect()
    }

    pub fn holder(&self, item_id: &ItemId) -> Option<RobotId> {
        self.holders.lock().get(item_id).cloned()
    }

    pub fn all_empty(&self) -> bool {
        self.holders.lock().is_empty()
    }

    fn agenda_lock(&self, robot_id: &RobotId) -> Result<Arc<Mutex<Agenda>>> {
        self.agendas
            .read()
            .get(robot_id)
            .cloned()
            .ok_or_else(|| Error::UnknownRobot(robot_id.clone()))
    }
}

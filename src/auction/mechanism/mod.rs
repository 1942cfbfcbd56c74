//! Winner determination strategies
//!
//! A [`Mechanism`] turns the frozen bid set of a closed round into a proposed
//! set of (item, robot) awards. Mechanisms never touch agendas; the
//! auctioneer commits what they propose. Every mechanism gives a robot at most
//! one item per round and must produce the same output for the same bids.

pub mod greedy;
pub mod round_robin;
pub mod sequential;

pub use greedy::Greedy;
pub use round_robin::RoundRobin;
pub use sequential::Sequential;

use super::registry::{ClosedRound, RoundItem};
use super::types::{Item, ItemBid, ItemId, RobotId, RoundId};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Named mechanism variants selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    #[default]
    Greedy,
    Sequential,
    RoundRobin,
}

impl MechanismKind {
    pub fn name(&self) -> &'static str {
        match self {
            MechanismKind::Greedy => "greedy",
            MechanismKind::Sequential => "sequential",
            MechanismKind::RoundRobin => "round_robin",
        }
    }

    pub fn build(self, reauction_tiebreak: bool) -> Box<dyn Mechanism> {
        match self {
            MechanismKind::Greedy => Box::new(Greedy { reauction_tiebreak }),
            MechanismKind::Sequential => Box::new(Sequential { reauction_tiebreak }),
            MechanismKind::RoundRobin => Box::new(RoundRobin),
        }
    }
}

impl std::fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for MechanismKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(MechanismKind::Greedy),
            "sequential" | "ssi" => Ok(MechanismKind::Sequential),
            "round_robin" | "rr" => Ok(MechanismKind::RoundRobin),
            other => Err(Error::ConfigurationError(format!("unknown mechanism '{}'", other))),
        }
    }
}

pub trait Mechanism: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> MechanismKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn determine(&self, round: &ClosedRound) -> Determination;
}

/// One proposed pairing together with the bid that won it
#[derive(Debug, Clone, PartialEq)]
pub struct Award {
    pub item: Item,
    pub bid: ItemBid,
}

impl Award {
    pub fn robot_id(&self) -> &RobotId {
        &self.bid.robot_id
    }
}

/// Proposed outcome of a round
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Determination {
    pub round_id: RoundId,
    pub awards: Vec<Award>,
    pub unassigned: Vec<ItemId>,
}

impl Determination {
    fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            ..Default::default()
        }
    }

    fn award(&mut self, item: &RoundItem, bid: &ItemBid) {
        self.awards.push(Award {
            item: item.item.clone(),
            bid: bid.clone(),
        });
    }

    /// Everything in the round without an award is unassigned
    fn finish(mut self, round: &ClosedRound) -> Self {
        let awarded: BTreeSet<&ItemId> = self.awards.iter().map(|a| &a.item.item_id).collect();
        self.unassigned = round
            .items
            .iter()
            .map(|i| i.id())
            .filter(|id| !awarded.contains(id))
            .cloned()
            .collect();
        self
    }

    pub fn winner_of(&self, item_id: &ItemId) -> Option<&RobotId> {
        self.awards
            .iter()
            .find(|a| &a.item.item_id == item_id)
            .map(|a| a.robot_id())
    }
}

/// Bid from the robot that lost this item ranks last among exact ties
fn is_previous_holder(bid: &ItemBid, item: &RoundItem) -> bool {
    item.reauction && item.previous_holder.as_ref() == Some(&bid.robot_id)
}

/// Cheaper marginal distance first, then marginal time, then robot id
pub(crate) fn compare_bids(
    a: (&ItemBid, &RoundItem),
    b: (&ItemBid, &RoundItem),
    reauction_tiebreak: bool,
) -> Ordering {
    a.0.marginal_distance_cost
        .total_cmp(&b.0.marginal_distance_cost)
        .then(a.0.marginal_time_cost.total_cmp(&b.0.marginal_time_cost))
        .then_with(|| {
            if reauction_tiebreak {
                is_previous_holder(a.0, a.1).cmp(&is_previous_holder(b.0, b.1))
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.0.robot_id.cmp(&b.0.robot_id))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auction::types::{Cost, Timestamp};

    pub fn item(id: &str) -> RoundItem {
        RoundItem::fresh(Item::new(id, [1, 0, 0, 0, 0, 0], "site"))
    }

    pub fn bid(item: &str, robot: &str, md: f64, mt: f64) -> ItemBid {
        ItemBid::new(item, robot, Cost::new(md + 10.0, mt + 10.0), Cost::new(md, mt))
    }

    pub fn round(round_id: u64, items: Vec<RoundItem>, mut bids: Vec<ItemBid>) -> ClosedRound {
        bids.sort_by(|a, b| (&a.item_id, &a.robot_id).cmp(&(&b.item_id, &b.robot_id)));
        let mut items = items;
        items.sort_by(|a, b| a.id().cmp(b.id()));
        ClosedRound {
            round_id: RoundId(round_id),
            deadline: Timestamp(0),
            items,
            bids,
            late_bids: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_parse_mechanism_names() {
        assert_eq!("greedy".parse::<MechanismKind>().unwrap(), MechanismKind::Greedy);
        assert_eq!("SSI".parse::<MechanismKind>().unwrap(), MechanismKind::Sequential);
        assert_eq!("rr".parse::<MechanismKind>().unwrap(), MechanismKind::RoundRobin);
        assert!("psi".parse::<MechanismKind>().is_err());
    }

    #[test]
    fn test_every_mechanism_is_deterministic_and_unique() {
        let items = vec![item("a"), item("b"), item("c"), item("d")];
        let bids = vec![
            bid("a", "r1", 2.0, 1.0),
            bid("a", "r2", 2.0, 1.0),
            bid("b", "r1", 1.0, 5.0),
            bid("b", "r3", 4.0, 1.0),
            bid("c", "r2", 3.0, 3.0),
            bid("c", "r3", 3.0, 2.0),
            bid("d", "r1", 0.5, 0.5),
        ];
        let forward = round(4, items.clone(), bids.clone());
        let mut reversed_bids = bids;
        reversed_bids.reverse();
        let reversed = round(4, items, reversed_bids);

        for kind in [MechanismKind::Greedy, MechanismKind::Sequential, MechanismKind::RoundRobin] {
            let mechanism = kind.build(false);
            let first = mechanism.determine(&forward);
            for _ in 0..5 {
                assert_eq!(mechanism.determine(&reversed), first, "{} not deterministic", kind);
            }
            let mut robots: Vec<_> = first.awards.iter().map(|a| a.robot_id().clone()).collect();
            let before = robots.len();
            robots.sort();
            robots.dedup();
            assert_eq!(robots.len(), before, "{} awarded a robot twice", kind);
            assert_eq!(first.awards.len() + first.unassigned.len(), 4);
        }
    }

    #[test]
    fn test_reauction_tiebreak_demotes_previous_holder() {
        let mut reoffered = item("x");
        reoffered.reauction = true;
        reoffered.previous_holder = Some(RobotId::from("r1"));
        let r1 = bid("x", "r1", 4.0, 2.0);
        let r2 = bid("x", "r2", 4.0, 2.0);

        assert_eq!(compare_bids((&r1, &reoffered), (&r2, &reoffered), false), Ordering::Less);
        assert_eq!(compare_bids((&r1, &reoffered), (&r2, &reoffered), true), Ordering::Greater);
    }
}

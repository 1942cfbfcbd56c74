use super::{Determination, Mechanism, MechanismKind};
use crate::auction::registry::ClosedRound;
use crate::auction::types::RobotId;
use std::collections::{BTreeSet, HashSet};

/// Cost-blind turn taking
///
/// Robots that bid in the round take turns in id order, starting at offset
/// `round_id mod n` so successive rounds rotate the first pick. An item goes
/// to the next robot in turn that bid on it and has not won yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Mechanism for RoundRobin {
    fn kind(&self) -> MechanismKind {
        MechanismKind::RoundRobin
    }

    fn determine(&self, round: &ClosedRound) -> Determination {
        let mut result = Determination::new(round.round_id);
        let robots: Vec<&RobotId> = round
            .bids
            .iter()
            .map(|b| &b.robot_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if robots.is_empty() {
            return result.finish(round);
        }

        let n = robots.len();
        let mut cursor = (round.round_id.0 % n as u64) as usize;
        let mut busy: HashSet<&RobotId> = HashSet::new();

        for item in &round.items {
            for k in 0..n {
                let idx = (cursor + k) % n;
                let robot = robots[idx];
                if busy.contains(robot) {
                    continue;
                }
                if let Some(bid) = round.bids_for(item.id()).find(|b| &b.robot_id == robot) {
                    busy.insert(robot);
                    result.award(item, bid);
                    cursor = (idx + 1) % n;
                    break;
                }
            }
        }

        result.finish(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::mechanism::test_support::*;
    use crate::auction::types::ItemId;

    fn everyone_bids_everything(round_id: u64) -> ClosedRound {
        let mut bids = Vec::new();
        for item_id in ["a", "b", "c"] {
            for robot in ["r1", "r2", "r3"] {
                bids.push(bid(item_id, robot, 1.0, 1.0));
            }
        }
        round(round_id, vec![item("a"), item("b"), item("c")], bids)
    }

    #[test]
    fn test_turn_order_rotates_with_round_id() {
        let result = RoundRobin.determine(&everyone_bids_everything(0));
        assert_eq!(result.winner_of(&ItemId::from("a")), Some(&RobotId::from("r1")));
        assert_eq!(result.winner_of(&ItemId::from("b")), Some(&RobotId::from("r2")));
        assert_eq!(result.winner_of(&ItemId::from("c")), Some(&RobotId::from("r3")));

        let result = RoundRobin.determine(&everyone_bids_everything(1));
        assert_eq!(result.winner_of(&ItemId::from("a")), Some(&RobotId::from("r2")));
        assert_eq!(result.winner_of(&ItemId::from("c")), Some(&RobotId::from("r1")));
    }

    #[test]
    fn test_ignores_costs() {
        let closed = round(0, vec![item("a")], vec![bid("a", "r1", 99.0, 99.0), bid("a", "r2", 1.0, 1.0)]);
        let result = RoundRobin.determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("a")), Some(&RobotId::from("r1")));
    }

    #[test]
    fn test_skips_robots_without_a_bid() {
        let closed = round(
            0,
            vec![item("a"), item("b")],
            vec![bid("a", "r1", 1.0, 1.0), bid("b", "r1", 1.0, 1.0), bid("b", "r2", 1.0, 1.0)],
        );
        let result = RoundRobin.determine(&closed);
        assert_eq!(result.winner_of(&ItemId::from("a")), Some(&RobotId::from("r1")));
        assert_eq!(result.winner_of(&ItemId::from("b")), Some(&RobotId::from("r2")));
    }

    #[test]
    fn test_no_bids_leaves_everything_unassigned() {
        let closed = round(3, vec![item("a"), item("b")], vec![]);
        let result = RoundRobin.determine(&closed);
        assert!(result.awards.is_empty());
        assert_eq!(result.unassigned.len(), 2);
    }
}

use crate::auction::types::{Announcement, Assignment, BidMessage, ItemId, RobotId, StatusReport, Timestamp};
use serde::{Deserialize, Serialize};

// --- Topic Names ---
pub const ANNOUNCEMENT_TOPIC: &str = "Announcement";
pub const AWARD_TOPIC: &str = "Award"; // per robot
pub const BID_TOPIC: &str = "Bid";
pub const STATUS_TOPIC: &str = "Status";

/// Broadcast from the auctioneer to every robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuctioneerCommand {
    Announce(Announcement),
    /// Sim time moved to `now`; robots execute, then answer with `TickDone`
    Tick { now: Timestamp },
    Terminate,
}

/// Sent to a single robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotCommand {
    /// May be delivered more than once
    Award(Assignment),
    /// The auctioneer took this item away
    Revoke { item_id: ItemId },
}

/// Robot to auctioneer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotReply {
    Bid(BidMessage),
    Status(StatusReport),
    TickDone { robot_id: RobotId },
}

impl RobotReply {
    pub fn topic(&self) -> &'static str {
        match self {
            RobotReply::Bid(_) => BID_TOPIC,
            RobotReply::Status(_) | RobotReply::TickDone { .. } => STATUS_TOPIC,
        }
    }
}

pub mod agenda;
pub mod auctioneer;
pub mod clock;
pub mod logging;
pub mod mechanism;
pub mod realloc;
pub mod registry;
pub mod types;

pub use agenda::{AgendaEntry, AgendaManager, AgendaSnapshot, CostTolerance};
pub use auctioneer::{Auctioneer, AuctioneerState, RoundLog, RoundOutcome, Step};
pub use clock::{Clock, SimClock, WallClock};
pub use mechanism::{Award, Determination, Mechanism, MechanismKind};
pub use realloc::{ReallocationCause, ReallocationController, Reoffer};
pub use registry::{BidRegistry, ClosedRound, RoundItem};
pub use types::*;

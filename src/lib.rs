//! # mrauction - auction-based task allocation for robot fleets
//!
//! An auctioneer announces construction items, collects cost bids from
//! robots, picks winners with a configurable mechanism and commits the
//! results into per-robot agendas. Failed, dropped or infeasible work, and
//! (optionally) items someone else could build strictly cheaper, are put
//! back up for auction.
//!
//! ## Modules
//!
//! - [`auction`] - Bid registry, winner determination, agendas, reallocation and the auctioneer
//! - [`bus`] - In-process message bus between the auctioneer and robots
//! - [`sim`] - Scenarios, the travel cost model, simulated robots and the lockstep runner
//! - [`config`] - Configuration structures and loaders
//! - [`error`] - Error types and handling
//! - [`logger`] - Stdout and file logging
//!
//! ## Quick Start
//!
//! ```rust
//! use mrauction::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(SimClock::new());
//! let config = AuctioneerConfig {
//!     round_deadline_ms: 100,
//!     ..Default::default()
//! };
//! let mut auctioneer = Auctioneer::new(config, clock.clone()).unwrap();
//! auctioneer.register_robot(&RobotId::from("r1"));
//! auctioneer.admit(Item::new("i1", [1, 0, 0, 0, 0, 0], "site_a")).unwrap();
//!
//! let Step::Announced(announcement) = auctioneer.step() else { panic!() };
//! let bid = ItemBid::new("i1", "r1", Cost::new(5.0, 9.0), Cost::new(5.0, 9.0));
//! auctioneer
//!     .submit_bid(BidMessage { round_id: announcement.round_id, bid })
//!     .unwrap();
//!
//! clock.advance(Duration::from_millis(101));
//! auctioneer.step(); // closing
//! auctioneer.step(); // decided
//! let Step::Committed(outcome) = auctioneer.step() else { panic!() };
//! assert_eq!(outcome.assignments[0].robot_id, RobotId::from("r1"));
//! ```

pub mod auction;
pub mod bus;
pub mod config;
pub mod error;
pub mod logger;
pub mod sim;

pub use auction::*;
pub use config::{AuctioneerConfig, SimSettings};
pub use error::*;

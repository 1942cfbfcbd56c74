//! Lockstep simulation: auctioneer and robots exchange messages over the bus
//! while a [`SimClock`] advances one tick at a time

use super::cost::{CostModel, TravelCostModel};
use super::robot::{RobotSummary, SimRobot, run_robot};
use super::types::Scenario;
use crate::auction::agenda::AgendaSnapshot;
use crate::auction::auctioneer::{Auctioneer, RoundLog, Step};
use crate::auction::clock::{Clock, SimClock};
use crate::auction::types::{Announcement, Assignment, ItemId, RobotId, TaskStatus, Timestamp};
use crate::bus::{AuctioneerReader, RobotReply, new_bus};
use crate::config::AuctioneerConfig;
use crate::error::Error;
use crate::{auction_debug, auction_info, auction_warn};
use anyhow::{Context, Result, anyhow};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for robots to finish a tick before moving on
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub rounds: Vec<RoundLog>,
    pub final_agendas: Vec<AgendaSnapshot>,
    pub completed: BTreeMap<ItemId, RobotId>,
    pub failed: Vec<Error>,
    pub outstanding: Vec<ItemId>,
    pub robots: Vec<RobotSummary>,
    pub sim_time: Timestamp,
    pub ticks: u64,
    /// False when the run was cut off at the horizon
    pub drained: bool,
}

/// Run `scenario` until every item is built or given up on, or the horizon passes
pub async fn run_simulation(config: &AuctioneerConfig, scenario: &Scenario) -> Result<SimulationResult> {
    scenario.validate().context("Invalid scenario")?;
    let clock = Arc::new(SimClock::new());
    let mut auctioneer = Auctioneer::new(config.clone(), clock.clone()).context("Failed to create auctioneer")?;

    let robot_ids: Vec<RobotId> = scenario.robots.iter().map(|r| r.robot_id.clone()).collect();
    for robot_id in &robot_ids {
        auctioneer.register_robot(robot_id);
    }
    for item in &scenario.items {
        auctioneer
            .schedule(item.to_item(), item.arrival())
            .with_context(|| format!("Failed to schedule item {}", item.item_id))?;
    }

    let (writer, mut reader, endpoints) = new_bus(&robot_ids);
    let cost_model: Arc<dyn CostModel> = Arc::new(
        TravelCostModel::new(scenario.world.clone()).with_handling(config.sim.handling_secs_per_unit),
    );
    let mut handles = Vec::with_capacity(endpoints.len());
    for (spec, endpoint) in scenario.robots.iter().zip(endpoints) {
        let start = scenario
            .world
            .location(&spec.start)
            .ok_or_else(|| anyhow!("unknown start location {}", spec.start))?;
        let robot = SimRobot::new(spec.clone(), start, cost_model.clone(), config.cost_tolerance)
            .with_dropout(scenario.dropout_time(&spec.robot_id));
        handles.push(tokio::spawn(run_robot(robot, endpoint)));
    }
    auction_info!(
        "simulation started: {} robots, {} items, tick {}ms",
        robot_ids.len(),
        scenario.items.len(),
        config.sim.tick_ms
    );

    let tick = Duration::from_millis(config.sim.tick_ms);
    let horizon = Timestamp::from_secs_f64(config.sim.horizon_secs);
    let mut live: BTreeSet<RobotId> = robot_ids.iter().cloned().collect();
    let mut ticks = 0u64;
    let mut horizon_reached = false;

    loop {
        let (awards, announcements) = drive_auctioneer(&mut auctioneer);
        // direct commands go out before anything robots answer with bids
        for reoffer in auctioneer.take_revocations() {
            if let Err(e) = writer.publish_revoke(&reoffer.previous_holder, reoffer.item.item_id.clone()) {
                auction_warn!("revoke of {} not delivered: {}", reoffer.item.item_id, e);
            }
        }
        for assignment in awards {
            if let Err(e) = writer.publish_award(assignment) {
                auction_warn!("award not delivered: {}", e);
            }
        }
        for announcement in announcements {
            if let Err(e) = writer.publish_announcement(announcement) {
                auction_warn!("announcement not delivered: {}", e);
            }
        }

        if auctioneer.is_drained() {
            break;
        }
        let now = clock.now();
        if now >= horizon {
            auction_warn!("horizon {} reached", horizon);
            auctioneer.teardown();
            horizon_reached = true;
            break;
        }

        // with every robot gone the backlog still runs out its retries
        if !live.is_empty() {
            writer
                .publish_tick(now)
                .map_err(|e| anyhow!("tick {} not delivered: {}", ticks, e))?;
            let replies = collect_tick(&mut reader, &live).await;
            for reply in replies {
                apply_reply(&mut auctioneer, &mut live, reply);
            }
        }

        clock.advance(tick);
        ticks += 1;
    }

    // robots that already stopped have dropped their receivers
    let _ = writer.publish_terminate();
    let robots = join_all(handles)
        .await
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Robot task panicked")?;

    Ok(SimulationResult {
        rounds: auctioneer.history().to_vec(),
        final_agendas: auctioneer.agendas().snapshot(),
        completed: auctioneer.completed().clone(),
        failed: auctioneer.failed().to_vec(),
        outstanding: auctioneer.outstanding(),
        robots,
        sim_time: clock.now(),
        ticks,
        drained: !horizon_reached,
    })
}

/// Step until the auctioneer has to wait for time to pass
fn drive_auctioneer(auctioneer: &mut Auctioneer) -> (Vec<Assignment>, Vec<Announcement>) {
    let mut awards = Vec::new();
    let mut announcements = Vec::new();
    loop {
        match auctioneer.step() {
            Step::Announced(announcement) => announcements.push(announcement),
            Step::Committed(outcome) => awards.extend(outcome.assignments),
            Step::Closing { .. } | Step::Decided { .. } | Step::Audited { .. } => {}
            Step::Waiting { .. } | Step::Idle | Step::Drained => break,
        }
    }
    (awards, announcements)
}

/// Gather replies until every live robot finished the tick
async fn collect_tick(reader: &mut AuctioneerReader, live: &BTreeSet<RobotId>) -> Vec<RobotReply> {
    let mut pending = live.clone();
    let mut replies = Vec::new();
    while !pending.is_empty() {
        match tokio::time::timeout(REPLY_TIMEOUT, reader.recv()).await {
            Ok(Some(RobotReply::TickDone { robot_id })) => {
                pending.remove(&robot_id);
            }
            Ok(Some(reply)) => {
                auction_debug!("[{}] {:?}", reply.topic(), reply);
                replies.push(reply)
            }
            Ok(None) => break,
            Err(_) => {
                auction_warn!("no tick reply from {:?}", pending);
                break;
            }
        }
    }
    replies
}

fn apply_reply(auctioneer: &mut Auctioneer, live: &mut BTreeSet<RobotId>, reply: RobotReply) {
    match reply {
        RobotReply::Bid(message) => {
            let item_id = message.bid.item_id.clone();
            if let Err(e) = auctioneer.submit_bid(message) {
                auction_debug!("bid on {} rejected: {}", item_id, e);
            }
        }
        RobotReply::Status(report) => {
            if report.status == TaskStatus::Dropout {
                live.remove(&report.robot_id);
            }
            let robot_id = report.robot_id.clone();
            if let Err(e) = auctioneer.report_status(report) {
                auction_warn!("status from {} not applied: {}", robot_id, e);
            }
        }
        RobotReply::TickDone { .. } => {}
    }
}

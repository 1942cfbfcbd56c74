use super::robot::RobotSummary;
use super::runner::SimulationResult;
use super::types::Scenario;
use crate::auction::agenda::AgendaSnapshot;
use crate::auction::auctioneer::RoundLog;
use crate::auction::mechanism::MechanismKind;
use crate::auction::types::{ItemId, RobotId, RoundPurpose};
use crate::config::AuctioneerConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct FailedItem {
    pub item_id: Option<ItemId>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ReportTotals {
    pub items: usize,
    pub completed: usize,
    pub failed: usize,
    pub outstanding: usize,
    pub allocation_rounds: usize,
    pub audit_rounds: usize,
    pub bids_received: usize,
    pub late_bids: usize,
    pub bounced: usize,
    pub reoffered: usize,
}

#[derive(Debug, Serialize)]
pub struct AllocationReport {
    pub experiment_id: Uuid,
    pub scenario: String,
    pub mechanism: MechanismKind,
    pub reallocate: bool,
    pub robot_count: usize,
    pub rounds: Vec<RoundLog>,
    pub final_agendas: Vec<AgendaSnapshot>,
    pub completed: BTreeMap<ItemId, RobotId>,
    pub failed: Vec<FailedItem>,
    pub outstanding: Vec<ItemId>,
    pub robots: Vec<RobotSummary>,
    pub totals: ReportTotals,
    pub drained: bool,
    pub ticks: u64,
    pub sim_duration_s: f64,
    pub wall_duration_ms: f64,
}

pub fn build_report(
    config: &AuctioneerConfig,
    scenario: &Scenario,
    result: SimulationResult,
    wall_start: Instant,
) -> AllocationReport {
    let failed: Vec<FailedItem> = result
        .failed
        .iter()
        .map(|e| FailedItem {
            item_id: match e {
                crate::Error::Unassignable { item, .. } => Some(item.clone()),
                crate::Error::InfeasiblePrecondition { item, .. } => Some(item.clone()),
                _ => None,
            },
            reason: e.to_string(),
        })
        .collect();

    let audit_rounds = result
        .rounds
        .iter()
        .filter(|r| r.purpose == RoundPurpose::Audit)
        .count();
    let totals = ReportTotals {
        items: scenario.items.len(),
        completed: result.completed.len(),
        failed: failed.len(),
        outstanding: result.outstanding.len(),
        allocation_rounds: result.rounds.len() - audit_rounds,
        audit_rounds,
        bids_received: result.rounds.iter().map(|r| r.bids_received).sum(),
        late_bids: result.rounds.iter().map(|r| r.late_bids).sum(),
        bounced: result.rounds.iter().map(|r| r.bounced.len()).sum(),
        reoffered: result.rounds.iter().map(|r| r.reoffered.len()).sum(),
    };

    AllocationReport {
        experiment_id: Uuid::new_v4(),
        scenario: scenario.name.clone(),
        mechanism: config.mechanism,
        reallocate: config.reallocate,
        robot_count: scenario.robots.len(),
        rounds: result.rounds,
        final_agendas: result.final_agendas,
        completed: result.completed,
        failed,
        outstanding: result.outstanding,
        robots: result.robots,
        totals,
        drained: result.drained,
        ticks: result.ticks,
        sim_duration_s: result.sim_time.as_secs_f64(),
        wall_duration_ms: wall_start.elapsed().as_secs_f64() * 1000.0,
    }
}

pub fn write_report_json<P: AsRef<Path>>(report: &AllocationReport, result_dir: P) -> std::io::Result<PathBuf> {
    let summary_path = result_dir.as_ref().join("summary.json");
    let mut summary_file = File::create(&summary_path)?;
    serde_json::to_writer_pretty(&mut summary_file, report)?;
    Ok(summary_path)
}

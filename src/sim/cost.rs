//! Robot-side pricing of agendas

use super::types::{Location, World};
use super::utils::euclidean;
use crate::auction::types::{Cost, Item, ItemId};

/// Prices an ordered agenda for one robot
pub trait CostModel: Send + Sync {
    /// Cost of executing `agenda` in order starting at `start`, or `None`
    /// when some location in it is unknown
    fn agenda_cost(&self, start: Location, speed: f64, agenda: &[Item]) -> Option<Cost>;

    /// Where a robot stands once `item` is built
    fn site(&self, item: &Item) -> Option<Location>;

    /// Total and marginal cost of appending `item` to `agenda`
    fn quote(&self, start: Location, speed: f64, agenda: &[Item], item: &Item) -> Option<(Cost, Cost)> {
        let base = self.agenda_cost(start, speed, agenda)?;
        let mut extended = agenda.to_vec();
        extended.push(item.clone());
        let total = self.agenda_cost(start, speed, &extended)?;
        Some((total, total.saturating_sub(base)))
    }

    /// Current cost of `agenda` and what leaving `item_id` out of it would save
    fn removal_quote(&self, start: Location, speed: f64, agenda: &[Item], item_id: &ItemId) -> Option<(Cost, Cost)> {
        let rest: Vec<Item> = agenda.iter().filter(|i| &i.item_id != item_id).cloned().collect();
        if rest.len() == agenda.len() {
            return None;
        }
        let total = self.agenda_cost(start, speed, agenda)?;
        let without = self.agenda_cost(start, speed, &rest)?;
        Some((total, total.saturating_sub(without)))
    }
}

/// Straight-line travel through material depots to each site
#[derive(Debug, Clone)]
pub struct TravelCostModel {
    world: World,
    /// Seconds to collect one unit, multiplied by the material's collectors
    pub handling_secs_per_unit: f64,
}

impl TravelCostModel {
    pub fn new(world: World) -> Self {
        Self {
            world,
            handling_secs_per_unit: 5.0,
        }
    }

    pub fn with_handling(mut self, secs_per_unit: f64) -> Self {
        self.handling_secs_per_unit = secs_per_unit;
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Stops visited for one item: its depots in material order, then the site
    fn stops(&self, item: &Item) -> Option<Vec<Location>> {
        let site = self.world.location(&item.site)?;
        let mut stops: Vec<Location> = item.materials().filter_map(|(m, _)| self.world.depot(m)).collect();
        stops.push(site);
        Some(stops)
    }

    fn handling(&self, item: &Item) -> f64 {
        item.materials()
            .map(|(m, n)| n as f64 * m.traits().collectors as f64 * self.handling_secs_per_unit)
            .sum()
    }
}

impl CostModel for TravelCostModel {
    fn agenda_cost(&self, start: Location, speed: f64, agenda: &[Item]) -> Option<Cost> {
        let mut at = start;
        let mut distance = 0.0;
        let mut handling = 0.0;
        for item in agenda {
            for stop in self.stops(item)? {
                distance += euclidean(at, stop);
                at = stop;
            }
            handling += self.handling(item);
        }
        Some(Cost::new(distance, distance / speed + handling))
    }

    fn site(&self, item: &Item) -> Option<Location> {
        self.world.location(&item.site)
    }
}

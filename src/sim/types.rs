use crate::auction::types::{Item, Material, RobotId, Timestamp};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A named point on the work floor, in metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSpec {
    pub robot_id: RobotId,
    /// Name of the location the robot starts at
    pub start: String,
    /// Metres per second
    #[serde(default = "default_speed")]
    pub speed: f64,
}

/// Item as written in a scenario file, one count field per material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioItem {
    pub item_id: String,
    #[serde(default)]
    pub grey_count: u32,
    #[serde(default)]
    pub red_count: u32,
    #[serde(default)]
    pub blue_count: u32,
    #[serde(default)]
    pub green_count: u32,
    #[serde(default)]
    pub white_count: u32,
    #[serde(default)]
    pub black_count: u32,
    pub site: String,
    /// Seconds after scenario start at which the item enters the backlog
    #[serde(default)]
    pub arrival_time: f64,
}

impl ScenarioItem {
    pub fn to_item(&self) -> Item {
        Item::new(
            self.item_id.as_str(),
            [
                self.grey_count,
                self.red_count,
                self.blue_count,
                self.green_count,
                self.white_count,
                self.black_count,
            ],
            self.site.as_str(),
        )
    }

    pub fn arrival(&self) -> Timestamp {
        Timestamp::from_secs_f64(self.arrival_time)
    }
}

impl From<&Item> for ScenarioItem {
    fn from(item: &Item) -> Self {
        Self {
            item_id: item.item_id.to_string(),
            grey_count: item.count(Material::Grey),
            red_count: item.count(Material::Red),
            blue_count: item.count(Material::Blue),
            green_count: item.count(Material::Green),
            white_count: item.count(Material::White),
            black_count: item.count(Material::Black),
            site: item.site.clone(),
            arrival_time: 0.0,
        }
    }
}

/// Scripted robot failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropout {
    pub robot_id: RobotId,
    /// Seconds after scenario start
    pub at: f64,
}

/// Where things are: sites, depots and robot start points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct World {
    #[serde(default)]
    pub locations: BTreeMap<String, Location>,
    /// Location each material is collected from; materials without a depot are found at the site
    #[serde(default)]
    pub depots: BTreeMap<Material, String>,
}

impl World {
    pub fn location(&self, name: &str) -> Option<Location> {
        self.locations.get(name).copied()
    }

    pub fn depot(&self, material: Material) -> Option<Location> {
        self.depots.get(&material).and_then(|name| self.location(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub robots: Vec<RobotSpec>,
    #[serde(flatten)]
    pub world: World,
    pub items: Vec<ScenarioItem>,
    #[serde(default)]
    pub dropouts: Vec<Dropout>,
}

impl Scenario {
    /// Every reference resolves and every id is unique
    pub fn validate(&self) -> Result<(), Error> {
        if self.robots.is_empty() {
            return Err(Error::ValidationError("scenario has no robots".to_string()));
        }
        let mut robot_ids = HashSet::new();
        for robot in &self.robots {
            if !robot_ids.insert(&robot.robot_id) {
                return Err(Error::ValidationError(format!("duplicate robot {}", robot.robot_id)));
            }
            if !(robot.speed.is_finite() && robot.speed > 0.0) {
                return Err(Error::ValidationError(format!(
                    "robot {} speed must be positive",
                    robot.robot_id
                )));
            }
            self.require_location(&robot.start)?;
        }
        for (material, name) in &self.world.depots {
            if self.world.location(name).is_none() {
                return Err(Error::ValidationError(format!(
                    "depot for {} refers to unknown location {}",
                    material, name
                )));
            }
        }

        let mut item_ids = HashSet::new();
        for item in &self.items {
            if !item_ids.insert(item.item_id.as_str()) {
                return Err(Error::ValidationError(format!("duplicate item {}", item.item_id)));
            }
            if !(item.arrival_time.is_finite() && item.arrival_time >= 0.0) {
                return Err(Error::ValidationError(format!(
                    "item {} arrival_time must be non-negative",
                    item.item_id
                )));
            }
            self.require_location(&item.site)?;
        }

        for dropout in &self.dropouts {
            if !robot_ids.contains(&dropout.robot_id) {
                return Err(Error::ValidationError(format!(
                    "dropout refers to unknown robot {}",
                    dropout.robot_id
                )));
            }
        }
        Ok(())
    }

    pub fn dropout_time(&self, robot_id: &RobotId) -> Option<Timestamp> {
        self.dropouts
            .iter()
            .filter(|d| &d.robot_id == robot_id)
            .map(|d| Timestamp::from_secs_f64(d.at))
            .min()
    }

    fn require_location(&self, name: &str) -> Result<(), Error> {
        if self.world.location(name).is_none() {
            return Err(Error::ValidationError(format!("unknown location {}", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_item_to_item() {
        let s = ScenarioItem {
            item_id: "7".to_string(),
            grey_count: 1,
            red_count: 0,
            blue_count: 2,
            green_count: 0,
            white_count: 0,
            black_count: 3,
            site: "site_a".to_string(),
            arrival_time: 1.5,
        };
        let item = s.to_item();
        assert_eq!(item.material_count, [1, 0, 2, 0, 0, 3]);
        assert_eq!(s.arrival(), Timestamp::from_millis(1500));
        assert_eq!(ScenarioItem::from(&item).black_count, 3);
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut scenario = Scenario {
            robots: vec![RobotSpec {
                robot_id: RobotId::from("r1"),
                start: "home".to_string(),
                speed: 1.0,
            }],
            items: vec![ScenarioItem::from(&Item::new("i1", [1, 0, 0, 0, 0, 0], "site"))],
            ..Default::default()
        };
        assert!(scenario.validate().is_err());

        scenario.world.locations.insert("home".to_string(), Location::new(0.0, 0.0));
        scenario.world.locations.insert("site".to_string(), Location::new(3.0, 4.0));
        assert!(scenario.validate().is_ok());

        scenario.world.depots.insert(Material::Red, "nowhere".to_string());
        assert!(scenario.validate().is_err());
        scenario.world.depots.clear();

        scenario.dropouts.push(Dropout {
            robot_id: RobotId::from("r9"),
            at: 1.0,
        });
        assert!(scenario.validate().is_err());
    }
}

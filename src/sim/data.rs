use super::types::{Location, RobotSpec, Scenario, ScenarioItem, World};
use super::utils::ring_point;
use crate::auction::types::{Material, RobotId};
use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Robots created for scenario files that only list items
pub const DEFAULT_ROBOT_COUNT: usize = 3;
const DEFAULT_RING_RADIUS: f64 = 10.0;

/// Scenario files either hold a full scenario or just the item list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    Full(Scenario),
    Items(Vec<ScenarioItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioGenParams {
    pub robots: usize,
    pub items: usize,
    pub sites: usize,
    /// Half-width of the square the locations are drawn from
    pub extent: f64,
    /// Upper bound of each material count
    pub max_count: u32,
    /// Materials used by generated items; time-windowed ones are left out by default
    pub materials: Vec<Material>,
    /// Items arrive uniformly within this many seconds
    pub arrival_span_secs: f64,
}

impl Default for ScenarioGenParams {
    fn default() -> Self {
        Self {
            robots: 3,
            items: 10,
            sites: 4,
            extent: 20.0,
            max_count: 2,
            materials: vec![Material::Grey, Material::Blue, Material::White],
            arrival_span_secs: 0.0,
        }
    }
}

/// Work out which file `scenario_id` refers to
///
/// A directory yields `<dir>/<id>.yaml`, a path containing `{scenario_id}`
/// has it substituted, anything else is used as given.
pub fn resolve_scenario_path(scenario_file: &Path, scenario_id: Option<&str>) -> Result<PathBuf> {
    let Some(id) = scenario_id else {
        if scenario_file.is_dir() {
            bail!(
                "{} is a directory but no scenario_id was given",
                scenario_file.display()
            );
        }
        return Ok(scenario_file.to_path_buf());
    };
    if scenario_file.is_dir() {
        return Ok(scenario_file.join(format!("{}.yaml", id)));
    }
    let raw = scenario_file.to_string_lossy();
    if raw.contains("{scenario_id}") {
        return Ok(PathBuf::from(raw.replace("{scenario_id}", id)));
    }
    Ok(scenario_file.to_path_buf())
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read scenario {}", path.display()))?;
    let file: ScenarioFile =
        serde_yaml::from_str(&text).with_context(|| format!("Failed to parse scenario {}", path.display()))?;
    let mut scenario = match file {
        ScenarioFile::Full(scenario) => scenario,
        ScenarioFile::Items(items) => scenario_from_items(items),
    };
    if scenario.name.is_empty() {
        scenario.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    scenario
        .validate()
        .with_context(|| format!("Invalid scenario {}", path.display()))?;
    Ok(scenario)
}

pub fn save_scenario(scenario: &Scenario, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(scenario).context("Failed to serialize scenario")?;
    fs::write(path, yaml).with_context(|| format!("Failed to write scenario {}", path.display()))?;
    Ok(())
}

/// Lay out a world for a bare item list: robots at the origin, sites on a ring
pub fn scenario_from_items(items: Vec<ScenarioItem>) -> Scenario {
    let mut sites: Vec<String> = items.iter().map(|i| i.site.clone()).collect();
    sites.sort();
    sites.dedup();

    let mut world = World::default();
    world.locations.insert("home".to_string(), Location::default());
    for (i, site) in sites.iter().enumerate() {
        world
            .locations
            .insert(site.clone(), ring_point(i, sites.len(), DEFAULT_RING_RADIUS));
    }

    let robots = (1..=DEFAULT_ROBOT_COUNT)
        .map(|i| RobotSpec {
            robot_id: RobotId(format!("robot_{}", i)),
            start: "home".to_string(),
            speed: 1.0,
        })
        .collect();

    Scenario {
        name: String::new(),
        robots,
        world,
        items,
        dropouts: Vec::new(),
    }
}

pub fn generate_random_scenario(params: &ScenarioGenParams) -> Scenario {
    let mut rng = rand::rng();
    let extent = params.extent.abs().max(1.0);
    let mut world = World::default();

    world.locations.insert("home".to_string(), Location::default());
    for i in 1..=params.sites.max(1) {
        world.locations.insert(
            format!("site_{}", i),
            Location::new(rng.random_range(-extent..extent), rng.random_range(-extent..extent)),
        );
    }
    for material in &params.materials {
        let name = format!("{}_depot", material).to_lowercase();
        world.locations.insert(
            name.clone(),
            Location::new(rng.random_range(-extent..extent), rng.random_range(-extent..extent)),
        );
        world.depots.insert(*material, name);
    }

    let robots = (1..=params.robots)
        .map(|i| RobotSpec {
            robot_id: RobotId(format!("robot_{}", i)),
            start: "home".to_string(),
            speed: 1.0,
        })
        .collect();

    let mut items = Vec::with_capacity(params.items);
    for i in 1..=params.items {
        let mut counts = [0u32; 6];
        for material in &params.materials {
            counts[material.index()] = rng.random_range(0..=params.max_count);
        }
        if counts.iter().all(|c| *c == 0)
            && let Some(first) = params.materials.first()
        {
            counts[first.index()] = 1;
        }
        let arrival_time = if params.arrival_span_secs > 0.0 {
            rng.random_range(0.0..params.arrival_span_secs)
        } else {
            0.0
        };
        items.push(ScenarioItem {
            item_id: format!("item_{}", i),
            grey_count: counts[0],
            red_count: counts[1],
            blue_count: counts[2],
            green_count: counts[3],
            white_count: counts[4],
            black_count: counts[5],
            site: format!("site_{}", rng.random_range(1..=params.sites.max(1))),
            arrival_time,
        });
    }

    Scenario {
        name: "random".to_string(),
        robots,
        world,
        items,
        dropouts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bare_item_list_gets_default_world() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.yaml");
        fs::write(
            &path,
            "- item_id: '1'\n  grey_count: 2\n  site: s1\n  arrival_time: 4.0\n- item_id: '2'\n  red_count: 1\n  site: s2\n",
        )
        .unwrap();

        let scenario = load_scenario(&path).unwrap();
        assert_eq!(scenario.name, "items");
        assert_eq!(scenario.robots.len(), DEFAULT_ROBOT_COUNT);
        assert_eq!(scenario.items.len(), 2);
        assert_eq!(scenario.items[0].arrival_time, 4.0);
        assert!(scenario.world.location("s2").is_some());
    }

    #[test]
    fn test_malformed_scenario_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "robots: 7\n").unwrap();
        assert!(load_scenario(&path).is_err());
        assert!(load_scenario(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_resolve_scenario_path() {
        let dir = tempdir().unwrap();
        assert_eq!(
            resolve_scenario_path(dir.path(), Some("s3")).unwrap(),
            dir.path().join("s3.yaml")
        );
        assert!(resolve_scenario_path(dir.path(), None).is_err());
        assert_eq!(
            resolve_scenario_path(Path::new("data/{scenario_id}/items.yaml"), Some("x")).unwrap(),
            PathBuf::from("data/x/items.yaml")
        );
        assert_eq!(
            resolve_scenario_path(Path::new("plain.yaml"), Some("x")).unwrap(),
            PathBuf::from("plain.yaml")
        );
    }

    #[test]
    fn test_generated_scenario_round_trips_through_disk() {
        let scenario = generate_random_scenario(&ScenarioGenParams::default());
        assert!(scenario.validate().is_ok());
        assert!(scenario.items.iter().all(|i| i.to_item().materials().count() > 0));

        let dir = tempdir().unwrap();
        let path = dir.path().join("random.yaml");
        save_scenario(&scenario, &path).unwrap();
        assert_eq!(load_scenario(&path).unwrap(), scenario);
    }
}

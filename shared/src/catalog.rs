//! Static building catalog
//!
//! Every constructible building kind and its economic parameters. The set of
//! kinds is closed: resolving a tag goes through [`BuildingKind::from_str`],
//! and unknown tags fail with a domain error instead of ever reaching the
//! store. Adding a building type means adding one enum variant and one spec
//! entry here.

use crate::Resources;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A building-type tag that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown building type `{0}`")]
pub struct UnknownBuildingType(pub String);

/// The closed set of building types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingKind {
    Plantation,
    PowerPlant,
    Cabins,
    Barracks,
    AbyssalOreRefinery,
    DefensiveDome,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 6] = [
        BuildingKind::Plantation,
        BuildingKind::PowerPlant,
        BuildingKind::Cabins,
        BuildingKind::Barracks,
        BuildingKind::AbyssalOreRefinery,
        BuildingKind::DefensiveDome,
    ];

    /// Canonical wire/storage tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            BuildingKind::Plantation => "plantation",
            BuildingKind::PowerPlant => "powerplant",
            BuildingKind::Cabins => "cabins",
            BuildingKind::Barracks => "barracks",
            BuildingKind::AbyssalOreRefinery => "abyssalorerefinery",
            BuildingKind::DefensiveDome => "defensivedome",
        }
    }

    /// Economic parameters for this kind.
    pub fn spec(self) -> &'static BuildingSpec {
        match self {
            BuildingKind::Plantation => &PLANTATION,
            BuildingKind::PowerPlant => &POWER_PLANT,
            BuildingKind::Cabins => &CABINS,
            BuildingKind::Barracks => &BARRACKS,
            BuildingKind::AbyssalOreRefinery => &ABYSSAL_ORE_REFINERY,
            BuildingKind::DefensiveDome => &DEFENSIVE_DOME,
        }
    }
}

impl fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BuildingKind {
    type Err = UnknownBuildingType;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        BuildingKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| UnknownBuildingType(tag.to_string()))
    }
}

/// Economic parameters of one building kind.
///
/// Cost and build time grow multiplicatively per stage:
/// `cost(stage) = build_cost * cost_growth^stage`, rounded to the nearest
/// whole unit. Production scales linearly with stage.
#[derive(Debug, Clone, Serialize)]
pub struct BuildingSpec {
    /// Cost to advance from stage 0 (charged in steel).
    pub build_cost: i64,
    /// Seconds of construction for the first stage.
    pub build_time: i64,
    /// Output per stage per second.
    pub production: Resources,
    pub cost_growth: f64,
    pub time_growth: f64,
    /// Upgrades stop once this stage is reached.
    pub max_stage: u32,
    /// Contribution to base defense; unused by the economy itself.
    pub defense: i64,
}

impl BuildingSpec {
    /// Cost of advancing from `stage` to `stage + 1`.
    pub fn cost_at(&self, stage: u32) -> i64 {
        (self.build_cost as f64 * self.cost_growth.powi(stage as i32)).round() as i64
    }

    /// Construction seconds for advancing from `stage` to `stage + 1`.
    pub fn build_time_at(&self, stage: u32) -> i64 {
        (self.build_time as f64 * self.time_growth.powi(stage as i32)).round() as i64
    }

    /// Output per second at the given stage.
    pub fn output_at(&self, stage: u32) -> Resources {
        self.production.scaled(stage as i64)
    }
}

static PLANTATION: BuildingSpec = BuildingSpec {
    build_cost: 20,
    build_time: 30,
    production: Resources::new(5, 0, 0),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 8,
    defense: 0,
};

static POWER_PLANT: BuildingSpec = BuildingSpec {
    build_cost: 40,
    build_time: 45,
    production: Resources::new(0, 0, 100),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 6,
    defense: 0,
};

static CABINS: BuildingSpec = BuildingSpec {
    build_cost: 30,
    build_time: 20,
    production: Resources::new(0, 0, 0),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 10,
    defense: 0,
};

static BARRACKS: BuildingSpec = BuildingSpec {
    build_cost: 50,
    build_time: 60,
    production: Resources::new(0, 0, 0),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 5,
    defense: 0,
};

static ABYSSAL_ORE_REFINERY: BuildingSpec = BuildingSpec {
    build_cost: 70,
    build_time: 80,
    production: Resources::new(0, 15, 0),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 8,
    defense: 0,
};

static DEFENSIVE_DOME: BuildingSpec = BuildingSpec {
    build_cost: 100,
    build_time: 90,
    production: Resources::new(0, 0, 0),
    cost_growth: 1.5,
    time_growth: 1.5,
    max_stage: 3,
    defense: 200,
};

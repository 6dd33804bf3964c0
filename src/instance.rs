//! Candidate sites: the site dataset, its file formats and candidate generation.
//!
//! A solve never works on the raw dataset. The [`CandidateGenerator`] clips the
//! sites (or a synthetic mesh of cells) to the request region and attaches the
//! distance to the population center. The resulting [`Candidate`] list is
//! immutable and a candidate's index in it is its identity for one solve.

use std::fs::File;
use std::path::Path;

use log::debug;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::geo::{BoundingBox, GeoPoint, Region};

/// Minimum number of lattice points a mesh is built from
pub const MIN_MESH_POINTS: usize = 20;

/// Lattice points generated per affordable cell
pub const MESH_POINTS_PER_CELL: usize = 5;

/// Upper bound on lattice points; the dense QUBO grows with its square
pub const MAX_MESH_POINTS: usize = 2_500;

/// A potential installation site as stored in the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "Site_ID")]
    pub site_id: String,
    #[serde(rename = "Installation_Cost_USD")]
    pub installation_cost: f64,
    #[serde(rename = "Population_Coverage")]
    pub population_coverage: f64,
    #[serde(rename = "Solar_Potential_kWh_m2_day", default)]
    pub solar_potential: f64,
    #[serde(rename = "Energy_Capacity_kWh_day")]
    pub energy_capacity: f64,
    /// Longitude
    #[serde(rename = "X_coord")]
    pub x: f64,
    /// Latitude
    #[serde(rename = "Y_coord")]
    pub y: f64,
}

impl Site {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.x, self.y)
    }
}

/// A collection of sites loaded from disk or generated synthetically
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteDataset {
    pub name: String,
    pub sites: Vec<Site>,
}

impl SiteDataset {
    pub fn new(name: &str, sites: Vec<Site>) -> Self {
        SiteDataset { name: name.to_string(), sites }
    }

    /// Load a dataset from a `.csv` file (original column names) or a `.json`
    /// array of site records.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let sites: Vec<Site> = if is_json {
            serde_json::from_reader(File::open(path)?)?
        } else {
            let mut reader = csv::Reader::from_path(path)?;
            reader.deserialize::<Site>().collect::<std::result::Result<Vec<_>, _>>()?
        };

        for site in &sites {
            if !(site.installation_cost > 0.0) {
                return Err(PlannerError::invalid(format!(
                    "site {} has non-positive installation cost {}",
                    site.site_id, site.installation_cost
                )));
            }
        }

        debug!("Loaded {} sites from {:?}", sites.len(), path);
        Ok(SiteDataset { name, sites })
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for site in &self.sites {
            writer.serialize(site)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Generate a reproducible synthetic dataset inside `bbox`.
    ///
    /// Energy capacity is derived from solar potential and population the same
    /// way for every site: `solar * population * 0.3`, rounded to 2 decimals.
    pub fn generate(num_sites: usize, seed: u64, bbox: BoundingBox) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let round2 = |v: f64| (v * 100.0).round() / 100.0;

        let sites = (0..num_sites)
            .map(|i| {
                let installation_cost = rng.gen_range(15_000..50_000) as f64;
                let population_coverage = rng.gen_range(100..1_500) as f64;
                let solar_potential = round2(rng.gen_range(3.5..6.5));
                let energy_capacity = round2(solar_potential * population_coverage * 0.3);
                let x = rng.gen_range(bbox.min_lng..bbox.max_lng);
                let y = rng.gen_range(bbox.min_lat..bbox.max_lat);

                Site {
                    site_id: format!("Site_{}", i + 1),
                    installation_cost,
                    population_coverage,
                    solar_potential,
                    energy_capacity,
                    x,
                    y,
                }
            })
            .collect();

        SiteDataset { name: format!("synthetic-{}-{}", num_sites, seed), sites }
    }

    pub fn statistics(&self) -> DatasetStatistics {
        let n = self.sites.len();
        let total_cost: f64 = self.sites.iter().map(|s| s.installation_cost).sum();
        let total_population: f64 = self.sites.iter().map(|s| s.population_coverage).sum();
        let total_energy: f64 = self.sites.iter().map(|s| s.energy_capacity).sum();

        DatasetStatistics {
            name: self.name.clone(),
            num_sites: n,
            total_cost,
            total_population,
            total_energy,
            avg_cost: if n > 0 { total_cost / n as f64 } else { 0.0 },
            min_cost: self.sites.iter().map(|s| s.installation_cost).fold(f64::INFINITY, f64::min),
            max_cost: self.sites.iter().map(|s| s.installation_cost).fold(0.0, f64::max),
        }
    }
}

/// Summary figures for a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub name: String,
    pub num_sites: usize,
    pub total_cost: f64,
    pub total_population: f64,
    pub total_energy: f64,
    pub avg_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
}

impl std::fmt::Display for DatasetStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dataset: {}", self.name)?;
        writeln!(f, "  Sites: {}", self.num_sites)?;
        writeln!(f, "  Total potential cost: ${:.0}", self.total_cost)?;
        writeln!(f, "  Total potential population: {:.0}", self.total_population)?;
        writeln!(f, "  Total potential energy: {:.2} kWh/day", self.total_energy)?;
        if self.num_sites > 0 {
            writeln!(f, "  Cost range: ${:.0} .. ${:.0} (avg ${:.0})", self.min_cost, self.max_cost, self.avg_cost)?;
        }
        Ok(())
    }
}

/// Fixed per-cell attributes used when candidates are synthesized as a mesh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellProfile {
    pub cost: f64,
    pub energy: f64,
    /// Population credited to each cell; meshes usually carry none
    #[serde(default)]
    pub population_coverage: f64,
}

/// A site eligible for selection within one solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub location: GeoPoint,
    pub cost: f64,
    pub energy: f64,
    pub population_coverage: f64,
    pub distance_km: f64,
    /// Dataset identifier, absent for mesh cells
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

/// How the candidate set of a region is produced
#[derive(Debug, Clone, Copy)]
pub enum GenerationStrategy<'a> {
    /// Keep the dataset sites lying inside the region
    Filter(&'a SiteDataset),
    /// Synthesize a lattice of identical cells over the region
    Mesh { profile: CellProfile, budget: f64 },
}

impl GenerationStrategy<'_> {
    pub fn name(&self) -> &str {
        match self {
            GenerationStrategy::Filter(_) => "filter",
            GenerationStrategy::Mesh { .. } => "mesh",
        }
    }
}

/// Produces the candidate list for a region. Deterministic: the same inputs
/// always yield the same candidates in the same order.
pub struct CandidateGenerator;

impl CandidateGenerator {
    pub fn generate(
        region: &Region,
        strategy: GenerationStrategy<'_>,
        population_center: &GeoPoint,
    ) -> Result<Vec<Candidate>> {
        let candidates = match strategy {
            GenerationStrategy::Filter(dataset) => Self::filter(region, dataset, population_center),
            GenerationStrategy::Mesh { profile, budget } => Self::mesh(region, &profile, budget, population_center)?,
        };

        debug!(
            "Generated {} candidates ({} mode)",
            candidates.len(),
            strategy.name()
        );
        Ok(candidates)
    }

    fn filter(region: &Region, dataset: &SiteDataset, center: &GeoPoint) -> Vec<Candidate> {
        dataset
            .sites
            .iter()
            .filter(|site| region.contains(&site.location()))
            .map(|site| {
                let location = site.location();
                Candidate {
                    location,
                    cost: site.installation_cost,
                    energy: site.energy_capacity,
                    population_coverage: site.population_coverage,
                    distance_km: location.distance_km(center),
                    site_id: Some(site.site_id.clone()),
                }
            })
            .collect()
    }

    fn mesh(region: &Region, profile: &CellProfile, budget: f64, center: &GeoPoint) -> Result<Vec<Candidate>> {
        if !(profile.cost > 0.0) || !profile.cost.is_finite() {
            return Err(PlannerError::invalid(format!("cell cost must be positive, got {}", profile.cost)));
        }
        if profile.energy < 0.0 || profile.population_coverage < 0.0 {
            return Err(PlannerError::invalid("cell energy and population must be non-negative"));
        }

        let side = mesh_side(budget, profile.cost);
        let candidates = region
            .bounding_box()
            .lattice(side)
            .into_iter()
            .filter(|p| region.contains(p))
            .map(|location| Candidate {
                location,
                cost: profile.cost,
                energy: profile.energy,
                population_coverage: profile.population_coverage,
                distance_km: location.distance_km(center),
                site_id: None,
            })
            .collect();

        Ok(candidates)
    }
}

/// Lattice side length for a mesh: the target point count is
/// `floor(budget / cell_cost) * 5` clamped to
/// [`MIN_MESH_POINTS`]..=[`MAX_MESH_POINTS`], laid out as a square.
pub fn mesh_side(budget: f64, cell_cost: f64) -> usize {
    // computed in f64 so huge ratios saturate instead of overflowing
    let affordable = (budget / cell_cost).floor().max(0.0);
    let target = (affordable * MESH_POINTS_PER_CELL as f64).clamp(MIN_MESH_POINTS as f64, MAX_MESH_POINTS as f64);
    target.sqrt().ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Region {
        Region::new([
            GeoPoint::new(min, min),
            GeoPoint::new(max, min),
            GeoPoint::new(max, max),
            GeoPoint::new(min, max),
        ])
    }

    fn site(id: &str, x: f64, y: f64) -> Site {
        Site {
            site_id: id.to_string(),
            installation_cost: 20_000.0,
            population_coverage: 500.0,
            solar_potential: 5.0,
            energy_capacity: 750.0,
            x,
            y,
        }
    }

    #[test]
    fn test_filter_keeps_sites_inside() {
        let dataset = SiteDataset::new("t", vec![site("a", 0.5, 0.5), site("b", 3.0, 3.0), site("c", 0.2, 0.9)]);
        let center = GeoPoint::new(0.0, 0.0);
        let candidates = CandidateGenerator::generate(&square(0.0, 1.0), GenerationStrategy::Filter(&dataset), &center).unwrap();

        let ids: Vec<_> = candidates.iter().map(|c| c.site_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(candidates.iter().all(|c| c.distance_km > 0.0));

        let again = CandidateGenerator::generate(&square(0.0, 1.0), GenerationStrategy::Filter(&dataset), &center).unwrap();
        assert_eq!(candidates, again);
    }

    #[test]
    fn test_filter_disjoint_region_is_empty() {
        let dataset = SiteDataset::generate(30, 1, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let center = GeoPoint::new(0.0, 0.0);
        let candidates = CandidateGenerator::generate(&square(10.0, 11.0), GenerationStrategy::Filter(&dataset), &center).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_mesh_side() {
        // floor(100 / 30) * 5 = 15 -> clamped to 20 -> side 5
        assert_eq!(mesh_side(100.0, 30.0), 5);
        // floor(1000 / 10) * 5 = 500 -> side 23
        assert_eq!(mesh_side(1000.0, 10.0), 23);
    }

    #[test]
    fn test_mesh_side_is_capped() {
        assert_eq!(mesh_side(1e30, 1.0), 50);
        assert_eq!(mesh_side(f64::INFINITY, 1.0), 50);
        assert_eq!(mesh_side(1e9, 1.0), 50);

        let profile = CellProfile { cost: 1.0, energy: 4.0, population_coverage: 0.0 };
        let strategy = GenerationStrategy::Mesh { profile, budget: 1e12 };
        let candidates = CandidateGenerator::generate(&square(0.0, 1.0), strategy, &GeoPoint::new(0.5, 0.5)).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.len() <= MAX_MESH_POINTS);
    }

    #[test]
    fn test_mesh_generation() {
        let profile = CellProfile { cost: 10.0, energy: 4.0, population_coverage: 0.0 };
        let center = GeoPoint::new(0.5, 0.5);
        let strategy = GenerationStrategy::Mesh { profile, budget: 100.0 };
        let candidates = CandidateGenerator::generate(&square(0.0, 1.0), strategy, &center).unwrap();

        // side = ceil(sqrt(50)) = 8; points on the north and east edges fall outside
        assert_eq!(candidates.len(), 49);
        assert!(candidates.iter().all(|c| c.cost == 10.0 && c.energy == 4.0 && c.site_id.is_none()));

        let again = CandidateGenerator::generate(&square(0.0, 1.0), strategy, &center).unwrap();
        assert_eq!(candidates, again);
    }

    #[test]
    fn test_mesh_rejects_bad_profile() {
        let profile = CellProfile { cost: 0.0, energy: 4.0, population_coverage: 0.0 };
        let strategy = GenerationStrategy::Mesh { profile, budget: 100.0 };
        let result = CandidateGenerator::generate(&square(0.0, 1.0), strategy, &GeoPoint::new(0.0, 0.0));
        assert!(matches!(result, Err(PlannerError::InvalidInput(_))));
    }

    #[test]
    fn test_generate_dataset_is_reproducible() {
        let bbox = BoundingBox::ethiopia();
        let a = SiteDataset::generate(50, 42, bbox);
        let b = SiteDataset::generate(50, 42, bbox);
        assert_eq!(a.sites, b.sites);
        for s in &a.sites {
            assert!(s.installation_cost >= 15_000.0 && s.installation_cost < 50_000.0);
            assert!(s.x >= bbox.min_lng && s.x < bbox.max_lng);
            assert!(s.y >= bbox.min_lat && s.y < bbox.max_lat);
        }
        assert_eq!(a.statistics().num_sites, 50);
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.csv");
        let dataset = SiteDataset::generate(5, 7, BoundingBox::ethiopia());
        dataset.to_csv(&path).unwrap();

        let loaded = SiteDataset::from_file(&path).unwrap();
        assert_eq!(loaded.sites.len(), 5);
        assert_eq!(loaded.sites[0].site_id, "Site_1");
        assert_eq!(loaded.name, "sites");
    }
}

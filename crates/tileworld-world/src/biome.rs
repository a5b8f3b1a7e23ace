//! Biome classification and blended transitions.
//!
//! This module provides:
//! - Biome type definitions and their tile/object tables
//! - A registry of biome definitions, loadable from RON
//! - Two-channel (temperature, moisture) classification over noise fields
//! - Domain-warped lookups with a blended secondary biome near boundaries

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::chunk::{tiles, ObjectType, TileId};
use crate::noise::NoiseField;

// ============================================================================
// Biome Type Definitions
// ============================================================================

/// Types of biomes in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiomeType {
    /// Temperate grassland, the default biome.
    Plains,
    /// Hot and dry.
    Desert,
    /// Cold and wet.
    Snow,
}

impl BiomeType {
    /// Get the display name for this biome.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Plains => "Plains",
            Self::Desert => "Desert",
            Self::Snow => "Snow",
        }
    }

    /// Get all biome types.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Plains, Self::Desert, Self::Snow]
    }

    /// Whether a border between these two biomes may be blended.
    #[must_use]
    pub fn blends_with(self, other: Self) -> bool {
        self == other
            || matches!(
                (self, other),
                (Self::Plains, Self::Desert | Self::Snow)
                    | (Self::Desert | Self::Snow, Self::Plains)
            )
    }
}

/// Errors raised while building or loading biome tables.
#[derive(Debug, Error)]
pub enum BiomeError {
    /// Reading the biome file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The biome file is not valid RON.
    #[error("Failed to parse biome table: {0}")]
    Parse(String),

    /// A biome's tile distribution is unusable.
    #[error("Invalid tile weights for {biome:?}: {reason}")]
    InvalidWeights {
        /// Offending biome
        biome: BiomeType,
        /// What is wrong
        reason: String,
    },

    /// The registry has no entry for its own default biome.
    #[error("Default biome {0:?} is not defined")]
    MissingDefault(BiomeType),
}

/// Tile and object tables for one biome. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biome {
    /// Biome this table describes.
    pub biome_type: BiomeType,
    /// Tiles on which objects of this biome may stand.
    pub allowed_tiles: BTreeSet<TileId>,
    /// Relative weight of each tile in generated terrain.
    pub tile_weights: BTreeMap<TileId, f64>,
    /// Object kinds placed in this biome, in placement order.
    pub spawnable_objects: Vec<ObjectType>,
    /// Per-tile spawn chance for each object kind.
    pub spawn_chance: BTreeMap<ObjectType, f64>,
}

impl Biome {
    /// Sum of all tile weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.tile_weights.values().sum()
    }

    /// Spawn chance for an object kind (0 when not listed).
    #[must_use]
    pub fn spawn_chance(&self, object_type: ObjectType) -> f64 {
        self.spawn_chance.get(&object_type).copied().unwrap_or(0.0)
    }

    /// Whether objects may stand on this tile.
    #[must_use]
    pub fn allows_tile(&self, tile: TileId) -> bool {
        self.allowed_tiles.contains(&tile)
    }

    /// Picks a tile for a uniform `roll` in [0, total weight) by cumulative sum.
    #[must_use]
    pub fn pick_tile(&self, roll: f64) -> Option<TileId> {
        let mut cumulative = 0.0;
        let mut last = None;
        for (&tile, &weight) in &self.tile_weights {
            if weight <= 0.0 {
                continue;
            }
            cumulative += weight;
            last = Some(tile);
            if roll < cumulative {
                return Some(tile);
            }
        }
        // Rounding can leave roll == total; the last positive tile owns it.
        last
    }

    /// Checks that the weights form a valid distribution over allowed tiles.
    pub fn validate(&self) -> Result<(), BiomeError> {
        let invalid = |reason: String| BiomeError::InvalidWeights {
            biome: self.biome_type,
            reason,
        };

        if self.tile_weights.is_empty() {
            return Err(invalid("no tile weights".into()));
        }
        if let Some((tile, weight)) = self
            .tile_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(invalid(format!("tile {tile} has weight {weight}")));
        }
        if let Some(tile) = self.tile_weights.keys().find(|t| !self.allows_tile(**t)) {
            return Err(invalid(format!("tile {tile} is weighted but not allowed")));
        }
        if self.total_weight() <= 0.0 {
            return Err(invalid("weights sum to zero".into()));
        }
        Ok(())
    }

    fn plains() -> Self {
        Self {
            biome_type: BiomeType::Plains,
            allowed_tiles: [tiles::GRASS, tiles::TALL_GRASS, tiles::DIRT].into(),
            tile_weights: [
                (tiles::GRASS, 0.7),
                (tiles::TALL_GRASS, 0.2),
                (tiles::DIRT, 0.1),
            ]
            .into(),
            spawnable_objects: vec![
                ObjectType::Tree,
                ObjectType::Bush,
                ObjectType::Rock,
                ObjectType::Flower,
            ],
            spawn_chance: [
                (ObjectType::Tree, 0.04),
                (ObjectType::Bush, 0.03),
                (ObjectType::Rock, 0.01),
                (ObjectType::Flower, 0.03),
            ]
            .into(),
        }
    }

    fn desert() -> Self {
        Self {
            biome_type: BiomeType::Desert,
            allowed_tiles: [tiles::SAND, tiles::DRY_EARTH].into(),
            tile_weights: [(tiles::SAND, 0.85), (tiles::DRY_EARTH, 0.15)].into(),
            spawnable_objects: vec![ObjectType::Cactus, ObjectType::Rock],
            spawn_chance: [(ObjectType::Cactus, 0.03), (ObjectType::Rock, 0.015)].into(),
        }
    }

    fn snow() -> Self {
        Self {
            biome_type: BiomeType::Snow,
            allowed_tiles: [tiles::SNOW, tiles::ICE, tiles::DIRT].into(),
            tile_weights: [(tiles::SNOW, 0.8), (tiles::ICE, 0.15), (tiles::DIRT, 0.05)].into(),
            spawnable_objects: vec![ObjectType::PineTree, ObjectType::Rock],
            spawn_chance: [(ObjectType::PineTree, 0.035), (ObjectType::Rock, 0.01)].into(),
        }
    }
}

// ============================================================================
// Biome Registry
// ============================================================================

/// On-disk shape of a biome table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BiomeTable {
    default: BiomeType,
    biomes: Vec<Biome>,
}

/// Validated set of biome definitions with a fallback biome.
#[derive(Debug, Clone)]
pub struct BiomeRegistry {
    biomes: HashMap<BiomeType, Biome>,
    default: BiomeType,
}

impl Default for BiomeRegistry {
    fn default() -> Self {
        let biomes = [Biome::plains(), Biome::desert(), Biome::snow()]
            .into_iter()
            .map(|b| (b.biome_type, b))
            .collect();
        Self {
            biomes,
            default: BiomeType::Plains,
        }
    }
}

impl BiomeRegistry {
    /// Builds a registry, validating every biome and the default.
    pub fn new(biomes: Vec<Biome>, default: BiomeType) -> Result<Self, BiomeError> {
        for biome in &biomes {
            biome.validate()?;
        }
        let biomes: HashMap<_, _> = biomes.into_iter().map(|b| (b.biome_type, b)).collect();
        if !biomes.contains_key(&default) {
            return Err(BiomeError::MissingDefault(default));
        }
        Ok(Self { biomes, default })
    }

    /// Parses a registry from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, BiomeError> {
        let table: BiomeTable =
            ron::from_str(text).map_err(|e| BiomeError::Parse(e.to_string()))?;
        Self::new(table.biomes, table.default)
    }

    /// Loads a registry from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BiomeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let registry = Self::from_ron_str(&text)?;
        info!("Loaded {} biomes from {}", registry.biomes.len(), path.display());
        Ok(registry)
    }

    /// Serializes the registry to RON text.
    pub fn to_ron_string(&self) -> Result<String, BiomeError> {
        let mut biomes: Vec<Biome> = self.biomes.values().cloned().collect();
        biomes.sort_by_key(|b| b.biome_type);
        let table = BiomeTable {
            default: self.default,
            biomes,
        };
        ron::ser::to_string_pretty(&table, ron::ser::PrettyConfig::default())
            .map_err(|e| BiomeError::Parse(e.to_string()))
    }

    /// Looks up a biome, falling back to the default biome with a warning.
    #[must_use]
    pub fn get(&self, biome_type: BiomeType) -> &Biome {
        if let Some(biome) = self.biomes.get(&biome_type) {
            return biome;
        }
        warn!(
            "Biome {:?} is not configured, using {:?}",
            biome_type, self.default
        );
        &self.biomes[&self.default]
    }

    /// Whether a biome is configured.
    #[must_use]
    pub fn contains(&self, biome_type: BiomeType) -> bool {
        self.biomes.contains_key(&biome_type)
    }

    /// The fallback biome type.
    #[must_use]
    pub const fn default_type(&self) -> BiomeType {
        self.default
    }
}

// ============================================================================
// Classification and Transitions
// ============================================================================

/// Scale of the temperature and moisture channels (units⁻¹).
pub const CLIMATE_SCALE: f64 = 5.0e-5;
/// Octaves per climate channel.
pub const CLIMATE_OCTAVES: u32 = 3;
/// Frequency multiplier between octaves.
pub const LACUNARITY: f64 = 2.0;
/// Seed offset of the temperature channel.
pub const TEMPERATURE_SEED_OFFSET: u64 = 1000;
/// Seed offset of the moisture channel.
pub const MOISTURE_SEED_OFFSET: u64 = 2000;

/// Domain warp octaves.
pub const WARP_OCTAVES: u32 = 3;
/// Displacement of the first warp octave, in units.
pub const WARP_AMPLITUDE: f64 = 30.0;
/// Frequency of the first warp octave.
pub const WARP_FREQUENCY: f64 = 0.004;
/// Frequency multiplier between warp octaves.
pub const WARP_LACUNARITY: f64 = 1.8;

/// Base distance from the 0.5 midpoint inside which biomes blend.
pub const TRANSITION_THRESHOLD: f64 = 0.15;
/// Maximum edge-noise perturbation of the threshold.
pub const TRANSITION_JITTER: f64 = 0.05;
/// Frequency of the edge noise.
pub const EDGE_FREQUENCY: f64 = 0.01;
/// Offset of the secondary sample point.
pub const SECONDARY_OFFSET: f64 = 64.0;

/// Classifies a (temperature, moisture) pair, both in [0, 1].
#[must_use]
pub fn classify_climate(temperature: f64, moisture: f64) -> BiomeType {
    if temperature < 0.35 {
        if moisture > 0.65 {
            BiomeType::Snow
        } else {
            BiomeType::Plains
        }
    } else if temperature > 0.65 {
        if moisture < 0.35 {
            BiomeType::Desert
        } else {
            BiomeType::Plains
        }
    } else {
        BiomeType::Plains
    }
}

/// Result of a blended biome lookup. Computed per query, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiomeTransition {
    /// Biome at the sample point.
    pub primary: BiomeType,
    /// Neighbouring biome to blend toward; present only when `blend_factor < 1`.
    pub secondary: Option<BiomeType>,
    /// 1 means fully primary.
    pub blend_factor: f64,
}

impl BiomeTransition {
    /// A lookup with no blending.
    #[must_use]
    pub const fn pure(primary: BiomeType) -> Self {
        Self {
            primary,
            secondary: None,
            blend_factor: 1.0,
        }
    }
}

/// Seeded biome classifier.
#[derive(Debug, Clone)]
pub struct BiomeEngine {
    seed: u64,
    temperature: NoiseField,
    moisture: NoiseField,
    warp_x: NoiseField,
    warp_y: NoiseField,
    edge: NoiseField,
    registry: Arc<BiomeRegistry>,
}

impl BiomeEngine {
    /// Creates an engine for a world seed.
    #[must_use]
    pub fn new(seed: u64, registry: Arc<BiomeRegistry>) -> Self {
        Self {
            seed,
            temperature: NoiseField::new(seed.wrapping_add(TEMPERATURE_SEED_OFFSET)),
            moisture: NoiseField::new(seed.wrapping_add(MOISTURE_SEED_OFFSET)),
            warp_x: NoiseField::new(seed.wrapping_add(3000)),
            warp_y: NoiseField::new(seed.wrapping_add(4000)),
            edge: NoiseField::new(seed.wrapping_add(5000)),
            registry,
        }
    }

    /// Creates an engine with the built-in biome table.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(seed, Arc::new(BiomeRegistry::default()))
    }

    /// The world seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// The biome table.
    #[must_use]
    pub fn registry(&self) -> &BiomeRegistry {
        &self.registry
    }

    /// Temperature and moisture at a point, both in [0, 1].
    #[must_use]
    pub fn climate(&self, x: f64, y: f64) -> (f64, f64) {
        let t = self
            .temperature
            .fractal(x, y, CLIMATE_OCTAVES, CLIMATE_SCALE, LACUNARITY);
        let m = self
            .moisture
            .fractal(x, y, CLIMATE_OCTAVES, CLIMATE_SCALE, LACUNARITY);
        (t, m)
    }

    /// Classifies an unwarped point.
    #[must_use]
    pub fn classify(&self, x: f64, y: f64) -> BiomeType {
        let (t, m) = self.climate(x, y);
        classify_climate(t, m)
    }

    /// Applies the domain warp to a sample point.
    #[must_use]
    pub fn warp(&self, x: f64, y: f64) -> (f64, f64) {
        let (mut wx, mut wy) = (x, y);
        let mut amplitude = WARP_AMPLITUDE;
        let mut frequency = WARP_FREQUENCY;
        for _ in 0..WARP_OCTAVES {
            let dx = self.warp_x.sample(wx * frequency, wy * frequency) * amplitude;
            let dy = self.warp_y.sample(wx * frequency, wy * frequency) * amplitude;
            wx += dx;
            wy += dy;
            amplitude *= 0.5;
            frequency *= WARP_LACUNARITY;
        }
        (wx, wy)
    }

    /// Blend threshold at a point: 0.15 perturbed by edge noise.
    #[must_use]
    pub fn transition_threshold(&self, x: f64, y: f64) -> f64 {
        TRANSITION_THRESHOLD
            + self.edge.sample(x * EDGE_FREQUENCY, y * EDGE_FREQUENCY) * TRANSITION_JITTER
    }

    /// Biome at a world point with boundary blending.
    #[must_use]
    pub fn biome_at(&self, world_x: f64, world_y: f64) -> BiomeTransition {
        let (wx, wy) = self.warp(world_x, world_y);
        let (t, m) = self.climate(wx, wy);
        let primary = classify_climate(t, m);

        let threshold = self.transition_threshold(world_x, world_y);
        let dt = (t - 0.5).abs();
        let dm = (m - 0.5).abs();
        if dt >= threshold && dm >= threshold {
            return BiomeTransition::pure(primary);
        }

        let secondary = self.classify(wx + SECONDARY_OFFSET, wy + SECONDARY_OFFSET);
        if !primary.blends_with(secondary) {
            return BiomeTransition::pure(primary);
        }

        let blend_factor = (dt.max(dm) / threshold).clamp(0.0, 1.0);
        BiomeTransition {
            primary,
            secondary: (blend_factor < 1.0).then_some(secondary),
            blend_factor,
        }
    }

    /// Biome definition for a type, falling back to the default biome.
    #[must_use]
    pub fn biome(&self, biome_type: BiomeType) -> &Biome {
        self.registry.get(biome_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_biome_type_display_names() {
        assert_eq!(BiomeType::Plains.display_name(), "Plains");
        assert_eq!(BiomeType::Desert.display_name(), "Desert");
        assert_eq!(BiomeType::Snow.display_name(), "Snow");
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify_climate(0.2, 0.8), BiomeType::Snow);
        assert_eq!(classify_climate(0.2, 0.5), BiomeType::Plains);
        assert_eq!(classify_climate(0.8, 0.2), BiomeType::Desert);
        assert_eq!(classify_climate(0.8, 0.5), BiomeType::Plains);
        assert_eq!(classify_climate(0.5, 0.9), BiomeType::Plains);
        assert_eq!(classify_climate(0.5, 0.1), BiomeType::Plains);
    }

    #[test]
    fn test_compatible_pairs() {
        assert!(BiomeType::Plains.blends_with(BiomeType::Desert));
        assert!(BiomeType::Snow.blends_with(BiomeType::Plains));
        assert!(BiomeType::Desert.blends_with(BiomeType::Desert));
        assert!(!BiomeType::Desert.blends_with(BiomeType::Snow));
        assert!(!BiomeType::Snow.blends_with(BiomeType::Desert));
    }

    #[test]
    fn test_default_registry_is_valid() {
        let registry = BiomeRegistry::default();
        for biome_type in BiomeType::all() {
            let biome = registry.get(biome_type);
            assert_eq!(biome.biome_type, biome_type);
            assert!(biome.validate().is_ok());
        }
    }

    #[test]
    fn test_missing_biome_falls_back_to_default() {
        let registry =
            BiomeRegistry::new(vec![Biome::plains()], BiomeType::Plains).expect("valid registry");
        assert!(!registry.contains(BiomeType::Snow));
        assert_eq!(registry.get(BiomeType::Snow).biome_type, BiomeType::Plains);
    }

    #[test]
    fn test_registry_requires_default() {
        let result = BiomeRegistry::new(vec![Biome::desert()], BiomeType::Plains);
        assert!(matches!(result, Err(BiomeError::MissingDefault(BiomeType::Plains))));
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut zero = Biome::plains();
        for weight in zero.tile_weights.values_mut() {
            *weight = 0.0;
        }
        assert!(zero.validate().is_err());

        let mut stray = Biome::desert();
        stray.tile_weights.insert(tiles::SNOW, 1.0);
        assert!(stray.validate().is_err());

        let mut empty = Biome::snow();
        empty.tile_weights.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_pick_tile_cumulative() {
        let biome = Biome::desert();
        // Weights iterate in tile-id order: SAND (4) then DRY_EARTH (5).
        assert_eq!(biome.pick_tile(0.0), Some(tiles::SAND));
        assert_eq!(biome.pick_tile(0.84), Some(tiles::SAND));
        assert_eq!(biome.pick_tile(0.86), Some(tiles::DRY_EARTH));
        assert_eq!(biome.pick_tile(biome.total_weight()), Some(tiles::DRY_EARTH));
    }

    #[test]
    fn test_ron_roundtrip() {
        let registry = BiomeRegistry::default();
        let text = registry.to_ron_string().expect("serialize failed");
        let loaded = BiomeRegistry::from_ron_str(&text).expect("parse failed");
        for biome_type in BiomeType::all() {
            assert_eq!(loaded.get(biome_type), registry.get(biome_type));
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("biomes.ron");
        let text = BiomeRegistry::default()
            .to_ron_string()
            .expect("serialize failed");
        std::fs::write(&path, text).expect("write failed");

        let loaded = BiomeRegistry::load(&path).expect("load failed");
        assert_eq!(loaded.default_type(), BiomeType::Plains);
        assert!(BiomeRegistry::load(dir.path().join("missing.ron")).is_err());
    }

    #[test]
    fn test_threshold_stays_in_jitter_band() {
        let engine = BiomeEngine::with_seed(9);
        for i in 0..200 {
            let x = f64::from(i) * 13.7;
            let threshold = engine.transition_threshold(x, -x);
            assert!(threshold >= TRANSITION_THRESHOLD - TRANSITION_JITTER - 1e-9);
            assert!(threshold <= TRANSITION_THRESHOLD + TRANSITION_JITTER + 1e-9);
        }
    }

    #[test]
    fn test_warp_displacement_is_bounded() {
        let engine = BiomeEngine::with_seed(3);
        let max_shift = WARP_AMPLITUDE * (1.0 + 0.5 + 0.25) * 2.0_f64.sqrt();
        for i in 0..100 {
            let x = f64::from(i) * 101.0;
            let (wx, wy) = engine.warp(x, x * 0.5);
            let shift = ((wx - x).powi(2) + (wy - x * 0.5).powi(2)).sqrt();
            assert!(shift <= max_shift + 1e-9);
        }
    }

    proptest! {
        #[test]
        fn prop_classify_is_deterministic(seed in any::<u64>(), x in -1.0e7f64..1.0e7, y in -1.0e7f64..1.0e7) {
            let a = BiomeEngine::with_seed(seed);
            let b = BiomeEngine::with_seed(seed);
            prop_assert_eq!(a.classify(x, y), a.classify(x, y));
            prop_assert_eq!(a.classify(x, y), b.classify(x, y));
        }

        #[test]
        fn prop_transition_invariants(seed in any::<u64>(), x in -1.0e6f64..1.0e6, y in -1.0e6f64..1.0e6) {
            let engine = BiomeEngine::with_seed(seed);
            let result = engine.biome_at(x, y);
            prop_assert!((0.0..=1.0).contains(&result.blend_factor));
            if result.secondary.is_some() {
                prop_assert!(result.blend_factor < 1.0);
            }
            if let Some(secondary) = result.secondary {
                prop_assert!(result.primary.blends_with(secondary));
            }
            prop_assert_eq!(result, engine.biome_at(x, y));
        }
    }
}

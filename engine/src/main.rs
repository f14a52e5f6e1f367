//! ItemStage Benchmark
//!
//! Seeds a synthetic world into the in-memory host and measures tick
//! throughput. Usage: `itemstage-bench [config.json]`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use itemstage::catalog::ItemKind;
use itemstage::host::memory::MemoryHost;
use itemstage::ids::{AreaId, FeatureId};
use itemstage::{
    CatalogDefinition, CatalystDefinition, CatalystEffect, Coordinator, EngineConfig, ItemId, LocationId, Position,
    RayonExecutor, StageDefinition,
};

const CATALOGS: u32 = 200;
const AREAS: u32 = 64;
const PLACEMENTS: u64 = 20_000;
const CONTAINERS: u64 = 2_000;
const TICKS: u32 = 240;
const HOURS_PER_TICK: f64 = 0.5;

fn definitions(rng: &mut StdRng) -> anyhow::Result<Vec<CatalogDefinition>> {
    let duration = LogNormal::<f64>::new(2.5, 0.8)?;
    let mut defs = Vec::with_capacity(CATALOGS as usize);
    for c in 0..CATALOGS {
        let base = 10_000 + c * 16;
        let stage_count = rng.gen_range(2..6);
        let stages = (0..stage_count)
            .map(|i| StageDefinition {
                index: i,
                item: ItemId(base + i as u32),
                duration: duration.sample(rng).max(0.5),
                display_name: format!("family {} stage {}", c, i),
                crafting_allowed: true,
                effects: Vec::new(),
                features: vec![FeatureId(i as u32)],
                value_scale: 1.0,
            })
            .collect();
        let mut catalysts = Vec::new();
        if rng.gen_bool(0.3) {
            catalysts.push(CatalystDefinition {
                catalyst: ItemId(1 + rng.gen_range(0..8)),
                effect: CatalystEffect::Delay {
                    rate: rng.gen_range(0.1..0.9),
                },
                owner_restriction: Vec::new(),
                allowed_stages: Vec::new(),
            });
        }
        defs.push(CatalogDefinition {
            key: format!("family-{}", c),
            base_item: ItemId(base),
            kind: ItemKind::Food,
            base_weight: 0.5,
            base_value: 5,
            stages,
            fake_stages: Vec::new(),
            decayed_item: ItemId(base + 15),
            catalysts,
            containers: Vec::new(),
        });
    }
    Ok(defs)
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("ItemStage engine benchmark starting...");

    let mut config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    // The bench drives ticks itself
    config.scheduler.auto_start = false;

    let mut rng = StdRng::seed_from_u64(42);
    let defs = definitions(&mut rng)?;
    let base_items: Vec<ItemId> = defs.iter().map(|d| d.base_item).collect();

    let host = Arc::new(MemoryHost::new());
    let coord = Coordinator::new(config, defs, host.clone(), Arc::new(RayonExecutor));

    info!("Seeding {} placements and {} containers...", PLACEMENTS, CONTAINERS);
    let start = Instant::now();
    for p in 0..PLACEMENTS {
        let id = LocationId(p + 1);
        let position = Position::new(rng.gen_range(0.0..4096.0), rng.gen_range(0.0..4096.0), 0.0);
        let area = AreaId(rng.gen_range(0..AREAS));
        if rng.gen_bool(0.05) {
            // Loose catalyst lying around
            host.add_placement(id, ItemId(1 + rng.gen_range(0..8)), 1, position, area);
            continue;
        }
        let item = base_items[rng.gen_range(0..base_items.len())];
        let count = rng.gen_range(1..5);
        host.add_placement(id, item, count, position, area);
        coord.register(item, count, id, 0.0)?;
    }
    for c in 0..CONTAINERS {
        let id = LocationId(1_000_000_000 + c);
        host.add_container(id);
        for _ in 0..rng.gen_range(1..6) {
            let item = base_items[rng.gen_range(0..base_items.len())];
            let count = rng.gen_range(1..10);
            host.put(id, item, count, false);
            coord.register(item, count, id, 0.0)?;
        }
    }
    info!(
        "Seeded in {:?}. Instances: {}, pending timers: {}",
        start.elapsed(),
        coord.instance_count(),
        coord.pending_timers()
    );

    info!("Running {} ticks of {}h...", TICKS, HOURS_PER_TICK);
    let start = Instant::now();
    let mut changes = 0usize;
    for _ in 0..TICKS {
        host.advance(HOURS_PER_TICK);
        changes += coord.tick().changes.len();
    }
    let elapsed = start.elapsed();

    let stats = coord.stats();
    info!(
        "Benchmark complete: {:?} total, {:?} per tick, {} stage changes, {} instances, {} timers left",
        elapsed,
        elapsed / TICKS,
        changes,
        stats.instances,
        stats.pending_timers
    );
    if let Some(usage) = memory_stats::memory_stats() {
        info!(
            "Memory: {:.1} MiB physical, {:.1} MiB virtual",
            usage.physical_mem as f64 / (1024.0 * 1024.0),
            usage.virtual_mem as f64 / (1024.0 * 1024.0)
        );
    }
    info!("Stats: {}", serde_json::to_string(&stats)?);

    coord.shutdown();
    Ok(())
}

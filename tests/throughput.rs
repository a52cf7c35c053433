//! End-to-end flow: grid build, sampled counting passes, metric derivation,
//! and incremental CSV persistence.

use pips_engine::{
    assign_codes, CellGrid, DVec3, GridDims, NullDiagnostics, PipsConfig, PipsEngine,
    StepSnapshot, LOG_FILE_NAME,
};
use std::path::PathBuf;

struct Scene {
    positions: Vec<DVec3>,
    codes: Vec<u32>,
    grid: CellGrid,
    boundary_count: usize,
}

/// Fixed layout: a line of boundary particles along x at z = 0 and a small
/// block of fluid particles above them, cell size equal to the support radius.
fn fixed_scene() -> Scene {
    let dims = GridDims::new(4, 2, 2);
    let cell_size = 0.5;

    let mut boundary: Vec<DVec3> = (0..8)
        .map(|i| DVec3::new(0.1 + 0.22 * i as f64, 0.3, 0.1))
        .collect();
    let mut fluid: Vec<DVec3> = (0..12)
        .map(|i| {
            DVec3::new(
                0.15 + 0.14 * (i % 4) as f64,
                0.25 + 0.2 * ((i / 4) % 2) as f64,
                0.35 + 0.18 * (i / 8) as f64,
            )
        })
        .collect();

    let sort_block = |block: &mut Vec<DVec3>| {
        let codes = assign_codes(block, DVec3::zero(), cell_size, &dims);
        let mut order: Vec<usize> = (0..block.len()).collect();
        order.sort_by_key(|&i| codes[i]);
        *block = order.iter().map(|&i| block[i]).collect();
    };
    sort_block(&mut boundary);
    sort_block(&mut fluid);

    let boundary_count = boundary.len();
    let mut positions = boundary;
    positions.append(&mut fluid);
    let codes = assign_codes(&positions, DVec3::zero(), cell_size, &dims);
    let grid = CellGrid::build(dims, &codes, boundary_count).unwrap();
    Scene {
        positions,
        codes,
        grid,
        boundary_count,
    }
}

fn snapshot<'a>(scene: &'a Scene, step: u32, sim_time: f64) -> StepSnapshot<'a> {
    StepSnapshot {
        step,
        step_time: 0.002,
        sim_time,
        particle_count: scene.positions.len(),
        boundary_count: scene.boundary_count,
        eligible_boundary: scene.boundary_count,
        support_radius_sq: 0.25,
        positions: &scene.positions,
        cell_codes: &scene.codes,
        workers: 3,
    }
}

fn temp_output_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pips-engine-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn read_rows(path: &PathBuf, delimiter: u8) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_owned).collect())
        .collect()
}

#[test]
fn sampled_run_persists_incrementally() {
    let scene = fixed_scene();
    let dir = temp_output_dir("run");
    let config = PipsConfig {
        sample_stride: 10,
        output_dir: dir.clone(),
        ..PipsConfig::default()
    };
    let mut eng = PipsEngine::new(config, Box::new(NullDiagnostics)).unwrap();

    for (step, sim_time) in [(0, 0.0), (10, 0.1), (20, 0.2)] {
        assert!(eng.due(step));
        eng.run_sample(&snapshot(&scene, step, sim_time), &scene.grid)
            .unwrap();
    }
    for s in eng.samples() {
        assert!(s.real_fluid <= s.candidate_fluid);
        assert!(s.real_bound <= s.candidate_bound);
        assert!(s.real_fluid > 0, "fluid block is dense enough to interact");
    }
    assert!(eng.allocated_bytes() > 0);

    let path = dir.join(LOG_FILE_NAME);
    eng.flush().unwrap();
    assert_eq!(read_rows(&path, b',').len(), 3);

    // No new samples: flushing again appends nothing.
    eng.flush().unwrap();
    eng.flush().unwrap();
    assert_eq!(read_rows(&path, b',').len(), 3);

    // One more sample appends exactly one row, after the existing ones.
    eng.run_sample(&snapshot(&scene, 30, 0.3), &scene.grid)
        .unwrap();
    eng.flush().unwrap();
    let rows = read_rows(&path, b',');
    assert_eq!(rows.len(), 4);
    let steps: Vec<u32> = rows.iter().map(|r| r[2].parse().unwrap()).collect();
    assert_eq!(steps, vec![0, 10, 20, 30]);

    // gpips column: interval estimate divided by elapsed interval time, with
    // unit time for the first-ever row.
    for (i, row) in rows.iter().enumerate() {
        let gpips: f64 = row[7].parse().unwrap();
        let t = if i > 0 {
            eng.samples()[i].sim_time - eng.samples()[i - 1].sim_time
        } else {
            1.0
        };
        let expected = eng.interval_interactions(i) / t;
        assert!((gpips - expected).abs() <= 1e-12 * expected.abs().max(1.0));
    }

    // Identical counters every sample means a constant rate: the run total
    // equals rate * covered steps and the throughput divides by sim time.
    let r = eng.samples()[0].real_total() as f64;
    let (fluid, bound) = eng.total_interactions();
    assert!((fluid + bound - r * 30.0 / 1e9).abs() < 1e-15);
    assert!((eng.overall_throughput(0.3) - (fluid + bound) / 0.3).abs() < 1e-15);
    assert!(eng.formatted_total().contains("PIs ("));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn semicolon_separator_changes_delimiter_only() {
    let scene = fixed_scene();
    let dir = temp_output_dir("semicolon");
    let config = PipsConfig {
        csv_sep_comma: false,
        output_dir: dir.clone(),
        ..PipsConfig::default()
    };
    let mut eng = PipsEngine::new(config, Box::new(NullDiagnostics)).unwrap();
    eng.run_sample(&snapshot(&scene, 0, 0.0), &scene.grid)
        .unwrap();
    eng.flush().unwrap();

    let path = dir.join(LOG_FILE_NAME);
    let header = std::fs::read_to_string(&path).unwrap();
    assert!(header.lines().next().unwrap().contains(';'));
    let rows = read_rows(&path, b';');
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], "0");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn save_data_disabled_never_touches_the_log() {
    let scene = fixed_scene();
    let dir = temp_output_dir("disabled");
    let config = PipsConfig {
        save_data: false,
        output_dir: dir.clone(),
        ..PipsConfig::default()
    };
    let mut eng = PipsEngine::new(config, Box::new(NullDiagnostics)).unwrap();
    eng.run_sample(&snapshot(&scene, 0, 0.0), &scene.grid)
        .unwrap();
    eng.flush().unwrap();
    assert!(!dir.join(LOG_FILE_NAME).exists());

    let _ = std::fs::remove_dir_all(&dir);
}

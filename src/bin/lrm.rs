//! Command line driver for light response models.
//!
//! A flood file holds one event per line: the amplitude of every sensor, the number of
//! emitted photons, then the true `x` and `y` of the event, separated by whitespace.
//!
//! Usage:
//! ```
//! lrm simulate --n-side 8 --pitch 4.21 --n-events 10000 -o flood.txt
//! lrm fit flood.txt --n-side 8 --pitch 4.21 -o model.json
//! lrm reconstruct model.json flood.txt -o reconstructed.txt
//! ```

use clap::{Parser, Subcommand};
use log::{info, warn};
use lrmodel_rs::{AxialLrf, DualSlopeCompress, LrModel, Lrf, LrfData, RecResult, ReconstructorConfig, reconstruct_events};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lrm")]
#[command(about = "Fit light response models and reconstruct events with them")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a synthetic flood for a square sensor array
    Simulate {
        /// Sensors along one side of the array
        #[arg(long, default_value_t = 8)]
        n_side: usize,

        /// Distance between neighbouring sensors
        #[arg(long, default_value_t = 4.21)]
        pitch: f64,

        #[arg(long, default_value_t = 10000)]
        n_events: usize,

        /// Photons emitted per event
        #[arg(long, default_value_t = 20000.0)]
        photons: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Group a square array by symmetry, fit the group LRFs to a flood and write the model
    Fit {
        /// Flood file
        input: PathBuf,

        #[arg(long, default_value_t = 8)]
        n_side: usize,

        #[arg(long, default_value_t = 4.21)]
        pitch: f64,

        /// Spline intervals of every LRF
        #[arg(long, default_value_t = 10)]
        nint: usize,

        /// Compression slope ratio
        #[arg(long, default_value_t = 10.0)]
        k: f64,

        /// Compression knee radius
        #[arg(long, default_value_t = 7.0)]
        r0: f64,

        /// Compression knee width
        #[arg(long, default_value_t = 4.0)]
        lam: f64,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reconstruct every event of a flood file with a saved model
    Reconstruct {
        /// Model json written by `fit`
        model: PathBuf,

        /// Event file, lines start with the sensor amplitudes
        input: PathBuf,

        /// Reconstruction settings json, missing fields keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Whitespace separated numbers, one row per non-empty line
fn read_table(path: &Path) -> Result<Vec<Vec<f64>>, Box<dyn Error>> {
    let reader: BufReader<File> = BufReader::new(File::open(path)?);
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in reader.lines() {
        let line: String = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let row: Vec<f64> = line.split_whitespace().map(|word: &str| word.parse::<f64>()).collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    return Ok(rows);
}

/// Square array centred on the origin, row 0 at the top
fn square_array_positions(n_side: usize, pitch: f64) -> Vec<(f64, f64)> {
    let shift: f64 = pitch * (n_side as f64 - 1.0) / 2.0;
    return (0..n_side * n_side)
        .map(|id| {
            let x: f64 = (id % n_side) as f64 * pitch - shift;
            let y: f64 = -((id / n_side) as f64 * pitch - shift);
            (x, y)
        })
        .collect();
}

/// Standard normal deviate by the Box-Muller transform
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    return (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
}

fn simulate(n_side: usize, pitch: f64, n_events: usize, photons: f64, seed: u64, output: &Path) -> Result<(), Box<dyn Error>> {
    let positions: Vec<(f64, f64)> = square_array_positions(n_side, pitch);
    let half_width: f64 = pitch * n_side as f64 / 2.0;
    // Light spot with the sensor plane one pitch away from the scintillation point
    let height: f64 = pitch;
    let collected_fraction: f64 = 0.05;

    let mut rng: StdRng = StdRng::seed_from_u64(seed);
    let mut writer: BufWriter<File> = BufWriter::new(File::create(output)?);
    for _i_event in 0..n_events {
        let x: f64 = rng.random_range(-half_width..half_width);
        let y: f64 = rng.random_range(-half_width..half_width);
        let mut line: Vec<String> = Vec::with_capacity(positions.len() + 3);
        for (x_sensor, y_sensor) in positions.iter() {
            let r2: f64 = (x - x_sensor).powi(2) + (y - y_sensor).powi(2);
            let mean: f64 = photons * collected_fraction * height.powi(3) / (height * height + r2).powf(1.5);
            let amplitude: f64 = (mean + mean.sqrt() * standard_normal(&mut rng)).max(0.0);
            line.push(format!("{:.3}", amplitude));
        }
        line.push(format!("{}", photons));
        line.push(format!("{:.5}", x));
        line.push(format!("{:.5}", y));
        writeln!(writer, "{}", line.join(" "))?;
    }
    writer.flush()?;

    info!("simulate: {} events for {} sensors written to {:?}", n_events, positions.len(), output);
    return Ok(());
}

fn fit(input: &Path, n_side: usize, pitch: f64, nint: usize, k: f64, r0: f64, lam: f64, output: &Path) -> Result<(), Box<dyn Error>> {
    let n_sensors: usize = n_side * n_side;
    let flood: Vec<Vec<f64>> = read_table(input)?;
    if let Some(short_row) = flood.iter().position(|row: &Vec<f64>| row.len() < n_sensors + 3) {
        return Err(format!("flood line {} has fewer than {} columns", short_row + 1, n_sensors + 3).into());
    }

    // Default LRF, its rmax is adjusted per group before fitting
    let mut prototype: AxialLrf = AxialLrf::new(pitch * n_side as f64, nint)?;
    prototype.set_compression(Some(Box::new(DualSlopeCompress::new(k, r0, lam)?)))?;
    prototype.set_flat_top(true);
    prototype.set_non_increasing(true);
    prototype.set_non_negative(true);

    let mut model: LrModel = LrModel::with_default_lrf(n_sensors, Box::new(prototype));
    for (id, (x, y)) in square_array_positions(n_side, pitch).into_iter().enumerate() {
        model.add_sensor(id, x, y)?;
    }
    let group_ids: Vec<usize> = model.make_groups_square()?;
    info!("fit: {} sensors in {} groups", n_sensors, group_ids.len());

    // Event positions from the flood, amplitudes filled in per sensor
    let mut data: Vec<LrfData> = flood
        .iter()
        .map(|row: &Vec<f64>| [row[n_sensors + 1], row[n_sensors + 2], 0.0, 0.0])
        .collect();

    for gid in group_ids.iter() {
        let r_max: f64 = model.get_group_max_r(*gid, &data)?;
        if let Some(axial) = model.get_group_lrf_mut(*gid)?.as_any_mut().downcast_mut::<AxialLrf>() {
            axial.set_rmax(r_max)?;
        }
    }
    for id in 0..n_sensors {
        if model.get_group(id)?.is_none() {
            let r_max: f64 = model.get_max_r(id, &data)?;
            if let Some(axial) = model.get_lrf_mut(id)?.as_any_mut().downcast_mut::<AxialLrf>() {
                axial.set_rmax(r_max)?;
            }
        }
    }

    for id in 0..n_sensors {
        for (sample, row) in data.iter_mut().zip(flood.iter()) {
            sample[3] = row[id];
        }
        model.add_fit_data(id, &data)?;
    }

    let timing_start: Instant = Instant::now();
    for gid in group_ids.iter() {
        if let Err(error) = model.fit_group(*gid) {
            warn!("fit: group {} failed: {}", gid, error);
        }
    }
    for id in 0..n_sensors {
        if model.get_group(id)?.is_none() {
            if let Err(error) = model.fit_sensor(id) {
                warn!("fit: sensor {} failed: {}", id, error);
            }
        }
    }
    info!("fit: time elapsed: {:?}", timing_start.elapsed());

    model.save_json(output)?;
    info!("fit: model written to {:?}", output);
    return Ok(());
}

fn reconstruct(model_path: &Path, input: &Path, config_path: Option<&Path>, output: &Path) -> Result<(), Box<dyn Error>> {
    let model: LrModel = LrModel::load_json(model_path)?;
    let config: ReconstructorConfig = match config_path {
        Some(path) => ReconstructorConfig::load_json(path)?,
        None => ReconstructorConfig::default(),
    };

    let n_sensors: usize = model.get_sensor_count();
    let events: Vec<Vec<f64>> = read_table(input)?;
    let mut signals: Array2<f64> = Array2::zeros((events.len(), n_sensors));
    for (i_event, row) in events.iter().enumerate() {
        if row.len() < n_sensors {
            return Err(format!("event line {} has {} columns, expected at least {}", i_event + 1, row.len(), n_sensors).into());
        }
        for id in 0..n_sensors {
            signals[[i_event, id]] = row[id];
        }
    }

    let results: Vec<RecResult> = reconstruct_events(&model, &config, &signals, None)?;

    let mut writer: BufWriter<File> = BufWriter::new(File::create(output)?);
    writeln!(writer, "# status x y e guess_x guess_y guess_e dof min chi2 cov_xx cov_yy cov_xy")?;
    for result in results.iter() {
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {} {} {} {} {}",
            result.status.code(),
            result.x,
            result.y,
            result.e,
            result.guess_x,
            result.guess_y,
            result.guess_e,
            result.dof,
            result.min_value,
            result.chi2_min,
            result.cov_xx,
            result.cov_yy,
            result.cov_xy
        )?;
    }
    writer.flush()?;

    info!("reconstruct: {} events written to {:?}", results.len(), output);
    return Ok(());
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args: Args = Args::parse();

    return match args.command {
        Command::Simulate {
            n_side,
            pitch,
            n_events,
            photons,
            seed,
            output,
        } => simulate(n_side, pitch, n_events, photons, seed, &output),
        Command::Fit {
            input,
            n_side,
            pitch,
            nint,
            k,
            r0,
            lam,
            output,
        } => fit(&input, n_side, pitch, nint, k, r0, lam, &output),
        Command::Reconstruct {
            model,
            input,
            config,
            output,
        } => reconstruct(&model, &input, config.as_deref(), &output),
    };
}

//! Generate command implementation

use crate::cli::GenerateArgs;
use crate::output::OutputWriter;
use crate::output_types::GenerateOutput;
use crate::progress::{create_fraction_bar, finish_success, set_fraction};
use anyhow::{bail, Context, Result};
use canopy_core::formats::RawPointWriter;
use canopy_core::models::Point;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Share of points that belong to the canopy rather than the ground
const VEGETATION_SHARE: f64 = 0.6;

const CLASS_GROUND: u8 = 2;
const CLASS_HIGH_VEGETATION: u8 = 5;

pub fn execute(args: GenerateArgs, output: &OutputWriter) -> Result<()> {
    let size = plot_size(&args.size)?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    let mut writer = RawPointWriter::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let pb = create_fraction_bar("Generating points", output.is_json());
    for i in 0..args.points {
        writer.write_point(&synthetic_point(&mut rng, size))?;
        if i % 4096 == 0 {
            set_fraction(&pb, i as f64 / args.points as f64);
        }
    }
    let header = writer.finish()?;
    finish_success(&pb, "Points written");

    output.success(format!(
        "Wrote {} points to {}",
        header.point_count,
        args.output.display()
    ));
    output.result(GenerateOutput {
        path: args.output.display().to_string(),
        point_count: header.point_count,
        bounds: header.bounds,
    })
}

fn plot_size(size: &[f64]) -> Result<[f64; 3]> {
    match size {
        [x, y, z] if [x, y, z].iter().all(|v| v.is_finite() && **v > 0.0) => Ok([*x, *y, *z]),
        _ => bail!("--size needs three positive values, got {:?}", size),
    }
}

/// A ground or canopy return over a gently sloping plot
fn synthetic_point(rng: &mut ChaCha8Rng, size: [f64; 3]) -> Point {
    let x = rng.gen_range(0.0..size[0]);
    let y = rng.gen_range(0.0..size[1]);
    let ground = 0.1 * size[2] * (x / size[0] + y / size[1]) / 2.0;

    let mut point = if rng.gen_bool(VEGETATION_SHARE) {
        let height = rng.gen_range(0.0..0.9 * size[2]);
        let mut p = Point::new(x, y, ground + height);
        p.classification = CLASS_HIGH_VEGETATION;
        p.number_of_returns = rng.gen_range(1..=4);
        p.return_number = rng.gen_range(1..=p.number_of_returns);
        let shade = (height / size[2] * 40_000.0) as u16;
        p.color = [8_000, 20_000 + shade, 6_000];
        p
    } else {
        let mut p = Point::new(x, y, ground);
        p.classification = CLASS_GROUND;
        p.number_of_returns = 1;
        p.return_number = 1;
        p.color = [30_000, 22_000, 12_000];
        p
    };
    point.intensity = rng.gen_range(0..=u16::MAX);
    point
}

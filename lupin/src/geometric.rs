use crate::common::*;

use candle_core::Device;

#[derive(Args, Debug)]
pub struct GeometricArgs {
    #[arg(
        long,
        short = 'p',
        default_value_t = 0.5,
        help = "Success probability of each trial"
    )]
    prob: f64,

    #[arg(
        long,
        short = 'd',
        default_value_t = 100,
        help = "Maximum number of trials",
        long_help = "Maximum number of trials.\n\
		     A run without a success stops here and reports {d} trials."
    )]
    max_depth: usize,

    #[arg(
        long,
        short = 'n',
        default_value_t = 1000,
        help = "Number of predictive draws"
    )]
    num_samples: usize,

    #[arg(long, help = "Random seed (OS entropy if not given)")]
    seed: Option<u64>,

    #[arg(
        short,
        long = "verbose",
        help = "Verbosity.",
        long_help = "Increase output verbosity."
    )]
    verbose: bool,
}

/// Bernoulli(p) trials `x_0, x_1, ...` up to the first success; returns
/// the number of trials
fn geometric(ctx: &mut Context, args: &(f64, usize)) -> Result<usize> {
    let (p, max_depth) = *args;
    let dev = Device::Cpu;
    for i in 0..max_depth {
        let x = ctx.sample(&format!("x_{}", i), Bernoulli::from_prob(p, &dev)?)?;
        if x.to_scalar::<f32>()? > 0.5 {
            return Ok(i + 1);
        }
    }
    Ok(max_depth)
}

pub fn run_geometric(args: &GeometricArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    if !(args.prob > 0.0 && args.prob <= 1.0) {
        return Err(anyhow::anyhow!("success probability must be in (0, 1]"));
    }

    let store = ParamStore::new();
    let mut rng = seeded_rng(args.seed);

    let samples = Predictive::new(geometric, args.num_samples).sample(
        &(args.prob, args.max_depth),
        &store,
        &mut rng,
    )?;

    let trials = samples.outputs();
    let mean = trials.iter().sum::<usize>() as f64 / trials.len().max(1) as f64;
    let deepest = trials.iter().copied().max().unwrap_or(0);

    info!(
        "{} site(s) in every run, {} in some runs",
        samples.names().len(),
        samples.partial_names().len()
    );
    println!("mean number of trials: {:.4}", mean);
    println!("expected (untruncated): {:.4}", 1.0 / args.prob);
    println!("longest run: {} trial(s)", deepest);
    Ok(())
}

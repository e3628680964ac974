use crate::common::*;

use candle_core::{Device, Tensor};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
enum Sky {
    Cloudy,
    Clear,
}

#[derive(Args, Debug)]
pub struct WeatherArgs {
    #[arg(
        long,
        short = 'n',
        default_value_t = 1000,
        help = "Number of predictive draws"
    )]
    num_samples: usize,

    #[arg(
        long,
        value_enum,
        help = "Condition on the sky",
        long_help = "Condition the `cloudy` site on an observed sky.\n\
		     Without it, cloudiness is drawn from its prior."
    )]
    sky: Option<Sky>,

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

/// cloudy ~ Bernoulli(0.3); temp ~ N(55, 10²) if cloudy, N(75, 15²) otherwise
fn weather(ctx: &mut Context, _args: &()) -> Result<(f32, f32)> {
    let dev = Device::Cpu;
    let cloudy = ctx
        .sample("cloudy", Bernoulli::from_prob(0.3, &dev)?)?
        .to_scalar::<f32>()?;

    let (mean, sd) = if cloudy > 0.5 { (55.0, 10.0) } else { (75.0, 15.0) };
    let temp = ctx.sample("temp", Normal::from_scalars(mean, sd, &dev)?)?;
    Ok((cloudy, temp.to_scalar::<f32>()?))
}

pub fn run_weather(args: &WeatherArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let store = ParamStore::new();
    let mut rng = seeded_rng(args.seed);

    let mut obs = Observations::new();
    if let Some(sky) = &args.sky {
        let cloudy = if *sky == Sky::Cloudy { 1f32 } else { 0f32 };
        obs.insert("cloudy", Tensor::new(cloudy, &Device::Cpu)?);
        info!("conditioning on cloudy = {}", cloudy);
    }

    let predictive = Predictive::new(condition(weather, obs), args.num_samples);
    let samples = predictive.sample(&(), &store, &mut rng)?;

    for name in samples.names() {
        println!("{:>8} {:>10.4}", name, site_mean(&samples, name)?);
    }

    let (cold_days, cloudy_days) = samples
        .outputs()
        .iter()
        .fold((0, 0), |(cold, cloudy), &(c, temp)| {
            (cold + (temp < 60.0) as usize, cloudy + (c > 0.5) as usize)
        });
    info!(
        "{} cloudy and {} cold (< 60) day(s) out of {}",
        cloudy_days,
        cold_days,
        samples.outputs().len()
    );
    Ok(())
}

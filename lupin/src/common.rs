pub use candle_ppl::candle_core;
pub use candle_ppl::candle_nn;
pub use candle_ppl::*;

pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::info;
pub use rand::rngs::StdRng;
pub use rand::SeedableRng;

pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Sample mean of a site that holds one scalar per run
pub fn site_mean(samples: &PredictiveSamples<impl Sized>, name: &str) -> anyhow::Result<f32> {
    Ok(samples.mean(name)?.to_scalar::<f32>()?)
}

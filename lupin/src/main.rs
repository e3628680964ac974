mod common;
mod geometric;
mod speedometer;
mod weather;

use common::*;
use geometric::*;
use speedometer::*;
use weather::*;

/// Stochastic variational inference on small example programs
#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Learning Unobserved Posteriors by INference\n\
		  Runs the example probabilistic programs on top of `candle-ppl`:\n\
		  variational fitting, conditioning and predictive sampling."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit the speedometer model by SVI",
        long_about = "Fit a Normal guide to the posterior of a speed given one noisy reading:\n\
		      (1) speed ~ Normal(guess, 10)\n\
		      (2) measurement ~ Normal(speed, 5), observed\n\
		      and compare the result with the closed-form posterior.\n"
    )]
    Speedometer(SpeedometerArgs),

    #[command(
        about = "Predictive draws from the weather model",
        long_about = "Draw cloudiness and temperature from the weather model:\n\
		      (1) cloudy ~ Bernoulli(0.3)\n\
		      (2) temp ~ Normal(55, 10) if cloudy, else Normal(75, 15)\n\
		      optionally conditioned on the sky being cloudy or clear.\n"
    )]
    Weather(WeatherArgs),

    #[command(
        about = "Predictive draws from a bounded geometric loop",
        long_about = "Repeat Bernoulli(p) trials x_0, x_1, ... until the first success\n\
		      (or until the maximum depth) and report the mean number of trials.\n",
        visible_alias = "geom"
    )]
    Geometric(GeometricArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Speedometer(args) => {
            fit_speedometer(args)?;
        }
        Commands::Weather(args) => {
            run_weather(args)?;
        }
        Commands::Geometric(args) => {
            run_geometric(args)?;
        }
    }

    info!("Done");
    Ok(())
}

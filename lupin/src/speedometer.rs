use crate::common::*;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use indicatif::{ProgressBar, ProgressDrawTarget};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
enum OptimizerKind {
    Sgd,
    Adam,
}

#[derive(Args, Debug)]
pub struct SpeedometerArgs {
    #[arg(
        long,
        short = 'g',
        default_value_t = 41.0,
        help = "Prior guess of the speed",
        long_help = "Prior guess of the speed.\n\
		     The prior is Normal(guess, 10)."
    )]
    guess: f64,

    #[arg(
        long,
        short = 'm',
        default_value_t = 40.0,
        help = "Observed speedometer reading",
        long_help = "Observed speedometer reading.\n\
		     The reading is Normal(speed, 5) around the true speed."
    )]
    measurement: f64,

    #[arg(
        long,
        short = 'i',
        default_value_t = 3000,
        help = "Number of SVI steps"
    )]
    iters: usize,

    #[arg(
        long,
        default_value_t = 1e-2,
        help = "Learning rate",
        long_help = "Learning rate of the optimizer.\n\
		     Plain SGD needs a larger rate (e.g., 0.1) to converge\n\
		     within a few thousand steps."
    )]
    learning_rate: f64,

    #[arg(
        long,
        value_enum,
        default_value = "adam",
        help = "Optimizer",
        long_help = "Optimizer used to update the guide parameters.\n\
		     - sgd: plain stochastic gradient descent\n\
		     - adam: AdamW without weight decay"
    )]
    optimizer: OptimizerKind,

    #[arg(
        long,
        short = 'p',
        default_value_t = 1,
        help = "Number of ELBO particles per step"
    )]
    num_particles: usize,

    #[arg(long, help = "Random seed (OS entropy if not given)")]
    seed: Option<u64>,

    #[arg(
        long,
        help = "Save the learned parameters",
        long_help = "Save the learned parameters:\n\
		     - {file} raw tensors in safetensors format\n\
		     - {file}.json names and constraints"
    )]
    save_params: Option<Box<str>>,

    #[arg(
        short,
        long = "verbose",
        help = "Verbosity.",
        long_help = "Increase output verbosity."
    )]
    verbose: bool,
}

/// speed ~ N(guess, 10²), measurement ~ N(speed, 5²)
fn speedometer(ctx: &mut Context, guess: &f64) -> Result<Tensor> {
    let dev = Device::Cpu;
    let speed = ctx.sample("speed", Normal::from_scalars(*guess, 10.0, &dev)?)?;
    ctx.sample("measurement", Normal::new(&speed, &Tensor::new(5f32, &dev)?)?)
}

fn speedometer_guide(ctx: &mut Context, guess: &f64) -> Result<()> {
    let dev = Device::Cpu;
    let loc = ctx.param("loc", &Tensor::new(*guess as f32, &dev)?, Constraint::Real)?;
    let scale = ctx.param("scale", &Tensor::new(1f32, &dev)?, Constraint::Positive)?;
    ctx.sample("speed", Normal::new(&loc, &scale)?)?;
    Ok(())
}

/// Closed-form Normal-Normal posterior (mean, sd) of the speed
pub fn conjugate_posterior(guess: f64, measurement: f64) -> (f64, f64) {
    let (prior_var, noise_var) = (10f64.powi(2), 5f64.powi(2));
    let prec = 1.0 / prior_var + 1.0 / noise_var;
    let mean = (guess / prior_var + measurement / noise_var) / prec;
    (mean, prec.recip().sqrt())
}

pub fn fit_speedometer(args: &SpeedometerArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let obs = Observations::new().with(
        "measurement",
        Tensor::new(args.measurement as f32, &Device::Cpu)?,
    );
    let model = condition(speedometer, obs);
    let elbo = Elbo::new(ElboConfig::new(args.num_particles));
    let store = ParamStore::new();

    let loss_trace = match args.optimizer {
        OptimizerKind::Sgd => {
            let svi: Svi<_, _, SGD> = Svi::new(
                model,
                speedometer_guide,
                args.learning_rate,
                elbo,
                store.clone(),
            );
            train(svi, args)?
        }
        OptimizerKind::Adam => {
            let params = ParamsAdamW {
                lr: args.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            };
            let svi: Svi<_, _, AdamW> =
                Svi::new(model, speedometer_guide, params, elbo, store.clone());
            train(svi, args)?
        }
    };

    let tail = loss_trace.len().clamp(1, 100);
    let tail_loss = loss_trace.iter().rev().take(tail).sum::<f32>() / tail as f32;

    let loc = store.get("loc")?.to_scalar::<f32>()?;
    let scale = store.get("scale")?.to_scalar::<f32>()?;
    let (post_mean, post_sd) = conjugate_posterior(args.guess, args.measurement);

    println!("{:>12} {:>12} {:>12}", "", "learned", "analytic");
    println!("{:>12} {:>12.4} {:>12.4}", "mean", loc, post_mean);
    println!("{:>12} {:>12.4} {:>12.4}", "sd", scale, post_sd);
    println!("loss (last {} steps): {:.4}", tail, tail_loss);

    if let Some(file) = args.save_params.as_deref() {
        store.save(file)?;
        info!("saved the guide parameters to {}", file);
    }
    Ok(())
}

fn train<M, G, O>(mut svi: Svi<M, G, O>, args: &SpeedometerArgs) -> anyhow::Result<Vec<f32>>
where
    M: Model<f64>,
    G: Model<f64>,
    O: Optimizer,
    O::Config: Clone,
{
    if let Some(seed) = args.seed {
        svi = svi.with_seed(seed);
    }

    let pb = ProgressBar::new(args.iters as u64);
    if args.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = Vec::with_capacity(args.iters);
    for i in 0..args.iters {
        let loss = svi.step(&args.guess)?;
        loss_trace.push(loss);
        pb.inc(1);
        if args.verbose && (i % 500 == 0 || i + 1 == args.iters) {
            info!("[{}] loss: {}", i + 1, loss);
        }
    }
    pb.finish_and_clear();
    Ok(loss_trace)
}

//! Stochastic variational inference (SVI) with named random draws.
//!
//! A model and a guide are ordinary Rust procedures that record named
//! `sample` and `param` sites through a [`Context`]. The engine runs both
//! under a shared naming discipline, scores their traces, and optimizes
//! the guide parameters kept in a [`ParamStore`] with candle autodiff.
//!
//! # Key pieces
//!
//! - [`Context`] / [`run`]: trace recorder for one execution
//! - [`ParamStore`]: named, constrained, persistent learnable tensors
//! - [`condition`]: pin sites of a model to observed values
//! - [`Elbo`]: single- or multi-particle ELBO with reparameterized gradients
//! - [`Svi`]: optimizer loop over the ELBO
//! - [`Predictive`]: prior, conditioned, and posterior predictive draws
//!
//! # Example
//!
//! ```ignore
//! use candle_ppl::*;
//! use candle_ppl::candle_core::{Device, Tensor};
//! use candle_ppl::candle_nn::SGD;
//!
//! fn model(ctx: &mut Context, guess: &f64) -> Result<Tensor> {
//!     let speed = ctx.sample("speed", Normal::from_scalars(*guess, 10.0, &Device::Cpu)?)?;
//!     ctx.sample("measurement", Normal::new(&speed, &Tensor::new(5f32, &Device::Cpu)?)?)
//! }
//!
//! fn guide(ctx: &mut Context, guess: &f64) -> Result<()> {
//!     let dev = Device::Cpu;
//!     let loc = ctx.param("loc", &Tensor::new(*guess as f32, &dev)?, Constraint::Real)?;
//!     let scale = ctx.param("scale", &Tensor::new(1f32, &dev)?, Constraint::Positive)?;
//!     ctx.sample("speed", Normal::new(&loc, &scale)?)?;
//!     Ok(())
//! }
//!
//! let obs = Observations::new().with("measurement", Tensor::new(40f32, &Device::Cpu)?);
//! let store = ParamStore::new();
//! let mut svi: Svi<_, _, SGD> =
//!     Svi::new(condition(model, obs), guide, 0.1, Elbo::default(), store.clone());
//! for _ in 0..2000 {
//!     svi.step(&41.0)?;
//! }
//! let loc = store.get("loc")?;
//! ```

pub mod condition;
pub mod constraints;
pub mod context;
pub mod distributions;
pub mod elbo;
pub mod error;
pub mod model;
pub mod param_store;
pub mod plate;
pub mod predictive;
pub mod svi;
pub mod trace;

pub use condition::{condition, Conditioned, Observations};
pub use constraints::Constraint;
pub use context::{run, run_replay, Context};
pub use distributions::{Bernoulli, Beta, Distribution, Normal, Poisson};
pub use elbo::{Elbo, ElboConfig};
pub use error::{PplError, Result};
pub use model::Model;
pub use param_store::ParamStore;
pub use plate::Plate;
pub use predictive::{Predictive, PredictiveSamples};
pub use svi::Svi;
pub use trace::{Site, SiteKind, Trace};

pub use candle_core;
pub use candle_nn;

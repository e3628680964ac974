//! Stochastic variational inference driver.
//!
//! Each step estimates `-ELBO`, back-propagates it, and applies one
//! optimizer update to every raw parameter that received a gradient.
//! Parameters are registered lazily by the guide (and model) on their
//! first run, so optimizer state is kept per parameter and created the
//! first time a parameter shows up with a gradient.

use std::collections::HashMap;

use candle_core::{DType, TensorId};
use candle_nn::Optimizer;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::elbo::Elbo;
use crate::error::Result;
use crate::model::Model;
use crate::param_store::ParamStore;

pub struct Svi<M, G, O: Optimizer> {
    model: M,
    guide: G,
    loss: Elbo,
    store: ParamStore,
    optim_config: O::Config,
    /// per-parameter optimizers, tagged with the tensor they were built for
    optimizers: HashMap<String, (TensorId, O)>,
    rng: StdRng,
    num_steps: usize,
}

impl<M, G, O> Svi<M, G, O>
where
    O: Optimizer,
    O::Config: Clone,
{
    /// * `model` - generative program
    /// * `guide` - approximate posterior program
    /// * `optim_config` - optimizer configuration, e.g., a learning rate for `SGD`
    /// * `loss` - ELBO estimator
    /// * `store` - parameter store the guide registers its parameters in
    pub fn new(model: M, guide: G, optim_config: O::Config, loss: Elbo, store: ParamStore) -> Self {
        Self {
            model,
            guide,
            loss,
            store,
            optim_config,
            optimizers: HashMap::new(),
            rng: StdRng::from_os_rng(),
            num_steps: 0,
        }
    }

    /// Fix the random source for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn guide(&self) -> &G {
        &self.guide
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Take one gradient step and return the (detached) loss.
    ///
    /// Gradients are computed into a fresh store each call, so nothing
    /// accumulates across steps. If anything fails before the update,
    /// the parameters are left untouched. The whole step runs under the
    /// store's update guard, so loops sharing the store take turns.
    pub fn step<A>(&mut self, args: &A) -> Result<f32>
    where
        A: ?Sized,
        M: Model<A>,
        G: Model<A>,
    {
        // held until the last optimizer write
        let _updates = self.store.update_guard()?;

        let (loss, _) =
            self.loss
                .estimate(&self.model, &self.guide, args, &self.store, &mut self.rng)?;
        let grads = loss.backward()?;
        let loss_val = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

        let named_vars = self.store.named_vars()?;

        // forget optimizers of parameters that were cleared or replaced
        self.optimizers.retain(|name, (id, _)| {
            named_vars
                .iter()
                .any(|(n, var)| n == name && var.id() == *id)
        });

        let touched: Vec<_> = named_vars
            .into_iter()
            .filter(|(_, var)| grads.get(var.as_tensor()).is_some())
            .collect();

        for (name, var) in touched.iter() {
            if !self.optimizers.contains_key(name) {
                debug!("new optimizer state for '{}'", name);
                let opt = O::new(vec![var.clone()], self.optim_config.clone())?;
                self.optimizers.insert(name.clone(), (var.id(), opt));
            }
        }

        for (name, _) in touched.iter() {
            if let Some((_, opt)) = self.optimizers.get_mut(name) {
                opt.step(&grads)?;
            }
        }

        self.num_steps += 1;
        debug!("[{}] loss = {:.4}", self.num_steps, loss_val);
        Ok(loss_val)
    }

    /// Estimate the loss without taking a step
    pub fn evaluate_loss<A>(&mut self, args: &A) -> Result<f32>
    where
        A: ?Sized,
        M: Model<A>,
        G: Model<A>,
    {
        let loss =
            self.loss
                .loss(&self.model, &self.guide, args, &self.store, &mut self.rng)?;
        Ok(loss.detach().to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }

    /// Run `num_steps` steps and return the loss trace
    pub fn run<A>(&mut self, args: &A, num_steps: usize) -> Result<Vec<f32>>
    where
        A: ?Sized,
        M: Model<A>,
        G: Model<A>,
    {
        info!("Training for {} iterations", num_steps);
        let mut loss_trace = Vec::with_capacity(num_steps);
        for i in 0..num_steps {
            let loss = self.step(args)?;
            loss_trace.push(loss);
            if i % 500 == 0 || i + 1 == num_steps {
                info!("iter {:5}/{}: loss = {:10.4}", i + 1, num_steps, loss);
            }
        }
        Ok(loss_trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraint;
    use crate::context::Context;
    use crate::distributions::Normal;
    use crate::elbo::ElboConfig;
    use crate::error::PplError;
    use candle_core::{Device, Tensor};
    use candle_nn::SGD;

    fn model(ctx: &mut Context, obs: &Tensor) -> Result<()> {
        let dev = obs.device();
        let mu = ctx.sample("mu", Normal::from_scalars(0.0, 1.0, dev)?)?;
        ctx.observe("x", Normal::new(&mu, &Tensor::new(1f32, dev)?)?, obs)?;
        Ok(())
    }

    fn guide(ctx: &mut Context, obs: &Tensor) -> Result<()> {
        let dev = obs.device();
        let loc = ctx.param("loc", &Tensor::new(0f32, dev)?, Constraint::Real)?;
        let scale = ctx.param("scale", &Tensor::new(1f32, dev)?, Constraint::Positive)?;
        ctx.sample("mu", Normal::new(&loc, &scale)?)?;
        Ok(())
    }

    #[test]
    fn test_step_moves_parameters() -> Result<()> {
        let store = ParamStore::new();
        let obs = Tensor::new(3f32, &Device::Cpu)?;
        let mut svi: Svi<_, _, SGD> =
            Svi::new(model, guide, 0.05, Elbo::default(), store.clone()).with_seed(0);

        let loss = svi.step(&obs)?;
        assert!(loss.is_finite());
        assert_eq!(svi.num_steps(), 1);

        // loc starts at 0 and the observation pulls it up
        for _ in 0..50 {
            svi.step(&obs)?;
        }
        assert!(store.get("loc")?.to_scalar::<f32>()? > 0.5);
        Ok(())
    }

    #[test]
    fn test_evaluate_loss_does_not_update() -> Result<()> {
        let store = ParamStore::new();
        let obs = Tensor::new(3f32, &Device::Cpu)?;
        let mut svi: Svi<_, _, SGD> = Svi::new(
            model,
            guide,
            0.05,
            Elbo::new(ElboConfig::new(2)),
            store.clone(),
        )
        .with_seed(1);

        svi.evaluate_loss(&obs)?;
        let before: f32 = store.get("loc")?.to_scalar()?;
        svi.evaluate_loss(&obs)?;
        assert_eq!(store.get("loc")?.to_scalar::<f32>()?, before);
        Ok(())
    }

    fn snapshot(store: &ParamStore) -> Result<Vec<(String, Vec<u32>)>> {
        store
            .named_vars()?
            .into_iter()
            .map(|(name, var)| {
                let bits = var
                    .as_tensor()
                    .flatten_all()?
                    .to_vec1::<f32>()?
                    .into_iter()
                    .map(f32::to_bits)
                    .collect();
                Ok((name, bits))
            })
            .collect()
    }

    #[test]
    fn test_failed_step_leaves_trained_store_untouched() -> Result<()> {
        fn bad_model(ctx: &mut Context, obs: &Tensor) -> Result<()> {
            model(ctx, obs)?;
            let dev = obs.device();
            ctx.sample("extra", Normal::from_scalars(0.0, 1.0, dev)?)?;
            Ok(())
        }

        let store = ParamStore::new();
        let obs = Tensor::new(3f32, &Device::Cpu)?;
        let mut svi: Svi<_, _, SGD> =
            Svi::new(model, guide, 0.05, Elbo::default(), store.clone()).with_seed(2);
        svi.run(&obs, 25)?;
        assert_ne!(store.get("loc")?.to_scalar::<f32>()?, 0.0);

        let before = snapshot(&store)?;

        // same store and guide, a model the guide does not cover
        let mut bad: Svi<_, _, SGD> =
            Svi::new(bad_model, guide, 0.05, Elbo::default(), store.clone()).with_seed(3);
        assert!(matches!(bad.step(&obs), Err(PplError::MissingGuideSite(name)) if name == "extra"));
        assert_eq!(bad.num_steps(), 0);
        assert_eq!(snapshot(&store)?, before);

        // the guard was released, training goes on
        svi.step(&obs)?;
        assert_ne!(snapshot(&store)?, before);
        Ok(())
    }

    #[test]
    fn test_threads_share_one_store() -> Result<()> {
        let store = ParamStore::new();
        let obs = Tensor::new(3f32, &Device::Cpu)?;
        let num_steps = 50;

        let results: Vec<Result<(usize, Vec<f32>)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2u64)
                .map(|seed| {
                    let store = store.clone();
                    let obs = &obs;
                    s.spawn(move || -> Result<(usize, Vec<f32>)> {
                        let mut svi: Svi<_, _, SGD> =
                            Svi::new(model, guide, 0.02, Elbo::default(), store).with_seed(seed);
                        let losses = svi.run(obs, num_steps)?;
                        Ok((svi.num_steps(), losses))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("training thread panicked"))
                .collect()
        });

        for res in results {
            let (steps, losses) = res?;
            assert_eq!(steps, num_steps);
            assert!(losses.iter().all(|l| l.is_finite()));
        }
        assert_eq!(store.names()?, vec!["loc", "scale"]);

        // both loops pulled the same parameters toward the observation
        assert!(store.get("loc")?.to_scalar::<f32>()? > 0.5);
        Ok(())
    }
}

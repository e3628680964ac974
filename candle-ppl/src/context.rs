//! Execution context handed to models and guides.
//!
//! Every named effect of a program goes through a [`Context`], which
//! records it into the trace of the current execution. There is no
//! ambient state: the parameter store, the random source and the trace
//! being built are all explicit.

use candle_core::Tensor;
use rand::rngs::StdRng;

use crate::condition::Observations;
use crate::constraints::Constraint;
use crate::distributions::Distribution;
use crate::error::{PplError, Result};
use crate::model::Model;
use crate::param_store::ParamStore;
use crate::plate::Plate;
use crate::trace::{Site, SiteKind, Trace};

pub struct Context<'a> {
    trace: Trace,
    store: &'a ParamStore,
    rng: &'a mut StdRng,
    /// conditioning layers, outermost first
    layers: Vec<Observations>,
    /// latent values to reuse instead of drawing
    replay: Option<&'a Trace>,
}

impl<'a> Context<'a> {
    pub fn new(store: &'a ParamStore, rng: &'a mut StdRng) -> Self {
        Self {
            trace: Trace::new(),
            store,
            rng,
            layers: vec![],
            replay: None,
        }
    }

    /// Reuse the latent values of `replay` for sites of the same name
    pub fn with_replay(mut self, replay: &'a Trace) -> Self {
        self.replay = Some(replay);
        self
    }

    /// The trace built so far
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    pub fn store(&self) -> &ParamStore {
        self.store
    }

    pub(crate) fn push_observations(&mut self, observations: Observations) {
        self.layers.push(observations);
    }

    pub(crate) fn pop_observations(&mut self) {
        self.layers.pop();
    }

    fn conditioned_value(&self, name: &str) -> Option<Tensor> {
        self.layers.iter().find_map(|obs| obs.get(name)).cloned()
    }

    fn replayed(&self, name: &str) -> Option<&'a Site> {
        self.replay
            .and_then(|trace| trace.get(name))
            .filter(|site| site.is_latent())
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.trace.contains(name) {
            return Err(PplError::DuplicateSite(name.to_string()));
        }
        Ok(())
    }

    /// Draw a latent value for `name` from `dist`
    pub fn sample<D>(&mut self, name: &str, dist: D) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        self.record_sample(name, dist, None, None)
    }

    /// Record `value` as an observation of `name` under `dist`; the value
    /// is returned unchanged
    pub fn observe<D>(&mut self, name: &str, dist: D, value: &Tensor) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        self.record_sample(name, dist, Some(value), None)
    }

    /// Sample or observe a batch of independent values along `plate`
    pub fn sample_in<D>(
        &mut self,
        plate: &Plate,
        name: &str,
        dist: D,
        obs: Option<&Tensor>,
    ) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        self.record_sample(name, dist, obs, Some(plate))
    }

    /// Record one sample site.
    ///
    /// Value precedence: a conditioning layer, then the explicit `obs`
    /// (both mark the site observed), then a replayed latent value, then
    /// a fresh draw (reparameterized whenever `dist` supports it).
    pub fn record_sample<D>(
        &mut self,
        name: &str,
        dist: D,
        obs: Option<&Tensor>,
        plate: Option<&Plate>,
    ) -> Result<Tensor>
    where
        D: Distribution + 'static,
    {
        self.check_unique(name)?;

        let (value, is_observed, reparameterized) =
            match self.conditioned_value(name).or_else(|| obs.cloned()) {
                Some(value) => (value, true, false),
                None => match self.replayed(name) {
                    Some(site) => (site.value.clone(), false, site.is_reparameterized()),
                    None if dist.has_rsample() => (dist.rsample(&mut *self.rng)?, false, true),
                    None => (dist.sample(&mut *self.rng)?, false, false),
                },
            };

        let scale = match plate {
            Some(plate) => {
                plate.check(name, &value)?;
                plate.scale()
            }
            None => 1.0,
        };

        self.trace.push(Site {
            name: name.to_string(),
            kind: SiteKind::Sample {
                dist: Box::new(dist),
                is_observed,
                reparameterized,
                scale,
            },
            value: value.clone(),
        })?;
        Ok(value)
    }

    /// Look up (registering on first use) a learnable parameter
    pub fn param(&mut self, name: &str, init: &Tensor, constraint: Constraint) -> Result<Tensor> {
        self.param_with(name, || Ok(init.clone()), constraint)
    }

    /// Same as [`Context::param`] with a lazily computed initial value
    pub fn param_with<F>(&mut self, name: &str, init: F, constraint: Constraint) -> Result<Tensor>
    where
        F: FnOnce() -> candle_core::Result<Tensor>,
    {
        self.check_unique(name)?;
        let value = self.store.param_with(name, init, constraint)?;
        let constraint = self.store.constraint(name)?;
        self.trace.push(Site {
            name: name.to_string(),
            kind: SiteKind::Param { constraint },
            value: value.clone(),
        })?;
        Ok(value)
    }

    /// Enter a plate of `size` members, visiting a random subset of
    /// `subsample_size` of them when given.
    ///
    /// Declaring the same plate again in one execution returns the same
    /// members; under replay the guide's subsample is reused so model and
    /// guide agree on one minibatch.
    pub fn plate(&mut self, name: &str, size: usize, subsample_size: Option<usize>) -> Result<Plate> {
        if let Some(plate) = self.trace.plate(name) {
            if plate.size() != size {
                return Err(PplError::DuplicateSite(name.to_string()));
            }
            return Ok(plate.clone());
        }

        let replayed = self
            .replay
            .and_then(|trace| trace.plate(name))
            .filter(|plate| plate.size() == size);

        let plate = match (replayed, subsample_size) {
            (Some(plate), _) => plate.clone(),
            (None, Some(k)) if k < size => {
                let indices = rand::seq::index::sample(&mut *self.rng, size, k).into_vec();
                Plate::subsample(name, size, indices)
            }
            (None, _) => Plate::full(name, size),
        };
        self.trace.push_plate(plate.clone());
        Ok(plate)
    }
}

/// Execute `model` once and return its output with the recorded trace
pub fn run<M, A>(
    model: &M,
    args: &A,
    store: &ParamStore,
    rng: &mut StdRng,
) -> Result<(M::Output, Trace)>
where
    M: Model<A> + ?Sized,
    A: ?Sized,
{
    let mut ctx = Context::new(store, rng);
    let out = model.run(&mut ctx, args)?;
    Ok((out, ctx.into_trace()))
}

/// Execute `model` once with its latent sites pinned to the values
/// recorded in `replay`. Observed sites keep their observations.
pub fn run_replay<M, A>(
    model: &M,
    args: &A,
    store: &ParamStore,
    rng: &mut StdRng,
    replay: &Trace,
) -> Result<(M::Output, Trace)>
where
    M: Model<A> + ?Sized,
    A: ?Sized,
{
    let mut ctx = Context::new(store, rng).with_replay(replay);
    let out = model.run(&mut ctx, args)?;
    Ok((out, ctx.into_trace()))
}

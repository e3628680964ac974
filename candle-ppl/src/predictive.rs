//! Draw repeated independent executions of a model and collect site values.

use std::collections::HashMap;

use candle_core::Tensor;
use log::debug;
use rand::rngs::StdRng;

use crate::context::{run, run_replay};
use crate::error::{PplError, Result};
use crate::model::Model;
use crate::param_store::ParamStore;
use crate::trace::Trace;

pub struct Predictive<M> {
    model: M,
    num_samples: usize,
    return_sites: Option<Vec<String>>,
}

impl<M> Predictive<M> {
    pub fn new(model: M, num_samples: usize) -> Self {
        Self {
            model,
            num_samples,
            return_sites: None,
        }
    }

    /// Restrict the output to these sample sites
    pub fn return_sites<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.return_sites = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Prior (or conditioned) predictive: run the model `num_samples`
    /// times, each with fresh randomness.
    pub fn sample<A>(
        &self,
        args: &A,
        store: &ParamStore,
        rng: &mut StdRng,
    ) -> Result<PredictiveSamples<M::Output>>
    where
        A: ?Sized,
        M: Model<A>,
    {
        self.collect(|rng| run(&self.model, args, store, rng), rng)
    }

    /// Posterior predictive: for each draw, run `guide` and replay its
    /// latent values in the model.
    pub fn sample_posterior<G, A>(
        &self,
        guide: &G,
        args: &A,
        store: &ParamStore,
        rng: &mut StdRng,
    ) -> Result<PredictiveSamples<M::Output>>
    where
        A: ?Sized,
        M: Model<A>,
        G: Model<A>,
    {
        self.collect(
            |rng| {
                let (_, guide_trace) = run(guide, args, store, rng)?;
                run_replay(&self.model, args, store, rng, &guide_trace)
            },
            rng,
        )
    }

    fn collect<O, F>(&self, mut draw: F, rng: &mut StdRng) -> Result<PredictiveSamples<O>>
    where
        F: FnMut(&mut StdRng) -> Result<(O, Trace)>,
    {
        let wanted = |name: &str| match &self.return_sites {
            Some(sites) => sites.iter().any(|s| s == name),
            None => true,
        };

        let mut outputs = Vec::with_capacity(self.num_samples);
        let mut seen: Vec<String> = vec![];
        // one slot per run, `None` where the run did not visit the site
        let mut slots: HashMap<String, Vec<Option<Tensor>>> = HashMap::new();

        for run_idx in 0..self.num_samples {
            let (out, trace) = draw(rng)?;
            for site in trace.sample_sites().filter(|s| wanted(&s.name)) {
                let column = slots.entry(site.name.clone()).or_insert_with(|| {
                    seen.push(site.name.clone());
                    vec![None; run_idx]
                });
                column.push(Some(site.value.detach()));
            }
            for column in slots.values_mut() {
                if column.len() == run_idx {
                    column.push(None);
                }
            }
            outputs.push(out);
        }

        if let Some(sites) = &self.return_sites {
            for name in sites {
                let found = slots
                    .get(name)
                    .map_or(0, |c| c.iter().filter(|v| v.is_some()).count());
                if found == 0 {
                    return Err(PplError::UnknownSite(name.clone()));
                }
                if found != self.num_samples {
                    return Err(PplError::IncompleteSite {
                        name: name.clone(),
                        found,
                        expected: self.num_samples,
                    });
                }
            }
        }

        let mut names = vec![];
        let mut values = HashMap::new();
        let mut partial = HashMap::new();
        let mut partial_names = vec![];
        for name in seen {
            let Some(column) = slots.remove(&name) else {
                continue;
            };
            if column.iter().all(|v| v.is_some()) {
                values.insert(name.clone(), column.into_iter().flatten().collect());
                names.push(name);
            } else {
                partial.insert(name.clone(), column);
                partial_names.push(name);
            }
        }

        debug!(
            "collected {} sample(s): {} complete site(s), {} partial site(s)",
            self.num_samples,
            names.len(),
            partial_names.len()
        );
        Ok(PredictiveSamples {
            names,
            values,
            partial_names,
            partial,
            outputs,
        })
    }
}

/// Site name → one value per run, in run order.
///
/// Sites visited by every run are the regular entries. A model whose
/// structure depends on its draws can visit some sites in only some
/// runs; those are kept apart, aligned with the runs, as
/// [`PredictiveSamples::partial`].
pub struct PredictiveSamples<O> {
    names: Vec<String>,
    values: HashMap<String, Vec<Tensor>>,
    partial_names: Vec<String>,
    partial: HashMap<String, Vec<Option<Tensor>>>,
    outputs: Vec<O>,
}

impl<O> PredictiveSamples<O> {
    /// Site names, in the order they first appeared
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Result<&[Tensor]> {
        self.values
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| PplError::UnknownSite(name.to_string()))
    }

    /// Sites that only some runs visited, in the order they first appeared
    pub fn partial_names(&self) -> &[String] {
        &self.partial_names
    }

    /// Values of a partially visited site, `None` for runs that skipped it
    pub fn partial(&self, name: &str) -> Result<&[Option<Tensor>]> {
        self.partial
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| PplError::UnknownSite(name.to_string()))
    }

    /// Return values of the program, one per run
    pub fn outputs(&self) -> &[O] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<O> {
        self.outputs
    }

    /// Values of `name` stacked along a new leading sample axis
    pub fn stack(&self, name: &str) -> Result<Tensor> {
        Ok(Tensor::stack(self.get(name)?, 0)?)
    }

    /// Sample mean of `name` over runs
    pub fn mean(&self, name: &str) -> Result<Tensor> {
        Ok(self.stack(name)?.mean(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::distributions::{Bernoulli, Normal};
    use candle_core::Device;
    use rand::SeedableRng;

    fn model(ctx: &mut Context, _args: &()) -> Result<Tensor> {
        let dev = Device::Cpu;
        let a = ctx.sample("a", Normal::from_scalars(1.0, 0.1, &dev)?)?;
        let b = ctx.sample("b", Bernoulli::from_prob(0.5, &dev)?)?;
        Ok((a + b)?)
    }

    #[test]
    fn test_every_site_has_n_values() -> Result<()> {
        let store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let samples = Predictive::new(model, 25).sample(&(), &store, &mut rng)?;

        assert_eq!(samples.names(), &["a", "b"]);
        for name in samples.names() {
            assert_eq!(samples.get(name)?.len(), 25);
        }
        assert_eq!(samples.outputs().len(), 25);
        assert_eq!(samples.stack("a")?.dims(), &[25]);
        Ok(())
    }

    #[test]
    fn test_return_sites() -> Result<()> {
        let store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        let samples = Predictive::new(model, 5)
            .return_sites(&["b"])
            .sample(&(), &store, &mut rng)?;
        assert_eq!(samples.names(), &["b"]);
        assert!(samples.get("a").is_err());

        let res = Predictive::new(model, 5)
            .return_sites(&["c"])
            .sample(&(), &store, &mut rng);
        assert!(matches!(res, Err(PplError::UnknownSite(name)) if name == "c"));
        Ok(())
    }
}

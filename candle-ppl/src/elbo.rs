//! Monte Carlo ELBO with reparameterized gradients.
//!
//! ```text
//! ELBO = E_q[log p(x, z) - log q(z)]
//! ```
//!
//! One particle runs the guide to draw z ~ q, replays those draws in the
//! model, and scores both traces. Guide draws go through `rsample`, so
//! the estimate is a differentiable function of the guide parameters
//! (reparameterization trick) and `backward()` on the loss gives the
//! low-variance pathwise gradient.

use candle_core::Tensor;
use log::debug;
use rand::rngs::StdRng;

use crate::context::{run, run_replay};
use crate::error::{PplError, Result};
use crate::model::Model;
use crate::param_store::ParamStore;
use crate::trace::Trace;

/// Configuration for the ELBO estimator.
#[derive(Debug, Clone)]
pub struct ElboConfig {
    /// Number of Monte Carlo particles averaged per estimate
    pub num_particles: usize,
}

impl Default for ElboConfig {
    fn default() -> Self {
        Self { num_particles: 1 }
    }
}

impl ElboConfig {
    pub fn new(num_particles: usize) -> Self {
        Self { num_particles }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Elbo {
    config: ElboConfig,
}

impl Elbo {
    pub fn new(config: ElboConfig) -> Self {
        Self { config }
    }

    pub fn num_particles(&self) -> usize {
        self.config.num_particles.max(1)
    }

    /// Estimate the loss `-ELBO` (scalar, differentiable)
    ///
    /// # Returns
    /// The loss and the guide trace of the last particle
    pub fn estimate<M, G, A>(
        &self,
        model: &M,
        guide: &G,
        args: &A,
        store: &ParamStore,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Trace)>
    where
        M: Model<A> + ?Sized,
        G: Model<A> + ?Sized,
        A: ?Sized,
    {
        let n = self.num_particles();
        let mut elbo_tot: Option<Tensor> = None;
        let mut last_guide_trace = Trace::new();

        for _ in 0..n {
            let (elbo, guide_trace) = particle(model, guide, args, store, rng)?;
            elbo_tot = Some(match elbo_tot {
                Some(tot) => (tot + elbo)?,
                None => elbo,
            });
            last_guide_trace = guide_trace;
        }

        let elbo_tot = elbo_tot.ok_or_else(|| candle_core::Error::Msg("no particle".into()))?;
        let loss = (elbo_tot / n as f64)?.neg()?;
        Ok((loss, last_guide_trace))
    }

    /// Only the differentiable loss of [`Elbo::estimate`]
    pub fn loss<M, G, A>(
        &self,
        model: &M,
        guide: &G,
        args: &A,
        store: &ParamStore,
        rng: &mut StdRng,
    ) -> Result<Tensor>
    where
        M: Model<A> + ?Sized,
        G: Model<A> + ?Sized,
        A: ?Sized,
    {
        Ok(self.estimate(model, guide, args, store, rng)?.0)
    }
}

/// One single-sample ELBO estimate: log p(x, z) - log q(z)
fn particle<M, G, A>(
    model: &M,
    guide: &G,
    args: &A,
    store: &ParamStore,
    rng: &mut StdRng,
) -> Result<(Tensor, Trace)>
where
    M: Model<A> + ?Sized,
    G: Model<A> + ?Sized,
    A: ?Sized,
{
    let (_, guide_trace) = run(guide, args, store, rng)?;
    let (_, model_trace) = run_replay(model, args, store, rng, &guide_trace)?;

    // every latent of the model must be explained by the guide
    if let Some(site) = model_trace
        .latent_sites()
        .find(|site| !guide_trace.get(&site.name).is_some_and(|g| g.is_latent()))
    {
        return Err(PplError::MissingGuideSite(site.name.clone()));
    }

    let log_p = model_trace.log_prob_sum()?;
    let log_q = guide_trace.log_prob_sum()?;
    let elbo = (log_p - log_q)?;

    debug!(
        "particle: {} model site(s), {} guide site(s)",
        model_trace.len(),
        guide_trace.len()
    );
    Ok((elbo, guide_trace))
}

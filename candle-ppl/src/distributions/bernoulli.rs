use candle_core::{Device, Result, Tensor};
use rand::RngCore;

use super::{from_f64_vec, scalar, standard_uniform, to_f64_vec, Distribution};

const EPS: f64 = 1e-6;

/// Bernoulli distribution over {0, 1} with success probability `probs`
///
/// Draws are leaves: there is no reparameterized path.
#[derive(Clone, Debug)]
pub struct Bernoulli {
    probs: Tensor,
    dims: Vec<usize>,
}

impl Bernoulli {
    pub fn new(probs: &Tensor) -> Result<Self> {
        Ok(Self {
            probs: probs.clone(),
            dims: probs.dims().to_vec(),
        })
    }

    pub fn from_prob(p: f64, device: &Device) -> Result<Self> {
        Self::new(&scalar(p, device)?)
    }

    pub fn probs(&self) -> &Tensor {
        &self.probs
    }

    pub fn expand(&self, dims: &[usize]) -> Result<Self> {
        Self::new(&self.probs.broadcast_as(dims)?)
    }
}

impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        "Bernoulli"
    }

    fn batch_dims(&self) -> &[usize] {
        &self.dims
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        let probs = to_f64_vec(&self.probs, &self.dims)?;
        let draws = standard_uniform(rng, probs.len())
            .into_iter()
            .zip(probs)
            .map(|(u, p)| if u < p { 1.0 } else { 0.0 })
            .collect();
        from_f64_vec(draws, &self.dims, &self.probs)
    }

    /// log p(x) = x * log(p) + (1 - x) * log(1 - p)
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let p = self.probs.clamp(EPS, 1.0 - EPS)?;
        let log_p = p.log()?;
        let log_1mp = p.affine(-1.0, 1.0)?.log()?;
        let one_minus_x = value.affine(-1.0, 1.0)?;
        value
            .broadcast_mul(&log_p)?
            .broadcast_add(&one_minus_x.broadcast_mul(&log_1mp)?)
    }
}

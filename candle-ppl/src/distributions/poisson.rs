use candle_core::{Device, Result, Tensor};
use rand::RngCore;
use rand_distr::Distribution as RandDistribution;

use super::{from_f64_vec, lgamma_approx, scalar, to_f64_vec, Distribution};

/// Poisson distribution over counts with mean `rate`
///
/// ```text
/// log p(k | λ) = k * log(λ) - λ - lgamma(k + 1)
/// ```
#[derive(Clone, Debug)]
pub struct Poisson {
    rate: Tensor,
    dims: Vec<usize>,
}

impl Poisson {
    pub fn new(rate: &Tensor) -> Result<Self> {
        Ok(Self {
            rate: rate.clone(),
            dims: rate.dims().to_vec(),
        })
    }

    pub fn from_rate(rate: f64, device: &Device) -> Result<Self> {
        Self::new(&scalar(rate, device)?)
    }

    pub fn rate(&self) -> &Tensor {
        &self.rate
    }

    pub fn expand(&self, dims: &[usize]) -> Result<Self> {
        Self::new(&self.rate.broadcast_as(dims)?)
    }
}

impl Distribution for Poisson {
    fn name(&self) -> &'static str {
        "Poisson"
    }

    fn batch_dims(&self) -> &[usize] {
        &self.dims
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        let rates = to_f64_vec(&self.rate, &self.dims)?;
        let mut draws = Vec::with_capacity(rates.len());
        for lambda in rates {
            let pois = rand_distr::Poisson::new(lambda)
                .map_err(|e| candle_core::Error::Msg(format!("poisson({}): {}", lambda, e)))?;
            draws.push(pois.sample(&mut *rng));
        }
        from_f64_vec(draws, &self.dims, &self.rate)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let log_rate = self.rate.log()?;
        let log_k_fact = lgamma_approx(&(value + 1.0)?)?;
        value
            .broadcast_mul(&log_rate)?
            .broadcast_sub(&self.rate)?
            .broadcast_sub(&log_k_fact)
    }
}

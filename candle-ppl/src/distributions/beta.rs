use candle_core::{Device, Result, Tensor};
use rand::RngCore;
use rand_distr::Distribution as RandDistribution;

use super::{broadcast_dims, from_f64_vec, lgamma_approx, scalar, to_f64_vec, Distribution};

const EPS: f64 = 1e-6;

/// Beta distribution on (0, 1) with concentrations `alpha` and `beta`
#[derive(Clone, Debug)]
pub struct Beta {
    alpha: Tensor,
    beta: Tensor,
    dims: Vec<usize>,
}

impl Beta {
    pub fn new(alpha: &Tensor, beta: &Tensor) -> Result<Self> {
        let dims = broadcast_dims(alpha, beta, "beta")?;
        Ok(Self {
            alpha: alpha.clone(),
            beta: beta.clone(),
            dims,
        })
    }

    pub fn from_scalars(alpha: f64, beta: f64, device: &Device) -> Result<Self> {
        Self::new(&scalar(alpha, device)?, &scalar(beta, device)?)
    }

    /// E[x] = α / (α + β)
    pub fn mean(&self) -> Result<Tensor> {
        self.alpha
            .broadcast_div(&self.alpha.broadcast_add(&self.beta)?)
    }

    pub fn expand(&self, dims: &[usize]) -> Result<Self> {
        Self::new(&self.alpha.broadcast_as(dims)?, &self.beta.broadcast_as(dims)?)
    }
}

impl Distribution for Beta {
    fn name(&self) -> &'static str {
        "Beta"
    }

    fn batch_dims(&self) -> &[usize] {
        &self.dims
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        let alpha = to_f64_vec(&self.alpha, &self.dims)?;
        let beta = to_f64_vec(&self.beta, &self.dims)?;
        let mut draws = Vec::with_capacity(alpha.len());
        for (&a, &b) in alpha.iter().zip(beta.iter()) {
            let beta_dist = rand_distr::Beta::new(a, b)
                .map_err(|e| candle_core::Error::Msg(format!("beta({}, {}): {}", a, b, e)))?;
            draws.push(beta_dist.sample(&mut *rng));
        }
        from_f64_vec(draws, &self.dims, &self.alpha)
    }

    /// log p(x) = (α-1) log x + (β-1) log(1-x) - [lgamma(α) + lgamma(β) - lgamma(α+β)]
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let x = value.clamp(EPS, 1.0 - EPS)?;
        let log_x = x.log()?;
        let log_1mx = x.affine(-1.0, 1.0)?.log()?;

        let ln_beta_fn = ((lgamma_approx(&self.alpha)?.broadcast_add(&lgamma_approx(&self.beta)?))?
            .broadcast_sub(&lgamma_approx(&self.alpha.broadcast_add(&self.beta)?)?))?;

        let term_a = log_x.broadcast_mul(&(&self.alpha - 1.0)?)?;
        let term_b = log_1mx.broadcast_mul(&(&self.beta - 1.0)?)?;
        term_a.broadcast_add(&term_b)?.broadcast_sub(&ln_beta_fn)
    }
}

use candle_core::{Device, Result, Tensor};
use rand::RngCore;

use super::{broadcast_dims, scalar, standard_normal, Distribution};

const LN_2PI: f64 = 1.8378770664093453;

/// Normal distribution N(loc, scale²)
///
/// Reparameterized: a draw is `loc + scale * eps` with `eps ~ N(0, 1)`,
/// so gradients flow from the drawn value back to `loc` and `scale`.
#[derive(Clone, Debug)]
pub struct Normal {
    loc: Tensor,
    scale: Tensor,
    dims: Vec<usize>,
}

impl Normal {
    /// * `loc` - mean, broadcastable against `scale`
    /// * `scale` - standard deviation (must be positive)
    pub fn new(loc: &Tensor, scale: &Tensor) -> Result<Self> {
        let dims = broadcast_dims(loc, scale, "normal")?;
        Ok(Self {
            loc: loc.clone(),
            scale: scale.clone(),
            dims,
        })
    }

    /// Scalar Normal with constant parameters
    pub fn from_scalars(loc: f64, scale: f64, device: &Device) -> Result<Self> {
        Self::new(&scalar(loc, device)?, &scalar(scale, device)?)
    }

    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }

    /// Broadcast the parameters to a larger batch, e.g., the size of a plate
    pub fn expand(&self, dims: &[usize]) -> Result<Self> {
        Self::new(&self.loc.broadcast_as(dims)?, &self.scale.broadcast_as(dims)?)
    }
}

impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "Normal"
    }

    fn batch_dims(&self) -> &[usize] {
        &self.dims
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        Ok(self.rsample(rng)?.detach())
    }

    fn rsample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        let eps = standard_normal(rng, &self.dims, &self.loc)?;
        eps.broadcast_mul(&self.scale)?.broadcast_add(&self.loc)
    }

    fn has_rsample(&self) -> bool {
        true
    }

    /// log N(x; μ, σ²) = -0.5 * [(x-μ)²/σ² + 2*ln(σ) + ln(2π)]
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let z = value
            .broadcast_sub(&self.loc)?
            .broadcast_div(&self.scale)?;
        let ln_scale = self.scale.log()?;
        (z.sqr()? * (-0.5))?.broadcast_sub(&ln_scale)? - 0.5 * LN_2PI
    }
}

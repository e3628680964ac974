//! Distribution capability consumed by the trace recorder.
//!
//! A distribution only needs to draw a value and score one. Families that
//! can express a draw as a differentiable function of their parameters
//! (`loc + scale * eps` for the Normal) advertise it through
//! [`Distribution::has_rsample`]; the recorder branches on that flag.

mod bernoulli;
mod beta;
mod normal;
mod poisson;
mod special;

pub use bernoulli::Bernoulli;
pub use beta::Beta;
pub use normal::Normal;
pub use poisson::Poisson;
pub use special::lgamma_approx;

use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::distr::StandardUniform;
use rand::RngCore;
use rand_distr::{Distribution as RandDistribution, StandardNormal};

pub trait Distribution: Send + Sync {
    /// Family name, used in error messages
    fn name(&self) -> &'static str;

    /// Shape of one draw
    fn batch_dims(&self) -> &[usize];

    /// Draw a value that does not carry gradients to the parameters
    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor>;

    /// Draw a value as a differentiable function of the parameters
    fn rsample(&self, _rng: &mut dyn RngCore) -> Result<Tensor> {
        candle_core::bail!("{} does not support reparameterized sampling", self.name())
    }

    fn has_rsample(&self) -> bool {
        false
    }

    /// Element-wise log density, broadcast to the shape of `value`
    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;
}

impl<D: Distribution + ?Sized> Distribution for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn batch_dims(&self) -> &[usize] {
        (**self).batch_dims()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        (**self).sample(rng)
    }

    fn rsample(&self, rng: &mut dyn RngCore) -> Result<Tensor> {
        (**self).rsample(rng)
    }

    fn has_rsample(&self) -> bool {
        (**self).has_rsample()
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        (**self).log_prob(value)
    }
}

/// Shape shared by two parameter tensors after broadcasting
pub(crate) fn broadcast_dims(a: &Tensor, b: &Tensor, op: &'static str) -> Result<Vec<usize>> {
    let shape: Shape = a.shape().broadcast_shape_binary_op(b.shape(), op)?;
    Ok(shape.dims().to_vec())
}

/// Standard normal noise shaped `dims`, on the device and dtype of `like`
pub(crate) fn standard_normal(
    rng: &mut dyn RngCore,
    dims: &[usize],
    like: &Tensor,
) -> Result<Tensor> {
    let n: usize = dims.iter().product();
    let mut eps = Vec::with_capacity(n);
    for _ in 0..n {
        let z: f32 = StandardNormal.sample(&mut *rng);
        eps.push(z);
    }
    Tensor::from_vec(eps, dims, like.device())?.to_dtype(like.dtype())
}

/// `n` draws from Uniform(0, 1)
pub(crate) fn standard_uniform(rng: &mut dyn RngCore, n: usize) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let u: f64 = StandardUniform.sample(&mut *rng);
            u
        })
        .collect()
}

/// Parameter values as a flat `f64` vector broadcast to `dims`
///
/// Moves to CPU first (Metal doesn't support F64).
pub(crate) fn to_f64_vec(x: &Tensor, dims: &[usize]) -> Result<Vec<f64>> {
    x.detach()
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .broadcast_as(dims)?
        .flatten_all()?
        .to_vec1::<f64>()
}

/// Build a tensor from host draws, matching device and dtype of `like`
pub(crate) fn from_f64_vec(values: Vec<f64>, dims: &[usize], like: &Tensor) -> Result<Tensor> {
    Tensor::from_vec(values, dims, &Device::Cpu)?
        .to_dtype(like.dtype())?
        .to_device(like.device())
}

/// Scalar tensor with the default dtype used by the engine
pub fn scalar(x: f64, device: &Device) -> Result<Tensor> {
    Tensor::new(x as f32, device)
}

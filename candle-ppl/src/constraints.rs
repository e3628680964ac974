//! Bijections between an unconstrained raw tensor and a restricted domain.
//!
//! The parameter store keeps the raw (unconstrained) tensor and the
//! optimizer updates it freely; the constrained view is recomputed from
//! it each time, so it always lands in the domain.

use std::fmt;
use std::str::FromStr;

use candle_core::{Result, Tensor};
use candle_nn::ops::sigmoid;

use crate::error::PplError;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Constraint {
    #[default]
    Real,
    /// (0, ∞) via exp / log
    Positive,
    /// (0, 1) via sigmoid / logit
    UnitInterval,
    /// (lb, ∞) via lb + exp / log(x - lb)
    GreaterThan(f64),
    /// (lo, hi) via lo + (hi - lo) * sigmoid
    Interval(f64, f64),
}

fn logit(p: &Tensor) -> Result<Tensor> {
    (p / &p.affine(-1.0, 1.0)?)?.log()
}

impl Constraint {
    /// Map an unconstrained raw tensor into the domain
    pub fn constrain(&self, raw: &Tensor) -> Result<Tensor> {
        match *self {
            Constraint::Real => Ok(raw.clone()),
            Constraint::Positive => raw.exp(),
            Constraint::UnitInterval => sigmoid(raw),
            Constraint::GreaterThan(lb) => raw.exp()? + lb,
            Constraint::Interval(lo, hi) => sigmoid(raw)?.affine(hi - lo, lo),
        }
    }

    /// Inverse of [`Constraint::constrain`]
    pub fn unconstrain(&self, value: &Tensor) -> Result<Tensor> {
        match *self {
            Constraint::Real => Ok(value.clone()),
            Constraint::Positive => value.log(),
            Constraint::UnitInterval => logit(value),
            Constraint::GreaterThan(lb) => (value - lb)?.log(),
            Constraint::Interval(lo, hi) => logit(&value.affine(1.0 / (hi - lo), -lo / (hi - lo))?),
        }
    }

    /// Whether every element of `value` lies in the domain
    pub fn check(&self, value: &Tensor) -> Result<bool> {
        let (lo, hi) = match *self {
            Constraint::Real => return Ok(true),
            Constraint::Positive => (0.0, f64::INFINITY),
            Constraint::UnitInterval => (0.0, 1.0),
            Constraint::GreaterThan(lb) => (lb, f64::INFINITY),
            Constraint::Interval(lo, hi) => (lo, hi),
        };
        let x = value
            .to_dtype(candle_core::DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;
        Ok(x.iter().all(|&v| v > lo && v < hi))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Real => write!(f, "real"),
            Constraint::Positive => write!(f, "positive"),
            Constraint::UnitInterval => write!(f, "unit_interval"),
            Constraint::GreaterThan(lb) => write!(f, "greater_than:{}", lb),
            Constraint::Interval(lo, hi) => write!(f, "interval:{},{}", lo, hi),
        }
    }
}

impl FromStr for Constraint {
    type Err = PplError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || PplError::InvalidConstraint(s.to_string());
        let parse = |x: &str| x.trim().parse::<f64>().map_err(|_| invalid());

        match s.split_once(':') {
            None => match s {
                "real" => Ok(Constraint::Real),
                "positive" => Ok(Constraint::Positive),
                "unit_interval" => Ok(Constraint::UnitInterval),
                _ => Err(invalid()),
            },
            Some(("greater_than", lb)) => Ok(Constraint::GreaterThan(parse(lb)?)),
            Some(("interval", bounds)) => {
                let (lo, hi) = bounds.split_once(',').ok_or_else(invalid)?;
                let (lo, hi) = (parse(lo)?, parse(hi)?);
                if lo >= hi {
                    return Err(invalid());
                }
                Ok(Constraint::Interval(lo, hi))
            }
            Some(_) => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_round_trip() -> Result<()> {
        let x = Tensor::new(&[0.1f32, 0.5, 0.9], &Device::Cpu)?;
        for c in [
            Constraint::Real,
            Constraint::Positive,
            Constraint::UnitInterval,
            Constraint::GreaterThan(0.05),
            Constraint::Interval(0.0, 2.0),
        ] {
            let back = c.constrain(&c.unconstrain(&x)?)?.to_vec1::<f32>()?;
            for (a, b) in back.iter().zip([0.1f32, 0.5, 0.9]) {
                assert!((a - b).abs() < 1e-5, "{}: {} vs {}", c, a, b);
            }
        }
        Ok(())
    }

    #[test]
    fn test_constrained_values_stay_in_domain() -> Result<()> {
        let raw = Tensor::new(&[-30.0f32, -1.0, 0.0, 3.0], &Device::Cpu)?;
        assert!(Constraint::Positive.check(&Constraint::Positive.constrain(&raw)?)?);
        let unit = Constraint::UnitInterval;
        let raw = Tensor::new(&[-5.0f32, 0.0, 5.0], &Device::Cpu)?;
        assert!(unit.check(&unit.constrain(&raw)?)?);
        Ok(())
    }

    #[test]
    fn test_sigmoid_views() -> Result<()> {
        let raw = Tensor::new(&[0.0f32, 2.0], &Device::Cpu)?;
        let unit = Constraint::UnitInterval.constrain(&raw)?.to_vec1::<f32>()?;
        assert!((unit[0] - 0.5).abs() < 1e-6);
        assert!((unit[1] - 1.0 / (1.0 + (-2f32).exp())).abs() < 1e-6);

        let interval = Constraint::Interval(-1.0, 3.0).constrain(&raw)?.to_vec1::<f32>()?;
        assert!((interval[0] - 1.0).abs() < 1e-6);
        assert!((interval[1] - (-1.0 + 4.0 * unit[1])).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_unit_interval_has_gradient() -> Result<()> {
        let raw = candle_core::Var::new(0f32, &Device::Cpu)?;
        let value = Constraint::UnitInterval.constrain(raw.as_tensor())?;
        let grads = value.backward()?;
        let g: f32 = grads.get(raw.as_tensor()).expect("gradient").to_scalar()?;
        // d sigmoid / dx at 0 is 1/4
        assert!((g - 0.25).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_parse() {
        for c in [
            Constraint::Real,
            Constraint::Positive,
            Constraint::UnitInterval,
            Constraint::GreaterThan(1.5),
            Constraint::Interval(-1.0, 3.0),
        ] {
            assert_eq!(c.to_string().parse::<Constraint>().ok(), Some(c));
        }
        assert!("interval:2,1".parse::<Constraint>().is_err());
        assert!("simplex".parse::<Constraint>().is_err());
    }
}

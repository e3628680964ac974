//! Ordered record of the named sites produced by one execution.

use std::collections::HashMap;
use std::fmt;

use candle_core::{Device, Tensor};

use crate::constraints::Constraint;
use crate::distributions::Distribution;
use crate::error::{PplError, Result};
use crate::plate::Plate;

pub enum SiteKind {
    /// A random draw (or an observation) scored under `dist`
    Sample {
        dist: Box<dyn Distribution>,
        is_observed: bool,
        /// the value is a differentiable function of `dist`'s parameters
        reparameterized: bool,
        /// plate weight applied to the summed log density
        scale: f64,
    },
    /// A lookup in the parameter store
    Param { constraint: Constraint },
}

pub struct Site {
    pub name: String,
    pub kind: SiteKind,
    pub value: Tensor,
}

impl Site {
    pub fn is_sample(&self) -> bool {
        matches!(self.kind, SiteKind::Sample { .. })
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, SiteKind::Param { .. })
    }

    pub fn is_observed(&self) -> bool {
        matches!(
            self.kind,
            SiteKind::Sample {
                is_observed: true,
                ..
            }
        )
    }

    /// A sample site whose value was drawn rather than supplied
    pub fn is_latent(&self) -> bool {
        matches!(
            self.kind,
            SiteKind::Sample {
                is_observed: false,
                ..
            }
        )
    }

    pub fn is_reparameterized(&self) -> bool {
        matches!(
            self.kind,
            SiteKind::Sample {
                reparameterized: true,
                ..
            }
        )
    }

    pub fn distribution(&self) -> Option<&dyn Distribution> {
        match &self.kind {
            SiteKind::Sample { dist, .. } => Some(dist.as_ref()),
            SiteKind::Param { .. } => None,
        }
    }

    /// Element-wise log density of the value (sample sites only)
    pub fn log_prob(&self) -> Result<Option<Tensor>> {
        match &self.kind {
            SiteKind::Sample { dist, .. } => Ok(Some(dist.log_prob(&self.value)?)),
            SiteKind::Param { .. } => Ok(None),
        }
    }

    /// Summed log density times the plate scale (sample sites only)
    pub fn log_prob_sum(&self) -> Result<Option<Tensor>> {
        match &self.kind {
            SiteKind::Sample { dist, scale, .. } => {
                let lp = dist.log_prob(&self.value)?.sum_all()?;
                let lp = if *scale != 1.0 { (lp * *scale)? } else { lp };
                Ok(Some(lp))
            }
            SiteKind::Param { .. } => Ok(None),
        }
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            SiteKind::Sample {
                dist, is_observed, ..
            } => format!("sample {} observed={}", dist.name(), is_observed),
            SiteKind::Param { constraint } => format!("param {}", constraint),
        };
        write!(f, "Site({}, {}, {:?})", self.name, kind, self.value.dims())
    }
}

/// Sites in program execution order, keyed by unique name.
///
/// Only the recorder appends sites; a finished trace is read-only.
///
/// ```compile_fail
/// use candle_ppl::candle_core::{Device, Tensor};
/// use candle_ppl::{Constraint, Site, SiteKind, Trace};
///
/// let mut trace = Trace::new();
/// let value = Tensor::new(1f32, &Device::Cpu).unwrap();
/// let site = Site {
///     name: "w".to_string(),
///     kind: SiteKind::Param { constraint: Constraint::Real },
///     value,
/// };
/// trace.push(site).unwrap();
/// ```
#[derive(Default, Debug)]
pub struct Trace {
    sites: Vec<Site>,
    index: HashMap<String, usize>,
    plates: Vec<Plate>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a site; a name can only be recorded once
    pub(crate) fn push(&mut self, site: Site) -> Result<()> {
        if self.index.contains_key(&site.name) {
            return Err(PplError::DuplicateSite(site.name));
        }
        self.index.insert(site.name.clone(), self.sites.len());
        self.sites.push(site);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Site> {
        self.index.get(name).map(|&i| &self.sites[i])
    }

    pub fn site(&self, name: &str) -> Result<&Site> {
        self.get(name)
            .ok_or_else(|| PplError::UnknownSite(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<&Tensor> {
        Ok(&self.site(name)?.value)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(|s| s.name.as_str())
    }

    pub fn sample_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_sample())
    }

    pub fn latent_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_latent())
    }

    pub fn observed_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_observed())
    }

    pub fn param_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_param())
    }

    pub(crate) fn push_plate(&mut self, plate: Plate) {
        self.plates.push(plate);
    }

    pub fn plate(&self, name: &str) -> Option<&Plate> {
        self.plates.iter().find(|p| p.name() == name)
    }

    pub fn plates(&self) -> &[Plate] {
        &self.plates
    }

    /// Summed (and plate-scaled) log density of one sample site
    pub fn site_log_prob(&self, name: &str) -> Result<Tensor> {
        self.site(name)?
            .log_prob_sum()?
            .ok_or_else(|| PplError::UnknownSite(name.to_string()))
    }

    /// Per-site summed (and plate-scaled) log densities, in execution order
    pub fn site_log_probs(&self) -> Result<Vec<(&str, Tensor)>> {
        let mut ret = vec![];
        for site in &self.sites {
            if let Some(lp) = site.log_prob_sum()? {
                ret.push((site.name.as_str(), lp));
            }
        }
        Ok(ret)
    }

    /// Joint log density of every sample site, a scalar tensor
    pub fn log_prob_sum(&self) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for (_, lp) in self.site_log_probs()? {
            total = Some(match total {
                Some(t) => (t + lp)?,
                None => lp,
            });
        }
        match total {
            Some(t) => Ok(t),
            None => {
                let device = self
                    .sites
                    .first()
                    .map(|s| s.value.device().clone())
                    .unwrap_or(Device::Cpu);
                Ok(Tensor::new(0f32, &device)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Normal;

    fn normal_site(name: &str, x: f32, observed: bool) -> Result<Site> {
        let dev = Device::Cpu;
        Ok(Site {
            name: name.to_string(),
            kind: SiteKind::Sample {
                dist: Box::new(Normal::from_scalars(0.0, 1.0, &dev)?),
                is_observed: observed,
                reparameterized: !observed,
                scale: 1.0,
            },
            value: Tensor::new(x, &dev)?,
        })
    }

    #[test]
    fn test_duplicate_site() -> Result<()> {
        let mut trace = Trace::new();
        trace.push(normal_site("x", 0.0, false)?)?;
        let res = trace.push(normal_site("x", 1.0, false)?);
        assert!(matches!(res, Err(PplError::DuplicateSite(name)) if name == "x"));
        assert_eq!(trace.len(), 1);
        Ok(())
    }

    #[test]
    fn test_order_and_log_prob() -> Result<()> {
        let mut trace = Trace::new();
        trace.push(normal_site("b", 0.0, false)?)?;
        trace.push(normal_site("a", 1.0, true)?)?;

        assert_eq!(trace.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(trace.latent_sites().count(), 1);
        assert_eq!(trace.observed_sites().count(), 1);

        let ln_2pi = (2.0 * std::f32::consts::PI).ln();
        let expected = -ln_2pi - 0.5;
        let total: f32 = trace.log_prob_sum()?.to_scalar()?;
        assert!((total - expected).abs() < 1e-5);

        let lp_a: f32 = trace.site_log_prob("a")?.to_scalar()?;
        assert!((lp_a - (-0.5 * ln_2pi - 0.5)).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_empty_trace_log_prob() -> Result<()> {
        let trace = Trace::new();
        assert_eq!(trace.log_prob_sum()?.to_scalar::<f32>()?, 0.0);
        assert!(matches!(trace.site("x"), Err(PplError::UnknownSite(_))));
        Ok(())
    }
}

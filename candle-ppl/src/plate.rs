use candle_core::{Result as CandleResult, Tensor};

use crate::error::{PplError, Result};

/// A declared axis of conditional independence.
///
/// Sites sampled in a plate carry a batch of `len()` independent values
/// along their leading dimension. With subsampling, only `len()` of the
/// `size()` members are visited, and their summed log density is scaled
/// by `size / len` so the ELBO stays an unbiased estimate over the full
/// plate.
#[derive(Clone, Debug, PartialEq)]
pub struct Plate {
    name: String,
    size: usize,
    indices: Vec<usize>,
    subsampled: bool,
}

impl Plate {
    pub(crate) fn full(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            indices: (0..size).collect(),
            subsampled: false,
        }
    }

    pub(crate) fn subsample(name: &str, size: usize, indices: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            size,
            indices,
            subsampled: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full size of the plate
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of members visited in this execution
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_subsampled(&self) -> bool {
        self.subsampled
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Log-density weight `size / len`
    pub fn scale(&self) -> f64 {
        if self.indices.is_empty() {
            return 0.0;
        }
        self.size as f64 / self.indices.len() as f64
    }

    /// Select the visited members of `data` along `dim`
    pub fn index_select(&self, data: &Tensor, dim: usize) -> CandleResult<Tensor> {
        if !self.subsampled {
            return Ok(data.clone());
        }
        let idx: Vec<u32> = self.indices.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_vec(idx, self.len(), data.device())?;
        data.index_select(&idx, dim)
    }

    /// A value recorded in this plate must have `len()` rows
    pub(crate) fn check(&self, site: &str, value: &Tensor) -> Result<()> {
        match value.dims().first() {
            Some(&n) if n == self.len() => Ok(()),
            _ => Err(PplError::PlateMismatch {
                plate: self.name.clone(),
                site: site.to_string(),
                expected: self.len(),
                dims: value.dims().to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_subsample_select_and_scale() -> Result<()> {
        let data = Tensor::new(&[10f32, 11., 12., 13., 14., 15.], &Device::Cpu)?;
        let plate = Plate::subsample("data", 6, vec![4, 1]);

        assert_eq!(plate.scale(), 3.0);
        let x = plate.index_select(&data, 0)?.to_vec1::<f32>()?;
        assert_eq!(x, vec![14., 11.]);

        assert!(plate.check("obs", &Tensor::zeros(2, candle_core::DType::F32, &Device::Cpu)?).is_ok());
        assert!(matches!(
            plate.check("obs", &data),
            Err(PplError::PlateMismatch { expected: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_full_plate() -> Result<()> {
        let plate = Plate::full("rows", 3);
        assert_eq!(plate.scale(), 1.0);
        assert_eq!(plate.indices(), &[0, 1, 2]);
        Ok(())
    }
}

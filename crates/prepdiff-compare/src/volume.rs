//! Voxel-wise comparison of two volumes.

use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// A floating-point image array with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: ArrayD<f64>,
}

impl Volume {
    pub fn new(data: ArrayD<f64>) -> Self {
        Self { data }
    }

    /// Build a volume from samples in row-major order.
    ///
    /// # Examples
    ///
    /// ```
    /// use prepdiff_compare::volume::Volume;
    ///
    /// let v = Volume::from_shape_vec(&[2, 2, 2], vec![0.0; 8]).unwrap();
    /// assert_eq!(v.shape(), &[2, 2, 2]);
    /// assert!(Volume::from_shape_vec(&[3], vec![0.0; 2]).is_none());
    /// ```
    pub fn from_shape_vec(shape: &[usize], samples: Vec<f64>) -> Option<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), samples)
            .ok()
            .map(Self::new)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }
}

/// Summary of `|A - B|` over all voxels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    /// Largest absolute difference. NaN if any voxel difference is NaN.
    pub max_abs_diff: f64,
    /// Mean absolute difference over every voxel, changed or not.
    pub mean_abs_diff: f64,
    /// Fraction of voxels whose absolute difference is strictly positive.
    pub fraction_changed: f64,
}

/// Outcome of comparing two volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum VolumeComparison {
    /// Shapes differ; no voxel statistic was computed.
    #[serde(rename_all = "camelCase")]
    ShapeMismatch {
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },
    /// Every voxel is exactly equal.
    Identical,
    /// At least one voxel differs.
    Differ(VolumeStats),
}

/// Compare two volumes voxel by voxel.
///
/// Shapes are checked first and a mismatch stops the comparison. Equality is
/// exact, so a NaN voxel never equals anything.
///
/// # Examples
///
/// ```
/// use prepdiff_compare::volume::{compare_volumes, Volume, VolumeComparison};
///
/// let a = Volume::from_shape_vec(&[2, 2, 2], vec![0.0; 8]).unwrap();
/// let mut samples = vec![0.0; 8];
/// samples[3] = 5.0;
/// let b = Volume::from_shape_vec(&[2, 2, 2], samples).unwrap();
///
/// let VolumeComparison::Differ(stats) = compare_volumes(&a, &b) else {
///     panic!("expected a difference");
/// };
/// assert_eq!(stats.max_abs_diff, 5.0);
/// assert_eq!(stats.mean_abs_diff, 0.625);
/// assert_eq!(stats.fraction_changed, 0.125);
/// ```
pub fn compare_volumes(a: &Volume, b: &Volume) -> VolumeComparison {
    if a.shape() != b.shape() {
        return VolumeComparison::ShapeMismatch {
            shape_a: a.shape().to_vec(),
            shape_b: b.shape().to_vec(),
        };
    }

    if a.data == b.data {
        return VolumeComparison::Identical;
    }

    let mut max = 0.0f64;
    let mut sum = 0.0f64;
    let mut changed = 0usize;
    Zip::from(&a.data).and(&b.data).for_each(|&x, &y| {
        let d = (x - y).abs();
        max = if max.is_nan() || d.is_nan() {
            f64::NAN
        } else {
            max.max(d)
        };
        sum += d;
        if d > 0.0 {
            changed += 1;
        }
    });

    // Not identical, so there is at least one voxel.
    let n = a.data.len() as f64;
    VolumeComparison::Differ(VolumeStats {
        max_abs_diff: max,
        mean_abs_diff: sum / n,
        fraction_changed: changed as f64 / n,
    })
}

// THEORY:
// The `mixture` module is the entry gate for all numeric input. Upstream tools fit
// a Gaussian mixture to every frame of a single-cell video and decompose the
// divergence graph between its components; this module receives those results
// as plain arrays and turns them into validated, strongly-typed series.
//
// Key architectural principles:
// 1.  **Validate Once, Trust Everywhere**: Every shape rule (per-array rank and
//     trailing dimensions, matching frame counts, matching component counts) is
//     checked here, when the data is loaded. Everything downstream indexes freely.
// 2.  **Component Identity**: A mixture component is addressed by a `ComponentId`
//     handle that can only be obtained from a validated `AnalysisInput`. Holding a
//     handle proves the index is valid for the means, the covariances and the
//     eigenvectors alike.
// 3.  **Archive Agnostic**: Arrays are read from `.npz` archives by name, with or
//     without the `.npy` suffix the archiver may have added.

use crate::error::{AnalysisError, Result};
use ndarray::{Array3, Array4, ArrayD, ArrayView1, ArrayView2, Ix3, Ix4, IxDyn, OwnedRepr, s};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::Path;

/// A stable handle to one mixture component, valid for every array of the run it
/// was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct ComponentId(usize);

impl ComponentId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// The position of this component in the mixture arrays.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Per-frame Gaussian-mixture parameters for one cell video.
#[derive(Debug, Clone)]
pub struct MixtureSeries {
    /// Component means in pixel coordinates, shape `N x M x 2` as `(row, col)`.
    means: Array3<f64>,
    /// Component covariance matrices, shape `N x M x 2 x 2`.
    covariances: Array4<f64>,
}

impl MixtureSeries {
    pub fn new(means: Array3<f64>, covariances: Array4<f64>) -> Result<Self> {
        let (frames, components, coords) = means.dim();
        if coords != 2 {
            return Err(AnalysisError::ArrayShape {
                array: "means",
                expected: "N x M x 2".to_string(),
                found: means.shape().to_vec(),
            });
        }
        if covariances.dim() != (frames, components, 2, 2) {
            return Err(AnalysisError::ArrayShape {
                array: "covars",
                expected: format!("{frames} x {components} x 2 x 2"),
                found: covariances.shape().to_vec(),
            });
        }
        Ok(Self { means, covariances })
    }

    pub fn frame_count(&self) -> usize {
        self.means.dim().0
    }

    pub fn component_count(&self) -> usize {
        self.means.dim().1
    }

    /// The `(row, col)` mean of a component at a frame.
    pub fn mean(&self, frame: usize, component: ComponentId) -> [f64; 2] {
        let m = self.means.slice(s![frame, component.index(), ..]);
        [m[0], m[1]]
    }

    /// The 2x2 covariance matrix of a component at a frame.
    pub fn covariance(&self, frame: usize, component: ComponentId) -> ArrayView2<'_, f64> {
        self.covariances.slice(s![frame, component.index(), .., ..])
    }
}

/// Per-frame, per-component eigenvectors of the inter-component affinity graph.
#[derive(Debug, Clone)]
pub struct EigenSeries {
    /// Shape `N x M x M`; row `[i, j, ..]` is component `j`'s vector at frame `i`.
    vectors: Array3<f64>,
}

impl EigenSeries {
    pub fn new(vectors: Array3<f64>) -> Result<Self> {
        let (_, components, length) = vectors.dim();
        if components != length {
            return Err(AnalysisError::ArrayShape {
                array: "eigen_vecs",
                expected: "N x M x M".to_string(),
                found: vectors.shape().to_vec(),
            });
        }
        Ok(Self { vectors })
    }

    pub fn frame_count(&self) -> usize {
        self.vectors.dim().0
    }

    pub fn component_count(&self) -> usize {
        self.vectors.dim().1
    }

    pub fn vector(&self, frame: usize, component: usize) -> ArrayView1<'_, f64> {
        self.vectors.slice(s![frame, component, ..])
    }
}

/// The validated pairing of a mixture series with its eigenvector series.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    mixture: MixtureSeries,
    eigen: EigenSeries,
}

impl AnalysisInput {
    pub fn new(mixture: MixtureSeries, eigen: EigenSeries) -> Result<Self> {
        if mixture.frame_count() != eigen.frame_count() {
            return Err(AnalysisError::FrameCountMismatch {
                mixture: mixture.frame_count(),
                eigen: eigen.frame_count(),
            });
        }
        if mixture.component_count() != eigen.component_count() {
            return Err(AnalysisError::ComponentCountMismatch {
                mixture: mixture.component_count(),
                eigen: eigen.component_count(),
            });
        }
        Ok(Self { mixture, eigen })
    }

    pub fn mixture(&self) -> &MixtureSeries {
        &self.mixture
    }

    pub fn eigen(&self) -> &EigenSeries {
        &self.eigen
    }

    pub fn frame_count(&self) -> usize {
        self.mixture.frame_count()
    }

    pub fn component_count(&self) -> usize {
        self.mixture.component_count()
    }

    pub fn component(&self, index: usize) -> Option<ComponentId> {
        (index < self.component_count()).then(|| ComponentId::new(index))
    }

    pub fn components(&self) -> impl Iterator<Item = ComponentId> + use<> {
        (0..self.component_count()).map(ComponentId::new)
    }

    pub fn into_parts(self) -> (MixtureSeries, EigenSeries) {
        (self.mixture, self.eigen)
    }
}

/// Loads `means` and `covars` from a mixture-intermediates archive.
pub fn load_intermediates(path: &Path) -> Result<MixtureSeries> {
    let mut archive = open_archive(path)?;
    let means = read_array(&mut archive, path, "means")?;
    let covars = read_array(&mut archive, path, "covars")?;
    MixtureSeries::new(into_rank3(means, "means")?, into_rank4(covars, "covars")?)
}

/// Loads `eigen_vecs` from an eigen-data archive. Eigenvalues are not needed.
pub fn load_eigendata(path: &Path) -> Result<EigenSeries> {
    let mut archive = open_archive(path)?;
    let vectors = read_array(&mut archive, path, "eigen_vecs")?;
    EigenSeries::new(into_rank3(vectors, "eigen_vecs")?)
}

/// Loads both archives and validates them against each other.
pub fn load_analysis_input(intermediates: &Path, eigendata: &Path) -> Result<AnalysisInput> {
    AnalysisInput::new(load_intermediates(intermediates)?, load_eigendata(eigendata)?)
}

fn open_archive(path: &Path) -> Result<NpzReader<File>> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    NpzReader::new(file).map_err(|source| AnalysisError::Npz {
        path: path.to_path_buf(),
        source,
    })
}

fn read_array(archive: &mut NpzReader<File>, path: &Path, name: &str) -> Result<ArrayD<f64>> {
    let npz_err = |source: ndarray_npy::ReadNpzError| AnalysisError::Npz {
        path: path.to_path_buf(),
        source,
    };
    let suffixed = format!("{name}.npy");
    let names = archive.names().map_err(npz_err)?;
    let entry = names
        .iter()
        .find(|n| n.as_str() == suffixed || n.as_str() == name)
        .ok_or_else(|| AnalysisError::MissingArray {
            path: path.to_path_buf(),
            name: name.to_string(),
        })?
        .clone();
    archive
        .by_name::<OwnedRepr<f64>, IxDyn>(&entry)
        .map_err(npz_err)
}

fn into_rank3(array: ArrayD<f64>, name: &'static str) -> Result<Array3<f64>> {
    let found = array.shape().to_vec();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| AnalysisError::ArrayShape {
            array: name,
            expected: "a rank-3 array".to_string(),
            found,
        })
}

fn into_rank4(array: ArrayD<f64>, name: &'static str) -> Result<Array4<f64>> {
    let found = array.shape().to_vec();
    array
        .into_dimensionality::<Ix4>()
        .map_err(|_| AnalysisError::ArrayShape {
            array: name,
            expected: "a rank-4 array".to_string(),
            found,
        })
}

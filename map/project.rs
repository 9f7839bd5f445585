use super::fit::{Insufficiency, MIN_REFERENCE_SAMPLES, N_COMPONENTS, PcaModel, ProjectionError};
use crate::types::PopulationTag;
use ndarray::{ArrayView1, ArrayView2, Axis, concatenate};
use serde::Serialize;

/// One point on the population map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
    pub tag: PopulationTag,
}

/// The reference population and the subject in a shared two-axis space.
///
/// Points are in reference row order, followed by exactly one subject point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub points: Vec<ProjectedPoint>,
    /// Percent of total variance on each axis.
    pub explained_variance: [f64; N_COMPONENTS],
}

impl Projection {
    pub fn subject(&self) -> Option<&ProjectedPoint> {
        self.points.last().filter(|p| p.tag == PopulationTag::Subject)
    }

    pub fn reference_points(&self) -> &[ProjectedPoint] {
        let n = self.points.len().saturating_sub(1);
        &self.points[..n]
    }
}

/// Places the subject on a map of the reference population.
///
/// The axes are fitted on the reference rows and the subject together, so the map a
/// subject sees always includes that subject.
pub fn project(
    reference: ArrayView2<f64>,
    tags: &[PopulationTag],
    subject: ArrayView1<f64>,
) -> Result<Projection, ProjectionError> {
    if reference.nrows() < MIN_REFERENCE_SAMPLES {
        return Err(Insufficiency::TooFewRecords {
            found: reference.nrows(),
            required: MIN_REFERENCE_SAMPLES,
        }
        .into());
    }
    if tags.len() != reference.nrows() {
        return Err(ProjectionError::TagCount {
            found: tags.len(),
            expected: reference.nrows(),
        });
    }
    let mismatch = || ProjectionError::DimensionMismatch {
        found: subject.len(),
        expected: reference.ncols(),
    };
    if subject.len() != reference.ncols() {
        return Err(mismatch());
    }

    let combined = concatenate(Axis(0), &[reference.view(), subject.view().insert_axis(Axis(0))])
        .map_err(|_| mismatch())?;
    let model = PcaModel::fit(combined.view())?;
    let scores = model.transform(combined.view())?;

    let points = scores
        .rows()
        .into_iter()
        .zip(tags.iter().copied().chain([PopulationTag::Subject]))
        .map(|(row, tag)| ProjectedPoint {
            x: row[0],
            y: row[1],
            tag,
        })
        .collect();

    Ok(Projection {
        points,
        explained_variance: model.explained_variance(),
    })
}

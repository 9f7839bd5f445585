// Two-axis population map: principal axes fitted on the reference population plus the subject.
pub mod fit;
pub mod project;
pub use fit::{EIGENVALUE_EPSILON, Insufficiency, PcaModel, ProjectionError};
pub use project::{ProjectedPoint, Projection, project};

use multus_hostnet_core::kubernetes::jobs::JobError;
use multus_hostnet_core::kubernetes::operations::PodError;
use multus_hostnet_core::resources::templates::TemplateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Couldn't render the job manifest! Reason: {}", .0)]
    Template(#[from] TemplateError),
    #[error("Couldn't run the job! Reason: {}", .0)]
    Job(#[from] JobError),
    #[error("Couldn't read the migration hand-off! Reason: {}", .0)]
    Annotation(#[from] PodError),
}

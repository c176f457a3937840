//! Replaceable batch jobs and bounded completion polling.

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::{DeleteParams, PostParams},
    Api,
};
use log::info;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Reference poll interval for job completion checks.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job manifest is missing a name!")]
    MissingName,
    #[error("Couldn't check for an existing '{}' job! Reason: {}", .job, .source)]
    ExistenceCheck { job: String, source: kube::Error },
    #[error("Couldn't remove the previous '{}' job! Reason: {}", .job, .source)]
    Delete { job: String, source: kube::Error },
    #[error("Couldn't create the '{}' job! Reason: {}", .job, .source)]
    Create { job: String, source: kube::Error },
    #[error("Couldn't check the '{}' job status! Reason: {}", .job, .source)]
    StatusCheck { job: String, source: kube::Error },
    #[error("'{}' job disappeared while awaiting its completion!", .0)]
    Vanished(String),
    #[error("'{}' job failed!", .0)]
    Failed(String),
    #[error("'{}' job didn't complete within {:?}!", .job, .timeout)]
    Timeout { job: String, timeout: Duration },
}

/// The slice of the batch API the coordinator needs, with absence reported
/// as a distinguished `None`. Implemented for `Api<Job>`; tests substitute
/// an in-memory fake.
#[allow(async_fn_in_trait)]
pub trait JobInterface {
    async fn get_job(&self, name: &str) -> Result<Option<Job>, kube::Error>;
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error>;
    async fn delete_job(&self, name: &str) -> Result<(), kube::Error>;
}

impl JobInterface for Api<Job> {
    async fn get_job(&self, name: &str) -> Result<Option<Job>, kube::Error> {
        self.get_opt(name).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        self.create(&PostParams::default(), job).await
    }

    async fn delete_job(&self, name: &str) -> Result<(), kube::Error> {
        self.delete(name, &DeleteParams::default()).await.map(|_| ())
    }
}

pub fn job_name(job: &Job) -> Result<&str, JobError> {
    job.metadata.name.as_deref().ok_or(JobError::MissingName)
}

/// Creates a job, deleting any prior incarnation with the same name first.
/// Jobs are not idempotent under re-application, so delete-then-recreate is
/// the replace strategy; a previous run's job still mid-execution is deleted
/// all the same.
pub async fn run_replaceable_job(api: &impl JobInterface, job: &Job) -> Result<(), JobError> {
    let name = job_name(job)?;

    let existing = api
        .get_job(name)
        .await
        .map_err(|source| JobError::ExistenceCheck {
            job: name.to_owned(),
            source,
        })?;

    if existing.is_some() {
        info!("Removing the previous '{name}' job...");
        api.delete_job(name).await.map_err(|source| JobError::Delete {
            job: name.to_owned(),
            source,
        })?;
    }

    info!("Creating the '{name}' job...");
    api.create_job(job)
        .await
        .map(|_| ())
        .map_err(|source| JobError::Create {
            job: name.to_owned(),
            source,
        })
}

/// Polls a job on a fixed interval until it reports success, reports a
/// failed replica (the distinct [`JobError::Failed`]) or the timeout
/// elapses. A still-active job keeps the poll going.
pub async fn wait_for_job_completion(
    api: &impl JobInterface,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), JobError> {
    let deadline = Instant::now() + timeout;

    loop {
        sleep(poll_interval).await;

        let job = api
            .get_job(name)
            .await
            .map_err(|source| JobError::StatusCheck {
                job: name.to_owned(),
                source,
            })?
            .ok_or_else(|| JobError::Vanished(name.to_owned()))?;

        let status = job.status.unwrap_or_default();
        if status.active.unwrap_or_default() > 0 {
            // Still running; let it continue to completion.
        } else if status.failed.unwrap_or_default() > 0 {
            return Err(JobError::Failed(name.to_owned()));
        } else if status.succeeded.unwrap_or_default() > 0 {
            info!("'{name}' job completed");
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(JobError::Timeout {
                job: name.to_owned(),
                timeout,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use kube::core::ObjectMeta;
    use tokio::time::Instant;

    use super::{run_replaceable_job, wait_for_job_completion, JobError, JobInterface};

    fn job(name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("default".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn status(active: i32, failed: i32, succeeded: i32) -> JobStatus {
        JobStatus {
            active: Some(active),
            failed: Some(failed),
            succeeded: Some(succeeded),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        jobs: Mutex<BTreeMap<String, Job>>,
        operations: Mutex<Vec<String>>,
        // Statuses handed out on successive polls; the last one repeats.
        statuses: Mutex<Vec<JobStatus>>,
    }

    impl FakeScheduler {
        fn with_statuses(name: &str, statuses: Vec<JobStatus>) -> Self {
            let fake = Self::default();
            fake.jobs.lock().unwrap().insert(name.to_owned(), job(name));
            *fake.statuses.lock().unwrap() = statuses;

            fake
        }

        fn operations(&self) -> Vec<String> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl JobInterface for FakeScheduler {
        async fn get_job(&self, name: &str) -> Result<Option<Job>, kube::Error> {
            let Some(mut job) = self.jobs.lock().unwrap().get(name).cloned() else {
                return Ok(None);
            };

            let mut statuses = self.statuses.lock().unwrap();
            job.status = if statuses.len() > 1 {
                Some(statuses.remove(0))
            } else {
                statuses.first().cloned()
            };

            Ok(Some(job))
        }

        async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
            let name = job.metadata.name.clone().unwrap();
            self.operations.lock().unwrap().push(format!("create {name}"));
            self.jobs.lock().unwrap().insert(name, job.clone());

            Ok(job.clone())
        }

        async fn delete_job(&self, name: &str) -> Result<(), kube::Error> {
            self.operations.lock().unwrap().push(format!("delete {name}"));
            self.jobs.lock().unwrap().remove(name);

            Ok(())
        }
    }

    #[tokio::test]
    async fn replaceable_job_deletes_the_previous_incarnation_first() {
        let scheduler = FakeScheduler::default();
        let job = job("multus-hostnet-setup-node-1");

        run_replaceable_job(&scheduler, &job).await.unwrap();
        assert_eq!(scheduler.jobs.lock().unwrap().len(), 1);

        run_replaceable_job(&scheduler, &job).await.unwrap();
        assert_eq!(scheduler.jobs.lock().unwrap().len(), 1);

        assert_eq!(
            scheduler.operations(),
            [
                "create multus-hostnet-setup-node-1",
                "delete multus-hostnet-setup-node-1",
                "create multus-hostnet-setup-node-1",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_job_resolves_the_wait() {
        let scheduler = FakeScheduler::with_statuses(
            "setup",
            vec![status(1, 0, 0), status(1, 0, 0), status(0, 0, 1)],
        );

        wait_for_job_completion(
            &scheduler,
            "setup",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_reports_failure_on_the_next_tick_not_timeout() {
        let scheduler = FakeScheduler::with_statuses("setup", vec![status(0, 1, 0)]);
        let started = Instant::now();

        let result = wait_for_job_completion(
            &scheduler,
            "setup",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(JobError::Failed(_))));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn nonterminal_job_times_out_within_one_poll_interval() {
        let scheduler = FakeScheduler::with_statuses("setup", vec![status(1, 0, 0)]);
        let started = Instant::now();

        let result = wait_for_job_completion(
            &scheduler,
            "setup",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(JobError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() <= Duration::from_secs(65));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_job_is_a_distinct_error() {
        let scheduler = FakeScheduler::default();

        let result = wait_for_job_completion(
            &scheduler,
            "setup",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(JobError::Vanished(_))));
    }
}

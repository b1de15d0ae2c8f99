//- copy job controller: start, wait and clean up a transient volume copy
use crate::{
    kubeapi::{is_forbidden, is_not_found},
    volume::SOURCE_ANNOTATION,
    ErrorKind, Platform, Result,
};
use futures_timer::Delay;
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

/// Where the source claim is mounted (read-only)
pub const SOURCE_MOUNT: &str = "/source";
/// Where the destination claim is mounted
pub const DEST_MOUNT: &str = "/dest";
/// Name of the single copy container
pub const CONTAINER_NAME: &str = "mover";
/// Label selecting everything we created
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// kubernetes names and label values stop at 63 chars
const MAX_NAME_LEN: usize = 63;

/// Lifecycle of a copy job
///
/// Created -> Running -> Succeeded -> Cleaned, or Running -> Failed.
/// Created until the platform accepts the job. Failed jobs are never cleaned automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cleaned,
}

/// A submitted copy job
#[derive(Clone, Debug)]
pub struct MoverHandle {
    pub name: String,
    pub namespace: String,
    pub source: String,
    pub dest: String,
    /// Number of containers that must report success
    pub containers: i32,
    pub state: JobState,
}

impl MoverHandle {
    /// Handle for a job that has not been submitted yet
    pub fn new(name: &str, namespace: &str, source: &str, dest: &str) -> Self {
        MoverHandle {
            name: name.into(),
            namespace: namespace.into(),
            source: source.into(),
            dest: dest.into(),
            containers: 1,
            state: JobState::Created,
        }
    }

    /// Handle for a job we did not start in this process (e.g. one left behind)
    pub fn existing(name: &str, namespace: &str) -> Self {
        MoverHandle {
            name: name.into(),
            namespace: namespace.into(),
            source: String::new(),
            dest: String::new(),
            containers: 1,
            state: JobState::Running,
        }
    }
}

/// What a single status poll told us
#[derive(Debug, PartialEq)]
pub enum Progress {
    /// All containers succeeded
    Done,
    /// Still going
    Pending { succeeded: i32, expected: i32 },
    /// The job controller gave up
    Failed(String),
}

/// Interpret a polled Job
///
/// Expected success count is the pod template's container count when present.
pub fn progress(job: &Job, fallback_expected: i32) -> Progress {
    let expected = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|ps| ps.containers.len() as i32)
        .unwrap_or(fallback_expected);
    let status = match &job.status {
        Some(s) => s,
        None => return Progress::Pending { succeeded: 0, expected },
    };
    for c in status.conditions.clone().unwrap_or_default() {
        if c.type_ == "Failed" && c.status == "True" {
            let reason = c
                .message
                .or(c.reason)
                .unwrap_or_else(|| "job reported a Failed condition".to_string());
            return Progress::Failed(reason);
        }
    }
    let succeeded = status.succeeded.unwrap_or(0);
    if succeeded == expected {
        Progress::Done
    } else {
        Progress::Pending { succeeded, expected }
    }
}

/// Generate a unique job name for a copy out of `source`
pub fn job_name(source: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let prefix = "pvmigrate-";
    let room = MAX_NAME_LEN - prefix.len() - 1 - 8;
    // claim names may contain dots, job names may not
    let src: String = source.chars().take(room).map(|c| if c == '.' { '-' } else { c }).collect();
    format!("{}{}-{}", prefix, src.trim_end_matches('-'), &id[..8])
}

/// Cut a claim name down to a valid label value
///
/// The full name is kept in the `pvmigrate.io/source` annotation.
pub fn label_value(name: &str) -> String {
    let cut: String = name.chars().take(MAX_NAME_LEN).collect();
    cut.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string()
}

fn labels(source: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), "pvmigrate".to_string());
    labels.insert(SOURCE_ANNOTATION.to_string(), label_value(source));
    labels
}

fn annotations(source: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(SOURCE_ANNOTATION.to_string(), source.to_string());
    annotations
}

fn claim_volume(name: &str, claim: &str, read_only: bool) -> Volume {
    Volume {
        name: name.into(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.into(),
            read_only: Some(read_only),
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

/// The Job description for copying `source` into `dest`
pub fn job_spec(name: &str, namespace: &str, source: &str, dest: &str, image: &str) -> Job {
    let labels = labels(source);
    Job {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            annotations: Some(annotations(source)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations(source)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".into()),
                    volumes: Some(vec![
                        claim_volume("source", source, true),
                        claim_volume("dest", dest, false),
                    ]),
                    containers: vec![Container {
                        name: CONTAINER_NAME.into(),
                        image: Some(image.into()),
                        volume_mounts: Some(vec![
                            mount("source", SOURCE_MOUNT, true),
                            mount("dest", DEST_MOUNT, false),
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Controller for copy jobs
///
/// Knows nothing about migration policy, only how to move bytes between two claims.
pub struct MoverJob {
    platform: Arc<dyn Platform>,
    image: String,
    interval: Duration,
}

impl MoverJob {
    pub fn new(platform: Arc<dyn Platform>, image: &str) -> Self {
        MoverJob {
            platform,
            image: image.into(),
            interval: crate::config::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the status poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Submit a new copy job
    pub async fn start(&self, name: &str, namespace: &str, source: &str, dest: &str) -> Result<MoverHandle> {
        let mut handle = MoverHandle::new(name, namespace, source, dest);
        self.submit(&mut handle).await?;
        Ok(handle)
    }

    /// Submit the job described by a Created handle
    ///
    /// The handle stays Created if the platform rejects the job.
    pub async fn submit(&self, handle: &mut MoverHandle) -> Result<()> {
        if handle.state != JobState::Created {
            bail!("copy job {} was already submitted ({:?})", handle.name, handle.state);
        }
        if handle.namespace != self.platform.namespace() {
            bail!(
                "copy job namespace {} does not match client namespace {}",
                handle.namespace,
                self.platform.namespace()
            );
        }
        let job = job_spec(&handle.name, &handle.namespace, &handle.source, &handle.dest, &self.image);
        debug!("Submitting copy job {} ({} -> {})", handle.name, handle.source, handle.dest);
        let created = self
            .platform
            .create_job(&job)
            .await
            .map_err(|e| ErrorKind::SubmissionError(handle.name.clone(), e.to_string()))?;
        handle.containers = created
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .map(|ps| ps.containers.len() as i32)
            .unwrap_or(1);
        handle.state = JobState::Running;
        info!("Started copy job {} ({} -> {})", handle.name, handle.source, handle.dest);
        Ok(())
    }

    /// Poll until the job succeeds, fails, or `timeout` passes
    ///
    /// A failed status read is retried on the next tick. A job that vanished,
    /// reports a Failed condition, or can no longer be read (401/403) ends the wait immediately.
    /// Success triggers cleanup; failure and timeout leave the job in place.
    pub async fn wait(&self, handle: &mut MoverHandle, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let mut polls = 0;
        loop {
            polls += 1;
            trace!("poll iteration {}", polls);
            match self.platform.get_job(&handle.name).await {
                Ok(job) => match progress(&job, handle.containers) {
                    Progress::Done => {
                        info!("Copy job {} completed", handle.name);
                        handle.state = JobState::Succeeded;
                        break;
                    }
                    Progress::Pending { succeeded, expected } => {
                        debug!("Waiting for job {} to finish ({}/{})", handle.name, succeeded, expected);
                    }
                    Progress::Failed(reason) => {
                        handle.state = JobState::Failed;
                        return Err(ErrorKind::JobFailed(handle.name.clone(), reason).into());
                    }
                },
                Err(e) => {
                    if is_not_found(&e) {
                        handle.state = JobState::Failed;
                        return Err(ErrorKind::JobFailed(handle.name.clone(), "job no longer exists".into()).into());
                    }
                    if is_forbidden(&e) {
                        handle.state = JobState::Failed;
                        let reason = format!("lost access to job status: {}", e);
                        return Err(ErrorKind::JobFailed(handle.name.clone(), reason).into());
                    }
                    warn!("Ignoring failure to read status of job {}: {}", handle.name, e);
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!("Leaving job {} in place for inspection", handle.name);
                handle.state = JobState::Failed;
                return Err(ErrorKind::Timeout(handle.name.clone(), timeout.as_secs()).into());
            }
            Delay::new(std::cmp::min(self.interval, timeout - elapsed)).await;
        }
        debug!("Cleaning up successful job {}", handle.name);
        self.cleanup(handle).await
    }

    /// Delete the job and any pods it left
    ///
    /// Pod deletion is best-effort. A job that is already gone counts as cleaned.
    pub async fn cleanup(&self, handle: &mut MoverHandle) -> Result<()> {
        match self.platform.delete_job(&handle.name).await {
            Ok(()) => debug!("Deleted job {}", handle.name),
            Err(e) => {
                if !is_not_found(&e) {
                    warn!("Failed to delete job {}: {}", handle.name, e);
                    return Err(e);
                }
                debug!("Job {} already deleted", handle.name);
            }
        }
        let selector = format!("job-name={}", handle.name);
        match self.platform.list_pods(&selector).await {
            Ok(pods) => {
                for pod in pods {
                    let name = pod.metadata.name.unwrap_or_default();
                    match self.platform.delete_pod(&name).await {
                        Ok(()) => debug!("Deleted pod {}", name),
                        Err(e) => {
                            if !is_not_found(&e) {
                                warn!("Failed to delete pod {}: {}", name, e);
                            }
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to list pods for job {}: {}", handle.name, e),
        }
        handle.state = JobState::Cleaned;
        Ok(())
    }
}

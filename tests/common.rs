#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobCondition, JobStatus},
        core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, Pod},
        storage::v1::StorageClass,
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::error::ErrorResponse;
use maplit::btreemap;
use pvmigrate::{kubeapi::classify, Platform, Result, Settings};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Everything the fake cluster knows, plus knobs for scripting job progress
#[derive(Default)]
pub struct State {
    pub claims: BTreeMap<String, PersistentVolumeClaim>,
    pub classes: BTreeMap<String, StorageClass>,
    pub jobs: BTreeMap<String, Job>,
    pub pods: BTreeMap<String, Pod>,

    /// Job status reads that fail with a 503 before answering
    pub flaky_reads: usize,
    /// Job status reads are forbidden
    pub forbid_reads: bool,
    /// Number of status polls before a job reports success (None: never)
    pub succeed_after: Option<usize>,
    /// Jobs report a Failed condition when polled
    pub fail_jobs: bool,
    /// Job creation is forbidden
    pub reject_jobs: bool,
    /// Pod deletion fails with a 500
    pub fail_pod_deletes: bool,

    pub polls: usize,
    pub created_jobs: Vec<String>,
    pub resized: Vec<(String, String)>,
    pub deleted_jobs: Vec<String>,
    pub deleted_pods: Vec<String>,
}

/// In-memory stand-in for a namespace of a cluster
pub struct FakePlatform {
    ns: String,
    pub state: Mutex<State>,
}

fn api_err(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("fake error {}", code),
        reason: "Fake".into(),
        code,
    })
}

impl FakePlatform {
    pub fn new(ns: &str) -> Self {
        FakePlatform {
            ns: ns.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_claim(self, pvc: PersistentVolumeClaim) -> Self {
        let name = pvc.metadata.name.clone().unwrap();
        self.state.lock().unwrap().claims.insert(name, pvc);
        self
    }

    pub fn with_class(self, sc: StorageClass) -> Self {
        let name = sc.metadata.name.clone().unwrap();
        self.state.lock().unwrap().classes.insert(name, sc);
        self
    }

    pub fn into_arc(self) -> Arc<FakePlatform> {
        Arc::new(self)
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn namespace(&self) -> &str {
        &self.ns
    }

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim> {
        let st = self.state.lock().unwrap();
        match st.claims.get(name) {
            Some(pvc) => Ok(pvc.clone()),
            None => Err(classify(api_err(404), "PersistentVolumeClaim", name)),
        }
    }

    async fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        let mut st = self.state.lock().unwrap();
        if st.claims.contains_key(&name) {
            return Err(classify(api_err(409), "PersistentVolumeClaim", &name));
        }
        let mut created = pvc.clone();
        created.metadata.namespace = Some(self.ns.clone());
        created.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".into()),
            ..Default::default()
        });
        st.claims.insert(name, created.clone());
        Ok(created)
    }

    async fn resize_claim(&self, name: &str, size: &str) -> Result<PersistentVolumeClaim> {
        let mut st = self.state.lock().unwrap();
        st.resized.push((name.into(), size.into()));
        match st.claims.get_mut(name) {
            Some(pvc) => {
                pvc.spec
                    .get_or_insert_with(Default::default)
                    .resources
                    .get_or_insert_with(Default::default)
                    .requests
                    .get_or_insert_with(Default::default)
                    .insert("storage".into(), Quantity(size.into()));
                Ok(pvc.clone())
            }
            None => Err(classify(api_err(404), "PersistentVolumeClaim", name)),
        }
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass> {
        let st = self.state.lock().unwrap();
        match st.classes.get(name) {
            Some(sc) => Ok(sc.clone()),
            None => Err(classify(api_err(404), "StorageClass", name)),
        }
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut st = self.state.lock().unwrap();
        if st.reject_jobs {
            return Err(classify(api_err(403), "Job", &name));
        }
        if st.jobs.contains_key(&name) {
            return Err(classify(api_err(409), "Job", &name));
        }
        st.created_jobs.push(name.clone());
        st.jobs.insert(name.clone(), job.clone());
        // the job controller would start a pod for it
        let mut pod = Pod::default();
        pod.metadata.name = Some(format!("{}-x7k2p", name));
        pod.metadata.labels = Some(btreemap! {
            "job-name".to_string() => name.clone(),
        });
        st.pods.insert(format!("{}-x7k2p", name), pod);
        Ok(job.clone())
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        let mut st = self.state.lock().unwrap();
        st.polls += 1;
        if st.forbid_reads {
            return Err(classify(api_err(403), "Job", name));
        }
        if st.flaky_reads > 0 {
            st.flaky_reads -= 1;
            return Err(classify(api_err(503), "Job", name));
        }
        let polls = st.polls;
        let succeed = st.succeed_after.map(|n| polls >= n).unwrap_or(false);
        let fail = st.fail_jobs;
        let job = match st.jobs.get_mut(name) {
            Some(j) => j,
            None => return Err(classify(api_err(404), "Job", name)),
        };
        let containers = job
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .map(|ps| ps.containers.len() as i32)
            .unwrap_or(0);
        if fail {
            job.status = Some(JobStatus {
                failed: Some(6),
                conditions: Some(vec![JobCondition {
                    type_: "Failed".into(),
                    status: "True".into(),
                    reason: Some("BackoffLimitExceeded".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            });
        } else if succeed {
            job.status = Some(JobStatus {
                succeeded: Some(containers),
                ..Default::default()
            });
        } else {
            job.status = Some(JobStatus {
                active: Some(1),
                ..Default::default()
            });
        }
        Ok(job.clone())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        match st.jobs.remove(name) {
            Some(_) => {
                st.deleted_jobs.push(name.into());
                Ok(())
            }
            None => Err(classify(api_err(404), "Job", name)),
        }
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let st = self.state.lock().unwrap();
        let mut parts = selector.splitn(2, '=');
        let key = parts.next().unwrap_or_default().to_string();
        let val = parts.next().unwrap_or_default().to_string();
        Ok(st
            .pods
            .values()
            .filter(|p| {
                p.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(&key))
                    .map(|v| *v == val)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_pod_deletes {
            return Err(classify(api_err(500), "Pod", name));
        }
        match st.pods.remove(name) {
            Some(_) => {
                st.deleted_pods.push(name.into());
                Ok(())
            }
            None => Err(classify(api_err(404), "Pod", name)),
        }
    }
}

/// A bound claim in namespace dev
pub fn pvc(name: &str, class: &str, size: &str) -> PersistentVolumeClaim {
    let mut pvc = PersistentVolumeClaim::default();
    pvc.metadata.name = Some(name.into());
    pvc.metadata.namespace = Some("dev".into());
    let mut spec = PersistentVolumeClaimSpec::default();
    spec.storage_class_name = Some(class.into());
    spec.access_modes = Some(vec!["ReadWriteOnce".into()]);
    spec.volume_name = Some(format!("pvc-{}", name));
    spec.resources
        .get_or_insert_with(Default::default)
        .requests
        .get_or_insert_with(Default::default)
        .insert("storage".into(), Quantity(size.into()));
    pvc.spec = Some(spec);
    pvc.status = Some(PersistentVolumeClaimStatus {
        phase: Some("Bound".into()),
        ..Default::default()
    });
    pvc
}

pub fn storage_class(name: &str, expandable: bool) -> StorageClass {
    let mut sc = StorageClass::default();
    sc.metadata.name = Some(name.into());
    sc.provisioner = "kubernetes.io/fake".into();
    sc.allow_volume_expansion = Some(expandable);
    sc
}

/// Fast polling, short timeouts
pub fn settings() -> Settings {
    Settings {
        image: "mover:test".into(),
        timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

/// The cluster most tests start from
///
/// `standard` allows expansion, `fast` does not, `legacy` does not exist.
pub fn cluster() -> FakePlatform {
    FakePlatform::new("dev")
        .with_class(storage_class("standard", true))
        .with_class(storage_class("fast", false))
        .with_claim(pvc("pv-a", "standard", "10Gi"))
        .with_claim(pvc("pv-b", "standard", "10Gi"))
        .with_claim(pvc("pv-c", "fast", "10Gi"))
        .with_claim(pvc("pv-old", "legacy", "5Gi"))
}

#[test]
fn fake_cluster_setup() {
    let fake = cluster();
    let st = fake.state.lock().unwrap();
    assert_eq!(st.claims.len(), 4);
    assert_eq!(st.classes.len(), 2);
    assert!(st.jobs.is_empty());
}

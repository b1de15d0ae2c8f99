use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{PersistentVolumeClaim, Pod},
    storage::v1::StorageClass,
};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client,
};

/// Map a kube error onto our taxonomy
///
/// 404 and 409 get their own kinds so callers can tell them apart from
/// connectivity, auth or quota failures.
pub fn classify(e: kube::Error, kind: &str, name: &str) -> Error {
    match &e {
        kube::Error::Api(resp) if resp.code == 404 => ErrorKind::NotFound(kind.into(), name.into()).into(),
        kube::Error::Api(resp) if resp.code == 409 => ErrorKind::Conflict(kind.into(), name.into()).into(),
        _ => ErrorKind::KubeError(e).into(),
    }
}

/// True for errors that mean the object is gone
pub fn is_not_found(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound(..))
}

/// True for rejected credentials or permissions
///
/// Retrying these will not help.
pub fn is_forbidden(e: &Error) -> bool {
    match e.kind() {
        ErrorKind::KubeError(kube::Error::Api(resp)) => resp.code == 401 || resp.code == 403,
        _ => false,
    }
}

/// Everything the migration core needs from the cluster
///
/// All calls are scoped to one namespace.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Namespace all calls operate in
    fn namespace(&self) -> &str;

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim>;
    async fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;
    /// Set `spec.resources.requests.storage` and nothing else
    async fn resize_claim(&self, name: &str, size: &str) -> Result<PersistentVolumeClaim>;
    async fn get_storage_class(&self, name: &str) -> Result<StorageClass>;

    async fn create_job(&self, job: &Job) -> Result<Job>;
    async fn get_job(&self, name: &str) -> Result<Job>;
    async fn delete_job(&self, name: &str) -> Result<()>;

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>>;
    async fn delete_pod(&self, name: &str) -> Result<()>;
}

/// Interface for dealing with volume claims and copy jobs via kube::Api
pub struct VolumeKube {
    client: Client,
    namespace: String,
}

impl VolumeKube {
    pub fn new(client: Client, ns: &str) -> Self {
        VolumeKube {
            client,
            namespace: ns.to_string(),
        }
    }

    fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Platform for VolumeKube {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim> {
        let pvc = self.pvcs().get(name).await.map_err(|e| classify(e, "PersistentVolumeClaim", name))?;
        Ok(pvc)
    }

    async fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        let pp = PostParams::default();
        let o = self
            .pvcs()
            .create(&pp, pvc)
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", &name))?;
        info!("Created PersistentVolumeClaim {}/{}", self.namespace, name);
        Ok(o)
    }

    async fn resize_claim(&self, name: &str, size: &str) -> Result<PersistentVolumeClaim> {
        let data = json!({
            "spec": {
                "resources": {
                    "requests": { "storage": size }
                }
            }
        });
        let pp = PatchParams::default();
        let o = self
            .pvcs()
            .patch(name, &pp, &Patch::Merge(&data))
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", name))?;
        debug!("Patched {} storage request to {}", name, size);
        Ok(o)
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass> {
        // storage classes are cluster scoped
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let sc = api.get(name).await.map_err(|e| classify(e, "StorageClass", name))?;
        Ok(sc)
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let name = job.metadata.name.clone().unwrap_or_default();
        let pp = PostParams::default();
        let o = self.jobs().create(&pp, job).await.map_err(|e| classify(e, "Job", &name))?;
        Ok(o)
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        let o = self.jobs().get(name).await.map_err(|e| classify(e, "Job", name))?;
        Ok(o)
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        // background propagation lets the job controller reap pods too
        let dp = DeleteParams::background();
        self.jobs().delete(name, &dp).await.map_err(|e| classify(e, "Job", name))?;
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let lp = ListParams::default().labels(selector);
        let pods = self.pods().list(&lp).await.map_err(|e| classify(e, "Pod", selector))?;
        Ok(pods.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let dp = DeleteParams::default();
        self.pods().delete(name, &dp).await.map_err(|e| classify(e, "Pod", name))?;
        Ok(())
    }
}

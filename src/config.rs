use super::{ErrorKind, Platform, Result, VolumeKube};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use std::{convert::TryFrom, env, path::PathBuf, sync::Arc, time::Duration};

/// Image used by the copy job unless overridden
pub const DEFAULT_MOVER_IMAGE: &str = "ghcr.io/beryju/korb-mover:latest";
/// Seconds to wait for a copy job unless overridden
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// Interval between copy job status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Runtime settings for a migration
///
/// Built from CLI args in main, with evar fallbacks from `Settings::from_env`.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Explicit kubeconfig path (otherwise inferred)
    pub kubeconfig: Option<PathBuf>,
    /// Namespace override (otherwise the context's default namespace)
    pub namespace: Option<String>,
    /// Image that copies /source to /dest
    pub image: String,
    /// How long a copy job may run before we give up on it
    pub timeout: Duration,
    /// How often the copy job is polled
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            kubeconfig: None,
            namespace: None,
            image: DEFAULT_MOVER_IMAGE.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Settings {
    /// Defaults overridden by PVMIGRATE_MOVER_IMAGE and PVMIGRATE_TIMEOUT
    pub fn from_env() -> Result<Self> {
        let mut s = Settings::default();
        if let Ok(img) = env::var("PVMIGRATE_MOVER_IMAGE") {
            s.image = img;
        }
        if let Ok(secs) = env::var("PVMIGRATE_TIMEOUT") {
            s.timeout = Duration::from_secs(secs.trim().parse()?);
        }
        Ok(s)
    }

    /// Client creator
    ///
    /// Uses an explicit kubeconfig if given, otherwise infers (KUBECONFIG, in-cluster, ~/.kube/config).
    /// Returns the client alongside the namespace it should operate in.
    pub async fn client(&self) -> Result<(Client, String)> {
        let config = if let Some(pth) = &self.kubeconfig {
            debug!("Loading kubeconfig from {}", pth.display());
            let kc = Kubeconfig::read_from(pth)
                .map_err(|e| ErrorKind::KubeConfig(format!("{}: {}", pth.display(), e)))?;
            kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| ErrorKind::KubeConfig(e.to_string()))?
        } else {
            kube::Config::infer()
                .await
                .map_err(|e| ErrorKind::KubeConfig(e.to_string()))?
        };
        let ns = match &self.namespace {
            Some(ns) => ns.clone(),
            None => config.default_namespace.clone(),
        };
        debug!("Using namespace {}", ns);
        let client = Client::try_from(config).map_err(|e| ErrorKind::KubeConfig(e.to_string()))?;
        Ok((client, ns))
    }

    /// Shared platform handle for the orchestrator and strategies
    pub async fn platform(&self) -> Result<Arc<dyn Platform>> {
        let (client, ns) = self.client().await?;
        Ok(Arc::new(VolumeKube::new(client, &ns)))
    }
}

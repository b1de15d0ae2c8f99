use super::{changes_anything, expandable_in_place, Strategy};
use crate::{
    mover::{self, MoverJob},
    volume::copied_from,
    DestinationRequest, ErrorKind, Platform, Result, Settings, VolumeClaim,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::{sync::Arc, time::Duration};

/// Copy the data into a freshly created claim using a transient job
pub struct CopyStrategy {
    platform: Arc<dyn Platform>,
    image: String,
    timeout: Duration,
    interval: Duration,
}

impl CopyStrategy {
    pub fn new(platform: Arc<dyn Platform>, settings: &Settings) -> Self {
        CopyStrategy {
            platform,
            image: settings.image.clone(),
            timeout: settings.timeout,
            interval: settings.poll_interval,
        }
    }

    /// Create the destination, or adopt one a previous run of ours created
    async fn ensure_destination(&self, source: &VolumeClaim, template: &PersistentVolumeClaim) -> Result<String> {
        let dest = template.metadata.name.clone().unwrap_or_default();
        match self.platform.create_claim(template).await {
            Ok(_) => Ok(dest),
            Err(e) => {
                let conflict = matches!(e.kind(), ErrorKind::Conflict(..));
                if conflict {
                    let existing = self.platform.get_claim(&dest).await?;
                    if copied_from(&existing) == Some(source.name.as_str()) {
                        warn!("Reusing destination {} from an earlier attempt", dest);
                        return Ok(dest);
                    }
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Strategy for CopyStrategy {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn description(&self) -> &'static str {
        "Create a new claim and copy the data across with a job (storage class change, or a resize the class cannot do online)"
    }

    fn is_applicable(&self, source: &VolumeClaim, req: &DestinationRequest) -> bool {
        changes_anything(source, req) && !expandable_in_place(source, req)
    }

    async fn migrate(&self, source: &VolumeClaim, template: &PersistentVolumeClaim) -> Result<()> {
        let dest = self.ensure_destination(source, template).await?;
        let job = MoverJob::new(self.platform.clone(), &self.image).poll_interval(self.interval);
        let name = mover::job_name(&source.name);
        let mut handle = job
            .start(&name, self.platform.namespace(), &source.name, &dest)
            .await?;
        info!(
            "Waiting up to {}s for {} to be copied into {}",
            self.timeout.as_secs(),
            source.name,
            dest
        );
        job.wait(&mut handle, self.timeout).await?;
        info!("Copied {} into {}", source.name, dest);
        Ok(())
    }
}

use super::{expandable_in_place, requested_size, Strategy};
use crate::{DestinationRequest, ErrorKind, Platform, Result, VolumeClaim};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::sync::Arc;

/// Grow a claim by patching its storage request
///
/// Relies on the storage class allowing volume expansion. No data moves.
pub struct InPlaceStrategy {
    platform: Arc<dyn Platform>,
}

impl InPlaceStrategy {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        InPlaceStrategy { platform }
    }
}

#[async_trait]
impl Strategy for InPlaceStrategy {
    fn name(&self) -> &'static str {
        "in-place"
    }

    fn description(&self) -> &'static str {
        "Expand the existing claim in place (same storage class, larger size, class allows expansion)"
    }

    fn is_applicable(&self, source: &VolumeClaim, req: &DestinationRequest) -> bool {
        expandable_in_place(source, req)
    }

    async fn migrate(&self, source: &VolumeClaim, template: &PersistentVolumeClaim) -> Result<()> {
        let size = match requested_size(template) {
            Some(s) => s,
            None => {
                return Err(ErrorKind::InvalidClaim(
                    template.metadata.name.clone().unwrap_or_default(),
                    "template has no storage request".into(),
                )
                .into())
            }
        };
        info!("Resizing {} from {} to {}", source.name, source.size, size);
        self.platform.resize_claim(&source.name, &size).await?;
        // the filesystem grows once the volume is (re)attached, depending on the driver
        info!("Requested expansion of {}", source.name);
        Ok(())
    }
}

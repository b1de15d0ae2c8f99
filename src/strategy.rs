use crate::{DestinationRequest, Result, VolumeClaim};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;

mod copy;
pub use copy::CopyStrategy;
mod inplace;
pub use inplace::InPlaceStrategy;

/// A migration policy
///
/// The migrator evaluates `is_applicable` for every registered strategy and
/// only calls `migrate` when exactly one of them matches.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short identifier used in logs and errors
    fn name(&self) -> &'static str;

    /// Human readable explanation of what the strategy does
    fn description(&self) -> &'static str;

    /// Whether this strategy can take `source` to `req`
    ///
    /// Must be pure; it is evaluated without touching the cluster.
    fn is_applicable(&self, source: &VolumeClaim, req: &DestinationRequest) -> bool;

    /// Perform the migration
    async fn migrate(&self, source: &VolumeClaim, template: &PersistentVolumeClaim) -> Result<()>;
}

/// Same class, larger size, and a class that allows expansion
pub fn expandable_in_place(source: &VolumeClaim, req: &DestinationRequest) -> bool {
    let same_class = req.class_for(source) == source.storage_class.as_deref();
    let grows = match req.bytes_for(source) {
        Ok(b) => b > source.bytes,
        Err(_) => false,
    };
    same_class && grows && source.expandable
}

/// Whether the request asks for anything at all
pub fn changes_anything(source: &VolumeClaim, req: &DestinationRequest) -> bool {
    let class_changes = req.class_for(source) != source.storage_class.as_deref();
    let size_changes = match req.bytes_for(source) {
        Ok(b) => (b - source.bytes).abs() > f64::EPSILON,
        Err(_) => false,
    };
    class_changes || size_changes
}

/// The requested storage quantity in a destination template
pub(crate) fn requested_size(template: &PersistentVolumeClaim) -> Option<String> {
    template
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.clone())
}

#[cfg(test)]
mod tests {
    use super::{changes_anything, expandable_in_place, requested_size};
    use crate::{
        volume::{destination_template, parse_storage},
        DestinationRequest, VolumeClaim,
    };

    fn claim(class: &str, size: &str, expandable: bool) -> VolumeClaim {
        VolumeClaim {
            name: "pv-a".into(),
            namespace: "dev".into(),
            size: size.into(),
            bytes: parse_storage(size).unwrap(),
            storage_class: Some(class.into()),
            access_modes: vec!["ReadWriteOnce".into()],
            volume_name: Some("pvc-1234".into()),
            phase: Some("Bound".into()),
            expandable,
        }
    }

    fn req(class: Option<&str>, size: Option<&str>) -> DestinationRequest {
        DestinationRequest {
            storage_class: class.map(String::from),
            size: size.map(String::from),
            name: None,
        }
    }

    #[test]
    fn in_place_predicate() {
        let src = claim("standard", "10Gi", true);
        assert!(expandable_in_place(&src, &req(Some("standard"), Some("20Gi"))));
        assert!(expandable_in_place(&src, &req(None, Some("20Gi"))));
        assert!(!expandable_in_place(&src, &req(Some("fast"), Some("20Gi"))));
        assert!(!expandable_in_place(&src, &req(None, Some("5Gi"))));
        assert!(!expandable_in_place(&src, &req(None, Some("10Gi"))));
        assert!(!expandable_in_place(&src, &req(None, Some("bogus"))));

        let fixed = claim("standard", "10Gi", false);
        assert!(!expandable_in_place(&fixed, &req(None, Some("20Gi"))));
    }

    #[test]
    fn change_detection() {
        let src = claim("standard", "10Gi", true);
        assert!(!changes_anything(&src, &req(None, None)));
        assert!(!changes_anything(&src, &req(Some("standard"), Some("10Gi"))));
        // same quantity, different notation
        assert!(!changes_anything(&src, &req(None, Some("10240Mi"))));
        assert!(changes_anything(&src, &req(Some("fast"), None)));
        assert!(changes_anything(&src, &req(None, Some("5Gi"))));
    }

    #[test]
    fn template_size() {
        let src = claim("standard", "10Gi", true);
        let tpl = destination_template(&src, &req(None, Some("20Gi")));
        assert_eq!(requested_size(&tpl).as_deref(), Some("20Gi"));
    }
}

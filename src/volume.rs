use crate::{Error, ErrorKind, Result};
use k8s_openapi::{
    api::core::v1::PersistentVolumeClaim,
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use std::{collections::BTreeMap, convert::TryFrom};

/// Annotation put on destination claims naming the claim they were copied from
pub const SOURCE_ANNOTATION: &str = "pvmigrate.io/source";

/// The observed state of a volume claim that strategies reason about
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeClaim {
    pub name: String,
    pub namespace: String,
    /// Requested storage quantity as written in the claim
    pub size: String,
    /// Normalised size in bytes
    pub bytes: f64,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
    /// Name of the bound PersistentVolume
    pub volume_name: Option<String>,
    pub phase: Option<String>,
    /// Whether the storage class allows online expansion
    ///
    /// Not part of the claim object; filled in from the StorageClass by the migrator.
    pub expandable: bool,
}

impl TryFrom<PersistentVolumeClaim> for VolumeClaim {
    type Error = Error;

    /// Helper to convert the openapi claim to the useful info
    fn try_from(pvc: PersistentVolumeClaim) -> Result<VolumeClaim> {
        let name = match pvc.metadata.name {
            Some(n) => n,
            None => bail!("missing metadata.name on claim"),
        };
        let namespace = pvc.metadata.namespace.unwrap_or_default();
        let spec = match pvc.spec {
            Some(s) => s,
            None => return Err(ErrorKind::InvalidClaim(name, "missing spec".into()).into()),
        };
        let requested = spec
            .resources
            .and_then(|r| r.requests)
            .and_then(|mut r| r.remove("storage"));
        let size = match requested {
            Some(q) => q.0,
            None => {
                return Err(ErrorKind::InvalidClaim(name, "missing spec.resources.requests.storage".into()).into())
            }
        };
        let bytes = parse_storage(&size)?;
        Ok(VolumeClaim {
            name,
            namespace,
            size,
            bytes,
            storage_class: spec.storage_class_name,
            access_modes: spec.access_modes.unwrap_or_default(),
            volume_name: spec.volume_name,
            phase: pvc.status.and_then(|s| s.phase),
            expandable: false,
        })
    }
}

/// What the caller wants the migrated volume to look like
///
/// Unset fields keep the source's value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DestinationRequest {
    pub storage_class: Option<String>,
    pub size: Option<String>,
    /// Destination claim name (defaults to `<source>-dest`)
    pub name: Option<String>,
}

impl DestinationRequest {
    /// The storage class the destination ends up with
    pub fn class_for<'a>(&'a self, source: &'a VolumeClaim) -> Option<&'a str> {
        self.storage_class.as_deref().or_else(|| source.storage_class.as_deref())
    }

    /// The size the destination ends up with
    pub fn size_for<'a>(&'a self, source: &'a VolumeClaim) -> &'a str {
        self.size.as_deref().unwrap_or(&source.size)
    }

    /// Normalised destination size in bytes
    pub fn bytes_for(&self, source: &VolumeClaim) -> Result<f64> {
        match &self.size {
            Some(s) => parse_storage(s),
            None => Ok(source.bytes),
        }
    }

    /// Destination claim name
    pub fn name_for(&self, source: &VolumeClaim) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("{}-dest", source.name),
        }
    }

    /// Check the requested size before anything is compared against it
    pub fn verify(&self) -> Result<()> {
        if let Some(s) = &self.size {
            let b = parse_storage(s)?;
            if b <= 0.0 {
                bail!("Requested size {} must be positive", s);
            }
        }
        Ok(())
    }
}

/// Build the claim to create for the destination
///
/// Copies access modes and namespace from the source, applies the requested class and size.
pub fn destination_template(source: &VolumeClaim, req: &DestinationRequest) -> PersistentVolumeClaim {
    let mut annotations = BTreeMap::new();
    annotations.insert(SOURCE_ANNOTATION.to_string(), source.name.clone());

    let mut pvc = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(req.name_for(source)),
            namespace: Some(source.namespace.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    };
    let spec = pvc.spec.get_or_insert_with(Default::default);
    spec.access_modes = Some(source.access_modes.clone());
    spec.storage_class_name = req.class_for(source).map(String::from);
    spec.resources
        .get_or_insert_with(Default::default)
        .requests
        .get_or_insert_with(Default::default)
        .insert("storage".into(), Quantity(req.size_for(source).to_string()));
    pvc
}

/// Which claim a destination was created for (if it was created by us)
pub fn copied_from(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SOURCE_ANNOTATION))
        .map(String::as_str)
}

/// Parse a kubernetes storage quantity into bytes
///
/// Accepts binary (`Ki`..`Ei`) and decimal (`m`, `k`..`E`) suffixes as well as
/// decimal exponents (`1e9`, `5E+3`).
pub fn parse_storage(s: &str) -> Result<f64> {
    let s = s.trim();
    let digits = s.chars().take_while(|ch| ch.is_digit(10) || *ch == '.').collect::<String>();
    let unit = s.chars().skip_while(|ch| ch.is_digit(10) || *ch == '.').collect::<String>();
    if digits.is_empty() {
        return Err(ErrorKind::InvalidQuantity(s.into()).into());
    }
    let mut res: f64 = digits.parse()?;
    trace!("Parsed {} ({})", digits, unit);
    if unit != "Ei" && unit.len() > 1 && (unit.starts_with('e') || unit.starts_with('E')) {
        let exp: i32 = unit[1..]
            .parse()
            .map_err(|_| Error::from(ErrorKind::InvalidQuantity(s.into())))?;
        res *= 10f64.powi(exp);
        trace!("Returned {} bytes", res);
        return Ok(res);
    }
    let factor = match unit.as_str() {
        "" => 1.0,
        "m" => 0.001,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Pi" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Ei" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "k" => 1000.0,
        "M" => 1000.0 * 1000.0,
        "G" => 1000.0 * 1000.0 * 1000.0,
        "T" => 1000.0 * 1000.0 * 1000.0 * 1000.0,
        "P" => 1000.0 * 1000.0 * 1000.0 * 1000.0 * 1000.0,
        "E" => 1000.0 * 1000.0 * 1000.0 * 1000.0 * 1000.0 * 1000.0,
        _ => return Err(ErrorKind::InvalidQuantity(s.into()).into()),
    };
    res *= factor;
    trace!("Returned {} bytes", res);
    Ok(res)
}

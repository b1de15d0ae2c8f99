use crate::{
    kubeapi::is_not_found,
    strategy::{CopyStrategy, InPlaceStrategy, Strategy},
    volume::destination_template,
    DestinationRequest, ErrorKind, Platform, Result, Settings, VolumeClaim,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::{convert::TryFrom, fmt, sync::Arc};

/// Result of a migration that got as far as running a strategy
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Migrated { strategy: String },
    /// The strategy ran and failed. It is not retried.
    Failed { strategy: String, reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Migrated { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Migrated { strategy } => write!(f, "migrated using the {} strategy", strategy),
            Outcome::Failed { strategy, reason } => write!(f, "{} strategy failed: {}", strategy, reason),
        }
    }
}

/// Strategy selection and execution for one namespace
pub struct Migrator {
    platform: Arc<dyn Platform>,
    strategies: Vec<Box<dyn Strategy>>,
    force: bool,
}

impl Migrator {
    /// Migrator with the default strategies, in order of preference
    pub fn new(platform: Arc<dyn Platform>, settings: &Settings) -> Self {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(InPlaceStrategy::new(platform.clone())),
            Box::new(CopyStrategy::new(platform.clone(), settings)),
        ];
        Self::with_strategies(platform, strategies)
    }

    /// Migrator with an explicit strategy set
    ///
    /// Registration order is the preference order used by `force`.
    pub fn with_strategies(platform: Arc<dyn Platform>, strategies: Vec<Box<dyn Strategy>>) -> Self {
        Migrator {
            platform,
            strategies,
            force: false,
        }
    }

    /// Allow picking the first of several compatible strategies
    ///
    /// Never makes an unsupported migration run.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Fetch the source claim along with its storage class' expansion support
    pub async fn source(&self, name: &str) -> Result<VolumeClaim> {
        let pvc = self.platform.get_claim(name).await?;
        let mut vc = VolumeClaim::try_from(pvc)?;
        if vc.namespace.is_empty() {
            vc.namespace = self.platform.namespace().to_string();
        }
        if let Some(class) = vc.storage_class.clone() {
            vc.expandable = match self.platform.get_storage_class(&class).await {
                Ok(sc) => sc.allow_volume_expansion.unwrap_or(false),
                Err(e) => {
                    if is_not_found(&e) {
                        debug!("StorageClass {} not found, assuming no expansion support", class);
                    } else {
                        warn!("Could not read StorageClass {}, assuming no expansion support: {}", class, e);
                    }
                    false
                }
            };
        }
        debug!("Source: {:?}", vc);
        Ok(vc)
    }

    /// Find the strategies that can handle this migration
    ///
    /// Returns the source claim and the compatible strategies in registration order.
    pub async fn validate(&self, name: &str, req: &DestinationRequest) -> Result<(VolumeClaim, Vec<&dyn Strategy>)> {
        req.verify()?;
        let source = self.source(name).await?;
        let compatible = self
            .strategies
            .iter()
            .map(|s| &**s)
            .filter(|s| s.is_applicable(&source, req))
            .collect::<Vec<_>>();
        debug!("Compatible strategies:");
        for s in &compatible {
            debug!("{}: {}", s.name(), s.description());
        }
        Ok((source, compatible))
    }

    /// The destination claim a copy would create
    pub fn destination_template(&self, source: &VolumeClaim, req: &DestinationRequest) -> PersistentVolumeClaim {
        destination_template(source, req)
    }

    fn select<'a>(&self, source: &str, compatible: Vec<&'a dyn Strategy>) -> Result<&'a dyn Strategy> {
        match compatible.len() {
            0 => Err(ErrorKind::UnsupportedMigration(source.into()).into()),
            1 => Ok(compatible[0]),
            _ => {
                let names = compatible.iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
                if self.force {
                    warn!("Forcing the {} strategy out of {}", names[0], names.join(", "));
                    Ok(compatible[0])
                } else {
                    Err(ErrorKind::AmbiguousStrategy(source.into(), names).into())
                }
            }
        }
    }

    /// Validate, then run the single compatible strategy
    pub async fn run(&self, name: &str, req: &DestinationRequest) -> Result<Outcome> {
        let (source, compatible) = self.validate(name, req).await?;
        let template = self.destination_template(&source, req);
        let strategy = self.select(&source.name, compatible)?;
        info!("Migrating {} using the {} strategy", source.name, strategy.name());
        let res = strategy.migrate(&source, &template).await;
        let outcome = match res {
            Ok(()) => Outcome::Migrated {
                strategy: strategy.name().into(),
            },
            Err(e) => {
                warn!("Failed to migrate {}: {}", source.name, e);
                for cause in e.iter().skip(1) {
                    warn!("caused by: {}", cause);
                }
                Outcome::Failed {
                    strategy: strategy.name().into(),
                    reason: e.to_string(),
                }
            }
        };
        Ok(outcome)
    }
}

#![recursion_limit = "1024"]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_json;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Float(::std::num::ParseFloatError);
        Int(::std::num::ParseIntError);
        SerdeJ(serde_json::Error);
    }
    errors {
        KubeError(e: kube::Error) {
            description("kubernetes api call failed")
            display("kube api error: {}", e)
        }
        KubeConfig(reason: String) {
            description("could not load a kubernetes client configuration")
            display("failed to load kube config: {}", reason)
        }
        NotFound(kind: String, name: String) {
            description("resource not found")
            display("{} '{}' not found", kind, name)
        }
        Conflict(kind: String, name: String) {
            description("resource already exists")
            display("{} '{}' already exists", kind, name)
        }
        InvalidClaim(name: String, reason: String) {
            description("volume claim is missing required fields")
            display("volume claim '{}' is unusable: {}", name, reason)
        }
        InvalidQuantity(value: String) {
            description("unparseable storage quantity")
            display("invalid storage quantity '{}'", value)
        }
        SubmissionError(job: String, reason: String) {
            description("copy job was rejected")
            display("failed to submit copy job {}: {}", job, reason)
        }
        JobFailed(job: String, reason: String) {
            description("copy job failed")
            display("copy job {} failed: {}", job, reason)
        }
        Timeout(job: String, secs: u64) {
            description("copy job timed out")
            display("copy job {} did not complete within {}s (left in place for inspection)", job, secs)
        }
        AmbiguousStrategy(source: String, candidates: Vec<String>) {
            description("more than one migration strategy applies")
            display("{} migration strategies apply to {}: {} (pass --force to use the first)",
                candidates.len(), source, candidates.join(", "))
        }
        UnsupportedMigration(source: String) {
            description("no migration strategy applies")
            display("no migration strategy applies to {} with the requested destination", source)
        }
    }
}

/// Runtime settings and kube client construction
pub mod config;
pub use config::Settings;

/// A small kubernetes interface over `kube::Api`
pub mod kubeapi;
pub use kubeapi::{Platform, VolumeKube};

/// Volume claim summaries, destination requests and templates
pub mod volume;
pub use volume::{DestinationRequest, VolumeClaim};

/// The transient copy job controller
pub mod mover;
pub use mover::{JobState, MoverHandle, MoverJob};

/// Migration strategies
pub mod strategy;
pub use strategy::Strategy;

/// Strategy selection and execution
pub mod migrator;
pub use migrator::{Migrator, Outcome};

/// Migrate a claim with the default strategy set
///
/// Entry point for the `migrate` subcommand.
pub async fn migrate(
    settings: &Settings,
    source: &str,
    req: &DestinationRequest,
    force: bool,
) -> Result<Outcome> {
    let platform = settings.platform().await?;
    let migrator = Migrator::new(platform, settings).force(force);
    migrator.run(source, req).await
}

/// Describe the strategies that could handle a migration without running any
///
/// Entry point for the `strategies` subcommand.
pub async fn compatible(settings: &Settings, source: &str, req: &DestinationRequest) -> Result<Vec<String>> {
    let platform = settings.platform().await?;
    let migrator = Migrator::new(platform, settings);
    let (vc, strategies) = migrator.validate(source, req).await?;
    debug!("{} is {} of class {:?}", vc.name, vc.size, vc.storage_class);
    Ok(strategies
        .iter()
        .map(|s| format!("{}: {}", s.name(), s.description()))
        .collect())
}

/// Remove a copy job left behind by a failed or timed out migration
///
/// Entry point for the `cleanup` subcommand.
pub async fn cleanup(settings: &Settings, job: &str) -> Result<()> {
    let platform = settings.platform().await?;
    let mut handle = MoverHandle::existing(job, platform.namespace());
    MoverJob::new(platform, &settings.image).cleanup(&mut handle).await?;
    info!("Cleaned up copy job {}", job);
    Ok(())
}

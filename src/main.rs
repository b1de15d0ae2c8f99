#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use pvmigrate::*;
use std::{path::PathBuf, process, time::Duration};

fn print_error_debug(e: &Error) {
    // unwind the error chain
    for e in e.iter().skip(1) {
        warn!("caused by: {}", e);
    }
}

fn destination_args<'a, 'b>(sc: App<'a, 'b>) -> App<'a, 'b> {
    sc.arg(Arg::with_name("source")
            .required(true)
            .help("Name of the PersistentVolumeClaim to migrate"))
        .arg(Arg::with_name("storage-class")
            .short("c")
            .long("storage-class")
            .takes_value(true)
            .help("Storage class of the destination (default: same as source)"))
        .arg(Arg::with_name("size")
            .short("s")
            .long("size")
            .takes_value(true)
            .help("Size of the destination, e.g. 20Gi (default: same as source)"))
}

#[tokio::main]
async fn main() {
    let app = App::new("pvmigrate")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .global_settings(&[AppSettings::ColoredHelp])
        .about("Move persistent volume claims between storage classes and sizes")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .global(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .global(true)
            .help("Adds line numbers to log statements"))
        .arg(Arg::with_name("kubeconfig")
            .long("kubeconfig")
            .takes_value(true)
            .global(true)
            .help("Path to a kubeconfig (default: inferred)"))
        .arg(Arg::with_name("namespace")
            .short("n")
            .long("namespace")
            .takes_value(true)
            .global(true)
            .help("Namespace of the claims (default: from kube context)"))

        .subcommand(destination_args(SubCommand::with_name("migrate"))
            .about("Migrate a claim to a new storage class and/or size")
            .arg(Arg::with_name("name")
                .long("name")
                .takes_value(true)
                .help("Name of the destination claim (default: <source>-dest)"))
            .arg(Arg::with_name("force")
                .short("f")
                .long("force")
                .help("Use the first strategy when several apply"))
            .arg(Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .takes_value(true)
                .help("Seconds to wait for a copy job (default: 3600)"))
            .arg(Arg::with_name("image")
                .long("image")
                .takes_value(true)
                .help("Image used by the copy job")))

        .subcommand(destination_args(SubCommand::with_name("strategies"))
            .about("List the strategies that could perform a migration"))

        .subcommand(SubCommand::with_name("cleanup")
            .about("Delete a copy job (and its pods) left behind by a failed migration")
            .arg(Arg::with_name("job")
                .required(true)
                .help("Name of the copy job")));

    // arg parse
    let args = app.get_matches();
    let name = args.subcommand_name().unwrap_or("pvmigrate").to_string();
    if let Err(e) = run(&args).await {
        error!("{} error: {}", name, e);
        print_error_debug(&e);
        process::exit(1);
    }
    process::exit(0);
}

async fn run(args: &ArgMatches<'_>) -> Result<()> {
    // initialise deps and set log default - always show INFO messages (+1)
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .add_module_path_filter(module_path!())
        .init()
        .map_err(|e| format!("failed to initialise logging: {}", e))?;

    dispatch_commands(args).await
}

/// Settings from evars, overridden by whatever was passed on the command line
fn resolve_settings(args: &ArgMatches, sub: &ArgMatches) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    // globals may land on either level
    settings.kubeconfig = sub.value_of("kubeconfig").or(args.value_of("kubeconfig")).map(PathBuf::from);
    settings.namespace = sub.value_of("namespace").or(args.value_of("namespace")).map(String::from);
    if let Some(img) = sub.value_of("image") {
        settings.image = img.into();
    }
    if let Some(t) = sub.value_of("timeout") {
        settings.timeout = Duration::from_secs(t.parse()?);
    }
    Ok(settings)
}

fn destination_request(a: &ArgMatches) -> DestinationRequest {
    DestinationRequest {
        storage_class: a.value_of("storage-class").map(String::from),
        size: a.value_of("size").map(String::from),
        name: a.value_of("name").map(String::from),
    }
}

/// Dispatch clap arguments to pvmigrate handlers
async fn dispatch_commands(args: &ArgMatches<'_>) -> Result<()> {
    if let Some(a) = args.subcommand_matches("migrate") {
        let settings = resolve_settings(args, a)?;
        let source = a.value_of("source").unwrap(); // defined required above
        let req = destination_request(a);
        let outcome = pvmigrate::migrate(&settings, source, &req, a.is_present("force")).await?;
        if !outcome.is_success() {
            bail!("{}: {}", source, outcome);
        }
        info!("{}: {}", source, outcome);
        return Ok(());
    }
    else if let Some(a) = args.subcommand_matches("strategies") {
        let settings = resolve_settings(args, a)?;
        let source = a.value_of("source").unwrap();
        let req = destination_request(a);
        let found = pvmigrate::compatible(&settings, source, &req).await?;
        if found.is_empty() {
            warn!("No strategy applies to {} with this destination", source);
        }
        for s in found {
            println!("{}", s);
        }
        return Ok(());
    }
    else if let Some(a) = args.subcommand_matches("cleanup") {
        let settings = resolve_settings(args, a)?;
        let job = a.value_of("job").unwrap();
        return pvmigrate::cleanup(&settings, job).await;
    }

    unreachable!("Subcommand valid, but not implemented");
}

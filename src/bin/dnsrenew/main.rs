use anyhow::{Context, Result};
use clap::Parser;
use dnsrenew::{
    AcmeAuthority, AwsCredentials, Config, Dns01Solver, FileStore, RenewalEngine, Route53Provider,
};
use report::{ErrorCollector, Mailer};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod report;

/// Keeps a Let's Encrypt certificate current by solving DNS-01 challenges through Route53
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let collector = config
        .reports_to_email
        .as_ref()
        .map(|_| ErrorCollector::default());

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(fmt::layer().with_target(false))
        .with(collector.clone())
        .init();

    if let Some(to) = &config.reports_to_email {
        info!(%to, "initialized email reporting");
    }

    let code = match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };

    if let (Some(collector), Some(to)) = (collector, config.reports_to_email.clone()) {
        let messages = collector.take();
        if !messages.is_empty() {
            let (host, port, from) = (config.smtp_host.clone(), config.smtp_port, config.email.clone());
            let sent = tokio::task::spawn_blocking(move || {
                Mailer::new(&from, &to, &host, port)?.send(&messages)
            })
            .await;

            match sent {
                Ok(Ok(())) => info!("sent error report"),
                Ok(Err(e)) => warn!("{e:#}"),
                Err(e) => warn!(error = %e, "report task failed"),
            }
        }
    }

    code
}

async fn run(config: &Config) -> Result<()> {
    let credentials = AwsCredentials::load(&config.aws_credentials_file, &config.aws_profile)
        .await
        .context("failed to load AWS credentials")?;
    let provider = Arc::new(Route53Provider::new(
        config.aws_hosted_zone_id.clone(),
        credentials,
    ));

    let solver = Arc::new(
        Dns01Solver::new(provider)
            .propagation_interval(config.propagation_interval)
            .propagation_max_attempts(config.propagation_max_attempts),
    );
    let store = Arc::new(FileStore::new(&config.storage_root_dir));

    let authority = AcmeAuthority::builder(solver, store)
        .server(config.le_server.clone())
        .renew_before(config.renew_before)
        .build();

    let certificate = RenewalEngine::new(Arc::new(authority))
        .ensure_certificate(&config.domains, &config.email)
        .await
        .context("failed to update the certificate")?;

    info!(
        domains = %config.domains,
        expires = %certificate.not_after(),
        "certificate is up to date"
    );
    Ok(())
}

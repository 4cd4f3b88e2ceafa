use std::collections::BTreeMap;

use clap::{crate_description, crate_version, Parser};
use stackable_operator::{logging::TracingTarget, time::Duration};
use webhook_cert_operator::{
    config::{parse_label, CertificateReconcilerConfig, ObservedObjects, DEFAULT_SUCCESS_REQUEUE},
    controller, OPERATOR_NAME,
};
use webhook_cert_utils::DEFAULT_SECRET_SUFFIX;

pub const APP_NAME: &str = "webhook-cert-operator";

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<CertificateOperatorRun>,
}

#[derive(clap::Parser)]
struct CertificateOperatorRun {
    /// Namespace of the webhook Deployment and its certificate Secret
    #[arg(long, env)]
    namespace: String,

    /// Name of the webhook Deployment, which is also the name of its Service
    #[arg(long, env)]
    deployment_name: String,

    /// Appended to the Deployment name to form the name of the certificate Secret
    #[arg(long, env, default_value = DEFAULT_SECRET_SUFFIX)]
    secret_suffix: String,

    /// Label (key=value) selecting the webhook registrations, CRDs and Deployments to manage
    #[arg(long = "match-label", env = "MATCH_LABELS", value_delimiter = ',', value_parser = parse_label)]
    match_labels: Vec<(String, String)>,

    /// MutatingWebhookConfiguration to manage, instead of selecting by label
    #[arg(long = "mutating-webhook", env = "MUTATING_WEBHOOKS", value_delimiter = ',')]
    mutating_webhooks: Vec<String>,

    /// ValidatingWebhookConfiguration to manage, instead of selecting by label
    #[arg(long = "validating-webhook", env = "VALIDATING_WEBHOOKS", value_delimiter = ',')]
    validating_webhooks: Vec<String>,

    /// CustomResourceDefinition whose conversion webhook to manage, instead of selecting by label
    #[arg(long = "crd", env = "CRDS", value_delimiter = ',')]
    crds: Vec<String>,

    /// Deployment that triggers reconciliation, instead of selecting by label
    #[arg(long = "watched-deployment", env = "WATCHED_DEPLOYMENTS", value_delimiter = ',')]
    watched_deployments: Vec<String>,

    /// Time until the certificates are checked again after a successful reconciliation
    #[arg(long, env, default_value_t = DEFAULT_SUCCESS_REQUEUE)]
    success_requeue: Duration,

    /// Exit after the certificates have been provisioned once
    #[arg(long, env)]
    stop_after_first_reconcile: bool,

    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,
}

impl CertificateOperatorRun {
    fn reconciler_config(self) -> CertificateReconcilerConfig {
        let mut config = CertificateReconcilerConfig::new(self.namespace, self.deployment_name)
            .with_secret_suffix(self.secret_suffix)
            .with_watch_resources(ObservedObjects {
                mutating_webhooks: self.mutating_webhooks,
                validating_webhooks: self.validating_webhooks,
                custom_resource_definitions: self.crds,
                deployments: self.watched_deployments,
            })
            .with_success_requeue(self.success_requeue)
            .with_stop_after_first_reconcile(self.stop_after_first_reconcile);
        if !self.match_labels.is_empty() {
            config = config.with_match_labels(self.match_labels.into_iter().collect::<BTreeMap<_, _>>());
        }
        config
    }
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET: Option<&str> = option_env!("TARGET");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        // This operator does not define any CustomResourceDefinitions of its own
        stackable_operator::cli::Command::Crd => {}
        stackable_operator::cli::Command::Run(run) => {
            stackable_operator::logging::initialize_logging(
                "WEBHOOK_CERT_OPERATOR_LOG",
                APP_NAME,
                run.tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;
            controller::start(&client, run.reconciler_config()).await;
        }
    }
    Ok(())
}

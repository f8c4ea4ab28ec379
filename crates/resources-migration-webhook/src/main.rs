use std::sync::Arc;

use clap::Parser;
use resources_migration_webhook::{
    ResourcesDefaulter, WebhookServer,
    cli::RunArguments,
    logging::{self, LoggingError},
    provider::KubeSchemaProvider,
    server::{self, WebhookServerError},
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "resources-migration-webhook";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: LoggingError },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to create webhook server"))]
    CreateWebhookServer { source: WebhookServerError },

    #[snafu(display("failed to run webhook server"))]
    RunWebhookServer { source: WebhookServerError },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let arguments = RunArguments::parse();

    logging::initialize_logging(
        APP_NAME,
        arguments.logging.log_format,
        arguments.logging.log_directory.as_ref(),
    )
    .context(InitializeLoggingSnafu)?;

    tracing::info!(
        crd_name = %arguments.crd_name,
        webhook_path = %arguments.webhook_path,
        dormant = arguments.dormant,
        "starting {APP_NAME}"
    );

    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;

    let defaulter = ResourcesDefaulter::builder(Arc::new(KubeSchemaProvider::new(client)))
        .options(arguments.defaulter_options())
        .build();
    let router = server::router(Arc::new(defaulter), &arguments.webhook_path);

    WebhookServer::new(router, arguments.webhook_options())
        .await
        .context(CreateWebhookServerSnafu)?
        .run()
        .await
        .context(RunWebhookServerSnafu)
}

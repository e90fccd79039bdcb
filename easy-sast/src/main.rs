use clap::Parser;
use easy_sast::{
    Args, apply_config, configure_credentials, get_config, logging, run_workflow, workflow_steps,
};
use easy_sast_api::{ConfigValue, SastClient};
use log::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // JSON logs at WARNING until the configuration is known
    logging::init();

    let args = Args::parse();

    let config = get_config(&args, |name| std::env::var(name).ok()).unwrap_or_else(|e| {
        error!("Unable to create a valid configuration: {e}");
        std::process::exit(1);
    });

    if let Some(loglevel) = config.get("loglevel").and_then(ConfigValue::as_str) {
        logging::set_level(loglevel);
    }

    let steps = workflow_steps(&config).unwrap_or_else(|e| {
        error!("Unable to determine the workflow: {e}");
        std::process::exit(1);
    });

    let sessions = apply_config(&config, &steps).unwrap_or_else(|e| {
        error!("Unable to create valid API objects: {e}");
        std::process::exit(1);
    });

    if steps.is_empty() {
        info!("No workflow steps were requested");
        return;
    }

    let credentials = configure_credentials(&config).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });

    let client = SastClient::new(credentials).unwrap_or_else(|e| {
        error!("❌ Failed to create the Veracode client: {e}");
        std::process::exit(1);
    });

    if let Err(e) = run_workflow(&steps, &sessions, &client).await {
        error!("{e}");
        std::process::exit(1);
    }
}

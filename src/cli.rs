use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clients::memory::{EvidenceSnapshot, MemoryLogStore, MemoryRegistry};
use crate::clients::{
    ClientBundle, ConfigParameterStore, EnvSecretStore, ExecutionRegistry, GitHubClient, LogStore,
    MessagesClient,
};
use crate::config::Config;
use crate::diagnosis::{DiagnosisSettings, Orchestrator};

#[derive(Parser)]
#[command(name = "pipedoctor")]
#[command(author, version, about = "CI/CD pipeline failure diagnosis", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[arg(short, long, global = true, env = "PIPEDOCTOR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose one pipeline failure notification
    Diagnose {
        /// JSON file holding `{"event": ...}` or the bare notification
        #[arg(short, long)]
        event: PathBuf,

        /// Recorded executions and log streams to replay
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
}

impl Cli {
    async fn execute_diagnose(&self, event: &Path, snapshot: Option<&Path>) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let request = read_request(event)?;

        let clients = build_clients(&config, snapshot)?;
        let orchestrator = Orchestrator::new(clients, DiagnosisSettings::from_config(&config));

        info!("Diagnosing failure from: {}", event.display());
        let response = orchestrator.handle_json(request).await;

        let json_output = if self.pretty {
            serde_json::to_string_pretty(&response)?
        } else {
            serde_json::to_string(&response)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Diagnosis written to: {}", output_path.display());
        } else {
            println!("{}", json_output);
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Diagnose { event, snapshot } => {
                self.execute_diagnose(event, snapshot.as_deref()).await
            }
        }
    }
}

/// Reads the request file, wrapping a bare notification as `{"event": ...}`.
fn read_request(path: &Path) -> Result<serde_json::Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse event file: {}", path.display()))?;

    if value.get("event").is_some() {
        Ok(value)
    } else {
        Ok(serde_json::json!({ "event": value }))
    }
}

fn build_clients(config: &Config, snapshot: Option<&Path>) -> Result<ClientBundle> {
    let (registry, logs): (Arc<dyn ExecutionRegistry>, Arc<dyn LogStore>) = match snapshot {
        Some(path) => {
            info!("Replaying recorded evidence from: {}", path.display());
            let (registry, logs) = EvidenceSnapshot::load(path)?.into_stores();
            (Arc::new(registry), Arc::new(logs))
        }
        None => (Arc::new(MemoryRegistry::new()), Arc::new(MemoryLogStore::new())),
    };

    let repository = GitHubClient::new(&config.github.base_url, config.github.timeout())?;
    let model = MessagesClient::new(
        &config.model.endpoint,
        &config.model.model_id,
        config.model.resolve_api_key(),
        config.model.timeout(),
    )?;

    Ok(ClientBundle {
        registry,
        logs,
        parameters: Arc::new(ConfigParameterStore::new(config.parameters.clone())),
        secrets: Arc::new(EnvSecretStore),
        repository: Arc::new(repository),
        model: Arc::new(model),
    })
}

mod store;

use adherence_core::config::{
    fraction_from_env_value, label_policy_from_env_value, seed_from_env_value, AnomalyConfig,
    CohortConfig, ForestConfig, SequenceConfig,
};
use adherence_core::constants::DEFAULT_MODEL_DIR;
use adherence_core::{AdherenceService, CoreConfig, LabelledHistory, TrainingBatch};
use adherence_types::{AnomalyVerdict, IntakeEvent, PatientFeatureVector, RiskVerdict};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::ModelStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "adherence")]
#[command(about = "Medication adherence analytics CLI")]
struct Cli {
    /// Directory holding saved model state (default: ADHERENCE_MODEL_DIR or "models")
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the cohort clusterer and risk ensemble, then save them
    Train {
        /// JSON training batch
        input: PathBuf,
        /// Treat the input as a list of labelled event histories
        #[arg(long)]
        histories: bool,
    },
    /// Assign patients to adherence cohorts
    Cluster {
        /// JSON list of patient feature vectors
        input: PathBuf,
        /// Treat the input as a list of event histories, one per patient
        #[arg(long)]
        histories: bool,
    },
    /// Predict the risk that a patient misses an upcoming dose
    PredictRisk {
        /// JSON patient request with an event history
        input: PathBuf,
    },
    /// Detect anomalous intake behaviour in a patient's events
    DetectAnomalies {
        /// JSON patient request with an event history
        input: PathBuf,
    },
}

/// A single patient's events as sent to the risk and anomaly commands.
#[derive(Deserialize)]
struct PatientRequest {
    #[serde(default)]
    patient_id: Option<u64>,
    events: Vec<IntakeEvent>,
}

impl PatientRequest {
    /// Explicit id, else the first event's patient, else 0.
    fn patient_id(&self) -> u64 {
        self.patient_id
            .or_else(|| self.events.first().map(|e| e.patient_id))
            .unwrap_or(0)
    }
}

#[derive(Serialize)]
struct RiskResponse {
    patient_id: u64,
    #[serde(flatten)]
    verdict: RiskVerdict,
}

#[derive(Serialize)]
struct AnomalyResponse {
    patient_id: u64,
    #[serde(flatten)]
    verdict: AnomalyVerdict,
}

#[derive(Serialize)]
struct TrainResponse<'a> {
    status: &'static str,
    message: String,
    report: &'a adherence_core::TrainingReport,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adherence=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = Arc::new(core_config_from_env()?);
    let model_dir = cli
        .model_dir
        .or_else(|| env_value("ADHERENCE_MODEL_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
    let store = ModelStore::new(model_dir);
    let service = AdherenceService::new(cfg);

    match cli.command {
        Commands::Train { input, histories } => {
            let batch = if histories {
                let histories: Vec<LabelledHistory> = read_json(&input)?;
                TrainingBatch::from_labelled_histories(&histories)
            } else {
                read_json(&input)?
            };
            // Sub-models skipped for lack of data keep their saved parameters.
            store.load(&service)?;
            let report = service.train(&batch)?;
            store.save(&service)?;
            print_json(&TrainResponse {
                status: "success",
                message: report.summary(),
                report: &report,
            })?;
        }
        Commands::Cluster { input, histories } => {
            load_models(&store, &service)?;
            let assignment = if histories {
                let histories: Vec<Vec<IntakeEvent>> = read_json(&input)?;
                service.cohorts_for_histories(&histories)?
            } else {
                let patients: Vec<PatientFeatureVector> = read_json(&input)?;
                service.assign_cohorts(&patients)?
            };
            print_json(&assignment)?;
        }
        Commands::PredictRisk { input } => {
            load_models(&store, &service)?;
            let request: PatientRequest = read_json(&input)?;
            print_json(&RiskResponse {
                patient_id: request.patient_id(),
                verdict: service.predict_risk(&request.events),
            })?;
        }
        Commands::DetectAnomalies { input } => {
            let request: PatientRequest = read_json(&input)?;
            print_json(&AnomalyResponse {
                patient_id: request.patient_id(),
                verdict: service.detect_anomalies(&request.events),
            })?;
        }
    }

    Ok(())
}

fn load_models(store: &ModelStore, service: &AdherenceService) -> anyhow::Result<()> {
    let loaded = store.load(service)?;
    tracing::info!(
        dir = %store.dir().display(),
        cohorts = loaded.cohorts,
        risk = loaded.risk,
        "loaded model state"
    );
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolves the core configuration once, from `ADHERENCE_*` environment variables.
fn core_config_from_env() -> anyhow::Result<CoreConfig> {
    let seed = seed_from_env_value(env_value("ADHERENCE_SEED"))?;
    let defaults = AnomalyConfig::default();
    let anomaly = AnomalyConfig {
        contamination: fraction_from_env_value(
            "contamination",
            env_value("ADHERENCE_CONTAMINATION"),
            defaults.contamination,
        )?,
        nu: fraction_from_env_value("nu", env_value("ADHERENCE_NU"), defaults.nu)?,
        ..defaults
    };
    let cohort = CohortConfig {
        label_policy: label_policy_from_env_value(env_value("ADHERENCE_LABEL_POLICY"))?,
        ..CohortConfig::default()
    };

    Ok(CoreConfig::new(
        seed,
        cohort,
        ForestConfig::default(),
        SequenceConfig::default(),
        anomaly,
    )?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

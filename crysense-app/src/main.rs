//! CrySense command-line application.
//!
//! Each subcommand is one user action: create an account, analyse a
//! recording (optionally saving the verdict to the account's history), list
//! the history, or check that the installed model loads.

mod auth;
mod convert;
mod report;
mod settings;
mod storage;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crysense_core::{
    predict_with_timeout, ClassifierConfig, ClassifierHandle, CryClassifier, Prediction,
};
use settings::{
    apply_runtime_env_from_settings, default_settings_path, load_settings, save_settings, AppSettings,
};
use storage::{LocalStore, ResultInput};

#[derive(Debug, Parser)]
#[command(name = "crysense")]
#[command(author, version, about = "Infant cry classifier", long_about = None)]
struct Cli {
    /// Settings file (defaults to the app data directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Directory with cry_classifier.json and label_encoder.json.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        #[arg(long)]
        username: String,

        /// Read interactively (with confirmation) when omitted.
        #[arg(long, env = "CRYSENSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Convert and classify a recording
    Analyze {
        /// Audio file (wav, mp3, flac, ogg, m4a, …)
        #[arg(long)]
        audio: PathBuf,

        /// Save the result to this account's history
        #[arg(long, requires = "password")]
        username: Option<String>,

        #[arg(long, env = "CRYSENSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Overrides the inference timeout from settings
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print prediction and verdict as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show saved results, newest first
    History {
        #[arg(long)]
        username: String,

        #[arg(long, env = "CRYSENSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Load the model and encoder and print the layer summary
    InspectModel,

    /// Write the effective settings to the settings file
    InitSettings,
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crysense=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    apply_runtime_env_from_settings(&app_settings);
    if let Some(dir) = &cli.model_dir {
        // An explicit flag beats both the environment and the settings file.
        std::env::set_var(crysense_core::inference::MODEL_DIR_ENV, dir);
        app_settings.model_dir = Some(dir.display().to_string());
    }
    info!(
        settings_path = ?settings_path,
        model_dir = ?app_settings.model_dir,
        history_enabled = app_settings.history_enabled,
        "runtime settings loaded"
    );

    match cli.command {
        Commands::Signup { username, password } => signup(&app_settings, &username, password),
        Commands::Analyze {
            audio,
            username,
            password,
            timeout_secs,
            json,
        } => analyze(
            &app_settings,
            &audio,
            username.zip(password),
            timeout_secs,
            json,
        ),
        Commands::History {
            username,
            password,
            limit,
        } => history(&app_settings, &username, password, limit),
        Commands::InspectModel => inspect_model(),
        Commands::InitSettings => {
            save_settings(&settings_path, &app_settings)
                .with_context(|| format!("write {}", settings_path.display()))?;
            println!("Settings written to {}", settings_path.display());
            Ok(())
        }
    }
}

fn open_store(settings: &AppSettings) -> Result<LocalStore> {
    let path = settings.db_path();
    LocalStore::new(path.clone())
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("open database {}", path.display()))
}

fn prompt_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn signup(settings: &AppSettings, username: &str, password: Option<String>) -> Result<()> {
    let (password, confirm) = match password {
        Some(p) => (p.clone(), p),
        None => (
            prompt_password("Password: ")?,
            prompt_password("Confirm password: ")?,
        ),
    };
    auth::validate_signup(username, &password, &confirm).map_err(anyhow::Error::msg)?;
    open_store(settings)?
        .create_user(username, &password)
        .map_err(anyhow::Error::msg)?;
    info!(username, "account created");
    println!("Account created for {}", username.trim());
    Ok(())
}

fn login(store: &LocalStore, username: &str, password: &str) -> Result<()> {
    if !store
        .verify_user(username, password)
        .map_err(anyhow::Error::msg)?
    {
        bail!("Invalid username or password");
    }
    Ok(())
}

fn analyze(
    settings: &AppSettings,
    audio: &Path,
    credentials: Option<(String, String)>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    // Credentials are checked before conversion starts.
    let account = match credentials {
        Some((username, password)) if settings.history_enabled => {
            let store = open_store(settings)?;
            login(&store, &username, &password)?;
            Some((store, username))
        }
        Some(_) => {
            warn!("history is disabled in settings; result will not be saved");
            None
        }
        None => None,
    };

    let converter = convert::Converter::new(&settings.ffmpeg_path);
    let converted = converter
        .convert(audio)
        .with_context(|| format!("convert {}", audio.display()))?;

    let timeout = Duration::from_secs(timeout_secs.unwrap_or(settings.inference_timeout_secs).max(1));
    let handle = ClassifierHandle::new(ClassifierConfig::default());
    let started = Instant::now();
    let prediction: Prediction =
        predict_with_timeout(&handle, converted.path(), timeout).context("classify audio")?;
    info!(
        label = %prediction.label,
        confidence = prediction.confidence,
        method = %converted.method,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis complete"
    );

    let verdict = report::verdict(&prediction, settings);
    if json {
        let payload = serde_json::json!({ "prediction": prediction, "verdict": verdict });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", report::render(&verdict, chrono::Local::now()));
    }

    if let Some((store, username)) = account {
        let saved = store.insert_result(
            &username,
            ResultInput {
                prediction: prediction.label.clone(),
                confidence: prediction.confidence,
                source_file: audio.file_name().map(|n| n.to_string_lossy().into_owned()),
            },
        );
        match saved {
            Ok(id) => info!(%id, username = %username, "result saved"),
            Err(e) => warn!(error = %e, "could not save result to history"),
        }
    }
    Ok(())
}

fn history(
    settings: &AppSettings,
    username: &str,
    password: Option<String>,
    limit: usize,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_password("Password: ")?,
    };
    let store = open_store(settings)?;
    login(&store, username, &password)?;

    let items = store
        .get_results(username, limit)
        .map_err(anyhow::Error::msg)?;
    if items.is_empty() {
        println!("No saved results for {}", username.trim());
        return Ok(());
    }
    for item in items {
        println!(
            "{}  {:<20} {:>6.2}%  {}",
            item.created_at,
            report::title_case(&item.prediction),
            item.confidence * 100.0,
            item.source_file.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn inspect_model() -> Result<()> {
    let config = ClassifierConfig::default();
    let classifier = CryClassifier::load(&config)
        .with_context(|| format!("load model from {}", config.model_path.display()))?;
    println!("model:   {}", config.model_path.display());
    println!("encoder: {}", config.encoder_path.display());
    println!("input:   {:?}", classifier.model().input_shape());
    for layer in classifier.model().summary() {
        println!(
            "  {:<24} {:<24} {:?}",
            layer.name, layer.class_name, layer.output_shape
        );
    }
    println!("classes: {}", classifier.encoder().classes().join(", "));
    Ok(())
}

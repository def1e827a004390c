fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use clap::Parser;
    use crysense_core::{ClassifierConfig, CryClassifier, Prediction};
    use serde::Serialize;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    /// Repeated predictions over a directory of labelled WAV clips.
    #[derive(Debug, Parser)]
    #[command(name = "crysense-bench", long_about = None)]
    struct Args {
        /// Clips live in `<dir>/<expected label>/*.wav`
        #[arg(long = "fixtures", default_value = "benchmarks/fixtures")]
        fixtures_dir: PathBuf,

        /// Overrides CRYSENSE_MODEL_DIR
        #[arg(long = "models")]
        models_dir: Option<PathBuf>,

        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=50))]
        iterations: u16,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseResult {
        file: String,
        /// Name of the directory holding the clip; used as the expected label
        /// when it matches one of the encoder classes.
        category: String,
        iteration: usize,
        latency_ms: f64,
        label: Option<String>,
        confidence: Option<f32>,
        error: Option<String>,
        correct: Option<bool>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CategorySummary {
        category: String,
        runs: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_latency_ms: f64,
        error_rate: f64,
        accuracy: Option<f64>,
        avg_confidence: Option<f32>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        fixtures_dir: String,
        iterations: usize,
        load_ms: f64,
        total_runs: usize,
        total_files: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_latency_ms: f64,
        error_rate: f64,
        accuracy: Option<f64>,
        label_distribution: BTreeMap<String, usize>,
        categories: Vec<CategorySummary>,
        cases: Vec<CaseResult>,
    }

    fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries {
            let path = entry.map_err(|e| e.to_string())?.path();
            if path.is_dir() {
                collect_wavs(&path, out)?;
                continue;
            }
            let is_wav = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if is_wav {
                out.push(path);
            }
        }
        Ok(())
    }

    fn category_for(path: &Path) -> String {
        path.parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "other".into())
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    fn rate(rows: &[CaseResult], pred: impl Fn(&CaseResult) -> bool) -> f64 {
        if rows.is_empty() {
            0.0
        } else {
            rows.iter().filter(|r| pred(r)).count() as f64 / rows.len() as f64
        }
    }

    fn accuracy(rows: &[CaseResult]) -> Option<f64> {
        let judged: Vec<bool> = rows.iter().filter_map(|r| r.correct).collect();
        (!judged.is_empty())
            .then(|| judged.iter().filter(|c| **c).count() as f64 / judged.len() as f64)
    }

    fn summarize(category: String, rows: &[CaseResult]) -> CategorySummary {
        let latencies = rows.iter().map(|r| r.latency_ms).collect::<Vec<_>>();
        let confidences = rows.iter().filter_map(|r| r.confidence).collect::<Vec<_>>();
        CategorySummary {
            category,
            runs: rows.len(),
            p50_latency_ms: percentile(&latencies, 0.50),
            p95_latency_ms: percentile(&latencies, 0.95),
            avg_latency_ms: mean(&latencies),
            error_rate: rate(rows, |r| r.error.is_some()),
            accuracy: accuracy(rows),
            avg_confidence: (!confidences.is_empty())
                .then(|| confidences.iter().sum::<f32>() / confidences.len() as f32),
        }
    }

    let args = Args::parse();
    let iterations = args.iterations as usize;
    if !args.fixtures_dir.exists() {
        return Err(format!(
            "fixtures directory does not exist: {}",
            args.fixtures_dir.display()
        ));
    }

    let config = match &args.models_dir {
        Some(dir) => ClassifierConfig::from_dir(dir),
        None => ClassifierConfig::default(),
    };
    let load_started = Instant::now();
    let classifier = CryClassifier::load(&config).map_err(|e| e.to_string())?;
    let load_ms = load_started.elapsed().as_secs_f64() * 1000.0;

    let mut wav_files = Vec::new();
    collect_wavs(&args.fixtures_dir, &mut wav_files)?;
    wav_files.sort();
    if wav_files.is_empty() {
        return Err(format!(
            "no .wav fixtures found in {}",
            args.fixtures_dir.display()
        ));
    }

    println!(
        "Benchmarking {} files x {} iterations (model load {:.1}ms)",
        wav_files.len(),
        iterations,
        load_ms
    );

    let mut cases = Vec::with_capacity(wav_files.len() * iterations);
    for iteration in 0..iterations {
        for path in &wav_files {
            let category = category_for(path);
            let expected = classifier
                .encoder()
                .transform(&category)
                .map(|_| category.clone());
            let started = Instant::now();
            let outcome = classifier.predict(path);
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let (label, confidence, error) = match outcome {
                Ok(Prediction {
                    label, confidence, ..
                }) => (Some(label), Some(confidence), None),
                Err(e) => (None, None, Some(e.to_string())),
            };
            let case = CaseResult {
                file: path.display().to_string(),
                correct: expected.map(|e| label.as_deref() == Some(e.as_str())),
                category,
                iteration,
                latency_ms,
                label,
                confidence,
                error,
            };
            cases.push(case);
        }
    }

    let mut grouped: BTreeMap<String, Vec<CaseResult>> = BTreeMap::new();
    let mut label_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for row in &cases {
        grouped
            .entry(row.category.clone())
            .or_default()
            .push(row.clone());
        if let Some(label) = &row.label {
            *label_distribution.entry(label.clone()).or_default() += 1;
        }
    }
    let categories = grouped
        .into_iter()
        .map(|(name, rows)| summarize(name, &rows))
        .collect();

    let all_latencies = cases.iter().map(|r| r.latency_ms).collect::<Vec<_>>();
    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        iterations,
        load_ms,
        total_runs: cases.len(),
        total_files: wav_files.len(),
        p50_latency_ms: percentile(&all_latencies, 0.50),
        p95_latency_ms: percentile(&all_latencies, 0.95),
        avg_latency_ms: mean(&all_latencies),
        error_rate: rate(&cases, |r| r.error.is_some()),
        accuracy: accuracy(&cases),
        label_distribution,
        categories,
        cases,
    };

    println!(
        "Done. runs={} p50={:.1}ms p95={:.1}ms error_rate={:.1}%",
        summary.total_runs,
        summary.p50_latency_ms,
        summary.p95_latency_ms,
        summary.error_rate * 100.0
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}

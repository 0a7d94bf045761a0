use clap::{Parser, Subcommand};
use octofhir_shrmap::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "shrmap")]
#[command(about = "Compile SHR field mappings and FHIR profiles into transformation plans")]
#[command(version)]
struct Cli {
    /// Compiler configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every element of a specification bundle
    Compile {
        /// Specification bundle (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Output file for the compiled plans
        #[arg(short, long)]
        output: PathBuf,
        /// Only compile elements of this namespace
        #[arg(short, long)]
        namespace: Option<String>,
        /// Compile on worker threads
        #[arg(long)]
        parallel: bool,
    },
    /// Convert an object-model instance into a FHIR document
    ToFhir {
        /// Specification bundle (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Instance file (JSON)
        #[arg(long)]
        instance: PathBuf,
    },
    /// Read a FHIR document back into an object-model instance
    FromFhir {
        /// Specification bundle (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Element to decode into, e.g. shr.vital.BloodPressure
        #[arg(short, long)]
        element: String,
        /// FHIR document (JSON)
        #[arg(short, long)]
        document: PathBuf,
        /// Bundle entries used to resolve references (JSON array)
        #[arg(long)]
        entries: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CompilerConfig::from_file(path)?,
        None => CompilerConfig::default(),
    };

    match cli.command {
        Commands::Compile {
            input,
            output,
            namespace,
            parallel,
        } => compile(&input, &output, namespace.as_deref(), parallel, config).await?,
        Commands::ToFhir { input, instance } => {
            let interpreter = interpreter(&input, config)?;
            let instance: Instance = load_json(&instance)?;
            let document = interpreter.to_fhir(&instance)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::FromFhir {
            input,
            element,
            document,
            entries,
        } => {
            let interpreter = interpreter(&input, config)?;
            let element = Identifier::parse(&element)
                .ok_or_else(|| ShrMapError::parsing(format!("invalid element name '{element}'")))?;
            let document: serde_json::Value = load_json(&document)?;
            let entries: Vec<serde_json::Value> = match entries {
                Some(path) => load_json(&path)?,
                None => Vec::new(),
            };
            let instance = interpreter.from_fhir(&element, &document, &entries)?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }
    }

    Ok(())
}

async fn compile(
    input: &Path,
    output: &Path,
    namespace: Option<&str>,
    parallel: bool,
    config: CompilerConfig,
) -> Result<()> {
    let compiler = SpecificationBundle::from_file(input)?.into_compiler(config)?;

    let report = if parallel {
        let parallel = ParallelPlanCompiler::new(compiler);
        match namespace {
            Some(namespace) => parallel.compile_namespace(namespace).await?,
            None => {
                let elements = parallel.compiler().graph().iter().cloned().collect();
                parallel.compile_batch(elements).await?
            }
        }
    } else {
        match namespace {
            Some(namespace) => compiler.compile_namespace(namespace),
            None => compiler.compile_all(),
        }
    };

    std::fs::write(output, serde_json::to_string_pretty(&report)?)?;

    println!("Compiled {} elements", report.compiled.len());
    println!("Diagnostics: {}", report.diagnostic_count());
    for failure in &report.failures {
        println!("Failed {}: {}", failure.identifier, failure.message);
    }
    println!("Plans written to {}", output.display());
    Ok(())
}

fn interpreter(input: &Path, config: CompilerConfig) -> Result<PlanInterpreter> {
    let compiler = SpecificationBundle::from_file(input)?.into_compiler(config)?;
    Ok(PlanInterpreter::from_report(&compiler.compile_all()))
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

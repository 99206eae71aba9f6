// abayes CLI
use abayes::{
    default_priors, ABayes, ArtifactCache, GroupedInput, ModelConfig, Priors, SamplerOptions,
    Settings, TemplateRegistry,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "abayes")]
#[command(version = "0.1.0")]
#[command(about = "Bayesian A/B testing with CmdStan", long_about = None)]
struct Cli {
    /// JSON settings file (cache_dir, template_dir, cmdstan)
    #[arg(long, global = true, value_name = "SETTINGS")]
    settings: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Likelihood family (see `abayes likelihoods`)
    #[arg(short, long, default_value = "normal")]
    likelihood: String,

    /// Prior as PARAM=EXPR, e.g. --prior "mu=normal(0, 2)"; repeatable
    #[arg(short, long = "prior", value_name = "PARAM=EXPR")]
    priors: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported likelihoods
    Likelihoods,

    /// Print the Stan program for a configuration
    Render {
        #[command(flatten)]
        model: ModelArgs,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Compile a configuration into the cache
    Compile {
        #[command(flatten)]
        model: ModelArgs,

        /// Recompile even if a cached executable exists
        #[arg(long)]
        force: bool,
    },

    /// Fit a two-group model to a JSON data file
    Fit {
        /// Data file: {"a": [...], "b": [...]} or [[...], [...]]
        #[arg(value_name = "DATA")]
        data: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Recompile even if a cached executable exists
        #[arg(long)]
        force: bool,

        /// Number of MCMC chains
        #[arg(long, default_value = "4")]
        chains: usize,

        /// Number of warmup iterations
        #[arg(long, default_value = "1000")]
        warmup: usize,

        /// Number of sampling iterations
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u32>,

        /// Target acceptance rate (adapt_delta)
        #[arg(long, default_value = "0.8")]
        adapt_delta: f64,

        /// Maximum tree depth
        #[arg(long, default_value = "10")]
        max_treedepth: usize,

        /// Extra argument passed to the sampler; repeatable
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        extra_args: Vec<String>,

        /// Keep data and chain CSVs in this directory
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Write the summary as JSON
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Show sampler console output
        #[arg(long)]
        show_console: bool,
    },

    /// Inspect or clear the model cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached models
    List,
    /// Delete every cached source and executable
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?,
        None => Settings::from_env(),
    };

    match cli.command {
        Commands::Likelihoods => likelihoods_command(&settings),
        Commands::Render { model, output } => render_command(&settings, model, output),
        Commands::Compile { model, force } => compile_command(&settings, model, force),
        Commands::Fit {
            data,
            model,
            force,
            chains,
            warmup,
            samples,
            seed,
            adapt_delta,
            max_treedepth,
            extra_args,
            output_dir,
            output,
            show_console,
        } => {
            let options = SamplerOptions {
                num_chains: chains,
                num_warmup: warmup,
                num_samples: samples,
                seed,
                adapt_delta,
                max_treedepth,
                extra_args,
                output_dir,
                show_console,
            };
            fit_command(&settings, data, model, force, options, output)
        }
        Commands::Cache { action } => cache_command(&settings, action),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn registry(settings: &Settings) -> Result<TemplateRegistry> {
    match &settings.template_dir {
        Some(dir) => TemplateRegistry::from_dir(dir)
            .with_context(|| format!("Failed to load templates from: {}", dir.display())),
        None => Ok(TemplateRegistry::builtin()),
    }
}

fn parse_priors(args: &[String]) -> Result<Priors> {
    let mut priors = default_priors();
    for arg in args {
        let Some((param, expr)) = arg.split_once('=') else {
            bail!("Prior must look like PARAM=EXPR, got {:?}", arg);
        };
        let (param, expr) = (param.trim(), expr.trim());
        if param.is_empty() || expr.is_empty() {
            bail!("Prior must look like PARAM=EXPR, got {:?}", arg);
        }
        priors.insert(param.to_string(), expr.to_string());
    }
    Ok(priors)
}

fn likelihoods_command(settings: &Settings) -> Result<()> {
    for name in registry(settings)?.likelihoods() {
        println!("{}", name);
    }
    Ok(())
}

fn render_command(settings: &Settings, model: ModelArgs, output: Option<PathBuf>) -> Result<()> {
    let config = ModelConfig::new(model.likelihood, parse_priors(&model.priors)?);
    let code = registry(settings)?.render(config.likelihood(), config.priors())?;

    match output {
        Some(path) => {
            fs::write(&path, code)
                .with_context(|| format!("Failed to write: {}", path.display()))?;
            eprintln!("✓ Model written to: {}", path.display());
        }
        None => print!("{}", code),
    }
    Ok(())
}

fn build_model(settings: &Settings, model: ModelArgs, force: bool) -> Result<ABayes> {
    let registry = registry(settings)?;
    ABayes::builder()
        .settings(settings.clone())
        .registry(registry)
        .likelihood(model.likelihood)
        .priors(parse_priors(&model.priors)?)
        .force_compile(force)
        .build()
        .context("Failed to prepare model")
}

fn compile_command(settings: &Settings, model: ModelArgs, force: bool) -> Result<()> {
    let ab = build_model(settings, model, force)?;
    let status = if ab.model().reused() { "cached" } else { "compiled" };
    println!("Fingerprint: {}", ab.fingerprint());
    println!("Executable:  {} ({})", ab.executable().display(), status);
    Ok(())
}

fn fit_command(
    settings: &Settings,
    data: PathBuf,
    model: ModelArgs,
    force: bool,
    options: SamplerOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    let input = GroupedInput::from_json_file(&data)
        .with_context(|| format!("Failed to read data: {}", data.display()))?;

    let mut ab = build_model(settings, model, force)?;
    ab.fit(input, &options).context("MCMC sampling failed")?;

    let idata = ab.inference_data()?;
    let summary = ab.summary()?;

    println!(
        "Likelihood: {}   Chains: {}   Draws/chain: {}   Divergent: {}",
        ab.likelihood(),
        idata.num_chains,
        idata.draws_per_chain,
        idata.num_divergent()
    );
    println!();
    print!("{}", summary);

    let warnings = summary.convergence_warnings();
    if !warnings.is_empty() {
        println!();
        println!("Convergence Warnings:");
        for warning in warnings {
            println!("⚠ {}", warning);
        }
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        eprintln!("✓ Summary written to: {}", path.display());
    }

    Ok(())
}

fn cache_command(settings: &Settings, action: CacheAction) -> Result<()> {
    let cache = ArtifactCache::new(settings.resolved_cache_dir()?)?;
    match action {
        CacheAction::List => {
            println!("Cache: {}", cache.root().display());
            for entry in cache.entries()? {
                let compiled = if entry.executable.is_some() { "compiled" } else { "source only" };
                println!("  {}  {}", entry.fingerprint, compiled);
            }
        }
        CacheAction::Clean => {
            let removed = cache.clean()?;
            println!("Removed {} files from {}", removed, cache.root().display());
        }
    }
    Ok(())
}

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod api;
mod assess;
mod config;
mod errors;
mod models;

use api::{build_client, DryRunTracker, IssueTracker, JiraAuth, JiraClient, Provider};
use assess::prompts::install_builtin_templates;
use assess::{
    AnalyzerKind, Classifier, FsTemplateStore, LlmClassifier, PromptRegistry, QuiescenceEvaluator,
    RuleThresholds, RunOptions, Runner,
};
use config::settings::{AuthMethod, ClassifierChoice, JiraConfig, LlmConfig};
use config::Settings;
use errors::StalewatchError;

#[derive(Parser)]
#[command(name = "stalewatch")]
#[command(version)]
#[command(about = "Find stalled Jira tickets and nudge the people who can unblock them", long_about = None)]
struct Cli {
    /// for debugging purposes
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess open tickets and comment on the stalled ones
    Run(RunArgs),

    /// Interactive configuration setup
    Init,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage prompt templates
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Project key (e.g., DEMO). Defaults to jira.project_key
    #[arg(short, long)]
    project: Option<String>,

    /// Maximum number of tickets to examine
    #[arg(short = 'n', long)]
    max_tickets: Option<usize>,

    /// Simulate actions without changing anything in Jira
    #[arg(long, conflicts_with = "production")]
    dry_run: bool,

    /// Post comments for real
    #[arg(long)]
    production: bool,

    #[arg(long, value_enum)]
    llm_provider: Option<Provider>,

    /// Model name (e.g., llama3.2:latest)
    #[arg(short = 'm', long)]
    llm_model: Option<String>,

    /// Inference service base URL
    #[arg(long)]
    llm_url: Option<String>,

    /// Use the rule-based classifier instead of the LLM
    #[arg(long)]
    no_llm: bool,

    #[arg(long, value_enum)]
    analyzer: Option<AnalyzerKind>,

    /// Classify every candidate, even recently touched ones
    #[arg(long)]
    no_prefilter: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display current configuration (with masked secrets)
    Show,

    /// Test Jira and inference connectivity
    Validate,

    /// Get the path to the config file
    Path,
}

#[derive(Subcommand)]
enum TemplatesAction {
    /// List available prompt templates and where they come from
    List,

    /// Copy the built-in templates into ~/.stalewatch/templates
    Install {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    println!(
        "{}",
        format!("stalewatch v{}", env!("CARGO_PKG_VERSION")).bright_cyan().bold()
    );
    println!();

    let result = match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Init => handle_init().await.map(|_| true),
        Commands::Config { action } => handle_config(action).await.map(|_| true),
        Commands::Templates { action } => handle_templates(action).map(|_| true),
    };

    match result {
        Ok(true) => println!(),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("\n{}", StalewatchError::from(e));
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "stalewatch=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn jira_client(jira: &JiraConfig) -> JiraClient {
    let auth = match jira.auth {
        AuthMethod::Basic => JiraAuth::Basic {
            email: jira.email.clone(),
            api_token: jira.api_token.clone(),
        },
        AuthMethod::Bearer => JiraAuth::Bearer {
            token: jira.api_token.clone(),
        },
    };
    JiraClient::new(&jira.url, auth)
        .with_retry_policy(jira.max_retries, Duration::from_millis(jira.retry_delay_ms))
}

fn template_store(settings: &Settings) -> FsTemplateStore {
    FsTemplateStore::standard(
        Settings::user_templates_dir().ok(),
        settings.assessment.template_dir.clone(),
    )
}

/// `--production` beats `--dry-run`, which beats the config file.
fn resolve_dry_run(args: &RunArgs, configured: bool) -> bool {
    if args.production {
        false
    } else if args.dry_run {
        true
    } else {
        configured
    }
}

fn apply_overrides(settings: &mut Settings, args: &RunArgs) {
    if let Some(provider) = args.llm_provider {
        settings.llm.provider = provider;
    }
    if let Some(model) = &args.llm_model {
        settings.llm.model = model.clone();
    }
    if let Some(url) = &args.llm_url {
        settings.llm.base_url = url.clone();
    }
    if let Some(analyzer) = args.analyzer {
        settings.assessment.analyzer = analyzer;
    }
    if let Some(max) = args.max_tickets {
        settings.assessment.max_tickets = max;
    }
    if args.no_llm {
        settings.assessment.classifier = ClassifierChoice::Rules;
    }
    settings.assessment.dry_run = resolve_dry_run(args, settings.assessment.dry_run);
}

/// Returns false when any ticket could not be processed.
async fn handle_run(args: RunArgs) -> anyhow::Result<bool> {
    let mut settings = Settings::load()?;
    apply_overrides(&mut settings, &args);

    let problems = settings.validate();
    if !problems.is_empty() {
        return Err(StalewatchError::ConfigValidationFailed(problems.join("; ")).into());
    }

    let project_key = args
        .project
        .clone()
        .or_else(|| Some(settings.jira.project_key.clone()))
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            StalewatchError::ConfigInvalid(
                "No project key. Pass --project or set jira.project_key".to_string(),
            )
        })?;

    let mut options = RunOptions::from_config(project_key, &settings.assessment);
    options.prefilter = !args.no_prefilter;

    let jira = jira_client(&settings.jira);
    let tracker: Box<dyn IssueTracker> = if options.dry_run {
        Box::new(DryRunTracker::new(jira))
    } else {
        Box::new(jira)
    };

    let use_llm = settings.llm.enabled && settings.assessment.classifier == ClassifierChoice::Llm;
    let stats = if use_llm {
        let client = build_client(&settings.llm);
        let registry =
            PromptRegistry::from_store(&template_store(&settings)).map_err(StalewatchError::from)?;
        let classifier = LlmClassifier::new(client.as_ref(), &registry, settings.assessment.analyzer);
        Runner::new(tracker.as_ref(), Classifier::Llm(classifier), options)
            .run()
            .await
            .map_err(StalewatchError::from)?
    } else {
        let evaluator = QuiescenceEvaluator::new(&RuleThresholds::from(&settings.assessment));
        Runner::new(tracker.as_ref(), Classifier::Rules(evaluator), options)
            .run()
            .await
            .map_err(StalewatchError::from)?
    };

    Ok(stats.errors == 0)
}

async fn handle_init() -> anyhow::Result<()> {
    use dialoguer::{Confirm, Input, Password, Select};

    println!("{}", "stalewatch Configuration Setup".cyan().bold());
    println!();
    println!(
        "{}",
        "This will store your credentials in ~/.stalewatch/config.toml".dimmed()
    );
    println!(
        "{}",
        "The file will be created with read-only permissions (600)".dimmed()
    );
    println!();

    let config_path = Settings::config_path()?;
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("A configuration already exists. Overwrite it?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("{}", "Keeping the existing configuration.".dimmed());
            return Ok(());
        }
    }

    println!("{}", "Jira Configuration".bold());
    let url: String = Input::new()
        .with_prompt("Jira URL (e.g., https://<company>.atlassian.net)")
        .interact_text()?;

    let auth_choice = Select::new()
        .with_prompt("Authentication method")
        .items(&["API Token (Jira Cloud)", "Personal Access Token (Jira Data Center/Server)"])
        .default(0)
        .interact()?;
    let auth = if auth_choice == 1 {
        AuthMethod::Bearer
    } else {
        AuthMethod::Basic
    };

    let email: String = if auth == AuthMethod::Basic {
        Input::new().with_prompt("Jira email").interact_text()?
    } else {
        String::new()
    };

    if auth == AuthMethod::Basic {
        println!("{}", "  Create one at https://id.atlassian.com/manage-profile/security/api-tokens".dimmed());
    } else {
        println!("{}", "  Create one in Jira under Profile > Personal Access Tokens".dimmed());
    }
    let api_token = Password::new().with_prompt("Token").interact()?;
    let project_key: String = Input::new()
        .with_prompt("Default project key (e.g., DEMO)")
        .interact_text()?;

    println!();
    println!("{}", "Inference Configuration".bold());
    let provider_choice = Select::new()
        .with_prompt("Provider")
        .items(&["ollama (local)", "openai-compatible"])
        .default(0)
        .interact()?;
    let mut llm = LlmConfig::default();
    if provider_choice == 1 {
        llm.provider = Provider::OpenAi;
        llm.base_url = "https://api.openai.com/v1".to_string();
        llm.model = "gpt-4o-mini".to_string();
    }
    llm.base_url = Input::new()
        .with_prompt("Base URL")
        .default(llm.base_url)
        .interact_text()?;
    llm.model = Input::new()
        .with_prompt("Model")
        .default(llm.model)
        .interact_text()?;
    if llm.provider == Provider::OpenAi {
        llm.api_key = Some(Password::new().with_prompt("API key").interact()?);
    }

    let mut settings = Settings::new(JiraConfig {
        url: url.trim_end_matches('/').to_string(),
        email,
        api_token,
        project_key: project_key.trim().to_string(),
        auth,
        max_retries: 3,
        retry_delay_ms: 2000,
    });
    settings.llm = llm;

    let problems = settings.validate();
    if !problems.is_empty() {
        return Err(StalewatchError::ConfigValidationFailed(problems.join("; ")).into());
    }

    println!();
    println!("{}", "Validating configuration...".cyan());
    print!("{}", "  Testing Jira connection... ".dimmed());
    std::io::Write::flush(&mut std::io::stdout())?;
    match check_jira(&settings).await {
        Ok(()) => println!("{}", "✓".green().bold()),
        Err(e) => {
            println!("{}", "✗".red().bold());
            return Err(StalewatchError::ConfigValidationFailed(format!(
                "Jira connection failed: {}",
                e
            ))
            .into());
        }
    }

    settings.save()?;

    println!();
    println!("{}", "Configuration saved!".green().bold());
    println!(
        "  Location: {}",
        config_path.display().to_string().bright_white()
    );
    println!();
    println!("{}", "Runs are dry by default. Use --production to post comments.".yellow());
    println!("{}", "  Never commit config.toml to git".dimmed());

    Ok(())
}

async fn check_jira(settings: &Settings) -> Result<(), api::TrackerError> {
    let jql = format!("project = \"{}\"", settings.jira.project_key);
    jira_client(&settings.jira)
        .with_retry_policy(0, Duration::ZERO)
        .search_issues(&jql, 0, 1)
        .await
        .map(|_| ())
}

async fn check_inference(llm: &LlmConfig) -> Result<(), api::InferenceError> {
    build_client(llm)
        .generate("Reply with the single word OK.", "ping")
        .await
        .map(|_| ())
}

async fn handle_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = Settings::load()?.masked();

            println!("{}", "Current Configuration".cyan().bold());
            println!();

            println!("{}", "[jira]".bold());
            println!("  {} {}", "url:".dimmed(), settings.jira.url.bright_white());
            println!("  {} {}", "email:".dimmed(), settings.jira.email.bright_white());
            let auth_type = match settings.jira.auth {
                AuthMethod::Basic => "API Token",
                AuthMethod::Bearer => "Personal Access Token",
            };
            println!("  {} {}", "auth:".dimmed(), auth_type.bright_white());
            println!("  {} {}", "api_token:".dimmed(), settings.jira.api_token.yellow());
            println!("  {} {}", "project_key:".dimmed(), settings.jira.project_key.bright_white());

            println!();
            println!("{}", "[llm]".bold());
            println!("  {} {}", "provider:".dimmed(), settings.llm.provider.to_string().bright_white());
            println!("  {} {}", "model:".dimmed(), settings.llm.model.bright_white());
            println!("  {} {}", "base_url:".dimmed(), settings.llm.base_url.bright_white());
            if let Some(key) = &settings.llm.api_key {
                println!("  {} {}", "api_key:".dimmed(), key.yellow());
            }
            println!("  {} {}", "enabled:".dimmed(), settings.llm.enabled.to_string().bright_white());

            println!();
            println!("{}", "[assessment]".bold());
            let assessment = toml::to_string_pretty(&settings.assessment)
                .context("Failed to serialize assessment settings")?;
            for line in assessment.lines().filter(|l| !l.trim().is_empty()) {
                println!("  {}", line.dimmed());
            }

            Ok(())
        }

        ConfigAction::Validate => {
            println!("{}", "Validating configuration...".cyan().bold());
            println!();

            let settings = Settings::load()?;

            let problems = settings.validate();
            if !problems.is_empty() {
                for problem in &problems {
                    println!("  {} {}", "✗".red().bold(), problem.red());
                }
                return Err(StalewatchError::ConfigValidationFailed(problems.join("; ")).into());
            }

            print!("{}", "  Testing Jira connection... ".dimmed());
            std::io::Write::flush(&mut std::io::stdout())?;
            if let Err(e) = check_jira(&settings).await {
                println!("{}", "✗".red().bold());
                return Err(StalewatchError::from(e).into());
            }
            println!("{}", "✓".green().bold());

            if settings.llm.enabled {
                print!(
                    "{}",
                    format!("  Testing {} ({})... ", settings.llm.provider, settings.llm.model).dimmed()
                );
                std::io::Write::flush(&mut std::io::stdout())?;
                if let Err(e) = check_inference(&settings.llm).await {
                    println!("{}", "✗".red().bold());
                    return Err(StalewatchError::from(e).into());
                }
                println!("{}", "✓".green().bold());
            }

            println!();
            println!("{}", "✓ All validations passed!".green().bold());

            Ok(())
        }

        ConfigAction::Path => {
            println!("{}", Settings::config_path()?.display());
            Ok(())
        }
    }
}

fn handle_templates(action: TemplatesAction) -> anyhow::Result<()> {
    match action {
        TemplatesAction::List => {
            // A missing config still lets the user see the built-ins.
            let store = match Settings::load() {
                Ok(settings) => template_store(&settings),
                Err(_) => FsTemplateStore::standard(Settings::user_templates_dir().ok(), None),
            };
            let registry = PromptRegistry::from_store(&store).map_err(StalewatchError::from)?;

            println!("{}", "Prompt Templates".cyan().bold());
            println!();
            for template in registry.templates() {
                println!(
                    "  {}  {}",
                    template.name.bright_white().bold(),
                    registry.origin(&template.name).unwrap_or("unknown").dimmed()
                );
                if !template.description.is_empty() {
                    println!("      {}", template.description);
                }
                let vars: Vec<&str> = template.required_vars.iter().map(String::as_str).collect();
                println!("      {} {}", "requires:".dimmed(), vars.join(", "));
            }
            Ok(())
        }

        TemplatesAction::Install { force } => {
            let dest = Settings::user_templates_dir()?;
            let written = install_builtin_templates(&dest, force).map_err(StalewatchError::from)?;

            if written.is_empty() {
                println!("{}", "Templates already installed.".dimmed());
                println!("  Use {} to overwrite them", "--force".green());
                return Ok(());
            }
            for path in &written {
                println!("  {} {}", "✓".green().bold(), path.display());
            }
            println!();
            println!(
                "{}",
                format!("Installed {} templates into {}", written.len(), dest.display()).green()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::new(JiraConfig {
            url: "https://example.atlassian.net".into(),
            email: "me@example.com".into(),
            api_token: "secret".into(),
            project_key: "DEMO".into(),
            auth: AuthMethod::Basic,
            max_retries: 3,
            retry_delay_ms: 2000,
        })
    }

    #[test]
    fn test_production_wins_over_config() {
        let args = RunArgs {
            production: true,
            ..RunArgs::default()
        };
        assert!(!resolve_dry_run(&args, true));
        assert!(resolve_dry_run(&RunArgs::default(), true));
        assert!(!resolve_dry_run(&RunArgs::default(), false));
        let args = RunArgs {
            dry_run: true,
            ..RunArgs::default()
        };
        assert!(resolve_dry_run(&args, false));
    }

    #[test]
    fn test_overrides_apply_to_settings() {
        let mut settings = settings();
        let args = RunArgs {
            max_tickets: Some(5),
            llm_model: Some("mistral".into()),
            no_llm: true,
            analyzer: Some(AnalyzerKind::Quality),
            ..RunArgs::default()
        };
        apply_overrides(&mut settings, &args);
        assert_eq!(settings.assessment.max_tickets, 5);
        assert_eq!(settings.llm.model, "mistral");
        assert_eq!(settings.assessment.classifier, ClassifierChoice::Rules);
        assert_eq!(settings.assessment.analyzer, AnalyzerKind::Quality);
        assert!(settings.assessment.dry_run);
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "stalewatch", "run", "-p", "DEMO", "-n", "10", "--production", "--llm-provider", "openai",
            "--analyzer", "quality",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.project.as_deref(), Some("DEMO"));
        assert_eq!(args.max_tickets, Some(10));
        assert!(args.production);
        assert_eq!(args.llm_provider, Some(Provider::OpenAi));
        assert_eq!(args.analyzer, Some(AnalyzerKind::Quality));
    }

    #[test]
    fn test_dry_run_conflicts_with_production() {
        assert!(Cli::try_parse_from(["stalewatch", "run", "--dry-run", "--production"]).is_err());
    }
}

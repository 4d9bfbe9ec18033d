mod render;

use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::future::Future;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use vidgrab_client::{
    BackendClient, CancellationToken, SavedFile, Submission, TaskPoller, TaskState,
};
use vidgrab_config::{
    CONFIG_KEYS, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, ENV_API_URL, VidgrabConfig, config_exists,
    config_path, get_config_value, load_config, open_in_editor, resolve_api_url,
    resolve_connect_timeout, resolve_default_format, resolve_default_quality, resolve_log_level,
    resolve_output_dir, resolve_poll_interval, resolve_simple_output, save_config,
    set_config_value,
};
use vidgrab_core::{
    DownloadRequest, MediaFormat, PreviewData, PreviewKind, Quality, VidgrabError, VidgrabResult,
    download_key, playlist_key, validate_url,
};

use crate::render::{format_choice, preview_lines, quality_label};

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect a video or playlist and pick the quality to download
    Preview {
        #[arg(value_name = "URL")]
        url: String,
        /// Quality to download without prompting (e.g. 720p, audio)
        #[arg(long, short)]
        quality: Option<String>,
    },
    /// Print the current status of a task
    Status { task_id: String },
    /// Follow a task until it finishes, then fetch the file
    Wait { task_id: String },
    /// Download the file of a finished task
    Fetch { task_id: String },
    /// Check that the backend is reachable
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Print the config file location
    Path,
    /// Open config file in editor
    Edit,
}

#[derive(Debug, Parser)]
#[command(name = "vidgrab")]
#[command(version, about = "Download videos through a media backend", long_about = None)]
struct Cli {
    /// video or audio
    #[arg(long, short)]
    format: Option<MediaFormat>,
    /// best, 1080p, 720p or 480p
    #[arg(long, short)]
    quality: Option<Quality>,
    /// File with one URL per line
    #[arg(long)]
    input: Option<String>,
    /// Directory downloaded files are written to
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,
    /// Backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Print the download link of a finished task instead of fetching it
    #[arg(long, global = true)]
    link_only: bool,
    /// Only print saved paths or links
    #[arg(long, global = true)]
    simple: bool,
    #[arg(value_name = "URL")]
    urls: Vec<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

struct Context {
    client: BackendClient,
    output_dir: PathBuf,
    poll_interval: Duration,
    simple: bool,
    link_only: bool,
    cancel: CancellationToken,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle config commands first
    if let Some(Commands::Config { action }) = &cli.command {
        if let Err(err) = handle_config_command(action) {
            fail(err);
        }
        return;
    }

    let mut config = load_config().unwrap_or_else(|err| fail(err));
    init_tracing(&resolve_log_level(&config));

    let base_url = resolve_or_prompt_api_url(cli.api_url.as_deref(), &mut config)
        .unwrap_or_else(|err| fail(err));
    let client = BackendClient::with_connect_timeout(&base_url, resolve_connect_timeout(&config))
        .unwrap_or_else(|err| fail(err));
    debug!(base_url = %client.base_url(), "using backend");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let ctx = Context {
        client,
        output_dir: cli
            .output
            .clone()
            .unwrap_or_else(|| resolve_output_dir(&config)),
        poll_interval: resolve_poll_interval(&config),
        simple: cli.simple || resolve_simple_output(&config).unwrap_or(false),
        link_only: cli.link_only,
        cancel,
    };

    let result = match &cli.command {
        None => run_downloads(&cli, &config, &ctx).await,
        Some(Commands::Preview { url, quality }) => {
            run_preview(&ctx, url, quality.as_deref()).await
        }
        Some(Commands::Status { task_id }) => run_status(&ctx, task_id).await,
        Some(Commands::Wait { task_id }) => follow_task(&ctx, task_id).await.map(|_| true),
        Some(Commands::Fetch { task_id }) => run_fetch(&ctx, task_id).await,
        Some(Commands::Health) => run_health(&ctx).await,
        Some(Commands::Config { .. }) => Ok(true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => fail(err),
    }
}

fn fail(err: impl Display) -> ! {
    eprintln!("{} {err}", style("Error:").red());
    std::process::exit(1);
}

fn init_tracing(level: &str) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match level.parse::<EnvFilter>() {
            Ok(filter) => filter,
            Err(err) => {
                eprintln!(
                    "{} log level '{level}' is not a valid filter ({err}); falling back to '{DEFAULT_LOG_LEVEL}'",
                    style("Warning:").yellow()
                );
                EnvFilter::new(DEFAULT_LOG_LEVEL)
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            cancel.cancel();
        }
    });
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = VidgrabResult<T>>,
) -> VidgrabResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VidgrabError::Cancelled),
        result = work => result,
    }
}

fn gather_inputs(cli: &Cli) -> VidgrabResult<Vec<String>> {
    let mut urls = cli.urls.clone();

    if let Some(path) = &cli.input {
        let content = fs::read_to_string(path).map_err(|err| {
            VidgrabError::InvalidInput(format!("failed to read input file: {err}"))
        })?;
        urls.extend(parse_lines(&content));
    }

    if urls.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|err| VidgrabError::InvalidInput(format!("failed to read stdin: {err}")))?;
        urls.extend(parse_lines(&buffer));
    }

    Ok(urls)
}

fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

fn resolve_or_prompt_api_url(
    explicit: Option<&str>,
    config: &mut VidgrabConfig,
) -> VidgrabResult<String> {
    if let Some(url) = explicit {
        validate_url(url)?;
        return Ok(url.trim().trim_end_matches('/').to_string());
    }

    let env_set = std::env::var(ENV_API_URL).is_ok_and(|value| !value.trim().is_empty());
    if env_set || config_exists().unwrap_or(false) || !io::stdin().is_terminal() {
        return resolve_api_url(config);
    }

    // Config file doesn't exist - first time setup
    let theme = ColorfulTheme::default();
    println!(
        "{} Let's configure your vidgrab settings",
        style("First-time setup:").bold().cyan()
    );

    let input: String = Input::with_theme(&theme)
        .with_prompt("Backend URL")
        .default(DEFAULT_API_URL.to_string())
        .interact_text()
        .unwrap_or_else(|_| DEFAULT_API_URL.to_string());

    validate_url(input.trim())?;
    config.api.base_url = Some(input.trim().to_string());

    if let Err(err) = save_config(config) {
        eprintln!("{} {err}", style("Warning:").yellow());
    } else {
        println!(
            "{} Config file created at ~/.vidgrab/config.toml",
            style("✓").green()
        );
    }

    resolve_api_url(config)
}

fn handle_config_command(action: &ConfigAction) -> VidgrabResult<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = load_config()?;
            match get_config_value(&config, key) {
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} = <null>"),
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            set_config_value(key, value)?;
            println!("{} Set {key} = {value}", style("✓").green());
            Ok(())
        }
        ConfigAction::List => {
            let config = load_config()?;
            println!("Current configuration:");
            let mut section = "";
            for key in CONFIG_KEYS {
                let (head, leaf) = key.split_once('.').unwrap_or(("", *key));
                if head != section {
                    println!("\n[{head}]");
                    section = head;
                }
                let value = get_config_value(&config, key);
                println!("{leaf} = {}", value.as_deref().unwrap_or("<null>"));
            }
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", config_path()?.display());
            Ok(())
        }
        ConfigAction::Edit => open_in_editor(),
    }
}

async fn run_downloads(cli: &Cli, config: &VidgrabConfig, ctx: &Context) -> VidgrabResult<bool> {
    let urls = gather_inputs(cli)?;
    if urls.is_empty() {
        return Err(VidgrabError::InvalidInput(
            "no input URLs provided".to_string(),
        ));
    }

    let format = match cli.format {
        Some(format) => format,
        None => resolve_default_format(config)?,
    };
    let quality = match cli.quality {
        Some(quality) => quality,
        None => resolve_default_quality(config)?,
    };
    let key_quality = match format {
        MediaFormat::Audio => "audio",
        MediaFormat::Video => quality.as_str(),
    };

    let mut started = HashSet::new();
    let mut success = 0usize;
    let mut failed = 0usize;

    for url in urls {
        if !started.insert(download_key(&url, key_quality)) {
            eprintln!("{} {url}: already downloading", style("Skipped").yellow());
            continue;
        }

        let request = DownloadRequest {
            url: url.clone(),
            format,
            quality,
        };
        match download_one(ctx, &request).await {
            Ok(()) => success += 1,
            Err(VidgrabError::Cancelled) => {
                failed += 1;
                eprintln!("{} {url}: cancelled", style("Failed").red());
                break;
            }
            Err(err) => {
                failed += 1;
                eprintln!("{} {url}: {err}", style("Failed").red());
            }
        }
    }

    if !ctx.simple {
        print_summary(success + failed, success, failed);
    }
    Ok(failed == 0)
}

async fn download_one(ctx: &Context, request: &DownloadRequest) -> VidgrabResult<()> {
    let spinner = spinner(ctx, format!("Submitting {}", request.url));
    let submission = cancellable(
        &ctx.cancel,
        ctx.client.start_download(request, &ctx.output_dir),
    )
    .await;
    spinner.finish_and_clear();

    match submission? {
        Submission::File(saved) => {
            print_saved(&saved, ctx.simple);
            Ok(())
        }
        Submission::Task(task_id) => follow_task(ctx, &task_id).await,
    }
}

async fn follow_task(ctx: &Context, task_id: &str) -> VidgrabResult<()> {
    let bar = progress_bar(ctx);
    let poller = TaskPoller::new(ctx.client.clone(), ctx.poll_interval);
    let result = poller
        .wait(task_id, &ctx.cancel, |state| render_state(&bar, state))
        .await;
    bar.finish_and_clear();
    let completed = result?;

    if ctx.link_only {
        if ctx.simple {
            println!("{}", completed.download_url);
        } else {
            println!("{} {}", style("Ready:").green(), completed.download_url);
        }
        return Ok(());
    }

    let spinner = spinner(ctx, "Fetching file".to_string());
    let saved = cancellable(
        &ctx.cancel,
        ctx.client.download_file(&completed.task_id, &ctx.output_dir),
    )
    .await;
    spinner.finish_and_clear();
    print_saved(&saved?, ctx.simple);
    Ok(())
}

async fn run_preview(ctx: &Context, url: &str, quality: Option<&str>) -> VidgrabResult<bool> {
    let spinner = spinner(ctx, format!("Analysing {url}"));
    let preview = cancellable(&ctx.cancel, ctx.client.preview(url)).await;
    spinner.finish_and_clear();
    let preview = preview?;

    if !ctx.simple {
        for (index, line) in preview_lines(&preview).into_iter().enumerate() {
            if index == 0 {
                println!("{}", style(line).bold().cyan());
            } else {
                println!("{line}");
            }
        }
    }

    let saved = match preview.kind {
        PreviewKind::Video => download_previewed_video(ctx, &preview, url, quality).await?,
        PreviewKind::Playlist => download_previewed_playlist(ctx, &preview, quality).await?,
    };
    print_saved(&saved, ctx.simple);
    Ok(true)
}

async fn download_previewed_video(
    ctx: &Context,
    preview: &PreviewData,
    url: &str,
    quality: Option<&str>,
) -> VidgrabResult<SavedFile> {
    if preview.formats.is_empty() {
        return Err(VidgrabError::UnsupportedInput(
            "no downloadable formats".to_string(),
        ));
    }

    let chosen = match quality {
        Some(wanted) => preview
            .formats
            .iter()
            .find(|format| format.quality.eq_ignore_ascii_case(wanted))
            .map(|format| format.quality.clone())
            .ok_or_else(|| {
                let offered: Vec<&str> = preview
                    .formats
                    .iter()
                    .map(|format| format.quality.as_str())
                    .collect();
                VidgrabError::InvalidInput(format!(
                    "quality '{wanted}' is not offered (available: {})",
                    offered.join(", ")
                ))
            })?,
        None => {
            if !io::stdin().is_terminal() {
                return Err(VidgrabError::InvalidInput(
                    "--quality is required when not running interactively".to_string(),
                ));
            }
            let labels: Vec<String> = preview.formats.iter().map(format_choice).collect();
            let selection = select("Choose a quality", &labels, 0)?;
            preview.formats[selection].quality.clone()
        }
    };

    let video_url = preview.url.as_deref().unwrap_or(url);
    let spinner = spinner(ctx, format!("Downloading {}", quality_label(&chosen)));
    let saved = cancellable(
        &ctx.cancel,
        ctx.client
            .download_video(video_url, &chosen, &preview.title, &ctx.output_dir),
    )
    .await;
    spinner.finish_and_clear();
    saved
}

async fn download_previewed_playlist(
    ctx: &Context,
    preview: &PreviewData,
    quality: Option<&str>,
) -> VidgrabResult<SavedFile> {
    if preview.entries.is_empty() {
        return Err(VidgrabError::UnsupportedInput(
            "playlist has no entries".to_string(),
        ));
    }

    let chosen = match quality {
        Some(wanted) => {
            if !preview.common_qualities.is_empty()
                && !preview.common_qualities.iter().any(|q| q == wanted)
            {
                return Err(VidgrabError::InvalidInput(format!(
                    "quality '{wanted}' is not common to every video (available: {})",
                    preview.common_qualities.join(", ")
                )));
            }
            wanted.to_string()
        }
        None => {
            let default = preview.default_playlist_quality().ok_or_else(|| {
                VidgrabError::UnsupportedInput(
                    "no quality is available for every video".to_string(),
                )
            })?;
            if io::stdin().is_terminal() {
                let labels: Vec<String> = preview
                    .common_qualities
                    .iter()
                    .map(|q| quality_label(q))
                    .collect();
                let selection = select("Quality for every video", &labels, 0)?;
                preview.common_qualities[selection].clone()
            } else {
                default.to_string()
            }
        }
    };
    debug!(key = %playlist_key(&chosen), "downloading playlist");

    let urls: Vec<String> = preview.entries.iter().map(|entry| entry.url.clone()).collect();
    let spinner = spinner(
        ctx,
        format!("Downloading {} videos as {}", urls.len(), quality_label(&chosen)),
    );
    let saved = cancellable(
        &ctx.cancel,
        ctx.client
            .download_playlist(&urls, &chosen, &preview.title, &ctx.output_dir),
    )
    .await;
    spinner.finish_and_clear();
    saved
}

fn select(prompt: &str, labels: &[String], default: usize) -> VidgrabResult<usize> {
    Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(labels)
        .default(default)
        .interact()
        .map_err(|err| VidgrabError::InvalidInput(format!("selection failed: {err}")))
}

async fn run_status(ctx: &Context, task_id: &str) -> VidgrabResult<bool> {
    let report = cancellable(&ctx.cancel, ctx.client.status(task_id)).await?;
    let mut state = TaskState::default();
    state.accepted(task_id, ctx.client.download_file_url(task_id));
    state.apply(&report);

    println!("{} {}", style(format!("{task_id}:")).bold(), state.label());
    if let Some(link) = state.download_url() {
        println!("{} {link}", style("Download:").green());
    }
    Ok(!matches!(state, TaskState::Failed { .. }))
}

async fn run_fetch(ctx: &Context, task_id: &str) -> VidgrabResult<bool> {
    let spinner = spinner(ctx, "Fetching file".to_string());
    let saved = cancellable(
        &ctx.cancel,
        ctx.client.download_file(task_id, &ctx.output_dir),
    )
    .await;
    spinner.finish_and_clear();
    print_saved(&saved?, ctx.simple);
    Ok(true)
}

async fn run_health(ctx: &Context) -> VidgrabResult<bool> {
    let health = cancellable(&ctx.cancel, ctx.client.health()).await?;
    let service = health.service.as_deref().unwrap_or("backend");
    if health.status == "healthy" {
        println!(
            "{} {service} at {} is {}",
            style("✓").green(),
            ctx.client.base_url(),
            health.status
        );
        Ok(true)
    } else {
        println!(
            "{} {service} at {} reports {}",
            style("✗").red(),
            ctx.client.base_url(),
            health.status
        );
        Ok(false)
    }
}

fn progress_bar(ctx: &Context) -> ProgressBar {
    if ctx.simple {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    let bar_style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(bar_style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spinner(ctx: &Context, message: String) -> ProgressBar {
    if ctx.simple {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn render_state(bar: &ProgressBar, state: &TaskState) {
    if let Some(progress) = state.progress() {
        bar.set_position(progress.clamp(0.0, 100.0) as u64);
    }
    bar.set_message(state.label());
}

fn print_saved(saved: &SavedFile, simple: bool) {
    if simple {
        println!("{}", saved.path.display());
        return;
    }
    println!(
        "{} {} ({})",
        style("Saved:").green(),
        saved.path.display(),
        vidgrab_core::format_file_size(Some(saved.bytes))
    );
}

fn print_summary(total: usize, success: usize, failed: usize) {
    println!(
        "{} Total: {} | Success: {} | Failed: {}",
        style("Summary:").bold(),
        total,
        success,
        failed
    );
}

use clap::{Parser, Subcommand};
use signalflow_ads::ad_tag::{
    resolve_ad_tag, ClientInfo, ClientInfoLookup, HttpClientInfoLookup, StaticClientInfo,
};
use signalflow_ads::beacon::{BeaconSender, HttpBeaconSender};
use signalflow_ads::config::PlayerConfig;
use signalflow_ads::sim::{CandidateOutcome, SimOptions, Simulation};
use signalflow_ads::video_surface::{PreloadStatus, SurfaceEvent};
use signalflow_ads::waterfall::Waterfall;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Timer deadlines followed per simulation before giving up.
const MAX_TIMER_STEPS: usize = 600;

#[derive(Parser)]
#[command(name = "signalflow-ads", about = "Ad insertion controller CLI")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ad session against the scripted provider and print the transcript
    Simulate {
        /// Creative parameters as JSON, or @path to read them from a file
        #[arg(short, long, conflicts_with = "tag")]
        params: Option<String>,
        /// Single ad tag instead of a waterfall; macros are expanded when
        /// --ua, --ip or --lookup is given
        #[arg(short, long)]
        tag: Option<String>,
        /// User agent for --tag macros
        #[arg(long, requires = "tag")]
        ua: Option<String>,
        /// Client IP for --tag macros
        #[arg(long, requires = "tag")]
        ip: Option<String>,
        /// Resolve --tag macros through the configured client-info endpoint
        #[arg(long, requires = "tag")]
        lookup: bool,
        /// Outcome per request, in order (fill, nonlinear, error, playback-error, empty, silent)
        #[arg(short, long, value_delimiter = ',')]
        outcomes: Vec<CandidateOutcome>,
        /// Fill probability once the outcome list runs out
        #[arg(long)]
        fill_rate: Option<f64>,
        /// Seed for --fill-rate draws
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Print the waterfall and outcome plan without running
        #[arg(long)]
        dry_run: bool,
        /// Host page URL carrying the skip exit parameter
        #[arg(long)]
        page_url: Option<String>,
        /// Make the content element wait for metadata before the first request
        #[arg(long)]
        metadata_wait: bool,
        /// Fire request/impression beacons over HTTP instead of recording them
        #[arg(long)]
        send_beacons: bool,
    },
    /// Fill in the macros of an ad tag template
    ExpandTag {
        /// Template containing [USER_AGENT], [IP], [CACHE_BUSTER], [WIDTH], [HEIGHT]
        template: String,
        /// User agent to substitute (default: Mozilla/5.0)
        #[arg(long)]
        ua: Option<String>,
        /// Client IP to substitute (default: 0.0.0.0)
        #[arg(long)]
        ip: Option<String>,
        /// Ask the configured client-info endpoint instead of using --ua/--ip
        #[arg(long)]
        lookup: bool,
    },
    /// Player configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the current configuration
    Show,
    /// Print the config file location
    Path,
    /// Set the skip cooldown in seconds
    SetCooldown {
        secs: u32,
    },
    /// Set the exit URL used when the page carries none
    SetFallback {
        url: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(PlayerConfig::default_path);
    let mut config = PlayerConfig::load_from(&config_path);

    match cli.command {
        Commands::Simulate {
            params,
            tag,
            ua,
            ip,
            lookup,
            outcomes,
            fill_rate,
            seed,
            dry_run,
            page_url,
            metadata_wait,
            send_beacons,
        } => {
            let expand = lookup || ua.is_some() || ip.is_some();
            let template = tag.clone().filter(|_| expand);
            let waterfall = match load_waterfall(params, tag) {
                Ok(w) => w,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };

            if dry_run {
                print_plan(&waterfall, &outcomes, fill_rate, seed);
                return;
            }

            let beacons: Option<Arc<dyn BeaconSender>> = if send_beacons {
                let timeout = Duration::from_millis(config.beacon_timeout_ms);
                Some(Arc::new(HttpBeaconSender::new(timeout)))
            } else {
                None
            };
            let client = template
                .as_ref()
                .map(|_| client_lookup(&config, lookup, ua, ip));
            let options = SimOptions {
                config,
                outcomes,
                fill_rate: fill_rate.map(|rate| (rate, seed)),
                unsupported: Vec::new(),
                preload: if metadata_wait {
                    PreloadStatus::AwaitingMetadata
                } else {
                    PreloadStatus::Ready
                },
                page_url,
                beacons,
            };
            let sim = match (template, client) {
                (Some(template), Some(client)) => client
                    .and_then(|client| {
                        Simulation::from_tag_template(&template, client.as_ref(), options)
                            .map_err(|e| e.to_string())
                    }),
                _ => Ok(Simulation::new(waterfall, options)),
            };
            match sim {
                Ok(sim) => run_simulation(sim),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::ExpandTag {
            template,
            ua,
            ip,
            lookup,
        } => {
            let expanded = client_lookup(&config, lookup, ua, ip).and_then(|client| {
                resolve_ad_tag(&template, client.as_ref(), &config).map_err(|e| e.to_string())
            });
            match expanded {
                Ok(tag) => println!("{}", tag),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigCmd::Show => match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            },
            ConfigCmd::Path => println!("{}", config_path.display()),
            ConfigCmd::SetCooldown { secs } => {
                config.skip_cooldown_secs = secs;
                save_or_exit(&config, &config_path);
                println!("Skip cooldown: {}s", secs);
            }
            ConfigCmd::SetFallback { url } => {
                config.fallback_exit_url = url.clone();
                save_or_exit(&config, &config_path);
                println!("Fallback exit URL: {}", url);
            }
        },
    }
}

/// Client details for tag macros: the configured endpoint with `lookup`,
/// otherwise the given values.
fn client_lookup(
    config: &PlayerConfig,
    lookup: bool,
    ua: Option<String>,
    ip: Option<String>,
) -> Result<Box<dyn ClientInfoLookup>, String> {
    if lookup {
        let url = config
            .client_info_url
            .clone()
            .ok_or_else(|| "no client_info_url configured".to_string())?;
        let timeout = Duration::from_millis(config.beacon_timeout_ms);
        return Ok(Box::new(HttpClientInfoLookup::new(url, timeout)));
    }
    Ok(Box::new(StaticClientInfo(ClientInfo {
        ua: ua.unwrap_or_else(|| "Mozilla/5.0".to_string()),
        ip: ip.unwrap_or_else(|| "0.0.0.0".to_string()),
    })))
}

fn load_waterfall(params: Option<String>, tag: Option<String>) -> Result<Waterfall, String> {
    if let Some(tag) = tag {
        return Waterfall::from_ad_tag(&tag).map_err(|e| e.to_string());
    }
    let Some(params) = params else {
        return Err("one of --params or --tag is required".to_string());
    };
    let json = match params.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("read {}: {}", path, e))?,
        None => params,
    };
    Waterfall::from_creative_data(&json).map_err(|e| e.to_string())
}

fn print_plan(waterfall: &Waterfall, outcomes: &[CandidateOutcome], fill_rate: Option<f64>, seed: u64) {
    println!("Waterfall: {} candidate(s)", waterfall.len());
    for (i, candidate) in waterfall.iter().enumerate() {
        let outcome = match (outcomes.get(i), fill_rate) {
            (Some(o), _) => o.to_string(),
            (None, Some(rate)) => format!("random (fill {:.0}%, seed {})", rate * 100.0, seed),
            (None, None) => CandidateOutcome::Fill.to_string(),
        };
        println!("{:<3} {:<16} {}", i, outcome, candidate.ad_tag_url);
        if !candidate.request_url.is_empty() {
            println!("      request:    {}", candidate.request_url);
        }
        if !candidate.impression_url.is_empty() {
            println!("      impression: {}", candidate.impression_url);
        }
    }
}

fn run_simulation(mut sim: Simulation) {
    if let Err(e) = sim.click() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    sim.surface_event(SurfaceEvent::MetadataLoaded);
    sim.run_until_idle();

    for _ in 0..MAX_TIMER_STEPS {
        let Some(deadline) = sim.app.next_deadline() else {
            break;
        };
        let wait = deadline.saturating_duration_since(sim.now());
        sim.advance(wait);
        sim.run_until_idle();
    }

    sim.surface_event(SurfaceEvent::ContentEnded);
    sim.run_until_idle();

    println!("Host events:");
    for event in sim.host_events() {
        println!("  {:?}", event);
    }

    println!("Requested tags:");
    for tag in sim.provider.requested_tags() {
        println!("  {}", tag);
    }

    let beacons = sim.beacons.sent();
    if !beacons.is_empty() {
        println!("Beacons:");
        for url in beacons {
            println!("  {}", url);
        }
    }

    println!("Log:");
    for entry in sim.app.get_logs(None) {
        println!("  {} [{}] {}", entry.timestamp, entry.level, entry.message);
    }

    match serde_json::to_string_pretty(&sim.app.status()) {
        Ok(json) => println!("Status:\n{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}

fn save_or_exit(config: &PlayerConfig, path: &std::path::Path) {
    if let Err(e) = config.save_to(path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hive::config::Config;
use hive::core::{topological_sort, CliTool, StoryStatus, TopoSort};
use hive::orchestration::merge_queue::queue_depths;
use hive::orchestration::{
    ClaudeJudge, CompletionJudge, Fleet, Manager, SessionIo, StateDetector, TmuxFleet,
    TmuxSessions,
};
use hive::store::{Database, JsonStore};
use hive::tmux::Tmux;
use hive::{Error, Result};

/// Hive - manager loop for a fleet of AI coding agents
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HIVE_DEBUG=1    Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hive/hive.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the manager check loop
    Manager {
        /// Run a single check cycle and print its report
        #[arg(long)]
        once: bool,

        /// Seconds between ticks (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Classify the current screen of a session
    Classify {
        session: String,

        #[arg(long, value_enum, default_value = "claude")]
        cli: ToolArg,
    },

    /// Show stories, agents, escalations and merge queues
    Status,

    /// Print the dependency order of planned stories
    Order,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolArg {
    Claude,
    Codex,
    Gemini,
}

impl From<ToolArg> for CliTool {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Claude => CliTool::Claude,
            ToolArg::Codex => CliTool::Codex,
            ToolArg::Gemini => CliTool::Gemini,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    hive::log::init_with_debug(cli.debug);

    let config = Config::load()?;
    match cli.command {
        Command::Manager { once, interval } => run_manager(config, once, interval),
        Command::Classify { session, cli } => run_classify(&config, &session, cli.into()),
        Command::Status => run_status(),
        Command::Order => run_order(),
    }
}

fn open_database() -> Result<Database> {
    Ok(Database::new(JsonStore::open(Config::store_path()?)?))
}

fn run_manager(mut config: Config, once: bool, interval: Option<u64>) -> Result<()> {
    if !Tmux::is_available() {
        return Err(Error::Tmux("tmux is not installed".to_string()));
    }
    if let Some(secs) = interval {
        config.manager.interval_secs = secs.max(1);
    }

    let db = open_database()?;
    let io: Arc<dyn SessionIo> = Arc::new(TmuxSessions::from_config(&config.manager));
    let judge: Option<Arc<dyn CompletionJudge>> = config
        .completion
        .ai_enabled
        .then(|| Arc::new(ClaudeJudge::from_config(&config.completion)) as Arc<dyn CompletionJudge>);
    let fleet: Arc<dyn Fleet> = Arc::new(TmuxFleet::from_config(&config.manager, &config.scheduler));
    let mut manager = Manager::new(config, io, judge)?.with_fleet(fleet);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if once {
            let report = manager.tick(&db).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok::<(), Error>(());
        }

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for ctrl-c");
                return;
            }
            info!("ctrl-c received");
            on_signal.cancel();
        });
        manager.run(&db, cancel).await;
        Ok(())
    })
}

fn run_classify(config: &Config, session: &str, tool: CliTool) -> Result<()> {
    let text = Tmux::capture_pane_tail(session, config.manager.capture_lines)?;
    let detector = StateDetector::from_config(tool, &config.detection)?;
    let c = detector.detect(&text);
    println!("Session:     {}", session);
    println!("State:       {}", c.state());
    println!("Confidence:  {:.2}", c.confidence());
    println!("Waiting:     {}", c.is_waiting());
    println!("Needs human: {}", c.needs_human());
    println!("Reason:      {}", c.reason());
    if let Some(hint) = hive::orchestration::action_hint(c.state(), &text) {
        println!("Hint:        {}", hint);
    }
    Ok(())
}

fn run_status() -> Result<()> {
    let db = open_database()?;
    let (stories, agents, escalations, prs) = db.read(|s| {
        Ok((s.stories()?, s.agents()?, s.escalations()?, s.pull_requests()?))
    })?;

    println!("Stories ({}):", stories.len());
    for story in &stories {
        let agent = story
            .assigned_agent_id
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12} {:<13} c={:<2} {:<16} {}",
            story.id.as_str(),
            story.status.as_str(),
            story.complexity_score,
            agent,
            story.title
        );
    }

    println!();
    println!("Agents ({}):", agents.len());
    for agent in &agents {
        let story = agent
            .current_story_id
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<12} {:<8} {:<10} {}",
            agent.tmux_session,
            agent.tier.as_str(),
            agent.team,
            agent.status.to_string(),
            story
        );
    }

    let active: Vec<_> = escalations.iter().filter(|e| e.is_active()).collect();
    println!();
    println!("Active escalations ({}):", active.len());
    for e in active {
        println!("  {}  {:<24} {}", e.id.short(), e.from_agent, e.reason);
        if let Some(hint) = &e.action_hint {
            println!("      hint: {}", hint);
        }
    }

    println!();
    println!("Merge queues:");
    for (team, depth) in queue_depths(&prs) {
        println!("  {:<12} {}", team, depth);
    }
    Ok(())
}

fn run_order() -> Result<()> {
    let db = open_database()?;
    let planned = db.read(|s| s.stories_with_status(StoryStatus::Planned))?;
    match topological_sort(&planned) {
        TopoSort::Order(order) => {
            for (i, id) in order.iter().enumerate() {
                println!("{:>3}. {}", i + 1, id);
            }
        }
        TopoSort::Cycle(id) => {
            println!("No valid order: dependency cycle through {}", id);
        }
    }
    Ok(())
}

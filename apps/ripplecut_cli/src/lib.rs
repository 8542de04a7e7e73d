mod script;
mod session;

pub use script::{Script, SourceSpec, Step};
pub use session::{ClipReport, LaneReport, Report, Session, TransitionReport};

use anyhow::Context;
use clap::Parser;
use ripplecut_core::settings::EditorSettings;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "ripplecut")]
#[command(version)]
#[command(about = "Replay a timeline edit script and print the resulting layout as JSON")]
pub struct Args {
    /// Edit script (JSON)
    pub script: PathBuf,

    /// Editor settings (JSON); defaults apply when omitted
    pub settings: Option<PathBuf>,
}

/// Build the script's timeline, replay every step, and report the result.
pub fn replay(script: &Script, settings: EditorSettings) -> anyhow::Result<Report> {
    let mut session = Session::build(script, settings)?;
    session.run_script(script)?;
    Ok(session.report())
}

pub fn replay_file(script: &Path, settings: Option<&Path>) -> anyhow::Result<Report> {
    let settings = match settings {
        Some(path) => EditorSettings::load_from_file(path)
            .with_context(|| format!("failed to load settings {}", path.display()))?,
        None => EditorSettings::default(),
    };
    let script = Script::load(script)?;
    replay(&script, settings)
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let report = replay_file(&args.script, args.settings.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

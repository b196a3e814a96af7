//! 命令行定义（clap derive）

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slidesmith::workflow::SlideId;

/// Slidesmith: collect material, plan a deck, design every slide
#[derive(Parser, Debug)]
#[command(name = "slidesmith")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task
    New {
        name: String,
        /// Workspace directory (default: the task's own workspace/)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// List tasks, most recent first
    List,

    /// Run the collector on a request (repeatable while collecting)
    Collect { task_id: String, request: String },

    /// Switch to the architect and extract the plan
    Architect { task_id: String },

    /// Inspect or edit the plan
    Plan {
        task_id: String,
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Start generation and wait for the summary (Ctrl-C cancels)
    Generate { task_id: String },

    /// Show manifest progress
    Progress { task_id: String },

    /// Regenerate one slide
    Regen {
        task_id: String,
        slide: SlideId,
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Print a finished slide's HTML
    Show { task_id: String, slide: SlideId },

    /// Mark the task completed
    Complete {
        task_id: String,
        /// Complete even though some slides failed
        #[arg(long)]
        ack_failures: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanAction {
    /// Print the current plan
    Show,
    /// Replace the plan with a JSON file
    Import { file: PathBuf },
    /// Append a slide with a fresh id
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    /// Remove a slide (its id is never reused)
    Remove { slide: SlideId },
    /// Move a slide to a 0-based position
    Move { slide: SlideId, index: usize },
    /// Change a slide's title or content
    Update {
        slide: SlideId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Drop the plan and go back to collecting
    Discard,
    /// Leave designing and edit the plan again (manifest is dropped)
    Reopen,
}

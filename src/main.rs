//! Slidesmith 命令行入口
//!
//! 初始化日志与配置，构造流水线并执行一个子命令。

mod cli;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use slidesmith::config::load_config;
use slidesmith::core::{Pipeline, TaskStore};
use slidesmith::observability;
use slidesmith::react::RunEvent;
use slidesmith::workflow::{ManifestEntry, ManifestSummary, Plan};
use tokio::sync::mpsc;

use cli::{Cli, Command, PlanAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let json = cli.json;

    // 列任务不需要模型
    if let Command::List = cli.command {
        let tasks = TaskStore::new(&cfg.app.tasks_dir)
            .load_all()
            .await
            .context("Failed to list tasks")?;
        if json {
            return print_json(&tasks);
        }
        for t in tasks {
            println!(
                "{}  {:<13} {}  {}",
                t.id,
                t.phase.current(),
                t.updated_at.format("%Y-%m-%d %H:%M"),
                t.name
            );
        }
        return Ok(());
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(cfg)
        .await
        .context("Failed to create pipeline")?
        .with_event_tx(event_tx);
    if !json {
        tokio::spawn(async move {
            while let Some(ev) = event_rx.recv().await {
                print_event(&ev);
            }
        });
    }

    match cli.command {
        Command::List => {}
        Command::New { name, workspace } => {
            let task = pipeline.create_task(&name, workspace).await?;
            if json {
                return print_json(&task);
            }
            println!("created task {} (workspace: {})", task.id, task.workspace.display());
        }
        Command::Collect { task_id, request } => {
            let out = pipeline.start_collecting(&task_id, &request).await?;
            if json {
                return print_json(&out);
            }
            println!("{}", out.reply);
        }
        Command::Architect { task_id } => {
            let plan = pipeline.run_architect(&task_id).await?;
            print_plan(&plan, json)?;
        }
        Command::Plan { task_id, action } => plan_command(&pipeline, &task_id, action, json).await?,
        Command::Generate { task_id } => {
            let started = pipeline.start_generation(&task_id).await?;
            eprintln!("generating {} slide(s)...", started.pending + started.failed);
            let summary = tokio::select! {
                s = pipeline.wait_for_generation(&task_id) => s?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("cancelling...");
                    pipeline.cancel_generation(&task_id).await?;
                    pipeline.wait_for_generation(&task_id).await?
                }
            };
            print_summary(&summary, json)?;
        }
        Command::Progress { task_id } => {
            let entries = pipeline.get_manifest(&task_id).await?;
            if json {
                return print_json(&entries);
            }
            print_entries(&entries);
            print_summary(&ManifestSummary::from_entries(&entries), false)?;
        }
        Command::Regen {
            task_id,
            slide,
            feedback,
        } => {
            let entry = pipeline.regenerate_slide(&task_id, slide, feedback).await?;
            if json {
                return print_json(&entry);
            }
            print_entries(std::slice::from_ref(&entry));
        }
        Command::Show { task_id, slide } => {
            println!("{}", pipeline.get_slide_artifact(&task_id, slide).await?);
        }
        Command::Complete {
            task_id,
            ack_failures,
        } => {
            let task = pipeline.complete_task(&task_id, ack_failures).await?;
            if json {
                return print_json(&task);
            }
            println!("task {} is {}", task.id, task.phase.current());
        }
    }
    Ok(())
}

async fn plan_command(
    pipeline: &Pipeline,
    task_id: &str,
    action: PlanAction,
    json: bool,
) -> anyhow::Result<()> {
    let plan = match action {
        PlanAction::Show => current_plan(pipeline, task_id).await?,
        PlanAction::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let plan: Plan = serde_json::from_str(&raw).context("Invalid plan JSON")?;
            pipeline.save_plan(task_id, plan).await?
        }
        PlanAction::Add { title, content } => {
            let mut plan = current_plan(pipeline, task_id).await?;
            let id = plan.add_slide(title, content);
            eprintln!("added {id}");
            pipeline.save_plan(task_id, plan).await?
        }
        PlanAction::Remove { slide } => {
            let mut plan = current_plan(pipeline, task_id).await?;
            plan.remove_slide(slide)?;
            pipeline.save_plan(task_id, plan).await?
        }
        PlanAction::Move { slide, index } => {
            let mut plan = current_plan(pipeline, task_id).await?;
            plan.move_slide(slide, index)?;
            pipeline.save_plan(task_id, plan).await?
        }
        PlanAction::Update {
            slide,
            title,
            content,
        } => {
            let mut plan = current_plan(pipeline, task_id).await?;
            plan.update_slide(slide, title, content)?;
            pipeline.save_plan(task_id, plan).await?
        }
        PlanAction::Discard => {
            pipeline.discard_plan(task_id).await?;
            println!("plan discarded; task is collecting again");
            return Ok(());
        }
        PlanAction::Reopen => {
            pipeline.return_to_plan_editing(task_id).await?;
            current_plan(pipeline, task_id).await?
        }
    };
    print_plan(&plan, json)
}

async fn current_plan(pipeline: &Pipeline, task_id: &str) -> anyhow::Result<Plan> {
    pipeline
        .get_plan(task_id)
        .await?
        .context("task has no plan yet")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_plan(plan: &Plan, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(plan);
    }
    println!("{}", plan.title);
    if let Some(theme) = &plan.theme {
        println!("theme: {theme}");
    }
    for (i, s) in plan.slides.iter().enumerate() {
        println!("{:>3}. [{}] {}", i + 1, s.id, s.title);
    }
    Ok(())
}

fn print_entries(entries: &[ManifestEntry]) {
    for e in entries {
        let err = e.last_error.as_deref().unwrap_or("");
        println!(
            "{:<10} {:<8} attempts={} {}  {}",
            e.slide_id.to_string(),
            e.status,
            e.attempts,
            e.title,
            err
        );
    }
}

fn print_summary(summary: &ManifestSummary, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(summary);
    }
    println!(
        "total {}  done {}  failed {}  running {}  pending {}",
        summary.total, summary.done, summary.failed, summary.running, summary.pending
    );
    if summary.unsaved {
        eprintln!("warning: the manifest could not be written to disk; progress may be lost on restart");
    }
    Ok(())
}

fn print_event(ev: &RunEvent) {
    match ev {
        RunEvent::Iteration {
            role,
            iteration,
            max_iterations,
        } => eprintln!("[{role}] turn {iteration}/{max_iterations}"),
        RunEvent::AssistantText { role, text } => eprintln!("[{role}] {text}"),
        RunEvent::ToolCall { role, tool, .. } => eprintln!("[{role}] -> {tool}"),
        RunEvent::ToolResult {
            role,
            tool,
            is_error,
        } => eprintln!("[{role}] <- {tool}{}", if *is_error { " (error)" } else { "" }),
        RunEvent::Completed { .. } => {}
    }
}

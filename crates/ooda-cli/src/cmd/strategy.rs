use crate::cmd::{read_json, Project};
use crate::output::{print_json, print_table, truncate, ts};
use clap::Subcommand;
use ooda_core::action::ActionStore;
use ooda_core::strategy::{derived_tasks, fingerprint, normalize, Strategy, StrategyCache};
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum StrategySubcommand {
    /// Show the latest strategy for an agent
    Show { agent: String },

    /// List every strategy generated for an agent, newest first
    History { agent: String },

    /// Report whether the cached strategy still matches a set of inputs
    Check {
        agent: String,
        /// Strategist inputs as JSON (or @file)
        #[arg(long)]
        inputs: String,
    },

    /// Derive action drafts from the latest strategy's plan
    Tasks {
        agent: String,
        /// Persist the derived actions as pending
        #[arg(long)]
        save: bool,
    },
}

pub fn run(root: &Path, subcommand: StrategySubcommand, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let cache = StrategyCache::from_config(project.store.clone(), &project.config);

    match subcommand {
        StrategySubcommand::Show { agent } => {
            let latest = cache.latest_strategy(&agent)?;
            if json {
                return print_json(&latest);
            }
            match latest {
                Some(s) => show(&s),
                None => println!("no strategy for {agent}"),
            }
            Ok(())
        }

        StrategySubcommand::History { agent } => {
            let history = cache.strategy_history(&agent)?;
            if json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("no strategy for {agent}");
                return Ok(());
            }
            print_table(
                &["ID", "FINGERPRINT", "TASKS", "CREATED", "HEADLINE"],
                history
                    .iter()
                    .map(|s| {
                        vec![
                            s.id.to_string(),
                            s.data_fingerprint.chars().take(12).collect(),
                            s.plan.len().to_string(),
                            ts(&s.created_at),
                            truncate(&s.headline, 48),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        StrategySubcommand::Check { agent, inputs } => {
            let normalized = normalize(&read_json(&inputs)?, &project.config.strategy.ignored_keys);
            let fp = fingerprint(&normalized);
            let latest = cache.latest_strategy(&agent)?;
            let fresh = latest.as_ref().is_some_and(|s| s.data_fingerprint == fp);
            if json {
                return print_json(&json!({
                    "fingerprint": fp,
                    "fresh": fresh,
                    "strategy_id": latest.as_ref().map(|s| s.id),
                }));
            }
            match latest {
                Some(s) if fresh => println!("fresh: {} matches {fp}", s.id),
                Some(s) => println!("stale: {} was built from {}", s.id, s.data_fingerprint),
                None => println!("missing: no strategy for {agent}"),
            }
            Ok(())
        }

        StrategySubcommand::Tasks { agent, save } => {
            let Some(strategy) = cache.latest_strategy(&agent)? else {
                anyhow::bail!("no strategy for {agent}");
            };
            let drafts = derived_tasks(&strategy);
            let saved = if save {
                ActionStore::new(project.store.clone()).save_actions(&agent, drafts.clone())?
            } else {
                Vec::new()
            };
            if json {
                return print_json(&json!({ "tasks": drafts, "saved": saved }));
            }
            if drafts.is_empty() {
                println!("strategy {} has no actionable tasks", strategy.id);
                return Ok(());
            }
            print_table(
                &["ID", "PRIORITY", "TITLE"],
                drafts
                    .iter()
                    .map(|d| {
                        vec![
                            d.id.clone().unwrap_or_default(),
                            d.priority.to_string(),
                            truncate(&d.title, 60),
                        ]
                    })
                    .collect(),
            );
            if save {
                println!("saved {} action(s)", saved.len());
            }
            Ok(())
        }
    }
}

fn show(s: &Strategy) {
    println!("ID:          {}", s.id);
    println!("Agent:       {}", s.agent_name);
    println!("Created:     {}", ts(&s.created_at));
    println!("Fingerprint: {}", s.data_fingerprint);
    println!("Headline:    {}", s.headline);
    if !s.body.is_empty() {
        println!();
        println!("{}", s.body);
    }
    if !s.plan.is_empty() {
        println!();
        println!("Plan:");
        for (i, task) in s.plan.iter().enumerate() {
            println!("  {}. [{}] {}", i + 1, task.priority, task.title);
        }
    }
}

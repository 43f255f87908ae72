use crate::cmd::{parse_id, read_json, Project};
use crate::output::{print_json, print_table, truncate, ts};
use anyhow::Context;
use clap::Subcommand;
use ooda_core::action::ActionDraft;
use ooda_core::cycle::{Cycle, CycleEngine, LearningDraft};
use serde_json::Value;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum CycleSubcommand {
    /// Start a new cycle for an agent
    Start { agent: String },

    /// Store observations and move to orienting
    Observe {
        id: String,
        /// Observation bundle as JSON (or @file)
        #[arg(long)]
        data: String,
    },

    /// Store analysis and move to deciding
    Orient {
        id: String,
        /// Analysis document as JSON (or @file)
        #[arg(long)]
        data: String,
    },

    /// Save proposed actions and move to acting
    Decide {
        id: String,
        /// JSON array of action drafts (or @file)
        #[arg(long)]
        actions: String,
    },

    /// Record an executed action against the cycle
    RecordAction {
        id: String,
        action_id: String,
        /// Action input as JSON
        #[arg(long, default_value = "{}")]
        data: String,
        /// Execution result as JSON
        #[arg(long, default_value = "{}")]
        result: String,
    },

    /// Close the act phase and move to reflecting
    CompleteAct { id: String },

    /// Store the reflection and learnings, completing the cycle
    Reflect {
        id: String,
        /// Reflection document as JSON (or @file)
        #[arg(long, default_value = "{}")]
        reflection: String,
        /// JSON array of learnings (or @file)
        #[arg(long)]
        learnings: Option<String>,
    },

    /// Mark a cycle failed
    Fail { id: String, message: String },

    /// List cycles, newest first
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one cycle
    Show { id: String },

    /// Show the agent's open cycle, if any
    Current { agent: String },

    /// Cycle and learning totals for an agent
    Stats { agent: String },

    /// Learnings recorded by an agent, newest first
    Learnings {
        agent: String,
        #[arg(long = "type")]
        learning_type: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: CycleSubcommand, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let engine = CycleEngine::new(project.store.clone());

    match subcommand {
        CycleSubcommand::Start { agent } => {
            let cycle = engine.start_cycle(&agent)?;
            report(&cycle, json, "started")
        }

        CycleSubcommand::Observe { id, data } => {
            let cycle = engine.observe(parse_id(&id)?, read_json(&data)?)?;
            report(&cycle, json, "observed")
        }

        CycleSubcommand::Orient { id, data } => {
            let cycle = engine.orient(parse_id(&id)?, read_json(&data)?)?;
            report(&cycle, json, "oriented")
        }

        CycleSubcommand::Decide { id, actions } => {
            let id = parse_id(&id)?;
            let drafts: Vec<ActionDraft> = serde_json::from_value(read_json(&actions)?)
                .context("actions must be a JSON array of action drafts")?;
            let cycle = engine.decide_actions(id, drafts)?;
            report(&cycle, json, "decided")
        }

        CycleSubcommand::RecordAction {
            id,
            action_id,
            data,
            result,
        } => {
            let cycle =
                engine.record_action(parse_id(&id)?, &action_id, read_json(&data)?, read_json(&result)?)?;
            if json {
                return print_json(&cycle);
            }
            if let Some(rec) = cycle.actions_taken.last() {
                println!("recorded {} on cycle #{}", rec.action_id, cycle.cycle_number);
                if rec.after_close {
                    println!("  note: cycle was already {}", cycle.status);
                }
                if rec.unplanned {
                    println!("  note: action was not among the cycle's decisions");
                }
            }
            Ok(())
        }

        CycleSubcommand::CompleteAct { id } => {
            let cycle = engine.complete_act_phase(parse_id(&id)?)?;
            report(&cycle, json, "act phase complete")
        }

        CycleSubcommand::Reflect {
            id,
            reflection,
            learnings,
        } => {
            let learnings: Vec<LearningDraft> = match learnings {
                Some(arg) => serde_json::from_value(read_json(&arg)?)
                    .context("learnings must be a JSON array")?,
                None => Vec::new(),
            };
            let cycle = engine.reflect(parse_id(&id)?, read_json(&reflection)?, learnings)?;
            report(&cycle, json, "completed")
        }

        CycleSubcommand::Fail { id, message } => {
            let cycle = engine.fail_cycle(parse_id(&id)?, &message)?;
            report(&cycle, json, "failed")
        }

        CycleSubcommand::List { agent, limit } => {
            let cycles = engine.list_cycles(agent.as_deref(), limit)?;
            if json {
                return print_json(&cycles);
            }
            if cycles.is_empty() {
                println!("no cycles");
                return Ok(());
            }
            print_table(
                &["ID", "AGENT", "#", "STATUS", "ACTIONS", "CREATED"],
                cycles
                    .iter()
                    .map(|c| {
                        vec![
                            c.id.to_string(),
                            c.agent_name.clone(),
                            c.cycle_number.to_string(),
                            c.status.to_string(),
                            format!("{}/{}", c.actions_taken.len(), c.decisions.len()),
                            ts(&c.created_at),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        CycleSubcommand::Show { id } => {
            let cycle = engine.get_cycle(parse_id(&id)?)?;
            if json {
                return print_json(&cycle);
            }
            show(&cycle);
            Ok(())
        }

        CycleSubcommand::Current { agent } => {
            let cycle = engine.current_cycle(&agent)?;
            if json {
                return print_json(&cycle);
            }
            match cycle {
                Some(c) => show(&c),
                None => println!("no open cycle for {agent}"),
            }
            Ok(())
        }

        CycleSubcommand::Stats { agent } => {
            let stats = engine.agent_stats(&agent)?;
            if json {
                return print_json(&stats);
            }
            println!("Agent:        {}", stats.agent_name);
            println!(
                "Cycles:       {} ({} completed, {} failed)",
                stats.total_cycles, stats.completed_cycles, stats.failed_cycles
            );
            println!("Success rate: {:.1}%", stats.success_rate);
            println!("Learnings:    {}", stats.total_learnings);
            for (kind, n) in &stats.learning_breakdown {
                println!("  {kind:<12} {n}");
            }
            Ok(())
        }

        CycleSubcommand::Learnings {
            agent,
            learning_type,
            limit,
        } => {
            let learnings = engine.learnings(&agent, learning_type.as_deref(), limit)?;
            if json {
                return print_json(&learnings);
            }
            if learnings.is_empty() {
                println!("no learnings for {agent}");
                return Ok(());
            }
            print_table(
                &["TYPE", "CONFIDENCE", "CYCLE", "CONTEXT", "CREATED"],
                learnings
                    .iter()
                    .map(|l| {
                        vec![
                            l.learning_type.clone(),
                            format!("{:.2}", l.confidence),
                            l.cycle_id.to_string(),
                            truncate(&l.context.to_string(), 48),
                            ts(&l.created_at),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn report(cycle: &Cycle, json: bool, verb: &str) -> anyhow::Result<()> {
    if json {
        return print_json(cycle);
    }
    println!(
        "{verb}: {} #{} ({}) id={}",
        cycle.agent_name, cycle.cycle_number, cycle.status, cycle.id
    );
    Ok(())
}

fn show(cycle: &Cycle) {
    println!("ID:      {}", cycle.id);
    println!("Agent:   {} #{}", cycle.agent_name, cycle.cycle_number);
    println!("Status:  {}", cycle.status);
    println!("Created: {}", ts(&cycle.created_at));
    if let Some(done) = &cycle.completed_at {
        println!("Closed:  {}", ts(done));
    }
    if let Some(err) = &cycle.error_message {
        println!("Error:   {err}");
    }

    println!("Phases:");
    for p in &cycle.phase_history {
        let exited = p.exited.as_ref().map(ts).unwrap_or_else(|| "-".to_string());
        println!("  {:<11} {} → {}", p.status.as_str(), ts(&p.entered), exited);
    }

    if let Some(obs) = &cycle.observations {
        println!("Observations: {}", summarize(obs));
    }
    if let Some(analysis) = &cycle.analysis {
        println!("Analysis:     {}", summarize(analysis));
    }

    if !cycle.decisions.is_empty() {
        println!("Decisions:");
        for id in &cycle.decisions {
            let done = cycle.actions_taken.iter().any(|r| &r.action_id == id);
            println!("  [{}] {id}", if done { "x" } else { " " });
        }
    }
    let extra: Vec<_> = cycle.actions_taken.iter().filter(|r| r.unplanned).collect();
    if !extra.is_empty() {
        println!("Unplanned actions:");
        for r in extra {
            println!("  {} at {}", r.action_id, ts(&r.executed_at));
        }
    }
}

fn summarize(v: &Value) -> String {
    match v.as_object() {
        Some(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            truncate(&format!("{{{}}}", keys.join(", ")), 72)
        }
        None => truncate(&v.to_string(), 72),
    }
}

use crate::cmd::{read_json, Project};
use crate::output::{print_json, print_table, truncate, ts};
use clap::Subcommand;
use ooda_core::action::{Action, ActionStore};
use ooda_core::types::ActionStatus;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// List actions, newest first
    List {
        #[arg(long)]
        agent: Option<String>,
        /// Filter by status: pending | executing | completed | failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Pending actions, most urgent first
    Pending {
        #[arg(long)]
        agent: Option<String>,
    },

    /// Show one action
    Show { id: String },

    /// Move an action to a new status
    Update {
        id: String,
        /// executing | completed | failed
        #[arg(long)]
        status: String,
        /// Execution result as JSON (or @file)
        #[arg(long)]
        result: Option<String>,
        /// Error message for a failed action
        #[arg(long)]
        error: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let store = ActionStore::new(project.store);

    match subcommand {
        ActionSubcommand::List {
            agent,
            status,
            limit,
        } => {
            let status: Option<ActionStatus> = status.map(|s| s.parse()).transpose()?;
            let actions = store.get_actions(agent.as_deref(), status, limit)?;
            list(&actions, json)
        }

        ActionSubcommand::Pending { agent } => {
            let actions = store.pending_actions(agent.as_deref())?;
            list(&actions, json)
        }

        ActionSubcommand::Show { id } => {
            let action = store.get_action(&id)?;
            if json {
                return print_json(&action);
            }
            println!("ID:        {}", action.id);
            println!("Agent:     {}", action.agent_name);
            println!("Type:      {}", action.action_type);
            println!("Priority:  {}", action.priority);
            println!("Status:    {}", action.status);
            println!("Title:     {}", action.title);
            if !action.description.is_empty() {
                println!("Details:   {}", action.description);
            }
            if !action.recommended_operation.is_empty() {
                println!("Operation: {}", action.recommended_operation);
            }
            if let Some(outcome) = &action.expected_outcome {
                println!("Expected:  {outcome}");
            }
            if let Some(cycle) = &action.cycle_id {
                println!("Cycle:     {cycle}");
            }
            println!("Created:   {}", ts(&action.created_at));
            if let Some(t) = &action.executed_at {
                println!("Executed:  {}", ts(t));
            }
            if let Some(t) = &action.completed_at {
                println!("Finished:  {}", ts(t));
            }
            if let Some(result) = &action.execution_result {
                println!("Result:    {result}");
            }
            if let Some(err) = &action.error_message {
                println!("Error:     {err}");
            }
            Ok(())
        }

        ActionSubcommand::Update {
            id,
            status,
            result,
            error,
        } => {
            let status: ActionStatus = status.parse()?;
            let result = result.as_deref().map(read_json).transpose()?;
            let action = store.update_action_status(&id, status, result, error)?;
            if json {
                return print_json(&action);
            }
            println!("{} is now {}", action.id, action.status);
            Ok(())
        }
    }
}

fn list(actions: &[Action], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("no actions");
        return Ok(());
    }
    print_table(
        &["ID", "PRIORITY", "STATUS", "TITLE"],
        actions
            .iter()
            .map(|a| {
                vec![
                    a.id.clone(),
                    a.priority.to_string(),
                    a.status.to_string(),
                    truncate(&a.title, 60),
                ]
            })
            .collect(),
    );
    Ok(())
}

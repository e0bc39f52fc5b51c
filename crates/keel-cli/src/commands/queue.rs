use crate::cli::QueueCommands;
use crate::commands::common::format_operation_lines;
use crate::context::ClientContext;
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, ctx: &ClientContext) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => {
            let operations = ctx.queue.pending().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&operations)?);
            } else if operations.is_empty() {
                println!("No pending operations.");
            } else {
                for line in format_operation_lines(&operations) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Flush => {
            if ctx.queue.client().is_none() {
                return Err(CliError::SyncNotConfigured);
            }
            let before = ctx.queue.len().await;
            let remaining = ctx.flush_queue().await;
            if ctx.queue.is_online() {
                println!(
                    "Replayed {} operation(s), {remaining} pending",
                    before.saturating_sub(remaining)
                );
            } else {
                println!("Server unreachable, {remaining} operation(s) pending");
            }
        }
        QueueCommands::Clear => {
            let count = ctx.queue.len().await;
            ctx.queue.clear().await?;
            println!("Discarded {count} pending operation(s)");
        }
    }
    Ok(())
}

use keel_core::Task;

use crate::cli::TaskCommands;
use crate::commands::common::{
    format_task_lines, join_words, report_pending, resolve_record, task_to_list_item,
    TaskListItem,
};
use crate::context::ClientContext;
use crate::error::CliError;

pub async fn run_task(command: TaskCommands, ctx: &ClientContext) -> Result<(), CliError> {
    match command {
        TaskCommands::Add { title, due } => {
            let mut task = Task::new(join_words(&title)?);
            if let Some(due) = due {
                task = task.with_due(due);
            }
            let id = task.id.clone();
            ctx.tasks().queue_create(task).await?;
            println!("{id}");
        }
        TaskCommands::List { all, json } => {
            let mut tasks = ctx.tasks().load_local().await;
            if !all {
                tasks.retain(|task| !task.done);
            }
            tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            if json {
                let items = tasks.iter().map(task_to_list_item).collect::<Vec<TaskListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_task_lines(&tasks) {
                    println!("{line}");
                }
            }
            return Ok(());
        }
        TaskCommands::Done { id } => update_task(ctx, &id, |task| task.set_done(true)).await?,
        TaskCommands::Reopen { id } => update_task(ctx, &id, |task| task.set_done(false)).await?,
        TaskCommands::Rename { id, title } => {
            let title = join_words(&title)?;
            update_task(ctx, &id, |task| task.rename(title)).await?;
        }
        TaskCommands::Delete { id } => {
            let manager = ctx.tasks();
            let tasks = manager.load_local().await;
            let task_id = resolve_record(&tasks, &id, "task")?.id.clone();
            manager.queue_delete(&task_id).await?;
            println!("{task_id}");
        }
    }

    report_pending(ctx).await;
    Ok(())
}

async fn update_task(
    ctx: &ClientContext,
    query: &str,
    change: impl FnOnce(&mut Task),
) -> Result<(), CliError> {
    let manager = ctx.tasks();
    let tasks = manager.load_local().await;
    let mut task = resolve_record(&tasks, query, "task")?.clone();
    change(&mut task);
    let id = task.id.clone();
    manager.queue_update(task).await?;
    println!("{id}");
    Ok(())
}

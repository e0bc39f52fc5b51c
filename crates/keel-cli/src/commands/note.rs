use keel_core::Note;

use crate::cli::NoteCommands;
use crate::commands::common::{
    format_note_lines, join_words, note_to_list_item, report_pending, resolve_record,
    NoteListItem,
};
use crate::context::ClientContext;
use crate::error::CliError;

pub async fn run_note(command: NoteCommands, ctx: &ClientContext) -> Result<(), CliError> {
    match command {
        NoteCommands::Add { content, title } => {
            let mut note = Note::new(join_words(&content)?);
            if let Some(title) = title {
                note = note.with_title(title.trim());
            }
            let id = note.id.clone();
            ctx.notes().queue_create(note).await?;
            println!("{id}");
        }
        NoteCommands::List { limit, json } => {
            let mut notes = ctx.notes().load_local().await;
            notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            notes.truncate(limit);

            if json {
                let items = notes.iter().map(note_to_list_item).collect::<Vec<NoteListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_note_lines(&notes) {
                    println!("{line}");
                }
            }
            return Ok(());
        }
        NoteCommands::Edit { id, content } => {
            let content = join_words(&content)?;
            let manager = ctx.notes();
            let notes = manager.load_local().await;
            let mut note = resolve_record(&notes, &id, "note")?.clone();
            note.edit(content);
            let note_id = note.id.clone();
            manager.queue_update(note).await?;
            println!("{note_id}");
        }
        NoteCommands::Delete { id } => {
            let manager = ctx.notes();
            let notes = manager.load_local().await;
            let note_id = resolve_record(&notes, &id, "note")?.id.clone();
            manager.queue_delete(&note_id).await?;
            println!("{note_id}");
        }
    }

    report_pending(ctx).await;
    Ok(())
}

use crate::store::FileStore;

/// Print the stored conversations of a user
pub async fn list_conversations(store: &FileStore, user_id: &str) -> anyhow::Result<()> {
    let conversations = store.list_conversations(user_id).await?;
    if conversations.is_empty() {
        println!("No stored conversations for {}.", user_id);
        return Ok(());
    }

    println!("Conversations for {}:\n", user_id);
    println!("{:<38} {:<20} {:<8}", "ID", "Created", "Msgs");
    println!("{}", "-".repeat(68));
    for c in conversations {
        println!("{:<38} {:<20} {:<8}", c.id, c.created_at_display(), c.message_count);
    }
    println!("\nShow one with: strand show <conversation-id>");
    Ok(())
}

//! Memory CLI commands: store, recall, search, recent, relations, facts,
//! stats, consolidate.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use sigma_core::memory::extractor::{
    parse_entities_response, parse_facts_response, SuppliedExtractor,
};
use sigma_types::memory::{Fact, FactQuery, MemoryItem, MemoryItemKind, MemorySource, Message};

use crate::state::AppState;

/// Build the extractor for `sigma store` from the optional JSON flags.
///
/// Entities fall back to heuristic detection when not supplied.
pub fn supplied_extractor(
    entities_json: Option<&str>,
    facts_json: Option<&str>,
) -> Result<SuppliedExtractor> {
    let mut extractor = SuppliedExtractor::new();
    if let Some(raw) = entities_json {
        let entities = parse_entities_response(raw).context("Invalid --entities-json")?;
        extractor = extractor.with_entities(entities);
    }
    if let Some(raw) = facts_json {
        let facts = parse_facts_response(raw).context("Invalid --facts-json")?;
        extractor = extractor.with_facts(facts);
    }
    Ok(extractor)
}

/// Store one conversation turn.
///
/// # Examples
///
/// ```bash
/// sigma store "I met Alice Smith in Paris" "How was it?"
/// sigma store "..." "..." --facts-json '[{"subject":"Alice","predicate":"lives in","object":"Paris"}]'
/// ```
pub async fn store(state: &mut AppState, user: &str, assistant: &str, json: bool) -> Result<()> {
    let message_id = state
        .memory
        .store_conversation(user, assistant)
        .await
        .context("Failed to store conversation")?;

    if json {
        let out = serde_json::json!({ "id": message_id });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Stored conversation {}",
        style("✓").green().bold(),
        style(message_id).dim()
    );
    println!();
    Ok(())
}

/// Session turns first, then keyword matches from the store.
pub async fn recall(state: &AppState, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let limit = limit.unwrap_or(state.memory.config().retrieve_limit);
    let items = state.memory.retrieve_memories(query, limit).await;
    print_items(&items, query, json)
}

/// Conversation hits plus matching facts.
pub async fn search(state: &AppState, query: &str, json: bool) -> Result<()> {
    let items = state.memory.search_memories(query).await;
    print_items(&items, query, json)
}

pub async fn recent(state: &AppState, limit: Option<usize>, json: bool) -> Result<()> {
    let limit = limit.unwrap_or(state.memory.config().recent_limit);
    let messages = state.memory.recent_conversations(limit).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        print_empty("No conversations stored yet.");
        return Ok(());
    }

    let mut table = new_table(&["User", "Assistant", "Date", ""]);
    for message in &messages {
        table.add_row(message_row(message));
    }

    println!();
    println!("{table}");
    println!();
    println!("  {} conversation(s)", style(messages.len()).bold());
    println!();
    Ok(())
}

/// Entities that share a message with `name`.
pub async fn relations(state: &AppState, name: &str, limit: usize, json: bool) -> Result<()> {
    let relations = state.memory.entity_relations(name, limit).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&relations)?);
        return Ok(());
    }

    if relations.is_empty() {
        print_empty(&format!("No entities related to '{name}'."));
        return Ok(());
    }

    let mut table = new_table(&["Entity", "Type", "Relation", "Updated"]);
    for relation in &relations {
        table.add_row(vec![
            Cell::new(&relation.entity.name).fg(Color::White),
            Cell::new(&relation.entity.entity_type).fg(Color::Cyan),
            Cell::new(relation.label).fg(Color::Magenta),
            Cell::new(relation.entity.updated.format("%Y-%m-%d %H:%M")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("  Related to '{}'", style(name).cyan().bold());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn facts(state: &AppState, query: FactQuery, json: bool) -> Result<()> {
    let facts = state.memory.search_facts(&query).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }

    if facts.is_empty() {
        print_empty("No matching facts.");
        return Ok(());
    }

    let mut table = new_table(&["Subject", "Predicate", "Object", "Confidence", "Date"]);
    for fact in &facts {
        table.add_row(fact_row(fact));
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.memory.memory_stats().await;

    if json {
        let out = serde_json::json!({
            "backend": state.memory.config().backend.to_string(),
            "data_dir": state.data_dir.display().to_string(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Memory ({} backend, {})",
        style("●").cyan().bold(),
        style(state.memory.config().backend).bold(),
        style(state.data_dir.display()).dim()
    );
    println!();
    println!("  Session entries:  {}", stats.session_entries);
    println!("  Messages:         {}", stats.total_messages);
    println!("  Entities:         {}", stats.total_entities);
    println!("  Facts:            {}", stats.total_facts);
    println!("  Relationships:    {}", stats.total_relationships);
    println!();
    Ok(())
}

pub async fn consolidate(state: &AppState, json: bool) -> Result<()> {
    let flagged = state
        .memory
        .consolidate_memories()
        .await
        .context("Consolidation failed")?;

    if json {
        let out = serde_json::json!({ "consolidated": flagged });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Flagged {} conversation(s) older than {} days",
        style("✓").green().bold(),
        style(flagged).bold(),
        state.memory.config().consolidation_age_days
    );
    println!();
    Ok(())
}

fn print_items(items: &[MemoryItem], query: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }

    if items.is_empty() {
        print_empty(&format!("No memories match '{query}'."));
        return Ok(());
    }

    let mut table = new_table(&["Memory", "Response", "Source", "Type", "Date"]);
    for item in items {
        let source = match item.source {
            MemorySource::Session => Cell::new(item.source).fg(Color::Yellow),
            MemorySource::Persistent => Cell::new(item.source).fg(Color::Blue),
        };
        let kind = match item.kind {
            MemoryItemKind::Conversation => Cell::new(item.kind).fg(Color::Cyan),
            MemoryItemKind::Fact => Cell::new(item.kind).fg(Color::Magenta),
        };
        table.add_row(vec![
            Cell::new(truncate(&item.content, 60)).fg(Color::White),
            Cell::new(truncate(item.response.as_deref().unwrap_or(""), 40)).fg(Color::Grey),
            source,
            kind,
            Cell::new(item.timestamp.format("%Y-%m-%d %H:%M")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("  Memories for '{}'", style(query).cyan().bold());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn message_row(message: &Message) -> Vec<Cell> {
    let flag = if message.consolidated { "consolidated" } else { "" };
    vec![
        Cell::new(truncate(&message.content, 50)).fg(Color::White),
        Cell::new(truncate(&message.response, 50)).fg(Color::Grey),
        Cell::new(message.timestamp.format("%Y-%m-%d %H:%M")).fg(Color::DarkGrey),
        Cell::new(flag).fg(Color::DarkGrey),
    ]
}

fn fact_row(fact: &Fact) -> Vec<Cell> {
    vec![
        Cell::new(&fact.subject).fg(Color::White),
        Cell::new(&fact.predicate).fg(Color::Cyan),
        Cell::new(&fact.object).fg(Color::White),
        Cell::new(format!("{:.2}", fact.confidence)).fg(Color::Yellow),
        Cell::new(fact.timestamp.format("%Y-%m-%d")).fg(Color::DarkGrey),
    ]
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).fg(Color::White))
            .collect::<Vec<_>>(),
    );
    table
}

fn print_empty(text: &str) {
    println!();
    println!("  {} {text}", style("i").blue().bold());
    println!();
}

/// Shorten to `max` characters, counting chars rather than bytes.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_supplied_extractor_rejects_malformed_json() {
        let err = supplied_extractor(Some("not json"), None).err().unwrap();
        assert!(err.to_string().contains("--entities-json"));
    }

    #[test]
    fn test_supplied_extractor_accepts_fenced_facts() {
        let raw = "```json\n[{\"subject\":\"Alice\",\"predicate\":\"lives in\",\"object\":\"Paris\"}]\n```";
        assert!(supplied_extractor(None, Some(raw)).is_ok());
    }
}

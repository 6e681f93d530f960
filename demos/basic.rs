//! Basic Tandem Example
//!
//! Walks through the core document model without a server: structured
//! edits on a JSON document, then two clients typing into the same text
//! concurrently and converging after the server orders their changes.
//!
//! Run with: cargo run --example basic

use serde_json::json;
use tandem_core::{rebase, ChangeSet, Document, Incoming, Selection};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Tandem Basic Example\n");

    println!("=== Document ===\n");
    document_example()?;

    println!("\n=== Concurrent Text ===\n");
    concurrent_text_example()?;

    Ok(())
}

fn document_example() -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::from_value(json!({
        "title": "Quarterly review",
        "findings": [],
        "meta": {}
    }));

    doc.set("title", json!("Quarterly review (draft)"))?;
    doc.create("findings", json!({"id": "f1", "severity": "high"}))?;
    doc.create("findings", json!({"id": "f2", "severity": "low"}))?;
    doc.create("meta.owner", json!("alice"))?;
    doc.set("findings[0].severity", json!("critical"))?;

    println!("Title:    {}", doc.text("title")?);
    println!("First:    {:?}", doc.get("findings[0]"));
    println!("Owner:    {:?}", doc.get("meta.owner"));

    let removed = doc.delete("findings[1]")?;
    println!("Removed:  {}", removed);
    println!("\nDocument: {}", serde_json::to_string_pretty(doc.as_value())?);

    Ok(())
}

fn concurrent_text_example() -> Result<(), Box<dyn std::error::Error>> {
    let server_text = "ABCD";

    // We type "E" at the end while another client types "0" at the start
    let ours = ChangeSet::insert_at(4, 4, "E")?;
    let theirs = ChangeSet::insert_at(4, 0, "0")?;
    let mut local_text = ours.apply(server_text)?;
    let cursor = Selection::cursor(5);
    info!(text = %local_text, "local edit applied optimistically");

    // The server applies theirs first and relays it to us
    let rebased = rebase(
        &[ours],
        [Incoming {
            changes: &theirs,
            own: false,
        }],
    )?;
    if let Some(remote) = &rebased.remote {
        local_text = remote.apply(&local_text)?;
        let cursor = cursor.map(remote);
        info!(text = %local_text, ?cursor, "remote change merged");
    }

    // Our change, rebased, still produces the same text on the server
    let server_text = theirs.apply(server_text)?;
    let confirmed = rebased.unconfirmed[0].apply(&server_text)?;
    println!("Local:    {}", local_text);
    println!("Server:   {}", confirmed);
    assert_eq!(local_text, confirmed);

    // The echo of our change confirms it without touching the text
    let echo = rebased.unconfirmed[0].clone();
    let after_echo = rebase(
        &rebased.unconfirmed,
        [Incoming {
            changes: &echo,
            own: true,
        }],
    )?;
    println!(
        "Confirmed {} change(s), {} still pending",
        after_echo.confirmed,
        after_echo.unconfirmed.len()
    );

    Ok(())
}

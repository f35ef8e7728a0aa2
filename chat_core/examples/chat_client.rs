use anyhow::Context;
use chat_core::{Attachment, ChatClient, ChatSession};
use reqwest::Client;
use std::io::Write;
use tokio::sync::watch;

/// Usage: chat_client [--file report.pdf] <prompt>...
/// Each prompt is sent as the next turn of one conversation.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let base_url =
        std::env::var("CHAT_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());

    let mut file = None;
    let mut prompts = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--file" {
            let path = args.next().context("--file needs a path")?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            file = Some(Attachment {
                file_name: path,
                bytes,
            });
        } else {
            prompts.push(arg);
        }
    }
    if prompts.is_empty() {
        anyhow::bail!("No prompt provided. Try: chat_client \"Hello\"");
    }

    let client = ChatClient::new(Client::new(), &base_url)?;
    let mut session = ChatSession::new();

    println!("💬 Talking to {}", client.endpoint());

    for prompt in prompts {
        println!("\n🧑 {prompt}\n🤖 ");

        let (tx, mut rx) = watch::channel(String::new());
        let printer = tokio::spawn(async move {
            let mut printed = 0;
            while rx.changed().await.is_ok() {
                let text = rx.borrow_and_update().clone();
                print!("{}", &text[printed..]);
                std::io::stdout().flush().ok();
                printed = text.len();
            }
        });

        let completion = session.send(&client, &prompt, file.take(), &tx).await;
        drop(tx);
        printer.await.ok();

        if !completion.is_finished() {
            println!("\n⚠️  {}", completion.display_text());
        }
        println!();
    }

    if let Some(doc) = session.document_text() {
        println!("\n📄 Cached document context: {} characters", doc.chars().count());
    }
    Ok(())
}

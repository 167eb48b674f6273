//! Streaming Chat Demo
//!
//! Runs the full engine against a local OpenAI-compatible server with two
//! tools registered, then plays both roles of the wire protocol: every event
//! is encoded to a frame (as a server would flush it) and fed back through
//! the FrameDecoder in deliberately tiny chunks (as a client would receive
//! it).
//!
//! Usage:
//!   cargo run --example stream_chat
//!
//! Requires:
//!   - Ollama running on localhost:11434 (or set CHATWIRE_BASE_URL)
//!   - qwen3:8b model (or set CHATWIRE_MODEL)

use chatwire::{
    Engine, EngineOptions, EngineRequest, FrameDecoder, Message, Provider, WireEvent,
    encode_frame, tool,
};
use futures::StreamExt;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("{}", "=".repeat(70));
    println!("STREAMING CHAT DEMO");
    println!("Engine rounds + tool calls + framed wire protocol, end to end");
    println!("{}", "=".repeat(70));
    println!();

    // Tool 1: mock document search with progress reporting
    let search = tool("search_docs", "Search the project documentation")
        .param("query", "string")
        .build(|args, progress| async move {
            let query = args["query"].as_str().unwrap_or("").to_string();
            progress.update("running", format!("searching for '{}'", query));
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            progress.update("finishing", "ranking results");

            Ok(json!({
                "results": [
                    {"title": "Streaming overview", "path": "docs/streaming.md"},
                    {"title": "Frame grammar", "path": "docs/wire.md"}
                ],
                "query": query
            }))
        });

    // Tool 2: word counter
    let count = tool("count_words", "Count words in a text")
        .param("text", "string")
        .build(|args, _progress| async move {
            let text = args["text"].as_str().unwrap_or("");
            Ok(json!({"words": text.split_whitespace().count()}))
        });

    // CHATWIRE_MODEL overrides the default model name
    let model = std::env::var("CHATWIRE_MODEL").unwrap_or_else(|_| "qwen3:8b".to_string());

    let engine = Engine::new(
        EngineOptions::builder()
            .model(model)
            .provider(Provider::Ollama)
            .system_prompt("You are a concise assistant. Use tools when they help.")
            .tool(search)
            .tool(count)
            .tool_budget("search_docs", 3)
            .build()?,
    )?;

    let request = EngineRequest::new(vec![Message::user(
        "Search the docs for 'streaming' and tell me how many words my question had.",
    )])
    .with_conversation("demo-conversation");

    // Server side: encode each event into the frame stream.
    let mut turn = engine.start(request);
    let mut frame_bytes = Vec::new();
    println!("--- engine events ---");
    while let Some(event) = turn.next().await {
        match &event {
            WireEvent::Content { text } => print!("{}", text),
            WireEvent::ToolCall { name, .. } => println!("\n[tool call: {}]", name),
            WireEvent::ToolProgress { message, .. } => println!("[progress: {}]", message),
            WireEvent::ToolResult { name, .. } => println!("[result from: {}]", name),
            WireEvent::Status { model, .. } => println!("[routing to model: {}]", model),
            WireEvent::Error { message } => println!("[error: {}]", message),
            WireEvent::Done => println!("\n[done]"),
        }
        frame_bytes.extend_from_slice(encode_frame(&event).as_bytes());
    }

    // Client side: reconstruct the same events from awkwardly-chunked bytes.
    println!();
    println!("--- decoding {} frame bytes in 7-byte chunks ---", frame_bytes.len());
    let mut decoder = FrameDecoder::new();
    let mut display = String::new();
    let mut decoded_events = 0usize;
    for chunk in frame_bytes.chunks(7) {
        for event in decoder.feed(chunk) {
            decoded_events += 1;
            if let WireEvent::Content { text } = event {
                display.push_str(&text);
            }
        }
    }

    println!("decoded {} events; reassembled text:", decoded_events);
    println!("{}", display);

    Ok(())
}

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent::{Agent, ChatContext, Conversation};

const EXIT_WORDS: &[&str] = &["quit", "exit", "bye", "goodbye"];

const BANNER: &str = "🤖 Database Conversational Agent Started!
Type 'quit', 'exit', or 'bye' to end the conversation.
Available commands:
- Ask about accounts: 'Show me account details for account_id A-011977763'
- Ask about facilities: 'Show me facilities for account A-011977763'
- Ask about a specific facility: 'Show me facility details for facility_id F-123456'
- Save notes: 'Save this note: <content>'
- Read notes: 'Show me the notes for this account'
";

/// Interactive loop: one agent reply per input line until an exit word or EOF.
pub async fn run_repl<R, W>(
    agent: &Agent,
    ctx: &ChatContext,
    input: R,
    mut output: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(BANNER.as_bytes()).await?;
    if let Some(account_id) = &ctx.account_id {
        output
            .write_all(format!("Context account: {}\n", account_id).as_bytes())
            .await?;
    }
    if let Some(facility_id) = &ctx.facility_id {
        output
            .write_all(format!("Context facility: {}\n", facility_id).as_bytes())
            .await?;
    }

    let mut conversation = Conversation::new();
    let mut lines = input.lines();

    loop {
        output.write_all(b"\nYou: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&utterance.to_lowercase().as_str()) {
            output.write_all(b"Goodbye!\n").await?;
            break;
        }

        let reply = agent.reply(&mut conversation, utterance, ctx).await;
        output
            .write_all(format!("Agent: {}\n", reply.text).as_bytes())
            .await?;
    }

    output.flush().await?;
    log::info!("REPL: session ended after {} turn(s)", conversation.history().len() / 2);
    Ok(())
}

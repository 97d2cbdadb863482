/// Terminal consultation loop
///
/// Reads complaints line by line, asks the consultant and prints the reply.
/// The loop owns no state besides the history passed in by the caller.
/// Every answered turn is remembered, including rendered completion failures;
/// a turn whose retrieval failed is not.

use anyhow::Result;
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::rag::Consultant;
use crate::session::ChatHistory;

const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];

pub const FAREWELL: &str = "Homeopathy Doctor: Thank you for consulting! Wishing you good health! 🌿";
pub const INTERRUPTED: &str = "Homeopathy Doctor: Consultation ended. Take care!";

fn separator() -> String {
    "-".repeat(50)
}

fn issue(error: &dyn std::fmt::Display) -> String {
    format!("Homeopathy Doctor: I encountered an issue. Please try again. Error: {}", error)
}

pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    EXIT_WORDS.contains(&input.as_str())
}

async fn say<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    Ok(())
}

/// Run the read-eval loop until the patient quits or input ends
pub async fn run_consultation<C, R, W>(
    consultant: &C,
    history: &mut ChatHistory,
    input: R,
    output: &mut W,
) -> Result<()>
where
    C: Consultant + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    say(output, "🤖 Homeopathy AI Doctor is ready!").await?;
    say(output, &"=".repeat(50)).await?;
    say(output, "Please describe your symptoms... (Type 'quit' to exit)").await?;
    say(output, "").await?;

    let mut lines = input.lines();

    loop {
        output.write_all(b"Patient: ").await?;
        output.flush().await?;

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                say(output, "").await?;
                say(output, FAREWELL).await?;
                break;
            }
            // the reader has already consumed the bad line, so the next read starts fresh
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                log::warn!("Unreadable input line: {}", e);
                say(output, &issue(&e)).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let complaint = line.trim();

        if is_exit_command(complaint) {
            say(output, "").await?;
            say(output, FAREWELL).await?;
            break;
        }

        if complaint.is_empty() {
            say(output, "Homeopathy Doctor: Please describe your symptoms.").await?;
            continue;
        }

        say(output, "Homeopathy Doctor: Analyzing your symptoms...").await?;

        match consultant.consult(complaint, history).await {
            Ok(consultation) => {
                say(output, &format!("Homeopathy Doctor: {}\n", consultation.reply)).await?;
                say(output, &separator()).await?;

                history.record_turn(complaint, consultation.reply);
            }
            Err(e) => {
                log::error!("Consultation failed: {:#}", e);
                say(output, &issue(&e)).await?;
            }
        }
    }

    output.flush().await?;
    Ok(())
}

/// How a terminal consultation came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The patient quit or input ran out
    Finished,
    /// `interrupt` fired first; a read may still be pending on the input
    Interrupted,
}

/// Run the consultation until it finishes or `interrupt` resolves
///
/// On interruption the farewell for an interrupted session is printed. The
/// caller must not wait for the input afterwards: a blocking stdin read
/// cannot be cancelled, so the process has to exit instead.
pub async fn run_until_interrupted<C, R, W, I>(
    consultant: &C,
    history: &mut ChatHistory,
    input: R,
    output: &mut W,
    interrupt: I,
) -> Result<SessionEnd>
where
    C: Consultant + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: std::future::Future,
{
    let finished = tokio::select! {
        result = run_consultation(consultant, history, input, &mut *output) => {
            result?;
            true
        }
        _ = interrupt => false,
    };

    if finished {
        return Ok(SessionEnd::Finished);
    }

    say(output, "\n").await?;
    say(output, INTERRUPTED).await?;
    output.flush().await?;
    Ok(SessionEnd::Interrupted)
}
